// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! OpenAPI 3.x document loader (JSON or YAML).
//!
//! Non-schema `$ref`s (parameters, request bodies, responses, headers,
//! examples) are inlined at load time. Schema references into
//! `#/components/schemas` stay symbolic.

use super::{
    template_segments, AdditionalProperties, ArrayRules, HeaderDef, MediaType, NumberBounds,
    ObjectRules, Operation, Parameter, ParameterLocation, RequestBody, ResponseDef, Schema,
    SchemaKind, SchemaModel, StringRules,
};
use crate::error::SchemaError;
use http::Method;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info, warn};

/// Nesting limit while converting a document into schema nodes.
const MAX_LOAD_DEPTH: usize = 64;

const METHODS: [&str; 8] = [
    "get", "put", "post", "delete", "options", "head", "patch", "trace",
];

const COMPONENT_SCHEMA_PREFIX: &str = "#/components/schemas/";

impl SchemaModel {
    /// Load a contract file; `.json` is parsed as JSON, anything else as YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        let model = if is_json {
            Self::from_json_str(&text)?
        } else {
            Self::from_yaml_str(&text)?
        };
        info!(
            "Loaded contract '{}' v{} from {} ({} operations)",
            model.title,
            model.version,
            path.display(),
            model.operations.len()
        );
        Ok(model)
    }

    pub fn from_json_str(text: &str) -> Result<Self, SchemaError> {
        let doc: Value = serde_json::from_str(text)?;
        Self::from_value(&doc)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, SchemaError> {
        let doc: Value = serde_yaml::from_str(text)?;
        Self::from_value(&doc)
    }

    /// Build the model from an already parsed document.
    pub fn from_value(doc: &Value) -> Result<Self, SchemaError> {
        let version = doc
            .get("openapi")
            .and_then(Value::as_str)
            .ok_or_else(|| SchemaError::Invalid("missing \"openapi\" version field".into()))?;
        if !version.starts_with("3.") {
            return Err(SchemaError::UnsupportedVersion(version.to_string()));
        }

        let loader = Loader { root: doc };
        let info = doc.get("info");
        let text_field = |name: &str| {
            info.and_then(|i| i.get(name))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        let mut components = HashMap::new();
        if let Some(schemas) = doc.pointer("/components/schemas").and_then(Value::as_object) {
            for (name, raw) in schemas {
                components.insert(name.clone(), loader.schema(raw, 0)?);
            }
        }

        let mut operations = Vec::new();
        if let Some(paths) = doc.get("paths").and_then(Value::as_object) {
            for (path, item) in paths {
                let item = loader.deref(item, 0)?;
                loader.path_item(path, item, &mut operations)?;
            }
        }
        debug!(
            "Contract parsed: {} operations, {} component schemas",
            operations.len(),
            components.len()
        );

        Ok(Self {
            title: text_field("title"),
            version: text_field("version"),
            base_path: base_path(doc),
            operations,
            components,
        })
    }
}

/// Path prefix of `servers[0].url`.
fn base_path(doc: &Value) -> Option<String> {
    let raw = doc.pointer("/servers/0/url").and_then(Value::as_str)?;
    let path = if raw.starts_with('/') {
        raw.to_string()
    } else {
        url::Url::parse(raw).ok()?.path().to_string()
    };
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

struct Loader<'a> {
    root: &'a Value,
}

impl<'a> Loader<'a> {
    /// Follow local `$ref`s (non-schema objects) to their target.
    fn deref(&self, value: &'a Value, depth: usize) -> Result<&'a Value, SchemaError> {
        let Some(reference) = value.get("$ref").and_then(Value::as_str) else {
            return Ok(value);
        };
        if depth >= MAX_LOAD_DEPTH {
            return Err(SchemaError::RefDepth(reference.to_string()));
        }
        let target = reference
            .strip_prefix('#')
            .and_then(|pointer| self.root.pointer(pointer))
            .ok_or_else(|| SchemaError::UnresolvedRef(reference.to_string()))?;
        self.deref(target, depth + 1)
    }

    fn path_item(
        &self,
        path: &str,
        item: &'a Value,
        out: &mut Vec<Operation>,
    ) -> Result<(), SchemaError> {
        let shared = self.parameters(item.get("parameters"))?;

        for method_name in METHODS {
            let Some(raw) = item.get(method_name) else {
                continue;
            };
            let method = Method::from_bytes(method_name.to_ascii_uppercase().as_bytes())
                .map_err(|e| SchemaError::Invalid(e.to_string()))?;

            // Operation-level parameters override path-level ones (same name + location).
            let mut parameters = shared.clone();
            for param in self.parameters(raw.get("parameters"))? {
                parameters.retain(|p| !(p.name == param.name && p.location == param.location));
                parameters.push(param);
            }

            let request_body = match raw.get("requestBody") {
                Some(body) => Some(self.request_body(self.deref(body, 0)?)?),
                None => None,
            };

            let mut responses = BTreeMap::new();
            if let Some(map) = raw.get("responses").and_then(Value::as_object) {
                for (status, def) in map {
                    let key = status.to_ascii_uppercase();
                    let key = if key == "DEFAULT" { "default".to_string() } else { key };
                    let def = self.response(&key, self.deref(def, 0)?)?;
                    responses.insert(key, def);
                }
            }

            out.push(Operation {
                id: format!("{} {}", method, path),
                operation_id: raw
                    .get("operationId")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                method,
                path: path.to_string(),
                segments: template_segments(path),
                parameters,
                request_body,
                responses,
            });
        }
        Ok(())
    }

    fn parameters(&self, list: Option<&'a Value>) -> Result<Vec<Parameter>, SchemaError> {
        let Some(list) = list.and_then(Value::as_array) else {
            return Ok(Vec::new());
        };
        let mut out = Vec::with_capacity(list.len());
        for raw in list {
            let raw = self.deref(raw, 0)?;
            let name = raw
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| SchemaError::Invalid("parameter without a name".into()))?;
            let location = match raw.get("in").and_then(Value::as_str) {
                Some("path") => ParameterLocation::Path,
                Some("query") => ParameterLocation::Query,
                Some("header") => ParameterLocation::Header,
                Some("cookie") => ParameterLocation::Cookie,
                other => {
                    return Err(SchemaError::Invalid(format!(
                        "parameter '{}' has invalid location {:?}",
                        name, other
                    )))
                }
            };
            let schema = match raw.get("schema") {
                Some(s) => Some(self.schema(s, 0)?),
                None => match raw
                    .get("content")
                    .and_then(Value::as_object)
                    .and_then(|c| c.values().next())
                    .and_then(|m| m.get("schema"))
                {
                    Some(s) => Some(self.schema(s, 0)?),
                    None => None,
                },
            };
            let required = location == ParameterLocation::Path
                || raw.get("required").and_then(Value::as_bool).unwrap_or(false);
            let name = if location == ParameterLocation::Header {
                name.to_ascii_lowercase()
            } else {
                name.to_string()
            };
            out.push(Parameter {
                name,
                location,
                required,
                schema,
            });
        }
        Ok(out)
    }

    fn request_body(&self, raw: &'a Value) -> Result<RequestBody, SchemaError> {
        Ok(RequestBody {
            required: raw.get("required").and_then(Value::as_bool).unwrap_or(false),
            content: self.content(raw.get("content"))?,
        })
    }

    fn response(&self, status: &str, raw: &'a Value) -> Result<ResponseDef, SchemaError> {
        let mut headers = BTreeMap::new();
        if let Some(map) = raw.get("headers").and_then(Value::as_object) {
            for (name, def) in map {
                let def = self.deref(def, 0)?;
                let schema = match def.get("schema") {
                    Some(s) => Some(self.schema(s, 0)?),
                    None => None,
                };
                headers.insert(
                    name.to_ascii_lowercase(),
                    HeaderDef {
                        required: def.get("required").and_then(Value::as_bool).unwrap_or(false),
                        schema,
                    },
                );
            }
        }
        Ok(ResponseDef {
            status: status.to_string(),
            description: raw
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            headers,
            content: self.content(raw.get("content"))?,
        })
    }

    fn content(&self, raw: Option<&'a Value>) -> Result<BTreeMap<String, MediaType>, SchemaError> {
        let mut out = BTreeMap::new();
        let Some(map) = raw.and_then(Value::as_object) else {
            return Ok(out);
        };
        for (media, def) in map {
            let schema = match def.get("schema") {
                Some(s) => Some(self.schema(s, 0)?),
                None => None,
            };
            let mut examples = BTreeMap::new();
            if let Some(named) = def.get("examples").and_then(Value::as_object) {
                for (name, example) in named {
                    let example = self.deref(example, 0)?;
                    if let Some(value) = example.get("value") {
                        examples.insert(name.clone(), value.clone());
                    }
                }
            }
            out.insert(
                media.to_ascii_lowercase(),
                MediaType {
                    schema,
                    example: def.get("example").cloned(),
                    examples,
                },
            );
        }
        Ok(out)
    }

    // ------------------------------------------------------------------------
    // Schemas
    // ------------------------------------------------------------------------

    fn schema(&self, raw: &'a Value, depth: usize) -> Result<Schema, SchemaError> {
        if depth >= MAX_LOAD_DEPTH {
            return Err(SchemaError::RefDepth("schema nesting".into()));
        }

        // OpenAPI 3.1 allows `true` / `false` as schemas.
        let obj = match raw {
            Value::Object(obj) => obj,
            Value::Bool(_) => return Ok(Schema::default()),
            _ => return Err(SchemaError::Invalid(format!("schema must be an object: {}", raw))),
        };

        if let Some(reference) = obj.get("$ref").and_then(Value::as_str) {
            if let Some(name) = reference.strip_prefix(COMPONENT_SCHEMA_PREFIX) {
                return Ok(Schema {
                    kind: SchemaKind::Ref(name.replace("~1", "/").replace("~0", "~")),
                    ..Default::default()
                });
            }
            let target = self.deref(raw, depth)?;
            return self.schema(target, depth + 1);
        }

        let (types, nullable_type) = type_names(obj);
        let nullable =
            nullable_type || obj.get("nullable").and_then(Value::as_bool).unwrap_or(false);

        let base = match types.as_slice() {
            [] => self.inferred_kind(obj, depth)?,
            [single] => self.typed_kind(single, obj, depth)?,
            many => {
                let mut variants = Vec::with_capacity(many.len());
                for name in many {
                    variants.push(Schema {
                        kind: self.typed_kind(name, obj, depth)?,
                        ..Default::default()
                    });
                }
                SchemaKind::AnyOf(variants)
            }
        };

        let kind = match self.composition(obj, depth)? {
            Some(composed) if matches!(base, SchemaKind::Any) => composed,
            Some(composed) => SchemaKind::AllOf(vec![
                Schema {
                    kind: composed,
                    ..Default::default()
                },
                Schema {
                    kind: base,
                    ..Default::default()
                },
            ]),
            None => base,
        };

        let example = obj.get("example").cloned().or_else(|| {
            obj.get("examples")
                .and_then(Value::as_array)
                .and_then(|list| list.first().cloned())
        });

        Ok(Schema {
            kind,
            nullable,
            enum_values: obj
                .get("enum")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
            example,
            default: obj.get("default").cloned(),
        })
    }

    fn composition(
        &self,
        obj: &'a Map<String, Value>,
        depth: usize,
    ) -> Result<Option<SchemaKind>, SchemaError> {
        for keyword in ["allOf", "anyOf", "oneOf"] {
            let Some(list) = obj.get(keyword).and_then(Value::as_array) else {
                continue;
            };
            let mut members = Vec::with_capacity(list.len());
            for member in list {
                members.push(self.schema(member, depth + 1)?);
            }
            return Ok(Some(match keyword {
                "allOf" => SchemaKind::AllOf(members),
                "anyOf" => SchemaKind::AnyOf(members),
                _ => SchemaKind::OneOf(members),
            }));
        }
        Ok(None)
    }

    fn inferred_kind(
        &self,
        obj: &'a Map<String, Value>,
        depth: usize,
    ) -> Result<SchemaKind, SchemaError> {
        if obj.contains_key("properties") || obj.contains_key("additionalProperties") {
            self.typed_kind("object", obj, depth)
        } else if obj.contains_key("items") {
            self.typed_kind("array", obj, depth)
        } else {
            Ok(SchemaKind::Any)
        }
    }

    fn typed_kind(
        &self,
        type_name: &str,
        obj: &'a Map<String, Value>,
        depth: usize,
    ) -> Result<SchemaKind, SchemaError> {
        Ok(match type_name {
            "boolean" => SchemaKind::Boolean,
            "integer" => SchemaKind::Integer(number_bounds(obj)),
            "number" => SchemaKind::Number(number_bounds(obj)),
            "string" => SchemaKind::String(string_rules(obj)?),
            "array" => SchemaKind::Array(ArrayRules {
                items: match obj.get("items") {
                    Some(items) => Some(Box::new(self.schema(items, depth + 1)?)),
                    None => None,
                },
                min_items: usize_field(obj, "minItems"),
                max_items: usize_field(obj, "maxItems"),
            }),
            "object" => {
                let mut properties = BTreeMap::new();
                if let Some(props) = obj.get("properties").and_then(Value::as_object) {
                    for (name, prop) in props {
                        properties.insert(name.clone(), self.schema(prop, depth + 1)?);
                    }
                }
                let additional = match obj.get("additionalProperties") {
                    None | Some(Value::Bool(true)) => AdditionalProperties::Allowed,
                    Some(Value::Bool(false)) => AdditionalProperties::Denied,
                    Some(schema) => {
                        AdditionalProperties::Schema(Box::new(self.schema(schema, depth + 1)?))
                    }
                };
                SchemaKind::Object(ObjectRules {
                    properties,
                    required: obj
                        .get("required")
                        .and_then(Value::as_array)
                        .map(|list| {
                            list.iter()
                                .filter_map(Value::as_str)
                                .map(str::to_string)
                                .collect()
                        })
                        .unwrap_or_default(),
                    additional,
                })
            }
            other => {
                warn!("Unknown schema type '{}', treating as free-form", other);
                SchemaKind::Any
            }
        })
    }
}

/// Declared type names (3.0 string or 3.1 array) minus `"null"`, and whether
/// `"null"` was listed.
fn type_names(obj: &Map<String, Value>) -> (Vec<String>, bool) {
    match obj.get("type") {
        Some(Value::String(t)) if t == "null" => (Vec::new(), true),
        Some(Value::String(t)) => (vec![t.clone()], false),
        Some(Value::Array(list)) => {
            let mut nullable = false;
            let mut names = Vec::new();
            for name in list.iter().filter_map(Value::as_str) {
                if name == "null" {
                    nullable = true;
                } else {
                    names.push(name.to_string());
                }
            }
            (names, nullable)
        }
        _ => (Vec::new(), false),
    }
}

fn number_bounds(obj: &Map<String, Value>) -> NumberBounds {
    let mut bounds = NumberBounds {
        minimum: obj.get("minimum").and_then(Value::as_f64),
        maximum: obj.get("maximum").and_then(Value::as_f64),
        ..Default::default()
    };
    // 3.0: boolean modifier; 3.1: the bound itself.
    match obj.get("exclusiveMinimum") {
        Some(Value::Bool(b)) => bounds.exclusive_minimum = *b,
        Some(v) => {
            if let Some(n) = v.as_f64() {
                bounds.minimum = Some(n);
                bounds.exclusive_minimum = true;
            }
        }
        None => {}
    }
    match obj.get("exclusiveMaximum") {
        Some(Value::Bool(b)) => bounds.exclusive_maximum = *b,
        Some(v) => {
            if let Some(n) = v.as_f64() {
                bounds.maximum = Some(n);
                bounds.exclusive_maximum = true;
            }
        }
        None => {}
    }
    bounds
}

fn string_rules(obj: &Map<String, Value>) -> Result<StringRules, SchemaError> {
    let pattern = match obj.get("pattern").and_then(Value::as_str) {
        Some(p) => Some(
            Regex::new(p)
                .map_err(|e| SchemaError::Invalid(format!("invalid pattern '{}': {}", p, e)))?,
        ),
        None => None,
    };
    Ok(StringRules {
        format: obj.get("format").and_then(Value::as_str).map(str::to_string),
        min_length: usize_field(obj, "minLength"),
        max_length: usize_field(obj, "maxLength"),
        pattern,
    })
}

fn usize_field(obj: &Map<String, Value>, name: &str) -> Option<usize> {
    obj.get(name)
        .and_then(Value::as_u64)
        .and_then(|n| usize::try_from(n).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PETSTORE: &str = r##"
openapi: 3.0.3
info:
  title: Petstore
  version: 1.2.0
servers:
  - url: https://api.example.com/v1/
paths:
  /pets:
    get:
      operationId: listPets
      parameters:
        - $ref: '#/components/parameters/Limit'
      responses:
        '200':
          description: ok
          headers:
            X-Total:
              required: true
              schema:
                type: integer
          content:
            application/json:
              schema:
                type: array
                items:
                  $ref: '#/components/schemas/Pet'
    post:
      requestBody:
        required: true
        content:
          application/json:
            schema:
              $ref: '#/components/schemas/Pet'
      responses:
        '201':
          $ref: '#/components/responses/Created'
  /pets/{petId}:
    parameters:
      - name: petId
        in: path
        schema:
          type: integer
    get:
      responses:
        2XX:
          description: found
        default:
          description: error
components:
  parameters:
    Limit:
      name: limit
      in: query
      schema:
        type: integer
        minimum: 1
        maximum: 100
  responses:
    Created:
      description: created
  schemas:
    Pet:
      type: object
      required: [id, name]
      properties:
        id:
          type: integer
        name:
          type: string
          minLength: 1
        tag:
          type: [string, "null"]
        parent:
          $ref: '#/components/schemas/Pet'
"##;

    #[test]
    fn loads_petstore_yaml() {
        let model = SchemaModel::from_yaml_str(PETSTORE).unwrap();
        assert_eq!(model.title, "Petstore");
        assert_eq!(model.version, "1.2.0");
        assert_eq!(model.base_path.as_deref(), Some("/v1"));
        assert_eq!(model.operations().len(), 3);

        let list = model.operation("GET /pets").unwrap();
        assert_eq!(list.operation_id.as_deref(), Some("listPets"));
        assert_eq!(list.parameters[0].name, "limit");
        assert!(list.responses["200"].headers["x-total"].required);

        let post = model.operation("POST /pets").unwrap();
        assert!(post.request_body.as_ref().unwrap().required);
        assert_eq!(post.responses["201"].description, "created");
    }

    #[test]
    fn path_level_parameters_are_inherited() {
        let model = SchemaModel::from_yaml_str(PETSTORE).unwrap();
        let op = model.operation("GET /pets/{petId}").unwrap();
        assert_eq!(op.parameters.len(), 1);
        assert!(op.parameters[0].required);
        assert!(op.responses.contains_key("2XX"));
        assert!(op.responses.contains_key("default"));
    }

    #[test]
    fn recursive_component_stays_symbolic() {
        let model = SchemaModel::from_yaml_str(PETSTORE).unwrap();
        let pet = model.component("Pet").unwrap();
        let SchemaKind::Object(rules) = &pet.kind else {
            panic!("Pet should be an object");
        };
        assert!(matches!(rules.properties["parent"].kind, SchemaKind::Ref(ref n) if n == "Pet"));
        assert!(rules.properties["tag"].nullable);
        assert_eq!(rules.required, vec!["id", "name"]);
    }

    #[test]
    fn rejects_swagger_2_and_missing_version() {
        assert!(matches!(
            SchemaModel::from_json_str(r#"{"swagger": "2.0"}"#),
            Err(SchemaError::Invalid(_))
        ));
        assert!(matches!(
            SchemaModel::from_json_str(r#"{"openapi": "2.0"}"#),
            Err(SchemaError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn unresolvable_parameter_ref_fails() {
        let doc = r##"{"openapi": "3.1.0", "paths": {"/a": {"get": {
            "parameters": [{"$ref": "#/components/parameters/Missing"}],
            "responses": {}}}}}"##;
        assert!(matches!(
            SchemaModel::from_json_str(doc),
            Err(SchemaError::UnresolvedRef(_))
        ));
    }

    #[test]
    fn exclusive_minimum_31_form() {
        let doc = r#"{"openapi": "3.1.0", "paths": {}, "components": {"schemas": {
            "N": {"type": "number", "exclusiveMinimum": 0}}}}"#;
        let model = SchemaModel::from_json_str(doc).unwrap();
        let SchemaKind::Number(bounds) = &model.component("N").unwrap().kind else {
            panic!("expected number");
        };
        assert_eq!(bounds.minimum, Some(0.0));
        assert!(bounds.exclusive_minimum);
    }
}
