// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Mock response engine.
//!
//! Synthesizes a response for a matched operation from the contract alone.
//! Output is deterministic: the same operation, request status header and
//! pretty flag always produce byte-identical responses.
//!
//! # Selection
//!
//! ```text
//! status  x-mock-status header (if declared) > lowest 2xx > default > lowest
//! media   application/json > first JSON type > first declared
//! body    media example > first named example > synthesized from schema
//! ```

use crate::error::SchemaError;
use crate::schema::{
    MediaType, NumberBounds, Operation, ResponseDef, RouteMatch, Schema, SchemaKind, SchemaModel,
    StringRules,
};
use crate::transaction::{is_json_media_type, ProxyRequest, ProxyResponse};
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::StatusCode;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Request header selecting which declared response to mock.
pub const MOCK_STATUS_HEADER: &str = "x-mock-status";

/// Synthesis depth budget; deeper optional properties are omitted.
const MAX_DEPTH: usize = 8;

/// Items generated per array, before `minItems`/`maxItems` clamping.
const ARRAY_LENGTH: usize = 2;

/// Builds mock responses from the contract.
#[derive(Debug, Clone, Default)]
pub struct MockEngine {
    model: Option<Arc<SchemaModel>>,
}

impl MockEngine {
    pub fn new(model: Option<Arc<SchemaModel>>) -> Self {
        Self { model }
    }

    /// Build the mocked response. Never fails: problems become a 404
    /// (no operation) or 501 (no contract, unusable schema) diagnostic body.
    pub fn generate_response(
        &self,
        request: &ProxyRequest,
        route: Option<&RouteMatch<'_>>,
        pretty: bool,
    ) -> ProxyResponse {
        let Some(model) = &self.model else {
            return diagnostic(
                StatusCode::NOT_IMPLEMENTED,
                "no contract loaded, cannot mock",
                request,
                pretty,
            );
        };
        let Some(route) = route else {
            return diagnostic(
                StatusCode::NOT_FOUND,
                "no contract operation matches this request",
                request,
                pretty,
            );
        };
        let op = route.operation;

        let requested = request
            .headers
            .get(MOCK_STATUS_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u16>().ok());
        let Some((status, def)) = select_response(op, requested) else {
            return diagnostic(
                StatusCode::NOT_IMPLEMENTED,
                "operation declares no responses",
                request,
                pretty,
            );
        };

        match Synthesizer::new(model).response(status, def, pretty) {
            Ok(response) => {
                debug!("Mocked {} -> {}", op.id, status);
                response
            }
            Err(err) => {
                warn!("Cannot mock {}: {}", op.id, err);
                diagnostic(StatusCode::NOT_IMPLEMENTED, &err.to_string(), request, pretty)
            }
        }
    }
}

fn diagnostic(
    status: StatusCode,
    message: &str,
    request: &ProxyRequest,
    pretty: bool,
) -> ProxyResponse {
    ProxyResponse::json(
        status,
        &json!({
            "error": message,
            "method": request.method.as_str(),
            "path": request.path(),
        }),
        pretty,
    )
}

/// Pick the declared response to mock and the concrete status to send.
fn select_response(op: &Operation, requested: Option<u16>) -> Option<(StatusCode, &ResponseDef)> {
    if let Some(code) = requested {
        if let Some(def) = op.responses.get(&code.to_string()) {
            return StatusCode::from_u16(code).ok().map(|s| (s, def));
        }
    }

    let mut numeric: Vec<(u16, &ResponseDef)> = op
        .responses
        .iter()
        .filter_map(|(key, def)| status_of_key(key).map(|code| (code, def)))
        .collect();
    numeric.sort_by_key(|(code, _)| *code);

    let chosen = numeric
        .iter()
        .find(|(code, _)| (200..300).contains(code))
        .copied()
        .or_else(|| op.responses.get("default").map(|def| (200, def)))
        .or_else(|| numeric.first().copied())?;
    StatusCode::from_u16(chosen.0).ok().map(|s| (s, chosen.1))
}

/// `"404"` -> 404, `"4XX"` -> 400, `default` -> none.
fn status_of_key(key: &str) -> Option<u16> {
    if let Ok(code) = key.parse::<u16>() {
        return Some(code);
    }
    let bytes = key.as_bytes();
    if bytes.len() == 3 && bytes[0].is_ascii_digit() && key[1..].eq_ignore_ascii_case("XX") {
        return Some(u16::from(bytes[0] - b'0') * 100);
    }
    None
}

/// Preferred media type entry of a content map.
fn select_media(
    content: &std::collections::BTreeMap<String, MediaType>,
) -> Option<(&str, &MediaType)> {
    content
        .get_key_value("application/json")
        .or_else(|| content.iter().find(|(k, _)| is_json_media_type(k)))
        .or_else(|| content.iter().next())
        .map(|(k, v)| (k.as_str(), v))
}

// ============================================================================
// Synthesis
// ============================================================================

struct Synthesizer<'a> {
    model: &'a SchemaModel,
    /// Component names currently being expanded (cycle detection).
    stack: Vec<String>,
}

impl<'a> Synthesizer<'a> {
    fn new(model: &'a SchemaModel) -> Self {
        Self {
            model,
            stack: Vec::new(),
        }
    }

    fn response(
        &mut self,
        status: StatusCode,
        def: &ResponseDef,
        pretty: bool,
    ) -> Result<ProxyResponse, SchemaError> {
        let mut response = ProxyResponse::new(status);

        for (name, header) in &def.headers {
            let value = match &header.schema {
                Some(schema) => self.value(schema, 0)?,
                None => Value::String("mock".into()),
            };
            let text = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            if let (Ok(name), Ok(value)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(text),
            ) {
                response.headers.insert(name, value);
            }
        }

        let Some((media_type, media)) = select_media(&def.content) else {
            return Ok(response);
        };
        let body = match media
            .example
            .clone()
            .or_else(|| media.examples.values().next().cloned())
        {
            Some(example) => example,
            None => match &media.schema {
                Some(schema) => self.value(schema, 0)?,
                None => Value::Object(Map::new()),
            },
        };

        let bytes = if is_json_media_type(media_type) {
            if pretty {
                serde_json::to_vec_pretty(&body)?
            } else {
                serde_json::to_vec(&body)?
            }
        } else {
            match body {
                Value::String(s) => s.into_bytes(),
                other => other.to_string().into_bytes(),
            }
        };
        if let Ok(value) = HeaderValue::try_from(media_type) {
            response.headers.insert(CONTENT_TYPE, value);
        }
        response.body = Bytes::from(bytes);
        Ok(response)
    }

    /// A value satisfying `schema`. Pure and deterministic.
    fn value(&mut self, schema: &Schema, depth: usize) -> Result<Value, SchemaError> {
        if depth > MAX_DEPTH {
            return Ok(Value::Null);
        }

        if let SchemaKind::Ref(name) = &schema.kind {
            if self.stack.iter().any(|n| n == name) {
                return Ok(Value::Null);
            }
            let target = self.model.resolve(schema)?;
            self.stack.push(name.clone());
            let value = self.value(target, depth + 1);
            self.stack.pop();
            return value;
        }

        if let Some(v) = schema
            .example
            .as_ref()
            .or(schema.default.as_ref())
            .or(schema.enum_values.first())
        {
            return Ok(v.clone());
        }

        Ok(match &schema.kind {
            SchemaKind::Any | SchemaKind::Ref(_) => Value::Object(Map::new()),
            SchemaKind::Boolean => Value::Bool(true),
            SchemaKind::Integer(bounds) => Value::from(integer_in(bounds)),
            SchemaKind::Number(bounds) => serde_json::Number::from_f64(number_in(bounds))
                .map(Value::Number)
                .unwrap_or(Value::from(0)),
            SchemaKind::String(rules) => Value::String(string_for(rules)),
            SchemaKind::Array(rules) => {
                let mut len = ARRAY_LENGTH;
                if let Some(min) = rules.min_items {
                    len = len.max(min);
                }
                if let Some(max) = rules.max_items {
                    len = len.min(max);
                }
                if depth >= MAX_DEPTH {
                    len = rules.min_items.unwrap_or(0);
                }
                let mut items = Vec::with_capacity(len);
                for _ in 0..len {
                    items.push(match &rules.items {
                        Some(item) => self.value(item, depth + 1)?,
                        None => Value::Object(Map::new()),
                    });
                }
                Value::Array(items)
            }
            SchemaKind::Object(rules) => {
                let mut map = Map::new();
                for (name, prop) in &rules.properties {
                    let required = rules.required.iter().any(|r| r == name);
                    if !required && (depth + 1 >= MAX_DEPTH || self.is_cyclic(prop)) {
                        continue;
                    }
                    map.insert(name.clone(), self.value(prop, depth + 1)?);
                }
                Value::Object(map)
            }
            SchemaKind::AllOf(members) => {
                let mut merged = Map::new();
                let mut scalar = None;
                for member in members {
                    match self.value(member, depth + 1)? {
                        Value::Object(part) => merged.extend(part),
                        other => {
                            scalar.get_or_insert(other);
                        }
                    }
                }
                match scalar {
                    Some(v) if merged.is_empty() => v,
                    _ => Value::Object(merged),
                }
            }
            SchemaKind::AnyOf(members) | SchemaKind::OneOf(members) => match members.first() {
                Some(first) => self.value(first, depth + 1)?,
                None => Value::Object(Map::new()),
            },
        })
    }

    /// Whether expanding `schema` would re-enter a component being expanded.
    fn is_cyclic(&self, schema: &Schema) -> bool {
        let name = match &schema.kind {
            SchemaKind::Ref(name) => Some(name),
            SchemaKind::Array(rules) => match rules.items.as_deref().map(|s| &s.kind) {
                Some(SchemaKind::Ref(name)) => Some(name),
                _ => None,
            },
            _ => None,
        };
        name.is_some_and(|n| self.stack.iter().any(|s| s == n))
    }
}

fn integer_in(bounds: &NumberBounds) -> i64 {
    let mut value: i64 = 0;
    if let Some(min) = bounds.minimum {
        value = min.ceil() as i64;
        if bounds.exclusive_minimum && (value as f64) <= min {
            value = value.saturating_add(1);
        }
    }
    if let Some(max) = bounds.maximum {
        let mut cap = max.floor() as i64;
        if bounds.exclusive_maximum && (cap as f64) >= max {
            cap = cap.saturating_sub(1);
        }
        value = value.min(cap);
    }
    value
}

fn number_in(bounds: &NumberBounds) -> f64 {
    match (bounds.minimum, bounds.maximum) {
        (Some(min), Some(max)) if bounds.exclusive_minimum || bounds.exclusive_maximum => {
            (min + max) / 2.0
        }
        (Some(min), _) if bounds.exclusive_minimum => min + 1.0,
        (Some(min), _) => min,
        (None, Some(max)) if max < 0.0 => {
            if bounds.exclusive_maximum {
                max - 1.0
            } else {
                max
            }
        }
        _ => 0.0,
    }
}

fn string_for(rules: &StringRules) -> String {
    let mut s = match rules.format.as_deref() {
        Some("date-time") => "2024-01-01T00:00:00Z",
        Some("date") => "2024-01-01",
        Some("time") => "00:00:00",
        Some("uuid") => "00000000-0000-4000-8000-000000000000",
        Some("email") => "user@example.com",
        Some("uri") | Some("url") => "https://example.com",
        Some("hostname") => "example.com",
        Some("ipv4") => "192.0.2.1",
        Some("ipv6") => "2001:db8::1",
        Some("byte") => "ZXhhbXBsZQ==",
        _ => "string",
    }
    .to_string();
    if let Some(min) = rules.min_length {
        while s.chars().count() < min {
            s.push('x');
        }
    }
    if let Some(max) = rules.max_length {
        if s.chars().count() > max {
            s = s.chars().take(max).collect();
        }
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::Validator;
    use http::{Method, Uri};

    const CONTRACT: &str = r##"
openapi: 3.0.3
info: {title: Pets, version: "1"}
paths:
  /pets:
    get:
      responses:
        '200':
          description: ok
          headers:
            X-Total: {required: true, schema: {type: integer, minimum: 3}}
          content:
            application/json:
              schema:
                type: array
                maxItems: 1
                items: {$ref: '#/components/schemas/Pet'}
        '404':
          description: missing
          content:
            application/json:
              example: {message: not here}
  /pets/{petId}:
    get:
      responses:
        '200':
          description: ok
          content:
            application/json:
              examples:
                zed: {value: {id: 2}}
                alpha: {value: {id: 1}}
  /nodes:
    get:
      responses:
        default:
          description: tree
          content:
            application/json:
              schema: {$ref: '#/components/schemas/Node'}
  /broken:
    get:
      responses:
        '200':
          description: ok
          content:
            application/json:
              schema: {$ref: '#/components/schemas/Missing'}
components:
  schemas:
    Pet:
      type: object
      required: [id, name, born]
      properties:
        id: {type: integer, minimum: 1}
        name: {type: string, minLength: 10}
        born: {type: string, format: date}
        kind: {type: string, enum: [cat, dog]}
    Node:
      type: object
      required: [name]
      properties:
        name: {type: string, example: root}
        children:
          type: array
          items: {$ref: '#/components/schemas/Node'}
        parent: {$ref: '#/components/schemas/Node'}
"##;

    fn model() -> Arc<SchemaModel> {
        Arc::new(SchemaModel::from_yaml_str(CONTRACT).unwrap())
    }

    fn mock(
        engine: &MockEngine,
        model: &SchemaModel,
        request: &ProxyRequest,
        pretty: bool,
    ) -> ProxyResponse {
        let route = model.find_operation(&request.method, request.path());
        engine.generate_response(request, route.as_ref(), pretty)
    }

    fn body_json(response: &ProxyResponse) -> Value {
        serde_json::from_slice(&response.body).unwrap()
    }

    #[test]
    fn synthesizes_body_and_headers_that_validate() {
        let model = model();
        let engine = MockEngine::new(Some(model.clone()));
        let request = ProxyRequest::new(Method::GET, Uri::from_static("/pets"));
        let response = mock(&engine, &model, &request, false);

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.headers["x-total"], "3");
        assert_eq!(response.headers[CONTENT_TYPE], "application/json");
        let body = body_json(&response);
        assert_eq!(
            body,
            json!([{"id": 1, "name": "stringxxxx", "born": "2024-01-01", "kind": "cat"}])
        );

        let validator = Validator::new(model.clone());
        let route = model.find_operation(&Method::GET, "/pets");
        assert!(validator.validate(&request, Some(&response), route.as_ref()).is_empty());
    }

    #[test]
    fn status_header_selects_declared_response() {
        let model = model();
        let engine = MockEngine::new(Some(model.clone()));
        let request = ProxyRequest::new(Method::GET, Uri::from_static("/pets"))
            .with_header(MOCK_STATUS_HEADER, "404");
        let response = mock(&engine, &model, &request, false);
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(body_json(&response), json!({"message": "not here"}));

        // Undeclared status falls back to the lowest 2xx.
        let request = ProxyRequest::new(Method::GET, Uri::from_static("/pets"))
            .with_header(MOCK_STATUS_HEADER, "418");
        assert_eq!(mock(&engine, &model, &request, false).status, StatusCode::OK);
    }

    #[test]
    fn named_examples_sorted_by_name() {
        let model = model();
        let engine = MockEngine::new(Some(model.clone()));
        let request = ProxyRequest::new(Method::GET, Uri::from_static("/pets/9"));
        assert_eq!(body_json(&mock(&engine, &model, &request, false)), json!({"id": 1}));
    }

    #[test]
    fn recursive_schema_terminates() {
        let model = model();
        let engine = MockEngine::new(Some(model.clone()));
        let request = ProxyRequest::new(Method::GET, Uri::from_static("/nodes"));
        let response = mock(&engine, &model, &request, false);
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(body_json(&response), json!({"name": "root"}));
    }

    #[test]
    fn output_is_deterministic_and_pretty_only_changes_whitespace() {
        let model = model();
        let engine = MockEngine::new(Some(model.clone()));
        let request = ProxyRequest::new(Method::GET, Uri::from_static("/pets"));
        let a = mock(&engine, &model, &request, false);
        let b = mock(&engine, &model, &request, false);
        assert_eq!(a.body, b.body);

        let pretty = mock(&engine, &model, &request, true);
        assert_ne!(a.body, pretty.body);
        assert_eq!(body_json(&a), body_json(&pretty));
    }

    #[test]
    fn failures_produce_diagnostic_bodies() {
        let model = model();
        let request = ProxyRequest::new(Method::GET, Uri::from_static("/owners"));

        let no_model = MockEngine::new(None).generate_response(&request, None, false);
        assert_eq!(no_model.status, StatusCode::NOT_IMPLEMENTED);
        assert!(!no_model.body.is_empty());

        let engine = MockEngine::new(Some(model.clone()));
        let unmatched = mock(&engine, &model, &request, false);
        assert_eq!(unmatched.status, StatusCode::NOT_FOUND);
        assert_eq!(body_json(&unmatched)["path"], "/owners");

        let request = ProxyRequest::new(Method::GET, Uri::from_static("/broken"));
        let broken = mock(&engine, &model, &request, false);
        assert_eq!(broken.status, StatusCode::NOT_IMPLEMENTED);
        assert!(body_json(&broken)["error"]
            .as_str()
            .unwrap()
            .contains("Missing"));
    }

    #[test]
    fn bounds_helpers() {
        let bounds = NumberBounds {
            minimum: Some(5.0),
            exclusive_minimum: true,
            ..Default::default()
        };
        assert_eq!(integer_in(&bounds), 6);
        let bounds = NumberBounds {
            maximum: Some(-3.0),
            ..Default::default()
        };
        assert_eq!(integer_in(&bounds), -3);
        assert_eq!(status_of_key("5XX"), Some(500));
        assert_eq!(status_of_key("default"), None);
    }

    #[test]
    fn saturated_integer_bounds_stay_in_range() {
        let bounds = NumberBounds {
            minimum: Some(1e19),
            exclusive_minimum: true,
            ..Default::default()
        };
        assert_eq!(integer_in(&bounds), i64::MAX);
        let bounds = NumberBounds {
            maximum: Some(-1e19),
            exclusive_maximum: true,
            ..Default::default()
        };
        assert_eq!(integer_in(&bounds), i64::MIN);
    }
}
