// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Contract validator.
//!
//! Checks a request (and optionally its response) against the matched
//! operation and produces a structured list of [`Violation`]s. The validator
//! is stateless: it performs no I/O, never mutates its inputs and can be
//! shared freely between tasks.
//!
//! # Checks
//!
//! ```text
//! request   path params, query params, headers, cookies,
//!           body presence, content type, JSON body vs schema
//! response  declared status (exact / NXX / default), required headers,
//!           content type, JSON body vs schema
//! ```

use crate::schema::{
    AdditionalProperties, MediaType, NumberBounds, Operation, ParameterLocation, RouteMatch,
    Schema, SchemaKind, SchemaModel, StringRules,
};
use crate::transaction::{is_json_media_type, ProxyRequest, ProxyResponse, ViolationSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Nesting limit while walking a value against a schema.
const MAX_VALIDATION_DEPTH: usize = 64;

/// Where a violation was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationLocation {
    Path,
    Query,
    Header,
    Cookie,
    Body,
    /// No contract operation matches the request.
    Route,
    /// Response status not declared by the operation.
    Status,
}

impl ViolationLocation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Path => "path",
            Self::Query => "query",
            Self::Header => "header",
            Self::Cookie => "cookie",
            Self::Body => "body",
            Self::Route => "route",
            Self::Status => "status",
        }
    }
}

/// One contract violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub location: ViolationLocation,
    /// Parameter or header name, or a JSON pointer into the body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
}

impl Violation {
    pub fn new(location: ViolationLocation, reason: impl Into<String>) -> Self {
        Self {
            location,
            field: None,
            reason: reason.into(),
            expected: None,
            actual: None,
        }
    }

    pub fn field(mut self, field: impl Into<String>) -> Self {
        let field = field.into();
        self.field = if field.is_empty() { None } else { Some(field) };
        self
    }

    pub fn expected(mut self, expected: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self
    }

    pub fn actual(mut self, actual: impl Into<String>) -> Self {
        self.actual = Some(actual.into());
        self
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}", self.location.as_str())?;
        if let Some(field) = &self.field {
            write!(f, " {}", field)?;
        }
        write!(f, "] {}", self.reason)?;
        if let Some(expected) = &self.expected {
            write!(f, " (expected {}", expected)?;
            if let Some(actual) = &self.actual {
                write!(f, ", got {}", actual)?;
            }
            f.write_str(")")?;
        }
        Ok(())
    }
}

// ============================================================================
// Validator
// ============================================================================

/// Validates traffic against a [`SchemaModel`].
#[derive(Debug, Clone)]
pub struct Validator {
    model: Arc<SchemaModel>,
}

impl Validator {
    pub fn new(model: Arc<SchemaModel>) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &Arc<SchemaModel> {
        &self.model
    }

    /// Validate a request, and its response when given.
    ///
    /// Without a matched operation the result is a single `route` violation.
    pub fn validate(
        &self,
        request: &ProxyRequest,
        response: Option<&ProxyResponse>,
        route: Option<&RouteMatch<'_>>,
    ) -> ViolationSet {
        let Some(route) = route else {
            return ViolationSet {
                request: vec![unmatched_route(request)],
                response: Vec::new(),
            };
        };
        ViolationSet {
            request: self.validate_request(request, route),
            response: response
                .map(|r| self.validate_response(r, route.operation))
                .unwrap_or_default(),
        }
    }

    /// Request-side checks for a matched operation.
    pub fn validate_request(
        &self,
        request: &ProxyRequest,
        route: &RouteMatch<'_>,
    ) -> Vec<Violation> {
        let op = route.operation;
        let mut out = Vec::new();

        for param in op.parameters_in(ParameterLocation::Path) {
            match route.path_params.get(&param.name) {
                Some(raw) => self.check_param(
                    ParameterLocation::Path,
                    &param.name,
                    &[raw.clone()],
                    param.schema.as_ref(),
                    &mut out,
                ),
                None => out.push(missing(ViolationLocation::Path, &param.name, "path parameter")),
            }
        }

        let mut query: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (key, value) in request.query_pairs() {
            query.entry(key).or_default().push(value);
        }
        for param in op.parameters_in(ParameterLocation::Query) {
            match query.get(&param.name) {
                Some(values) => self.check_param(
                    ParameterLocation::Query,
                    &param.name,
                    values,
                    param.schema.as_ref(),
                    &mut out,
                ),
                None if param.required => {
                    out.push(missing(ViolationLocation::Query, &param.name, "query parameter"))
                }
                None => {}
            }
        }

        for param in op.parameters_in(ParameterLocation::Header) {
            let values: Vec<String> = request
                .headers
                .get_all(param.name.as_str())
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .collect();
            if values.is_empty() {
                if param.required {
                    out.push(missing(ViolationLocation::Header, &param.name, "header"));
                }
            } else {
                self.check_param(
                    ParameterLocation::Header,
                    &param.name,
                    &values,
                    param.schema.as_ref(),
                    &mut out,
                );
            }
        }

        let cookies = request.cookies();
        for param in op.parameters_in(ParameterLocation::Cookie) {
            match cookies.get(&param.name) {
                Some(raw) => self.check_param(
                    ParameterLocation::Cookie,
                    &param.name,
                    &[raw.clone()],
                    param.schema.as_ref(),
                    &mut out,
                ),
                None if param.required => {
                    out.push(missing(ViolationLocation::Cookie, &param.name, "cookie"))
                }
                None => {}
            }
        }

        if let Some(body_def) = &op.request_body {
            if request.body.is_empty() {
                if body_def.required {
                    out.push(Violation::new(
                        ViolationLocation::Body,
                        "missing required request body",
                    ));
                }
            } else {
                self.check_body(request.media_type(), &request.body, &body_def.content, &mut out);
            }
        }

        out
    }

    /// Response-side checks for an operation.
    pub fn validate_response(&self, response: &ProxyResponse, op: &Operation) -> Vec<Violation> {
        let mut out = Vec::new();
        let status = response.status.as_u16();
        let Some(def) = op.response_for(status) else {
            let declared: Vec<&str> = op.responses.keys().map(String::as_str).collect();
            out.push(
                Violation::new(ViolationLocation::Status, "undeclared response status")
                    .expected(declared.join(", "))
                    .actual(status.to_string()),
            );
            return out;
        };

        for (name, header) in &def.headers {
            let values: Vec<String> = response
                .headers
                .get_all(name.as_str())
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .collect();
            if values.is_empty() {
                if header.required {
                    out.push(missing(ViolationLocation::Header, name, "response header"));
                }
            } else {
                self.check_param(
                    ParameterLocation::Header,
                    name,
                    &values,
                    header.schema.as_ref(),
                    &mut out,
                );
            }
        }

        if !def.content.is_empty() && !response.body.is_empty() {
            self.check_body(response.media_type(), &response.body, &def.content, &mut out);
        }
        out
    }

    fn check_body(
        &self,
        media_type: Option<String>,
        body: &[u8],
        content: &BTreeMap<String, MediaType>,
        out: &mut Vec<Violation>,
    ) {
        if content.is_empty() {
            return;
        }
        let actual = media_type.unwrap_or_default();
        let Some(media) = lookup_media(content, &actual) else {
            let declared: Vec<&str> = content.keys().map(String::as_str).collect();
            out.push(
                Violation::new(ViolationLocation::Header, "unsupported content type")
                    .field("content-type")
                    .expected(declared.join(", "))
                    .actual(if actual.is_empty() { "none".to_string() } else { actual }),
            );
            return;
        };
        if !is_json_media_type(&actual) {
            return;
        }
        let value: Value = match serde_json::from_slice(body) {
            Ok(value) => value,
            Err(err) => {
                out.push(
                    Violation::new(ViolationLocation::Body, "body is not valid JSON")
                        .actual(err.to_string()),
                );
                return;
            }
        };
        if let Some(schema) = &media.schema {
            self.check_value(schema, &value, ViolationLocation::Body, "", 0, out);
        }
    }

    fn check_param(
        &self,
        location: ParameterLocation,
        name: &str,
        raw: &[String],
        schema: Option<&Schema>,
        out: &mut Vec<Violation>,
    ) {
        let Some(schema) = schema else { return };
        let location = match location {
            ParameterLocation::Path => ViolationLocation::Path,
            ParameterLocation::Query => ViolationLocation::Query,
            ParameterLocation::Header => ViolationLocation::Header,
            ParameterLocation::Cookie => ViolationLocation::Cookie,
        };
        let value = self.coerce_param(schema, raw);
        self.check_value(schema, &value, location, name, 0, out);
    }

    /// Turn raw parameter text into a JSON value shaped like `schema`.
    /// Unparseable text stays a string and fails the type check.
    fn coerce_param(&self, schema: &Schema, raw: &[String]) -> Value {
        let resolved = self.model.resolve(schema).ok();
        match resolved.map(|s| &s.kind) {
            Some(SchemaKind::Array(rules)) => {
                let parts: Vec<&str> = if raw.len() == 1 {
                    raw[0].split(',').collect()
                } else {
                    raw.iter().map(String::as_str).collect()
                };
                let items = rules.items.as_deref();
                Value::Array(
                    parts
                        .into_iter()
                        .map(|p| match items {
                            Some(item) => self.coerce_param(item, &[p.to_string()]),
                            None => Value::String(p.to_string()),
                        })
                        .collect(),
                )
            }
            Some(kind) => {
                let text = raw.first().map(String::as_str).unwrap_or_default();
                coerce_scalar(kind, text)
            }
            None => Value::String(raw.first().cloned().unwrap_or_default()),
        }
    }

    // ------------------------------------------------------------------------
    // Schema walk
    // ------------------------------------------------------------------------

    fn check_value(
        &self,
        schema: &Schema,
        value: &Value,
        location: ViolationLocation,
        field: &str,
        depth: usize,
        out: &mut Vec<Violation>,
    ) {
        if depth > MAX_VALIDATION_DEPTH {
            out.push(Violation::new(location, "schema nesting too deep").field(field));
            return;
        }
        let schema = match self.model.resolve(schema) {
            Ok(schema) => schema,
            Err(err) => {
                out.push(Violation::new(location, err.to_string()).field(field));
                return;
            }
        };

        if value.is_null() {
            if !(schema.nullable
                || matches!(schema.kind, SchemaKind::Any)
                || schema.enum_values.contains(&Value::Null))
            {
                out.push(type_mismatch(location, field, schema.kind.type_name(), value));
            }
            return;
        }

        if !schema.enum_values.is_empty() && !schema.enum_values.contains(value) {
            let allowed: Vec<String> = schema.enum_values.iter().map(Value::to_string).collect();
            out.push(
                Violation::new(location, "value not in enum")
                    .field(field)
                    .expected(allowed.join(", "))
                    .actual(value.to_string()),
            );
            return;
        }

        match &schema.kind {
            SchemaKind::Any | SchemaKind::Ref(_) => {}
            SchemaKind::Boolean => {
                if !value.is_boolean() {
                    out.push(type_mismatch(location, field, "boolean", value));
                }
            }
            SchemaKind::Integer(bounds) => match value.as_f64() {
                Some(n) if n.fract() == 0.0 => check_bounds(bounds, n, location, field, out),
                _ => out.push(type_mismatch(location, field, "integer", value)),
            },
            SchemaKind::Number(bounds) => match value.as_f64() {
                Some(n) => check_bounds(bounds, n, location, field, out),
                None => out.push(type_mismatch(location, field, "number", value)),
            },
            SchemaKind::String(rules) => match value.as_str() {
                Some(s) => check_string(rules, s, location, field, out),
                None => out.push(type_mismatch(location, field, "string", value)),
            },
            SchemaKind::Array(rules) => {
                let Some(items) = value.as_array() else {
                    out.push(type_mismatch(location, field, "array", value));
                    return;
                };
                if let Some(min) = rules.min_items {
                    if items.len() < min {
                        out.push(
                            Violation::new(location, "too few items")
                                .field(field)
                                .expected(format!(">= {}", min))
                                .actual(items.len().to_string()),
                        );
                    }
                }
                if let Some(max) = rules.max_items {
                    if items.len() > max {
                        out.push(
                            Violation::new(location, "too many items")
                                .field(field)
                                .expected(format!("<= {}", max))
                                .actual(items.len().to_string()),
                        );
                    }
                }
                if let Some(item_schema) = &rules.items {
                    for (i, item) in items.iter().enumerate() {
                        let child = format!("{}/{}", field, i);
                        self.check_value(item_schema, item, location, &child, depth + 1, out);
                    }
                }
            }
            SchemaKind::Object(rules) => {
                let Some(map) = value.as_object() else {
                    out.push(type_mismatch(location, field, "object", value));
                    return;
                };
                for name in &rules.required {
                    if !map.contains_key(name) {
                        out.push(
                            Violation::new(location, "missing required property")
                                .field(child_pointer(field, name)),
                        );
                    }
                }
                for (name, item) in map {
                    let child = child_pointer(field, name);
                    match rules.properties.get(name) {
                        Some(prop) => {
                            self.check_value(prop, item, location, &child, depth + 1, out)
                        }
                        None => match &rules.additional {
                            AdditionalProperties::Allowed => {}
                            AdditionalProperties::Denied => out.push(
                                Violation::new(location, "unexpected property").field(child),
                            ),
                            AdditionalProperties::Schema(extra) => {
                                self.check_value(extra, item, location, &child, depth + 1, out)
                            }
                        },
                    }
                }
            }
            SchemaKind::AllOf(members) => {
                for member in members {
                    self.check_value(member, value, location, field, depth + 1, out);
                }
            }
            SchemaKind::AnyOf(members) => {
                let matched = members
                    .iter()
                    .any(|m| self.matches(m, value, location, field, depth + 1));
                if !matched {
                    out.push(
                        Violation::new(location, "value matches no anyOf alternative").field(field),
                    );
                }
            }
            SchemaKind::OneOf(members) => {
                let count = members
                    .iter()
                    .filter(|m| self.matches(m, value, location, field, depth + 1))
                    .count();
                if count != 1 {
                    out.push(
                        Violation::new(location, "value must match exactly one oneOf alternative")
                            .field(field)
                            .expected("1")
                            .actual(count.to_string()),
                    );
                }
            }
        }
    }

    fn matches(
        &self,
        schema: &Schema,
        value: &Value,
        location: ViolationLocation,
        field: &str,
        depth: usize,
    ) -> bool {
        let mut scratch = Vec::new();
        self.check_value(schema, value, location, field, depth, &mut scratch);
        scratch.is_empty()
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn unmatched_route(request: &ProxyRequest) -> Violation {
    Violation::new(ViolationLocation::Route, "unmatched route")
        .actual(format!("{} {}", request.method, request.path()))
}

fn missing(location: ViolationLocation, name: &str, what: &str) -> Violation {
    Violation::new(location, format!("missing required {}", what)).field(name)
}

fn type_mismatch(
    location: ViolationLocation,
    field: &str,
    expected: &str,
    value: &Value,
) -> Violation {
    Violation::new(location, "type mismatch")
        .field(field)
        .expected(expected)
        .actual(json_type(value))
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// JSON pointer child, escaping `~` and `/`.
fn child_pointer(parent: &str, key: &str) -> String {
    format!("{}/{}", parent, key.replace('~', "~0").replace('/', "~1"))
}

/// Declared media type for `actual`: exact, then `type/*`, then `*/*`.
fn lookup_media<'a>(
    content: &'a BTreeMap<String, MediaType>,
    actual: &str,
) -> Option<&'a MediaType> {
    if let Some(media) = content.get(actual) {
        return Some(media);
    }
    if let Some((major, _)) = actual.split_once('/') {
        if let Some(media) = content.get(&format!("{}/*", major)) {
            return Some(media);
        }
    }
    content.get("*/*")
}

fn coerce_scalar(kind: &SchemaKind, text: &str) -> Value {
    let parsed = match kind {
        SchemaKind::Integer(_) => text.parse::<i64>().ok().map(Value::from),
        SchemaKind::Number(_) => text
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),
        SchemaKind::Boolean => match text {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        SchemaKind::Object(_) => serde_json::from_str::<Value>(text).ok().filter(Value::is_object),
        _ => None,
    };
    parsed.unwrap_or_else(|| Value::String(text.to_string()))
}

fn check_bounds(
    bounds: &NumberBounds,
    n: f64,
    location: ViolationLocation,
    field: &str,
    out: &mut Vec<Violation>,
) {
    if let Some(min) = bounds.minimum {
        let below = if bounds.exclusive_minimum { n <= min } else { n < min };
        if below {
            let op = if bounds.exclusive_minimum { ">" } else { ">=" };
            out.push(
                Violation::new(location, "value below minimum")
                    .field(field)
                    .expected(format!("{} {}", op, min))
                    .actual(n.to_string()),
            );
        }
    }
    if let Some(max) = bounds.maximum {
        let above = if bounds.exclusive_maximum { n >= max } else { n > max };
        if above {
            let op = if bounds.exclusive_maximum { "<" } else { "<=" };
            out.push(
                Violation::new(location, "value above maximum")
                    .field(field)
                    .expected(format!("{} {}", op, max))
                    .actual(n.to_string()),
            );
        }
    }
}

fn check_string(
    rules: &StringRules,
    s: &str,
    location: ViolationLocation,
    field: &str,
    out: &mut Vec<Violation>,
) {
    let len = s.chars().count();
    if let Some(min) = rules.min_length {
        if len < min {
            out.push(
                Violation::new(location, "string too short")
                    .field(field)
                    .expected(format!("length >= {}", min))
                    .actual(len.to_string()),
            );
        }
    }
    if let Some(max) = rules.max_length {
        if len > max {
            out.push(
                Violation::new(location, "string too long")
                    .field(field)
                    .expected(format!("length <= {}", max))
                    .actual(len.to_string()),
            );
        }
    }
    if let Some(pattern) = &rules.pattern {
        if !pattern.is_match(s) {
            out.push(
                Violation::new(location, "string does not match pattern")
                    .field(field)
                    .expected(pattern.as_str())
                    .actual(s),
            );
        }
    }
    if let Some(format) = rules.format.as_deref() {
        if !format_matches(format, s) {
            out.push(
                Violation::new(location, "invalid string format")
                    .field(field)
                    .expected(format)
                    .actual(s),
            );
        }
    }
}

/// Known formats are checked; unknown ones always pass.
fn format_matches(format: &str, s: &str) -> bool {
    match format {
        "date-time" => chrono::DateTime::parse_from_rfc3339(s).is_ok(),
        "date" => chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok(),
        "uuid" => uuid::Uuid::parse_str(s).is_ok(),
        "email" => s
            .split_once('@')
            .is_some_and(|(user, host)| !user.is_empty() && host.contains('.')),
        "ipv4" => s.parse::<std::net::Ipv4Addr>().is_ok(),
        "ipv6" => s.parse::<std::net::Ipv6Addr>().is_ok(),
        "uri" => url::Url::parse(s).is_ok(),
        _ => true,
    }
}
