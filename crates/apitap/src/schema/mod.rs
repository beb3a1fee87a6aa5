// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-memory OpenAPI contract model.
//!
//! The model is immutable once loaded and shared read-only (`Arc`) between
//! the validator and the mock engine. Component schema references are kept
//! as [`SchemaKind::Ref`] nodes and resolved on demand through
//! [`SchemaModel::resolve`], so self-referencing schemas are representable.
//! Every walker over the tree carries its own depth guard.

mod load;

use crate::error::SchemaError;
use http::Method;
use percent_encoding::percent_decode_str;
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Maximum `$ref` hops followed when resolving one schema.
pub const MAX_REF_HOPS: usize = 16;

// ============================================================================
// Schema nodes
// ============================================================================

/// A schema node with its annotation keywords.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub kind: SchemaKind,
    pub nullable: bool,
    pub enum_values: Vec<Value>,
    pub example: Option<Value>,
    pub default: Option<Value>,
}

/// Structural part of a schema node.
#[derive(Debug, Clone, Default)]
pub enum SchemaKind {
    /// No constraints (free-form).
    #[default]
    Any,
    /// Reference to `#/components/schemas/<name>`.
    Ref(String),
    Boolean,
    Integer(NumberBounds),
    Number(NumberBounds),
    String(StringRules),
    Array(ArrayRules),
    Object(ObjectRules),
    AllOf(Vec<Schema>),
    AnyOf(Vec<Schema>),
    OneOf(Vec<Schema>),
}

impl SchemaKind {
    /// JSON type name used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::Ref(_) => "reference",
            Self::Boolean => "boolean",
            Self::Integer(_) => "integer",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::AllOf(_) => "allOf",
            Self::AnyOf(_) => "anyOf",
            Self::OneOf(_) => "oneOf",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NumberBounds {
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub exclusive_minimum: bool,
    pub exclusive_maximum: bool,
}

#[derive(Debug, Clone, Default)]
pub struct StringRules {
    pub format: Option<String>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub pattern: Option<Regex>,
}

#[derive(Debug, Clone, Default)]
pub struct ArrayRules {
    pub items: Option<Box<Schema>>,
    pub min_items: Option<usize>,
    pub max_items: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct ObjectRules {
    pub properties: BTreeMap<String, Schema>,
    pub required: Vec<String>,
    pub additional: AdditionalProperties,
}

#[derive(Debug, Clone, Default)]
pub enum AdditionalProperties {
    #[default]
    Allowed,
    Denied,
    Schema(Box<Schema>),
}

// ============================================================================
// Operations
// ============================================================================

/// Parameter location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterLocation {
    Path,
    Query,
    Header,
    Cookie,
}

#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub location: ParameterLocation,
    pub required: bool,
    pub schema: Option<Schema>,
}

/// A media type entry of a request body or response.
#[derive(Debug, Clone, Default)]
pub struct MediaType {
    pub schema: Option<Schema>,
    pub example: Option<Value>,
    /// Named examples (`examples.<name>.value`), sorted by name.
    pub examples: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default)]
pub struct RequestBody {
    pub required: bool,
    pub content: BTreeMap<String, MediaType>,
}

#[derive(Debug, Clone)]
pub struct HeaderDef {
    pub required: bool,
    pub schema: Option<Schema>,
}

/// A declared response for one status key (`200`, `4XX`, `default`).
#[derive(Debug, Clone, Default)]
pub struct ResponseDef {
    pub status: String,
    pub description: String,
    pub headers: BTreeMap<String, HeaderDef>,
    pub content: BTreeMap<String, MediaType>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Literal(String),
    Param(String),
}

/// One method on one path.
#[derive(Debug, Clone)]
pub struct Operation {
    /// Scope id used by control settings: `GET /pets/{petId}`.
    pub id: String,
    pub operation_id: Option<String>,
    pub method: Method,
    pub path: String,
    pub segments: Vec<PathSegment>,
    pub parameters: Vec<Parameter>,
    pub request_body: Option<RequestBody>,
    pub responses: BTreeMap<String, ResponseDef>,
}

impl Operation {
    pub fn parameters_in(&self, location: ParameterLocation) -> impl Iterator<Item = &Parameter> {
        self.parameters
            .iter()
            .filter(move |p| p.location == location)
    }

    /// Declared response for an actual status code: exact key, then the
    /// `NXX` range, then `default`.
    pub fn response_for(&self, status: u16) -> Option<&ResponseDef> {
        let exact = status.to_string();
        let range = format!("{}XX", status / 100);
        self.responses
            .get(&exact)
            .or_else(|| self.responses.get(&range))
            .or_else(|| self.responses.get("default"))
    }

    /// Match `path` segments against this template.
    fn match_path(&self, segments: &[&str]) -> Option<(usize, BTreeMap<String, String>)> {
        if segments.len() != self.segments.len() {
            return None;
        }
        let mut literals = 0;
        let mut params = BTreeMap::new();
        for (template, actual) in self.segments.iter().zip(segments) {
            match template {
                PathSegment::Literal(lit) if lit == actual => literals += 1,
                PathSegment::Literal(_) => return None,
                PathSegment::Param(name) => {
                    if actual.is_empty() {
                        return None;
                    }
                    let value = percent_decode_str(actual).decode_utf8_lossy();
                    params.insert(name.clone(), value.into_owned());
                }
            }
        }
        Some((literals, params))
    }
}

/// An operation matched against a concrete request path.
#[derive(Debug, Clone)]
pub struct RouteMatch<'a> {
    pub operation: &'a Operation,
    pub path_params: BTreeMap<String, String>,
}

// ============================================================================
// Model
// ============================================================================

/// The parsed contract.
#[derive(Debug, Clone, Default)]
pub struct SchemaModel {
    pub title: String,
    pub version: String,
    /// Path prefix of the first declared server (`/v1`), if any.
    pub base_path: Option<String>,
    operations: Vec<Operation>,
    components: HashMap<String, Schema>,
}

impl SchemaModel {
    pub fn new(
        operations: Vec<Operation>,
        components: HashMap<String, Schema>,
    ) -> Self {
        Self {
            operations,
            components,
            ..Default::default()
        }
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn operation(&self, id: &str) -> Option<&Operation> {
        self.operations.iter().find(|op| op.id == id)
    }

    pub fn component(&self, name: &str) -> Option<&Schema> {
        self.components.get(name)
    }

    /// Follow `Ref` nodes until a concrete schema is reached.
    pub fn resolve<'a>(&'a self, schema: &'a Schema) -> Result<&'a Schema, SchemaError> {
        let mut current = schema;
        for _ in 0..MAX_REF_HOPS {
            match &current.kind {
                SchemaKind::Ref(name) => {
                    current = self
                        .components
                        .get(name)
                        .ok_or_else(|| SchemaError::UnresolvedRef(name.clone()))?;
                }
                _ => return Ok(current),
            }
        }
        match &current.kind {
            SchemaKind::Ref(name) => Err(SchemaError::RefDepth(name.clone())),
            _ => Ok(current),
        }
    }

    /// Find the operation serving `method` + `path`. Templates with more
    /// literal segments win over more generic ones.
    pub fn find_operation(&self, method: &Method, path: &str) -> Option<RouteMatch<'_>> {
        let path = self.strip_base_path(path);
        let segments = split_path(path);

        let mut best: Option<(usize, RouteMatch<'_>)> = None;
        for op in self.operations.iter().filter(|op| op.method == *method) {
            let Some((score, path_params)) = op.match_path(&segments) else {
                continue;
            };
            if best.as_ref().map_or(true, |(s, _)| score > *s) {
                best = Some((
                    score,
                    RouteMatch {
                        operation: op,
                        path_params,
                    },
                ));
            }
        }
        best.map(|(_, m)| m)
    }

    fn strip_base_path<'p>(&self, path: &'p str) -> &'p str {
        match self.base_path.as_deref() {
            Some(base) if !base.is_empty() && base != "/" => match path.strip_prefix(base) {
                Some(rest) if rest.is_empty() => "/",
                Some(rest) if rest.starts_with('/') => rest,
                _ => path,
            },
            _ => path,
        }
    }
}

/// Split a path into segments, ignoring a trailing slash.
pub(crate) fn split_path(path: &str) -> Vec<&str> {
    let trimmed = path.trim_start_matches('/').trim_end_matches('/');
    if trimmed.is_empty() {
        Vec::new()
    } else {
        trimmed.split('/').collect()
    }
}

/// Parse a path template into segments.
pub(crate) fn template_segments(path: &str) -> Vec<PathSegment> {
    split_path(path)
        .into_iter()
        .map(|seg| {
            if seg.len() > 2 && seg.starts_with('{') && seg.ends_with('}') {
                PathSegment::Param(seg[1..seg.len() - 1].to_string())
            } else {
                PathSegment::Literal(seg.to_string())
            }
        })
        .collect()
}
