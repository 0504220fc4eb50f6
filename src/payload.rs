//! Payload selection from the input data document
//!
//! A message path is either the sentinel `"all"` (publish the whole
//! document) or a navigation expression made of dotted field access and
//! bracketed index access, e.g. `sensors[2].reading`, `$.a.b` or
//! `['key with spaces'][0]`.

use crate::config::MESSAGE_PATH_ALL;
use crate::error::{RunError, RunResult};
use serde_json::Value;
use std::path::Path;
use thiserror::Error;

/// Payload resolution errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PayloadError {
    #[error("No data found at message path '{path}'")]
    PathNotFound { path: String },
    #[error("Invalid message path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },
}

/// One navigation step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

/// Parsed message path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadPath {
    /// The `"all"` sentinel
    All,
    /// Navigation from the document root
    Segments(Vec<PathSegment>),
}

impl PayloadPath {
    /// Parse a message path expression
    pub fn parse(expression: &str) -> Result<Self, PayloadError> {
        let trimmed = expression.trim();
        if trimmed == MESSAGE_PATH_ALL {
            return Ok(PayloadPath::All);
        }

        let invalid = |reason: &str| PayloadError::InvalidPath {
            path: expression.to_string(),
            reason: reason.to_string(),
        };

        let mut rest = trimmed.strip_prefix('$').unwrap_or(trimmed);
        let mut segments = Vec::new();
        let mut expect_field = !rest.starts_with('.') && !rest.starts_with('[');
        let mut after_dot = false;

        while !rest.is_empty() {
            if let Some(after) = rest.strip_prefix('.') {
                if after_dot {
                    return Err(invalid("empty field name"));
                }
                rest = after;
                after_dot = true;
                expect_field = true;
                continue;
            }

            if let Some(after_bracket) = rest.strip_prefix('[') {
                let close = after_bracket
                    .find(']')
                    .ok_or_else(|| invalid("unterminated '['"))?;
                let inner = after_bracket[..close].trim();
                segments.push(parse_bracket(inner).ok_or_else(|| {
                    invalid("brackets must hold an index or a quoted field name")
                })?);
                rest = &after_bracket[close + 1..];
                after_dot = false;
                expect_field = false;
                continue;
            }

            if !expect_field {
                return Err(invalid("expected '.' or '[' between segments"));
            }

            let end = rest.find(['.', '[']).unwrap_or(rest.len());
            segments.push(PathSegment::Field(rest[..end].to_string()));
            rest = &rest[end..];
            after_dot = false;
            expect_field = false;
        }

        if after_dot {
            return Err(invalid("path ends with '.'"));
        }

        Ok(PayloadPath::Segments(segments))
    }

    /// Locate the selected value inside `document`
    pub fn select<'a>(&self, document: &'a Value) -> Option<&'a Value> {
        match self {
            PayloadPath::All => Some(document),
            PayloadPath::Segments(segments) => {
                segments
                    .iter()
                    .try_fold(document, |current, segment| match segment {
                        PathSegment::Field(name) => current.as_object()?.get(name),
                        PathSegment::Index(index) => current.as_array()?.get(*index),
                    })
            }
        }
    }
}

fn parse_bracket(inner: &str) -> Option<PathSegment> {
    if let Ok(index) = inner.parse::<usize>() {
        return Some(PathSegment::Index(index));
    }
    let quoted = inner
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| inner.strip_prefix('"').and_then(|s| s.strip_suffix('"')))?;
    Some(PathSegment::Field(quoted.to_string()))
}

/// Render a selected value as message text.
///
/// Strings are published without quotes; objects and arrays as indented
/// JSON; other scalars in their JSON form.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Object(_) | Value::Array(_) => {
            serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
        }
        other => other.to_string(),
    }
}

/// Resolves the message text for every round of a run
#[derive(Debug, Clone)]
pub struct PayloadResolver {
    expression: String,
    path: PayloadPath,
}

impl PayloadResolver {
    pub fn new(expression: &str) -> Result<Self, PayloadError> {
        Ok(Self {
            expression: expression.to_string(),
            path: PayloadPath::parse(expression)?,
        })
    }

    /// Resolver for the `"all"` sentinel
    pub fn whole_document() -> Self {
        Self {
            expression: MESSAGE_PATH_ALL.to_string(),
            path: PayloadPath::All,
        }
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Extract the text to publish from `document`
    pub fn resolve(&self, document: &Value) -> Result<String, PayloadError> {
        self.path
            .select(document)
            .map(render_value)
            .ok_or_else(|| PayloadError::PathNotFound {
                path: self.expression.clone(),
            })
    }
}

/// One-shot form of [`PayloadResolver::resolve`]
pub fn resolve(document: &Value, path: &str) -> Result<String, PayloadError> {
    PayloadResolver::new(path)?.resolve(document)
}

/// Read and parse the data document; called fresh at the start of each run
pub async fn load_document(path: &Path) -> RunResult<Value> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| RunError::DataRead {
            path: path.to_path_buf(),
            source,
        })?;
    serde_json::from_str(&content).map_err(|source| RunError::DataParse {
        path: path.to_path_buf(),
        source,
    })
}
