//! Structured JSON paths and property paths.
//!
//! A [`JsonPath`] is an ordered list of member segments, each optionally an
//! array step. It renders as `$.a[*].b` and can never hold more than
//! [`MAX_ARRAY_DEPTH`] array steps: [`JsonPath::array`] refuses to add a third.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::types::MAX_ARRAY_DEPTH;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JsonPathError {
    #[error("{path} exceeds two array levels")]
    TooDeep { path: String },

    #[error("malformed JSON path '{path}'")]
    Malformed { path: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Segment {
    name: String,
    is_array: bool,
}

/// `$`-rooted path with `.member` and `[*]` steps.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JsonPath {
    segments: Vec<Segment>,
    rendered: String,
}

impl JsonPath {
    /// The document root, `$`.
    pub fn root() -> Self {
        JsonPath {
            segments: Vec::new(),
            rendered: "$".to_string(),
        }
    }

    fn from_segments(segments: Vec<Segment>) -> Self {
        let mut rendered = String::from("$");
        for segment in &segments {
            rendered.push('.');
            rendered.push_str(&segment.name);
            if segment.is_array {
                rendered.push_str("[*]");
            }
        }
        JsonPath { segments, rendered }
    }

    /// Append a member step.
    pub fn child(&self, name: &str) -> JsonPath {
        let mut segments = self.segments.clone();
        segments.push(Segment {
            name: name.to_string(),
            is_array: false,
        });
        JsonPath::from_segments(segments)
    }

    /// Mark the last member as an array step.
    pub fn array(&self) -> Result<JsonPath, JsonPathError> {
        let too_deep = self.array_depth() >= MAX_ARRAY_DEPTH;
        match self.segments.last() {
            Some(last) if !last.is_array && !too_deep => {
                let mut segments = self.segments.clone();
                if let Some(last) = segments.last_mut() {
                    last.is_array = true;
                }
                Ok(JsonPath::from_segments(segments))
            }
            Some(_) if too_deep => Err(JsonPathError::TooDeep {
                path: format!("{}[*]", self.rendered),
            }),
            _ => Err(JsonPathError::Malformed {
                path: format!("{}[*]", self.rendered),
            }),
        }
    }

    /// Append `other`'s segments after this path.
    pub fn join(&self, other: &JsonPath) -> Result<JsonPath, JsonPathError> {
        if self.array_depth() + other.array_depth() > MAX_ARRAY_DEPTH {
            return Err(JsonPathError::TooDeep {
                path: format!("{}{}", self.rendered, &other.rendered[1..]),
            });
        }
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        Ok(JsonPath::from_segments(segments))
    }

    /// Number of `[*]` steps.
    pub fn array_depth(&self) -> usize {
        self.segments.iter().filter(|s| s.is_array).count()
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Name of the final member.
    pub fn last_name(&self) -> Option<&str> {
        self.segments.last().map(|s| s.name.as_str())
    }

    /// The path up to and including the `level`-th array step (1-based).
    pub fn array_prefix(&self, level: usize) -> Option<JsonPath> {
        let mut seen = 0;
        for (index, segment) in self.segments.iter().enumerate() {
            if segment.is_array {
                seen += 1;
                if seen == level {
                    return Some(JsonPath::from_segments(self.segments[..=index].to_vec()));
                }
            }
        }
        None
    }

    /// The remainder of this path below `prefix`, re-rooted at `$`.
    pub fn strip_prefix(&self, prefix: &JsonPath) -> Option<JsonPath> {
        if prefix.segments.len() > self.segments.len()
            || self.segments[..prefix.segments.len()] != prefix.segments[..]
        {
            return None;
        }
        Some(JsonPath::from_segments(
            self.segments[prefix.segments.len()..].to_vec(),
        ))
    }

    pub fn starts_with(&self, prefix: &JsonPath) -> bool {
        self.strip_prefix(prefix).is_some()
    }

    pub fn as_str(&self) -> &str {
        &self.rendered
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered)
    }
}

impl PartialOrd for JsonPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for JsonPath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rendered.cmp(&other.rendered)
    }
}

impl Serialize for JsonPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.rendered)
    }
}

impl FromStr for JsonPath {
    type Err = JsonPathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || JsonPathError::Malformed {
            path: s.to_string(),
        };
        let rest = s.strip_prefix('$').ok_or_else(malformed)?;
        let mut path = JsonPath::root();
        if rest.is_empty() {
            return Ok(path);
        }
        let rest = rest.strip_prefix('.').ok_or_else(malformed)?;

        for part in rest.split('.') {
            let (name, is_array) = match part.strip_suffix("[*]") {
                Some(name) => (name, true),
                None => (part, false),
            };
            if name.is_empty() || name.contains('[') || name.contains(']') {
                return Err(malformed());
            }
            path = path.child(name);
            if is_array {
                path = path.array().map_err(|e| match e {
                    JsonPathError::TooDeep { .. } => JsonPathError::TooDeep {
                        path: s.to_string(),
                    },
                    other => other,
                })?;
            }
        }
        Ok(path)
    }
}

/// Dot-separated chain of property full names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct PropertyPath(String);

impl PropertyPath {
    pub fn new(path: impl Into<String>) -> Self {
        PropertyPath(path.into())
    }

    /// Append a segment; joining onto an empty path yields the segment alone.
    pub fn join(&self, segment: &str) -> PropertyPath {
        if self.0.is_empty() {
            PropertyPath(segment.to_string())
        } else if segment.is_empty() {
            self.clone()
        } else {
            PropertyPath(format!("{}.{}", self.0, segment))
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.').filter(|s| !s.is_empty())
    }

    pub fn first_segment(&self) -> &str {
        self.segments().next().unwrap_or("")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The part of this path after `prefix.`, if it starts with it.
    pub fn strip_prefix(&self, prefix: &PropertyPath) -> Option<PropertyPath> {
        self.0
            .strip_prefix(prefix.as_str())
            .and_then(|rest| rest.strip_prefix('.'))
            .map(PropertyPath::new)
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PropertyPath {
    fn from(value: &str) -> Self {
        PropertyPath::new(value)
    }
}
