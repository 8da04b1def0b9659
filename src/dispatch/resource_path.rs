use axum::http::Method;
use serde_json::Value;
use std::fmt;

use crate::error::PathError;
use crate::model::EntityRecord;

/// One key literal from a path segment, optionally named (`Id=7`).
pub type KeyLiteral = (Option<String>, String);

/// A request path, relative to the service root.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourcePath {
    ServiceDocument,
    Metadata,
    Batch,
    /// `Projects`
    EntitySet(String),
    /// `Projects(7)`
    Entity {
        entity_set: String,
        key: Vec<KeyLiteral>,
    },
    /// `Projects(7)/Owners`
    Navigation {
        entity_set: String,
        key: Vec<KeyLiteral>,
        navigation: String,
    },
    /// `$1` or `$1/Owners`: refers to an entity created earlier in the same batch
    ContentIdReference {
        content_id: String,
        navigation: Option<String>,
    },
}

impl ResourcePath {
    pub fn parse(path: &str) -> Result<Self, PathError> {
        let path = path.trim_matches('/');
        match path {
            "" => return Ok(ResourcePath::ServiceDocument),
            "$metadata" => return Ok(ResourcePath::Metadata),
            "$batch" => return Ok(ResourcePath::Batch),
            _ => {}
        }

        let segments = split_outside_quotes(path, '/');
        if segments.iter().any(|s| s.is_empty()) {
            return Err(PathError::Empty);
        }
        let (first, rest) = match segments.split_first() {
            Some(split) => split,
            None => return Err(PathError::Empty),
        };
        let navigation = match rest {
            [] => None,
            [navigation] => Some(parse_identifier(navigation)?),
            [_, unexpected, ..] => return Err(PathError::UnexpectedSegment(unexpected.to_string())),
        };

        if let Some(content_id) = first.strip_prefix('$') {
            if content_id.is_empty() || !content_id.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(PathError::UnexpectedSegment(first.to_string()));
            }
            return Ok(ResourcePath::ContentIdReference {
                content_id: content_id.to_string(),
                navigation,
            });
        }

        let (entity_set, key) = parse_entity_segment(first)?;
        match (key, navigation) {
            (None, None) => Ok(ResourcePath::EntitySet(entity_set)),
            (Some(key), None) => Ok(ResourcePath::Entity { entity_set, key }),
            (Some(key), Some(navigation)) => Ok(ResourcePath::Navigation {
                entity_set,
                key,
                navigation,
            }),
            // Navigation needs a single entity to start from
            (None, Some(navigation)) => Err(PathError::UnexpectedSegment(navigation)),
        }
    }

    pub fn entity_set(&self) -> Option<&str> {
        match self {
            ResourcePath::EntitySet(entity_set)
            | ResourcePath::Entity { entity_set, .. }
            | ResourcePath::Navigation { entity_set, .. } => Some(entity_set),
            _ => None,
        }
    }

    pub fn key(&self) -> Option<&[KeyLiteral]> {
        match self {
            ResourcePath::Entity { key, .. } | ResourcePath::Navigation { key, .. } => Some(key),
            _ => None,
        }
    }

    pub fn navigation(&self) -> Option<&str> {
        match self {
            ResourcePath::Navigation { navigation, .. } => Some(navigation),
            ResourcePath::ContentIdReference { navigation, .. } => navigation.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourcePath::ServiceDocument => Ok(()),
            ResourcePath::Metadata => write!(f, "$metadata"),
            ResourcePath::Batch => write!(f, "$batch"),
            ResourcePath::EntitySet(entity_set) => write!(f, "{}", entity_set),
            ResourcePath::Entity { entity_set, key } => {
                write!(f, "{}({})", entity_set, render_key(key))
            }
            ResourcePath::Navigation {
                entity_set,
                key,
                navigation,
            } => write!(f, "{}({})/{}", entity_set, render_key(key), navigation),
            ResourcePath::ContentIdReference {
                content_id,
                navigation: Some(navigation),
            } => write!(f, "${}/{}", content_id, navigation),
            ResourcePath::ContentIdReference { content_id, .. } => write!(f, "${}", content_id),
        }
    }
}

fn render_key(key: &[KeyLiteral]) -> String {
    key.iter()
        .map(|(name, literal)| match name {
            Some(name) => format!("{}={}", name, literal),
            None => literal.clone(),
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Split on `separator`, ignoring separators inside single-quoted literals.
fn split_outside_quotes(input: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        if c == '\'' {
            in_quotes = !in_quotes;
        } else if c == separator && !in_quotes {
            parts.push(&input[start..i]);
            start = i + c.len_utf8();
        }
    }
    parts.push(&input[start..]);
    parts
}

fn parse_identifier(segment: &str) -> Result<String, PathError> {
    let valid = !segment.is_empty()
        && segment.chars().all(|c| c.is_alphanumeric() || c == '_')
        && !segment.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(segment.to_string())
    } else {
        Err(PathError::UnexpectedSegment(segment.to_string()))
    }
}

fn parse_entity_segment(segment: &str) -> Result<(String, Option<Vec<KeyLiteral>>), PathError> {
    let Some(open) = segment.find('(') else {
        return Ok((parse_identifier(segment)?, None));
    };
    let inner = segment[open + 1..]
        .strip_suffix(')')
        .ok_or_else(|| PathError::MalformedKey(segment.to_string()))?;
    if inner.trim().is_empty() {
        return Err(PathError::MalformedKey(segment.to_string()));
    }

    let mut key = Vec::new();
    for part in split_outside_quotes(inner, ',') {
        match split_outside_quotes(part, '=').as_slice() {
            [literal] if !literal.trim().is_empty() => key.push((None, literal.trim().to_string())),
            [name, literal] if !literal.trim().is_empty() => {
                key.push((Some(parse_identifier(name.trim())?), literal.trim().to_string()))
            }
            _ => return Err(PathError::MalformedKey(segment.to_string())),
        }
    }

    Ok((parse_identifier(&segment[..open])?, Some(key)))
}

/// A request as seen by the dispatch layer.
#[derive(Debug, Clone)]
pub struct ResourceRequest {
    pub method: Method,
    pub path: ResourcePath,
    pub body: Option<Value>,
    /// Batch content-id this request referred to before its path was rewritten
    pub content_id_reference: Option<String>,
    /// The batch-created entity the content-id referred to
    pub changeset_entity: Option<EntityRecord>,
}

impl ResourceRequest {
    pub fn new(method: Method, path: ResourcePath) -> Self {
        Self {
            method,
            path,
            body: None,
            content_id_reference: None,
            changeset_entity: None,
        }
    }

    pub fn with_body(mut self, body: Option<Value>) -> Self {
        self.body = body;
        self
    }

    pub fn with_content_id_reference(mut self, content_id: &str, entity: EntityRecord) -> Self {
        self.content_id_reference = Some(content_id.to_string());
        self.changeset_entity = Some(entity);
        self
    }

    pub fn has_content_id_reference(&self) -> bool {
        self.content_id_reference.is_some()
    }
}
