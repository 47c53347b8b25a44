//! Query key schema
//!
//! A key is the ordered list of segments `resource:operation:param...` joined
//! with `:`. Segments are escaped (`\` becomes `\\`, `:` becomes `\:`) so two
//! different parameter tuples never serialize to the same key, and every key
//! built from a longer tuple starts with the key of its shorter prefix.
//!
//! Keys may carry a leading schema version segment (`v1:clients:...`) so a
//! format change retires a whole generation of entries at once.

use std::borrow::Cow;
use std::fmt;

use crate::{CacheError, CacheResult};

/// Schema version used when the composition root opts into versioned keys
pub const CACHE_VERSION: u32 = 1;

const SEPARATOR: char = ':';
const ESCAPE: char = '\\';

/// Key namespaces for the ERP entities served through the cache.
pub mod resources {
    pub const CLIENTS: &str = "clients";
    pub const CONTACTS: &str = "contacts";
    pub const CONTRACTS: &str = "contracts";
    pub const SUPPLIERS: &str = "suppliers";
    pub const OPPORTUNITIES: &str = "opportunities";
    pub const PIPELINE_STAGES: &str = "pipeline_stages";
}

/// Deterministic query identity builder.
///
/// ```
/// use query_cache::QueryKey;
///
/// let key = QueryKey::new("contracts").op("by_client").param(42).param("active");
/// assert_eq!(key.build(), "contracts:by_client:42:active");
/// assert_eq!(QueryKey::new("clients").param(7).build(), "clients:7");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    version: Option<u32>,
    segments: Vec<String>,
}

impl QueryKey {
    /// Start a key in the given resource namespace
    pub fn new(resource: &str) -> Self {
        Self {
            version: None,
            segments: vec![escape_segment(resource)],
        }
    }

    /// Prefix the key with a schema version segment
    pub fn versioned(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    /// Append the operation name
    pub fn op(mut self, name: &str) -> Self {
        self.segments.push(escape_segment(name));
        self
    }

    /// Append one ordered parameter
    pub fn param(mut self, value: impl fmt::Display) -> Self {
        self.segments.push(escape_segment(&value.to_string()));
        self
    }

    /// Resource namespace (unescaped)
    pub fn resource(&self) -> String {
        unescape_segment(&self.segments[0])
    }

    /// Serialized key
    pub fn build(&self) -> String {
        let body = self.segments.join(":");
        match self.version {
            Some(v) => format!("v{}:{}", v, body),
            None => body,
        }
    }

    /// Prefix matching every key that extends this one
    ///
    /// ```
    /// use query_cache::QueryKey;
    ///
    /// assert_eq!(QueryKey::new("clients").prefix(), "clients:");
    /// assert_eq!(QueryKey::new("clients").versioned(1).prefix(), "v1:clients:");
    /// ```
    pub fn prefix(&self) -> String {
        let mut key = self.build();
        key.push(SEPARATOR);
        key
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.build())
    }
}

impl From<QueryKey> for String {
    fn from(key: QueryKey) -> Self {
        key.build()
    }
}

/// Prefix covering every cached read of a resource
///
/// ```
/// use query_cache::resource_prefix;
///
/// assert_eq!(resource_prefix("clients"), "clients:");
/// ```
pub fn resource_prefix(resource: &str) -> String {
    QueryKey::new(resource).prefix()
}

/// Prefix covering one entity and every read keyed under it.
///
/// Coarse: `clients:42` also matches `clients:420`.
pub fn entity_prefix(resource: &str, id: impl fmt::Display) -> String {
    QueryKey::new(resource).param(id).build()
}

/// Split a serialized key back into its unescaped segments
///
/// A leading version segment is kept as-is.
pub fn parse_key(key: &str) -> CacheResult<Vec<String>> {
    if key.is_empty() {
        return Err(CacheError::InvalidKey("empty key".to_string()));
    }

    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = key.chars();

    while let Some(c) = chars.next() {
        match c {
            ESCAPE => match chars.next() {
                Some(escaped) => current.push(escaped),
                None => {
                    return Err(CacheError::InvalidKey(format!(
                        "dangling escape at end of key: {}",
                        key
                    )))
                }
            },
            SEPARATOR => segments.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    segments.push(current);

    Ok(segments)
}

/// Resource namespace of a key, skipping a version segment
///
/// The segment is unescaped, so a resource containing `:` comes back whole.
/// Borrows from `key` unless unescaping was needed.
///
/// ```
/// use query_cache::extract_resource;
///
/// assert_eq!(extract_resource("clients:42").as_deref(), Some("clients"));
/// assert_eq!(extract_resource("v1:contracts:by_client:7").as_deref(), Some("contracts"));
/// assert_eq!(extract_resource("erp\\:clients:1").as_deref(), Some("erp:clients"));
/// assert_eq!(extract_resource(""), None);
/// ```
pub fn extract_resource(key: &str) -> Option<Cow<'_, str>> {
    let (first, rest) = split_segment(key);
    let resource = if is_version_segment(first) {
        split_segment(rest?).0
    } else {
        first
    };

    if resource.is_empty() {
        None
    } else if resource.contains(ESCAPE) {
        Some(Cow::Owned(unescape_segment(resource)))
    } else {
        Some(Cow::Borrowed(resource))
    }
}

/// Split at the first unescaped separator
fn split_segment(key: &str) -> (&str, Option<&str>) {
    let mut escaped = false;
    for (i, c) in key.char_indices() {
        match c {
            _ if escaped => escaped = false,
            ESCAPE => escaped = true,
            SEPARATOR => return (&key[..i], Some(&key[i + 1..])),
            _ => {}
        }
    }
    (key, None)
}

/// A key must name a resource and at least one more segment
pub fn validate_key(key: &str) -> bool {
    match parse_key(key) {
        Ok(segments) => {
            let body = match segments.first() {
                Some(first) if is_version_segment(first) => &segments[1..],
                _ => &segments[..],
            };
            body.len() >= 2 && !body[0].is_empty()
        }
        Err(_) => false,
    }
}

fn is_version_segment(segment: &str) -> bool {
    segment.len() > 1
        && segment.starts_with('v')
        && segment[1..].chars().all(|c| c.is_ascii_digit())
}

fn escape_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c == ESCAPE || c == SEPARATOR {
            out.push(ESCAPE);
        }
        out.push(c);
    }
    out
}

fn unescape_segment(escaped: &str) -> String {
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(c) = chars.next() {
        if c == ESCAPE {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}
