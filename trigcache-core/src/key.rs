//! Cache key types and construction.
//!
//! This module provides the pieces that turn a request into a deterministic
//! store key:
//!
//! - [`Namespace`] - Application name and deployment environment
//! - [`ResourceType`] - Validated, non-empty resource name (e.g. `trig`)
//! - [`Params`] - Normalized parameter set, hashed into the key
//! - [`KeyCodec`] / [`KeyBuilder`] - Assemble the final [`CacheKey`]
//!
//! ## Format
//!
//! Segments are joined with `:`:
//!
//! `{app}:{env}:{resource_type}[:{resource_id}][:{subresource}][:params_{hash}]:{version}`
//!
//! ```
//! use trigcache_core::{KeyCodec, Namespace, Params, ResourceType};
//!
//! let codec = KeyCodec::new(Namespace::new("tuk", "dev").unwrap());
//! let trig = ResourceType::new("trig").unwrap();
//!
//! let key = codec.key(&trig).id(42).build();
//! assert_eq!(key.as_str(), "tuk:dev:trig:42:v1");
//!
//! let key = codec.key(&trig).id(42).subresource("photos").build();
//! assert_eq!(key.as_str(), "tuk:dev:trig:42:photos:v1");
//!
//! let params: Params = [("limit", 10), ("skip", 0)].into_iter().collect();
//! let key = codec.key(&trig).params(&params).build();
//! assert!(key.as_str().starts_with("tuk:dev:trig:params_"));
//! assert!(key.as_str().ends_with(":v1"));
//! ```
//!
//! ## Determinism
//!
//! [`Params`] stores its entries sorted by name and canonicalizes nested
//! objects before hashing, so the same logical parameter set always yields
//! the same key no matter which order the call site inserted it in.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use smol_str::SmolStr;

/// Delimiter between key segments.
pub const KEY_DELIMITER: char = ':';

/// Cache schema version appended to every key unless overridden.
pub const DEFAULT_KEY_VERSION: &str = "v1";

/// Number of hex characters of the parameter digest kept in the key.
pub const PARAMS_DIGEST_LEN: usize = 16;

/// Characters that may not appear in namespace or resource type segments.
///
/// `:` would break segment boundaries; the rest are glob metacharacters that
/// would let a namespace widen a pattern delete.
const RESERVED: &[char] = &[':', '*', '?', '[', ']', '\\'];

/// Error raised when a key component fails validation.
///
/// These are programming errors: they surface when a route registers an
/// invalid resource type or the process is configured with a bad namespace,
/// never while serving a request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    /// The component was empty.
    #[error("{what} must not be empty")]
    Empty {
        /// Which component was rejected.
        what: &'static str,
    },
    /// The component contained a delimiter, glob metacharacter or whitespace.
    #[error("{what} `{value}` contains reserved character {ch:?}")]
    Reserved {
        /// Which component was rejected.
        what: &'static str,
        /// The offending value.
        value: String,
        /// The first reserved character found.
        ch: char,
    },
}

fn validate_segment(what: &'static str, value: &str) -> Result<SmolStr, KeyError> {
    if value.is_empty() {
        return Err(KeyError::Empty { what });
    }
    if let Some(ch) = value
        .chars()
        .find(|c| RESERVED.contains(c) || c.is_whitespace())
    {
        return Err(KeyError::Reserved {
            what,
            value: value.to_owned(),
            ch,
        });
    }
    Ok(SmolStr::new(value))
}

/// Escape a request-supplied segment so it can neither split the key nor act
/// as a glob when the key is later matched against a pattern.
pub fn escape_segment(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            ':' => out.push_str("%3A"),
            '*' => out.push_str("%2A"),
            '?' => out.push_str("%3F"),
            '[' => out.push_str("%5B"),
            ']' => out.push_str("%5D"),
            '\\' => out.push_str("%5C"),
            '%' => out.push_str("%25"),
            c => out.push(c),
        }
    }
    out
}

/// Application and environment prefix shared by every key this process
/// writes.
///
/// The physical store is shared by several applications and environments;
/// the namespace is the only thing keeping them apart, so both parts are
/// mandatory and validated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    app: SmolStr,
    env: SmolStr,
}

impl Namespace {
    /// Creates a namespace from an application name and environment tag.
    pub fn new(app: impl AsRef<str>, env: impl AsRef<str>) -> Result<Self, KeyError> {
        Ok(Self {
            app: validate_segment("application name", app.as_ref())?,
            env: validate_segment("environment", env.as_ref())?,
        })
    }

    /// Application name.
    pub fn app(&self) -> &str {
        &self.app
    }

    /// Environment tag.
    pub fn env(&self) -> &str {
        &self.env
    }

    /// Returns `{app}:{env}`.
    pub fn prefix(&self) -> String {
        format!("{}{KEY_DELIMITER}{}", self.app, self.env)
    }

    /// Prepends the namespace prefix to `suffix`.
    pub fn scoped(&self, suffix: &str) -> String {
        format!("{}{KEY_DELIMITER}{}{KEY_DELIMITER}{suffix}", self.app, self.env)
    }

    /// Pattern matching every key inside this namespace.
    pub fn wildcard(&self) -> String {
        self.scoped("*")
    }

    /// Whether `key` lives inside this namespace.
    pub fn contains(&self, key: &str) -> bool {
        key.strip_prefix(self.app.as_str())
            .and_then(|rest| rest.strip_prefix(KEY_DELIMITER))
            .and_then(|rest| rest.strip_prefix(self.env.as_str()))
            .is_some_and(|rest| rest.starts_with(KEY_DELIMITER))
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{KEY_DELIMITER}{}", self.app, self.env)
    }
}

/// Name of a cached resource, e.g. `trig`, `user`, `stats`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceType(SmolStr);

impl ResourceType {
    /// Validates and wraps a resource type name.
    pub fn new(name: impl AsRef<str>) -> Result<Self, KeyError> {
        validate_segment("resource type", name.as_ref()).map(Self)
    }

    /// Returns the name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for ResourceType {
    type Error = KeyError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// A normalized parameter set.
///
/// Entries are kept sorted by name. `null` values are dropped on insert so
/// that an omitted optional parameter and an explicit `None` produce the same
/// key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    entries: BTreeMap<String, Value>,
}

impl Params {
    /// Creates an empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a parameter set from any serializable map-like value.
    ///
    /// Serialization errors belong to the caller: a value that can't be
    /// represented as a JSON object is reported here, before any key is built.
    pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        match serde_json::to_value(value)? {
            Value::Object(map) => Ok(map.into_iter().collect()),
            Value::Null => Ok(Self::new()),
            other => Err(serde::ser::Error::custom(format!(
                "parameters must serialize to an object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Inserts a parameter, replacing any previous value with the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let value = value.into();
        let name = name.into();
        if value.is_null() {
            self.entries.remove(&name);
        } else {
            self.entries.insert(name, value);
        }
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Removes a parameter by name.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.entries.remove(name)
    }

    /// Looks up a parameter by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates parameters in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Canonical JSON serialization: keys sorted at every nesting level.
    pub fn canonical_json(&self) -> String {
        let mut map = Map::with_capacity(self.entries.len());
        for (name, value) in &self.entries {
            map.insert(name.clone(), canonicalize(value));
        }
        Value::Object(map).to_string()
    }

    /// Truncated SHA-256 hex digest of [`canonical_json`](Self::canonical_json).
    pub fn digest(&self) -> String {
        let hash = Sha256::digest(self.canonical_json().as_bytes());
        let mut hex = hex::encode(hash);
        hex.truncate(PARAMS_DIGEST_LEN);
        hex
    }
}

impl<K, V> FromIterator<(K, V)> for Params
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (name, value) in iter {
            params.insert(name, value);
        }
        params
    }
}

// serde_json is built with `preserve_order`, so object key order follows
// insertion order; rebuild nested objects in sorted order.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            Value::Object(
                sorted
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// A fully assembled store key.
///
/// Cloning is cheap: the string is shared behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(Arc<str>);

impl CacheKey {
    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Serialize for CacheKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Builds namespaced, versioned cache keys.
///
/// One codec is constructed per process from configuration and shared by
/// every cached route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCodec {
    namespace: Namespace,
    version: SmolStr,
}

impl KeyCodec {
    /// Creates a codec with the [default version](DEFAULT_KEY_VERSION).
    pub fn new(namespace: Namespace) -> Self {
        Self {
            namespace,
            version: SmolStr::new_static(DEFAULT_KEY_VERSION),
        }
    }

    /// Overrides the version tag appended to keys.
    pub fn with_version(mut self, version: impl AsRef<str>) -> Result<Self, KeyError> {
        self.version = Self::validate_version(version.as_ref())?;
        Ok(self)
    }

    /// Checks that `version` can be used as a version tag.
    pub fn validate_version(version: &str) -> Result<SmolStr, KeyError> {
        validate_segment("key version", version)
    }

    /// The namespace every key is prefixed with.
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// The default version tag.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Starts a key for `resource_type`.
    pub fn key<'a>(&'a self, resource_type: &'a ResourceType) -> KeyBuilder<'a> {
        KeyBuilder {
            codec: self,
            resource_type,
            resource_id: None,
            subresource: None,
            params: None,
            version: None,
        }
    }

    /// Pattern covering every key of `resource_type`, optionally restricted to
    /// one resource id, across all sub-resources, parameter sets and versions.
    pub fn resource_pattern(&self, resource_type: &ResourceType, resource_id: Option<&str>) -> String {
        match resource_id {
            Some(id) => self.namespace.scoped(&format!(
                "{resource_type}{KEY_DELIMITER}{}{KEY_DELIMITER}*",
                escape_segment(id)
            )),
            None => self
                .namespace
                .scoped(&format!("{resource_type}{KEY_DELIMITER}*")),
        }
    }
}

/// Accumulates the optional parts of a key.
#[derive(Debug)]
pub struct KeyBuilder<'a> {
    codec: &'a KeyCodec,
    resource_type: &'a ResourceType,
    resource_id: Option<String>,
    subresource: Option<String>,
    params: Option<&'a Params>,
    version: Option<String>,
}

impl<'a> KeyBuilder<'a> {
    /// Sets the resource id segment.
    pub fn id(mut self, resource_id: impl fmt::Display) -> Self {
        self.resource_id = Some(escape_segment(&resource_id.to_string()));
        self
    }

    /// Sets the resource id segment if present.
    pub fn maybe_id(self, resource_id: Option<impl fmt::Display>) -> Self {
        match resource_id {
            Some(id) => self.id(id),
            None => self,
        }
    }

    /// Sets the sub-resource segment.
    pub fn subresource(mut self, subresource: impl AsRef<str>) -> Self {
        self.subresource = Some(escape_segment(subresource.as_ref()));
        self
    }

    /// Sets the parameter set. Empty sets add no segment.
    pub fn params(mut self, params: &'a Params) -> Self {
        self.params = Some(params);
        self
    }

    /// Overrides the codec's version tag for this key. Reserved characters
    /// are escaped like any other segment.
    pub fn version(mut self, version: &str) -> Self {
        self.version = Some(escape_segment(version));
        self
    }

    /// Assembles the key.
    pub fn build(self) -> CacheKey {
        let mut key = self.codec.namespace.prefix();
        let mut push = |segment: &str| {
            key.push(KEY_DELIMITER);
            key.push_str(segment);
        };

        push(self.resource_type.as_str());
        if let Some(id) = &self.resource_id {
            push(id);
        }
        if let Some(sub) = &self.subresource {
            push(sub);
        }
        if let Some(params) = self.params.filter(|p| !p.is_empty()) {
            push(&format!("params_{}", params.digest()));
        }
        push(self.version.as_deref().unwrap_or(self.codec.version.as_str()));

        CacheKey(Arc::from(key))
    }
}
