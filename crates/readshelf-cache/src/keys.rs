//! Deterministic cache key construction.
//!
//! Keys are colon-joined segments. Structured arguments are folded into a
//! truncated SHA-256 digest so that equal inputs always produce the same key
//! and unequal inputs collide only with cryptographic improbability. Key
//! building never fails; a value that cannot be rendered textually is hashed.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Keys longer than this are collapsed into a digest form to stay well
/// within backend key-length limits.
const MAX_KEY_LENGTH: usize = 200;

/// Digest length kept in keys. 128 bits of SHA-256 is plenty for
/// collision resistance at cache scale.
const HASH_LENGTH: usize = 32;

/// Hash arbitrary JSON into a fixed-width lowercase hex digest.
///
/// `serde_json` maps preserve key order as sorted (BTreeMap-backed), so the
/// serialized form and therefore the digest is deterministic regardless of
/// insertion order.
pub fn short_hash(value: &Value) -> String {
    let serialized = value.to_string();
    let digest = Sha256::digest(serialized.as_bytes());
    hex::encode(digest)[..HASH_LENGTH].to_string()
}

fn hash_str(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(digest)[..HASH_LENGTH].to_string()
}

/// Render one argument as a key segment.
///
/// Scalars embed directly (readable keys for the common case); arrays and
/// objects fold into a digest. `include_types` prefixes each segment with
/// the JSON type name so that `1` and `"1"` produce distinct keys.
fn render_arg(value: &Value, include_types: bool) -> String {
    let body = match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Object(_) => short_hash(value),
    };
    if include_types {
        format!("{}={body}", type_name(value))
    } else {
        body
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "num",
        Value::String(_) => "str",
        Value::Array(_) => "arr",
        Value::Object(_) => "obj",
    }
}

/// Builder for structured cache keys.
///
/// Collects segments, then `build` joins them with `:` and collapses
/// over-long results into `{first}:{second}:{digest}` so the namespace
/// remains visible even in hashed keys.
#[derive(Debug, Default)]
pub struct KeyBuilder {
    parts: Vec<String>,
    include_types: bool,
}

impl KeyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Include JSON type names in argument segments.
    pub fn include_types(mut self, include: bool) -> Self {
        self.include_types = include;
        self
    }

    /// Append a literal segment.
    pub fn part(mut self, part: impl Into<String>) -> Self {
        self.parts.push(part.into());
        self
    }

    /// Append an argument value, rendered or hashed as appropriate.
    pub fn arg(mut self, value: &Value) -> Self {
        self.parts.push(render_arg(value, self.include_types));
        self
    }

    /// Append every value in `args` in order.
    pub fn args(mut self, args: &[Value]) -> Self {
        for value in args {
            self.parts.push(render_arg(value, self.include_types));
        }
        self
    }

    pub fn build(self) -> String {
        let key = self.parts.join(":");
        if key.len() <= MAX_KEY_LENGTH {
            return key;
        }
        // Keep the leading segments readable so operators can still tell
        // which namespace an oversized key belongs to.
        let head: Vec<&String> = self.parts.iter().take(2).collect();
        match head.as_slice() {
            [first, second] => format!("{first}:{second}:{}", hash_str(&key)),
            [first] => format!("{first}:{}", hash_str(&key)),
            _ => hash_str(&key),
        }
    }
}

/// Default key for a function call: `{prefix}:{rendered args}`.
pub fn generate_key(prefix: &str, args: &[Value], include_types: bool) -> String {
    if args.is_empty() {
        return prefix.to_string();
    }
    KeyBuilder::new()
        .include_types(include_types)
        .part(prefix)
        .args(args)
        .build()
}

/// Key for a single model instance: `{model}:{id}`, model lowercased.
pub fn model_key(model: &str, id: &Value) -> String {
    format!("{}:{}", model.to_lowercase(), render_arg(id, false))
}

/// Key for a filtered listing: `{prefix}:{digest of sorted non-null filters}`.
///
/// Filters with a `null` value are excluded before hashing so that an
/// explicitly-absent filter and an omitted one address the same entry.
pub fn list_key(prefix: &str, filters: &[(String, Value)]) -> String {
    let mut live: Vec<&(String, Value)> =
        filters.iter().filter(|(_, v)| !v.is_null()).collect();
    live.sort_by(|a, b| a.0.cmp(&b.0));
    if live.is_empty() {
        return format!("{prefix}:all");
    }
    let folded = Value::Object(
        live.iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    );
    format!("{prefix}:{}", short_hash(&folded))
}

/// Key for one page of a listing. Page and limit stay outside the digest so
/// that adjacent pages are visibly related and individually invalidatable.
pub fn paginated_key(prefix: &str, filters: &[(String, Value)], page: u64, limit: u64) -> String {
    format!("{}:page{page}:limit{limit}", list_key(prefix, filters))
}
