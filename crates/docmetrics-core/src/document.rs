//! Dynamically shaped server documents.
//!
//! A command reply has no schema the exporter controls: keys come and go
//! between server versions and the same key may carry different types.
//! `Document` keeps the reply as an ordered key/value tree and `Value` is
//! the closed set of leaf and branch kinds the pipeline understands.
//!
//! Replies travel as raw BSON bytes and are decoded with the `bson` crate.
//! BSON types that cannot become a sample (object ids, timestamps, binary
//! blobs, ...) are mapped to `Value::Null` during decoding.

use std::fmt;

/// A single value inside a [`Document`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Bool(bool),
    String(String),
    Null,
    Document(Document),
    Sequence(Vec<Value>),
}

impl Value {
    /// Returns the numeric value, if this is a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the string slice, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the nested document, if this is one.
    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Value::Document(d) => Some(d),
            _ => None,
        }
    }

    /// Returns the elements, if this is a sequence.
    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Value::Sequence(items) => Some(items),
            _ => None,
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Document> for Value {
    fn from(d: Document) -> Self {
        Value::Document(d)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Sequence(items)
    }
}

/// Error produced when bytes or JSON cannot be turned into a [`Document`]
/// (or a document cannot be encoded back to BSON).
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentError {
    /// The BSON payload is malformed.
    Bson(String),
    /// The document could not be encoded as BSON.
    Encode(String),
    /// A JSON payload whose top level is not an object.
    NotAnObject,
}

impl fmt::Display for DocumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentError::Bson(msg) => write!(f, "malformed BSON reply: {}", msg),
            DocumentError::Encode(msg) => write!(f, "cannot encode document: {}", msg),
            DocumentError::NotAnObject => write!(f, "top-level value is not a document"),
        }
    }
}

impl std::error::Error for DocumentError {}

/// Ordered mapping from keys to values.
///
/// Insertion order is kept so that flattening walks keys in the order the
/// server returned them. Lookup is linear; server documents are small
/// enough that a map index would cost more than it saves.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    entries: Vec<(String, Value)>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, replacing an existing key in place.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Removes a key, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Follows a path of keys through nested documents.
    pub fn get_path(&self, path: &[&str]) -> Option<&Value> {
        let (last, parents) = path.split_last()?;
        let mut current = self;
        for key in parents {
            current = current.get(key)?.as_document()?;
        }
        current.get(last)
    }

    pub fn get_document(&self, key: &str) -> Option<&Document> {
        self.get(key).and_then(Value::as_document)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_number(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_number)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Key of the first entry. For a command document this is the command name.
    pub fn first_key(&self) -> Option<&str> {
        self.entries.first().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decodes a raw BSON document.
    pub fn from_bson_bytes(bytes: &[u8]) -> Result<Self, DocumentError> {
        let mut reader = bytes;
        let raw = bson::Document::from_reader(&mut reader)
            .map_err(|e| DocumentError::Bson(e.to_string()))?;
        Ok(Self::from(raw))
    }

    /// Encodes the document as BSON bytes.
    pub fn to_bson_bytes(&self) -> Result<Vec<u8>, DocumentError> {
        let raw = bson::Document::from(self);
        let mut buf = Vec::new();
        raw.to_writer(&mut buf)
            .map_err(|e| DocumentError::Encode(e.to_string()))?;
        Ok(buf)
    }

    /// Converts a JSON object into a document.
    pub fn from_json(json: serde_json::Value) -> Result<Self, DocumentError> {
        match json_to_value(json) {
            Value::Document(doc) => Ok(doc),
            _ => Err(DocumentError::NotAnObject),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Document {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut doc = Document::new();
        for (k, v) in iter {
            doc.insert(k, v);
        }
        doc
    }
}

fn json_to_value(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => n.as_f64().map_or(Value::Null, Value::Number),
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Array(items) => {
            Value::Sequence(items.into_iter().map(json_to_value).collect())
        }
        serde_json::Value::Object(map) => Value::Document(
            map.into_iter()
                .map(|(k, v)| (k, json_to_value(v)))
                .collect(),
        ),
    }
}

impl From<bson::Document> for Document {
    fn from(raw: bson::Document) -> Self {
        raw.into_iter().map(|(k, v)| (k, bson_to_value(v))).collect()
    }
}

fn bson_to_value(raw: bson::Bson) -> Value {
    use bson::Bson;

    match raw {
        Bson::Double(n) => Value::Number(n),
        Bson::Int32(n) => Value::Number(f64::from(n)),
        Bson::Int64(n) => Value::Number(n as f64),
        Bson::DateTime(dt) => Value::Number(dt.timestamp_millis() as f64),
        Bson::Boolean(b) => Value::Bool(b),
        Bson::String(s) | Bson::Symbol(s) => Value::String(s),
        Bson::Document(d) => Value::Document(Document::from(d)),
        Bson::Array(items) => Value::Sequence(items.into_iter().map(bson_to_value).collect()),
        Bson::Null | Bson::Undefined => Value::Null,
        // ObjectId, Timestamp, Binary, Decimal128, regex, code, keys, pointers.
        _ => Value::Null,
    }
}

impl From<&Document> for bson::Document {
    fn from(doc: &Document) -> Self {
        doc.iter()
            .map(|(k, v)| (k.to_string(), value_to_bson(v)))
            .collect()
    }
}

fn value_to_bson(value: &Value) -> bson::Bson {
    use bson::Bson;

    match value {
        Value::Number(n) => Bson::Double(*n),
        Value::Bool(b) => Bson::Boolean(*b),
        Value::String(s) => Bson::String(s.clone()),
        Value::Null => Bson::Null,
        Value::Document(d) => Bson::Document(bson::Document::from(d)),
        Value::Sequence(items) => Bson::Array(items.iter().map(value_to_bson).collect()),
    }
}
