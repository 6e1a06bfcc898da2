use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Internal numeric document id. Documents expose this to callers as a
/// string via the `_id` field (see [`ID_FIELD`]); internally it doubles as
/// the element type of the roaring-bitmap posting lists in the index
/// subsystem, which is why it stays a plain `u64` rather than a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocId(pub u64);

impl DocId {
    pub fn new(id: u64) -> Self {
        DocId(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// Parses a document id back out of its stored string form. Non-numeric
    /// ids (possible if a caller loads a file written by a different tool)
    /// are simply not representable and return `None`.
    pub fn parse(s: &str) -> Option<Self> {
        s.parse::<u64>().ok().map(DocId)
    }
}

impl From<u64> for DocId {
    fn from(id: u64) -> Self {
        DocId(id)
    }
}

impl std::fmt::Display for DocId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub const ID_FIELD: &str = "_id";

/// A schemaless value. Documents are field maps of these; arrays and nested
/// documents recurse through the same type, matching the sum type described
/// for the document model (null | bool | int | float | string | array |
/// document).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Document(FieldMap),
}

pub type FieldMap = HashMap<String, Value>;

/// A stored document: a field map that is expected (but not enforced by the
/// type system alone) to carry an `_id` string field.
pub type Document = FieldMap;

impl Value {
    /// Widens any numeric variant to `f64`. Returns `None` for non-numeric
    /// values; used by the §4.1 match rules.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// Reads the `_id` field of a document as a [`DocId`], if present and numeric.
pub fn doc_id_of(doc: &Document) -> Option<DocId> {
    doc.get(ID_FIELD).and_then(Value::as_str).and_then(DocId::parse)
}

/// Sets `_id` on a document, overwriting any client-supplied value.
pub fn set_doc_id(doc: &mut Document, id: DocId) {
    doc.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doc_id_round_trips_through_string_form() {
        let id = DocId::new(42);
        assert_eq!(DocId::parse(&id.to_string()), Some(id));
    }

    #[test]
    fn non_numeric_id_does_not_parse() {
        assert_eq!(DocId::parse("not-a-number"), None);
    }

    #[test]
    fn numeric_widening_covers_int_and_float() {
        assert_eq!(Value::Int(7).as_f64(), Some(7.0));
        assert_eq!(Value::Float(7.5).as_f64(), Some(7.5));
        assert_eq!(Value::String("7".into()).as_f64(), None);
    }

    #[test]
    fn set_doc_id_overwrites_existing_id() {
        let mut doc = Document::new();
        doc.insert(ID_FIELD.to_string(), Value::String("client-supplied".into()));
        set_doc_id(&mut doc, DocId::new(5));
        assert_eq!(doc_id_of(&doc), Some(DocId::new(5)));
    }
}
