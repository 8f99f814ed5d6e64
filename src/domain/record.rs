//! Records served by a collection and the key prefixes that group them.

use std::{fmt, sync::Arc};

/// Key-namespace segment identifying one logical collection, e.g. `cars.`.
///
/// A record with id `1` in the `cars.` collection lives under the full key `cars.1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPrefix(Arc<str>);

impl KeyPrefix {
    pub fn new(prefix: impl Into<Arc<str>>) -> Self {
        Self(prefix.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Full store key for the record `id` inside this prefix.
    pub fn key_for(&self, id: &str) -> String {
        let mut key = String::with_capacity(self.0.len() + id.len());
        key.push_str(&self.0);
        key.push_str(id);
        key
    }
}

impl fmt::Display for KeyPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw JSON text stored under a key. The body is never re-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    key: Arc<str>,
    body: Arc<str>,
}

impl Record {
    pub fn new(key: impl Into<Arc<str>>, body: impl Into<Arc<str>>) -> Self {
        Self {
            key: key.into(),
            body: body.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn body(&self) -> &str {
        &self.body
    }
}

/// Render records as a JSON array by splicing their raw bodies.
pub fn join_json_array(records: &[Record]) -> String {
    let capacity = records.iter().map(|r| r.body.len() + 1).sum::<usize>() + 2;
    let mut out = String::with_capacity(capacity);
    out.push('[');
    for (index, record) in records.iter().enumerate() {
        if index > 0 {
            out.push(',');
        }
        out.push_str(record.body());
    }
    out.push(']');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_for_concatenates_prefix_and_id() {
        let prefix = KeyPrefix::new("cars.");
        assert_eq!(prefix.key_for("1"), "cars.1");
    }

    #[test]
    fn join_json_array_splices_bodies_verbatim() {
        let records = vec![
            Record::new("cars.1", r#"{"ID":"1"}"#),
            Record::new("cars.2", r#"{"ID":"2"}"#),
        ];
        assert_eq!(join_json_array(&records), r#"[{"ID":"1"},{"ID":"2"}]"#);
        assert_eq!(join_json_array(&[]), "[]");
    }
}
