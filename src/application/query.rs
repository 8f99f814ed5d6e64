//! Field-path equality filters over raw JSON records.
//!
//! A query string such as `?Model=Toyota&Model=Honda&engine.fuel=diesel` becomes two
//! filters: `Model ∈ {Toyota, Honda}` and `engine.fuel ∈ {diesel}`. Values under one
//! parameter name are alternatives; distinct names must all match.

use std::{borrow::Cow, collections::BTreeMap};

use metrics::counter;
use serde_json::{Map, Value};
use tracing::warn;

use crate::domain::Record;

const METRIC_QUERY_MALFORMED: &str = "kvgate_query_malformed_total";

/// Dot-separated path of object keys leading to a nested scalar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    pub fn parse(name: &str) -> Self {
        Self {
            segments: name.split('.').map(str::to_owned).collect(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Walk the path through nested objects; every segment but the last must land on an object.
    pub fn resolve<'a>(&self, root: &'a Map<String, Value>) -> Option<&'a Value> {
        let (last, parents) = self.segments.split_last()?;
        let mut node = root;
        for segment in parents {
            node = node.get(segment)?.as_object()?;
        }
        node.get(last)
    }
}

/// Canonical string form of a JSON scalar used for comparison with query values.
///
/// Floats use the shortest round-trip decimal without exponent (`1.1`, `2`), integers plain
/// digits. Arrays, objects and `null` have no canonical form and never match.
pub fn canonical_scalar(value: &Value) -> Option<Cow<'_, str>> {
    match value {
        Value::String(text) => Some(Cow::Borrowed(text.as_str())),
        Value::Bool(true) => Some(Cow::Borrowed("true")),
        Value::Bool(false) => Some(Cow::Borrowed("false")),
        Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                Some(Cow::Owned(int.to_string()))
            } else if let Some(uint) = number.as_u64() {
                Some(Cow::Owned(uint.to_string()))
            } else {
                number.as_f64().map(|float| Cow::Owned(float.to_string()))
            }
        }
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// One parameter name: a path plus the accepted values (logical OR).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldFilter {
    path: FieldPath,
    accepted: Vec<String>,
}

impl FieldFilter {
    pub fn new(name: &str, accepted: Vec<String>) -> Self {
        Self {
            path: FieldPath::parse(name),
            accepted,
        }
    }

    pub fn path(&self) -> &FieldPath {
        &self.path
    }

    pub fn accepted(&self) -> &[String] {
        &self.accepted
    }

    pub fn matches(&self, object: &Map<String, Value>) -> bool {
        let Some(value) = self.path.resolve(object) else {
            return false;
        };
        let Some(canonical) = canonical_scalar(value) else {
            return false;
        };
        self.accepted
            .iter()
            .any(|candidate| candidate.as_str() == canonical.as_ref())
    }
}

/// Per-request filter set; every [`FieldFilter`] must match (logical AND).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryFilter {
    filters: Vec<FieldFilter>,
}

impl QueryFilter {
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn filters(&self) -> &[FieldFilter] {
        &self.filters
    }

    /// Keep the records every filter accepts, in their original order.
    ///
    /// With no filters the input is returned untouched, malformed bodies included.
    pub fn apply(&self, records: Vec<Record>) -> Vec<Record> {
        if self.is_empty() {
            return records;
        }
        records
            .into_iter()
            .filter(|record| self.matches(record))
            .collect()
    }

    pub fn matches(&self, record: &Record) -> bool {
        let object = match serde_json::from_str::<Map<String, Value>>(record.body()) {
            Ok(object) => object,
            Err(err) => {
                warn!(
                    target = "kvgate::query",
                    key = record.key(),
                    error = %err,
                    "dropping record that is not a JSON object"
                );
                counter!(METRIC_QUERY_MALFORMED).increment(1);
                return false;
            }
        };
        self.filters.iter().all(|filter| filter.matches(&object))
    }
}

impl<K, V> FromIterator<(K, V)> for QueryFilter
where
    K: Into<String>,
    V: Into<String>,
{
    /// One filter per distinct parameter name; repeated names accumulate values.
    fn from_iter<I: IntoIterator<Item = (K, V)>>(params: I) -> Self {
        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in params {
            grouped.entry(name.into()).or_default().push(value.into());
        }
        let filters = grouped
            .into_iter()
            .map(|(name, accepted)| FieldFilter::new(&name, accepted))
            .collect();
        Self { filters }
    }
}

/// Filter `records` by query parameters given as `(name, value)` pairs.
pub fn apply_filters<I, K, V>(params: I, records: Vec<Record>) -> Vec<Record>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    params.into_iter().collect::<QueryFilter>().apply(records)
}
