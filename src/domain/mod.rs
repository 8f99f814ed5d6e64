//! Domain layer types and invariants.

pub mod record;

pub use record::{KeyPrefix, Record, join_json_array};
