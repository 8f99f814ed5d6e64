//! Read paths, query filtering and the collection registry.

pub mod collections;
pub mod error;
pub mod query;
pub mod reader;
pub mod store;
