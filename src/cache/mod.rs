//! Snapshot caches for collection prefixes.
//!
//! Each cached collection owns a [`RefreshingCache`]: a background task lists the prefix on
//! a fixed interval, fetches every value and swaps in a fresh immutable [`Snapshot`].
//! Readers only ever see whole snapshots, never a half-built one.
//!
//! ```yaml
//! collections:
//!   - uri: /cars
//!     key_prefix: "cars."
//!     cache:
//!       enabled: true
//!       refresh_interval_ms: 1000
//!       entry_ttl_ms: 2000
//! ```

mod config;
mod lock;
mod refresh;
mod snapshot;

pub use config::RefreshPolicy;
pub use refresh::{RefreshReport, RefreshingCache};
pub use snapshot::Snapshot;
