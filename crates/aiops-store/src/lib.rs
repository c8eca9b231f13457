//! Telemetry store for the AIOps engine
//!
//! Append-only log of request records with endpoint/time and trace-id
//! access paths. Records are immutable once written; concurrent inserts
//! serialize behind the store's lock and readers never observe a partial
//! row.

mod store;

pub use store::TelemetryStore;
