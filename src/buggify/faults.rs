//! Fault identifiers
//!
//! Grouped by the component that checks them. Ids are stable strings so
//! that statistics and per-fault overrides survive refactors.

/// Metric store faults
pub mod store {
    /// Liveness probe fails
    pub const UNAVAILABLE: &str = "store.unavailable";
    /// Write fails before touching the table
    pub const WRITE_FAIL: &str = "store.write_fail";
    /// Write commits but the caller sees an error (lost ack)
    pub const AMBIGUOUS_COMMIT: &str = "store.ambiguous_commit";
    /// Another actor creates the row just before our insert
    pub const PHANTOM_CREATE: &str = "store.phantom_create";
    /// Conditional update reports zero rows without applying
    pub const ZERO_ROWS: &str = "store.zero_rows";
    /// Read fails
    pub const READ_FAIL: &str = "store.read_fail";
}

/// Transport faults
pub mod transport {
    /// Delivery is duplicated after being acknowledged
    pub const DUPLICATE_DELIVERY: &str = "transport.duplicate_delivery";
}

pub const ALL_FAULTS: &[&str] = &[
    store::UNAVAILABLE,
    store::WRITE_FAIL,
    store::AMBIGUOUS_COMMIT,
    store::PHANTOM_CREATE,
    store::ZERO_ROWS,
    store::READ_FAIL,
    transport::DUPLICATE_DELIVERY,
];
