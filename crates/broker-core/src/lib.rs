//! Shared domain types, error kinds, and submission validation for the
//! task broker. No I/O lives here: the daemons and the other crates
//! build on top of these types.

pub mod error;
pub mod model;
pub mod time;
pub mod validate;

pub use error::BrokerError;
pub use model::*;
pub use time::{now_ms, EpochMs};
