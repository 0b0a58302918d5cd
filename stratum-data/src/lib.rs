//! # stratum-data — Backend-agnostic domain types
//!
//! Plain data structs (`User`, `Stream`, `EventData`/`Event`, `Session`,
//! `Attachment`) and their store-independent invariants, plus the shared
//! `DataError` type every concrete backend (`stratum-data-sqlx`, or
//! another store registered behind the Mall) converts its own errors
//! into.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`DataError`] | Type-erased error enum (`NotFound`, `Database`, `Other`) |
//! | [`domain`] | `User`, `Stream`, `Event`, `Session` and their invariants |

pub mod domain;
pub mod error;

pub use error::DataError;

/// Re-exports of the most commonly used data types.
pub mod prelude {
    pub use crate::domain::{Event, EventData, Session, Stream, User};
    pub use crate::DataError;
}
