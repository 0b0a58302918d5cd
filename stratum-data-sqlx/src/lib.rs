//! # stratum-data-sqlx — SQLite-backed local store
//!
//! Implements the concrete local storage backend: `LocalStore`
//! (streams/events/accesses/sessions) and `UserAccountStorage` for the
//! two tables kept outside the primary document store — password
//! history and per-store key/value, each per-user SQLite.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`SqlxErrorExt`] | Extension trait to convert `sqlx::Error` → `DataError` (`.into_data_error()`) |
//! | [`SqlxResult<T>`] | Type alias for `Result<T, DataError>` |
//! | [`LocalStore`] | Streams/events/accesses/sessions, one SQLite database per user store |
//! | [`UserAccountStorage`] | Password history + per-store key/value |

pub mod error;
pub mod local_store;
pub mod user_account;

pub use error::{SqlxErrorExt, SqlxResult};
pub use local_store::{EventQuery, LocalStore, StreamAndBlock, StreamQuery};
pub use user_account::UserAccountStorage;

/// Re-exports of the most commonly used types from both `stratum-data`
/// and this crate.
pub mod prelude {
    pub use crate::{EventQuery, LocalStore, SqlxErrorExt, StreamAndBlock, StreamQuery, UserAccountStorage};
    pub use stratum_data::prelude::*;
}
