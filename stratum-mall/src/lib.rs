//! Store multiplexer. Every stream/event id the rest of the system sees
//! is a *full* id, optionally `:<storeId>:`-prefixed; the Mall is the
//! only place that splits a full id into a store reference and the
//! store-local id a [`Store`] implementation actually operates on.

pub mod error;
pub mod ids;
pub mod local_adapter;
pub mod mall;
pub mod store;
pub mod stream_forest;
pub mod system_streams;

pub mod prelude {
    pub use crate::error::MallError;
    pub use crate::ids::{get_full_item_id, parse_store_id_and_store_item_id, StoreRef, LOCAL_STORE_ID};
    pub use crate::local_adapter::LocalStoreAdapter;
    pub use crate::mall::{Mall, MallEventQuery, MallStreamQuery, MallTransaction};
    pub use crate::store::{EventQuery, Store, StreamAndBlock, StreamQuery};
    pub use crate::stream_forest::StreamForestSnapshot;
    pub use crate::system_streams::{SystemStreamError, SystemStreamField, SystemStreams, ACTIVE_MARKER};
}

pub use prelude::*;
