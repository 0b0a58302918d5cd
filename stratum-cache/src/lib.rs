//! Per-process cache of per-user state: stream forests,
//! `AccessLogic` objects, and the `username → userId` lookup. Invalidated
//! in-process by every mutating Mall operation and, across processes, by
//! `stratum-synchro` relaying the same [`Invalidation`] messages over the
//! broker.

pub mod user_cache;

pub use user_cache::{Invalidation, InvalidationActionKind, UserCache};
