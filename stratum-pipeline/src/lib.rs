//! The named method registry and per-call step pipeline: binds dotted
//! method names (`streams.get`, `events.create`, ...) to an ordered
//! chain of [`step::Step`]s run against a shared [`step::Call`], and
//! fires exactly one audit record per top-level call regardless of
//! whether the chain succeeded.

pub mod methods;
pub mod registry;
pub mod state;
pub mod step;

pub use registry::{run_call, MethodRegistry};
pub use state::{AppState, SecurityConfig};
pub use step::{Call, MethodChain, Step};
