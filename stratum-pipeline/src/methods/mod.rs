pub mod account;
pub mod accesses;
pub mod auth;
pub mod events;
pub mod streams;
