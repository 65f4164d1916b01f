//! Durable storage layer.
//!
//! - [`store`] - the append-only commit store backing the persistent
//!   uniqueness provider

pub mod store;
