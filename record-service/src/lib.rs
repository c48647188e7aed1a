//! Record service - reference implementation of the grid's remote record API
//!
//! Holds authoritative records per container, hands out opaque version
//! tokens, and rejects writes whose `If-Match` precondition is stale.

pub mod api;
pub mod config;
pub mod store;
