//! # Stitchboard Core
//!
//! Shared, WASM-safe logic for Stitchboard: data models, visit
//! classification, the record store abstraction, event tracking, order
//! submission, and dashboard aggregation.
//!
//! This crate contains no sqlx, filesystem I/O, HTTP, or other
//! native-only dependencies. Only tokio's `sync` primitives are used.

pub mod classify;
pub mod feed;
pub mod models;
pub mod orders;
pub mod snapshot;
pub mod store;
pub mod tracker;
