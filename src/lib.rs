//! # Stitchboard
//!
//! Visit tracking, order intake, and an analytics dashboard for a small
//! handmade-crafts storefront.
//!
//! The storefront's pages post visits, page views, interactions, and
//! order forms to the collector; the shop owner reads aggregated
//! snapshots from the dashboard API or the terminal.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌──────────┐
//! │ Storefront │──▶│  Tracker /   │──▶│  SQLite  │
//! │   pages    │   │  Orders      │   │ records  │
//! └────────────┘   └──────────────┘   └────┬─────┘
//!                                          │
//!                      ┌───────────────────┤
//!                      ▼                   ▼
//!                 ┌──────────┐       ┌───────────┐
//!                 │   CLI    │       │ Dashboard │
//!                 │ (stitch) │       │ HTTP/SSE  │
//!                 └──────────┘       └───────────┘
//! ```
//!
//! Classification, tracking, and aggregation live in the WASM-safe
//! [`stitchboard_core`] crate. This crate adds the native shell.
//!
//! ## Quick Start
//!
//! ```bash
//! stitch init                   # create database
//! stitch serve                  # start collector + dashboard API
//! stitch stats                  # print a snapshot
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | Tracing subscriber setup |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | `RecordStore` over SQLite |
//! | [`auth`] | Dashboard sign-in and session tokens |
//! | [`sessions`] | Per-browser visit guards |
//! | [`server`] | Collector and dashboard HTTP API |
//! | [`stats`] | Terminal dashboard |

pub mod auth;
pub mod config;
pub mod db;
pub mod logging;
pub mod migrate;
pub mod server;
pub mod sessions;
pub mod sqlite_store;
pub mod stats;

pub use stitchboard_core;
