//! # Issue Harvest
//!
//! Paginated ingestion of issue trackers and chat history into an
//! analytical database, with a read-only search endpoint on top.
//!
//! A run has two halves joined by files on disk. `fetch` pages through an
//! upstream API at a fixed pace and appends every record to a local staging
//! file. `load` reads a staging file back and writes it into the target
//! table in bounded batches; search reads a materialized view over that
//! table.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ PageSource  │──▶│  FetchLoop   │──▶│ DurableStager│
//! │ GitHub/Slack│   │ cursor+pacing│   │  *.data files│
//! └─────────────┘   └──────────────┘   └──────┬───────┘
//!                                             ▼
//!                   ┌──────────────┐   ┌──────────────┐
//!                   │SearchGateway │◀──│ BatchLoader  │
//!                   │ GET /        │   │ semaphore+   │
//!                   └──────────────┘   │ batch barrier│
//!                                      └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! harvest fetch github          # stage issues and comments
//! harvest load                  # recreate schema, load staged issues
//! harvest search "panic"        # title search, newest first
//! harvest serve                 # GET /?searchText=panic
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Typed pipeline errors |
//! | [`cursor`] | Pagination position tracking |
//! | [`rate_limit`] | Fixed-delay request pacing |
//! | [`traits`] | `PageSource` trait and source registry |
//! | [`connector_github`] | GitHub issues source |
//! | [`connector_slack`] | Slack channel history source |
//! | [`fetch`] | Rate-limited pagination loop |
//! | [`stage`] | Append-only staging files |
//! | [`store`] | Target-store abstraction (postgres, in-memory) |
//! | [`load`] | Bounded-concurrency batch loader |
//! | [`search`] | Title search |
//! | [`server`] | Search HTTP endpoint |
//! | [`progress`] | Progress reporting |
//! | [`logging`] | Tracing subscriber setup |
//! | [`db`] | Connection pool |

pub mod config;
pub mod connector_github;
pub mod connector_slack;
pub mod cursor;
pub mod db;
pub mod error;
pub mod fetch;
pub mod ingest;
pub mod load;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod rate_limit;
pub mod search;
pub mod server;
pub mod stage;
pub mod store;
pub mod traits;
