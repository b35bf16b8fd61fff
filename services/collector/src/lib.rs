//! Aula Telemetry Collector
//!
//! Ingestion service for the Aula classroom engagement analytics platform.
//! The collector accepts face/emotion classification events over a small
//! HTTP surface, persists them through a uniform storage interface, and
//! serves filtered reads back to dashboards and polling consumers.
//!
//! ## Features
//!
//! - **Dual Storage Backends**: one persistence interface over either a
//!   managed PostgreSQL database or a local JSON data file, chosen once at
//!   process start from the configured credential
//! - **Graceful Degradation**: a missing or broken database credential is a
//!   supported mode, not an error; reads degrade to empty results so the
//!   ingest path stays available
//! - **Lenient Event Ingestion**: event posts accept partial bodies with
//!   server-side defaults so producers are never blocked by validation
//! - **Filtered Event Queries**: exact-match filtering by identity label
//!   and session tag, newest-first, with a hard response cap
//!
//! ## Architecture
//!
//! ```text
//! Tracker Clients              Ingestion API            Storage
//! ┌──────────────┐            ┌──────────────┐         ┌──────────────┐
//! │ POST /events │───────────▶│ axum router  │         │ PostgreSQL   │
//! │ POST /faces  │            │  validation  │────────▶│   (managed)  │
//! └──────────────┘            │  defaulting  │         └──────────────┘
//!                             └──────────────┘                │ or
//! ┌──────────────┐                   │                 ┌──────────────┐
//! │ Dashboards   │◀──────────────────┘                 │ telemetry.   │
//! │ GET /events  │                                     │   json       │
//! └──────────────┘                                     └──────────────┘
//! ```

pub mod api;
pub mod config;
pub mod file_store;
pub mod pg_store;
pub mod store;

pub use api::{create_router, start_api_server, AppState};
pub use config::Config;
pub use file_store::FileStore;
pub use pg_store::PgStore;
pub use store::{
    EventQuery, EventRecord, FaceRecord, NewEvent, SessionRecord, StudentRecord, TelemetryStore,
};
