//! Aula Engagement Tracker
//!
//! Client-side face/emotion event producer for the Aula classroom
//! engagement analytics platform. The tracker converts a continuous
//! classification stream into discrete, rate-limited, scored events and
//! ships them to the collector without ever blocking the sampling loop.
//!
//! ## Features
//!
//! - **Throttled Counting**: a sample counts as a new detection only when
//!   the emotion changed or the throttle window elapsed, so near-identical
//!   samples neither inflate statistics nor duplicate network traffic
//! - **Local-First Aggregates**: per-identity scores and histograms are
//!   authoritative for the open session even when the collector is down
//! - **Fire-and-Forget Shipping**: counted events are posted from detached
//!   tasks; transport failures are invisible by design
//! - **Bounded Enrollment**: explicit enrollment retries classification a
//!   few times, falls back to a broader scan, and only then reports failure
//!
//! ## Architecture
//!
//! ```text
//! Classifier          TrackingSession              EventShipper
//! ┌────────────┐     ┌──────────────────┐         ┌──────────────┐
//! │ classify() │────▶│ throttle + score │────────▶│ POST /events │──▶ Collector
//! │ scan()     │     │ per-identity map │  spawn  │ (detached)   │
//! └────────────┘     └──────────────────┘         └──────────────┘
//!       ▲
//!       │ bounded retries
//! ┌────────────┐
//! │ enrollment │───────────────────────────────────▶ POST /faces
//! └────────────┘
//! ```

pub mod classifier;
pub mod config;
pub mod enrollment;
pub mod event_shipper;
pub mod scoring;
pub mod tracking_session;

pub use classifier::{Classifier, ClassifierError, Observation, ReplayClassifier};
pub use config::TrackerConfig;
pub use enrollment::{enroll, EnrollError};
pub use event_shipper::{EngagementEvent, EventShipper, ShipperError};
pub use scoring::{score_delta, Emotion};
pub use tracking_session::{IdentityStats, SampleOutcome, TrackingSession};
