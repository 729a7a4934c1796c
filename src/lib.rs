//! popstats - population and disease-prevalence counters
//!
//! Keeps per-subdivision and per-region counters (population by sex,
//! population density, disease cases by sex) in step with create, update and
//! delete notifications for `Patient` and `Condition` records.
//!
//! ## Flow
//!
//! ```text
//! Notification ──► InterceptorRegistry ──► stats interceptors
//!                                              │
//!                      ┌───────────────────────┤
//!                      ▼                       ▼
//!               StagingCache           classify + Gazetteer
//!              (update pairs)                  │
//!                                              ▼
//!                                      CounterLedger ──► SQLite
//!                                              │
//!                                              ▼
//!                                          EventBus
//! ```
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/popstats/
//! ├── stats.db        # Reference data and counters
//! └── config.toml     # Configuration
//! ```

pub mod classify;
pub mod config;
pub mod db;
pub mod error;
pub mod geo;
pub mod interceptor;
pub mod reference;
pub mod replay;
pub mod resources;
pub mod services;
pub mod staging;
pub mod subjects;

// Re-exports
pub use classify::{Sex, SkipReason};
pub use config::Config;
pub use db::{CounterLedger, Database, Scope};
pub use error::StatsError;
pub use geo::{Gazetteer, Placement};
pub use interceptor::{Interceptor, InterceptorRegistry, Notification, Operation};
pub use reference::{DiseaseCatalog, ReferenceData};
pub use replay::{ReplaySummary, Replayer};
pub use resources::{Condition, Patient, Resource};
pub use services::{EventBus, Outcome, Services, StatsEngine, StatsEvent};
pub use staging::StagingCache;
pub use subjects::{InMemorySubjects, SubjectLookup};
