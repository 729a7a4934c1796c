//! Service layer for popstats
//!
//! ## Architecture
//!
//! ```text
//! Record server hooks (interceptors)
//!     ↓
//! StatsEngine (classify, resolve, fan out)
//!     ↓
//! CounterLedger (db/ledger.rs)
//!     ↓
//! SQLite Database
//! ```

pub mod events;
pub mod interceptors;
pub mod stats_service;

// Re-exports
pub use events::{spawn_logging_listener, EventBus, EventListener, StatsEvent};
pub use interceptors::{register_stats_interceptors, OutcomeTally, TallySnapshot};
pub use stats_service::{Outcome, Staging, StatsEngine};

use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::db::{reference::load_reference, CounterLedger, Database};
use crate::error::StatsError;
use crate::geo::Gazetteer;
use crate::interceptor::InterceptorRegistry;
use crate::reference::DiseaseCatalog;
use crate::subjects::InMemorySubjects;

/// Service container
///
/// Builds the engine from the reference data already seeded in the database.
pub struct Services {
    pub stats: Arc<StatsEngine>,
    pub subjects: Arc<InMemorySubjects>,
    pub tally: Arc<OutcomeTally>,
    pub events: Arc<EventBus>,
}

impl Services {
    pub fn new(db: Database, config: &Config) -> Result<Self, StatsError> {
        let reference = db.with_conn(load_reference)?;
        let gazetteer = Gazetteer::from_reference(&reference, &config.undefined_subdivision_key);
        let catalog = DiseaseCatalog::from_reference(&reference);
        info!(
            localities = gazetteer.len(),
            diseases = catalog.len(),
            "Loaded reference data"
        );
        if gazetteer.is_empty() {
            info!("No subdivisions seeded; run `popstats init --reference <file>` first");
        }

        let events = Arc::new(EventBus::with_capacity(config.event_capacity));
        let subjects = Arc::new(InMemorySubjects::new());
        let stats = Arc::new(StatsEngine::new(
            CounterLedger::new(db),
            Arc::new(gazetteer),
            Arc::new(catalog),
            subjects.clone(),
            Arc::new(Staging::new()),
            events.clone(),
        ));

        Ok(Self {
            stats,
            subjects,
            tally: Arc::new(OutcomeTally::new()),
            events,
        })
    }

    /// Registry with the six stats interceptors
    pub fn registry(&self) -> InterceptorRegistry {
        let mut registry = InterceptorRegistry::new();
        register_stats_interceptors(&mut registry, self.stats.clone(), self.tally.clone());
        registry
    }
}
