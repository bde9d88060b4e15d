//! Job definitions shipped with the binary.

mod echo;
mod table_stats;

use std::sync::Arc;

use jobdeck_scheduler::registry::JobRegistry;

pub use {echo::EchoJob, table_stats::TableStatsJob};

/// Registry holding every built-in job.
pub fn builtin_registry() -> JobRegistry {
    let mut registry = JobRegistry::new();
    registry.register(Arc::new(EchoJob));
    registry.register(Arc::new(TableStatsJob));
    registry
}
