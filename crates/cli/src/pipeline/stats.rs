//! Bridge run statistics.

use std::time::Duration;

use dispatcher::DispatchStats;
use observability::MetricsSummary;

/// Statistics from a bridge run
#[derive(Debug, Clone)]
pub struct BridgeStats {
    /// Dispatch loop counters
    pub dispatch: DispatchStats,

    /// Total duration of the run
    pub duration: Duration,

    /// Subscriptions that were created
    pub active_subscriptions: usize,

    /// Configured sinks
    pub active_sinks: usize,

    /// In-memory metrics aggregate
    pub metrics: MetricsSummary,
}

impl BridgeStats {
    /// Records persisted per second
    pub fn records_per_sec(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.dispatch.records as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n=== Bridge Statistics ===\n");

        println!("Overview");
        println!("   Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   Subscriptions: {}", self.active_subscriptions);
        println!("   Sinks: {}", self.active_sinks);
        println!("   Records/s: {:.2}", self.records_per_sec());

        let d = &self.dispatch;
        println!("\nDispatch");
        println!("   Received: {} (duplicates {})", d.received, d.duplicates);
        println!("   Unmatched: {}", d.unmatched);
        println!("   Malformed: {}", d.malformed);
        println!("   Without fields: {}", d.empty);
        println!("   Records: {}", d.records);
        println!("   Writes: {} (failed {})", d.writes, d.write_failures);
        println!("   Flush failures: {}", d.flush_failures);
        println!(
            "   Published: {} (failed {}, skipped {})",
            d.published, d.publish_failures, d.publish_skipped
        );
        println!("   Idle ticks: {}", d.ticks);

        println!("\n{}", self.metrics);
    }
}
