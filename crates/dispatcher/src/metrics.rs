//! Dispatch counters

use std::fmt;

/// Counters kept by the dispatch loop, returned when it stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Bus deliveries taken off the hand-off channel, duplicates included
    pub received: u64,
    /// Deliveries flagged as redeliveries by the bus
    pub duplicates: u64,
    /// Deliveries for an unknown or inactive subscription
    pub orphaned: u64,
    /// Topics that did not match their subscription pattern
    pub unmatched: u64,
    /// Object payloads that failed to parse
    pub malformed: u64,
    /// Records dropped for having no fields
    pub empty: u64,
    /// Records built and handed to sinks
    pub records: u64,
    /// Successful sink writes
    pub writes: u64,
    /// Failed sink writes
    pub write_failures: u64,
    /// Publish requests sent to the bus
    pub published: u64,
    /// Publish requests the bus rejected
    pub publish_failures: u64,
    /// Blank input lines
    pub publish_skipped: u64,
    /// Failed sink flushes, close included
    pub flush_failures: u64,
    /// Flush passes over all sinks
    pub flushes: u64,
    /// Idle ticks
    pub ticks: u64,
}

impl fmt::Display for DispatchStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "received={} duplicates={} unmatched={} malformed={} records={} writes={} \
             write_failures={} flush_failures={} published={} publish_failures={}",
            self.received,
            self.duplicates,
            self.unmatched,
            self.malformed,
            self.records,
            self.writes,
            self.write_failures,
            self.flush_failures,
            self.published,
            self.publish_failures
        )
    }
}
