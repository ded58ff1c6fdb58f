//! Subscription table
//!
//! Each bus callback carries the id of the subscription it was created for,
//! so the loop resolves the pattern from here instead of from captured state.

use std::collections::BTreeMap;
use std::fmt;

use contracts::QoS;
use topic::CompiledPattern;

/// Dispatcher-assigned subscription identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One subscribed pattern
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub pattern: CompiledPattern,
    pub qos: QoS,
    /// Cleared on unsubscribe; late deliveries for inactive entries are skipped
    pub active: bool,
}

/// Subscriptions keyed by id, in creation order
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    next_id: u64,
    entries: BTreeMap<SubscriptionId, Subscription>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the id for a subscription about to be created
    ///
    /// Ids are never reused, even when the subscription is not created.
    pub fn next_id(&mut self) -> SubscriptionId {
        self.next_id += 1;
        SubscriptionId(self.next_id)
    }

    pub fn insert(&mut self, id: SubscriptionId, pattern: CompiledPattern, qos: QoS) {
        self.entries.insert(
            id,
            Subscription {
                id,
                pattern,
                qos,
                active: true,
            },
        );
    }

    pub fn get(&self, id: SubscriptionId) -> Option<&Subscription> {
        self.entries.get(&id)
    }

    /// Active subscription for `id`
    pub fn active(&self, id: SubscriptionId) -> Option<&Subscription> {
        self.get(id).filter(|sub| sub.active)
    }

    /// Mark `id` inactive; returns the subscription if it was active
    pub fn deactivate(&mut self, id: SubscriptionId) -> Option<&Subscription> {
        let sub = self.entries.get_mut(&id).filter(|sub| sub.active)?;
        sub.active = false;
        Some(&*sub)
    }

    /// Whether an active subscription already uses this pattern string
    pub fn contains_pattern(&self, pattern: &str) -> bool {
        self.entries
            .values()
            .any(|sub| sub.active && sub.pattern.as_str() == pattern)
    }

    pub fn active_count(&self) -> usize {
        self.entries.values().filter(|sub| sub.active).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.entries.values()
    }
}
