//! Pattern routing table shared by bus implementations

use topic::{CompiledPattern, PatternError};

use crate::message::DeliveryCallback;

struct Route {
    pattern: CompiledPattern,
    callback: DeliveryCallback,
}

/// Subscribed patterns and their callbacks, in subscription order
#[derive(Default)]
pub(crate) struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// Add a route, replacing any existing route for the same pattern string
    pub(crate) fn insert(
        &mut self,
        pattern: &str,
        callback: DeliveryCallback,
    ) -> Result<(), PatternError> {
        let pattern = topic::compile(pattern)?;
        self.routes.retain(|route| route.pattern != pattern);
        self.routes.push(Route { pattern, callback });
        Ok(())
    }

    /// Remove the route for `pattern`; false when none existed
    pub(crate) fn remove(&mut self, pattern: &str) -> bool {
        let before = self.routes.len();
        self.routes.retain(|route| route.pattern.as_str() != pattern);
        self.routes.len() != before
    }

    pub(crate) fn patterns(&self) -> Vec<String> {
        self.routes
            .iter()
            .map(|route| route.pattern.as_str().to_string())
            .collect()
    }

    /// Callbacks whose pattern matches `topic`
    ///
    /// Returned by value so the caller can release its lock before invoking them.
    pub(crate) fn matching(&self, topic: &str) -> Vec<DeliveryCallback> {
        self.routes
            .iter()
            .filter(|route| route.pattern.is_match(topic))
            .map(|route| route.callback.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::message::BusMessage;

    fn counting() -> (DeliveryCallback, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let callback: DeliveryCallback = Arc::new(move |_msg: BusMessage| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (callback, hits)
    }

    #[test]
    fn test_matching_routes() {
        let mut table = RouteTable::default();
        let (a, _) = counting();
        let (b, _) = counting();
        table.insert("a/+", a).unwrap();
        table.insert("a/#", b).unwrap();

        assert_eq!(table.matching("a/x").len(), 2);
        assert_eq!(table.matching("a").len(), 1);
        assert!(table.matching("b/x").is_empty());
    }

    #[test]
    fn test_insert_replaces_and_remove() {
        let mut table = RouteTable::default();
        let (a, _) = counting();
        let (b, _) = counting();
        table.insert("a/+", a).unwrap();
        table.insert("a/+", b).unwrap();
        assert_eq!(table.patterns(), vec!["a/+"]);

        assert!(table.remove("a/+"));
        assert!(!table.remove("a/+"));
        assert!(table.patterns().is_empty());
    }

    #[test]
    fn test_insert_rejects_bad_pattern() {
        let mut table = RouteTable::default();
        let (a, _) = counting();
        assert!(table.insert("a/#/b", a).is_err());
    }
}
