//! The table of parked long-poll responses, one per browser tab.
//!
//! A tab (identified by its `Hue-Instance-ID`) has at most one suspended
//! response at any instant. Entries leave the table in exactly one of
//! three ways: output delivery, the 55-second keep-alive sweep, or
//! destruction of every shell the tab was subscribed to. Removal always
//! happens before writing (take-then-write), which is what makes each
//! handle single-writer.

use std::collections::HashMap;
use std::time::Instant;

use tracing::warn;

use crate::constants::BROWSER_REQUEST_TIMEOUT;
use crate::responder::Responder;

struct Subscription {
    responder: Box<dyn Responder>,
    arrival: Instant,
}

#[derive(Default)]
pub struct SubscriptionTable {
    parked: HashMap<String, Subscription>,
}

impl SubscriptionTable {
    /// Park a response for `tab_id`. A previous entry means the browser
    /// opened a new long-poll before the old one was answered, i.e. the
    /// old request was abandoned client-side; it is evicted.
    pub fn insert(&mut self, tab_id: &str, responder: Box<dyn Responder>, now: Instant) {
        let replaced = self.parked.insert(
            tab_id.to_string(),
            Subscription {
                responder,
                arrival: now,
            },
        );
        if replaced.is_some() {
            warn!(tab_id, "replacing an abandoned long-poll for this tab");
        }
    }

    /// Remove and return the parked response for `tab_id`, if any.
    pub fn take_one(&mut self, tab_id: &str) -> Option<Box<dyn Responder>> {
        self.parked.remove(tab_id).map(|sub| sub.responder)
    }

    /// Remove and return the handles for each id, silently skipping ids
    /// with no entry (a concurrent completion may have taken them).
    pub fn take<'a>(&mut self, tab_ids: impl IntoIterator<Item = &'a String>) -> Vec<Box<dyn Responder>> {
        tab_ids
            .into_iter()
            .filter_map(|tab_id| self.take_one(tab_id))
            .collect()
    }

    /// Remove and return every entry older than the keep-alive period.
    pub fn sweep(&mut self, now: Instant) -> Vec<Box<dyn Responder>> {
        let expired: Vec<String> = self
            .parked
            .iter()
            .filter(|(_, sub)| now.duration_since(sub.arrival) >= BROWSER_REQUEST_TIMEOUT)
            .map(|(tab_id, _)| tab_id.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|tab_id| self.take_one(&tab_id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.parked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parked.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Recording double for the response capability.
    struct RecordingResponder {
        slot: Arc<Mutex<Option<Value>>>,
    }

    fn recorder() -> (Box<dyn Responder>, Arc<Mutex<Option<Value>>>) {
        let slot = Arc::new(Mutex::new(None));
        (
            Box::new(RecordingResponder { slot: slot.clone() }),
            slot,
        )
    }

    impl Responder for RecordingResponder {
        fn finish(self: Box<Self>, body: Value) {
            *self.slot.lock().unwrap() = Some(body);
        }
    }

    #[test]
    fn at_most_one_entry_per_tab() {
        let mut table = SubscriptionTable::default();
        let now = Instant::now();
        let (first, _) = recorder();
        let (second, second_slot) = recorder();
        table.insert("T1", first, now);
        table.insert("T1", second, now);
        assert_eq!(table.len(), 1);
        table.take_one("T1").unwrap().finish(Value::Bool(true));
        assert_eq!(*second_slot.lock().unwrap(), Some(Value::Bool(true)));
    }

    #[test]
    fn take_skips_absent_ids() {
        let mut table = SubscriptionTable::default();
        let (responder, _) = recorder();
        table.insert("T1", responder, Instant::now());
        let ids = vec!["T1".to_string(), "T2".to_string()];
        let taken = table.take(ids.iter());
        assert_eq!(taken.len(), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn sweep_returns_only_expired_entries() {
        let mut table = SubscriptionTable::default();
        let start = Instant::now();
        let (old, _) = recorder();
        let (fresh, _) = recorder();
        table.insert("old", old, start);
        table.insert("fresh", fresh, start + Duration::from_secs(30));
        let swept = table.sweep(start + Duration::from_secs(56));
        assert_eq!(swept.len(), 1);
        assert_eq!(table.len(), 1);
        assert!(table.take_one("fresh").is_some());
    }
}
