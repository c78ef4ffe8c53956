//! Owner of one [`StatusCoalescer`] per status key.
//!
//! Coalescers are created the first time a key is seen, each with its own
//! callback built by the registry's factory. Keys never share state.

use std::collections::HashMap;
use tracing::info;

use super::{CoalescerStats, FundingCallback, StatusCoalescer};
use crate::domain::{FundingEvent, StatusSnapshot};

type CallbackFactory = Box<dyn FnMut(&str) -> FundingCallback + Send>;

pub struct CoalescerRegistry {
    coalescers: HashMap<String, StatusCoalescer>,
    factory: CallbackFactory,
}

impl std::fmt::Debug for CoalescerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoalescerRegistry")
            .field("keys", &self.coalescers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CoalescerRegistry {
    /// `factory` builds the event callback for each newly seen key
    pub fn new<F>(factory: F) -> Self
    where
        F: FnMut(&str) -> FundingCallback + Send + 'static,
    {
        Self {
            coalescers: HashMap::new(),
            factory: Box::new(factory),
        }
    }

    /// Route a snapshot to the coalescer for `status_key`, creating it lazily
    pub fn handle(&mut self, status_key: &str, snapshot: &StatusSnapshot) -> Option<FundingEvent> {
        if !self.coalescers.contains_key(status_key) {
            info!("Tracking funding periods for {}", status_key);
            let callback = (self.factory)(status_key);
            self.coalescers.insert(
                status_key.to_string(),
                StatusCoalescer::with_callback(status_key, callback),
            );
        }
        self.coalescers
            .get_mut(status_key)
            .and_then(|coalescer| coalescer.handle_snapshot(snapshot))
    }

    /// Re-arm one key; returns false if the key was never seen
    pub fn reset(&mut self, status_key: &str) -> bool {
        match self.coalescers.get_mut(status_key) {
            Some(coalescer) => {
                coalescer.reset();
                true
            }
            None => false,
        }
    }

    /// Re-arm every key, e.g. after the feed reconnects
    pub fn reset_all(&mut self) {
        for coalescer in self.coalescers.values_mut() {
            coalescer.reset();
        }
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.coalescers.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn stats(&self, status_key: &str) -> Option<CoalescerStats> {
        self.coalescers.get(status_key).map(StatusCoalescer::stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn registry() -> (CoalescerRegistry, Arc<Mutex<Vec<FundingEvent>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let registry = CoalescerRegistry::new(move |_key: &str| -> FundingCallback {
            let sink = Arc::clone(&sink);
            Box::new(move |event: &FundingEvent| {
                sink.lock().unwrap().push(event.clone());
                Ok(())
            })
        });
        (registry, seen)
    }

    #[test]
    fn test_keys_are_tracked_independently() {
        let (mut registry, seen) = registry();
        let s = |period_end| StatusSnapshot::new(0, period_end, 0.0, 1.0);

        registry.handle("a", &s(100));
        registry.handle("b", &s(500));
        registry.handle("a", &s(200));
        registry.handle("b", &s(500));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].status_key, "a");
        assert_eq!(registry.keys(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_reset_all_rearms_every_key() {
        let (mut registry, seen) = registry();
        let s = |period_end| StatusSnapshot::new(0, period_end, 0.0, 1.0);

        registry.handle("a", &s(100));
        registry.handle("b", &s(100));
        registry.reset_all();
        registry.handle("a", &s(200));
        registry.handle("b", &s(200));

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(registry.stats("a").unwrap().resets, 1);
        assert!(!registry.reset("unknown"));
        assert!(registry.reset("a"));
    }
}
