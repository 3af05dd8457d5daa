//! Short-lived cache of describe-stack results.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rack_cloud::Stack;

pub const STACK_CACHE_TTL: Duration = Duration::from_secs(5);

pub struct StackCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, Stack)>>,
}

impl Default for StackCache {
    fn default() -> Self {
        Self::new(STACK_CACHE_TTL)
    }
}

impl StackCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, name: &str) -> Option<Stack> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(name) {
            Some((at, stack)) if at.elapsed() < self.ttl => Some(stack.clone()),
            Some(_) => {
                entries.remove(name);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, stack: Stack) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(stack.name.clone(), (Instant::now(), stack));
    }

    pub fn invalidate(&self, name: &str) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expires_and_invalidates() {
        let cache = StackCache::new(Duration::from_millis(20));
        cache.put(Stack::new("a", "UPDATE_COMPLETE"));
        assert!(cache.get("a").is_some());
        cache.invalidate("a");
        assert!(cache.get("a").is_none());

        cache.put(Stack::new("a", "UPDATE_COMPLETE"));
        std::thread::sleep(Duration::from_millis(30));
        assert!(cache.get("a").is_none());
    }
}
