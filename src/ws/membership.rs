//! Reference-counted subscription membership.
//!
//! Multiple subscribers may cover overlapping id sets; the wire must see
//! exactly one subscribe per id and one unsubscribe when the last subscriber
//! leaves. `add`/`remove` return the delta that needs a wire frame.

use std::collections::HashMap;

#[derive(Debug, Default)]
pub(crate) struct RefCounts {
    counts: HashMap<String, u32>,
}

impl RefCounts {
    /// Increments each id, returning the ids whose count went 0 -> 1.
    /// Blank ids are silently dropped.
    pub fn add(&mut self, ids: &[String]) -> Vec<String> {
        let mut fresh = Vec::new();
        for id in ids {
            if id.trim().is_empty() {
                continue;
            }
            let count = self.counts.entry(id.clone()).or_insert(0);
            if *count == 0 {
                fresh.push(id.clone());
            }
            *count += 1;
        }
        fresh
    }

    /// Decrements each id, returning the ids whose count went 1 -> 0.
    /// Ids that reach zero are evicted; unknown ids are ignored.
    pub fn remove(&mut self, ids: &[String]) -> Vec<String> {
        let mut released = Vec::new();
        for id in ids {
            match self.counts.get_mut(id) {
                Some(count) if *count <= 1 => {
                    self.counts.remove(id);
                    released.push(id.clone());
                }
                Some(count) => *count -= 1,
                None => {}
            }
        }
        released
    }

    /// Every id with a positive count.
    pub fn snapshot(&self) -> Vec<String> {
        self.counts.keys().cloned().collect()
    }

    #[cfg(test)]
    pub fn count(&self, id: &str) -> u32 {
        self.counts.get(id).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_add_returns_fresh_ids_only() {
        let mut refs = RefCounts::default();
        assert_eq!(refs.add(&ids(&["a", "b"])), ids(&["a", "b"]));
        assert_eq!(refs.add(&ids(&["a", "c"])), ids(&["c"]));
        assert_eq!(refs.count("a"), 2);
        assert_eq!(refs.count("b"), 1);
    }

    #[test]
    fn test_remove_returns_released_ids_only() {
        let mut refs = RefCounts::default();
        refs.add(&ids(&["a"]));
        refs.add(&ids(&["a", "b"]));
        assert!(refs.remove(&ids(&["a"])).is_empty());
        assert_eq!(refs.remove(&ids(&["a", "b"])), ids(&["a", "b"]));
        assert_eq!(refs.count("a"), 0);
    }

    #[test]
    fn test_remove_unknown_id_is_noop() {
        let mut refs = RefCounts::default();
        assert!(refs.remove(&ids(&["ghost"])).is_empty());
    }

    #[test]
    fn test_blank_ids_dropped() {
        let mut refs = RefCounts::default();
        assert!(refs.add(&ids(&["", "  "])).is_empty());
        assert!(refs.snapshot().is_empty());
    }

    #[test]
    fn test_net_membership_matches_deltas() {
        // sum(add deltas) - sum(remove deltas) equals the live membership.
        let mut refs = RefCounts::default();
        let mut live: Vec<String> = Vec::new();
        for added in [
            refs.add(&ids(&["a", "b"])),
            refs.add(&ids(&["b", "c"])),
            refs.add(&ids(&["c"])),
        ] {
            live.extend(added);
        }
        for removed in [refs.remove(&ids(&["b"])), refs.remove(&ids(&["c", "c"]))] {
            live.retain(|id| !removed.contains(id));
        }
        let mut snapshot = refs.snapshot();
        snapshot.sort();
        live.sort();
        assert_eq!(snapshot, live);
    }
}
