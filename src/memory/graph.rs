//! Bidirectional association graph between thought keys.
//!
//! Every link is inserted in both directions under one write lock, and every
//! removal clears the key from all of its neighbours in the same critical
//! section, so readers never observe a half-linked edge.

use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

#[derive(Default)]
pub struct AssociationGraph {
    edges: RwLock<HashMap<String, BTreeSet<String>>>,
}

impl AssociationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Link `a` and `b` in both directions. Self-links are ignored.
    /// Returns `true` if the edge was new.
    pub fn link(&self, a: &str, b: &str) -> bool {
        if a == b {
            return false;
        }
        let mut edges = self.edges.write();
        let added = edges.entry(a.to_string()).or_default().insert(b.to_string());
        edges.entry(b.to_string()).or_default().insert(a.to_string());
        added
    }

    /// Link `key` to every key in `others` atomically. Returns the number of new edges.
    pub fn link_all<'a>(&self, key: &str, others: impl IntoIterator<Item = &'a String>) -> usize {
        let mut edges = self.edges.write();
        let mut added = 0;
        for other in others {
            if other == key {
                continue;
            }
            if edges.entry(key.to_string()).or_default().insert(other.clone()) {
                added += 1;
            }
            edges.entry(other.clone()).or_default().insert(key.to_string());
        }
        added
    }

    pub fn neighbors(&self, key: &str) -> BTreeSet<String> {
        self.edges.read().get(key).cloned().unwrap_or_default()
    }

    pub fn are_linked(&self, a: &str, b: &str) -> bool {
        self.edges
            .read()
            .get(a)
            .is_some_and(|set| set.contains(b))
    }

    /// Drop `key` and every edge touching it. Returns the number of edges removed.
    pub fn remove(&self, key: &str) -> usize {
        let mut edges = self.edges.write();
        let Some(neighbors) = edges.remove(key) else {
            return 0;
        };
        for neighbor in &neighbors {
            if let Some(set) = edges.get_mut(neighbor) {
                set.remove(key);
                if set.is_empty() {
                    edges.remove(neighbor);
                }
            }
        }
        neighbors.len()
    }

    pub fn remove_all<'a>(&self, keys: impl IntoIterator<Item = &'a String>) -> usize {
        keys.into_iter().map(|key| self.remove(key)).sum()
    }

    /// Breadth-first traversal from `start`, excluding `start` itself.
    ///
    /// Returns `(key, hops)` pairs ordered by hop distance, then key.
    pub fn bfs(&self, start: &str, max_depth: usize) -> Vec<(String, usize)> {
        let edges = self.edges.read();
        let mut seen: HashSet<&str> = HashSet::from([start]);
        let mut queue: VecDeque<(&str, usize)> = VecDeque::from([(start, 0)]);
        let mut found = Vec::new();

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            let Some(neighbors) = edges.get(current) else {
                continue;
            };
            // BTreeSet iteration keeps each level in key order.
            for next in neighbors {
                if seen.insert(next.as_str()) {
                    found.push((next.clone(), depth + 1));
                    queue.push_back((next.as_str(), depth + 1));
                }
            }
        }
        found
    }

    /// Keys with at least one association.
    pub fn thought_chains(&self) -> usize {
        self.edges.read().values().filter(|set| !set.is_empty()).count()
    }

    /// Sum of adjacency set sizes (each edge counted from both ends).
    pub fn total_associations(&self) -> usize {
        self.edges.read().values().map(BTreeSet::len).sum()
    }

    pub fn clear(&self) {
        self.edges.write().clear();
    }
}
