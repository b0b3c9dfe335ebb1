//! Bounded least-recently-used cache for token metadata.
//!
//! The map indexes into a slab of doubly-linked entries ordered from most
//! to least recently used. Map and list must stay in step: every map slot
//! points at a live entry and every live entry is indexed.

use std::collections::HashMap;
use std::hash::Hash;

struct Node<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

pub struct LruCache<K, V> {
    map: HashMap<K, usize>,
    slab: Vec<Option<Node<K, V>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    max_size: usize,
}

impl<K: Eq + Hash + Clone, V> LruCache<K, V> {
    pub fn new(max_size: usize) -> Self {
        LruCache {
            map: HashMap::new(),
            slab: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            max_size,
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Adjust the bound. Excess entries are shed on the next insert.
    pub fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
    }

    pub fn exists(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    /// Insert or refresh, evicting from the cold end past the bound.
    pub fn put(&mut self, key: K, value: V) {
        if let Some(&idx) = self.map.get(&key) {
            self.slab[idx]
                .as_mut()
                .expect("indexed slot holds an entry")
                .value = value;
            self.move_to_front(idx);
        } else {
            let node = Node {
                key: key.clone(),
                value,
                prev: None,
                next: self.head,
            };
            let idx = match self.free.pop() {
                Some(idx) => {
                    self.slab[idx] = Some(node);
                    idx
                }
                None => {
                    self.slab.push(Some(node));
                    self.slab.len() - 1
                }
            };
            if let Some(old_head) = self.head {
                self.node_mut(old_head).prev = Some(idx);
            }
            self.head = Some(idx);
            if self.tail.is_none() {
                self.tail = Some(idx);
            }
            self.map.insert(key, idx);
        }

        while self.map.len() > self.max_size {
            let Some(tail) = self.tail else { break };
            let key = self.node(tail).key.clone();
            self.erase(&key);
        }
        debug_assert!(self.is_consistent());
    }

    /// Look up and mark most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let idx = *self.map.get(key)?;
        self.move_to_front(idx);
        Some(&self.node(idx).value)
    }

    /// Look up without touching recency.
    pub fn peek(&self, key: &K) -> Option<&V> {
        let idx = *self.map.get(key)?;
        Some(&self.node(idx).value)
    }

    pub fn erase(&mut self, key: &K) {
        let Some(idx) = self.map.remove(key) else {
            return;
        };
        self.unlink(idx);
        self.slab[idx] = None;
        self.free.push(idx);
        debug_assert!(self.is_consistent());
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.slab.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
    }

    /// Keys from most to least recently used.
    pub fn keys_by_recency(&self) -> Vec<&K> {
        let mut keys = Vec::with_capacity(self.map.len());
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            let node = self.node(idx);
            keys.push(&node.key);
            cursor = node.next;
        }
        keys
    }

    /// Map and list agree on membership and size.
    pub fn is_consistent(&self) -> bool {
        let mut count = 0;
        let mut cursor = self.head;
        let mut last = None;
        while let Some(idx) = cursor {
            let Some(node) = self.slab[idx].as_ref() else {
                return false;
            };
            if self.map.get(&node.key) != Some(&idx) {
                return false;
            }
            if node.prev != last {
                return false;
            }
            last = Some(idx);
            cursor = node.next;
            count += 1;
        }
        count == self.map.len() && self.tail == last
    }

    fn node(&self, idx: usize) -> &Node<K, V> {
        self.slab[idx].as_ref().expect("linked index holds an entry")
    }

    fn node_mut(&mut self, idx: usize) -> &mut Node<K, V> {
        self.slab[idx].as_mut().expect("linked index holds an entry")
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let node = self.node(idx);
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.node_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.node_mut(n).prev = prev,
            None => self.tail = prev,
        }
    }

    fn move_to_front(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.unlink(idx);
        let node = self.node_mut(idx);
        node.prev = None;
        node.next = self.head;
        if let Some(old_head) = self.head {
            self.node_mut(old_head).prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_recently_used() {
        let mut cache = LruCache::new(3);
        cache.put("a", 1);
        cache.put("b", 2);
        cache.put("c", 3);
        cache.put("d", 4);
        assert!(!cache.exists(&"a"));
        assert!(cache.exists(&"b"));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn get_refreshes_recency() {
        let mut cache = LruCache::new(3);
        cache.put("a", 1);
        cache.put("b", 2);
        cache.put("c", 3);
        assert_eq!(cache.get(&"a"), Some(&1));
        cache.put("d", 4);
        // "b" was coldest after the refresh of "a".
        assert!(!cache.exists(&"b"));
        assert!(cache.exists(&"a"));
    }

    #[test]
    fn put_refreshes_existing_key() {
        let mut cache = LruCache::new(2);
        cache.put("a", 1);
        cache.put("b", 2);
        cache.put("a", 10);
        cache.put("c", 3);
        assert_eq!(cache.peek(&"a"), Some(&10));
        assert!(!cache.exists(&"b"));
    }

    #[test]
    fn erase_and_clear() {
        let mut cache = LruCache::new(4);
        cache.put("a", 1);
        cache.put("b", 2);
        cache.erase(&"a");
        assert!(!cache.exists(&"a"));
        assert_eq!(cache.len(), 1);
        // Erasing an absent key is a no-op.
        cache.erase(&"zzz");
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.is_consistent());
    }

    #[test]
    fn shrinking_bound_applies_on_next_put() {
        let mut cache = LruCache::new(4);
        for (k, v) in [("a", 1), ("b", 2), ("c", 3), ("d", 4)] {
            cache.put(k, v);
        }
        cache.set_max_size(2);
        assert_eq!(cache.len(), 4);
        cache.put("e", 5);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.keys_by_recency(), vec![&"e", &"d"]);
    }

    #[test]
    fn stays_consistent_under_churn() {
        let mut cache = LruCache::new(50);
        for round in 0..200u32 {
            cache.put(round % 75, round);
            if round % 3 == 0 {
                cache.get(&(round % 40));
            }
            if round % 7 == 0 {
                cache.erase(&(round % 20));
            }
            assert!(cache.is_consistent());
        }
        assert!(cache.len() <= 50);
    }

    #[test]
    fn fills_to_exact_capacity() {
        // Mirrors the production sizing of the metadata cache.
        let mut cache = LruCache::new(1000);
        let mut n = 0u32;
        while cache.len() != 1000 {
            cache.put(format!("TEST{n}"), n);
            n += 1;
        }
        assert!(cache.exists(&"TEST0".to_string()));
        cache.put("OVERWRITE".to_string(), 0);
        assert!(!cache.exists(&"TEST0".to_string()));
        assert!(cache.exists(&"TEST1".to_string()));
    }
}
