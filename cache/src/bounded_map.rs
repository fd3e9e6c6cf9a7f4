use std::hash::Hash;

use ahash::{HashMap, HashMapExt};
use generational_arena::{Arena, Index};

/// Selects which entry a full cache gives up to make room for a new key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum EvictionMode {
  /// Evict the least recently used entry. Reads refresh recency.
  #[default]
  Lru,
  /// Evict the oldest inserted entry. Reads and overwrites do not reorder.
  InsertionOrder,
}

#[derive(Debug)]
struct Node<K, V> {
  key: K,
  value: V,
  next: Option<Index>,
  prev: Option<Index>,
}

/// A key/value map bounded by entry count.
///
/// Entries live in an arena and are threaded onto a doubly linked list whose
/// head is the most recently inserted (or, in LRU mode, used) entry. The tail
/// is always the next eviction victim.
#[derive(Debug)]
pub(crate) struct BoundedMap<K, V> {
  nodes: Arena<Node<K, V>>,
  lookup: HashMap<K, Index>,
  head: Option<Index>,
  tail: Option<Index>,
  max_entries: usize,
  mode: EvictionMode,
}

impl<K: Eq + Hash + Clone, V> BoundedMap<K, V> {
  pub(crate) fn new(max_entries: usize, mode: EvictionMode) -> Self {
    Self {
      nodes: Arena::new(),
      lookup: HashMap::new(),
      head: None,
      tail: None,
      max_entries,
      mode,
    }
  }

  pub(crate) fn len(&self) -> usize {
    self.lookup.len()
  }

  pub(crate) fn max_entries(&self) -> usize {
    self.max_entries
  }

  pub(crate) fn mode(&self) -> EvictionMode {
    self.mode
  }

  pub(crate) fn contains(&self, key: &K) -> bool {
    self.lookup.contains_key(key)
  }

  /// Looks up a key. In LRU mode a hit becomes the most recently used entry.
  pub(crate) fn get(&mut self, key: &K) -> Option<&V> {
    let index = *self.lookup.get(key)?;
    if self.mode == EvictionMode::Lru {
      self.move_to_front(index);
    }
    self.nodes.get(index).map(|node| &node.value)
  }

  /// Inserts or overwrites an entry, returning the key evicted to make room.
  ///
  /// Only inserting a new key into a full map evicts. Overwriting refreshes
  /// recency in LRU mode and keeps the original position otherwise.
  pub(crate) fn set(&mut self, key: K, value: V) -> Option<K> {
    if let Some(&index) = self.lookup.get(&key) {
      if let Some(node) = self.nodes.get_mut(index) {
        node.value = value;
      }
      if self.mode == EvictionMode::Lru {
        self.move_to_front(index);
      }
      return None;
    }

    let evicted = if self.len() >= self.max_entries {
      self.pop_back().map(|(key, _)| key)
    } else {
      None
    };

    let index = self.nodes.insert(Node {
      key: key.clone(),
      value,
      next: None,
      prev: None,
    });
    self.lookup.insert(key, index);
    self.push_front_node(index);

    evicted
  }

  pub(crate) fn remove(&mut self, key: &K) -> Option<V> {
    let index = self.lookup.remove(key)?;
    self.unlink(index);
    self.nodes.remove(index).map(|node| node.value)
  }

  pub(crate) fn clear(&mut self) {
    self.nodes.clear();
    self.lookup.clear();
    self.head = None;
    self.tail = None;
  }

  fn pop_back(&mut self) -> Option<(K, V)> {
    let tail = self.tail?;
    let key = self.nodes.get(tail)?.key.clone();
    self.remove(&key).map(|value| (key, value))
  }

  fn move_to_front(&mut self, index: Index) {
    if self.head != Some(index) {
      self.unlink(index);
      self.push_front_node(index);
    }
  }

  // Detaches a node from its neighbours without removing it from the arena.
  fn unlink(&mut self, index: Index) {
    let (prev, next) = match self.nodes.get(index) {
      Some(node) => (node.prev, node.next),
      None => return,
    };

    match prev.and_then(|prev| self.nodes.get_mut(prev)) {
      Some(prev_node) => prev_node.next = next,
      None => self.head = next,
    }

    match next.and_then(|next| self.nodes.get_mut(next)) {
      Some(next_node) => next_node.prev = prev,
      None => self.tail = prev,
    }
  }

  fn push_front_node(&mut self, index: Index) {
    let old_head = self.head;
    if let Some(node) = self.nodes.get_mut(index) {
      node.next = old_head;
      node.prev = None;
    }
    self.head = Some(index);

    if let Some(old_head) = old_head.and_then(|idx| self.nodes.get_mut(idx)) {
      old_head.prev = Some(index);
    }

    if self.tail.is_none() {
      self.tail = Some(index);
    }
  }

  // Keys from head (newest / most recently used) to tail (next victim).
  #[cfg(test)]
  pub(crate) fn keys_as_vec(&self) -> Vec<K> {
    let mut keys = Vec::new();
    let mut current = self.head;
    while let Some(index) = current {
      keys.push(self.nodes[index].key.clone());
      current = self.nodes[index].next;
    }
    keys
  }
}
