//! Ordered, id-keyed row storage.
//!
//! Rows live in a slab of doubly linked nodes; a hash map from [`DocId`] to
//! slot gives constant time lookup, insertion before an anchor and removal.

use crate::message::DocId;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct Node<T> {
    id: DocId,
    value: T,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct RowIndex<T> {
    slots: Vec<Option<Node<T>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    by_id: HashMap<DocId, usize>,
}

impl<T> Default for RowIndex<T> {
    fn default() -> Self {
        RowIndex {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            by_id: HashMap::new(),
        }
    }
}

impl<T> RowIndex<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn contains(&self, id: DocId) -> bool {
        self.by_id.contains_key(&id)
    }

    fn node(&self, slot: usize) -> Option<&Node<T>> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, slot: usize) -> Option<&mut Node<T>> {
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    pub fn get(&self, id: DocId) -> Option<&T> {
        let slot = *self.by_id.get(&id)?;
        self.node(slot).map(|n| &n.value)
    }

    pub fn get_mut(&mut self, id: DocId) -> Option<&mut T> {
        let slot = *self.by_id.get(&id)?;
        self.node_mut(slot).map(|n| &mut n.value)
    }

    /// Insert `value` before `anchor`, or at the end when the anchor is
    /// absent or unknown. An existing row with the same id is replaced in
    /// its new position.
    pub fn insert(&mut self, id: DocId, value: T, anchor: Option<DocId>) {
        self.remove(id);
        let next = anchor.and_then(|a| self.by_id.get(&a).copied());
        let prev = match next {
            Some(n) => self.node(n).and_then(|node| node.prev),
            None => self.tail,
        };
        let node = Node {
            id,
            value,
            prev,
            next,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(node);
                slot
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };
        match prev.and_then(|p| self.node_mut(p)) {
            Some(p) => p.next = Some(slot),
            None => self.head = Some(slot),
        }
        match next.and_then(|n| self.node_mut(n)) {
            Some(n) => n.prev = Some(slot),
            None => self.tail = Some(slot),
        }
        self.by_id.insert(id, slot);
    }

    /// Remove a row, returning it with the id of the row that followed it.
    pub fn remove(&mut self, id: DocId) -> Option<(T, Option<DocId>)> {
        let slot = self.by_id.remove(&id)?;
        let node = self.slots.get_mut(slot)?.take()?;
        self.free.push(slot);
        match node.prev.and_then(|p| self.node_mut(p)) {
            Some(p) => p.next = node.next,
            None => self.head = node.next,
        }
        match node.next.and_then(|n| self.node_mut(n)) {
            Some(n) => n.prev = node.prev,
            None => self.tail = node.prev,
        }
        let next_id = node.next.and_then(|n| self.node(n)).map(|n| n.id);
        Some((node.value, next_id))
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.by_id.clear();
        self.head = None;
        self.tail = None;
    }

    pub fn first(&self) -> Option<DocId> {
        self.head.and_then(|s| self.node(s)).map(|n| n.id)
    }

    pub fn next_id(&self, id: DocId) -> Option<DocId> {
        let slot = *self.by_id.get(&id)?;
        let next = self.node(slot)?.next?;
        self.node(next).map(|n| n.id)
    }

    pub fn prev_id(&self, id: DocId) -> Option<DocId> {
        let slot = *self.by_id.get(&id)?;
        let prev = self.node(slot)?.prev?;
        self.node(prev).map(|n| n.id)
    }

    /// Rows in display order.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            index: self,
            cursor: self.head,
            backward: false,
        }
    }

    /// Rows after `from` (or from the start when `None`), in the given
    /// direction, with `from` itself excluded.
    pub fn iter_from(&self, from: Option<DocId>, backward: bool) -> Iter<'_, T> {
        let start = match from.and_then(|id| self.by_id.get(&id).copied()) {
            Some(slot) => self
                .node(slot)
                .and_then(|n| if backward { n.prev } else { n.next }),
            None if backward => self.tail,
            None => self.head,
        };
        Iter {
            index: self,
            cursor: start,
            backward,
        }
    }
}

pub struct Iter<'a, T> {
    index: &'a RowIndex<T>,
    cursor: Option<usize>,
    backward: bool,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (DocId, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.index.node(self.cursor?)?;
        self.cursor = if self.backward { node.prev } else { node.next };
        Some((node.id, &node.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(index: &RowIndex<&'static str>) -> Vec<u32> {
        index.iter().map(|(id, _)| id.0).collect()
    }

    #[test]
    fn test_insert_at_end_and_before_anchor() {
        let mut index = RowIndex::new();
        index.insert(DocId(1), "a", None);
        index.insert(DocId(2), "b", None);
        index.insert(DocId(3), "c", Some(DocId(2)));
        index.insert(DocId(4), "d", Some(DocId(1)));
        index.insert(DocId(5), "e", Some(DocId(99)));
        assert_eq!(ids(&index), vec![4, 1, 3, 2, 5]);
        assert_eq!(index.first(), Some(DocId(4)));
    }

    #[test]
    fn test_remove_relinks_neighbours() {
        let mut index = RowIndex::new();
        for id in 1..=4 {
            index.insert(DocId(id), "row", None);
        }
        let (_, next) = index.remove(DocId(2)).unwrap();
        assert_eq!(next, Some(DocId(3)));
        assert_eq!(index.remove(DocId(4)).map(|(_, n)| n), Some(None));
        assert_eq!(index.remove(DocId(4)), None);
        assert_eq!(ids(&index), vec![1, 3]);
        assert_eq!(index.prev_id(DocId(3)), Some(DocId(1)));

        // freed slots are reused without disturbing order
        index.insert(DocId(9), "new", Some(DocId(3)));
        assert_eq!(ids(&index), vec![1, 9, 3]);
    }

    #[test]
    fn test_reinsert_same_id_keeps_unique() {
        let mut index = RowIndex::new();
        index.insert(DocId(1), "a", None);
        index.insert(DocId(2), "b", None);
        index.insert(DocId(1), "a2", None);
        assert_eq!(ids(&index), vec![2, 1]);
        assert_eq!(index.get(DocId(1)), Some(&"a2"));
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_iter_from_both_directions() {
        let mut index = RowIndex::new();
        for id in 1..=4 {
            index.insert(DocId(id), "row", None);
        }
        let forward: Vec<u32> = index.iter_from(Some(DocId(2)), false).map(|(id, _)| id.0).collect();
        let backward: Vec<u32> = index.iter_from(Some(DocId(3)), true).map(|(id, _)| id.0).collect();
        let from_end: Vec<u32> = index.iter_from(None, true).map(|(id, _)| id.0).collect();
        assert_eq!(forward, vec![3, 4]);
        assert_eq!(backward, vec![2, 1]);
        assert_eq!(from_end, vec![4, 3, 2, 1]);
    }
}
