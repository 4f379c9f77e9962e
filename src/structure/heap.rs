//! 可按句柄删除的二叉最小堆
//!
//! 比较顺序为 `(key, seq)`：key 相同时按插入顺序出堆。
//! 每个元素有稳定的 [`HeapHandle`]，可在任意位置 O(log n) 删除。

use std::cmp::Ordering;

use super::arena::{Arena, ArenaKey};

/// 堆元素句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapHandle(ArenaKey);

#[derive(Debug)]
struct Entry<K, V> {
    key: K,
    seq: u64,
    value: V,
    handle: ArenaKey,
}

impl<K: Ord, V> Entry<K, V> {
    fn order(&self, other: &Self) -> Ordering {
        match self.key.cmp(&other.key) {
            Ordering::Equal => self.seq.cmp(&other.seq),
            ord => ord,
        }
    }
}

#[derive(Debug)]
pub struct Heap<K, V> {
    entries: Vec<Entry<K, V>>,
    // handle -> entries 中的下标
    positions: Arena<usize>,
    next_seq: u64,
}

impl<K: Ord, V> Default for Heap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord, V> Heap<K, V> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            positions: Arena::new(),
            next_seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&mut self, key: K, value: V) -> HeapHandle {
        let pos = self.entries.len();
        let handle = self.positions.insert(pos);
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.entries.push(Entry {
            key,
            seq,
            value,
            handle,
        });
        self.sift_up(pos);
        HeapHandle(handle)
    }

    /// 堆顶（最小）元素
    pub fn first(&self) -> Option<(HeapHandle, &K, &V)> {
        self.entries
            .first()
            .map(|e| (HeapHandle(e.handle), &e.key, &e.value))
    }

    pub fn pop_first(&mut self) -> Option<(K, V)> {
        let handle = self.entries.first()?.handle;
        self.remove(HeapHandle(handle))
    }

    pub fn key(&self, handle: HeapHandle) -> Option<&K> {
        let pos = *self.positions.get(handle.0)?;
        Some(&self.entries[pos].key)
    }

    /// 删除任意元素；句柄已失效时返回 None
    pub fn remove(&mut self, handle: HeapHandle) -> Option<(K, V)> {
        let pos = self.positions.remove(handle.0)?;
        let last = self.entries.len() - 1;
        self.entries.swap(pos, last);
        let removed = self.entries.pop().expect("heap has the removed entry");

        if pos < self.entries.len() {
            *self
                .positions
                .get_mut(self.entries[pos].handle)
                .expect("moved entry has a position") = pos;
            // 被换上来的元素可能需要上浮或下沉
            if pos > 0 && self.entries[pos].order(&self.entries[(pos - 1) / 2]).is_lt() {
                self.sift_up(pos);
            } else {
                self.sift_down(pos);
            }
        }

        Some((removed.key, removed.value))
    }

    /// 批量改写所有 key。
    ///
    /// 调用方应保证改写不改变元素间的相对顺序；即便如此，这里仍会重建堆。
    pub fn map_keys(&mut self, mut f: impl FnMut(&mut K, &V)) {
        for e in &mut self.entries {
            f(&mut e.key, &e.value);
        }
        for pos in (0..self.entries.len() / 2).rev() {
            self.sift_down(pos);
        }
    }

    /// 无序遍历
    pub fn iter(&self) -> impl Iterator<Item = (HeapHandle, &K, &V)> {
        self.entries
            .iter()
            .map(|e| (HeapHandle(e.handle), &e.key, &e.value))
    }

    fn sift_up(&mut self, mut pos: usize) {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if !self.entries[pos].order(&self.entries[parent]).is_lt() {
                break;
            }
            self.swap(pos, parent);
            pos = parent;
        }
    }

    fn sift_down(&mut self, mut pos: usize) {
        let len = self.entries.len();
        loop {
            let left = 2 * pos + 1;
            let right = left + 1;
            let mut smallest = pos;
            if left < len && self.entries[left].order(&self.entries[smallest]).is_lt() {
                smallest = left;
            }
            if right < len && self.entries[right].order(&self.entries[smallest]).is_lt() {
                smallest = right;
            }
            if smallest == pos {
                break;
            }
            self.swap(pos, smallest);
            pos = smallest;
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.entries.swap(a, b);
        for pos in [a, b] {
            *self
                .positions
                .get_mut(self.entries[pos].handle)
                .expect("entry has a position") = pos;
        }
    }
}
