//! 下标链接的双向链表
//!
//! 节点存放在 [`Arena`] 中，O(1) 的头/尾插入与按句柄删除。
//! 支持"活"迭代器：迭代器即将访问的节点被删除时，迭代器自动跳到它的后继。

use super::arena::{Arena, ArenaKey};

/// 链表节点句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListHandle(ArenaKey);

/// 活迭代器；用完须交还给 [`LinkedList::iter_end`]
#[derive(Debug)]
pub struct LiveIter(ArenaKey);

#[derive(Debug)]
struct Node<T> {
    value: T,
    prev: Option<ArenaKey>,
    next: Option<ArenaKey>,
}

#[derive(Debug)]
pub struct LinkedList<T> {
    nodes: Arena<Node<T>>,
    head: Option<ArenaKey>,
    tail: Option<ArenaKey>,
    // 每个活迭代器下一次要返回的节点
    iterators: Arena<Option<ArenaKey>>,
}

impl<T> Default for LinkedList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LinkedList<T> {
    pub fn new() -> Self {
        Self {
            nodes: Arena::new(),
            head: None,
            tail: None,
            iterators: Arena::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// 插入到表头
    pub fn push_front(&mut self, value: T) -> ListHandle {
        let key = self.nodes.insert(Node {
            value,
            prev: None,
            next: self.head,
        });
        match self.head {
            Some(old) => self.node_mut(old).prev = Some(key),
            None => self.tail = Some(key),
        }
        self.head = Some(key);
        ListHandle(key)
    }

    /// 插入到表尾
    pub fn push_back(&mut self, value: T) -> ListHandle {
        let key = self.nodes.insert(Node {
            value,
            prev: self.tail,
            next: None,
        });
        match self.tail {
            Some(old) => self.node_mut(old).next = Some(key),
            None => self.head = Some(key),
        }
        self.tail = Some(key);
        ListHandle(key)
    }

    /// 删除节点；句柄已失效时返回 None
    pub fn remove(&mut self, handle: ListHandle) -> Option<T> {
        let node = self.nodes.remove(handle.0)?;

        match node.prev {
            Some(prev) => self.node_mut(prev).next = node.next,
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => self.node_mut(next).prev = node.prev,
            None => self.tail = node.prev,
        }

        // 指向被删节点的活迭代器前移到后继
        for (_, pos) in self.iterators.iter_mut() {
            if *pos == Some(handle.0) {
                *pos = node.next;
            }
        }

        Some(node.value)
    }

    pub fn front(&self) -> Option<(ListHandle, &T)> {
        let key = self.head?;
        Some((ListHandle(key), &self.node(key).value))
    }

    pub fn pop_front(&mut self) -> Option<T> {
        let key = self.head?;
        self.remove(ListHandle(key))
    }

    pub fn get(&self, handle: ListHandle) -> Option<&T> {
        self.nodes.get(handle.0).map(|n| &n.value)
    }

    pub fn get_mut(&mut self, handle: ListHandle) -> Option<&mut T> {
        self.nodes.get_mut(handle.0).map(|n| &mut n.value)
    }

    /// 后继节点
    pub fn next(&self, handle: ListHandle) -> Option<ListHandle> {
        self.nodes.get(handle.0)?.next.map(ListHandle)
    }

    /// 从头到尾的借用迭代（遍历期间不可修改链表）
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            list: self,
            cur: self.head,
        }
    }

    /// 创建一个从表头开始的活迭代器
    pub fn iter_begin(&mut self) -> LiveIter {
        LiveIter(self.iterators.insert(self.head))
    }

    /// 返回活迭代器的当前节点并前移
    pub fn iter_next(&mut self, it: &LiveIter) -> Option<ListHandle> {
        let cur = (*self.iterators.get(it.0).expect("stale list iterator"))?;
        let next = self.node(cur).next;
        *self.iterators.get_mut(it.0).expect("stale list iterator") = next;
        Some(ListHandle(cur))
    }

    pub fn iter_end(&mut self, it: LiveIter) {
        self.iterators.remove(it.0);
    }

    fn node(&self, key: ArenaKey) -> &Node<T> {
        self.nodes.get(key).expect("list link points to a live node")
    }

    fn node_mut(&mut self, key: ArenaKey) -> &mut Node<T> {
        self.nodes.get_mut(key).expect("list link points to a live node")
    }
}

pub struct Iter<'a, T> {
    list: &'a LinkedList<T>,
    cur: Option<ArenaKey>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (ListHandle, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let key = self.cur?;
        let node = self.list.node(key);
        self.cur = node.next;
        Some((ListHandle(key), &node.value))
    }
}
