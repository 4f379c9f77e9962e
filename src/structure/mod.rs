//! 基础数据结构
//!
//! 以下标/句柄代替侵入式指针：对象池、双向链表和可按句柄删除的最小堆。
//! 队列与 job 调度器都建立在这些结构之上。

mod arena;
mod heap;
mod linked_list;

pub use arena::{Arena, ArenaKey};
pub use heap::{Heap, HeapHandle};
pub use linked_list::{LinkedList, ListHandle, LiveIter};
