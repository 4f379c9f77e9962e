//! 多路复用队列
//!
//! 把多个 PacketPass 生产者复用到一个共享的 PacketPass 输出上。
//! 两种策略：按虚拟时间的公平队列，以及按静态优先级的优先级队列。

mod fair;
mod priority;

pub use fair::{FAIR_QUEUE_MAX_TIME, FairQueueConfig, PacketPassFairQueue, PacketPassFairQueueFlow};
pub use priority::{PacketPassPriorityQueue, PacketPassPriorityQueueFlow};
