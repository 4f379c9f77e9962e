//! 协作式 job 调度
//!
//! 单线程、运行到完成（run-to-completion）：一个 job 的处理函数执行完毕后
//! 才会执行下一个。所有 flow 接口都靠它把 Send 与回调解耦。

mod group;
mod job;

pub use group::PendingGroup;
pub use job::Job;
