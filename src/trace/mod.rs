//! 调度轨迹记录（用于离线回放与比对）
//!
//! 记录队列把哪个流的包交给了输出、何时完成、何时被撤销。
//! 结构化 JSON，而不是解析文本日志。

mod types;

pub use types::{TraceEvent, TraceEventKind, TraceFlowInfo, TraceLogger};
