use serde::{Deserialize, Serialize};

/// 轨迹事件类型
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceEventKind {
    /// 场景元信息（总是第一条）
    Meta {
        queue: String,
        mtu: usize,
        flows: Vec<TraceFlowInfo>,
    },
    /// 输出开始处理某个流的包
    Dispatch,
    /// 某个流的包已经完成，生产者收到了 done
    Complete,
    /// 某个流正在发送的包被撤销，随后流被释放
    Release,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraceFlowInfo {
    pub name: String,
    pub priority: i32,
    pub packets: u64,
    pub packet_bytes: usize,
}

/// 一个可回放的事件（JSON）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraceEvent {
    /// 发生在第几轮（输出每完成一个包算一轮）
    pub round: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<usize>,
    #[serde(flatten)]
    pub kind: TraceEventKind,
}

/// 事件收集器（存内存，运行结束写 JSON 文件）
#[derive(Debug, Default)]
pub struct TraceLogger {
    pub events: Vec<TraceEvent>,
}

impl TraceLogger {
    pub fn push(&mut self, ev: TraceEvent) {
        self.events.push(ev);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.events)
    }
}
