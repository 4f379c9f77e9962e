//! 场景：用 JSON 描述一组流和一个队列，然后驱动它们跑起来
//!
//! 用于观察调度行为，也是命令行工具 `queue_sim` 的全部后端。

mod runner;
mod spec;

pub use runner::{FlowSummary, RunSummary, run_scenario};
pub use spec::{FlowSpec, QueueSpec, SCHEMA_VERSION, Scenario};

use crate::error::FlowError;

#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("failed to read scenario: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse scenario: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("unsupported schema_version {0}")]
    UnsupportedSchema(u32),
    #[error("mtu must be positive")]
    ZeroMtu,
    #[error("scenario has no flows")]
    NoFlows,
    #[error("duplicate flow name {0:?}")]
    DuplicateFlow(String),
    #[error("flow {name:?}: packet of {bytes} bytes exceeds mtu {mtu}")]
    PacketTooLarge { name: String, bytes: usize, mtu: usize },
    #[error("flow {0:?}: release_at_round requires use_cancel")]
    ReleaseWithoutCancel(String),
    #[error(transparent)]
    Flow(#[from] FlowError),
}
