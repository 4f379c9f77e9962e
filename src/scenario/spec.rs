use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::ScenarioError;

pub const SCHEMA_VERSION: u32 = 1;

fn default_max_rounds() -> u64 {
    10_000
}

fn default_packet_weight() -> u64 {
    1
}

/// 一次队列运行的描述
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub schema_version: u32,
    pub mtu: usize,
    pub queue: QueueSpec,
    #[serde(default)]
    pub use_cancel: bool,
    pub flows: Vec<FlowSpec>,
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueueSpec {
    Fair {
        #[serde(default = "default_packet_weight")]
        packet_weight: u64,
    },
    Priority,
}

impl QueueSpec {
    pub fn name(&self) -> &'static str {
        match self {
            QueueSpec::Fair { .. } => "fair",
            QueueSpec::Priority => "priority",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowSpec {
    pub name: String,
    /// 只对优先级队列有意义，越小越优先
    #[serde(default)]
    pub priority: i32,
    pub packets: u64,
    pub packet_bytes: usize,
    #[serde(default)]
    pub start_round: u64,
    /// 在该轮撤销并释放此流
    #[serde(default)]
    pub release_at_round: Option<u64>,
}

impl Scenario {
    pub fn from_json_str(raw: &str) -> Result<Self, ScenarioError> {
        let scenario: Scenario = serde_json::from_str(raw)?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ScenarioError> {
        let raw = fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ScenarioError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(ScenarioError::UnsupportedSchema(self.schema_version));
        }
        if self.mtu == 0 {
            return Err(ScenarioError::ZeroMtu);
        }
        if self.flows.is_empty() {
            return Err(ScenarioError::NoFlows);
        }
        for (i, flow) in self.flows.iter().enumerate() {
            if self.flows[..i].iter().any(|f| f.name == flow.name) {
                return Err(ScenarioError::DuplicateFlow(flow.name.clone()));
            }
            if flow.packet_bytes > self.mtu {
                return Err(ScenarioError::PacketTooLarge {
                    name: flow.name.clone(),
                    bytes: flow.packet_bytes,
                    mtu: self.mtu,
                });
            }
            if flow.release_at_round.is_some() && !self.use_cancel {
                return Err(ScenarioError::ReleaseWithoutCancel(flow.name.clone()));
            }
        }
        Ok(())
    }
}
