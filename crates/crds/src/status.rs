//! NodeConfig status and conditions

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::inventory::NodeInventory;

/// Primary condition written by the node daemon
pub const CONFIGURED_CONDITION: &str = "Configured";

/// Condition written by the cluster matcher when it cannot update a node's spec
pub const CONFIGURATION_PROPAGATION_CONDITION: &str = "ConfigurationPropagation";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionReason {
    NotRequested,
    InProgress,
    Succeeded,
    Failed,
}

impl ConditionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ConditionReason::NotRequested => "NotRequested",
            ConditionReason::InProgress => "InProgress",
            ConditionReason::Succeeded => "Succeeded",
            ConditionReason::Failed => "Failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,

    pub status: ConditionStatus,

    #[serde(default)]
    pub reason: String,

    #[serde(default)]
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    pub fn new(
        type_: &str,
        status: ConditionStatus,
        reason: ConditionReason,
        message: impl Into<String>,
        observed_generation: Option<i64>,
    ) -> Self {
        Self {
            type_: type_.to_string(),
            status,
            reason: reason.as_str().to_string(),
            message: message.into(),
            observed_generation,
            last_transition_time: Some(Utc::now()),
        }
    }
}

/// Status shared by SriovFecNodeConfig and SriovVrbNodeConfig
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfigStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(default)]
    pub inventory: NodeInventory,

    /// Output of `pf_bb_config --version`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pf_bb_conf_version: String,
}

impl NodeConfigStatus {
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Insert or replace the condition of the same type
    ///
    /// The transition time is carried over when the status did not change.
    pub fn set_condition(&mut self, mut condition: Condition) {
        match self.conditions.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(existing) => {
                if existing.status == condition.status {
                    condition.last_transition_time = existing.last_transition_time;
                }
                *existing = condition;
            }
            None => self.conditions.push(condition),
        }
    }

    /// Generation recorded by the last `Configured` condition
    pub fn observed_generation(&self) -> Option<i64> {
        self.condition(CONFIGURED_CONDITION)
            .and_then(|c| c.observed_generation)
    }
}
