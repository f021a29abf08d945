use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One backend instance behind an upstream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Target {
    pub host: String,
    pub port: u16,

    /// Relative weight used by weighted algorithms. Ignored by round_robin
    /// and ip_hash.
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Current health, as tracked by the passive health tracker. Defaults to
    /// healthy so a freshly-added target is immediately eligible.
    #[serde(default = "default_true")]
    pub healthy: bool,
}

impl Target {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    RoundRobin,
    WeightedRoundRobin,
    IpHash,
    Canary,
}

impl Default for Algorithm {
    fn default() -> Self {
        Algorithm::RoundRobin
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Upstream {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    pub targets: Vec<Target>,

    #[serde(default)]
    pub algorithm: Algorithm,

    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Upstream {
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn healthy_targets(&self) -> Vec<&Target> {
        self.targets.iter().filter(|t| t.healthy).collect()
    }
}

/// One version within a canary rollout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanaryVersion {
    pub version: String,
    pub upstream_id: String,
    /// Relative weight, used when the group's strategy is `weighted`.
    #[serde(default)]
    pub weight: u32,
    /// Absolute percentage (0-100), used when the group's strategy is
    /// `percentage`.
    #[serde(default)]
    pub percentage: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanaryStrategy {
    Weighted,
    Percentage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanaryGroup {
    pub id: String,
    pub strategy: CanaryStrategy,
    pub versions: Vec<CanaryVersion>,
}

fn default_weight() -> u32 {
    1
}

fn default_true() -> bool {
    true
}
