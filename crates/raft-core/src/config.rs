//! # config
//!
//! why: timing knobs for elections, heartbeats and rpc budgets
//! relations: held by node.rs, read by the raft-node timer and replicator loops
//! what: RaftConfig with defaults, json loading and validation

use std::ops::RangeInclusive;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::RaftError;

/// Timing configuration, all values in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaftConfig {
    /// lower bound of the randomized election timeout
    pub election_timeout_min: u64,
    /// upper bound of the randomized election timeout
    pub election_timeout_max: u64,
    /// leader heartbeat period
    pub heartbeat_interval: u64,
    /// budget for a single outbound rpc before it counts as lost
    pub rpc_timeout: u64,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            election_timeout_min: 150,
            election_timeout_max: 300,
            heartbeat_interval: 50,
            rpc_timeout: 100,
        }
    }
}

impl RaftConfig {
    /// parse a json document; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, RaftError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| RaftError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// check the timing relationships elections depend on
    pub fn validate(&self) -> Result<(), RaftError> {
        if self.election_timeout_min == 0 || self.election_timeout_min >= self.election_timeout_max {
            return Err(RaftError::InvalidConfig(format!(
                "election timeout window [{}, {}] is empty",
                self.election_timeout_min, self.election_timeout_max
            )));
        }
        if self.heartbeat_interval == 0 || self.heartbeat_interval.saturating_mul(3) > self.election_timeout_min {
            return Err(RaftError::InvalidConfig(format!(
                "heartbeat interval {} must be at most a third of the minimum election timeout {}",
                self.heartbeat_interval, self.election_timeout_min
            )));
        }
        if self.rpc_timeout == 0 || self.rpc_timeout >= self.election_timeout_min {
            return Err(RaftError::InvalidConfig(format!(
                "rpc timeout {} must be below the minimum election timeout {}",
                self.rpc_timeout, self.election_timeout_min
            )));
        }
        Ok(())
    }

    /// window the election timeout is drawn from
    pub fn election_timeout_range(&self) -> RangeInclusive<u64> {
        self.election_timeout_min..=self.election_timeout_max
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval)
    }

    pub fn rpc_budget(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout)
    }
}
