// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration surface of the simulator.
//!
//! These structures are plain serde targets; parsing the YAML/JSON documents they come
//! from is the embedding tool's job. Everything here is validated at startup; per-pod
//! problems never enter through this door.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use crate::scheduling::plugins::PluginConfig;
pub use crate::scheduling::workload::TypicalPodsConfig;

use crate::simulator::cluster::{ClusterNode, ClusterPod, DaemonSetSpec};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown score plugin {0:?}")]
    UnknownScorePlugin(String),
    #[error("unknown filter plugin {0:?}")]
    UnknownFilterPlugin(String),
    #[error("bad weight {weight} for plugin {name:?}")]
    BadWeight { name: String, weight: i64 },
    #[error("scheduler profile enables no score plugin")]
    NoScorePlugins,
    #[error("gpu selection method {0:?} does not name an enabled score plugin")]
    UnknownGpuSelMethod(String),
    #[error("unknown deschedule policy {0:?}")]
    UnknownDeschedulePolicy(String),
    #[error("exactly one of kubeConfig and customCluster must be set")]
    ClusterSourceConflict,
}

// --------------------
// Scheduler profile
// --------------------

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScorePluginEntry {
    pub name: String,
    pub weight: i64,
}

/// Which plugins run, with what weights, and their per-plugin options.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SchedulerProfile {
    pub filters: Vec<String>,
    pub scores: Vec<ScorePluginEntry>,
    pub plugin_config: BTreeMap<String, PluginConfig>,
}

// --------------------
// Cluster and apps
// --------------------

/// Inline description of a simulated cluster.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClusterSpec {
    pub nodes: Vec<ClusterNode>,
    pub pods: Vec<ClusterPod>,
    pub daemon_sets: Vec<DaemonSetSpec>,
}

/// Where the cluster comes from: a client config path or an inline definition.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClusterConfig {
    pub kube_config: Option<String>,
    pub custom_cluster: Option<ClusterSpec>,
}

impl ClusterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match (&self.kube_config, &self.custom_cluster) {
            (Some(_), None) | (None, Some(_)) => Ok(()),
            _ => Err(ConfigError::ClusterSourceConflict),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppInfo {
    pub name: String,
    pub path: String,
    pub is_chart: bool,
}

// --------------------
// Custom config
// --------------------

/// Workload tuning: scale aggregate requests to `ratio` of the cluster's total capacity.
/// A non-positive ratio disables tuning.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkloadTuningConfig {
    pub ratio: f64,
    pub seed: i64,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkloadInflationConfig {
    pub ratio: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeschedulePolicy {
    /// Evict the single worst fragment-contributing pod from the most fragmented node.
    #[serde(rename = "fragOnePod")]
    FragOnePod,
    /// Evict every GPU-share pod from the most fragmented node.
    #[serde(rename = "fragMultiPod")]
    FragMultiPod,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DescheduleConfig {
    /// Policy name; empty disables descheduling.
    pub policy: String,
}

impl DescheduleConfig {
    pub fn parse_policy(&self) -> Result<Option<DeschedulePolicy>, ConfigError> {
        match self.policy.as_str() {
            "" => Ok(None),
            "fragOnePod" => Ok(Some(DeschedulePolicy::FragOnePod)),
            "fragMultiPod" => Ok(Some(DeschedulePolicy::FragMultiPod)),
            other => Err(ConfigError::UnknownDeschedulePolicy(other.to_string())),
        }
    }
}

/// File prefixes for snapshot export. Rendering the snapshots is the embedding tool's
/// job; the simulator only carries the intent through.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExportConfig {
    pub pod_snapshot_yaml_file_prefix: String,
    pub node_snapshot_csv_file_prefix: String,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CustomConfig {
    pub workload_tuning_config: WorkloadTuningConfig,
    pub workload_inflation_config: WorkloadInflationConfig,
    pub new_workload_config: Option<String>,
    pub deschedule_config: DescheduleConfig,
    pub export_config: ExportConfig,
    pub typical_pods_config: TypicalPodsConfig,
    /// Sort pending pods by dominant share (greed); otherwise by toleration priority.
    #[serde(default = "default_true")]
    pub use_greed: bool,
}

impl Default for CustomConfig {
    fn default() -> Self {
        Self {
            workload_tuning_config: WorkloadTuningConfig::default(),
            workload_inflation_config: WorkloadInflationConfig::default(),
            new_workload_config: None,
            deschedule_config: DescheduleConfig::default(),
            export_config: ExportConfig::default(),
            typical_pods_config: TypicalPodsConfig::default(),
            use_greed: true,
        }
    }
}

/// The whole simulation document.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SimulationConfig {
    pub cluster: ClusterConfig,
    pub app_list: Vec<AppInfo>,
    pub custom_config: CustomConfig,
}
