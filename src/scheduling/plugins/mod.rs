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

//! Filter and score plugins of the scheduling pipeline.
//!
//! Every score plugin maps a (node, pod) pair to an integer in `[0, 100]`; the pipeline
//! multiplies by the configured weight and sums across plugins. Plugins that know how to
//! pick a concrete GPU for a share pod also expose that routine; the registry resolves
//! which one the reserver uses (`gpuSelMethod`).
//!
//! The registry is an explicit object built from the scheduler profile and injected where
//! needed. There is deliberately no process-wide registration map.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scheduling::fragmentation::BellmanParams;
use crate::scheduling::resources::{
    EnergyConfig, NodeResource, NodeSignature, PodResource, ResourceError,
};
use crate::scheduling::workload::TargetPodList;
use crate::simulator::config::{ConfigError, SchedulerProfile};

mod best_fit;
mod dot_product;
mod fgd;
mod gpu_clustering;
mod gpu_packing;
mod open_gpu_share;
mod pwr;
mod random;

pub use best_fit::BestFitScorePlugin;
pub use dot_product::DotProductScorePlugin;
pub use fgd::FgdScorePlugin;
pub use gpu_clustering::GpuClusteringScorePlugin;
pub use gpu_packing::GpuPackingScorePlugin;
pub use open_gpu_share::OpenGpuShareFilter;
pub use pwr::PwrScorePlugin;
pub use random::RandomScorePlugin;

pub const MAX_NODE_SCORE: i64 = 100;
pub const MIN_NODE_SCORE: i64 = 0;

pub const PWR_SCORE_PLUGIN: &str = "PWRScore";
pub const FGD_SCORE_PLUGIN: &str = "GpuFragScore";
pub const GPU_PACKING_SCORE_PLUGIN: &str = "GpuPackingScore";
pub const GPU_CLUSTERING_SCORE_PLUGIN: &str = "GpuClusteringScore";
pub const BEST_FIT_SCORE_PLUGIN: &str = "BestFitScore";
pub const DOT_PRODUCT_SCORE_PLUGIN: &str = "DotProductScore";
pub const RANDOM_SCORE_PLUGIN: &str = "RandomScore";
pub const OPEN_GPU_SHARE_FILTER_PLUGIN: &str = "Open-Gpu-Share";

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("node {0} is not accessible to the pod")]
    NodeNotAccessible(String),
    #[error("node {node} cannot take the pod: {source}")]
    Infeasible {
        node: String,
        #[source]
        source: ResourceError,
    },
}

/// How the GPU dimension of a multi-GPU request enters vector-based scoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DimExtMethod {
    /// Use the per-GPU share as-is.
    #[default]
    Share,
    /// Merge all requested GPUs into one demand figure.
    Merge,
}

/// How vectors are normalized before comparison.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormMethod {
    /// Divide each dimension by the node's capacity in that dimension.
    #[default]
    Max,
    /// Divide the vector by its own L1 norm.
    Sum,
}

/// Per-plugin options, keyed by plugin name in the scheduler profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PluginConfig {
    pub dim_ext_method: DimExtMethod,
    pub norm_method: NormMethod,
    /// Name of the score plugin whose GPU-choice routine the reserver uses.
    pub gpu_sel_method: Option<String>,
    /// Energy-model override for the PWR plugin.
    pub energy: Option<EnergyConfig>,
    /// Discount override for the FGD Bellman recursion.
    pub bellman_gamma: Option<f64>,
}

/// Everything a score plugin may look at for one (node, pod) evaluation.
///
/// The node is a read snapshot; plugins never mutate cluster state. The Bellman memo is
/// shared across all scorers of one scheduling cycle.
pub struct ScoreContext<'a> {
    pub node: &'a NodeResource,
    pub pod_uid: &'a str,
    pub pod_res: &'a PodResource,
    pub typical_pods: &'a TargetPodList,
    pub bellman_memo: &'a DashMap<NodeSignature, f64>,
}

pub trait ScorePlugin: Send + Sync {
    fn name(&self) -> &'static str;

    /// Score the node for the pod, in `[MIN_NODE_SCORE, MAX_NODE_SCORE]`.
    fn score(&self, ctx: &ScoreContext<'_>) -> Result<i64, PluginError>;

    /// Pick the concrete GPU index for a GPU-share pod, or None when the plugin has no
    /// routine for it or no GPU fits.
    fn select_gpu(
        &self,
        node: &NodeResource,
        pod: &PodResource,
        typical_pods: &TargetPodList,
    ) -> Option<usize> {
        let _ = (node, pod, typical_pods);
        None
    }
}

pub trait FilterPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    /// Ok when the node is feasible for the pod; the error carries the blocking reason.
    fn filter(&self, node: &NodeResource, pod: &PodResource) -> Result<(), ResourceError>;
}

// --------------------
// Registry
// --------------------

/// The plugin set of one scheduler profile: filters, weighted scorers, and the resolved
/// GPU-selection method. Built once at startup and shared read-only afterwards.
pub struct PluginRegistry {
    filter_plugins: Vec<Box<dyn FilterPlugin>>,
    score_plugins: Vec<(Box<dyn ScorePlugin>, i64)>,
    gpu_sel_method: String,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("filter_plugins", &self.filter_plugins.iter().map(|p| p.name()).collect::<Vec<_>>())
            .field("score_plugins", &self.score_plugins.iter().map(|(p, w)| (p.name(), *w)).collect::<Vec<_>>())
            .field("gpu_sel_method", &self.gpu_sel_method)
            .finish()
    }
}

impl PluginRegistry {
    /// Instantiate every plugin the profile names.
    ///
    /// # Errors
    /// `ConfigError` for unknown plugin names, non-positive weights, an empty score set,
    /// or a `gpuSelMethod` that does not name an enabled score plugin.
    pub fn from_profile(profile: &SchedulerProfile) -> Result<Self, ConfigError> {
        let cfg_for = |name: &str| {
            profile
                .plugin_config
                .get(name)
                .cloned()
                .unwrap_or_default()
        };

        let mut score_plugins: Vec<(Box<dyn ScorePlugin>, i64)> = Vec::new();
        for entry in &profile.scores {
            if entry.weight <= 0 {
                return Err(ConfigError::BadWeight {
                    name: entry.name.clone(),
                    weight: entry.weight,
                });
            }
            let plugin: Box<dyn ScorePlugin> = match entry.name.as_str() {
                PWR_SCORE_PLUGIN => Box::new(PwrScorePlugin::new(
                    cfg_for(PWR_SCORE_PLUGIN).energy.unwrap_or_default(),
                )),
                FGD_SCORE_PLUGIN => {
                    let mut params = BellmanParams::default();
                    if let Some(gamma) = cfg_for(FGD_SCORE_PLUGIN).bellman_gamma {
                        params.gamma = gamma;
                    }
                    Box::new(FgdScorePlugin::new(params))
                }
                GPU_PACKING_SCORE_PLUGIN => Box::new(GpuPackingScorePlugin),
                GPU_CLUSTERING_SCORE_PLUGIN => Box::new(GpuClusteringScorePlugin),
                BEST_FIT_SCORE_PLUGIN => Box::new(BestFitScorePlugin),
                DOT_PRODUCT_SCORE_PLUGIN => {
                    let cfg = cfg_for(DOT_PRODUCT_SCORE_PLUGIN);
                    Box::new(DotProductScorePlugin::new(cfg.dim_ext_method, cfg.norm_method))
                }
                RANDOM_SCORE_PLUGIN => Box::new(RandomScorePlugin),
                other => return Err(ConfigError::UnknownScorePlugin(other.to_string())),
            };
            score_plugins.push((plugin, entry.weight));
        }
        if score_plugins.is_empty() {
            return Err(ConfigError::NoScorePlugins);
        }

        let filter_names: Vec<String> = if profile.filters.is_empty() {
            vec![OPEN_GPU_SHARE_FILTER_PLUGIN.to_string()]
        } else {
            profile.filters.clone()
        };
        let mut filter_plugins: Vec<Box<dyn FilterPlugin>> = Vec::new();
        for name in &filter_names {
            match name.as_str() {
                OPEN_GPU_SHARE_FILTER_PLUGIN => filter_plugins.push(Box::new(OpenGpuShareFilter)),
                other => return Err(ConfigError::UnknownFilterPlugin(other.to_string())),
            }
        }

        let gpu_sel_method = match cfg_for(OPEN_GPU_SHARE_FILTER_PLUGIN).gpu_sel_method {
            Some(method) => {
                if !score_plugins.iter().any(|(p, _)| p.name() == method) {
                    return Err(ConfigError::UnknownGpuSelMethod(method));
                }
                method
            }
            None => {
                if score_plugins.iter().any(|(p, _)| p.name() == FGD_SCORE_PLUGIN) {
                    FGD_SCORE_PLUGIN.to_string()
                } else {
                    score_plugins[0].0.name().to_string()
                }
            }
        };

        Ok(Self {
            filter_plugins,
            score_plugins,
            gpu_sel_method,
        })
    }

    pub fn filter_plugins(&self) -> impl Iterator<Item = &dyn FilterPlugin> {
        self.filter_plugins.iter().map(|p| p.as_ref())
    }

    pub fn score_plugins(&self) -> impl Iterator<Item = (&dyn ScorePlugin, i64)> {
        self.score_plugins.iter().map(|(p, w)| (p.as_ref(), *w))
    }

    pub fn gpu_sel_method(&self) -> &str {
        &self.gpu_sel_method
    }

    /// The score plugin whose GPU-choice routine the reserver delegates to.
    pub fn gpu_selector(&self) -> &dyn ScorePlugin {
        self.score_plugins
            .iter()
            .find(|(p, _)| p.name() == self.gpu_sel_method)
            .map(|(p, _)| p.as_ref())
            .expect("gpu_sel_method validated at construction")
    }
}
