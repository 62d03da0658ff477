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

//! Energy-aware scoring (PWR).
//!
//! A node is scored by how little its estimated power draw would grow if the pod landed
//! there. Under the piecewise-linear model, placing a share pod on a GPU that is already
//! powered on is much cheaper than waking an idle one, so PWR naturally packs share pods.

use super::{sigmoid, PluginError, ScoreContext, ScorePlugin, MAX_NODE_SCORE, PWR_SCORE_PLUGIN};
use crate::scheduling::resources::{EnergyConfig, NodeResource, PodResource};
use crate::scheduling::workload::TargetPodList;

pub struct PwrScorePlugin {
    energy: EnergyConfig,
}

impl PwrScorePlugin {
    pub fn new(energy: EnergyConfig) -> Self {
        Self { energy }
    }

    fn node_energy(&self, node: &NodeResource) -> f64 {
        let (cpu, gpu) = node.energy_consumption(&self.energy);
        cpu + gpu
    }

    /// Score a share pod against every candidate GPU of the node.
    ///
    /// Returns the best score and the GPU index that earns it; ties keep the lowest
    /// index. None when no GPU retains enough millis.
    fn share_extend_score(&self, node: &NodeResource, pod: &PodResource) -> Option<(i64, usize)> {
        let old_energy = self.node_energy(node);
        let mut best: Option<(i64, usize)> = None;
        for (i, &left) in node.milli_gpu_left_list.iter().enumerate() {
            if left < pod.milli_gpu {
                continue;
            }
            // Hypothetically land the pod on GPU i.
            let mut next = node.clone();
            next.milli_cpu_left -= pod.milli_cpu;
            next.milli_gpu_left_list[i] -= pod.milli_gpu;
            let new_energy = self.node_energy(&next);
            let score =
                (sigmoid((old_energy - new_energy) / 1000.0) * MAX_NODE_SCORE as f64) as i64;
            match best {
                None => best = Some((score, i)),
                Some((best_score, _)) if score > best_score => best = Some((score, i)),
                _ => {}
            }
        }
        best
    }
}

impl ScorePlugin for PwrScorePlugin {
    fn name(&self) -> &'static str {
        PWR_SCORE_PLUGIN
    }

    fn score(&self, ctx: &ScoreContext<'_>) -> Result<i64, PluginError> {
        if ctx.pod_res.requests_nothing() {
            return Ok(MAX_NODE_SCORE);
        }
        if !ctx.node.is_accessible_to(ctx.pod_res) {
            return Err(PluginError::NodeNotAccessible(ctx.node.node_name.clone()));
        }

        if ctx.pod_res.is_gpu_share() {
            return Ok(self
                .share_extend_score(ctx.node, ctx.pod_res)
                .map(|(score, _)| score)
                .unwrap_or(0));
        }

        let next = ctx
            .node
            .sub(ctx.pod_res)
            .map_err(|source| PluginError::Infeasible {
                node: ctx.node.node_name.clone(),
                source,
            })?;
        let delta = self.node_energy(ctx.node) - self.node_energy(&next);
        Ok((sigmoid(delta / 1000.0) * MAX_NODE_SCORE as f64) as i64)
    }

    fn select_gpu(
        &self,
        node: &NodeResource,
        pod: &PodResource,
        _typical_pods: &TargetPodList,
    ) -> Option<usize> {
        if !pod.is_gpu_share() {
            return None;
        }
        self.share_extend_score(node, pod).map(|(_, i)| i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduling::resources::MILLI;
    use dashmap::DashMap;

    fn node(gpu_left: Vec<i64>) -> NodeResource {
        NodeResource {
            node_name: "node1".to_string(),
            milli_cpu: 4000,
            milli_cpu_left: 4000,
            memory: 8 << 30,
            memory_left: 8 << 30,
            milli_gpu_left_list: gpu_left,
            gpu_type: "V100".to_string(),
        }
    }

    fn share_pod(milli_gpu: i64) -> PodResource {
        PodResource {
            milli_cpu: 500,
            memory: 0,
            milli_gpu,
            gpu_number: 1,
            gpu_type: String::new(),
        }
    }

    fn score_of(plugin: &PwrScorePlugin, n: &NodeResource, pod: &PodResource) -> i64 {
        let memo = DashMap::new();
        let typical = Vec::new();
        let ctx = ScoreContext {
            node: n,
            pod_uid: "uid-1",
            pod_res: pod,
            typical_pods: &typical,
            bellman_memo: &memo,
        };
        plugin.score(&ctx).expect("score")
    }

    #[test]
    fn test_prefers_already_powered_gpu() {
        let plugin = PwrScorePlugin::new(EnergyConfig::default());
        let pod = share_pod(300);
        // GPU 1 is already on; landing there avoids the idle-power step of waking GPU 0.
        let n = node(vec![MILLI, 600]);
        assert_eq!(plugin.select_gpu(&n, &pod, &Vec::new()), Some(1));
    }

    #[test]
    fn test_share_ties_keep_lowest_index() {
        let plugin = PwrScorePlugin::new(EnergyConfig::default());
        let pod = share_pod(300);
        let n = node(vec![600, 600]);
        assert_eq!(plugin.select_gpu(&n, &pod, &Vec::new()), Some(0));
    }

    #[test]
    fn test_score_bounds() {
        let plugin = PwrScorePlugin::new(EnergyConfig::default());
        for gpu_left in [vec![MILLI, MILLI], vec![400, 900], vec![MILLI]] {
            let n = node(gpu_left);
            let score = score_of(&plugin, &n, &share_pod(300));
            assert!((0..=MAX_NODE_SCORE).contains(&score));
        }
    }

    #[test]
    fn test_pod_requesting_nothing_gets_max_score() {
        let plugin = PwrScorePlugin::new(EnergyConfig::default());
        let n = node(vec![MILLI]);
        assert_eq!(score_of(&plugin, &n, &PodResource::default()), MAX_NODE_SCORE);
    }

    #[test]
    fn test_inaccessible_node_is_an_error() {
        let plugin = PwrScorePlugin::new(EnergyConfig::default());
        let n = node(vec![MILLI]);
        let mut pod = share_pod(300);
        pod.gpu_type = "A100".to_string();
        let memo = DashMap::new();
        let typical = Vec::new();
        let ctx = ScoreContext {
            node: &n,
            pod_uid: "uid-1",
            pod_res: &pod,
            typical_pods: &typical,
            bellman_memo: &memo,
        };
        assert!(plugin.score(&ctx).is_err());
    }
}
