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

//! GPU-clustering scoring: keep whole-GPU vacancies alive.
//!
//! The mirror image of GPU packing: share pods go to the GPU with the most remaining
//! millis, whole-GPU pods to nodes that keep the most GPUs fully idle afterwards. Useful
//! when the workload mixes share pods with multi-GPU pods that need pristine devices.

use super::{
    PluginError, ScoreContext, ScorePlugin, GPU_CLUSTERING_SCORE_PLUGIN, MAX_NODE_SCORE,
};
use crate::scheduling::resources::{NodeResource, PodResource, ResourceError, MILLI};
use crate::scheduling::workload::TargetPodList;

/// The GPU with the most remaining millis; lowest index on ties.
fn roomiest_gpu(node: &NodeResource, pod: &PodResource) -> Option<(usize, i64)> {
    let mut best: Option<(usize, i64)> = None;
    for (i, &left) in node.milli_gpu_left_list.iter().enumerate() {
        if left < pod.milli_gpu {
            continue;
        }
        match best {
            None => best = Some((i, left)),
            Some((_, best_left)) if left > best_left => best = Some((i, left)),
            _ => {}
        }
    }
    best
}

pub struct GpuClusteringScorePlugin;

impl ScorePlugin for GpuClusteringScorePlugin {
    fn name(&self) -> &'static str {
        GPU_CLUSTERING_SCORE_PLUGIN
    }

    fn score(&self, ctx: &ScoreContext<'_>) -> Result<i64, PluginError> {
        let pod = ctx.pod_res;
        if pod.requests_nothing() || pod.milli_gpu == 0 {
            return Ok(MAX_NODE_SCORE);
        }

        if pod.is_gpu_share() {
            let (_, left) = roomiest_gpu(ctx.node, pod).ok_or_else(|| PluginError::Infeasible {
                node: ctx.node.node_name.clone(),
                source: ResourceError::InsufficientGpus {
                    node: ctx.node.node_name.clone(),
                    gpu_number: pod.gpu_number,
                    milli_gpu: pod.milli_gpu,
                },
            })?;
            let left_after = left - pod.milli_gpu;
            return Ok(left_after * MAX_NODE_SCORE / MILLI);
        }

        // Whole-GPU pods: more untouched GPUs after the placement is better.
        let next = ctx
            .node
            .sub(pod)
            .map_err(|source| PluginError::Infeasible {
                node: ctx.node.node_name.clone(),
                source,
            })?;
        let gpu_number = ctx.node.gpu_number() as i64;
        let idle_after = next
            .milli_gpu_left_list
            .iter()
            .filter(|&&left| left == MILLI)
            .count() as i64;
        Ok(idle_after * MAX_NODE_SCORE / gpu_number.max(1))
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
        roomiest_gpu(node, pod).map(|(i, _)| i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(gpu_left: Vec<i64>) -> NodeResource {
        NodeResource {
            node_name: "node1".to_string(),
            milli_cpu: 4000,
            milli_cpu_left: 4000,
            memory: 8 << 30,
            memory_left: 8 << 30,
            milli_gpu_left_list: gpu_left,
            gpu_type: String::new(),
        }
    }

    fn share_pod(milli_gpu: i64) -> PodResource {
        PodResource {
            milli_cpu: 100,
            memory: 0,
            milli_gpu,
            gpu_number: 1,
            gpu_type: String::new(),
        }
    }

    #[test]
    fn test_selects_roomiest_gpu() {
        let n = node(vec![600, MILLI]);
        let plugin = GpuClusteringScorePlugin;
        assert_eq!(plugin.select_gpu(&n, &share_pod(300), &Vec::new()), Some(1));
    }

    #[test]
    fn test_ties_keep_lowest_index() {
        let n = node(vec![700, 700]);
        let plugin = GpuClusteringScorePlugin;
        assert_eq!(plugin.select_gpu(&n, &share_pod(300), &Vec::new()), Some(0));
    }
}
