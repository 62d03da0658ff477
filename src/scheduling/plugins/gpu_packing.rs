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

//! GPU-packing scoring: drive already-used GPUs toward full utilization.
//!
//! For share pods the plugin prefers the GPU with the least remaining millis that still
//! fits the request, so partially-used GPUs fill up before idle ones are touched. For
//! whole-GPU pods it prefers nodes where the placement leaves the fewest fully idle GPUs.

use super::{
    PluginError, ScoreContext, ScorePlugin, GPU_PACKING_SCORE_PLUGIN, MAX_NODE_SCORE,
};
use crate::scheduling::resources::{NodeResource, PodResource, ResourceError, MILLI};
use crate::scheduling::workload::TargetPodList;

/// The GPU with the least remaining millis still sufficient for the pod; lowest index on
/// ties. None when nothing fits.
fn best_packed_gpu(node: &NodeResource, pod: &PodResource) -> Option<(usize, i64)> {
    let mut best: Option<(usize, i64)> = None;
    for (i, &left) in node.milli_gpu_left_list.iter().enumerate() {
        if left < pod.milli_gpu {
            continue;
        }
        match best {
            None => best = Some((i, left)),
            Some((_, best_left)) if left < best_left => best = Some((i, left)),
            _ => {}
        }
    }
    best
}

pub struct GpuPackingScorePlugin;

impl ScorePlugin for GpuPackingScorePlugin {
    fn name(&self) -> &'static str {
        GPU_PACKING_SCORE_PLUGIN
    }

    fn score(&self, ctx: &ScoreContext<'_>) -> Result<i64, PluginError> {
        let pod = ctx.pod_res;
        if pod.requests_nothing() || pod.milli_gpu == 0 {
            return Ok(MAX_NODE_SCORE);
        }

        if pod.is_gpu_share() {
            let (_, left) =
                best_packed_gpu(ctx.node, pod).ok_or_else(|| PluginError::Infeasible {
                    node: ctx.node.node_name.clone(),
                    source: ResourceError::InsufficientGpus {
                        node: ctx.node.node_name.clone(),
                        gpu_number: pod.gpu_number,
                        milli_gpu: pod.milli_gpu,
                    },
                })?;
            let left_after = left - pod.milli_gpu;
            return Ok((MILLI - left_after) * MAX_NODE_SCORE / MILLI);
        }

        // Whole-GPU pods: fewer idle GPUs after the placement means a tighter node.
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
        Ok((gpu_number - idle_after) * MAX_NODE_SCORE / gpu_number.max(1))
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
        best_packed_gpu(node, pod).map(|(i, _)| i)
    }
}
