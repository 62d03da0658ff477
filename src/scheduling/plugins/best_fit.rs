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

//! Classic best-fit scoring: minimize what the placement leaves behind.
//!
//! The node score grows as the average leftover fraction across CPU, memory and GPU
//! shrinks. For the concrete GPU choice, best-fit minimizes `left - milli_gpu` among the
//! feasible GPUs.

use super::{PluginError, ScoreContext, ScorePlugin, BEST_FIT_SCORE_PLUGIN, MAX_NODE_SCORE};
use crate::scheduling::resources::{NodeResource, PodResource, MILLI};
use crate::scheduling::workload::TargetPodList;

pub struct BestFitScorePlugin;

impl ScorePlugin for BestFitScorePlugin {
    fn name(&self) -> &'static str {
        BEST_FIT_SCORE_PLUGIN
    }

    fn score(&self, ctx: &ScoreContext<'_>) -> Result<i64, PluginError> {
        let pod = ctx.pod_res;
        if pod.requests_nothing() {
            return Ok(MAX_NODE_SCORE);
        }
        let next = ctx
            .node
            .sub(pod)
            .map_err(|source| PluginError::Infeasible {
                node: ctx.node.node_name.clone(),
                source,
            })?;

        let mut leftovers: Vec<f64> = Vec::with_capacity(3);
        if ctx.node.milli_cpu > 0 {
            leftovers.push(next.milli_cpu_left as f64 / ctx.node.milli_cpu as f64);
        }
        if ctx.node.memory > 0 {
            leftovers.push(next.memory_left as f64 / ctx.node.memory as f64);
        }
        if ctx.node.gpu_number() > 0 {
            let capacity = (ctx.node.gpu_number() as i64 * MILLI) as f64;
            leftovers.push(next.gpu_milli_left_total() as f64 / capacity);
        }
        if leftovers.is_empty() {
            return Ok(MAX_NODE_SCORE);
        }
        let mean_leftover: f64 = leftovers.iter().sum::<f64>() / leftovers.len() as f64;
        Ok(((1.0 - mean_leftover) * MAX_NODE_SCORE as f64) as i64)
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
        let mut best: Option<(usize, i64)> = None;
        for (i, &left) in node.milli_gpu_left_list.iter().enumerate() {
            if left < pod.milli_gpu {
                continue;
            }
            let slack = left - pod.milli_gpu;
            match best {
                None => best = Some((i, slack)),
                Some((_, best_slack)) if slack < best_slack => best = Some((i, slack)),
                _ => {}
            }
        }
        best.map(|(i, _)| i)
    }
}
