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

//! Fragmentation-gradient-descent scoring (FGD).
//!
//! The node score is the drop in expected fragmentation a placement would cause,
//! estimated by the Bellman recursion over the typical-pod distribution. Placements that
//! reduce (or barely grow) expected fragmentation earn the highest scores.

use dashmap::DashMap;

use super::{sigmoid, PluginError, ScoreContext, ScorePlugin, FGD_SCORE_PLUGIN, MAX_NODE_SCORE};
use crate::scheduling::fragmentation::{node_gpu_frag_bellman, BellmanParams};
use crate::scheduling::resources::{NodeResource, PodResource};
use crate::scheduling::workload::TargetPodList;

pub struct FgdScorePlugin {
    params: BellmanParams,
}

impl FgdScorePlugin {
    pub fn new(params: BellmanParams) -> Self {
        Self { params }
    }
}

impl ScorePlugin for FgdScorePlugin {
    fn name(&self) -> &'static str {
        FGD_SCORE_PLUGIN
    }

    fn score(&self, ctx: &ScoreContext<'_>) -> Result<i64, PluginError> {
        if ctx.pod_res.requests_nothing() {
            return Ok(MAX_NODE_SCORE);
        }
        let before = node_gpu_frag_bellman(
            ctx.node,
            ctx.typical_pods,
            ctx.bellman_memo,
            &self.params,
            1.0,
        );
        let next = ctx
            .node
            .sub(ctx.pod_res)
            .map_err(|source| PluginError::Infeasible {
                node: ctx.node.node_name.clone(),
                source,
            })?;
        let after = node_gpu_frag_bellman(
            &next,
            ctx.typical_pods,
            ctx.bellman_memo,
            &self.params,
            1.0,
        );
        let total = (ctx.node.gpu_milli_left_total() as f64).max(1.0);
        Ok((sigmoid((before - after) / total) * MAX_NODE_SCORE as f64) as i64)
    }

    fn select_gpu(
        &self,
        node: &NodeResource,
        pod: &PodResource,
        typical_pods: &TargetPodList,
    ) -> Option<usize> {
        if !pod.is_gpu_share() {
            return None;
        }
        // A private memo is enough here: the candidate states only differ in one GPU.
        let memo = DashMap::new();
        let mut best: Option<(f64, usize)> = None;
        for (i, &left) in node.milli_gpu_left_list.iter().enumerate() {
            if left < pod.milli_gpu {
                continue;
            }
            let next = node.sub_on_gpus(pod, &[i]).ok()?;
            let after = node_gpu_frag_bellman(&next, typical_pods, &memo, &self.params, 1.0);
            match best {
                None => best = Some((after, i)),
                Some((best_after, _)) if after < best_after => best = Some((after, i)),
                _ => {}
            }
        }
        best.map(|(_, i)| i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduling::resources::MILLI;
    use crate::scheduling::workload::TargetPod;

    fn node(gpu_left: Vec<i64>) -> NodeResource {
        NodeResource {
            node_name: "node1".to_string(),
            milli_cpu: 8000,
            milli_cpu_left: 8000,
            memory: 16 << 30,
            memory_left: 16 << 30,
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

    fn typical(entries: &[(i64, f64)]) -> TargetPodList {
        entries
            .iter()
            .map(|&(milli_gpu, percentage)| TargetPod {
                resource: share_pod(milli_gpu),
                percentage,
            })
            .collect()
    }

    #[test]
    fn test_select_gpu_avoids_creating_fragments() {
        let plugin = FgdScorePlugin::new(BellmanParams::default());
        let pods = typical(&[(500, 1.0)]);
        // Landing 500m on the 500m GPU leaves [1000]; landing on the idle one leaves
        // [500, 500]. Both serve the 500m reference shape equally, but the exact fit
        // wastes nothing if arrivals stop, so it must not score worse.
        let n = node(vec![500, MILLI]);
        let chosen = plugin.select_gpu(&n, &share_pod(500), &pods).expect("gpu");
        assert_eq!(chosen, 0);
    }

    #[test]
    fn test_score_prefers_low_frag_node() {
        let plugin = FgdScorePlugin::new(BellmanParams::default());
        let pods = typical(&[(600, 0.5), (400, 0.5)]);
        let memo = DashMap::new();
        let pod = share_pod(600);

        // Node a: placing 600m leaves 400m that only half the reference workload can use.
        let a = node(vec![MILLI]);
        let ctx_a = ScoreContext {
            node: &a,
            pod_uid: "uid",
            pod_res: &pod,
            typical_pods: &pods,
            bellman_memo: &memo,
        };
        let score_a = plugin.score(&ctx_a).expect("score");

        // Node b: a 600m hole takes the pod exactly, erasing its expected waste outright.
        let b = node(vec![600]);
        let ctx_b = ScoreContext {
            node: &b,
            pod_uid: "uid",
            pod_res: &pod,
            typical_pods: &pods,
            bellman_memo: &memo,
        };
        let score_b = plugin.score(&ctx_b).expect("score");

        assert!(score_b > score_a, "exact fit {score_b} vs fragmenting {score_a}");
        assert!((0..=MAX_NODE_SCORE).contains(&score_a));
        assert!((0..=MAX_NODE_SCORE).contains(&score_b));
    }

    #[test]
    fn test_infeasible_node_is_an_error() {
        let plugin = FgdScorePlugin::new(BellmanParams::default());
        let pods = typical(&[(600, 1.0)]);
        let memo = DashMap::new();
        let n = node(vec![100]);
        let pod = share_pod(600);
        let ctx = ScoreContext {
            node: &n,
            pod_uid: "uid",
            pod_res: &pod,
            typical_pods: &pods,
            bellman_memo: &memo,
        };
        assert!(plugin.score(&ctx).is_err());
    }
}
