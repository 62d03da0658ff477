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

//! Dot-product scoring: cosine alignment of what the node has left with what the pod
//! asks for. Nodes whose leftover shape resembles the request waste the least across the
//! CPU/memory/GPU dimensions.

use super::{
    DimExtMethod, NormMethod, PluginError, ScoreContext, ScorePlugin, DOT_PRODUCT_SCORE_PLUGIN,
    MAX_NODE_SCORE, MIN_NODE_SCORE,
};
use crate::scheduling::resources::{NodeResource, PodResource, MILLI};

pub struct DotProductScorePlugin {
    dim_ext_method: DimExtMethod,
    norm_method: NormMethod,
}

impl DotProductScorePlugin {
    pub fn new(dim_ext_method: DimExtMethod, norm_method: NormMethod) -> Self {
        Self {
            dim_ext_method,
            norm_method,
        }
    }

    fn vectors(&self, node: &NodeResource, pod: &PodResource) -> ([f64; 3], [f64; 3]) {
        let gpu_demand = match self.dim_ext_method {
            DimExtMethod::Share => pod.milli_gpu,
            DimExtMethod::Merge => pod.total_milli_gpu(),
        } as f64;
        let mut node_vec = [
            node.milli_cpu_left as f64,
            node.memory_left as f64,
            node.gpu_milli_left_total() as f64,
        ];
        let mut pod_vec = [pod.milli_cpu as f64, pod.memory as f64, gpu_demand];

        match self.norm_method {
            NormMethod::Max => {
                let capacities = [
                    node.milli_cpu as f64,
                    node.memory as f64,
                    (node.gpu_number() as i64 * MILLI) as f64,
                ];
                for ((n, p), cap) in node_vec
                    .iter_mut()
                    .zip(pod_vec.iter_mut())
                    .zip(capacities.iter())
                {
                    if *cap > 0.0 {
                        *n /= cap;
                        *p /= cap;
                    } else {
                        *n = 0.0;
                        *p = 0.0;
                    }
                }
            }
            NormMethod::Sum => {
                let node_sum: f64 = node_vec.iter().sum();
                let pod_sum: f64 = pod_vec.iter().sum();
                if node_sum > 0.0 {
                    node_vec.iter_mut().for_each(|v| *v /= node_sum);
                }
                if pod_sum > 0.0 {
                    pod_vec.iter_mut().for_each(|v| *v /= pod_sum);
                }
            }
        }
        (node_vec, pod_vec)
    }
}

impl ScorePlugin for DotProductScorePlugin {
    fn name(&self) -> &'static str {
        DOT_PRODUCT_SCORE_PLUGIN
    }

    fn score(&self, ctx: &ScoreContext<'_>) -> Result<i64, PluginError> {
        if ctx.pod_res.requests_nothing() {
            return Ok(MAX_NODE_SCORE);
        }
        let (node_vec, pod_vec) = self.vectors(ctx.node, ctx.pod_res);
        let dot: f64 = node_vec.iter().zip(pod_vec.iter()).map(|(a, b)| a * b).sum();
        let node_norm = node_vec.iter().map(|v| v * v).sum::<f64>().sqrt();
        let pod_norm = pod_vec.iter().map(|v| v * v).sum::<f64>().sqrt();
        if node_norm == 0.0 || pod_norm == 0.0 {
            return Ok(MIN_NODE_SCORE);
        }
        let cosine = (dot / (node_norm * pod_norm)).clamp(0.0, 1.0);
        Ok((cosine * MAX_NODE_SCORE as f64) as i64)
    }
}
