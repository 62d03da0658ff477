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

//! The reserve phase: turn "this pod goes on this node" into concrete GPU indexes.
//!
//! Whole-GPU and multi-GPU pods take the lowest-indexed fully-free devices. Share pods
//! delegate the choice to whichever score plugin the profile's `gpuSelMethod` names, so
//! the packing/clustering/energy policies steer physical placement, not just node choice.

use thiserror::Error;

use super::plugins::PluginRegistry;
use super::resources::{NodeResource, PodResource, ResourceError, MILLI};
use super::workload::TargetPodList;

#[derive(Error, Debug)]
pub enum ReserveError {
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error("plugin {method} found no gpu for the pod on node {node}")]
    NoGpuChoice { node: String, method: String },
}

/// Lowest-indexed fully-free GPUs (`== MILLI`) until `pod.gpu_number` are chosen.
pub fn allocate_exclusive_gpu_ids(
    node: &NodeResource,
    pod: &PodResource,
) -> Result<Vec<usize>, ResourceError> {
    let mut chosen = Vec::with_capacity(pod.gpu_number.max(0) as usize);
    for (i, &left) in node.milli_gpu_left_list.iter().enumerate() {
        if left == MILLI {
            chosen.push(i);
            if chosen.len() as i64 == pod.gpu_number {
                return Ok(chosen);
            }
        }
    }
    Err(ResourceError::InsufficientGpus {
        node: node.node_name.clone(),
        gpu_number: pod.gpu_number,
        milli_gpu: pod.milli_gpu,
    })
}

/// Render the `gpu-index` assignment annotation: comma-separated decimal indices.
pub fn gpu_index_annotation(gpu_indexes: &[usize]) -> String {
    gpu_indexes
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

pub struct GpuShareReserver<'a> {
    registry: &'a PluginRegistry,
}

impl<'a> GpuShareReserver<'a> {
    pub fn new(registry: &'a PluginRegistry) -> Self {
        Self { registry }
    }

    /// Pick the GPU indexes the pod will occupy on `node`.
    ///
    /// Exactly one reservation is made per pod; the caller commits it together with the
    /// resource deduction, so no other scheduling attempt can observe a half-reserved
    /// node.
    pub fn reserve(
        &self,
        node: &NodeResource,
        pod: &PodResource,
        typical_pods: &TargetPodList,
    ) -> Result<Vec<usize>, ReserveError> {
        if pod.milli_gpu == 0 {
            return Ok(Vec::new());
        }
        if pod.is_gpu_share() {
            let selector = self.registry.gpu_selector();
            return match selector.select_gpu(node, pod, typical_pods) {
                Some(gpu_index) => Ok(vec![gpu_index]),
                None => Err(ReserveError::NoGpuChoice {
                    node: node.node_name.clone(),
                    method: self.registry.gpu_sel_method().to_string(),
                }),
            };
        }
        Ok(allocate_exclusive_gpu_ids(node, pod)?)
    }
}
