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

//! The Open-Gpu-Share filter: a node is feasible for a pod iff the pod could be deducted
//! from it right now (GPU model, per-GPU share capacity, CPU and memory).

use super::{FilterPlugin, OPEN_GPU_SHARE_FILTER_PLUGIN};
use crate::scheduling::resources::{NodeResource, PodResource, ResourceError};

pub struct OpenGpuShareFilter;

impl FilterPlugin for OpenGpuShareFilter {
    fn name(&self) -> &'static str {
        OPEN_GPU_SHARE_FILTER_PLUGIN
    }

    fn filter(&self, node: &NodeResource, pod: &PodResource) -> Result<(), ResourceError> {
        // A dry-run deduction yields exactly the error the pipeline reports on failure.
        node.sub(pod).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduling::resources::MILLI;

    #[test]
    fn test_filter_matches_sub_feasibility() {
        let node = NodeResource::new("node1", 2000, 4 << 30, 1, "V100");
        let fits = PodResource {
            milli_cpu: 1000,
            memory: 1 << 30,
            milli_gpu: 500,
            gpu_number: 1,
            gpu_type: String::new(),
        };
        assert!(OpenGpuShareFilter.filter(&node, &fits).is_ok());

        let wrong_type = PodResource {
            gpu_type: "A100".to_string(),
            ..fits.clone()
        };
        match OpenGpuShareFilter.filter(&node, &wrong_type).unwrap_err() {
            ResourceError::IncompatibleGpuType { .. } => {}
            err => panic!("unexpected error variant: {err:?}"),
        }

        let too_big = PodResource {
            milli_gpu: MILLI,
            gpu_number: 2,
            ..fits
        };
        match OpenGpuShareFilter.filter(&node, &too_big).unwrap_err() {
            ResourceError::InsufficientGpus { .. } => {}
            err => panic!("unexpected error variant: {err:?}"),
        }
    }
}
