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

//! Pod ordering queues. Both sorts are stable, so the total order over any input is
//! deterministic and two runs over the same workload bind in the same sequence.

use std::cmp::Ordering;

use crate::scheduling::resources::{NodeResource, PodResource, MILLI};
use crate::simulator::cluster::ClusterPod;

/// Cluster-wide capacity over the dimensions dominant share is computed on.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClusterCapacity {
    pub milli_cpu: i64,
    pub memory: i64,
    pub gpu_milli: i64,
}

impl ClusterCapacity {
    pub fn from_nodes<'a>(nodes: impl Iterator<Item = &'a NodeResource>) -> Self {
        let mut capacity = ClusterCapacity::default();
        for node in nodes {
            capacity.milli_cpu += node.milli_cpu;
            capacity.memory += node.memory;
            capacity.gpu_milli += node.gpu_number() as i64 * MILLI;
        }
        capacity
    }
}

fn share(alloc: f64, total: f64) -> f64 {
    if total == 0.0 {
        if alloc == 0.0 {
            0.0
        } else {
            1.0
        }
    } else {
        alloc / total
    }
}

/// The pod's dominant share: its largest fractional demand across the cluster's resource
/// dimensions.
pub fn dominant_share(pod: &PodResource, capacity: &ClusterCapacity) -> f64 {
    let cpu = share(pod.milli_cpu as f64, capacity.milli_cpu as f64);
    let memory = share(pod.memory as f64, capacity.memory as f64);
    let gpu = share(pod.total_milli_gpu() as f64, capacity.gpu_milli as f64);
    cpu.max(memory).max(gpu)
}

/// Greed ordering: pods already bound to a node come first (they must not be displaced by
/// fresh arrivals), then unbound pods by descending dominant share.
pub fn sort_pods_by_greed(pods: &mut [ClusterPod], capacity: &ClusterCapacity) {
    pods.sort_by(|a, b| {
        match (a.node_name.is_empty(), b.node_name.is_empty()) {
            (false, true) => Ordering::Less,
            (true, false) => Ordering::Greater,
            _ => {
                let share_a = dominant_share(&a.resource(), capacity);
                let share_b = dominant_share(&b.resource(), capacity);
                share_b.partial_cmp(&share_a).unwrap_or(Ordering::Equal)
            }
        }
    });
}

/// Toleration ordering: pods declaring tolerations schedule before pods without.
pub fn sort_pods_by_toleration(pods: &mut [ClusterPod]) {
    pods.sort_by_key(|pod| pod.tolerations.is_empty());
}
