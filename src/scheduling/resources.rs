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

//! Data structures used to represent the resources of nodes and pods.
//!
//! GPU compute is tracked in thousandths ("millis") of one physical GPU. A pod either
//! requests whole GPUs (`milli_gpu == MILLI`, `gpu_number >= 1`), a fraction of a single
//! GPU (`milli_gpu < MILLI`, `gpu_number == 1`), or no GPU at all. Nodes track the
//! remaining millis of every physical GPU individually, which is what makes GPU-sharing
//! fragmentation observable in the first place.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Thousandths of one physical GPU. `MILLI` remaining means the GPU is fully idle.
pub const MILLI: i64 = 1000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    #[error("node {node} lacks cpu/memory for request (cpu {milli_cpu}m, mem {memory}B)")]
    InsufficientResources {
        node: String,
        milli_cpu: i64,
        memory: i64,
    },
    #[error("node {node} has gpu type {node_gpu_type:?}, pod requires {requested:?}")]
    IncompatibleGpuType {
        node: String,
        node_gpu_type: String,
        requested: String,
    },
    #[error("node {node} cannot provide {gpu_number} gpu(s) with {milli_gpu}m each")]
    InsufficientGpus {
        node: String,
        gpu_number: i64,
        milli_gpu: i64,
    },
    #[error("gpu index {gpu_index} out of range on node {node}")]
    GpuIndexOutOfRange { node: String, gpu_index: usize },
    #[error("releasing resources on node {node} would exceed its capacity")]
    ExceedsCapacity { node: String },
    #[error("node {0} not found")]
    NodeNotFound(String),
    #[error("no placement recorded for pod {0}")]
    PlacementNotFound(String),
}

// --------------------
// PodResource
// --------------------

/// The resource request of one pod, reduced to the dimensions the scheduler cares about.
///
/// `gpu_type` is an opaque model tag ("V100", "A100", ...); empty means any model is
/// acceptable. The `Ord` derive gives pods a stable total order which the workload
/// distiller uses to break count ties deterministically.
#[derive(
    Debug, Default, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct PodResource {
    pub milli_cpu: i64,
    pub memory: i64,
    /// Requested thousandths of a single GPU. `0` means CPU-only, `MILLI` a whole GPU.
    pub milli_gpu: i64,
    /// Number of GPUs required. Must be 1 when `milli_gpu < MILLI` (share semantics).
    pub gpu_number: i64,
    pub gpu_type: String,
}

impl PodResource {
    /// True for pods that share one physical GPU with other pods.
    pub fn is_gpu_share(&self) -> bool {
        self.gpu_number == 1 && self.milli_gpu > 0 && self.milli_gpu < MILLI
    }

    pub fn requests_nothing(&self) -> bool {
        self.milli_cpu == 0 && self.memory == 0 && self.milli_gpu == 0
    }

    /// Total GPU millis across all requested GPUs.
    pub fn total_milli_gpu(&self) -> i64 {
        self.milli_gpu * self.gpu_number.max(0)
    }
}

impl fmt::Display for PodResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pod<cpu {}m, mem {}B, gpu {} x {}m{}>",
            self.milli_cpu,
            self.memory,
            self.gpu_number,
            self.milli_gpu,
            if self.gpu_type.is_empty() {
                String::new()
            } else {
                format!(", {}", self.gpu_type)
            }
        )
    }
}

// --------------------
// NodeResource
// --------------------

/// Canonicalized node signature used to key the Bellman memoization table.
///
/// Two nodes whose remaining resources only differ by a permutation of their GPU list have
/// the same expected fragmentation, so the GPU list is sorted before keying.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeSignature {
    pub milli_cpu_left: i64,
    pub memory_left: i64,
    pub milli_gpu_left: Vec<i64>,
    pub gpu_type: String,
}

/// Remaining resources of a single node, alongside its fixed capacity.
///
/// The capacity fields (`milli_cpu`, `memory`) never change after construction; only the
/// `*_left` fields and the per-GPU milli list move, and only through [`NodeResource::sub`],
/// [`NodeResource::sub_on_gpus`] and [`NodeResource::add`].
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeResource {
    pub node_name: String,
    pub milli_cpu: i64,
    pub milli_cpu_left: i64,
    pub memory: i64,
    pub memory_left: i64,
    /// Entry `i` is the remaining millis of physical GPU `i`, each in `[0, MILLI]`.
    /// The length is fixed at node creation.
    pub milli_gpu_left_list: Vec<i64>,
    pub gpu_type: String,
}

impl NodeResource {
    /// Build a fully idle node.
    pub fn new(
        node_name: impl Into<String>,
        milli_cpu: i64,
        memory: i64,
        gpu_number: usize,
        gpu_type: impl Into<String>,
    ) -> Self {
        Self {
            node_name: node_name.into(),
            milli_cpu,
            milli_cpu_left: milli_cpu,
            memory,
            memory_left: memory,
            milli_gpu_left_list: vec![MILLI; gpu_number],
            gpu_type: gpu_type.into(),
        }
    }

    pub fn gpu_number(&self) -> usize {
        self.milli_gpu_left_list.len()
    }

    /// Sum of the remaining millis over all GPUs of the node.
    pub fn gpu_milli_left_total(&self) -> i64 {
        self.milli_gpu_left_list.iter().sum()
    }

    /// True when the node's GPU model satisfies the pod's (possibly absent) requirement.
    pub fn gpu_type_matches(&self, pod: &PodResource) -> bool {
        pod.gpu_type.is_empty() || pod.gpu_type == self.gpu_type
    }

    /// True when at least `pod.gpu_number` GPUs each retain `pod.milli_gpu` millis.
    pub fn can_host_pod_on_gpu_memory(&self, pod: &PodResource) -> bool {
        let mut gpu_request = pod.gpu_number;
        for &left in &self.milli_gpu_left_list {
            if left >= pod.milli_gpu {
                gpu_request -= 1;
                if gpu_request <= 0 {
                    return true;
                }
            }
        }
        false
    }

    /// Whether this node can serve the pod's GPU requirement at all.
    ///
    /// CPU-only pods can run anywhere; GPU pods need a matching model and enough per-GPU
    /// capacity. CPU and memory are deliberately not consulted here.
    pub fn is_accessible_to(&self, pod: &PodResource) -> bool {
        if pod.milli_gpu == 0 {
            return true;
        }
        self.gpu_type_matches(pod) && self.can_host_pod_on_gpu_memory(pod)
    }

    /// The lowest-indexed GPUs able to satisfy the pod, or None if there are not enough.
    pub fn pick_lowest_gpus(&self, pod: &PodResource) -> Option<Vec<usize>> {
        let mut chosen = Vec::with_capacity(pod.gpu_number.max(0) as usize);
        for (i, &left) in self.milli_gpu_left_list.iter().enumerate() {
            if left >= pod.milli_gpu {
                chosen.push(i);
                if chosen.len() as i64 == pod.gpu_number {
                    return Some(chosen);
                }
            }
        }
        None
    }

    fn check_cpu_mem(&self, pod: &PodResource) -> Result<(), ResourceError> {
        if self.milli_cpu_left < pod.milli_cpu || self.memory_left < pod.memory {
            return Err(ResourceError::InsufficientResources {
                node: self.node_name.clone(),
                milli_cpu: pod.milli_cpu,
                memory: pod.memory,
            });
        }
        Ok(())
    }

    fn check_gpu_type(&self, pod: &PodResource) -> Result<(), ResourceError> {
        if pod.milli_gpu > 0 && !self.gpu_type_matches(pod) {
            return Err(ResourceError::IncompatibleGpuType {
                node: self.node_name.clone(),
                node_gpu_type: self.gpu_type.clone(),
                requested: pod.gpu_type.clone(),
            });
        }
        Ok(())
    }

    /// Produce a new node state with the pod's resources deducted.
    ///
    /// GPU selection picks the lowest-indexed satisfying GPUs, which keeps the operation
    /// deterministic. The receiver is left untouched.
    ///
    /// # Errors
    /// `IncompatibleGpuType` when the pod requires a different GPU model,
    /// `InsufficientResources` when CPU or memory would go negative,
    /// `InsufficientGpus` when fewer than `pod.gpu_number` GPUs can satisfy
    /// `pod.milli_gpu`.
    pub fn sub(&self, pod: &PodResource) -> Result<NodeResource, ResourceError> {
        self.check_gpu_type(pod)?;
        self.check_cpu_mem(pod)?;
        if pod.milli_gpu == 0 {
            return self.sub_unchecked(pod, &[]);
        }
        let indexes = self
            .pick_lowest_gpus(pod)
            .ok_or_else(|| ResourceError::InsufficientGpus {
                node: self.node_name.clone(),
                gpu_number: pod.gpu_number,
                milli_gpu: pod.milli_gpu,
            })?;
        self.sub_unchecked(pod, &indexes)
    }

    /// Like [`NodeResource::sub`], but deducting on caller-chosen GPU indexes.
    ///
    /// Used when the reserver has already picked concrete GPUs (e.g. the packing plugin
    /// deliberately choosing a partially-used GPU over the lowest-indexed free one).
    pub fn sub_on_gpus(
        &self,
        pod: &PodResource,
        gpu_indexes: &[usize],
    ) -> Result<NodeResource, ResourceError> {
        self.check_gpu_type(pod)?;
        self.check_cpu_mem(pod)?;
        if pod.milli_gpu == 0 {
            return self.sub_unchecked(pod, &[]);
        }
        if gpu_indexes.len() as i64 != pod.gpu_number {
            return Err(ResourceError::InsufficientGpus {
                node: self.node_name.clone(),
                gpu_number: pod.gpu_number,
                milli_gpu: pod.milli_gpu,
            });
        }
        for &i in gpu_indexes {
            let left = *self.milli_gpu_left_list.get(i).ok_or(
                ResourceError::GpuIndexOutOfRange {
                    node: self.node_name.clone(),
                    gpu_index: i,
                },
            )?;
            if left < pod.milli_gpu {
                return Err(ResourceError::InsufficientGpus {
                    node: self.node_name.clone(),
                    gpu_number: pod.gpu_number,
                    milli_gpu: pod.milli_gpu,
                });
            }
        }
        self.sub_unchecked(pod, gpu_indexes)
    }

    fn sub_unchecked(
        &self,
        pod: &PodResource,
        gpu_indexes: &[usize],
    ) -> Result<NodeResource, ResourceError> {
        let mut out = self.clone();
        out.milli_cpu_left -= pod.milli_cpu;
        out.memory_left -= pod.memory;
        for &i in gpu_indexes {
            out.milli_gpu_left_list[i] -= pod.milli_gpu;
        }
        Ok(out)
    }

    /// Exact inverse of [`NodeResource::sub_on_gpus`]: restore the pod's resources on the
    /// given GPU indexes. Round-trips bit-identically with the deduction that created the
    /// placement.
    pub fn add(
        &self,
        pod: &PodResource,
        gpu_indexes: &[usize],
    ) -> Result<NodeResource, ResourceError> {
        if self.milli_cpu_left + pod.milli_cpu > self.milli_cpu
            || self.memory_left + pod.memory > self.memory
        {
            return Err(ResourceError::ExceedsCapacity {
                node: self.node_name.clone(),
            });
        }
        let mut out = self.clone();
        out.milli_cpu_left += pod.milli_cpu;
        out.memory_left += pod.memory;
        for &i in gpu_indexes {
            let left = out
                .milli_gpu_left_list
                .get_mut(i)
                .ok_or(ResourceError::GpuIndexOutOfRange {
                    node: self.node_name.clone(),
                    gpu_index: i,
                })?;
            if *left + pod.milli_gpu > MILLI {
                return Err(ResourceError::ExceedsCapacity {
                    node: self.node_name.clone(),
                });
            }
            *left += pod.milli_gpu;
        }
        Ok(out)
    }

    /// Canonical signature for memoization: the GPU list is sorted so permuted-but-equal
    /// states share one cache entry.
    pub fn flatten(&self) -> NodeSignature {
        let mut milli_gpu_left = self.milli_gpu_left_list.clone();
        milli_gpu_left.sort_unstable();
        NodeSignature {
            milli_cpu_left: self.milli_cpu_left,
            memory_left: self.memory_left,
            milli_gpu_left,
            gpu_type: self.gpu_type.clone(),
        }
    }
}

// --------------------
// Energy model
// --------------------

/// Constants of the piecewise-linear power model.
///
/// The defaults are deliberately stable across releases so that energy-aware scheduling
/// runs stay reproducible: an active node's CPU complex draws `cpu_idle_power` watts at
/// zero load scaling linearly to `cpu_full_power` at full load; each active GPU draws
/// `gpu_idle_power` to `gpu_full_power` watts. A component with no allocation at all is
/// treated as powered off and draws nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyConfig {
    pub cpu_idle_power: f64,
    pub cpu_full_power: f64,
    pub gpu_idle_power: f64,
    pub gpu_full_power: f64,
}

impl Default for EnergyConfig {
    fn default() -> Self {
        Self {
            cpu_idle_power: 100.0,
            cpu_full_power: 300.0,
            gpu_idle_power: 50.0,
            gpu_full_power: 300.0,
        }
    }
}

impl NodeResource {
    /// Estimated power draw of the node as `(cpu_watts, gpu_watts)`.
    ///
    /// Per GPU: fully idle (`milli_gpu_left == MILLI`) counts as off; otherwise
    /// `idle + (full - idle) * utilization` with `utilization = (MILLI - left) / MILLI`.
    /// The CPU complex behaves analogously against the node's CPU capacity.
    pub fn energy_consumption(&self, config: &EnergyConfig) -> (f64, f64) {
        let cpu_energy = if self.milli_cpu == 0 || self.milli_cpu_left == self.milli_cpu {
            0.0
        } else {
            let util = (self.milli_cpu - self.milli_cpu_left) as f64 / self.milli_cpu as f64;
            config.cpu_idle_power + (config.cpu_full_power - config.cpu_idle_power) * util
        };

        let mut gpu_energy = 0.0;
        for &left in &self.milli_gpu_left_list {
            if left == MILLI {
                continue;
            }
            let util = (MILLI - left) as f64 / MILLI as f64;
            gpu_energy +=
                config.gpu_idle_power + (config.gpu_full_power - config.gpu_idle_power) * util;
        }
        (cpu_energy, gpu_energy)
    }
}

impl fmt::Display for NodeResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}<cpu {}/{}m, mem {}/{}B, gpu {:?} ({})>",
            self.node_name,
            self.milli_cpu_left,
            self.milli_cpu,
            self.memory_left,
            self.memory,
            self.milli_gpu_left_list,
            if self.gpu_type.is_empty() {
                "any"
            } else {
                self.gpu_type.as_str()
            }
        )
    }
}
