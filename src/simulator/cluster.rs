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

//! Node and pod records as the simulator ingests them.
//!
//! These mirror the shape of real cluster objects closely enough to replay traces: GPU
//! requests travel in annotations (`gpu-milli`, `gpu-count`, model tag), the assignment
//! comes back in the `gpu-index` annotation, and everything else the core does not care
//! about stays opaque key/value data.

use std::collections::BTreeMap;

use log::warn;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::scheduling::resources::{NodeResource, PodResource, MILLI};

/// Per-GPU request in thousandths, on pods.
pub const ANNO_GPU_MILLI: &str = "gpu-milli";
/// Number of requested (pods) or installed (nodes) GPUs.
pub const ANNO_GPU_COUNT: &str = "gpu-count";
/// GPU model tag: required model on pods, installed model on nodes.
pub const ANNO_GPU_MODEL: &str = "gpu-model";
/// Assignment annotation: comma-separated GPU indices, written at bind time.
pub const ANNO_GPU_INDEX: &str = "gpu-index";
/// Opaque local-storage description on nodes.
pub const ANNO_NODE_LOCAL_STORAGE: &str = "node-local-storage";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IngestError {
    #[error("pod {key} has negative resource requests")]
    NegativeRequests { key: String },
    #[error("pod {key} requests {gpu_number} gpus with a fractional share of {milli_gpu}m")]
    FractionalMultiGpu {
        key: String,
        gpu_number: i64,
        milli_gpu: i64,
    },
    #[error("pod {key} requests {milli_gpu}m of a single gpu (max 1000)")]
    GpuMilliOutOfRange { key: String, milli_gpu: i64 },
    #[error("{kind} {key} carries a malformed {annotation} annotation: {value:?}")]
    BadAnnotation {
        kind: &'static str,
        key: String,
        annotation: &'static str,
        value: String,
    },
}

fn parse_int_annotation(
    annotations: &BTreeMap<String, String>,
    kind: &'static str,
    key: &str,
    annotation: &'static str,
) -> Result<Option<i64>, IngestError> {
    match annotations.get(annotation) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| IngestError::BadAnnotation {
                kind,
                key: key.to_string(),
                annotation,
                value: raw.clone(),
            }),
    }
}

// --------------------
// Nodes
// --------------------

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClusterNode {
    pub name: String,
    /// Allocatable CPU, in millicores.
    pub milli_cpu: i64,
    /// Allocatable memory, in bytes.
    pub memory: i64,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

impl ClusterNode {
    pub fn gpu_count(&self) -> i64 {
        match parse_int_annotation(&self.annotations, "node", &self.name, ANNO_GPU_COUNT) {
            Ok(count) => count.unwrap_or(0),
            Err(err) => {
                warn!("{err}");
                0
            }
        }
    }

    pub fn gpu_model(&self) -> String {
        self.annotations
            .get(ANNO_GPU_MODEL)
            .cloned()
            .unwrap_or_default()
    }

    /// The opaque local-storage payload, if the node declares one.
    pub fn local_storage(&self) -> Option<serde_json::Value> {
        let raw = self.annotations.get(ANNO_NODE_LOCAL_STORAGE)?;
        match serde_json::from_str(raw) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!("node {} local-storage annotation is not json: {err}", self.name);
                None
            }
        }
    }

    /// A fully idle [`NodeResource`] with this node's capacity.
    pub fn to_node_resource(&self) -> NodeResource {
        NodeResource::new(
            self.name.clone(),
            self.milli_cpu,
            self.memory,
            self.gpu_count().max(0) as usize,
            self.gpu_model(),
        )
    }
}

// --------------------
// Pods
// --------------------

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Toleration {
    pub key: String,
    pub value: String,
    pub effect: String,
}

/// Required node labels; the scheduler treats a `gpu-model` requirement as the pod's GPU
/// type. Other label requirements are matched verbatim at ingest.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NodeAffinity {
    pub required_labels: BTreeMap<String, String>,
}

impl NodeAffinity {
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.required_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClusterPod {
    pub namespace: String,
    pub name: String,
    pub uid: String,
    /// Cumulative CPU request of all containers, in millicores.
    pub milli_cpu: i64,
    /// Cumulative memory request of all containers, in bytes.
    pub memory: i64,
    pub annotations: BTreeMap<String, String>,
    pub tolerations: Vec<Toleration>,
    pub node_affinity: Option<NodeAffinity>,
    /// Pre-assigned node, empty when the pod still needs scheduling.
    pub node_name: String,
}

impl ClusterPod {
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    pub fn gpu_milli(&self) -> i64 {
        match parse_int_annotation(&self.annotations, "pod", &self.key(), ANNO_GPU_MILLI) {
            Ok(milli) => milli.unwrap_or(0),
            Err(err) => {
                warn!("{err}");
                0
            }
        }
    }

    pub fn gpu_count(&self) -> i64 {
        match parse_int_annotation(&self.annotations, "pod", &self.key(), ANNO_GPU_COUNT) {
            Ok(Some(count)) => count,
            Ok(None) => {
                if self.gpu_milli() > 0 {
                    1
                } else {
                    0
                }
            }
            Err(err) => {
                warn!("{err}");
                0
            }
        }
    }

    /// The pod's required GPU model: its own annotation first, otherwise a `gpu-model`
    /// node-affinity requirement.
    pub fn gpu_type(&self) -> String {
        if let Some(model) = self.annotations.get(ANNO_GPU_MODEL) {
            return model.clone();
        }
        self.node_affinity
            .as_ref()
            .and_then(|affinity| affinity.required_labels.get(ANNO_GPU_MODEL).cloned())
            .unwrap_or_default()
    }

    /// The scheduling view of this pod. Callers on the hot path may use this freely: the
    /// annotations were validated at ingest.
    pub fn resource(&self) -> PodResource {
        PodResource {
            milli_cpu: self.milli_cpu,
            memory: self.memory,
            milli_gpu: self.gpu_milli(),
            gpu_number: self.gpu_count(),
            gpu_type: self.gpu_type(),
        }
    }
}

/// Strict ingest-time validation of one pod.
///
/// # Errors
/// `NegativeRequests` for any negative dimension, `FractionalMultiGpu` for
/// `gpu_number >= 2` with a fractional share, `GpuMilliOutOfRange` for shares above one
/// GPU, and `BadAnnotation` when a GPU annotation does not parse.
pub fn validate_pod(pod: &ClusterPod) -> Result<PodResource, IngestError> {
    let key = pod.key();
    let milli_gpu =
        parse_int_annotation(&pod.annotations, "pod", &key, ANNO_GPU_MILLI)?.unwrap_or(0);
    let gpu_number = match parse_int_annotation(&pod.annotations, "pod", &key, ANNO_GPU_COUNT)? {
        Some(count) => count,
        None => {
            if milli_gpu > 0 {
                1
            } else {
                0
            }
        }
    };

    if pod.milli_cpu < 0 || pod.memory < 0 || milli_gpu < 0 || gpu_number < 0 {
        return Err(IngestError::NegativeRequests { key });
    }
    if milli_gpu > MILLI {
        return Err(IngestError::GpuMilliOutOfRange { key, milli_gpu });
    }
    if gpu_number >= 2 && milli_gpu < MILLI {
        return Err(IngestError::FractionalMultiGpu {
            key,
            gpu_number,
            milli_gpu,
        });
    }

    Ok(PodResource {
        milli_cpu: pod.milli_cpu,
        memory: pod.memory,
        milli_gpu,
        gpu_number,
        gpu_type: pod.gpu_type(),
    })
}

// --------------------
// DaemonSets
// --------------------

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PodTemplate {
    pub milli_cpu: i64,
    pub memory: i64,
    pub annotations: BTreeMap<String, String>,
    pub tolerations: Vec<Toleration>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DaemonSetSpec {
    pub namespace: String,
    pub name: String,
    pub template: PodTemplate,
}

/// Expand a daemonset into one concrete pod per node, each pre-assigned to its node.
///
/// Minted UIDs are name-based so two runs over the same cluster agree on them.
pub fn expand_daemon_set(spec: &DaemonSetSpec, nodes: &[ClusterNode]) -> Vec<ClusterPod> {
    nodes
        .iter()
        .map(|node| ClusterPod {
            namespace: spec.namespace.clone(),
            name: format!("{}-{}", spec.name, node.name),
            uid: Uuid::new_v5(
                &Uuid::NAMESPACE_OID,
                format!("{}/{}-{}", spec.namespace, spec.name, node.name).as_bytes(),
            )
            .to_string(),
            milli_cpu: spec.template.milli_cpu,
            memory: spec.template.memory,
            annotations: spec.template.annotations.clone(),
            tolerations: spec.template.tolerations.clone(),
            node_affinity: None,
            node_name: node.name.clone(),
        })
        .collect()
}
