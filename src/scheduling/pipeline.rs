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

//! The per-pod scheduling pipeline: filter -> score -> select -> reserve -> bind.
//!
//! One pod is scheduled at a time. Plugins only ever see read snapshots of node state;
//! the [`ResourceStore`] is the single owner and mutates exactly once per bind (or
//! unbind). Node maps are ordered, scores are summed deterministically and ties break on
//! the lexicographically lowest node name, so identical inputs replay into identical
//! placements.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use log::{debug, trace, warn};

use super::plugins::{PluginRegistry, ScoreContext, MAX_NODE_SCORE, MIN_NODE_SCORE};
use super::reserver::GpuShareReserver;
use super::resources::{NodeResource, PodResource, ResourceError};
use super::workload::TargetPodList;
use crate::simulator::cluster::ClusterPod;

pub const CANCELLED_REASON: &str = "cancelled";

/// A committed binding: which pod sits on which node's GPUs.
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub pod_key: String,
    pub pod_uid: String,
    pub node_name: String,
    /// One entry per requested GPU; empty for CPU-only pods.
    pub gpu_indexes: Vec<usize>,
    pub pod_res: PodResource,
}

/// Terminal failure for one pod, with the most informative blocking reason seen.
#[derive(Debug, Clone)]
pub struct UnscheduledPod {
    pub pod: ClusterPod,
    pub reason: String,
}

// --------------------
// ResourceStore
// --------------------

/// Single owner of all node state and recorded placements.
///
/// Only `bind` and `unbind` mutate node state; everything else hands out snapshots.
/// The maps are ordered by name so iteration order is reproducible.
#[derive(Debug, Default, Clone)]
pub struct ResourceStore {
    nodes: BTreeMap<String, NodeResource>,
    placements: BTreeMap<String, Placement>,
}

impl ResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_node(&mut self, node: NodeResource) {
        self.nodes.insert(node.node_name.clone(), node);
    }

    pub fn node(&self, name: &str) -> Option<&NodeResource> {
        self.nodes.get(name)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeResource> {
        self.nodes.values()
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn placements(&self) -> impl Iterator<Item = &Placement> {
        self.placements.values()
    }

    pub fn placement(&self, pod_key: &str) -> Option<&Placement> {
        self.placements.get(pod_key)
    }

    pub fn placements_on(&self, node_name: &str) -> Vec<&Placement> {
        self.placements
            .values()
            .filter(|p| p.node_name == node_name)
            .collect()
    }

    /// Commit a placement: deduct resources and record it, atomically from the point of
    /// view of any later scheduling attempt.
    pub fn bind(&mut self, placement: Placement) -> Result<(), ResourceError> {
        let node = self
            .nodes
            .get(&placement.node_name)
            .ok_or_else(|| ResourceError::NodeNotFound(placement.node_name.clone()))?;
        let next = node.sub_on_gpus(&placement.pod_res, &placement.gpu_indexes)?;
        self.nodes.insert(placement.node_name.clone(), next);
        self.placements.insert(placement.pod_key.clone(), placement);
        Ok(())
    }

    /// Revoke a placement, restoring exactly what `bind` deducted.
    pub fn unbind(&mut self, pod_key: &str) -> Result<Placement, ResourceError> {
        let placement = self
            .placements
            .get(pod_key)
            .ok_or_else(|| ResourceError::PlacementNotFound(pod_key.to_string()))?
            .clone();
        let node = self
            .nodes
            .get(&placement.node_name)
            .ok_or_else(|| ResourceError::NodeNotFound(placement.node_name.clone()))?;
        let next = node.add(&placement.pod_res, &placement.gpu_indexes)?;
        self.nodes.insert(placement.node_name.clone(), next);
        self.placements.remove(pod_key);
        Ok(placement)
    }
}

// --------------------
// Pipeline
// --------------------

/// More specific failures beat generic ones when several nodes block for different
/// reasons.
fn reason_rank(err: &ResourceError) -> u8 {
    match err {
        ResourceError::IncompatibleGpuType { .. } => 3,
        ResourceError::InsufficientGpus { .. } => 2,
        ResourceError::InsufficientResources { .. } => 1,
        _ => 0,
    }
}

fn keep_more_informative(
    current: Option<ResourceError>,
    candidate: ResourceError,
) -> Option<ResourceError> {
    match current {
        None => Some(candidate),
        Some(existing) if reason_rank(&candidate) > reason_rank(&existing) => Some(candidate),
        keep => keep,
    }
}

pub struct SchedulingPipeline<'a> {
    registry: &'a PluginRegistry,
    typical_pods: &'a TargetPodList,
    cancel: Arc<AtomicBool>,
}

impl<'a> SchedulingPipeline<'a> {
    pub fn new(
        registry: &'a PluginRegistry,
        typical_pods: &'a TargetPodList,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            registry,
            typical_pods,
            cancel,
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Schedule every pod in order. Pods that cannot be placed are reported, never
    /// retried; a cancellation marks all remaining pods unscheduled and keeps every
    /// placement committed so far.
    pub fn schedule_pods(
        &self,
        store: &mut ResourceStore,
        pods: &[ClusterPod],
    ) -> Vec<UnscheduledPod> {
        let mut unscheduled = Vec::new();
        for (position, pod) in pods.iter().enumerate() {
            if self.cancelled() {
                unscheduled.extend(pods[position..].iter().map(|pod| UnscheduledPod {
                    pod: pod.clone(),
                    reason: CANCELLED_REASON.to_string(),
                }));
                break;
            }
            if let Err(failure) = self.schedule_one(store, pod) {
                unscheduled.push(failure);
            }
        }
        unscheduled
    }

    /// Run one full filter -> score -> select -> reserve -> bind cycle for `pod`.
    fn schedule_one(
        &self,
        store: &mut ResourceStore,
        pod: &ClusterPod,
    ) -> Result<(), UnscheduledPod> {
        let pod_res = pod.resource();
        let unscheduled = |reason: String| UnscheduledPod {
            pod: pod.clone(),
            reason,
        };

        // Filter phase. A pre-assigned pod only ever considers its own node.
        let mut blocking: Option<ResourceError> = None;
        let mut feasible: Vec<String> = Vec::new();
        let candidates: Vec<&NodeResource> = if pod.node_name.is_empty() {
            store.nodes().collect()
        } else {
            match store.node(&pod.node_name) {
                Some(node) => vec![node],
                None => {
                    return Err(unscheduled(
                        ResourceError::NodeNotFound(pod.node_name.clone()).to_string(),
                    ))
                }
            }
        };
        for node in candidates {
            let mut node_ok = true;
            for filter in self.registry.filter_plugins() {
                if let Err(err) = filter.filter(node, &pod_res) {
                    trace!("filter {} blocks {} on {}: {err}", filter.name(), pod.key(), node.node_name);
                    node_ok = false;
                    blocking = keep_more_informative(blocking.take(), err);
                    break;
                }
            }
            if node_ok {
                feasible.push(node.node_name.clone());
            }
        }

        if self.cancelled() {
            return Err(unscheduled(CANCELLED_REASON.to_string()));
        }

        // Score phase. The Bellman memo lives for this one cycle only.
        let bellman_memo = DashMap::new();
        let mut scored: Vec<(String, i64)> = Vec::with_capacity(feasible.len());
        for node_name in &feasible {
            let node = store.node(node_name).expect("feasible node exists");
            let mut total = 0i64;
            for (plugin, weight) in self.registry.score_plugins() {
                let ctx = ScoreContext {
                    node,
                    pod_uid: &pod.uid,
                    pod_res: &pod_res,
                    typical_pods: self.typical_pods,
                    bellman_memo: &bellman_memo,
                };
                match plugin.score(&ctx) {
                    Ok(score) => {
                        if !(MIN_NODE_SCORE..=MAX_NODE_SCORE).contains(&score) {
                            warn!("plugin {} returned out-of-range score {score}", plugin.name());
                        }
                        total += score.clamp(MIN_NODE_SCORE, MAX_NODE_SCORE) * weight;
                    }
                    Err(err) => {
                        debug!("plugin {} failed on {node_name}: {err}", plugin.name());
                    }
                }
            }
            scored.push((node_name.clone(), total));
        }

        // Select / reserve / bind. If a reservation fails, drop the node and fall back to
        // the next-best candidate.
        let reserver = GpuShareReserver::new(self.registry);
        let mut reserve_reason: Option<String> = None;
        while !scored.is_empty() {
            // `scored` inherits the store's name order, so the first strict maximum is
            // also the lexicographically lowest name among ties.
            let mut best = 0;
            for (i, entry) in scored.iter().enumerate() {
                if entry.1 > scored[best].1 {
                    best = i;
                }
            }
            let (node_name, score) = scored.remove(best);
            let node = store.node(&node_name).expect("candidate node exists");
            match reserver.reserve(node, &pod_res, self.typical_pods) {
                Ok(gpu_indexes) => {
                    let placement = Placement {
                        pod_key: pod.key(),
                        pod_uid: pod.uid.clone(),
                        node_name: node_name.clone(),
                        gpu_indexes,
                        pod_res: pod_res.clone(),
                    };
                    match store.bind(placement) {
                        Ok(()) => {
                            debug!("bound {} on {node_name} (score {score})", pod.key());
                            return Ok(());
                        }
                        Err(err) => {
                            debug!("bind of {} on {node_name} failed: {err}", pod.key());
                            reserve_reason = Some(err.to_string());
                        }
                    }
                }
                Err(err) => {
                    debug!("reserve of {} on {node_name} failed: {err}", pod.key());
                    reserve_reason = Some(err.to_string());
                }
            }
        }

        let reason = reserve_reason
            .or_else(|| blocking.map(|err| err.to_string()))
            .unwrap_or_else(|| "no feasible node".to_string());
        Err(unscheduled(reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduling::plugins::{
        PluginConfig, FGD_SCORE_PLUGIN, GPU_PACKING_SCORE_PLUGIN, OPEN_GPU_SHARE_FILTER_PLUGIN,
    };
    use crate::scheduling::resources::MILLI;
    use crate::simulator::cluster::{ClusterPod, ANNO_GPU_COUNT, ANNO_GPU_MILLI, ANNO_GPU_MODEL};
    use crate::simulator::config::{SchedulerProfile, ScorePluginEntry};

    fn registry_with(score: &str, gpu_sel: Option<&str>) -> PluginRegistry {
        let mut profile = SchedulerProfile {
            filters: vec![OPEN_GPU_SHARE_FILTER_PLUGIN.to_string()],
            scores: vec![ScorePluginEntry {
                name: score.to_string(),
                weight: 1,
            }],
            plugin_config: Default::default(),
        };
        if let Some(method) = gpu_sel {
            profile.plugin_config.insert(
                OPEN_GPU_SHARE_FILTER_PLUGIN.to_string(),
                PluginConfig {
                    gpu_sel_method: Some(method.to_string()),
                    ..Default::default()
                },
            );
        }
        PluginRegistry::from_profile(&profile).expect("registry")
    }

    fn gpu_pod(name: &str, milli_cpu: i64, milli_gpu: i64, gpu_number: i64) -> ClusterPod {
        let mut pod = ClusterPod {
            namespace: "default".to_string(),
            name: name.to_string(),
            uid: format!("uid-{name}"),
            milli_cpu,
            memory: 0,
            ..ClusterPod::default()
        };
        pod.annotations
            .insert(ANNO_GPU_MILLI.to_string(), milli_gpu.to_string());
        pod.annotations
            .insert(ANNO_GPU_COUNT.to_string(), gpu_number.to_string());
        pod
    }

    fn store_with(nodes: Vec<NodeResource>) -> ResourceStore {
        let mut store = ResourceStore::new();
        for node in nodes {
            store.insert_node(node);
        }
        store
    }

    #[test]
    fn test_single_gpu_share_fits() {
        // One node, one GPU, pod wants half of it.
        let registry = registry_with(FGD_SCORE_PLUGIN, None);
        let typical = Vec::new();
        let pipeline = SchedulingPipeline::new(&registry, &typical, Arc::new(AtomicBool::new(false)));
        let mut store = store_with(vec![NodeResource::new("node1", 4000, 8 << 30, 1, "V100")]);
        let pods = vec![gpu_pod("a", 1000, 500, 1)];
        let unscheduled = pipeline.schedule_pods(&mut store, &pods);
        assert!(unscheduled.is_empty());
        let node = store.node("node1").expect("node");
        assert_eq!(node.milli_gpu_left_list, vec![500]);
        assert_eq!(node.milli_cpu_left, 3000);
        let placement = store.placement("default/a").expect("placement");
        assert_eq!(placement.gpu_indexes, vec![0]);
    }

    #[test]
    fn test_packing_plugin_picks_packed_gpu() {
        // Two GPUs at [1000, 600]; the packing plugin must land the 300m pod on GPU 1.
        let registry = registry_with(GPU_PACKING_SCORE_PLUGIN, Some(GPU_PACKING_SCORE_PLUGIN));
        let typical = Vec::new();
        let pipeline = SchedulingPipeline::new(&registry, &typical, Arc::new(AtomicBool::new(false)));
        let mut node = NodeResource::new("node1", 4000, 8 << 30, 2, "V100");
        node.milli_gpu_left_list = vec![MILLI, 600];
        let mut store = store_with(vec![node]);
        let pods = vec![gpu_pod("a", 100, 300, 1)];
        let unscheduled = pipeline.schedule_pods(&mut store, &pods);
        assert!(unscheduled.is_empty());
        let placement = store.placement("default/a").expect("placement");
        assert_eq!(placement.gpu_indexes, vec![1]);
        assert_eq!(
            store.node("node1").expect("node").milli_gpu_left_list,
            vec![MILLI, 300]
        );
    }

    #[test]
    fn test_incompatible_gpu_type_reason() {
        let registry = registry_with(FGD_SCORE_PLUGIN, None);
        let typical = Vec::new();
        let pipeline = SchedulingPipeline::new(&registry, &typical, Arc::new(AtomicBool::new(false)));
        let mut store = store_with(vec![NodeResource::new("node1", 4000, 8 << 30, 1, "V100")]);
        let mut pod = gpu_pod("a", 1000, 500, 1);
        pod.annotations
            .insert(ANNO_GPU_MODEL.to_string(), "A100".to_string());
        let unscheduled = pipeline.schedule_pods(&mut store, &[pod]);
        assert_eq!(unscheduled.len(), 1);
        assert!(
            unscheduled[0].reason.contains("gpu type"),
            "reason: {}",
            unscheduled[0].reason
        );
    }

    #[test]
    fn test_tie_breaks_on_lowest_node_name() {
        // Two identical nodes score the same; the lexicographically lower name wins.
        let registry = registry_with(FGD_SCORE_PLUGIN, None);
        let typical = Vec::new();
        let pipeline = SchedulingPipeline::new(&registry, &typical, Arc::new(AtomicBool::new(false)));
        let mut store = store_with(vec![
            NodeResource::new("node-b", 4000, 8 << 30, 1, "V100"),
            NodeResource::new("node-a", 4000, 8 << 30, 1, "V100"),
        ]);
        let pods = vec![gpu_pod("a", 1000, 500, 1)];
        assert!(pipeline.schedule_pods(&mut store, &pods).is_empty());
        assert_eq!(store.placement("default/a").expect("placement").node_name, "node-a");
    }

    #[test]
    fn test_cancellation_reports_remaining_pods() {
        let registry = registry_with(FGD_SCORE_PLUGIN, None);
        let typical = Vec::new();
        let cancel = Arc::new(AtomicBool::new(true));
        let pipeline = SchedulingPipeline::new(&registry, &typical, cancel);
        let mut store = store_with(vec![NodeResource::new("node1", 4000, 8 << 30, 1, "V100")]);
        let pods = vec![gpu_pod("a", 1000, 500, 1), gpu_pod("b", 1000, 500, 1)];
        let unscheduled = pipeline.schedule_pods(&mut store, &pods);
        assert_eq!(unscheduled.len(), 2);
        assert!(unscheduled.iter().all(|u| u.reason == CANCELLED_REASON));
        assert_eq!(store.placements().count(), 0);
    }

    #[test]
    fn test_pre_assigned_pod_binds_on_its_node() {
        let registry = registry_with(FGD_SCORE_PLUGIN, None);
        let typical = Vec::new();
        let pipeline = SchedulingPipeline::new(&registry, &typical, Arc::new(AtomicBool::new(false)));
        let mut store = store_with(vec![
            NodeResource::new("node-a", 4000, 8 << 30, 1, "V100"),
            NodeResource::new("node-b", 4000, 8 << 30, 1, "V100"),
        ]);
        let mut pod = gpu_pod("pinned", 1000, 500, 1);
        pod.node_name = "node-b".to_string();
        assert!(pipeline.schedule_pods(&mut store, &[pod]).is_empty());
        assert_eq!(
            store.placement("default/pinned").expect("placement").node_name,
            "node-b"
        );
    }

    #[test]
    fn test_conservation_across_bind_unbind() {
        let registry = registry_with(FGD_SCORE_PLUGIN, None);
        let typical = Vec::new();
        let pipeline = SchedulingPipeline::new(&registry, &typical, Arc::new(AtomicBool::new(false)));
        let original = NodeResource::new("node1", 4000, 8 << 30, 2, "V100");
        let mut store = store_with(vec![original.clone()]);
        let pods = vec![
            gpu_pod("a", 500, 300, 1),
            gpu_pod("b", 500, 700, 1),
            gpu_pod("c", 500, 1000, 1),
        ];
        assert!(pipeline.schedule_pods(&mut store, &pods).is_empty());

        // Conservation: remaining + placed == allocatable, per dimension and per GPU.
        let node = store.node("node1").expect("node").clone();
        let placed_cpu: i64 = store.placements().map(|p| p.pod_res.milli_cpu).sum();
        assert_eq!(node.milli_cpu_left + placed_cpu, original.milli_cpu);
        let mut per_gpu = vec![0i64; 2];
        for placement in store.placements() {
            for &i in &placement.gpu_indexes {
                per_gpu[i] += placement.pod_res.milli_gpu;
            }
        }
        for (left, placed) in node.milli_gpu_left_list.iter().zip(per_gpu.iter()) {
            assert_eq!(left + placed, MILLI);
        }

        // Unbinding everything restores the node bit-identically.
        for key in ["default/a", "default/b", "default/c"] {
            store.unbind(key).expect("unbind");
        }
        assert_eq!(store.node("node1").expect("node"), &original);
    }

    #[test]
    fn test_no_feasible_node_reports_generic_reason() {
        let registry = registry_with(FGD_SCORE_PLUGIN, None);
        let typical = Vec::new();
        let pipeline = SchedulingPipeline::new(&registry, &typical, Arc::new(AtomicBool::new(false)));
        let mut store = ResourceStore::new();
        let unscheduled = pipeline.schedule_pods(&mut store, &[gpu_pod("a", 100, 100, 1)]);
        assert_eq!(unscheduled.len(), 1);
        assert_eq!(unscheduled[0].reason, "no feasible node");
    }
}
