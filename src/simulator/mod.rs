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

//! Top-level simulation driver.
//!
//! [`simulate`] replays one full experiment: ingest the cluster, distill the reference
//! workload, schedule everything, optionally deschedule and reschedule, optionally
//! inflate the workload to probe saturation, then hand back the unscheduled set and the
//! final per-node status.

pub mod analysis;
pub mod cluster;
pub mod config;
pub mod descheduler;

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use crate::scheduling::fragmentation::{
    node_gpu_frag_amount, node_gpu_frag_based_on_skyline, node_gpu_share_frag_score, FragAmount,
};
use crate::scheduling::pipeline::{ResourceStore, SchedulingPipeline, UnscheduledPod};
use crate::scheduling::plugins::PluginRegistry;
use crate::scheduling::queues::{sort_pods_by_greed, sort_pods_by_toleration, ClusterCapacity};
use crate::scheduling::reserver::gpu_index_annotation;
use crate::scheduling::workload::{skyline_pods, typical_pods, SkylinePodList, TargetPodList};

use analysis::{
    cluster_frag_amount, make_node_status_table, make_resource_summary_table, resource_summaries,
    NodeStatus, ResourceSummary,
};
use cluster::{
    expand_daemon_set, validate_pod, ClusterNode, ClusterPod, IngestError, ANNO_GPU_INDEX,
};
use config::{ClusterSpec, ConfigError, CustomConfig, ExportConfig, SchedulerProfile};

#[derive(Error, Debug)]
pub enum SimulatorError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Ingest(#[from] IngestError),
}

/// A pre-parsed application bundle scheduled after the cluster workload.
#[derive(Debug, Default, Clone)]
pub struct AppWorkload {
    pub name: String,
    pub pods: Vec<ClusterPod>,
}

/// Everything a simulation run reports back.
#[derive(Debug)]
pub struct SimulateResult {
    pub unscheduled_pods: Vec<UnscheduledPod>,
    pub node_status: Vec<NodeStatus>,
}

// --------------------
// Simulation
// --------------------

/// One simulated cluster plus the machinery to schedule workloads onto it.
///
/// The [`ResourceStore`] is the single owner of node state; plugins and analysis read
/// snapshots, only binding and descheduling mutate it.
pub struct Simulation {
    registry: PluginRegistry,
    custom: CustomConfig,
    store: ResourceStore,
    cluster_nodes: BTreeMap<String, ClusterNode>,
    pods_by_key: BTreeMap<String, ClusterPod>,
    workload_pods: Vec<ClusterPod>,
    typical_pods: TargetPodList,
    skyline_pods: SkylinePodList,
    cancel: Arc<AtomicBool>,
}

impl Simulation {
    pub fn new(profile: &SchedulerProfile, custom: CustomConfig) -> Result<Self, ConfigError> {
        let registry = PluginRegistry::from_profile(profile)?;
        // Fail fast on a bad policy name instead of surprising the run later.
        custom.deschedule_config.parse_policy()?;
        Ok(Self {
            registry,
            custom,
            store: ResourceStore::new(),
            cluster_nodes: BTreeMap::new(),
            pods_by_key: BTreeMap::new(),
            workload_pods: Vec::new(),
            typical_pods: Vec::new(),
            skyline_pods: Vec::new(),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn custom(&self) -> &CustomConfig {
        &self.custom
    }

    pub fn store(&self) -> &ResourceStore {
        &self.store
    }

    /// Handle for cooperative cancellation; checked between pods and pipeline phases.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Load nodes, expand daemonsets into per-node pods, and validate the whole workload.
    ///
    /// # Errors
    /// Any invalid pod is fatal; per-pod scheduling failures are not errors and are
    /// reported as [`UnscheduledPod`]s later instead.
    pub fn ingest_cluster(&mut self, spec: &ClusterSpec) -> Result<Vec<ClusterPod>, IngestError> {
        for node in &spec.nodes {
            self.cluster_nodes.insert(node.name.clone(), node.clone());
            self.store.insert_node(node.to_node_resource());
        }

        let mut pods = spec.pods.clone();
        for daemon_set in &spec.daemon_sets {
            pods.extend(expand_daemon_set(daemon_set, &spec.nodes));
        }
        for pod in &pods {
            validate_pod(pod)?;
            if let Some(affinity) = &pod.node_affinity {
                if !spec.nodes.iter().any(|n| affinity.matches(&n.labels)) {
                    warn!("pod {} declares node affinity matching no node", pod.key());
                }
            }
        }
        Ok(pods)
    }

    pub fn set_workload_pods(&mut self, pods: &[ClusterPod]) {
        self.workload_pods = pods.to_vec();
    }

    pub fn set_typical_pods(&mut self) {
        let resources: Vec<_> = self.workload_pods.iter().map(|p| p.resource()).collect();
        self.typical_pods = typical_pods(&resources, &self.custom.typical_pods_config);
    }

    pub fn set_skyline_pods(&mut self) {
        let resources: Vec<_> = self.workload_pods.iter().map(|p| p.resource()).collect();
        self.skyline_pods = skyline_pods(&resources);
    }

    /// Total CPU and memory requested by `pods`.
    pub fn record_pod_total_resource_req(&self, pods: &[ClusterPod]) -> (i64, i64) {
        let milli_cpu = pods.iter().map(|p| p.milli_cpu).sum();
        let memory = pods.iter().map(|p| p.memory).sum();
        info!("workload requests: {milli_cpu}m cpu, {memory}B memory");
        (milli_cpu, memory)
    }

    /// Total allocatable CPU and memory across the cluster.
    pub fn record_node_total_resource(&self) -> (i64, i64) {
        let milli_cpu = self.store.nodes().map(|n| n.milli_cpu).sum();
        let memory = self.store.nodes().map(|n| n.memory).sum();
        info!("cluster allocatable: {milli_cpu}m cpu, {memory}B memory");
        (milli_cpu, memory)
    }

    /// Scale per-pod CPU/memory requests so the aggregate workload lands at
    /// `ratio * cluster capacity`. Rounding is randomized but fully determined by the
    /// configured seed.
    pub fn tune_pods_by_node_total_resource(&self, mut pods: Vec<ClusterPod>) -> Vec<ClusterPod> {
        let tuning = &self.custom.workload_tuning_config;
        if tuning.ratio <= 0.0 {
            return pods;
        }
        let (pod_cpu, pod_memory) = self.record_pod_total_resource_req(&pods);
        let (node_cpu, node_memory) = self.record_node_total_resource();
        let cpu_factor = if pod_cpu > 0 {
            tuning.ratio * node_cpu as f64 / pod_cpu as f64
        } else {
            1.0
        };
        let memory_factor = if pod_memory > 0 {
            tuning.ratio * node_memory as f64 / pod_memory as f64
        } else {
            1.0
        };

        let mut rng = StdRng::seed_from_u64(tuning.seed as u64);
        let mut stochastic_round = |x: f64| -> i64 {
            let floor = x.floor();
            let frac = x - floor;
            floor as i64 + i64::from(rng.gen::<f64>() < frac)
        };
        for pod in &mut pods {
            pod.milli_cpu = stochastic_round(pod.milli_cpu as f64 * cpu_factor);
            pod.memory = stochastic_round(pod.memory as f64 * memory_factor);
        }
        info!(
            "tuned workload to ratio {:.2} (cpu x{cpu_factor:.3}, memory x{memory_factor:.3}, seed {})",
            tuning.ratio, tuning.seed
        );
        pods
    }

    /// Order pending pods: greed (dominant share) by default, toleration priority
    /// otherwise. Both are stable sorts.
    pub fn sort_cluster_pods(&self, pods: &mut Vec<ClusterPod>) {
        if self.custom.use_greed {
            let capacity = ClusterCapacity::from_nodes(self.store.nodes());
            sort_pods_by_greed(pods, &capacity);
        } else {
            sort_pods_by_toleration(pods);
        }
    }

    /// Schedule every pod through the pipeline, committing placements into the store and
    /// stamping assignment annotations onto the pod records.
    pub fn run_cluster(&mut self, pods: Vec<ClusterPod>) -> Vec<UnscheduledPod> {
        for pod in &pods {
            self.pods_by_key.insert(pod.key(), pod.clone());
        }
        let pipeline =
            SchedulingPipeline::new(&self.registry, &self.typical_pods, self.cancel.clone());
        let unscheduled = pipeline.schedule_pods(&mut self.store, &pods);

        for pod in &pods {
            let key = pod.key();
            if let Some(placement) = self.store.placement(&key) {
                let node_name = placement.node_name.clone();
                let annotation = gpu_index_annotation(&placement.gpu_indexes);
                if let Some(stored) = self.pods_by_key.get_mut(&key) {
                    stored.node_name = node_name;
                    stored
                        .annotations
                        .insert(ANNO_GPU_INDEX.to_string(), annotation);
                }
            }
        }
        unscheduled
    }

    /// Validate and schedule one application bundle on the live cluster.
    pub fn schedule_app(&mut self, app: &AppWorkload) -> Result<Vec<UnscheduledPod>, IngestError> {
        for pod in &app.pods {
            validate_pod(pod)?;
        }
        let mut pods = app.pods.clone();
        self.sort_cluster_pods(&mut pods);
        info!("scheduling app {:?} ({} pods)", app.name, pods.len());
        Ok(self.run_cluster(pods))
    }

    /// Evict pods per the configured policy and reschedule them.
    pub fn deschedule_cluster(&mut self) -> Vec<UnscheduledPod> {
        let policy = match self.custom.deschedule_config.parse_policy() {
            Ok(Some(policy)) => policy,
            Ok(None) => return Vec::new(),
            Err(err) => {
                // Unreachable after the constructor check; don't abort a running
                // simulation over it.
                error!("{err}");
                return Vec::new();
            }
        };
        let evicted = descheduler::deschedule(policy, &mut self.store, &self.typical_pods);
        let mut victims: Vec<ClusterPod> = Vec::with_capacity(evicted.len());
        for placement in &evicted {
            match self.pods_by_key.get(&placement.pod_key) {
                Some(pod) => {
                    let mut pod = pod.clone();
                    pod.node_name.clear();
                    pod.annotations.remove(ANNO_GPU_INDEX);
                    victims.push(pod);
                }
                None => error!("evicted pod {} has no record", placement.pod_key),
            }
        }
        self.sort_cluster_pods(&mut victims);
        self.run_cluster(victims)
    }

    /// Replay an inflated copy of the workload on a pristine copy of the cluster to
    /// measure saturation. The live store is left untouched.
    pub fn run_workload_inflation(&self, tag: &str) -> Vec<UnscheduledPod> {
        let ratio = self.custom.workload_inflation_config.ratio;
        let n = self.workload_pods.len();
        if ratio <= 1.0 || n == 0 {
            return Vec::new();
        }
        let target = (ratio * n as f64).round() as usize;
        let mut pods = self.workload_pods.clone();
        let mut k = 0usize;
        while pods.len() < target {
            let source = &self.workload_pods[k % n];
            let mut replica = source.clone();
            replica.name = format!("{}-inflated-{k}", source.name);
            replica.uid = format!("{}-inflated-{k}", source.uid);
            replica.node_name.clear();
            replica.annotations.remove(ANNO_GPU_INDEX);
            pods.push(replica);
            k += 1;
        }

        let mut store = ResourceStore::new();
        for node in self.cluster_nodes.values() {
            store.insert_node(node.to_node_resource());
        }
        self.sort_cluster_pods(&mut pods);
        let pipeline =
            SchedulingPipeline::new(&self.registry, &self.typical_pods, self.cancel.clone());
        let unscheduled = pipeline.schedule_pods(&mut store, &pods);
        info!(
            "[{tag}] inflation x{ratio:.2}: {}/{} pods unscheduled",
            unscheduled.len(),
            pods.len()
        );
        unscheduled
    }

    /// Log and return the cluster fragmentation amount and utilization summary.
    pub fn cluster_analysis(&self, tag: &str) -> (FragAmount, Vec<ResourceSummary>) {
        let frag = cluster_frag_amount(&self.store, &self.typical_pods);
        let summaries = resource_summaries(&self.store);
        info!("[{tag}] cluster frag {frag}");
        info!("[{tag}] q1+q2+q4 frag {:.1}m", frag.sum_q1_q2_q4());
        info!(
            "[{tag}] resource summary:\n{}",
            make_resource_summary_table(&summaries)
        );
        (frag, summaries)
    }

    /// Log the per-node fragmentation picture against the reference distributions.
    pub fn cluster_gpu_frag_report(&self) {
        for node in self.store.nodes() {
            let share_score = node_gpu_share_frag_score(node, &self.typical_pods);
            let ratio_amount = node_gpu_frag_amount(node, &self.typical_pods);
            let skyline_waste = node_gpu_frag_based_on_skyline(node, &self.skyline_pods);
            info!(
                "{node}: frag score {share_score:.1}, ratio amount {ratio_amount}, skyline waste {skyline_waste}m"
            );
        }
    }

    /// Final per-node status: ingested record, live resource state, placements.
    pub fn node_status(&self) -> Vec<NodeStatus> {
        self.store
            .nodes()
            .map(|resource| {
                let node = self
                    .cluster_nodes
                    .get(&resource.node_name)
                    .cloned()
                    .unwrap_or_default();
                NodeStatus {
                    node,
                    resource: resource.clone(),
                    pods: self
                        .store
                        .placements_on(&resource.node_name)
                        .into_iter()
                        .cloned()
                        .collect(),
                }
            })
            .collect()
    }
}

fn log_delegated_outputs(export: &ExportConfig, tag: &str) {
    if !export.pod_snapshot_yaml_file_prefix.is_empty() {
        debug!(
            "[{tag}] pod snapshot export delegated (prefix {})",
            export.pod_snapshot_yaml_file_prefix
        );
    }
    if !export.node_snapshot_csv_file_prefix.is_empty() {
        debug!(
            "[{tag}] node snapshot export delegated (prefix {})",
            export.node_snapshot_csv_file_prefix
        );
    }
}

fn report_failed_pods(failed: &[UnscheduledPod]) {
    if failed.is_empty() {
        return;
    }
    warn!("there are {} unscheduled pods", failed.len());
    for unscheduled in failed {
        debug!(
            "failed to schedule pod {}: {}",
            unscheduled.pod.key(),
            unscheduled.reason
        );
    }
}

/// Run one complete simulation: initial placement, optional descheduling, optional
/// workload inflation, then app bundles.
pub fn simulate(
    cluster: &ClusterSpec,
    apps: &[AppWorkload],
    profile: &SchedulerProfile,
    custom: CustomConfig,
) -> Result<SimulateResult, SimulatorError> {
    let mut sim = Simulation::new(profile, custom)?;

    let mut pods = sim.ingest_cluster(cluster)?;
    info!("number of original workload pods: {}", pods.len());
    sim.set_workload_pods(&pods);
    sim.set_typical_pods();
    sim.set_skyline_pods();
    sim.cluster_gpu_frag_report();

    if sim.custom().workload_tuning_config.ratio > 0.0 {
        pods = sim.tune_pods_by_node_total_resource(pods);
    }
    sim.sort_cluster_pods(&mut pods);
    let mut failed = sim.run_cluster(pods);
    report_failed_pods(&failed);
    sim.cluster_analysis("init-schedule");
    log_delegated_outputs(&sim.custom().export_config, "init-schedule");
    if let Some(path) = &sim.custom().new_workload_config {
        debug!("new-workload document loading delegated (path {path})");
    }

    if sim.custom().deschedule_config.parse_policy()?.is_some() {
        let unscheduled = sim.deschedule_cluster();
        failed.extend(unscheduled);
        sim.cluster_analysis("post-deschedule");
        sim.cluster_gpu_frag_report();
        log_delegated_outputs(&sim.custom().export_config, "post-deschedule");
    }

    if sim.custom().workload_inflation_config.ratio > 1.0 {
        failed.extend(sim.run_workload_inflation("schedule-inflation"));
    }

    for app in apps {
        failed.extend(sim.schedule_app(app)?);
    }

    info!(
        "simulation finished: {} unscheduled pod(s)\n{}",
        failed.len(),
        make_node_status_table(&sim.node_status())
    );
    Ok(SimulateResult {
        unscheduled_pods: failed,
        node_status: sim.node_status(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduling::plugins::{
        FGD_SCORE_PLUGIN, OPEN_GPU_SHARE_FILTER_PLUGIN, PWR_SCORE_PLUGIN,
    };
    use crate::scheduling::resources::MILLI;
    use cluster::{ANNO_GPU_COUNT, ANNO_GPU_MILLI, ANNO_GPU_MODEL};
    use config::{DescheduleConfig, ScorePluginEntry, WorkloadInflationConfig, WorkloadTuningConfig};

    fn init_test_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn profile() -> SchedulerProfile {
        init_test_logger();
        SchedulerProfile {
            filters: vec![OPEN_GPU_SHARE_FILTER_PLUGIN.to_string()],
            scores: vec![
                ScorePluginEntry {
                    name: FGD_SCORE_PLUGIN.to_string(),
                    weight: 10,
                },
                ScorePluginEntry {
                    name: PWR_SCORE_PLUGIN.to_string(),
                    weight: 1,
                },
            ],
            plugin_config: Default::default(),
        }
    }

    fn node(name: &str, milli_cpu: i64, gpus: i64, model: &str) -> ClusterNode {
        let mut node = ClusterNode {
            name: name.to_string(),
            milli_cpu,
            memory: 32 << 30,
            ..ClusterNode::default()
        };
        node.annotations
            .insert(ANNO_GPU_COUNT.to_string(), gpus.to_string());
        node.annotations
            .insert(ANNO_GPU_MODEL.to_string(), model.to_string());
        node
    }

    fn gpu_pod(name: &str, milli_cpu: i64, milli_gpu: i64) -> ClusterPod {
        let mut pod = ClusterPod {
            namespace: "default".to_string(),
            name: name.to_string(),
            uid: format!("uid-{name}"),
            milli_cpu,
            memory: 1 << 30,
            ..ClusterPod::default()
        };
        pod.annotations
            .insert(ANNO_GPU_MILLI.to_string(), milli_gpu.to_string());
        pod.annotations
            .insert(ANNO_GPU_COUNT.to_string(), "1".to_string());
        pod
    }

    fn small_cluster(pods: Vec<ClusterPod>) -> ClusterSpec {
        ClusterSpec {
            nodes: vec![
                node("node-a", 8000, 2, "V100"),
                node("node-b", 8000, 2, "V100"),
            ],
            pods,
            daemon_sets: Vec::new(),
        }
    }

    fn assignments(result: &SimulateResult) -> Vec<(String, String, Vec<usize>)> {
        let mut out = Vec::new();
        for status in &result.node_status {
            for placement in &status.pods {
                out.push((
                    placement.pod_key.clone(),
                    placement.node_name.clone(),
                    placement.gpu_indexes.clone(),
                ));
            }
        }
        out.sort();
        out
    }

    #[test]
    fn test_simulate_places_workload() {
        let spec = small_cluster(vec![
            gpu_pod("a", 1000, 500),
            gpu_pod("b", 2000, 1000),
            gpu_pod("c", 500, 300),
        ]);
        let result = simulate(&spec, &[], &profile(), CustomConfig::default()).expect("simulate");
        assert!(result.unscheduled_pods.is_empty());
        assert_eq!(assignments(&result).len(), 3);
    }

    #[test]
    fn test_determinism_under_pod_reorder() {
        // Distinct dominant shares: any input permutation binds identically.
        let forward = vec![
            gpu_pod("a", 1000, 200),
            gpu_pod("b", 2000, 500),
            gpu_pod("c", 3000, 900),
        ];
        let reversed: Vec<ClusterPod> = forward.iter().rev().cloned().collect();
        let result_fwd = simulate(
            &small_cluster(forward),
            &[],
            &profile(),
            CustomConfig::default(),
        )
        .expect("simulate");
        let result_rev = simulate(
            &small_cluster(reversed),
            &[],
            &profile(),
            CustomConfig::default(),
        )
        .expect("simulate");
        assert_eq!(assignments(&result_fwd), assignments(&result_rev));
    }

    #[test]
    fn test_two_runs_are_identical() {
        let spec = small_cluster(vec![
            gpu_pod("a", 1000, 500),
            gpu_pod("b", 2000, 700),
            gpu_pod("c", 500, 300),
            gpu_pod("d", 1500, 1000),
        ]);
        let custom = CustomConfig {
            workload_tuning_config: WorkloadTuningConfig {
                ratio: 0.5,
                seed: 42,
            },
            ..CustomConfig::default()
        };
        let one = simulate(&spec, &[], &profile(), custom.clone()).expect("simulate");
        let two = simulate(&spec, &[], &profile(), custom).expect("simulate");
        assert_eq!(assignments(&one), assignments(&two));
        let reasons = |r: &SimulateResult| -> Vec<(String, String)> {
            r.unscheduled_pods
                .iter()
                .map(|u| (u.pod.key(), u.reason.clone()))
                .collect()
        };
        assert_eq!(reasons(&one), reasons(&two));
    }

    #[test]
    fn test_invalid_pod_is_fatal_at_ingest() {
        let mut bad = gpu_pod("bad", 1000, 500);
        bad.annotations
            .insert(ANNO_GPU_COUNT.to_string(), "2".to_string());
        let err = simulate(
            &small_cluster(vec![bad]),
            &[],
            &profile(),
            CustomConfig::default(),
        )
        .unwrap_err();
        match err {
            SimulatorError::Ingest(IngestError::FractionalMultiGpu { .. }) => {}
            _ => panic!("unexpected error variant: {err:?}"),
        }
    }

    #[test]
    fn test_deschedule_round_trip_keeps_conservation() {
        let spec = small_cluster(vec![
            gpu_pod("a", 1000, 300),
            gpu_pod("b", 1000, 700),
            gpu_pod("c", 1000, 500),
        ]);
        let custom = CustomConfig {
            deschedule_config: DescheduleConfig {
                policy: "fragMultiPod".to_string(),
            },
            typical_pods_config: crate::scheduling::workload::TypicalPodsConfig {
                is_involved_cpu_pods: true,
                pod_popularity_threshold: 100,
                ..Default::default()
            },
            ..CustomConfig::default()
        };
        let result = simulate(&spec, &[], &profile(), custom).expect("simulate");
        assert!(result.unscheduled_pods.is_empty());

        // Conservation after evict + reschedule: per node, remaining + placed == capacity.
        for status in &result.node_status {
            let placed_cpu: i64 = status.pods.iter().map(|p| p.pod_res.milli_cpu).sum();
            assert_eq!(
                status.resource.milli_cpu_left + placed_cpu,
                status.resource.milli_cpu
            );
            let mut per_gpu = vec![0i64; status.resource.gpu_number()];
            for placement in &status.pods {
                for &i in &placement.gpu_indexes {
                    per_gpu[i] += placement.pod_res.milli_gpu;
                }
            }
            for (left, placed) in status.resource.milli_gpu_left_list.iter().zip(per_gpu.iter()) {
                assert_eq!(left + placed, MILLI);
            }
        }
    }

    #[test]
    fn test_workload_inflation_reports_saturation() {
        // One node, one GPU: three 300m share pods fit, six do not.
        let spec = ClusterSpec {
            nodes: vec![node("node-a", 8000, 1, "V100")],
            pods: vec![
                gpu_pod("a", 100, 300),
                gpu_pod("b", 100, 300),
                gpu_pod("c", 100, 300),
            ],
            daemon_sets: Vec::new(),
        };
        let custom = CustomConfig {
            workload_inflation_config: WorkloadInflationConfig { ratio: 2.0 },
            ..CustomConfig::default()
        };
        let result = simulate(&spec, &[], &profile(), custom).expect("simulate");
        // The inflated replay wants 6 x 300m on a single 1000m GPU.
        assert!(!result.unscheduled_pods.is_empty());
        // The live cluster still only carries the original three pods.
        let placed: usize = result.node_status.iter().map(|s| s.pods.len()).sum();
        assert_eq!(placed, 3);
    }

    #[test]
    fn test_daemon_sets_expand_and_bind_on_every_node() {
        let mut spec = small_cluster(vec![gpu_pod("a", 1000, 500)]);
        spec.daemon_sets.push(cluster::DaemonSetSpec {
            namespace: "kube-system".to_string(),
            name: "exporter".to_string(),
            template: cluster::PodTemplate {
                milli_cpu: 100,
                memory: 1 << 20,
                ..Default::default()
            },
        });
        let result = simulate(&spec, &[], &profile(), CustomConfig::default()).expect("simulate");
        assert!(result.unscheduled_pods.is_empty());
        for status in &result.node_status {
            assert!(status
                .pods
                .iter()
                .any(|p| p.pod_key == format!("kube-system/exporter-{}", status.node.name)));
        }
    }

    #[test]
    fn test_app_bundles_schedule_after_cluster_workload() {
        let spec = small_cluster(vec![gpu_pod("a", 1000, 500)]);
        let app = AppWorkload {
            name: "inference".to_string(),
            pods: vec![gpu_pod("svc", 500, 300)],
        };
        let result =
            simulate(&spec, &[app], &profile(), CustomConfig::default()).expect("simulate");
        assert!(result.unscheduled_pods.is_empty());
        let keys: Vec<String> = assignments(&result).into_iter().map(|(k, _, _)| k).collect();
        assert!(keys.contains(&"default/svc".to_string()));
    }

    #[test]
    fn test_cancel_before_run_reports_everything_unscheduled() {
        let mut sim = Simulation::new(&profile(), CustomConfig::default()).expect("sim");
        let pods = sim
            .ingest_cluster(&small_cluster(vec![gpu_pod("a", 1000, 500)]))
            .expect("ingest");
        sim.cancel_handle()
            .store(true, std::sync::atomic::Ordering::Relaxed);
        let unscheduled = sim.run_cluster(pods);
        assert_eq!(unscheduled.len(), 1);
        assert_eq!(unscheduled[0].reason, "cancelled");
        assert_eq!(sim.store().placements().count(), 0);
    }
}
