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

//! Descheduling: pick victims on the most fragmented node, evict them and hand them back
//! to the caller for rescheduling. Eviction restores node resources exactly; a node whose
//! placements are all revoked is back at its allocatable capacity.

use log::{debug, error, info};

use crate::scheduling::fragmentation::node_gpu_share_frag_score;
use crate::scheduling::pipeline::{Placement, ResourceStore};
use crate::scheduling::workload::TargetPodList;
use crate::simulator::config::DeschedulePolicy;

/// The node with the highest fragmentation score that still hosts at least one pod.
/// Ties keep the lexicographically lowest name (store order).
fn most_fragmented_node(store: &ResourceStore, typical_pods: &TargetPodList) -> Option<String> {
    let mut best: Option<(String, f64)> = None;
    for node in store.nodes() {
        if store.placements_on(&node.node_name).is_empty() {
            continue;
        }
        let score = node_gpu_share_frag_score(node, typical_pods);
        match &best {
            None => best = Some((node.node_name.clone(), score)),
            Some((_, best_score)) if score > *best_score => {
                best = Some((node.node_name.clone(), score))
            }
            _ => {}
        }
    }
    best.map(|(name, _)| name)
}

/// Evict pods from the most fragmented node according to `policy`, returning the revoked
/// placements.
pub fn deschedule(
    policy: DeschedulePolicy,
    store: &mut ResourceStore,
    typical_pods: &TargetPodList,
) -> Vec<Placement> {
    let Some(victim_node) = most_fragmented_node(store, typical_pods) else {
        info!("deschedule: no node hosts any pod, nothing to do");
        return Vec::new();
    };

    let victim_keys: Vec<String> = match policy {
        DeschedulePolicy::FragOnePod => {
            // The placement whose removal leaves the lowest fragmentation score.
            let node = store.node(&victim_node).expect("victim node exists").clone();
            let mut best: Option<(String, f64)> = None;
            for placement in store.placements_on(&victim_node) {
                let restored = match node.add(&placement.pod_res, &placement.gpu_indexes) {
                    Ok(restored) => restored,
                    Err(err) => {
                        error!("deschedule dry-run restore failed: {err}");
                        continue;
                    }
                };
                let score = node_gpu_share_frag_score(&restored, typical_pods);
                match &best {
                    None => best = Some((placement.pod_key.clone(), score)),
                    Some((_, best_score)) if score < *best_score => {
                        best = Some((placement.pod_key.clone(), score))
                    }
                    _ => {}
                }
            }
            best.map(|(key, _)| vec![key]).unwrap_or_default()
        }
        DeschedulePolicy::FragMultiPod => store
            .placements_on(&victim_node)
            .into_iter()
            .filter(|p| p.pod_res.is_gpu_share())
            .map(|p| p.pod_key.clone())
            .collect(),
    };

    let mut evicted = Vec::with_capacity(victim_keys.len());
    for key in victim_keys {
        match store.unbind(&key) {
            Ok(placement) => {
                debug!("descheduled {} from {}", placement.pod_key, victim_node);
                evicted.push(placement);
            }
            Err(err) => error!("deschedule failed to unbind {key}: {err}"),
        }
    }
    info!(
        "deschedule({policy:?}): evicted {} pod(s) from {victim_node}",
        evicted.len()
    );
    evicted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduling::resources::{NodeResource, PodResource, MILLI};
    use crate::scheduling::workload::TargetPod;

    fn share_pod_res(milli_gpu: i64) -> PodResource {
        PodResource {
            milli_cpu: 100,
            memory: 0,
            milli_gpu,
            gpu_number: 1,
            gpu_type: String::new(),
        }
    }

    fn bind(store: &mut ResourceStore, key: &str, node: &str, gpu: usize, milli_gpu: i64) {
        store
            .bind(Placement {
                pod_key: key.to_string(),
                pod_uid: format!("uid-{key}"),
                node_name: node.to_string(),
                gpu_indexes: vec![gpu],
                pod_res: share_pod_res(milli_gpu),
            })
            .expect("bind");
    }

    fn typical() -> TargetPodList {
        vec![TargetPod {
            resource: share_pod_res(600),
            percentage: 1.0,
        }]
    }

    #[test]
    fn test_frag_multi_pod_evicts_all_share_pods() {
        let mut store = ResourceStore::new();
        store.insert_node(NodeResource::new("node1", 4000, 8 << 30, 2, "V100"));
        bind(&mut store, "default/a", "node1", 0, 500);
        bind(&mut store, "default/b", "node1", 1, 500);

        let evicted = deschedule(DeschedulePolicy::FragMultiPod, &mut store, &typical());
        assert_eq!(evicted.len(), 2);
        // Eviction restored the node to its allocatable capacity.
        let node = store.node("node1").expect("node");
        assert_eq!(node.milli_gpu_left_list, vec![MILLI, MILLI]);
        assert_eq!(node.milli_cpu_left, 4000);
        assert_eq!(store.placements().count(), 0);
    }

    #[test]
    fn test_frag_one_pod_evicts_the_best_restoring_pod() {
        // GPU leftovers [500, 100] against a 600m reference shape: everything left is
        // fragmented. Evicting the 500m pod reopens GPU 0 entirely and leaves only the
        // 100m tail wasted; evicting the 900m pod would still strand 500m on GPU 0.
        let mut store = ResourceStore::new();
        store.insert_node(NodeResource::new("node1", 4000, 8 << 30, 2, "V100"));
        bind(&mut store, "default/small", "node1", 0, 500);
        bind(&mut store, "default/big", "node1", 1, 900);

        let evicted = deschedule(DeschedulePolicy::FragOnePod, &mut store, &typical());
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].pod_key, "default/small");
        assert!(store.placement("default/big").is_some());
    }

    #[test]
    fn test_deschedule_on_empty_cluster_is_a_no_op() {
        let mut store = ResourceStore::new();
        store.insert_node(NodeResource::new("node1", 4000, 8 << 30, 2, "V100"));
        assert!(deschedule(DeschedulePolicy::FragOnePod, &mut store, &typical()).is_empty());
    }
}
