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

//! Cluster analysis: utilization summaries and human-readable report tables.

use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};

use crate::scheduling::fragmentation::{node_gpu_share_frag_amount, FragAmount};
use crate::scheduling::pipeline::{Placement, ResourceStore};
use crate::scheduling::resources::{NodeResource, MILLI};
use crate::scheduling::workload::TargetPodList;
use crate::simulator::cluster::ClusterNode;

/// Final per-node view: the ingested record, its current resource state and the pods
/// placed on it.
#[derive(Debug, Clone)]
pub struct NodeStatus {
    pub node: ClusterNode,
    pub resource: NodeResource,
    pub pods: Vec<Placement>,
}

/// One row of the cluster-wide utilization summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSummary {
    pub resource: &'static str,
    pub capacity: i64,
    pub requested: i64,
}

impl ResourceSummary {
    pub fn ratio(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            self.requested as f64 / self.capacity as f64
        }
    }
}

/// Sum the share-aware fragmentation amount over every node of the store.
pub fn cluster_frag_amount(store: &ResourceStore, typical_pods: &TargetPodList) -> FragAmount {
    let mut total = FragAmount::new("cluster");
    for node in store.nodes() {
        total = total.add(&node_gpu_share_frag_amount(node, typical_pods));
    }
    total
}

/// Cluster-wide capacity vs. requested, per resource dimension.
pub fn resource_summaries(store: &ResourceStore) -> Vec<ResourceSummary> {
    let mut cpu = ResourceSummary {
        resource: "cpu (milli)",
        capacity: 0,
        requested: 0,
    };
    let mut memory = ResourceSummary {
        resource: "memory (bytes)",
        capacity: 0,
        requested: 0,
    };
    let mut gpu = ResourceSummary {
        resource: "gpu (milli)",
        capacity: 0,
        requested: 0,
    };
    for node in store.nodes() {
        cpu.capacity += node.milli_cpu;
        cpu.requested += node.milli_cpu - node.milli_cpu_left;
        memory.capacity += node.memory;
        memory.requested += node.memory - node.memory_left;
        gpu.capacity += node.gpu_number() as i64 * MILLI;
        gpu.requested += node.gpu_number() as i64 * MILLI - node.gpu_milli_left_total();
    }
    vec![cpu, memory, gpu]
}

fn create_bar_chart(used: f64, total: f64, width: usize) -> String {
    if total <= 0.0 {
        return format!("[{}] {used:.0}/{total:.0}", "-".repeat(width));
    }
    let filled = ((used / total).clamp(0.0, 1.0) * width as f64) as usize;
    format!(
        "[{}{}] {used:.0}/{total:.0}",
        "#".repeat(filled),
        "-".repeat(width - filled)
    )
}

/// Render the cluster-wide utilization summary as a table.
pub fn make_resource_summary_table(summaries: &[ResourceSummary]) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Resource"),
            Cell::new("Requested/Capacity"),
            Cell::new("Ratio"),
        ]);
    for summary in summaries {
        table.add_row(vec![
            Cell::new(summary.resource),
            Cell::new(format!("{}/{}", summary.requested, summary.capacity)),
            Cell::new(format!("{:.1}%", 100.0 * summary.ratio())),
        ]);
    }
    table.to_string()
}

/// Render per-node placement and GPU utilization as a table.
pub fn make_node_status_table(statuses: &[NodeStatus]) -> String {
    let with_storage = statuses.iter().any(|s| s.node.local_storage().is_some());

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    let mut header = vec![
        Cell::new("Node"),
        Cell::new("CPU (milli)"),
        Cell::new("GPU Utilization"),
        Cell::new("Pods"),
    ];
    if with_storage {
        header.push(Cell::new("Local Storage"));
    }
    table.set_header(header);

    for status in statuses {
        let resource = &status.resource;
        let cpu_used = resource.milli_cpu - resource.milli_cpu_left;
        let gpu_capacity = resource.gpu_number() as i64 * MILLI;
        let gpu_used = gpu_capacity - resource.gpu_milli_left_total();
        let mut row = vec![
            Cell::new(format!("{} ({})", status.node.name, status.node.gpu_model())),
            Cell::new(format!("{}/{}", cpu_used, resource.milli_cpu)),
            Cell::new(create_bar_chart(gpu_used as f64, gpu_capacity as f64, 20)),
            Cell::new(status.pods.len()),
        ];
        if with_storage {
            row.push(Cell::new(
                status
                    .node
                    .local_storage()
                    .map(|v| v.to_string())
                    .unwrap_or_default(),
            ));
        }
        table.add_row(row);
    }
    table.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduling::pipeline::Placement;
    use crate::scheduling::resources::PodResource;

    fn store_with_one_node() -> ResourceStore {
        let mut store = ResourceStore::new();
        store.insert_node(NodeResource::new("node1", 4000, 8 << 30, 2, "V100"));
        store
    }

    #[test]
    fn test_resource_summaries_track_bound_pods() {
        let mut store = store_with_one_node();
        let pod_res = PodResource {
            milli_cpu: 1000,
            memory: 1 << 30,
            milli_gpu: 500,
            gpu_number: 1,
            gpu_type: String::new(),
        };
        store
            .bind(Placement {
                pod_key: "default/a".to_string(),
                pod_uid: "uid-a".to_string(),
                node_name: "node1".to_string(),
                gpu_indexes: vec![0],
                pod_res,
            })
            .expect("bind");

        let summaries = resource_summaries(&store);
        assert_eq!(summaries[0].requested, 1000);
        assert_eq!(summaries[0].capacity, 4000);
        assert_eq!(summaries[2].requested, 500);
        assert_eq!(summaries[2].capacity, 2000);
    }

    #[test]
    fn test_cluster_frag_amount_sums_nodes() {
        let store = store_with_one_node();
        let typical = vec![crate::scheduling::workload::TargetPod {
            resource: PodResource {
                milli_cpu: 1000,
                memory: 0,
                milli_gpu: 600,
                gpu_number: 1,
                gpu_type: String::new(),
            },
            percentage: 1.0,
        }];
        let total = cluster_frag_amount(&store, &typical);
        // Both idle GPUs can serve the 600m shape, nothing is fragmented yet.
        assert_eq!(total.sum_except_q3(), 0.0);
    }

    #[test]
    fn test_tables_render() {
        let store = store_with_one_node();
        let summary_table = make_resource_summary_table(&resource_summaries(&store));
        assert!(summary_table.contains("cpu (milli)"));

        let status = NodeStatus {
            node: ClusterNode {
                name: "node1".to_string(),
                milli_cpu: 4000,
                memory: 8 << 30,
                ..ClusterNode::default()
            },
            resource: store.node("node1").expect("node").clone(),
            pods: Vec::new(),
        };
        let node_table = make_node_status_table(&[status]);
        assert!(node_table.contains("node1"));
    }
}
