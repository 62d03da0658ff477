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

//! GPU-fragmentation estimation against a reference workload.
//!
//! The approach follows the paper:
//! Beware of Fragmentation: Scheduling GPU-Sharing Workloads with Fragmentation Gradient Descent.
//!
//! Each (node, pod) pair is classified into one of seven categories describing how the pod
//! "sees" the node's leftover resources. Weighting the categories by the typical-pod
//! distribution turns leftover GPU millis into a fragmentation measure, and a Bellman-style
//! recursion over hypothetical placements yields the expected fragmentation a scheduling
//! decision would cause.

use std::fmt;

use dashmap::DashMap;
use log::{error, trace};

use super::resources::{NodeResource, NodeSignature, PodResource};
use super::workload::{SkylinePodList, TargetPodList};

// --------------------
// Categories
// --------------------

/// How a reference pod sees a node's leftover resources.
///
/// Q1-Q4 apply to GPU-requesting pods, XL/XR to CPU-only pods, and NoAccess to pods whose
/// required GPU model the node cannot offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FragCategory {
    /// Node lacks both GPU and CPU resources.
    Q1LackBoth,
    /// Node lacks GPU resources but has sufficient CPU.
    Q2LackGpu,
    /// Node satisfies both GPU and CPU requests.
    Q3Satisfied,
    /// Node has sufficient GPU resources but lacks CPU.
    Q4LackCpu,
    /// CPU-only pod, node has sufficient CPU.
    XlSatisfied,
    /// CPU-only pod, node lacks CPU.
    XrLackCpu,
    /// Node's GPU model does not match the pod's requirement.
    NoAccess,
}

impl FragCategory {
    pub const ALL: [FragCategory; 7] = [
        FragCategory::Q1LackBoth,
        FragCategory::Q2LackGpu,
        FragCategory::Q3Satisfied,
        FragCategory::Q4LackCpu,
        FragCategory::XlSatisfied,
        FragCategory::XrLackCpu,
        FragCategory::NoAccess,
    ];

    pub fn index(self) -> usize {
        match self {
            FragCategory::Q1LackBoth => 0,
            FragCategory::Q2LackGpu => 1,
            FragCategory::Q3Satisfied => 2,
            FragCategory::Q4LackCpu => 3,
            FragCategory::XlSatisfied => 4,
            FragCategory::XrLackCpu => 5,
            FragCategory::NoAccess => 6,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FragCategory::Q1LackBoth => "q1_lack_both",
            FragCategory::Q2LackGpu => "q2_lack_gpu",
            FragCategory::Q3Satisfied => "q3_satisfied",
            FragCategory::Q4LackCpu => "q4_lack_cpu",
            FragCategory::XlSatisfied => "xl_satisfied",
            FragCategory::XrLackCpu => "xr_lack_cpu",
            FragCategory::NoAccess => "no_access",
        }
    }
}

impl fmt::Display for FragCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --------------------
// Ratio and amount vectors
// --------------------

/// Per-category probability mass; entries sum to 1 across the reference distribution.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FragRatio(pub [f64; 7]);

impl FragRatio {
    pub fn add_ratio(&mut self, category: FragCategory, freq: f64) {
        self.0[category.index()] += freq;
    }

    pub fn sum_except_q3(&self) -> f64 {
        self.0
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != FragCategory::Q3Satisfied.index())
            .map(|(_, v)| v)
            .sum()
    }
}

impl fmt::Display for FragRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{:4.1}%", 100.0 * v)?;
        }
        write!(f, "]")
    }
}

/// Per-category GPU millis for one node (or, summed, for a whole cluster).
#[derive(Debug, Clone, PartialEq)]
pub struct FragAmount {
    pub node_name: String,
    pub data: [f64; 7],
}

impl FragAmount {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            data: [0.0; 7],
        }
    }

    fn add_by_category(&mut self, category: FragCategory, amount: f64) {
        self.data[category.index()] += amount;
    }

    /// Combine with another amount scaled by `gamma`, returning a fresh value.
    ///
    /// Value-returning on purpose: the combinators never alias or resize anybody's
    /// backing storage, so accumulating cluster totals stays a pure fold.
    pub fn add_gamma(&self, other: &FragAmount, gamma: f64) -> FragAmount {
        let mut out = self.clone();
        for (slot, v) in out.data.iter_mut().zip(other.data.iter()) {
            *slot += gamma * v;
        }
        out
    }

    pub fn add(&self, other: &FragAmount) -> FragAmount {
        self.add_gamma(other, 1.0)
    }

    pub fn sum_except_q3(&self) -> f64 {
        self.data
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != FragCategory::Q3Satisfied.index())
            .map(|(_, v)| v)
            .sum()
    }

    pub fn sum_q1_q2_q4(&self) -> f64 {
        self.data[FragCategory::Q1LackBoth.index()]
            + self.data[FragCategory::Q2LackGpu.index()]
            + self.data[FragCategory::Q4LackCpu.index()]
    }
}

impl fmt::Display for FragAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: [", self.node_name)?;
        for (i, v) in self.data.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{v:6.1}")?;
        }
        write!(f, "]")
    }
}

// --------------------
// Classification
// --------------------

/// Classify how `pod` sees `node`. Total: every input lands in exactly one category.
///
/// Memory is deliberately not part of the decision tree; the categories only describe the
/// CPU/GPU trade-off the fragmentation measure is built on.
pub fn node_pod_frag(node: &NodeResource, pod: &PodResource) -> FragCategory {
    // CPU-only pods (XL and XR cases).
    if pod.milli_gpu == 0 {
        return if node.milli_cpu_left >= pod.milli_cpu {
            FragCategory::XlSatisfied
        } else {
            FragCategory::XrLackCpu
        };
    }

    // Wrong GPU model (NA case). Capacity is judged separately below so that the
    // lack-GPU quadrants stay reachable.
    if !node.gpu_type_matches(pod) {
        return FragCategory::NoAccess;
    }

    if node.can_host_pod_on_gpu_memory(pod) {
        if node.milli_cpu_left >= pod.milli_cpu {
            FragCategory::Q3Satisfied
        } else {
            FragCategory::Q4LackCpu
        }
    } else if node.milli_cpu_left >= pod.milli_cpu {
        FragCategory::Q2LackGpu
    } else {
        FragCategory::Q1LackBoth
    }
}

/// GPU millis on the node too small to serve the pod: per-GPU leftovers `< pod.milli_gpu`,
/// summed.
pub fn gpu_frag_milli(node: &NodeResource, pod: &PodResource) -> i64 {
    node.milli_gpu_left_list
        .iter()
        .filter(|&&left| left < pod.milli_gpu)
        .sum()
}

/// Classify the node against every typical pod, collecting probability mass per category.
pub fn node_gpu_frag_ratio(node: &NodeResource, typical_pods: &TargetPodList) -> FragRatio {
    let mut ratio = FragRatio::default();
    for target in typical_pods {
        let freq = target.percentage;
        if !(0.0..=1.0).contains(&freq) {
            error!("typical pod {} has bad freq {freq}", target.resource);
            continue;
        }
        let category = node_pod_frag(node, &target.resource);
        trace!(
            "node {} x {} => {category} (freq {freq:.2})",
            node, target.resource
        );
        ratio.add_ratio(category, freq);
    }
    ratio
}

/// Ratio-weighted amount: each category's probability mass times the node's leftover GPU
/// millis. Coarser than [`node_gpu_share_frag_amount`]; kept for per-node reporting.
pub fn node_gpu_frag_amount(node: &NodeResource, typical_pods: &TargetPodList) -> FragAmount {
    let ratio = node_gpu_frag_ratio(node, typical_pods);
    let total = node.gpu_milli_left_total() as f64;
    let mut amount = FragAmount::new(node.node_name.clone());
    for (slot, v) in amount.data.iter_mut().zip(ratio.0.iter()) {
        *slot = v * total;
    }
    amount
}

/// Share-aware fragmentation amount of one node against the typical-pod distribution.
///
/// For a pod the node satisfies (Q3), the leftover GPU millis split into a fragment part
/// (per-GPU leftovers too small for the pod, charged to Q2) and the usable remainder,
/// which is charged to Q3 scaled by that same pod's probability. The Q3 charge follows
/// the original accounting even though it is not renormalized against the other
/// categories.
pub fn node_gpu_share_frag_amount(
    node: &NodeResource,
    typical_pods: &TargetPodList,
) -> FragAmount {
    let mut amount = FragAmount::new(node.node_name.clone());
    let gpu_milli_left_total = node.gpu_milli_left_total();

    for target in typical_pods {
        let freq = target.percentage;
        if !(0.0..=1.0).contains(&freq) {
            error!("typical pod {} has bad freq {freq}", target.resource);
            continue;
        }
        let category = node_pod_frag(node, &target.resource);
        if category == FragCategory::Q3Satisfied {
            let frag_milli = gpu_frag_milli(node, &target.resource);
            amount.add_by_category(FragCategory::Q2LackGpu, freq * frag_milli as f64);
            amount.add_by_category(
                FragCategory::Q3Satisfied,
                freq * (gpu_milli_left_total - frag_milli) as f64,
            );
        } else {
            amount.add_by_category(category, freq * gpu_milli_left_total as f64);
        }
    }
    amount
}

/// Scalar fragmentation score of a node: every charged milli that is not plain Q3 mass.
pub fn node_gpu_share_frag_score(node: &NodeResource, typical_pods: &TargetPodList) -> f64 {
    node_gpu_share_frag_amount(node, typical_pods).sum_except_q3()
}

/// Skyline check: 0 if any skyline pod still fits on the node, otherwise every leftover
/// GPU milli counts as wasted.
pub fn node_gpu_frag_based_on_skyline(node: &NodeResource, skyline: &SkylinePodList) -> i64 {
    let gpu_milli_left_total = node.gpu_milli_left_total();
    for pod in skyline {
        if node.milli_cpu_left >= pod.milli_cpu && node.can_host_pod_on_gpu_memory(pod) {
            return 0;
        }
    }
    gpu_milli_left_total
}

// --------------------
// Bellman recursion
// --------------------

/// Parameters of the expected-fragmentation recursion.
///
/// `gamma` discounts deeper placements; the default of 1.0 matches the reference
/// behavior and is kept configurable for reproducibility experiments.
/// `full_frag_cutoff` short-circuits nodes whose non-Q3 probability mass says the
/// leftover is fragmented for (almost) every reference pod.
#[derive(Debug, Clone, PartialEq)]
pub struct BellmanParams {
    pub gamma: f64,
    pub full_frag_cutoff: f64,
}

impl Default for BellmanParams {
    fn default() -> Self {
        Self {
            gamma: 1.0,
            full_frag_cutoff: 0.999,
        }
    }
}

/// Expected GPU millis this node will end up wasting, under random arrivals drawn from the
/// typical-pod distribution.
///
/// Memoized on the node's canonical signature; the map may be shared by concurrent
/// scorers (duplicate computation is tolerated, the stored value is always the same for a
/// given key). Callers start the recursion with `cum_prob = 1.0`.
pub fn node_gpu_frag_bellman(
    node: &NodeResource,
    typical_pods: &TargetPodList,
    memo: &DashMap<NodeSignature, f64>,
    params: &BellmanParams,
    cum_prob: f64,
) -> f64 {
    let key = node.flatten();
    if let Some(cached) = memo.get(&key) {
        return *cached;
    }

    let gpu_milli_left_total = node.gpu_milli_left_total() as f64;
    if gpu_milli_left_total == 0.0 {
        return 0.0;
    }
    // Branches this improbable cannot contribute a whole milli; cut them off.
    if gpu_milli_left_total * cum_prob < 1.0 {
        return 0.0;
    }

    let ratio = node_gpu_frag_ratio(node, typical_pods);
    let frag = if ratio.sum_except_q3() < params.full_frag_cutoff {
        let mut pv_sum = 0.0;
        for target in typical_pods {
            let p = target.percentage;
            match node.sub(&target.resource) {
                // r(s): the pod cannot land here, all leftover millis are lost to it.
                Err(err) => {
                    trace!("bellman stops at {node}: {err}");
                    pv_sum += gpu_milli_left_total * p;
                }
                Ok(next) => {
                    let v = node_gpu_frag_bellman(&next, typical_pods, memo, params, cum_prob * p);
                    pv_sum += v * p;
                }
            }
        }
        pv_sum * params.gamma
    } else {
        trace!("full frag ratio on {node}: {ratio}");
        gpu_milli_left_total
    };

    memo.insert(key, frag);
    frag
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduling::resources::MILLI;
    use crate::scheduling::workload::TargetPod;

    fn node(milli_cpu_left: i64, gpu_left: Vec<i64>) -> NodeResource {
        NodeResource {
            node_name: "node1".to_string(),
            milli_cpu: 8000,
            milli_cpu_left,
            memory: 16 << 30,
            memory_left: 16 << 30,
            milli_gpu_left_list: gpu_left,
            gpu_type: "V100".to_string(),
        }
    }

    fn pod(milli_cpu: i64, milli_gpu: i64) -> PodResource {
        PodResource {
            milli_cpu,
            memory: 0,
            milli_gpu,
            gpu_number: if milli_gpu > 0 { 1 } else { 0 },
            gpu_type: String::new(),
        }
    }

    fn targets(entries: &[(PodResource, f64)]) -> TargetPodList {
        entries
            .iter()
            .map(|(resource, percentage)| TargetPod {
                resource: resource.clone(),
                percentage: *percentage,
            })
            .collect()
    }

    #[test]
    fn test_category_decision_tree() {
        let n = node(2000, vec![500, 200]);
        assert_eq!(node_pod_frag(&n, &pod(1000, 0)), FragCategory::XlSatisfied);
        assert_eq!(node_pod_frag(&n, &pod(4000, 0)), FragCategory::XrLackCpu);
        assert_eq!(node_pod_frag(&n, &pod(1000, 400)), FragCategory::Q3Satisfied);
        assert_eq!(node_pod_frag(&n, &pod(4000, 400)), FragCategory::Q4LackCpu);
        assert_eq!(node_pod_frag(&n, &pod(1000, 800)), FragCategory::Q2LackGpu);
        assert_eq!(node_pod_frag(&n, &pod(4000, 800)), FragCategory::Q1LackBoth);

        let mut typed = pod(1000, 400);
        typed.gpu_type = "A100".to_string();
        assert_eq!(node_pod_frag(&n, &typed), FragCategory::NoAccess);
    }

    #[test]
    fn test_categorization_totality() {
        // Every (node, pod) combination lands in exactly one of the seven categories.
        let cpus = [0, 1000, 9000];
        let gpus = [0, 100, 500, MILLI];
        for &node_cpu in &cpus {
            for gpu_left in [vec![], vec![0], vec![300, 700]] {
                let n = node(node_cpu, gpu_left);
                for &pod_cpu in &cpus {
                    for &pod_gpu in &gpus {
                        let category = node_pod_frag(&n, &pod(pod_cpu, pod_gpu));
                        assert!(FragCategory::ALL.contains(&category));
                    }
                }
            }
        }
    }

    #[test]
    fn test_gpu_frag_milli() {
        let n = node(2000, vec![100, 500, 900]);
        assert_eq!(gpu_frag_milli(&n, &pod(0, 600)), 600);
        assert_eq!(gpu_frag_milli(&n, &pod(0, 50)), 0);
    }

    #[test]
    fn test_share_frag_amount_splits_q3() {
        // One satisfied pod with probability 1: fragment millis go to Q2, rest to Q3.
        let n = node(2000, vec![100, 500, 900]);
        let typical = targets(&[(pod(1000, 600), 1.0)]);
        let amount = node_gpu_share_frag_amount(&n, &typical);
        assert_eq!(amount.data[FragCategory::Q2LackGpu.index()], 600.0);
        assert_eq!(amount.data[FragCategory::Q3Satisfied.index()], 900.0);
        assert_eq!(node_gpu_share_frag_score(&n, &typical), 600.0);
    }

    #[test]
    fn test_share_frag_amount_unsatisfied_charges_all() {
        let n = node(2000, vec![100, 200]);
        let typical = targets(&[(pod(1000, 600), 0.5), (pod(9000, 0), 0.5)]);
        let amount = node_gpu_share_frag_amount(&n, &typical);
        assert_eq!(amount.data[FragCategory::Q2LackGpu.index()], 150.0);
        assert_eq!(amount.data[FragCategory::XrLackCpu.index()], 150.0);
        assert_eq!(amount.data[FragCategory::Q3Satisfied.index()], 0.0);
    }

    #[test]
    fn test_frag_amount_add_gamma_is_value_returning() {
        let mut a = FragAmount::new("a");
        a.add_by_category(FragCategory::Q2LackGpu, 100.0);
        let mut b = FragAmount::new("b");
        b.add_by_category(FragCategory::Q2LackGpu, 50.0);
        let combined = a.add_gamma(&b, 0.5);
        assert_eq!(combined.data[FragCategory::Q2LackGpu.index()], 125.0);
        // The receiver is untouched.
        assert_eq!(a.data[FragCategory::Q2LackGpu.index()], 100.0);
    }

    #[test]
    fn test_skyline_frag() {
        let n = node(2000, vec![500]);
        let fits = vec![pod(1000, 400)];
        assert_eq!(node_gpu_frag_based_on_skyline(&n, &fits), 0);
        let too_big = vec![pod(4000, 400), pod(1000, 800)];
        assert_eq!(node_gpu_frag_based_on_skyline(&n, &too_big), 500);
    }

    #[test]
    fn test_bellman_single_shape() {
        // Node [1000], one typical shape of 600m: after one placement the remaining 400m
        // cannot serve anyone, so the expected waste is 400.
        let n = node(8000, vec![MILLI]);
        let typical = targets(&[(pod(1000, 600), 1.0)]);
        let memo = DashMap::new();
        let frag =
            node_gpu_frag_bellman(&n, &typical, &memo, &BellmanParams::default(), 1.0);
        assert_eq!(frag, 400.0);
        assert!(memo.contains_key(&n.flatten()));
    }

    #[test]
    fn test_bellman_fully_fragmented_short_circuit() {
        let n = node(8000, vec![300]);
        let typical = targets(&[(pod(1000, 600), 1.0)]);
        let memo = DashMap::new();
        let frag =
            node_gpu_frag_bellman(&n, &typical, &memo, &BellmanParams::default(), 1.0);
        assert_eq!(frag, 300.0);
    }

    #[test]
    fn test_bellman_memo_hits_across_permuted_nodes() {
        let typical = targets(&[(pod(1000, 300), 0.6), (pod(2000, 700), 0.4)]);
        let memo = DashMap::new();
        let params = BellmanParams::default();
        let mut a = node(8000, vec![200, 900]);
        let va = node_gpu_frag_bellman(&a, &typical, &memo, &params, 1.0);
        a.milli_gpu_left_list = vec![900, 200];
        let entries_before = memo.len();
        let vb = node_gpu_frag_bellman(&a, &typical, &memo, &params, 1.0);
        assert_eq!(va, vb);
        assert_eq!(memo.len(), entries_before);
    }
}
