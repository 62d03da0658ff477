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

//! Distills a raw workload into the two reference structures the fragmentation machinery
//! consumes:
//!
//! - the "typical pods" distribution: the most popular pod shapes, weighted, renormalized
//!   into a probability distribution;
//! - the "skyline pods": the Pareto frontier of pod shapes under (cpu ascending, gpu
//!   descending), a cheap answer to "could this node still serve anyone?".

use std::collections::HashMap;

use approx::abs_diff_eq;
use log::{error, info};
use serde::{Deserialize, Serialize};

use super::resources::{PodResource, MILLI};

pub const DEFAULT_POD_POPULARITY_THRESHOLD: i64 = 60;
pub const DEFAULT_POD_INCREASE_STEP: i64 = 10;

/// Pod-shape census buckets, reported while distilling.
const GPU_NUM_TYPE_LIST: [&str; 7] = [
    "PureCpu", "ShareGpu", "OneGpu", "TwoGpu", "FourGpu", "EightGpu", "Others",
];

/// One entry of the reference distribution: a pod shape and its probability mass.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetPod {
    pub resource: PodResource,
    pub percentage: f64,
}

pub type TargetPodList = Vec<TargetPod>;
pub type SkylinePodList = Vec<PodResource>;

/// Knobs for the typical-pod distillation.
///
/// A `pod_popularity_threshold` of 60 keeps growing the selected prefix (in steps of
/// `pod_increase_step` shapes) until the selected shapes cover 60% of the weighted
/// workload mass. Non-positive values fall back to the documented defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TypicalPodsConfig {
    pub is_involved_cpu_pods: bool,
    pub gpu_res_weight: f64,
    pub pod_popularity_threshold: i64,
    pub pod_increase_step: i64,
}

impl Default for TypicalPodsConfig {
    fn default() -> Self {
        Self {
            is_involved_cpu_pods: false,
            gpu_res_weight: 0.0,
            pod_popularity_threshold: DEFAULT_POD_POPULARITY_THRESHOLD,
            pod_increase_step: DEFAULT_POD_INCREASE_STEP,
        }
    }
}

fn census_bucket(pod: &PodResource) -> usize {
    match pod.gpu_number {
        0 => 0,
        1 => {
            if pod.milli_gpu < MILLI {
                1
            } else {
                2
            }
        }
        2 => 3,
        4 => 4,
        8 => 5,
        _ => 6,
    }
}

/// Aggregate the workload into the typical-pod distribution.
///
/// Pods requesting a full GPU are weighted `1 + gpu_number * gpu_res_weight`; everything
/// else counts once. CPU-only pods are skipped unless `is_involved_cpu_pods` is set. The
/// result is sorted by descending weighted count (ties broken by the pod shape's total
/// order, which keeps the distribution deterministic), grown until the popularity
/// threshold is met, then renormalized so the selected percentages sum to 1.
pub fn typical_pods(pods: &[PodResource], config: &TypicalPodsConfig) -> TargetPodList {
    let mut counts: HashMap<PodResource, f64> = HashMap::new();
    let mut census = [0i64; 7];
    let mut total = 0.0f64;

    for pod in pods {
        if !config.is_involved_cpu_pods && pod.gpu_number == 0 {
            continue;
        }
        let mut weighted = 1.0;
        if config.gpu_res_weight > 0.0 && pod.milli_gpu == MILLI {
            weighted = 1.0 + pod.gpu_number as f64 * config.gpu_res_weight;
        }
        *counts.entry(pod.clone()).or_insert(0.0) += weighted;
        total += weighted;
        census[census_bucket(pod)] += 1;
    }

    if counts.is_empty() || total <= 0.0 {
        return Vec::new();
    }

    info!("num of workload pods considered: {}", pods.len());
    for (name, count) in GPU_NUM_TYPE_LIST.iter().zip(census.iter()) {
        info!(
            "  {} pods: {} ({:.2}%)",
            name,
            count,
            100.0 * *count as f64 / total
        );
    }

    let mut list: TargetPodList = counts
        .into_iter()
        .map(|(resource, count)| TargetPod {
            resource,
            percentage: count,
        })
        .collect();
    // Descending count; equal counts fall back to the shape ordering so that two runs
    // over the same workload always emit the same list.
    list.sort_by(|a, b| {
        b.percentage
            .partial_cmp(&a.percentage)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.resource.cmp(&b.resource))
    });
    info!("num of distinct pod shapes: {}", list.len());

    let threshold = if config.pod_popularity_threshold > 0 {
        config.pod_popularity_threshold
    } else {
        DEFAULT_POD_POPULARITY_THRESHOLD
    };
    let step = if config.pod_increase_step > 0 {
        config.pod_increase_step as usize
    } else {
        DEFAULT_POD_INCREASE_STEP as usize
    };

    let expected_mass = threshold as f64 * total / 100.0;
    let mut i = 0usize;
    let mut pod_res_num = 0usize;
    let mut cum_mass = 0.0f64;
    while cum_mass < expected_mass && i < list.len() {
        pod_res_num += step;
        while i < pod_res_num && i < list.len() {
            cum_mass += list[i].percentage;
            list[i].percentage /= total;
            i += 1;
        }
    }
    info!(
        "selected top {} pod shapes, accounting for {:.2}% of all pods",
        i,
        100.0 * cum_mass / total
    );

    if i >= list.len() {
        return list;
    }

    // Chop at the i-th shape and renormalize the survivors to sum to 1.
    let mut out: TargetPodList = list[..i].to_vec();
    let selected_fraction = cum_mass / total;
    let mut cum_pct = 0.0;
    for target in &mut out {
        target.percentage /= selected_fraction;
        cum_pct += target.percentage;
    }
    if !abs_diff_eq!(cum_pct, 1.0, epsilon = 1e-3) {
        error!("renormalization failed ({cum_pct:.4} != 1.0)");
    }
    out
}

/// The Pareto frontier of pod shapes under "strictly more CPU and strictly less GPU".
///
/// Shapes are sorted by (cpu ascending, gpu ascending) and swept once; a shape joins the
/// skyline iff it asks for strictly more CPU and strictly less GPU than the last accepted
/// one. An empty workload yields an empty skyline.
pub fn skyline_pods(pods: &[PodResource]) -> SkylinePodList {
    let mut shapes: Vec<PodResource> = pods.to_vec();
    shapes.sort_by(|a, b| {
        a.milli_cpu
            .cmp(&b.milli_cpu)
            .then(a.milli_gpu.cmp(&b.milli_gpu))
    });

    let mut skyline: SkylinePodList = Vec::new();
    for shape in shapes {
        match skyline.last() {
            None => skyline.push(shape),
            Some(last) if shape.milli_cpu > last.milli_cpu && shape.milli_gpu < last.milli_gpu => {
                skyline.push(shape)
            }
            _ => {}
        }
    }
    info!("number of skyline pods: {}", skyline.len());
    skyline
}
