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

//! Cluster-scheduling simulator for GPU-sharing workloads.
//!
//! The simulator replays a cluster description (nodes with CPU/memory/GPU capacity) and a
//! workload (pods, some requesting a fraction of a single GPU) through a pluggable
//! filter/score/reserve/bind pipeline, and reports where each pod landed, which pods failed
//! to schedule, and how much leftover GPU capacity is fragmented with respect to a
//! reference workload.
//!
//! The fragmentation machinery follows the algorithm in the paper:
//! Beware of Fragmentation: Scheduling GPU-Sharing Workloads with Fragmentation Gradient Descent.
//!
//! All bindings are synthetic. The simulator never executes pod workloads and never talks
//! to a real control plane.

pub mod scheduling;
pub mod simulator;

pub use scheduling::resources::{NodeResource, PodResource, MILLI};
pub use simulator::{simulate, SimulateResult, Simulation};
