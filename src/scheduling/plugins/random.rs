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

//! Random scoring, used as a baseline. The score is uniform in `[0, 100]` but seeded from
//! `(pod uid, node name)`, so a rerun of the same simulation reproduces it exactly.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{
    PluginError, ScoreContext, ScorePlugin, MAX_NODE_SCORE, MIN_NODE_SCORE, RANDOM_SCORE_PLUGIN,
};

pub struct RandomScorePlugin;

impl ScorePlugin for RandomScorePlugin {
    fn name(&self) -> &'static str {
        RANDOM_SCORE_PLUGIN
    }

    fn score(&self, ctx: &ScoreContext<'_>) -> Result<i64, PluginError> {
        if ctx.pod_res.requests_nothing() {
            return Ok(MAX_NODE_SCORE);
        }
        let mut hasher = DefaultHasher::new();
        ctx.pod_uid.hash(&mut hasher);
        ctx.node.node_name.hash(&mut hasher);
        let mut rng = StdRng::seed_from_u64(hasher.finish());
        Ok(rng.gen_range(MIN_NODE_SCORE..=MAX_NODE_SCORE))
    }
}
