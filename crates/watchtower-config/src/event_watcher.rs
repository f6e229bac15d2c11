// Copyright 2022 Webb Technologies Inc.
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


use serde::{Deserialize, Serialize};

/// The events watcher polls every `7_000`ms by default.
const fn default_polling_interval() -> u64 {
    7_000
}
/// Events watcher is enabled by default.
const fn enable_events_watcher_default() -> bool {
    true
}
/// The maximum events per step is set to `100` by default.
const fn max_blocks_per_step_default() -> u64 {
    100
}
/// The print progress interval is set to `7_000` by default.
const fn print_progress_interval_default() -> u64 {
    7_000
}

/// EventsWatchConfig is the configuration for the events watch.
#[derive(Debug, Clone, Serialize, Deserialize, Copy)]
#[serde(rename_all = "kebab-case")]
pub struct EventsWatcherConfig {
    /// if it is enabled for this chain or not.
    #[serde(default = "enable_events_watcher_default")]
    pub enabled: bool,
    /// Polling interval in milliseconds
    #[serde(default = "default_polling_interval")]
    pub polling_interval: u64,
    /// The maximum number of blocks to query logs for in one request.
    #[serde(default = "max_blocks_per_step_default")]
    pub max_blocks_per_step: u64,
    /// print sync progress frequency in milliseconds
    /// if it is zero, means no progress will be printed.
    #[serde(default = "print_progress_interval_default")]
    pub print_progress_interval: u64,
}

impl Default for EventsWatcherConfig {
    fn default() -> Self {
        Self {
            enabled: enable_events_watcher_default(),
            polling_interval: default_polling_interval(),
            max_blocks_per_step: max_blocks_per_step_default(),
            print_progress_interval: print_progress_interval_default(),
        }
    }
}
