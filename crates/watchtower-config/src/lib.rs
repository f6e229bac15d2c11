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


#![warn(missing_docs)]

//! # Watchtower Configuration Module 🕸️
//!
//! A module for configuring the watchtower.
//!
//! ## Overview
//!
//! Possible configuration include:
//! * `chain`: the chain endpoint, signing key and token network contract.
//! * `delegation`: reveal timeout and debug relaxations of delegation intake.
//! * `fees`: what each on-chain action costs the delegator.
//! * `scheduler`: bounds of the action pool and event channel.

/// Chain configuration
pub mod chain;
/// CLI configuration
#[cfg(feature = "cli")]
pub mod cli;
/// Event watcher configuration
pub mod event_watcher;
/// Utils for processing configuration
pub mod utils;

use serde::{Deserialize, Serialize};
use watchtower_types::FeeSchedule;

use chain::ChainConfig;

/// The reveal timeout is set to `30` blocks by default.
const fn default_reveal_timeout() -> u64 {
    30
}
/// The action pool runs `16` actions at once by default.
const fn default_max_concurrent_actions() -> usize {
    16
}
/// The chain event channel buffers `1024` events by default.
const fn default_event_channel_capacity() -> usize {
    1024
}

/// WatchtowerConfig is the configuration for the watchtower.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct WatchtowerConfig {
    /// The chain the watched token network lives on.
    pub chain: ChainConfig,
    /// Delegation intake settings.
    #[serde(default)]
    pub delegation: DelegationConfig,
    /// Fee of each on-chain action, in fee token units.
    #[serde(default)]
    pub fees: FeeSchedule,
    /// Action scheduling settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl WatchtowerConfig {
    /// A config for `chain` with every other section at its default.
    pub fn new(chain: ChainConfig) -> Self {
        Self {
            chain,
            delegation: DelegationConfig::default(),
            fees: FeeSchedule::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

/// DelegationConfig controls how delegations are scheduled and merged.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct DelegationConfig {
    /// Blocks before settlement at which unlocks and the balance proof are submitted.
    #[serde(default = "default_reveal_timeout")]
    pub reveal_timeout: u64,
    /// Accepts equal or lower nonces and mismatching open block numbers.
    ///
    /// Only meant for test networks.
    #[serde(default)]
    pub debug: bool,
}

impl Default for DelegationConfig {
    fn default() -> Self {
        Self {
            reveal_timeout: default_reveal_timeout(),
            debug: false,
        }
    }
}

/// SchedulerConfig bounds the work the event loop can have in flight.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SchedulerConfig {
    /// Maximum number of delegate actions running at once.
    #[serde(default = "default_max_concurrent_actions")]
    pub max_concurrent_actions: usize,
    /// Capacity of the channel carrying chain events to the event loop.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_actions: default_max_concurrent_actions(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}
