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

use crate::delegate::DelegateKey;

/// The action a monitor entry fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MonitorKind {
    /// Submit the balance proof (if any), then unlock every live lock.
    UnlockAndUpdateBalanceProof,
    /// Punish the partner for an obsolete unlock.
    Punish,
}

impl MonitorKind {
    /// Single byte tag used in storage keys.
    pub fn as_byte(&self) -> u8 {
        match self {
            Self::UnlockAndUpdateBalanceProof => 0,
            Self::Punish => 1,
        }
    }

    /// Inverse of [`MonitorKind::as_byte`].
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::UnlockAndUpdateBalanceProof),
            1 => Some(Self::Punish),
            _ => None,
        }
    }
}

/// A scheduled action for a delegate, due at `trigger_block`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MonitorEntry {
    /// Block at which the action becomes due.
    pub trigger_block: u64,
    /// What to run.
    pub kind: MonitorKind,
    /// Whom to run it for.
    pub delegate: DelegateKey,
}

impl MonitorEntry {
    /// Creates an entry.
    pub fn new(trigger_block: u64, kind: MonitorKind, delegate: DelegateKey) -> Self {
        Self {
            trigger_block,
            kind,
            delegate,
        }
    }
}
