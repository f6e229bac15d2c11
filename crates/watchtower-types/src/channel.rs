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

/// What the token network contract reports about a channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    /// Block at which the channel becomes settleable, zero while open.
    pub settle_block_number: u64,
    /// Block at which the current incarnation was opened, zero if none.
    pub open_block_number: u64,
}

impl ChannelInfo {
    /// Whether the channel exists on chain.
    pub fn exists(&self) -> bool {
        self.open_block_number != 0
    }

    /// Whether the channel was closed and awaits settlement.
    pub fn is_closed(&self) -> bool {
        self.settle_block_number != 0
    }
}
