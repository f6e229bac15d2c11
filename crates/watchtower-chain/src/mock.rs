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


use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use ethers::types::{Address, H256, U256};
use parking_lot::Mutex;
use watchtower_utils::{Error, Result};

use crate::{ChainClient, ChainEvent, ChannelInfo, ContractCall, TxReceipt};

/// How the next submitted call ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MockOutcome {
    /// Mined with a successful receipt.
    #[default]
    Mined,
    /// Mined, but reverted.
    Reverted,
    /// The node refuses the transaction.
    SubmitFails,
    /// Accepted, then never mined.
    Dropped,
}

#[derive(Debug, Default)]
struct MockState {
    block_number: u64,
    channels: HashMap<H256, ChannelInfo>,
    channel_info_failures: usize,
    events: Vec<ChainEvent>,
    outcomes: VecDeque<MockOutcome>,
    pending: HashMap<H256, MockOutcome>,
    submitted: Vec<ContractCall>,
    mining_delay: Duration,
    mining: usize,
    peak_mining: usize,
}

/// A [`ChainClient`] whose chain is a script.
#[derive(Debug)]
pub struct MockChainClient {
    chain_id: U256,
    node_address: Address,
    state: Mutex<MockState>,
}

impl Default for MockChainClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChainClient {
    /// An empty chain at block zero.
    pub fn new() -> Self {
        Self {
            chain_id: U256::from(8888),
            node_address: Address::repeat_byte(0xee),
            state: Mutex::new(MockState::default()),
        }
    }

    /// Moves the chain head.
    pub fn set_block_number(&self, block_number: u64) {
        self.state.lock().block_number = block_number;
    }

    /// Sets what the contract reports for `channel_identifier`.
    pub fn set_channel(&self, channel_identifier: H256, info: ChannelInfo) {
        self.state.lock().channels.insert(channel_identifier, info);
    }

    /// Makes the next `n` channel lookups fail.
    pub fn fail_channel_info(&self, n: usize) {
        self.state.lock().channel_info_failures = n;
    }

    /// Adds an event to the log.
    pub fn push_event(&self, event: ChainEvent) {
        let mut state = self.state.lock();
        state.events.push(event);
        state.events.sort_by_key(ChainEvent::block_number);
    }

    /// Queues the outcome of the next submission; unscripted ones are mined.
    pub fn push_outcome(&self, outcome: MockOutcome) {
        self.state.lock().outcomes.push_back(outcome);
    }

    /// Makes every receipt take `delay` to arrive.
    pub fn set_mining_delay(&self, delay: Duration) {
        self.state.lock().mining_delay = delay;
    }

    /// Most receipts ever awaited at the same time.
    pub fn peak_mining(&self) -> usize {
        self.state.lock().peak_mining
    }

    /// Every call submitted so far, refused ones included.
    pub fn submitted(&self) -> Vec<ContractCall> {
        self.state.lock().submitted.clone()
    }
}

#[async_trait::async_trait]
impl ChainClient for MockChainClient {
    fn chain_id(&self) -> U256 {
        self.chain_id
    }

    fn node_address(&self) -> Address {
        self.node_address
    }

    async fn current_block_number(&self) -> Result<u64> {
        Ok(self.state.lock().block_number)
    }

    async fn channel_info(
        &self,
        channel_identifier: H256,
    ) -> Result<ChannelInfo> {
        let mut state = self.state.lock();
        if state.channel_info_failures > 0 {
            state.channel_info_failures -= 1;
            return Err(Error::Generic("mock: channel info unavailable"));
        }
        Ok(state
            .channels
            .get(&channel_identifier)
            .copied()
            .unwrap_or_default())
    }

    async fn submit(&self, call: &ContractCall) -> Result<H256> {
        let mut state = self.state.lock();
        state.submitted.push(call.clone());
        let outcome = state.outcomes.pop_front().unwrap_or_default();
        if outcome == MockOutcome::SubmitFails {
            return Err(Error::Generic("mock: transaction refused"));
        }
        let tx_hash = H256::from_low_u64_be(state.submitted.len() as u64);
        state.pending.insert(tx_hash, outcome);
        Ok(tx_hash)
    }

    async fn wait_mined(&self, tx_hash: H256) -> Result<TxReceipt> {
        let delay = {
            let mut state = self.state.lock();
            state.mining += 1;
            state.peak_mining = state.peak_mining.max(state.mining);
            state.mining_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock();
        state.mining -= 1;
        let block_number = state.block_number;
        match state.pending.remove(&tx_hash) {
            Some(MockOutcome::Mined) => Ok(TxReceipt {
                tx_hash,
                status: true,
                block_number,
            }),
            Some(MockOutcome::Reverted) => Ok(TxReceipt {
                tx_hash,
                status: false,
                block_number,
            }),
            _ => Err(Error::TransactionDropped { tx_hash }),
        }
    }

    async fn events(&self, from: u64, to: u64) -> Result<Vec<ChainEvent>> {
        Ok(self
            .state
            .lock()
            .events
            .iter()
            .filter(|e| (from..=to).contains(&e.block_number()))
            .cloned()
            .collect())
    }
}
