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


use std::sync::Arc;

use ethers::types::{Address, H256, U256};
use tokio::sync::mpsc;
use watchtower_chain::mock::MockChainClient;
use watchtower_chain::ChainEvent;
use watchtower_config::chain::ChainConfig;
use watchtower_config::WatchtowerConfig;
use watchtower_context::WatchtowerContext;
use watchtower_delegation::{intake, IntakeSettings};
use watchtower_store::{InMemoryStore, WatchtowerStore, WatchtowerStoreExt};
use watchtower_types::{
    Account, BalanceProof, ChannelInfo, Delegate, DelegateKey,
    DelegationPayload, ExecuteRecord, Lock, Unlock,
};
use watchtower_utils::Result;

use crate::ChainEventLoop;

pub const CHANNEL: H256 = H256::repeat_byte(0xcc);
pub const DELEGATOR: Address = Address::repeat_byte(0xd1);
pub const PARTNER: Address = Address::repeat_byte(0xb0);

pub struct Harness {
    pub ctx: WatchtowerContext<InMemoryStore>,
    pub chain: Arc<MockChainClient>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(tweak: impl FnOnce(&mut WatchtowerConfig)) -> Self {
        let chain = Arc::new(MockChainClient::new());
        let mut config = WatchtowerConfig::new(ChainConfig::new(
            url::Url::parse("http://localhost:8545").unwrap().into(),
            8888,
            H256::repeat_byte(1).into(),
            Address::repeat_byte(2),
        ));
        tweak(&mut config);
        let ctx = WatchtowerContext::new(
            config,
            InMemoryStore::default(),
            chain.clone(),
        )
        .unwrap();
        Self { ctx, chain }
    }

    pub fn key(&self) -> DelegateKey {
        DelegateKey::new(CHANNEL, DELEGATOR)
    }

    pub fn unlock(byte: u8) -> Unlock {
        Unlock {
            lock: Lock {
                expiration: 9_000,
                amount: U256::from(10),
                secret_hash: H256::repeat_byte(byte),
            },
            ..Default::default()
        }
    }

    /// A payload with `nonce` and `unlocks` locks, secret hashes 1, 2, ...
    pub fn payload(&self, nonce: u64, unlocks: u8) -> DelegationPayload {
        DelegationPayload {
            channel_identifier: CHANNEL,
            open_block_number: 42,
            token_address: Address::repeat_byte(0x70),
            partner_address: PARTNER,
            update_transfer: BalanceProof {
                nonce,
                transfer_amount: U256::from(100),
                ..Default::default()
            },
            unlocks: (1..=unlocks).map(Self::unlock).collect(),
            ..Default::default()
        }
    }

    /// Merges `payload` as if it had passed verification.
    pub fn delegate(&self, payload: DelegationPayload, settle: u64) -> DelegateKey {
        self.delegate_as(payload, DELEGATOR, settle)
    }

    pub fn delegate_as(
        &self,
        payload: DelegationPayload,
        delegator: Address,
        settle: u64,
    ) -> DelegateKey {
        let settings = IntakeSettings::builder()
            .fees(*self.ctx.fees())
            .reveal_timeout(self.ctx.reveal_timeout())
            .build();
        self.ctx
            .store()
            .transaction(|tx| intake(tx, &settings, &payload, delegator, settle, 100))
            .unwrap();
        DelegateKey::new(CHANNEL, delegator)
    }

    pub fn credit(&self, amount: u64) {
        self.credit_to(DELEGATOR, amount)
    }

    pub fn credit_to(&self, delegator: Address, amount: u64) {
        self.ctx
            .store()
            .transaction(|tx| watchtower_ledger::credit(tx, delegator, U256::from(amount)))
            .unwrap();
    }

    pub fn close_on_chain(&self, settle: u64) {
        self.chain.set_channel(
            CHANNEL,
            ChannelInfo {
                settle_block_number: settle,
                open_block_number: 42,
            },
        );
    }

    pub fn account(&self) -> Account {
        self.ctx.store().account(DELEGATOR).unwrap()
    }

    pub fn stored(&self) -> Option<Delegate> {
        self.ctx.store().delegate(&self.key()).unwrap()
    }

    pub fn records(&self) -> Vec<ExecuteRecord> {
        self.ctx.store().execute_records(&self.key()).unwrap()
    }

    pub fn methods(&self) -> Vec<&'static str> {
        self.chain.submitted().iter().map(|c| c.method()).collect()
    }

    /// Feeds `events` through a fresh event loop and waits for every action
    /// it dispatched.
    pub async fn run(&self, events: Vec<ChainEvent>) -> Result<()> {
        let (tx, rx) = mpsc::channel(events.len() + 1);
        for event in events {
            tx.send(event).await.unwrap();
        }
        drop(tx);
        ChainEventLoop::new(self.ctx.clone()).run(rx).await
    }
}

pub fn closed_by(closer: Address, block_number: u64) -> ChainEvent {
    ChainEvent::ChannelClosed {
        channel_identifier: CHANNEL,
        closing_participant: closer,
        block_number,
    }
}
