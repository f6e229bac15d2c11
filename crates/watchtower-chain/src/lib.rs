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


//! # Watchtower Chain Module ⛓️
//!
//! Everything the watchtower needs from the chain, behind the
//! [`ChainClient`] seam: reading channel state, submitting the three
//! delegated calls, waiting for their receipts, and reading token network
//! events. [`EthersChainClient`] talks to a node; the `mock` feature adds a
//! scripted client for tests.
//!
//! [`ChainEventWatcher`] turns the event log into one ordered stream of
//! [`ChainEvent`]s.

#![warn(missing_docs)]

use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Serialize};
use watchtower_types::{Delegate, Punish, Unlock};
use watchtower_utils::Result;

pub use watchtower_types::ChannelInfo;

/// Bindings of the token network contract.
pub mod contract;
/// An ethers backed [`ChainClient`].
pub mod ethers_client;
/// A scripted [`ChainClient`] for tests.
#[cfg(any(test, feature = "mock"))]
pub mod mock;
/// Polls the token network for events.
pub mod watcher;

pub use ethers_client::EthersChainClient;
pub use watcher::ChainEventWatcher;

/// A token network event, or the notice that a block was fully read.
///
/// Events are delivered in chain order; `NewBlock(n)` follows every event of
/// block `n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    /// A participant closed the channel.
    ChannelClosed {
        /// The closed channel.
        channel_identifier: H256,
        /// Who closed it.
        closing_participant: Address,
        /// Block of the event.
        block_number: u64,
    },
    /// A participant's balance proof was submitted after close.
    BalanceProofUpdated {
        /// The channel.
        channel_identifier: H256,
        /// Whose balance proof was updated.
        participant: Address,
        /// Block of the event.
        block_number: u64,
    },
    /// The channel was settled after its settle timeout.
    ChannelSettled {
        /// The channel.
        channel_identifier: H256,
        /// Block of the event.
        block_number: u64,
    },
    /// Both participants settled cooperatively.
    CooperativeSettled {
        /// The channel.
        channel_identifier: H256,
        /// Block of the event.
        block_number: u64,
    },
    /// Both participants withdrew cooperatively, reopening the channel.
    Withdrawn {
        /// The channel.
        channel_identifier: H256,
        /// Block of the event.
        block_number: u64,
    },
    /// Every event up to this block has been delivered.
    NewBlock(u64),
}

impl ChainEvent {
    /// The block the event belongs to.
    pub fn block_number(&self) -> u64 {
        match self {
            Self::ChannelClosed { block_number, .. }
            | Self::BalanceProofUpdated { block_number, .. }
            | Self::ChannelSettled { block_number, .. }
            | Self::CooperativeSettled { block_number, .. }
            | Self::Withdrawn { block_number, .. } => *block_number,
            Self::NewBlock(n) => *n,
        }
    }
}

/// One of the calls the watchtower makes on behalf of a delegator.
///
/// Serialized into the parameters of the execute record auditing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum ContractCall {
    /// `updateBalanceProofDelegate`
    UpdateBalanceProofDelegate {
        /// Token of the channel.
        token: Address,
        /// The closer, whose balance proof is submitted.
        partner: Address,
        /// The delegator.
        participant: Address,
        /// Transferred amount of the proof.
        transfer_amount: U256,
        /// Locksroot of the proof.
        locksroot: H256,
        /// Nonce of the proof.
        nonce: u64,
        /// Extra hash of the proof.
        extra_hash: H256,
        /// Closer signature.
        closing_signature: Bytes,
        /// Delegator signature.
        non_closing_signature: Bytes,
    },
    /// `unlockDelegate`
    UnlockDelegate {
        /// Token of the channel.
        token: Address,
        /// The delegator, receiving the unlocked amount.
        partner: Address,
        /// The participant that sent the lock.
        participant: Address,
        /// Transferred amount of the delegated balance proof.
        transfer_amount: U256,
        /// Lock expiration block.
        expiration: u64,
        /// Locked amount.
        amount: U256,
        /// Secret hash of the lock.
        secret_hash: H256,
        /// Merkle proof of the lock.
        merkle_proof: Bytes,
        /// Delegator signature.
        signature: Bytes,
    },
    /// `punishObsoleteUnlock`
    PunishObsoleteUnlock {
        /// Token of the channel.
        token: Address,
        /// The delegator.
        beneficiary: Address,
        /// The partner that unlocked a disposed lock.
        cheater: Address,
        /// Hash of the disposed lock.
        lock_hash: H256,
        /// Hash of the disposing message.
        additional_hash: H256,
        /// Partner signature.
        signature: Bytes,
    },
}

impl ContractCall {
    /// Submits the delegated balance proof of `delegate`.
    pub fn update_balance_proof(delegate: &Delegate) -> Self {
        let proof = &delegate.balance_proof;
        Self::UpdateBalanceProofDelegate {
            token: delegate.token_address,
            partner: delegate.partner_address,
            participant: delegate.delegator,
            transfer_amount: proof.transfer_amount,
            locksroot: proof.locksroot,
            nonce: proof.nonce,
            extra_hash: proof.extra_hash,
            closing_signature: proof.closing_signature.clone(),
            non_closing_signature: proof.non_closing_signature.clone(),
        }
    }

    /// Unlocks one lock of `delegate`.
    pub fn unlock(delegate: &Delegate, unlock: &Unlock) -> Self {
        Self::UnlockDelegate {
            token: delegate.token_address,
            partner: delegate.delegator,
            participant: delegate.partner_address,
            transfer_amount: delegate.balance_proof.transfer_amount,
            expiration: unlock.lock.expiration,
            amount: unlock.lock.amount,
            secret_hash: unlock.lock.secret_hash,
            merkle_proof: unlock.merkle_proof.clone(),
            signature: unlock.signature.clone(),
        }
    }

    /// Punishes the partner of `delegate` with `punish`.
    pub fn punish(delegate: &Delegate, punish: &Punish) -> Self {
        Self::PunishObsoleteUnlock {
            token: delegate.token_address,
            beneficiary: delegate.delegator,
            cheater: delegate.partner_address,
            lock_hash: punish.lock_hash,
            additional_hash: punish.additional_hash,
            signature: punish.signature.clone(),
        }
    }

    /// The contract method name.
    pub fn method(&self) -> &'static str {
        match self {
            Self::UpdateBalanceProofDelegate { .. } => {
                "updateBalanceProofDelegate"
            }
            Self::UnlockDelegate { .. } => "unlockDelegate",
            Self::PunishObsoleteUnlock { .. } => "punishObsoleteUnlock",
        }
    }

    /// The call as a json document for execute records.
    pub fn to_params(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// A mined transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxReceipt {
    /// Hash of the transaction.
    pub tx_hash: H256,
    /// Whether execution succeeded.
    pub status: bool,
    /// Block the transaction was mined in.
    pub block_number: u64,
}

/// What the watchtower needs from the chain.
#[async_trait::async_trait]
pub trait ChainClient: Send + Sync {
    /// Chain the token network lives on.
    fn chain_id(&self) -> U256;

    /// Address the watchtower sends transactions from.
    fn node_address(&self) -> Address;

    /// The latest block of the chain.
    async fn current_block_number(&self) -> Result<u64>;

    /// Settle and open block of `channel_identifier`.
    async fn channel_info(&self, channel_identifier: H256)
        -> Result<ChannelInfo>;

    /// Sends `call`, returning the transaction hash once the node accepted it.
    async fn submit(&self, call: &ContractCall) -> Result<H256>;

    /// Waits for `tx_hash` to be mined.
    async fn wait_mined(&self, tx_hash: H256) -> Result<TxReceipt>;

    /// Token network events in blocks `from..=to`, in chain order.
    async fn events(&self, from: u64, to: u64) -> Result<Vec<ChainEvent>>;
}
