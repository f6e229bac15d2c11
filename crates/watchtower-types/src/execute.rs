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

use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

use crate::delegate::{Delegate, DelegateKey};

/// The on-chain call an execute record audits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, derive_more::Display)]
pub enum ExecuteKind {
    /// `updateBalanceProofDelegate`
    UpdateBalanceProof,
    /// `unlockDelegate`
    Unlock,
    /// `punishObsoleteUnlock`
    Punish,
}

/// Outcome of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecuteStatus {
    /// Fee locked, call not reconciled yet.
    NotExecuted,
    /// Mined with a successful receipt.
    SuccessFinished,
    /// Nothing had to be sent (disposed lock, or an earlier punish won).
    SuccessWithoutExecution,
    /// Submission, mining or the receipt failed.
    ErrorFinished,
}

/// One attempted on-chain call, kept for later queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteRecord {
    /// Ordering component of the storage key.
    pub id: u64,
    /// Channel the call was made for.
    pub channel_identifier: H256,
    /// Channel incarnation.
    pub open_block_number: u64,
    /// The delegator paying for the call.
    pub delegator: Address,
    /// Which call.
    pub kind: ExecuteKind,
    /// Where the attempt stands.
    pub status: ExecuteStatus,
    /// Error text of a failed attempt.
    pub error: String,
    /// Fee held by this attempt while `NotExecuted`.
    pub fee: U256,
    /// Serialized call parameters.
    pub params: serde_json::Value,
    /// Unix time the attempt started.
    pub execute_timestamp: u64,
    /// Hash of the submitted transaction.
    pub tx_hash: Option<H256>,
    /// Latest block when the transaction was created.
    pub tx_create_block: u64,
    /// Unix time the transaction was created.
    pub tx_create_timestamp: u64,
    /// Block the transaction was mined in.
    pub tx_pack_block: u64,
    /// Unix time the receipt was seen.
    pub tx_pack_timestamp: u64,
}

impl ExecuteRecord {
    /// A pending record for an attempt on behalf of `delegate`.
    pub fn new(
        id: u64,
        delegate: &Delegate,
        kind: ExecuteKind,
        params: serde_json::Value,
        fee: U256,
        current_block: u64,
    ) -> Self {
        let now = crate::unix_timestamp();
        Self {
            id,
            channel_identifier: delegate.channel_identifier,
            open_block_number: delegate.open_block_number,
            delegator: delegate.delegator,
            kind,
            status: ExecuteStatus::NotExecuted,
            error: String::new(),
            fee,
            params,
            execute_timestamp: now,
            tx_hash: None,
            tx_create_block: current_block,
            tx_create_timestamp: now,
            tx_pack_block: 0,
            tx_pack_timestamp: 0,
        }
    }

    /// A record for an action that needed no transaction.
    pub fn skipped(
        id: u64,
        delegate: &Delegate,
        kind: ExecuteKind,
        params: serde_json::Value,
        current_block: u64,
    ) -> Self {
        let mut record =
            Self::new(id, delegate, kind, params, U256::zero(), current_block);
        record.status = ExecuteStatus::SuccessWithoutExecution;
        record
    }

    /// The delegate this record belongs to.
    pub fn delegate_key(&self) -> DelegateKey {
        DelegateKey::new(self.channel_identifier, self.delegator)
    }

    /// Marks the attempt mined in `block`; the held fee is spent.
    pub fn finish_ok(&mut self, block: u64) {
        self.status = ExecuteStatus::SuccessFinished;
        self.tx_pack_block = block;
        self.tx_pack_timestamp = crate::unix_timestamp();
        self.fee = U256::zero();
    }

    /// Marks the attempt failed; the held fee is released.
    pub fn finish_err(&mut self, error: impl ToString) {
        self.status = ExecuteStatus::ErrorFinished;
        self.error = error.to_string();
        self.tx_pack_timestamp = crate::unix_timestamp();
        self.fee = U256::zero();
    }
}
