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
//! # Watchtower Delegation 📨
//!
//! The operations the client-facing API calls: receiving a delegation,
//! reporting a delegate's status and the delegator's fee balance, and
//! crediting payments.

use ethers::types::{Address, H256, U256};
use serde::Serialize;
use watchtower_context::WatchtowerContext;
use watchtower_ledger as ledger;
use watchtower_store::{WatchtowerStore, WatchtowerStoreExt};
use watchtower_types::{
    Account, AnnounceDisposed, Delegate, DelegateKey, DelegationPayload,
    ExecuteRecord, Punish,
};
use watchtower_utils::{probe, Result};
use watchtower_verifier::{verify_delegation, VerifyContext};

/// Merging of verified delegations.
pub mod intake;

pub use intake::{
    disposed_of, finish_by_other, intake, refresh_need, release_need, Intake,
    IntakeSettings,
};

/// Result of [`DelegationService::receive_delegation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Stored, and the account covers every pending action.
    AcceptedWithSufficientFunds,
    /// Stored, but the account must be topped up before the actions run.
    AcceptedButUnderfunded,
    /// Nothing was stored.
    Rejected(String),
}

impl ReceiveOutcome {
    /// The three-way code reported to clients.
    pub fn status_code(&self) -> u8 {
        match self {
            Self::Rejected(_) => 1,
            Self::AcceptedButUnderfunded => 2,
            Self::AcceptedWithSufficientFunds => 3,
        }
    }

    /// Whether the delegation was stored.
    pub fn is_accepted(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }
}

/// Everything known about one delegate.
#[derive(Debug, Clone, Serialize)]
pub struct DelegateSnapshot {
    /// The delegate row.
    pub delegate: Delegate,
    /// Punish evidence received so far.
    pub punishes: Vec<Punish>,
    /// Locks the delegator gave up.
    pub announce_disposed: Vec<AnnounceDisposed>,
    /// Whether the delegator's account covers every pending action.
    pub funded: bool,
}

/// A delegator's fee position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeeInfo {
    /// What can still be locked.
    pub available: U256,
    /// Cost of every pending action.
    pub need: U256,
}

impl From<&Account> for FeeInfo {
    fn from(account: &Account) -> Self {
        Self {
            available: account.available(),
            need: account.need,
        }
    }
}

/// Entry point for delegations and queries about them.
#[derive(Clone)]
pub struct DelegationService<S> {
    ctx: WatchtowerContext<S>,
}

impl<S: WatchtowerStore + Clone> DelegationService<S> {
    /// Creates a service over `ctx`.
    pub fn new(ctx: WatchtowerContext<S>) -> Self {
        Self { ctx }
    }

    fn settings(&self) -> IntakeSettings {
        IntakeSettings::builder()
            .fees(*self.ctx.fees())
            .reveal_timeout(self.ctx.reveal_timeout())
            .debug(self.ctx.debug())
            .build()
    }

    /// Verifies `payload` against the channel on chain and merges it.
    ///
    /// Verification and intake failures become
    /// [`ReceiveOutcome::Rejected`]; only errors that leave the store in
    /// doubt are returned as `Err`.
    #[tracing::instrument(skip_all, fields(channel = ?payload.channel_identifier, ?delegator))]
    pub async fn receive_delegation(
        &self,
        payload: DelegationPayload,
        delegator: Address,
    ) -> Result<ReceiveOutcome> {
        let chain = self.ctx.chain();
        let on_chain = match chain.channel_info(payload.channel_identifier).await
        {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!("Failed to fetch channel info: {e}");
                return Ok(ReceiveOutcome::Rejected(e.to_string()));
            }
        };
        let verify_ctx = VerifyContext {
            chain_id: chain.chain_id(),
            watchtower_address: chain.node_address(),
            on_chain,
        };
        let settle_block_number =
            match verify_delegation(&payload, delegator, &verify_ctx) {
                Ok(settle) => settle,
                Err(e) => return Ok(reject(e)),
            };

        let settings = self.settings();
        let current_block = self.ctx.latest_block();
        let merged = self.ctx.store().transaction(|tx| {
            intake(
                tx,
                &settings,
                &payload,
                delegator,
                settle_block_number,
                current_block,
            )
        });
        let merged = match merged {
            Ok(merged) => merged,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => return Ok(reject(e)),
        };

        let funded = merged.account.is_funded();
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Delegation,
            created = merged.created,
            status = %merged.delegate.status,
            need = %merged.account.need,
            available = %merged.account.available(),
            funded,
        );
        Ok(if funded {
            ReceiveOutcome::AcceptedWithSufficientFunds
        } else {
            ReceiveOutcome::AcceptedButUnderfunded
        })
    }

    /// The delegate of `delegator` in `channel_identifier`, with its
    /// sub-records.
    pub fn query_delegate_status(
        &self,
        channel_identifier: H256,
        delegator: Address,
    ) -> Result<Option<DelegateSnapshot>> {
        let store = self.ctx.store();
        let key = DelegateKey::new(channel_identifier, delegator);
        let Some(delegate) = store.delegate(&key)? else {
            return Ok(None);
        };
        Ok(Some(DelegateSnapshot {
            delegate,
            punishes: store.punishes(&key)?,
            announce_disposed: store.announce_disposed(&key)?,
            funded: store.account(delegator)?.is_funded(),
        }))
    }

    /// Available balance and outstanding need of `delegator`.
    pub fn query_fee(&self, delegator: Address) -> Result<FeeInfo> {
        let account = self.ctx.store().account(delegator)?;
        Ok(FeeInfo::from(&account))
    }

    /// Audit trail of the calls made for a delegate, oldest first.
    pub fn query_execute_records(
        &self,
        channel_identifier: H256,
        delegator: Address,
    ) -> Result<Vec<ExecuteRecord>> {
        let key = DelegateKey::new(channel_identifier, delegator);
        self.ctx.store().execute_records(&key)
    }

    /// Records a payment of `amount` from `delegator`.
    pub fn credit(&self, delegator: Address, amount: U256) -> Result<FeeInfo> {
        let account = self
            .ctx
            .store()
            .transaction(|tx| ledger::credit(tx, delegator, amount))?;
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Ledger,
            ?delegator,
            %amount,
            available = %account.available(),
        );
        Ok(FeeInfo::from(&account))
    }
}

fn reject(e: watchtower_utils::Error) -> ReceiveOutcome {
    tracing::info!("Delegation rejected: {e}");
    ReceiveOutcome::Rejected(e.to_string())
}
