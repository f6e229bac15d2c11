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

use std::collections::HashSet;

use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

use crate::monitor::{MonitorEntry, MonitorKind};
use crate::payload::{BalanceProof, DelegationPayload, Secret, Unlock};
use crate::FeeSchedule;

/// Identifies a delegate: one delegator in one channel.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct DelegateKey {
    /// The protected channel.
    pub channel_identifier: H256,
    /// The client that delegated.
    pub delegator: Address,
}

impl DelegateKey {
    /// Creates a key for `delegator` in `channel_identifier`.
    pub fn new(channel_identifier: H256, delegator: Address) -> Self {
        Self {
            channel_identifier,
            delegator,
        }
    }
}

impl std::fmt::Display for DelegateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}@{:?}", self.delegator, self.channel_identifier)
    }
}

/// Where a delegate is in its lifecycle.
///
/// `Init -> Running -> {SuccessFinished | PartialSuccess | Failed}`, and
/// `Init -> SuccessFinishedByOther` when the delegator or partner acted first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, derive_more::Display,
)]
pub enum DelegateStatus {
    /// Accepted, nothing executed yet.
    #[default]
    Init,
    /// An action pass is in flight.
    Running,
    /// Every attempted action succeeded.
    SuccessFinished,
    /// Some actions succeeded, some failed.
    PartialSuccess,
    /// Nothing succeeded.
    Failed,
    /// Someone else already submitted the balance proof.
    SuccessFinishedByOther,
}

impl DelegateStatus {
    /// Whether the balance proof and unlocks can still be replaced.
    pub fn is_mutable(&self) -> bool {
        matches!(self, Self::Init)
    }
}

/// Result of the punish pass of a delegate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PunishOutcome {
    /// No punish pass ran yet.
    #[default]
    NotRun,
    /// One punish succeeded.
    Punished,
    /// Every punish attempt failed.
    AllFailed,
}

/// A persisted delegation for one `(channel, delegator)` pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegate {
    /// The protected channel.
    pub channel_identifier: H256,
    /// The client that delegated.
    pub delegator: Address,
    /// Open block of the channel incarnation this delegate belongs to.
    pub open_block_number: u64,
    /// Token of the channel.
    pub token_address: Address,
    /// Counterparty of the delegator.
    pub partner_address: Address,
    /// Block at which the channel becomes settleable, `0` while unknown.
    pub settle_block_number: u64,
    /// Lifecycle state.
    pub status: DelegateStatus,
    /// Last error seen while executing.
    pub error: String,
    /// Balance proof to submit, zero nonce when none.
    pub balance_proof: BalanceProof,
    /// Locks to release.
    pub unlocks: Vec<Unlock>,
    /// Secrets known to the delegator.
    pub secrets: Vec<Secret>,
    /// Number of stored punish records.
    pub punish_count: u32,
    /// How the punish pass went.
    pub punish_outcome: PunishOutcome,
    /// Fee need this delegate contributes to the account.
    pub need: U256,
    /// Latest block observed when the delegation was last updated.
    pub delegate_block_number: u64,
    /// Unix time of the last update.
    pub delegate_timestamp: u64,
}

impl Delegate {
    /// A fresh delegate built from a verified payload.
    pub fn from_payload(
        payload: &DelegationPayload,
        delegator: Address,
        settle_block_number: u64,
        block_number: u64,
    ) -> Self {
        Self {
            channel_identifier: payload.channel_identifier,
            delegator,
            open_block_number: payload.open_block_number,
            token_address: payload.token_address,
            partner_address: payload.partner_address,
            settle_block_number,
            status: DelegateStatus::Init,
            error: String::new(),
            balance_proof: payload.update_transfer.clone(),
            unlocks: payload.unlocks.clone(),
            secrets: payload.secrets.clone(),
            punish_count: 0,
            punish_outcome: PunishOutcome::NotRun,
            need: U256::zero(),
            delegate_block_number: block_number,
            delegate_timestamp: crate::unix_timestamp(),
        }
    }

    /// The storage identity of this delegate.
    pub fn key(&self) -> DelegateKey {
        DelegateKey::new(self.channel_identifier, self.delegator)
    }

    /// Whether a balance proof was delegated.
    pub fn has_balance_proof(&self) -> bool {
        self.balance_proof.nonce > 0
    }

    /// Unlocks whose secret hash was not announced as disposed.
    pub fn live_unlocks<'a>(
        &'a self,
        disposed: &'a HashSet<H256>,
    ) -> impl Iterator<Item = &'a Unlock> + 'a {
        self.unlocks
            .iter()
            .filter(move |u| !disposed.contains(&u.lock.secret_hash))
    }

    /// Total fee of every action this delegate may still trigger.
    ///
    /// The balance proof counts only while it can still be submitted by the
    /// watchtower. Punishes count once, and only until the punish pass has run.
    pub fn compute_need(
        &self,
        fees: &FeeSchedule,
        disposed: &HashSet<H256>,
    ) -> U256 {
        let mut need = U256::zero();
        if self.has_balance_proof() && self.status.is_mutable() {
            need += fees.update_balance_proof_fee();
        }
        let live = self.live_unlocks(disposed).count();
        need += fees.unlock_fee() * U256::from(live);
        if self.punish_count > 0 && self.punish_outcome == PunishOutcome::NotRun {
            need += fees.punish_fee();
        }
        need
    }

    /// Monitor entries this delegate needs once its settle block is known.
    ///
    /// Unlocks (and the balance proof) fire `reveal_timeout` blocks before
    /// settlement, punishes at settlement.
    pub fn monitor_plan(&self, reveal_timeout: u64) -> Vec<MonitorEntry> {
        let mut plan = Vec::new();
        if self.settle_block_number == 0 {
            return plan;
        }
        let key = self.key();
        let unlock_block =
            self.settle_block_number.saturating_sub(reveal_timeout);
        let wants_unlock = match self.status {
            DelegateStatus::Init => {
                self.has_balance_proof() || !self.unlocks.is_empty()
            }
            DelegateStatus::SuccessFinishedByOther => !self.unlocks.is_empty(),
            _ => false,
        };
        if wants_unlock {
            plan.push(MonitorEntry::new(
                unlock_block,
                MonitorKind::UnlockAndUpdateBalanceProof,
                key,
            ));
        }
        if self.punish_count > 0 && self.punish_outcome == PunishOutcome::NotRun
        {
            plan.push(MonitorEntry::new(
                self.settle_block_number,
                MonitorKind::Punish,
                key,
            ));
        }
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::Lock;

    fn delegate() -> Delegate {
        let payload = DelegationPayload {
            channel_identifier: H256::repeat_byte(1),
            open_block_number: 10,
            token_address: Address::repeat_byte(2),
            partner_address: Address::repeat_byte(3),
            update_transfer: BalanceProof {
                nonce: 1,
                ..Default::default()
            },
            unlocks: vec![
                Unlock {
                    lock: Lock {
                        expiration: 100,
                        amount: 5.into(),
                        secret_hash: H256::repeat_byte(7),
                    },
                    ..Default::default()
                },
                Unlock {
                    lock: Lock {
                        expiration: 100,
                        amount: 6.into(),
                        secret_hash: H256::repeat_byte(8),
                    },
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        Delegate::from_payload(&payload, Address::repeat_byte(4), 0, 1)
    }

    #[test]
    fn need_counts_live_unlocks_and_one_punish() {
        let fees = FeeSchedule::default();
        let mut d = delegate();
        let none = HashSet::new();
        assert_eq!(d.compute_need(&fees, &none), U256::from(3 + 2));
        d.punish_count = 3;
        assert_eq!(d.compute_need(&fees, &none), U256::from(3 + 2 + 2));
        let disposed = HashSet::from([H256::repeat_byte(7)]);
        assert_eq!(d.compute_need(&fees, &disposed), U256::from(3 + 1 + 2));
        d.status = DelegateStatus::SuccessFinishedByOther;
        assert_eq!(d.compute_need(&fees, &disposed), U256::from(1 + 2));
    }

    #[test]
    fn plan_is_empty_until_settle_block_known() {
        assert!(delegate().monitor_plan(30).is_empty());
    }

    #[test]
    fn plan_schedules_unlock_before_settle_and_punish_at_settle() {
        let mut d = delegate();
        d.settle_block_number = 10_000;
        d.punish_count = 1;
        let plan = d.monitor_plan(30);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].trigger_block, 9_970);
        assert_eq!(plan[0].kind, MonitorKind::UnlockAndUpdateBalanceProof);
        assert_eq!(plan[1].trigger_block, 10_000);
        assert_eq!(plan[1].kind, MonitorKind::Punish);
    }

    #[test]
    fn self_closer_without_locks_only_gets_punish() {
        let mut d = delegate();
        d.settle_block_number = 500;
        d.status = DelegateStatus::SuccessFinishedByOther;
        d.unlocks.clear();
        d.punish_count = 1;
        let plan = d.monitor_plan(30);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].kind, MonitorKind::Punish);
    }

    #[test]
    fn embedded_payload_survives_storage_encoding() {
        let mut d = delegate();
        d.settle_block_number = 77;
        d.secrets.push(Secret {
            secret: H256::repeat_byte(9),
            register_block: 3,
        });
        let bytes = serde_json::to_vec(&d).unwrap();
        let decoded: Delegate = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, d);
    }
}
