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


//! Merging a verified delegation into the store.

use std::collections::HashSet;

use ethers::types::{Address, H256, U256};
use watchtower_ledger as ledger;
use watchtower_store::{StoreTransaction, StoreTransactionExt};
use watchtower_types::{
    Account, Delegate, DelegateKey, DelegateStatus, DelegationPayload,
    FeeSchedule, MonitorKind, PunishOutcome,
};
use watchtower_utils::{Error, Result};

/// Knobs that shape how a delegation is merged.
#[derive(Debug, Clone, Copy, typed_builder::TypedBuilder)]
pub struct IntakeSettings {
    /// Fees charged per action.
    #[builder(default)]
    pub fees: FeeSchedule,
    /// Blocks before settlement at which unlocks fire.
    #[builder(default = 30)]
    pub reveal_timeout: u64,
    /// Accept equal or lower nonces and other incarnations of the channel.
    #[builder(default)]
    pub debug: bool,
}

/// What [`intake`] left behind.
#[derive(Debug, Clone)]
pub struct Intake {
    /// The merged delegate.
    pub delegate: Delegate,
    /// The delegator's account after the need was adjusted.
    pub account: Account,
    /// Whether the delegate was created by this intake.
    pub created: bool,
}

/// Merges `payload` from `delegator` inside `tx`.
///
/// Punishes and announce-disposed records are appended, deduplicated by
/// lock hash and secret hash. The balance proof and the unlocks it commits
/// to are replaced together, and only while the delegate is still `Init`
/// and the nonce moves forward. The delegate's share of the account's need
/// is recomputed and the difference applied to the ledger. When the settle
/// block is known the delegate's monitor entries are registered.
pub fn intake(
    tx: &dyn StoreTransaction,
    settings: &IntakeSettings,
    payload: &DelegationPayload,
    delegator: Address,
    settle_block_number: u64,
    current_block: u64,
) -> Result<Intake> {
    let key = DelegateKey::new(payload.channel_identifier, delegator);
    let existing = tx.delegate(&key)?;

    if let Some(stored) = &existing {
        if stored.open_block_number != payload.open_block_number
            && !settings.debug
        {
            return Err(Error::StaleOpenBlockNumber {
                stored: stored.open_block_number,
                claimed: payload.open_block_number,
            });
        }
    }

    let mut new_punishes = 0u32;
    for punish in &payload.punishes {
        if !tx.has_punish(&key, &punish.lock_hash)? {
            tx.save_punish(&key, punish)?;
            new_punishes += 1;
        }
    }
    for announce in &payload.announce_disposed {
        if !tx.has_announce_disposed(&key, &announce.secret_hash)? {
            tx.save_announce_disposed(&key, announce)?;
        }
    }

    let created = existing.is_none();
    let mut replaced = created;
    let mut delegate = match existing {
        None => Delegate::from_payload(
            payload,
            delegator,
            settle_block_number,
            current_block,
        ),
        Some(mut delegate) => {
            if delegate.open_block_number != payload.open_block_number {
                tracing::warn!(
                    %key,
                    stored = delegate.open_block_number,
                    claimed = payload.open_block_number,
                    "Debug mode: taking over another channel incarnation",
                );
                delegate.open_block_number = payload.open_block_number;
            }
            if delegate.status.is_mutable() && payload.has_balance_proof() {
                replaced = accept_nonce(
                    delegate.balance_proof.nonce,
                    payload.update_transfer.nonce,
                    settings.debug,
                )?;
                if replaced {
                    delegate.balance_proof = payload.update_transfer.clone();
                    delegate.unlocks = payload.unlocks.clone();
                }
            }
            if !payload.secrets.is_empty() {
                delegate.secrets = payload.secrets.clone();
            }
            if delegate.settle_block_number == 0 {
                delegate.settle_block_number = settle_block_number;
            }
            delegate.token_address = payload.token_address;
            delegate.partner_address = payload.partner_address;
            delegate.delegate_block_number = current_block;
            delegate.delegate_timestamp = watchtower_types::unix_timestamp();
            delegate
        }
    };

    let punishes_appeared = delegate.punish_count == 0 && new_punishes > 0;
    delegate.punish_count += new_punishes;

    let account = if delegate.status.is_mutable() {
        refresh_need(tx, &settings.fees, &mut delegate)?
    } else if punishes_appeared
        && delegate.punish_outcome == PunishOutcome::NotRun
    {
        let old_need = delegate.need;
        delegate.need = old_need.saturating_add(settings.fees.punish_fee());
        ledger::apply_need_delta(tx, delegator, old_need, delegate.need)?
    } else {
        tx.account(delegator)?
    };

    for entry in delegate.monitor_plan(settings.reveal_timeout) {
        let wanted = match entry.kind {
            MonitorKind::UnlockAndUpdateBalanceProof => replaced,
            MonitorKind::Punish => created || punishes_appeared,
        };
        if wanted {
            tx.add_monitor(&entry)?;
        }
    }
    tx.save_delegate(&delegate)?;

    Ok(Intake {
        delegate,
        account,
        created,
    })
}

/// Whether a balance proof with nonce `claimed` may replace `stored`.
///
/// `Ok(false)` means the delegation is a resubmission of the stored state.
fn accept_nonce(stored: u64, claimed: u64, debug: bool) -> Result<bool> {
    if claimed > stored || (debug && claimed != stored) {
        Ok(true)
    } else if claimed == stored {
        Ok(debug)
    } else {
        Err(Error::StaleNonce { stored, claimed })
    }
}

/// Recomputes the need of `delegate` from scratch and applies the
/// difference to its delegator's account. The caller saves the delegate.
pub fn refresh_need(
    tx: &dyn StoreTransaction,
    fees: &FeeSchedule,
    delegate: &mut Delegate,
) -> Result<Account> {
    let disposed = disposed_of(tx, delegate)?;
    let new_need = delegate.compute_need(fees, &disposed);
    let account = ledger::apply_need_delta(
        tx,
        delegate.delegator,
        delegate.need,
        new_need,
    )?;
    delegate.need = new_need;
    Ok(account)
}

/// Marks an `Init` delegate as handled by someone else.
///
/// The balance proof no longer has to be submitted, so its fee leaves the
/// need. Returns the delegate when it was changed.
pub fn finish_by_other(
    tx: &dyn StoreTransaction,
    fees: &FeeSchedule,
    key: &DelegateKey,
    reason: &str,
) -> Result<Option<Delegate>> {
    let Some(mut delegate) = tx.delegate(key)? else {
        return Ok(None);
    };
    if !delegate.status.is_mutable() {
        return Ok(None);
    }
    delegate.status = DelegateStatus::SuccessFinishedByOther;
    delegate.error = reason.to_string();
    refresh_need(tx, fees, &mut delegate)?;
    tx.save_delegate(&delegate)?;
    Ok(Some(delegate))
}

/// Secret hashes of the delegate's unlocks that were announced disposed.
pub fn disposed_of(
    tx: &dyn StoreTransaction,
    delegate: &Delegate,
) -> Result<HashSet<H256>> {
    let key = delegate.key();
    let mut disposed = HashSet::new();
    for unlock in &delegate.unlocks {
        let hash = unlock.lock.secret_hash;
        if tx.has_announce_disposed(&key, &hash)? {
            disposed.insert(hash);
        }
    }
    Ok(disposed)
}

/// Releases the need a delegate still holds, ahead of deleting it.
pub fn release_need(tx: &dyn StoreTransaction, key: &DelegateKey) -> Result<()> {
    if let Some(mut delegate) = tx.delegate(key)? {
        if !delegate.need.is_zero() {
            ledger::apply_need_delta(
                tx,
                delegate.delegator,
                delegate.need,
                U256::zero(),
            )?;
            delegate.need = U256::zero();
            tx.save_delegate(&delegate)?;
        }
    }
    Ok(())
}
