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


//! The three delegated actions.
//!
//! Every attempt reserves its fee and writes a `NotExecuted` record in one
//! transaction, talks to the chain outside of any transaction, then spends
//! or refunds the fee and closes the record in a second one.

use ethers::types::U256;
use watchtower_chain::{ContractCall, TxReceipt};
use watchtower_context::WatchtowerContext;
use watchtower_ledger as ledger;
use watchtower_store::{
    keys, StoreTransaction, StoreTransactionExt, WatchtowerStore,
    WatchtowerStoreExt,
};
use watchtower_types::{
    Delegate, DelegateKey, DelegateStatus, ExecuteKind, ExecuteRecord,
    FeeSchedule, PunishOutcome,
};
use watchtower_utils::clickable_link::tx_link;
use watchtower_utils::{probe, Error, Result};

/// Tally of one action pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Calls mined successfully.
    pub succeeded: usize,
    /// Calls that failed, expired locks included.
    pub failed: usize,
    /// Locks skipped because they were announced disposed.
    pub skipped: usize,
    /// The fee lock that stopped the pass, if any.
    pub refused: Option<String>,
    /// Error of the last failed call.
    pub last_error: Option<String>,
}

impl PassReport {
    fn fail(&mut self, error: &Error) {
        self.failed += 1;
        self.last_error = Some(error.to_string());
    }

    /// Terminal status of a delegate after a full pass.
    pub fn status(&self) -> DelegateStatus {
        if self.refused.is_some() {
            DelegateStatus::Failed
        } else if self.failed == 0 {
            DelegateStatus::SuccessFinished
        } else if self.succeeded + self.skipped > 0 {
            DelegateStatus::PartialSuccess
        } else {
            DelegateStatus::Failed
        }
    }

    fn error(&self) -> Option<&String> {
        self.refused.as_ref().or(self.last_error.as_ref())
    }
}

enum Reserved {
    Held(ExecuteRecord),
    Refused(Error),
}

type Mined = std::result::Result<TxReceipt, Error>;

/// Runs the on-chain actions of delegates.
pub struct Executor<S> {
    ctx: WatchtowerContext<S>,
}

impl<S: WatchtowerStore> Clone for Executor<S> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
        }
    }
}

impl<S: WatchtowerStore> Executor<S> {
    /// Creates an executor over `ctx`.
    pub fn new(ctx: WatchtowerContext<S>) -> Self {
        Self { ctx }
    }

    fn load(&self, key: &DelegateKey) -> Result<Delegate> {
        self.ctx
            .store()
            .delegate(key)?
            .ok_or_else(|| Error::DelegateNotFound(key.to_string()))
    }

    /// Submits the balance proof, then every live unlock, and moves the
    /// `Running` delegate to its terminal status.
    ///
    /// Unlocks run even if the balance proof failed. A refused fee lock
    /// stops the pass and fails the delegate.
    #[tracing::instrument(skip(self), fields(delegate = %key))]
    pub async fn update_and_unlock(&self, key: DelegateKey) -> Result<PassReport> {
        let delegate = self.load(&key)?;
        let mut report = PassReport::default();
        if delegate.has_balance_proof() {
            let call = ContractCall::update_balance_proof(&delegate);
            let fee = self.ctx.fees().update_balance_proof_fee();
            self.attempt(
                &delegate,
                ExecuteKind::UpdateBalanceProof,
                call,
                fee,
                &mut report,
            )
            .await?;
        }
        if report.refused.is_none() {
            self.unlock_all(&delegate, &mut report).await?;
        }
        let status = report.status();
        self.finish_pass(&key, Some(status), &report)?;
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Execution,
            %status,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
        );
        Ok(report)
    }

    /// Unlocks for a delegate whose balance proof someone else submitted.
    /// The status is left alone.
    #[tracing::instrument(skip(self), fields(delegate = %key))]
    pub async fn unlock_only(&self, key: DelegateKey) -> Result<PassReport> {
        let delegate = self.load(&key)?;
        let mut report = PassReport::default();
        self.unlock_all(&delegate, &mut report).await?;
        self.finish_pass(&key, None, &report)?;
        Ok(report)
    }

    async fn unlock_all(
        &self,
        delegate: &Delegate,
        report: &mut PassReport,
    ) -> Result<()> {
        let disposed = self.ctx.store().disposed_secret_hashes(&delegate.key())?;
        let fee = self.ctx.fees().unlock_fee();
        for unlock in &delegate.unlocks {
            let call = ContractCall::unlock(delegate, unlock);
            if disposed.contains(&unlock.lock.secret_hash) {
                self.record_skipped(delegate, ExecuteKind::Unlock, &call)?;
                report.skipped += 1;
                continue;
            }
            let current_block = self.ctx.latest_block();
            if unlock.lock.expiration <= current_block {
                let e = Error::LockExpired {
                    expiration: unlock.lock.expiration,
                    current_block,
                };
                self.record_failed(delegate, ExecuteKind::Unlock, &call, &e)?;
                report.fail(&e);
                continue;
            }
            self.attempt(delegate, ExecuteKind::Unlock, call, fee, report)
                .await?;
            if report.refused.is_some() {
                break;
            }
        }
        Ok(())
    }

    /// Punishes the partner with the first punish that goes through.
    ///
    /// The fee is reserved once and carried from one failed attempt to the
    /// next; punishes left after a success are recorded without a call.
    /// A refused fee lock fails the delegate. Otherwise the outcome is folded
    /// into whatever status the update and unlock pass left.
    #[tracing::instrument(skip(self), fields(delegate = %key))]
    pub async fn punish(&self, key: DelegateKey) -> Result<PunishOutcome> {
        let delegate = self.load(&key)?;
        if delegate.punish_outcome != PunishOutcome::NotRun {
            return Ok(delegate.punish_outcome);
        }
        let punishes = self.ctx.store().punishes(&key)?;
        let mut calls =
            punishes.iter().map(|p| ContractCall::punish(&delegate, p));
        let Some(mut call) = calls.next() else {
            return Ok(PunishOutcome::NotRun);
        };
        let fee = self.ctx.fees().punish_fee();
        let mut record =
            match self.reserve(&delegate, ExecuteKind::Punish, &call, fee)? {
                Reserved::Held(record) => record,
                Reserved::Refused(e) => {
                    tracing::warn!("Punish refused: {e}");
                    self.ctx.store().transaction(|tx| {
                        let Some(mut d) = tx.delegate(&key)? else {
                            return Ok(());
                        };
                        d.punish_outcome = PunishOutcome::AllFailed;
                        d.status = DelegateStatus::Failed;
                        d.error = e.to_string();
                        let need = d.need.saturating_sub(fee);
                        ledger::apply_need_delta(tx, d.delegator, d.need, need)?;
                        d.need = need;
                        tx.save_delegate(&d)
                    })?;
                    return Ok(PunishOutcome::AllFailed);
                }
            };

        let mut last_error = None;
        let outcome = loop {
            let mined = self.send(&call, &mut record).await?;
            match mined {
                Ok(receipt) => {
                    self.reconcile(&record, &Ok(receipt))?;
                    break PunishOutcome::Punished;
                }
                Err(e) => {
                    tracing::warn!(lock_hash = ?lock_hash(&call), "Punish failed: {e}");
                    last_error = Some(e.to_string());
                    match calls.next() {
                        Some(next) => {
                            record = self.pass_fee_on(&delegate, &record, &e, &next)?;
                            call = next;
                        }
                        None => {
                            self.reconcile(&record, &Err(e))?;
                            break PunishOutcome::AllFailed;
                        }
                    }
                }
            }
        };
        for rest in calls {
            self.record_skipped(&delegate, ExecuteKind::Punish, &rest)?;
        }

        self.ctx.store().transaction(|tx| {
            let Some(mut d) = tx.delegate(&key)? else {
                return Ok(());
            };
            d.punish_outcome = outcome;
            d.status = status_after_punish(d.status, outcome);
            if let (PunishOutcome::AllFailed, Some(e)) = (outcome, &last_error) {
                d.error = e.clone();
            }
            tx.save_delegate(&d)
        })?;
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Execution,
            punish = ?outcome,
        );
        Ok(outcome)
    }

    /// One complete attempt: reserve, submit, wait, reconcile.
    async fn attempt(
        &self,
        delegate: &Delegate,
        kind: ExecuteKind,
        call: ContractCall,
        fee: U256,
        report: &mut PassReport,
    ) -> Result<()> {
        let mut record = match self.reserve(delegate, kind, &call, fee)? {
            Reserved::Held(record) => record,
            Reserved::Refused(e) => {
                tracing::warn!(method = call.method(), "Fee lock refused: {e}");
                report.refused = Some(e.to_string());
                return Ok(());
            }
        };
        let mined = self.send(&call, &mut record).await?;
        match &mined {
            Ok(_) => report.succeeded += 1,
            Err(e) => {
                tracing::warn!(method = call.method(), "Call failed: {e}");
                report.fail(e);
            }
        }
        self.reconcile(&record, &mined)?;
        Ok(())
    }

    /// Locks `fee` and writes the pending record.
    ///
    /// An insufficient balance is returned as [`Reserved::Refused`]; every
    /// other error is the caller's.
    fn reserve(
        &self,
        delegate: &Delegate,
        kind: ExecuteKind,
        call: &ContractCall,
        fee: U256,
    ) -> Result<Reserved> {
        let id = keys::next_record_id();
        let params = call.to_params();
        let current_block = self.ctx.latest_block();
        let key = delegate.key();
        let reserved = self.ctx.store().transaction(|tx| {
            ledger::lock(tx, delegate.delegator, fee)?;
            if let Some(mut d) = tx.delegate(&key)? {
                d.need = d.need.saturating_sub(fee);
                tx.save_delegate(&d)?;
            }
            let record = ExecuteRecord::new(
                id,
                delegate,
                kind,
                params.clone(),
                fee,
                current_block,
            );
            tx.save_execute_record(&record)?;
            Ok(record)
        });
        match reserved {
            Ok(record) => Ok(Reserved::Held(record)),
            Err(e @ Error::InsufficientBalance { .. }) => Ok(Reserved::Refused(e)),
            Err(e) => Err(e),
        }
    }

    /// Submits `call` and waits for it to be mined. Chain failures are
    /// returned in the inner result.
    async fn send(
        &self,
        call: &ContractCall,
        record: &mut ExecuteRecord,
    ) -> Result<Mined> {
        let chain = self.ctx.chain();
        let tx_hash = match chain.submit(call).await {
            Ok(tx_hash) => tx_hash,
            Err(e) => return Ok(Err(e)),
        };
        record.tx_hash = Some(tx_hash);
        let submitted = record.clone();
        self.ctx
            .store()
            .transaction(|tx| tx.save_execute_record(&submitted))?;
        tracing::info!(
            method = call.method(),
            "Submitted {}",
            tx_link(self.ctx.explorer(), tx_hash)
        );
        let mined = match chain.wait_mined(tx_hash).await {
            Ok(receipt) if receipt.status => Ok(receipt),
            Ok(_) => Err(Error::TransactionReverted { tx_hash }),
            Err(e) => Err(e),
        };
        Ok(mined)
    }

    /// Spends the held fee on success, refunds it on failure, and closes the
    /// record.
    fn reconcile(&self, record: &ExecuteRecord, mined: &Mined) -> Result<ExecuteRecord> {
        let fee = record.fee;
        let delegator = record.delegator;
        self.ctx.store().transaction(|tx| {
            let mut record = record.clone();
            match mined {
                Ok(receipt) => {
                    ledger::use_locked(tx, delegator, fee)?;
                    record.finish_ok(receipt.block_number);
                }
                Err(e) => {
                    ledger::unlock(tx, delegator, fee)?;
                    record.finish_err(e);
                }
            }
            tx.save_execute_record(&record)?;
            Ok(record)
        })
    }

    /// Closes a failed punish attempt and moves its held fee to the record
    /// of the next one.
    fn pass_fee_on(
        &self,
        delegate: &Delegate,
        failed: &ExecuteRecord,
        error: &Error,
        next: &ContractCall,
    ) -> Result<ExecuteRecord> {
        let id = keys::next_record_id();
        let params = next.to_params();
        let current_block = self.ctx.latest_block();
        let fee = failed.fee;
        self.ctx.store().transaction(|tx| {
            let mut closed = failed.clone();
            closed.finish_err(error);
            tx.save_execute_record(&closed)?;
            let record = ExecuteRecord::new(
                id,
                delegate,
                ExecuteKind::Punish,
                params.clone(),
                fee,
                current_block,
            );
            tx.save_execute_record(&record)?;
            Ok(record)
        })
    }

    fn record_skipped(
        &self,
        delegate: &Delegate,
        kind: ExecuteKind,
        call: &ContractCall,
    ) -> Result<()> {
        let record = ExecuteRecord::skipped(
            keys::next_record_id(),
            delegate,
            kind,
            call.to_params(),
            self.ctx.latest_block(),
        );
        self.ctx
            .store()
            .transaction(|tx| tx.save_execute_record(&record))
    }

    fn record_failed(
        &self,
        delegate: &Delegate,
        kind: ExecuteKind,
        call: &ContractCall,
        error: &Error,
    ) -> Result<()> {
        let mut record = ExecuteRecord::new(
            keys::next_record_id(),
            delegate,
            kind,
            call.to_params(),
            U256::zero(),
            self.ctx.latest_block(),
        );
        record.finish_err(error);
        self.ctx
            .store()
            .transaction(|tx| tx.save_execute_record(&record))
    }

    fn finish_pass(
        &self,
        key: &DelegateKey,
        status: Option<DelegateStatus>,
        report: &PassReport,
    ) -> Result<()> {
        let fees = *self.ctx.fees();
        self.ctx.store().transaction(|tx| {
            let Some(mut d) = tx.delegate(key)? else {
                return Ok(());
            };
            if let Some(status) = status {
                d.status = status;
            }
            if let Some(e) = report.error() {
                d.error = e.clone();
            }
            release_leftover(tx, &fees, &mut d)?;
            tx.save_delegate(&d)
        })
    }
}

/// Drops whatever need the delegate still holds beyond a pending punish.
fn release_leftover(
    tx: &dyn StoreTransaction,
    fees: &FeeSchedule,
    delegate: &mut Delegate,
) -> Result<()> {
    let pending_punish = delegate.punish_count > 0
        && delegate.punish_outcome == PunishOutcome::NotRun;
    let keep = if pending_punish {
        delegate.need.min(fees.punish_fee())
    } else {
        U256::zero()
    };
    if delegate.need > keep {
        ledger::apply_need_delta(tx, delegate.delegator, delegate.need, keep)?;
        delegate.need = keep;
    }
    Ok(())
}

/// Folds a punish outcome into the status the delegate already has.
/// `Init` means no update or unlock pass ran, so the punish decides alone.
fn status_after_punish(
    status: DelegateStatus,
    outcome: PunishOutcome,
) -> DelegateStatus {
    use DelegateStatus::*;
    match (status, outcome) {
        (Init, PunishOutcome::Punished) => SuccessFinished,
        (Init, PunishOutcome::AllFailed) => Failed,
        (SuccessFinished | SuccessFinishedByOther, PunishOutcome::AllFailed) => {
            PartialSuccess
        }
        (status, _) => status,
    }
}

fn lock_hash(call: &ContractCall) -> Option<ethers::types::H256> {
    match call {
        ContractCall::PunishObsoleteUnlock { lock_hash, .. } => Some(*lock_hash),
        _ => None,
    }
}
