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


use watchtower_context::WatchtowerContext;
use watchtower_delegation::refresh_need;
use watchtower_ledger as ledger;
use watchtower_store::{
    keys, StoreTransactionExt, WatchtowerStore, WatchtowerStoreExt,
};
use watchtower_types::{
    DelegateStatus, ExecuteKind, ExecuteRecord, ExecuteStatus, MonitorEntry,
    MonitorKind, PunishOutcome,
};
use watchtower_utils::{probe, Result};

/// Error recorded on attempts cut short by a restart.
pub const INTERRUPTED: &str = "interrupted";

/// What [`recover`] repaired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Pending execute records closed and refunded.
    pub interrupted_records: usize,
    /// `Running` delegates put back to `Init`.
    pub reset_delegates: usize,
}

/// Repairs the state a crash may leave behind. Runs before the event loop
/// starts.
///
/// Every attempt still `NotExecuted` is closed as interrupted and its fee
/// refunded; an interrupted punish is scheduled again. Every `Running`
/// delegate goes back to `Init` with its unlock entry re-created, so the next
/// block retries it.
pub fn recover<S: WatchtowerStore>(
    ctx: &WatchtowerContext<S>,
) -> Result<RecoveryReport> {
    let store = ctx.store();
    let fees = *ctx.fees();
    let reveal_timeout = ctx.reveal_timeout();
    let mut report = RecoveryReport::default();

    for pending in store.pending_execute_records()? {
        let key = pending.delegate_key();
        let record_key = keys::execute_record(&key, pending.id);
        let repaired = store.transaction(|tx| {
            let Some(mut record) = tx.get_record::<ExecuteRecord>(&record_key)?
            else {
                return Ok(false);
            };
            if record.status != ExecuteStatus::NotExecuted {
                return Ok(false);
            }
            let fee = record.fee;
            if !fee.is_zero() {
                ledger::unlock(tx, record.delegator, fee)?;
            }
            record.finish_err(INTERRUPTED);
            tx.save_execute_record(&record)?;

            if record.kind != ExecuteKind::Punish {
                return Ok(true);
            }
            let Some(mut delegate) = tx.delegate(&key)? else {
                return Ok(true);
            };
            if delegate.punish_outcome == PunishOutcome::NotRun
                && delegate.settle_block_number > 0
            {
                let need = delegate.need.saturating_add(fee);
                ledger::apply_need_delta(tx, delegate.delegator, delegate.need, need)?;
                delegate.need = need;
                tx.save_delegate(&delegate)?;
                tx.add_monitor(&MonitorEntry::new(
                    delegate.settle_block_number,
                    MonitorKind::Punish,
                    key,
                ))?;
            }
            Ok(true)
        })?;
        if repaired {
            report.interrupted_records += 1;
        }
    }

    for running in store.delegates_with_status(DelegateStatus::Running)? {
        let key = running.key();
        let reset = store.transaction(|tx| {
            let Some(mut delegate) = tx.delegate(&key)? else {
                return Ok(false);
            };
            if delegate.status != DelegateStatus::Running {
                return Ok(false);
            }
            delegate.status = DelegateStatus::Init;
            refresh_need(tx, &fees, &mut delegate)?;
            tx.save_delegate(&delegate)?;
            for entry in delegate
                .monitor_plan(reveal_timeout)
                .iter()
                .filter(|e| e.kind == MonitorKind::UnlockAndUpdateBalanceProof)
            {
                tx.add_monitor(entry)?;
            }
            Ok(true)
        })?;
        if reset {
            report.reset_delegates += 1;
        }
    }

    tracing::event!(
        target: probe::TARGET,
        tracing::Level::DEBUG,
        kind = %probe::Kind::Lifecycle,
        interrupted_records = report.interrupted_records,
        reset_delegates = report.reset_delegates,
        "Recovered from previous run",
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::Harness;
    use ethers::types::U256;

    #[test]
    fn interrupted_pass_is_refunded_and_rescheduled() {
        let h = Harness::new();
        let key = h.delegate(h.payload(1, 1), 6_000);
        h.credit(10);

        // a pass locked the update fee, then the process died
        let delegate = h.ctx.store().delegate(&key).unwrap().unwrap();
        let record = ExecuteRecord::new(
            7,
            &delegate,
            ExecuteKind::UpdateBalanceProof,
            serde_json::Value::Null,
            U256::from(3),
            5_970,
        );
        h.ctx
            .store()
            .transaction(|tx| {
                ledger::lock(tx, delegate.delegator, U256::from(3))?;
                let mut d = tx.delegate(&key)?.unwrap();
                d.status = DelegateStatus::Running;
                d.need -= U256::from(3);
                tx.save_delegate(&d)?;
                tx.take_monitor(&MonitorEntry::new(
                    5_970,
                    MonitorKind::UnlockAndUpdateBalanceProof,
                    key,
                ))?;
                tx.save_execute_record(&record)
            })
            .unwrap();

        let report = recover(&h.ctx).unwrap();
        assert_eq!(
            report,
            RecoveryReport {
                interrupted_records: 1,
                reset_delegates: 1,
            }
        );

        let account = h.account();
        assert_eq!(account.locked, U256::zero());
        assert_eq!(account.need, U256::from(4));
        let records = h.ctx.store().execute_records(&key).unwrap();
        assert_eq!(records[0].status, ExecuteStatus::ErrorFinished);
        assert_eq!(records[0].error, INTERRUPTED);
        let delegate = h.ctx.store().delegate(&key).unwrap().unwrap();
        assert_eq!(delegate.status, DelegateStatus::Init);
        assert_eq!(h.ctx.store().due_monitors(5_970).unwrap().len(), 1);

        // nothing left to repair
        assert_eq!(recover(&h.ctx).unwrap(), RecoveryReport::default());
    }
}
