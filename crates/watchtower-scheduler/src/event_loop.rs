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
use std::sync::Arc;
use std::time::Duration;

use ethers::types::{Address, H256};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use watchtower_chain::ChainEvent;
use watchtower_context::{Shutdown, WatchtowerContext};
use watchtower_delegation::{finish_by_other, release_need};
use watchtower_store::{StoreTransactionExt, WatchtowerStore, WatchtowerStoreExt};
use watchtower_types::{
    DelegateKey, DelegateStatus, MonitorEntry, MonitorKind, PunishOutcome,
};
use watchtower_utils::retry::ConstantWithMaxRetryCount;
use watchtower_utils::{probe, Result};

use crate::executor::Executor;
use crate::pool::{check, ActionPool};

const CHANNEL_INFO_RETRY_INTERVAL: Duration = Duration::from_millis(500);
const CHANNEL_INFO_MAX_RETRIES: usize = 10;

/// Reason recorded on a delegate whose delegator closed the channel itself.
pub const CLOSED_BY_DELEGATOR: &str = "delegator closed channel";
/// Reason recorded on a delegate whose balance proof was already updated.
pub const UPDATED_BY_PARTICIPANT: &str = "balance proof updated by participant";

/// A due monitor entry, turned into work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    UpdateAndUnlock,
    UnlockOnly,
    Punish,
}

/// Everything one delegate has due in a block, run as a single task.
#[derive(Debug)]
struct Batch {
    delegate: DelegateKey,
    claimed: Vec<MonitorEntry>,
    actions: Vec<Action>,
}

impl Batch {
    /// Update and unlock always go before the punish.
    fn into_actions(mut self) -> Vec<Action> {
        self.actions.sort_by_key(|a| *a == Action::Punish);
        self.actions
    }
}

type Busy = Arc<Mutex<HashSet<DelegateKey>>>;

/// Marks a delegate busy until the task holding it ends.
struct InFlight {
    busy: Busy,
    delegate: DelegateKey,
}

impl InFlight {
    fn enter(busy: &Busy, delegate: DelegateKey) -> Self {
        busy.lock().insert(delegate);
        Self {
            busy: busy.clone(),
            delegate,
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.busy.lock().remove(&self.delegate);
    }
}

enum Step {
    Shutdown,
    Event(Option<ChainEvent>),
    Finished(Result<()>),
}

/// Consumes chain events in order, schedules monitor entries and
/// dispatches the actions that fall due.
///
/// A delegate never has two tasks at once: entries due while it is busy
/// move to the next block.
pub struct ChainEventLoop<S> {
    ctx: WatchtowerContext<S>,
    executor: Executor<S>,
    pool: ActionPool,
    busy: Busy,
    shutdown: Shutdown,
}

impl<S: WatchtowerStore> ChainEventLoop<S> {
    /// Creates the loop over `ctx`.
    pub fn new(ctx: WatchtowerContext<S>) -> Self {
        let pool = ActionPool::new(ctx.config.scheduler.max_concurrent_actions);
        Self {
            executor: Executor::new(ctx.clone()),
            shutdown: ctx.shutdown_signal(),
            busy: Busy::default(),
            ctx,
            pool,
        }
    }

    /// Runs until the event stream ends, shutdown is signalled, or a fatal
    /// error occurs. In-flight actions are drained before returning.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<ChainEvent>,
    ) -> Result<()> {
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Lifecycle,
            started = true,
            "Chain event loop started",
        );
        let result = loop {
            let step = tokio::select! {
                biased;
                _ = self.shutdown.recv() => Step::Shutdown,
                Some(done) = self.pool.join_next() => Step::Finished(done),
                event = events.recv() => Step::Event(event),
            };
            match step {
                Step::Shutdown | Step::Event(None) => break Ok(()),
                Step::Finished(done) => {
                    if let Err(e) = check(done) {
                        break Err(e);
                    }
                }
                Step::Event(Some(event)) => match self.handle(event).await {
                    Err(e) if e.is_fatal() => break Err(e),
                    Err(e) => tracing::error!("Failed to handle chain event: {e}"),
                    Ok(()) => {}
                },
            }
        };
        let drained = self.pool.drain().await;
        let result = result.and(drained);
        if let Err(e) = &result {
            tracing::error!("Chain event loop stopped: {e}");
            self.ctx.shutdown();
        }
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Lifecycle,
            stopped = true,
            "Chain event loop stopped",
        );
        result
    }

    /// Applies one event.
    pub async fn handle(&mut self, event: ChainEvent) -> Result<()> {
        match event {
            ChainEvent::ChannelClosed {
                channel_identifier,
                closing_participant,
                ..
            } => self.on_closed(channel_identifier, closing_participant).await,
            ChainEvent::BalanceProofUpdated {
                channel_identifier,
                participant,
                ..
            } => self.on_balance_proof_updated(channel_identifier, participant),
            ChainEvent::ChannelSettled {
                channel_identifier, ..
            }
            | ChainEvent::CooperativeSettled {
                channel_identifier, ..
            }
            | ChainEvent::Withdrawn {
                channel_identifier, ..
            } => self.on_channel_gone(channel_identifier),
            ChainEvent::NewBlock(block_number) => {
                self.on_new_block(block_number).await
            }
        }
    }

    #[tracing::instrument(skip(self))]
    async fn on_closed(&self, channel: H256, closer: Address) -> Result<()> {
        let delegates = self.ctx.store().delegates_of_channel(&channel)?;
        if delegates.is_empty() {
            return Ok(());
        }
        let chain = self.ctx.chain().clone();
        let info = backoff::future::retry(
            ConstantWithMaxRetryCount::new(
                CHANNEL_INFO_RETRY_INTERVAL,
                CHANNEL_INFO_MAX_RETRIES,
            ),
            || {
                let chain = chain.clone();
                async move {
                    chain.channel_info(channel).await.map_err(|e| {
                        tracing::event!(
                            target: probe::TARGET,
                            tracing::Level::WARN,
                            kind = %probe::Kind::Retry,
                            %e,
                            "Failed to read settle block, retrying",
                        );
                        backoff::Error::transient(e)
                    })
                }
            },
        )
        .await?;
        if !info.is_closed() {
            tracing::warn!("Close event for a channel the contract reports open");
            return Ok(());
        }
        let settle = info.settle_block_number;
        let fees = *self.ctx.fees();
        let reveal_timeout = self.ctx.reveal_timeout();

        for delegate in delegates {
            let key = delegate.key();
            let plan = self.ctx.store().transaction(|tx| {
                if delegate.delegator == closer {
                    finish_by_other(tx, &fees, &key, CLOSED_BY_DELEGATOR)?;
                }
                let Some(mut d) = tx.delegate(&key)? else {
                    return Ok(Vec::new());
                };
                d.settle_block_number = settle;
                tx.save_delegate(&d)?;
                let plan = d.monitor_plan(reveal_timeout);
                for entry in &plan {
                    tx.add_monitor(entry)?;
                }
                Ok(plan)
            })?;
            tracing::event!(
                target: probe::TARGET,
                tracing::Level::DEBUG,
                kind = %probe::Kind::Scheduler,
                delegate = %key,
                settle,
                scheduled = ?plan
                    .iter()
                    .map(|e| (e.trigger_block, e.kind))
                    .collect::<Vec<_>>(),
            );
        }
        Ok(())
    }

    fn on_balance_proof_updated(
        &self,
        channel: H256,
        participant: Address,
    ) -> Result<()> {
        let key = DelegateKey::new(channel, participant);
        let fees = *self.ctx.fees();
        let changed = self.ctx.store().transaction(|tx| {
            finish_by_other(tx, &fees, &key, UPDATED_BY_PARTICIPANT)
        })?;
        if changed.is_some() {
            tracing::debug!(delegate = %key, "Balance proof updated by participant");
        }
        Ok(())
    }

    fn on_channel_gone(&self, channel: H256) -> Result<()> {
        let store = self.ctx.store();
        for delegate in store.delegates_of_channel(&channel)? {
            let key = delegate.key();
            store.transaction(|tx| release_need(tx, &key))?;
            store.remove_delegate(&key)?;
            tracing::debug!(delegate = %key, status = %delegate.status, "Delegate removed");
        }
        Ok(())
    }

    async fn on_new_block(&mut self, block_number: u64) -> Result<()> {
        self.ctx.set_latest_block(block_number)?;
        let mut batches: Vec<Batch> = Vec::new();
        for entry in self.ctx.store().due_monitors(block_number)? {
            if self.busy.lock().contains(&entry.delegate) {
                self.defer(&entry, block_number + 1)?;
                continue;
            }
            let Some(action) = self.claim(&entry)? else {
                continue;
            };
            match batches.iter_mut().find(|b| b.delegate == entry.delegate) {
                Some(batch) => {
                    batch.claimed.push(entry);
                    batch.actions.push(action);
                }
                None => batches.push(Batch {
                    delegate: entry.delegate,
                    claimed: vec![entry],
                    actions: vec![action],
                }),
            }
        }

        let mut batches = batches.into_iter();
        while let Some(batch) = batches.next() {
            let permit = tokio::select! {
                biased;
                _ = self.shutdown.recv() => None,
                permit = self.pool.reserve() => Some(permit?),
            };
            let Some(permit) = permit else {
                tracing::debug!("Shutdown while waiting for a free slot");
                self.unclaim(&batch)?;
                for batch in batches {
                    self.unclaim(&batch)?;
                }
                return Ok(());
            };
            tracing::event!(
                target: probe::TARGET,
                tracing::Level::DEBUG,
                kind = %probe::Kind::Scheduler,
                block_number,
                delegate = %batch.delegate,
                actions = ?batch.actions,
                "Dispatching",
            );
            let executor = self.executor.clone();
            let in_flight = InFlight::enter(&self.busy, batch.delegate);
            let delegate = batch.delegate;
            let actions = batch.into_actions();
            self.pool.spawn_with(permit, async move {
                let _in_flight = in_flight;
                for action in actions {
                    let done = match action {
                        Action::UpdateAndUnlock => {
                            executor.update_and_unlock(delegate).await.map(drop)
                        }
                        Action::UnlockOnly => {
                            executor.unlock_only(delegate).await.map(drop)
                        }
                        Action::Punish => executor.punish(delegate).await.map(drop),
                    };
                    match done {
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => tracing::error!(?action, "Action failed: {e}"),
                        Ok(()) => {}
                    }
                }
                Ok(())
            });
        }
        Ok(())
    }

    /// Moves `entry` to `block`, for a delegate that is still busy.
    fn defer(&self, entry: &MonitorEntry, block: u64) -> Result<()> {
        let moved = MonitorEntry::new(block, entry.kind, entry.delegate);
        self.ctx.store().transaction(|tx| {
            if tx.take_monitor(entry)? {
                tx.add_monitor(&moved)?;
            }
            Ok(())
        })?;
        tracing::debug!(delegate = %entry.delegate, kind = ?entry.kind, block, "Delegate busy, deferred");
        Ok(())
    }

    /// Puts back what [`Self::claim`] took for a batch that never ran.
    fn unclaim(&self, batch: &Batch) -> Result<()> {
        let key = batch.delegate;
        self.ctx.store().transaction(|tx| {
            for entry in &batch.claimed {
                tx.add_monitor(entry)?;
            }
            if batch.actions.contains(&Action::UpdateAndUnlock) {
                if let Some(mut d) = tx.delegate(&key)? {
                    if d.status == DelegateStatus::Running {
                        d.status = DelegateStatus::Init;
                        tx.save_delegate(&d)?;
                    }
                }
            }
            Ok(())
        })
    }

    /// Consumes `entry` and, if its delegate still wants it, moves the
    /// delegate forward in the same transaction.
    fn claim(&self, entry: &MonitorEntry) -> Result<Option<Action>> {
        let key = entry.delegate;
        self.ctx.store().transaction(|tx| {
            if !tx.take_monitor(entry)? {
                return Ok(None);
            }
            let Some(mut delegate) = tx.delegate(&key)? else {
                return Ok(None);
            };
            let action = match entry.kind {
                MonitorKind::Punish => (delegate.punish_count > 0
                    && delegate.punish_outcome == PunishOutcome::NotRun)
                    .then_some(Action::Punish),
                MonitorKind::UnlockAndUpdateBalanceProof => {
                    match delegate.status {
                        DelegateStatus::SuccessFinishedByOther => {
                            Some(Action::UnlockOnly)
                        }
                        DelegateStatus::Init => {
                            delegate.status = DelegateStatus::Running;
                            tx.save_delegate(&delegate)?;
                            Some(Action::UpdateAndUnlock)
                        }
                        _ => None,
                    }
                }
            };
            Ok(action)
        })
    }
}
