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
//! # Watchtower Scheduler ⏰
//!
//! Turns the ordered stream of chain events into protective actions.
//!
//! * A close schedules each delegate's monitor entries: unlocks (and the
//!   balance proof) `reveal_timeout` blocks before settlement, the punish at
//!   settlement.
//! * Each new block consumes the entries that fell due and hands the actions
//!   to a bounded pool, so waiting for receipts never stalls the loop.
//! * Settlement, cooperative settlement and withdrawal forget the channel.
//!
//! [`recover`] repairs what a crash left half done before the loop starts.

/// The chain event loop.
pub mod event_loop;
/// The on-chain actions.
pub mod executor;
/// Bounded background execution.
pub mod pool;
/// Startup repair.
pub mod recovery;

#[cfg(test)]
mod fixtures;

pub use event_loop::{ChainEventLoop, CLOSED_BY_DELEGATOR, UPDATED_BY_PARTICIPANT};
pub use executor::{Executor, PassReport};
pub use pool::ActionPool;
pub use recovery::{recover, RecoveryReport, INTERRUPTED};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{closed_by, Harness, CHANNEL, DELEGATOR, PARTNER};
    use ethers::types::{Address, H256, U256};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use watchtower_chain::mock::MockOutcome;
    use watchtower_chain::ChainEvent;
    use watchtower_store::WatchtowerStoreExt;
    use watchtower_types::{
        AnnounceDisposed, DelegateStatus, ExecuteStatus, MonitorKind, Punish,
        PunishOutcome,
    };

    fn count(h: &Harness, status: ExecuteStatus) -> usize {
        h.records().iter().filter(|r| r.status == status).count()
    }

    #[tokio::test]
    async fn protects_the_delegator_before_settlement() {
        let h = Harness::new();
        h.delegate(h.payload(1, 1), 0);
        h.credit(10);
        h.close_on_chain(6_000);

        h.run(vec![
            closed_by(PARTNER, 5_000),
            ChainEvent::NewBlock(5_000),
            ChainEvent::NewBlock(5_969),
        ])
        .await
        .unwrap();
        assert!(h.methods().is_empty());
        assert_eq!(h.stored().unwrap().settle_block_number, 6_000);

        h.run(vec![ChainEvent::NewBlock(5_970)]).await.unwrap();
        assert_eq!(h.methods(), vec!["updateBalanceProofDelegate", "unlockDelegate"]);
        let account = h.account();
        assert_eq!(account.used, U256::from(3 + 1));
        assert_eq!(account.locked, U256::zero());
        assert_eq!(account.need, U256::zero());
        assert_eq!(h.stored().unwrap().status, DelegateStatus::SuccessFinished);
        assert_eq!(count(&h, ExecuteStatus::SuccessFinished), 2);
        assert!(h.records().iter().all(|r| r.tx_hash.is_some()));

        // the entry was consumed, a later block does nothing
        h.run(vec![ChainEvent::NewBlock(5_971)]).await.unwrap();
        assert_eq!(h.chain.submitted().len(), 2);
    }

    #[tokio::test]
    async fn close_schedules_unlock_and_punish() {
        let h = Harness::new();
        let mut payload = h.payload(1, 1);
        payload.punishes = vec![Punish {
            lock_hash: H256::repeat_byte(0x71),
            ..Default::default()
        }];
        let key = h.delegate(payload, 0);
        h.close_on_chain(10_000);
        h.run(vec![closed_by(PARTNER, 9_000)]).await.unwrap();

        let mut plan: Vec<_> = h
            .ctx
            .store()
            .monitors_of(&key)
            .unwrap()
            .into_iter()
            .map(|m| (m.trigger_block, m.kind))
            .collect();
        plan.sort();
        assert_eq!(
            plan,
            vec![
                (9_970, MonitorKind::UnlockAndUpdateBalanceProof),
                (10_000, MonitorKind::Punish),
            ]
        );
    }

    #[tokio::test]
    async fn self_closer_is_only_unlocked() {
        let h = Harness::new();
        h.delegate(h.payload(1, 1), 0);
        h.credit(10);
        h.close_on_chain(6_000);
        h.run(vec![closed_by(DELEGATOR, 5_000), ChainEvent::NewBlock(5_970)])
            .await
            .unwrap();

        assert_eq!(h.methods(), vec!["unlockDelegate"]);
        let stored = h.stored().unwrap();
        assert_eq!(stored.status, DelegateStatus::SuccessFinishedByOther);
        assert_eq!(stored.error, CLOSED_BY_DELEGATOR);
        assert_eq!(h.account().used, U256::from(1));
        assert_eq!(h.account().need, U256::zero());
    }

    #[tokio::test]
    async fn partner_update_skips_the_balance_proof() {
        let h = Harness::new();
        h.delegate(h.payload(1, 1), 0);
        h.credit(10);
        h.close_on_chain(6_000);
        h.run(vec![
            closed_by(PARTNER, 5_000),
            ChainEvent::BalanceProofUpdated {
                channel_identifier: CHANNEL,
                participant: DELEGATOR,
                block_number: 5_100,
            },
            ChainEvent::NewBlock(5_970),
        ])
        .await
        .unwrap();
        assert_eq!(h.methods(), vec!["unlockDelegate"]);
        assert_eq!(
            h.stored().unwrap().status,
            DelegateStatus::SuccessFinishedByOther
        );
    }

    #[tokio::test]
    async fn disposed_lock_is_skipped() {
        let h = Harness::new();
        let mut payload = h.payload(1, 2);
        payload.announce_disposed = vec![AnnounceDisposed {
            secret_hash: H256::repeat_byte(2),
        }];
        h.delegate(payload, 0);
        h.credit(10);
        h.close_on_chain(6_000);
        h.run(vec![closed_by(PARTNER, 5_000), ChainEvent::NewBlock(5_970)])
            .await
            .unwrap();

        assert_eq!(h.methods(), vec!["updateBalanceProofDelegate", "unlockDelegate"]);
        assert_eq!(count(&h, ExecuteStatus::SuccessFinished), 2);
        assert_eq!(count(&h, ExecuteStatus::SuccessWithoutExecution), 1);
        assert_eq!(h.account().used, U256::from(3 + 1));
        assert_eq!(h.stored().unwrap().status, DelegateStatus::SuccessFinished);
    }

    #[tokio::test]
    async fn punish_stops_at_first_success() {
        let h = Harness::new();
        let mut payload = h.payload(0, 0);
        payload.punishes = (0x71..=0x73)
            .map(|b| Punish {
                lock_hash: H256::repeat_byte(b),
                ..Default::default()
            })
            .collect();
        h.delegate(payload, 0);
        h.credit(10);
        assert_eq!(h.account().need, U256::from(2));
        h.close_on_chain(6_000);
        h.chain.push_outcome(MockOutcome::Reverted);
        h.chain.push_outcome(MockOutcome::Mined);

        h.run(vec![closed_by(PARTNER, 5_000), ChainEvent::NewBlock(6_000)])
            .await
            .unwrap();

        assert_eq!(h.methods(), vec!["punishObsoleteUnlock", "punishObsoleteUnlock"]);
        assert_eq!(count(&h, ExecuteStatus::ErrorFinished), 1);
        assert_eq!(count(&h, ExecuteStatus::SuccessFinished), 1);
        assert_eq!(count(&h, ExecuteStatus::SuccessWithoutExecution), 1);
        let account = h.account();
        assert_eq!(account.used, U256::from(2));
        assert_eq!(account.locked, U256::zero());
        assert_eq!(account.need, U256::zero());
        let stored = h.stored().unwrap();
        assert_eq!(stored.punish_outcome, PunishOutcome::Punished);
        assert_eq!(stored.status, DelegateStatus::SuccessFinished);
    }

    /// A punish-only payload, one punish per byte of `bytes`.
    fn punishes(
        h: &Harness,
        bytes: std::ops::RangeInclusive<u8>,
    ) -> watchtower_types::DelegationPayload {
        let mut payload = h.payload(0, 0);
        payload.punishes = bytes
            .map(|b| Punish {
                lock_hash: H256::repeat_byte(b),
                ..Default::default()
            })
            .collect();
        payload
    }

    #[tokio::test]
    async fn unfunded_punish_fails_the_delegate() {
        let h = Harness::new();
        h.delegate(punishes(&h, 0x71..=0x71), 0);
        h.close_on_chain(6_000);

        h.run(vec![closed_by(PARTNER, 5_000), ChainEvent::NewBlock(6_000)])
            .await
            .unwrap();

        assert!(h.chain.submitted().is_empty());
        let stored = h.stored().unwrap();
        assert_eq!(stored.status, DelegateStatus::Failed);
        assert_eq!(stored.punish_outcome, PunishOutcome::AllFailed);
        assert!(stored.error.contains("Insufficient balance"));
        assert_eq!(h.account().need, U256::zero());
    }

    #[tokio::test]
    async fn one_tick_runs_a_delegate_in_order() {
        let h = Harness::new();
        let mut payload = h.payload(1, 1);
        payload.punishes = punishes(&h, 0x71..=0x71).punishes;
        h.delegate(payload, 0);
        h.credit(10);
        h.close_on_chain(6_000);
        h.chain.set_mining_delay(Duration::from_millis(20));

        // catching up: a single tick past both the reveal and the settle block
        h.run(vec![closed_by(PARTNER, 5_000), ChainEvent::NewBlock(6_050)])
            .await
            .unwrap();

        assert_eq!(
            h.methods(),
            vec!["updateBalanceProofDelegate", "unlockDelegate", "punishObsoleteUnlock"]
        );
        assert_eq!(h.chain.peak_mining(), 1);
        let stored = h.stored().unwrap();
        assert_eq!(stored.status, DelegateStatus::SuccessFinished);
        assert_eq!(stored.punish_outcome, PunishOutcome::Punished);
        let account = h.account();
        assert_eq!(account.used, U256::from(3 + 1 + 2));
        assert_eq!(account.need, U256::zero());
    }

    #[tokio::test]
    async fn busy_delegate_is_deferred_to_the_next_block() {
        let h = Harness::new();
        let mut payload = h.payload(1, 1);
        payload.punishes = punishes(&h, 0x71..=0x71).punishes;
        let key = h.delegate(payload, 0);
        h.credit(10);
        h.close_on_chain(6_000);
        h.chain.set_mining_delay(Duration::from_millis(20));

        // the settle block arrives while the update and unlock are mining
        h.run(vec![
            closed_by(PARTNER, 5_000),
            ChainEvent::NewBlock(5_970),
            ChainEvent::NewBlock(6_000),
        ])
        .await
        .unwrap();
        assert_eq!(h.methods(), vec!["updateBalanceProofDelegate", "unlockDelegate"]);
        let pending: Vec<_> = h
            .ctx
            .store()
            .monitors_of(&key)
            .unwrap()
            .into_iter()
            .map(|m| (m.trigger_block, m.kind))
            .collect();
        assert_eq!(pending, vec![(6_001, MonitorKind::Punish)]);

        h.run(vec![ChainEvent::NewBlock(6_001)]).await.unwrap();
        assert_eq!(h.methods().last(), Some(&"punishObsoleteUnlock"));
        assert_eq!(h.chain.peak_mining(), 1);
        assert_eq!(h.stored().unwrap().punish_outcome, PunishOutcome::Punished);
    }

    #[tokio::test]
    async fn shutdown_while_the_pool_is_full_puts_work_back() {
        let h = Harness::with_config(|c| c.scheduler.max_concurrent_actions = 1);
        let other = Address::repeat_byte(0xd2);
        h.delegate(h.payload(1, 0), 0);
        let waiting = h.delegate_as(h.payload(1, 0), other, 0);
        h.credit(10);
        h.credit_to(other, 10);
        h.close_on_chain(6_000);
        h.chain.set_mining_delay(Duration::from_millis(200));

        let ctx = h.ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            ctx.shutdown();
        });
        h.run(vec![closed_by(PARTNER, 5_000), ChainEvent::NewBlock(5_970)])
            .await
            .unwrap();

        assert_eq!(h.methods(), vec!["updateBalanceProofDelegate"]);
        assert_eq!(h.stored().unwrap().status, DelegateStatus::SuccessFinished);
        let stored = h.ctx.store().delegate(&waiting).unwrap().unwrap();
        assert_eq!(stored.status, DelegateStatus::Init);
        let pending: Vec<_> = h
            .ctx
            .store()
            .monitors_of(&waiting)
            .unwrap()
            .into_iter()
            .map(|m| (m.trigger_block, m.kind))
            .collect();
        assert_eq!(pending, vec![(5_970, MonitorKind::UnlockAndUpdateBalanceProof)]);
    }

    #[tokio::test]
    async fn every_punish_failing_refunds_once() {
        let h = Harness::new();
        let mut payload = h.payload(0, 0);
        payload.punishes = (0x71..=0x72)
            .map(|b| Punish {
                lock_hash: H256::repeat_byte(b),
                ..Default::default()
            })
            .collect();
        h.delegate(payload, 0);
        h.credit(10);
        h.close_on_chain(6_000);
        h.chain.push_outcome(MockOutcome::SubmitFails);
        h.chain.push_outcome(MockOutcome::Dropped);

        h.run(vec![closed_by(PARTNER, 5_000), ChainEvent::NewBlock(6_000)])
            .await
            .unwrap();

        assert_eq!(h.chain.submitted().len(), 2);
        assert_eq!(count(&h, ExecuteStatus::ErrorFinished), 2);
        let account = h.account();
        assert_eq!(account.used, U256::zero());
        assert_eq!(account.available(), U256::from(10));
        let stored = h.stored().unwrap();
        assert_eq!(stored.punish_outcome, PunishOutcome::AllFailed);
        assert_eq!(stored.status, DelegateStatus::Failed);
    }

    #[tokio::test]
    async fn underfunded_delegate_fails_without_calls() {
        let h = Harness::new();
        h.delegate(h.payload(1, 1), 0);
        h.close_on_chain(6_000);
        h.run(vec![closed_by(PARTNER, 5_000), ChainEvent::NewBlock(5_970)])
            .await
            .unwrap();

        assert!(h.chain.submitted().is_empty());
        assert!(h.records().is_empty());
        let stored = h.stored().unwrap();
        assert_eq!(stored.status, DelegateStatus::Failed);
        assert!(stored.error.contains("Insufficient balance"));
        assert_eq!(h.account().need, U256::zero());
    }

    #[tokio::test]
    async fn failed_update_still_unlocks() {
        let h = Harness::new();
        h.delegate(h.payload(1, 1), 0);
        h.credit(10);
        h.close_on_chain(6_000);
        h.chain.push_outcome(MockOutcome::Reverted);
        h.run(vec![closed_by(PARTNER, 5_000), ChainEvent::NewBlock(5_970)])
            .await
            .unwrap();

        assert_eq!(h.methods(), vec!["updateBalanceProofDelegate", "unlockDelegate"]);
        assert_eq!(h.stored().unwrap().status, DelegateStatus::PartialSuccess);
        let account = h.account();
        assert_eq!(account.used, U256::from(1));
        assert_eq!(account.available(), U256::from(9));
    }

    #[tokio::test]
    async fn expired_lock_is_not_submitted() {
        let h = Harness::new();
        let mut payload = h.payload(1, 1);
        payload.unlocks[0].lock.expiration = 5_900;
        h.delegate(payload, 0);
        h.credit(10);
        h.close_on_chain(6_000);
        h.run(vec![closed_by(PARTNER, 5_000), ChainEvent::NewBlock(5_970)])
            .await
            .unwrap();

        assert_eq!(h.methods(), vec!["updateBalanceProofDelegate"]);
        let stored = h.stored().unwrap();
        assert_eq!(stored.status, DelegateStatus::PartialSuccess);
        assert!(stored.error.contains("expired"));
        assert_eq!(h.account().need, U256::zero());
    }

    #[tokio::test]
    async fn settlement_forgets_the_channel() {
        let h = Harness::new();
        h.delegate(h.payload(1, 1), 0);
        assert_eq!(h.account().need, U256::from(4));
        h.run(vec![ChainEvent::ChannelSettled {
            channel_identifier: CHANNEL,
            block_number: 7_000,
        }])
        .await
        .unwrap();
        assert!(h.stored().is_none());
        assert_eq!(h.account().need, U256::zero());
    }

    #[tokio::test]
    async fn late_delegation_on_closed_channel_fires_next_block() {
        let h = Harness::new();
        h.credit(10);
        // channel already closed when the delegation arrives
        h.delegate(h.payload(1, 0), 6_000);
        h.run(vec![ChainEvent::NewBlock(5_980)]).await.unwrap();
        assert_eq!(h.methods(), vec!["updateBalanceProofDelegate"]);
    }

    #[tokio::test]
    async fn stops_on_shutdown() {
        let h = Harness::new();
        let (tx, rx) = mpsc::channel(1);
        let event_loop = ChainEventLoop::new(h.ctx.clone());
        h.ctx.shutdown();
        event_loop.run(rx).await.unwrap();
        drop(tx);
        assert_eq!(h.ctx.latest_block(), 0);
    }
}
