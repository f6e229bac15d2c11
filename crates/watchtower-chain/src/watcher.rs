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


use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::TryFutureExt;
use tokio::sync::mpsc;
use watchtower_config::event_watcher::EventsWatcherConfig;
use watchtower_store::HistoryStore;
use watchtower_utils::{probe, Error, Result};

use crate::{ChainClient, ChainEvent};

/// Polls the token network in steps of `max-blocks-per-step` blocks and
/// forwards what it finds, in order, to the event loop.
///
/// Resumes after the latest block the event loop persisted.
pub struct ChainEventWatcher<S> {
    client: Arc<dyn ChainClient>,
    store: S,
    config: EventsWatcherConfig,
    start_block: u64,
}

impl<S: HistoryStore> ChainEventWatcher<S> {
    /// Creates a watcher that starts at `start_block` on a fresh store.
    pub fn new(
        client: Arc<dyn ChainClient>,
        store: S,
        config: EventsWatcherConfig,
        start_block: u64,
    ) -> Self {
        Self {
            client,
            store,
            config,
            start_block,
        }
    }

    /// Runs until the receiving side of `sender` goes away.
    ///
    /// Chain errors restart the polling loop after a pause; the position
    /// already forwarded is kept across restarts.
    #[tracing::instrument(skip_all)]
    pub async fn run(&self, sender: mpsc::Sender<ChainEvent>) -> Result<()> {
        let backoff = backoff::backoff::Constant::new(Duration::from_secs(1));
        // last block whose events were forwarded.
        let cursor = AtomicU64::new(
            self.store
                .get_latest_block_number(self.start_block.saturating_sub(1))?,
        );
        let step = self.config.max_blocks_per_step.max(1);
        let polling_interval =
            Duration::from_millis(self.config.polling_interval);
        let print_progress_interval =
            Duration::from_millis(self.config.print_progress_interval);
        let task = || async {
            // saves the last time we printed sync progress.
            let mut instant = std::time::Instant::now();
            let mut target_block_number = self
                .client
                .current_block_number()
                .map_err(backoff::Error::transient)
                .await?;
            loop {
                let block = cursor.load(Ordering::SeqCst);
                let dest_block =
                    core::cmp::min(block + step, target_block_number);
                if dest_block > block {
                    let found_events = self
                        .client
                        .events(block + 1, dest_block)
                        .map_err(backoff::Error::transient)
                        .await?;
                    tracing::trace!("Found #{} events", found_events.len());
                    for batch in with_block_ticks(found_events, dest_block) {
                        sender.send(batch).await.map_err(|_| {
                            backoff::Error::permanent(Error::EventStreamClosed)
                        })?;
                    }
                    cursor.store(dest_block, Ordering::SeqCst);
                }

                // if we fully synced, cooldown and look for new blocks.
                let should_cooldown = dest_block >= target_block_number;
                if should_cooldown {
                    tracing::trace!(
                        "Cooldown a bit for {}ms",
                        polling_interval.as_millis()
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(polling_interval) => {}
                        _ = sender.closed() => {
                            return Err(backoff::Error::permanent(
                                Error::EventStreamClosed,
                            ));
                        }
                    }
                    target_block_number = self
                        .client
                        .current_block_number()
                        .map_err(backoff::Error::transient)
                        .await?;
                }

                if print_progress_interval != Duration::from_millis(0)
                    && instant.elapsed() > print_progress_interval
                {
                    let currently_at = cursor.load(Ordering::SeqCst);
                    let progress = if target_block_number == 0 {
                        100.0
                    } else {
                        currently_at as f64 / target_block_number as f64
                            * 100.0
                    };
                    let is_syncing = progress < 99.99;
                    tracing::info!(
                        target_block = target_block_number,
                        currently_at,
                        is_syncing,
                        progress,
                    );
                    tracing::event!(
                        target: probe::TARGET,
                        tracing::Level::TRACE,
                        kind = %probe::Kind::Sync,
                        %block,
                        %dest_block,
                    );
                    instant = std::time::Instant::now();
                }
            }
        };
        backoff::future::retry(backoff, task).await
    }
}

/// Interleaves `NewBlock` notices into `events`: one after the last event
/// of each block, and a final one for `dest_block`.
fn with_block_ticks(events: Vec<ChainEvent>, dest_block: u64) -> Vec<ChainEvent> {
    let mut out = Vec::with_capacity(events.len() * 2 + 1);
    let mut current: Option<u64> = None;
    for event in events {
        let block = event.block_number();
        match current {
            Some(c) if c != block => out.push(ChainEvent::NewBlock(c)),
            _ => {}
        }
        current = Some(block);
        out.push(event);
    }
    match current {
        Some(c) if c != dest_block => out.push(ChainEvent::NewBlock(c)),
        _ => {}
    }
    out.push(ChainEvent::NewBlock(dest_block));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockChainClient;
    use ethers::types::{Address, H256};
    use watchtower_store::InMemoryStore;

    fn closed(block_number: u64) -> ChainEvent {
        ChainEvent::ChannelClosed {
            channel_identifier: H256::repeat_byte(1),
            closing_participant: Address::repeat_byte(2),
            block_number,
        }
    }

    #[test]
    fn ticks_follow_each_block() {
        let events = vec![
            closed(5),
            ChainEvent::ChannelSettled {
                channel_identifier: H256::repeat_byte(1),
                block_number: 5,
            },
            closed(8),
        ];
        let out = with_block_ticks(events, 10);
        let blocks: Vec<_> = out
            .iter()
            .filter_map(|e| match e {
                ChainEvent::NewBlock(n) => Some(*n),
                _ => None,
            })
            .collect();
        assert_eq!(blocks, vec![5, 8, 10]);
        assert!(matches!(out[2], ChainEvent::NewBlock(5)));
        assert_eq!(with_block_ticks(vec![closed(10)], 10).len(), 2);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn forwards_events_in_order_then_stops_when_receiver_drops(
    ) -> Result<()> {
        let client = Arc::new(MockChainClient::new());
        client.set_block_number(250);
        client.push_event(closed(120));
        client.push_event(closed(90));
        client.push_event(closed(40));
        let store = InMemoryStore::default();
        store.set_latest_block_number(50)?;
        let watcher = ChainEventWatcher::new(
            client.clone(),
            store,
            EventsWatcherConfig {
                polling_interval: 10,
                max_blocks_per_step: 100,
                ..Default::default()
            },
            0,
        );
        let (tx, mut rx) = mpsc::channel(16);
        let handle = tokio::spawn(async move { watcher.run(tx).await });
        let mut seen = Vec::new();
        while let Some(event) = rx.recv().await {
            let done = event == ChainEvent::NewBlock(250);
            seen.push(event);
            if done {
                break;
            }
        }
        drop(rx);
        let result = handle.await?;
        assert!(matches!(result, Err(Error::EventStreamClosed)));
        assert_eq!(
            seen,
            vec![
                closed(90),
                ChainEvent::NewBlock(90),
                closed(120),
                ChainEvent::NewBlock(120),
                ChainEvent::NewBlock(150),
                ChainEvent::NewBlock(250),
            ]
        );
        Ok(())
    }
}
