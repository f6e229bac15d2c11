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
//! # Watchtower Context Module 🕸️
//!
//! [`WatchtowerContext`] carries the handles every component shares: the
//! configuration, the store, the chain client, the latest observed block,
//! and the shutdown signal. It is created once at startup and cloned into
//! each task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ethers::types::U256;
use tokio::sync::broadcast;
use watchtower_chain::ChainClient;
use watchtower_config::WatchtowerConfig;
use watchtower_store::WatchtowerStore;
use watchtower_types::FeeSchedule;

/// WatchtowerContext contains the watchtower's configuration, collaborators
/// and shutdown signal.
pub struct WatchtowerContext<S> {
    /// The configuration of the watchtower.
    pub config: Arc<WatchtowerConfig>,
    store: S,
    chain: Arc<dyn ChainClient>,
    latest_block: Arc<AtomicU64>,
    /// Broadcasts a shutdown signal to all running tasks.
    ///
    /// When a graceful shutdown is initiated, a `()` value is sent via the
    /// broadcast::Sender. Each task receives it, reaches a safe terminal
    /// state, and completes.
    notify_shutdown: broadcast::Sender<()>,
}

impl<S: Clone> Clone for WatchtowerContext<S> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            store: self.store.clone(),
            chain: self.chain.clone(),
            latest_block: self.latest_block.clone(),
            notify_shutdown: self.notify_shutdown.clone(),
        }
    }
}

impl<S: WatchtowerStore> WatchtowerContext<S> {
    /// Creates a new WatchtowerContext.
    ///
    /// The latest block starts at whatever the store last persisted.
    pub fn new(
        config: WatchtowerConfig,
        store: S,
        chain: Arc<dyn ChainClient>,
    ) -> watchtower_utils::Result<Self> {
        let (notify_shutdown, _) = broadcast::channel(2);
        let latest = store.get_latest_block_number_or_default()?;
        tracing::debug!(latest_block = latest, "Resuming from the stored block");
        Ok(Self {
            config: Arc::new(config),
            store,
            chain,
            latest_block: Arc::new(AtomicU64::new(latest)),
            notify_shutdown,
        })
    }

    /// The store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The chain client.
    pub fn chain(&self) -> &Arc<dyn ChainClient> {
        &self.chain
    }

    /// Latest block the event loop has processed.
    pub fn latest_block(&self) -> u64 {
        self.latest_block.load(Ordering::SeqCst)
    }

    /// Records `block` as processed and persists it. Never moves backwards.
    pub fn set_latest_block(&self, block: u64) -> watchtower_utils::Result<()> {
        let previous = self.latest_block.fetch_max(block, Ordering::SeqCst);
        if block > previous {
            self.store.set_latest_block_number(block)?;
        }
        Ok(())
    }

    /// Fees charged per action.
    pub fn fees(&self) -> &FeeSchedule {
        &self.config.fees
    }

    /// Blocks before settlement at which unlocks fire.
    pub fn reveal_timeout(&self) -> u64 {
        self.config.delegation.reveal_timeout
    }

    /// Whether debug relaxations of intake are on.
    pub fn debug(&self) -> bool {
        self.config.delegation.debug
    }

    /// Chain id used in signed messages.
    pub fn chain_id(&self) -> U256 {
        self.chain.chain_id()
    }

    /// Block explorer for transaction links.
    pub fn explorer(&self) -> Option<&url::Url> {
        self.config.chain.explorer.as_ref()
    }

    /// Returns a broadcast receiver handle for the shutdown signal.
    pub fn shutdown_signal(&self) -> Shutdown {
        Shutdown::new(self.notify_shutdown.subscribe())
    }

    /// Sends a shutdown signal to all subscribed tasks.
    pub fn shutdown(&self) {
        match self.notify_shutdown.send(()) {
            Ok(receivers) => {
                tracing::debug!(receivers, "Shutdown signal sent");
            }
            Err(_) => tracing::trace!("Shutdown signal sent, nobody listening"),
        }
    }
}

/// Listens for the shutdown signal.
///
/// Shutdown is signalled using a `broadcast::Receiver`. Only a single value is
/// ever sent. Once a value has been sent via the broadcast channel, the
/// watchtower should shutdown.
#[derive(Debug)]
pub struct Shutdown {
    /// `true` if the shutdown signal has been received
    shutdown: bool,

    /// The receive half of the channel used to listen for shutdown.
    notify: broadcast::Receiver<()>,
}

impl Shutdown {
    /// Create a new `Shutdown` backed by the given `broadcast::Receiver`.
    pub fn new(notify: broadcast::Receiver<()>) -> Shutdown {
        Shutdown {
            shutdown: false,
            notify,
        }
    }

    /// Returns `true` if the shutdown signal has been received.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    /// Receive the shutdown notice, waiting if necessary.
    pub async fn recv(&mut self) {
        // If the shutdown signal has already been received, then return
        // immediately.
        if self.shutdown {
            return;
        }

        // Cannot receive a "lag error" as only one value is ever sent.
        let _ = self.notify.recv().await;

        // Remember that the signal has been received.
        self.shutdown = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::{Address, H256};
    use watchtower_chain::mock::MockChainClient;
    use watchtower_config::chain::ChainConfig;
    use watchtower_store::{HistoryStore, InMemoryStore};

    fn context(store: InMemoryStore) -> WatchtowerContext<InMemoryStore> {
        let chain = ChainConfig::new(
            url::Url::parse("http://localhost:8545").unwrap().into(),
            8888,
            H256::repeat_byte(1).into(),
            Address::repeat_byte(2),
        );
        WatchtowerContext::new(
            WatchtowerConfig::new(chain),
            store,
            Arc::new(MockChainClient::new()),
        )
        .unwrap()
    }

    #[test]
    #[tracing_test::traced_test]
    fn latest_block_resumes_and_never_moves_back() {
        let store = InMemoryStore::default();
        store.set_latest_block_number(40).unwrap();
        let ctx = context(store.clone());
        assert_eq!(ctx.latest_block(), 40);
        assert!(logs_contain("latest_block=40"));
        ctx.set_latest_block(45).unwrap();
        ctx.set_latest_block(41).unwrap();
        assert_eq!(ctx.latest_block(), 45);
        assert_eq!(store.get_latest_block_number_or_default().unwrap(), 45);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn shutdown_reaches_every_subscriber() {
        let ctx = context(InMemoryStore::default());
        let mut a = ctx.shutdown_signal();
        let mut b = ctx.clone().shutdown_signal();
        ctx.shutdown();
        a.recv().await;
        b.recv().await;
        assert!(a.is_shutdown() && b.is_shutdown());
        assert!(logs_contain("Shutdown signal sent"));
    }
}
