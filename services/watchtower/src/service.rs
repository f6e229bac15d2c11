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


use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use watchtower_chain::ChainEventWatcher;
use watchtower_context::WatchtowerContext;
use watchtower_delegation::DelegationService;
use watchtower_scheduler::{recover, ChainEventLoop};
use watchtower_store::WatchtowerStore;
use watchtower_utils::Result;

/// Handles of the running background services.
pub struct Services<S> {
    /// The chain event watcher task.
    pub watcher: JoinHandle<Result<()>>,
    /// The chain event loop task.
    pub event_loop: JoinHandle<Result<()>>,
    /// Entry point for the delegation API.
    pub delegation: DelegationService<S>,
}

/// Repairs what the previous run left behind, then starts the chain event
/// watcher and the event loop on background tasks.
///
/// This does not block; the returned handles complete once `ctx` is shut
/// down.
pub async fn ignite<S: WatchtowerStore>(
    ctx: &WatchtowerContext<S>,
) -> anyhow::Result<Services<S>> {
    let recovered = recover(ctx)?;
    if recovered != Default::default() {
        tracing::warn!(
            interrupted = recovered.interrupted_records,
            reset = recovered.reset_delegates,
            "Recovered unfinished actions from the previous run",
        );
    }

    let config = &ctx.config.chain;
    let (sender, receiver) =
        mpsc::channel(ctx.config.scheduler.event_channel_capacity);
    let event_loop = tokio::spawn(ChainEventLoop::new(ctx.clone()).run(receiver));

    let watcher = if config.events_watcher.enabled {
        let watcher = ChainEventWatcher::new(
            ctx.chain().clone(),
            ctx.store().clone(),
            config.events_watcher.clone(),
            config.start_block,
        );
        let mut shutdown = ctx.shutdown_signal();
        tracing::debug!(
            "Events watcher for token network ({:?}) started.",
            config.token_network,
        );
        tokio::spawn(async move {
            tokio::select! {
                result = watcher.run(sender) => result,
                _ = shutdown.recv() => Ok(()),
            }
        })
    } else {
        tracing::warn!(
            "Events watcher is disabled for token network ({:?}).",
            config.token_network,
        );
        // keep the event loop waiting for shutdown rather than ending it.
        let mut shutdown = ctx.shutdown_signal();
        tokio::spawn(async move {
            shutdown.recv().await;
            drop(sender);
            Ok(())
        })
    };

    Ok(Services {
        watcher,
        event_loop,
        delegation: DelegationService::new(ctx.clone()),
    })
}
