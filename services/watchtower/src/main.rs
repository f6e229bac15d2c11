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


//! Watchtower Binary.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

use tokio::signal::unix;
use watchtower::service::ignite;
use watchtower_chain::EthersChainClient;
use watchtower_config::cli::{create_store, load_config, setup_logger, Opts};
use watchtower_context::WatchtowerContext;

/// The main entry point for the watchtower.
///
/// # Arguments
///
/// * `args` - The command line arguments.
#[paw::main]
#[tokio::main]
async fn main(args: Opts) -> anyhow::Result<()> {
    setup_logger(args.verbose)?;
    match dotenv::dotenv() {
        Ok(_) => {
            tracing::trace!("Loaded .env file");
        }
        Err(e) => {
            tracing::warn!("Failed to load .env file: {}", e);
        }
    }

    // The configuration is validated and configured from the given directory
    let mut config = load_config(args.config_dir.clone())?;
    args.apply(&mut config);

    // persistent storage for the watchtower
    let store = create_store(&args).await?;

    let chain = Arc::new(EthersChainClient::new(&config.chain)?);
    tracing::info!(
        "Watching token network {:?} as {:?}",
        config.chain.token_network,
        watchtower_chain::ChainClient::node_address(chain.as_ref()),
    );

    // The context holds the configuration and the handles shared by every
    // background service, and carries the shutdown signal.
    let ctx = WatchtowerContext::new(config, store.clone(), chain)?;

    // start all background services.
    // this does not block, will fire the services on background tasks.
    let services = ignite(&ctx).await?;
    tracing::event!(
        target: watchtower_utils::probe::TARGET,
        tracing::Level::DEBUG,
        kind = %watchtower_utils::probe::Kind::Lifecycle,
        started = true
    );

    // watch for signals
    let mut ctrlc_signal = unix::signal(unix::SignalKind::interrupt())?;
    let mut termination_signal = unix::signal(unix::SignalKind::terminate())?;
    let mut quit_signal = unix::signal(unix::SignalKind::quit())?;
    let mut event_loop = services.event_loop;
    let stopped_early = tokio::select! {
        _ = ctrlc_signal.recv() => {
            tracing::warn!("Interrupted (Ctrl+C) ...");
            None
        },
        _ = termination_signal.recv() => {
            tracing::warn!("Got Terminate signal ...");
            None
        },
        _ = quit_signal.recv() => {
            tracing::warn!("Quitting ...");
            None
        },
        result = &mut event_loop => Some(result),
    };

    tracing::event!(
        target: watchtower_utils::probe::TARGET,
        tracing::Level::DEBUG,
        kind = %watchtower_utils::probe::Kind::Lifecycle,
        shutdown = true
    );
    tracing::warn!("Shutting down...");
    // send shutdown signal to all of the application.
    ctx.shutdown();
    let result = match stopped_early {
        Some(result) => result,
        // in-flight actions are drained before the loop returns.
        None => event_loop.await,
    };
    services.watcher.abort();
    store.flush()?;
    result??;
    tracing::info!("Clean Exit ..");
    Ok(())
}
