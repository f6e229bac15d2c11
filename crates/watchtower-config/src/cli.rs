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


use std::path::{Path, PathBuf};

use anyhow::Context;
use directories_next::ProjectDirs;
use structopt::StructOpt;

use crate::WatchtowerConfig;

/// Package identifier, where the default configuration & database are defined.
/// If the user does not start the watchtower with the `--config-dir`
/// it will default to read from the default location depending on the OS.
pub const PACKAGE_ID: [&str; 3] = ["tools", "webb", "watchtower"];

/// Watches payment channels on behalf of offline delegators.
///
/// Start the watchtower from a config directory:
///
/// $ watchtower -vvv -c <CONFIG_DIR_PATH>
#[derive(StructOpt)]
#[structopt(name = "Watchtower")]
pub struct Opts {
    /// A level of verbosity, and can be used multiple times
    #[structopt(short, long, parse(from_occurrences))]
    pub verbose: i32,
    /// Directory that contains configration files.
    #[structopt(
        short = "c",
        long = "config-dir",
        value_name = "PATH",
        parse(from_os_str)
    )]
    pub config_dir: Option<PathBuf>,
    /// Keep the delegation store in a temporary directory that is removed
    /// on exit.
    #[structopt(long)]
    pub tmp: bool,
    /// Accept stale nonces and open block numbers, whatever the config says.
    #[structopt(long)]
    pub debug: bool,
}

impl Opts {
    /// Applies the command-line overrides on top of a loaded config.
    pub fn apply(&self, config: &mut WatchtowerConfig) {
        if self.debug && !config.delegation.debug {
            tracing::warn!("Debug mode enabled from the command line");
            config.delegation.debug = true;
        }
    }

    fn project_dirs() -> anyhow::Result<ProjectDirs> {
        ProjectDirs::from(PACKAGE_ID[0], PACKAGE_ID[1], PACKAGE_ID[2])
            .context("failed to resolve the watchtower directories")
    }
}

/// Loads the configuration from the given directory, or from the
/// platform config directory when none is given.
pub fn load_config<P>(
    config_dir: Option<P>,
) -> Result<WatchtowerConfig, anyhow::Error>
where
    P: AsRef<Path>,
{
    let path = match config_dir {
        Some(p) => p.as_ref().to_path_buf(),
        None => Opts::project_dirs()?.config_dir().to_path_buf(),
    };
    anyhow::ensure!(path.is_dir(), "{} is not a directory", path.display());
    tracing::trace!("Loading watchtower config from {}", path.display());
    let config = crate::utils::load(&path)?;
    tracing::debug!(
        chain_id = %config.chain.chain_id,
        debug = config.delegation.debug,
        "Watchtower config loaded",
    );
    Ok(config)
}

/// Installs the global subscriber.
///
/// `0` logs errors only, every extra `-v` goes one level further down to `TRACE`.
/// Probe events are always kept at `DEBUG` or below so they can be scraped.
pub fn setup_logger(verbosity: i32) -> anyhow::Result<()> {
    use tracing::Level;
    let log_level = match verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        3 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let probe_level = log_level.max(Level::DEBUG);
    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(format!("watchtower={log_level}").parse()?)
        .add_directive(format!("{}={probe_level}", watchtower_utils::probe::TARGET).parse()?);
    let logger = tracing_subscriber::fmt()
        .with_target(true)
        .with_env_filter(env_filter);
    #[cfg(not(feature = "integration-tests"))]
    let logger = logger.pretty();
    // json lines are what the integration harness parses.
    #[cfg(feature = "integration-tests")]
    let logger = logger.json().flatten_event(true).with_current_span(false);

    logger.init();
    Ok(())
}

/// Opens the sled store under `<config-dir>/../store`, the platform data
/// directory, or a temporary directory with `--tmp`.
pub async fn create_store(
    opts: &Opts,
) -> anyhow::Result<watchtower_store::SledStore> {
    if opts.tmp {
        tracing::debug!("Using a temporary delegation store");
        return Ok(watchtower_store::SledStore::temporary()?);
    }
    let db_path = match opts.config_dir.as_deref() {
        Some(dir) => dir.parent().unwrap_or(dir).join("store"),
        None => Opts::project_dirs()?.data_local_dir().join("store"),
    };
    tracing::debug!("Opening delegation store at {}", db_path.display());
    let store = watchtower_store::SledStore::open(db_path)?;
    Ok(store)
}
