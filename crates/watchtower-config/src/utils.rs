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

use config::{Config, File};
use watchtower_utils::Error;

use crate::WatchtowerConfig;

/// Environment variables with this prefix override file settings,
/// e.g. `WATCHTOWER_CHAIN_CHAIN-ID`.
pub const ENV_PREFIX: &str = "WATCHTOWER";

/// A helper function that will search for all config files in the given directory and return them as a vec
/// of the paths.
///
/// Supported file extensions are:
/// - `.toml`.
/// - `.json`.
pub fn search_config_files<P: AsRef<Path>>(
    base_dir: P,
) -> watchtower_utils::Result<Vec<PathBuf>> {
    // A pattern that covers all toml or json files in the config directory and subdirectories.
    let toml_pattern = format!("{}/**/*.toml", base_dir.as_ref().display());
    let json_pattern = format!("{}/**/*.json", base_dir.as_ref().display());
    tracing::trace!(
        "Loading config files from {} and {}",
        toml_pattern,
        json_pattern
    );
    let toml_files = glob::glob(&toml_pattern)?;
    let json_files = glob::glob(&json_pattern)?;
    toml_files
        .chain(json_files)
        .map(|v| v.map_err(Error::from))
        .collect()
}

/// Try to parse the [`WatchtowerConfig`] from the given config file(s).
pub fn parse_from_files(
    files: &[PathBuf],
) -> watchtower_utils::Result<WatchtowerConfig> {
    let mut builder = Config::builder();
    for config_file in files {
        tracing::trace!("Loading config file: {}", config_file.display());
        let ext = config_file
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        let format = match ext {
            "toml" => config::FileFormat::Toml,
            "json" => config::FileFormat::Json,
            _ => {
                tracing::warn!("Unknown file extension: {}", ext);
                continue;
            }
        };
        builder = builder
            .add_source(File::from(config_file.as_path()).format(format));
    }

    // also merge in the environment.
    let builder = builder.add_source(
        config::Environment::with_prefix(ENV_PREFIX).separator("_"),
    );
    let cfg = builder.build()?;
    let config: Result<
        WatchtowerConfig,
        serde_path_to_error::Error<config::ConfigError>,
    > = serde_path_to_error::deserialize(cfg);
    match config {
        Ok(c) => postloading_process(c),
        Err(e) => {
            tracing::error!("{}", e);
            Err(e.into())
        }
    }
}

/// Load the configuration files found under `path`.
///
/// it is the same as using the [`search_config_files`] and [`parse_from_files`] functions combined.
pub fn load<P: AsRef<Path>>(
    path: P,
) -> watchtower_utils::Result<WatchtowerConfig> {
    parse_from_files(&search_config_files(path)?)
}

/// The postloading_process exists to validate configuration.
pub fn postloading_process(
    config: WatchtowerConfig,
) -> watchtower_utils::Result<WatchtowerConfig> {
    tracing::trace!("Checking configration sanity ...");
    if config.delegation.reveal_timeout == 0 {
        return Err(Error::Generic("delegation.reveal-timeout must be positive"));
    }
    if config.scheduler.max_concurrent_actions == 0 {
        return Err(Error::Generic(
            "scheduler.max-concurrent-actions must be positive",
        ));
    }
    if config.scheduler.event_channel_capacity == 0 {
        return Err(Error::Generic(
            "scheduler.event-channel-capacity must be positive",
        ));
    }
    if config.chain.events_watcher.max_blocks_per_step == 0 {
        return Err(Error::Generic(
            "chain.events-watcher.max-blocks-per-step must be positive",
        ));
    }
    let fees = &config.fees;
    if fees.unlock == 0 || fees.punish == 0 || fees.update_balance_proof == 0 {
        tracing::warn!(
            "!!WARNING!!: some actions are free ({:?}), delegators can make the watchtower spend gas at no cost",
            fees
        );
    }
    if !config.chain.events_watcher.enabled {
        tracing::warn!(
            "!!WARNING!!: events watcher is disabled, no delegate will ever be acted on"
        );
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CONFIG: &str = r#"
[chain]
http-endpoint = "http://localhost:8545"
chain-id = 8888
private-key = "0x8917174396171783496173419137618235192359106130478137647163400318"
token-network = "0x0000000000000000000000000000000000000abc"
start-block = 12

[chain.events-watcher]
polling-interval = 1000

[fees]
unlock = 4
"#;

    fn write(dir: &Path, name: &str, body: &str) {
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        f.write_all(body.as_bytes()).unwrap();
    }

    #[test]
    fn loads_toml_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "watchtower.toml", CONFIG);
        let config = load(dir.path()).unwrap();
        assert_eq!(config.chain.chain_id, 8888);
        assert_eq!(config.chain.start_block, 12);
        assert_eq!(config.chain.tx_poll_interval, 1_000);
        assert_eq!(config.chain.events_watcher.polling_interval, 1_000);
        assert_eq!(config.chain.events_watcher.max_blocks_per_step, 100);
        assert!(config.chain.events_watcher.enabled);
        assert_eq!(config.fees.unlock, 4);
        assert_eq!(config.fees.punish, 2);
        assert_eq!(config.fees.update_balance_proof, 3);
        assert_eq!(config.delegation.reveal_timeout, 30);
        assert!(!config.delegation.debug);
        assert_eq!(config.scheduler.max_concurrent_actions, 16);
    }

    #[test]
    fn rejects_zero_reveal_timeout() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "watchtower.toml",
            &format!("{CONFIG}\n[delegation]\nreveal-timeout = 0\n"),
        );
        assert!(load(dir.path()).is_err());
    }

    #[test]
    fn reports_missing_keys() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "watchtower.toml", "[chain]\nchain-id = 1\n");
        let err = load(dir.path()).unwrap_err();
        assert!(matches!(err, Error::ParseConfig(_)));
    }
}
