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


use ethers::types::Address;
use serde::{Deserialize, Serialize};
use watchtower_types::private_key::PrivateKey;
use watchtower_types::rpc_url::RpcUrl;

use crate::event_watcher::EventsWatcherConfig;

/// Receipts are polled every `1_000`ms by default.
const fn default_tx_poll_interval() -> u64 {
    1_000
}

/// ChainConfig is the configuration of the chain the watchtower acts on.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChainConfig {
    /// Http(s) Endpoint for quick Req/Res
    #[serde(skip_serializing)]
    pub http_endpoint: RpcUrl,
    /// chain specific id (output of chainId opcode on EVM networks)
    pub chain_id: u64,
    /// The Private Key of this account on this network.
    /// the format is more dynamic here:
    /// 1. if it starts with '0x' then this would be raw (64 bytes) hex encoded
    ///    private key.
    ///    Example: 0x8917174396171783496173419137618235192359106130478137647163400318
    ///
    /// 2. if it starts with '$' then it would be considered as an Enviroment variable
    ///    of a hex-encoded private key.
    ///    Example: $WATCHTOWER_PRIVATE_KEY
    #[serde(skip_serializing)]
    pub private_key: PrivateKey,
    /// Address of the token network contract.
    pub token_network: Address,
    /// Block to start watching from when no progress is stored.
    #[serde(default)]
    pub start_block: u64,
    /// Block explorer, used to generate clickable links for transactions.
    #[serde(default)]
    pub explorer: Option<url::Url>,
    /// How often to poll for a receipt, in milliseconds.
    #[serde(default = "default_tx_poll_interval")]
    pub tx_poll_interval: u64,
    /// Events watcher config
    #[serde(default)]
    pub events_watcher: EventsWatcherConfig,
}

impl ChainConfig {
    /// A chain config with every optional setting at its default.
    pub fn new(
        http_endpoint: RpcUrl,
        chain_id: u64,
        private_key: PrivateKey,
        token_network: Address,
    ) -> Self {
        Self {
            http_endpoint,
            chain_id,
            private_key,
            token_network,
            start_block: 0,
            explorer: None,
            tx_poll_interval: default_tx_poll_interval(),
            events_watcher: EventsWatcherConfig::default(),
        }
    }
}
