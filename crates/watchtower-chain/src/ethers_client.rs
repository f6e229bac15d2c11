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


use std::sync::Arc;
use std::time::Duration;

use ethers::prelude::PendingTransaction;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, H256, U256, U64};
use watchtower_config::chain::ChainConfig;
use watchtower_utils::clickable_link::tx_link;
use watchtower_utils::{probe, Error, Result, SignerClient};

use crate::contract::{TokenNetworkContract, TokenNetworkContractEvents};
use crate::{ChainClient, ChainEvent, ChannelInfo, ContractCall, TxReceipt};

/// A [`ChainClient`] signing with a local wallet over an HTTP provider.
#[derive(Clone)]
pub struct EthersChainClient {
    client: Arc<SignerClient>,
    contract: TokenNetworkContract<SignerClient>,
    chain_id: U256,
    tx_poll_interval: Duration,
    explorer: Option<url::Url>,
}

impl std::fmt::Debug for EthersChainClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EthersChainClient")
            .field("chain_id", &self.chain_id)
            .field("token_network", &self.contract.address())
            .finish()
    }
}

impl EthersChainClient {
    /// Connects to the chain described by `config`.
    pub fn new(config: &ChainConfig) -> Result<Self> {
        let provider =
            Provider::<Http>::try_from(config.http_endpoint.as_str())?
                .interval(Duration::from_millis(config.tx_poll_interval));
        let wallet = LocalWallet::from_bytes(config.private_key.as_bytes())?
            .with_chain_id(config.chain_id);
        let client = Arc::new(SignerClient::new(provider, wallet));
        let contract =
            TokenNetworkContract::new(config.token_network, client.clone());
        Ok(Self {
            client,
            contract,
            chain_id: U256::from(config.chain_id),
            tx_poll_interval: Duration::from_millis(config.tx_poll_interval),
            explorer: config.explorer.clone(),
        })
    }

    fn decode(
        event: TokenNetworkContractEvents,
        block_number: u64,
    ) -> ChainEvent {
        use TokenNetworkContractEvents::*;
        match event {
            ChannelClosedFilter(e) => ChainEvent::ChannelClosed {
                channel_identifier: H256(e.channel_identifier),
                closing_participant: e.closing_participant,
                block_number,
            },
            BalanceProofUpdatedFilter(e) => ChainEvent::BalanceProofUpdated {
                channel_identifier: H256(e.channel_identifier),
                participant: e.participant,
                block_number,
            },
            ChannelSettledFilter(e) => ChainEvent::ChannelSettled {
                channel_identifier: H256(e.channel_identifier),
                block_number,
            },
            ChannelCooperativeSettledFilter(e) => {
                ChainEvent::CooperativeSettled {
                    channel_identifier: H256(e.channel_identifier),
                    block_number,
                }
            }
            ChannelWithdrawFilter(e) => ChainEvent::Withdrawn {
                channel_identifier: H256(e.channel_identifier),
                block_number,
            },
        }
    }
}

#[async_trait::async_trait]
impl ChainClient for EthersChainClient {
    fn chain_id(&self) -> U256 {
        self.chain_id
    }

    fn node_address(&self) -> Address {
        self.client.address()
    }

    async fn current_block_number(&self) -> Result<u64> {
        let block = self.client.provider().get_block_number().await?;
        Ok(block.as_u64())
    }

    async fn channel_info(
        &self,
        channel_identifier: H256,
    ) -> Result<ChannelInfo> {
        let (settle_block_number, open_block_number, _state, _timeout) = self
            .contract
            .get_channel_info_by_channel_identifier(
                channel_identifier.to_fixed_bytes(),
            )
            .call()
            .await?;
        Ok(ChannelInfo {
            settle_block_number,
            open_block_number,
        })
    }

    #[tracing::instrument(skip_all, fields(method = call.method()))]
    async fn submit(&self, call: &ContractCall) -> Result<H256> {
        let tx = match call.clone() {
            ContractCall::UpdateBalanceProofDelegate {
                token,
                partner,
                participant,
                transfer_amount,
                locksroot,
                nonce,
                extra_hash,
                closing_signature,
                non_closing_signature,
            } => self.contract.update_balance_proof_delegate(
                token,
                partner,
                participant,
                transfer_amount,
                locksroot.to_fixed_bytes(),
                nonce,
                extra_hash.to_fixed_bytes(),
                closing_signature,
                non_closing_signature,
            ),
            ContractCall::UnlockDelegate {
                token,
                partner,
                participant,
                transfer_amount,
                expiration,
                amount,
                secret_hash,
                merkle_proof,
                signature,
            } => self.contract.unlock_delegate(
                token,
                partner,
                participant,
                transfer_amount,
                U256::from(expiration),
                amount,
                secret_hash.to_fixed_bytes(),
                merkle_proof,
                signature,
            ),
            ContractCall::PunishObsoleteUnlock {
                token,
                beneficiary,
                cheater,
                lock_hash,
                additional_hash,
                signature,
            } => self.contract.punish_obsolete_unlock(
                token,
                beneficiary,
                cheater,
                lock_hash.to_fixed_bytes(),
                additional_hash.to_fixed_bytes(),
                signature,
            ),
        };
        let pending = tx.send().await?;
        let tx_hash = pending.tx_hash();
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Execution,
            method = call.method(),
            pending = true,
            %tx_hash,
        );
        tracing::info!(
            "Tx {} is submitted and pending!",
            tx_link(self.explorer.as_ref(), tx_hash),
        );
        Ok(tx_hash)
    }

    async fn wait_mined(&self, tx_hash: H256) -> Result<TxReceipt> {
        let receipt =
            PendingTransaction::new(tx_hash, self.client.provider())
                .interval(self.tx_poll_interval)
                .await?;
        let receipt = receipt.ok_or(Error::TransactionDropped { tx_hash })?;
        let status = receipt.status == Some(U64::one());
        let block_number = receipt
            .block_number
            .map(|b| b.as_u64())
            .unwrap_or_default();
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Execution,
            finalized = true,
            success = status,
            %tx_hash,
            block_number,
        );
        Ok(TxReceipt {
            tx_hash,
            status,
            block_number,
        })
    }

    async fn events(&self, from: u64, to: u64) -> Result<Vec<ChainEvent>> {
        let found = self
            .contract
            .event_with_filter::<TokenNetworkContractEvents>(Default::default())
            .from_block(from)
            .to_block(to)
            .query_with_meta()
            .await?;
        Ok(found
            .into_iter()
            .map(|(event, log)| Self::decode(event, log.block_number.as_u64()))
            .collect())
    }
}
