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
//! # Watchtower Utils Module 🕸️
//!
//! Shared pieces used by every watchtower crate: the [`Error`] enum,
//! the probe tracing target, retry policies and terminal links.

use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Provider};
use ethers::signers::LocalWallet;
use ethers::types::{Address, H256, U256};

/// Terminal hyperlinks for transaction hashes.
pub mod clickable_link;
/// A module used for debugging watchtower lifecycle, sync state, or action execution.
pub mod probe;
/// Retry functionality
pub mod retry;

/// The ethers client the watchtower signs and submits transactions with.
pub type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// An enum of all possible errors that could be encountered during the execution of the
/// watchtower.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An Io error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// JSON Error occurred.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Config loading error.
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    /// Error while iterating over a glob pattern.
    #[error(transparent)]
    GlobPattern(#[from] glob::PatternError),
    /// Error from Glob Iterator.
    #[error(transparent)]
    Glob(#[from] glob::GlobError),
    /// Error while parsing a URL.
    #[error(transparent)]
    Url(#[from] url::ParseError),
    /// Sled database error.
    #[error(transparent)]
    Sled(#[from] sled::Error),
    /// A sled operation failed inside a running transaction.
    #[error(transparent)]
    SledTransaction(#[from] sled::transaction::UnabortableTransactionError),
    /// Error in Http Provider (ethers client).
    #[error(transparent)]
    EthersProvider(#[from] ethers::providers::ProviderError),
    /// Smart contract error.
    #[error(transparent)]
    EthersContractCall(
        #[from] ethers::contract::ContractError<Provider<Http>>,
    ),
    /// Smart contract error, raised through the signing client.
    #[error(transparent)]
    EthersContractCallWithSigner(
        #[from] ethers::contract::ContractError<SignerClient>,
    ),
    /// Ether wallet errors.
    #[error(transparent)]
    EtherWalletError(#[from] ethers::signers::WalletError),
    /// A signature could not be parsed or recovered.
    #[error(transparent)]
    Signature(#[from] ethers::types::SignatureError),
    /// Error while parsing the config files.
    #[error("Config parse error: {}", _0)]
    ParseConfig(#[from] serde_path_to_error::Error<config::ConfigError>),
    /// Generic error.
    #[error("{}", _0)]
    Generic(&'static str),
    /// A submitted delegation failed verification.
    #[error("Verification failed: {}", _0)]
    Verification(String),
    /// The delegation targets another incarnation of the channel.
    #[error("Stale open block number: stored {stored}, claimed {claimed}")]
    StaleOpenBlockNumber {
        /// Open block number recorded for the delegate.
        stored: u64,
        /// Open block number carried by the new delegation.
        claimed: u64,
    },
    /// The delegated balance proof is older than the stored one.
    #[error("Only a newer nonce can be delegated: stored {stored}, claimed {claimed}")]
    StaleNonce {
        /// Nonce of the stored balance proof.
        stored: u64,
        /// Nonce of the new balance proof.
        claimed: u64,
    },
    /// The account cannot cover the requested fee lock.
    #[error("Insufficient balance for {address:?}: requested {amount}, available {available}, need {need}")]
    InsufficientBalance {
        /// The delegator account.
        address: Address,
        /// The amount that was requested.
        amount: U256,
        /// What the account can still spend.
        available: U256,
        /// The outstanding need of the account.
        need: U256,
    },
    /// Ledger accounting would be corrupted by the operation.
    #[error("Ledger invariant violated: {}", _0)]
    InvariantViolation(String),
    /// The channel does not exist on chain.
    #[error("Channel {:?} is not open on chain", _0)]
    ChannelNotOpen(H256),
    /// No delegate is stored for the given key.
    #[error("Delegate {} not found", _0)]
    DelegateNotFound(String),
    /// The lock can no longer be unlocked.
    #[error("Lock has expired: expiration {expiration}, current block {current_block}")]
    LockExpired {
        /// Expiration block of the lock.
        expiration: u64,
        /// Latest observed block.
        current_block: u64,
    },
    /// Mined, but the receipt reports failure.
    #[error("Transaction {:?} reverted", tx_hash)]
    TransactionReverted {
        /// The reverted transaction.
        tx_hash: H256,
    },
    /// The transaction vanished from the mempool.
    #[error("Transaction {:?} dropped from the mempool", tx_hash)]
    TransactionDropped {
        /// The dropped transaction.
        tx_hash: H256,
    },
    /// The chain event stream was closed.
    #[error("Chain event stream closed")]
    EventStreamClosed,
    /// A backgorund task failed and force restarted.
    #[error("Task Force Restarted from an error")]
    ForceRestart,
    /// A background task failed to complete.
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    /// Errors after which accounting or storage can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvariantViolation(_)
                | Self::Sled(_)
                | Self::SledTransaction(_)
                | Self::Io(_)
        )
    }
}

/// A type alias for the result for the watchtower, that uses the `Error` enum.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_broken_state_is_fatal() {
        assert!(Error::InvariantViolation("used > total".into()).is_fatal());
        assert!(!Error::InsufficientBalance {
            address: Address::zero(),
            amount: U256::one(),
            available: U256::zero(),
            need: U256::one(),
        }
        .is_fatal());
        assert!(!Error::TransactionReverted {
            tx_hash: H256::zero()
        }
        .is_fatal());
    }
}
