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

use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Serialize};

/// The latest transfer state signed by both channel participants.
///
/// A zero `nonce` means no balance proof was delegated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceProof {
    /// Monotonic counter of the transfer state.
    pub nonce: u64,
    /// Total amount transferred by the partner.
    pub transfer_amount: U256,
    /// Merkle root of the pending locks.
    pub locksroot: H256,
    /// Hash of the message that carried this state.
    pub extra_hash: H256,
    /// Signature of the partner (the channel closer).
    pub closing_signature: Bytes,
    /// Signature of the delegator authorizing the delegated update.
    pub non_closing_signature: Bytes,
}

/// A conditional transfer waiting for its secret.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock {
    /// Block after which the lock can no longer be claimed.
    pub expiration: u64,
    /// Locked amount.
    pub amount: U256,
    /// Hash of the secret releasing the lock.
    #[serde(alias = "lock_secret_hash")]
    pub secret_hash: H256,
}

/// A delegated unlock of one pending lock.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unlock {
    /// The lock being released.
    pub lock: Lock,
    /// Proof that the lock is part of the locksroot.
    pub merkle_proof: Bytes,
    /// Delegator signature over the unlock delegation message.
    pub signature: Bytes,
}

/// Evidence that the partner unlocked a lock it had already disposed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Punish {
    /// Hash of the whole lock (not the secret hash).
    pub lock_hash: H256,
    /// Hash of the message that disposed the lock.
    pub additional_hash: H256,
    /// Partner signature over the disposed proof.
    pub signature: Bytes,
}

/// The delegator gave up this lock, so it must not be unlocked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnounceDisposed {
    /// Secret hash of the abandoned lock.
    #[serde(alias = "lock_secret_hash")]
    pub secret_hash: H256,
}

/// A secret known to the delegator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    /// The secret itself.
    pub secret: H256,
    /// Block at which the secret was registered on chain, if any.
    #[serde(default)]
    pub register_block: u64,
}

/// Everything a client hands over when delegating one channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationPayload {
    /// The channel being protected.
    pub channel_identifier: H256,
    /// Block at which this incarnation of the channel was opened.
    pub open_block_number: u64,
    /// Token of the channel.
    pub token_address: Address,
    /// The counterparty of the delegator.
    pub partner_address: Address,
    /// The balance proof to submit on close.
    #[serde(default)]
    pub update_transfer: BalanceProof,
    /// Locks to release before settlement.
    #[serde(default)]
    pub unlocks: Vec<Unlock>,
    /// Punish evidence against the partner.
    #[serde(default)]
    pub punishes: Vec<Punish>,
    /// Locks the delegator abandoned.
    #[serde(default, alias = "annouce_disposed")]
    pub announce_disposed: Vec<AnnounceDisposed>,
    /// Secrets known to the delegator.
    #[serde(default)]
    pub secrets: Vec<Secret>,
}

impl DelegationPayload {
    /// Whether a balance proof was delegated.
    pub fn has_balance_proof(&self) -> bool {
        self.update_transfer.nonce > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_accepts_legacy_field_names() {
        let json = r#"{
            "channel_identifier": "0x0101010101010101010101010101010101010101010101010101010101010101",
            "open_block_number": 42,
            "token_address": "0x0202020202020202020202020202020202020202",
            "partner_address": "0x0303030303030303030303030303030303030303",
            "update_transfer": {
                "nonce": 3,
                "transfer_amount": "0x64",
                "locksroot": "0x0000000000000000000000000000000000000000000000000000000000000000",
                "extra_hash": "0x0000000000000000000000000000000000000000000000000000000000000000",
                "closing_signature": "0x01",
                "non_closing_signature": "0x02"
            },
            "unlocks": [{
                "lock": {
                    "expiration": 900,
                    "amount": "0x0a",
                    "lock_secret_hash": "0x0404040404040404040404040404040404040404040404040404040404040404"
                },
                "merkle_proof": "0x",
                "signature": "0x03"
            }],
            "annouce_disposed": [{
                "secret_hash": "0x0505050505050505050505050505050505050505050505050505050505050505"
            }]
        }"#;
        let payload: DelegationPayload = serde_json::from_str(json).unwrap();
        assert!(payload.has_balance_proof());
        assert_eq!(payload.update_transfer.transfer_amount, U256::from(100));
        assert_eq!(payload.unlocks[0].lock.secret_hash, H256::repeat_byte(4));
        assert_eq!(payload.announce_disposed.len(), 1);
        assert!(payload.punishes.is_empty());
        assert!(payload.secrets.is_empty());
    }
}
