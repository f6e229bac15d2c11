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


//! Byte layouts of the messages clients sign when delegating.
//!
//! Integers are big-endian: amounts and chain ids take 32 bytes, nonces and
//! block numbers 8. Every message ends with the channel it is bound to.

use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;
use watchtower_types::{BalanceProof, Lock};

const SIGNED_MESSAGE_PREFIX: &[u8] = b"\x19Spectrum Signed Message:\n";

/// The channel incarnation a message is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelBinding {
    /// Channel identifier.
    pub channel_identifier: H256,
    /// Open block of the incarnation.
    pub open_block_number: u64,
    /// Chain the token network lives on.
    pub chain_id: U256,
}

fn put_u256(buf: &mut Vec<u8>, value: U256) {
    let mut bytes = [0u8; 32];
    value.to_big_endian(&mut bytes);
    buf.extend_from_slice(&bytes);
}

fn put_binding(buf: &mut Vec<u8>, binding: &ChannelBinding) {
    buf.extend_from_slice(binding.channel_identifier.as_bytes());
    buf.extend_from_slice(&binding.open_block_number.to_be_bytes());
    put_u256(buf, binding.chain_id);
}

/// Message signed by the partner when closing with `proof` (176 bytes).
pub fn closing_balance_proof(
    proof: &BalanceProof,
    binding: &ChannelBinding,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(176);
    put_u256(&mut buf, proof.transfer_amount);
    buf.extend_from_slice(proof.locksroot.as_bytes());
    buf.extend_from_slice(&proof.nonce.to_be_bytes());
    buf.extend_from_slice(proof.extra_hash.as_bytes());
    put_binding(&mut buf, binding);
    buf
}

/// Message signed by the delegator to authorize submitting `proof` (144 bytes).
pub fn non_closing_balance_proof(
    proof: &BalanceProof,
    binding: &ChannelBinding,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(144);
    put_u256(&mut buf, proof.transfer_amount);
    buf.extend_from_slice(proof.locksroot.as_bytes());
    buf.extend_from_slice(&proof.nonce.to_be_bytes());
    put_binding(&mut buf, binding);
    buf
}

/// Message signed by the delegator to let `watchtower` unlock `lock` (188 bytes).
pub fn unlock_delegate(
    watchtower: Address,
    lock: &Lock,
    binding: &ChannelBinding,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(188);
    buf.extend_from_slice(watchtower.as_bytes());
    put_u256(&mut buf, U256::from(lock.expiration));
    put_u256(&mut buf, lock.amount);
    buf.extend_from_slice(lock.secret_hash.as_bytes());
    put_binding(&mut buf, binding);
    buf
}

/// Message signed by the partner when disposing a lock (136 bytes).
pub fn disposed_proof(
    lock_hash: H256,
    additional_hash: H256,
    binding: &ChannelBinding,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(136);
    buf.extend_from_slice(lock_hash.as_bytes());
    put_binding(&mut buf, binding);
    buf.extend_from_slice(additional_hash.as_bytes());
    buf
}

/// The hash that gets signed: keccak256 of prefix, decimal length and message.
pub fn signed_message_hash(message: &[u8]) -> H256 {
    let len = message.len().to_string();
    let mut buf = Vec::with_capacity(
        SIGNED_MESSAGE_PREFIX.len() + len.len() + message.len(),
    );
    buf.extend_from_slice(SIGNED_MESSAGE_PREFIX);
    buf.extend_from_slice(len.as_bytes());
    buf.extend_from_slice(message);
    H256(keccak256(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding() -> ChannelBinding {
        ChannelBinding {
            channel_identifier: H256::repeat_byte(0x11),
            open_block_number: 0x0102,
            chain_id: U256::from(8888),
        }
    }

    #[test]
    fn layouts_have_fixed_widths() {
        let proof = BalanceProof {
            nonce: 7,
            transfer_amount: U256::from(100),
            ..Default::default()
        };
        assert_eq!(closing_balance_proof(&proof, &binding()).len(), 176);
        assert_eq!(non_closing_balance_proof(&proof, &binding()).len(), 144);
        assert_eq!(
            unlock_delegate(Address::zero(), &Lock::default(), &binding()).len(),
            188
        );
        assert_eq!(
            disposed_proof(H256::zero(), H256::zero(), &binding()).len(),
            136
        );
    }

    #[test]
    fn nonce_and_open_block_are_big_endian() {
        let proof = BalanceProof {
            nonce: 7,
            ..Default::default()
        };
        let msg = non_closing_balance_proof(&proof, &binding());
        assert_eq!(&msg[64..72], &[0, 0, 0, 0, 0, 0, 0, 7]);
        assert_eq!(&msg[104..112], &[0, 0, 0, 0, 0, 0, 1, 2]);
        assert_eq!(msg[143], (8888u64 & 0xff) as u8);
    }

    #[test]
    fn prefix_carries_decimal_length() {
        let msg = [0u8; 136];
        let mut expected = b"\x19Spectrum Signed Message:\n136".to_vec();
        expected.extend_from_slice(&msg);
        assert_eq!(signed_message_hash(&msg), H256(keccak256(expected)));
    }
}
