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


//! # Watchtower Verifier 🔏
//!
//! Decides whether a submitted delegation is authentic before anything is
//! persisted. Every signed artifact is rebuilt byte for byte (see
//! [`messages`]), hashed, and its signer recovered and compared with the
//! role it must play in the channel.
//!
//! Verification is read-only; a failure is reported as
//! [`Error::Verification`] with a human readable reason.

#![warn(missing_docs)]

use ethers::types::{Address, Signature, H256, U256};
use watchtower_types::{ChannelInfo, DelegationPayload};
use watchtower_utils::{Error, Result};

/// Signed message layouts.
pub mod messages;

pub use messages::ChannelBinding;

/// Facts the verifier checks a payload against.
#[derive(Debug, Clone, Copy)]
pub struct VerifyContext {
    /// Chain the token network lives on.
    pub chain_id: U256,
    /// Address the watchtower submits transactions from.
    pub watchtower_address: Address,
    /// The channel as the contract currently reports it.
    pub on_chain: ChannelInfo,
}

/// Recovers the address that signed `hash`.
pub fn recover(hash: H256, signature: &[u8]) -> Result<Address> {
    let signature = Signature::try_from(signature)?;
    Ok(signature.recover(hash)?)
}

fn recover_message(message: &[u8], signature: &[u8]) -> Result<Address> {
    recover(messages::signed_message_hash(message), signature)
}

fn reject(reason: impl Into<String>) -> Error {
    Error::Verification(reason.into())
}

/// Checks every signed artifact of `payload` delegated by `delegator`.
///
/// Returns the on-chain settle block (zero while the channel is open).
pub fn verify_delegation(
    payload: &DelegationPayload,
    delegator: Address,
    ctx: &VerifyContext,
) -> Result<u64> {
    let verified = check_delegation(payload, delegator, ctx);
    if let Err(e) = &verified {
        tracing::debug!(
            channel = ?payload.channel_identifier,
            ?delegator,
            "Delegation rejected: {e}",
        );
    }
    verified
}

fn check_delegation(
    payload: &DelegationPayload,
    delegator: Address,
    ctx: &VerifyContext,
) -> Result<u64> {
    if !payload.has_balance_proof()
        && payload.punishes.is_empty()
        && payload.announce_disposed.is_empty()
        && payload.secrets.is_empty()
    {
        return Err(reject("empty delegation"));
    }
    if !ctx.on_chain.exists() {
        return Err(Error::ChannelNotOpen(payload.channel_identifier));
    }
    if ctx.on_chain.open_block_number != payload.open_block_number {
        return Err(reject(format!(
            "open block number mismatch: on chain {}, claimed {}",
            ctx.on_chain.open_block_number, payload.open_block_number
        )));
    }
    let binding = ChannelBinding {
        channel_identifier: payload.channel_identifier,
        open_block_number: payload.open_block_number,
        chain_id: ctx.chain_id,
    };
    let partner = payload.partner_address;

    if payload.has_balance_proof() {
        let proof = &payload.update_transfer;
        let closer = recover_message(
            &messages::closing_balance_proof(proof, &binding),
            &proof.closing_signature,
        )
        .map_err(|e| reject(format!("closing signature: {e}")))?;
        if closer != partner {
            return Err(reject(format!(
                "closing signature signed by {closer:?}, expected partner {partner:?}"
            )));
        }
        if closer == delegator {
            return Err(reject("closing signature signed by the delegator"));
        }
        let non_closer = recover_message(
            &messages::non_closing_balance_proof(proof, &binding),
            &proof.non_closing_signature,
        )
        .map_err(|e| reject(format!("non-closing signature: {e}")))?;
        if non_closer != delegator {
            return Err(reject(format!(
                "non-closing signature signed by {non_closer:?}, expected delegator {delegator:?}"
            )));
        }
    }

    for unlock in &payload.unlocks {
        let signer = recover_message(
            &messages::unlock_delegate(
                ctx.watchtower_address,
                &unlock.lock,
                &binding,
            ),
            &unlock.signature,
        )
        .map_err(|e| reject(format!("unlock signature: {e}")))?;
        if signer != delegator {
            return Err(reject(format!(
                "unlock of {:?} signed by {signer:?}, expected delegator",
                unlock.lock.secret_hash
            )));
        }
    }

    for punish in &payload.punishes {
        let signer = recover_message(
            &messages::disposed_proof(
                punish.lock_hash,
                punish.additional_hash,
                &binding,
            ),
            &punish.signature,
        )
        .map_err(|e| reject(format!("punish signature: {e}")))?;
        if signer != partner {
            return Err(reject(format!(
                "punish of {:?} signed by {signer:?}, expected partner",
                punish.lock_hash
            )));
        }
    }

    if payload.announce_disposed.iter().any(|a| a.secret_hash.is_zero()) {
        return Err(reject("announce disposed with empty secret hash"));
    }
    if payload.secrets.iter().any(|s| s.secret.is_zero()) {
        return Err(reject("empty secret"));
    }
    Ok(ctx.on_chain.settle_block_number)
}
