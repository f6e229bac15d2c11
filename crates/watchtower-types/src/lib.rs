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
//! # Watchtower Types Module 🕸️
//!
//! The records the watchtower persists and exchanges: fee accounts,
//! delegates with their signed payloads, monitor entries and the
//! execution audit trail.

/// Fee accounts kept per delegator.
pub mod account;
/// On-chain channel facts.
pub mod channel;
/// Delegates and their state machine.
pub mod delegate;
/// Audit trail of on-chain attempts.
pub mod execute;
/// Scheduled monitor entries.
pub mod monitor;
/// The delegation payload submitted by clients.
pub mod payload;
/// A wrapper around a private key read from config.
pub mod private_key;
/// A wrapper around an RPC url read from config.
pub mod rpc_url;

pub use account::{Account, FeeSchedule};
pub use channel::ChannelInfo;
pub use delegate::{Delegate, DelegateKey, DelegateStatus, PunishOutcome};
pub use execute::{ExecuteKind, ExecuteRecord, ExecuteStatus};
pub use monitor::{MonitorEntry, MonitorKind};
pub use payload::{
    AnnounceDisposed, BalanceProof, DelegationPayload, Lock, Punish, Secret,
    Unlock,
};

/// Seconds since the unix epoch.
pub fn unix_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
