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

//! Fixed-width binary keys.
//!
//! Every key starts with a one byte table tag followed by big-endian
//! fields, so lexicographic order matches numeric order and every
//! composite key has exactly one encoding.

use ethers::types::{Address, H256};
use watchtower_types::{DelegateKey, MonitorEntry, MonitorKind};
use watchtower_utils::{Error, Result};

/// Accounts, keyed by delegator.
pub const ACCOUNT: u8 = 0x01;
/// Delegates, keyed by channel then delegator.
pub const DELEGATE: u8 = 0x02;
/// Punish records, keyed by delegate then lock hash.
pub const PUNISH: u8 = 0x03;
/// Announce-disposed records, keyed by delegate then secret hash.
pub const ANNOUNCE_DISPOSED: u8 = 0x04;
/// Monitor entries, keyed by trigger block, delegate and kind.
pub const MONITOR: u8 = 0x05;
/// Execute records, keyed by delegate then record id.
pub const EXECUTE_RECORD: u8 = 0x06;
/// The latest processed block number.
pub const LATEST_BLOCK: u8 = 0x07;

/// Length of an encoded [`DelegateKey`].
pub const DELEGATE_KEY_LEN: usize = 32 + 20;

fn put_delegate(buf: &mut Vec<u8>, key: &DelegateKey) {
    buf.extend_from_slice(key.channel_identifier.as_bytes());
    buf.extend_from_slice(key.delegator.as_bytes());
}

fn read_delegate(bytes: &[u8]) -> Result<DelegateKey> {
    if bytes.len() != DELEGATE_KEY_LEN {
        return Err(Error::Generic("malformed delegate key"));
    }
    Ok(DelegateKey::new(
        H256::from_slice(&bytes[..32]),
        Address::from_slice(&bytes[32..]),
    ))
}

/// `[ACCOUNT][address]`
pub fn account(address: &Address) -> Vec<u8> {
    let mut buf = Vec::with_capacity(21);
    buf.push(ACCOUNT);
    buf.extend_from_slice(address.as_bytes());
    buf
}

/// `[DELEGATE][channel][delegator]`
pub fn delegate(key: &DelegateKey) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + DELEGATE_KEY_LEN);
    buf.push(DELEGATE);
    put_delegate(&mut buf, key);
    buf
}

/// Prefix of all delegates of `channel`.
pub fn delegates_of_channel(channel: &H256) -> Vec<u8> {
    let mut buf = Vec::with_capacity(33);
    buf.push(DELEGATE);
    buf.extend_from_slice(channel.as_bytes());
    buf
}

/// Decodes a key produced by [`delegate`].
pub fn decode_delegate(bytes: &[u8]) -> Result<DelegateKey> {
    match bytes.split_first() {
        Some((&DELEGATE, rest)) => read_delegate(rest),
        _ => Err(Error::Generic("not a delegate key")),
    }
}

fn child(tag: u8, key: &DelegateKey, natural: Option<&H256>) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + DELEGATE_KEY_LEN + 32);
    buf.push(tag);
    put_delegate(&mut buf, key);
    if let Some(natural) = natural {
        buf.extend_from_slice(natural.as_bytes());
    }
    buf
}

/// `[PUNISH][delegate][lock_hash]`
pub fn punish(key: &DelegateKey, lock_hash: &H256) -> Vec<u8> {
    child(PUNISH, key, Some(lock_hash))
}

/// Prefix of all punish records of a delegate.
pub fn punishes_of(key: &DelegateKey) -> Vec<u8> {
    child(PUNISH, key, None)
}

/// `[ANNOUNCE_DISPOSED][delegate][secret_hash]`
pub fn announce_disposed(key: &DelegateKey, secret_hash: &H256) -> Vec<u8> {
    child(ANNOUNCE_DISPOSED, key, Some(secret_hash))
}

/// Prefix of all announce-disposed records of a delegate.
pub fn announce_disposed_of(key: &DelegateKey) -> Vec<u8> {
    child(ANNOUNCE_DISPOSED, key, None)
}

/// `[MONITOR][trigger_block BE][delegate][kind]`
pub fn monitor(entry: &MonitorEntry) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + 8 + DELEGATE_KEY_LEN + 1);
    buf.push(MONITOR);
    buf.extend_from_slice(&entry.trigger_block.to_be_bytes());
    put_delegate(&mut buf, &entry.delegate);
    buf.push(entry.kind.as_byte());
    buf
}

/// Key range `[start, end)` holding every monitor entry due at or before `block`.
pub fn monitors_due(block: u64) -> (Vec<u8>, Vec<u8>) {
    let start = vec![MONITOR];
    let end = match block.checked_add(1) {
        Some(next) => {
            let mut end = vec![MONITOR];
            end.extend_from_slice(&next.to_be_bytes());
            end
        }
        None => vec![MONITOR + 1],
    };
    (start, end)
}

/// Prefix of the whole monitor table.
pub fn monitor_table() -> Vec<u8> {
    vec![MONITOR]
}

/// Decodes a key produced by [`monitor`].
pub fn decode_monitor(bytes: &[u8]) -> Result<MonitorEntry> {
    if bytes.len() != 1 + 8 + DELEGATE_KEY_LEN + 1 || bytes[0] != MONITOR {
        return Err(Error::Generic("malformed monitor key"));
    }
    let mut block = [0u8; 8];
    block.copy_from_slice(&bytes[1..9]);
    let delegate = read_delegate(&bytes[9..9 + DELEGATE_KEY_LEN])?;
    let kind = MonitorKind::from_byte(bytes[bytes.len() - 1])
        .ok_or(Error::Generic("unknown monitor kind"))?;
    Ok(MonitorEntry::new(u64::from_be_bytes(block), kind, delegate))
}

/// `[EXECUTE_RECORD][delegate][id BE]`
pub fn execute_record(key: &DelegateKey, id: u64) -> Vec<u8> {
    let mut buf = child(EXECUTE_RECORD, key, None);
    buf.extend_from_slice(&id.to_be_bytes());
    buf
}

/// Prefix of all execute records of a delegate.
pub fn execute_records_of(key: &DelegateKey) -> Vec<u8> {
    child(EXECUTE_RECORD, key, None)
}

/// Prefix of the whole execute record table.
pub fn execute_record_table() -> Vec<u8> {
    vec![EXECUTE_RECORD]
}

/// `[LATEST_BLOCK]`
pub fn latest_block() -> Vec<u8> {
    vec![LATEST_BLOCK]
}

/// A fresh execute record id: unix seconds in the high bits, random low bits.
pub fn next_record_id() -> u64 {
    let secs = watchtower_types::unix_timestamp();
    (secs << 24) | (rand::random::<u64>() & 0x00ff_ffff)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dkey(c: u8, d: u8) -> DelegateKey {
        DelegateKey::new(H256::repeat_byte(c), Address::repeat_byte(d))
    }

    #[test]
    fn monitor_keys_sort_by_block_first() {
        let late = monitor(&MonitorEntry::new(
            256,
            MonitorKind::UnlockAndUpdateBalanceProof,
            dkey(0, 0),
        ));
        let early = monitor(&MonitorEntry::new(
            255,
            MonitorKind::Punish,
            dkey(0xff, 0xff),
        ));
        assert!(early < late);
    }

    #[test]
    fn monitor_key_decodes() {
        let entry = MonitorEntry::new(9_970, MonitorKind::Punish, dkey(1, 2));
        assert_eq!(decode_monitor(&monitor(&entry)).unwrap(), entry);
        assert!(decode_monitor(&delegate(&dkey(1, 2))).is_err());
    }

    #[test]
    fn due_range_is_inclusive_of_block() {
        let (start, end) = monitors_due(100);
        let at = monitor(&MonitorEntry::new(
            100,
            MonitorKind::Punish,
            dkey(0xff, 0xff),
        ));
        let after = monitor(&MonitorEntry::new(
            101,
            MonitorKind::Punish,
            dkey(0, 0),
        ));
        assert!(start <= at && at < end);
        assert!(after >= end);
        let (_, end) = monitors_due(u64::MAX);
        assert_eq!(end, vec![MONITOR + 1]);
    }

    #[test]
    fn channel_prefix_covers_its_delegates_only() {
        let prefix = delegates_of_channel(&H256::repeat_byte(1));
        assert!(delegate(&dkey(1, 9)).starts_with(&prefix));
        assert!(!delegate(&dkey(2, 9)).starts_with(&prefix));
        assert_eq!(decode_delegate(&delegate(&dkey(1, 9))).unwrap(), dkey(1, 9));
    }
}
