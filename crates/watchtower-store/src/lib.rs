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


//! # Watchtower Store Module 🕸️
//!
//! Persistence for the watchtower.
//!
//! ## Overview
//!
//! Every record lives in one ordered key space (see [`keys`]). Mutations that
//! must stay consistent with each other, like a fee lock and the execute
//! record holding it, go through [`WatchtowerStore::transaction`], which
//! commits all writes of the closure or none of them.

use std::collections::HashSet;
use std::fmt::Debug;

use ethers::types::{Address, H256};
use serde::de::DeserializeOwned;
use serde::Serialize;
use watchtower_types::{
    Account, AnnounceDisposed, Delegate, DelegateKey, DelegateStatus,
    ExecuteRecord, ExecuteStatus, MonitorEntry, Punish,
};
use watchtower_utils::Result;

/// Binary key layout of every table.
pub mod keys;
/// A module for managing in-memory storage of the watchtower.
pub mod mem;
/// A module for setting up and managing a [Sled](https://sled.rs)-based database.
#[cfg(feature = "sled")]
pub mod sled;

/// A store that uses in memory data structures as the backend.
pub use mem::InMemoryStore;
/// A store that uses [`sled`](https://sled.rs) as the backend.
#[cfg(feature = "sled")]
pub use self::sled::SledStore;

/// Raw key/value pairs returned by scans.
pub type Entries = Vec<(Vec<u8>, Vec<u8>)>;

/// HistoryStore tracks the latest block the chain watcher processed.
pub trait HistoryStore: Clone + Send + Sync {
    /// Sets the latest block number, returning the previous one.
    fn set_latest_block_number(&self, block_number: u64) -> Result<u64>;

    /// Gets the latest block number, or `default_block_number` if none was stored.
    fn get_latest_block_number(&self, default_block_number: u64) -> Result<u64>;

    /// Gets the latest block number or zero.
    fn get_latest_block_number_or_default(&self) -> Result<u64> {
        self.get_latest_block_number(0)
    }
}

/// The view of the store inside a transaction.
pub trait StoreTransaction {
    /// Reads a value, observing writes made earlier in the same transaction.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    /// Writes a value.
    fn insert(&self, key: &[u8], value: Vec<u8>) -> Result<()>;
    /// Deletes a value.
    fn remove(&self, key: &[u8]) -> Result<()>;
}

/// Typed access to records inside a transaction.
pub trait StoreTransactionExt: StoreTransaction {
    /// Reads and decodes a record.
    fn get_record<V: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<V>> {
        match self.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Encodes and writes a record.
    fn put_record<V: Serialize>(&self, key: &[u8], value: &V) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.insert(key, bytes)
    }

    /// The account of `address`, a zero account if it never had one.
    fn account(&self, address: Address) -> Result<Account> {
        Ok(self
            .get_record(&keys::account(&address))?
            .unwrap_or_else(|| Account::new(address)))
    }

    /// Writes an account.
    fn save_account(&self, account: &Account) -> Result<()> {
        self.put_record(&keys::account(&account.address), account)
    }

    /// Reads a delegate.
    fn delegate(&self, key: &DelegateKey) -> Result<Option<Delegate>> {
        self.get_record(&keys::delegate(key))
    }

    /// Writes a delegate.
    fn save_delegate(&self, delegate: &Delegate) -> Result<()> {
        self.put_record(&keys::delegate(&delegate.key()), delegate)
    }

    /// Whether a punish for `lock_hash` is already stored.
    fn has_punish(&self, key: &DelegateKey, lock_hash: &H256) -> Result<bool> {
        Ok(self.get(&keys::punish(key, lock_hash))?.is_some())
    }

    /// Stores a punish record.
    fn save_punish(&self, key: &DelegateKey, punish: &Punish) -> Result<()> {
        self.put_record(&keys::punish(key, &punish.lock_hash), punish)
    }

    /// Whether `secret_hash` was already announced as disposed.
    fn has_announce_disposed(
        &self,
        key: &DelegateKey,
        secret_hash: &H256,
    ) -> Result<bool> {
        Ok(self.get(&keys::announce_disposed(key, secret_hash))?.is_some())
    }

    /// Stores an announce-disposed record.
    fn save_announce_disposed(
        &self,
        key: &DelegateKey,
        announce: &AnnounceDisposed,
    ) -> Result<()> {
        self.put_record(
            &keys::announce_disposed(key, &announce.secret_hash),
            announce,
        )
    }

    /// Adds a monitor entry; adding the same entry twice keeps one.
    fn add_monitor(&self, entry: &MonitorEntry) -> Result<()> {
        self.insert(&keys::monitor(entry), Vec::new())
    }

    /// Removes a monitor entry, returning whether it was present.
    fn take_monitor(&self, entry: &MonitorEntry) -> Result<bool> {
        let key = keys::monitor(entry);
        if self.get(&key)?.is_none() {
            return Ok(false);
        }
        self.remove(&key)?;
        Ok(true)
    }

    /// Writes an execute record.
    fn save_execute_record(&self, record: &ExecuteRecord) -> Result<()> {
        self.put_record(
            &keys::execute_record(&record.delegate_key(), record.id),
            record,
        )
    }
}

impl<T: StoreTransaction + ?Sized> StoreTransactionExt for T {}

/// The storage backend of the watchtower.
pub trait WatchtowerStore: HistoryStore + Debug + 'static {
    /// Runs `f` atomically: either every write it makes is committed, or,
    /// if it returns an error, none is.
    ///
    /// `f` may run more than once when the backend retries on conflict, so
    /// it must not have side effects outside the transaction.
    fn transaction<F, R>(&self, f: F) -> Result<R>
    where
        F: Fn(&dyn StoreTransaction) -> Result<R>;

    /// Reads a single value outside of a transaction.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Every pair whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Entries>;

    /// Every pair with `start <= key < end`, in key order.
    fn scan_range(&self, start: &[u8], end: &[u8]) -> Result<Entries>;
}

fn decode_all<V: DeserializeOwned>(entries: Entries) -> Result<Vec<V>> {
    entries
        .into_iter()
        .map(|(_, v)| serde_json::from_slice(&v).map_err(Into::into))
        .collect()
}

/// Typed queries over a [`WatchtowerStore`].
pub trait WatchtowerStoreExt: WatchtowerStore {
    /// The account of `address`, a zero account if it never had one.
    fn account(&self, address: Address) -> Result<Account> {
        match self.get(&keys::account(&address))? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Account::new(address)),
        }
    }

    /// Reads a delegate.
    fn delegate(&self, key: &DelegateKey) -> Result<Option<Delegate>> {
        match self.get(&keys::delegate(key))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Every delegate protecting `channel`.
    fn delegates_of_channel(&self, channel: &H256) -> Result<Vec<Delegate>> {
        decode_all(self.scan_prefix(&keys::delegates_of_channel(channel))?)
    }

    /// Every delegate currently in `status`.
    fn delegates_with_status(
        &self,
        status: DelegateStatus,
    ) -> Result<Vec<Delegate>> {
        let all: Vec<Delegate> =
            decode_all(self.scan_prefix(&[keys::DELEGATE])?)?;
        Ok(all.into_iter().filter(|d| d.status == status).collect())
    }

    /// Stored punish records of a delegate.
    fn punishes(&self, key: &DelegateKey) -> Result<Vec<Punish>> {
        decode_all(self.scan_prefix(&keys::punishes_of(key))?)
    }

    /// Stored announce-disposed records of a delegate.
    fn announce_disposed(
        &self,
        key: &DelegateKey,
    ) -> Result<Vec<AnnounceDisposed>> {
        decode_all(self.scan_prefix(&keys::announce_disposed_of(key))?)
    }

    /// Secret hashes announced as disposed for a delegate.
    fn disposed_secret_hashes(&self, key: &DelegateKey) -> Result<HashSet<H256>> {
        Ok(self
            .announce_disposed(key)?
            .into_iter()
            .map(|a| a.secret_hash)
            .collect())
    }

    /// Monitor entries with `trigger_block <= block`, earliest first.
    fn due_monitors(&self, block: u64) -> Result<Vec<MonitorEntry>> {
        let (start, end) = keys::monitors_due(block);
        self.scan_range(&start, &end)?
            .into_iter()
            .map(|(k, _)| keys::decode_monitor(&k))
            .collect()
    }

    /// Every monitor entry belonging to `key`.
    fn monitors_of(&self, key: &DelegateKey) -> Result<Vec<MonitorEntry>> {
        let entries = self
            .scan_prefix(&keys::monitor_table())?
            .into_iter()
            .map(|(k, _)| keys::decode_monitor(&k))
            .collect::<Result<Vec<_>>>()?;
        Ok(entries.into_iter().filter(|e| e.delegate == *key).collect())
    }

    /// Execute records of a delegate, oldest first.
    fn execute_records(&self, key: &DelegateKey) -> Result<Vec<ExecuteRecord>> {
        decode_all(self.scan_prefix(&keys::execute_records_of(key))?)
    }

    /// Execute records that were never reconciled.
    fn pending_execute_records(&self) -> Result<Vec<ExecuteRecord>> {
        let all: Vec<ExecuteRecord> =
            decode_all(self.scan_prefix(&keys::execute_record_table())?)?;
        Ok(all
            .into_iter()
            .filter(|r| r.status == ExecuteStatus::NotExecuted)
            .collect())
    }

    /// Deletes a delegate together with its punish, announce-disposed and
    /// monitor records. Execute records are kept for auditing.
    #[tracing::instrument(skip(self))]
    fn remove_delegate(&self, key: &DelegateKey) -> Result<bool> {
        let punishes = self.scan_prefix(&keys::punishes_of(key))?;
        let announces = self.scan_prefix(&keys::announce_disposed_of(key))?;
        let monitors = self.monitors_of(key)?;
        self.transaction(|tx| {
            let delegate_key = keys::delegate(key);
            let existed = tx.get(&delegate_key)?.is_some();
            tx.remove(&delegate_key)?;
            for (k, _) in punishes.iter().chain(announces.iter()) {
                tx.remove(k)?;
            }
            for entry in &monitors {
                tx.remove(&keys::monitor(entry))?;
            }
            Ok(existed)
        })
    }
}

impl<S: WatchtowerStore> WatchtowerStoreExt for S {}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::U256;
    use watchtower_types::{MonitorKind, PunishOutcome};

    fn delegate(c: u8, d: u8) -> Delegate {
        Delegate {
            channel_identifier: H256::repeat_byte(c),
            delegator: Address::repeat_byte(d),
            open_block_number: 5,
            settle_block_number: 100,
            punish_count: 1,
            punish_outcome: PunishOutcome::NotRun,
            ..Default::default()
        }
    }

    fn exercise<S: WatchtowerStore>(store: S) {
        let a = delegate(1, 1);
        let b = delegate(1, 2);
        let other = delegate(2, 1);
        store
            .transaction(|tx| {
                for d in [&a, &b, &other] {
                    tx.save_delegate(d)?;
                    for entry in d.monitor_plan(30) {
                        tx.add_monitor(&entry)?;
                    }
                }
                tx.save_punish(
                    &a.key(),
                    &Punish {
                        lock_hash: H256::repeat_byte(9),
                        ..Default::default()
                    },
                )
            })
            .unwrap();

        assert_eq!(store.delegates_of_channel(&H256::repeat_byte(1)).unwrap().len(), 2);
        assert_eq!(store.punishes(&a.key()).unwrap().len(), 1);
        assert_eq!(store.due_monitors(99).unwrap().len(), 0);
        let due = store.due_monitors(100).unwrap();
        assert_eq!(due.len(), 3);
        assert!(due.iter().all(|e| e.kind == MonitorKind::Punish));

        assert!(store.remove_delegate(&a.key()).unwrap());
        assert!(store.delegate(&a.key()).unwrap().is_none());
        assert!(store.punishes(&a.key()).unwrap().is_empty());
        assert_eq!(store.due_monitors(100).unwrap().len(), 2);
        assert!(!store.remove_delegate(&a.key()).unwrap());
    }

    fn failed_transaction_leaves_no_trace<S: WatchtowerStore>(store: S) {
        let address = Address::repeat_byte(7);
        let result: Result<()> = store.transaction(|tx| {
            let mut account = tx.account(address)?;
            account.total_received = U256::from(10);
            tx.save_account(&account)?;
            Err(watchtower_utils::Error::Generic("boom"))
        });
        assert!(result.is_err());
        assert_eq!(store.account(address).unwrap().total_received, U256::zero());
    }

    fn writes_are_visible_within_transaction<S: WatchtowerStore>(store: S) {
        let address = Address::repeat_byte(3);
        let total = store
            .transaction(|tx| {
                let mut account = tx.account(address)?;
                account.total_received = U256::from(4);
                tx.save_account(&account)?;
                Ok(tx.account(address)?.total_received)
            })
            .unwrap();
        assert_eq!(total, U256::from(4));
    }

    #[test]
    fn in_memory_store() {
        exercise(InMemoryStore::default());
        failed_transaction_leaves_no_trace(InMemoryStore::default());
        writes_are_visible_within_transaction(InMemoryStore::default());
    }

    #[cfg(feature = "sled")]
    #[test]
    fn sled_store() {
        exercise(SledStore::temporary().unwrap());
        failed_transaction_leaves_no_trace(SledStore::temporary().unwrap());
        writes_are_visible_within_transaction(SledStore::temporary().unwrap());
    }

    #[test]
    fn latest_block_number_defaults_then_persists() {
        let store = InMemoryStore::default();
        assert_eq!(store.get_latest_block_number(42).unwrap(), 42);
        store.set_latest_block_number(100).unwrap();
        assert_eq!(store.set_latest_block_number(101).unwrap(), 100);
        assert_eq!(store.get_latest_block_number_or_default().unwrap(), 101);
    }

    #[test]
    fn pending_records_are_found_across_delegates() {
        let store = InMemoryStore::default();
        let a = delegate(1, 1);
        let b = delegate(3, 4);
        store
            .transaction(|tx| {
                let pending = ExecuteRecord::new(
                    1,
                    &a,
                    watchtower_types::ExecuteKind::Unlock,
                    serde_json::Value::Null,
                    U256::one(),
                    10,
                );
                let mut done = ExecuteRecord::new(
                    2,
                    &b,
                    watchtower_types::ExecuteKind::Punish,
                    serde_json::Value::Null,
                    U256::from(2),
                    10,
                );
                done.finish_ok(11);
                tx.save_execute_record(&pending)?;
                tx.save_execute_record(&done)
            })
            .unwrap();
        let pending = store.pending_execute_records().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].delegator, a.delegator);
        assert_eq!(store.execute_records(&b.key()).unwrap().len(), 1);
    }
}
