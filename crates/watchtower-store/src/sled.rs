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


use std::path::Path;

use sled::transaction::{
    ConflictableTransactionError, TransactionError, TransactionalTree,
};
use watchtower_utils::{Error, Result};

use crate::keys;
use crate::mem::decode_block;
use crate::{Entries, HistoryStore, StoreTransaction, WatchtowerStore};

/// SledStore is a store that keeps the watchtower records in a [Sled](https://sled.rs)-based database.
#[derive(Clone)]
pub struct SledStore {
    db: sled::Db,
    tree: sled::Tree,
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore").finish()
    }
}

impl SledStore {
    /// Create a new SledStore.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::Config::new()
            .path(path)
            .temporary(cfg!(test))
            .mode(sled::Mode::HighThroughput)
            .open()?;
        let tree = db.open_tree("watchtower")?;
        Ok(Self { db, tree })
    }

    /// Creates a temporary SledStore.
    pub fn temporary() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        Self::open(dir.path())
    }

    /// Gets the total amount of data stored on disk
    pub fn get_data_stored_size(&self) -> u64 {
        self.db.size_on_disk().unwrap_or_default()
    }

    /// Flushes dirty buffers to disk.
    pub fn flush(&self) -> Result<usize> {
        Ok(self.db.flush()?)
    }
}

struct SledTransaction<'a> {
    tree: &'a TransactionalTree,
}

impl StoreTransaction for SledTransaction<'_> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.tree.get(key)?.map(|v| v.to_vec()))
    }

    fn insert(&self, key: &[u8], value: Vec<u8>) -> Result<()> {
        self.tree.insert(key, value)?;
        Ok(())
    }

    fn remove(&self, key: &[u8]) -> Result<()> {
        self.tree.remove(key)?;
        Ok(())
    }
}

impl HistoryStore for SledStore {
    #[tracing::instrument(skip(self))]
    fn set_latest_block_number(&self, block_number: u64) -> Result<u64> {
        let old = self
            .tree
            .insert(keys::latest_block(), block_number.to_be_bytes().to_vec())?;
        Ok(old.map(|v| decode_block(&v)).unwrap_or(block_number))
    }

    #[tracing::instrument(skip(self))]
    fn get_latest_block_number(&self, default_block_number: u64) -> Result<u64> {
        let val = self.tree.get(keys::latest_block())?;
        Ok(val
            .map(|v| decode_block(&v))
            .unwrap_or(default_block_number))
    }
}

impl WatchtowerStore for SledStore {
    fn transaction<F, R>(&self, f: F) -> Result<R>
    where
        F: Fn(&dyn StoreTransaction) -> Result<R>,
    {
        let result = self.tree.transaction(|tree| {
            let tx = SledTransaction { tree };
            f(&tx).map_err(|e| match e {
                Error::SledTransaction(inner) => {
                    ConflictableTransactionError::from(inner)
                }
                other => ConflictableTransactionError::Abort(other),
            })
        });
        match result {
            Ok(v) => Ok(v),
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(Error::Sled(e)),
        }
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.tree.get(key)?.map(|v| v.to_vec()))
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Entries> {
        self.tree
            .scan_prefix(prefix)
            .map(|kv| {
                let (k, v) = kv?;
                Ok((k.to_vec(), v.to_vec()))
            })
            .collect()
    }

    fn scan_range(&self, start: &[u8], end: &[u8]) -> Result<Entries> {
        self.tree
            .range(start..end)
            .map(|kv| {
                let (k, v) = kv?;
                Ok((k.to_vec(), v.to_vec()))
            })
            .collect()
    }
}

