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


use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use watchtower_utils::Result;

use crate::keys;
use crate::{Entries, HistoryStore, StoreTransaction, WatchtowerStore};

type MemStore = BTreeMap<Vec<u8>, Vec<u8>>;

/// InMemoryStore keeps everything in an ordered map, for tests and for
/// running without a data directory.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    data: Arc<RwLock<MemStore>>,
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore").finish()
    }
}

/// Writes staged on top of a read snapshot; `None` marks a removal.
struct MemTransaction<'a> {
    base: &'a MemStore,
    staged: RefCell<BTreeMap<Vec<u8>, Option<Vec<u8>>>>,
}

impl StoreTransaction for MemTransaction<'_> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(staged) = self.staged.borrow().get(key) {
            return Ok(staged.clone());
        }
        Ok(self.base.get(key).cloned())
    }

    fn insert(&self, key: &[u8], value: Vec<u8>) -> Result<()> {
        self.staged.borrow_mut().insert(key.to_vec(), Some(value));
        Ok(())
    }

    fn remove(&self, key: &[u8]) -> Result<()> {
        self.staged.borrow_mut().insert(key.to_vec(), None);
        Ok(())
    }
}

impl HistoryStore for InMemoryStore {
    #[tracing::instrument(skip(self))]
    fn set_latest_block_number(&self, block_number: u64) -> Result<u64> {
        let mut guard = self.data.write();
        let old = guard
            .insert(keys::latest_block(), block_number.to_be_bytes().to_vec());
        Ok(old.map(|v| decode_block(&v)).unwrap_or(block_number))
    }

    #[tracing::instrument(skip(self))]
    fn get_latest_block_number(&self, default_block_number: u64) -> Result<u64> {
        let guard = self.data.read();
        Ok(guard
            .get(&keys::latest_block())
            .map(|v| decode_block(v))
            .unwrap_or(default_block_number))
    }
}

pub(crate) fn decode_block(bytes: &[u8]) -> u64 {
    let mut output = [0u8; 8];
    let n = bytes.len().min(8);
    output[..n].copy_from_slice(&bytes[..n]);
    u64::from_be_bytes(output)
}

impl WatchtowerStore for InMemoryStore {
    fn transaction<F, R>(&self, f: F) -> Result<R>
    where
        F: Fn(&dyn StoreTransaction) -> Result<R>,
    {
        let mut guard = self.data.write();
        let tx = MemTransaction {
            base: &*guard,
            staged: RefCell::new(BTreeMap::new()),
        };
        let result = f(&tx)?;
        let staged = tx.staged.into_inner();
        for (key, value) in staged {
            match value {
                Some(value) => {
                    guard.insert(key, value);
                }
                None => {
                    guard.remove(&key);
                }
            }
        }
        Ok(result)
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Entries> {
        let guard = self.data.read();
        Ok(guard
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn scan_range(&self, start: &[u8], end: &[u8]) -> Result<Entries> {
        let guard = self.data.read();
        Ok(guard
            .range(start.to_vec()..end.to_vec())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}
