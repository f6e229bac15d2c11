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


//! # Watchtower Ledger 💰
//!
//! Pre-paid fee accounts, one per delegator address.
//!
//! Every action the watchtower runs on behalf of a delegator first
//! [`lock`]s its fee, then either [`use_locked`] (the call succeeded) or
//! [`unlock`] (it failed, the fee is refunded). [`credit`] adds payments and
//! [`apply_need_delta`] tracks what pending delegations will cost.
//!
//! The free functions operate inside a caller-owned transaction so they can
//! be combined with other writes; [`Ledger`] wraps each one in its own.

#![warn(missing_docs)]

use ethers::types::{Address, U256};
use watchtower_store::{
    StoreTransaction, StoreTransactionExt, WatchtowerStore,
    WatchtowerStoreExt,
};
use watchtower_types::Account;
use watchtower_utils::{probe, Error, Result};

fn commit(tx: &dyn StoreTransaction, account: Account) -> Result<Account> {
    account.check_invariants()?;
    tx.save_account(&account)?;
    Ok(account)
}

/// The current state of `address`, created lazily.
pub fn get_account(tx: &dyn StoreTransaction, address: Address) -> Result<Account> {
    tx.account(address)
}

/// Records a payment from `address`.
pub fn credit(
    tx: &dyn StoreTransaction,
    address: Address,
    amount: U256,
) -> Result<Account> {
    if amount.is_zero() {
        return Err(Error::Generic("credit amount must be positive"));
    }
    let mut account = tx.account(address)?;
    account.total_received =
        account.total_received.checked_add(amount).ok_or_else(|| {
            Error::InvariantViolation(format!(
                "account {address:?}: total received overflows"
            ))
        })?;
    commit(tx, account)
}

/// Reserves `amount` for an action about to run.
///
/// Fails with [`Error::InsufficientBalance`] if `amount` exceeds what is
/// available or what the account still needs.
pub fn lock(
    tx: &dyn StoreTransaction,
    address: Address,
    amount: U256,
) -> Result<Account> {
    let mut account = tx.account(address)?;
    let available = account.available();
    if amount > available || amount > account.need {
        return Err(Error::InsufficientBalance {
            address,
            amount,
            available,
            need: account.need,
        });
    }
    account.locked += amount;
    account.need -= amount;
    commit(tx, account)
}

/// Releases a reservation whose action failed.
pub fn unlock(
    tx: &dyn StoreTransaction,
    address: Address,
    amount: U256,
) -> Result<Account> {
    let mut account = tx.account(address)?;
    if amount > account.locked {
        return Err(Error::InvariantViolation(format!(
            "account {address:?}: unlock {amount} exceeds locked {}",
            account.locked
        )));
    }
    account.locked -= amount;
    commit(tx, account)
}

/// Spends a reservation whose action succeeded.
pub fn use_locked(
    tx: &dyn StoreTransaction,
    address: Address,
    amount: U256,
) -> Result<Account> {
    let mut account = tx.account(address)?;
    if amount > account.locked {
        return Err(Error::InvariantViolation(format!(
            "account {address:?}: use {amount} exceeds locked {}",
            account.locked
        )));
    }
    account.locked -= amount;
    account.used += amount;
    commit(tx, account)
}

/// Overwrites the need of `address`.
pub fn set_need(
    tx: &dyn StoreTransaction,
    address: Address,
    amount: U256,
) -> Result<Account> {
    let mut account = tx.account(address)?;
    account.need = amount;
    commit(tx, account)
}

/// Replaces a delegate's contribution `old` to the need of `address` with
/// `new`, leaving the contributions of other delegates untouched.
///
/// The need never drops below zero; a shortfall means part of `old` was
/// already consumed by locks and is only logged.
pub fn apply_need_delta(
    tx: &dyn StoreTransaction,
    address: Address,
    old: U256,
    new: U256,
) -> Result<Account> {
    let mut account = tx.account(address)?;
    if new >= old {
        account.need = account.need.saturating_add(new - old);
    } else {
        let decrease = old - new;
        if decrease > account.need {
            tracing::warn!(
                target: probe::TARGET,
                kind = %probe::Kind::Ledger,
                ?address,
                need = %account.need,
                %decrease,
                "Need decrease exceeds recorded need, clamping to zero",
            );
        }
        account.need = account.need.saturating_sub(decrease);
    }
    commit(tx, account)
}

/// The ledger over a store, one transaction per operation.
#[derive(Debug, Clone)]
pub struct Ledger<S> {
    store: S,
}

impl<S: WatchtowerStore> Ledger<S> {
    /// Creates a ledger on top of `store`.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// The current state of `address`.
    pub fn account(&self, address: Address) -> Result<Account> {
        self.store.account(address)
    }

    /// See [`credit`].
    #[tracing::instrument(skip(self))]
    pub fn credit(&self, address: Address, amount: U256) -> Result<Account> {
        let account = self.store.transaction(|tx| credit(tx, address, amount))?;
        tracing::debug!(
            target: probe::TARGET,
            kind = %probe::Kind::Ledger,
            ?address,
            %amount,
            total_received = %account.total_received,
            "Credited",
        );
        Ok(account)
    }

    /// See [`lock`].
    #[tracing::instrument(skip(self))]
    pub fn lock(&self, address: Address, amount: U256) -> Result<Account> {
        self.store.transaction(|tx| lock(tx, address, amount))
    }

    /// See [`unlock`].
    #[tracing::instrument(skip(self))]
    pub fn unlock(&self, address: Address, amount: U256) -> Result<Account> {
        self.store.transaction(|tx| unlock(tx, address, amount))
    }

    /// See [`use_locked`].
    #[tracing::instrument(skip(self))]
    pub fn use_locked(&self, address: Address, amount: U256) -> Result<Account> {
        self.store.transaction(|tx| use_locked(tx, address, amount))
    }

    /// See [`set_need`].
    #[tracing::instrument(skip(self))]
    pub fn set_need(&self, address: Address, amount: U256) -> Result<Account> {
        self.store.transaction(|tx| set_need(tx, address, amount))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use watchtower_store::InMemoryStore;

    fn ledger() -> (Ledger<InMemoryStore>, Address) {
        let ledger = Ledger::new(InMemoryStore::default());
        let address = Address::repeat_byte(0xaa);
        ledger.credit(address, U256::from(10)).unwrap();
        ledger.set_need(address, U256::from(6)).unwrap();
        (ledger, address)
    }

    #[test]
    fn lock_then_unlock_restores_balance() {
        let (ledger, address) = ledger();
        let before = ledger.account(address).unwrap();
        ledger.lock(address, U256::from(4)).unwrap();
        let after = ledger.unlock(address, U256::from(4)).unwrap();
        assert_eq!(after.total_received, before.total_received);
        assert_eq!(after.used, before.used);
        assert_eq!(after.locked, before.locked);
        assert_eq!(after.available(), before.available());
    }

    #[test]
    fn lock_then_use_moves_locked_to_used() {
        let (ledger, address) = ledger();
        let locked = ledger.lock(address, U256::from(4)).unwrap();
        assert_eq!(locked.available(), U256::from(6));
        assert_eq!(locked.need, U256::from(2));
        let used = ledger.use_locked(address, U256::from(4)).unwrap();
        assert_eq!(used.locked, U256::zero());
        assert_eq!(used.used, U256::from(4));
        assert_eq!(used.available(), U256::from(6));
    }

    #[test]
    fn lock_is_capped_by_available_and_need() {
        let (ledger, address) = ledger();
        assert!(matches!(
            ledger.lock(address, U256::from(7)),
            Err(Error::InsufficientBalance { .. })
        ));
        ledger.set_need(address, U256::from(50)).unwrap();
        assert!(matches!(
            ledger.lock(address, U256::from(11)),
            Err(Error::InsufficientBalance { .. })
        ));
        assert_eq!(ledger.account(address).unwrap().locked, U256::zero());
    }

    #[test]
    fn over_release_is_an_invariant_violation() {
        let (ledger, address) = ledger();
        ledger.lock(address, U256::from(2)).unwrap();
        let err = ledger.unlock(address, U256::from(3)).unwrap_err();
        assert!(err.is_fatal());
        let err = ledger.use_locked(address, U256::from(3)).unwrap_err();
        assert!(matches!(err, Error::InvariantViolation(_)));
        assert_eq!(ledger.account(address).unwrap().locked, U256::from(2));
    }

    #[test]
    fn zero_credit_is_rejected() {
        let ledger = Ledger::new(InMemoryStore::default());
        assert!(ledger.credit(Address::zero(), U256::zero()).is_err());
    }

    #[test]
    fn need_delta_replaces_a_delegate_contribution() {
        let store = InMemoryStore::default();
        let address = Address::repeat_byte(1);
        let account = store
            .transaction(|tx| {
                apply_need_delta(tx, address, U256::zero(), U256::from(5))?;
                apply_need_delta(tx, address, U256::zero(), U256::from(3))?;
                apply_need_delta(tx, address, U256::from(5), U256::from(2))
            })
            .unwrap();
        assert_eq!(account.need, U256::from(5));
    }

    #[test]
    fn need_delta_clamps_at_zero() {
        let store = InMemoryStore::default();
        let address = Address::repeat_byte(1);
        let account = store
            .transaction(|tx| {
                apply_need_delta(tx, address, U256::from(9), U256::zero())
            })
            .unwrap();
        assert_eq!(account.need, U256::zero());
    }

    #[test]
    fn random_operation_sequences_keep_invariants() {
        let mut rng = rand::thread_rng();
        let ledger = Ledger::new(InMemoryStore::default());
        let address = Address::repeat_byte(0x42);
        for _ in 0..500 {
            let amount = U256::from(rng.gen_range(1u64..20));
            let before = ledger.account(address).unwrap();
            let result = match rng.gen_range(0..5) {
                0 => ledger.credit(address, amount),
                1 => ledger.lock(address, amount),
                2 => ledger.unlock(address, amount),
                3 => ledger.use_locked(address, amount),
                _ => ledger.set_need(address, amount * 2),
            };
            let after = ledger.account(address).unwrap();
            after.check_invariants().unwrap();
            if result.is_err() {
                assert_eq!(after, before);
            }
        }
    }
}
