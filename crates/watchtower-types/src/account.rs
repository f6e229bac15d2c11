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

use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use watchtower_utils::{Error, Result};

/// Fee charged per delegated action, in fee-token units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FeeSchedule {
    /// Charged for each unlock attempt.
    #[serde(default = "default_unlock_fee")]
    pub unlock: u64,
    /// Charged once per delegate for punishing the partner.
    #[serde(default = "default_punish_fee")]
    pub punish: u64,
    /// Charged for submitting the balance proof.
    #[serde(default = "default_update_balance_proof_fee")]
    pub update_balance_proof: u64,
}

const fn default_unlock_fee() -> u64 {
    1
}

const fn default_punish_fee() -> u64 {
    2
}

const fn default_update_balance_proof_fee() -> u64 {
    3
}

impl FeeSchedule {
    /// Fee of one unlock.
    pub fn unlock_fee(&self) -> U256 {
        U256::from(self.unlock)
    }

    /// Fee of punishing the partner.
    pub fn punish_fee(&self) -> U256 {
        U256::from(self.punish)
    }

    /// Fee of submitting the balance proof.
    pub fn update_balance_proof_fee(&self) -> U256 {
        U256::from(self.update_balance_proof)
    }
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            unlock: default_unlock_fee(),
            punish: default_punish_fee(),
            update_balance_proof: default_update_balance_proof_fee(),
        }
    }
}

/// The pre-paid fee balance of one delegator.
///
/// `available = total_received - used - locked`. `need` is the total cost of
/// the actions currently delegated and only caps what may be locked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// The delegator owning this account.
    pub address: Address,
    /// Everything the delegator ever paid in.
    pub total_received: U256,
    /// Fees spent on successful actions.
    pub used: U256,
    /// Fees reserved by in-flight actions.
    pub locked: U256,
    /// Cost of all pending delegated actions.
    pub need: U256,
}

impl Account {
    /// An empty account for `address`.
    pub fn new(address: Address) -> Self {
        Self {
            address,
            ..Default::default()
        }
    }

    /// What can still be locked.
    pub fn available(&self) -> U256 {
        self.total_received
            .saturating_sub(self.used)
            .saturating_sub(self.locked)
    }

    /// Whether the balance covers every pending action.
    pub fn is_funded(&self) -> bool {
        self.available() >= self.need
    }

    /// Checks `used <= total_received` and `used + locked <= total_received`.
    pub fn check_invariants(&self) -> Result<()> {
        if self.used > self.total_received {
            return Err(Error::InvariantViolation(format!(
                "account {:?}: used {} exceeds total received {}",
                self.address, self.used, self.total_received
            )));
        }
        let spent_or_reserved =
            self.used.checked_add(self.locked).ok_or_else(|| {
                Error::InvariantViolation(format!(
                    "account {:?}: used + locked overflows",
                    self.address
                ))
            })?;
        if spent_or_reserved > self.total_received {
            return Err(Error::InvariantViolation(format!(
                "account {:?}: used {} + locked {} exceeds total received {}",
                self.address, self.used, self.locked, self.total_received
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn available_excludes_used_and_locked() {
        let account = Account {
            address: Address::repeat_byte(1),
            total_received: 10.into(),
            used: 3.into(),
            locked: 2.into(),
            need: 5.into(),
        };
        assert_eq!(account.available(), U256::from(5));
        assert!(account.is_funded());
        assert!(account.check_invariants().is_ok());
    }

    #[test]
    fn overdrawn_account_breaks_invariants() {
        let account = Account {
            address: Address::repeat_byte(1),
            total_received: 4.into(),
            used: 3.into(),
            locked: 2.into(),
            need: 0.into(),
        };
        assert!(matches!(
            account.check_invariants(),
            Err(Error::InvariantViolation(_))
        ));
    }

    #[test]
    fn fee_schedule_defaults() {
        let fees: FeeSchedule = serde_json::from_str("{}").unwrap();
        assert_eq!(fees, FeeSchedule::default());
        assert_eq!(fees.update_balance_proof_fee(), U256::from(3));
    }
}
