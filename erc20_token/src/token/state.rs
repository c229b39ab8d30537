use std::collections::HashMap;

use anyhow::Context;
use cid::multihash::Code;
use cid::Cid;
use fvm_ipld_blockstore::Block;
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_encoding::tuple::*;
use fvm_ipld_encoding::CborStore;
use fvm_ipld_encoding::DAG_CBOR;
use fvm_ipld_hamt::Hamt;
use fvm_ipld_hamt::{BytesKey, Error as HamtError};
use fvm_shared::address::Address;
use fvm_shared::econ::TokenAmount;
use fvm_shared::ActorID;
use integer_encoding::VarInt;
use num_traits::Zero;
use thiserror::Error;

/// This value has been chosen to optimise to reduce gas-costs when accessing the balances map. Non-
/// standard use cases of the token library might find a different value to be more efficient.
pub const DEFAULT_HAMT_BIT_WIDTH: u32 = 3;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("ipld hamt error: {0}")]
    IpldHamt(#[from] HamtError),
    #[error("missing state at cid: {0}")]
    MissingState(Cid),
    #[error("underlying serialization error: {0}")]
    Serialization(String),
    #[error(
        "negative balance caused by decreasing {owner:?}'s balance of {balance:?} by {delta:?}"
    )]
    InsufficientBalance { owner: ActorID, balance: TokenAmount, delta: TokenAmount },
    #[error(
        "{spender:?} attempted to utilise {delta:?} of allowance {allowance:?} set by {owner:?}"
    )]
    InsufficientAllowance {
        owner: Address,
        spender: Address,
        allowance: TokenAmount,
        delta: TokenAmount,
    },
    #[error("total_supply cannot be negative, cannot apply delta of {delta:?} to {supply:?}")]
    NegativeTotalSupply { supply: TokenAmount, delta: TokenAmount },
    #[error("allowance cannot be negative, cannot set allowance between {owner:?} and {spender:?} to {amount:?}")]
    NegativeAllowance { amount: TokenAmount, owner: ActorID, spender: ActorID },
}

#[derive(Error, Debug)]
pub enum StateInvariantError {
    #[error("total supply was negative: {0:?}")]
    SupplyNegative(TokenAmount),
    #[error("the account for {account:?} had a negative balance of {balance:?}")]
    BalanceNegative { account: ActorID, balance: TokenAmount },
    #[error("the total supply {supply:?} does not match the sum of all balances {balance_sum:?}")]
    BalanceSupplyMismatch { supply: TokenAmount, balance_sum: TokenAmount },
    #[error(
        "a negative allowance of {allowance:?} was specified between {owner:?} and {spender:?}"
    )]
    NegativeAllowance { owner: ActorID, spender: ActorID, allowance: TokenAmount },
    #[error("stored a zero balance which should have been removed for {0}")]
    ExplicitZeroBalance(ActorID),
    #[error(
        "stored a zero allowance which should have been removed between {owner:?} and {spender:?}"
    )]
    ExplicitZeroAllowance { owner: ActorID, spender: ActorID },
    #[error("stored an allowance map for {0} though they have specified no allowances")]
    ExplicitEmptyAllowance(ActorID),
    #[error("invalid serialized owner key {0:?}")]
    InvalidOwnerKey(BytesKey),
    #[error("invalid serialized spender key {0:?}")]
    InvalidSpenderKey(BytesKey),
    #[error("underlying state error {0}")]
    State(#[from] StateError),
}

type Result<T> = std::result::Result<T, StateError>;

type Map<'bs, BS, K, V> = Hamt<&'bs BS, V, K>;
type BalanceMap<'bs, BS> = Map<'bs, BS, BytesKey, TokenAmount>;
type AllowanceMap<'bs, BS> = Map<'bs, BS, BytesKey, Cid>;
type OwnerAllowanceMap<'bs, BS> = Map<'bs, BS, BytesKey, TokenAmount>;

/// Root of the ledger, stored as a single CBOR block
#[derive(Serialize_tuple, Deserialize_tuple, PartialEq, Eq, Clone, Debug)]
pub struct TokenState {
    /// Sum of every balance
    pub supply: TokenAmount,
    /// Holder to balance, keyed by varint ActorID
    pub balances: Cid,
    /// Owner to a link of that owner's spender to allowance map
    pub allowances: Cid,
    /// Set once the initial supply has been allocated, even if it was zero
    pub initialized: bool,
    hamt_bit_width: u32,
}

/// Balance and allowance bookkeeping over the HAMTs linked from the root
///
/// Nothing here knows who is calling: approvals are not checked against transfers. What is
/// enforced is that no balance, allowance or supply goes negative and that zero entries are
/// deleted rather than written.
impl TokenState {
    /// An empty ledger with the default HAMT bit width
    pub fn new<BS: Blockstore>(store: &BS) -> Result<Self> {
        Self::new_with_bit_width(store, DEFAULT_HAMT_BIT_WIDTH)
    }

    /// An empty ledger whose HAMTs use `hamt_bit_width` (between 1 and 8)
    ///
    /// The empty maps are flushed to `store` so the root links resolve, but the root itself is
    /// not saved.
    pub fn new_with_bit_width<BS: Blockstore>(store: &BS, hamt_bit_width: u32) -> Result<Self> {
        let balances = BalanceMap::new_with_bit_width(store, hamt_bit_width).flush()?;
        let allowances = AllowanceMap::new_with_bit_width(store, hamt_bit_width).flush()?;
        Ok(Self {
            supply: TokenAmount::zero(),
            balances,
            allowances,
            initialized: false,
            hamt_bit_width,
        })
    }

    /// Reads the ledger root stored at `cid`
    pub fn load<BS: Blockstore>(bs: &BS, cid: &Cid) -> Result<Self> {
        bs.get_cbor::<Self>(cid)
            .map_err(|err| StateError::Serialization(err.to_string()))?
            .ok_or(StateError::MissingState(*cid))
    }

    /// Writes the ledger root to `bs` and returns its cid
    pub fn save<BS: Blockstore>(&self, bs: &BS) -> Result<Cid> {
        let data = fvm_ipld_encoding::to_vec(self)
            .map_err(|err| StateError::Serialization(err.to_string()))?;
        bs.put(Code::Blake2b256, &Block { codec: DAG_CBOR, data })
            .map_err(|err| StateError::Serialization(err.to_string()))
    }

    /// Balance held by `owner`, zero if nothing is stored for it
    pub fn get_balance<BS: Blockstore>(&self, bs: &BS, owner: ActorID) -> Result<TokenAmount> {
        let balances = self.get_balance_map(bs)?;
        Ok(balances.get(&actor_id_key(owner))?.cloned().unwrap_or_default())
    }

    /// Adds `delta` (which may be negative) to the balance of `owner`, returning the result
    ///
    /// Fails with InsufficientBalance rather than going below zero. A balance that reaches zero is
    /// deleted from the map.
    pub fn change_balance_by<BS: Blockstore>(
        &mut self,
        bs: &BS,
        owner: ActorID,
        delta: &TokenAmount,
    ) -> Result<TokenAmount> {
        let mut balances = self.get_balance_map(bs)?;
        let key = actor_id_key(owner);
        let balance = balances.get(&key)?.cloned().unwrap_or_default();
        if delta.is_zero() {
            return Ok(balance);
        }

        let updated = &balance + delta;
        if updated.is_negative() {
            return Err(StateError::InsufficientBalance { owner, balance, delta: delta.clone() });
        }
        match updated.is_zero() {
            true => {
                balances.delete(&key)?;
            }
            false => {
                balances.set(key, updated.clone())?;
            }
        }
        self.balances = balances.flush()?;
        Ok(updated)
    }

    /// Opens the balance HAMT
    pub fn get_balance_map<'bs, BS: Blockstore>(&self, bs: &'bs BS) -> Result<BalanceMap<'bs, BS>> {
        Ok(BalanceMap::load_with_bit_width(&self.balances, bs, self.hamt_bit_width)?)
    }

    /// Number of accounts holding a non-zero balance
    ///
    /// Walks the whole balance HAMT.
    pub fn count_balances<BS: Blockstore>(&self, bs: &BS) -> Result<usize> {
        let mut holders = 0;
        self.get_balance_map(bs)?.for_each(|_, _| {
            holders += 1;
            Ok(())
        })?;
        Ok(holders)
    }

    /// Adds `delta` to the total supply, refusing to take it below zero
    pub fn change_supply_by(&mut self, delta: &TokenAmount) -> Result<&TokenAmount> {
        let supply = &self.supply + delta;
        if supply.is_negative() {
            return Err(StateError::NegativeTotalSupply {
                supply: self.supply.clone(),
                delta: delta.clone(),
            });
        }
        self.supply = supply;
        Ok(&self.supply)
    }

    /// Amount `spender` may still move out of `owner`'s balance, zero if never approved
    pub fn get_allowance_between<BS: Blockstore>(
        &self,
        bs: &BS,
        owner: ActorID,
        spender: ActorID,
    ) -> Result<TokenAmount> {
        let allowance = match self.get_owner_allowance_map(bs, owner)? {
            Some(map) => match map.get(&actor_id_key(spender))? {
                Some(allowance) => allowance.clone(),
                None => TokenAmount::zero(),
            },
            None => TokenAmount::zero(),
        };
        Ok(allowance)
    }

    /// Replaces the allowance of `spender` over `owner`'s balance, returning the previous one
    ///
    /// A zero amount deletes the entry, and the owner's map goes with it once empty.
    pub fn set_allowance<BS: Blockstore>(
        &mut self,
        bs: &BS,
        owner: ActorID,
        spender: ActorID,
        amount: &TokenAmount,
    ) -> Result<TokenAmount> {
        if amount.is_negative() {
            return Err(StateError::NegativeAllowance { owner, spender, amount: amount.clone() });
        }

        let mut root_allowances_map = self.get_allowances_map(bs)?;

        // get or create the owner's allowance map
        let owner_key = actor_id_key(owner);
        let mut allowance_map = match root_allowances_map.get(&owner_key)? {
            Some(cid) => OwnerAllowanceMap::load_with_bit_width(cid, bs, self.hamt_bit_width)?,
            None => {
                // nothing to remove
                if amount.is_zero() {
                    return Ok(TokenAmount::zero());
                }
                OwnerAllowanceMap::new_with_bit_width(bs, self.hamt_bit_width)
            }
        };

        let spender_key = actor_id_key(spender);
        let old_allowance = if amount.is_zero() {
            allowance_map.delete(&spender_key)?.map(|(_, a)| a)
        } else {
            allowance_map.set(spender_key, amount.clone())?
        }
        .unwrap_or_else(TokenAmount::zero);

        if allowance_map.is_empty() {
            root_allowances_map.delete(&owner_key)?;
        } else {
            root_allowances_map.set(owner_key, allowance_map.flush()?)?;
        }
        self.allowances = root_allowances_map.flush()?;

        Ok(old_allowance)
    }

    /// Deducts `amount` from the allowance of `spender` over `owner`, returning what is left
    ///
    /// The allowance is untouched when it is too small. A zero amount always succeeds, even
    /// against a zero allowance.
    pub fn attempt_use_allowance<BS: Blockstore>(
        &mut self,
        bs: &BS,
        spender: ActorID,
        owner: ActorID,
        amount: &TokenAmount,
    ) -> Result<TokenAmount> {
        let current_allowance = self.get_allowance_between(bs, owner, spender)?;

        if amount.is_zero() {
            return Ok(current_allowance);
        }

        if current_allowance.lt(amount) {
            return Err(StateError::InsufficientAllowance {
                owner: Address::new_id(owner),
                spender: Address::new_id(spender),
                allowance: current_allowance,
                delta: amount.clone(),
            });
        }

        let new_allowance = &current_allowance - amount;
        self.set_allowance(bs, owner, spender, &new_allowance)?;

        Ok(new_allowance)
    }

    /// Opens the spender map of `owner`, or None if the owner has no non-zero allowances
    pub fn get_owner_allowance_map<'bs, BS: Blockstore>(
        &self,
        bs: &'bs BS,
        owner: ActorID,
    ) -> Result<Option<OwnerAllowanceMap<'bs, BS>>> {
        let allowances_map = self.get_allowances_map(bs)?;
        let owner_allowances = match allowances_map.get(&actor_id_key(owner))? {
            Some(cid) => {
                Some(OwnerAllowanceMap::load_with_bit_width(cid, bs, self.hamt_bit_width)?)
            }
            None => None,
        };
        Ok(owner_allowances)
    }

    /// Opens the outer allowance HAMT, whose values link to per-owner maps
    pub fn get_allowances_map<'bs, BS: Blockstore>(
        &self,
        bs: &'bs BS,
    ) -> Result<AllowanceMap<'bs, BS>> {
        Ok(AllowanceMap::load_with_bit_width(&self.allowances, bs, self.hamt_bit_width)?)
    }

    /// Checks that the current state obeys all system invariants
    ///
    /// Checks that there are no zero balances, zero allowances or empty allowance maps explicitly
    /// stored in the blockstore. Checks that balances, total supply, allowances are never negative.
    /// Checks that sum of all balances matches total_supply.
    ///
    /// Returns a state summary that can be used to check application specific invariants and a list
    /// of every violation found.
    pub fn check_invariants<BS: Blockstore>(
        &self,
        bs: &BS,
    ) -> (StateSummary, Vec<StateInvariantError>) {
        let mut errors = vec![];

        if self.supply.is_negative() {
            errors.push(StateInvariantError::SupplyNegative(self.supply.clone()));
        }

        let balance_map = self.check_balances(bs, &mut errors);
        let allowance_map = self.check_allowances(bs, &mut errors);

        let summary =
            StateSummary { balance_map, allowance_map, total_supply: self.supply.clone() };
        (summary, errors)
    }

    fn check_balances<BS: Blockstore>(
        &self,
        bs: &BS,
        errors: &mut Vec<StateInvariantError>,
    ) -> Option<HashMap<ActorID, TokenAmount>> {
        let balances = match self.get_balance_map(bs) {
            Ok(map) => map,
            Err(e) => {
                errors.push(e.into());
                return None;
            }
        };

        let mut balance_sum = TokenAmount::zero();
        let mut balance_map = HashMap::new();
        let res = balances.for_each(|owner_key, balance| {
            let owner = match decode_actor_id(owner_key) {
                Some(a) => a,
                None => {
                    errors.push(StateInvariantError::InvalidOwnerKey(owner_key.clone()));
                    return Ok(());
                }
            };
            if balance.is_negative() {
                errors.push(StateInvariantError::BalanceNegative {
                    account: owner,
                    balance: balance.clone(),
                });
            }
            if balance.is_zero() {
                errors.push(StateInvariantError::ExplicitZeroBalance(owner));
            }

            balance_sum = &balance_sum + balance;
            balance_map.insert(owner, balance.clone());
            Ok(())
        });

        if let Err(e) = res {
            errors.push(StateError::from(e).into());
            return None;
        }

        if balance_sum != self.supply {
            errors.push(StateInvariantError::BalanceSupplyMismatch {
                supply: self.supply.clone(),
                balance_sum,
            });
        }

        Some(balance_map)
    }

    fn check_allowances<BS: Blockstore>(
        &self,
        bs: &BS,
        errors: &mut Vec<StateInvariantError>,
    ) -> Option<HashMap<ActorID, HashMap<ActorID, TokenAmount>>> {
        let allowances = match self.get_allowances_map(bs) {
            Ok(map) => map,
            Err(e) => {
                errors.push(e.into());
                return None;
            }
        };

        let mut allowance_map = HashMap::new();
        let res = allowances.for_each(|owner_key, owner_cid| {
            let owner = match decode_actor_id(owner_key) {
                Some(a) => a,
                None => {
                    errors.push(StateInvariantError::InvalidOwnerKey(owner_key.clone()));
                    return Ok(());
                }
            };

            let owner_allowances =
                OwnerAllowanceMap::load_with_bit_width(owner_cid, bs, self.hamt_bit_width)
                    .with_context(|| format!("loading allowances of owner {owner}"))?;
            if owner_allowances.is_empty() {
                errors.push(StateInvariantError::ExplicitEmptyAllowance(owner));
            }

            let mut spenders = HashMap::new();
            owner_allowances.for_each(|spender_key, allowance| {
                let spender = match decode_actor_id(spender_key) {
                    Some(a) => a,
                    None => {
                        errors.push(StateInvariantError::InvalidSpenderKey(spender_key.clone()));
                        return Ok(());
                    }
                };
                if allowance.is_negative() {
                    errors.push(StateInvariantError::NegativeAllowance {
                        owner,
                        spender,
                        allowance: allowance.clone(),
                    });
                }
                if allowance.is_zero() {
                    errors.push(StateInvariantError::ExplicitZeroAllowance { owner, spender });
                }
                spenders.insert(spender, allowance.clone());
                Ok(())
            })?;

            allowance_map.insert(owner, spenders);
            Ok(())
        });

        if let Err(e) = res {
            errors.push(StateError::from(e).into());
            return None;
        }

        Some(allowance_map)
    }
}

pub fn actor_id_key(a: ActorID) -> BytesKey {
    a.encode_var_vec().into()
}

pub fn decode_actor_id(key: &BytesKey) -> Option<ActorID> {
    u64::decode_var(key.0.as_slice()).map(|a| a.0)
}

/// A summary of the ledger to allow checking application specific invariants
///
/// A map is `None` if it could not be read from the blockstore.
#[derive(Clone, Debug)]
pub struct StateSummary {
    pub balance_map: Option<HashMap<ActorID, TokenAmount>>,
    pub allowance_map: Option<HashMap<ActorID, HashMap<ActorID, TokenAmount>>>,
    pub total_supply: TokenAmount,
}
