//! SCALE layouts of the Equilibrium balance storage items.

use alloy::primitives::U256;
use parity_scale_codec::{Decode, DecodeAll, Encode};

use crate::domain::EquilibriumAssetId;

/// Lock identifier of the balances pallet
pub type LockIdentifier = [u8; 8];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum SignedBalance {
    Positive(u128),
    Negative(u128),
}

impl SignedBalance {
    /// Spendable part; a negative balance is a debt and counts as zero.
    pub fn free(&self) -> U256 {
        match self {
            SignedBalance::Positive(value) => U256::from(*value),
            SignedBalance::Negative(_) => U256::ZERO,
        }
    }
}

/// `data` of the Equilibrium `System.Account` record
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub enum AccountData {
    V0 {
        lock: u128,
        balances: Vec<(EquilibriumAssetId, SignedBalance)>,
    },
}

/// `System.Account` value: the frame system counters followed by the multi asset data
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct AccountInfo {
    pub nonce: u32,
    pub consumers: u32,
    pub providers: u32,
    pub sufficients: u32,
    pub data: AccountData,
}

impl AccountInfo {
    pub fn new(nonce: u32, data: AccountData) -> Self {
        Self {
            nonce,
            consumers: 0,
            providers: 1,
            sufficients: 0,
            data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EquilibriumAccountInfo {
    pub lock: U256,
    pub balances: Vec<(EquilibriumAssetId, SignedBalance)>,
}

impl From<AccountData> for EquilibriumAccountInfo {
    fn from(value: AccountData) -> Self {
        match value {
            AccountData::V0 { lock, balances } => Self {
                lock: U256::from(lock),
                balances,
            },
        }
    }
}

/// `System.Account` value; only `data` is kept
pub fn decode_account_info(value: &[u8]) -> Result<EquilibriumAccountInfo, parity_scale_codec::Error> {
    AccountInfo::decode_all(&mut &value[..]).map(|info| info.data.into())
}

/// `EqBalances.Reserved` value
pub fn decode_reserved(value: &[u8]) -> Result<U256, parity_scale_codec::Error> {
    u128::decode_all(&mut &value[..]).map(U256::from)
}

/// `EqBalances.Locked` value, a vec map of lock identifier to amount
pub fn decode_locks(value: &[u8]) -> Result<Vec<(Vec<u8>, U256)>, parity_scale_codec::Error> {
    let locks = Vec::<(LockIdentifier, u128)>::decode_all(&mut &value[..])?;

    Ok(locks
        .into_iter()
        .map(|(lock_type, amount)| (lock_type.to_vec(), U256::from(amount)))
        .collect())
}
