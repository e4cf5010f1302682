use crate::domain::{AssetId, ChainAssetId, ChainId};
use std::fmt::{Display, Formatter};

/// On-chain asset id used by the Equilibrium `EqBalances` pallet
pub type EquilibriumAssetId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    /// Native token kept in `System.Account`
    Native,
    /// Asset kept in the Equilibrium `EqBalances` pallet
    Equilibrium { on_chain_id: EquilibriumAssetId },
    /// Any other pallet; not handled by the batch services of this crate
    Other,
}

impl Display for AssetKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AssetKind::Native => write!(f, "native"),
            AssetKind::Equilibrium { on_chain_id } => write!(f, "equilibrium({on_chain_id})"),
            AssetKind::Other => write!(f, "other"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetModel {
    pub asset_id: AssetId,
    pub symbol: String,
    pub enabled: bool,
    pub is_utility: bool,
    pub kind: AssetKind,
}

impl AssetModel {
    pub fn equilibrium_asset_id(&self) -> Option<EquilibriumAssetId> {
        match self.kind {
            AssetKind::Equilibrium { on_chain_id } => Some(on_chain_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainModel {
    pub chain_id: ChainId,
    pub name: String,
    /// Whether accounts on this chain use 20-byte ethereum style ids
    pub is_ethereum_based: bool,
    pub assets: Vec<AssetModel>,
}

impl ChainModel {
    pub fn utility_asset(&self) -> Option<&AssetModel> {
        self.assets.iter().find(|asset| asset.is_utility)
    }

    pub fn utility_chain_asset_id(&self) -> Option<ChainAssetId> {
        self.utility_asset()
            .map(|asset| ChainAssetId::new(self.chain_id.clone(), asset.asset_id))
    }

    pub fn equilibrium_assets(&self) -> impl Iterator<Item = &AssetModel> {
        self.assets
            .iter()
            .filter(|asset| asset.equilibrium_asset_id().is_some())
    }
}

/// Change notification published by the chain registry
#[derive(Debug, Clone)]
pub enum ChainChange {
    Insert(ChainModel),
    Update(ChainModel),
    Delete(ChainId),
}
