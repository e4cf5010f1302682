pub mod assets_updating;
pub mod batch_subscription;
pub mod equilibrium;
pub mod errors;
pub mod router;
pub mod storage_keys;
pub mod subscription_manager;
pub mod updaters;
