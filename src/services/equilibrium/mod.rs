pub mod codec;
pub mod handler;
pub mod service;
pub mod updaters;

pub use service::EquilibriumSubscriptionService;
