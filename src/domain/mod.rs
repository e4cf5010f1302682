pub mod balance;
pub mod chain;
pub mod errors;
pub mod events;
pub mod ids;
pub mod storage;

pub use balance::*;
pub use chain::*;
pub use events::*;
pub use ids::*;
pub use storage::*;
