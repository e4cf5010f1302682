/// Capacity of the broadcast channel for balance events published by the updaters
pub const BROADCAST_CHANNEL_CAPACITY: usize = 256;

/// Account id lengths accepted by the storage key factory (ethereum style, substrate)
pub const VALID_ACCOUNT_ID_LENGTHS: &[usize] = &[20, 32];

/// Default timeout (seconds) of a single wire unsubscribe request
pub const DEFAULT_UNSUBSCRIBE_TIMEOUT_SECS: u64 = 10;
