use thiserror::Error;

use crate::domain::StoragePath;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EncodingError {
    #[error("Account id of {0} bytes can't be encoded, expected one of {1:?}")]
    InvalidAccountIdLength(usize, &'static [usize]),

    #[error("Storage path {0} is missing in runtime metadata")]
    InvalidStoragePath(StoragePath),
}
