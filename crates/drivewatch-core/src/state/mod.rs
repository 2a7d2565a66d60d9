// # Subscription Store Implementations
//
// This module provides implementations of the SubscriptionStore trait for
// different persistence strategies.

pub mod file;
pub mod memory;

pub use file::FileSubscriptionStore;
pub use memory::MemorySubscriptionStore;

use crate::config::StoreConfig;
use crate::traits::SubscriptionStore;

/// Build the store selected by `config`
pub async fn open_store(config: &StoreConfig) -> Result<Box<dyn SubscriptionStore>, crate::Error> {
    match config {
        StoreConfig::File { path } => Ok(Box::new(FileSubscriptionStore::new(path).await?)),
        StoreConfig::Memory => Ok(Box::new(MemorySubscriptionStore::new())),
    }
}
