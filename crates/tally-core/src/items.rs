//! Durable item storage seam.
//!
//! The record store is purely in memory. Durability is delegated to an
//! [`ItemStore`], a flat key-value table per item kind. Callers persist what
//! the store reports as accepted.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::reconcile::Versioned;
use crate::record::{Record, Setting};

/// An item kind that can be written to an [`ItemStore`].
pub trait StoredItem: Versioned + Serialize + DeserializeOwned + Clone {
    /// Name of the table holding this kind.
    const TABLE: &'static str;
}

impl StoredItem for Record {
    const TABLE: &'static str = "records";
}

impl StoredItem for Setting {
    const TABLE: &'static str = "settings";
}

/// A durable per-user table of normalized items.
pub trait ItemStore {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns every item of kind `T` matching `predicate`.
    fn select<T, F>(&self, predicate: F) -> Result<Vec<T>, Self::Error>
    where
        T: StoredItem,
        F: Fn(&T) -> bool;

    fn select_one<T: StoredItem>(&self, key: &str) -> Result<Option<T>, Self::Error>;

    /// Inserts or replaces the item with the same key.
    fn put<T: StoredItem>(&mut self, item: &T) -> Result<(), Self::Error>;

    /// Deletes an item. Only used for items the authority rejected as corrupt.
    fn remove<T: StoredItem>(&mut self, key: &str) -> Result<bool, Self::Error>;

    /// Deletes every item of every kind.
    fn clear(&mut self) -> Result<(), Self::Error>;

    fn put_all<T: StoredItem>(&mut self, items: &[T]) -> Result<(), Self::Error> {
        for item in items {
            self.put(item)?;
        }
        Ok(())
    }
}
