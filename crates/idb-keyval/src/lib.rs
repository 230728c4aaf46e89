//! Promise-style key-value storage on top of IndexedDB.
//!
//! [`KeyvalStore`] keeps one object store ("table") inside one database and
//! exposes single-key and batch `get`/`set`/`update`/`del` operations as
//! futures. Every call runs in its own transaction; batch calls run all of
//! their reads or writes in a single transaction.
//!
//! On native targets IndexedDB is unavailable, so stores are constructed in
//! the uninitialized state and every operation fails with
//! [`StoreError::NotInitialized`].

#[cfg(target_arch = "wasm32")]
pub mod bindings;
pub mod bridge;
mod error;
mod key;
mod options;
pub mod platform;
mod provider;
mod store;

pub use crate::error::{Result, StoreError};
pub use crate::key::Key;
pub use crate::options::{StoreOptions, DEFAULT_DB_NAME, DEFAULT_STORE_NAME};
pub use crate::provider::{AccessMode, DatabaseRegistry, StoreHandle, Table};
pub use crate::store::{KeyvalStore, TypedStore};
