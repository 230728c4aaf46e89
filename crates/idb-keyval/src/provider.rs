//! Opens databases and hands out transactional table handles.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use futures_util::future::{FutureExt, LocalBoxFuture, Shared};
use wasm_bindgen::closure::Closure;
use wasm_bindgen::JsCast;
use web_sys::{
    IdbDatabase, IdbFactory, IdbObjectStore, IdbOpenDbRequest, IdbRequest, IdbTransaction,
    IdbTransactionMode, IdbVersionChangeEvent,
};

use crate::bridge::{bridge, RequestFuture};
use crate::{platform, Result, StoreOptions};

/// Memoized outcome of one database open request.
pub(crate) type SharedDatabase = Shared<LocalBoxFuture<'static, Result<IdbDatabase>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

impl From<AccessMode> for IdbTransactionMode {
    fn from(mode: AccessMode) -> Self {
        match mode {
            AccessMode::ReadOnly => IdbTransactionMode::Readonly,
            AccessMode::ReadWrite => IdbTransactionMode::Readwrite,
        }
    }
}

/// Keeps the `upgradeneeded` handler alive until the open request settles.
struct UpgradeHook {
    request: IdbOpenDbRequest,
    _handler: Closure<dyn FnMut(IdbVersionChangeEvent)>,
}

impl UpgradeHook {
    fn install(request: &IdbOpenDbRequest, store_name: Rc<str>) -> Self {
        let source = request.clone();
        let handler = Closure::<dyn FnMut(IdbVersionChangeEvent)>::new(
            move |_event: IdbVersionChangeEvent| {
                if let Err(err) = create_table(&source, &store_name) {
                    tracing::error!(
                        store = %store_name,
                        error = %err,
                        "failed to create object store"
                    );
                }
            },
        );
        request.set_onupgradeneeded(Some(handler.as_ref().unchecked_ref()));
        Self {
            request: request.clone(),
            _handler: handler,
        }
    }
}

impl Drop for UpgradeHook {
    fn drop(&mut self) {
        self.request.set_onupgradeneeded(None);
    }
}

fn create_table(request: &IdbOpenDbRequest, store_name: &str) -> Result<()> {
    let db: IdbDatabase = request.result()?.dyn_into()?;
    // The engine only fires `upgradeneeded` on first open or a version bump;
    // an existing table is left untouched.
    if !db.object_store_names().contains(store_name) {
        db.create_object_store(store_name)?;
        tracing::debug!(db = %db.name(), store = %store_name, "created object store");
    }
    Ok(())
}

/// Issues an open request and returns a future that resolves at most once to
/// the opened database. Every clone of the returned future shares that outcome.
pub(crate) fn open_database(
    factory: &IdbFactory,
    db_name: &str,
    store_name: Rc<str>,
) -> Result<SharedDatabase> {
    tracing::debug!(db = %db_name, store = %store_name, "opening database");
    let request = factory.open(db_name)?;
    let upgrade = UpgradeHook::install(&request, store_name);
    let ready = bridge(&request)?;

    let db_name = db_name.to_owned();
    Ok(async move {
        let outcome = ready.await;
        drop(upgrade);
        let db: IdbDatabase = outcome?.dyn_into()?;
        tracing::debug!(db = %db_name, "database ready");
        Ok(db)
    }
    .boxed_local()
    .shared())
}

/// Process-scoped map from database name to its shared open request.
///
/// Stores created through the same registry reuse one connection per database
/// name. The first store to open a name installs the table-creation hook, so
/// every store sharing a database should agree on the table name. Entries live
/// as long as the registry.
#[derive(Clone, Default)]
pub struct DatabaseRegistry {
    open: Rc<RefCell<HashMap<String, SharedDatabase>>>,
}

impl DatabaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, db_name: &str) -> bool {
        self.open.borrow().contains_key(db_name)
    }

    pub fn len(&self) -> usize {
        self.open.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.borrow().is_empty()
    }

    fn open(
        &self,
        factory: &IdbFactory,
        db_name: &str,
        store_name: Rc<str>,
    ) -> Result<SharedDatabase> {
        if let Some(database) = self.open.borrow().get(db_name) {
            return Ok(database.clone());
        }
        let database = open_database(factory, db_name, store_name)?;
        self.open
            .borrow_mut()
            .insert(db_name.to_owned(), database.clone());
        Ok(database)
    }
}

impl fmt::Debug for DatabaseRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseRegistry")
            .field("databases", &self.open.borrow().keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Transactional handle to one table, valid for a single unit of work.
pub struct Table {
    transaction: IdbTransaction,
    store: IdbObjectStore,
}

impl Table {
    pub fn store(&self) -> &IdbObjectStore {
        &self.store
    }

    pub fn transaction(&self) -> &IdbTransaction {
        &self.transaction
    }

    /// Bridges a request issued against this table.
    pub fn request(&self, request: &IdbRequest) -> Result<RequestFuture<IdbRequest>> {
        bridge(request)
    }

    /// Resolves once the transaction commits.
    pub fn done(&self) -> Result<RequestFuture<IdbTransaction>> {
        bridge(&self.transaction)
    }
}

/// Accessor that runs units of work against a fresh transaction on the
/// configured table.
#[derive(Clone)]
pub struct StoreHandle {
    database: SharedDatabase,
    store_name: Rc<str>,
}

impl StoreHandle {
    pub(crate) fn create(
        options: &StoreOptions,
        registry: Option<&DatabaseRegistry>,
    ) -> Result<Self> {
        let factory = platform::indexed_db_factory()?;
        let store_name: Rc<str> = options.store_name.as_str().into();
        let database = match registry {
            Some(registry) => registry.open(&factory, &options.db_name, Rc::clone(&store_name))?,
            None => open_database(&factory, &options.db_name, Rc::clone(&store_name))?,
        };
        Ok(Self {
            database,
            store_name,
        })
    }

    pub fn store_name(&self) -> &str {
        &self.store_name
    }

    /// Waits for the database, opens a transaction in `mode`, and runs
    /// `unit_of_work` with the table.
    ///
    /// Requests must be issued before the unit of work first awaits, otherwise
    /// the engine may have committed the transaction already.
    pub async fn run<T, F, Fut>(&self, mode: AccessMode, unit_of_work: F) -> Result<T>
    where
        F: FnOnce(Table) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let db = self.database.clone().await?;
        let transaction = db.transaction_with_str_and_mode(&self.store_name, mode.into())?;
        let store = transaction.object_store(&self.store_name)?;
        unit_of_work(Table { transaction, store }).await
    }
}

impl fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreHandle")
            .field("store_name", &self.store_name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_starts_empty() {
        let registry = DatabaseRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
        assert!(!registry.contains("keyval-store"));
    }

    #[cfg(not(target_arch = "wasm32"))]
    #[test]
    fn handle_creation_fails_without_indexeddb() {
        let registry = DatabaseRegistry::new();
        let err = StoreHandle::create(&StoreOptions::default(), Some(&registry)).unwrap_err();
        assert!(matches!(err, crate::StoreError::IndexedDbUnavailable));
        assert!(registry.is_empty());
    }
}
