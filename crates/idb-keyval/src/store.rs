use std::cell::RefCell;
use std::convert::Infallible;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use futures_util::future::{try_join, try_join_all};
use js_sys::Array;
use serde::de::DeserializeOwned;
use serde::Serialize;
use wasm_bindgen::closure::Closure;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::Event;

use crate::bridge::bridge;
use crate::provider::{AccessMode, DatabaseRegistry, StoreHandle};
use crate::{platform, Key, Result, StoreError, StoreOptions};

/// Missing entries read back as `undefined`.
fn present(value: JsValue) -> Option<JsValue> {
    (!value.is_undefined()).then_some(value)
}

fn to_js_keys<K: Into<Key>>(keys: impl IntoIterator<Item = K>) -> Result<Vec<JsValue>> {
    keys.into_iter().map(|key| key.into().to_js()).collect()
}

/// Key-value store over one IndexedDB object store.
///
/// Construction never fails. If IndexedDB cannot be reached the store is
/// permanently uninitialized and every operation returns
/// [`StoreError::NotInitialized`] without touching the host.
#[derive(Debug)]
pub struct KeyvalStore {
    options: StoreOptions,
    handle: Option<StoreHandle>,
}

impl Default for KeyvalStore {
    fn default() -> Self {
        Self::new(StoreOptions::default())
    }
}

impl KeyvalStore {
    /// Opens a connection owned by this store alone.
    pub fn new(options: StoreOptions) -> Self {
        Self::build(options, None)
    }

    /// Shares the connection with every other store opened through `registry`
    /// under the same database name.
    pub fn with_registry(options: StoreOptions, registry: &DatabaseRegistry) -> Self {
        Self::build(options, Some(registry))
    }

    fn build(options: StoreOptions, registry: Option<&DatabaseRegistry>) -> Self {
        let handle = match StoreHandle::create(&options, registry) {
            Ok(handle) => Some(handle),
            Err(err) => {
                tracing::warn!(
                    db = %options.db_name,
                    store = %options.store_name,
                    error = %err,
                    "keyval store failed to initialize"
                );
                None
            }
        };
        Self { options, handle }
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub fn is_initialized(&self) -> bool {
        self.handle.is_some()
    }

    /// The accessor backing this store, for custom units of work.
    pub fn handle(&self) -> Result<&StoreHandle> {
        self.handle.as_ref().ok_or(StoreError::NotInitialized)
    }

    /// Serde-converted view of this store.
    pub fn typed<V>(&self) -> TypedStore<'_, V> {
        TypedStore {
            store: self,
            _value: PhantomData,
        }
    }

    /// Deletes a whole database. Stays pending while another connection to it
    /// is open.
    pub async fn delete_database(db_name: &str) -> Result<()> {
        let factory = platform::indexed_db_factory()?;
        let request = factory.delete_database(db_name)?;
        bridge(&request)?.await?;
        tracing::debug!(db = %db_name, "deleted database");
        Ok(())
    }

    pub async fn get(&self, key: impl Into<Key>) -> Result<Option<JsValue>> {
        self.handle()?;
        self.get_raw(key.into().to_js()?).await
    }

    /// Reads every key in one transaction. The output lines up with `keys`.
    pub async fn get_many<K: Into<Key>>(
        &self,
        keys: impl IntoIterator<Item = K>,
    ) -> Result<Vec<Option<JsValue>>> {
        self.handle()?;
        self.get_many_raw(to_js_keys(keys)?).await
    }

    pub async fn set(&self, key: impl Into<Key>, value: impl Into<JsValue>) -> Result<()> {
        self.handle()?;
        self.set_raw(key.into().to_js()?, value.into()).await
    }

    /// Writes every entry in one transaction.
    pub async fn set_many<K, V>(&self, entries: impl IntoIterator<Item = (K, V)>) -> Result<()>
    where
        K: Into<Key>,
        V: Into<JsValue>,
    {
        self.handle()?;
        let entries = entries
            .into_iter()
            .map(|(key, value)| Ok((key.into().to_js()?, value.into())))
            .collect::<Result<Vec<_>>>()?;
        self.set_many_raw(entries).await
    }

    /// Replaces the value at `key` with `updater(current)`, where `current`
    /// is `None` for a missing entry.
    pub async fn update<F>(&self, key: impl Into<Key>, updater: F) -> Result<()>
    where
        F: FnOnce(Option<JsValue>) -> JsValue + 'static,
    {
        self.try_update(key, move |current| Ok::<_, Infallible>(updater(current)))
            .await
    }

    /// Like [`KeyvalStore::update`], but an `Err` from `updater` aborts the
    /// transaction and nothing is written.
    pub async fn try_update<F, E>(&self, key: impl Into<Key>, updater: F) -> Result<()>
    where
        F: FnOnce(Option<JsValue>) -> std::result::Result<JsValue, E> + 'static,
        E: fmt::Display,
    {
        self.update_with(key, move |current| {
            updater(current).map_err(|err| StoreError::Updater(err.to_string()))
        })
        .await
    }

    pub(crate) async fn update_with<F>(&self, key: impl Into<Key>, updater: F) -> Result<()>
    where
        F: FnOnce(Option<JsValue>) -> Result<JsValue> + 'static,
    {
        self.handle()?;
        self.update_raw(key.into().to_js()?, updater).await
    }

    pub async fn del(&self, key: impl Into<Key>) -> Result<()> {
        self.handle()?;
        self.del_raw(key.into().to_js()?).await
    }

    /// Deletes every key in one transaction.
    pub async fn del_many<K: Into<Key>>(&self, keys: impl IntoIterator<Item = K>) -> Result<()> {
        self.handle()?;
        self.del_many_raw(to_js_keys(keys)?).await
    }

    pub async fn clear(&self) -> Result<()> {
        let handle = self.handle()?;
        handle
            .run(AccessMode::ReadWrite, |table| async move {
                table.store().clear()?;
                table.done()?.await?;
                Ok(())
            })
            .await
    }

    /// All keys, in ascending key order.
    pub async fn keys(&self) -> Result<Vec<Key>> {
        self.keys_raw()
            .await?
            .iter()
            .map(Key::from_js)
            .collect()
    }

    /// All values, ordered by their keys.
    pub async fn values(&self) -> Result<Vec<JsValue>> {
        let handle = self.handle()?;
        handle
            .run(AccessMode::ReadOnly, |table| async move {
                let request = table.store().get_all()?;
                let values = table.request(&request)?.await?;
                Ok(Array::from(&values).iter().collect())
            })
            .await
    }

    /// All entries, read in one transaction.
    pub async fn entries(&self) -> Result<Vec<(Key, JsValue)>> {
        self.entries_raw()
            .await?
            .into_iter()
            .map(|(key, value)| Ok((Key::from_js(&key)?, value)))
            .collect()
    }

    // The `*_raw` paths take keys exactly as the host hands them over, so the
    // JS surface never round-trips them through `Key`. The engine validates
    // them.

    pub(crate) async fn get_raw(&self, key: JsValue) -> Result<Option<JsValue>> {
        let handle = self.handle()?;
        handle
            .run(AccessMode::ReadOnly, move |table| async move {
                let request = table.store().get(&key)?;
                let value = table.request(&request)?.await?;
                Ok(present(value))
            })
            .await
    }

    pub(crate) async fn get_many_raw(&self, keys: Vec<JsValue>) -> Result<Vec<Option<JsValue>>> {
        let handle = self.handle()?;
        handle
            .run(AccessMode::ReadOnly, move |table| async move {
                let pending = keys
                    .iter()
                    .map(|key| {
                        let request = table.store().get(key)?;
                        table.request(&request)
                    })
                    .collect::<Result<Vec<_>>>()?;
                let values = try_join_all(pending).await?;
                Ok(values.into_iter().map(present).collect())
            })
            .await
    }

    pub(crate) async fn set_raw(&self, key: JsValue, value: JsValue) -> Result<()> {
        let handle = self.handle()?;
        handle
            .run(AccessMode::ReadWrite, move |table| async move {
                table.store().put_with_key(&value, &key)?;
                table.done()?.await?;
                Ok(())
            })
            .await
    }

    pub(crate) async fn set_many_raw(&self, entries: Vec<(JsValue, JsValue)>) -> Result<()> {
        let handle = self.handle()?;
        handle
            .run(AccessMode::ReadWrite, move |table| async move {
                for (key, value) in &entries {
                    table.store().put_with_key(value, key)?;
                }
                table.done()?.await?;
                Ok(())
            })
            .await
    }

    pub(crate) async fn update_raw<F>(&self, key: JsValue, updater: F) -> Result<()>
    where
        F: FnOnce(Option<JsValue>) -> Result<JsValue> + 'static,
    {
        let handle = self.handle()?;
        handle
            .run(AccessMode::ReadWrite, move |table| async move {
                let read = table.store().get(&key)?;
                let failed = Rc::new(RefCell::new(None::<StoreError>));

                // The write is issued from the read's own success handler so it
                // lands on the same, still active, transaction.
                let write_back = {
                    let read = read.clone();
                    let store = table.store().clone();
                    let transaction = table.transaction().clone();
                    let failed = Rc::clone(&failed);
                    let mut updater = Some(updater);
                    Closure::<dyn FnMut(Event)>::new(move |_event: Event| {
                        let Some(updater) = updater.take() else {
                            return;
                        };
                        let written = read
                            .result()
                            .map_err(StoreError::from)
                            .and_then(|current| updater(present(current)))
                            .and_then(|next| Ok(store.put_with_key(&next, &key)?));
                        if let Err(err) = written {
                            *failed.borrow_mut() = Some(err);
                            let _ = transaction.abort();
                        }
                    })
                };

                let committed = table.done()?;
                read.set_onsuccess(Some(write_back.as_ref().unchecked_ref()));
                let outcome = committed.await;
                read.set_onsuccess(None);
                drop(write_back);

                let failure = failed.borrow_mut().take();
                match failure {
                    Some(err) => Err(err),
                    None => outcome.map(drop),
                }
            })
            .await
    }

    pub(crate) async fn del_raw(&self, key: JsValue) -> Result<()> {
        let handle = self.handle()?;
        handle
            .run(AccessMode::ReadWrite, move |table| async move {
                table.store().delete(&key)?;
                table.done()?.await?;
                Ok(())
            })
            .await
    }

    pub(crate) async fn del_many_raw(&self, keys: Vec<JsValue>) -> Result<()> {
        let handle = self.handle()?;
        handle
            .run(AccessMode::ReadWrite, move |table| async move {
                for key in &keys {
                    table.store().delete(key)?;
                }
                table.done()?.await?;
                Ok(())
            })
            .await
    }

    pub(crate) async fn keys_raw(&self) -> Result<Vec<JsValue>> {
        let handle = self.handle()?;
        handle
            .run(AccessMode::ReadOnly, |table| async move {
                let request = table.store().get_all_keys()?;
                let keys = table.request(&request)?.await?;
                Ok(Array::from(&keys).iter().collect())
            })
            .await
    }

    pub(crate) async fn entries_raw(&self) -> Result<Vec<(JsValue, JsValue)>> {
        let handle = self.handle()?;
        handle
            .run(AccessMode::ReadOnly, |table| async move {
                let keys = table.store().get_all_keys()?;
                let values = table.store().get_all()?;
                let (keys, values) =
                    try_join(table.request(&keys)?, table.request(&values)?).await?;
                Ok(Array::from(&keys)
                    .iter()
                    .zip(Array::from(&values).iter())
                    .collect())
            })
            .await
    }
}

fn to_js<V: Serialize>(value: &V) -> Result<JsValue> {
    let serializer = serde_wasm_bindgen::Serializer::new().serialize_maps_as_objects(true);
    Ok(value.serialize(&serializer)?)
}

fn from_js<V: DeserializeOwned>(value: JsValue) -> Result<V> {
    Ok(serde_wasm_bindgen::from_value(value)?)
}

/// [`KeyvalStore`] operations with values converted through serde.
pub struct TypedStore<'a, V> {
    store: &'a KeyvalStore,
    _value: PhantomData<fn() -> V>,
}

impl<V> fmt::Debug for TypedStore<'_, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedStore")
            .field("store", &self.store)
            .finish()
    }
}

impl<V> TypedStore<'_, V>
where
    V: Serialize + DeserializeOwned + 'static,
{
    pub async fn get(&self, key: impl Into<Key>) -> Result<Option<V>> {
        self.store.handle()?;
        self.store.get(key).await?.map(from_js).transpose()
    }

    pub async fn get_many<K: Into<Key>>(
        &self,
        keys: impl IntoIterator<Item = K>,
    ) -> Result<Vec<Option<V>>> {
        self.store.handle()?;
        self.store
            .get_many(keys)
            .await?
            .into_iter()
            .map(|value| value.map(from_js).transpose())
            .collect()
    }

    pub async fn set(&self, key: impl Into<Key>, value: &V) -> Result<()> {
        self.store.handle()?;
        self.store.set(key, to_js(value)?).await
    }

    pub async fn set_many<'v, K: Into<Key>>(
        &self,
        entries: impl IntoIterator<Item = (K, &'v V)>,
    ) -> Result<()> {
        self.store.handle()?;
        let entries = entries
            .into_iter()
            .map(|(key, value)| Ok((key, to_js(value)?)))
            .collect::<Result<Vec<_>>>()?;
        self.store.set_many(entries).await
    }

    pub async fn update<F>(&self, key: impl Into<Key>, updater: F) -> Result<()>
    where
        F: FnOnce(Option<V>) -> V + 'static,
    {
        self.store.handle()?;
        self.store
            .update_with(key, move |current| {
                let current = current.map(from_js::<V>).transpose()?;
                to_js(&updater(current))
            })
            .await
    }

    pub async fn values(&self) -> Result<Vec<V>> {
        self.store.handle()?;
        self.store.values().await?.into_iter().map(from_js).collect()
    }
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;

    fn assert_not_initialized<T: fmt::Debug>(outcome: Result<T>) {
        match outcome {
            Err(err @ StoreError::NotInitialized) => {
                assert_eq!(err.to_string(), "The store is not initialized yet");
            }
            other => panic!("expected NotInitialized, got {other:?}"),
        }
    }

    #[test]
    fn construction_without_indexeddb_yields_uninitialized_store() {
        let store = KeyvalStore::new(StoreOptions::default().with_db_name("t1"));
        assert!(!store.is_initialized());
        assert_eq!(store.options().db_name, "t1");
        assert_not_initialized(store.handle());
    }

    #[test]
    fn every_operation_rejects_when_uninitialized() {
        let store = KeyvalStore::default();
        pollster::block_on(async {
            assert_not_initialized(store.get("a").await);
            assert_not_initialized(store.get_many(["a", "b", "c"]).await);
            assert_not_initialized(store.set("a", 1).await);
            assert_not_initialized(store.set_many([("a", 1), ("b", 2)]).await);
            assert_not_initialized(store.update("a", |_| JsValue::NULL).await);
            assert_not_initialized(
                store
                    .try_update("a", |_| Err::<JsValue, _>("never called"))
                    .await,
            );
            assert_not_initialized(store.del("a").await);
            assert_not_initialized(store.del_many(["a", "b"]).await);
            assert_not_initialized(store.clear().await);
            assert_not_initialized(store.keys().await);
            assert_not_initialized(store.values().await);
            assert_not_initialized(store.entries().await);
        });
    }

    #[test]
    fn uninitialized_check_precedes_key_validation() {
        let store = KeyvalStore::default();
        pollster::block_on(async {
            assert_not_initialized(store.get(f64::NAN).await);
            assert_not_initialized(store.del_many([f64::NAN]).await);
        });
    }

    #[test]
    fn typed_operations_reject_when_uninitialized() {
        let store = KeyvalStore::new(StoreOptions::default().with_store_name("s1"));
        let typed = store.typed::<u32>();
        pollster::block_on(async {
            assert_not_initialized(typed.get("a").await);
            assert_not_initialized(typed.get_many(["a"]).await);
            assert_not_initialized(typed.set("a", &1).await);
            assert_not_initialized(typed.set_many([("a", &1), ("b", &2)]).await);
            assert_not_initialized(typed.update("a", |n| n.unwrap_or(0) + 1).await);
            assert_not_initialized(typed.values().await);
        });
    }

    #[test]
    fn shared_registry_stays_empty_when_uninitialized() {
        let registry = DatabaseRegistry::new();
        let first = KeyvalStore::with_registry(StoreOptions::default(), &registry);
        let second = KeyvalStore::with_registry(StoreOptions::default(), &registry);
        assert!(!first.is_initialized());
        assert!(!second.is_initialized());
        assert!(registry.is_empty());
    }
}
