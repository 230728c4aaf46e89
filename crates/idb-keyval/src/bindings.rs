//! JS-facing `KeyvalStore` class. Every method returns a `Promise`.
//!
//! Keys are handed to IndexedDB exactly as the caller passed them; the engine
//! decides which ones are valid.

use std::rc::Rc;

use js_sys::{Array, Function, Promise};
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::future_to_promise;

use crate::{KeyvalStore, StoreOptions};

/// Merges `options` over the defaults. A malformed object falls back to the
/// defaults entirely.
fn options_from_js(options: JsValue) -> StoreOptions {
    if options.is_undefined() || options.is_null() {
        return StoreOptions::default();
    }
    match serde_wasm_bindgen::from_value(options) {
        Ok(options) => options,
        Err(err) => {
            tracing::warn!(error = %err, "malformed keyval store options, using defaults");
            StoreOptions::default()
        }
    }
}

#[wasm_bindgen(js_name = KeyvalStore)]
pub struct JsKeyvalStore {
    inner: Rc<KeyvalStore>,
}

#[wasm_bindgen(js_class = KeyvalStore)]
impl JsKeyvalStore {
    /// `options` may be omitted or a partial `{ dbName, storeName, size }`.
    /// Never throws.
    #[wasm_bindgen(constructor)]
    pub fn new(options: JsValue) -> JsKeyvalStore {
        Self {
            inner: Rc::new(KeyvalStore::new(options_from_js(options))),
        }
    }

    #[wasm_bindgen(getter, js_name = dbName)]
    pub fn db_name(&self) -> String {
        self.inner.options().db_name.clone()
    }

    #[wasm_bindgen(getter, js_name = storeName)]
    pub fn store_name(&self) -> String {
        self.inner.options().store_name.clone()
    }

    #[wasm_bindgen(js_name = deleteDatabase)]
    pub fn delete_database(db_name: String) -> Promise {
        future_to_promise(async move {
            KeyvalStore::delete_database(&db_name).await?;
            Ok(JsValue::UNDEFINED)
        })
    }

    pub fn get(&self, key: JsValue) -> Promise {
        let store = Rc::clone(&self.inner);
        future_to_promise(async move {
            let value = store.get_raw(key).await?;
            Ok(value.unwrap_or(JsValue::UNDEFINED))
        })
    }

    #[wasm_bindgen(js_name = getMany)]
    pub fn get_many(&self, keys: Array) -> Promise {
        let store = Rc::clone(&self.inner);
        future_to_promise(async move {
            let values = store.get_many_raw(keys.iter().collect()).await?;
            Ok(values
                .into_iter()
                .map(|value| value.unwrap_or(JsValue::UNDEFINED))
                .collect::<Array>()
                .into())
        })
    }

    pub fn set(&self, key: JsValue, value: JsValue) -> Promise {
        let store = Rc::clone(&self.inner);
        future_to_promise(async move {
            store.set_raw(key, value).await?;
            Ok(JsValue::UNDEFINED)
        })
    }

    /// `entries` is an array of `[key, value]` pairs.
    #[wasm_bindgen(js_name = setMany)]
    pub fn set_many(&self, entries: Array) -> Promise {
        let store = Rc::clone(&self.inner);
        future_to_promise(async move {
            let entries = entries
                .iter()
                .map(|entry| {
                    let pair = Array::from(&entry);
                    (pair.get(0), pair.get(1))
                })
                .collect();
            store.set_many_raw(entries).await?;
            Ok(JsValue::UNDEFINED)
        })
    }

    /// A throwing `updater` rejects with the thrown value.
    pub fn update(&self, key: JsValue, updater: Function) -> Promise {
        let store = Rc::clone(&self.inner);
        future_to_promise(async move {
            store
                .update_raw(key, move |current| {
                    let current = current.unwrap_or(JsValue::UNDEFINED);
                    Ok(updater.call1(&JsValue::UNDEFINED, &current)?)
                })
                .await?;
            Ok(JsValue::UNDEFINED)
        })
    }

    pub fn del(&self, key: JsValue) -> Promise {
        let store = Rc::clone(&self.inner);
        future_to_promise(async move {
            store.del_raw(key).await?;
            Ok(JsValue::UNDEFINED)
        })
    }

    #[wasm_bindgen(js_name = delMany)]
    pub fn del_many(&self, keys: Array) -> Promise {
        let store = Rc::clone(&self.inner);
        future_to_promise(async move {
            store.del_many_raw(keys.iter().collect()).await?;
            Ok(JsValue::UNDEFINED)
        })
    }

    pub fn clear(&self) -> Promise {
        let store = Rc::clone(&self.inner);
        future_to_promise(async move {
            store.clear().await?;
            Ok(JsValue::UNDEFINED)
        })
    }

    pub fn keys(&self) -> Promise {
        let store = Rc::clone(&self.inner);
        future_to_promise(async move {
            let keys = store.keys_raw().await?;
            Ok(keys.into_iter().collect::<Array>().into())
        })
    }

    pub fn values(&self) -> Promise {
        let store = Rc::clone(&self.inner);
        future_to_promise(async move {
            let values = store.values().await?;
            Ok(values.into_iter().collect::<Array>().into())
        })
    }

    pub fn entries(&self) -> Promise {
        let store = Rc::clone(&self.inner);
        future_to_promise(async move {
            let entries = store.entries_raw().await?;
            Ok(entries
                .into_iter()
                .map(|(key, value)| Array::of2(&key, &value))
                .collect::<Array>()
                .into())
        })
    }
}
