use web_sys::IdbFactory;

use crate::Result;

/// Returns the global `indexedDB` factory of the current window or worker.
#[cfg(target_arch = "wasm32")]
pub fn indexed_db_factory() -> Result<IdbFactory> {
    use crate::StoreError;
    use wasm_bindgen::JsCast;

    let global = js_sys::global();
    let factory = if let Some(window) = global.dyn_ref::<web_sys::Window>() {
        window.indexed_db()?
    } else if let Some(worker) = global.dyn_ref::<web_sys::WorkerGlobalScope>() {
        worker.indexed_db()?
    } else {
        None
    };
    factory.ok_or(StoreError::IndexedDbUnavailable)
}

/// Native targets have no IndexedDB.
#[cfg(not(target_arch = "wasm32"))]
pub fn indexed_db_factory() -> Result<IdbFactory> {
    Err(crate::StoreError::IndexedDbUnavailable)
}
