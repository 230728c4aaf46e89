use wasm_bindgen::JsValue;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors surfaced by every store operation.
///
/// Host failures are carried verbatim in [`StoreError::Js`]; the crate only
/// synthesizes the remaining variants. The type is `Clone` so a memoized
/// database-open outcome can be handed to every waiting transaction.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("The store is not initialized yet")]
    NotInitialized,
    #[error("IndexedDB is not available in this context")]
    IndexedDbUnavailable,
    #[error("invalid IndexedDB key: {0}")]
    InvalidKey(&'static str),
    #[error("transaction was aborted")]
    Aborted,
    #[error("updater failed: {0}")]
    Updater(String),
    #[error("value conversion failed: {0}")]
    Serde(String),
    #[error("request was dropped before it settled")]
    Canceled,
    #[error("indexeddb operation failed: {0:?}")]
    Js(JsValue),
}

impl StoreError {
    pub(crate) fn from_dom_exception(ex: Option<web_sys::DomException>) -> Self {
        match ex {
            Some(ex) => StoreError::Js(ex.into()),
            None => StoreError::Aborted,
        }
    }
}

impl From<JsValue> for StoreError {
    fn from(value: JsValue) -> Self {
        StoreError::Js(value)
    }
}

impl From<serde_wasm_bindgen::Error> for StoreError {
    fn from(err: serde_wasm_bindgen::Error) -> Self {
        StoreError::Serde(err.to_string())
    }
}

impl From<StoreError> for JsValue {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Js(value) => value,
            other => js_sys::Error::new(&other.to_string()).into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::StoreError;

    #[test]
    fn not_initialized_message_is_stable() {
        assert_eq!(
            StoreError::NotInitialized.to_string(),
            "The store is not initialized yet"
        );
    }

    #[test]
    fn synthesized_errors_render_their_detail() {
        assert_eq!(
            StoreError::InvalidKey("NaN is not a valid key").to_string(),
            "invalid IndexedDB key: NaN is not a valid key"
        );
        assert_eq!(
            StoreError::Updater("boom".into()).to_string(),
            "updater failed: boom"
        );
    }
}
