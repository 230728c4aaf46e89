use serde::Deserialize;

pub const DEFAULT_DB_NAME: &str = "keyval-store";
pub const DEFAULT_STORE_NAME: &str = "keyval";

/// Construction options for [`crate::KeyvalStore`].
///
/// Deserializing a partial object (e.g. `{ "dbName": "t1" }`) fills the
/// missing fields from [`StoreOptions::default`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreOptions {
    /// Logical database name.
    pub db_name: String,
    /// Object store (table) created inside the database on first open.
    pub store_name: String,
    /// Reserved; accepted for compatibility and currently ignored.
    pub size: Option<u64>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            db_name: DEFAULT_DB_NAME.to_owned(),
            store_name: DEFAULT_STORE_NAME.to_owned(),
            size: None,
        }
    }
}

impl StoreOptions {
    pub fn with_db_name(mut self, db_name: impl Into<String>) -> Self {
        self.db_name = db_name.into();
        self
    }

    pub fn with_store_name(mut self, store_name: impl Into<String>) -> Self {
        self.store_name = store_name.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_fixed_names() {
        let opts = StoreOptions::default();
        assert_eq!(opts.db_name, "keyval-store");
        assert_eq!(opts.store_name, "keyval");
        assert_eq!(opts.size, None);
    }

    #[test]
    fn partial_config_merges_over_defaults() {
        let opts: StoreOptions = serde_json::from_str(r#"{"dbName":"t1"}"#).unwrap();
        assert_eq!(opts, StoreOptions::default().with_db_name("t1"));

        let opts: StoreOptions =
            serde_json::from_str(r#"{"storeName":"s1","size":4096}"#).unwrap();
        assert_eq!(opts.db_name, DEFAULT_DB_NAME);
        assert_eq!(opts.store_name, "s1");
        assert_eq!(opts.size, Some(4096));
    }

    #[test]
    fn empty_config_is_default() {
        let opts: StoreOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(opts, StoreOptions::default());
    }
}
