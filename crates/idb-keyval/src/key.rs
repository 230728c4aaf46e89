use js_sys::{Array, ArrayBuffer, JsString, Reflect, Uint8Array};
use wasm_bindgen::{JsCast, JsValue};

use crate::{Result, StoreError};

/// An IndexedDB primary key.
///
/// Mirrors the engine's valid-key types. Binary keys read back from the engine
/// arrive as `ArrayBuffer` and decode to [`Key::Binary`].
#[derive(Debug, Clone, PartialEq)]
pub enum Key {
    String(String),
    Number(f64),
    /// Milliseconds since the Unix epoch.
    Date(f64),
    Binary(Vec<u8>),
    Array(Vec<Key>),
}

impl Key {
    /// Checks the key against IndexedDB's valid-key rules without touching JS.
    pub fn validate(&self) -> Result<()> {
        match self {
            Key::String(_) | Key::Binary(_) => Ok(()),
            Key::Number(n) if n.is_nan() => Err(StoreError::InvalidKey("NaN is not a valid key")),
            Key::Number(_) => Ok(()),
            Key::Date(ms) if !ms.is_finite() => Err(StoreError::InvalidKey("invalid date")),
            Key::Date(_) => Ok(()),
            Key::Array(items) => items.iter().try_for_each(Key::validate),
        }
    }

    pub fn to_js(&self) -> Result<JsValue> {
        self.validate()?;
        Ok(self.to_js_unchecked())
    }

    fn to_js_unchecked(&self) -> JsValue {
        match self {
            Key::String(s) => JsValue::from_str(s),
            Key::Number(n) => JsValue::from_f64(*n),
            Key::Date(ms) => js_sys::Date::new(&JsValue::from_f64(*ms)).into(),
            Key::Binary(bytes) => Uint8Array::from(bytes.as_slice()).into(),
            Key::Array(items) => items
                .iter()
                .map(Key::to_js_unchecked)
                .collect::<Array>()
                .into(),
        }
    }

    pub fn from_js(value: &JsValue) -> Result<Self> {
        let key = if value.is_string() {
            let s: &JsString = value.unchecked_ref();
            // Decoding would replace lone surrogates and alias distinct keys.
            if !s.is_valid_utf16() {
                return Err(StoreError::InvalidKey("string key is not valid UTF-16"));
            }
            Key::String(String::from(s))
        } else if let Some(n) = value.as_f64() {
            Key::Number(n)
        } else if let Some(date) = value.dyn_ref::<js_sys::Date>() {
            Key::Date(date.get_time())
        } else if Array::is_array(value) {
            let items = Array::from(value)
                .iter()
                .map(|item| Key::from_js(&item))
                .collect::<Result<Vec<_>>>()?;
            Key::Array(items)
        } else if value.is_instance_of::<ArrayBuffer>() {
            Key::Binary(Uint8Array::new(value).to_vec())
        } else if ArrayBuffer::is_view(value) {
            let buffer = Reflect::get(value, &JsValue::from_str("buffer"))?;
            let offset = Reflect::get(value, &JsValue::from_str("byteOffset"))?;
            let length = Reflect::get(value, &JsValue::from_str("byteLength"))?;
            let bytes = Uint8Array::new_with_byte_offset_and_length(
                &buffer,
                offset.as_f64().unwrap_or_default() as u32,
                length.as_f64().unwrap_or_default() as u32,
            );
            Key::Binary(bytes.to_vec())
        } else {
            return Err(StoreError::InvalidKey("unsupported key type"));
        };
        key.validate()?;
        Ok(key)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::String(value.to_owned())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::String(value)
    }
}

impl From<f64> for Key {
    fn from(value: f64) -> Self {
        Key::Number(value)
    }
}

impl From<i32> for Key {
    fn from(value: i32) -> Self {
        Key::Number(value.into())
    }
}

impl From<u32> for Key {
    fn from(value: u32) -> Self {
        Key::Number(value.into())
    }
}

impl From<Vec<u8>> for Key {
    fn from(value: Vec<u8>) -> Self {
        Key::Binary(value)
    }
}

impl From<&[u8]> for Key {
    fn from(value: &[u8]) -> Self {
        Key::Binary(value.to_vec())
    }
}

impl From<Vec<Key>> for Key {
    fn from(value: Vec<Key>) -> Self {
        Key::Array(value)
    }
}

#[cfg(test)]
mod tests {
    use super::Key;
    use crate::StoreError;

    #[test]
    fn scalar_keys_are_valid() {
        assert!(Key::from("a").validate().is_ok());
        assert!(Key::from(-1).validate().is_ok());
        assert!(Key::from(f64::INFINITY).validate().is_ok());
        assert!(Key::from(vec![0u8, 1, 2]).validate().is_ok());
        assert!(Key::Date(0.0).validate().is_ok());
    }

    #[test]
    fn nan_number_is_rejected() {
        assert!(matches!(
            Key::from(f64::NAN).validate(),
            Err(StoreError::InvalidKey(_))
        ));
    }

    #[test]
    fn non_finite_date_is_rejected() {
        assert!(Key::Date(f64::INFINITY).validate().is_err());
        assert!(Key::Date(f64::NAN).validate().is_err());
    }

    #[test]
    fn array_keys_validate_recursively() {
        let ok = Key::from(vec![Key::from("a"), Key::from(vec![Key::from(1)])]);
        assert!(ok.validate().is_ok());

        let nested_nan = Key::from(vec![Key::from("a"), Key::from(vec![Key::from(f64::NAN)])]);
        assert!(nested_nan.validate().is_err());
    }

    #[test]
    fn to_js_validates_before_crossing_into_js() {
        // Must fail in pure Rust; native targets cannot create JS values.
        assert!(Key::from(f64::NAN).to_js().is_err());
    }
}
