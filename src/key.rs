use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

use crate::error::CacheError;
use crate::error::Result;
use crate::types::CacheKey;

// Unit separator can't appear in a JSON encoding without being escaped, so operation and parameters can't bleed
// into each other.
const SEPARATOR: &[u8] = b"\x1f";

/// Maps an operation and its parameters into a [`CacheKey`].
#[derive(Debug, Clone, Default)]
pub struct KeyDeriver {
    salt: String,
}

impl KeyDeriver {
    pub fn new(salt: impl Into<String>) -> Self {
        Self { salt: salt.into() }
    }

    /// The parameters are JSON-encoded through [`serde_json::Value`], which sorts map keys. The key thus depends on
    /// the order of sequence elements and struct fields, but not on iteration order of `HashMap` and alike.
    pub fn derive_key<P>(&self, operation: &str, params: &P) -> Result<CacheKey>
    where
        P: Serialize + ?Sized,
    {
        if operation.is_empty() {
            return Err(CacheError::EmptyOperand);
        }

        let params = serde_json::to_value(params)?.to_string();

        let mut hasher = Sha256::new();
        hasher.update(operation.as_bytes());
        hasher.update(SEPARATOR);
        hasher.update(params.as_bytes());
        hasher.update(self.salt.as_bytes());

        Ok(CacheKey::new(hex::encode(hasher.finalize())))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::collections::HashMap;
    use std::collections::HashSet;

    use serde_json::json;

    use super::*;

    #[test]
    fn same_input_same_key() {
        let kd = KeyDeriver::new("pepper");
        let k1 = kd.derive_key("SELECT 1", &json!({})).unwrap();
        let k2 = kd.derive_key("SELECT 1", &json!({})).unwrap();
        assert_eq!(k1, k2);
        assert_eq!(k1.as_str().len(), 64);
    }

    #[test]
    fn params_change_the_key() {
        let kd = KeyDeriver::new("pepper");
        let k1 = kd.derive_key("SELECT 1", &json!({"a": 1})).unwrap();
        let k2 = kd.derive_key("SELECT 1", &json!({"a": 2})).unwrap();
        assert_ne!(k1, k2);
    }

    #[test]
    fn salt_changes_the_key() {
        let k1 = KeyDeriver::new("one").derive_key("SELECT 1", &()).unwrap();
        let k2 = KeyDeriver::new("two").derive_key("SELECT 1", &()).unwrap();
        assert_ne!(k1, k2);
    }

    #[test]
    fn operation_and_params_do_not_merge() {
        let kd = KeyDeriver::default();
        let k1 = kd.derive_key("SELECT 1", &"2").unwrap();
        let k2 = kd.derive_key("SELECT 12", &"").unwrap();
        assert_ne!(k1, k2);
    }

    #[test]
    fn map_order_doesnt_matter() {
        let kd = KeyDeriver::new("pepper");
        let keys = (0..20)
            .map(|_| {
                let params: HashMap<String, u32> = (0..8).map(|i| (format!("k{i}"), i)).collect();
                kd.derive_key("SELECT 1", &params).unwrap()
            })
            .collect::<HashSet<_>>();
        assert_eq!(keys.len(), 1);

        let sorted: BTreeMap<String, u32> = (0..8).map(|i| (format!("k{i}"), i)).collect();
        assert!(keys.contains(&kd.derive_key("SELECT 1", &sorted).unwrap()));
    }

    #[test]
    fn empty_operation() {
        let err = KeyDeriver::default().derive_key("", &json!([])).unwrap_err();
        assert!(matches!(err, CacheError::EmptyOperand));
    }
}
