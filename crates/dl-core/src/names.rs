//! Strongly-typed identifiers.

use crate::newtype_string::define_newtype_string;

define_newtype_string! {
    /// A configured entity (customers, products, orders, ...).
    pub struct EntityName;
}

define_newtype_string! {
    /// A quality rule name, unique within the configuration.
    pub struct RuleName;
}

define_newtype_string! {
    /// A business-assigned identifier, rendered as text.
    ///
    /// Under Type-2 history one natural key maps to many surrogate keys.
    pub struct NaturalKey;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_try_new_rejects_empty() {
        assert!(EntityName::try_new("").is_none());
        assert_eq!(EntityName::try_new("orders").unwrap(), "orders");
    }

    #[test]
    fn test_map_lookup_by_str() {
        let mut keys: HashMap<NaturalKey, i64> = HashMap::new();
        keys.insert(NaturalKey::new("C1"), 7);
        assert_eq!(keys.get("C1"), Some(&7));
    }

    #[test]
    fn test_deserialize_rejects_empty() {
        let err = serde_yaml::from_str::<RuleName>("''").unwrap_err();
        assert!(err.to_string().contains("must not be empty"));
    }
}
