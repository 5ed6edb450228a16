use std::collections::BTreeMap;

pub trait Subset {
    fn is_subset(&self, superset: &Self) -> bool;
}

impl Subset for BTreeMap<String, String> {
    fn is_subset(&self, superset: &Self) -> bool {
        self.iter()
            .all(|(key, value)| Some(value) == superset.get(key))
    }
}

/// Keys missing from the subset are ignored so that fields defaulted by the
/// API server never count as drift.
impl Subset for serde_json::Map<String, serde_json::Value> {
    fn is_subset(&self, superset: &Self) -> bool {
        self.iter().all(|(key, value)| {
            superset
                .get(key)
                .is_some_and(|superset| value.is_subset(superset))
        })
    }
}

impl Subset for serde_json::Value {
    fn is_subset(&self, superset: &Self) -> bool {
        use serde_json::Value;

        match (self, superset) {
            (Value::Object(subset), Value::Object(superset)) => subset.is_subset(superset),
            (Value::Array(subset), Value::Array(superset)) => {
                subset.len() == superset.len()
                    && subset
                        .iter()
                        .zip(superset)
                        .all(|(subset, superset)| subset.is_subset(superset))
            }
            (subset, superset) => subset == superset,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::Subset;

    #[test]
    fn json_object_ignores_defaulted_keys() {
        // arrange
        let desired = json!({ "webhook": { "example": { "port": "12000" } } });
        let observed = json!({
            "webhook": { "example": { "port": "12000", "method": "POST" } },
            "replicas": 1
        });

        // act / assert
        assert!(desired.is_subset(&observed));
        assert!(!observed.is_subset(&desired));
    }

    #[test]
    fn json_scalar_drift() {
        // arrange
        let desired = json!({ "webhook": { "example": { "port": "12000" } } });
        let observed = json!({ "webhook": { "example": { "port": "13000" } } });

        // act / assert
        assert!(!desired.is_subset(&observed));
    }

    #[test]
    fn json_array_length_mismatch() {
        // arrange
        let desired = json!({ "filters": [{ "name": "a" }] });
        let observed = json!({ "filters": [{ "name": "a" }, { "name": "b" }] });

        // act / assert
        assert!(!desired.is_subset(&observed));
    }

    #[test]
    fn json_array_elements_are_compared_as_subsets() {
        // arrange
        let desired = json!({ "filters": [{ "name": "a" }] });
        let observed = json!({ "filters": [{ "name": "a", "enabled": true }] });

        // act / assert
        assert!(desired.is_subset(&observed));
    }

    #[test]
    fn btree_map_subset() {
        // arrange
        let subset: BTreeMap<String, String> = [("a".to_string(), "1".to_string())].into();
        let superset: BTreeMap<String, String> = [
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "2".to_string()),
        ]
        .into();

        // act / assert
        assert!(subset.is_subset(&superset));
        assert!(!superset.is_subset(&subset));
    }
}
