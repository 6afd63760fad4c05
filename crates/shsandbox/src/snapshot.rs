//! Final variable environment of a run
//!
//! A [`Snapshot`] is a plain structural copy of the variables a script
//! bound, taken by [`Environment::snapshot`](crate::Environment::snapshot).
//! Names are kept sorted so serialized output is stable.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::env::{VarValue, Variable};

/// Mapping from variable name to its final typed value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct Snapshot {
    pub vars: BTreeMap<String, Variable>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.vars.get(name)
    }

    /// The value of `name` when it is a scalar.
    pub fn scalar(&self, name: &str) -> Option<&str> {
        match self.vars.get(name).map(|v| &v.value) {
            Some(VarValue::Scalar(s)) => Some(s),
            _ => None,
        }
    }

    /// The elements of `name` when it is an indexed array.
    pub fn indexed(&self, name: &str) -> Option<&[String]> {
        match self.vars.get(name).map(|v| &v.value) {
            Some(VarValue::Indexed(items)) => Some(items),
            _ => None,
        }
    }

    /// The entries of `name` when it is an associative array.
    pub fn associative(&self, name: &str) -> Option<&BTreeMap<String, String>> {
        match self.vars.get(name).map(|v| &v.value) {
            Some(VarValue::Associative(map)) => Some(map),
            _ => None,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Variable)> {
        self.vars.iter()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl FromIterator<(String, Variable)> for Snapshot {
    fn from_iter<I: IntoIterator<Item = (String, Variable)>>(iter: I) -> Self {
        Self {
            vars: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Snapshot {
    type Item = (String, Variable);
    type IntoIter = std::collections::btree_map::IntoIter<String, Variable>;

    fn into_iter(self) -> Self::IntoIter {
        self.vars.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Environment;

    #[test]
    fn test_typed_accessors() {
        let mut env = Environment::new();
        env.set("a", "x");
        env.set_var("X", Variable::indexed(["a", "b", "c"]));
        env.set_var("m", Variable::associative([("k", "v")]));
        let snap = env.snapshot();

        assert_eq!(snap.scalar("a"), Some("x"));
        assert_eq!(snap.indexed("X").map(|x| x.len()), Some(3));
        assert_eq!(snap.associative("m").and_then(|m| m.get("k")).map(String::as_str), Some("v"));
        assert_eq!(snap.scalar("X"), None);
        assert!(!snap.contains("missing"));
    }

    #[test]
    fn test_snapshot_is_idempotent() {
        let mut env = Environment::new();
        env.set("a", "x");
        env.set_key("m", "k", "v");
        assert_eq!(env.snapshot(), env.snapshot());
    }

    #[test]
    fn test_serializes_typed_values() {
        let snap: Snapshot = [
            ("a".to_string(), Variable::scalar("x")),
            ("X".to_string(), Variable::indexed(["1", "2"]).exported()),
        ]
        .into_iter()
        .collect();
        let json = serde_json::to_string(&snap).unwrap();
        assert_eq!(
            json,
            r#"{"X":{"exported":true,"value":["1","2"]},"a":{"exported":false,"value":"x"}}"#
        );
    }
}
