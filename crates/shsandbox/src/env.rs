//! Environment store for a single run
//!
//! Variables bound by the script live in [`Environment`] as typed
//! [`Variable`]s. The process environment handed in by the caller is kept
//! separately: it can be read and exported to children, but it is not part
//! of the snapshot unless the script assigns to it.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::error::{Error, Result};
use crate::limits::{DEFAULT_MAX_ARRAY_LENGTH, LimitExceeded};
use crate::snapshot::Snapshot;

/// A shell variable: its value plus the export attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Variable {
    pub exported: bool,
    pub value: VarValue,
}

impl Variable {
    pub fn scalar(value: impl Into<String>) -> Self {
        Self {
            exported: false,
            value: VarValue::Scalar(value.into()),
        }
    }

    pub fn indexed<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            exported: false,
            value: VarValue::Indexed(values.into_iter().map(Into::into).collect()),
        }
    }

    pub fn associative<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            exported: false,
            value: VarValue::Associative(
                pairs
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    /// Mark the variable as exported.
    pub fn exported(mut self) -> Self {
        self.exported = true;
        self
    }

    /// The scalar view: the value itself, element 0, or key `"0"`.
    pub fn as_scalar(&self) -> &str {
        match &self.value {
            VarValue::Scalar(s) => s,
            VarValue::Indexed(items) => items.first().map(String::as_str).unwrap_or(""),
            VarValue::Associative(map) => map.get("0").map(String::as_str).unwrap_or(""),
        }
    }
}

/// The typed value of a variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum VarValue {
    Scalar(String),
    Indexed(Vec<String>),
    Associative(BTreeMap<String, String>),
}

/// Value kind requested by `declare -a` / `declare -A`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Scalar,
    Indexed,
    Associative,
}

/// Which element [`Environment::unset_element`] removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementRef<'a> {
    Index(i64),
    Key(&'a str),
}

/// Variable store shared by the engine and the arithmetic evaluator.
#[derive(Debug, Clone)]
pub struct Environment {
    vars: HashMap<String, Variable>,
    /// Process environment visible to lookups and children, never snapshotted
    inherited: HashMap<String, String>,
    last_status: i32,
    max_array_length: usize,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            vars: HashMap::new(),
            inherited: HashMap::new(),
            last_status: 0,
            max_array_length: DEFAULT_MAX_ARRAY_LENGTH,
        }
    }
}

impl Environment {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that can read (and export) the given process environment.
    pub fn with_inherited<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            inherited: vars
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            ..Self::default()
        }
    }

    /// Cap on indexed array growth; subscripts at or past it are rejected.
    pub fn set_max_array_length(&mut self, len: usize) {
        self.max_array_length = len;
    }

    /// Look up a name, `None` when it is not set anywhere.
    ///
    /// Special parameters resolve too: `?` is the last exit status, `#` is
    /// always `0` since runs have no positional parameters.
    pub fn lookup(&self, name: &str) -> Option<String> {
        match name {
            "?" => return Some(self.last_status.to_string()),
            "#" => return Some("0".to_string()),
            _ => {}
        }
        if let Some(var) = self.vars.get(name) {
            return Some(var.as_scalar().to_string());
        }
        self.inherited.get(name).cloned()
    }

    /// Scalar value of `name`; unset names read as the empty string.
    pub fn get(&self, name: &str) -> String {
        self.lookup(name).unwrap_or_default()
    }

    /// The bound variable, if the script has bound `name`.
    pub fn get_var(&self, name: &str) -> Option<&Variable> {
        self.vars.get(name)
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.vars.contains_key(name) || self.inherited.contains_key(name)
    }

    pub fn is_associative(&self, name: &str) -> bool {
        matches!(
            self.vars.get(name),
            Some(Variable {
                value: VarValue::Associative(_),
                ..
            })
        )
    }

    fn entry(&mut self, name: &str) -> &mut Variable {
        let inherited = self.inherited.contains_key(name);
        let initial = self.inherited.get(name).cloned().unwrap_or_default();
        self.vars
            .entry(name.to_string())
            .or_insert_with(|| Variable {
                exported: inherited,
                value: VarValue::Scalar(initial),
            })
    }

    /// Assign through the scalar view: arrays get element 0 (or key `"0"`).
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        let var = self.entry(name);
        match &mut var.value {
            VarValue::Scalar(s) => *s = value,
            VarValue::Indexed(items) => match items.first_mut() {
                Some(first) => *first = value,
                None => items.push(value),
            },
            VarValue::Associative(map) => {
                map.insert("0".to_string(), value);
            }
        }
    }

    /// `name+=value` on the scalar view.
    pub fn append(&mut self, name: &str, suffix: &str) {
        let mut current = self.get(name);
        current.push_str(suffix);
        self.set(name, current);
    }

    /// Replace a variable wholesale, keeping its export attribute.
    pub fn set_var(&mut self, name: &str, mut var: Variable) {
        if let Some(old) = self.vars.get(name) {
            var.exported |= old.exported;
        } else if self.inherited.contains_key(name) {
            var.exported = true;
        }
        self.vars.insert(name.to_string(), var);
    }

    /// Replace the value of `name`, keeping its export attribute.
    pub fn set_value(&mut self, name: &str, value: VarValue) {
        self.entry(name).value = value;
    }

    /// Remove `name` from the store and hide any inherited value.
    pub fn unset(&mut self, name: &str) -> bool {
        let bound = self.vars.remove(name).is_some();
        let inherited = self.inherited.remove(name).is_some();
        bound || inherited
    }

    /// Remove one element: a key of an associative array, or an index of an
    /// indexed array. Indexed elements are emptied rather than removed so
    /// later indices keep their positions; a trailing element is dropped.
    pub fn unset_element(&mut self, name: &str, subscript: ElementRef<'_>) {
        let Some(var) = self.vars.get_mut(name) else {
            return;
        };
        let mut drop_scalar = false;
        match (&mut var.value, subscript) {
            (VarValue::Associative(map), ElementRef::Key(key)) => {
                map.remove(key);
            }
            (VarValue::Indexed(items), ElementRef::Index(index)) => {
                if let Some(slot) = resolve_index(items.len(), index) {
                    if slot + 1 == items.len() {
                        items.pop();
                    } else if let Some(item) = items.get_mut(slot) {
                        item.clear();
                    }
                }
            }
            (VarValue::Scalar(_), ElementRef::Index(0 | -1)) => drop_scalar = true,
            _ => {}
        }
        if drop_scalar {
            self.vars.remove(name);
        }
    }

    /// Put back a binding captured with [`Environment::get_var`], or drop the
    /// binding when there was none. Inherited values are left alone.
    pub(crate) fn restore(&mut self, name: &str, saved: Option<Variable>) {
        match saved {
            Some(var) => {
                self.vars.insert(name.to_string(), var);
            }
            None => {
                self.vars.remove(name);
            }
        }
    }

    /// Bind `name` if needed and convert it to `kind`.
    ///
    /// A scalar converted to an array becomes its element 0 (key `"0"`).
    pub fn declare(&mut self, name: &str, kind: ValueKind) {
        let var = self.entry(name);
        var.value = match (std::mem::replace(&mut var.value, VarValue::Indexed(Vec::new())), kind) {
            (VarValue::Scalar(s), ValueKind::Indexed) => {
                VarValue::Indexed(if s.is_empty() { Vec::new() } else { vec![s] })
            }
            (VarValue::Scalar(s), ValueKind::Associative) => {
                let mut map = BTreeMap::new();
                if !s.is_empty() {
                    map.insert("0".to_string(), s);
                }
                VarValue::Associative(map)
            }
            (VarValue::Indexed(items), ValueKind::Associative) => VarValue::Associative(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| (i.to_string(), v))
                    .collect(),
            ),
            (value, _) => value,
        };
    }

    pub fn set_exported(&mut self, name: &str, exported: bool) {
        self.entry(name).exported = exported;
    }

    /// Element `index` of an indexed array; negative indices count from the end.
    pub fn index(&self, name: &str, index: i64) -> Option<String> {
        match self.vars.get(name).map(|v| &v.value) {
            Some(VarValue::Indexed(items)) => {
                resolve_index(items.len(), index).and_then(|i| items.get(i).cloned())
            }
            Some(VarValue::Associative(map)) => map.get(&index.to_string()).cloned(),
            Some(VarValue::Scalar(s)) if index == 0 || index == -1 => Some(s.clone()),
            Some(VarValue::Scalar(_)) => None,
            None if index == 0 => self.inherited.get(name).cloned(),
            None => None,
        }
    }

    /// Value stored under `key` in an associative array.
    pub fn key(&self, name: &str, key: &str) -> Option<String> {
        match self.vars.get(name).map(|v| &v.value) {
            Some(VarValue::Associative(map)) => map.get(key).cloned(),
            _ => None,
        }
    }

    /// `name[index]=value` for indexed arrays. Gaps are filled with empty
    /// strings so element order stays dense.
    pub fn set_index(&mut self, name: &str, index: i64, value: impl Into<String>) -> Result<()> {
        let value = value.into();
        if self.is_associative(name) {
            self.set_key(name, &index.to_string(), value);
            return Ok(());
        }
        self.declare(name, ValueKind::Indexed);
        let max = self.max_array_length;
        let var = self.entry(name);
        if let VarValue::Indexed(items) = &mut var.value {
            let slot = resolve_index(items.len(), index)
                .ok_or_else(|| Error::Execution(format!("{}[{}]: bad array subscript", name, index)))?;
            store_at(items, slot, value, max)?;
        }
        Ok(())
    }

    /// `name[key]=value` for associative arrays.
    pub fn set_key(&mut self, name: &str, key: &str, value: impl Into<String>) {
        self.declare(name, ValueKind::Associative);
        if let VarValue::Associative(map) = &mut self.entry(name).value {
            map.insert(key.to_string(), value.into());
        }
    }

    /// Every element: arrays in order, a scalar as one element.
    pub fn values(&self, name: &str) -> Vec<String> {
        match self.vars.get(name).map(|v| &v.value) {
            Some(VarValue::Indexed(items)) => items.clone(),
            Some(VarValue::Associative(map)) => map.values().cloned().collect(),
            Some(VarValue::Scalar(s)) => vec![s.clone()],
            None => self.inherited.get(name).cloned().into_iter().collect(),
        }
    }

    /// `${#name}`: element count for arrays, character count for scalars.
    pub fn length(&self, name: &str) -> usize {
        match self.vars.get(name).map(|v| &v.value) {
            Some(VarValue::Indexed(items)) => items.len(),
            Some(VarValue::Associative(map)) => map.len(),
            _ => self.get(name).chars().count(),
        }
    }

    /// Name/value pairs a child process receives.
    pub fn exported(&self) -> Vec<(String, String)> {
        let mut out: BTreeMap<String, String> = self
            .inherited
            .iter()
            .filter(|(name, _)| !self.vars.contains_key(*name))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (name, var) in &self.vars {
            if var.exported {
                out.insert(name.clone(), var.as_scalar().to_string());
            }
        }
        out.into_iter().collect()
    }

    pub fn last_status(&self) -> i32 {
        self.last_status
    }

    pub fn set_last_status(&mut self, status: i32) {
        self.last_status = status;
    }

    /// Structural copy of every variable the script has bound.
    pub fn snapshot(&self) -> Snapshot {
        self.vars
            .iter()
            .map(|(name, var)| (name.clone(), var.clone()))
            .collect()
    }
}

/// Map a possibly negative index onto `0..`, `None` when it falls before 0.
fn resolve_index(len: usize, index: i64) -> Option<usize> {
    if index >= 0 {
        usize::try_from(index).ok()
    } else {
        let back = usize::try_from(index.unsigned_abs()).ok()?;
        len.checked_sub(back)
    }
}

/// `items[slot] = value`, padding any gap with empty strings. Slots at or
/// past `max` are refused before anything is allocated.
pub(crate) fn store_at(items: &mut Vec<String>, slot: usize, value: String, max: usize) -> Result<()> {
    if slot >= max {
        return Err(LimitExceeded::MaxArrayLength(max).into());
    }
    if slot >= items.len() {
        items.resize(slot + 1, String::new());
    }
    items[slot] = value;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_reads_empty() {
        let env = Environment::new();
        assert_eq!(env.get("nope"), "");
        assert_eq!(env.lookup("nope"), None);
    }

    #[test]
    fn test_inherited_is_lookup_only() {
        let mut env = Environment::with_inherited([("HOME", "/home/u")]);
        assert_eq!(env.get("HOME"), "/home/u");
        assert!(env.snapshot().is_empty());

        env.set("HOME", "/tmp");
        let var = env.get_var("HOME").unwrap();
        assert!(var.exported, "assigning an inherited name keeps it exported");
        assert_eq!(env.snapshot().len(), 1);
    }

    #[test]
    fn test_unset_hides_inherited() {
        let mut env = Environment::with_inherited([("PATH", "/bin")]);
        assert!(env.unset("PATH"));
        assert_eq!(env.lookup("PATH"), None);
        assert!(env.exported().is_empty());
    }

    #[test]
    fn test_scalar_set_on_array_hits_element_zero() {
        let mut env = Environment::new();
        env.set_var("a", Variable::indexed(["x", "y"]));
        env.set("a", "z");
        assert_eq!(env.values("a"), vec!["z", "y"]);
        assert_eq!(env.get("a"), "z");
    }

    #[test]
    fn test_set_index_pads_and_counts_from_end() {
        let mut env = Environment::new();
        env.set_index("a", 2, "c").unwrap();
        assert_eq!(env.values("a"), vec!["", "", "c"]);
        env.set_index("a", -1, "last").unwrap();
        assert_eq!(env.index("a", 2).as_deref(), Some("last"));
        assert!(env.set_index("a", -10, "x").is_err());
    }

    #[test]
    fn test_set_index_refuses_growth_past_cap() {
        let mut env = Environment::new();
        env.set_max_array_length(10);
        env.set_index("a", 9, "last").unwrap();
        assert_eq!(env.length("a"), 10);

        let err = env.set_index("a", 10, "x").unwrap_err();
        assert!(matches!(
            err,
            Error::ResourceLimit(LimitExceeded::MaxArrayLength(10))
        ));
        assert!(env.set_index("a", i64::MAX, "x").is_err());
        assert_eq!(env.length("a"), 10);
    }

    #[test]
    fn test_associative_keys() {
        let mut env = Environment::new();
        env.declare("m", ValueKind::Associative);
        env.set_key("m", "k", "v");
        env.set_key("m", "k", "w");
        assert!(env.is_associative("m"));
        assert_eq!(env.key("m", "k").as_deref(), Some("w"));
        assert_eq!(env.length("m"), 1);
    }

    #[test]
    fn test_declare_converts_scalar() {
        let mut env = Environment::new();
        env.set("s", "one");
        env.declare("s", ValueKind::Indexed);
        assert_eq!(env.get_var("s").unwrap().value, VarValue::Indexed(vec!["one".into()]));
    }

    #[test]
    fn test_exported_overlays_bound_on_inherited() {
        let mut env = Environment::with_inherited([("A", "1"), ("B", "2")]);
        env.set("A", "override");
        env.set("local_only", "x");
        env.set("E", "e");
        env.set_exported("E", true);
        assert_eq!(
            env.exported(),
            vec![
                ("A".to_string(), "override".to_string()),
                ("B".to_string(), "2".to_string()),
                ("E".to_string(), "e".to_string()),
            ]
        );
    }

    #[test]
    fn test_special_parameters() {
        let mut env = Environment::new();
        env.set_last_status(3);
        assert_eq!(env.get("?"), "3");
        assert_eq!(env.get("#"), "0");
        assert!(env.snapshot().is_empty());
    }

    #[test]
    fn test_unset_element() {
        let mut env = Environment::new();
        env.set_var("a", Variable::indexed(["x", "y", "z"]));
        env.unset_element("a", ElementRef::Index(1));
        assert_eq!(env.values("a"), vec!["x", "", "z"]);
        env.unset_element("a", ElementRef::Index(-1));
        assert_eq!(env.values("a"), vec!["x", ""]);

        env.set_var("m", Variable::associative([("k", "v"), ("j", "w")]));
        env.unset_element("m", ElementRef::Key("k"));
        assert_eq!(env.key("m", "k"), None);
        assert_eq!(env.length("m"), 1);
    }

    #[test]
    fn test_restore_drops_temporary_binding() {
        let mut env = Environment::with_inherited([("HOME", "/home/u")]);
        let saved = env.get_var("HOME").cloned();
        env.set("HOME", "/tmp");
        env.restore("HOME", saved);
        assert_eq!(env.get("HOME"), "/home/u");
        assert!(env.snapshot().is_empty());
    }

    #[test]
    fn test_length() {
        let mut env = Environment::new();
        env.set("s", "héllo");
        assert_eq!(env.length("s"), 5);
        env.set_var("a", Variable::indexed(["1", "2", "3"]));
        assert_eq!(env.length("a"), 3);
    }
}
