//! # parsim-model::params
//!
//! Component construction parameters. Keys are interned in a process-wide
//! table so a large graph with many identical parameter names stores each
//! name once; the interning table is checkpointed with the globals so key
//! ids remain stable across a restart.

use parsim_types::ser::{Persist, SerMode, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::{Mutex, OnceLock};

struct Intern {
    names: Vec<String>,
    ids: HashMap<String, u32>,
}

fn intern() -> &'static Mutex<Intern> {
    static TABLE: OnceLock<Mutex<Intern>> = OnceLock::new();
    TABLE.get_or_init(|| {
        Mutex::new(Intern {
            names: Vec::new(),
            ids: HashMap::new(),
        })
    })
}

fn intern_key(key: &str) -> u32 {
    let mut table = intern().lock().expect("params intern table poisoned");
    if let Some(id) = table.ids.get(key) {
        return *id;
    }
    let id = table.names.len() as u32;
    table.names.push(key.to_string());
    table.ids.insert(key.to_string(), id);
    id
}

fn key_name(id: u32) -> Option<String> {
    let table = intern().lock().expect("params intern table poisoned");
    table.names.get(id as usize).cloned()
}

/// Snapshot of the interning table, for the checkpoint globals blob.
pub fn key_table_snapshot() -> Vec<String> {
    let table = intern().lock().expect("params intern table poisoned");
    table.names.clone()
}

/// Re-seeds the interning table from a checkpoint. Existing entries keep
/// their ids; restored names are merged in.
pub fn restore_key_table(names: Vec<String>) {
    for name in names {
        intern_key(&name);
    }
}

/// An ordered map of construction parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    data: BTreeMap<u32, String>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.data.insert(intern_key(key), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        let id = {
            let table = intern().lock().expect("params intern table poisoned");
            table.ids.get(key).copied()
        };
        id.and_then(|id| self.data.get(&id)).map(String::as_str)
    }

    /// Finds and parses a parameter, falling back to `default` when the
    /// key is absent or unparseable.
    pub fn find<T: FromStr>(&self, key: &str, default: T) -> T {
        match self.get(key).map(str::parse) {
            Some(Ok(v)) => v,
            _ => default,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Iterates `(key, value)` pairs with resolved key names.
    pub fn iter(&self) -> impl Iterator<Item = (String, &str)> + '_ {
        self.data
            .iter()
            .filter_map(|(id, v)| key_name(*id).map(|k| (k, v.as_str())))
    }
}

impl FromIterator<(String, String)> for Params {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (k, v) in iter {
            params.insert(&k, v);
        }
        params
    }
}

impl Persist for Params {
    fn persist(&mut self, ser: &mut Serializer) {
        // Serialized with resolved names so a blob does not depend on the
        // interning table's id assignment at pack time.
        let mut staged: Vec<(String, String)> = self
            .iter()
            .map(|(k, v)| (k, v.to_string()))
            .collect();
        staged.persist(ser);
        if ser.mode() == SerMode::Unpack {
            *self = staged.into_iter().collect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_find() {
        let mut p = Params::new();
        p.insert("frequency", "1GHz");
        p.insert("count", "42");
        assert_eq!(p.get("frequency"), Some("1GHz"));
        assert_eq!(p.find("count", 0u64), 42);
        assert_eq!(p.find("missing", 7u64), 7);
        assert_eq!(p.find("frequency", 0u64), 0); // unparseable as u64
    }

    #[test]
    fn interning_shares_keys() {
        let mut a = Params::new();
        let mut b = Params::new();
        a.insert("shared_key_name", "1");
        b.insert("shared_key_name", "2");
        let table = key_table_snapshot();
        assert_eq!(
            table.iter().filter(|k| *k == "shared_key_name").count(),
            1
        );
    }

    #[test]
    fn persist_round_trip() {
        let mut p = Params::new();
        p.insert("alpha", "a");
        p.insert("beta", "b");
        let mut packer = Serializer::packer(64);
        p.persist(&mut packer);
        let mut out = Params::new();
        let mut unpacker = Serializer::unpacker(packer.into_buffer());
        out.persist(&mut unpacker);
        assert_eq!(out.get("alpha"), Some("a"));
        assert_eq!(out.get("beta"), Some("b"));
    }
}
