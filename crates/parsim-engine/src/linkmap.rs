//! # parsim-engine::linkmap
//!
//! Per-component mapping from port name to Link, plus the port-name
//! matching rule used for shared-port resolution and profiling attach
//! points: literal names, `%d` wildcards (one or more digits), and the
//! catch-all `*`.

use parsim_types::errors::SimError;
use parsim_types::ids::LinkId;
use parsim_types::persist_fields;
use parsim_types::ser::{Persist, Serializer};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct LinkMap {
    ports: BTreeMap<String, LinkId>,
}

impl LinkMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, port: &str, link: LinkId) -> Result<(), SimError> {
        if self.ports.contains_key(port) {
            return Err(SimError::WireUp(format!(
                "port '{port}' is already connected"
            )));
        }
        self.ports.insert(port.to_string(), link);
        Ok(())
    }

    pub fn get(&self, port: &str) -> Option<LinkId> {
        self.ports.get(port).copied()
    }

    pub fn remove(&mut self, port: &str) -> Option<LinkId> {
        self.ports.remove(port)
    }

    pub fn contains(&self, port: &str) -> bool {
        self.ports.contains_key(port)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, LinkId)> + '_ {
        self.ports.iter().map(|(name, link)| (name.as_str(), *link))
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// First port whose name matches the pattern.
    pub fn find_match(&self, pattern: &str) -> Option<(&str, LinkId)> {
        self.ports
            .iter()
            .find(|(name, _)| port_matches(pattern, name))
            .map(|(name, link)| (name.as_str(), *link))
    }
}

impl Persist for LinkMap {
    fn persist(&mut self, ser: &mut Serializer) {
        persist_fields!(ser, self.ports);
    }
}

/// Matches a port name against a pattern of the form `prefix%d...suffix`
/// (each `%d` consumes one or more digits) or the catch-all `*`.
pub fn port_matches(pattern: &str, name: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    matches_at(pattern.as_bytes(), name.as_bytes())
}

fn matches_at(pattern: &[u8], name: &[u8]) -> bool {
    match pattern {
        [] => name.is_empty(),
        [b'%', b'd', rest @ ..] => {
            // Consume one or more digits, trying every split so a suffix
            // beginning with a digit still matches.
            let digits = name.iter().take_while(|c| c.is_ascii_digit()).count();
            (1..=digits).any(|n| matches_at(rest, &name[n..]))
        }
        [c, rest @ ..] => name.first() == Some(c) && matches_at(rest, &name[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_rejects_duplicates() {
        let mut map = LinkMap::new();
        map.insert("north", 0).unwrap();
        assert!(matches!(map.insert("north", 1), Err(SimError::WireUp(_))));
        assert_eq!(map.get("north"), Some(0));
    }

    #[test]
    fn wildcard_matching() {
        assert!(port_matches("*", "anything"));
        assert!(port_matches("port%d", "port0"));
        assert!(port_matches("port%d", "port17"));
        assert!(!port_matches("port%d", "port"));
        assert!(!port_matches("port%d", "portx"));
        assert!(port_matches("lane%d_rx", "lane3_rx"));
        assert!(!port_matches("lane%d_rx", "lane3_tx"));
        assert!(port_matches("p%d.%d", "p1.2"));
        assert!(port_matches("exact", "exact"));
        assert!(!port_matches("exact", "exactly"));
    }

    #[test]
    fn find_match_scans_ports() {
        let mut map = LinkMap::new();
        map.insert("cmd", 0).unwrap();
        map.insert("data7", 1).unwrap();
        assert_eq!(map.find_match("data%d").map(|(_, l)| l), Some(1));
        assert!(map.find_match("ctrl%d").is_none());
    }
}
