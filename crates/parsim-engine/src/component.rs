//! # parsim-engine::component
//!
//! The component tree. A `ComponentInfo` records everything the core
//! knows about one component: identity, position in the tree, its link
//! map, parameters, and exit-protocol state. The instance itself lives
//! beside the info in a slot so dispatch can temporarily take it out
//! while handing the component a mutable view of the engine.

use crate::linkmap::LinkMap;
use parsim_model::api::Component;
use parsim_model::params::Params;
use parsim_types::ids::{subcomponent_id, ComponentId, RankInfo};
use parsim_types::persist_fields;
use parsim_types::ser::{Persist, Serializer};
use parsim_types::time::CoreTime;

#[derive(Debug, Clone, Default)]
pub struct ComponentInfo {
    pub id: ComponentId,
    pub name: String,
    pub type_name: String,
    pub parent: Option<ComponentId>,
    /// Child subcomponents, kept sorted by id.
    pub children: Vec<ComponentId>,
    pub link_map: LinkMap,
    pub params: Params,
    /// Factor of this component's default time base.
    pub default_tb: CoreTime,
    pub coords: [f64; 3],
    /// Subcomponents resolve unconnected ports against the parent.
    pub share_ports: bool,
    pub share_stats: bool,
    pub rank: RankInfo,
    /// Exit-protocol state.
    pub primary: bool,
    pub keep_alive: bool,
    /// Highest subcomponent index handed out under this component.
    pub next_subcomponent: u16,
}

impl ComponentInfo {
    pub fn new(id: ComponentId, name: &str, type_name: &str, rank: RankInfo) -> Self {
        Self {
            id,
            name: name.to_string(),
            type_name: type_name.to_string(),
            rank,
            ..Self::default()
        }
    }

    /// Reserves the next subcomponent id under this component.
    pub fn allocate_subcomponent_id(&mut self) -> ComponentId {
        self.next_subcomponent += 1;
        subcomponent_id(self.id, self.next_subcomponent)
    }

    pub fn add_child(&mut self, child: ComponentId) {
        match self.children.binary_search(&child) {
            Ok(_) => {}
            Err(pos) => self.children.insert(pos, child),
        }
    }

    pub fn remove_child(&mut self, child: ComponentId) {
        if let Ok(pos) = self.children.binary_search(&child) {
            self.children.remove(pos);
        }
    }
}

impl Persist for ComponentInfo {
    fn persist(&mut self, ser: &mut Serializer) {
        persist_fields!(
            ser,
            self.id,
            self.name,
            self.type_name,
            self.parent,
            self.children,
            self.link_map,
            self.params,
            self.default_tb,
            self.coords,
            self.share_ports,
            self.share_stats,
            self.rank,
            self.primary,
            self.keep_alive,
            self.next_subcomponent
        );
    }
}

/// Info plus the (optionally taken-out) instance.
pub struct ComponentSlot {
    pub info: ComponentInfo,
    pub instance: Option<Box<dyn Component>>,
}

impl ComponentSlot {
    pub fn new(info: ComponentInfo) -> Self {
        Self {
            info,
            instance: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parsim_types::ids::{component_num, subcomponent_index};

    #[test]
    fn subcomponent_ids_nest_under_parent() {
        let mut info = ComponentInfo::new(5, "cpu", "demo.Core", RankInfo::new(0, 0));
        let a = info.allocate_subcomponent_id();
        let b = info.allocate_subcomponent_id();
        assert_eq!(component_num(a), 5);
        assert_eq!(subcomponent_index(a), 1);
        assert_eq!(subcomponent_index(b), 2);
    }

    #[test]
    fn children_stay_sorted() {
        let mut info = ComponentInfo::new(1, "x", "demo.X", RankInfo::new(0, 0));
        info.add_child(30);
        info.add_child(10);
        info.add_child(20);
        info.add_child(10);
        assert_eq!(info.children, vec![10, 20, 30]);
        info.remove_child(20);
        assert_eq!(info.children, vec![10, 30]);
    }
}
