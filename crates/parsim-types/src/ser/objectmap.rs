//! The object-map introspection tree built by Map-mode serialization.
//!
//! Every checkpointable object can be walked as a hierarchy of named
//! fields bottoming out in scalar leaves, without knowing its concrete
//! type. Interactive tooling uses this to browse live simulation state.

use std::fmt;

/// One node of the introspection tree.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectMap {
    /// A leaf value with its type name and display rendering.
    Scalar {
        type_name: &'static str,
        value: String,
    },
    /// An interior node: named fields in declaration order.
    Object { fields: Vec<(String, ObjectMap)> },
}

impl ObjectMap {
    /// Looks up a dot-separated path, e.g. `vortex.max_depth` or
    /// `components.[2].name`.
    pub fn find(&self, path: &str) -> Option<&ObjectMap> {
        let mut node = self;
        for part in path.split('.') {
            match node {
                ObjectMap::Object { fields } => {
                    node = fields.iter().find(|(name, _)| name == part).map(
                        |(_, child)| child,
                    )?;
                }
                ObjectMap::Scalar { .. } => return None,
            }
        }
        Some(node)
    }

    /// The scalar rendering, if this node is a leaf.
    pub fn value(&self) -> Option<String> {
        match self {
            ObjectMap::Scalar { value, .. } => Some(value.clone()),
            ObjectMap::Object { .. } => None,
        }
    }

    /// Names of the direct children of this node.
    pub fn field_names(&self) -> Vec<&str> {
        match self {
            ObjectMap::Object { fields } => fields.iter().map(|(n, _)| n.as_str()).collect(),
            ObjectMap::Scalar { .. } => Vec::new(),
        }
    }

    fn render(&self, f: &mut fmt::Formatter<'_>, name: &str, depth: usize) -> fmt::Result {
        let pad = "  ".repeat(depth);
        match self {
            ObjectMap::Scalar { type_name, value } => {
                writeln!(f, "{pad}{name} = {value} ({type_name})")
            }
            ObjectMap::Object { fields } => {
                writeln!(f, "{pad}{name}:")?;
                for (child_name, child) in fields {
                    child.render(f, child_name, depth + 1)?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for ObjectMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.render(f, "<root>", 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ObjectMap {
        ObjectMap::Object {
            fields: vec![
                (
                    "clock".to_string(),
                    ObjectMap::Object {
                        fields: vec![(
                            "cycle".to_string(),
                            ObjectMap::Scalar {
                                type_name: "u64",
                                value: "12".to_string(),
                            },
                        )],
                    },
                ),
                (
                    "name".to_string(),
                    ObjectMap::Scalar {
                        type_name: "String",
                        value: "cpu0".to_string(),
                    },
                ),
            ],
        }
    }

    #[test]
    fn path_lookup() {
        let map = sample();
        assert_eq!(map.find("clock.cycle").unwrap().value(), Some("12".into()));
        assert_eq!(map.find("name").unwrap().value(), Some("cpu0".into()));
        assert!(map.find("clock.period").is_none());
        assert!(map.find("name.cycle").is_none());
    }

    #[test]
    fn field_listing() {
        let map = sample();
        assert_eq!(map.field_names(), vec!["clock", "name"]);
    }
}
