//! # parsim-types::ser
//!
//! The checkpoint serialization framework. A [`Serializer`] runs in one of
//! four modes (`Sizer`, `Pack`, `Unpack`, `Map`) and every checkpointable
//! type implements [`Persist`] once; the mode decides whether the call
//! computes a byte size, writes bytes, reads bytes, or installs entries
//! into an [`ObjectMap`] introspection tree.
//!
//! Byte order is little-endian throughout. Shared values behind `Arc` can
//! opt into tag tracking: the first reference is written in full, later
//! references as a tag, and unpacking reconstructs the sharing from a
//! tag table.

mod impls;
mod objectmap;

pub use objectmap::ObjectMap;

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// The operating mode of a [`Serializer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerMode {
    Sizer,
    Pack,
    Unpack,
    Map,
}

/// A type that can be checkpointed through the four-mode serializer.
///
/// One routine serves all modes. Implementations list their fields through
/// [`Serializer::named`] (usually via the [`persist_fields!`] macro) so the
/// same ordering drives sizing, packing, unpacking, and mapping.
pub trait Persist {
    fn persist(&mut self, ser: &mut Serializer);
}

enum State {
    Sizer {
        size: usize,
    },
    Pack {
        buf: Vec<u8>,
    },
    Unpack {
        buf: Vec<u8>,
        cursor: usize,
    },
    Map {
        stack: Vec<MapFrame>,
        root: Vec<(String, ObjectMap)>,
    },
}

struct MapFrame {
    name: String,
    fields: Vec<(String, ObjectMap)>,
    leaf: Option<ObjectMap>,
}

/// The four-mode serializer. See the module docs.
pub struct Serializer {
    state: State,
    /// Pack/Sizer side of shared-pointer tracking: identity -> tag.
    shared_tags: HashMap<usize, u32>,
    /// Unpack side: tag -> reconstructed Arc (type-erased).
    shared_objs: HashMap<u32, Box<dyn Any>>,
    next_tag: u32,
    truncated: bool,
}

impl Serializer {
    fn with_state(state: State) -> Self {
        Self {
            state,
            shared_tags: HashMap::new(),
            shared_objs: HashMap::new(),
            next_tag: 1,
            truncated: false,
        }
    }

    pub fn sizer() -> Self {
        Self::with_state(State::Sizer { size: 0 })
    }

    pub fn packer(capacity: usize) -> Self {
        Self::with_state(State::Pack {
            buf: Vec::with_capacity(capacity),
        })
    }

    pub fn unpacker(buf: Vec<u8>) -> Self {
        Self::with_state(State::Unpack { buf, cursor: 0 })
    }

    pub fn mapper() -> Self {
        Self::with_state(State::Map {
            stack: Vec::new(),
            root: Vec::new(),
        })
    }

    pub fn mode(&self) -> SerMode {
        match self.state {
            State::Sizer { .. } => SerMode::Sizer,
            State::Pack { .. } => SerMode::Pack,
            State::Unpack { .. } => SerMode::Unpack,
            State::Map { .. } => SerMode::Map,
        }
    }

    /// The byte count accumulated so far (Sizer mode).
    pub fn size(&self) -> usize {
        match &self.state {
            State::Sizer { size } => *size,
            _ => 0,
        }
    }

    /// Consumes the serializer and returns the packed buffer (Pack mode).
    pub fn into_buffer(self) -> Vec<u8> {
        match self.state {
            State::Pack { buf } => buf,
            _ => Vec::new(),
        }
    }

    /// True if an unpack ran past the end of the buffer. Reads past the
    /// end yield zeros so a `Persist` routine never has to handle errors
    /// inline; the caller checks this flag once at the end.
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// Remaining unread bytes (Unpack mode).
    pub fn remaining(&self) -> usize {
        match &self.state {
            State::Unpack { buf, cursor } => buf.len().saturating_sub(*cursor),
            _ => 0,
        }
    }

    // -- raw byte plumbing -------------------------------------------------

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        match &mut self.state {
            State::Sizer { size } => *size += bytes.len(),
            State::Pack { buf } => buf.extend_from_slice(bytes),
            _ => {}
        }
    }

    pub fn get_bytes(&mut self, out: &mut [u8]) {
        if let State::Unpack { buf, cursor } = &mut self.state {
            let end = *cursor + out.len();
            if end <= buf.len() {
                out.copy_from_slice(&buf[*cursor..end]);
                *cursor = end;
            } else {
                out.fill(0);
                *cursor = buf.len();
                self.truncated = true;
            }
        }
    }

    // -- map mode ----------------------------------------------------------

    /// Serializes a named value. In Map mode the name becomes a field in
    /// the introspection tree; in the other modes it is ignored.
    pub fn named<T: Persist + ?Sized>(&mut self, name: &str, value: &mut T) {
        if self.mode() != SerMode::Map {
            value.persist(self);
            return;
        }
        self.map_open(name);
        value.persist(self);
        self.map_close();
    }

    fn map_open(&mut self, name: &str) {
        // Field names come from `persist_fields!`, which stringifies
        // expressions like `self.foo`; strip the receiver for display.
        let clean = name
            .trim_start_matches("self .")
            .trim_start_matches("self.")
            .trim()
            .to_string();
        if let State::Map { stack, .. } = &mut self.state {
            stack.push(MapFrame {
                name: clean,
                fields: Vec::new(),
                leaf: None,
            });
        }
    }

    fn map_close(&mut self) {
        if let State::Map { stack, root } = &mut self.state {
            let frame = match stack.pop() {
                Some(f) => f,
                None => return,
            };
            let node = match frame.leaf {
                Some(leaf) if frame.fields.is_empty() => leaf,
                _ => ObjectMap::Object {
                    fields: frame.fields,
                },
            };
            match stack.last_mut() {
                Some(parent) => parent.fields.push((frame.name, node)),
                None => root.push((frame.name, node)),
            }
        }
    }

    /// Records a scalar leaf for the innermost open field (Map mode).
    pub fn map_leaf(&mut self, type_name: &'static str, value: String) {
        if let State::Map { stack, root } = &mut self.state {
            let leaf = ObjectMap::Scalar { type_name, value };
            match stack.last_mut() {
                Some(frame) => frame.leaf = Some(leaf),
                // A bare scalar mapped with no enclosing field.
                None => root.push(("<value>".to_string(), leaf)),
            }
        }
    }

    /// Consumes the serializer and returns the finished tree (Map mode).
    pub fn into_object_map(self) -> ObjectMap {
        match self.state {
            State::Map { root, .. } => ObjectMap::Object { fields: root },
            _ => ObjectMap::Object { fields: Vec::new() },
        }
    }

    // -- shared pointer tracking -------------------------------------------

    /// Serializes an `Arc`, preserving sharing across the blob. The first
    /// time an identity is seen its contents are written in full; later
    /// references write only the tag. Unpacking rebuilds the same sharing
    /// from the tag table.
    pub fn shared<T>(&mut self, value: &mut Arc<T>)
    where
        T: Persist + Clone + Default + Send + Sync + 'static,
    {
        match self.mode() {
            SerMode::Sizer | SerMode::Pack => {
                let identity = Arc::as_ptr(value) as usize;
                if let Some(mut tag) = self.shared_tags.get(&identity).copied() {
                    let mut marker = 1u8; // reference-only
                    tag.persist(self);
                    marker.persist(self);
                } else {
                    let mut tag = self.next_tag;
                    self.next_tag += 1;
                    self.shared_tags.insert(identity, tag);
                    let mut marker = 0u8; // full contents follow
                    tag.persist(self);
                    marker.persist(self);
                    let mut contents = (**value).clone();
                    contents.persist(self);
                }
            }
            SerMode::Unpack => {
                let mut tag = 0u32;
                let mut marker = 0u8;
                tag.persist(&mut *self);
                marker.persist(&mut *self);
                if marker == 0 {
                    let mut contents = T::default();
                    contents.persist(self);
                    let arc = Arc::new(contents);
                    self.shared_objs
                        .insert(tag, Box::new(arc.clone()) as Box<dyn Any>);
                    *value = arc;
                } else if let Some(obj) = self.shared_objs.get(&tag) {
                    if let Some(arc) = obj.downcast_ref::<Arc<T>>() {
                        *value = arc.clone();
                    } else {
                        self.truncated = true;
                    }
                } else {
                    self.truncated = true;
                }
            }
            SerMode::Map => {
                let mut contents = (**value).clone();
                contents.persist(self);
            }
        }
    }
}

/// Lists struct fields for [`Persist`] implementations, capturing each
/// field's name for Map mode:
///
/// ```ignore
/// fn persist(&mut self, ser: &mut Serializer) {
///     persist_fields!(ser, self.cycle, self.period, self.scheduled);
/// }
/// ```
#[macro_export]
macro_rules! persist_fields {
    ($ser:expr, $($field:expr),+ $(,)?) => {
        $( $ser.named(stringify!($field), &mut $field); )+
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default, Clone, PartialEq, Debug)]
    struct Demo {
        a: u64,
        b: String,
        c: Vec<u32>,
    }

    impl Persist for Demo {
        fn persist(&mut self, ser: &mut Serializer) {
            persist_fields!(ser, self.a, self.b, self.c);
        }
    }

    #[test]
    fn sizer_matches_pack() {
        let mut d = Demo {
            a: 7,
            b: "hello".into(),
            c: vec![1, 2, 3],
        };
        let mut sizer = Serializer::sizer();
        d.persist(&mut sizer);
        let mut packer = Serializer::packer(sizer.size());
        d.persist(&mut packer);
        assert_eq!(sizer.size(), packer.into_buffer().len());
    }

    #[test]
    fn pack_unpack_round_trip() {
        let mut d = Demo {
            a: 42,
            b: "vortex".into(),
            c: vec![9, 8],
        };
        let mut packer = Serializer::packer(64);
        d.persist(&mut packer);

        let mut out = Demo::default();
        let mut unpacker = Serializer::unpacker(packer.into_buffer());
        out.persist(&mut unpacker);
        assert!(!unpacker.truncated());
        assert_eq!(out, d);
    }

    #[test]
    fn truncated_unpack_is_flagged() {
        let mut out = Demo::default();
        let mut unpacker = Serializer::unpacker(vec![1, 2, 3]);
        out.persist(&mut unpacker);
        assert!(unpacker.truncated());
    }

    #[test]
    fn map_mode_builds_tree() {
        let mut d = Demo {
            a: 1,
            b: "x".into(),
            c: vec![5],
        };
        let mut mapper = Serializer::mapper();
        mapper.named("demo", &mut d);
        let map = mapper.into_object_map();
        let a = map.find("demo.a").unwrap();
        assert_eq!(a.value(), Some("1".to_string()));
        let item = map.find("demo.c.[0]").unwrap();
        assert_eq!(item.value(), Some("5".to_string()));
    }

    #[test]
    fn shared_arcs_keep_identity() {
        let mut one = Arc::new(Demo {
            a: 3,
            ..Demo::default()
        });
        let mut two = one.clone();

        let mut packer = Serializer::packer(64);
        packer.shared(&mut one);
        packer.shared(&mut two);
        let buf = packer.into_buffer();

        let mut u_one: Arc<Demo> = Arc::new(Demo::default());
        let mut u_two: Arc<Demo> = Arc::new(Demo::default());
        let mut unpacker = Serializer::unpacker(buf);
        unpacker.shared(&mut u_one);
        unpacker.shared(&mut u_two);
        assert!(!unpacker.truncated());
        assert_eq!(u_one.a, 3);
        assert!(Arc::ptr_eq(&u_one, &u_two));
    }
}
