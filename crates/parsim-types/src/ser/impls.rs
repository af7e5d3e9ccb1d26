//! `Persist` implementations for primitives and standard containers.
//!
//! Integers are little-endian fixed width; `usize` travels as `u64` so
//! blobs are portable across word sizes. Containers write a `u64` length
//! followed by their elements; unordered maps are packed in sorted key
//! order so packing is deterministic.

use super::{Persist, SerMode, Serializer};
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::hash::BuildHasher;

macro_rules! persist_int {
    ($($t:ty),*) => {
        $(
            impl Persist for $t {
                fn persist(&mut self, ser: &mut Serializer) {
                    match ser.mode() {
                        SerMode::Sizer | SerMode::Pack => {
                            ser.put_bytes(&self.to_le_bytes());
                        }
                        SerMode::Unpack => {
                            let mut raw = [0u8; std::mem::size_of::<$t>()];
                            ser.get_bytes(&mut raw);
                            *self = <$t>::from_le_bytes(raw);
                        }
                        SerMode::Map => {
                            ser.map_leaf(stringify!($t), self.to_string());
                        }
                    }
                }
            }
        )*
    };
}

persist_int!(u8, u16, u32, u64, u128, i8, i16, i32, i64, f64);

impl Persist for usize {
    fn persist(&mut self, ser: &mut Serializer) {
        let mut wide = *self as u64;
        wide.persist(ser);
        *self = wide as usize;
    }
}

impl Persist for bool {
    fn persist(&mut self, ser: &mut Serializer) {
        if ser.mode() == SerMode::Map {
            ser.map_leaf("bool", self.to_string());
            return;
        }
        let mut raw = *self as u8;
        raw.persist(ser);
        *self = raw != 0;
    }
}

impl Persist for String {
    fn persist(&mut self, ser: &mut Serializer) {
        match ser.mode() {
            SerMode::Sizer | SerMode::Pack => {
                let mut len = self.len();
                len.persist(ser);
                ser.put_bytes(self.as_bytes());
            }
            SerMode::Unpack => {
                let mut len = 0usize;
                len.persist(ser);
                // A corrupt length must not allocate unboundedly.
                let take = len.min(ser.remaining());
                if take < len {
                    ser.truncated = true;
                }
                let mut raw = vec![0u8; take];
                ser.get_bytes(&mut raw);
                *self = String::from_utf8_lossy(&raw).into_owned();
            }
            SerMode::Map => {
                ser.map_leaf("String", self.clone());
            }
        }
    }
}

impl Persist for Bytes {
    fn persist(&mut self, ser: &mut Serializer) {
        match ser.mode() {
            SerMode::Sizer | SerMode::Pack => {
                let mut len = self.len();
                len.persist(ser);
                ser.put_bytes(self);
            }
            SerMode::Unpack => {
                let mut len = 0usize;
                len.persist(ser);
                let take = len.min(ser.remaining());
                if take < len {
                    ser.truncated = true;
                }
                let mut raw = vec![0u8; take];
                ser.get_bytes(&mut raw);
                *self = Bytes::from(raw);
            }
            SerMode::Map => {
                ser.map_leaf("Bytes", format!("{} bytes", self.len()));
            }
        }
    }
}

impl<T: Persist + Default> Persist for Option<T> {
    fn persist(&mut self, ser: &mut Serializer) {
        let mut present = self.is_some() as u8;
        ser.named("present", &mut present);
        if ser.mode() == SerMode::Unpack {
            *self = if present != 0 {
                Some(T::default())
            } else {
                None
            };
        }
        if let Some(inner) = self.as_mut() {
            ser.named("value", inner);
        }
    }
}

impl<T: Persist + Default> Persist for Vec<T> {
    fn persist(&mut self, ser: &mut Serializer) {
        let mut len = self.len();
        len.persist(ser);
        if ser.mode() == SerMode::Unpack {
            self.clear();
            // Bound element count by what the buffer could possibly hold.
            let cap = len.min(ser.remaining().max(1));
            self.reserve(cap.min(4096));
            for _ in 0..len {
                if ser.truncated() {
                    break;
                }
                let mut item = T::default();
                item.persist(ser);
                self.push(item);
            }
            return;
        }
        for (i, item) in self.iter_mut().enumerate() {
            if ser.mode() == SerMode::Map {
                ser.named(&format!("[{i}]"), item);
            } else {
                item.persist(ser);
            }
        }
    }
}

impl<T: Persist + Default> Persist for VecDeque<T> {
    fn persist(&mut self, ser: &mut Serializer) {
        let mut staged: Vec<T> = std::mem::take(self).into_iter().collect();
        staged.persist(ser);
        *self = staged.into();
    }
}

impl<K, V> Persist for BTreeMap<K, V>
where
    K: Persist + Default + Ord + Clone,
    V: Persist + Default,
{
    fn persist(&mut self, ser: &mut Serializer) {
        let mut len = self.len();
        len.persist(ser);
        if ser.mode() == SerMode::Unpack {
            self.clear();
            for _ in 0..len {
                if ser.truncated() {
                    break;
                }
                let mut key = K::default();
                let mut value = V::default();
                key.persist(ser);
                value.persist(ser);
                self.insert(key, value);
            }
            return;
        }
        for (key, value) in self.iter_mut() {
            let mut key = key.clone();
            key.persist(ser);
            value.persist(ser);
        }
    }
}

impl<T> Persist for BTreeSet<T>
where
    T: Persist + Default + Ord + Clone,
{
    fn persist(&mut self, ser: &mut Serializer) {
        let mut staged: Vec<T> = self.iter().cloned().collect();
        staged.persist(ser);
        if ser.mode() == SerMode::Unpack {
            *self = staged.into_iter().collect();
        }
    }
}

impl<K, V, S> Persist for HashMap<K, V, S>
where
    K: Persist + Default + Ord + Clone + std::hash::Hash + Eq,
    V: Persist + Default,
    S: BuildHasher + Default,
{
    fn persist(&mut self, ser: &mut Serializer) {
        let mut len = self.len();
        len.persist(ser);
        if ser.mode() == SerMode::Unpack {
            self.clear();
            for _ in 0..len {
                if ser.truncated() {
                    break;
                }
                let mut key = K::default();
                let mut value = V::default();
                key.persist(ser);
                value.persist(ser);
                self.insert(key, value);
            }
            return;
        }
        // Sorted key order keeps packing deterministic.
        let mut keys: Vec<K> = self.keys().cloned().collect();
        keys.sort();
        for key in keys {
            let mut key_out = key.clone();
            key_out.persist(ser);
            self.get_mut(&key).expect("key vanished").persist(ser);
        }
    }
}

impl<A: Persist, B: Persist> Persist for (A, B) {
    fn persist(&mut self, ser: &mut Serializer) {
        self.0.persist(ser);
        self.1.persist(ser);
    }
}

impl<A: Persist, B: Persist, C: Persist> Persist for (A, B, C) {
    fn persist(&mut self, ser: &mut Serializer) {
        self.0.persist(ser);
        self.1.persist(ser);
        self.2.persist(ser);
    }
}

impl<T: Persist, const N: usize> Persist for [T; N] {
    fn persist(&mut self, ser: &mut Serializer) {
        for item in self.iter_mut() {
            item.persist(ser);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip<T: Persist + Default + PartialEq + std::fmt::Debug>(mut value: T) {
        let mut packer = Serializer::packer(64);
        value.persist(&mut packer);
        let mut out = T::default();
        let mut unpacker = Serializer::unpacker(packer.into_buffer());
        out.persist(&mut unpacker);
        assert!(!unpacker.truncated());
        assert_eq!(out, value);
    }

    #[test]
    fn containers_round_trip() {
        round_trip(vec![1u64, 2, 3]);
        round_trip(Option::<u32>::None);
        round_trip(Some(17u32));
        round_trip(String::from("timebase"));
        round_trip(Bytes::from(vec![1, 2, 3]));
        round_trip(BTreeMap::from([(1u64, "a".to_string()), (2, "b".into())]));
        round_trip(VecDeque::from([5u8, 6, 7]));
        round_trip(BTreeSet::from(["x".to_string(), "y".into()]));
        round_trip((3u32, "pair".to_string()));
        round_trip([1u16, 2, 3]);
    }

    #[test]
    fn hash_map_round_trip() {
        let mut map: HashMap<u32, u64> = HashMap::new();
        map.insert(9, 90);
        map.insert(4, 40);
        round_trip(map);
    }
}
