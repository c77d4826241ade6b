//! Dense, id-addressed storage for IR entities.
//!
//! The IR graph has cycles (phi arguments can point back through a loop) and
//! values that are shared by many users, so we don't model it with owned
//! references. Instead every [`Value`](crate::value::Value) and
//! [`Block`](crate::block::Block) is addressed by a small integer id, and the
//! actual data lives in a flat [`PrimaryMap`] indexed by that id. Anything
//! that needs to associate extra information with every entity (lattice
//! cells, dominator preorder numbers, equivalence class ids, ...) uses a
//! [`SecondaryMap`] instead of a `HashMap`, since the id space is dense and
//! contiguous from zero.

use std::marker::PhantomData;

/// A typed index into a dense id space.
///
/// Implemented by `Value` and `Block`. Mirrors the role `cranelift-entity`'s
/// `EntityRef` plays in the wider Cranelift/Miden ecosystem, scaled down to
/// what this crate needs.
pub trait EntityRef: Copy + Eq + std::hash::Hash {
    fn new(index: usize) -> Self;
    fn index(self) -> usize;
}

#[macro_export]
macro_rules! entity_id {
    ($(#[$meta:meta])* $vis:vis struct $name:ident;) => {
        $(#[$meta])*
        #[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        $vis struct $name(u32);

        impl $crate::entity::EntityRef for $name {
            #[inline]
            fn new(index: usize) -> Self {
                assert!(index < u32::MAX as usize, "entity index space exhausted");
                Self(index as u32)
            }

            #[inline]
            fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}{}", stringify!($name).to_lowercase(), self.0)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                std::fmt::Debug::fmt(self, f)
            }
        }
    };
}

/// Owns one `V` per entity of kind `K`, in insertion order.
#[derive(Debug, Clone)]
pub struct PrimaryMap<K: EntityRef, V> {
    items: Vec<V>,
    _marker: PhantomData<K>,
}

impl<K: EntityRef, V> Default for PrimaryMap<K, V> {
    fn default() -> Self {
        Self { items: Vec::new(), _marker: PhantomData }
    }
}

impl<K: EntityRef, V> PrimaryMap<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: V) -> K {
        let key = K::new(self.items.len());
        self.items.push(value);
        key
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = K> + '_ {
        (0..self.items.len()).map(K::new)
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, &V)> + '_ {
        self.items.iter().enumerate().map(|(i, v)| (K::new(i), v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (K, &mut V)> + '_ {
        self.items.iter_mut().enumerate().map(|(i, v)| (K::new(i), v))
    }

    pub fn values(&self) -> impl Iterator<Item = &V> + '_ {
        self.items.iter()
    }
}

impl<K: EntityRef, V> std::ops::Index<K> for PrimaryMap<K, V> {
    type Output = V;

    fn index(&self, key: K) -> &V {
        &self.items[key.index()]
    }
}

impl<K: EntityRef, V> std::ops::IndexMut<K> for PrimaryMap<K, V> {
    fn index_mut(&mut self, key: K) -> &mut V {
        &mut self.items[key.index()]
    }
}

/// A dense side-table keyed by entity id, auto-growing on write and defaulting
/// reads of never-written keys. Used for per-value/per-block scratch data
/// that every pass needs (lattice cells, class ids, dominance preorder
/// numbers) without paying `HashMap` overhead.
#[derive(Debug, Clone)]
pub struct SecondaryMap<K: EntityRef, V: Clone + Default> {
    items: Vec<V>,
    default: V,
    _marker: PhantomData<K>,
}

impl<K: EntityRef, V: Clone + Default> Default for SecondaryMap<K, V> {
    fn default() -> Self {
        Self { items: Vec::new(), default: V::default(), _marker: PhantomData }
    }
}

impl<K: EntityRef, V: Clone + Default> SecondaryMap<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { items: Vec::with_capacity(capacity), ..Self::default() }
    }

    pub fn get(&self, key: K) -> &V {
        self.items.get(key.index()).unwrap_or(&self.default)
    }

    pub fn get_mut(&mut self, key: K) -> &mut V {
        let index = key.index();
        if index >= self.items.len() {
            self.items.resize(index + 1, self.default.clone());
        }
        &mut self.items[index]
    }

    pub fn set(&mut self, key: K, value: V) {
        *self.get_mut(key) = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    entity_id! { struct TestId; }

    #[test]
    fn primary_map_assigns_sequential_ids() {
        let mut map = PrimaryMap::<TestId, &'static str>::new();
        let a = map.push("a");
        let b = map.push("b");
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(map[a], "a");
        assert_eq!(map[b], "b");
    }

    #[test]
    fn secondary_map_defaults_unwritten_keys() {
        let mut map = SecondaryMap::<TestId, u32>::new();
        let id = TestId::new(5);
        assert_eq!(*map.get(id), 0);
        map.set(id, 42);
        assert_eq!(*map.get(id), 42);
        assert_eq!(*map.get(TestId::new(0)), 0);
    }
}
