//! Typed runtime handles
//!
//! Every runtime resource (instance, session, space, swapchain, action set,
//! action) is referred to through a [`RawHandle`] tagged with its kind. Handles
//! carry a generation so a handle to a destroyed resource is detected instead of
//! silently aliasing whatever reused the slot.

use core::fmt;
use core::hash::{Hash, Hasher};
use core::marker::PhantomData;

/// Marker trait naming a kind of runtime resource
pub trait HandleKind: 'static {
    const NAME: &'static str;
}

macro_rules! handle_kinds {
    ($($(#[$doc:meta])* $kind:ident => $alias:ident, $name:literal;)*) => {
        $(
            $(#[$doc])*
            #[derive(Debug)]
            pub enum $kind {}

            impl HandleKind for $kind {
                const NAME: &'static str = $name;
            }

            $(#[$doc])*
            pub type $alias = RawHandle<$kind>;
        )*
    };
}

handle_kinds! {
    /// Connection to the runtime
    InstanceKind => InstanceHandle, "instance";
    /// Rendering session
    SessionKind => SessionHandle, "session";
    /// Reference or action space
    SpaceKind => SpaceHandle, "space";
    /// Image ring for one view
    SwapchainKind => SwapchainHandle, "swapchain";
    /// Group of input actions
    ActionSetKind => ActionSetHandle, "action set";
    /// Single input action
    ActionKind => ActionHandle, "action";
}

/// A generation-checked handle to a runtime resource of kind `K`
#[repr(transparent)]
pub struct RawHandle<K: HandleKind> {
    /// Lower 32 bits: index, upper 32 bits: generation
    bits: u64,
    _marker: PhantomData<fn() -> K>,
}

impl<K: HandleKind> RawHandle<K> {
    #[inline]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self {
            bits: ((generation as u64) << 32) | index as u64,
            _marker: PhantomData,
        }
    }

    /// A handle that never refers to a live resource
    #[inline]
    pub const fn null() -> Self {
        Self {
            bits: u64::MAX,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub const fn is_null(&self) -> bool {
        self.bits == u64::MAX
    }

    #[inline]
    pub const fn index(&self) -> u32 {
        self.bits as u32
    }

    #[inline]
    pub const fn generation(&self) -> u32 {
        (self.bits >> 32) as u32
    }

    #[inline]
    pub const fn to_bits(&self) -> u64 {
        self.bits
    }

    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Self {
            bits,
            _marker: PhantomData,
        }
    }
}

impl<K: HandleKind> Clone for RawHandle<K> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<K: HandleKind> Copy for RawHandle<K> {}

impl<K: HandleKind> PartialEq for RawHandle<K> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.bits == other.bits
    }
}

impl<K: HandleKind> Eq for RawHandle<K> {}

impl<K: HandleKind> Hash for RawHandle<K> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bits.hash(state);
    }
}

impl<K: HandleKind> fmt::Debug for RawHandle<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "{}(null)", K::NAME)
        } else {
            write!(f, "{}({}v{})", K::NAME, self.index(), self.generation())
        }
    }
}

impl<K: HandleKind> Default for RawHandle<K> {
    fn default() -> Self {
        Self::null()
    }
}

/// Slot storage keyed by generation-checked handles
pub struct HandleTable<K: HandleKind, V> {
    generations: Vec<u32>,
    values: Vec<Option<V>>,
    free_list: Vec<u32>,
    _marker: PhantomData<fn() -> K>,
}

impl<K: HandleKind, V> HandleTable<K, V> {
    pub fn new() -> Self {
        Self {
            generations: Vec::new(),
            values: Vec::new(),
            free_list: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Store a value and return its handle
    pub fn insert(&mut self, value: V) -> RawHandle<K> {
        if let Some(index) = self.free_list.pop() {
            self.values[index as usize] = Some(value);
            RawHandle::new(index, self.generations[index as usize])
        } else {
            let index = self.values.len() as u32;
            self.generations.push(0);
            self.values.push(Some(value));
            RawHandle::new(index, 0)
        }
    }

    /// Remove a value; the slot's generation is bumped so stale handles fail
    pub fn remove(&mut self, handle: RawHandle<K>) -> Option<V> {
        if !self.contains(handle) {
            return None;
        }
        let index = handle.index() as usize;
        self.generations[index] = self.generations[index].wrapping_add(1);
        self.free_list.push(handle.index());
        self.values[index].take()
    }

    pub fn contains(&self, handle: RawHandle<K>) -> bool {
        if handle.is_null() {
            return false;
        }
        let index = handle.index() as usize;
        index < self.generations.len()
            && self.generations[index] == handle.generation()
            && self.values[index].is_some()
    }

    pub fn get(&self, handle: RawHandle<K>) -> Option<&V> {
        if !self.contains(handle) {
            return None;
        }
        self.values[handle.index() as usize].as_ref()
    }

    pub fn get_mut(&mut self, handle: RawHandle<K>) -> Option<&mut V> {
        if !self.contains(handle) {
            return None;
        }
        self.values[handle.index() as usize].as_mut()
    }

    pub fn len(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over live handles and values
    pub fn iter(&self) -> impl Iterator<Item = (RawHandle<K>, &V)> {
        self.values.iter().enumerate().filter_map(move |(i, slot)| {
            slot.as_ref()
                .map(|v| (RawHandle::new(i as u32, self.generations[i]), v))
        })
    }
}

impl<K: HandleKind, V> Default for HandleTable<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_handle_rejected() {
        let mut table: HandleTable<SwapchainKind, &str> = HandleTable::new();
        let first = table.insert("left");
        let second = table.insert("right");

        assert_eq!(table.get(first), Some(&"left"));
        assert_eq!(table.remove(first), Some("left"));
        assert_eq!(table.get(first), None);
        assert_eq!(table.remove(first), None);

        let reused = table.insert("left again");
        assert_eq!(reused.index(), first.index());
        assert_ne!(reused, first);
        assert_eq!(table.get(first), None);
        assert_eq!(table.get(second), Some(&"right"));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_null_handle() {
        let table: HandleTable<SessionKind, u8> = HandleTable::new();
        let null = SessionHandle::null();
        assert!(null.is_null());
        assert!(!table.contains(null));
        assert_eq!(format!("{:?}", null), "session(null)");
    }
}
