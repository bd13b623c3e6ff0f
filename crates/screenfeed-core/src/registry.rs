//! Generation-checked arena of capture sessions.

use std::fmt;

/// Identifier for a registry slot.
///
/// Carries the slot generation, so an id kept after its session was
/// removed never resolves to whatever later reuses the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId {
    index: u32,
    generation: u32,
}

impl SessionId {
    /// Pack into a single opaque value, e.g. for a C ABI handle.
    pub fn to_raw(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    /// Inverse of [`to_raw`](Self::to_raw).
    pub fn from_raw(raw: u64) -> Self {
        Self {
            index: raw as u32,
            generation: (raw >> 32) as u32,
        }
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Arena owning sessions, indexed by [`SessionId`].
pub struct SessionRegistry<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Default for SessionRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SessionRegistry<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Store `value` and return its id. Freed slots are reused.
    pub fn insert(&mut self, value: T) -> SessionId {
        self.len += 1;

        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return SessionId {
                index,
                generation: slot.generation,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        SessionId {
            index,
            generation: 0,
        }
    }

    pub fn get(&self, id: SessionId) -> Option<&T> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut T> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    /// Remove and return the session, invalidating `id`.
    pub fn remove(&mut self, id: SessionId) -> Option<T> {
        let slot = self
            .slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)?;
        let value = slot.value.take()?;

        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.len -= 1;
        Some(value)
    }

    /// Iterate over live sessions.
    pub fn iter(&self) -> impl Iterator<Item = (SessionId, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value.as_ref().map(|value| {
                (
                    SessionId {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    value,
                )
            })
        })
    }

    /// Iterate mutably over live sessions.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SessionId, &mut T)> {
        self.slots.iter_mut().enumerate().filter_map(|(index, slot)| {
            let generation = slot.generation;
            slot.value.as_mut().map(|value| {
                (
                    SessionId {
                        index: index as u32,
                        generation,
                    },
                    value,
                )
            })
        })
    }

    /// Remove every session, in insertion-slot order.
    pub fn drain(&mut self) -> Vec<T> {
        let ids: Vec<SessionId> = self.iter().map(|(id, _)| id).collect();
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut registry = SessionRegistry::new();
        let a = registry.insert("display");
        let b = registry.insert("audio");

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(a), Some(&"display"));
        assert_eq!(registry.get(b), Some(&"audio"));
    }

    #[test]
    fn test_stale_id_does_not_resolve_after_reuse() {
        let mut registry = SessionRegistry::new();
        let old = registry.insert(1);
        assert_eq!(registry.remove(old), Some(1));

        let new = registry.insert(2);
        assert_ne!(old, new);
        assert_eq!(registry.get(old), None);
        assert_eq!(registry.get_mut(old), None);
        assert_eq!(registry.remove(old), None);
        assert_eq!(registry.get(new), Some(&2));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_double_remove() {
        let mut registry = SessionRegistry::new();
        let id = registry.insert(5);
        assert_eq!(registry.remove(id), Some(5));
        assert_eq!(registry.remove(id), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_raw_round_trip_preserves_generation() {
        let mut registry = SessionRegistry::new();
        let first = registry.insert('a');
        registry.remove(first);
        let second = registry.insert('b');

        let raw = second.to_raw();
        assert_eq!(SessionId::from_raw(raw), second);
        assert_eq!(registry.get(SessionId::from_raw(first.to_raw())), None);
        assert_eq!(second.to_string(), "0v1");
    }

    #[test]
    fn test_drain_empties_registry() {
        let mut registry = SessionRegistry::new();
        let a = registry.insert(10);
        registry.insert(20);
        registry.remove(a);
        registry.insert(30);

        let mut drained = registry.drain();
        drained.sort();
        assert_eq!(drained, vec![20, 30]);
        assert!(registry.is_empty());
        assert_eq!(registry.iter().count(), 0);
    }

    #[test]
    fn test_unknown_index() {
        let registry: SessionRegistry<u8> = SessionRegistry::new();
        assert_eq!(registry.get(SessionId::from_raw(99)), None);
    }
}
