//! Registry of static string literals (format strings, fixed messages).
//!
//! Producers never copy a literal into an entry: they write its numeric id,
//! and the backend resolves the id back to the `&'static str` when it renders
//! the line. Registration takes a lock, so call sites cache their id in a
//! [`LiteralSlot`] and register only on first use.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use lazy_static::lazy_static;
use parking_lot::RwLock;

#[derive(Default)]
struct Registry {
    by_text: HashMap<&'static str, u32>,
    // index = id - 1
    by_id: Vec<&'static str>,
}

lazy_static! {
    static ref REGISTRY: RwLock<Registry> = RwLock::new(Registry::default());
}

/// Registers a literal and returns its id. Ids start at 1; the same text
/// always maps to the same id.
///
/// ```
/// # use async_binary_logger::string_registry::{register_string, get_string};
/// let id = register_string("Hello, world!");
/// assert_eq!(id, register_string("Hello, world!"));
/// assert_eq!(get_string(id), Some("Hello, world!"));
/// ```
pub fn register_string(s: &'static str) -> u32 {
    if let Some(&id) = REGISTRY.read().by_text.get(s) {
        return id;
    }

    let mut registry = REGISTRY.write();
    if let Some(&id) = registry.by_text.get(s) {
        return id;
    }
    registry.by_id.push(s);
    let id = registry.by_id.len() as u32;
    registry.by_text.insert(s, id);
    id
}

/// Looks a literal up by id. Id 0 is never issued.
pub fn get_string(id: u32) -> Option<&'static str> {
    let index = (id as usize).checked_sub(1)?;
    REGISTRY.read().by_id.get(index).copied()
}

/// A registered literal: the text and its wire id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Literal {
    id: u32,
    text: &'static str,
}

impl Literal {
    /// Registers `text` (or reuses its existing id).
    pub fn new(text: &'static str) -> Self {
        Self {
            id: register_string(text),
            text,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn text(&self) -> &'static str {
        self.text
    }
}

/// Per-call-site cache for a literal's id, usable in a `static`.
pub struct LiteralSlot {
    text: &'static str,
    id: AtomicU32,
}

impl LiteralSlot {
    pub const fn new(text: &'static str) -> Self {
        Self {
            text,
            id: AtomicU32::new(0),
        }
    }

    #[inline]
    pub fn get(&self) -> Literal {
        let mut id = self.id.load(Ordering::Relaxed);
        if id == 0 {
            // Racing first uses both register; the registry hands them the same id.
            id = register_string(self.text);
            self.id.store(id, Ordering::Relaxed);
        }
        Literal {
            id,
            text: self.text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_caches_id() {
        static SLOT: LiteralSlot = LiteralSlot::new("slot cached literal");
        let a = SLOT.get();
        let b = SLOT.get();
        assert_eq!(a, b);
        assert_eq!(a.id(), register_string("slot cached literal"));
        assert_eq!(get_string(a.id()), Some("slot cached literal"));
    }

    #[test]
    fn test_reserved_zero() {
        assert_eq!(get_string(0), None);
    }
}
