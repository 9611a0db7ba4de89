//! In-process hash map tier. Every set starts here.

use std::collections::HashMap;

use super::types::Backend;

const INITIAL_CAPACITY: usize = 50;

/// Hash map from canonical element to a unit marker.
#[derive(Debug)]
pub struct MemoryBackend {
    elements: HashMap<String, ()>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            elements: HashMap::with_capacity(INITIAL_CAPACITY),
        }
    }

    /// Drops every element and releases the map's allocation.
    pub fn clear(&mut self) {
        self.elements = HashMap::new();
    }

    /// Moves every element out, leaving the map empty and unallocated.
    pub fn take_all(&mut self) -> Vec<String> {
        std::mem::take(&mut self.elements).into_keys().collect()
    }
}

impl Backend for MemoryBackend {
    #[inline]
    fn has(&self, element: &str) -> bool {
        self.elements.contains_key(element)
    }

    #[inline]
    fn insert(&mut self, element: &str) {
        if !self.elements.contains_key(element) {
            self.elements.insert(element.to_owned(), ());
        }
    }

    fn insert_many(&mut self, elements: &[String]) {
        self.elements.reserve(elements.len());
        for element in elements {
            self.insert(element);
        }
    }

    #[inline]
    fn remove(&mut self, element: &str) {
        self.elements.remove(element);
    }

    fn all(&self) -> Vec<String> {
        self.elements.keys().cloned().collect()
    }

    #[inline]
    fn count(&self) -> usize {
        self.elements.len()
    }
}
