//! Handle table for platform GATT objects.
//!
//! Each object is identified by its parent id and GATT attribute handle, so
//! enumerating the same attribute again yields the id it already has. The
//! object first registered for an attribute is kept; it may carry event
//! registrations.

use std::collections::HashMap;

struct Entry<T> {
    parent: u64,
    attribute: u16,
    object: T,
}

pub struct AttributeTable<T> {
    next_id: u64,
    ids: HashMap<(u64, u16), u64>,
    entries: HashMap<u64, Entry<T>>,
}

impl<T> Default for AttributeTable<T> {
    fn default() -> Self {
        Self {
            next_id: 0,
            ids: HashMap::new(),
            entries: HashMap::new(),
        }
    }
}

impl<T: Clone> AttributeTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of `attribute` under `parent`, registering `object` if it is new
    pub fn intern(&mut self, parent: u64, attribute: u16, object: T) -> u64 {
        if let Some(id) = self.ids.get(&(parent, attribute)) {
            return *id;
        }
        self.next_id += 1;
        let id = self.next_id;
        self.ids.insert((parent, attribute), id);
        self.entries.insert(
            id,
            Entry {
                parent,
                attribute,
                object,
            },
        );
        id
    }

    pub fn get(&self, id: u64) -> Option<T> {
        self.entries.get(&id).map(|e| e.object.clone())
    }

    pub fn remove(&mut self, id: u64) -> Option<T> {
        let entry = self.entries.remove(&id)?;
        self.ids.remove(&(entry.parent, entry.attribute));
        Some(entry.object)
    }

    /// Remove every entry registered under `parent`
    pub fn remove_children(&mut self, parent: u64) -> Vec<(u64, T)> {
        let ids: Vec<u64> = self
            .entries
            .iter()
            .filter(|(_, e)| e.parent == parent)
            .map(|(id, _)| *id)
            .collect();
        ids.into_iter()
            .filter_map(|id| self.remove(id).map(|object| (id, object)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
