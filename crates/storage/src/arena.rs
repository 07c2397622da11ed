use std::collections::HashMap;

use domain::accept::AcceptanceSet;
use domain::{tree, CommentId, CommentRecord};

/// Flat comment table for one post: arrival order plus an id index. Parent
/// links stay as ids; nesting only exists in the derived forest.
#[derive(Debug, Clone, Default)]
pub struct CommentArena {
    slots: Vec<CommentRecord>,
    index: HashMap<CommentId, usize>,
}

impl CommentArena {
    pub fn from_records(records: &[CommentRecord]) -> Self {
        let mut arena = Self::default();
        for record in tree::unnest(records) {
            arena.upsert(record);
        }
        arena
    }

    /// Inserts a new comment at the end, or updates an existing one in place.
    /// Returns `true` when the comment was new.
    pub fn upsert(&mut self, mut record: CommentRecord) -> bool {
        record.replies = Vec::new();
        match self.index.get(&record.id) {
            Some(&slot) => {
                self.slots[slot] = record;
                false
            }
            None => {
                self.index.insert(record.id.clone(), self.slots.len());
                self.slots.push(record);
                true
            }
        }
    }

    pub fn get(&self, id: &CommentId) -> Option<&CommentRecord> {
        self.index.get(id).map(|&slot| &self.slots[slot])
    }

    pub fn get_mut(&mut self, id: &CommentId) -> Option<&mut CommentRecord> {
        match self.index.get(id) {
            Some(&slot) => Some(&mut self.slots[slot]),
            None => None,
        }
    }

    /// Blanks the comment but keeps its slot so replies stay in place.
    pub fn soft_delete(&mut self, id: &CommentId) -> bool {
        match self.get_mut(id) {
            Some(record) => {
                record.content.clear();
                record.is_deleted = true;
                record.is_accepted = false;
                true
            }
            None => false,
        }
    }

    pub fn records(&self) -> &[CommentRecord] {
        &self.slots
    }

    pub fn ids(&self) -> impl Iterator<Item = &CommentId> {
        self.slots.iter().map(|r| &r.id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl AcceptanceSet for CommentArena {
    fn contains_comment(&self, id: &CommentId) -> bool {
        self.index.contains_key(id)
    }

    fn accepted_ids(&self) -> Vec<CommentId> {
        self.slots
            .iter()
            .filter(|r| r.is_accepted)
            .map(|r| r.id.clone())
            .collect()
    }

    fn set_accepted(&mut self, id: &CommentId, accepted: bool) {
        if let Some(record) = self.get_mut(id) {
            record.is_accepted = accepted;
        }
    }
}
