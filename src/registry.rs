//! Per-database registry of typed indices.
//!
//! Keeps both an ordered sequence (registration order, which fixes the
//! order of session operations) and a type-keyed map; the two views always
//! hold the same handles.

use std::any::TypeId;
use std::collections::HashMap;

use crate::index::AbstractIndex;

#[derive(Default)]
pub(crate) struct IndexRegistry {
    ordered: Vec<Box<dyn AbstractIndex>>,
    by_type: HashMap<TypeId, usize>,
}

impl IndexRegistry {
    /// Append an index handle. Re-registration of an already-present type
    /// is a silent no-op.
    pub fn insert(&mut self, idx: Box<dyn AbstractIndex>) {
        let ty = idx.value_type();
        if self.by_type.contains_key(&ty) {
            return;
        }
        self.by_type.insert(ty, self.ordered.len());
        self.ordered.push(idx);
    }

    pub fn get(&self, ty: TypeId) -> Option<&dyn AbstractIndex> {
        self.by_type.get(&ty).map(|&i| self.ordered[i].as_ref())
    }

    /// Handles in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn AbstractIndex> {
        self.ordered.iter().map(|b| b.as_ref())
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }
}
