//! Outstanding-batch registry.
//!
//! Tracks batches between creation and execution for lookup by id. The
//! orchestrator prunes executed batches after every top-level execute
//! cycle to bound memory.

use crate::model::batch::Batch;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct BatchRegistry {
    inner: RwLock<HashMap<Uuid, Batch>>,
}

impl BatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, batch: &Batch) {
        self.inner
            .write()
            .expect("registry lock poisoned")
            .insert(batch.id(), batch.clone());
    }

    pub fn get(&self, id: Uuid) -> Option<Batch> {
        self.inner
            .read()
            .expect("registry lock poisoned")
            .get(&id)
            .cloned()
    }

    /// Drop every batch already driven to completion.
    pub fn prune_executed(&self) {
        self.inner
            .write()
            .expect("registry lock poisoned")
            .retain(|_, batch| !batch.executed());
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_and_prunes_executed_batches() {
        let registry = BatchRegistry::new();
        let pending = Batch::new();
        let done = Batch::new();
        registry.track(&pending);
        registry.track(&done);
        assert_eq!(registry.len(), 2);
        assert!(registry.get(pending.id()).is_some());

        done.mark_executed();
        registry.prune_executed();
        assert_eq!(registry.len(), 1);
        assert!(registry.get(done.id()).is_none());
        assert!(registry.get(pending.id()).is_some());
    }
}
