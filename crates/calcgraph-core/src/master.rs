use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::{
    CalcGraphError, ChangeEvent, ChangeManager, ChangeType, ObjectId, Result, Timestamp,
    VersionCorrection, VersionHistory,
};

/// Versioned in-memory store of reference data (securities, conventions,
/// holidays...). Every mutation is published through the master's
/// [`ChangeManager`].
pub struct InMemoryMaster<T> {
    documents: RwLock<HashMap<ObjectId, VersionHistory<T>>>,
    change_manager: Arc<dyn ChangeManager>,
}

impl<T: Clone + Send + Sync> InMemoryMaster<T> {
    pub fn new(change_manager: Arc<dyn ChangeManager>) -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            change_manager,
        }
    }

    pub fn change_manager(&self) -> &Arc<dyn ChangeManager> {
        &self.change_manager
    }

    pub fn add(&self, object_id: ObjectId, value: T, at: Timestamp) -> Result<()> {
        {
            let mut documents = self.documents.write();
            if documents.get(&object_id).is_some_and(|h| h.is_live()) {
                return Err(CalcGraphError::InvalidOperation(format!(
                    "{object_id} already exists"
                )));
            }
            documents.insert(object_id.clone(), VersionHistory::created(value, at));
        }
        self.publish(ChangeType::Created, object_id, Some(at), None, at)
    }

    /// Starts a new version at `at`.
    pub fn update(&self, object_id: &ObjectId, value: T, at: Timestamp) -> Result<()> {
        let window = self.with_history(object_id, |h| h.supersede(Some(value), at))?;
        self.publish(ChangeType::Updated, object_id.clone(), window.from(), window.to(), at)
    }

    /// Rewrites the current version as of correction instant `at`.
    pub fn correct(&self, object_id: &ObjectId, value: T, at: Timestamp) -> Result<()> {
        let window = self.with_history(object_id, |h| h.correct(value, at))?;
        self.publish(ChangeType::Updated, object_id.clone(), window.from(), window.to(), at)
    }

    pub fn remove(&self, object_id: &ObjectId, at: Timestamp) -> Result<()> {
        let window = self.with_history(object_id, |h| h.supersede(None, at))?;
        self.publish(ChangeType::Removed, object_id.clone(), window.from(), None, at)
    }

    pub fn get(
        &self,
        object_id: &ObjectId,
        version_correction: VersionCorrection,
        now: Timestamp,
    ) -> Option<T> {
        self.documents
            .read()
            .get(object_id)
            .and_then(|h| h.resolve(version_correction, now).cloned())
    }

    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }

    fn with_history<R>(
        &self,
        object_id: &ObjectId,
        f: impl FnOnce(&mut VersionHistory<T>) -> Result<R>,
    ) -> Result<R> {
        let mut documents = self.documents.write();
        let history = documents
            .get_mut(object_id)
            .ok_or_else(|| CalcGraphError::NotFound(object_id.to_string()))?;
        f(history)
    }

    // Called after the write lock is released so listeners may read back.
    fn publish(
        &self,
        change_type: ChangeType,
        object_id: ObjectId,
        version_from: Option<Timestamp>,
        version_to: Option<Timestamp>,
        at: Timestamp,
    ) -> Result<()> {
        debug!("{} {} at {}", change_type, object_id, at);
        self.change_manager.entity_changed(ChangeEvent::new(
            change_type,
            object_id,
            version_from,
            version_to,
            at,
        ))
    }
}
