use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{CalcGraphError, ObjectId, Result, Timestamp, VersionCorrection, VersionWindow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Created,
    Updated,
    Removed,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChangeType::Created => "CREATED",
            ChangeType::Updated => "UPDATED",
            ChangeType::Removed => "REMOVED",
        };
        f.write_str(name)
    }
}

/// Notification that a versioned entity was created, updated or removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub change_type: ChangeType,
    pub object_id: ObjectId,
    pub version_from: Option<Timestamp>,
    pub version_to: Option<Timestamp>,
    pub version_instant: Timestamp,
}

impl ChangeEvent {
    pub fn new(
        change_type: ChangeType,
        object_id: ObjectId,
        version_from: Option<Timestamp>,
        version_to: Option<Timestamp>,
        version_instant: Timestamp,
    ) -> Self {
        Self {
            change_type,
            object_id,
            version_from,
            version_to,
            version_instant,
        }
    }

    /// An event affecting every version of `object_id`, recorded now.
    pub fn unbounded(change_type: ChangeType, object_id: ObjectId) -> Self {
        Self::new(change_type, object_id, None, None, chrono::Utc::now())
    }

    /// The validated version window; fails when `version_from >= version_to`.
    pub fn window(&self) -> Result<VersionWindow> {
        VersionWindow::new(self.version_from, self.version_to)
    }

    pub fn is_inverted(&self) -> bool {
        self.window().is_err()
    }

    /// Whether a view resolving at `resolver` (with latest fixed to `now`)
    /// can observe this change.
    pub fn affects(&self, resolver: VersionCorrection, now: Timestamp) -> bool {
        let Ok(window) = self.window() else {
            return false;
        };
        let fixed = resolver.with_latest_fixed(now);
        let version_visible = fixed.version_as_of().map_or(true, |v| window.contains(v));
        let correction_visible = fixed
            .corrected_to()
            .map_or(true, |c| self.version_instant <= c);
        version_visible && correction_visible
    }
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.change_type, self.object_id)
    }
}

/// Receives change events. Implementations must be cheap; they run on the
/// emitting thread.
pub trait ChangeListener: Send + Sync {
    fn entity_changed(&self, event: &ChangeEvent) -> Result<()>;
}

/// Publish/subscribe hub for change events of one entity type.
///
/// Registration is idempotent (the same listener instance is held at most
/// once). `entity_changed` delivers the event to every listener registered at
/// the time of the call before it returns; a failing or panicking listener
/// does not stop delivery to the others. A listener that answers with
/// [`CalcGraphError::Terminated`] is unregistered.
pub trait ChangeManager: Send + Sync {
    fn add_change_listener(&self, listener: Arc<dyn ChangeListener>);

    fn remove_change_listener(&self, listener: &Arc<dyn ChangeListener>);

    fn entity_changed(&self, event: ChangeEvent) -> Result<()>;

    fn listener_count(&self) -> usize;
}

fn same_listener(a: &Arc<dyn ChangeListener>, b: &Arc<dyn ChangeListener>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

#[derive(Default)]
pub struct BasicChangeManager {
    listeners: RwLock<Vec<Arc<dyn ChangeListener>>>,
}

impl BasicChangeManager {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChangeManager for BasicChangeManager {
    fn add_change_listener(&self, listener: Arc<dyn ChangeListener>) {
        let mut listeners = self.listeners.write();
        if !listeners.iter().any(|l| same_listener(l, &listener)) {
            listeners.push(listener);
        }
    }

    fn remove_change_listener(&self, listener: &Arc<dyn ChangeListener>) {
        self.listeners.write().retain(|l| !same_listener(l, listener));
    }

    fn entity_changed(&self, event: ChangeEvent) -> Result<()> {
        event.window()?;

        // Snapshot so listeners may (un)register from inside the callback.
        let listeners = self.listeners.read().clone();
        debug!("Dispatching {} to {} listeners", event, listeners.len());
        let mut terminated = Vec::new();
        for listener in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener.entity_changed(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(CalcGraphError::Terminated(name))) => {
                    debug!("Dropping change listener of terminated {}", name);
                    terminated.push(listener);
                }
                Ok(Err(e)) => warn!("Change listener failed for {}: {}", event, e),
                Err(_) => warn!("Change listener panicked for {}", event),
            }
        }
        if !terminated.is_empty() {
            self.listeners
                .write()
                .retain(|l| !terminated.iter().any(|t| same_listener(l, t)));
        }
        Ok(())
    }

    fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }
}

/// For sources that cannot detect changes. Accepts everything, dispatches nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpChangeManager;

impl ChangeManager for NoOpChangeManager {
    fn add_change_listener(&self, _listener: Arc<dyn ChangeListener>) {}

    fn remove_change_listener(&self, _listener: &Arc<dyn ChangeListener>) {}

    fn entity_changed(&self, _event: ChangeEvent) -> Result<()> {
        Ok(())
    }

    fn listener_count(&self) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recording {
        events: Mutex<Vec<ChangeEvent>>,
    }

    impl ChangeListener for Recording {
        fn entity_changed(&self, event: &ChangeEvent) -> Result<()> {
            self.events.lock().push(event.clone());
            Ok(())
        }
    }

    struct Failing;

    impl ChangeListener for Failing {
        fn entity_changed(&self, _event: &ChangeEvent) -> Result<()> {
            Err(CalcGraphError::Listener("boom".to_string()))
        }
    }

    struct Panicking;

    impl ChangeListener for Panicking {
        fn entity_changed(&self, _event: &ChangeEvent) -> Result<()> {
            panic!("listener bug");
        }
    }

    fn t(hour: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap()
    }

    fn updated(oid: &str) -> ChangeEvent {
        ChangeEvent::new(
            ChangeType::Updated,
            ObjectId::parse(oid).unwrap(),
            Some(t(1)),
            None,
            t(1),
        )
    }

    #[test]
    fn registration_is_idempotent() {
        let manager = BasicChangeManager::new();
        let recording = Arc::new(Recording::default());
        let listener: Arc<dyn ChangeListener> = recording.clone();

        manager.add_change_listener(listener.clone());
        manager.add_change_listener(listener.clone());
        assert_eq!(manager.listener_count(), 1);

        manager.entity_changed(updated("Ticker~A")).unwrap();
        assert_eq!(recording.events.lock().len(), 1);

        manager.remove_change_listener(&listener);
        manager.remove_change_listener(&listener);
        assert_eq!(manager.listener_count(), 0);

        manager.entity_changed(updated("Ticker~A")).unwrap();
        assert_eq!(recording.events.lock().len(), 1);
    }

    #[test]
    fn faulty_listeners_do_not_block_delivery() {
        let manager = BasicChangeManager::new();
        let recording = Arc::new(Recording::default());
        manager.add_change_listener(Arc::new(Failing));
        manager.add_change_listener(Arc::new(Panicking));
        manager.add_change_listener(recording.clone());

        manager.entity_changed(updated("Ticker~B")).unwrap();
        let events = recording.events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].object_id.value(), "B");
    }

    struct Terminated;

    impl ChangeListener for Terminated {
        fn entity_changed(&self, _event: &ChangeEvent) -> Result<()> {
            Err(CalcGraphError::Terminated("view-process".to_string()))
        }
    }

    #[test]
    fn terminated_listeners_are_unregistered() {
        let manager = BasicChangeManager::new();
        let recording = Arc::new(Recording::default());
        manager.add_change_listener(Arc::new(Terminated));
        manager.add_change_listener(Arc::new(Failing));
        manager.add_change_listener(recording.clone());
        assert_eq!(manager.listener_count(), 3);

        manager.entity_changed(updated("Ticker~F")).unwrap();
        assert_eq!(manager.listener_count(), 2);
        assert_eq!(recording.events.lock().len(), 1);

        manager.entity_changed(updated("Ticker~F")).unwrap();
        assert_eq!(manager.listener_count(), 2);
        assert_eq!(recording.events.lock().len(), 2);
    }

    #[test]
    fn inverted_window_is_rejected_without_dispatch() {
        let manager = BasicChangeManager::new();
        let recording = Arc::new(Recording::default());
        manager.add_change_listener(recording.clone());

        let event = ChangeEvent::new(
            ChangeType::Updated,
            ObjectId::of("Ticker", "C"),
            Some(t(5)),
            Some(t(2)),
            t(5),
        );
        assert!(event.is_inverted());
        assert!(manager.entity_changed(event).is_err());
        assert!(recording.events.lock().is_empty());
    }

    #[test]
    fn no_op_manager_accepts_everything() {
        let manager = NoOpChangeManager;
        manager.add_change_listener(Arc::new(Panicking));
        assert_eq!(manager.listener_count(), 0);
        assert!(manager.entity_changed(updated("Ticker~D")).is_ok());
    }

    #[test]
    fn visibility_follows_resolver() {
        let event = ChangeEvent::new(
            ChangeType::Updated,
            ObjectId::of("Ticker", "E"),
            Some(t(2)),
            Some(t(4)),
            t(6),
        );
        let now = t(10);
        assert!(event.affects(VersionCorrection::of_version_as_of(t(3)), now));
        assert!(!event.affects(VersionCorrection::LATEST, now));
        // Recorded after the view's correction point.
        assert!(!event.affects(VersionCorrection::of(Some(t(3)), Some(t(5))), now));
    }
}
