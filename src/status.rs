use crate::subscription::{SessionUpdate, UpdateReceiver};
use crate::types::RobotStatus;
use std::sync::RwLock;
use tokio::sync::broadcast;

const UPDATE_CHANNEL_CAPACITY: usize = 100;

/// Last known robot status plus the subscribers interested in it
pub struct StatusStore {
    current: RwLock<Option<RobotStatus>>,
    updates: broadcast::Sender<SessionUpdate>,
}

impl StatusStore {
    pub fn new(initial: Option<RobotStatus>) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            current: RwLock::new(initial),
            updates,
        }
    }

    /// Snapshot of the last known status
    pub fn current(&self) -> Option<RobotStatus> {
        self.current
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Replace the snapshot, notifying subscribers only if it changed
    ///
    /// Returns whether a notification was sent.
    pub fn apply(&self, status: RobotStatus) -> bool {
        {
            let mut current = self
                .current
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if current.as_ref() == Some(&status) {
                tracing::debug!("Status unchanged");
                return false;
            }
            *current = Some(status.clone());
        }

        tracing::debug!("Status changed, notifying subscribers");
        let _ = self.updates.send(SessionUpdate::Status(Box::new(status)));
        true
    }

    /// Tell subscribers a new map is available
    pub fn notify_map(&self) {
        let _ = self.updates.send(SessionUpdate::Map);
    }

    pub fn subscribe(&self) -> UpdateReceiver {
        UpdateReceiver::new(self.updates.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::SessionUpdate;
    use crate::types::WorkingState;

    fn status(state: WorkingState, battery: f64) -> RobotStatus {
        RobotStatus {
            working_status: Some(state),
            battery_level: Some(battery),
            ..RobotStatus::default()
        }
    }

    #[test]
    fn identical_updates_notify_once() {
        let store = StatusStore::new(None);
        let mut rx = store.subscribe();

        assert!(store.apply(status(WorkingState::AutoClean, 80.0)));
        assert!(!store.apply(status(WorkingState::AutoClean, 80.0)));

        assert!(matches!(rx.try_recv().unwrap(), Some(SessionUpdate::Status(_))));
        assert!(rx.try_recv().unwrap().is_none());
    }

    #[test]
    fn any_field_change_notifies() {
        let store = StatusStore::new(Some(status(WorkingState::AutoClean, 80.0)));
        let mut rx = store.subscribe();

        assert!(store.apply(status(WorkingState::AutoClean, 79.0)));
        match rx.try_recv().unwrap() {
            Some(SessionUpdate::Status(status)) => assert_eq!(status.battery_level(), Some(79)),
            other => panic!("unexpected update {other:?}"),
        }
        assert_eq!(store.current().unwrap().battery_level(), Some(79));
    }

    #[test]
    fn seeded_status_suppresses_first_duplicate() {
        let store = StatusStore::new(Some(status(WorkingState::ChargeDone, 100.0)));
        assert!(!store.apply(status(WorkingState::ChargeDone, 100.0)));
    }
}
