//! Per-session fan-out of events and alerts to registered listeners.
//!
//! Listeners are plain callbacks invoked synchronously, in registration
//! order, on the task that commits the turn. A listener that returns an
//! error or panics is logged and skipped; it never affects other
//! listeners or the turn itself.
//!
//! No registry lock is held while a listener runs, so a listener may
//! call back into the bus — subscribing or unsubscribing (itself
//! included) during delivery is fine. A listener removed mid-delivery
//! receives nothing further, in that publish or any later one.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::alert::Alert;
use crate::event::MonitoringEvent;
use crate::ids::SessionId;

/// Error a listener may return to signal delivery failure.
#[derive(Debug, thiserror::Error)]
#[error("listener failed: {0}")]
pub struct ListenerError(pub String);

impl ListenerError {
    /// Create a listener error with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Handle returned by subscribe calls; used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener<T> = Arc<dyn Fn(&T) -> Result<(), ListenerError> + Send + Sync>;

struct Registry<T> {
    listeners: HashMap<SessionId, Vec<(ListenerId, Listener<T>)>>,
}

impl<T> Registry<T> {
    fn new() -> Self {
        Self {
            listeners: HashMap::new(),
        }
    }

    fn add(&mut self, session_id: SessionId, id: ListenerId, listener: Listener<T>) {
        self.listeners
            .entry(session_id)
            .or_default()
            .push((id, listener));
    }

    fn remove(&mut self, session_id: &SessionId, id: ListenerId) -> bool {
        let Some(entries) = self.listeners.get_mut(session_id) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        let removed = entries.len() < before;
        if entries.is_empty() {
            self.listeners.remove(session_id);
        }
        removed
    }

    fn snapshot(&self, session_id: &SessionId) -> Vec<(ListenerId, Listener<T>)> {
        self.listeners.get(session_id).cloned().unwrap_or_default()
    }

    fn is_registered(&self, session_id: &SessionId, id: ListenerId) -> bool {
        self.listeners
            .get(session_id)
            .is_some_and(|entries| entries.iter().any(|(entry_id, _)| *entry_id == id))
    }
}

/// Deliver to a snapshot of the session's listeners, taking the lock
/// only between invocations. Listeners unsubscribed after the snapshot
/// (including by an earlier listener in the same publish) are skipped.
fn deliver<T>(registry: &Mutex<Registry<T>>, session_id: &SessionId, payload: &T, channel: &str) {
    let snapshot = registry
        .lock()
        .expect("listener registry poisoned")
        .snapshot(session_id);
    for (id, listener) in snapshot {
        let live = registry
            .lock()
            .expect("listener registry poisoned")
            .is_registered(session_id, id);
        if !live {
            continue;
        }
        match catch_unwind(AssertUnwindSafe(|| listener(payload))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(session_id = %session_id, listener = id.0, channel, %err, "listener rejected delivery");
            }
            Err(_) => {
                warn!(session_id = %session_id, listener = id.0, channel, "listener panicked during delivery");
            }
        }
    }
}

/// Fan-out hub for monitoring events and alerts.
pub struct SubscriptionBus {
    events: Mutex<Registry<MonitoringEvent>>,
    alerts: Mutex<Registry<Alert>>,
    next_id: AtomicU64,
}

impl SubscriptionBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Registry::new()),
            alerts: Mutex::new(Registry::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn allocate_id(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register an event listener for a session.
    pub fn subscribe_events<F>(&self, session_id: SessionId, listener: F) -> ListenerId
    where
        F: Fn(&MonitoringEvent) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        let id = self.allocate_id();
        self.events
            .lock()
            .expect("event registry poisoned")
            .add(session_id, id, Arc::new(listener));
        id
    }

    /// Register an alert listener for a session.
    pub fn subscribe_alerts<F>(&self, session_id: SessionId, listener: F) -> ListenerId
    where
        F: Fn(&Alert) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        let id = self.allocate_id();
        self.alerts
            .lock()
            .expect("alert registry poisoned")
            .add(session_id, id, Arc::new(listener));
        id
    }

    /// Remove a single event listener. Returns whether it existed.
    pub fn unsubscribe_events(&self, session_id: &SessionId, id: ListenerId) -> bool {
        self.events
            .lock()
            .expect("event registry poisoned")
            .remove(session_id, id)
    }

    /// Remove a single alert listener. Returns whether it existed.
    pub fn unsubscribe_alerts(&self, session_id: &SessionId, id: ListenerId) -> bool {
        self.alerts
            .lock()
            .expect("alert registry poisoned")
            .remove(session_id, id)
    }

    /// Deliver an event to the session's listeners in registration order.
    pub fn publish_event(&self, session_id: &SessionId, event: &MonitoringEvent) {
        deliver(&self.events, session_id, event, "events");
    }

    /// Deliver an alert to the session's listeners in registration order.
    pub fn publish_alert(&self, session_id: &SessionId, alert: &Alert) {
        deliver(&self.alerts, session_id, alert, "alerts");
    }

    /// Drop every listener registered for a session. Called on session end.
    pub fn remove_session(&self, session_id: &SessionId) {
        self.events
            .lock()
            .expect("event registry poisoned")
            .listeners
            .remove(session_id);
        self.alerts
            .lock()
            .expect("alert registry poisoned")
            .listeners
            .remove(session_id);
    }

    /// Number of event listeners registered for a session.
    #[must_use]
    pub fn event_listener_count(&self, session_id: &SessionId) -> usize {
        self.events
            .lock()
            .expect("event registry poisoned")
            .listeners
            .get(session_id)
            .map_or(0, Vec::len)
    }

    /// Number of alert listeners registered for a session.
    #[must_use]
    pub fn alert_listener_count(&self, session_id: &SessionId) -> usize {
        self.alerts
            .lock()
            .expect("alert registry poisoned")
            .listeners
            .get(session_id)
            .map_or(0, Vec::len)
    }
}

impl Default for SubscriptionBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SubscriptionBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionBus").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Utc;

    use super::*;
    use crate::alert::{AlertKind, AlertSeverity};
    use crate::event::{EventKind, Severity};

    fn event(session_id: &SessionId) -> MonitoringEvent {
        MonitoringEvent::new(
            session_id.clone(),
            EventKind::ThresholdExceeded {
                threshold: 0.7,
                level: 0.75,
            },
            Severity::High,
            Utc::now(),
        )
    }

    fn alert(session_id: &SessionId) -> Alert {
        Alert::new(
            session_id,
            AlertKind::Breakthrough,
            AlertSeverity::Critical,
            "m",
            "a",
            false,
            Utc::now(),
        )
    }

    #[test]
    fn test_publish_reaches_session_listeners_only() {
        let bus = SubscriptionBus::new();
        let s1 = SessionId::new("s1");
        let s2 = SessionId::new("s2");

        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        bus.subscribe_events(s1.clone(), move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.publish_event(&s1, &event(&s1));
        bus.publish_event(&s2, &event(&s2));

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listeners_invoked_in_registration_order() {
        let bus = SubscriptionBus::new();
        let s1 = SessionId::new("s1");

        let order = Arc::new(Mutex::new(Vec::new()));
        for label in ["a", "b", "c"] {
            let order = Arc::clone(&order);
            bus.subscribe_events(s1.clone(), move |_| {
                order.lock().unwrap().push(label);
                Ok(())
            });
        }

        bus.publish_event(&s1, &event(&s1));
        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_failing_listener_does_not_block_others() {
        let bus = SubscriptionBus::new();
        let s1 = SessionId::new("s1");

        bus.subscribe_events(s1.clone(), |_| Err(ListenerError::new("nope")));
        bus.subscribe_events(s1.clone(), |_| panic!("boom"));

        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        bus.subscribe_events(s1.clone(), move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.publish_event(&s1, &event(&s1));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_removes_only_that_listener() {
        let bus = SubscriptionBus::new();
        let s1 = SessionId::new("s1");

        let count = Arc::new(AtomicUsize::new(0));
        let c1 = Arc::clone(&count);
        let first = bus.subscribe_events(s1.clone(), move |_| {
            c1.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let c2 = Arc::clone(&count);
        bus.subscribe_events(s1.clone(), move |_| {
            c2.fetch_add(10, Ordering::SeqCst);
            Ok(())
        });

        assert!(bus.unsubscribe_events(&s1, first));
        assert!(!bus.unsubscribe_events(&s1, first));

        bus.publish_event(&s1, &event(&s1));
        assert_eq!(count.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_listener_can_unsubscribe_itself_during_delivery() {
        // At-most-once consumption: the listener removes itself on
        // first delivery, from inside the callback.
        let bus = Arc::new(SubscriptionBus::new());
        let s1 = SessionId::new("s1");

        let count = Arc::new(AtomicUsize::new(0));
        let own_id: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));

        let bus_inner = Arc::clone(&bus);
        let count_inner = Arc::clone(&count);
        let own_id_inner = Arc::clone(&own_id);
        let sid = s1.clone();
        let id = bus.subscribe_events(s1.clone(), move |_| {
            count_inner.fetch_add(1, Ordering::SeqCst);
            if let Some(me) = *own_id_inner.lock().unwrap() {
                bus_inner.unsubscribe_events(&sid, me);
            }
            Ok(())
        });
        *own_id.lock().unwrap() = Some(id);

        bus.publish_event(&s1, &event(&s1));
        bus.publish_event(&s1, &event(&s1));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.event_listener_count(&s1), 0);
    }

    #[test]
    fn test_listener_unsubscribed_mid_publish_is_skipped() {
        // The first listener removes the second; the second must not
        // run even though it was in the snapshot for this publish.
        let bus = Arc::new(SubscriptionBus::new());
        let s1 = SessionId::new("s1");

        let second_runs = Arc::new(AtomicUsize::new(0));
        let second_id: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));

        let bus_inner = Arc::clone(&bus);
        let second_id_inner = Arc::clone(&second_id);
        let sid = s1.clone();
        bus.subscribe_events(s1.clone(), move |_| {
            if let Some(target) = *second_id_inner.lock().unwrap() {
                bus_inner.unsubscribe_events(&sid, target);
            }
            Ok(())
        });

        let runs = Arc::clone(&second_runs);
        let id = bus.subscribe_events(s1.clone(), move |_| {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        *second_id.lock().unwrap() = Some(id);

        bus.publish_event(&s1, &event(&s1));
        assert_eq!(second_runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_listener_can_subscribe_during_delivery() {
        // A listener registered mid-publish is not in the snapshot and
        // first hears the next publish.
        let bus = Arc::new(SubscriptionBus::new());
        let s1 = SessionId::new("s1");

        let late_runs = Arc::new(AtomicUsize::new(0));
        let bus_inner = Arc::clone(&bus);
        let late_inner = Arc::clone(&late_runs);
        let sid = s1.clone();
        bus.subscribe_events(s1.clone(), move |_| {
            let late = Arc::clone(&late_inner);
            bus_inner.subscribe_events(sid.clone(), move |_| {
                late.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            Ok(())
        });

        bus.publish_event(&s1, &event(&s1));
        assert_eq!(late_runs.load(Ordering::SeqCst), 0);

        bus.publish_event(&s1, &event(&s1));
        assert_eq!(late_runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_session_drops_both_channels() {
        let bus = SubscriptionBus::new();
        let s1 = SessionId::new("s1");

        bus.subscribe_events(s1.clone(), |_| Ok(()));
        bus.subscribe_alerts(s1.clone(), |_| Ok(()));
        assert_eq!(bus.event_listener_count(&s1), 1);
        assert_eq!(bus.alert_listener_count(&s1), 1);

        bus.remove_session(&s1);
        assert_eq!(bus.event_listener_count(&s1), 0);
        assert_eq!(bus.alert_listener_count(&s1), 0);
    }

    #[test]
    fn test_publish_to_unknown_session_is_noop() {
        let bus = SubscriptionBus::new();
        let s1 = SessionId::new("s1");
        bus.publish_event(&s1, &event(&s1));
        bus.publish_alert(&s1, &alert(&s1));
    }
}
