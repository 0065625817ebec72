use async_trait::async_trait;
use log::{info, warn};
use std::collections::HashSet;
use thiserror::Error;

use crate::incident::{EscalationLevel, Incident};
use crate::types::{LocationSnapshot, NotifyMethod, TrustedContact};

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Channel unavailable: {0}")]
    Unavailable(String),
}

// ─── Collaborator traits ─────────────────────────────────────────────────────

#[async_trait]
pub trait ContactNotifier: Send + Sync {
    async fn notify(
        &self,
        contact: &TrustedContact,
        method: NotifyMethod,
        message: &str,
    ) -> Result<(), NotifyError>;
}

/// Emergency-service dialing. `prepare_call` surfaces the call for explicit
/// user confirmation; `place_call` actually dials.
#[async_trait]
pub trait EmergencyDialer: Send + Sync {
    async fn prepare_call(&self, number: &str) -> Result<(), NotifyError>;
    async fn place_call(&self, number: &str) -> Result<(), NotifyError>;
}

/// Broadcast to opted-in nearby responders. The payload carries coarse
/// location only and no user-identifying fields.
#[async_trait]
pub trait ResponderBroadcast: Send + Sync {
    async fn broadcast(&self, alert: &ResponderAlert) -> Result<(), NotifyError>;
}

#[derive(Clone, Debug, serde::Serialize)]
pub struct ResponderAlert {
    pub coarse_latitude: f64,
    pub coarse_longitude: f64,
    pub classification: String,
    pub timestamp: f64,
}

/// Round a coordinate to a 1/200-degree grid (~500 m).
pub fn coarsen_coordinate(value: f64) -> f64 {
    (value * 200.0).round() / 200.0
}

// ─── Engine ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct EscalationConfig {
    pub emergency_number: String,
    pub contact_message: String,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            emergency_number: "112".to_string(),
            contact_message: "Emergency alert: your contact may need help. Check on them now."
                .to_string(),
        }
    }
}

/// Owns the four-level ladder. Carries no incident identity between
/// incidents; `reset()` runs once per completed incident.
pub struct EscalationEngine {
    config: EscalationConfig,
    contacts: Vec<TrustedContact>,
    notifier: std::sync::Arc<dyn ContactNotifier>,
    dialer: std::sync::Arc<dyn EmergencyDialer>,
    responders: std::sync::Arc<dyn ResponderBroadcast>,

    current_level: EscalationLevel,
    notified: HashSet<String>,
    call_prepared: bool,
    services_contacted: bool,
}

impl EscalationEngine {
    pub fn new(
        config: EscalationConfig,
        contacts: Vec<TrustedContact>,
        notifier: std::sync::Arc<dyn ContactNotifier>,
        dialer: std::sync::Arc<dyn EmergencyDialer>,
        responders: std::sync::Arc<dyn ResponderBroadcast>,
    ) -> Self {
        Self {
            config,
            contacts,
            notifier,
            dialer,
            responders,
            current_level: EscalationLevel::None,
            notified: HashSet::new(),
            call_prepared: false,
            services_contacted: false,
        }
    }

    pub fn current_level(&self) -> EscalationLevel {
        self.current_level
    }

    pub fn services_contacted(&self) -> bool {
        self.services_contacted
    }

    pub fn call_prepared(&self) -> bool {
        self.call_prepared
    }

    /// Climb the ladder to `to_level`. A target at or below the current
    /// level is a no-op, which makes repeated and out-of-order calls safe.
    /// Every level crossed performs its incremental actions, so the action
    /// set at any level is cumulative over the levels below it.
    pub async fn escalate(&mut self, incident: &mut Incident, to_level: EscalationLevel) {
        if to_level <= self.current_level {
            return;
        }
        let crossed: Vec<EscalationLevel> = self
            .current_level
            .levels_above()
            .filter(|l| *l <= to_level)
            .collect();
        self.current_level = to_level;
        incident.raise_escalation(to_level);

        for level in crossed {
            match level {
                EscalationLevel::None => {}
                EscalationLevel::TrustedContacts => {
                    self.notify_contacts(incident).await;
                }
                EscalationLevel::EmergencyServices => {
                    self.prepare_emergency_call(incident).await;
                }
                EscalationLevel::NearbyResponders => {
                    self.broadcast_nearby(incident).await;
                }
            }
        }
    }

    /// Duress path: runs the trusted-contact notifications without touching
    /// the ladder and without any user-visible confirmation surface.
    pub async fn silent_escalate(&mut self, incident: &mut Incident) {
        self.notify_contacts(incident).await;
    }

    /// Clears all engine state between incidents. Never called mid-incident.
    pub fn reset(&mut self) {
        self.current_level = EscalationLevel::None;
        self.notified.clear();
        self.call_prepared = false;
        self.services_contacted = false;
    }

    /// User confirmed the prepared emergency call: dial now.
    pub async fn confirm_emergency_call(&mut self, incident: &mut Incident) {
        if !self.call_prepared || self.services_contacted {
            return;
        }
        match self.dialer.place_call(&self.config.emergency_number).await {
            Ok(()) => {
                self.services_contacted = true;
                incident.log_event(format!(
                    "Emergency call placed to {}",
                    self.config.emergency_number
                ));
            }
            Err(e) => {
                warn!("emergency call failed: {e}");
                incident.log_event(format!("Emergency call failed: {e}"));
            }
        }
    }

    // ── Level actions ────────────────────────────────────────────────────

    /// Notify every enabled contact in ascending priority order, via each
    /// contact's configured methods. One contact's failure never blocks
    /// another's notification.
    async fn notify_contacts(&mut self, incident: &mut Incident) {
        let mut roster: Vec<TrustedContact> = self
            .contacts
            .iter()
            .filter(|c| c.enabled && !self.notified.contains(&c.id))
            .cloned()
            .collect();
        roster.sort_by_key(|c| c.priority);

        for contact in roster {
            let mut delivered = Vec::new();
            for method in &contact.methods {
                match self
                    .notifier
                    .notify(&contact, *method, &self.config.contact_message)
                    .await
                {
                    Ok(()) => delivered.push(*method),
                    Err(e) => {
                        warn!("notify {} via {:?} failed: {e}", contact.name, method);
                        incident.log_event(format!(
                            "Notification to {} via {:?} failed: {e}",
                            contact.name, method
                        ));
                    }
                }
            }
            if !delivered.is_empty() {
                incident.log_event(format!(
                    "Notified {} ({:?}, priority {})",
                    contact.name, delivered, contact.priority
                ));
            }
            self.notified.insert(contact.id.clone());
        }
    }

    /// Surface the emergency call for explicit confirmation; never dials
    /// silently.
    async fn prepare_emergency_call(&mut self, incident: &mut Incident) {
        match self.dialer.prepare_call(&self.config.emergency_number).await {
            Ok(()) => {
                self.call_prepared = true;
                incident.log_event(format!(
                    "Emergency call to {} prepared, awaiting confirmation",
                    self.config.emergency_number
                ));
            }
            Err(e) => {
                warn!("prepare emergency call failed: {e}");
                incident.log_event(format!("Emergency call preparation failed: {e}"));
            }
        }
    }

    async fn broadcast_nearby(&mut self, incident: &mut Incident) {
        let location = incident.latest_location().cloned();
        let alert = match location {
            Some(LocationSnapshot {
                timestamp,
                latitude,
                longitude,
                ..
            }) => ResponderAlert {
                coarse_latitude: coarsen_coordinate(latitude),
                coarse_longitude: coarsen_coordinate(longitude),
                classification: format!("{:?}", incident.classification).to_lowercase(),
                timestamp,
            },
            None => {
                incident.log_event("Responder broadcast skipped: no location available");
                return;
            }
        };

        match self.responders.broadcast(&alert).await {
            Ok(()) => {
                info!(
                    "responder broadcast at ({:.3}, {:.3})",
                    alert.coarse_latitude, alert.coarse_longitude
                );
                incident.log_event("Nearby responders alerted with coarse location");
            }
            Err(e) => {
                warn!("responder broadcast failed: {e}");
                incident.log_event(format!("Responder broadcast failed: {e}"));
            }
        }
    }
}

// ─── Console collaborators (demo binary) ─────────────────────────────────────

/// Log-only notifier used by the demo binary; real transports live behind
/// the same trait on device builds.
pub struct ConsoleNotifier;

#[async_trait]
impl ContactNotifier for ConsoleNotifier {
    async fn notify(
        &self,
        contact: &TrustedContact,
        method: NotifyMethod,
        message: &str,
    ) -> Result<(), NotifyError> {
        info!(
            "[notify] {} <{}> via {:?}: {}",
            contact.name, contact.phone, method, message
        );
        Ok(())
    }
}

pub struct ConsoleDialer;

#[async_trait]
impl EmergencyDialer for ConsoleDialer {
    async fn prepare_call(&self, number: &str) -> Result<(), NotifyError> {
        info!("[dialer] prepared call to {number}");
        Ok(())
    }

    async fn place_call(&self, number: &str) -> Result<(), NotifyError> {
        info!("[dialer] dialing {number}");
        Ok(())
    }
}

pub struct ConsoleBroadcast;

#[async_trait]
impl ResponderBroadcast for ConsoleBroadcast {
    async fn broadcast(&self, alert: &ResponderAlert) -> Result<(), NotifyError> {
        info!(
            "[responders] broadcast at ({:.3}, {:.3})",
            alert.coarse_latitude, alert.coarse_longitude
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingNotifier {
        calls: Mutex<Vec<(String, NotifyMethod)>>,
        fail_ids: HashSet<String>,
    }

    #[async_trait]
    impl ContactNotifier for RecordingNotifier {
        async fn notify(
            &self,
            contact: &TrustedContact,
            method: NotifyMethod,
            _message: &str,
        ) -> Result<(), NotifyError> {
            if self.fail_ids.contains(&contact.id) {
                return Err(NotifyError::Delivery("carrier rejected".into()));
            }
            self.calls
                .lock()
                .unwrap()
                .push((contact.id.clone(), method));
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingDialer {
        prepared: Mutex<Vec<String>>,
        placed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EmergencyDialer for RecordingDialer {
        async fn prepare_call(&self, number: &str) -> Result<(), NotifyError> {
            self.prepared.lock().unwrap().push(number.to_string());
            Ok(())
        }

        async fn place_call(&self, number: &str) -> Result<(), NotifyError> {
            self.placed.lock().unwrap().push(number.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingBroadcast {
        alerts: Mutex<Vec<ResponderAlert>>,
    }

    #[async_trait]
    impl ResponderBroadcast for RecordingBroadcast {
        async fn broadcast(&self, alert: &ResponderAlert) -> Result<(), NotifyError> {
            self.alerts.lock().unwrap().push(alert.clone());
            Ok(())
        }
    }

    fn contact(id: &str, priority: u8, enabled: bool) -> TrustedContact {
        TrustedContact {
            id: id.to_string(),
            name: format!("Contact {id}"),
            phone: "+15550100".to_string(),
            relationship: "friend".to_string(),
            priority,
            methods: vec![NotifyMethod::Sms],
            enabled,
        }
    }

    fn engine_with(
        contacts: Vec<TrustedContact>,
        notifier: Arc<RecordingNotifier>,
        dialer: Arc<RecordingDialer>,
        responders: Arc<RecordingBroadcast>,
    ) -> EscalationEngine {
        EscalationEngine::new(
            EscalationConfig::default(),
            contacts,
            notifier,
            dialer,
            responders,
        )
    }

    #[tokio::test]
    async fn test_escalation_monotonic_and_idempotent() {
        let notifier = Arc::new(RecordingNotifier::default());
        let mut engine = engine_with(
            vec![contact("a", 1, true), contact("b", 2, true)],
            Arc::clone(&notifier),
            Arc::new(RecordingDialer::default()),
            Arc::new(RecordingBroadcast::default()),
        );
        let mut incident = Incident::new();

        engine
            .escalate(&mut incident, EscalationLevel::TrustedContacts)
            .await;
        engine
            .escalate(&mut incident, EscalationLevel::TrustedContacts)
            .await;
        // Downgrade attempt is absorbed too.
        engine.escalate(&mut incident, EscalationLevel::None).await;

        assert_eq!(engine.current_level(), EscalationLevel::TrustedContacts);
        // Each enabled contact notified exactly once.
        let calls = notifier.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, "a");
        assert_eq!(calls[1].0, "b");
    }

    #[tokio::test]
    async fn test_level_jump_performs_cumulative_actions() {
        let notifier = Arc::new(RecordingNotifier::default());
        let dialer = Arc::new(RecordingDialer::default());
        let responders = Arc::new(RecordingBroadcast::default());
        let mut engine = engine_with(
            vec![contact("a", 1, true)],
            Arc::clone(&notifier),
            Arc::clone(&dialer),
            Arc::clone(&responders),
        );
        let mut incident = Incident::new();
        incident.push_location_snapshot(LocationSnapshot {
            timestamp: 1.0,
            latitude: 37.77491,
            longitude: -122.41941,
            accuracy: 5.0,
            speed: 0.0,
        });

        engine
            .escalate(&mut incident, EscalationLevel::NearbyResponders)
            .await;

        assert_eq!(notifier.calls.lock().unwrap().len(), 1);
        assert_eq!(dialer.prepared.lock().unwrap().len(), 1);
        // Call is prepared, never auto-placed.
        assert!(dialer.placed.lock().unwrap().is_empty());
        let alerts = responders.alerts.lock().unwrap();
        assert_eq!(alerts.len(), 1);
        // Coarsened to the 1/200-degree grid.
        assert_eq!(alerts[0].coarse_latitude, 37.775);
        assert_eq!(alerts[0].coarse_longitude, -122.42);
    }

    #[tokio::test]
    async fn test_disabled_contacts_skipped_and_order_by_priority() {
        let notifier = Arc::new(RecordingNotifier::default());
        let mut engine = engine_with(
            vec![
                contact("low", 5, true),
                contact("off", 1, false),
                contact("high", 2, true),
            ],
            Arc::clone(&notifier),
            Arc::new(RecordingDialer::default()),
            Arc::new(RecordingBroadcast::default()),
        );
        let mut incident = Incident::new();
        engine
            .escalate(&mut incident, EscalationLevel::TrustedContacts)
            .await;

        let calls = notifier.calls.lock().unwrap();
        let ids: Vec<&str> = calls.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["high", "low"]);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_block_others() {
        let notifier = Arc::new(RecordingNotifier {
            calls: Mutex::new(Vec::new()),
            fail_ids: HashSet::from(["a".to_string()]),
        });
        let mut engine = engine_with(
            vec![contact("a", 1, true), contact("b", 2, true)],
            Arc::clone(&notifier),
            Arc::new(RecordingDialer::default()),
            Arc::new(RecordingBroadcast::default()),
        );
        let mut incident = Incident::new();
        engine
            .escalate(&mut incident, EscalationLevel::TrustedContacts)
            .await;

        let calls = notifier.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "b");
        // The failure is on the incident record.
        assert!(incident
            .events
            .iter()
            .any(|e| e.description.contains("failed")));
    }

    #[tokio::test]
    async fn test_silent_escalate_leaves_ladder_untouched() {
        let notifier = Arc::new(RecordingNotifier::default());
        let mut engine = engine_with(
            vec![contact("a", 1, true)],
            Arc::clone(&notifier),
            Arc::new(RecordingDialer::default()),
            Arc::new(RecordingBroadcast::default()),
        );
        let mut incident = Incident::new();

        engine.silent_escalate(&mut incident).await;
        assert_eq!(engine.current_level(), EscalationLevel::None);
        assert_eq!(incident.escalation_level, EscalationLevel::None);
        assert_eq!(notifier.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_confirm_places_call_once() {
        let dialer = Arc::new(RecordingDialer::default());
        let mut engine = engine_with(
            vec![],
            Arc::new(RecordingNotifier::default()),
            Arc::clone(&dialer),
            Arc::new(RecordingBroadcast::default()),
        );
        let mut incident = Incident::new();

        // Not prepared yet: confirmation is a no-op.
        engine.confirm_emergency_call(&mut incident).await;
        assert!(dialer.placed.lock().unwrap().is_empty());

        engine
            .escalate(&mut incident, EscalationLevel::EmergencyServices)
            .await;
        engine.confirm_emergency_call(&mut incident).await;
        engine.confirm_emergency_call(&mut incident).await;
        assert_eq!(dialer.placed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reset_clears_state() {
        let notifier = Arc::new(RecordingNotifier::default());
        let mut engine = engine_with(
            vec![contact("a", 1, true)],
            Arc::clone(&notifier),
            Arc::new(RecordingDialer::default()),
            Arc::new(RecordingBroadcast::default()),
        );
        let mut incident = Incident::new();
        engine
            .escalate(&mut incident, EscalationLevel::TrustedContacts)
            .await;
        engine.reset();
        assert_eq!(engine.current_level(), EscalationLevel::None);

        // A fresh incident notifies again after reset.
        let mut next = Incident::new();
        engine
            .escalate(&mut next, EscalationLevel::TrustedContacts)
            .await;
        assert_eq!(notifier.calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_coarsen_coordinate_grid() {
        assert_eq!(coarsen_coordinate(37.77749), 37.775);
        assert_eq!(coarsen_coordinate(-122.4194), -122.42);
        assert_eq!(coarsen_coordinate(0.0), 0.0);
    }
}
