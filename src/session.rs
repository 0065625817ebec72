use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Duration};
use uuid::Uuid;

use crate::audit::AuditLog;
use crate::capture::{CameraSelector, CaptureService};
use crate::coordinator::{
    CoordinatorConfig, CoordinatorState, DecisionCoordinator, SessionIntent,
};
use crate::decision::Decision;
use crate::duress::DuressDetector;
use crate::error::{Result, SentinelError};
use crate::escalation::EscalationEngine;
use crate::incident::{EscalationLevel, Incident, IncidentClassification, IncidentStatus};
use crate::live_share::{LiveShareOptions, LiveShareService};
use crate::model_client::DecisionModel;
use crate::report::build_report;
use crate::sensor_fusion::FusionEvent;
use crate::sensors::{SensorFusionEngine, SensorSources};
use crate::storage::IncidentStore;
use crate::types::MotionPattern;

#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// One-shot delay before escalating to trusted contacts when the user
    /// has not reacted and the ladder is still at `None`.
    pub auto_escalation_ms: u64,
    pub documentation_period_ms: u64,
    pub elapsed_tick_ms: u64,
    pub coordinator_enabled: bool,
    pub capture_camera: CameraSelector,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_escalation_ms: 60_000,
            documentation_period_ms: 1_000,
            elapsed_tick_ms: 1_000,
            coordinator_enabled: true,
            capture_camera: CameraSelector::Dual,
        }
    }
}

/// Point-in-time session view for status surfaces.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionStatus {
    pub active: bool,
    pub incident_id: Option<Uuid>,
    pub status: Option<IncidentStatus>,
    pub escalation_level: Option<EscalationLevel>,
    pub elapsed_seconds: u64,
    pub motion_pattern: Option<MotionPattern>,
    pub coordinator_state: Option<CoordinatorState>,
    pub pending_action: Option<String>,
}

/// Top-level orchestrator. Owns the current incident exclusively; every
/// mutation funnels through here, serialized on the incident lock, and the
/// incident is persisted after each state change.
pub struct IncidentSessionManager {
    config: SessionConfig,
    incident: Arc<Mutex<Option<Incident>>>,
    fusion: Arc<SensorFusionEngine>,
    sources: SensorSources,
    escalation: Mutex<EscalationEngine>,
    duress: DuressDetector,
    store: Arc<dyn IncidentStore>,
    capture: Arc<dyn CaptureService>,
    live_share: Arc<dyn LiveShareService>,
    audit: Arc<AuditLog>,
    model: Arc<dyn DecisionModel>,
    coordinator_config: CoordinatorConfig,

    coordinator: StdMutex<Option<Arc<DecisionCoordinator>>>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
    elapsed: Arc<AtomicU64>,
    recording_active: Arc<AtomicBool>,
    weak_self: Weak<Self>,
}

impl IncidentSessionManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: SessionConfig,
        fusion: Arc<SensorFusionEngine>,
        sources: SensorSources,
        escalation: EscalationEngine,
        duress: DuressDetector,
        store: Arc<dyn IncidentStore>,
        capture: Arc<dyn CaptureService>,
        live_share: Arc<dyn LiveShareService>,
        audit: Arc<AuditLog>,
        model: Arc<dyn DecisionModel>,
        coordinator_config: CoordinatorConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            config,
            incident: Arc::new(Mutex::new(None)),
            fusion,
            sources,
            escalation: Mutex::new(escalation),
            duress,
            store,
            capture,
            live_share,
            audit,
            model,
            coordinator_config,
            coordinator: StdMutex::new(None),
            tasks: StdMutex::new(Vec::new()),
            elapsed: Arc::new(AtomicU64::new(0)),
            recording_active: Arc::new(AtomicBool::new(false)),
            weak_self: weak_self.clone(),
        })
    }

    // ── Session lifecycle ────────────────────────────────────────────────

    /// Start an emergency session. At most one incident is active at a
    /// time: starting while one is active is a no-op that returns the
    /// existing incident's id.
    pub async fn start_session(&self) -> Result<Uuid> {
        let mut guard = self.incident.lock().await;
        if let Some(existing) = guard.as_ref() {
            if existing.is_active() {
                debug!("start_session ignored, incident {} active", existing.id);
                return Ok(existing.id);
            }
        }

        let mut incident = Incident::new();
        let id = incident.id;
        incident.log_event("Session started");
        self.store.save(&incident).await?;
        *guard = Some(incident);
        drop(guard);

        self.elapsed.store(0, Ordering::SeqCst);
        self.audit.log("session started", Some(id));

        // Sensor producers feed fusion; fusion events feed the session.
        let (fusion_event_tx, fusion_event_rx) = mpsc::channel::<FusionEvent>(256);
        self.fusion
            .start_monitoring(self.sources.clone(), fusion_event_tx);

        let (intent_tx, intent_rx) = mpsc::channel::<SessionIntent>(64);
        self.spawn_session_tasks(fusion_event_rx, intent_rx);

        if self.config.coordinator_enabled {
            let coordinator = DecisionCoordinator::new(
                self.coordinator_config.clone(),
                Arc::clone(&self.model),
                Arc::clone(&self.fusion),
                Arc::clone(&self.incident),
                intent_tx,
            );
            coordinator.start_coordinating();
            *self
                .coordinator
                .lock()
                .unwrap_or_else(|e| e.into_inner()) = Some(coordinator);
        }

        info!("session started, incident {id}");
        Ok(id)
    }

    /// Cancel the session. A matching duress code outwardly cancels but
    /// silently notifies trusted contacts and records a duress audit event.
    pub async fn cancel_session(&self, entered_code: Option<&str>) -> Result<()> {
        let mut guard = self.incident.lock().await;
        let incident = guard
            .as_mut()
            .filter(|i| i.is_active())
            .ok_or(SentinelError::NotActive)?;

        let duress = entered_code
            .map(|code| self.duress.check_duress(code))
            .unwrap_or(false);

        if duress {
            {
                let mut engine = self.escalation.lock().await;
                engine.silent_escalate(incident).await;
            }
            self.audit
                .log("duress cancellation detected", Some(incident.id));
            incident.finalize(IncidentStatus::Duress, "Session cancelled");
        } else {
            incident.finalize(IncidentStatus::Cancelled, "Session cancelled by user");
            self.audit.log("session cancelled", Some(incident.id));
        }

        self.finalize_incident(incident).await;
        drop(guard);

        self.teardown().await;
        Ok(())
    }

    /// Resolve the session (the user is safe) and produce a report.
    pub async fn resolve_session(&self) -> Result<String> {
        let mut guard = self.incident.lock().await;
        let incident = guard
            .as_mut()
            .filter(|i| i.is_active())
            .ok_or(SentinelError::NotActive)?;

        incident.finalize(IncidentStatus::Resolved, "Session resolved by user");
        self.audit.log("session resolved", Some(incident.id));
        self.finalize_incident(incident).await;
        let report = build_report(incident);
        drop(guard);

        self.teardown().await;
        Ok(report)
    }

    /// Flush in-flight capture and sharing into the incident, then persist
    /// a final time. Runs to completion before teardown begins.
    async fn finalize_incident(&self, incident: &mut Incident) {
        if self.recording_active.swap(false, Ordering::SeqCst) {
            let captures = self.capture.stop_recording().await;
            if !captures.is_empty() {
                incident.log_event(format!("Flushed {} capture(s)", captures.len()));
                incident.media_captures.extend(captures);
            }
        }
        if let Some(share) = incident.live_share.take() {
            match self.live_share.stop_session(share).await {
                Ok(ended) => {
                    incident.log_event("Live location share ended");
                    incident.live_share = Some(ended);
                }
                Err(e) => {
                    warn!("live share stop failed: {e}");
                    incident.log_event(format!("Live share stop failed: {e}"));
                }
            }
        }
        if let Err(e) = self.store.save(incident).await {
            warn!("terminal save failed: {e}");
        }
    }

    /// Structural cancellation: abort every session task, stop monitoring
    /// and the coordinator, and reset the escalation ladder. Nothing fires
    /// after this returns.
    async fn teardown(&self) {
        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
        }
        self.fusion.stop_monitoring();
        let coordinator = self
            .coordinator
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(coordinator) = coordinator {
            coordinator.stop_coordinating();
        }
        self.escalation.lock().await.reset();
    }

    // ── Escalation ───────────────────────────────────────────────────────

    /// Escalate the active incident. Safe to call redundantly; the engine
    /// absorbs repeated and out-of-order levels.
    pub async fn escalate(&self, level: EscalationLevel) -> Result<()> {
        self.escalate_with_origin(level, "user request").await
    }

    async fn escalate_with_origin(&self, level: EscalationLevel, origin: &str) -> Result<()> {
        let mut guard = self.incident.lock().await;
        let incident = guard
            .as_mut()
            .filter(|i| i.is_active())
            .ok_or(SentinelError::NotActive)?;

        let mut engine = self.escalation.lock().await;
        let before = engine.current_level();
        engine.escalate(incident, level).await;
        let after = engine.current_level();
        drop(engine);

        if after > before {
            incident.log_event(format!("Escalated to {after:?} ({origin})"));
            self.audit
                .log(format!("escalation to {after:?} ({origin})"), Some(incident.id));
            if let Err(e) = self.store.save(incident).await {
                warn!("save after escalation failed: {e}");
            }
        }
        Ok(())
    }

    /// User confirmed the prepared emergency-services call.
    pub async fn confirm_emergency_call(&self) -> Result<()> {
        let mut guard = self.incident.lock().await;
        let incident = guard
            .as_mut()
            .filter(|i| i.is_active())
            .ok_or(SentinelError::NotActive)?;
        let mut engine = self.escalation.lock().await;
        engine.confirm_emergency_call(incident).await;
        drop(engine);
        self.audit
            .log("emergency call confirmed", Some(incident.id));
        if let Err(e) = self.store.save(incident).await {
            warn!("save after call confirmation failed: {e}");
        }
        Ok(())
    }

    // ── Coordinator passthrough ──────────────────────────────────────────

    pub async fn confirm_pending_decision(&self) -> Option<Decision> {
        let coordinator = self
            .coordinator
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()?;
        coordinator.confirm_pending().await
    }

    pub fn dismiss_pending_decision(&self) -> Option<Decision> {
        let coordinator = self
            .coordinator
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()?;
        coordinator.dismiss_pending()
    }

    // ── Intents (typed coordinator → session commands) ───────────────────

    pub async fn handle_intent(&self, intent: SessionIntent) {
        match intent {
            SessionIntent::ShareLocation => self.start_live_share().await,
            SessionIntent::CaptureEvidence => self.start_evidence_capture().await,
            SessionIntent::NotifyContacts => {
                if let Err(e) = self
                    .escalate_with_origin(EscalationLevel::TrustedContacts, "coordinator")
                    .await
                {
                    debug!("notifyContacts intent ignored: {e}");
                }
            }
            SessionIntent::EscalateToServices => {
                if let Err(e) = self
                    .escalate_with_origin(EscalationLevel::EmergencyServices, "coordinator")
                    .await
                {
                    debug!("escalateToServices intent ignored: {e}");
                }
            }
            SessionIntent::Suggest(message) => {
                let mut guard = self.incident.lock().await;
                if let Some(incident) = guard.as_mut().filter(|i| i.is_active()) {
                    incident.log_event(format!("Suggestion: {message}"));
                    let _ = self.store.save(incident).await;
                }
            }
            SessionIntent::UpdateStatus(note) => {
                let mut guard = self.incident.lock().await;
                if let Some(incident) = guard.as_mut().filter(|i| i.is_active()) {
                    incident.log_event(format!("Status note: {note}"));
                    let _ = self.store.save(incident).await;
                }
            }
        }
    }

    async fn start_live_share(&self) {
        let mut guard = self.incident.lock().await;
        let incident = match guard.as_mut().filter(|i| i.is_active()) {
            Some(i) => i,
            None => return,
        };
        if incident.live_share.is_some() {
            return;
        }
        match self
            .live_share
            .start_session(incident.id, LiveShareOptions::default())
            .await
        {
            Ok(session) => {
                incident.log_event(format!("Live location share started: {}", session.url));
                incident.live_share = Some(session);
                let _ = self.store.save(incident).await;
            }
            Err(e) => {
                warn!("live share start failed: {e}");
                incident.log_event(format!("Live share start failed: {e}"));
                let _ = self.store.save(incident).await;
            }
        }
    }

    async fn start_evidence_capture(&self) {
        if self.recording_active.load(Ordering::SeqCst) {
            return;
        }
        let started = self.capture.start_recording(self.config.capture_camera).await;
        let mut guard = self.incident.lock().await;
        let incident = match guard.as_mut().filter(|i| i.is_active()) {
            Some(i) => i,
            None => return,
        };
        if started {
            self.recording_active.store(true, Ordering::SeqCst);
            incident.log_event("Evidence recording started");
        } else {
            // Camera busy or permission revoked: the session continues.
            incident.log_event("Evidence recording failed to start");
        }
        let _ = self.store.save(incident).await;
    }

    // ── Timers and event consumers ───────────────────────────────────────

    fn spawn_session_tasks(
        &self,
        mut fusion_event_rx: mpsc::Receiver<FusionEvent>,
        mut intent_rx: mpsc::Receiver<SessionIntent>,
    ) {
        let this = match self.weak_self.upgrade() {
            Some(this) => this,
            None => return,
        };
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());

        // Elapsed-time tick.
        let elapsed = Arc::clone(&self.elapsed);
        let tick = self.config.elapsed_tick_ms;
        tasks.push(tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(tick));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                elapsed.fetch_add(1, Ordering::SeqCst);
            }
        }));

        // One-shot auto-escalation.
        let manager = Arc::clone(&this);
        let delay = self.config.auto_escalation_ms;
        tasks.push(tokio::spawn(async move {
            sleep(Duration::from_millis(delay)).await;
            let still_none = {
                let guard = manager.incident.lock().await;
                matches!(
                    guard.as_ref(),
                    Some(i) if i.is_active() && i.escalation_level == EscalationLevel::None
                )
            };
            if still_none {
                info!("auto-escalation timer fired");
                let _ = manager
                    .escalate_with_origin(EscalationLevel::TrustedContacts, "auto-escalation")
                    .await;
            }
        }));

        // Periodic documentation snapshotting.
        let manager = Arc::clone(&this);
        let period = self.config.documentation_period_ms;
        tasks.push(tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(period));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                manager.documentation_tick().await;
            }
        }));

        // Fusion events → incident mutations.
        let manager = Arc::clone(&this);
        tasks.push(tokio::spawn(async move {
            while let Some(event) = fusion_event_rx.recv().await {
                manager.handle_fusion_event(event).await;
            }
        }));

        // Coordinator intents → session actions.
        let manager = Arc::clone(&this);
        tasks.push(tokio::spawn(async move {
            while let Some(intent) = intent_rx.recv().await {
                manager.handle_intent(intent).await;
            }
        }));
    }

    /// One documentation tick: copy the fusion snapshot into the incident,
    /// append a location snapshot when it changed, refresh the live share,
    /// and persist on the same tick.
    async fn documentation_tick(&self) {
        let snapshot = self.fusion.generate_snapshot();
        let mut guard = self.incident.lock().await;
        let incident = match guard.as_mut().filter(|i| i.is_active()) {
            Some(i) => i,
            None => return,
        };

        let audio_level = snapshot.audio.as_ref().map(|a| a.average_db);
        let location = snapshot.location.clone();
        incident.push_sensor_snapshot(snapshot);
        if let Some(location) = location.clone() {
            incident.push_location_snapshot(location);
        }

        if let Some(share) = incident.live_share.clone() {
            match self
                .live_share
                .update_session(&share, location.as_ref(), audio_level)
                .await
            {
                Ok(updated) => incident.live_share = Some(updated),
                Err(e) => debug!("live share refresh failed: {e}"),
            }
        }

        if let Err(e) = self.store.save(incident).await {
            warn!("documentation save failed: {e}");
        }
    }

    async fn handle_fusion_event(&self, event: FusionEvent) {
        match event {
            FusionEvent::FallDetected {
                peak_magnitude,
                still_mean,
            } => {
                let mut guard = self.incident.lock().await;
                if let Some(incident) = guard.as_mut().filter(|i| i.is_active()) {
                    incident.log_event(format!(
                        "Fall detected (peak {peak_magnitude:.2} g, settled at {still_mean:.2} g)"
                    ));
                    if incident.classification == IncidentClassification::Unknown {
                        incident.set_classification(IncidentClassification::Accident, 0.7);
                    }
                    self.audit.log("fall detected", Some(incident.id));
                    let _ = self.store.save(incident).await;
                }
            }
            FusionEvent::PatternChanged { from, to } => {
                debug!("motion pattern {from:?} -> {to:?}");
            }
            FusionEvent::VoiceActivity { .. } | FusionEvent::LocationUpdated(_) => {}
        }
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub async fn current_incident(&self) -> Option<Incident> {
        self.incident.lock().await.clone()
    }

    pub async fn status(&self) -> SessionStatus {
        let guard = self.incident.lock().await;
        let coordinator = self
            .coordinator
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        SessionStatus {
            active: guard.as_ref().map(|i| i.is_active()).unwrap_or(false),
            incident_id: guard.as_ref().map(|i| i.id),
            status: guard.as_ref().map(|i| i.status),
            escalation_level: guard.as_ref().map(|i| i.escalation_level),
            elapsed_seconds: self.elapsed.load(Ordering::SeqCst),
            motion_pattern: guard
                .as_ref()
                .and_then(|i| i.sensor_snapshots.back())
                .and_then(|s| s.motion.as_ref())
                .map(|m| m.pattern),
            coordinator_state: coordinator.as_ref().map(|c| c.current_state()),
            pending_action: coordinator
                .and_then(|c| c.pending_decision())
                .map(|d| format!("{:?}", d.action)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use crate::capture::MockCaptureService;
    use crate::escalation::{
        ConsoleBroadcast, ConsoleDialer, ContactNotifier, EscalationConfig, NotifyError,
    };
    use crate::live_share::MockLiveShareService;
    use crate::model_client::ScriptedModel;
    use crate::sensor_fusion::{FusionConfig, FusionCore};
    use crate::sensors::MonitorConfig;
    use crate::storage::MemoryStore;
    use crate::types::{NotifyMethod, TrustedContact};
    use async_trait::async_trait;

    #[derive(Default)]
    struct CountingNotifier {
        calls: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl ContactNotifier for CountingNotifier {
        async fn notify(
            &self,
            contact: &TrustedContact,
            _method: NotifyMethod,
            _message: &str,
        ) -> std::result::Result<(), NotifyError> {
            self.calls
                .lock()
                .unwrap()
                .push(contact.id.clone());
            Ok(())
        }
    }

    fn contact(id: &str) -> TrustedContact {
        TrustedContact {
            id: id.to_string(),
            name: id.to_string(),
            phone: "+15550100".to_string(),
            relationship: "friend".to_string(),
            priority: 1,
            methods: vec![NotifyMethod::Sms],
            enabled: true,
        }
    }

    struct Harness {
        manager: Arc<IncidentSessionManager>,
        notifier: Arc<CountingNotifier>,
        store: Arc<MemoryStore>,
        capture: Arc<MockCaptureService>,
    }

    fn harness(config: SessionConfig) -> Harness {
        let notifier = Arc::new(CountingNotifier::default());
        let store = Arc::new(MemoryStore::new());
        let capture = Arc::new(MockCaptureService::new());
        let engine = EscalationEngine::new(
            EscalationConfig::default(),
            vec![contact("a")],
            notifier.clone(),
            Arc::new(ConsoleDialer),
            Arc::new(ConsoleBroadcast),
        );
        let fusion = Arc::new(SensorFusionEngine::new(
            FusionCore::new(FusionConfig::default()),
            MonitorConfig::default(),
        ));
        let manager = IncidentSessionManager::new(
            config,
            fusion,
            SensorSources::default(),
            engine,
            DuressDetector::new("1234", "9999"),
            store.clone(),
            capture.clone(),
            Arc::new(MockLiveShareService::new()),
            Arc::new(AuditLog::default()),
            Arc::new(ScriptedModel::always(
                r#"{"action":"noAction","certainty":0.5,"reasoning":"quiet"}"#,
            )),
            CoordinatorConfig::default(),
        );
        Harness {
            manager,
            notifier,
            store,
            capture,
        }
    }

    fn quiet_config() -> SessionConfig {
        SessionConfig {
            auto_escalation_ms: 3_600_000,
            documentation_period_ms: 20,
            elapsed_tick_ms: 1000,
            coordinator_enabled: false,
            capture_camera: CameraSelector::Dual,
        }
    }

    #[tokio::test]
    async fn test_second_start_is_noop() {
        let h = harness(quiet_config());
        let first = h.manager.start_session().await.unwrap();
        let second = h.manager.start_session().await.unwrap();
        assert_eq!(first, second);
        h.manager.cancel_session(None).await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_without_code() {
        let h = harness(quiet_config());
        h.manager.start_session().await.unwrap();
        h.manager.cancel_session(None).await.unwrap();

        let incident = h.manager.current_incident().await.unwrap();
        assert_eq!(incident.status, IncidentStatus::Cancelled);
        assert!(incident.session_end.is_some());
        // No contacts were notified on a quiet cancel.
        assert!(h.notifier.calls.lock().unwrap().is_empty());
        // Terminal state was persisted.
        let stored = h.store.load(incident.id).await.unwrap().unwrap();
        assert_eq!(stored.status, IncidentStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_with_duress_code_silently_notifies() {
        let h = harness(quiet_config());
        h.manager.start_session().await.unwrap();
        h.manager.cancel_session(Some("9999")).await.unwrap();

        let incident = h.manager.current_incident().await.unwrap();
        assert_eq!(incident.status, IncidentStatus::Duress);
        // The ladder did not advance, but contacts were notified.
        assert_eq!(incident.escalation_level, EscalationLevel::None);
        assert_eq!(h.notifier.calls.lock().unwrap().len(), 1);
        // The outward event text is indistinguishable from a quiet cancel.
        assert!(incident
            .events
            .iter()
            .any(|e| e.description == "Session cancelled"));
    }

    #[tokio::test]
    async fn test_cancel_with_safe_code_is_normal_cancel() {
        let h = harness(quiet_config());
        h.manager.start_session().await.unwrap();
        h.manager.cancel_session(Some("1234")).await.unwrap();
        let incident = h.manager.current_incident().await.unwrap();
        assert_eq!(incident.status, IncidentStatus::Cancelled);
        assert!(h.notifier.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_code_falls_through_to_cancel() {
        let h = harness(quiet_config());
        h.manager.start_session().await.unwrap();
        h.manager.cancel_session(Some("0000")).await.unwrap();
        let incident = h.manager.current_incident().await.unwrap();
        assert_eq!(incident.status, IncidentStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_without_session_errors() {
        let h = harness(quiet_config());
        assert!(matches!(
            h.manager.cancel_session(None).await,
            Err(SentinelError::NotActive)
        ));
    }

    #[tokio::test]
    async fn test_resolve_produces_report() {
        let h = harness(quiet_config());
        let id = h.manager.start_session().await.unwrap();
        let report = h.manager.resolve_session().await.unwrap();
        assert!(report.contains(&id.to_string()));
        assert!(report.contains("Resolved"));
    }

    #[tokio::test]
    async fn test_escalate_appends_event_and_persists() {
        let h = harness(quiet_config());
        let id = h.manager.start_session().await.unwrap();
        h.manager
            .escalate(EscalationLevel::TrustedContacts)
            .await
            .unwrap();
        // Redundant call is absorbed.
        h.manager
            .escalate(EscalationLevel::TrustedContacts)
            .await
            .unwrap();

        assert_eq!(h.notifier.calls.lock().unwrap().len(), 1);
        let stored = h.store.load(id).await.unwrap().unwrap();
        assert_eq!(stored.escalation_level, EscalationLevel::TrustedContacts);
        assert!(stored
            .events
            .iter()
            .any(|e| e.description.contains("Escalated to TrustedContacts")));
        h.manager.cancel_session(None).await.unwrap();
    }

    #[tokio::test]
    async fn test_auto_escalation_fires_from_none() {
        let mut config = quiet_config();
        config.auto_escalation_ms = 30;
        let h = harness(config);
        h.manager.start_session().await.unwrap();
        sleep(Duration::from_millis(120)).await;

        let incident = h.manager.current_incident().await.unwrap();
        assert_eq!(incident.escalation_level, EscalationLevel::TrustedContacts);
        assert_eq!(h.notifier.calls.lock().unwrap().len(), 1);
        h.manager.cancel_session(None).await.unwrap();
    }

    #[tokio::test]
    async fn test_auto_escalation_skipped_when_already_escalated() {
        let mut config = quiet_config();
        config.auto_escalation_ms = 60;
        let h = harness(config);
        h.manager.start_session().await.unwrap();
        h.manager
            .escalate(EscalationLevel::EmergencyServices)
            .await
            .unwrap();
        sleep(Duration::from_millis(150)).await;

        // Still at the manually requested level, not re-fired.
        let incident = h.manager.current_incident().await.unwrap();
        assert_eq!(incident.escalation_level, EscalationLevel::EmergencyServices);
        h.manager.cancel_session(None).await.unwrap();
    }

    #[tokio::test]
    async fn test_documentation_tick_appends_snapshots() {
        let h = harness(quiet_config());
        h.manager.start_session().await.unwrap();
        sleep(Duration::from_millis(120)).await;
        let incident = h.manager.current_incident().await.unwrap();
        assert!(!incident.sensor_snapshots.is_empty());
        h.manager.cancel_session(None).await.unwrap();

        // No tick appends after the session stops.
        let count = h
            .manager
            .current_incident()
            .await
            .unwrap()
            .sensor_snapshots
            .len();
        sleep(Duration::from_millis(80)).await;
        let after = h
            .manager
            .current_incident()
            .await
            .unwrap()
            .sensor_snapshots
            .len();
        assert_eq!(count, after);
    }

    #[tokio::test]
    async fn test_capture_intent_and_flush_on_cancel() {
        let h = harness(quiet_config());
        h.manager.start_session().await.unwrap();
        h.manager.handle_intent(SessionIntent::CaptureEvidence).await;
        h.manager.cancel_session(None).await.unwrap();

        let incident = h.manager.current_incident().await.unwrap();
        // Dual-stream capture flushed one capture per physical stream.
        assert_eq!(incident.media_captures.len(), 2);
        assert!(incident
            .events
            .iter()
            .any(|e| e.description.contains("Flushed 2 capture")));
        let _ = h.capture;
    }

    #[tokio::test]
    async fn test_failed_capture_logged_session_continues() {
        let notifier = Arc::new(CountingNotifier::default());
        let store = Arc::new(MemoryStore::new());
        let engine = EscalationEngine::new(
            EscalationConfig::default(),
            vec![],
            notifier,
            Arc::new(ConsoleDialer),
            Arc::new(ConsoleBroadcast),
        );
        let fusion = Arc::new(SensorFusionEngine::new(
            FusionCore::new(FusionConfig::default()),
            MonitorConfig::default(),
        ));
        let manager = IncidentSessionManager::new(
            quiet_config(),
            fusion,
            SensorSources::default(),
            engine,
            DuressDetector::default(),
            store,
            Arc::new(MockCaptureService::failing()),
            Arc::new(MockLiveShareService::new()),
            Arc::new(AuditLog::default()),
            Arc::new(ScriptedModel::always("{}")),
            CoordinatorConfig::default(),
        );
        manager.start_session().await.unwrap();
        manager.handle_intent(SessionIntent::CaptureEvidence).await;

        let incident = manager.current_incident().await.unwrap();
        assert!(incident.is_active());
        assert!(incident
            .events
            .iter()
            .any(|e| e.description.contains("failed to start")));
        manager.cancel_session(None).await.unwrap();
    }

    #[tokio::test]
    async fn test_share_location_intent_starts_and_stops_share() {
        let h = harness(quiet_config());
        h.manager.start_session().await.unwrap();
        h.manager.handle_intent(SessionIntent::ShareLocation).await;
        // Second intent is a no-op while a share is active.
        h.manager.handle_intent(SessionIntent::ShareLocation).await;

        let incident = h.manager.current_incident().await.unwrap();
        assert!(incident.live_share.is_some());

        h.manager.resolve_session().await.unwrap();
        let incident = h.manager.current_incident().await.unwrap();
        assert!(incident
            .events
            .iter()
            .any(|e| e.description.contains("share ended")));
    }

    #[tokio::test]
    async fn test_new_session_after_cancel_notifies_again() {
        let h = harness(quiet_config());
        let first = h.manager.start_session().await.unwrap();
        h.manager
            .escalate(EscalationLevel::TrustedContacts)
            .await
            .unwrap();
        h.manager.cancel_session(None).await.unwrap();

        let second = h.manager.start_session().await.unwrap();
        assert_ne!(first, second);
        h.manager
            .escalate(EscalationLevel::TrustedContacts)
            .await
            .unwrap();
        // Engine state was reset between incidents.
        assert_eq!(h.notifier.calls.lock().unwrap().len(), 2);
        h.manager.cancel_session(None).await.unwrap();
    }

    #[tokio::test]
    async fn test_status_snapshot() {
        let h = harness(quiet_config());
        let status = h.manager.status().await;
        assert!(!status.active);

        let id = h.manager.start_session().await.unwrap();
        let status = h.manager.status().await;
        assert!(status.active);
        assert_eq!(status.incident_id, Some(id));
        assert_eq!(status.escalation_level, Some(EscalationLevel::None));
        h.manager.cancel_session(None).await.unwrap();
    }
}
