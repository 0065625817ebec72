use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc::Sender;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Duration};

use crate::decision::{
    candidate_actions, parse_decision, CandidateAction, Decision, DecisionAction, HeuristicInputs,
};
use crate::incident::Incident;
use crate::model_client::DecisionModel;
use crate::sensors::SensorFusionEngine;

const SYSTEM_PROMPT: &str = "You are the decision engine of a personal-safety monitor. \
You receive a digest of recent sensor readings for a person in a possible emergency. \
Reply with a single JSON object: {\"action\": one of shareLocation | notifyContacts | \
escalateToServices | captureEvidence | suggestAction | updateStatus | noAction, \
\"certainty\": number 0..1, \"reasoning\": short string, \"suggestedMessage\": optional string}. \
Prefer noAction unless the readings clearly indicate distress.";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CoordinatorState {
    Idle,
    Listening,
    Analyzing,
    Acting,
    WaitingConfirm,
    Error,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptKind {
    Info,
    Decision,
    Candidates,
    Error,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: TranscriptKind,
    pub text: String,
}

/// Typed command emitted by the coordinator and consumed by the session
/// manager, which performs the actual side effect (single-writer rule).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionIntent {
    ShareLocation,
    CaptureEvidence,
    NotifyContacts,
    EscalateToServices,
    Suggest(String),
    UpdateStatus(String),
}

#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    pub analysis_period_secs: u64,
    pub initial_delay_secs: u64,
    pub transcript_cap: usize,
    pub temperature: f32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            analysis_period_secs: 10,
            initial_delay_secs: 2,
            transcript_cap: 200,
            temperature: 0.2,
        }
    }
}

/// Periodically digests recent sensor state, consults the external model,
/// and converts its untrusted text reply into gated actions. Bound to one
/// incident's duration: stopped and discarded when the session ends.
pub struct DecisionCoordinator {
    config: CoordinatorConfig,
    model: Arc<dyn DecisionModel>,
    fusion: Arc<SensorFusionEngine>,
    incident: Arc<AsyncMutex<Option<Incident>>>,
    intent_tx: Sender<SessionIntent>,

    state: Mutex<CoordinatorState>,
    decisions: Mutex<Vec<Decision>>,
    pending: Mutex<Option<Decision>>,
    transcript: Mutex<VecDeque<TranscriptEntry>>,
    in_flight: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
    weak_self: Weak<Self>,
}

impl DecisionCoordinator {
    pub fn new(
        config: CoordinatorConfig,
        model: Arc<dyn DecisionModel>,
        fusion: Arc<SensorFusionEngine>,
        incident: Arc<AsyncMutex<Option<Incident>>>,
        intent_tx: Sender<SessionIntent>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            config,
            model,
            fusion,
            incident,
            intent_tx,
            state: Mutex::new(CoordinatorState::Idle),
            decisions: Mutex::new(Vec::new()),
            pending: Mutex::new(None),
            transcript: Mutex::new(VecDeque::new()),
            in_flight: AtomicBool::new(false),
            task: Mutex::new(None),
            weak_self: weak_self.clone(),
        })
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    pub fn start_coordinating(&self) {
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if task.is_some() {
            return;
        }
        let coordinator = match self.weak_self.upgrade() {
            Some(coordinator) => coordinator,
            None => return,
        };
        self.set_state(CoordinatorState::Listening);
        self.push_transcript(TranscriptKind::Info, "Coordinator started");

        *task = Some(tokio::spawn(async move {
            sleep(Duration::from_secs(coordinator.config.initial_delay_secs)).await;
            coordinator.analyze_once().await;
            let mut ticker = interval(Duration::from_secs(
                coordinator.config.analysis_period_secs,
            ));
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                coordinator.analyze_once().await;
            }
        }));
    }

    /// Stop from any state. The periodic task is aborted before this
    /// returns; no analysis starts afterwards.
    pub fn stop_coordinating(&self) {
        if let Some(task) = self
            .task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
        }
        self.in_flight.store(false, Ordering::SeqCst);
        self.set_state(CoordinatorState::Idle);
    }

    // ── Analysis cycle ───────────────────────────────────────────────────

    /// One listening → analyzing → (acting | waitingConfirm | listening)
    /// pass. Skipped while a previous analysis is still in flight, which
    /// bounds concurrent model calls to one.
    pub async fn analyze_once(&self) {
        if self.current_state() == CoordinatorState::Idle {
            return;
        }
        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!("analysis already in flight, skipping cycle");
            return;
        }
        self.set_state(CoordinatorState::Analyzing);

        let digest = self.build_context_digest().await;
        let result = self
            .model
            .complete(SYSTEM_PROMPT, &digest, self.config.temperature)
            .await;

        match result {
            Err(e) => {
                // Model failures are per-cycle: record and keep listening.
                warn!("model call failed: {e}");
                self.set_state(CoordinatorState::Error);
                self.push_transcript(TranscriptKind::Error, format!("Model call failed: {e}"));
                self.set_state(CoordinatorState::Listening);
            }
            Ok(text) => match parse_decision(&text) {
                Err(e) => {
                    self.set_state(CoordinatorState::Error);
                    self.push_transcript(
                        TranscriptKind::Error,
                        format!("Unparseable model response: {e}"),
                    );
                    self.set_state(CoordinatorState::Listening);
                }
                Ok(decision) => self.apply_decision(decision).await,
            },
        }

        self.in_flight.store(false, Ordering::SeqCst);
    }

    async fn apply_decision(&self, decision: Decision) {
        self.decisions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(decision.clone());
        self.push_transcript(
            TranscriptKind::Decision,
            format!(
                "{:?} (certainty {:.2}): {}",
                decision.action, decision.certainty, decision.reasoning
            ),
        );

        if decision.action == DecisionAction::NoAction {
            self.set_state(CoordinatorState::Listening);
            return;
        }

        if decision.auto_executable() {
            self.set_state(CoordinatorState::Acting);
            self.execute(&decision).await;
            self.set_state(CoordinatorState::Listening);
        } else {
            // Exclusive slot: a new pending decision overwrites, not queues.
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            if pending.is_some() {
                self.push_transcript(TranscriptKind::Info, "Pending decision superseded");
            }
            *pending = Some(decision);
            drop(pending);
            self.set_state(CoordinatorState::WaitingConfirm);
        }
    }

    async fn execute(&self, decision: &Decision) {
        let intent = match decision.action {
            DecisionAction::ShareLocation => Some(SessionIntent::ShareLocation),
            DecisionAction::CaptureEvidence => Some(SessionIntent::CaptureEvidence),
            DecisionAction::NotifyContacts => Some(SessionIntent::NotifyContacts),
            DecisionAction::EscalateToServices => Some(SessionIntent::EscalateToServices),
            DecisionAction::SuggestAction => Some(SessionIntent::Suggest(
                decision
                    .suggested_message
                    .clone()
                    .unwrap_or_else(|| decision.reasoning.clone()),
            )),
            DecisionAction::UpdateStatus => {
                Some(SessionIntent::UpdateStatus(decision.reasoning.clone()))
            }
            DecisionAction::NoAction => None,
        };

        if let Some(intent) = intent {
            if self.intent_tx.send(intent).await.is_err() {
                warn!("intent channel closed, dropping decision execution");
                return;
            }
        }
        self.mark_executed(decision.id);
        info!(
            "executed decision {:?} at certainty {:.2}",
            decision.action, decision.certainty
        );
    }

    fn mark_executed(&self, id: uuid::Uuid) {
        let mut decisions = self.decisions.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(d) = decisions.iter_mut().find(|d| d.id == id) {
            d.executed = true;
        }
    }

    // ── Pending decision ─────────────────────────────────────────────────

    /// User confirmed the pending decision: execute it now.
    pub async fn confirm_pending(&self) -> Option<Decision> {
        let decision = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()?;
        self.push_transcript(
            TranscriptKind::Info,
            format!("User confirmed {:?}", decision.action),
        );
        self.execute(&decision).await;
        self.set_state(CoordinatorState::Listening);
        Some(decision)
    }

    /// User dismissed the pending decision: discard it.
    pub fn dismiss_pending(&self) -> Option<Decision> {
        let decision = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()?;
        self.push_transcript(
            TranscriptKind::Info,
            format!("User dismissed {:?}", decision.action),
        );
        self.set_state(CoordinatorState::Listening);
        Some(decision)
    }

    pub fn pending_decision(&self) -> Option<Decision> {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    // ── Context digest ───────────────────────────────────────────────────

    async fn build_context_digest(&self) -> String {
        let snapshot = self.fusion.generate_snapshot();
        let detections = self.fusion.with_core(|c| c.sound_detections().to_vec());
        let (location_sharing, incident_line) = {
            let incident = self.incident.lock().await;
            match incident.as_ref() {
                Some(i) => (
                    i.live_share.is_some(),
                    format!(
                        "Incident: status {:?}, level {:?}, classification {:?} ({:.2}), elapsed {}s",
                        i.status,
                        i.escalation_level,
                        i.classification,
                        i.confidence,
                        i.elapsed_seconds()
                    ),
                ),
                None => (false, "Incident: none active".to_string()),
            }
        };

        let candidates = candidate_actions(&HeuristicInputs {
            motion: snapshot.motion.as_ref(),
            audio: snapshot.audio.as_ref(),
            detections: &detections,
            speed: snapshot.location.as_ref().map(|l| l.speed),
            location_sharing_active: location_sharing,
        });
        self.push_transcript(TranscriptKind::Candidates, render_candidates(&candidates));

        let mut digest = String::new();
        digest.push_str(&incident_line);
        digest.push('\n');
        match &snapshot.motion {
            Some(m) => digest.push_str(&format!(
                "Motion: {:.2} g, pattern {:?}, fall={}\n",
                m.magnitude, m.pattern, m.fall_detected
            )),
            None => digest.push_str("Motion: unavailable\n"),
        }
        match &snapshot.audio {
            Some(a) => digest.push_str(&format!(
                "Audio: avg {:.0} dB, peak {:.0} dB, voice={}\n",
                a.average_db, a.peak_db, a.voice_detected
            )),
            None => digest.push_str("Audio: unavailable\n"),
        }
        match &snapshot.location {
            Some(l) => digest.push_str(&format!(
                "Location: ({:.5}, {:.5}) ±{:.0} m, speed {:.1} m/s\n",
                l.latitude, l.longitude, l.accuracy, l.speed
            )),
            None => digest.push_str("Location: unavailable\n"),
        }
        if !detections.is_empty() {
            let ranked: Vec<String> = detections
                .iter()
                .map(|d| format!("{} ({:.2})", d.label, d.confidence))
                .collect();
            digest.push_str(&format!("Sounds: {}\n", ranked.join(", ")));
        }
        digest.push_str(&format!("Heuristics: {}\n", render_candidates(&candidates)));
        digest
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub fn current_state(&self) -> CoordinatorState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn decisions(&self) -> Vec<Decision> {
        self.decisions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.transcript
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn set_state(&self, state: CoordinatorState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn push_transcript(&self, kind: TranscriptKind, text: impl Into<String>) {
        let mut transcript = self.transcript.lock().unwrap_or_else(|e| e.into_inner());
        transcript.push_back(TranscriptEntry {
            timestamp: Utc::now(),
            kind,
            text: text.into(),
        });
        while transcript.len() > self.config.transcript_cap {
            transcript.pop_front();
        }
    }
}

fn render_candidates(candidates: &[CandidateAction]) -> String {
    candidates
        .iter()
        .map(|c| format!("{:?} {:.2} ({})", c.action, c.confidence, c.rationale))
        .collect::<Vec<_>>()
        .join("; ")
}
