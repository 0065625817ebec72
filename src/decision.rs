use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;
use uuid::Uuid;

use crate::types::{AudioData, MotionPattern, MotionReading, SoundDetection};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DecisionAction {
    ShareLocation,
    NotifyContacts,
    EscalateToServices,
    CaptureEvidence,
    SuggestAction,
    UpdateStatus,
    NoAction,
}

impl DecisionAction {
    /// Minimum certainty for autonomous execution. Below this the decision
    /// waits for confirmation instead.
    pub fn min_certainty(self) -> f64 {
        match self {
            DecisionAction::EscalateToServices => 0.95,
            DecisionAction::NotifyContacts => 0.80,
            DecisionAction::ShareLocation | DecisionAction::CaptureEvidence => 0.60,
            DecisionAction::SuggestAction
            | DecisionAction::UpdateStatus
            | DecisionAction::NoAction => 0.30,
        }
    }

    /// Actions that always wait for confirmation, regardless of certainty.
    pub fn requires_confirmation(self) -> bool {
        matches!(self, DecisionAction::EscalateToServices)
    }

    fn all() -> [DecisionAction; 7] {
        [
            DecisionAction::ShareLocation,
            DecisionAction::NotifyContacts,
            DecisionAction::EscalateToServices,
            DecisionAction::CaptureEvidence,
            DecisionAction::SuggestAction,
            DecisionAction::UpdateStatus,
            DecisionAction::NoAction,
        ]
    }

    fn canonical_name(self) -> &'static str {
        match self {
            DecisionAction::ShareLocation => "shareLocation",
            DecisionAction::NotifyContacts => "notifyContacts",
            DecisionAction::EscalateToServices => "escalateToServices",
            DecisionAction::CaptureEvidence => "captureEvidence",
            DecisionAction::SuggestAction => "suggestAction",
            DecisionAction::UpdateStatus => "updateStatus",
            DecisionAction::NoAction => "noAction",
        }
    }

    /// Case- and punctuation-insensitive match against the known action
    /// names ("escalate_to_services", "Share Location", ... all resolve).
    pub fn from_loose(name: &str) -> Option<DecisionAction> {
        let normalized = normalize(name);
        if normalized.is_empty() {
            return None;
        }
        Self::all()
            .into_iter()
            .find(|a| normalize(a.canonical_name()) == normalized)
    }
}

fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Immutable record of one coordinator analysis cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub action: DecisionAction,
    pub certainty: f64,
    pub reasoning: String,
    pub suggested_message: Option<String>,
    pub executed: bool,
}

impl Decision {
    pub fn new(
        action: DecisionAction,
        certainty: f64,
        reasoning: impl Into<String>,
        suggested_message: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            action,
            certainty: certainty.clamp(0.0, 1.0),
            reasoning: reasoning.into(),
            suggested_message,
            executed: false,
        }
    }

    /// True when this decision may run without asking the user first.
    pub fn auto_executable(&self) -> bool {
        !self.action.requires_confirmation() && self.certainty >= self.action.min_certainty()
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecisionParseError {
    #[error("No decision candidate found in response")]
    NoCandidate,
}

// ─── Response parsing ────────────────────────────────────────────────────────

/// Extract a [`Decision`] from untrusted model output. The text may wrap a
/// JSON object in prose, fence it in a code block, or include several JSON
/// fragments; the first candidate carrying a numeric `certainty`, a string
/// `reasoning`, and a recognized (or near-recognized) `action` wins.
/// Failure is recoverable: the caller logs it and keeps listening.
pub fn parse_decision(text: &str) -> Result<Decision, DecisionParseError> {
    let mut candidates: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut push = |candidate: &str, candidates: &mut Vec<String>| {
        let trimmed = candidate.trim();
        if !trimmed.is_empty() && seen.insert(trimmed.to_string()) {
            candidates.push(trimmed.to_string());
        }
    };

    // (a) The whole trimmed response, when it is exactly one object.
    let trimmed = text.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        push(trimmed, &mut candidates);
    }

    // (b) Fenced ```json blocks.
    for block in extract_fenced_blocks(text) {
        push(&block, &mut candidates);
    }

    // (c) Balanced-brace substrings as a fallback.
    for span in extract_balanced_braces(text) {
        push(&span, &mut candidates);
    }

    for candidate in candidates {
        if let Some(decision) = try_candidate(&candidate) {
            return Ok(decision);
        }
    }
    Err(DecisionParseError::NoCandidate)
}

fn try_candidate(candidate: &str) -> Option<Decision> {
    let value: serde_json::Value = serde_json::from_str(candidate).ok()?;
    let object = value.as_object()?;

    let certainty = object.get("certainty")?.as_f64()?;
    let reasoning = object.get("reasoning")?.as_str()?.to_string();
    let action = DecisionAction::from_loose(object.get("action")?.as_str()?)?;
    let suggested_message = object
        .get("suggestedMessage")
        .or_else(|| object.get("suggested_message"))
        .or_else(|| object.get("message"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    Some(Decision::new(action, certainty, reasoning, suggested_message))
}

/// Contents of ```json fenced blocks (a bare ``` fence is accepted too).
fn extract_fenced_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find("```") {
        let after_open = &rest[open + 3..];
        let body_start = match after_open.find('\n') {
            // Language tag (or nothing) sits on the fence line.
            Some(newline) if after_open[..newline].trim().len() <= 8 => newline + 1,
            _ => 0,
        };
        let body = &after_open[body_start..];
        match body.find("```") {
            Some(close) => {
                blocks.push(body[..close].to_string());
                rest = &body[close + 3..];
            }
            None => break,
        }
    }
    blocks
}

/// Top-level balanced `{...}` spans, string-literal aware.
fn extract_balanced_braces(text: &str) -> Vec<String> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' if depth > 0 => in_string = true,
            b'{' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            b'}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        spans.push(text[start..=i].to_string());
                    }
                }
            }
            _ => {}
        }
    }
    spans
}

// ─── Sensor-derived candidate actions ────────────────────────────────────────

/// Heuristic, sensor-derived suggestion. Reported for transparency in the
/// coordinator transcript; never executed autonomously.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CandidateAction {
    pub action: DecisionAction,
    pub confidence: f64,
    pub rationale: String,
}

pub struct HeuristicInputs<'a> {
    pub motion: Option<&'a MotionReading>,
    pub audio: Option<&'a AudioData>,
    pub detections: &'a [SoundDetection],
    pub speed: Option<f64>,
    pub location_sharing_active: bool,
}

const LOUD_PEAK_DB: f64 = -15.0;
const ELEVATED_AVERAGE_DB: f64 = -25.0;
const HIGH_SPEED_MS: f64 = 8.0;

/// Map raw sensor signals to candidate actions. When several candidates
/// land on the same action only the highest-confidence one is kept, the
/// reported set is capped at the top 3, and a quiet environment yields a
/// single low-confidence `noAction`.
pub fn candidate_actions(inputs: &HeuristicInputs) -> Vec<CandidateAction> {
    let mut candidates: Vec<CandidateAction> = Vec::new();

    if let Some(motion) = inputs.motion {
        let high_impact = motion.magnitude >= 2.0
            || matches!(
                motion.pattern,
                MotionPattern::Impact | MotionPattern::Falling
            );
        if high_impact {
            candidates.push(CandidateAction {
                action: DecisionAction::CaptureEvidence,
                confidence: 0.75,
                rationale: format!(
                    "High-impact motion ({:.2} g, {:?})",
                    motion.magnitude, motion.pattern
                ),
            });
            if !inputs.location_sharing_active {
                candidates.push(CandidateAction {
                    action: DecisionAction::ShareLocation,
                    confidence: 0.7,
                    rationale: "Impact detected while location sharing is off".to_string(),
                });
            }
            if inputs.speed.map(|s| s > HIGH_SPEED_MS).unwrap_or(false) {
                candidates.push(CandidateAction {
                    action: DecisionAction::NotifyContacts,
                    confidence: 0.8,
                    rationale: "Impact at high speed".to_string(),
                });
            }
        }
    }

    if let Some(audio) = inputs.audio {
        if audio.peak_db > LOUD_PEAK_DB {
            candidates.push(CandidateAction {
                action: DecisionAction::SuggestAction,
                confidence: 0.5,
                rationale: format!("Loud audio peak ({:.0} dB)", audio.peak_db),
            });
        }
        if audio.voice_detected && audio.average_db > ELEVATED_AVERAGE_DB {
            candidates.push(CandidateAction {
                action: DecisionAction::NotifyContacts,
                confidence: 0.6,
                rationale: "Sustained voice activity at elevated level".to_string(),
            });
        }
    }

    for detection in inputs.detections {
        let label = detection.label.to_ascii_lowercase();
        if label.contains("gunshot") || label.contains("explosion") {
            candidates.push(CandidateAction {
                action: DecisionAction::EscalateToServices,
                confidence: detection.confidence.max(0.9),
                rationale: format!("Detected sound class: {}", detection.label),
            });
        } else if label.contains("scream") || label.contains("shouting") || label.contains("alarm")
        {
            candidates.push(CandidateAction {
                action: DecisionAction::NotifyContacts,
                confidence: detection.confidence,
                rationale: format!("Detected sound class: {}", detection.label),
            });
        }
    }

    // Highest confidence wins per action.
    let mut best: Vec<CandidateAction> = Vec::new();
    for candidate in candidates {
        match best.iter_mut().find(|c| c.action == candidate.action) {
            Some(existing) => {
                if candidate.confidence > existing.confidence {
                    *existing = candidate;
                }
            }
            None => best.push(candidate),
        }
    }
    best.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    best.truncate(3);

    if best.is_empty() {
        best.push(CandidateAction {
            action: DecisionAction::NoAction,
            confidence: 0.1,
            rationale: "No notable sensor signal".to_string(),
        });
    }
    best
}
