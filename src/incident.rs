use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

use crate::types::{LocationSnapshot, SensorSnapshot};

/// Most recent entries kept in the per-incident snapshot histories.
pub const SNAPSHOT_HISTORY_CAP: usize = 3600;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Active,
    Cancelled,
    Escalated,
    Resolved,
    Duress,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentClassification {
    Medical,
    Accident,
    Safety,
    Unknown,
}

/// Ordered escalation ladder. Ordering is load-bearing: the ladder is
/// monotonic for the lifetime of one incident.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EscalationLevel {
    None,
    TrustedContacts,
    EmergencyServices,
    NearbyResponders,
}

impl EscalationLevel {
    /// Levels strictly above `self`, in ladder order.
    pub fn levels_above(self) -> impl Iterator<Item = EscalationLevel> {
        use EscalationLevel::*;
        [TrustedContacts, EmergencyServices, NearbyResponders]
            .into_iter()
            .filter(move |l| *l > self)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IncidentEvent {
    pub timestamp: DateTime<Utc>,
    pub description: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureKind {
    Photo,
    Video,
    Audio,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MediaCapture {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub kind: CaptureKind,
    pub uri: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LiveShareSession {
    pub token: String,
    pub url: String,
    pub started_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
}

/// Root aggregate for one emergency session, from trigger to terminal
/// status. `events` is the authoritative append-only audit trail; every
/// state transition appends exactly one descriptive event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Incident {
    pub id: Uuid,
    pub session_start: DateTime<Utc>,
    pub session_end: Option<DateTime<Utc>>,
    pub status: IncidentStatus,
    pub classification: IncidentClassification,
    pub confidence: f64,
    pub escalation_level: EscalationLevel,
    pub events: Vec<IncidentEvent>,
    pub sensor_snapshots: VecDeque<SensorSnapshot>,
    pub location_snapshots: VecDeque<LocationSnapshot>,
    pub media_captures: Vec<MediaCapture>,
    pub live_share: Option<LiveShareSession>,
}

impl Incident {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            session_start: Utc::now(),
            session_end: None,
            status: IncidentStatus::Active,
            classification: IncidentClassification::Unknown,
            confidence: 0.0,
            escalation_level: EscalationLevel::None,
            events: Vec::new(),
            sensor_snapshots: VecDeque::new(),
            location_snapshots: VecDeque::new(),
            media_captures: Vec::new(),
            live_share: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == IncidentStatus::Active || self.status == IncidentStatus::Escalated
    }

    pub fn log_event(&mut self, description: impl Into<String>) {
        self.events.push(IncidentEvent {
            timestamp: Utc::now(),
            description: description.into(),
        });
    }

    /// Raise the escalation level. The ladder never goes down: a level at
    /// or below the current one is ignored and `false` is returned.
    pub fn raise_escalation(&mut self, level: EscalationLevel) -> bool {
        if level <= self.escalation_level {
            return false;
        }
        self.escalation_level = level;
        if self.status == IncidentStatus::Active {
            self.status = IncidentStatus::Escalated;
        }
        true
    }

    pub fn set_classification(&mut self, classification: IncidentClassification, confidence: f64) {
        self.classification = classification;
        self.confidence = confidence.clamp(0.0, 1.0);
    }

    pub fn push_sensor_snapshot(&mut self, snapshot: SensorSnapshot) {
        self.sensor_snapshots.push_back(snapshot);
        while self.sensor_snapshots.len() > SNAPSHOT_HISTORY_CAP {
            self.sensor_snapshots.pop_front();
        }
    }

    /// Append a location snapshot unless its timestamp matches the previous
    /// entry (deduplicates redundant fixes).
    pub fn push_location_snapshot(&mut self, snapshot: LocationSnapshot) -> bool {
        if let Some(last) = self.location_snapshots.back() {
            if last.timestamp == snapshot.timestamp {
                return false;
            }
        }
        self.location_snapshots.push_back(snapshot);
        while self.location_snapshots.len() > SNAPSHOT_HISTORY_CAP {
            self.location_snapshots.pop_front();
        }
        true
    }

    /// Terminal transition: stamps the end time and records the reason.
    pub fn finalize(&mut self, status: IncidentStatus, description: impl Into<String>) {
        self.status = status;
        self.session_end = Some(Utc::now());
        self.log_event(description);
    }

    pub fn elapsed_seconds(&self) -> i64 {
        let end = self.session_end.unwrap_or_else(Utc::now);
        (end - self.session_start).num_seconds().max(0)
    }

    pub fn latest_location(&self) -> Option<&LocationSnapshot> {
        self.location_snapshots.back()
    }
}

impl Default for Incident {
    fn default() -> Self {
        Self::new()
    }
}
