use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub event: String,
    pub incident_id: Option<Uuid>,
}

/// Append-only audit trail with a capped retained history (oldest entries
/// evicted first).
pub struct AuditLog {
    entries: Mutex<VecDeque<AuditEntry>>,
    cap: usize,
}

impl AuditLog {
    pub fn new(cap: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            cap,
        }
    }

    pub fn log(&self, event: impl Into<String>, incident_id: Option<Uuid>) {
        let event = event.into();
        info!("[audit] {event}");
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.push_back(AuditEntry {
            timestamp: Utc::now(),
            event,
            incident_id,
        });
        while entries.len() > self.cap {
            entries.pop_front();
        }
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_cap_evicts_oldest() {
        let audit = AuditLog::new(3);
        for i in 0..5 {
            audit.log(format!("event {i}"), None);
        }
        let entries = audit.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].event, "event 2");
        assert_eq!(entries[2].event, "event 4");
    }

    #[test]
    fn test_audit_records_incident_id() {
        let audit = AuditLog::default();
        let id = Uuid::new_v4();
        audit.log("escalated", Some(id));
        assert_eq!(audit.entries()[0].incident_id, Some(id));
    }
}
