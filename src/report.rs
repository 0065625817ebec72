use crate::incident::Incident;

/// Plain-text summary produced when a session is resolved.
pub fn build_report(incident: &Incident) -> String {
    let mut report = String::new();
    report.push_str("=== Incident Report ===\n");
    report.push_str(&format!("Incident: {}\n", incident.id));
    report.push_str(&format!(
        "Started:  {}\n",
        incident.session_start.to_rfc3339()
    ));
    if let Some(end) = incident.session_end {
        report.push_str(&format!("Ended:    {}\n", end.to_rfc3339()));
    }
    report.push_str(&format!(
        "Duration: {} s\n",
        incident.elapsed_seconds()
    ));
    report.push_str(&format!("Status:   {:?}\n", incident.status));
    report.push_str(&format!(
        "Class:    {:?} (confidence {:.2})\n",
        incident.classification, incident.confidence
    ));
    report.push_str(&format!(
        "Highest escalation: {:?}\n",
        incident.escalation_level
    ));
    report.push_str(&format!(
        "Snapshots: {} sensor, {} location\n",
        incident.sensor_snapshots.len(),
        incident.location_snapshots.len()
    ));
    if !incident.media_captures.is_empty() {
        report.push_str(&format!("Captures:  {}\n", incident.media_captures.len()));
        for capture in &incident.media_captures {
            report.push_str(&format!("  - {:?} {}\n", capture.kind, capture.uri));
        }
    }
    report.push_str(&format!("Events ({}):\n", incident.events.len()));
    for event in &incident.events {
        report.push_str(&format!(
            "  [{}] {}\n",
            event.timestamp.format("%H:%M:%S"),
            event.description
        ));
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incident::{EscalationLevel, IncidentStatus};

    #[test]
    fn test_report_contains_key_fields() {
        let mut incident = Incident::new();
        incident.log_event("Session started");
        incident.raise_escalation(EscalationLevel::TrustedContacts);
        incident.finalize(IncidentStatus::Resolved, "Session resolved");

        let report = build_report(&incident);
        assert!(report.contains(&incident.id.to_string()));
        assert!(report.contains("Resolved"));
        assert!(report.contains("TrustedContacts"));
        assert!(report.contains("Session started"));
        assert!(report.contains("Session resolved"));
    }
}
