use async_trait::async_trait;
use log::warn;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::{Result, SentinelError};
use crate::incident::Incident;

/// Persistence seam for incident records. Concurrent saves of the same id
/// are last-write-wins on the full record.
#[async_trait]
pub trait IncidentStore: Send + Sync {
    async fn save(&self, incident: &Incident) -> Result<()>;
    async fn load(&self, id: Uuid) -> Result<Option<Incident>>;
    /// All stored incidents, newest session first.
    async fn load_all(&self) -> Result<Vec<Incident>>;
    async fn delete(&self, id: Uuid) -> Result<()>;
}

// ─── JSON file store ─────────────────────────────────────────────────────────

/// One pretty-printed JSON file per incident under a session directory.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| SentinelError::Storage(e.to_string()))?;
        Ok(Self { dir })
    }

    fn path_for(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("incident_{id}.json"))
    }
}

#[async_trait]
impl IncidentStore for JsonFileStore {
    async fn save(&self, incident: &Incident) -> Result<()> {
        let json = serde_json::to_string_pretty(incident)
            .map_err(|e| SentinelError::Storage(e.to_string()))?;
        fs::write(self.path_for(incident.id), json)
            .map_err(|e| SentinelError::Storage(e.to_string()))
    }

    async fn load(&self, id: Uuid) -> Result<Option<Incident>> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(path).map_err(|e| SentinelError::Storage(e.to_string()))?;
        let incident =
            serde_json::from_str(&json).map_err(|e| SentinelError::Storage(e.to_string()))?;
        Ok(Some(incident))
    }

    async fn load_all(&self) -> Result<Vec<Incident>> {
        let entries = fs::read_dir(&self.dir).map_err(|e| SentinelError::Storage(e.to_string()))?;
        let mut incidents = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read_to_string(&path) {
                Ok(json) => match serde_json::from_str::<Incident>(&json) {
                    Ok(incident) => incidents.push(incident),
                    Err(e) => warn!("skipping unreadable incident file {:?}: {e}", path),
                },
                Err(e) => warn!("skipping incident file {:?}: {e}", path),
            }
        }
        incidents.sort_by(|a, b| b.session_start.cmp(&a.session_start));
        Ok(incidents)
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let path = self.path_for(id);
        if path.exists() {
            fs::remove_file(path).map_err(|e| SentinelError::Storage(e.to_string()))?;
        }
        Ok(())
    }
}

// ─── In-memory store ─────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryStore {
    incidents: Mutex<HashMap<Uuid, Incident>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_count(&self) -> usize {
        self.incidents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

#[async_trait]
impl IncidentStore for MemoryStore {
    async fn save(&self, incident: &Incident) -> Result<()> {
        self.incidents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(incident.id, incident.clone());
        Ok(())
    }

    async fn load(&self, id: Uuid) -> Result<Option<Incident>> {
        Ok(self
            .incidents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned())
    }

    async fn load_all(&self) -> Result<Vec<Incident>> {
        let mut incidents: Vec<Incident> = self
            .incidents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        incidents.sort_by(|a, b| b.session_start.cmp(&a.session_start));
        Ok(incidents)
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.incidents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incident::IncidentStatus;

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        let mut incident = Incident::new();
        incident.log_event("started");
        store.save(&incident).await.unwrap();

        let loaded = store.load(incident.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, incident.id);
        assert_eq!(loaded.events.len(), 1);

        // Last write wins on the full record.
        incident.finalize(IncidentStatus::Resolved, "done");
        store.save(&incident).await.unwrap();
        let loaded = store.load(incident.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, IncidentStatus::Resolved);
        assert_eq!(store.save_count(), 1);

        store.delete(incident.id).await.unwrap();
        assert!(store.load(incident.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_all_sorted_newest_first() {
        let store = MemoryStore::new();
        let older = Incident::new();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let newer = Incident::new();
        store.save(&older).await.unwrap();
        store.save(&newer).await.unwrap();

        let all = store.load_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, newer.id);
        assert_eq!(all[1].id, older.id);
    }

    #[tokio::test]
    async fn test_json_file_store_round_trip() {
        let dir = std::env::temp_dir().join(format!("sentinel_store_{}", Uuid::new_v4()));
        let store = JsonFileStore::new(&dir).unwrap();

        let incident = Incident::new();
        store.save(&incident).await.unwrap();
        let loaded = store.load(incident.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, incident.id);

        assert!(store.load(Uuid::new_v4()).await.unwrap().is_none());
        assert_eq!(store.load_all().await.unwrap().len(), 1);

        store.delete(incident.id).await.unwrap();
        assert!(store.load_all().await.unwrap().is_empty());
        let _ = fs::remove_dir_all(dir);
    }
}
