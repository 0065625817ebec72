use async_trait::async_trait;
use chrono::Utc;
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::{Result, SentinelError};
use crate::incident::LiveShareSession;
use crate::types::LocationSnapshot;

#[derive(Clone, Debug, Default)]
pub struct LiveShareOptions {
    pub include_audio_level: bool,
}

/// Location-share link seam: mint a URL others can watch, refresh it with
/// fresh fixes, and end it when the session finalizes.
#[async_trait]
pub trait LiveShareService: Send + Sync {
    async fn start_session(
        &self,
        incident_id: Uuid,
        options: LiveShareOptions,
    ) -> Result<LiveShareSession>;

    async fn update_session(
        &self,
        session: &LiveShareSession,
        location: Option<&LocationSnapshot>,
        audio_level_db: Option<f64>,
    ) -> Result<LiveShareSession>;

    async fn stop_session(&self, session: LiveShareSession) -> Result<LiveShareSession>;
}

/// In-memory live-share stub: counts updates, mints mock URLs.
#[derive(Default)]
pub struct MockLiveShareService {
    updates: Mutex<u64>,
    active: Mutex<bool>,
}

impl MockLiveShareService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_count(&self) -> u64 {
        *self.updates.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl LiveShareService for MockLiveShareService {
    async fn start_session(
        &self,
        incident_id: Uuid,
        _options: LiveShareOptions,
    ) -> Result<LiveShareSession> {
        *self.active.lock().unwrap_or_else(|e| e.into_inner()) = true;
        let token = Uuid::new_v4().to_string();
        Ok(LiveShareSession {
            url: format!("https://share.invalid/{incident_id}/{token}"),
            token,
            started_at: Utc::now(),
            last_update: Utc::now(),
        })
    }

    async fn update_session(
        &self,
        session: &LiveShareSession,
        _location: Option<&LocationSnapshot>,
        _audio_level_db: Option<f64>,
    ) -> Result<LiveShareSession> {
        if !*self.active.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(SentinelError::LiveShare("session already ended".into()));
        }
        *self.updates.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        let mut updated = session.clone();
        updated.last_update = Utc::now();
        Ok(updated)
    }

    async fn stop_session(&self, session: LiveShareSession) -> Result<LiveShareSession> {
        *self.active.lock().unwrap_or_else(|e| e.into_inner()) = false;
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_share_lifecycle() {
        let service = MockLiveShareService::new();
        let session = service
            .start_session(Uuid::new_v4(), LiveShareOptions::default())
            .await
            .unwrap();
        assert!(session.url.contains(&session.token));

        let updated = service
            .update_session(&session, None, Some(-30.0))
            .await
            .unwrap();
        assert!(updated.last_update >= session.last_update);
        assert_eq!(service.update_count(), 1);

        let ended = service.stop_session(updated).await.unwrap();
        assert!(service.update_session(&ended, None, None).await.is_err());
    }
}
