use async_trait::async_trait;
use log::{info, warn};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, Sender};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};

use crate::sensor_fusion::{FusionCore, FusionEvent};
use crate::types::{current_timestamp, LocationFix, MotionSample, SensorSnapshot, SoundDetection};

/// One raw audio buffer from the platform microphone driver.
#[derive(Clone, Debug)]
pub struct AudioBuffer {
    pub timestamp: f64,
    pub samples: Vec<f32>,
}

// ─── Source traits (platform drivers live behind these) ──────────────────────

/// Accelerometer driver. `sample` returns `None` when the hardware is
/// unavailable or permission was denied; the producer loop degrades rather
/// than failing.
#[async_trait]
pub trait MotionSource: Send + Sync {
    async fn sample(&self) -> Option<MotionSample>;
}

#[async_trait]
pub trait AudioSource: Send + Sync {
    async fn next_buffer(&self) -> Option<AudioBuffer>;
}

#[async_trait]
pub trait LocationSource: Send + Sync {
    async fn next_fix(&self) -> Option<LocationFix>;
}

/// On-device sound classification model, consumed as a capability: ranked
/// detections per audio buffer plus a coarse text label.
#[async_trait]
pub trait SoundClassifier: Send + Sync {
    async fn classify(&self, buffer: &AudioBuffer) -> Vec<SoundDetection>;
    fn coarse_label(&self, detections: &[SoundDetection]) -> Option<String> {
        detections.first().map(|d| d.label.clone())
    }
}

// ─── Producer messages ───────────────────────────────────────────────────────

#[derive(Clone, Debug)]
enum SensorMessage {
    Motion(MotionSample),
    Audio(AudioBuffer),
    Location(LocationFix),
}

async fn motion_loop(source: Arc<dyn MotionSource>, tx: Sender<SensorMessage>, period_ms: u64) {
    let mut ticker = interval(Duration::from_millis(period_ms));
    let mut sample_count = 0u64;
    let mut misses = 0u32;

    loop {
        ticker.tick().await;
        match source.sample().await {
            Some(sample) => {
                misses = 0;
                match tx.try_send(SensorMessage::Motion(sample)) {
                    Ok(_) => {
                        sample_count += 1;
                        if sample_count % 500 == 0 {
                            info!("[motion] {} samples", sample_count);
                        }
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        // Channel full, drop this sample
                    }
                }
            }
            None => {
                misses += 1;
                if misses == 50 {
                    warn!("[motion] producer silent, continuing without motion data");
                }
            }
        }
    }
}

async fn audio_loop(source: Arc<dyn AudioSource>, tx: Sender<SensorMessage>, period_ms: u64) {
    let mut ticker = interval(Duration::from_millis(period_ms));
    let mut buffer_count = 0u64;
    let mut misses = 0u32;

    loop {
        ticker.tick().await;
        match source.next_buffer().await {
            Some(buffer) => {
                misses = 0;
                match tx.try_send(SensorMessage::Audio(buffer)) {
                    Ok(_) => {
                        buffer_count += 1;
                        if buffer_count % 100 == 0 {
                            info!("[audio] {} buffers", buffer_count);
                        }
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                    Err(mpsc::error::TrySendError::Full(_)) => {}
                }
            }
            None => {
                misses += 1;
                if misses == 10 {
                    warn!("[audio] producer silent, continuing without audio data");
                }
            }
        }
    }
}

async fn location_loop(source: Arc<dyn LocationSource>, tx: Sender<SensorMessage>, period_ms: u64) {
    let mut ticker = interval(Duration::from_millis(period_ms));
    let mut fix_count = 0u64;
    let mut misses = 0u32;

    loop {
        ticker.tick().await;
        match source.next_fix().await {
            Some(fix) => {
                misses = 0;
                match tx.try_send(SensorMessage::Location(fix)) {
                    Ok(_) => {
                        fix_count += 1;
                        if fix_count % 20 == 0 {
                            info!("[location] {} fixes", fix_count);
                        }
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                    Err(mpsc::error::TrySendError::Full(_)) => {}
                }
            }
            None => {
                misses += 1;
                if misses == 5 {
                    warn!("[location] producer silent, continuing without fixes");
                }
            }
        }
    }
}

// ─── Engine ──────────────────────────────────────────────────────────────────

/// Producer handles for one monitoring run. Each is individually optional:
/// partial sensor capability is a normal operating mode, not an error.
#[derive(Clone, Default)]
pub struct SensorSources {
    pub motion: Option<Arc<dyn MotionSource>>,
    pub audio: Option<Arc<dyn AudioSource>>,
    pub location: Option<Arc<dyn LocationSource>>,
    pub classifier: Option<Arc<dyn SoundClassifier>>,
}

#[derive(Clone, Debug)]
pub struct MonitorConfig {
    pub motion_period_ms: u64,
    pub audio_period_ms: u64,
    pub location_period_ms: u64,
    pub channel_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            motion_period_ms: 20,
            audio_period_ms: 250,
            location_period_ms: 2000,
            channel_capacity: 512,
        }
    }
}

/// Async wrapper around the pure [`FusionCore`]: owns the producer loops
/// and the drain task. Stateless with respect to incident identity.
pub struct SensorFusionEngine {
    core: Arc<Mutex<FusionCore>>,
    config: MonitorConfig,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SensorFusionEngine {
    pub fn new(core: FusionCore, config: MonitorConfig) -> Self {
        Self {
            core: Arc::new(Mutex::new(core)),
            config,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Begin the producer loops for every present source. A missing source
    /// leaves the other producers running; nothing here fails.
    /// Fusion events are forwarded on `event_tx` for the session to consume.
    pub fn start_monitoring(&self, sources: SensorSources, event_tx: Sender<FusionEvent>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if !tasks.is_empty() {
            warn!("start_monitoring called while already monitoring, ignoring");
            return;
        }

        let (tx, mut rx) = mpsc::channel::<SensorMessage>(self.config.channel_capacity);

        if let Some(motion) = sources.motion.clone() {
            tasks.push(tokio::spawn(motion_loop(
                motion,
                tx.clone(),
                self.config.motion_period_ms,
            )));
        } else {
            info!("[motion] no source, producer off");
        }
        if let Some(audio) = sources.audio.clone() {
            tasks.push(tokio::spawn(audio_loop(
                audio,
                tx.clone(),
                self.config.audio_period_ms,
            )));
        } else {
            info!("[audio] no source, producer off");
        }
        if let Some(location) = sources.location.clone() {
            tasks.push(tokio::spawn(location_loop(
                location,
                tx.clone(),
                self.config.location_period_ms,
            )));
        } else {
            info!("[location] no source, producer off");
        }
        drop(tx);

        let core = Arc::clone(&self.core);
        let classifier = sources.classifier.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let events = match message {
                    SensorMessage::Motion(sample) => {
                        let mut core = core.lock().unwrap_or_else(|e| e.into_inner());
                        core.feed_motion(sample)
                    }
                    SensorMessage::Audio(buffer) => {
                        let detections = match classifier.as_ref() {
                            Some(c) => Some(c.classify(&buffer).await),
                            None => None,
                        };
                        let mut core = core.lock().unwrap_or_else(|e| e.into_inner());
                        if let Some(detections) = detections {
                            core.set_sound_detections(detections);
                        }
                        core.feed_audio_buffer(buffer.timestamp, &buffer.samples)
                    }
                    SensorMessage::Location(fix) => {
                        let mut core = core.lock().unwrap_or_else(|e| e.into_inner());
                        core.feed_location(fix)
                    }
                };
                for event in events {
                    if event_tx.send(event).await.is_err() {
                        return;
                    }
                }
            }
        }));
    }

    /// Terminate every producer and clear the in-memory buffers. Snapshots
    /// already copied out remain valid.
    pub fn stop_monitoring(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        for task in tasks.drain(..) {
            task.abort();
        }
        self.core
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn is_monitoring(&self) -> bool {
        !self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
    }

    pub fn generate_snapshot(&self) -> SensorSnapshot {
        self.core
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .generate_snapshot()
    }

    /// Run a closure against the fusion core (snapshot-adjacent queries).
    pub fn with_core<T>(&self, f: impl FnOnce(&FusionCore) -> T) -> T {
        let core = self.core.lock().unwrap_or_else(|e| e.into_inner());
        f(&core)
    }
}

// ─── Mock sources ────────────────────────────────────────────────────────────

/// Low-amplitude jitter, suitable for demo runs without hardware.
pub struct MockMotionSource;

#[async_trait]
impl MotionSource for MockMotionSource {
    async fn sample(&self) -> Option<MotionSample> {
        let t = current_timestamp();
        Some(MotionSample::new(
            t,
            (t * 2.1).sin() * 0.03,
            (t * 1.7).cos() * 0.03,
            (t * 0.9).sin() * 0.02,
        ))
    }
}

pub struct MockAudioSource;

#[async_trait]
impl AudioSource for MockAudioSource {
    async fn next_buffer(&self) -> Option<AudioBuffer> {
        let t = current_timestamp();
        let samples = (0..256)
            .map(|i| ((t + i as f64 * 0.001) * 440.0).sin() as f32 * 0.01)
            .collect();
        Some(AudioBuffer {
            timestamp: t,
            samples,
        })
    }
}

pub struct MockLocationSource;

#[async_trait]
impl LocationSource for MockLocationSource {
    async fn next_fix(&self) -> Option<LocationFix> {
        let t = current_timestamp();
        Some(LocationFix {
            timestamp: t,
            latitude: 37.7749 + (t % 100.0) * 1e-6,
            longitude: -122.4194 + (t % 100.0) * 1e-6,
            accuracy: 8.0,
            speed: 1.2,
        })
    }
}

/// Scripted source that replays a fixed sample sequence, then goes silent.
pub struct ScriptedMotionSource {
    samples: Mutex<std::collections::VecDeque<MotionSample>>,
}

impl ScriptedMotionSource {
    pub fn new(samples: Vec<MotionSample>) -> Self {
        Self {
            samples: Mutex::new(samples.into()),
        }
    }
}

#[async_trait]
impl MotionSource for ScriptedMotionSource {
    async fn sample(&self) -> Option<MotionSample> {
        self.samples
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }
}

/// Classifier stub returning a fixed ranking for every buffer.
pub struct StaticClassifier {
    pub detections: Vec<SoundDetection>,
}

#[async_trait]
impl SoundClassifier for StaticClassifier {
    async fn classify(&self, _buffer: &AudioBuffer) -> Vec<SoundDetection> {
        self.detections.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor_fusion::FusionConfig;
    use tokio::time::sleep;

    fn engine() -> SensorFusionEngine {
        SensorFusionEngine::new(
            FusionCore::new(FusionConfig::default()),
            MonitorConfig {
                motion_period_ms: 5,
                audio_period_ms: 5,
                location_period_ms: 5,
                channel_capacity: 64,
            },
        )
    }

    #[tokio::test]
    async fn test_partial_sources_run() {
        let engine = engine();
        let (event_tx, _event_rx) = mpsc::channel(64);
        // Motion only: audio and location off.
        engine.start_monitoring(
            SensorSources {
                motion: Some(Arc::new(MockMotionSource)),
                ..Default::default()
            },
            event_tx,
        );
        sleep(Duration::from_millis(50)).await;
        let (motion, audio, location) = engine.with_core(|c| c.sample_counts());
        assert!(motion > 0);
        assert_eq!(audio, 0);
        assert_eq!(location, 0);
        engine.stop_monitoring();
    }

    #[tokio::test]
    async fn test_stop_clears_buffers() {
        let engine = engine();
        let (event_tx, _event_rx) = mpsc::channel(64);
        engine.start_monitoring(
            SensorSources {
                motion: Some(Arc::new(MockMotionSource)),
                audio: Some(Arc::new(MockAudioSource)),
                location: Some(Arc::new(MockLocationSource)),
                ..Default::default()
            },
            event_tx,
        );
        sleep(Duration::from_millis(50)).await;
        assert!(engine.is_monitoring());
        let snapshot_before = engine.generate_snapshot();
        assert!(snapshot_before.motion.is_some());

        engine.stop_monitoring();
        assert!(!engine.is_monitoring());
        let snapshot_after = engine.generate_snapshot();
        assert!(snapshot_after.motion.is_none());
        // The pre-stop snapshot copy stays valid.
        assert!(snapshot_before.motion.is_some());
    }

    #[tokio::test]
    async fn test_scripted_fall_emits_event() {
        let engine = engine();
        let (event_tx, mut event_rx) = mpsc::channel(256);

        let mut samples = Vec::new();
        let mut ts = 0.0;
        for _ in 0..15 {
            samples.push(MotionSample::new(ts, 0.05, 0.0, 0.0));
            ts += 0.02;
        }
        samples.push(MotionSample::new(ts, 3.0, 0.0, 0.0));
        ts += 0.02;
        for _ in 0..5 {
            samples.push(MotionSample::new(ts, 0.05, 0.0, 0.0));
            ts += 0.02;
        }

        engine.start_monitoring(
            SensorSources {
                motion: Some(Arc::new(ScriptedMotionSource::new(samples))),
                ..Default::default()
            },
            event_tx,
        );

        let mut saw_fall = false;
        for _ in 0..200 {
            match tokio::time::timeout(Duration::from_millis(20), event_rx.recv()).await {
                Ok(Some(FusionEvent::FallDetected { .. })) => {
                    saw_fall = true;
                    break;
                }
                Ok(Some(_)) => continue,
                _ => continue,
            }
        }
        assert!(saw_fall);
        engine.stop_monitoring();
    }
}
