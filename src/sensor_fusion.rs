// sensor_fusion.rs — Pure computation layer for Sentinel
//
// Everything in this module is independent of:
//   - tokio / async runtime
//   - platform sensor drivers and permission flows
//   - persistence, escalation, the decision coordinator
//
// It takes sensor samples in, produces snapshots and events out, so the
// classification logic can be unit-tested with recorded data and the
// platform frontends swapped without touching fusion logic.

use std::collections::VecDeque;

use crate::types::{
    current_timestamp, AudioData, DeviceContext, LocationFix, LocationSnapshot, MotionPattern,
    MotionReading, MotionSample, SensorSnapshot, SoundDetection,
};

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct FusionConfig {
    // ── Buffers ──
    pub motion_buffer_len: usize,
    pub location_buffer_len: usize,

    // ── Motion pattern classification (last N samples, magnitudes in g) ──
    pub pattern_window: usize,
    pub stationary_threshold: f64,
    pub walking_threshold: f64,
    pub running_threshold: f64,
    pub impact_threshold: f64,

    // ── Fall detection (impact followed by stillness) ──
    pub fall_window: usize,
    pub fall_spike_threshold: f64,
    pub fall_still_samples: usize,
    pub fall_still_threshold: f64,

    // ── Audio ──
    pub voice_peak_db: f64,
    pub db_epsilon: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            motion_buffer_len: 120,
            location_buffer_len: 100,
            pattern_window: 10,
            stationary_threshold: 0.1,
            walking_threshold: 0.5,
            running_threshold: 1.5,
            impact_threshold: 2.0,
            fall_window: 20,
            fall_spike_threshold: 2.5,
            fall_still_samples: 5,
            fall_still_threshold: 0.3,
            voice_peak_db: -35.0,
            db_epsilon: 1e-10,
        }
    }
}

// ─── Events ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub enum FusionEvent {
    FallDetected { peak_magnitude: f64, still_mean: f64 },
    PatternChanged { from: MotionPattern, to: MotionPattern },
    VoiceActivity { peak_db: f64 },
    LocationUpdated(LocationSnapshot),
}

// ─── The fusion core ─────────────────────────────────────────────────────────

/// Owns the bounded recent-history buffers and the classification
/// heuristics. Carries no incident identity; cleared between sessions.
pub struct FusionCore {
    config: FusionConfig,

    // Motion
    magnitudes: VecDeque<f64>,
    latest_motion: Option<MotionSample>,
    current_pattern: MotionPattern,
    fall_flagged: bool,

    // Audio (latest reading only, no smoothing across buffers)
    latest_audio: Option<AudioData>,
    latest_detections: Vec<SoundDetection>,

    // Location
    current_fix: Option<LocationFix>,
    location_history: VecDeque<LocationSnapshot>,
    latest_location: Option<LocationSnapshot>,

    // Counters
    motion_samples: u64,
    audio_buffers: u64,
    location_fixes: u64,
}

impl FusionCore {
    pub fn new(config: FusionConfig) -> Self {
        Self {
            magnitudes: VecDeque::with_capacity(config.motion_buffer_len),
            latest_motion: None,
            current_pattern: MotionPattern::Unknown,
            fall_flagged: false,
            latest_audio: None,
            latest_detections: Vec::new(),
            current_fix: None,
            location_history: VecDeque::with_capacity(config.location_buffer_len),
            latest_location: None,
            motion_samples: 0,
            audio_buffers: 0,
            location_fixes: 0,
            config,
        }
    }

    // ── Motion ───────────────────────────────────────────────────────────

    /// Feed one acceleration sample (fixed sampling period upstream).
    pub fn feed_motion(&mut self, sample: MotionSample) -> Vec<FusionEvent> {
        let mut events = Vec::new();

        self.magnitudes.push_back(sample.magnitude());
        while self.magnitudes.len() > self.config.motion_buffer_len {
            self.magnitudes.pop_front();
        }
        self.latest_motion = Some(sample);
        self.motion_samples += 1;

        let previous = self.current_pattern;
        let mut pattern = self.classify_pattern();

        // Fall check runs independently of the mean-based pattern and
        // overrides it when it fires.
        self.fall_flagged = false;
        if let Some((peak, still_mean)) = self.detect_fall() {
            pattern = MotionPattern::Falling;
            self.fall_flagged = true;
            events.push(FusionEvent::FallDetected {
                peak_magnitude: peak,
                still_mean,
            });
        }

        self.current_pattern = pattern;
        if pattern != previous {
            events.push(FusionEvent::PatternChanged {
                from: previous,
                to: pattern,
            });
        }

        events
    }

    /// Mean magnitude over the most recent `pattern_window` samples, mapped
    /// to a discrete pattern by threshold.
    fn classify_pattern(&self) -> MotionPattern {
        if self.magnitudes.is_empty() {
            return MotionPattern::Unknown;
        }
        let window = self
            .magnitudes
            .iter()
            .rev()
            .take(self.config.pattern_window)
            .copied()
            .collect::<Vec<_>>();
        let mean = window.iter().sum::<f64>() / window.len() as f64;

        if mean < self.config.stationary_threshold {
            MotionPattern::Stationary
        } else if mean < self.config.walking_threshold {
            MotionPattern::Walking
        } else if mean < self.config.running_threshold {
            MotionPattern::Running
        } else if mean > self.config.impact_threshold {
            MotionPattern::Impact
        } else {
            MotionPattern::Unknown
        }
    }

    /// Fall = a spike above `fall_spike_threshold` anywhere in the last
    /// `fall_window` samples AND near-stillness over the last
    /// `fall_still_samples` (impact followed by stillness).
    fn detect_fall(&self) -> Option<(f64, f64)> {
        if self.magnitudes.len() < self.config.fall_still_samples {
            return None;
        }
        let window: Vec<f64> = self
            .magnitudes
            .iter()
            .rev()
            .take(self.config.fall_window)
            .copied()
            .collect();
        let peak = window.iter().copied().fold(0.0_f64, f64::max);
        if peak <= self.config.fall_spike_threshold {
            return None;
        }
        let still: Vec<f64> = window
            .iter()
            .take(self.config.fall_still_samples)
            .copied()
            .collect();
        let still_mean = still.iter().sum::<f64>() / still.len() as f64;
        if still_mean < self.config.fall_still_threshold {
            Some((peak, still_mean))
        } else {
            None
        }
    }

    // ── Audio ────────────────────────────────────────────────────────────

    /// Process one raw audio buffer into a dB reading. Voice activity is
    /// flagged when the peak exceeds the configured dB floor.
    pub fn feed_audio_buffer(&mut self, timestamp: f64, samples: &[f32]) -> Vec<FusionEvent> {
        let mut events = Vec::new();

        let (mean_abs, peak_abs) = if samples.is_empty() {
            (0.0, 0.0)
        } else {
            let sum: f64 = samples.iter().map(|s| s.abs() as f64).sum();
            let peak = samples
                .iter()
                .map(|s| s.abs() as f64)
                .fold(0.0_f64, f64::max);
            (sum / samples.len() as f64, peak)
        };

        let eps = self.config.db_epsilon;
        let average_db = 20.0 * (mean_abs + eps).log10();
        let peak_db = 20.0 * (peak_abs + eps).log10();
        let voice_detected = peak_db > self.config.voice_peak_db;

        if voice_detected {
            events.push(FusionEvent::VoiceActivity { peak_db });
        }

        self.latest_audio = Some(AudioData {
            timestamp,
            average_db,
            peak_db,
            voice_detected,
        });
        self.audio_buffers += 1;

        events
    }

    /// Latest ranked detections from the external sound classifier.
    pub fn set_sound_detections(&mut self, detections: Vec<SoundDetection>) {
        self.latest_detections = detections;
    }

    // ── Location ─────────────────────────────────────────────────────────

    pub fn feed_location(&mut self, fix: LocationFix) -> Vec<FusionEvent> {
        let mut events = Vec::new();

        let snapshot = LocationSnapshot::from_fix(&fix);
        let duplicate = self
            .location_history
            .back()
            .map(|last| last.timestamp == snapshot.timestamp)
            .unwrap_or(false);

        self.current_fix = Some(fix);
        self.location_fixes += 1;

        if !duplicate {
            self.location_history.push_back(snapshot.clone());
            while self.location_history.len() > self.config.location_buffer_len {
                self.location_history.pop_front();
            }
            self.latest_location = Some(snapshot.clone());
            events.push(FusionEvent::LocationUpdated(snapshot));
        }

        events
    }

    // ── Snapshotting ─────────────────────────────────────────────────────

    /// Point-in-time fusion of the latest buffered readings. Callable at
    /// any time, including with empty buffers: fields become absent.
    pub fn generate_snapshot(&self) -> SensorSnapshot {
        SensorSnapshot {
            timestamp: current_timestamp(),
            motion: self.latest_motion.as_ref().map(|m| MotionReading {
                timestamp: m.timestamp,
                magnitude: m.magnitude(),
                pattern: self.current_pattern,
                fall_detected: self.fall_flagged,
            }),
            audio: self.latest_audio.clone(),
            location: self.latest_location.clone(),
            device: DeviceContext::sample(),
        }
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub fn current_pattern(&self) -> MotionPattern {
        self.current_pattern
    }

    pub fn fall_flagged(&self) -> bool {
        self.fall_flagged
    }

    pub fn latest_audio(&self) -> Option<&AudioData> {
        self.latest_audio.as_ref()
    }

    pub fn latest_location(&self) -> Option<&LocationSnapshot> {
        self.latest_location.as_ref()
    }

    pub fn sound_detections(&self) -> &[SoundDetection] {
        &self.latest_detections
    }

    pub fn sample_counts(&self) -> (u64, u64, u64) {
        (self.motion_samples, self.audio_buffers, self.location_fixes)
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Drop all buffered readings. Snapshots already copied out stay valid.
    pub fn clear(&mut self) {
        self.magnitudes.clear();
        self.latest_motion = None;
        self.current_pattern = MotionPattern::Unknown;
        self.fall_flagged = false;
        self.latest_audio = None;
        self.latest_detections.clear();
        self.current_fix = None;
        self.location_history.clear();
        self.latest_location = None;
        self.motion_samples = 0;
        self.audio_buffers = 0;
        self.location_fixes = 0;
    }
}
