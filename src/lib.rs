// Sentinel — personal-safety incident session coordinator.
//
// Fuses live motion/audio/location streams, runs a privacy-first
// escalation ladder (trusted contacts → emergency services → nearby
// responders) with a duress branch, and optionally layers an autonomous
// decision coordinator that turns an external model's text replies into
// confidence-gated actions.

pub mod audit;
pub mod capture;
pub mod coordinator;
pub mod decision;
pub mod duress;
pub mod error;
pub mod escalation;
pub mod incident;
pub mod live_share;
pub mod model_client;
pub mod report;
pub mod sensor_fusion;
pub mod sensors;
pub mod session;
pub mod storage;
pub mod types;

pub use coordinator::{CoordinatorState, DecisionCoordinator, SessionIntent};
pub use decision::{Decision, DecisionAction};
pub use error::{Result, SentinelError};
pub use escalation::EscalationEngine;
pub use incident::{EscalationLevel, Incident, IncidentStatus};
pub use sensors::SensorFusionEngine;
pub use session::{IncidentSessionManager, SessionConfig};
