use anyhow::Result;
use clap::Parser;
use log::info;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

use sentinel_rs::audit::AuditLog;
use sentinel_rs::capture::{CameraSelector, MockCaptureService};
use sentinel_rs::coordinator::CoordinatorConfig;
use sentinel_rs::duress::DuressDetector;
use sentinel_rs::escalation::{
    ConsoleBroadcast, ConsoleDialer, ConsoleNotifier, EscalationConfig, EscalationEngine,
};
use sentinel_rs::live_share::MockLiveShareService;
use sentinel_rs::model_client::{
    DecisionModel, HttpModelClient, ModelClientConfig, ScriptedModel,
};
use sentinel_rs::sensor_fusion::{FusionConfig, FusionCore};
use sentinel_rs::sensors::{
    MockAudioSource, MockLocationSource, MockMotionSource, MonitorConfig, SensorFusionEngine,
    SensorSources,
};
use sentinel_rs::session::{IncidentSessionManager, SessionConfig};
use sentinel_rs::storage::JsonFileStore;
use sentinel_rs::types::{NotifyMethod, TrustedContact};

#[derive(Parser, Debug)]
#[command(name = "sentinel")]
#[command(about = "Personal-safety incident session monitor", long_about = None)]
struct Args {
    /// Session duration in seconds before auto-resolve (0 = run until Ctrl-C)
    #[arg(value_name = "SECONDS", default_value = "30")]
    duration: u64,

    /// Enable the autonomous decision coordinator
    #[arg(long)]
    enable_ai: bool,

    /// External model endpoint (requires --enable-ai; scripted replies when unset)
    #[arg(long)]
    model_endpoint: Option<String>,

    /// Seconds before auto-escalation to trusted contacts
    #[arg(long, default_value = "60")]
    auto_escalate_secs: u64,

    /// Incident storage directory
    #[arg(long, default_value = "sentinel_sessions")]
    output_dir: String,

    /// Trusted contacts JSON file (demo contact when unset)
    #[arg(long)]
    contacts: Option<String>,
}

fn load_contacts(path: Option<&str>) -> Result<Vec<TrustedContact>> {
    match path {
        Some(path) => {
            let json = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&json)?)
        }
        None => Ok(vec![TrustedContact {
            id: "demo-1".to_string(),
            name: "Demo Contact".to_string(),
            phone: "+15550100".to_string(),
            relationship: "friend".to_string(),
            priority: 1,
            methods: vec![NotifyMethod::Sms, NotifyMethod::Push],
            enabled: true,
        }]),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    info!("Sentinel starting");
    info!("  Duration: {} s (0=continuous)", args.duration);
    info!("  Coordinator: {}", args.enable_ai);
    info!("  Output dir: {}", args.output_dir);

    let contacts = load_contacts(args.contacts.as_deref())?;
    let store = Arc::new(JsonFileStore::new(&args.output_dir)?);

    let escalation = EscalationEngine::new(
        EscalationConfig::default(),
        contacts,
        Arc::new(ConsoleNotifier),
        Arc::new(ConsoleDialer),
        Arc::new(ConsoleBroadcast),
    );

    let fusion = Arc::new(SensorFusionEngine::new(
        FusionCore::new(FusionConfig::default()),
        MonitorConfig::default(),
    ));

    let sources = SensorSources {
        motion: Some(Arc::new(MockMotionSource)),
        audio: Some(Arc::new(MockAudioSource)),
        location: Some(Arc::new(MockLocationSource)),
        classifier: None,
    };

    let model: Arc<dyn DecisionModel> = match args.model_endpoint {
        Some(endpoint) => Arc::new(HttpModelClient::new(ModelClientConfig {
            endpoint,
            ..Default::default()
        })),
        None => Arc::new(ScriptedModel::always(
            r#"{"action":"noAction","certainty":0.6,"reasoning":"Readings look calm"}"#,
        )),
    };

    let config = SessionConfig {
        auto_escalation_ms: args.auto_escalate_secs * 1000,
        coordinator_enabled: args.enable_ai,
        capture_camera: CameraSelector::Dual,
        ..Default::default()
    };

    let manager = IncidentSessionManager::new(
        config,
        fusion,
        sources,
        escalation,
        DuressDetector::new("1234", "9999"),
        store,
        Arc::new(MockCaptureService::new()),
        Arc::new(MockLiveShareService::new()),
        Arc::new(AuditLog::default()),
        model,
        CoordinatorConfig::default(),
    );

    let incident_id = manager.start_session().await?;
    println!("Session started, incident {incident_id}");

    let mut elapsed = 0u64;
    loop {
        sleep(Duration::from_secs(2)).await;
        elapsed += 2;

        let status = manager.status().await;
        println!(
            "[{}s] level {:?} | pattern {:?} | coordinator {:?} | pending {:?}",
            status.elapsed_seconds,
            status.escalation_level,
            status.motion_pattern,
            status.coordinator_state,
            status.pending_action,
        );

        if args.duration > 0 && elapsed >= args.duration {
            break;
        }
    }

    let report = manager.resolve_session().await?;
    println!("\n{report}");
    Ok(())
}
