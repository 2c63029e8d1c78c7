mod handlers;
mod recorder;

use std::sync::Arc;

use axum::{
    Router,
    http::{HeaderValue, Request},
    middleware::{Next, from_fn},
    routing::{get, post},
};
use consult_flow::{
    CandidateMatcher, ConsultationConfig, DoctorDirectory, DoctorRanker, InMemorySessionStorage,
    LanguageModelClient, SessionStorage, SpeechKitVoice, VoiceChannel, VoiceConsultation,
    VoiceCriteriaSurvey,
};
use dashmap::DashMap;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{Instrument, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::recorder::ClipDropRecorder;

#[derive(Clone)]
pub struct AppState {
    pub client: LanguageModelClient,
    pub config: ConsultationConfig,
    pub storage: Arc<dyn SessionStorage>,
    pub directory: Arc<DoctorDirectory>,
    pub matcher: Arc<CandidateMatcher>,
    pub ranker: DoctorRanker,
    /// None when the speech service is not configured; voice endpoints then
    /// answer 503 and the text flow stays fully available.
    pub voice: Option<Arc<dyn VoiceChannel>>,
    pub voice_sessions: Arc<DashMap<String, Arc<VoiceConsultation>>>,
    pub voice_surveys: Arc<DashMap<String, Arc<VoiceCriteriaSurvey>>>,
}

/// Initialize structured tracing based on environment variables
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "consult_service=debug,consult_flow=debug,tower_http=debug".into());

    match log_format.as_str() {
        "pretty" => {
            // Human-readable logging for development
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        _ => {
            // Structured JSON logging for production
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_level(true),
                )
                .init();
        }
    }
}

/// Middleware to add correlation ID to all requests
async fn correlation_id_middleware(
    mut request: Request<axum::body::Body>,
    next: Next,
) -> axum::response::Response {
    let correlation_id = Uuid::new_v4().to_string();

    request.headers_mut().insert(
        "x-correlation-id",
        HeaderValue::from_str(&correlation_id).unwrap(),
    );

    let span = tracing::info_span!("http_request", correlation_id = %correlation_id);
    next.run(request).instrument(span).await
}

fn build_voice_channel() -> Option<Arc<dyn VoiceChannel>> {
    let drop_dir =
        std::env::var("AUDIO_DROP_DIR").unwrap_or_else(|_| "audio/dialog_answers".to_string());
    match SpeechKitVoice::from_env(Arc::new(ClipDropRecorder::new(drop_dir))) {
        Ok(channel) => {
            info!("speech service configured, voice endpoints enabled");
            Some(Arc::new(channel))
        }
        Err(e) => {
            warn!(error = %e, "speech service not configured, voice endpoints disabled");
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Starting consultation service");

    // Required for every LLM-backed step (interview, recommendation, ranking)
    if std::env::var("OPENROUTER_API_KEY").is_err() {
        error!("OPENROUTER_API_KEY not set");
        std::process::exit(1);
    }
    let client = LanguageModelClient::from_env()?;

    // Doctor directory: loaded once, read-only afterwards. An unreadable
    // file leaves the ranking step permanently in the "no match" outcome,
    // so treat it as fatal.
    let csv_path = std::env::var("DOCTORS_CSV").unwrap_or_else(|_| "all_doctors.csv".to_string());
    let directory = match DoctorDirectory::load_csv(&csv_path) {
        Ok(directory) => directory,
        Err(e) => {
            error!(path = %csv_path, error = %e, "failed to load doctor directory");
            std::process::exit(1);
        }
    };
    info!(path = %csv_path, doctors = directory.len(), "doctor directory ready");

    let state = AppState {
        ranker: DoctorRanker::new(client.clone()),
        client,
        config: ConsultationConfig::default(),
        storage: Arc::new(InMemorySessionStorage::new()),
        directory: Arc::new(directory),
        matcher: Arc::new(CandidateMatcher::new()),
        voice: build_voice_channel(),
        voice_sessions: Arc::new(DashMap::new()),
        voice_surveys: Arc::new(DashMap::new()),
    };

    let app = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/consultation/start", post(handlers::start_consultation))
        .route("/consultation/{id}", get(handlers::consultation_status))
        .route("/consultation/{id}/answer", post(handlers::submit_answer))
        .route("/consultation/{id}/criteria", post(handlers::compile_criteria))
        .route("/consultation/{id}/rank", post(handlers::rank_doctors))
        .route("/voice/start", post(handlers::start_voice))
        .route("/voice/{id}", get(handlers::voice_status))
        .route("/voice/{id}/stop", post(handlers::stop_voice))
        .route("/voice-survey/start", post(handlers::start_survey))
        .route("/voice-survey/{id}", get(handlers::survey_status))
        .route("/voice-survey/{id}/stop", post(handlers::stop_survey))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(from_fn(correlation_id_middleware)),
        );

    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
    info!("Server running on http://0.0.0.0:3000");

    info!("Available endpoints:");
    info!("  GET  /health                        - Health check");
    info!("  POST /consultation/start            - Begin the symptom interview");
    info!("  POST /consultation/{{id}}/answer      - Submit one interview answer");
    info!("  GET  /consultation/{{id}}             - Interview progress");
    info!("  POST /consultation/{{id}}/criteria    - Compile search criteria");
    info!("  POST /consultation/{{id}}/rank        - Filter and rank doctors");
    info!("  POST /voice/start                   - Begin a voice interview");
    info!("  GET  /voice/{{id}}                    - Voice interview status");
    info!("  POST /voice/{{id}}/stop               - Cancel a voice interview");

    axum::serve(listener, app).await?;

    Ok(())
}
