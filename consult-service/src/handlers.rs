use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use consult_flow::{
    ConsultationSession, CriteriaRecord, DEFAULT_SPECIALIST, DEFAULT_TOP_K,
    DialogEvent, IntakeProfile, IntakeSession, MatchSummary, SupplementaryAnswers,
    VoiceConsultation, VoiceCriteriaSurvey, VoiceOutcome, VoiceStatus, compile, refine_messages,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn not_found(id: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: format!("Session {} not found", id),
        }),
    )
}

fn internal_error(e: impl std::fmt::Display) -> ApiError {
    warn!(error = %e, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
}

fn voice_unavailable() -> ApiError {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ErrorResponse {
            error: "Speech service is not configured".to_string(),
        }),
    )
}

pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "consult-service"
    }))
}

// --- Text consultation ---

#[derive(Debug, Deserialize)]
pub struct StartConsultationRequest {
    pub main_symptoms: Option<String>,
    pub age_gender: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StartConsultationResponse {
    pub session_id: String,
    pub question: Option<String>,
    pub turns_taken: usize,
    pub turn_limit: usize,
}

pub async fn start_consultation(
    State(state): State<AppState>,
    Json(request): Json<StartConsultationRequest>,
) -> Result<Json<StartConsultationResponse>, ApiError> {
    let profile = IntakeProfile {
        main_symptoms: request.main_symptoms,
        age_gender: request.age_gender,
    };
    let mut consultation =
        ConsultationSession::new(state.client.clone(), state.config.clone(), &profile);
    consultation.next_question().await;

    let session = IntakeSession::new(consultation);
    let response = StartConsultationResponse {
        session_id: session.id.clone(),
        question: session.consultation.pending_question().map(str::to_string),
        turns_taken: session.consultation.state().turns_taken,
        turn_limit: session.consultation.turn_limit(),
    };
    info!(session_id = %session.id, "consultation started");
    state.storage.save(session).await.map_err(internal_error)?;

    Ok(Json(response))
}

#[derive(Debug, Serialize)]
pub struct ConsultationStatusResponse {
    pub session_id: String,
    pub complete: bool,
    pub turns_taken: usize,
    pub turn_limit: usize,
    pub progress: f64,
    pub question: Option<String>,
    pub specialty: Option<String>,
}

pub async fn consultation_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConsultationStatusResponse>, ApiError> {
    let session = state
        .storage
        .get(&id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| not_found(&id))?;

    Ok(Json(ConsultationStatusResponse {
        session_id: session.id.clone(),
        complete: session.consultation.is_complete(),
        turns_taken: session.consultation.state().turns_taken,
        turn_limit: session.consultation.turn_limit(),
        progress: session.consultation.progress(),
        question: session.consultation.pending_question().map(str::to_string),
        specialty: session.specialty,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SubmitAnswerRequest {
    pub answer: String,
}

#[derive(Debug, Serialize)]
pub struct SubmitAnswerResponse {
    pub complete: bool,
    pub turns_taken: usize,
    pub turn_limit: usize,
    pub question: Option<String>,
    /// Set once the interview completes; also stored on the session as the
    /// specialty for the later criteria and ranking steps.
    pub recommendation: Option<String>,
}

pub async fn submit_answer(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<SubmitAnswerRequest>,
) -> Result<Json<SubmitAnswerResponse>, ApiError> {
    let mut session = state
        .storage
        .get(&id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| not_found(&id))?;

    if !session.consultation.submit_answer(&request.answer) {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "Answer not accepted: no question is pending or the answer is empty"
                    .to_string(),
            }),
        ));
    }

    let mut recommendation = None;
    let mut question = None;
    if session.consultation.is_complete() {
        let specialty = session.consultation.final_recommendation().await;
        info!(session_id = %id, specialty = %specialty, "interview complete");
        session.specialty = Some(specialty.clone());
        recommendation = Some(specialty);
    } else {
        session.consultation.next_question().await;
        question = session.consultation.pending_question().map(str::to_string);
    }

    let response = SubmitAnswerResponse {
        complete: session.consultation.is_complete(),
        turns_taken: session.consultation.state().turns_taken,
        turn_limit: session.consultation.turn_limit(),
        question,
        recommendation,
    };
    state.storage.save(session).await.map_err(internal_error)?;

    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct CompileCriteriaRequest {
    /// Overrides the interview recommendation when set; free text, the
    /// directory filter takes it as-is.
    pub specialty: Option<String>,
    /// When true, run the criteria-aware refinement call and include its
    /// reply in the response.
    #[serde(default)]
    pub refine: bool,
    #[serde(flatten)]
    pub answers: SupplementaryAnswers,
}

#[derive(Debug, Serialize)]
pub struct CompileCriteriaResponse {
    pub specialty: String,
    pub criteria: CriteriaRecord,
    pub brief: String,
    pub refinement: Option<String>,
}

pub async fn compile_criteria(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<CompileCriteriaRequest>,
) -> Result<Json<CompileCriteriaResponse>, ApiError> {
    let mut session = state
        .storage
        .get(&id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| not_found(&id))?;

    let specialty = request
        .specialty
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| session.specialty.clone())
        .unwrap_or_else(|| DEFAULT_SPECIALIST.to_string());

    let (criteria, brief) = compile(&specialty, &request.answers);

    let refinement = if request.refine {
        Some(state.client.interview(&refine_messages(&brief)).await)
    } else {
        None
    };

    session.specialty = Some(specialty.clone());
    session.criteria = Some(criteria.clone());
    state.storage.save(session).await.map_err(internal_error)?;

    Ok(Json(CompileCriteriaResponse {
        specialty,
        criteria,
        brief,
        refinement,
    }))
}

#[derive(Debug, Deserialize, Default)]
pub struct RankDoctorsRequest {
    /// Overrides the stored specialty for this ranking pass only.
    pub specialty: Option<String>,
    pub top_k: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct RankDoctorsResponse {
    /// "ok" when a shortlist was produced, "no_match" when the directory
    /// filter came back empty. The empty case never reaches the model.
    pub status: &'static str,
    pub specialty: String,
    pub matched: usize,
    pub summary: MatchSummary,
    pub shortlist: Option<String>,
}

pub async fn rank_doctors(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<RankDoctorsRequest>,
) -> Result<Json<RankDoctorsResponse>, ApiError> {
    let session = state
        .storage
        .get(&id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| not_found(&id))?;

    let specialty = request
        .specialty
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| session.specialty.clone())
        .unwrap_or_else(|| DEFAULT_SPECIALIST.to_string());
    let brief = match &session.criteria {
        Some(criteria) => criteria.brief(),
        None => compile(&specialty, &SupplementaryAnswers::default()).1,
    };

    let outcome = state.matcher.filter(&state.directory, &specialty);
    if outcome.is_empty() {
        info!(session_id = %id, specialty = %specialty, "no matching doctors");
        return Ok(Json(RankDoctorsResponse {
            status: "no_match",
            specialty,
            matched: 0,
            summary: outcome.summary,
            shortlist: None,
        }));
    }

    let top_k = request
        .top_k
        .unwrap_or(DEFAULT_TOP_K)
        .min(outcome.rows.len())
        .max(1);
    let shortlist = state
        .ranker
        .rank(&outcome.profiles_text, &brief, &specialty, top_k)
        .await;

    Ok(Json(RankDoctorsResponse {
        status: "ok",
        specialty,
        matched: outcome.rows.len(),
        summary: outcome.summary,
        shortlist: Some(shortlist),
    }))
}

// --- Voice consultation ---

#[derive(Debug, Deserialize)]
pub struct StartVoiceRequest {
    pub main_symptoms: Option<String>,
    pub age_gender: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VoiceSessionResponse {
    pub session_id: String,
    pub status: VoiceStatus,
}

pub async fn start_voice(
    State(state): State<AppState>,
    Json(request): Json<StartVoiceRequest>,
) -> Result<Json<VoiceSessionResponse>, ApiError> {
    let channel = state.voice.clone().ok_or_else(voice_unavailable)?;

    let profile = IntakeProfile {
        main_symptoms: request.main_symptoms,
        age_gender: request.age_gender,
    };
    let mut adapter =
        VoiceConsultation::new(state.client.clone(), state.config.clone(), channel);
    adapter.start(profile);

    let id = Uuid::new_v4().to_string();
    let status = adapter.status();
    state.voice_sessions.insert(id.clone(), Arc::new(adapter));
    info!(session_id = %id, "voice consultation started");

    Ok(Json(VoiceSessionResponse {
        session_id: id,
        status,
    }))
}

#[derive(Debug, Serialize)]
pub struct VoiceStatusResponse {
    pub session_id: String,
    pub status: VoiceStatus,
    pub dialog: Vec<DialogEvent>,
    pub outcome: Option<VoiceOutcome>,
}

pub async fn voice_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<VoiceStatusResponse>, ApiError> {
    let adapter = state
        .voice_sessions
        .get(&id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| not_found(&id))?;

    Ok(Json(VoiceStatusResponse {
        session_id: id,
        status: adapter.status(),
        dialog: adapter.dialog_window(),
        outcome: adapter.outcome(),
    }))
}

pub async fn stop_voice(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<VoiceSessionResponse>, ApiError> {
    let adapter = state
        .voice_sessions
        .get(&id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| not_found(&id))?;

    adapter.stop();
    Ok(Json(VoiceSessionResponse {
        session_id: id,
        status: adapter.status(),
    }))
}

// --- Voice criteria survey ---

pub async fn start_survey(
    State(state): State<AppState>,
) -> Result<Json<VoiceSessionResponse>, ApiError> {
    let channel = state.voice.clone().ok_or_else(voice_unavailable)?;

    let mut survey = VoiceCriteriaSurvey::new(channel);
    survey.start();

    let id = Uuid::new_v4().to_string();
    let status = survey.status();
    state.voice_surveys.insert(id.clone(), Arc::new(survey));
    info!(session_id = %id, "voice survey started");

    Ok(Json(VoiceSessionResponse {
        session_id: id,
        status,
    }))
}

#[derive(Debug, Serialize)]
pub struct SurveyStatusResponse {
    pub session_id: String,
    pub status: VoiceStatus,
    pub dialog: Vec<DialogEvent>,
    /// Snapshot of the collected answers; partial while the survey runs.
    pub answers: SupplementaryAnswers,
}

pub async fn survey_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SurveyStatusResponse>, ApiError> {
    let survey = state
        .voice_surveys
        .get(&id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| not_found(&id))?;

    Ok(Json(SurveyStatusResponse {
        session_id: id,
        status: survey.status(),
        dialog: survey.dialog_window(),
        answers: survey.answers(),
    }))
}

pub async fn stop_survey(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<VoiceSessionResponse>, ApiError> {
    let survey = state
        .voice_surveys
        .get(&id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| not_found(&id))?;

    survey.stop();
    Ok(Json(VoiceSessionResponse {
        session_id: id,
        status: survey.status(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_payloads_serialize() {
        let (status, Json(body)) = not_found("abc");
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.error.contains("abc"));

        let (status, _) = voice_unavailable();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn criteria_request_accepts_flattened_form_fields() {
        let request: CompileCriteriaRequest = serde_json::from_value(serde_json::json!({
            "specialty": "Кардиолог",
            "refine": true,
            "patient_type": "взрослый",
            "chronic_diseases": "гипертония"
        }))
        .unwrap();

        assert_eq!(request.specialty.as_deref(), Some("Кардиолог"));
        assert!(request.refine);
        assert_eq!(request.answers.patient_type.as_deref(), Some("взрослый"));
        assert_eq!(
            request.answers.chronic_diseases.as_deref(),
            Some("гипертония")
        );
    }

    #[test]
    fn rank_request_defaults_to_no_explicit_top_k() {
        let request: RankDoctorsRequest = serde_json::from_str("{}").unwrap();
        assert!(request.top_k.is_none());
    }
}
