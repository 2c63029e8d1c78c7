use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::llm::{ChatTurn, CompletionResult, LanguageModelClient};

/// System instruction for the clarifying-question dialog.
const INTERVIEW_SYSTEM_PROMPT: &str = r#"Ты мед консультант диспетчер врач 1 линии.
Тебе нужно определить к какому врачу специалисту направить пациента.
Не здоровайся.
Задай уточняющий вопрос. Один вопрос.
Вопросы понятным языком без спец.терминов.
Задавай только те вопросы, которые помогают в выборе специалиста.
Не озвучивай диагноз."#;

/// System instruction for the final specialist recommendation.
const DISPATCH_SYSTEM_PROMPT: &str = r#"Ты мед консультант диспетчер врач 1 линии.
Тебе нужно определить к какому врачу специалисту направить пациента.
Назови только название специалиста.
Важно! Если состояние критичное, рекомендуй вызвать скорую помощь по номеру телефона 103.
Не озвучивай диагноз."#;

/// Specialist used when the model cannot produce a recommendation at all.
pub const DEFAULT_SPECIALIST: &str = "Терапевт";

/// Seed complaint when the patient supplied nothing up front.
const EMPTY_COMPLAINT: &str = "Пациент обратился за консультацией";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsultationConfig {
    /// Number of question/answer rounds before the interview completes.
    /// Drives both the termination check and progress displays.
    pub turn_limit: usize,
}

impl Default for ConsultationConfig {
    fn default() -> Self {
        Self { turn_limit: 4 }
    }
}

/// Optional free-text seeds the patient can fill in before the interview.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntakeProfile {
    pub main_symptoms: Option<String>,
    pub age_gender: Option<String>,
}

impl IntakeProfile {
    fn filled(field: &Option<String>) -> Option<&str> {
        field.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    /// Initial complaint text fed to the model as the first user message.
    pub fn initial_complaint(&self) -> String {
        let mut parts = Vec::new();
        if let Some(symptoms) = Self::filled(&self.main_symptoms) {
            parts.push(format!("Основные жалобы: {}", symptoms));
        }
        if let Some(age_gender) = Self::filled(&self.age_gender) {
            parts.push(format!("Пациент: {}", age_gender));
        }
        if parts.is_empty() {
            EMPTY_COMPLAINT.to_string()
        } else {
            parts.join(". ")
        }
    }

    /// Human-readable summary of everything collected during the interview.
    pub fn symptoms_text(&self, answers: &[String]) -> String {
        let mut parts = Vec::new();
        if let Some(symptoms) = Self::filled(&self.main_symptoms) {
            parts.push(format!("Основные жалобы: {}", symptoms));
        }
        if let Some(age_gender) = Self::filled(&self.age_gender) {
            parts.push(format!("Данные пациента: {}", age_gender));
        }
        if !answers.is_empty() {
            parts.push(format!("Уточняющая информация: {}", answers.join(". ")));
        }
        parts.join(". ")
    }
}

/// State of one interview, owned exclusively by its session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsultationState {
    /// Exact context sent to the model on every turn, insertion-ordered.
    pub transcript: Vec<ChatTurn>,
    /// Initial complaint plus every answer, ". "-joined, append-only.
    pub patient_info: String,
    /// Raw answers in turn order.
    pub answers: Vec<String>,
    pub turns_taken: usize,
    pub pending_question: Option<String>,
    pub awaiting_answer: bool,
}

impl ConsultationState {
    fn new(initial_complaint: &str) -> Self {
        Self {
            transcript: vec![
                ChatTurn::system(INTERVIEW_SYSTEM_PROMPT),
                ChatTurn::user(initial_complaint),
            ],
            patient_info: initial_complaint.to_string(),
            answers: Vec::new(),
            turns_taken: 0,
            pending_question: None,
            awaiting_answer: false,
        }
    }
}

/// Bounded-turn interview engine.
///
/// Question generation and answer submission strictly alternate: a second
/// `next_question` while an answer is outstanding is rejected, as is a second
/// `submit_answer` without a new question in between.
#[derive(Clone)]
pub struct ConsultationSession {
    client: LanguageModelClient,
    config: ConsultationConfig,
    state: ConsultationState,
}

impl ConsultationSession {
    pub fn new(client: LanguageModelClient, config: ConsultationConfig, profile: &IntakeProfile) -> Self {
        let complaint = profile.initial_complaint();
        info!(complaint = %complaint, "consultation initialized");
        Self {
            client,
            config,
            state: ConsultationState::new(&complaint),
        }
    }

    pub fn state(&self) -> &ConsultationState {
        &self.state
    }

    pub fn turn_limit(&self) -> usize {
        self.config.turn_limit
    }

    pub fn pending_question(&self) -> Option<&str> {
        self.state.pending_question.as_deref()
    }

    pub fn is_complete(&self) -> bool {
        self.state.turns_taken >= self.config.turn_limit
    }

    /// Fraction of the interview completed, driven by the same limit as
    /// [`is_complete`](Self::is_complete).
    pub fn progress(&self) -> f64 {
        self.state.turns_taken as f64 / self.config.turn_limit as f64
    }

    /// Ask the model for the next clarifying question.
    ///
    /// Returns `false` when the call is not valid in the current state
    /// (interview complete, or an answer is still outstanding). A model
    /// outage does not block the flow: the retry prompt becomes the question.
    pub async fn next_question(&mut self) -> bool {
        if self.is_complete() || self.state.awaiting_answer {
            debug!(
                turns = self.state.turns_taken,
                awaiting = self.state.awaiting_answer,
                "next_question rejected"
            );
            return false;
        }

        let question = self.client.interview(&self.state.transcript).await;
        info!(turn = self.state.turns_taken + 1, question = %question, "question generated");
        self.state.pending_question = Some(question);
        self.state.awaiting_answer = true;
        true
    }

    /// Fold the patient's answer back into the interview state.
    ///
    /// Rejected (no-op, `false`) when no question is outstanding or the
    /// answer is blank; blank input is a wait state, not an error.
    pub fn submit_answer(&mut self, answer: &str) -> bool {
        let answer = answer.trim();
        if !self.state.awaiting_answer || answer.is_empty() {
            return false;
        }

        self.state.answers.push(answer.to_string());
        self.state.patient_info.push_str(". ");
        self.state.patient_info.push_str(answer);
        self.state.transcript.push(ChatTurn::user(answer));
        self.state.pending_question = None;
        self.state.awaiting_answer = false;
        self.state.turns_taken += 1;
        info!(
            turn = self.state.turns_taken,
            of = self.config.turn_limit,
            "answer recorded"
        );
        true
    }

    /// One-shot specialist recommendation from the accumulated patient info.
    ///
    /// Deliberately not memoized: every call issues a fresh model request.
    /// The returned text is the model's verbatim reply; no vocabulary is
    /// enforced on it.
    pub async fn final_recommendation_outcome(&self) -> CompletionResult {
        let messages = [
            ChatTurn::system(DISPATCH_SYSTEM_PROMPT),
            ChatTurn::user(self.state.patient_info.clone()),
        ];
        self.client.interview_outcome(&messages).await
    }

    pub async fn final_recommendation(&self) -> String {
        self.final_recommendation_outcome()
            .await
            .reply_or(DEFAULT_SPECIALIST)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::{FailingModel, ScriptedModel};
    use std::sync::Arc;

    fn session_with(model: Arc<ScriptedModel>) -> ConsultationSession {
        ConsultationSession::new(
            LanguageModelClient::new(model),
            ConsultationConfig::default(),
            &IntakeProfile {
                main_symptoms: Some("болит голова".to_string()),
                age_gender: None,
            },
        )
    }

    #[tokio::test]
    async fn completes_exactly_after_turn_limit_answers() {
        let model = ScriptedModel::always("Как давно болит?");
        let mut session = session_with(model);

        for turn in 1..=4 {
            assert!(!session.is_complete());
            assert!(session.next_question().await);
            assert!(session.submit_answer(&format!("ответ {}", turn)));
            assert_eq!(session.state().turns_taken, turn);
        }

        assert!(session.is_complete());
        // Completion is monotonic: no further questions.
        assert!(!session.next_question().await);
    }

    #[tokio::test]
    async fn double_submit_is_rejected_without_state_change() {
        let model = ScriptedModel::always("Есть ли температура?");
        let mut session = session_with(model);

        assert!(session.next_question().await);
        assert!(session.submit_answer("да"));
        let info_before = session.state().patient_info.clone();
        let turns_before = session.state().turns_taken;

        assert!(!session.submit_answer("да"));
        assert_eq!(session.state().patient_info, info_before);
        assert_eq!(session.state().turns_taken, turns_before);
    }

    #[tokio::test]
    async fn submit_without_question_is_rejected() {
        let model = ScriptedModel::always("Вопрос");
        let mut session = session_with(model);
        assert!(!session.submit_answer("ответ без вопроса"));
        assert_eq!(session.state().turns_taken, 0);
    }

    #[tokio::test]
    async fn blank_answer_does_not_advance() {
        let model = ScriptedModel::always("Вопрос");
        let mut session = session_with(model);
        assert!(session.next_question().await);
        assert!(!session.submit_answer("   "));
        assert!(session.state().awaiting_answer);
    }

    #[tokio::test]
    async fn patient_info_is_exact_concatenation() {
        let model = ScriptedModel::always("Вопрос");
        let mut session = ConsultationSession::new(
            LanguageModelClient::new(model),
            ConsultationConfig::default(),
            &IntakeProfile {
                main_symptoms: Some("кашель".to_string()),
                age_gender: None,
            },
        );

        session.next_question().await;
        session.submit_answer("три дня");
        session.next_question().await;
        session.submit_answer("без температуры");

        assert_eq!(
            session.state().patient_info,
            "Основные жалобы: кашель. три дня. без температуры"
        );
    }

    #[tokio::test]
    async fn second_question_rejected_while_awaiting_answer() {
        let model = ScriptedModel::always("Вопрос");
        let mut session = session_with(model.clone());

        assert!(session.next_question().await);
        let calls = model.call_count();
        assert!(!session.next_question().await);
        assert_eq!(model.call_count(), calls);
    }

    #[tokio::test]
    async fn model_outage_surfaces_retry_prompt_as_question() {
        let mut session = ConsultationSession::new(
            LanguageModelClient::new(Arc::new(FailingModel)),
            ConsultationConfig::default(),
            &IntakeProfile::default(),
        );
        assert!(session.next_question().await);
        assert_eq!(
            session.pending_question(),
            Some(crate::llm::QUESTION_FALLBACK)
        );
    }

    #[tokio::test]
    async fn final_recommendation_is_not_memoized() {
        let model = ScriptedModel::always("Невролог");
        let session = session_with(model.clone());

        let first = session.final_recommendation().await;
        let second = session.final_recommendation().await;
        assert_eq!(first, "Невролог");
        assert_eq!(second, "Невролог");
        assert_eq!(model.call_count(), 2);
    }

    #[tokio::test]
    async fn empty_profile_uses_default_complaint() {
        let profile = IntakeProfile::default();
        assert_eq!(profile.initial_complaint(), "Пациент обратился за консультацией");
    }

    #[test]
    fn symptoms_text_joins_all_parts() {
        let profile = IntakeProfile {
            main_symptoms: Some("боль в груди".to_string()),
            age_gender: Some("45 лет, мужчина".to_string()),
        };
        let answers = vec!["при нагрузке".to_string(), "неделю".to_string()];
        assert_eq!(
            profile.symptoms_text(&answers),
            "Основные жалобы: боль в груди. Данные пациента: 45 лет, мужчина. \
             Уточняющая информация: при нагрузке. неделю"
        );
    }
}
