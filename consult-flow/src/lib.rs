pub mod consultation;
pub mod criteria;
pub mod directory;
pub mod error;
pub mod llm;
pub mod matcher;
pub mod ranker;
pub mod session;
pub mod voice;

// Re-export commonly used types
pub use consultation::{
    ConsultationConfig, ConsultationSession, ConsultationState, DEFAULT_SPECIALIST, IntakeProfile,
};
pub use criteria::{compile, refine_messages, CriteriaRecord, SupplementaryAnswers, UNSPECIFIED};
pub use directory::{DoctorDirectory, DoctorRecord};
pub use error::{ConsultError, Result};
pub use llm::{ChatCompletion, ChatTurn, CompletionResult, LanguageModelClient, Role};
pub use matcher::{CandidateMatcher, MatchOutcome, MatchSummary};
pub use ranker::{DoctorRanker, DEFAULT_TOP_K};
pub use session::{InMemorySessionStorage, IntakeSession, SessionStorage};
pub use voice::{
    AudioClip, AudioRecorder, DialogEvent, SpeechKitVoice, VoiceChannel, VoiceConsultation,
    VoiceCriteriaSurvey, VoiceOutcome, VoiceStatus,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedModel;

    /// Full text pipeline: interview → recommendation → criteria →
    /// candidate filter → ranking.
    #[tokio::test]
    async fn full_intake_pipeline() {
        let model = ScriptedModel::with_default(
            vec![
                Some("Как давно болит?"),
                Some("Боль острая или тупая?"),
                Some("Есть ли тошнота?"),
                Some("Принимали ли обезболивающее?"),
                Some("Кардиолог"),
                Some("1. Петрова А.А. - Кардиолог\nПочему подходит: профильный опыт."),
            ],
            "ok",
        );
        let client = LanguageModelClient::new(model);

        // Interview: four question/answer rounds.
        let mut session = ConsultationSession::new(
            client.clone(),
            ConsultationConfig::default(),
            &IntakeProfile {
                main_symptoms: Some("боль в груди".to_string()),
                age_gender: Some("52 года, женщина".to_string()),
            },
        );
        for answer in ["два дня", "острая", "нет", "нет"] {
            assert!(session.next_question().await);
            assert!(session.submit_answer(answer));
        }
        assert!(session.is_complete());

        let specialty = session.final_recommendation().await;
        assert_eq!(specialty, "Кардиолог");

        // Criteria from the supplementary form.
        let answers = SupplementaryAnswers {
            patient_type: Some("взрослый".to_string()),
            appointment_type: Some("первичный".to_string()),
            ..Default::default()
        };
        let (_, brief) = compile(&specialty, &answers);

        // Candidate filter over the directory.
        let directory = DoctorDirectory::from_records(vec![
            DoctorRecord {
                name: Some("Петрова А.А.".to_string()),
                spec: Some("Кардиолог".to_string()),
                ..Default::default()
            },
            DoctorRecord {
                name: Some("Иванов Б.Б.".to_string()),
                spec: Some("Дерматолог".to_string()),
                ..Default::default()
            },
        ]);
        let outcome = CandidateMatcher::new().filter(&directory, &specialty);
        assert_eq!(outcome.rows.len(), 1);

        // Ranking over the shortlisted profiles.
        let ranker = DoctorRanker::new(client);
        let shortlist = ranker
            .rank(&outcome.profiles_text, &brief, &specialty, 1)
            .await;
        assert!(shortlist.contains("Петрова А.А."));
    }
}
