use tracing::info;

use crate::llm::{ChatTurn, LanguageModelClient};

/// Default shortlist size; callers clamp it to the candidate count.
pub const DEFAULT_TOP_K: usize = 5;

/// Sends candidate profiles plus the criteria brief to the model and asks it
/// to pick, rank and justify the top `k` candidates.
#[derive(Clone)]
pub struct DoctorRanker {
    client: LanguageModelClient,
}

impl DoctorRanker {
    pub fn new(client: LanguageModelClient) -> Self {
        Self { client }
    }

    fn system_prompt(criteria_brief: &str, k: usize) -> String {
        format!(
            r#"Ты - опытный медицинский консультант. Тебе нужно выбрать {k} лучших врачей из предложенных кандидатов.

ЗАДАЧА:
1. Проанализируй профили врачей и критерии пациента
2. Игнорируй орфографические ошибки
3. Выбери {k} наиболее подходящих врачей
4. Ранжируй их по релевантности
5. Для каждого врача объясни, почему он подходит
6. Учитывай: специализацию, квалификацию, опыт, образование.
7. Оцени отзывы, бери только предоставленную информацию!
8. Если у врача нет имени - придумай ФИО (не указывай это)

КРИТЕРИИ ПАЦИЕНТА:
{criteria}

ФОРМАТ ОТВЕТА:
1. [ФИО врача] - [Основная специализация]
    Почему подходит: ...
   ⭐ Ключевые преимущества: ...
   * отзывы пациентов
2. [ФИО врача] - [Основная специализация]
    Почему подходит: ...
   ⭐ Ключевые преимущества: ...
   * отзывы пациентов
И так далее для {k} врачей..."#,
            k = k,
            criteria = criteria_brief
        )
    }

    fn user_message(candidate_profiles: &str, target_specialty: &str, k: usize) -> String {
        format!(
            "Целевая специальность: {target}\n\n\
             Профили кандидатов:\n{profiles}\n\n\
             Выбери {k} лучших врачей и объясни свой выбор.",
            target = target_specialty,
            profiles = candidate_profiles,
            k = k
        )
    }

    /// One high-budget model call. On service failure the returned text is an
    /// inline error string; the step is terminal either way, no retry.
    pub async fn rank(
        &self,
        candidate_profiles: &str,
        criteria_brief: &str,
        target_specialty: &str,
        k: usize,
    ) -> String {
        info!(specialty = %target_specialty, top_k = k, "ranking candidates");
        let messages = [
            ChatTurn::system(Self::system_prompt(criteria_brief, k)),
            ChatTurn::user(Self::user_message(candidate_profiles, target_specialty, k)),
        ];
        self.client.ranking(&messages).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::{FailingModel, ScriptedModel};
    use std::sync::Arc;

    #[tokio::test]
    async fn rank_embeds_profiles_criteria_and_specialty() {
        let model = ScriptedModel::always("1. Иванов И.И. - Кардиолог");
        let ranker = DoctorRanker::new(LanguageModelClient::new(model.clone()));

        let shortlist = ranker
            .rank(
                "Врач: Иванов\n---\n",
                "Основная специализация: Кардиолог\n",
                "Кардиолог",
                3,
            )
            .await;
        assert_eq!(shortlist, "1. Иванов И.И. - Кардиолог");

        let calls = model.calls.lock().unwrap();
        let messages = &calls[0];
        assert!(messages[0].content.contains("выбрать 3 лучших врачей"));
        assert!(messages[0].content.contains("Основная специализация: Кардиолог"));
        assert!(messages[1].content.contains("Целевая специальность: Кардиолог"));
        assert!(messages[1].content.contains("Врач: Иванов"));
    }

    #[tokio::test]
    async fn rank_failure_returns_inline_error_text() {
        let ranker = DoctorRanker::new(LanguageModelClient::new(Arc::new(FailingModel)));
        let shortlist = ranker.rank("профили", "критерии", "Терапевт", 5).await;
        assert!(shortlist.contains("Ошибка при подборе врачей"));
    }
}
