use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::consultation::ConsultationSession;
use crate::criteria::CriteriaRecord;
use crate::error::Result;

/// One intake flow as seen by the presentation layer: the interview plus the
/// artifacts of the later steps. The consultation state inside is owned
/// exclusively by this record; callers load, mutate and save it back.
#[derive(Clone)]
pub struct IntakeSession {
    pub id: String,
    pub consultation: ConsultationSession,
    /// Specialty driving the candidate filter: either the model
    /// recommendation or one picked by the user directly.
    pub specialty: Option<String>,
    pub criteria: Option<CriteriaRecord>,
}

impl IntakeSession {
    pub fn new(consultation: ConsultationSession) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            consultation,
            specialty: None,
            criteria: None,
        }
    }
}

/// Trait for storing and retrieving intake sessions.
#[async_trait]
pub trait SessionStorage: Send + Sync {
    async fn save(&self, session: IntakeSession) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<IntakeSession>>;
    async fn delete(&self, id: &str) -> Result<()>;
}

/// In-memory implementation of SessionStorage.
pub struct InMemorySessionStorage {
    sessions: Arc<DashMap<String, IntakeSession>>,
}

impl InMemorySessionStorage {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
        }
    }
}

impl Default for InMemorySessionStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStorage for InMemorySessionStorage {
    async fn save(&self, session: IntakeSession) -> Result<()> {
        self.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<IntakeSession>> {
        Ok(self.sessions.get(id).map(|entry| entry.clone()))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.sessions.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consultation::{ConsultationConfig, IntakeProfile};
    use crate::llm::testing::ScriptedModel;
    use crate::llm::LanguageModelClient;

    #[tokio::test]
    async fn save_get_delete_roundtrip() {
        let storage = InMemorySessionStorage::new();
        let consultation = ConsultationSession::new(
            LanguageModelClient::new(ScriptedModel::always("вопрос")),
            ConsultationConfig::default(),
            &IntakeProfile::default(),
        );
        let session = IntakeSession::new(consultation);
        let id = session.id.clone();

        storage.save(session).await.unwrap();
        let loaded = storage.get(&id).await.unwrap();
        assert!(loaded.is_some());
        assert_eq!(loaded.unwrap().id, id);

        storage.delete(&id).await.unwrap();
        assert!(storage.get(&id).await.unwrap().is_none());
    }
}
