use serde::{Deserialize, Serialize};

use crate::llm::ChatTurn;

/// Sentinel for preference fields the patient left unfilled.
pub const UNSPECIFIED: &str = "не указано";

const REFINE_SYSTEM_PROMPT: &str = r#"Ты медицинский консультант. На основе критериев пациента:
1. Уточни специализацию врача с учетом всех пожеланий
2. Укажи, нужен ли детский/взрослый специалист
3. Порекомендуй необходимые обследования перед приемом
4. Если есть особые требования (язык, пол врача) - учти их
5. Если состояние требует срочной помощи - направь в скорую

Ответь в формате:
Специализация: ...
Тип врача: ...
Рекомендации: ..."#;

/// Free-text answers from the additional-criteria form, all optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SupplementaryAnswers {
    pub patient_type: Option<String>,
    pub doctor_gender: Option<String>,
    pub experience: Option<String>,
    pub academic_degree: Option<String>,
    pub appointment_type: Option<String>,
    pub previous_diagnosis: Option<String>,
    pub chronic_diseases: Option<String>,
    pub additional_examinations: Option<String>,
    pub special_requirements: Option<String>,
}

fn filled(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Normalized search criteria. Every field is present: preference fields
/// fall back to the "не указано" sentinel, history fields to empty text.
/// Immutable once compiled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriteriaRecord {
    pub specialty: String,
    pub patient_type: String,
    pub doctor_gender: String,
    pub experience: String,
    pub academic_degree: String,
    pub appointment_type: String,
    pub previous_diagnosis: String,
    pub chronic_diseases: String,
    pub additional_examinations: String,
    pub special_requirements: String,
}

impl CriteriaRecord {
    /// Natural-language brief for the ranking model: specialty line first,
    /// then only the filled fields, in declared order.
    pub fn brief(&self) -> String {
        let mut text = format!("Основная специализация: {}\n\n", self.specialty);

        let preference_lines = [
            ("Тип пациента", &self.patient_type),
            ("Предпочтительный пол врача", &self.doctor_gender),
            ("Стаж врача", &self.experience),
            ("Ученая степень", &self.academic_degree),
            ("Тип приема", &self.appointment_type),
        ];
        for (label, value) in preference_lines {
            if value.as_str() != UNSPECIFIED {
                text.push_str(&format!("{}: {}\n", label, value));
            }
        }

        let history_lines = [
            ("Предыдущие диагнозы", &self.previous_diagnosis),
            ("Хронические заболевания", &self.chronic_diseases),
            ("Необходимые обследования", &self.additional_examinations),
            ("Особые пожелания", &self.special_requirements),
        ];
        for (label, value) in history_lines {
            if !value.is_empty() {
                text.push_str(&format!("{}: {}\n", label, value));
            }
        }

        text
    }
}

/// Merge the preliminary specialty with the supplementary answers.
///
/// Pure and deterministic: no I/O, no model call. Blank or whitespace-only
/// answers count as unfilled.
pub fn compile(
    preliminary_specialty: &str,
    answers: &SupplementaryAnswers,
) -> (CriteriaRecord, String) {
    let preference = |field: &Option<String>| {
        filled(field).map(str::to_string).unwrap_or_else(|| UNSPECIFIED.to_string())
    };
    let history = |field: &Option<String>| filled(field).map(str::to_string).unwrap_or_default();

    let record = CriteriaRecord {
        specialty: preliminary_specialty.to_string(),
        patient_type: preference(&answers.patient_type),
        doctor_gender: preference(&answers.doctor_gender),
        experience: preference(&answers.experience),
        academic_degree: preference(&answers.academic_degree),
        appointment_type: preference(&answers.appointment_type),
        previous_diagnosis: history(&answers.previous_diagnosis),
        chronic_diseases: history(&answers.chronic_diseases),
        additional_examinations: history(&answers.additional_examinations),
        special_requirements: history(&answers.special_requirements),
    };
    let brief = record.brief();
    (record, brief)
}

/// Messages for the optional criteria-aware refinement call
/// ("Специализация / Тип врача / Рекомендации" format).
pub fn refine_messages(brief: &str) -> Vec<ChatTurn> {
    vec![ChatTurn::system(REFINE_SYSTEM_PROMPT), ChatTurn::user(brief)]
}
