use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::directory::{DoctorDirectory, DoctorRecord};

const EDUCATION_ADD_LIMIT: usize = 200;
const DETAIL_LIMIT: usize = 300;
const REVIEW_LIMIT: usize = 250;

/// Aggregate counts over the matched rows, for progress displays.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchSummary {
    pub total: usize,
    pub high_category: usize,
    pub with_degree: usize,
}

/// Result of one specialty filter pass. Empty `rows` is a hard stop for the
/// ranking pipeline, distinct from a service failure.
#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    pub rows: Vec<DoctorRecord>,
    pub profiles_text: String,
    pub summary: MatchSummary,
}

impl MatchOutcome {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Filters the doctor directory by specialty and serializes matching rows
/// into bounded-length text profiles for the ranking model.
///
/// Matching is a recall-favoring OR across four fields; false positives are
/// expected and left to the ranking model to discard.
pub struct CandidateMatcher {
    strip_html: Regex,
    split_specialties: Regex,
}

impl CandidateMatcher {
    pub fn new() -> Self {
        Self {
            strip_html: Regex::new(r"<[^<]+?>").expect("static html regex"),
            // Comma, semicolon, or the standalone conjunction "и".
            split_specialties: Regex::new(r",|;|\bи\b").expect("static split regex"),
        }
    }

    fn clean(&self, raw: &str) -> String {
        self.strip_html.replace_all(raw, "").into_owned()
    }

    /// Lower-cased, HTML-stripped, trimmed specialty tags.
    pub fn normalize_specialties(&self, raw: &str) -> Vec<String> {
        let clean = self.clean(raw);
        self.split_specialties
            .split(&clean)
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect()
    }

    fn matches(&self, doctor: &DoctorRecord, target: &str) -> bool {
        let spec_match = DoctorRecord::text(&doctor.spec)
            .is_some_and(|s| s.to_lowercase().contains(target));
        let key_match = DoctorRecord::text(&doctor.doctor_specialization)
            .is_some_and(|s| s.to_lowercase().contains(target));
        let list_match = DoctorRecord::text(&doctor.specialities).is_some_and(|s| {
            self.normalize_specialties(s)
                .iter()
                .any(|spec| spec.contains(target))
        });
        let detail_match = DoctorRecord::text(&doctor.detail_text)
            .is_some_and(|s| s.to_lowercase().contains(target));

        spec_match || key_match || list_match || detail_match
    }

    /// Truncate to `limit` characters and mark the cut. The marker is always
    /// appended, matching the profile format the ranking prompt was tuned on.
    fn truncated(&self, raw: &str, limit: usize) -> String {
        let clean = self.clean(raw);
        let mut text: String = clean.chars().take(limit).collect();
        text.push_str("...");
        text
    }

    /// Serialize one row. Field order is fixed; the ranking prompt depends
    /// on it staying stable.
    pub fn profile(&self, doctor: &DoctorRecord) -> String {
        let mut profile = format!(
            "Врач: {}\n",
            DoctorRecord::text(&doctor.name).unwrap_or("Не указано")
        );

        if let Some(spec) = DoctorRecord::text(&doctor.spec) {
            profile.push_str(&format!("Специальность: {}\n", spec));
        }
        if let Some(key_spec) = DoctorRecord::text(&doctor.doctor_specialization) {
            profile.push_str(&format!("Ключевая специализация: {}\n", key_spec));
        }
        if let Some(raw) = DoctorRecord::text(&doctor.specialities) {
            let specialties = self.normalize_specialties(raw);
            if !specialties.is_empty() {
                profile.push_str(&format!(
                    "Дополнительные специализации: {}\n",
                    specialties.join(", ")
                ));
            }
        }
        if let Some(category) = DoctorRecord::text(&doctor.doctor_category) {
            profile.push_str(&format!("Категория: {}\n", category));
        }
        if let Some(degree) = DoctorRecord::text(&doctor.degree) {
            if degree != "none" {
                profile.push_str(&format!("Ученая степень: {}\n", degree));
            }
        }
        if let Some(gender) = DoctorRecord::text(&doctor.gender) {
            profile.push_str(&format!("Пол: {}\n", gender));
        }
        if let Some(education) = DoctorRecord::text(&doctor.education) {
            profile.push_str(&format!("Образование: {}\n", education));
        }
        if let Some(extra) = DoctorRecord::text(&doctor.education_add) {
            let clean = self.clean(extra);
            if !clean.trim().is_empty() {
                profile.push_str(&format!(
                    "Дополнительное образование: {}\n",
                    self.truncated(extra, EDUCATION_ADD_LIMIT)
                ));
            }
        }
        if let Some(detail) = DoctorRecord::text(&doctor.detail_text) {
            profile.push_str(&format!(
                "Описание: {}\n",
                self.truncated(detail, DETAIL_LIMIT)
            ));
        }
        // Primary review column first, then the alternate name.
        let review = DoctorRecord::text(&doctor.review)
            .filter(|r| *r != "none")
            .or_else(|| DoctorRecord::text(&doctor.reviews).filter(|r| *r != "none"));
        if let Some(review) = review {
            let clean = self.clean(review);
            if !clean.trim().is_empty() {
                profile.push_str(&format!("Отзывы: {}\n", self.truncated(review, REVIEW_LIMIT)));
            }
        }
        profile.push_str("---\n");
        profile
    }

    /// Filter the directory by `target_specialty` (case-insensitive) and
    /// build the concatenated candidate-profile text.
    pub fn filter(&self, directory: &DoctorDirectory, target_specialty: &str) -> MatchOutcome {
        let target = target_specialty.trim().to_lowercase();
        if target.is_empty() {
            return MatchOutcome::default();
        }

        let rows: Vec<DoctorRecord> = directory
            .records()
            .iter()
            .filter(|doctor| self.matches(doctor, &target))
            .cloned()
            .collect();

        if rows.is_empty() {
            info!(specialty = %target_specialty, "no candidates matched");
            return MatchOutcome::default();
        }

        let profiles_text = rows.iter().map(|d| self.profile(d)).collect::<String>();
        let summary = MatchSummary {
            total: rows.len(),
            high_category: rows
                .iter()
                .filter(|d| DoctorRecord::text(&d.doctor_category) == Some("high"))
                .count(),
            with_degree: rows
                .iter()
                .filter(|d| DoctorRecord::text(&d.degree).is_some_and(|deg| deg != "none"))
                .count(),
        };
        info!(
            specialty = %target_specialty,
            candidates = summary.total,
            "candidates matched"
        );

        MatchOutcome {
            rows,
            profiles_text,
            summary,
        }
    }
}

impl Default for CandidateMatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doctor(name: &str, specialities: &str) -> DoctorRecord {
        DoctorRecord {
            name: Some(name.to_string()),
            specialities: Some(specialities.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn matches_specialty_list_case_insensitively() {
        let directory = DoctorDirectory::from_records(vec![
            doctor("Иванов", "Терапевт"),
            doctor("Петрова", "<b>Кардиолог</b>; аритмолог"),
            doctor("Сидоров", "Хирург"),
        ]);
        let matcher = CandidateMatcher::new();
        let outcome = matcher.filter(&directory, "кардиолог");

        assert_eq!(outcome.rows.len(), 1);
        assert_eq!(outcome.rows[0].name.as_deref(), Some("Петрова"));
        assert!(outcome.profiles_text.contains("Врач: Петрова"));
    }

    #[test]
    fn unmatched_specialty_returns_empty_outcome() {
        let directory = DoctorDirectory::from_records(vec![
            DoctorRecord::default(),
            DoctorRecord::default(),
        ]);
        let matcher = CandidateMatcher::new();
        let outcome = matcher.filter(&directory, "офтальмолог");

        assert!(outcome.is_empty());
        assert!(outcome.profiles_text.is_empty());
    }

    #[test]
    fn matches_across_all_four_fields() {
        let matcher = CandidateMatcher::new();
        let by_spec = DoctorRecord {
            spec: Some("Невролог".to_string()),
            ..Default::default()
        };
        let by_key = DoctorRecord {
            doctor_specialization: Some("детский невролог".to_string()),
            ..Default::default()
        };
        let by_detail = DoctorRecord {
            detail_text: Some("Опытный невролог, стаж 20 лет".to_string()),
            ..Default::default()
        };
        let directory = DoctorDirectory::from_records(vec![by_spec, by_key, by_detail]);
        assert_eq!(matcher.filter(&directory, "Невролог").rows.len(), 3);
    }

    #[test]
    fn normalization_splits_on_separators_and_conjunction() {
        let matcher = CandidateMatcher::new();
        let specs = matcher.normalize_specialties("Кардиолог, Терапевт; ЛОР и Аллерголог");
        assert_eq!(specs, vec!["кардиолог", "терапевт", "лор", "аллерголог"]);
    }

    #[test]
    fn normalization_does_not_shred_words_containing_the_letter() {
        let matcher = CandidateMatcher::new();
        let specs = matcher.normalize_specialties("Гинеколог");
        assert_eq!(specs, vec!["гинеколог"]);
    }

    #[test]
    fn detail_text_truncated_to_limit_with_marker() {
        let matcher = CandidateMatcher::new();
        let long_detail: String = "а".repeat(500);
        let record = DoctorRecord {
            detail_text: Some(long_detail),
            ..Default::default()
        };
        let profile = matcher.profile(&record);

        let description_line = profile
            .lines()
            .find(|l| l.starts_with("Описание: "))
            .expect("description line present");
        let body = description_line.trim_start_matches("Описание: ");
        assert!(body.ends_with("..."));
        assert_eq!(body.trim_end_matches("...").chars().count(), 300);
    }

    #[test]
    fn degree_none_sentinel_is_omitted() {
        let matcher = CandidateMatcher::new();
        let record = DoctorRecord {
            degree: Some("none".to_string()),
            ..Default::default()
        };
        assert!(!matcher.profile(&record).contains("Ученая степень"));
    }

    #[test]
    fn review_falls_back_to_alternate_column() {
        let matcher = CandidateMatcher::new();
        let record = DoctorRecord {
            review: Some("none".to_string()),
            reviews: Some("Отличный врач".to_string()),
            ..Default::default()
        };
        assert!(matcher.profile(&record).contains("Отзывы: Отличный врач..."));
    }

    #[test]
    fn profile_without_name_uses_placeholder_and_separator() {
        let matcher = CandidateMatcher::new();
        let profile = matcher.profile(&DoctorRecord::default());
        assert!(profile.starts_with("Врач: Не указано\n"));
        assert!(profile.ends_with("---\n"));
    }

    #[test]
    fn summary_counts_category_and_degree() {
        let mut high = doctor("А", "терапевт");
        high.doctor_category = Some("high".to_string());
        let mut with_degree = doctor("Б", "терапевт");
        with_degree.degree = Some("кандидат медицинских наук".to_string());
        let directory = DoctorDirectory::from_records(vec![high, with_degree]);

        let summary = CandidateMatcher::new().filter(&directory, "терапевт").summary;
        assert_eq!(summary.total, 2);
        assert_eq!(summary.high_category, 1);
        assert_eq!(summary.with_degree, 1);
    }
}
