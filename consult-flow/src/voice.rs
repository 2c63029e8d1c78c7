use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::consultation::{
    ConsultationConfig, ConsultationSession, DEFAULT_SPECIALIST, IntakeProfile,
};
use crate::criteria::SupplementaryAnswers;
use crate::llm::LanguageModelClient;

/// Fixed recording window for one spoken answer.
pub const ANSWER_RECORD_SECS: u64 = 5;

/// Recognition attempts per question slot before the slot is given up.
/// Unrecognized answers never consume a turn, so without this cap a noisy
/// channel could loop on the same question forever.
pub const MAX_RECOGNITION_ATTEMPTS: usize = 3;

/// Display window over the dialog log.
pub const DIALOG_WINDOW: usize = 10;

const EVENT_BUFFER: usize = 64;

const UNRECOGNIZED_ANSWER: &str = "ответ не распознан";

const VOICE_INTRO: &str = "Здравствуйте! Меня зовут Лилу, я помогу вам подобрать врача. \
                           Сейчас я задам несколько уточняющих вопросов.";
const LISTENING_NOTICE: &str = "Говорите сейчас...";
const NOT_RECOGNIZED_NOTICE: &str = "Не удалось распознать ответ. Продолжаем...";
const ANALYZING_NOTICE: &str = "Анализирую всю полученную информацию...";
const DIALOG_DONE_NOTICE: &str = "Консультация завершена";

/// Recorded audio bytes, opaque to the adapter.
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub bytes: Vec<u8>,
}

impl AudioClip {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

/// Black-box voice transport. Every operation reports failure through a
/// sentinel return value; none of them may raise.
#[async_trait]
pub trait VoiceChannel: Send + Sync {
    /// Synthesize and play/store the text; `false` on failure.
    async fn synthesize(&self, text: &str) -> bool;

    /// Record a fixed-duration answer; `None` when nothing was captured.
    async fn record(&self, duration_secs: u64) -> Option<AudioClip>;

    /// Speech-to-text; `None` on transport failure, possibly-empty text
    /// otherwise.
    async fn transcribe(&self, clip: &AudioClip) -> Option<String>;
}

/// Capture side of the voice transport, kept separate so deployments can
/// plug in any recording backend.
#[async_trait]
pub trait AudioRecorder: Send + Sync {
    async fn record(&self, duration_secs: u64) -> Option<AudioClip>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceStatus {
    Stopped,
    Active,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogEvent {
    pub speaker: String,
    pub message: String,
}

impl DialogEvent {
    fn new(speaker: &str, message: impl Into<String>) -> Self {
        Self {
            speaker: speaker.to_string(),
            message: message.into(),
        }
    }
}

/// Results of a finished voice consultation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceOutcome {
    pub recommendation: String,
    pub answers: Vec<String>,
    pub symptoms_text: String,
}

/// Producer half shared with the background task: status, event log and the
/// cooperative cancellation flag. Events travel over a bounded channel; the
/// consumer keeps only the last [`DIALOG_WINDOW`] entries.
struct VoiceLink {
    cancelled: Arc<AtomicBool>,
    status_tx: watch::Sender<VoiceStatus>,
    events_tx: mpsc::Sender<DialogEvent>,
}

impl VoiceLink {
    fn push(&self, speaker: &str, message: impl Into<String>) {
        // Dropping an event when the buffer is full is acceptable: the
        // consumer only ever shows the most recent window anyway.
        let _ = self.events_tx.try_send(DialogEvent::new(speaker, message));
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn complete(&self) {
        if !self.is_cancelled() {
            let _ = self.status_tx.send(VoiceStatus::Completed);
        }
    }
}

/// Consumer-side plumbing shared by both voice adapters.
struct VoiceMonitor {
    cancelled: Arc<AtomicBool>,
    status_rx: watch::Receiver<VoiceStatus>,
    status_tx: watch::Sender<VoiceStatus>,
    events_rx: Mutex<mpsc::Receiver<DialogEvent>>,
    window: Mutex<VecDeque<DialogEvent>>,
}

impl VoiceMonitor {
    fn new() -> (Self, VoiceLink) {
        let cancelled = Arc::new(AtomicBool::new(false));
        let (status_tx, status_rx) = watch::channel(VoiceStatus::Stopped);
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let link = VoiceLink {
            cancelled: cancelled.clone(),
            status_tx: status_tx.clone(),
            events_tx,
        };
        let monitor = Self {
            cancelled,
            status_rx,
            status_tx,
            events_rx: Mutex::new(events_rx),
            window: Mutex::new(VecDeque::new()),
        };
        (monitor, link)
    }

    fn status(&self) -> VoiceStatus {
        *self.status_rx.borrow()
    }

    fn activate(&self) {
        let _ = self.status_tx.send(VoiceStatus::Active);
    }

    /// Cooperative cancellation: the background task checks the flag at the
    /// top of each iteration; an in-flight call is not interrupted.
    /// Terminal — a stopped adapter cannot be restarted.
    fn stop(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if self.status() != VoiceStatus::Completed {
            let _ = self.status_tx.send(VoiceStatus::Stopped);
        }
    }

    /// Last [`DIALOG_WINDOW`] dialog entries, for display polling.
    fn dialog_window(&self) -> Vec<DialogEvent> {
        let mut window = self.window.lock().expect("dialog window lock");
        let mut rx = self.events_rx.lock().expect("dialog events lock");
        while let Ok(event) = rx.try_recv() {
            window.push_back(event);
            while window.len() > DIALOG_WINDOW {
                window.pop_front();
            }
        }
        window.iter().cloned().collect()
    }
}

/// Runs the question/answer interview over the voice channel in a background
/// task, so the caller can poll status without blocking.
///
/// Status lifecycle: `stopped → active → completed`; `completed` only when
/// the wrapped interview finished un-cancelled; explicit stop is terminal.
pub struct VoiceConsultation {
    client: LanguageModelClient,
    config: ConsultationConfig,
    channel: Arc<dyn VoiceChannel>,
    monitor: VoiceMonitor,
    link: Option<VoiceLink>,
    started: AtomicBool,
    outcome: Arc<Mutex<Option<VoiceOutcome>>>,
}

impl VoiceConsultation {
    pub fn new(
        client: LanguageModelClient,
        config: ConsultationConfig,
        channel: Arc<dyn VoiceChannel>,
    ) -> Self {
        let (monitor, link) = VoiceMonitor::new();
        Self {
            client,
            config,
            channel,
            monitor,
            link: Some(link),
            started: AtomicBool::new(false),
            outcome: Arc::new(Mutex::new(None)),
        }
    }

    /// Spawn the dialog task. Returns `false` if this adapter was already
    /// started; one adapter drives at most one interview.
    pub fn start(&mut self, profile: IntakeProfile) -> bool {
        if self.started.swap(true, Ordering::SeqCst) {
            return false;
        }
        let Some(link) = self.link.take() else {
            return false;
        };
        self.monitor.activate();

        let client = self.client.clone();
        let config = self.config.clone();
        let channel = self.channel.clone();
        let outcome = self.outcome.clone();
        tokio::spawn(async move {
            run_voice_dialog(client, config, channel, profile, link, outcome).await;
        });
        true
    }

    pub fn status(&self) -> VoiceStatus {
        self.monitor.status()
    }

    pub fn stop(&self) {
        info!("voice consultation stop requested");
        self.monitor.stop();
    }

    pub fn dialog_window(&self) -> Vec<DialogEvent> {
        self.monitor.dialog_window()
    }

    pub fn outcome(&self) -> Option<VoiceOutcome> {
        self.outcome.lock().expect("voice outcome lock").clone()
    }

    pub fn recommendation(&self) -> Option<String> {
        self.outcome().map(|o| o.recommendation)
    }
}

async fn run_voice_dialog(
    client: LanguageModelClient,
    config: ConsultationConfig,
    channel: Arc<dyn VoiceChannel>,
    profile: IntakeProfile,
    link: VoiceLink,
    outcome: Arc<Mutex<Option<VoiceOutcome>>>,
) {
    let mut session = ConsultationSession::new(client, config, &profile);

    // Spoken once, deliberately kept out of the dialog log.
    channel.synthesize(VOICE_INTRO).await;

    'interview: while !link.is_cancelled() && !session.is_complete() {
        if !session.next_question().await {
            break;
        }
        let question = session
            .pending_question()
            .unwrap_or_default()
            .to_string();

        let mut attempts = 0;
        loop {
            if link.is_cancelled() {
                break 'interview;
            }
            link.push("Лилу", question.clone());
            channel.synthesize(&question).await;

            if link.is_cancelled() {
                break 'interview;
            }
            link.push("", LISTENING_NOTICE);
            let answer = match channel.record(ANSWER_RECORD_SECS).await {
                Some(clip) => channel.transcribe(&clip).await,
                None => None,
            };
            let answer = answer
                .map(|text| text.trim().to_string())
                .filter(|text| !text.is_empty());

            match answer {
                Some(text) => {
                    link.push("Вы", text.clone());
                    session.submit_answer(&text);
                    break;
                }
                None => {
                    attempts += 1;
                    link.push("", NOT_RECOGNIZED_NOTICE);
                    if attempts >= MAX_RECOGNITION_ATTEMPTS {
                        warn!(question = %question, "recognition attempts exhausted, skipping slot");
                        session.submit_answer(UNRECOGNIZED_ANSWER);
                        break;
                    }
                }
            }
        }
    }

    if link.is_cancelled() || !session.is_complete() {
        info!("voice consultation ended without completion");
        return;
    }

    link.push("Лилу", ANALYZING_NOTICE);
    channel.synthesize(ANALYZING_NOTICE).await;

    let recommendation = session
        .final_recommendation_outcome()
        .await
        .reply_or(DEFAULT_SPECIALIST);
    link.push("Результат", format!("Рекомендация: {}", recommendation));
    channel
        .synthesize(&format!(
            "На основе ваших симптомов и предоставленной информации, моя рекомендация: {}",
            recommendation
        ))
        .await;
    link.push("", DIALOG_DONE_NOTICE);
    channel.synthesize("Консультация завершена. Спасибо!").await;

    let answers = session.state().answers.clone();
    *outcome.lock().expect("voice outcome lock") = Some(VoiceOutcome {
        symptoms_text: profile.symptoms_text(&answers),
        recommendation,
        answers,
    });
    link.complete();
}

/// Question script for the voice criteria survey, in form order.
pub const SURVEY_QUESTIONS: &[(&str, &str)] = &[
    ("patient_type", "Какой врач нужен вам: детский или взрослый?"),
    ("doctor_gender", "Важен ли пол врача?"),
    (
        "experience",
        "Какие требования к опыту врача? Например: молодой специалист или опытный врач.",
    ),
    ("academic_degree", "Нужна ли ученая степень? Или это не важно?"),
    (
        "appointment_type",
        "Какой тип приема нужен? Первичный, повторный или профилактический?",
    ),
    (
        "previous_diagnosis",
        "Если вы уже были у врача-специалиста раньше, какой диагноз вам поставили?",
    ),
    (
        "chronic_diseases",
        "Есть ли у вас хронические заболевания? Например: диабет, гипертония, астма или аллергии?",
    ),
    (
        "additional_examinations",
        "Какие обследования вам могут понадобиться? Например: УЗИ или рентген?",
    ),
    (
        "special_requirements",
        "Есть ли у вас особые пожелания или уточнения? Например: английский язык или онлайн консультация.",
    ),
];

const SURVEY_INTRO: &str = "Я задам несколько уточняющих вопросов для более точного подбора врача.";
const SURVEY_DONE: &str = "Спасибо за ответы! Все уточняющие вопросы завершены.";
const SURVEY_NO_ANSWER: &str = "Ответ не получен, продолжаем...";

fn set_survey_answer(answers: &mut SupplementaryAnswers, key: &str, value: String) {
    let slot = match key {
        "patient_type" => &mut answers.patient_type,
        "doctor_gender" => &mut answers.doctor_gender,
        "experience" => &mut answers.experience,
        "academic_degree" => &mut answers.academic_degree,
        "appointment_type" => &mut answers.appointment_type,
        "previous_diagnosis" => &mut answers.previous_diagnosis,
        "chronic_diseases" => &mut answers.chronic_diseases,
        "additional_examinations" => &mut answers.additional_examinations,
        "special_requirements" => &mut answers.special_requirements,
        _ => return,
    };
    *slot = Some(value);
}

/// Scripted voice survey over the additional-criteria questions. Unlike the
/// interview, an unanswered question is simply skipped; the form can be
/// completed by hand afterwards.
pub struct VoiceCriteriaSurvey {
    channel: Arc<dyn VoiceChannel>,
    monitor: VoiceMonitor,
    link: Option<VoiceLink>,
    started: AtomicBool,
    answers: Arc<Mutex<SupplementaryAnswers>>,
}

impl VoiceCriteriaSurvey {
    pub fn new(channel: Arc<dyn VoiceChannel>) -> Self {
        let (monitor, link) = VoiceMonitor::new();
        Self {
            channel,
            monitor,
            link: Some(link),
            started: AtomicBool::new(false),
            answers: Arc::new(Mutex::new(SupplementaryAnswers::default())),
        }
    }

    pub fn start(&mut self) -> bool {
        if self.started.swap(true, Ordering::SeqCst) {
            return false;
        }
        let Some(link) = self.link.take() else {
            return false;
        };
        self.monitor.activate();

        let channel = self.channel.clone();
        let answers = self.answers.clone();
        tokio::spawn(async move {
            run_criteria_survey(channel, link, answers).await;
        });
        true
    }

    pub fn status(&self) -> VoiceStatus {
        self.monitor.status()
    }

    pub fn stop(&self) {
        info!("voice survey stop requested");
        self.monitor.stop();
    }

    pub fn dialog_window(&self) -> Vec<DialogEvent> {
        self.monitor.dialog_window()
    }

    pub fn answers(&self) -> SupplementaryAnswers {
        self.answers.lock().expect("survey answers lock").clone()
    }
}

async fn run_criteria_survey(
    channel: Arc<dyn VoiceChannel>,
    link: VoiceLink,
    answers: Arc<Mutex<SupplementaryAnswers>>,
) {
    channel.synthesize(SURVEY_INTRO).await;

    for (key, question) in SURVEY_QUESTIONS {
        if link.is_cancelled() {
            return;
        }
        link.push("Лилу", *question);
        channel.synthesize(question).await;

        if link.is_cancelled() {
            return;
        }
        link.push("", "Говорите ваш ответ...");
        let answer = match channel.record(ANSWER_RECORD_SECS).await {
            Some(clip) => channel.transcribe(&clip).await,
            None => None,
        };
        match answer.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()) {
            Some(text) => {
                link.push("Вы", text.clone());
                set_survey_answer(&mut answers.lock().expect("survey answers lock"), key, text);
            }
            None => link.push("Лилу", SURVEY_NO_ANSWER),
        }
    }

    if !link.is_cancelled() {
        channel.synthesize(SURVEY_DONE).await;
        link.push("", SURVEY_DONE);
        link.complete();
    }
}

const TTS_URL: &str = "https://tts.api.cloud.yandex.net/speech/v1/tts:synthesize";
const STT_URL: &str = "https://stt.api.cloud.yandex.net/speech/v1/stt:recognize";
const STT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_STT_BYTES: usize = 1024 * 1024;

/// SpeechKit-style HTTP voice transport. Synthesis and recognition go over
/// HTTP; capture is delegated to the injected [`AudioRecorder`].
pub struct SpeechKitVoice {
    http: reqwest::Client,
    api_key: String,
    folder_id: String,
    recorder: Arc<dyn AudioRecorder>,
}

impl SpeechKitVoice {
    pub fn new(api_key: String, folder_id: String, recorder: Arc<dyn AudioRecorder>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            folder_id,
            recorder,
        }
    }

    pub fn from_env(recorder: Arc<dyn AudioRecorder>) -> anyhow::Result<Self> {
        let api_key = std::env::var("SPEECHKIT_API_KEY")
            .map_err(|_| anyhow::anyhow!("SPEECHKIT_API_KEY not set"))?;
        let folder_id = std::env::var("SPEECHKIT_FOLDER_ID")
            .map_err(|_| anyhow::anyhow!("SPEECHKIT_FOLDER_ID not set"))?;
        Ok(Self::new(api_key, folder_id, recorder))
    }

    fn auth_header(&self) -> String {
        format!("Api-Key {}", self.api_key)
    }
}

#[async_trait]
impl VoiceChannel for SpeechKitVoice {
    async fn synthesize(&self, text: &str) -> bool {
        let form = [
            ("folderId", self.folder_id.as_str()),
            ("text", text),
            ("lang", "ru-RU"),
            ("voice", "oksana"),
            ("speed", "1.25"),
            ("format", "oggopus"),
            ("sampleRateHertz", "48000"),
        ];
        match self
            .http
            .post(TTS_URL)
            .header(reqwest::header::AUTHORIZATION, self.auth_header())
            .form(&form)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(status = %response.status(), "speech synthesis rejected");
                false
            }
            Err(e) => {
                warn!(error = %e, "speech synthesis failed");
                false
            }
        }
    }

    async fn record(&self, duration_secs: u64) -> Option<AudioClip> {
        self.recorder.record(duration_secs).await
    }

    async fn transcribe(&self, clip: &AudioClip) -> Option<String> {
        if clip.bytes.is_empty() {
            return None;
        }
        if clip.bytes.len() > MAX_STT_BYTES {
            warn!(bytes = clip.bytes.len(), "audio clip too large for recognition");
            return None;
        }

        let response = self
            .http
            .post(STT_URL)
            .header(reqwest::header::AUTHORIZATION, self.auth_header())
            .query(&[
                ("folderId", self.folder_id.as_str()),
                ("lang", "ru-RU"),
            ])
            .timeout(STT_TIMEOUT)
            .body(clip.bytes.clone())
            .send()
            .await;

        let response = match response {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                warn!(status = %r.status(), "speech recognition rejected");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "speech recognition failed");
                return None;
            }
        };

        let body: serde_json::Value = response.json().await.ok()?;
        body.get("result")
            .and_then(|r| r.as_str())
            .map(str::to_string)
    }
}
