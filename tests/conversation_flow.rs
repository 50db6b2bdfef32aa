//! End-to-end conversation behaviour through the incident desk, with stub
//! collaborators in place of Telegram and SMTP.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::field::{Field, Visit};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

use incident_bot::attachments::{AttachmentStore, LocalAttachmentStore};
use incident_bot::channels::FileFetcher;
use incident_bot::conversation::prompts;
use incident_bot::conversation::{
    AttachmentRef, ConversationState, InboundEvent, IncidentDesk, Participant, Severity,
};
use incident_bot::error::{AttachmentError, ChannelError, DeliveryError};
use incident_bot::mail::{MailDispatcher, OutgoingMail};

// ── Stubs ───────────────────────────────────────────────────────────

#[derive(Default)]
struct StubStore {
    calls: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl StubStore {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl AttachmentStore for StubStore {
    async fn store(
        &self,
        file_ref: &str,
        owner: &str,
        _at: DateTime<Utc>,
    ) -> Result<PathBuf, AttachmentError> {
        self.calls
            .lock()
            .await
            .push((file_ref.to_string(), owner.to_string()));
        if self.fail {
            return Err(AttachmentError::Fetch(ChannelError::FetchFailed {
                name: "stub".into(),
                file_ref: file_ref.to_string(),
                reason: "timeout".into(),
            }));
        }
        Ok(PathBuf::from(format!("/data/attachments/{owner}.jpg")))
    }
}

#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<OutgoingMail>>,
    fail: bool,
}

#[async_trait]
impl MailDispatcher for RecordingMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), DeliveryError> {
        self.sent.lock().await.push(mail.clone());
        if self.fail {
            return Err(DeliveryError::Send("535 authentication failed".into()));
        }
        Ok(())
    }
}

struct Harness {
    desk: IncidentDesk,
    store: Arc<StubStore>,
    mailer: Arc<RecordingMailer>,
}

impl Harness {
    fn new() -> Self {
        Self::with(StubStore::default(), RecordingMailer::default())
    }

    fn with(store: StubStore, mailer: RecordingMailer) -> Self {
        let store = Arc::new(store);
        let mailer = Arc::new(mailer);
        Self {
            desk: IncidentDesk::new(store.clone(), mailer.clone()),
            store,
            mailer,
        }
    }
}

fn lucia() -> Participant {
    Participant::new("telegram:100:100", "100", "Lucía")
}

fn pedro() -> Participant {
    Participant::new("telegram:200:200", "200", "Pedro")
}

fn text(content: &str) -> InboundEvent {
    InboundEvent::parse(content)
}

fn photo(file_ref: &str) -> InboundEvent {
    InboundEvent::PhotoAttachment(file_ref.to_string())
}

/// Collects every `tracing` event emitted while installed.
#[derive(Clone, Default)]
struct LogCapture {
    events: Arc<std::sync::Mutex<Vec<LoggedEvent>>>,
}

#[derive(Debug, Clone)]
struct LoggedEvent {
    level: tracing::Level,
    fields: HashMap<String, String>,
}

impl LogCapture {
    fn install(&self) -> tracing::subscriber::DefaultGuard {
        tracing::subscriber::set_default(tracing_subscriber::registry().with(self.clone()))
    }

    fn errors(&self) -> Vec<LoggedEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.level == tracing::Level::ERROR)
            .cloned()
            .collect()
    }
}

impl<S: tracing::Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut fields = FieldMap::default();
        event.record(&mut fields);
        self.events.lock().unwrap().push(LoggedEvent {
            level: *event.metadata().level(),
            fields: fields.0,
        });
    }
}

#[derive(Default)]
struct FieldMap(HashMap<String, String>);

impl Visit for FieldMap {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0.insert(field.name().to_string(), format!("{value:?}"));
    }
}

fn assert_failure_record(event: &LoggedEvent, session_id: &str) {
    assert_eq!(event.fields.get("session").map(String::as_str), Some(session_id));
    let at = event.fields.get("at").expect("failure record carries a timestamp");
    assert!(DateTime::parse_from_rfc3339(at).is_ok(), "not RFC 3339: {at}");
    assert!(event.fields.contains_key("error"));
}

// ── Happy paths ─────────────────────────────────────────────────────

#[tokio::test]
async fn report_without_screenshot_is_mailed_once() {
    let h = Harness::new();
    let who = lucia();

    let turn = h.desk.handle(&who, text("/empezar")).await;
    assert_eq!(turn.replies, vec![prompts::severity_prompt()]);
    assert_eq!(turn.state, Some(ConversationState::AwaitingSeverity));

    let turn = h.desk.handle(&who, text("Alta")).await;
    assert_eq!(turn.replies, vec![prompts::attachment_prompt()]);
    assert_eq!(turn.state, Some(ConversationState::AwaitingAttachment));

    let turn = h.desk.handle(&who, text("/saltar")).await;
    assert_eq!(turn.replies, vec![prompts::description_prompt_no_attachment()]);
    assert_eq!(turn.state, Some(ConversationState::AwaitingDescription));

    let turn = h.desk.handle(&who, text("El PC no arranca")).await;
    assert_eq!(turn.replies, vec![prompts::acknowledgement()]);
    assert_eq!(turn.state, Some(ConversationState::Done));

    let sent = h.mailer.sent.lock().await;
    assert_eq!(sent.len(), 1);
    assert!(sent[0].subject.contains("High"));
    assert!(sent[0].subject.contains("Lucía"));
    assert_eq!(sent[0].body, "El PC no arranca");
    assert!(sent[0].attachment.is_none());
    assert!(h.store.calls.lock().await.is_empty());

    assert_eq!(h.desk.state_of(&who.session_id).await, None);
    assert_eq!(h.desk.open_conversations().await, 0);
}

#[tokio::test]
async fn report_with_screenshot_attaches_stored_file() {
    let h = Harness::new();
    let who = lucia();

    h.desk.handle(&who, text("/empezar")).await;
    h.desk.handle(&who, text("Crítica")).await;
    let turn = h.desk.handle(&who, photo("AgACAgQ")).await;
    assert_eq!(turn.replies, vec![prompts::description_prompt()]);

    let session = h.desk.session_of(&who.session_id).await.unwrap();
    assert_eq!(session.severity(), Some(Severity::Critical));
    assert_eq!(
        session.attachment(),
        Some(&AttachmentRef::Stored(PathBuf::from("/data/attachments/Lucía.jpg")))
    );

    h.desk.handle(&who, text("Pantalla azul al iniciar")).await;

    assert_eq!(
        *h.store.calls.lock().await,
        vec![("AgACAgQ".to_string(), "Lucía".to_string())]
    );
    let sent = h.mailer.sent.lock().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "[Critical] Incidencia de Lucía");
    assert_eq!(
        sent[0].attachment,
        Some(PathBuf::from("/data/attachments/Lucía.jpg"))
    );
}

#[tokio::test]
async fn screenshot_written_to_disk_through_local_store() {
    struct BytesFetcher;

    #[async_trait]
    impl FileFetcher for BytesFetcher {
        async fn fetch(&self, _file_ref: &str) -> Result<Vec<u8>, ChannelError> {
            Ok(b"\xFF\xD8\xFF".to_vec())
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(LocalAttachmentStore::new(
        dir.path().to_path_buf(),
        Arc::new(BytesFetcher),
    ));
    let mailer = Arc::new(RecordingMailer::default());
    let desk = IncidentDesk::new(store, mailer.clone());
    let who = pedro();

    desk.handle(&who, text("/empezar")).await;
    desk.handle(&who, text("Baja")).await;
    desk.handle(&who, photo("file-9")).await;
    desk.handle(&who, text("El ratón no responde")).await;

    let sent = mailer.sent.lock().await;
    let path = sent[0].attachment.clone().unwrap();
    assert!(path.starts_with(dir.path()));
    assert!(
        path.file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("Pedro_")
    );
    assert_eq!(std::fs::read(path).unwrap(), b"\xFF\xD8\xFF");
}

// ── Cancellation ────────────────────────────────────────────────────

#[tokio::test]
async fn cancel_from_every_open_state_sends_nothing() {
    let prefixes: [&[&str]; 3] = [&["/empezar"], &["/empezar", "Media"], &[
        "/empezar", "Media", "/saltar",
    ]];

    for prefix in prefixes {
        let h = Harness::new();
        let who = lucia();
        for step in prefix {
            h.desk.handle(&who, text(step)).await;
        }

        let turn = h.desk.handle(&who, text("/cancelar")).await;
        assert_eq!(turn.replies, vec![prompts::farewell()], "after {prefix:?}");
        assert_eq!(turn.state, Some(ConversationState::Done));

        // Cancelled sessions are gone: the next event is ignored.
        let turn = h.desk.handle(&who, text("Alta")).await;
        assert!(turn.replies.is_empty());
        assert_eq!(turn.state, None);

        assert!(h.mailer.sent.lock().await.is_empty());
    }
}

#[tokio::test]
async fn cancel_without_conversation_is_ignored() {
    let h = Harness::new();
    let turn = h.desk.handle(&lucia(), text("/cancelar")).await;
    assert!(turn.replies.is_empty());
    assert_eq!(turn.state, None);
}

#[tokio::test]
async fn new_report_can_start_after_cancel() {
    let h = Harness::new();
    let who = lucia();
    h.desk.handle(&who, text("/empezar")).await;
    h.desk.handle(&who, text("/cancelar")).await;

    let turn = h.desk.handle(&who, text("/empezar")).await;
    assert_eq!(turn.replies, vec![prompts::severity_prompt()]);
    assert_eq!(turn.state, Some(ConversationState::AwaitingSeverity));
}

// ── Invalid input ───────────────────────────────────────────────────

#[tokio::test]
async fn invalid_severity_leaves_conversation_untouched() {
    let h = Harness::new();
    let who = lucia();
    h.desk.handle(&who, text("/empezar")).await;

    for bogus in ["alta", "Urgente", "/saltar", "/empezar"] {
        let turn = h.desk.handle(&who, text(bogus)).await;
        assert!(turn.replies.is_empty(), "{bogus}");
        assert_eq!(turn.state, Some(ConversationState::AwaitingSeverity));
    }
    let turn = h.desk.handle(&who, photo("early")).await;
    assert!(turn.replies.is_empty());

    let session = h.desk.session_of(&who.session_id).await.unwrap();
    assert_eq!(session.severity(), None);
    assert!(h.store.calls.lock().await.is_empty());
}

#[tokio::test]
async fn text_on_screenshot_step_is_ignored() {
    let h = Harness::new();
    let who = lucia();
    h.desk.handle(&who, text("/empezar")).await;
    h.desk.handle(&who, text("Otro")).await;

    let turn = h.desk.handle(&who, text("aquí va la descripción")).await;
    assert!(turn.replies.is_empty());
    assert_eq!(turn.state, Some(ConversationState::AwaitingAttachment));
}

#[tokio::test]
async fn commands_are_not_taken_as_description() {
    let h = Harness::new();
    let who = lucia();
    for step in ["/empezar", "Alta", "/saltar"] {
        h.desk.handle(&who, text(step)).await;
    }

    for command in ["/saltar", "/ayuda", "/empezar"] {
        let turn = h.desk.handle(&who, text(command)).await;
        assert!(turn.replies.is_empty());
        assert_eq!(turn.state, Some(ConversationState::AwaitingDescription));
    }
    assert!(h.mailer.sent.lock().await.is_empty());
}

#[tokio::test]
async fn events_without_conversation_are_ignored() {
    let h = Harness::new();
    let who = lucia();
    for event in [text("hola"), text("Alta"), text("/saltar"), photo("x")] {
        let turn = h.desk.handle(&who, event).await;
        assert!(turn.replies.is_empty());
        assert_eq!(turn.state, None);
    }
    assert_eq!(h.desk.open_conversations().await, 0);
}

// ── Collaborator failures ───────────────────────────────────────────

#[tokio::test]
async fn delivery_failure_still_acknowledges_and_closes() {
    let h = Harness::with(
        StubStore::default(),
        RecordingMailer {
            fail: true,
            ..Default::default()
        },
    );
    let who = lucia();
    let logs = LogCapture::default();
    let _guard = logs.install();
    for step in ["/empezar", "Media", "/saltar"] {
        h.desk.handle(&who, text(step)).await;
    }

    let turn = h.desk.handle(&who, text("Sin red en la planta 2")).await;
    assert_eq!(turn.replies, vec![prompts::acknowledgement()]);
    assert_eq!(turn.state, Some(ConversationState::Done));
    assert_eq!(h.mailer.sent.lock().await.len(), 1);
    assert_eq!(h.desk.open_conversations().await, 0);

    let errors = logs.errors();
    assert_eq!(errors.len(), 1);
    assert_failure_record(&errors[0], &who.session_id);
    assert_eq!(
        errors[0].fields.get("subject").map(String::as_str),
        Some("[Medium] Incidencia de Lucía")
    );
}

#[tokio::test]
async fn fetch_failure_keeps_screenshot_step_open() {
    let h = Harness::with(StubStore::failing(), RecordingMailer::default());
    let who = lucia();
    let logs = LogCapture::default();
    let _guard = logs.install();
    h.desk.handle(&who, text("/empezar")).await;
    h.desk.handle(&who, text("Alta")).await;

    let turn = h.desk.handle(&who, photo("broken")).await;
    assert!(turn.replies.is_empty());
    assert_eq!(turn.state, Some(ConversationState::AwaitingAttachment));

    let errors = logs.errors();
    assert_eq!(errors.len(), 1);
    assert_failure_record(&errors[0], &who.session_id);
    assert_eq!(errors[0].fields.get("file_ref").map(String::as_str), Some("broken"));
    let session = h.desk.session_of(&who.session_id).await.unwrap();
    assert!(session.attachment().is_none());

    // The user can still skip and finish.
    h.desk.handle(&who, text("/saltar")).await;
    h.desk.handle(&who, text("Sigue fallando")).await;
    assert_eq!(h.mailer.sent.lock().await.len(), 1);
}

// ── Isolation ───────────────────────────────────────────────────────

#[tokio::test]
async fn sessions_do_not_share_state() {
    let h = Harness::new();
    let (a, b) = (lucia(), pedro());

    h.desk.handle(&a, text("/empezar")).await;
    h.desk.handle(&b, text("/empezar")).await;
    h.desk.handle(&a, text("Crítica")).await;

    assert_eq!(
        h.desk.state_of(&a.session_id).await,
        Some(ConversationState::AwaitingAttachment)
    );
    assert_eq!(
        h.desk.state_of(&b.session_id).await,
        Some(ConversationState::AwaitingSeverity)
    );

    h.desk.handle(&b, text("Baja")).await;
    h.desk.handle(&b, text("/saltar")).await;
    h.desk.handle(&b, text("Teclado roto")).await;
    h.desk.handle(&a, text("/cancelar")).await;

    let sent = h.mailer.sent.lock().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "[Low] Incidencia de Pedro");
}

#[tokio::test]
async fn concurrent_sessions_complete_independently() {
    let h = Arc::new(Harness::new());

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let h = Arc::clone(&h);
            tokio::spawn(async move {
                let who = Participant::new(
                    &format!("telegram:{i}:{i}"),
                    &i.to_string(),
                    &format!("user{i}"),
                );
                for step in ["/empezar", "Alta", "/saltar", "fallo"] {
                    h.desk.handle(&who, text(step)).await;
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(h.mailer.sent.lock().await.len(), 8);
    assert_eq!(h.desk.open_conversations().await, 0);
}
