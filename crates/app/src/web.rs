use crate::page::{self, Notice};
use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::{header, HeaderMap},
    response::{AppendHeaders, Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Router,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use talkdocs_core::{
    ChatError, ChatModel, Embedder, IngestError, RunTracer, Session, SessionSettings,
    UploadedDocument,
};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

const SESSION_COOKIE: &str = "talkdocs_session";
const UPLOAD_FIELD: &str = "pdfs";

/// One browser's session plus the banners waiting to be shown to it.
struct WebSession {
    session: Session,
    notices: Vec<Notice>,
}

struct SessionSlot {
    web: Arc<Mutex<WebSession>>,
    last_seen: Instant,
}

/// Bounds on the session registry. Sessions idle for longer than
/// `idle_timeout` are dropped, and past `max_sessions` the least recently
/// used session makes room for a new one.
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    pub idle_timeout: Duration,
    pub max_sessions: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(60 * 60),
            max_sessions: 256,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    sessions: Arc<RwLock<HashMap<Uuid, SessionSlot>>>,
    limits: SessionLimits,
    settings: SessionSettings,
    embedder: Arc<dyn Embedder>,
    model: Arc<dyn ChatModel>,
    tracer: Option<Arc<RunTracer>>,
    reply_delay: Duration,
}

impl AppState {
    pub fn new(
        settings: SessionSettings,
        limits: SessionLimits,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn ChatModel>,
        tracer: Option<Arc<RunTracer>>,
        reply_delay: Duration,
    ) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            limits,
            settings,
            embedder,
            model,
            tracer,
            reply_delay,
        }
    }

    /// Looks up the session named by the request cookie, creating a new one
    /// when the cookie is missing, unknown or expired.
    async fn session(&self, headers: &HeaderMap) -> (Uuid, Arc<Mutex<WebSession>>) {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;

        if let Some(id) = session_id(headers) {
            if let Some(slot) = sessions.get_mut(&id) {
                if now.duration_since(slot.last_seen) < self.limits.idle_timeout {
                    slot.last_seen = now;
                    return (id, Arc::clone(&slot.web));
                }
            }
        }

        evict_sessions(&mut sessions, now, self.limits);

        let id = Uuid::new_v4();
        let created = Arc::new(Mutex::new(WebSession {
            session: Session::new(
                self.settings,
                Arc::clone(&self.embedder),
                Arc::clone(&self.model),
                self.tracer.clone(),
            ),
            notices: Vec::new(),
        }));
        sessions.insert(
            id,
            SessionSlot {
                web: Arc::clone(&created),
                last_seen: now,
            },
        );
        info!(session = %id, active = sessions.len(), "session started");
        (id, created)
    }
}

/// Drops expired sessions, then the least recently used ones until a new
/// session fits under the cap.
fn evict_sessions(sessions: &mut HashMap<Uuid, SessionSlot>, now: Instant, limits: SessionLimits) {
    let before = sessions.len();
    sessions.retain(|_, slot| now.duration_since(slot.last_seen) < limits.idle_timeout);

    let cap = limits.max_sessions.max(1);
    while sessions.len() >= cap {
        let oldest = sessions
            .iter()
            .min_by_key(|(_, slot)| slot.last_seen)
            .map(|(id, _)| *id);
        match oldest {
            Some(id) => {
                sessions.remove(&id);
            }
            None => break,
        }
    }

    let evicted = before - sessions.len();
    if evicted > 0 {
        debug!(evicted, active = sessions.len(), "sessions evicted");
    }
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ask", post(ask))
        .route("/process", post(process))
        .route("/health", get(|| async { "ok" }))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn session_id(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .and_then(|(_, value)| Uuid::parse_str(value.trim()).ok())
}

fn session_cookie(id: Uuid) -> AppendHeaders<[(header::HeaderName, String); 1]> {
    AppendHeaders([(
        header::SET_COOKIE,
        format!("{SESSION_COOKIE}={id}; Path=/; HttpOnly; SameSite=Lax"),
    )])
}

async fn index(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (id, web_session) = state.session(&headers).await;
    let mut guard = web_session.lock().await;
    let notices = std::mem::take(&mut guard.notices);
    let body = page::render(guard.session.transcript(), &notices, guard.session.is_ready());
    (session_cookie(id), Html(body)).into_response()
}

#[derive(Debug, Deserialize)]
struct AskForm {
    #[serde(default)]
    question: String,
}

async fn ask(State(state): State<AppState>, headers: HeaderMap, Form(form): Form<AskForm>) -> Response {
    let (id, web_session) = state.session(&headers).await;
    let mut guard = web_session.lock().await;

    if !form.question.trim().is_empty() {
        match guard.session.ask(&form.question).await {
            Ok(_) => tokio::time::sleep(state.reply_delay).await,
            Err(error) => {
                let notice = chat_notice(&error);
                guard.notices.push(notice);
            }
        }
    }

    (session_cookie(id), Redirect::to("/")).into_response()
}

async fn process(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Response {
    let (id, web_session) = state.session(&headers).await;

    let documents = match read_uploads(multipart).await {
        Ok(documents) => documents,
        Err(error) => {
            warn!(session = %id, %error, "upload could not be read");
            web_session.lock().await.notices.push(Notice::error(format!(
                "The upload could not be read: {error}"
            )));
            return (session_cookie(id), Redirect::to("/")).into_response();
        }
    };

    let mut guard = web_session.lock().await;
    match guard.session.process(documents).await {
        Ok(summary) => {
            info!(
                session = %id,
                documents = summary.documents.len(),
                chunks = summary.chunk_count,
                "upload processed"
            );
            guard.notices.push(Notice::success(
                "PDF(s) processed successfully! You can now start chatting.",
            ));
        }
        Err(error) => {
            warn!(session = %id, %error, "processing failed");
            let notices = ingest_notices(&error);
            guard.notices.extend(notices);
        }
    }

    (session_cookie(id), Redirect::to("/")).into_response()
}

async fn read_uploads(
    mut multipart: Multipart,
) -> Result<Vec<UploadedDocument>, axum::extract::multipart::MultipartError> {
    let mut documents = Vec::new();
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let name = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await?;
        // Browsers submit one empty part when no file was chosen.
        if name.is_empty() && bytes.is_empty() {
            continue;
        }
        documents.push(UploadedDocument::new(name, bytes.to_vec()));
    }
    Ok(documents)
}

fn ingest_notices(error: &IngestError) -> Vec<Notice> {
    const STOPPED: &str = "PDF processing stopped. No usable text found.";

    match error {
        IngestError::NoDocuments => vec![Notice::error(
            "No PDF uploaded. Please upload at least one PDF before processing.",
        )],
        IngestError::UnreadableDocuments(names) => vec![
            Notice::warning(format!(
                "The following PDFs could not be read due to corruption or format issues: {}",
                names.join(", ")
            )),
            Notice::error(STOPPED),
        ],
        IngestError::EmptyDocuments(names) => vec![
            Notice::warning(format!(
                "The following PDFs had no extractable text: {}",
                names.join(", ")
            )),
            Notice::error(STOPPED),
        ],
        IngestError::NoChunks => vec![Notice::error(
            "No text chunks could be generated. Please try a different document.",
        )],
        IngestError::Embedding(_) | IngestError::Index(_) | IngestError::Http(_) => {
            vec![Notice::error("Vectorstore creation failed.")]
        }
        other => vec![Notice::error(format!("Processing failed: {other}"))],
    }
}

fn chat_notice(error: &ChatError) -> Notice {
    match error {
        ChatError::NotReady => {
            Notice::error("Please upload and process your PDFs before asking a question.")
        }
        ChatError::EmptyQuestion => Notice::warning("Please type a question first."),
        other => Notice::error(format!("The assistant could not answer: {other}")),
    }
}
