use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use askama::Template;
use axum::{
    extract::{Form, Path, State},
    http::StatusCode,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    response::{Html, IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::Deserialize;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::error::ErrorCode;
use crate::store::{Feed, Post, PostId, State as StoreState};
use crate::submit::Aggregator;

pub struct AppState {
    pub aggregator: Arc<Aggregator>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/feeds", post(submit_feed))
        .route("/posts/:id", get(preview_post))
        .route("/posts/:id/read", post(mark_read))
        .route("/preview", delete(close_preview))
        .route("/api/state", get(state_snapshot))
        .route("/events", get(events))
        .route("/refresh", post(refresh))
        .route("/refresh/status", get(refresh_status))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct Feedback {
    pub text: String,
    pub is_error: bool,
}

/// English text for a submission outcome.
pub fn feedback_text(code: ErrorCode) -> &'static str {
    match code {
        ErrorCode::Empty => "This field must not be empty",
        ErrorCode::InvalidUrl => "The link must be a valid URL",
        ErrorCode::AlreadyExists => "RSS already exists",
        ErrorCode::NetworkError => "Network error",
        ErrorCode::NoRss => "The resource does not contain valid RSS",
        ErrorCode::Default => "Something went wrong",
    }
}

const SUCCESS_TEXT: &str = "RSS loaded successfully";

// Template structs
#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexTemplate {
    pub feeds: Vec<Feed>,
    pub posts: Vec<Post>,
    pub sending: bool,
    pub feedback: Option<Feedback>,
}

impl IndexTemplate {
    fn from_state(state: StoreState, feedback: Option<Feedback>) -> Self {
        Self {
            feeds: state.feeds,
            posts: state.posts,
            sending: state.form.status == crate::store::FormStatus::Sending,
            feedback,
        }
    }
}

#[derive(Template)]
#[template(path = "refresh_button.html")]
pub struct RefreshButtonTemplate {
    pub refreshing: bool,
}

// Wrapper for HTML responses
struct HtmlTemplate<T>(T);

impl<T: Template> IntoResponse for HtmlTemplate<T> {
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(html) => Html(html).into_response(),
            Err(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to render template: {}", err),
            )
                .into_response(),
        }
    }
}

// Route handlers
pub async fn index(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.aggregator.store().snapshot();
    HtmlTemplate(IndexTemplate::from_state(snapshot, None))
}

#[derive(Deserialize)]
pub struct SubmitForm {
    #[serde(default)]
    pub url: String,
}

pub async fn submit_feed(
    State(state): State<Arc<AppState>>,
    Form(form): Form<SubmitForm>,
) -> impl IntoResponse {
    let (status, feedback) = match state.aggregator.submit(&form.url).await {
        Ok(_) => (
            StatusCode::OK,
            Feedback {
                text: SUCCESS_TEXT.to_string(),
                is_error: false,
            },
        ),
        Err(e) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Feedback {
                text: feedback_text(e.code()).to_string(),
                is_error: true,
            },
        ),
    };

    let snapshot = state.aggregator.store().snapshot();
    (
        status,
        HtmlTemplate(IndexTemplate::from_state(snapshot, Some(feedback))),
    )
}

pub async fn preview_post(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<Post>, StatusCode> {
    state
        .aggregator
        .store()
        .preview_post(PostId(id))
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

pub async fn mark_read(State(state): State<Arc<AppState>>, Path(id): Path<u64>) -> StatusCode {
    state.aggregator.store().mark_read(PostId(id));
    StatusCode::NO_CONTENT
}

pub async fn close_preview(State(state): State<Arc<AppState>>) -> StatusCode {
    state.aggregator.store().close_preview();
    StatusCode::NO_CONTENT
}

pub async fn state_snapshot(State(state): State<Arc<AppState>>) -> Json<StoreState> {
    Json(state.aggregator.store().snapshot())
}

/// Stream every store change as a server-sent event named by its path.
///
/// A subscriber that falls behind receives a `resync` event carrying the
/// number of skipped changes and should reload `/api/state`.
pub async fn events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = state.aggregator.store().subscribe();

    let stream = BroadcastStream::new(rx).map(|result| match result {
        Ok(event) => {
            let data = serde_json::to_string(&event).unwrap_or_default();
            Ok(SseEvent::default().event(event.path()).data(data))
        }
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            warn!(skipped, "Event subscriber lagged, requesting resync");
            Ok(SseEvent::default().event("resync").data(skipped.to_string()))
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

pub async fn refresh(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    // Spawn the refresh task
    let aggregator = state.aggregator.clone();
    tokio::spawn(async move {
        let _ = aggregator.scheduler().refresh_all().await;
    });

    // Return refreshing state immediately
    HtmlTemplate(RefreshButtonTemplate { refreshing: true })
}

pub async fn refresh_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let refreshing = state.aggregator.scheduler().is_refreshing().await;
    HtmlTemplate(RefreshButtonTemplate { refreshing })
}

pub async fn health() -> impl IntoResponse {
    Html("OK")
}
