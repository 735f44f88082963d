use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    Form,
};
use serde::Deserialize;
use tracing::info;

use crate::fetcher::NewsItem;
use crate::slots::{SlotBoard, SlotState};
use crate::sources::{FeedSource, NewSource, SourceError, SourceStore};

/// Client event that makes the grid reload itself
const SOURCES_CHANGED: &str = "sources-changed";
/// Slots with more items than this get a scroll hint
const SCROLL_HINT_THRESHOLD: usize = 5;

pub struct AppState {
    pub store: Arc<SourceStore>,
    pub board: Arc<SlotBoard>,
}

// Template structs
#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexTemplate {
    pub groups: Vec<GroupView>,
    pub refreshing: bool,
}

#[derive(Template)]
#[template(path = "grid.html")]
pub struct GridTemplate {
    pub groups: Vec<GroupView>,
}

pub struct GroupView {
    pub source: FeedSource,
    pub slot_html: String,
}

#[derive(Template)]
#[template(path = "slot.html")]
pub struct SlotTemplate {
    pub slot: SlotView,
}

pub struct SlotView {
    pub poll_path: String,
    pub loading: bool,
    pub failed: bool,
    pub items: Vec<NewsItem>,
    pub scroll_hint: bool,
}

impl SlotView {
    fn new(url: &str, state: SlotState) -> Self {
        let encoded: String = url::form_urlencoded::byte_serialize(url.as_bytes()).collect();
        let poll_path = format!("/slot?url={}", encoded);

        match state {
            SlotState::Loading => Self {
                poll_path,
                loading: true,
                failed: false,
                items: Vec::new(),
                scroll_hint: false,
            },
            SlotState::Failed => Self {
                poll_path,
                loading: false,
                failed: true,
                items: Vec::new(),
                scroll_hint: false,
            },
            SlotState::Loaded(items) => Self {
                poll_path,
                loading: false,
                failed: false,
                scroll_hint: items.len() > SCROLL_HINT_THRESHOLD,
                items,
            },
        }
    }
}

#[derive(Template)]
#[template(path = "settings.html")]
pub struct SettingsTemplate {
    pub sources: Vec<FeedSource>,
    pub form: NewSource,
    pub message: Option<String>,
    pub error: Option<String>,
}

impl SettingsTemplate {
    fn new(sources: Vec<FeedSource>) -> Self {
        Self {
            sources,
            form: NewSource::default(),
            message: None,
            error: None,
        }
    }
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

// Custom error type
pub struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Error: {}", self.0),
        )
            .into_response()
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(err: E) -> Self {
        AppError(err.into())
    }
}

async fn build_groups(
    state: &AppState,
    sources: Vec<FeedSource>,
) -> Result<Vec<GroupView>, AppError> {
    let mut groups = Vec::with_capacity(sources.len());
    for source in sources {
        let slot_state = state
            .board
            .slot(&source.url)
            .await
            .unwrap_or(SlotState::Loading);
        let slot_html = SlotTemplate {
            slot: SlotView::new(&source.url, slot_state),
        }
        .render()?;
        groups.push(GroupView { source, slot_html });
    }
    Ok(groups)
}

async fn current_groups(state: &AppState) -> Result<Vec<GroupView>, AppError> {
    let sources = state.store.load().await?;
    state.board.ensure(&sources).await;
    build_groups(state, sources).await
}

fn settings_changed(template: SettingsTemplate) -> Response {
    ([("HX-Trigger", SOURCES_CHANGED)], HtmlTemplate(template)).into_response()
}

// Route handlers
pub async fn index(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    let groups = current_groups(&state).await?;
    let refreshing = state.board.is_refreshing().await;

    Ok(HtmlTemplate(IndexTemplate { groups, refreshing }))
}

pub async fn grid(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    let groups = current_groups(&state).await?;
    Ok(HtmlTemplate(GridTemplate { groups }))
}

#[derive(Deserialize)]
pub struct SlotQuery {
    pub url: String,
}

pub async fn slot(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SlotQuery>,
) -> Response {
    match state.board.slot(&query.url).await {
        Some(slot_state) => HtmlTemplate(SlotTemplate {
            slot: SlotView::new(&query.url, slot_state),
        })
        .into_response(),
        // Detached: an empty fragment removes the slot on the page
        None => Html("").into_response(),
    }
}

pub async fn refresh(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    let sources = state.store.load().await?;
    state.board.refresh(&sources).await;
    let groups = build_groups(&state, sources).await?;

    Ok(HtmlTemplate(GridTemplate { groups }))
}

pub async fn settings(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    let sources = state.store.load().await?;
    Ok(HtmlTemplate(SettingsTemplate::new(sources)))
}

pub async fn add_source(
    State(state): State<Arc<AppState>>,
    Form(candidate): Form<NewSource>,
) -> Result<Response, AppError> {
    let (status, error) = match state.store.add(candidate.clone()).await {
        Ok(sources) => {
            state.board.ensure(&sources).await;
            let mut template = SettingsTemplate::new(sources);
            template.message = Some("Source added".to_string());
            return Ok(settings_changed(template));
        }
        Err(SourceError::Validation(msg)) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
        Err(SourceError::Duplicate(url)) => (
            StatusCode::CONFLICT,
            format!("A source with URL {} already exists", url),
        ),
        Err(e) => return Err(e.into()),
    };

    info!("Rejected new source: {}", error);
    let mut template = SettingsTemplate::new(state.store.load().await?);
    template.form = candidate;
    template.error = Some(error);
    Ok((status, HtmlTemplate(template)).into_response())
}

#[derive(Deserialize)]
pub struct DeleteForm {
    pub url: String,
}

pub async fn delete_source(
    State(state): State<Arc<AppState>>,
    Form(form): Form<DeleteForm>,
) -> Result<Response, AppError> {
    let sources = state.store.remove(&form.url).await?;
    state.board.detach(&form.url).await;

    Ok(settings_changed(SettingsTemplate::new(sources)))
}

pub async fn restore_defaults(
    State(state): State<Arc<AppState>>,
) -> Result<Response, AppError> {
    state.store.restore_defaults().await?;
    let sources = state.store.load().await?;
    state.board.refresh(&sources).await;

    let mut template = SettingsTemplate::new(sources);
    template.message = Some("Default sources restored".to_string());
    Ok(settings_changed(template))
}

pub async fn health() -> impl IntoResponse {
    Html("OK")
}
