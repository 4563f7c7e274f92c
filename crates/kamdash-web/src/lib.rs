//! Axum + Askama dashboard UI with htmx partials.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use askama::Template;
use axum::{
    extract::{Path as AxumPath, State},
    http::{header, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use chrono::{Duration, NaiveDate};
use kamdash_core::notes;
use kamdash_core::views::{DashboardView, SourceFilter, TimelineFilter, ViewFilter};
use kamdash_core::{ActionableItem, Source, Swimlane};
use kamdash_sync::{ActionError, Alert, AlertLevel, DashboardService, Submission};
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::info;

pub const CRATE_NAME: &str = "kamdash-web";

#[derive(Clone)]
pub struct AppState {
    pub service: DashboardService,
    pub workspace_root: PathBuf,
}

impl AppState {
    pub fn new(service: DashboardService, workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            service,
            workspace_root: workspace_root.into(),
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/swimlanes", get(swimlanes_handler))
        .route("/api/dashboard", get(dashboard_json_handler))
        .route("/filters/source", post(source_filter_handler))
        .route("/filters/view", post(view_filter_handler))
        .route("/filters/kam", post(kam_filter_handler))
        .route("/filters/timeline", post(timeline_filter_handler))
        .route("/filters/search", post(search_filter_handler))
        .route("/refresh", post(refresh_handler))
        .route("/items/{id}/action", get(action_form_handler))
        .route("/items/{id}/comment", post(comment_handler))
        .route("/items/{id}/complete", post(complete_handler))
        .route("/items/{id}/notes", get(notes_handler))
        .route("/assets/static/app.css", get(app_css_handler))
        .with_state(Arc::new(state))
}

pub fn port_from_env() -> u16 {
    std::env::var("KAMDASH_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000)
}

pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "dashboard listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

#[derive(Debug, Clone)]
struct KpiTile {
    value: &'static str,
    label: &'static str,
    count: usize,
    css_class: &'static str,
    selected: bool,
}

#[derive(Debug, Clone)]
struct FilterOption {
    value: &'static str,
    label: &'static str,
    count: usize,
    selected: bool,
}

#[derive(Debug, Clone)]
struct KamOption {
    name: String,
    count: usize,
    selected: bool,
}

#[derive(Debug, Clone)]
struct Banner {
    css_class: &'static str,
    message: String,
}

#[derive(Debug, Clone)]
struct CardView {
    id: String,
    candidate_name: String,
    company: String,
    role: String,
    status: String,
    status_class: &'static str,
    severity: &'static str,
    pending_days: u32,
    source_label: &'static str,
    kam: String,
    platform_link: String,
    preview: String,
    snooze_expired: bool,
    countdown: String,
}

#[derive(Debug, Clone)]
struct LaneView {
    css_class: &'static str,
    title: &'static str,
    empty_text: &'static str,
    cards: Vec<CardView>,
}

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate {
    search: String,
    dashboard_html: String,
}

#[derive(Template)]
#[template(path = "dashboard_partial.html")]
struct DashboardPartialTemplate {
    kpis: Vec<KpiTile>,
    sources: Vec<FilterOption>,
    views: Vec<FilterOption>,
    kams: Vec<KamOption>,
    all_kams_selected: bool,
    last_refreshed: String,
    swimlanes_html: String,
}

#[derive(Template)]
#[template(path = "swimlanes_partial.html")]
struct SwimlanesPartialTemplate {
    banners: Vec<Banner>,
    lanes: Vec<LaneView>,
}

#[derive(Debug, Clone)]
struct QuickSnooze {
    label: &'static str,
    date: String,
    selected: bool,
}

#[derive(Template)]
#[template(path = "action_form.html")]
struct ActionFormTemplate {
    id: String,
    candidate_name: String,
    company: String,
    error: String,
    comment: String,
    custom_date: String,
    today: String,
    quick: Vec<QuickSnooze>,
    no_snooze_selected: bool,
}

#[derive(Template)]
#[template(path = "notes.html")]
struct NotesTemplate {
    candidate_name: String,
    company: String,
    role: String,
    source_label: &'static str,
    kam: String,
    platform_link: String,
    lines: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ValueForm {
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct SearchForm {
    #[serde(default)]
    q: String,
}

#[derive(Debug, Default, Deserialize)]
struct CommentForm {
    #[serde(default)]
    comment: String,
    #[serde(default)]
    snooze: String,
    #[serde(default)]
    quick_snooze: String,
}

impl CommentForm {
    /// The custom date beats the quick-pick buttons.
    fn snooze_text(&self) -> &str {
        match self.snooze.trim() {
            "" => self.quick_snooze.trim(),
            custom => custom,
        }
    }
}

async fn index_handler(State(state): State<Arc<AppState>>) -> Response {
    let dashboard_html = match render_dashboard(&state).await {
        Ok(html) => html,
        Err(err) => return server_error(err),
    };
    let search = state.service.store().read().await.selection().search.clone();
    render_html(IndexTemplate { search, dashboard_html })
}

async fn swimlanes_handler(State(state): State<Arc<AppState>>) -> Response {
    let view = state.service.view().await;
    match render_swimlanes(&state, &view).await {
        Ok(html) => with_trigger(Html(html).into_response(), "swimlanesLoaded"),
        Err(err) => server_error(err),
    }
}

async fn dashboard_json_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(state.service.view().await).into_response()
}

async fn source_filter_handler(State(state): State<Arc<AppState>>, Form(form): Form<ValueForm>) -> Response {
    match form.value.parse::<SourceFilter>() {
        Ok(filter) => {
            state.service.with_store(|s| s.set_source_filter(filter)).await;
            dashboard_response(&state).await
        }
        Err(err) => bad_request(err.to_string()),
    }
}

async fn view_filter_handler(State(state): State<Arc<AppState>>, Form(form): Form<ValueForm>) -> Response {
    match form.value.parse::<ViewFilter>() {
        Ok(filter) => {
            state.service.with_store(|s| s.set_view_filter(filter)).await;
            dashboard_response(&state).await
        }
        Err(err) => bad_request(err.to_string()),
    }
}

async fn kam_filter_handler(State(state): State<Arc<AppState>>, Form(form): Form<ValueForm>) -> Response {
    state.service.with_store(|s| s.toggle_kam(&form.value)).await;
    dashboard_response(&state).await
}

async fn timeline_filter_handler(State(state): State<Arc<AppState>>, Form(form): Form<ValueForm>) -> Response {
    match form.value.parse::<TimelineFilter>() {
        Ok(filter) => {
            state.service.with_store(|s| s.set_timeline(filter)).await;
            dashboard_response(&state).await
        }
        Err(err) => bad_request(err.to_string()),
    }
}

async fn search_filter_handler(State(state): State<Arc<AppState>>, Form(form): Form<SearchForm>) -> Response {
    state.service.with_store(|s| s.set_search(&form.q)).await;
    dashboard_response(&state).await
}

async fn refresh_handler(State(state): State<Arc<AppState>>) -> Response {
    state.service.refresh(false).await;
    with_trigger(dashboard_response(&state).await, "dashboardRefreshed")
}

async fn action_form_handler(State(state): State<Arc<AppState>>, AxumPath(id): AxumPath<String>) -> Response {
    action_form_response(&state, &id, &CommentForm::default(), "", StatusCode::OK).await
}

async fn comment_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
    Form(form): Form<CommentForm>,
) -> Response {
    let snooze = match form.snooze_text() {
        "" => None,
        text => match notes::parse_note_date(text) {
            Some(date) => Some(date),
            None => {
                return action_form_response(
                    &state,
                    &id,
                    &form,
                    "Please pick a valid snooze date.",
                    StatusCode::UNPROCESSABLE_ENTITY,
                )
                .await
            }
        },
    };

    match state.service.submit_action(&id, &form.comment, snooze).await {
        Ok(_) => with_trigger(dashboard_response(&state).await, "actionSaved"),
        Err(ActionError::Validation(message)) => {
            action_form_response(&state, &id, &form, message, StatusCode::UNPROCESSABLE_ENTITY).await
        }
        Err(ActionError::NotFound(_)) => not_found(),
        Err(err) => server_error(err.into()),
    }
}

async fn complete_handler(State(state): State<Arc<AppState>>, AxumPath(id): AxumPath<String>) -> Response {
    match state.service.complete(&id).await {
        // Duplicate click while the first completion is still pending.
        Ok(Submission::AlreadyInFlight) => dashboard_response(&state).await,
        Ok(Submission::Started(_)) => with_trigger(dashboard_response(&state).await, "itemCompleted"),
        Err(ActionError::NotFound(_)) => not_found(),
        Err(err) => server_error(err.into()),
    }
}

async fn notes_handler(State(state): State<Arc<AppState>>, AxumPath(id): AxumPath<String>) -> Response {
    let Some(item) = state.service.store().read().await.item(&id).cloned() else {
        return not_found();
    };
    render_html(NotesTemplate {
        lines: item
            .display_notes
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect(),
        source_label: item.source.label(),
        kam: item.kam_label().to_string(),
        candidate_name: item.candidate_name,
        company: item.company,
        role: item.role,
        platform_link: item.platform_link,
    })
}

async fn app_css_handler(State(state): State<Arc<AppState>>) -> Response {
    let css_path = state.workspace_root.join("assets/static/app.css");
    match tokio::fs::read_to_string(&css_path).await {
        Ok(css) => ([(header::CONTENT_TYPE, "text/css; charset=utf-8")], css).into_response(),
        Err(_) => (StatusCode::NOT_FOUND, Html("/* missing app.css */".to_string())).into_response(),
    }
}

async fn dashboard_response(state: &AppState) -> Response {
    match render_dashboard(state).await {
        Ok(html) => Html(html).into_response(),
        Err(err) => server_error(err),
    }
}

async fn render_dashboard(state: &AppState) -> anyhow::Result<String> {
    let (view, last_refreshed) = {
        let store = state.service.store().read().await;
        let last = store
            .last_refreshed()
            .map(|at| at.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|| "never".to_string());
        (store.view(state.service.today()), last)
    };
    let swimlanes_html = render_swimlanes(state, &view).await?;
    let selection = &view.selection;

    let kpis = [
        (TimelineFilter::All, "Total Pending", view.kpis.total, "total"),
        (TimelineFilter::FortyFivePlus, "Critical (45+ Days)", view.kpis.critical, "critical"),
        (TimelineFilter::ThirtyPlus, "Attention (30+ Days)", view.kpis.attention, "attention"),
        (TimelineFilter::TenPlus, "Normal (10+ Days)", view.kpis.normal, "normal"),
    ]
    .into_iter()
    .map(|(filter, label, count, css_class)| KpiTile {
        value: filter.as_str(),
        label,
        count,
        css_class,
        selected: selection.timeline == filter,
    })
    .collect();

    let sources = [
        (SourceFilter::All, "All Sources", view.source_counts.all),
        (SourceFilter::PostTbr, Source::PostTbr.label(), view.source_counts.post_tbr),
        (SourceFilter::Ic, Source::Ic.label(), view.source_counts.ic),
    ]
    .into_iter()
    .map(|(filter, label, count)| FilterOption {
        value: filter.as_str(),
        label,
        count,
        selected: selection.source == filter,
    })
    .collect();

    let views = [
        (ViewFilter::All, "All", view.view_counts.all),
        (ViewFilter::New, "New", view.view_counts.new),
    ]
    .into_iter()
    .map(|(filter, label, count)| FilterOption {
        value: filter.as_str(),
        label,
        count,
        selected: selection.view == filter,
    })
    .collect();

    let kams = view
        .all_kams
        .iter()
        .map(|name| KamOption {
            count: view
                .leaderboard
                .iter()
                .find(|stat| &stat.name == name)
                .map(|stat| stat.count)
                .unwrap_or(0),
            selected: selection.kams.contains(name),
            name: name.clone(),
        })
        .collect();

    DashboardPartialTemplate {
        kpis,
        sources,
        views,
        kams,
        all_kams_selected: selection.kams.is_empty(),
        last_refreshed,
        swimlanes_html,
    }
    .render()
    .context("rendering dashboard partial")
}

async fn render_swimlanes(state: &AppState, view: &DashboardView) -> anyhow::Result<String> {
    let (loading, warnings) = {
        let store = state.service.store().read().await;
        (store.is_loading(), store.warnings().to_vec())
    };

    let mut banners = Vec::new();
    if loading {
        banners.push(Banner {
            css_class: "banner-info",
            message: "Loading Actionables...".to_string(),
        });
    }
    banners.extend(warnings.into_iter().map(|message| Banner {
        css_class: "banner-warning",
        message,
    }));
    while let Some(alert) = state.service.take_alert().await {
        banners.push(alert_banner(alert));
    }

    let lanes = Swimlane::ORDER
        .into_iter()
        .map(|lane| LaneView {
            css_class: lane.css_class(),
            title: lane.title(),
            empty_text: lane.empty_text(),
            cards: view.lane(lane).iter().map(|item| card_view(item, view.today)).collect(),
        })
        .collect();

    SwimlanesPartialTemplate { banners, lanes }
        .render()
        .context("rendering swimlanes partial")
}

fn alert_banner(alert: Alert) -> Banner {
    Banner {
        css_class: match alert.level {
            AlertLevel::Success => "banner-success",
            AlertLevel::Error => "banner-error",
        },
        message: alert.message,
    }
}

fn card_view(item: &ActionableItem, today: NaiveDate) -> CardView {
    let snooze_expired = item.is_snooze_elapsed(today);
    let countdown = match item.snooze_until.as_deref() {
        Some(until) if !snooze_expired => notes::snooze_days_left(until, today)
            .map(|days| format!("{days}d left"))
            .unwrap_or_default(),
        _ => String::new(),
    };
    CardView {
        id: item.id.clone(),
        candidate_name: item.candidate_name.clone(),
        company: item.company.clone(),
        role: item.role.clone(),
        status: item.status.clone(),
        status_class: status_class(&item.status),
        severity: item.severity.as_str(),
        pending_days: item.pending_days,
        source_label: item.source.label(),
        kam: item.kam_label().to_string(),
        platform_link: item.platform_link.clone(),
        preview: notes::latest_note_preview(&item.display_notes).unwrap_or_default(),
        snooze_expired,
        countdown,
    }
}

fn status_class(status: &str) -> &'static str {
    let status = status.to_lowercase();
    if status.contains("waiting") {
        "status-waiting"
    } else if status.contains("availabilities") {
        "status-availabilities"
    } else if status.contains("completed") {
        "status-completed"
    } else if status.contains("edge case") {
        "status-edge-case"
    } else {
        "status-default"
    }
}

async fn action_form_response(
    state: &AppState,
    id: &str,
    form: &CommentForm,
    error: &str,
    status: StatusCode,
) -> Response {
    let Some(item) = state.service.store().read().await.item(id).cloned() else {
        return not_found();
    };
    let today = state.service.today();
    let chosen = form.snooze_text().to_string();
    let quick = [("1 Day", 1), ("3 Days", 3), ("7 Days", 7)]
        .into_iter()
        .map(|(label, days)| {
            let date = notes::format_note_date(today + Duration::days(days));
            QuickSnooze {
                label,
                selected: date == chosen,
                date,
            }
        })
        .collect();

    let mut resp = render_html(ActionFormTemplate {
        id: item.id,
        candidate_name: item.candidate_name,
        company: item.company,
        error: error.to_string(),
        comment: form.comment.clone(),
        custom_date: form.snooze.trim().to_string(),
        today: notes::format_note_date(today),
        quick,
        no_snooze_selected: chosen.is_empty(),
    });
    if resp.status() == StatusCode::OK {
        *resp.status_mut() = status;
        if status != StatusCode::OK {
            resp.headers_mut()
                .insert("hx-retarget", HeaderValue::from_static("#modal"));
            resp.headers_mut()
                .insert("hx-reswap", HeaderValue::from_static("innerHTML"));
        }
    }
    resp
}

fn with_trigger(mut resp: Response, event: &'static str) -> Response {
    resp.headers_mut().insert(
        header::HeaderName::from_static("hx-trigger"),
        HeaderValue::from_static(event),
    );
    resp
}

fn render_html<T: Template>(tpl: T) -> Response {
    match tpl.render() {
        Ok(html) => Html(html).into_response(),
        Err(err) => server_error(anyhow::anyhow!(err.to_string())),
    }
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Html("Actionable not found".to_string())).into_response()
}

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, Html(message)).into_response()
}

fn server_error(err: anyhow::Error) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(format!("Server error: {err:#}")),
    )
        .into_response()
}
