use axum::{
    extract::{Form, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json, Redirect},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tera::Context;
use tracing::error;

use crate::join::JoinDispatch;
use crate::models::Settings;
use crate::pager::PageAction;
use crate::state::AppState;

/// Form posted by the join buttons.
#[derive(Debug, Deserialize)]
pub struct JoinForm {
    pub access_code: String,
}

/// Settings form. Unchecked checkboxes are simply absent.
#[derive(Debug, Default, Deserialize)]
pub struct SettingsForm {
    #[serde(default, deserialize_with = "checkbox")]
    pub skip_totals: bool,
    #[serde(default, deserialize_with = "checkbox")]
    pub show_owner_inside: bool,
    #[serde(default, deserialize_with = "checkbox")]
    pub only_one_player: bool,
    #[serde(default, deserialize_with = "checkbox")]
    pub use_deeplink: bool,
}

impl From<SettingsForm> for Settings {
    fn from(form: SettingsForm) -> Self {
        Settings {
            skip_totals: form.skip_totals,
            show_owner_inside: form.show_owner_inside,
            only_one_player: form.only_one_player,
            use_deeplink: form.use_deeplink,
        }
    }
}

fn checkbox<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(matches!(opt.as_deref(), Some("on" | "true" | "1")))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/page/first", post(first_page))
        .route("/page/refresh", post(refresh_page))
        .route("/page/next", post(next_page))
        .route("/totals/rescan", post(rescan_totals))
        .route("/totals/abort", post(abort_totals))
        .route("/join", post(join))
        .route("/settings", post(save_settings))
        .route("/api/page", get(api_page))
        .route("/api/totals", get(api_totals))
        .route("/api/status", get(api_status))
        .with_state(state)
}

fn render_template(
    tera: &tera::Tera,
    template: &str,
    context: &Context,
) -> Result<Html<String>, (StatusCode, &'static str)> {
    tera.render(template, context).map(Html).map_err(|e| {
        error!(template, error = %e, "template render failed");
        (StatusCode::INTERNAL_SERVER_ERROR, "Render error")
    })
}

/// GET / - The popup: totals, the current page and the settings.
pub async fn index(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let engine = &state.engine;
    let mut context = Context::new();
    context.insert("page", &engine.page_view());
    context.insert("totals", &engine.totals_view());
    context.insert("settings", &engine.settings());
    context.insert("status", &engine.status());
    context.insert("walking", &engine.is_walking());

    render_template(&state.tera, "popup.html", &context)
}

/// Waits for a page scan that runs on its own task, so a request dropped
/// during a rate-limit wait still gets its action replayed.
async fn browse(state: &AppState, action: PageAction) -> Redirect {
    if let Err(e) = state.engine.spawn_scan(action).await {
        error!(?action, error = %e, "page scan task failed");
    }
    Redirect::to("/")
}

/// POST /page/first
pub async fn first_page(State(state): State<Arc<AppState>>) -> Redirect {
    browse(&state, PageAction::Reset).await
}

/// POST /page/refresh
pub async fn refresh_page(State(state): State<Arc<AppState>>) -> Redirect {
    browse(&state, PageAction::Refresh).await
}

/// POST /page/next
pub async fn next_page(State(state): State<Arc<AppState>>) -> Redirect {
    browse(&state, PageAction::Next).await
}

/// POST /totals/rescan - Starts a forced walk in the background.
/// A completed walk reloads the first page by itself.
pub async fn rescan_totals(State(state): State<Arc<AppState>>) -> Redirect {
    tokio::spawn(async move { state.engine.refresh_totals(true).await });
    Redirect::to("/")
}

/// POST /totals/abort
pub async fn abort_totals(State(state): State<Arc<AppState>>) -> Redirect {
    state.engine.abort_totals();
    Redirect::to("/")
}

/// POST /join - Deep links redirect the browser straight into the client.
pub async fn join(State(state): State<Arc<AppState>>, Form(form): Form<JoinForm>) -> Redirect {
    match state.engine.join(&form.access_code) {
        Ok(JoinDispatch::DeepLink(uri)) => Redirect::to(&uri),
        Ok(JoinDispatch::HostLaunched) | Err(_) => Redirect::to("/"),
    }
}

/// POST /settings
pub async fn save_settings(
    State(state): State<Arc<AppState>>,
    Form(form): Form<SettingsForm>,
) -> Redirect {
    if let Err(e) = state.engine.update_settings(form.into()) {
        error!(error = %e, "could not persist settings");
    }
    Redirect::to("/")
}

/// GET /api/page - JSON view of the current page.
pub async fn api_page(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.page_view())
}

/// GET /api/totals - JSON totals, live while a walk runs.
pub async fn api_totals(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.totals_view())
}

/// GET /api/status
pub async fn api_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": state.engine.status(),
        "walking": state.engine.is_walking(),
        "pageLoading": state.engine.pages().is_busy(),
    }))
}
