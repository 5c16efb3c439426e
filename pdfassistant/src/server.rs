use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::assistant::configuration::Configuration;
use crate::assistant::resources::Resources;
use crate::assistant::session::{handle_interaction, Interaction, SessionStates, View, TITLE};

pub struct AppState {
    resources: Resources,
    sessions: SessionStates,
}

impl AppState {
    pub fn new(resources: Resources) -> Self {
        let config = resources.config();
        let sessions = SessionStates::with_limits(
            Duration::from_secs(config.session_ttl_secs),
            config.max_sessions,
        );
        Self { resources, sessions }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    session_id: Option<String>,
    message: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct SessionRequest {
    session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RunsResponse {
    user_id: String,
    run_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct InteractionResponse {
    session_id: String,
    #[serde(flatten)]
    view: View,
}

// Errors that escape the UI loop, e.g. a knowledge base that failed to load.
struct ApiError(anyhow::Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!("interaction failed: {:#}", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({
                "error": format!("Error: {:#}", self.0),
            })),
        )
            .into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        ApiError(err.into())
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(serve_index))
        .route("/render", post(handle_render))
        .route("/chat", post(handle_chat))
        .route("/session/new", post(handle_new_session))
        .route("/runs", get(list_runs))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run_server(config: Configuration) -> anyhow::Result<()> {
    let addr = config.addr;
    let state = Arc::new(AppState::new(Resources::new(config)));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Starting server on http://{addr}");

    axum::serve(listener, router(state).into_make_service()).await?;
    Ok(())
}

async fn serve_index(State(state): State<Arc<AppState>>) -> Html<String> {
    let warning = state
        .resources
        .config()
        .warning()
        .map(|w| format!(r#"<div id="warning">{}</div>"#, escape_html(&w)))
        .unwrap_or_default();
    Html(
        INDEX_HTML
            .replace("{{title}}", TITLE)
            .replace("{{warning}}", &warning),
    )
}

/// The pass the page runs on load. It builds the assistant, so the knowledge
/// base is loaded before the first question and load failures show up here.
async fn handle_render(
    State(state): State<Arc<AppState>>,
    request: Option<Json<SessionRequest>>,
) -> Result<Json<InteractionResponse>, ApiError> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    run_interaction(&state, request.session_id, Interaction::Render).await
}

async fn handle_chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<InteractionResponse>, ApiError> {
    run_interaction(&state, request.session_id, Interaction::Submit(request.message)).await
}

async fn handle_new_session(
    State(state): State<Arc<AppState>>,
    request: Option<Json<SessionRequest>>,
) -> Result<Json<InteractionResponse>, ApiError> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    run_interaction(&state, request.session_id, Interaction::NewSession).await
}

/// Stored conversations of the configured user, most recent first.
async fn list_runs(State(state): State<Arc<AppState>>) -> Result<Json<RunsResponse>, ApiError> {
    let user_id = state.resources.config().user_id.clone();
    let storage = state.resources.storage().await?;
    let run_ids = storage.run_ids(&user_id)?;
    Ok(Json(RunsResponse { user_id, run_ids }))
}

async fn run_interaction(
    state: &AppState,
    session_id: Option<String>,
    interaction: Interaction,
) -> Result<Json<InteractionResponse>, ApiError> {
    let (session_id, session) = state.sessions.session(session_id.as_deref()).await;
    let mut session_state = session.lock().await;

    let config = state.resources.config();
    let mut view =
        handle_interaction(&mut session_state, interaction, &state.resources, &config.user_id).await?;
    view.warning = config.warning();

    Ok(Json(InteractionResponse { session_id, view }))
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>{{title}}</title>
    <style>
        body {
            font-family: Arial, sans-serif;
            max-width: 800px;
            margin: 0 auto;
            padding: 20px;
        }
        .row {
            display: flex;
            gap: 10px;
            align-items: flex-end;
        }
        .row .input {
            flex: 4;
        }
        input[type=text] {
            width: 100%;
            padding: 10px;
            box-sizing: border-box;
        }
        button {
            padding: 10px 20px;
            background-color: #007bff;
            color: white;
            border: none;
            border-radius: 4px;
            cursor: pointer;
        }
        #warning {
            padding: 10px;
            margin-bottom: 10px;
            background-color: #fff3cd;
            border-radius: 4px;
        }
        #error {
            padding: 10px;
            margin-top: 20px;
            background-color: #f8d7da;
            border-radius: 4px;
            display: none;
        }
        #response {
            padding: 20px;
            border: 1px solid #ddd;
            border-radius: 4px;
        }
        #result {
            display: none;
            margin-top: 20px;
        }
    </style>
</head>
<body>
    <h1>{{title}}</h1>
    {{warning}}
    <form id="ask" class="row">
        <div class="input">
            <label for="message">Ask about the PDF:</label>
            <input type="text" id="message" autocomplete="off">
        </div>
        <button type="button" id="new-session">Start New Session</button>
    </form>
    <div id="result">
        <h3 id="heading"></h3>
        <div id="response"></div>
    </div>
    <div id="error"></div>

    <script>
    function sessionId() {
        return localStorage.getItem('pdf_assistant_session');
    }

    function render(data) {
        if (data.session_id) {
            localStorage.setItem('pdf_assistant_session', data.session_id);
        }
        const result = document.getElementById('result');
        const error = document.getElementById('error');
        if (data.response) {
            document.getElementById('heading').textContent = data.heading || '';
            document.getElementById('response').innerHTML = data.response_html;
            result.style.display = 'block';
        } else {
            result.style.display = 'none';
        }
        if (data.error) {
            error.textContent = data.error;
            error.style.display = 'block';
        } else {
            error.style.display = 'none';
        }
    }

    async function post(path, body) {
        try {
            const response = await fetch(path, {
                method: 'POST',
                headers: { 'Content-Type': 'application/json' },
                body: JSON.stringify(body),
            });
            render(await response.json());
        } catch (e) {
            render({ error: `Error: ${e.message}` });
        }
    }

    document.getElementById('ask').addEventListener('submit', (event) => {
        event.preventDefault();
        const message = document.getElementById('message').value;
        if (message.trim()) {
            post('/chat', { session_id: sessionId(), message });
        }
    });

    document.getElementById('new-session').addEventListener('click', () => {
        document.getElementById('message').value = '';
        post('/session/new', { session_id: sessionId() });
    });

    post('/render', { session_id: sessionId() });
    </script>
</body>
</html>
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::agent::testing::StubModel;

    fn state(dir: &tempfile::TempDir) -> Arc<AppState> {
        let config = Configuration {
            db_url: dir.path().join("ai.db").display().to_string(),
            document_urls: Vec::new(),
            ..Configuration::default()
        };
        let resources = Resources::with_model(config, Arc::new(StubModel::replying("Coconut milk.")));
        Arc::new(AppState::new(resources))
    }

    async fn chat(state: &Arc<AppState>, session_id: Option<&str>, message: &str) -> InteractionResponse {
        let request = ChatRequest {
            session_id: session_id.map(str::to_string),
            message: message.to_string(),
        };
        match handle_chat(State(Arc::clone(state)), Json(request)).await {
            Ok(Json(response)) => response,
            Err(e) => panic!("chat failed: {:#}", e.0),
        }
    }

    #[tokio::test]
    async fn index_shows_title_and_missing_key_warning() {
        let dir = tempfile::tempdir().unwrap();
        let Html(page) = serve_index(State(state(&dir))).await;
        assert!(page.contains("<title>PDF Assistant</title>"));
        assert!(page.contains("Ask about the PDF:"));
        assert!(page.contains("Start New Session"));
        assert!(page.contains("GROQ_API_KEY not set"));
    }

    #[tokio::test]
    async fn chat_issues_session_and_keeps_run() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);

        let first = chat(&state, None, "What ingredients are in the green curry?").await;
        assert!(!first.session_id.is_empty());
        assert!(first.view.response.unwrap().ends_with("Coconut milk."));
        let run_id = first.view.run_id.clone().unwrap();

        let second = chat(&state, Some(first.session_id.as_str()), "And the red curry?").await;
        assert_eq!(second.session_id, first.session_id);
        assert_eq!(second.view.run_id.as_deref(), Some(run_id.as_str()));

        let stored = state.sessions.snapshot(&first.session_id).await.unwrap();
        assert_eq!(stored.run_id, Some(run_id));
    }

    #[tokio::test]
    async fn new_session_resets_run() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);
        let first = chat(&state, None, "hello").await;

        let request = SessionRequest {
            session_id: Some(first.session_id.clone()),
        };
        let Ok(Json(reset)) = handle_new_session(State(Arc::clone(&state)), Some(Json(request))).await
        else {
            panic!("reset failed");
        };
        assert_eq!(reset.view.run_id, None);

        let next = chat(&state, Some(first.session_id.as_str()), "hello again").await;
        assert_ne!(next.view.run_id, first.view.run_id);
    }

    #[tokio::test]
    async fn chat_renders_markdown() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);
        let response = chat(&state, None, "What is in green curry?").await;
        let html = response.view.response_html.unwrap();
        assert!(html.contains("<li>Running: search_knowledge_base(query: What is in green curry?)</li>"));
        assert!(html.contains("<p>Coconut milk.</p>"));
    }

    #[tokio::test]
    async fn render_builds_the_assistant() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);

        let Ok(Json(rendered)) = handle_render(State(Arc::clone(&state)), None).await else {
            panic!("render failed");
        };
        assert_eq!(rendered.view.title, TITLE);
        assert!(rendered.view.response.is_none());
        assert!(rendered.view.warning.unwrap().contains("GROQ_API_KEY"));
        assert_eq!(state.sessions.len().await, 1);
    }

    #[tokio::test]
    async fn render_reports_knowledge_base_failure() {
        let dir = tempfile::tempdir().unwrap();
        let config = Configuration {
            db_url: dir.path().join("ai.db").display().to_string(),
            document_urls: Vec::new(),
            collection: "bad name".to_string(),
            ..Configuration::default()
        };
        let resources = Resources::with_model(config, Arc::new(StubModel::replying("unused")));
        let state = Arc::new(AppState::new(resources));

        let Err(err) = handle_render(State(state), None).await else {
            panic!("render should fail");
        };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let error = value["error"].as_str().unwrap();
        assert!(error.starts_with("Error:"));
        assert!(error.contains("invalid table name: bad name"));
    }

    #[tokio::test]
    async fn runs_lists_conversations_of_the_user() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);
        let first = chat(&state, None, "hello").await;
        let second = chat(&state, None, "hello from another tab").await;

        let Ok(Json(runs)) = list_runs(State(Arc::clone(&state))).await else {
            panic!("listing runs failed");
        };
        assert_eq!(runs.user_id, "pdf_assistant_user");
        assert_eq!(runs.run_ids.len(), 2);
        assert!(runs.run_ids.contains(&first.view.run_id.unwrap()));
        assert!(runs.run_ids.contains(&second.view.run_id.unwrap()));
    }

    #[tokio::test]
    async fn response_serializes_flat() {
        let response = InteractionResponse {
            session_id: "s".into(),
            view: View {
                title: TITLE.into(),
                error: Some("Agent call failed: boom".into()),
                ..View::default()
            },
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["session_id"], "s");
        assert_eq!(value["error"], "Agent call failed: boom");
        assert!(value["response"].is_null());
    }

    #[test]
    fn escapes_html() {
        assert_eq!(escape_html("<b>\"a\" & b</b>"), "&lt;b&gt;&quot;a&quot; &amp; b&lt;/b&gt;");
    }
}
