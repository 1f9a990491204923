use prism::controller::{ChatStreamController, ChatTurn};
use prism::db::init_db;
use prism::keys::{self, HostKeys};
use prism::logging::turn_id_middleware;
use prism::main_helper::{RawChatRequest, RawTitleRequest};
use prism::models::{self, resolve_model};
use prism::streaming::SSE_DONE_MARKER;
use prism::title::generate_title;
use prism::tools::ToolExecutor;
use prism::types::{
    new_message_id, MessageRecord, PrismError, Result, Role, StreamEvent,
};
use prism::{AppState, Args};

use axum::extract::State;
use axum::http::{HeaderMap, HeaderName};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use clap::Parser;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::Instrument;

const DEFAULT_TITLE_MODEL: &str = "Gemini 2.5 Flash";

/// Pick the caller's key for this provider: dedicated header first, then
/// the request body.
fn user_key<'a>(
    headers: &'a HeaderMap,
    body_key: Option<&'a str>,
    provider: prism::models::Provider,
) -> Option<&'a str> {
    headers
        .get(provider.key_header())
        .and_then(|v| v.to_str().ok())
        .or(body_key)
}

async fn chat_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<RawChatRequest>,
) -> Result<Response> {
    if body.messages.is_empty() {
        return Err(PrismError::InvalidRequest("messages must not be empty".to_string()).into());
    }

    let model = resolve_model(&body.model)?;
    let key = user_key(&headers, body.user_api_key.as_deref(), model.provider)
        .map(|k| k.to_string());

    let thread_id = body
        .thread_id
        .clone()
        .unwrap_or_else(|| format!("thread_{}", uuid::Uuid::new_v4().simple()));
    let history: Vec<_> = body.messages.iter().map(|m| m.to_chat_message()).collect();

    // Persist the incoming message and an empty assistant placeholder the
    // stream will fill in.
    if let Some(last) = body.messages.last() {
        state
            .store
            .insert_message(&MessageRecord {
                id: new_message_id(),
                thread_id: thread_id.clone(),
                role: last.role,
                content: last.content.clone(),
                created_at: chrono::Utc::now(),
                is_complete: true,
            })
            .await?;
    }
    let assistant_id = new_message_id();
    state
        .store
        .insert_message(&MessageRecord {
            id: assistant_id.clone(),
            thread_id: thread_id.clone(),
            role: Role::Assistant,
            content: String::new(),
            created_at: chrono::Utc::now(),
            is_complete: false,
        })
        .await?;

    let (tx, rx) = mpsc::channel::<StreamEvent>(100);
    let cancel = CancellationToken::new();

    let turn = ChatTurn {
        message_id: assistant_id,
        history,
        model: model.clone(),
        user_api_key: key,
        web_search_enabled: body.web_search_enabled,
    };

    let controller = ChatStreamController::new(
        state.client.clone(),
        state.host_keys.clone(),
        state.store.clone(),
        state.executor.clone(),
    );
    let stream_span = tracing::info_span!(
        "stream",
        model = %model.name,
        thread = %thread_id
    );
    let turn_cancel = cancel.clone();
    tokio::spawn(
        async move {
            controller.run(turn, tx, turn_cancel).await;
        }
        .instrument(stream_span),
    );

    // The guard cancels the turn when the client disconnects and the
    // response stream is dropped.
    let guard = cancel.drop_guard();
    let stream = ReceiverStream::new(rx)
        .map(|event| Event::default().json_data(&event))
        .chain(futures_util::stream::once(async {
            Ok::<_, axum::Error>(Event::default().data(SSE_DONE_MARKER))
        }))
        .map(move |item| {
            let _ = &guard;
            item
        });

    Ok(Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text("keepalive"),
        )
        .into_response())
}

async fn title_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<RawTitleRequest>,
) -> Result<Json<serde_json::Value>> {
    if body.message.trim().is_empty() {
        return Err(PrismError::InvalidRequest("message must not be empty".to_string()).into());
    }

    let model_name = body.model.as_deref().unwrap_or(DEFAULT_TITLE_MODEL);
    let model = resolve_model(model_name)?;
    let key = user_key(&headers, body.user_api_key.as_deref(), model.provider);
    let resolved = keys::resolve(model.provider, key, &state.host_keys)?;

    let title = generate_title(&state.client, &model, &resolved.key, &body.message).await?;
    Ok(Json(serde_json::json!({ "title": title })))
}

async fn models_handler() -> Json<Vec<prism::models::ModelConfig>> {
    Json(models::available_models())
}

async fn health_handler() -> &'static str {
    "OK"
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    use tracing_subscriber::prelude::*;

    let filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => "prism=debug".into(),
    };

    let file_appender = tracing_appender::rolling::daily(".", "prism.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .with(tracing_error::ErrorLayer::default())
        .init();

    prism::logging::setup_panic_hook();

    let args = Arc::new(Args::parse());

    let db = match init_db(&args.database).await {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };
    let store = Arc::new(prism::db::SqliteMessageStore::new(db));

    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(args.request_timeout_secs))
        .connect_timeout(Duration::from_secs(args.connect_timeout_secs))
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(10)
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to build HTTP client: {}", e);
            std::process::exit(1);
        }
    };

    let host_keys = HostKeys::from_env();
    let search_key = std::env::var("TAVILY_API_KEY").ok().filter(|k| !k.is_empty());
    if search_key.is_none() {
        tracing::warn!("TAVILY_API_KEY not set; web search will report itself unavailable");
    }
    let executor = Arc::new(ToolExecutor::new(client.clone(), search_key));

    let state = Arc::new(AppState {
        client,
        store,
        host_keys,
        executor,
        args: args.clone(),
    });

    let mut allowed_headers = vec![axum::http::header::CONTENT_TYPE];
    for header in models::api_key_headers() {
        allowed_headers.push(HeaderName::from_static(header));
    }
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(allowed_headers);

    let app = Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/api/title", post(title_handler))
        .route("/api/models", get(models_handler))
        .route("/health", get(health_handler))
        .layer(axum::extract::DefaultBodyLimit::max(args.max_body_size))
        .layer(middleware::from_fn(turn_id_middleware))
        .layer(cors)
        .with_state(state);

    let addr = format!("{}:{}", args.host, args.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("Prism listening on {}", addr);
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
    }
}
