use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{Request, State, WebSocketUpgrade},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use server_api::{create_marker, list_markers, ApiContext};
use shared::{
    domain::Marker,
    error::{ApiError, ErrorCode},
    protocol::{NewMarker, ServerEvent},
};
use storage::Storage;
use tokio::sync::broadcast;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info};

mod config;

use config::{host_is_allowed, load_settings, prepare_database_url};

const MAX_BODY_BYTES: usize = 16 * 1024;

#[derive(Clone)]
struct AppState {
    api: ApiContext,
    events: broadcast::Sender<ServerEvent>,
    allowed_hosts: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;
    let api = ApiContext { storage };
    let (events, _) = broadcast::channel(256);

    let state = AppState {
        api,
        events,
        allowed_hosts: settings.allowed_hosts,
    };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/markers", get(http_list_markers).post(http_create_marker))
        .route("/ws", get(ws_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            enforce_allowed_hosts,
        ))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn enforce_allowed_hosts(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if !host_is_allowed(host, &state.allowed_hosts) {
        return (
            StatusCode::FORBIDDEN,
            Json(ApiError::new(
                ErrorCode::Forbidden,
                format!("host '{host}' is not on the allow-list"),
            )),
        )
            .into_response();
    }

    next.run(request).await
}

async fn http_list_markers(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Marker>>, (StatusCode, Json<ApiError>)> {
    let markers = list_markers(&state.api)
        .await
        .map_err(|e| (status_for(&e), Json(e)))?;
    Ok(Json(markers))
}

async fn http_create_marker(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewMarker>,
) -> Result<Json<ServerEvent>, (StatusCode, Json<ApiError>)> {
    let event = create_marker(&state.api, req)
        .await
        .map_err(|e| (status_for(&e), Json(e)))?;
    let _ = state.events.send(event.clone());
    Ok(Json(event))
}

fn status_for(err: &ApiError) -> StatusCode {
    match err.code {
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(state, socket))
}

async fn ws_connection(state: Arc<AppState>, socket: axum::extract::ws::WebSocket) {
    use axum::extract::ws::Message;
    use futures::{SinkExt, StreamExt};

    let (mut sender, mut receiver) = socket.split();
    let mut events_rx = state.events.subscribe();

    let send_task = tokio::spawn(async move {
        while let Ok(event) = events_rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(_msg)) = receiver.next().await {}

    send_task.abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request as HttpRequest;
    use tower::ServiceExt;

    async fn test_app(allowed_hosts: Vec<String>) -> Router {
        let storage = Storage::new("sqlite::memory:").await.expect("db");
        let api = ApiContext { storage };
        let (events, _) = broadcast::channel(32);
        build_router(Arc::new(AppState {
            api,
            events,
            allowed_hosts,
        }))
    }

    fn post_marker_request(body: &NewMarker) -> HttpRequest<Body> {
        HttpRequest::post("/markers")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_string(body).expect("json")))
            .expect("request")
    }

    fn sample_marker() -> NewMarker {
        NewMarker {
            lat: 10.0,
            lng: 20.0,
            name: "Ann".to_string(),
            message: "Hi".to_string(),
            country: "Wakanda".to_string(),
        }
    }

    #[tokio::test]
    async fn healthz_responds_ok() {
        let app = test_app(Vec::new()).await;
        let response = app
            .oneshot(
                HttpRequest::get("/healthz")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn post_then_get_round_trips_one_marker() {
        let app = test_app(Vec::new()).await;

        let response = app
            .clone()
            .oneshot(post_marker_request(&sample_marker()))
            .await
            .expect("post response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let event: ServerEvent = serde_json::from_slice(&body).expect("event");
        let ServerEvent::MarkerInserted { marker } = event;
        assert_eq!(marker.country, "Wakanda");

        let response = app
            .oneshot(
                HttpRequest::get("/markers")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("get response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let markers: Vec<Marker> = serde_json::from_slice(&body).expect("markers");
        assert_eq!(markers, vec![marker]);
    }

    #[tokio::test]
    async fn rejects_invalid_marker_with_bad_request() {
        let app = test_app(Vec::new()).await;
        let invalid = NewMarker {
            name: String::new(),
            ..sample_marker()
        };
        let response = app
            .oneshot(post_marker_request(&invalid))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn insert_is_broadcast_on_the_event_channel() {
        let storage = Storage::new("sqlite::memory:").await.expect("db");
        let api = ApiContext { storage };
        let (events, _) = broadcast::channel(32);
        let mut rx = events.subscribe();
        let app = build_router(Arc::new(AppState {
            api,
            events,
            allowed_hosts: Vec::new(),
        }));

        let response = app
            .oneshot(post_marker_request(&sample_marker()))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let ServerEvent::MarkerInserted { marker } = rx.try_recv().expect("broadcast event");
        assert_eq!(marker.name, "Ann");
    }

    #[tokio::test]
    async fn unlisted_host_is_refused() {
        let app = test_app(vec!["pins.example.org".to_string()]).await;

        let response = app
            .clone()
            .oneshot(
                HttpRequest::get("/markers")
                    .header(header::HOST, "evil.example.com")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .oneshot(
                HttpRequest::get("/markers")
                    .header(header::HOST, "pins.example.org:8787")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }
}
