use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tower_http::{compression::CompressionLayer, cors::{AllowOrigin, CorsLayer}, trace::TraceLayer};

use crate::auth::{self, extractors::CurrentUser, services};
use crate::error::AuthError;
use crate::state::AppState;

pub fn build_app(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_origins);
    let trusted_hosts = state.config.trusted_hosts.clone();

    let mut app = Router::new()
        .merge(auth::router())
        .route("/", get(root))
        .route("/health", get(|| async { Json(json!({ "status": "ok" })) }))
        .route("/livez", get(|| async { Json(json!({ "live": "ok" })) }))
        .route("/readyz", get(|| async { Json(json!({ "ready": "ok" })) }))
        .route("/admin/ping", get(admin_ping))
        .with_state(state)
        .layer(cors)
        .layer(CompressionLayer::new())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     _latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, "response");
                        } else {
                            tracing::info!(%status, "response");
                        }
                    },
                ),
        );

    if let Some(hosts) = trusted_hosts {
        let hosts = Arc::new(hosts);
        app = app.layer(middleware::from_fn(move |req: Request, next: Next| {
            let hosts = hosts.clone();
            async move { enforce_trusted_host(&hosts, req, next).await }
        }));
    }

    app
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }
    let list: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(list))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}

async fn enforce_trusted_host(hosts: &[String], req: Request, next: Next) -> Response {
    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(|h| h.split(':').next().unwrap_or(h).to_string());
    match host {
        Some(h) if hosts.iter().any(|allowed| *allowed == h) => next.run(req).await,
        _ => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "detail": "Invalid host header" })),
        )
            .into_response(),
    }
}

async fn root(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "service": "GetOut API",
        "version": state.config.version,
        "status": "running",
        "timestamp": OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default(),
    }))
}

async fn admin_ping(CurrentUser(user): CurrentUser) -> Result<Json<Value>, AuthError> {
    services::require_role(&user, &["admin"])?;
    Ok(Json(json!({
        "message": "Admin access granted",
        "user": user.email,
    })))
}

pub async fn serve(app: Router) -> anyhow::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
        std::env::var("APP_PORT").unwrap_or_else(|_| "8080".into())
    )
    .parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    // Connect info feeds the peer-IP key extractor on the login limiter.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
