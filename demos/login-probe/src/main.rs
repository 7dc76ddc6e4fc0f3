//! Signs in against a live backend and makes one authorized call.
//!
//! The identity provider is the in-memory one, seeded with the probe's
//! credentials, so only the backend half is real. Settings come from the
//! usual `KEYWARD_*` variables plus:
//!
//! - `PROBE_EMAIL` / `PROBE_SECRET`: the account to sign in with
//! - `PROBE_PATH`: the API path to call (default `/subjects`)
//! - `PROBE_LOG`: `text` or `json`

use std::sync::Arc;
use std::time::Duration;

use keyward::prelude::*;
use keyward::telemetry;
use keyward_provider::MemoryProvider;

const TOKEN_TTL: Duration = Duration::from_secs(3600);

struct Probe {
    email: String,
    secret: String,
    path: String,
}

impl Probe {
    fn from_env() -> Self {
        let var = |key: &str, default: &str| std::env::var(key).unwrap_or_else(|_| default.to_string());
        Self {
            email: var("PROBE_EMAIL", "probe@example.com"),
            secret: var("PROBE_SECRET", "probe-secret"),
            path: var("PROBE_PATH", "/subjects"),
        }
    }
}

/// Logs in, calls `probe.path`, logs out. Returns the API response.
async fn run(config: KeywardConfig, probe: &Probe) -> Result<ApiResponse, KeywardError> {
    let provider = Arc::new(MemoryProvider::new(TOKEN_TTL).with_account(
        &probe.email,
        &probe.secret,
        None,
    ));
    let backend = HttpBackend::new(&config.backend_url, &config.exchange_path, config.call_timeout)?;
    let transport = HttpTransport::new(&config.backend_url, config.request_timeout)?;

    let controller = SessionController::builder(provider, backend)
        .config(config)
        .build();
    let _events = controller.watch_auth_state();

    let session = controller.login(&probe.email, &probe.secret).await?;
    tracing::info!(
        subject = %session.subject_id,
        name = %session.display_name,
        generation = %session.generation,
        "signed in"
    );

    let api = RequestAuthorizer::new(controller.clone(), transport);
    let outcome = api.send(ApiRequest::get(probe.path.as_str())).await;

    controller.logout().await;
    Ok(outcome?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let format = std::env::var("PROBE_LOG")
        .unwrap_or_default()
        .parse::<LogFormat>()?;
    telemetry::init(format);

    let config = KeywardConfig::from_env().validated();
    let probe = Probe::from_env();
    tracing::info!(backend = %config.backend_url, email = %probe.email, "probing");

    match run(config, &probe).await {
        Ok(response) => {
            tracing::info!(status = response.status, bytes = response.body.len(), "call completed");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "probe failed");
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Json;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::Router;
    use serde_json::json;

    async fn start() -> String {
        let app = Router::new()
            .route(
                "/auth/exchange",
                post(|| async {
                    Json(json!({ "id": "u1", "name": "Ada", "access_token": "T1" }))
                }),
            )
            .route(
                "/subjects",
                get(|headers: HeaderMap| async move {
                    match headers.get("authorization").and_then(|v| v.to_str().ok()) {
                        Some("Bearer T1") => (StatusCode::OK, "[]"),
                        _ => (StatusCode::UNAUTHORIZED, "{}"),
                    }
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}")
    }

    fn probe() -> Probe {
        Probe {
            email: "ada@example.com".into(),
            secret: "secret1".into(),
            path: "/subjects".into(),
        }
    }

    #[tokio::test]
    async fn test_run_signs_in_and_calls_api() {
        let base = start().await;
        let config = KeywardConfig {
            backend_url: base,
            ..KeywardConfig::default()
        };

        let response = run(config, &probe()).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"[]");
    }

    #[tokio::test]
    async fn test_run_unreachable_backend_fails() {
        let config = KeywardConfig {
            backend_url: "http://127.0.0.1:1".into(),
            call_timeout: Duration::from_secs(2),
            ..KeywardConfig::default()
        };

        let err = run(config, &probe()).await.unwrap_err();

        assert!(matches!(err, KeywardError::Auth(AuthError::BackendUnavailable)));
    }
}
