//! HTTP surface: scrape endpoint, self-telemetry and health.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use modsight_engine::bus::{ScrapeEngine, ScrapeJob};
use modsight_engine::error::ScrapeError;

use crate::config::Config;
use crate::exposition;
use crate::telemetry::{RequestStatus, Telemetry};

const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub engine: Arc<ScrapeEngine>,
    pub telemetry: Arc<Telemetry>,
}

/// Create the HTTP router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/scrape", get(scrape_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct ScrapeParams {
    module: Option<String>,
    target: Option<String>,
    sub_target: Option<String>,
}

/// Handler for the /scrape endpoint: one device scrape per request.
async fn scrape_handler(
    State(state): State<AppState>,
    Query(params): Query<ScrapeParams>,
) -> Response {
    let Some(module_name) = params.module else {
        return bad_request("'module' parameter must be specified");
    };
    let Some(module) = state.config.get_module(&module_name) else {
        return bad_request(&format!(
            "module '{}' not defined in configuration file",
            module_name
        ));
    };
    let Some(target) = params.target else {
        return bad_request("'target' parameter must be specified");
    };
    let Some(sub_target) = params.sub_target else {
        return bad_request("'sub_target' parameter must be specified");
    };
    let unit_id: u8 = match sub_target.parse() {
        Ok(unit) => unit,
        Err(e) => {
            return bad_request(&format!(
                "'sub_target' parameter must be a valid unit id: {}",
                e
            ));
        }
    };

    info!(
        "scrape request for module '{}' target '{}' and sub_target '{}'",
        module_name, target, unit_id
    );

    let job = ScrapeJob {
        spec: module.connect_spec(&target, unit_id),
        module: &module_name,
        defs: &module.metrics,
        sensitivity: module.sensitivity,
        blocked: &module.blocked_ranges,
        retry: module.retry_policy(),
    };

    let started = Instant::now();
    let result = state.engine.scrape(&job).await;
    let duration = started.elapsed();

    match result {
        Ok(samples) => match exposition::render(&samples) {
            Ok(body) => {
                state
                    .telemetry
                    .observe_request(&target, RequestStatus::Ok, duration);
                (
                    StatusCode::OK,
                    [("content-type", EXPOSITION_CONTENT_TYPE)],
                    body,
                )
                    .into_response()
            }
            Err(e) => {
                state
                    .telemetry
                    .observe_request(&target, RequestStatus::ErrorParsingValue, duration);
                error!(
                    "failed to expose scrape of target '{}' with module '{}': {}",
                    target, module_name, e
                );
                (StatusCode::INTERNAL_SERVER_ERROR, format!("{}\n", e)).into_response()
            }
        },
        Err(e) => {
            state
                .telemetry
                .observe_request(&target, RequestStatus::from_error(&e), duration);
            error!(
                "failed to scrape target '{}' sub_target '{}' with module '{}': {}",
                target, unit_id, module_name, e
            );
            (
                scrape_error_status(&e),
                format!(
                    "failed to scrape target '{}' sub_target '{}' with module '{}': {}\n",
                    target, unit_id, module_name, e
                ),
            )
                .into_response()
        }
    }
}

/// Map a scrape failure onto the externally-visible status code.
fn scrape_error_status(error: &ScrapeError) -> StatusCode {
    match error {
        ScrapeError::Connect { .. } => StatusCode::SERVICE_UNAVAILABLE,
        ScrapeError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, format!("{}\n", message)).into_response()
}

/// Handler for the /metrics endpoint: telemetry about the exporter itself.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    let body = state.telemetry.render(&state.engine.bus_stats());
    (
        StatusCode::OK,
        [("content-type", EXPOSITION_CONTENT_TYPE)],
        body,
    )
        .into_response()
}

/// Handler for the /health endpoint.
async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

/// Run the HTTP server until ctrl-c.
pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", addr, e))?;

    info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("HTTP server shutting down");
        })
        .await
        .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

    info!("HTTP server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use modsight_engine::transport::{ClientFactory, ConnectSpec, ModbusClient};
    use tower::ServiceExt;

    /// Client answering every register with its own offset.
    struct EchoClient;

    #[async_trait]
    impl ModbusClient for EchoClient {
        async fn read_coils(&mut self, offset: u16, count: u16) -> Result<Vec<u8>, ScrapeError> {
            self.read_holding_registers(offset, count).await
        }
        async fn read_discrete_inputs(
            &mut self,
            offset: u16,
            count: u16,
        ) -> Result<Vec<u8>, ScrapeError> {
            self.read_holding_registers(offset, count).await
        }
        async fn read_holding_registers(
            &mut self,
            offset: u16,
            count: u16,
        ) -> Result<Vec<u8>, ScrapeError> {
            let mut bytes = Vec::with_capacity(usize::from(count) * 2);
            for i in 0..count {
                bytes.extend_from_slice(&(offset + i).to_be_bytes());
            }
            Ok(bytes)
        }
        async fn read_input_registers(
            &mut self,
            offset: u16,
            count: u16,
        ) -> Result<Vec<u8>, ScrapeError> {
            self.read_holding_registers(offset, count).await
        }
    }

    struct EchoFactory;

    #[async_trait]
    impl ClientFactory for EchoFactory {
        async fn connect(
            &self,
            _spec: &ConnectSpec,
        ) -> Result<Box<dyn ModbusClient>, ScrapeError> {
            Ok(Box::new(EchoClient))
        }
    }

    struct RefusingFactory;

    #[async_trait]
    impl ClientFactory for RefusingFactory {
        async fn connect(
            &self,
            spec: &ConnectSpec,
        ) -> Result<Box<dyn ModbusClient>, ScrapeError> {
            Err(ScrapeError::Connect {
                target: spec.target.clone(),
                reason: "connection refused".to_string(),
            })
        }
    }

    fn make_config() -> Config {
        let yaml = r#"
modules:
  - name: plant
    protocol: tcp
    metrics:
      - name: level_millimeters
        help: Tank level.
        address: 300042
        data_type: uint16
"#;
        serde_yaml::from_str(yaml).unwrap()
    }

    fn make_state(factory: Arc<dyn ClientFactory>) -> AppState {
        AppState {
            config: Arc::new(make_config()),
            engine: Arc::new(ScrapeEngine::new(factory)),
            telemetry: Arc::new(Telemetry::default()),
        }
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint() {
        let router = create_router(make_state(Arc::new(EchoFactory)));
        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn scrape_requires_module_parameter() {
        let router = create_router(make_state(Arc::new(EchoFactory)));
        let response = router
            .oneshot(Request::get("/scrape").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(response).await.contains("'module'"));
    }

    #[tokio::test]
    async fn scrape_rejects_unknown_module() {
        let router = create_router(make_state(Arc::new(EchoFactory)));
        let response = router
            .oneshot(
                Request::get("/scrape?module=nope&target=10.0.0.1:502&sub_target=1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(response).await.contains("not defined"));
    }

    #[tokio::test]
    async fn scrape_rejects_missing_target_and_bad_sub_target() {
        let router = create_router(make_state(Arc::new(EchoFactory)));

        let response = router
            .clone()
            .oneshot(
                Request::get("/scrape?module=plant")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = router
            .oneshot(
                Request::get("/scrape?module=plant&target=10.0.0.1:502&sub_target=banana")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn scrape_serves_exposition_document() {
        let router = create_router(make_state(Arc::new(EchoFactory)));
        let response = router
            .oneshot(
                Request::get("/scrape?module=plant&target=10.0.0.1:502&sub_target=1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get("content-type").unwrap();
        assert!(content_type.to_str().unwrap().contains("text/plain"));

        let body = body_text(response).await;
        // holding register 42 echoes its own offset
        assert!(body.contains("level_millimeters{module=\"plant\"} 42"));
        assert!(body.contains("# TYPE level_millimeters gauge"));
    }

    #[tokio::test]
    async fn connect_failure_maps_to_service_unavailable() {
        let state = make_state(Arc::new(RefusingFactory));
        let router = create_router(state.clone());
        let response = router
            .oneshot(
                Request::get("/scrape?module=plant&target=10.0.0.1:502&sub_target=1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        // the failure shows up in self-telemetry
        let metrics = state.telemetry.render(&state.engine.bus_stats());
        assert!(metrics.contains(
            "modbus_requests_total{status=\"ERROR_SOCKET\",target=\"10.0.0.1:502\"} 1"
        ));
    }

    #[tokio::test]
    async fn timeout_maps_to_gateway_timeout() {
        assert_eq!(
            scrape_error_status(&ScrapeError::Timeout {
                target: "t".to_string()
            }),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            scrape_error_status(&ScrapeError::Io("broken pipe".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn metrics_endpoint_serves_telemetry() {
        let state = make_state(Arc::new(EchoFactory));
        state.telemetry.observe_request(
            "10.0.0.1:502",
            RequestStatus::Ok,
            std::time::Duration::from_millis(10),
        );

        let router = create_router(state);
        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;
        assert!(body.contains("modbus_requests_total"));
    }
}
