use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use procura_agent::{EngineError, EngineStores, QuoteWorkflow};
use procura_channel::{ChannelBackend, ChannelError, InboundMessage};
use procura_core::domain::outcome::OutcomeRecord;
use procura_core::domain::quote_unit::{QuoteUnit, QuoteUnitStatus};
use procura_core::domain::request::{QuoteRequest, QuoteRequestId};
use procura_core::errors::{ApplicationError, InterfaceError};

#[derive(Clone)]
pub struct ApiState {
    pub workflow: Arc<QuoteWorkflow>,
    pub stores: EngineStores,
    pub channel: Arc<ChannelBackend>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InboundPayload {
    pub from: String,
    pub body: String,
}

#[derive(Debug, Serialize)]
pub struct InboundAccepted {
    pub handlers: usize,
}

#[derive(Debug, Deserialize)]
pub struct QuoteSubmission {
    pub description: String,
    #[serde(default)]
    pub urgent: bool,
}

#[derive(Debug, Serialize)]
pub struct QuoteAccepted {
    pub request_id: QuoteRequestId,
    pub deadline_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct QuoteStatusView {
    pub request: QuoteRequest,
    pub units: Vec<QuoteUnit>,
    pub pending: usize,
    pub outcome: OutcomeRecord,
}

type ApiResult<T> = Result<(StatusCode, Json<T>), (StatusCode, Json<ApiError>)>;

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/inbound", post(receive_inbound))
        .route("/api/v1/quotes", post(submit_quote))
        .route("/api/v1/quotes/{id}", get(quote_status))
        .with_state(state)
}

/// Webhook for the message gateway (or an operator) to push a counterparty reply.
pub async fn receive_inbound(
    State(state): State<ApiState>,
    Json(payload): Json<InboundPayload>,
) -> ApiResult<InboundAccepted> {
    if payload.from.trim().is_empty() {
        return Err(reject(StatusCode::BAD_REQUEST, "`from` must not be empty"));
    }

    let handlers = state
        .channel
        .deliver_inbound(InboundMessage::new(payload.from, payload.body))
        .await
        .map_err(|error| match error {
            ChannelError::Closed => reject(StatusCode::SERVICE_UNAVAILABLE, error.to_string()),
            other => reject(StatusCode::BAD_GATEWAY, other.to_string()),
        })?;

    Ok((StatusCode::ACCEPTED, Json(InboundAccepted { handlers })))
}

/// Persists the request, then runs match, dispatch, wait and decide in the background.
pub async fn submit_quote(
    State(state): State<ApiState>,
    Json(submission): Json<QuoteSubmission>,
) -> ApiResult<QuoteAccepted> {
    let request = state
        .workflow
        .prepare(&submission.description, submission.urgent)
        .await
        .map_err(|error| engine_rejection(error, "submit"))?;
    let accepted =
        QuoteAccepted { request_id: request.id.clone(), deadline_secs: request.timeout_secs };

    let workflow = state.workflow.clone();
    tokio::spawn(async move {
        let request_id = request.id.clone();
        match workflow.execute(request, true).await {
            Ok(outcome) => {
                let recommendation =
                    outcome.outcome().map(|record| record.recommendation).unwrap_or_default();
                info!(
                    event_name = "server.quote.finished",
                    request_id = %request_id,
                    recommendation = %recommendation,
                    "quote workflow finished"
                );
            }
            Err(error) => warn!(
                event_name = "server.quote.failed",
                request_id = %request_id,
                error = %error,
                "quote workflow failed"
            ),
        }
    });

    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

pub async fn quote_status(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<QuoteStatusView> {
    let request_id = QuoteRequestId(id);
    let request = state
        .stores
        .requests
        .find_by_id(&request_id)
        .await
        .map_err(|error| reject(StatusCode::INTERNAL_SERVER_ERROR, error.to_string()))?
        .ok_or_else(|| {
            reject(StatusCode::NOT_FOUND, format!("quote request {request_id} not found"))
        })?;
    let units = state
        .stores
        .units
        .list_for_request(&request_id)
        .await
        .map_err(|error| reject(StatusCode::INTERNAL_SERVER_ERROR, error.to_string()))?;
    let outcome = state
        .workflow
        .recompute_outcome(&request_id)
        .await
        .map_err(|error| engine_rejection(error, &request_id.0))?;

    let pending = units.iter().filter(|unit| unit.status == QuoteUnitStatus::Pending).count();
    Ok((StatusCode::OK, Json(QuoteStatusView { request, units, pending, outcome })))
}

fn engine_rejection(error: EngineError, correlation_id: &str) -> (StatusCode, Json<ApiError>) {
    let interface = ApplicationError::from(error).into_interface(correlation_id);
    let status = match &interface {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warn!(
        event_name = "server.api.engine_rejected",
        correlation_id = interface.correlation_id(),
        error = %interface,
        "engine rejected api call"
    );
    (
        status,
        Json(ApiError {
            error: interface.to_string(),
            hint: Some(interface.user_message()),
            correlation_id: Some(interface.correlation_id().to_owned()),
        }),
    )
}

fn reject(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<ApiError>) {
    (status, Json(ApiError { error: message.into(), hint: None, correlation_id: None }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::{router, ApiState};
    use procura_agent::heuristic::HeuristicAssistant;
    use procura_agent::{EngineStores, QuoteWorkflow, WorkflowSettings};
    use procura_channel::{ChannelBackend, MessageChannel, SimulatedChannel};
    use procura_core::correlation::CorrelationPolicy;
    use procura_core::domain::counterparty::Counterparty;
    use procura_db::repositories::{
        InMemoryCounterpartyRepository, InMemoryPurchaseMemoryRepository,
        InMemoryQuoteRequestRepository, InMemoryQuoteUnitRepository,
    };

    struct Fixture {
        app: Router,
        simulated: SimulatedChannel,
    }

    async fn fixture() -> Fixture {
        let depot =
            Counterparty::new("Depot", "+55 67 3316-0002", "local", ["cement"]).expect("counterparty");
        let stores = EngineStores {
            requests: Arc::new(InMemoryQuoteRequestRepository::default()),
            units: Arc::new(InMemoryQuoteUnitRepository::default()),
            directory: Arc::new(InMemoryCounterpartyRepository::with_counterparties([depot])),
            purchases: Arc::new(InMemoryPurchaseMemoryRepository::default()),
        };
        let simulated = SimulatedChannel::new();
        let channel = Arc::new(ChannelBackend::Simulated(simulated.clone()));
        let settings = WorkflowSettings {
            locality: "local".to_owned(),
            quote_timeout: Duration::from_secs(20),
            urgent_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(20),
            correlation_policy: CorrelationPolicy::MostRecentPending,
            notify_on_reply: true,
        };
        let workflow = Arc::new(QuoteWorkflow::new(
            settings,
            stores.clone(),
            Arc::new(HeuristicAssistant::new()),
            channel.clone(),
        ));
        channel.listen(Arc::new(workflow.correlator())).await;

        Fixture { app: router(ApiState { workflow, stores, channel }), simulated }
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map(|body| Body::from(body.to_string())).unwrap_or_else(Body::empty))
            .expect("request");
        let response = app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn submitted_quote_collects_replies_from_the_webhook() {
        let fixture = fixture().await;

        let (status, accepted) = call(
            &fixture.app,
            "POST",
            "/api/v1/quotes",
            Some(json!({ "description": "10 bags of cement", "urgent": true })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(accepted["deadline_secs"], 5);
        let request_id = accepted["request_id"].as_str().expect("request id").to_owned();

        for _ in 0..200 {
            if !fixture.simulated.sent().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(fixture.simulated.sent().await.len(), 1);

        let (status, inbound) = call(
            &fixture.app,
            "POST",
            "/api/v1/inbound",
            Some(json!({ "from": "+556733160002", "body": "Cimento R$ 31,50 o saco" })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(inbound["handlers"], 1);

        let (status, view) =
            call(&fixture.app, "GET", &format!("/api/v1/quotes/{request_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["pending"], 0);
        assert_eq!(view["units"][0]["status"], "received");
        assert_eq!(view["outcome"]["best_counterparty"], "Depot");
    }

    #[tokio::test]
    async fn unknown_quote_is_not_found() {
        let fixture = fixture().await;

        let (status, body) = call(&fixture.app, "GET", "/api/v1/quotes/missing", None).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap_or_default().contains("missing"));
    }

    #[tokio::test]
    async fn inbound_after_close_is_unavailable() {
        let fixture = fixture().await;
        fixture.simulated.close().await.expect("close");

        let (status, _) = call(
            &fixture.app,
            "POST",
            "/api/v1/inbound",
            Some(json!({ "from": "+556733160002", "body": "late reply" })),
        )
        .await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn blank_description_is_rejected() {
        let fixture = fixture().await;

        let (status, body) =
            call(&fixture.app, "POST", "/api/v1/quotes", Some(json!({ "description": "  " }))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["correlation_id"], "submit");
        assert!(body["hint"].as_str().unwrap_or_default().contains("Check inputs"));
    }
}
