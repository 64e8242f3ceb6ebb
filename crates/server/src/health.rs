use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use procura_channel::{ChannelBackend, PairingState};
use procura_db::DbPool;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    channel: Arc<ChannelBackend>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

impl HealthCheck {
    fn ready(detail: impl Into<String>) -> Self {
        Self { status: "ready", detail: detail.into() }
    }

    fn degraded(detail: impl Into<String>) -> Self {
        Self { status: "degraded", detail: detail.into() }
    }

    fn is_ready(&self) -> bool {
        self.status == "ready"
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: HealthCheck,
    pub channel: HealthCheck,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool, channel: Arc<ChannelBackend>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool, channel })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let channel = channel_check(&state.channel).await;
    let ready = database.is_ready() && channel.is_ready();

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        database,
        channel,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck::ready("database query succeeded"),
        Err(error) => HealthCheck::degraded(format!("database query failed: {error}")),
    }
}

async fn channel_check(channel: &ChannelBackend) -> HealthCheck {
    if let Some(simulated) = channel.as_simulated() {
        return if simulated.is_closed() {
            HealthCheck::degraded("simulated channel closed")
        } else {
            HealthCheck::ready("simulated channel (dry run)")
        };
    }

    let Some(live) = channel.as_live() else {
        return HealthCheck::degraded("no channel configured");
    };
    match live.state().await {
        PairingState::Paired { session_id, .. } => {
            HealthCheck::ready(format!("gateway session {session_id}"))
        }
        PairingState::Unpaired => HealthCheck::degraded("gateway not paired"),
        PairingState::Closed => HealthCheck::degraded("gateway channel closed"),
    }
}
