use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use spendgate_db::DbPool;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    escalation_enabled: bool,
}

impl HealthState {
    pub fn new(db_pool: DbPool, escalation_enabled: bool) -> Self {
        Self { db_pool, escalation_enabled }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    pub escalation: HealthCheck,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let ready = database.status == "ready";

    let escalation = if state.escalation_enabled {
        HealthCheck { status: "ready", detail: "escalation scanner scheduled".to_string() }
    } else {
        HealthCheck { status: "disabled", detail: "escalation scanner turned off".to_string() }
    };

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "spendgate approval engine initialized".to_string(),
        },
        database,
        escalation,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    let pending = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM approval WHERE status = 'pending'",
    )
    .fetch_one(pool)
    .await;

    match pending {
        Ok(count) => HealthCheck { status: "ready", detail: format!("{count} pending approvals") },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}
