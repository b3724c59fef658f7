//! JSON surface over the approval engine: checkout gating, decisions, audit
//! history and company administration.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use spendgate_core::{
    Approval, ApprovalHistory, ApprovalId, ApprovalPriority, ApprovalRequestManager,
    ApprovalRequirement, ApprovalRule, ApprovalRuleId, ApprovalSettings, ApprovalType,
    ApplicationError, CartId, CompanyId, Decision, DecisionCommand, InterfaceError, Page,
    RuleCondition, SettingsAdmin,
};

#[derive(Clone)]
pub struct ApiState {
    pub manager: Arc<ApprovalRequestManager>,
    pub admin: Arc<SettingsAdmin>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/carts/{cart_id}/approval-requirement", post(require_approval))
        .route("/api/v1/carts/{cart_id}/approvals/pending", get(pending_for_cart))
        .route("/api/v1/approvals/{approval_id}", get(get_approval))
        .route("/api/v1/approvals/{approval_id}/decision", post(decide))
        .route("/api/v1/approvals/{approval_id}/history", get(history))
        .route("/api/v1/companies/{company_id}/approvals/pending", get(pending_for_company))
        .route(
            "/api/v1/companies/{company_id}/approval-settings",
            get(get_settings).put(put_settings),
        )
        .route("/api/v1/companies/{company_id}/approval-rules", get(list_rules).post(upsert_rule))
        .with_state(state)
}

#[derive(Debug)]
pub struct ApiError(InterfaceError);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    pub correlation_id: String,
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        let correlation_id = Uuid::new_v4().to_string();
        if error.is_internal() {
            tracing::error!(
                event_name = "api.request.failed",
                correlation_id = %correlation_id,
                error = %error,
                "request failed on an internal error"
            );
        } else {
            tracing::warn!(
                event_name = "api.request.failed",
                correlation_id = %correlation_id,
                error = %error,
                "request failed"
            );
        }
        Self(error.into_interface(correlation_id))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody {
            error: self.0.user_message().to_string(),
            message: self.0.message().to_string(),
            correlation_id: self.0.correlation_id().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct RequirementQuery {
    pub created_by: Option<String>,
}

pub async fn require_approval(
    State(state): State<ApiState>,
    Path(cart_id): Path<String>,
    Query(query): Query<RequirementQuery>,
) -> ApiResult<ApprovalRequirement> {
    let requirement =
        state.manager.require_approval(&CartId(cart_id), query.created_by.as_deref()).await?;
    Ok(Json(requirement))
}

pub async fn pending_for_cart(
    State(state): State<ApiState>,
    Path(cart_id): Path<String>,
) -> ApiResult<Vec<Approval>> {
    Ok(Json(state.manager.list_pending_for_cart(&CartId(cart_id)).await?))
}

pub async fn get_approval(
    State(state): State<ApiState>,
    Path(approval_id): Path<String>,
) -> ApiResult<Approval> {
    Ok(Json(state.manager.find_approval(&ApprovalId(approval_id)).await?))
}

#[derive(Clone, Debug, Deserialize)]
pub struct DecisionBody {
    pub actor_id: String,
    pub actor_role: String,
    pub decision: Decision,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

pub async fn decide(
    State(state): State<ApiState>,
    Path(approval_id): Path<String>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<DecisionBody>,
) -> ApiResult<Approval> {
    let client_ip = forwarded_for(&headers).unwrap_or_else(|| peer.ip().to_string());
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let approval = state
        .manager
        .decide(DecisionCommand {
            approval_id: ApprovalId(approval_id),
            actor_id: body.actor_id,
            actor_role: body.actor_role,
            decision: body.decision,
            reason: body.reason,
            comment: body.comment,
            client_ip: Some(client_ip),
            user_agent,
        })
        .await?;
    Ok(Json(approval))
}

/// First hop of `X-Forwarded-For`, when a proxy supplied one.
fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    let value = headers.get("x-forwarded-for")?.to_str().ok()?;
    let first = value.split(',').next()?.trim();
    (!first.is_empty()).then(|| first.to_string())
}

pub async fn history(
    State(state): State<ApiState>,
    Path(approval_id): Path<String>,
) -> ApiResult<Vec<ApprovalHistory>> {
    Ok(Json(state.manager.list_history(&ApprovalId(approval_id)).await?))
}

#[derive(Clone, Copy, Debug, Default, Deserialize)]
pub struct PageQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

pub async fn pending_for_company(
    State(state): State<ApiState>,
    Path(company_id): Path<String>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Vec<Approval>> {
    let page = Page::new(page.limit, page.offset);
    Ok(Json(state.manager.list_pending_for_company(&CompanyId(company_id), page).await?))
}

pub async fn get_settings(
    State(state): State<ApiState>,
    Path(company_id): Path<String>,
) -> ApiResult<ApprovalSettings> {
    Ok(Json(state.admin.settings(&CompanyId(company_id)).await?))
}

/// Full replacement of a company's settings; omitted fields take defaults.
#[derive(Clone, Debug, Deserialize)]
pub struct SettingsBody {
    #[serde(default)]
    pub requires_admin_approval: bool,
    #[serde(default)]
    pub requires_sales_manager_approval: bool,
    #[serde(default)]
    pub admin_approval_threshold: Option<i64>,
    #[serde(default)]
    pub sales_manager_approval_threshold: Option<i64>,
    #[serde(default)]
    pub requires_multiple_approvers: bool,
    #[serde(default = "default_min_approvers")]
    pub min_approvers_count: u32,
    #[serde(default)]
    pub escalation_enabled: bool,
    #[serde(default = "default_escalation_timeout_hours")]
    pub escalation_timeout_hours: u32,
    #[serde(default)]
    pub escalation_role: Option<String>,
    #[serde(default)]
    pub auto_approve_below_threshold: bool,
    #[serde(default)]
    pub auto_approve_threshold: Option<i64>,
    #[serde(default)]
    pub priority_threshold: Option<i64>,
}

fn default_min_approvers() -> u32 {
    1
}

fn default_escalation_timeout_hours() -> u32 {
    24
}

impl SettingsBody {
    fn into_settings(self, company_id: CompanyId) -> ApprovalSettings {
        let now = Utc::now();
        ApprovalSettings {
            company_id,
            requires_admin_approval: self.requires_admin_approval,
            requires_sales_manager_approval: self.requires_sales_manager_approval,
            admin_approval_threshold: self.admin_approval_threshold,
            sales_manager_approval_threshold: self.sales_manager_approval_threshold,
            requires_multiple_approvers: self.requires_multiple_approvers,
            min_approvers_count: self.min_approvers_count,
            escalation_enabled: self.escalation_enabled,
            escalation_timeout_hours: self.escalation_timeout_hours,
            escalation_role: self.escalation_role.filter(|role| !role.trim().is_empty()),
            auto_approve_below_threshold: self.auto_approve_below_threshold,
            auto_approve_threshold: self.auto_approve_threshold,
            priority_threshold: self.priority_threshold,
            created_at: now,
            updated_at: now,
        }
    }
}

pub async fn put_settings(
    State(state): State<ApiState>,
    Path(company_id): Path<String>,
    Json(body): Json<SettingsBody>,
) -> ApiResult<ApprovalSettings> {
    let settings = body.into_settings(CompanyId(company_id));
    Ok(Json(state.admin.update_settings(settings).await?))
}

pub async fn list_rules(
    State(state): State<ApiState>,
    Path(company_id): Path<String>,
) -> ApiResult<Vec<ApprovalRule>> {
    Ok(Json(state.admin.list_rules(&CompanyId(company_id)).await?))
}

#[derive(Clone, Debug, Deserialize)]
pub struct RuleBody {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub priority: i32,
    pub conditions: Vec<RuleCondition>,
    pub required_approval_type: ApprovalType,
    #[serde(default = "default_min_approvers")]
    pub required_approvers_count: u32,
    #[serde(default)]
    pub approval_priority: Option<ApprovalPriority>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub effective_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub effective_until: Option<DateTime<Utc>>,
}

fn default_active() -> bool {
    true
}

pub async fn upsert_rule(
    State(state): State<ApiState>,
    Path(company_id): Path<String>,
    Json(body): Json<RuleBody>,
) -> ApiResult<ApprovalRule> {
    let id = body
        .id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let rule = ApprovalRule {
        id: ApprovalRuleId(id),
        company_id: CompanyId(company_id),
        priority: body.priority,
        conditions: body.conditions,
        required_approval_type: body.required_approval_type,
        required_approvers_count: body.required_approvers_count,
        approval_priority: body.approval_priority,
        is_active: body.is_active,
        effective_from: body.effective_from,
        effective_until: body.effective_until,
        created_at: Utc::now(),
        sequence: 0,
    };
    Ok(Json(state.admin.upsert_rule(rule).await?))
}
