use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};

use spendgate_core::signals::InMemorySignalSink;
use spendgate_core::{
    ApplicationError, ApprovalRequestManager, ApprovalStatus, ApprovalType, CartId, CompanyId,
    Decision, DecisionCommand, EscalationScheduler, FixedClock, SettingsAdmin, SignalKind,
};
use spendgate_db::{
    connect_with_settings, migrations, DbPool, SqlApprovalStore, SqlCommerceReader, SqlPolicyStore,
};
use tempfile::TempDir;

struct Engine {
    pool: DbPool,
    manager: ApprovalRequestManager,
    scheduler: EscalationScheduler,
    admin: SettingsAdmin,
    signals: InMemorySignalSink,
    now: DateTime<FixedOffset>,
}

async fn engine() -> Engine {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    engine_on(pool).await
}

async fn engine_on(pool: DbPool) -> Engine {
    migrations::run_pending(&pool).await.expect("migrations");

    for statement in [
        "INSERT INTO company (id, name, spending_limit_reset_frequency)
         VALUES ('co-1', 'Acme', 'monthly')",
        "INSERT INTO employee (id, company_id, spending_limit) VALUES ('emp-1', 'co-1', 2000000)",
        "INSERT INTO cart (id, employee_id, total, item_count, currency_code, created_at) VALUES
             ('cart-small', 'emp-1', 40000, 1, 'USD', '2026-10-14T14:00:00.000000Z'),
             ('cart-large', 'emp-1', 1500000, 4, 'USD', '2026-10-14T14:00:00.000000Z')",
        "INSERT INTO customer_order (id, employee_id, total, created_at)
         VALUES ('o-1', 'emp-1', 900000, '2026-10-02T10:00:00.000000Z')",
    ] {
        sqlx::query(statement).execute(&pool).await.expect("seed");
    }

    let now = FixedOffset::east_opt(0)
        .and_then(|offset| offset.with_ymd_and_hms(2026, 10, 14, 15, 0, 0).single())
        .expect("clock");
    let approvals = Arc::new(SqlApprovalStore::new(pool.clone()));
    let policies = Arc::new(SqlPolicyStore::new(pool.clone()));
    let commerce = Arc::new(SqlCommerceReader::new(pool.clone()));
    let signals = InMemorySignalSink::default();

    let manager = ApprovalRequestManager::new(approvals.clone(), policies.clone(), commerce)
        .with_signal_sink(Arc::new(signals.clone()))
        .with_clock(Arc::new(FixedClock(now)));
    let scheduler = EscalationScheduler::new(approvals, policies.clone())
        .with_signal_sink(Arc::new(signals.clone()));
    let admin = SettingsAdmin::new(policies).with_clock(Arc::new(FixedClock(now)));

    Engine { pool, manager, scheduler, admin, signals, now }
}

async fn require_admin_over(engine: &Engine, threshold: i64) {
    let company = CompanyId("co-1".to_string());
    let mut settings = engine.admin.settings(&company).await.expect("settings");
    settings.requires_admin_approval = true;
    settings.admin_approval_threshold = Some(threshold);
    settings.escalation_enabled = true;
    settings.escalation_timeout_hours = 24;
    settings.escalation_role = Some("sales_manager".to_string());
    engine.admin.update_settings(settings).await.expect("update settings");
}

fn command(approval: &spendgate_core::Approval, actor: &str, role: &str) -> DecisionCommand {
    DecisionCommand {
        approval_id: approval.id.clone(),
        actor_id: actor.to_string(),
        actor_role: role.to_string(),
        decision: Decision::Approve,
        reason: None,
        comment: Some("within budget".to_string()),
        client_ip: Some("198.51.100.4".to_string()),
        user_agent: Some("curl/8.4".to_string()),
    }
}

#[tokio::test]
async fn small_cart_needs_no_approval() {
    let engine = engine().await;
    require_admin_over(&engine, 1_000_000).await;

    let requirement = engine
        .manager
        .require_approval(&CartId("cart-small".to_string()), None)
        .await
        .expect("evaluate");

    assert!(!requirement.required);
    assert!(requirement.approvals.is_empty());
    assert!(engine.signals.kinds().is_empty());
}

#[tokio::test]
async fn large_cart_is_gated_until_admin_approves() {
    let engine = engine().await;
    require_admin_over(&engine, 1_000_000).await;
    let cart = CartId("cart-large".to_string());

    let first = engine.manager.require_approval(&cart, None).await.expect("evaluate");
    assert!(first.required);
    assert_eq!(first.decision.windowed_spend, 900_000);
    assert_eq!(first.approvals.len(), 1);
    let approval = first.approvals[0].clone();
    assert_eq!(approval.approval_type, ApprovalType::Admin);
    assert_eq!(approval.created_by, "emp-1");

    let retry = engine.manager.require_approval(&cart, None).await.expect("retry");
    assert_eq!(retry.approvals[0].id, approval.id);

    let approved =
        engine.manager.decide(command(&approval, "admin-1", "admin")).await.expect("approve");
    assert_eq!(approved.status, ApprovalStatus::Approved);
    assert!(engine.manager.list_pending_for_cart(&cart).await.expect("pending").is_empty());

    let history = engine.manager.list_history(&approval.id).await.expect("history");
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].new_status, ApprovalStatus::Approved);
    assert_eq!(history[1].comment.as_deref(), Some("within budget"));

    let raw_ip_rows: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM approval_history
         WHERE actor_ip_hash = '198.51.100.4' OR actor_user_agent_hash = 'curl/8.4'",
    )
    .fetch_one(&engine.pool)
    .await
    .expect("count");
    assert_eq!(raw_ip_rows, 0);

    assert_eq!(engine.signals.kinds(), vec![SignalKind::Created, SignalKind::Approved]);
}

#[tokio::test]
async fn stale_approval_escalates_once_through_sql() {
    let engine = engine().await;
    require_admin_over(&engine, 1_000_000).await;
    let cart = CartId("cart-large".to_string());
    let requirement = engine.manager.require_approval(&cart, None).await.expect("evaluate");
    let approval = requirement.approvals[0].clone();

    let later = engine.now.with_timezone(&Utc) + Duration::hours(25);
    let report = engine.scheduler.run_once(later).await.expect("scan");
    assert_eq!(report.escalated, vec![approval.id.clone()]);

    let again = engine.scheduler.run_once(later + Duration::hours(1)).await.expect("rescan");
    assert!(again.escalated.is_empty());

    let refused = engine.manager.decide(command(&approval, "admin-1", "admin")).await;
    assert!(refused.is_err());

    let approved = engine
        .manager
        .decide(command(&approval, "sm-1", "sales_manager"))
        .await
        .expect("escalated approve");
    assert_eq!(approved.status, ApprovalStatus::Approved);
    assert_eq!(approved.escalated_to.as_deref(), Some("sales_manager"));

    let history = engine.manager.list_history(&approval.id).await.expect("history");
    assert_eq!(history.iter().filter(|row| row.is_escalation).count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_requests_on_a_pooled_file_database_stay_consistent() {
    let dir = TempDir::new().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("race.db").display());
    let pool = connect_with_settings(&url, 8, 30).await.expect("connect");
    let engine = Arc::new(engine_on(pool).await);
    require_admin_over(&engine, 1_000_000).await;

    let mut creations = Vec::new();
    for _ in 0..16 {
        let engine = engine.clone();
        creations.push(tokio::spawn(async move {
            engine.manager.require_approval(&CartId("cart-large".to_string()), None).await
        }));
    }
    let mut approval_ids = HashSet::new();
    for creation in creations {
        let requirement = creation.await.expect("join").expect("evaluate");
        assert_eq!(requirement.approvals.len(), 1);
        approval_ids.insert(requirement.approvals[0].id.clone());
    }
    assert_eq!(approval_ids.len(), 1);

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM approval")
        .fetch_one(&engine.pool)
        .await
        .expect("count approvals");
    assert_eq!(rows, 1);

    let approval = engine
        .manager
        .list_pending_for_cart(&CartId("cart-large".to_string()))
        .await
        .expect("pending")
        .remove(0);

    let mut decisions = Vec::new();
    for index in 0..16 {
        let engine = engine.clone();
        let mut decision = command(&approval, &format!("admin-{index}"), "admin");
        if index % 2 == 1 {
            decision.decision = Decision::Reject;
            decision.reason = Some("over budget".to_string());
        }
        decisions.push(tokio::spawn(async move { engine.manager.decide(decision).await }));
    }

    let mut won = 0;
    let mut conflicts = 0;
    for decision in decisions {
        match decision.await.expect("join") {
            Ok(decided) => {
                assert_ne!(decided.status, ApprovalStatus::Pending);
                won += 1;
            }
            Err(ApplicationError::Conflict(_)) => conflicts += 1,
            Err(other) => panic!("unexpected decision error: {other}"),
        }
    }
    assert_eq!((won, conflicts), (1, 15));

    let history = engine.manager.list_history(&approval.id).await.expect("history");
    assert_eq!(history.len(), 2);
}
