use serde::Serialize;
use spendgate_core::config::{AppConfig, LoadOptions};
use spendgate_db::{connect_from_config, migrations, DbPool};

use crate::commands::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    command: &'static str,
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

/// Exit code 0 when every check passes, 6 otherwise.
pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 6 };

    let output = if json_output {
        serde_json::to_string(&report).unwrap_or_else(|error| {
            format!(
                "{{\"command\":\"doctor\",\"overall_status\":\"fail\",\
                 \"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.extend(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            checks.push(skipped("database_connectivity"));
            checks.push(skipped("schema_readiness"));
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { command: "doctor", overall_status, summary, checks }
}

fn skipped(name: &'static str) -> DoctorCheck {
    DoctorCheck {
        name,
        status: CheckStatus::Skipped,
        details: "skipped because an earlier check failed".to_string(),
    }
}

fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![
                DoctorCheck {
                    name: "database_connectivity",
                    status: CheckStatus::Fail,
                    details: format!("failed to initialize async runtime: {error}"),
                },
                skipped("schema_readiness"),
            ];
        }
    };

    runtime.block_on(async {
        let pool = match connect_from_config(&config.database).await {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck {
                        name: "database_connectivity",
                        status: CheckStatus::Fail,
                        details: format!("failed to connect to database: {error}"),
                    },
                    skipped("schema_readiness"),
                ];
            }
        };

        let connectivity = DoctorCheck {
            name: "database_connectivity",
            status: CheckStatus::Pass,
            details: format!("connected using `{}`", config.database.url),
        };
        let schema = check_schema(&pool).await;
        pool.close().await;
        vec![connectivity, schema]
    })
}

async fn check_schema(pool: &DbPool) -> DoctorCheck {
    let expected: Vec<i64> = migrations::MIGRATOR
        .iter()
        .filter(|migration| migration.migration_type.is_up_migration())
        .map(|migration| migration.version)
        .collect();

    let applied = sqlx::query_scalar::<_, i64>(
        "SELECT version FROM _sqlx_migrations WHERE success = 1 ORDER BY version",
    )
    .fetch_all(pool)
    .await;

    match applied {
        Ok(applied) => {
            let missing: Vec<String> = expected
                .iter()
                .filter(|version| !applied.contains(version))
                .map(ToString::to_string)
                .collect();
            if missing.is_empty() {
                DoctorCheck {
                    name: "schema_readiness",
                    status: CheckStatus::Pass,
                    details: format!("{} migrations applied", applied.len()),
                }
            } else {
                DoctorCheck {
                    name: "schema_readiness",
                    status: CheckStatus::Fail,
                    details: format!(
                        "pending migrations: {}; run `spendgate migrate`",
                        missing.join(", ")
                    ),
                }
            }
        }
        Err(error) => DoctorCheck {
            name: "schema_readiness",
            status: CheckStatus::Fail,
            details: format!("migration history unavailable ({error}); run `spendgate migrate`"),
        },
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
