use spendgate_db::migrations;

use crate::commands::{with_database, CommandResult};

pub fn run() -> CommandResult {
    with_database("migrate", |_config, pool| async move {
        match migrations::run_pending(&pool).await {
            Ok(()) => {
                let known = migrations::MIGRATOR
                    .iter()
                    .filter(|migration| migration.migration_type.is_up_migration())
                    .count();
                CommandResult::success(
                    "migrate",
                    format!("schema up to date ({known} migrations known)"),
                )
            }
            Err(error) => CommandResult::failure("migrate", "migration", error.to_string(), 5),
        }
    })
}
