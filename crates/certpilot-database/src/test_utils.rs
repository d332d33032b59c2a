//! Test utilities shared by database-backed tests across all certpilot
//! crates: each test gets its own in-memory SQLite database with the full
//! schema applied.

use crate::DbConnection;
use sea_orm::Database;
use sea_orm_migration::MigratorTrait;
use std::sync::Arc;
use certpilot_migrations::Migrator;

/// Create a fresh in-memory database with all migrations applied.
pub async fn setup_test_db() -> Arc<DbConnection> {
    let db = Database::connect("sqlite::memory:")
        .await
        .expect("connect to in-memory sqlite");

    Migrator::up(&db, None).await.expect("run migrations");

    Arc::new(db)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{ConnectionTrait, Statement};

    #[tokio::test]
    async fn migrations_create_schema() {
        let db = setup_test_db().await;

        let result = db
            .query_all(Statement::from_string(
                db.get_database_backend(),
                "SELECT name FROM sqlite_master WHERE type='table'".to_string(),
            ))
            .await
            .unwrap();

        let tables: Vec<String> = result
            .iter()
            .map(|row| row.try_get_by_index::<String>(0).unwrap())
            .collect();

        for expected in [
            "users",
            "products",
            "orders",
            "certs",
            "chains",
            "transactions",
            "tasks",
            "domain_validation_records",
            "ca_logs",
            "settings",
        ] {
            assert!(tables.iter().any(|t| t == expected), "missing {}", expected);
        }
    }
}
