use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use spendgate_core::domain::company::{
    CartId, CartSnapshot, Company, CompanyId, Employee, EmployeeId, OrderRecord, ResetFrequency,
};
use spendgate_core::errors::StoreError;
use spendgate_core::store::CommerceReader;

use super::{encode_timestamp, parse_timestamp, parse_u32, RepositoryError};
use crate::DbPool;

/// Read-only view of the checkout and company tables.
pub struct SqlCommerceReader {
    pool: DbPool,
}

impl SqlCommerceReader {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CommerceReader for SqlCommerceReader {
    async fn find_cart(&self, id: &CartId) -> Result<Option<CartSnapshot>, StoreError> {
        let row = sqlx::query(
            "SELECT id, employee_id, total, item_count, currency_code, created_at
             FROM cart WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(row.as_ref().map(cart_from_row).transpose()?)
    }

    async fn find_employee(&self, id: &EmployeeId) -> Result<Option<Employee>, StoreError> {
        let row = sqlx::query("SELECT id, company_id, spending_limit FROM employee WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        Ok(row.as_ref().map(employee_from_row).transpose()?)
    }

    async fn find_company(&self, id: &CompanyId) -> Result<Option<Company>, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, spending_limit_reset_frequency FROM company WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(row.as_ref().map(company_from_row).transpose()?)
    }

    async fn list_orders(
        &self,
        employee_id: &EmployeeId,
        since: DateTime<Utc>,
    ) -> Result<Vec<OrderRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, employee_id, total, created_at
             FROM customer_order
             WHERE employee_id = ? AND created_at >= ?
             ORDER BY created_at ASC",
        )
        .bind(&employee_id.0)
        .bind(encode_timestamp(&since))
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.iter().map(order_from_row).collect::<Result<Vec<_>, _>>()?)
    }
}

fn cart_from_row(row: &SqliteRow) -> Result<CartSnapshot, RepositoryError> {
    Ok(CartSnapshot {
        id: CartId(row.try_get("id")?),
        employee_id: EmployeeId(row.try_get("employee_id")?),
        total: row.try_get("total")?,
        item_count: parse_u32("item_count", row.try_get("item_count")?)?,
        currency_code: row.try_get("currency_code")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

fn employee_from_row(row: &SqliteRow) -> Result<Employee, RepositoryError> {
    Ok(Employee {
        id: EmployeeId(row.try_get("id")?),
        company_id: CompanyId(row.try_get("company_id")?),
        spending_limit: row.try_get("spending_limit")?,
    })
}

fn company_from_row(row: &SqliteRow) -> Result<Company, RepositoryError> {
    let frequency: String = row.try_get("spending_limit_reset_frequency")?;
    Ok(Company {
        id: CompanyId(row.try_get("id")?),
        name: row.try_get("name")?,
        spending_limit_reset_frequency: ResetFrequency::parse_or_never(&frequency),
    })
}

fn order_from_row(row: &SqliteRow) -> Result<OrderRecord, RepositoryError> {
    Ok(OrderRecord {
        id: row.try_get("id")?,
        employee_id: EmployeeId(row.try_get("employee_id")?),
        total: row.try_get("total")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
