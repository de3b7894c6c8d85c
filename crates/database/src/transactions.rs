//! The `transactions` table: the registry's single persistent entity.

use {
    crate::{
        TableConfig,
        error::Error,
        sql,
        value::{Value, bind_values},
    },
    chrono::{DateTime, Utc},
    sqlx::PgConnection,
    tracing::instrument,
};

pub const TABLE: &str = "transactions";

/// Columns the generic gateway paths may write. `created_at`/`updated_at`
/// are store-managed and deliberately absent.
pub const CONFIG: TableConfig = TableConfig {
    name: TABLE,
    columns: &[
        "transaction_id",
        "order_id",
        "amount",
        "order_type",
        "customer_uid",
        "status",
        "direction",
        "payment_method",
        "currency",
        "platform",
        "ip_address",
        "user_agent",
        "parent_transaction_id",
        "dispute_id",
        "refund_reason",
        "refund_amount",
        "meta",
        "owners",
        "owner_allocations",
        "products",
        "write_status",
        "is_deleted",
        "deleted_at",
    ],
};

/// One row in the `transactions` table.
#[derive(Clone, Debug, PartialEq, serde::Serialize, sqlx::FromRow)]
pub struct Transaction {
    pub transaction_id: String,
    pub order_id: String,
    pub amount: f64,
    pub order_type: String,
    pub customer_uid: String,
    pub status: String,
    pub direction: String,
    pub payment_method: String,
    pub currency: String,
    pub platform: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub parent_transaction_id: Option<String>,
    pub dispute_id: Option<String>,
    pub refund_reason: Option<String>,
    pub refund_amount: Option<f64>,
    pub meta: Option<serde_json::Value>,
    pub owners: serde_json::Value,
    pub owner_allocations: serde_json::Value,
    pub products: serde_json::Value,
    pub write_status: String,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for Transaction {
    fn default() -> Self {
        Self {
            transaction_id: Default::default(),
            order_id: Default::default(),
            amount: Default::default(),
            order_type: Default::default(),
            customer_uid: Default::default(),
            status: Default::default(),
            direction: Default::default(),
            payment_method: Default::default(),
            currency: Default::default(),
            platform: Default::default(),
            ip_address: Default::default(),
            user_agent: Default::default(),
            parent_transaction_id: Default::default(),
            dispute_id: Default::default(),
            refund_reason: Default::default(),
            refund_amount: Default::default(),
            meta: Default::default(),
            owners: serde_json::Value::Array(Vec::new()),
            owner_allocations: serde_json::Value::Array(Vec::new()),
            products: serde_json::Value::Array(Vec::new()),
            write_status: Default::default(),
            is_deleted: false,
            deleted_at: Default::default(),
            created_at: DateTime::UNIX_EPOCH,
            updated_at: DateTime::UNIX_EPOCH,
        }
    }
}

/// Inserts a fully-specified row. Used by fixtures and by callers that carry
/// their own `Transaction`; the registry's create path goes through the
/// generic gateway insert instead.
#[instrument(skip_all)]
pub async fn insert(ex: &mut PgConnection, tx: &Transaction) -> Result<(), sqlx::Error> {
    const QUERY: &str = r#"
INSERT INTO transactions (
    transaction_id,
    order_id,
    amount,
    order_type,
    customer_uid,
    status,
    direction,
    payment_method,
    currency,
    platform,
    ip_address,
    user_agent,
    parent_transaction_id,
    dispute_id,
    refund_reason,
    refund_amount,
    meta,
    owners,
    owner_allocations,
    products,
    write_status,
    is_deleted,
    deleted_at
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23)
    "#;
    sqlx::query(QUERY)
        .bind(&tx.transaction_id)
        .bind(&tx.order_id)
        .bind(tx.amount)
        .bind(&tx.order_type)
        .bind(&tx.customer_uid)
        .bind(&tx.status)
        .bind(&tx.direction)
        .bind(&tx.payment_method)
        .bind(&tx.currency)
        .bind(&tx.platform)
        .bind(&tx.ip_address)
        .bind(&tx.user_agent)
        .bind(&tx.parent_transaction_id)
        .bind(&tx.dispute_id)
        .bind(&tx.refund_reason)
        .bind(tx.refund_amount)
        .bind(&tx.meta)
        .bind(&tx.owners)
        .bind(&tx.owner_allocations)
        .bind(&tx.products)
        .bind(&tx.write_status)
        .bind(tx.is_deleted)
        .bind(tx.deleted_at)
        .execute(ex)
        .await?;
    Ok(())
}

/// Reads a live row.
#[instrument(skip_all)]
pub async fn get(ex: &mut PgConnection, id: &str) -> Result<Option<Transaction>, sqlx::Error> {
    const QUERY: &str = r#"
SELECT * FROM transactions
WHERE transaction_id = $1 AND is_deleted = false
LIMIT 1
    "#;
    sqlx::query_as(QUERY).bind(id).fetch_optional(ex).await
}

/// Reads a live row under `FOR UPDATE`, holding its row lock for the rest of
/// the surrounding transaction.
#[instrument(skip_all)]
pub async fn lock_for_update(
    ex: &mut PgConnection,
    id: &str,
) -> Result<Option<Transaction>, sqlx::Error> {
    const QUERY: &str = r#"
SELECT * FROM transactions
WHERE transaction_id = $1 AND is_deleted = false
FOR UPDATE
    "#;
    sqlx::query_as(QUERY).bind(id).fetch_optional(ex).await
}

/// Applies a vetted SET list to a live row and returns the new state. Column
/// names must be lowercase identifiers registered for the table; the store
/// bumps `updated_at` itself.
#[instrument(skip_all)]
pub async fn update_columns(
    ex: &mut PgConnection,
    id: &str,
    set: &[(&str, Value)],
) -> Result<Option<Transaction>, Error> {
    let mut assignments = Vec::with_capacity(set.len() + 1);
    let mut values = Vec::with_capacity(set.len());
    for (index, (column, value)) in set.iter().enumerate() {
        sql::validate_update_column(column)?;
        if !CONFIG.columns.iter().any(|allowed| allowed == column) {
            return Err(Error::UnknownColumn {
                table: TABLE.to_string(),
                column: (*column).to_string(),
            });
        }
        assignments.push(format!("{} = ${}", sql::quote_ident(column), index + 1));
        values.push(value.clone());
    }
    Value::check(&values)?;
    assignments.push("updated_at = now()".to_string());
    let statement = format!(
        "UPDATE transactions SET {} WHERE transaction_id = ${} AND is_deleted = false RETURNING *",
        assignments.join(", "),
        set.len() + 1,
    );
    sql::check_placeholders(&statement, set.len() + 1)?;
    bind_values!(sqlx::query_as(&statement), &values)
        .bind(id)
        .fetch_optional(ex)
        .await
        .map_err(Error::classify)
}

#[instrument(skip_all)]
pub async fn count_all(ex: &mut PgConnection) -> Result<i64, sqlx::Error> {
    const QUERY: &str = r#"
SELECT COUNT(*) FROM transactions
WHERE is_deleted = false
    "#;
    sqlx::query_scalar(QUERY).fetch_one(ex).await
}

#[instrument(skip_all)]
pub async fn count_by_status(ex: &mut PgConnection, status: &str) -> Result<i64, sqlx::Error> {
    const QUERY: &str = r#"
SELECT COUNT(*) FROM transactions
WHERE status = $1 AND is_deleted = false
    "#;
    sqlx::query_scalar(QUERY).bind(status).fetch_one(ex).await
}

pub fn is_duplicate_record_error(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = &err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use {super::*, sqlx::Connection};

    fn fixture(id: &str) -> Transaction {
        Transaction {
            transaction_id: id.to_string(),
            order_id: "o1".to_string(),
            amount: 12.5,
            order_type: "sale".to_string(),
            customer_uid: "c1".to_string(),
            status: "pending".to_string(),
            direction: "purchase".to_string(),
            payment_method: "card".to_string(),
            currency: "USD".to_string(),
            platform: "web".to_string(),
            owners: serde_json::json!(["o1"]),
            owner_allocations: serde_json::json!([
                {"owner_uuid": "o1", "amount_cents": 1250}
            ]),
            write_status: "confirmed".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn update_vets_columns_before_touching_the_database() {
        assert!(sql::validate_update_column("Status").is_err());
        assert!(sql::validate_update_column("status; --").is_err());
        // Store-managed columns stay out of the writable set.
        assert!(!CONFIG.columns.contains(&"created_at"));
        assert!(!CONFIG.columns.contains(&"updated_at"));
        assert!(CONFIG.columns.contains(&"refund_reason"));
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_roundtrip_and_soft_delete_filtering() {
        let mut db = PgConnection::connect("postgresql://").await.unwrap();
        let mut db = db.begin().await.unwrap();
        crate::clear_DANGER_(&mut db).await.unwrap();

        let tx = fixture("t1");
        insert(&mut db, &tx).await.unwrap();

        let read = get(&mut db, "t1").await.unwrap().unwrap();
        assert_eq!(read.transaction_id, tx.transaction_id);
        assert_eq!(read.owners, tx.owners);
        assert_eq!(read.owner_allocations, tx.owner_allocations);
        assert!(read.updated_at >= read.created_at);

        let locked = lock_for_update(&mut db, "t1").await.unwrap();
        assert!(locked.is_some());

        let updated = update_columns(
            &mut db,
            "t1",
            &[
                ("status", Value::text("completed")),
                ("refund_reason", Value::Text(None)),
            ],
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(updated.status, "completed");
        assert_eq!(updated.refund_reason, None);
        assert!(updated.updated_at >= read.updated_at);

        // Tombstone the row; reads and further updates stop seeing it.
        update_columns(
            &mut db,
            "t1",
            &[
                ("is_deleted", Value::Bool(Some(true))),
                ("deleted_at", Value::Timestamp(Some(Utc::now()))),
            ],
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(get(&mut db, "t1").await.unwrap(), None);
        assert_eq!(lock_for_update(&mut db, "t1").await.unwrap(), None);
        let gone = update_columns(&mut db, "t1", &[("status", Value::text("x"))])
            .await
            .unwrap();
        assert_eq!(gone, None);
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_insert_same_id_twice_fails() {
        let mut db = PgConnection::connect("postgresql://").await.unwrap();
        let mut db = db.begin().await.unwrap();
        crate::clear_DANGER_(&mut db).await.unwrap();

        let tx = fixture("t1");
        insert(&mut db, &tx).await.unwrap();
        let err = insert(&mut db, &tx).await.unwrap_err();
        assert!(is_duplicate_record_error(&err));
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_counts_ignore_dead_rows() {
        let mut db = PgConnection::connect("postgresql://").await.unwrap();
        let mut db = db.begin().await.unwrap();
        crate::clear_DANGER_(&mut db).await.unwrap();

        for (id, status, deleted) in [
            ("t1", "pending", false),
            ("t2", "pending", true),
            ("t3", "completed", false),
        ] {
            let tx = Transaction {
                transaction_id: id.to_string(),
                status: status.to_string(),
                is_deleted: deleted,
                ..fixture(id)
            };
            insert(&mut db, &tx).await.unwrap();
        }

        assert_eq!(count_all(&mut db).await.unwrap(), 2);
        assert_eq!(count_by_status(&mut db, "pending").await.unwrap(), 1);
        assert_eq!(count_by_status(&mut db, "completed").await.unwrap(), 1);
        assert_eq!(count_by_status(&mut db, "missing").await.unwrap(), 0);
    }
}
