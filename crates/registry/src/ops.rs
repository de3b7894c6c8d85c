//! The registry operations. Each one composes the sanitizer, the shaper and
//! the store gateway, then fans out its audit events once the mutation is
//! durable. Mutations surface errors after recording them; `query` is the
//! deliberate exception and hands dashboards an empty page instead.

use {
    crate::{
        audit::{AuditEvent, AuditSink, Emitter, changed_fields},
        config::Config,
        dates,
        error::Error,
        report::{ErrorSink, Reporter},
        sanitize::{self, Field, Kind, has_value},
        shape::{self, Allocation},
    },
    chrono::Utc,
    chrono_tz::Tz,
    database::{
        Gateway, Value, filter,
        transactions::{self, Transaction},
    },
    futures::FutureExt,
    serde_json::json,
    std::sync::Arc,
};

pub const MAX_PAGE_SIZE: i64 = 200;
pub const DEFAULT_PAGE_SIZE: i64 = 20;

/// Fields `update` accepts, with the kind each value is sanitized as.
const UPDATABLE_FIELDS: &[(&str, Kind)] = &[
    ("status", Kind::Text),
    ("refund_amount", Kind::Float),
    ("refund_reason", Kind::Text),
    ("dispute_id", Kind::Text),
    ("meta", Kind::Object),
    ("write_status", Kind::Text),
    ("products", Kind::Array),
];

/// The alias set under which callers may spell the direction.
const DIRECTION_ALIASES: &[&str] = &["direction", "transaction_kind", "transactionKind"];

#[derive(Clone, Copy, Debug, Default)]
pub struct Page {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryResult {
    pub rows: Vec<Transaction>,
    pub total: i64,
}

#[derive(Clone)]
pub struct Registry {
    gateway: Arc<Gateway>,
    audit: Emitter,
    reporter: Reporter,
    timezone: Tz,
}

impl Registry {
    pub async fn connect(
        config: &Config,
        audit: Arc<dyn AuditSink>,
        errors: Arc<dyn ErrorSink>,
    ) -> Result<Self, Error> {
        let gateway = Gateway::connect(config.db_url.as_str(), config.gateway_config()).await?;
        Ok(Self::new(Arc::new(gateway), audit, errors, config.timezone))
    }

    pub fn new(
        gateway: Arc<Gateway>,
        audit: Arc<dyn AuditSink>,
        errors: Arc<dyn ErrorSink>,
        timezone: Tz,
    ) -> Self {
        Self {
            gateway,
            audit: Emitter::new(audit),
            reporter: Reporter::new(errors),
            timezone,
        }
    }

    /// Sanitizes and stores a new transaction, then fans out the creation
    /// audit events. The returned row carries the generated id.
    pub async fn create(&self, payload: &serde_json::Value) -> Result<Transaction, Error> {
        match self.create_inner(payload).await {
            Ok(row) => {
                self.emit_creation_events(&row).await;
                Ok(row)
            }
            Err(err) => {
                self.fail(
                    "create transaction",
                    "transactionCreation",
                    &err,
                    json!({"operation": "create"}),
                )
                .await;
                Err(err)
            }
        }
    }

    async fn create_inner(&self, payload: &serde_json::Value) -> Result<Transaction, Error> {
        let payload = payload
            .as_object()
            .ok_or_else(|| Error::invalid_value("payload", "an object"))?;
        let schema = [
            ("order_id", Field::required(payload.get("order_id"), Kind::Text)),
            ("amount", Field::required(payload.get("amount"), Kind::Float)),
            ("order_type", Field::required(payload.get("order_type"), Kind::Text)),
            ("customer_uid", Field::required(payload.get("customer_uid"), Kind::Text)),
            ("status", Field::required(payload.get("status"), Kind::Text)),
            ("payment_method", Field::required(payload.get("payment_method"), Kind::Text)),
            ("currency", Field::required(payload.get("currency"), Kind::Text)),
            ("platform", Field::required(payload.get("platform"), Kind::Text)),
            ("ip_address", Field::optional(payload.get("ip_address"), Kind::Text)),
            ("user_agent", Field::optional(payload.get("user_agent"), Kind::Text)),
            (
                "parent_transaction_id",
                Field::optional(payload.get("parent_transaction_id"), Kind::Text),
            ),
            ("dispute_id", Field::optional(payload.get("dispute_id"), Kind::Text)),
            ("refund_reason", Field::optional(payload.get("refund_reason"), Kind::Text)),
            ("refund_amount", Field::optional(payload.get("refund_amount"), Kind::Float)),
            (
                "write_status",
                Field::optional_or(payload.get("write_status"), Kind::Text, json!("confirmed")),
            ),
        ];
        let sanitized = sanitize::sanitize_validate(&schema)?;

        let direction_value = DIRECTION_ALIASES
            .iter()
            .find_map(|alias| payload.get(*alias).filter(|value| has_value(value)))
            .ok_or(Error::MissingRequired("direction"))?;
        let direction_text =
            sanitize::sanitize_text(direction_value).ok_or(Error::InvalidDirection)?;
        let direction = shape::normalize_direction(&direction_text)?;

        let status = shape::normalize_status(&required_text(&sanitized, "status")?)?;
        let meta = shape::shape_meta(payload.get("meta"))?;
        let owners = shape::shape_owners(
            payload
                .get("owners")
                .ok_or(Error::MissingRequired("owners"))?,
        )?;
        let allocations = shape::shape_allocations(
            payload
                .get("owner_allocations")
                .ok_or(Error::MissingRequired("owner_allocations"))?,
        )?;
        let products = payload
            .get("products")
            .filter(|value| !value.is_null())
            .map(shape::shape_products)
            .transpose()?
            .unwrap_or_else(|| json!([]));

        let transaction_id = format!("txn_{}", uuid::Uuid::new_v4().simple());
        let row = [
            ("transaction_id", Value::text(transaction_id)),
            ("order_id", Value::text(required_text(&sanitized, "order_id")?)),
            ("amount", Value::Float(Some(required_float(&sanitized, "amount")?))),
            ("order_type", Value::text(required_text(&sanitized, "order_type")?)),
            ("customer_uid", Value::text(required_text(&sanitized, "customer_uid")?)),
            ("status", Value::text(status)),
            ("direction", Value::text(direction.to_string())),
            ("payment_method", Value::text(required_text(&sanitized, "payment_method")?)),
            ("currency", Value::text(required_text(&sanitized, "currency")?)),
            ("platform", Value::text(required_text(&sanitized, "platform")?)),
            ("ip_address", Value::Text(optional_text(&sanitized, "ip_address"))),
            ("user_agent", Value::Text(optional_text(&sanitized, "user_agent"))),
            (
                "parent_transaction_id",
                Value::Text(optional_text(&sanitized, "parent_transaction_id")),
            ),
            ("dispute_id", Value::Text(optional_text(&sanitized, "dispute_id"))),
            ("refund_reason", Value::Text(optional_text(&sanitized, "refund_reason"))),
            ("refund_amount", Value::Float(optional_float(&sanitized, "refund_amount"))),
            ("meta", Value::Json(meta)),
            ("owners", Value::json(owners)),
            ("owner_allocations", Value::json(shape::allocations_json(&allocations))),
            ("products", Value::json(products)),
            ("write_status", Value::text(required_text(&sanitized, "write_status")?)),
            ("is_deleted", Value::Bool(Some(false))),
        ];
        Ok(self.gateway.insert(transactions::TABLE, &row).await?)
    }

    /// Updates a live transaction under its row lock. Only the fields of
    /// [`UPDATABLE_FIELDS`] are accepted; `{"unset": true}` sets a field to
    /// null.
    pub async fn update(
        &self,
        transaction_id: &str,
        fields: &serde_json::Value,
    ) -> Result<Transaction, Error> {
        match self.update_inner(transaction_id, fields).await {
            Ok((old, new, touched)) => {
                self.emit_update_events(&old, &new, &touched).await;
                Ok(new)
            }
            Err(err) => {
                self.fail(
                    "update transaction",
                    "transactionUpdate",
                    &err,
                    json!({"operation": "update", "transaction_id": transaction_id}),
                )
                .await;
                Err(err)
            }
        }
    }

    async fn update_inner(
        &self,
        transaction_id: &str,
        fields: &serde_json::Value,
    ) -> Result<(Transaction, Transaction, Vec<String>), Error> {
        let fields = fields
            .as_object()
            .ok_or_else(|| Error::invalid_value("fields", "an object"))?;
        let set = build_update_set(fields)?;
        let touched: Vec<String> = fields.keys().cloned().collect();

        let id = transaction_id.to_string();
        let (old, new) = self
            .gateway
            .run_in_tx(move |conn| {
                async move {
                    let existing = transactions::lock_for_update(conn, &id)
                        .await
                        .map_err(database::Error::classify)?
                        .ok_or_else(|| Error::TransactionNotFound(id.clone()))?;
                    let set_refs: Vec<(&str, Value)> = set
                        .iter()
                        .map(|(column, value)| (column.as_str(), value.clone()))
                        .collect();
                    let updated = transactions::update_columns(conn, &id, &set_refs)
                        .await?
                        .ok_or_else(|| Error::TransactionNotFound(id.clone()))?;
                    Ok::<_, Error>((existing, updated))
                }
                .boxed()
            })
            .await?;
        Ok((old, new, touched))
    }

    /// Tombstones a transaction. Idempotent: deleting an absent or
    /// already-deleted id is a successful no-op.
    pub async fn delete(&self, transaction_id: &str) -> Result<bool, Error> {
        let result: Result<Vec<Transaction>, database::Error> = self
            .gateway
            .update(
                transactions::TABLE,
                &[
                    ("is_deleted", Value::Bool(Some(true))),
                    ("deleted_at", Value::Timestamp(Some(Utc::now()))),
                ],
                "transaction_id = $1 AND is_deleted = false",
                &[Value::text(transaction_id)],
            )
            .await;
        match result {
            Ok(rows) => {
                self.audit
                    .emit(AuditEvent::new(
                        "transaction",
                        "deleteTransaction",
                        format!("transaction {transaction_id} deleted"),
                        json!({"transaction_id": transaction_id, "matched": !rows.is_empty()}),
                    ))
                    .await;
                Ok(true)
            }
            Err(err) => {
                let err = Error::from(err);
                self.fail(
                    "delete transaction",
                    "deleteTransaction",
                    &err,
                    json!({"operation": "delete", "transaction_id": transaction_id}),
                )
                .await;
                Err(err)
            }
        }
    }

    /// Reads one live transaction. No audit traffic on the happy path.
    pub async fn get(&self, transaction_id: &str) -> Result<Option<Transaction>, Error> {
        let result = async {
            let mut conn = self
                .gateway
                .pool()
                .acquire()
                .await
                .map_err(database::Error::classify)?;
            transactions::get(&mut conn, transaction_id)
                .await
                .map_err(database::Error::classify)
        }
        .await;
        match result {
            Ok(row) => {
                tracing::debug!(transaction_id, found = row.is_some(), "transaction lookup");
                Ok(row)
            }
            Err(err) => {
                let err = Error::from(err);
                self.fail(
                    "get transaction",
                    "getTransaction",
                    &err,
                    json!({"operation": "get", "transaction_id": transaction_id}),
                )
                .await;
                Err(err)
            }
        }
    }

    /// Filtered, paginated listing with a total count. Failures other than
    /// an inverted date range are recorded and swallowed: listing callers
    /// get an empty page, not an exception.
    pub async fn query(
        &self,
        filters: &serde_json::Value,
        page: Page,
    ) -> Result<QueryResult, Error> {
        match self.query_inner(filters, page).await {
            Ok(result) => Ok(result),
            Err(err @ Error::InvalidDateRange) => Err(err),
            Err(err) => {
                self.fail(
                    "query transactions",
                    "queryTransactions",
                    &err,
                    json!({"operation": "query"}),
                )
                .await;
                Ok(QueryResult::default())
            }
        }
    }

    async fn query_inner(
        &self,
        filters: &serde_json::Value,
        page: Page,
    ) -> Result<QueryResult, Error> {
        let filters = filters
            .as_object()
            .ok_or_else(|| Error::invalid_value("filters", "an object"))?;
        let (limit, offset) = resolve_page(page);
        let (clauses, args) = build_filters(filters, self.timezone)?;

        let count_sql = filter::count_sql(&clauses)?;
        let total = self
            .gateway
            .get_row_as::<(i64,)>(&count_sql, &args)
            .await?
            .map(|(total,)| total)
            .unwrap_or(0);

        let page_sql = filter::page_sql(&clauses, args.len())?;
        let mut page_args = args;
        page_args.push(Value::Int(Some(limit)));
        page_args.push(Value::Int(Some(offset)));
        let rows = self
            .gateway
            .query_as::<Transaction>(&page_sql, &page_args)
            .await?;
        Ok(QueryResult { rows, total })
    }

    /// Number of live transactions. Returns 0 after recording on failure,
    /// so callers cannot tell "empty" from "failed" without the reporter.
    pub async fn count_all(&self) -> i64 {
        let result = async {
            let mut conn = self
                .gateway
                .pool()
                .acquire()
                .await
                .map_err(database::Error::classify)?;
            transactions::count_all(&mut conn)
                .await
                .map_err(database::Error::classify)
        }
        .await;
        match result {
            Ok(total) => total,
            Err(err) => {
                let err = Error::from(err);
                self.fail(
                    "count transactions",
                    "countTransactions",
                    &err,
                    json!({"operation": "count_all"}),
                )
                .await;
                0
            }
        }
    }

    /// Number of live transactions in a status. A missing status is the
    /// caller's error and surfaces; store failures degrade to 0 as in
    /// [`Registry::count_all`].
    pub async fn count_by_status(&self, status: &str) -> Result<i64, Error> {
        let status = match shape::normalize_status(status) {
            Ok(status) => status,
            Err(err) => {
                self.fail(
                    "count transactions by status",
                    "countTransactions",
                    &err,
                    json!({"operation": "count_by_status"}),
                )
                .await;
                return Err(err);
            }
        };
        let result = async {
            let mut conn = self
                .gateway
                .pool()
                .acquire()
                .await
                .map_err(database::Error::classify)?;
            transactions::count_by_status(&mut conn, &status)
                .await
                .map_err(database::Error::classify)
        }
        .await;
        match result {
            Ok(total) => Ok(total),
            Err(err) => {
                let err = Error::from(err);
                self.fail(
                    "count transactions by status",
                    "countTransactions",
                    &err,
                    json!({"operation": "count_by_status", "status": status}),
                )
                .await;
                Ok(0)
            }
        }
    }

    /// Releases the pool. Safe to call more than once.
    pub async fn close(&self) {
        self.gateway.close().await;
    }

    async fn emit_creation_events(&self, row: &Transaction) {
        self.audit
            .emit(AuditEvent::new(
                "transaction",
                "transactionCreation",
                format!("transaction {} created", row.transaction_id),
                json!({
                    "transaction_id": row.transaction_id,
                    "order_id": row.order_id,
                    "direction": row.direction,
                    "status": row.status,
                    "amount": row.amount,
                }),
            ))
            .await;
        if !row.customer_uid.is_empty() {
            self.audit
                .emit(AuditEvent::new(
                    "customer",
                    "transactionCreationCustomer",
                    format!("transaction {} created", row.transaction_id),
                    json!({
                        "transaction_id": row.transaction_id,
                        "customer_uid": row.customer_uid,
                    }),
                ))
                .await;
        }
        for allocation in parse_allocations(&row.owner_allocations) {
            self.audit
                .emit(AuditEvent::new(
                    "owner",
                    "transactionCreationOwner",
                    format!("transaction {} created", row.transaction_id),
                    json!({
                        "transaction_id": row.transaction_id,
                        "owner_uuid": allocation.owner_uuid,
                        "amount_cents": allocation.amount_cents,
                    }),
                ))
                .await;
        }
    }

    async fn emit_update_events(&self, old: &Transaction, new: &Transaction, touched: &[String]) {
        let old_json = serde_json::to_value(old).unwrap_or_default();
        let new_json = serde_json::to_value(new).unwrap_or_default();
        let diff = changed_fields(
            &old_json,
            &new_json,
            touched.iter().map(String::as_str),
        );
        self.audit
            .emit(AuditEvent::new(
                "transaction",
                "transactionUpdate",
                format!("transaction {} updated", new.transaction_id),
                json!({
                    "transaction_id": new.transaction_id,
                    "changed_fields": diff,
                }),
            ))
            .await;
        if !new.customer_uid.is_empty() {
            self.audit
                .emit(AuditEvent::new(
                    "customer",
                    "transactionUpdateCustomer",
                    format!("transaction {} updated", new.transaction_id),
                    json!({
                        "transaction_id": new.transaction_id,
                        "customer_uid": new.customer_uid,
                    }),
                ))
                .await;
        }
        for allocation in parse_allocations(&old.owner_allocations) {
            self.audit
                .emit(AuditEvent::new(
                    "owner",
                    "transactionUpdateOwner",
                    format!("transaction {} updated", new.transaction_id),
                    json!({
                        "transaction_id": new.transaction_id,
                        "owner_uuid": allocation.owner_uuid,
                        "amount_cents": allocation.amount_cents,
                    }),
                ))
                .await;
        }
    }

    /// Shared error path: record with the reporter, then emit one critical
    /// audit event. Context carries operation metadata, never payloads.
    async fn fail(&self, what: &str, action: &str, err: &Error, context: serde_json::Value) {
        self.reporter.record(what, err, context.clone()).await;
        self.audit
            .emit(
                AuditEvent::new(
                    "transaction",
                    action,
                    format!("{what} failed: {}", err.kind()),
                    context,
                )
                .critical(),
            )
            .await;
    }
}

/// Clamps pagination: limit to `[1, 200]` (default 20), offset to `>= 0`
/// (default 0).
fn resolve_page(page: Page) -> (i64, i64) {
    let limit = page
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let offset = page.offset.unwrap_or(0).max(0);
    (limit, offset)
}

/// Turns the `update` field map into a vetted SET list. Unknown fields are
/// rejected, `{"unset": true}` becomes a typed null.
fn build_update_set(
    fields: &serde_json::Map<String, serde_json::Value>,
) -> Result<Vec<(String, Value)>, Error> {
    if fields.is_empty() {
        return Err(Error::invalid_value("fields", "at least one updatable field"));
    }
    let mut set = Vec::with_capacity(fields.len());
    for (name, value) in fields {
        let kind = UPDATABLE_FIELDS
            .iter()
            .find(|(field, _)| *field == name.as_str())
            .map(|(_, kind)| *kind)
            .ok_or_else(|| Error::UnknownField(name.clone()))?;
        let entry = if is_unset(value) {
            match name.as_str() {
                // Always-present columns cannot be nulled out; a cleared
                // product list is the empty list.
                "status" | "write_status" => {
                    return Err(Error::invalid_value(name, "a value (cannot be unset)"));
                }
                "products" => Value::json(json!([])),
                "meta" => Value::Json(None),
                "refund_amount" => Value::Float(None),
                _ => Value::Text(None),
            }
        } else {
            match kind {
                Kind::Text => {
                    let text = sanitize::sanitize_text(value)
                        .ok_or_else(|| Error::invalid_value(name, "text"))?;
                    if name == "status" {
                        Value::text(shape::normalize_status(&text)?)
                    } else {
                        Value::text(text)
                    }
                }
                Kind::Float => Value::Float(Some(
                    sanitize::sanitize_float(value)
                        .ok_or_else(|| Error::invalid_value(name, "a finite number"))?,
                )),
                Kind::Object => Value::Json(shape::shape_meta(Some(value))?),
                Kind::Array => Value::json(shape::shape_products(value)?),
                _ => return Err(Error::UnknownField(name.clone())),
            }
        };
        set.push((name.clone(), entry));
    }
    Ok(set)
}

/// The explicit unset convention: a field valued `{"unset": true}`.
fn is_unset(value: &serde_json::Value) -> bool {
    value
        .as_object()
        .is_some_and(|map| map.len() == 1 && map.get("unset") == Some(&json!(true)))
}

/// Assembles the WHERE clauses and their arguments for `query`, in the fixed
/// clause order.
fn build_filters(
    filters: &serde_json::Map<String, serde_json::Value>,
    timezone: Tz,
) -> Result<(Vec<String>, Vec<Value>), Error> {
    let mut clauses = vec!["is_deleted = false".to_string()];
    let mut args: Vec<Value> = Vec::new();

    if let Some(id) = first_text(filters, &["transactionId", "transaction_id"])? {
        args.push(Value::text(id));
        clauses.push(format!("transaction_id = ${}", args.len()));
    }
    if let Some(customer) = first_text(filters, &["customer_uid", "customerUid", "customerId"])? {
        args.push(Value::text(customer));
        clauses.push(format!("customer_uid = ${}", args.len()));
    }
    let owners = owner_ids(filters)?;
    if !owners.is_empty() {
        args.push(Value::json(serde_json::Value::Array(
            owners.into_iter().map(serde_json::Value::String).collect(),
        )));
        clauses.push(format!("owners @> ${}", args.len()));
    }
    if let Some(order_type) = first_text(filters, &["order_type", "orderType"])? {
        args.push(Value::text(order_type));
        clauses.push(format!("order_type = ${}", args.len()));
    }
    if let Some(status) = first_text(filters, &["status"])? {
        args.push(Value::text(shape::normalize_status(&status)?));
        clauses.push(format!("status = ${}", args.len()));
    }
    let (start, end) = dates::day_window(
        opt_str(filters, "dateStart")?,
        opt_str(filters, "dateEnd")?,
        timezone,
    )?;
    if let Some(start) = start {
        args.push(Value::Timestamp(Some(start)));
        clauses.push(format!("created_at >= ${}", args.len()));
    }
    if let Some(end) = end {
        args.push(Value::Timestamp(Some(end)));
        clauses.push(format!("created_at <= ${}", args.len()));
    }
    Ok((clauses, args))
}

/// First present alias, sanitized as text.
fn first_text(
    filters: &serde_json::Map<String, serde_json::Value>,
    aliases: &[&str],
) -> Result<Option<String>, Error> {
    for alias in aliases {
        if let Some(value) = filters.get(*alias).filter(|value| has_value(value)) {
            return match sanitize::sanitize_text(value) {
                Some(text) => Ok(Some(text)),
                None => Err(Error::invalid_value(*alias, "text")),
            };
        }
    }
    Ok(None)
}

/// Every owner id under every alias, merged and deduplicated in first-seen
/// order.
fn owner_ids(
    filters: &serde_json::Map<String, serde_json::Value>,
) -> Result<Vec<String>, Error> {
    let mut owners: Vec<String> = Vec::new();
    for alias in ["ownerId", "owner_uuid", "owner", "ownerIds", "owner_ids"] {
        let Some(value) = filters.get(alias).filter(|value| has_value(value)) else {
            continue;
        };
        let entries = sanitize::sanitize_array(value)
            .ok_or_else(|| Error::invalid_value(alias, "owner ids"))?;
        for entry in entries {
            let owner = sanitize::sanitize_text(&entry)
                .ok_or_else(|| Error::invalid_value(alias, "owner ids"))?;
            if !owners.contains(&owner) {
                owners.push(owner);
            }
        }
    }
    Ok(owners)
}

fn opt_str<'m>(
    filters: &'m serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> Result<Option<&'m str>, Error> {
    match filters.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(raw)) if raw.trim().is_empty() => Ok(None),
        Some(serde_json::Value::String(raw)) => Ok(Some(raw.as_str())),
        Some(_) => Err(Error::invalid_value(key, "a YYYY-MM-DD date")),
    }
}

fn required_text(
    sanitized: &serde_json::Map<String, serde_json::Value>,
    name: &'static str,
) -> Result<String, Error> {
    sanitized
        .get(name)
        .and_then(|value| value.as_str())
        .map(str::to_string)
        .ok_or(Error::MissingRequired(name))
}

fn required_float(
    sanitized: &serde_json::Map<String, serde_json::Value>,
    name: &'static str,
) -> Result<f64, Error> {
    sanitized
        .get(name)
        .and_then(serde_json::Value::as_f64)
        .ok_or(Error::MissingRequired(name))
}

fn optional_text(
    sanitized: &serde_json::Map<String, serde_json::Value>,
    name: &str,
) -> Option<String> {
    sanitized
        .get(name)
        .and_then(|value| value.as_str())
        .map(str::to_string)
}

fn optional_float(
    sanitized: &serde_json::Map<String, serde_json::Value>,
    name: &str,
) -> Option<f64> {
    sanitized.get(name).and_then(serde_json::Value::as_f64)
}

fn parse_allocations(value: &serde_json::Value) -> Vec<Allocation> {
    serde_json::from_value(value.clone()).unwrap_or_default()
}
