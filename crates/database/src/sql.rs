//! Assembly and vetting of dynamic SQL. Nothing in this module talks to the
//! database; it only turns vetted identifiers and clause strings into
//! statement text that the gateway then binds and executes.

use {crate::error::Error, regex::Regex, std::sync::LazyLock};

static IDENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"));

static LOWER_IDENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_][a-z0-9_]*$").expect("valid regex"));

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$(\d+)").expect("valid regex"));

/// Comment and statement separators that must never appear in caller-supplied
/// clause text.
pub const FORBIDDEN_MARKERS: &[&str] = &[";", "--", "/*", "*/"];

/// Checks a (possibly schema-qualified) identifier. Each dot-separated part
/// must match `[A-Za-z_][A-Za-z0-9_]*`.
pub fn validate_ident(name: &str) -> Result<(), Error> {
    let valid = !name.is_empty() && name.split('.').all(|part| IDENT.is_match(part));
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidIdentifier(name.to_string()))
    }
}

/// The stricter check applied to SET columns of the in-transaction update
/// path: lowercase only, no qualification.
pub fn validate_update_column(name: &str) -> Result<(), Error> {
    if LOWER_IDENT.is_match(name) {
        Ok(())
    } else {
        Err(Error::InvalidIdentifier(name.to_string()))
    }
}

/// Double-quotes a validated identifier, part by part.
pub fn quote_ident(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{part}\""))
        .collect::<Vec<_>>()
        .join(".")
}

/// The highest positional placeholder referenced by the statement.
pub fn max_placeholder(sql: &str) -> usize {
    PLACEHOLDER
        .captures_iter(sql)
        .filter_map(|captures| captures[1].parse().ok())
        .max()
        .unwrap_or(0)
}

/// Rejects statements that reference more placeholders than there are
/// arguments. Run on every assembled statement before execution.
pub fn check_placeholders(sql: &str, supplied: usize) -> Result<(), Error> {
    let placeholder = max_placeholder(sql);
    if placeholder > supplied {
        return Err(Error::PlaceholderOutOfRange {
            placeholder,
            supplied,
        });
    }
    Ok(())
}

/// The first forbidden marker contained in the text, if any.
pub fn find_forbidden_marker(text: &str) -> Option<&'static str> {
    FORBIDDEN_MARKERS
        .iter()
        .find(|marker| text.contains(*marker))
        .copied()
}

/// Vets a free-form WHERE fragment: it must be parameterized (at least one
/// placeholder), and must not smuggle in separators, comments or string
/// literals.
pub fn check_where(where_sql: &str) -> Result<(), Error> {
    if let Some(marker) = find_forbidden_marker(where_sql) {
        return Err(Error::UnsafeWhere(marker));
    }
    if where_sql.contains('\'') {
        return Err(Error::UnsafeWhere("string literal"));
    }
    if max_placeholder(where_sql) == 0 {
        return Err(Error::UnsafeWhere("no positional placeholder"));
    }
    Ok(())
}

/// Shifts every `$k` in the fragment to `$(k + shift)`, so a WHERE written
/// against `$1..` can follow a SET list that already consumed `shift`
/// placeholders.
pub fn rebase_placeholders(where_sql: &str, shift: usize) -> String {
    PLACEHOLDER
        .replace_all(where_sql, |captures: &regex::Captures| {
            let index: usize = captures[1].parse().unwrap_or(0);
            format!("${}", index + shift)
        })
        .into_owned()
}

/// `INSERT INTO "t" ("a", "b") VALUES ($1, $2) RETURNING *` for validated
/// identifiers.
pub fn build_insert(table: &str, columns: &[&str]) -> Result<String, Error> {
    validate_ident(table)?;
    for column in columns {
        validate_ident(column)?;
    }
    let column_list = columns
        .iter()
        .map(|column| quote_ident(column))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = (1..=columns.len())
        .map(|index| format!("${index}"))
        .collect::<Vec<_>>()
        .join(", ");
    Ok(format!(
        "INSERT INTO {} ({column_list}) VALUES ({placeholders}) RETURNING *",
        quote_ident(table)
    ))
}

/// `UPDATE "t" SET "a" = $1, ... WHERE <rebased> RETURNING *`. The WHERE is
/// vetted by [`check_where`] and its placeholders are rebased past the SET
/// columns.
pub fn build_update(table: &str, columns: &[&str], where_sql: &str) -> Result<String, Error> {
    validate_ident(table)?;
    for column in columns {
        validate_ident(column)?;
    }
    check_where(where_sql)?;
    let assignments = columns
        .iter()
        .enumerate()
        .map(|(index, column)| format!("{} = ${}", quote_ident(column), index + 1))
        .collect::<Vec<_>>()
        .join(", ");
    let where_sql = rebase_placeholders(where_sql, columns.len());
    Ok(format!(
        "UPDATE {} SET {assignments} WHERE {where_sql} RETURNING *",
        quote_ident(table)
    ))
}
