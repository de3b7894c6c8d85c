//! The filter compiler. Query predicates arrive as prebuilt clause strings;
//! only the exact shapes below are ever joined into SQL, everything else is
//! rejected before composition.

use {
    crate::{error::Error, sql, transactions},
    const_format::formatcp,
    regex::Regex,
    std::sync::LazyLock,
};

const COUNT_PREFIX: &str = formatcp!(
    "SELECT COUNT(*) AS total FROM {} WHERE ",
    transactions::TABLE
);

const SELECT_PREFIX: &str = formatcp!("SELECT * FROM {} WHERE ", transactions::TABLE);

/// Anchored patterns of every clause the compiler accepts. `$N` is any
/// positional placeholder.
static ALLOWED_CLAUSES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^is_deleted = false$",
        r"^transaction_id = \$\d+$",
        r"^customer_uid = \$\d+$",
        r"^owners @> \$\d+$",
        r"^order_type = \$\d+$",
        r"^status = \$\d+$",
        r"^created_at >= \$\d+$",
        r"^created_at <= \$\d+$",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("valid regex"))
    .collect()
});

pub fn validate_clause(clause: &str) -> Result<(), Error> {
    if sql::find_forbidden_marker(clause).is_some()
        || !ALLOWED_CLAUSES.iter().any(|pattern| pattern.is_match(clause))
    {
        return Err(Error::DisallowedClause(clause.to_string()));
    }
    Ok(())
}

fn joined(clauses: &[String]) -> Result<String, Error> {
    if clauses.is_empty() {
        return Err(Error::UnsafeWhere("no clauses"));
    }
    for clause in clauses {
        validate_clause(clause)?;
    }
    Ok(clauses.join(" AND "))
}

/// `SELECT COUNT(*) AS total ...` over the validated clauses.
pub fn count_sql(clauses: &[String]) -> Result<String, Error> {
    Ok(format!("{COUNT_PREFIX}{}", joined(clauses)?))
}

/// The paginated page query. `base_args` is the number of arguments the
/// clauses already consume; LIMIT and OFFSET take the next two placeholders.
pub fn page_sql(clauses: &[String], base_args: usize) -> Result<String, Error> {
    Ok(format!(
        "{SELECT_PREFIX}{} ORDER BY created_at DESC LIMIT ${} OFFSET ${}",
        joined(clauses)?,
        base_args + 1,
        base_args + 2,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clauses(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn accepts_the_whole_grammar() {
        for clause in [
            "is_deleted = false",
            "transaction_id = $1",
            "customer_uid = $2",
            "owners @> $3",
            "order_type = $4",
            "status = $5",
            "created_at >= $6",
            "created_at <= $17",
        ] {
            assert!(validate_clause(clause).is_ok(), "{clause}");
        }
    }

    #[test]
    fn rejects_everything_else() {
        for clause in [
            "is_deleted = true",
            "transaction_id = 'x'",
            "amount > $1",
            "status = $1 OR 1=1",
            "status = $1; DROP TABLE transactions",
            "status = $1 --",
            "owners <@ $1",
            "",
        ] {
            assert!(validate_clause(clause).is_err(), "{clause}");
        }
    }

    #[test]
    fn composes_count_sql() {
        let sql = count_sql(&clauses(&["is_deleted = false", "status = $1"])).unwrap();
        assert_eq!(
            sql,
            "SELECT COUNT(*) AS total FROM transactions \
             WHERE is_deleted = false AND status = $1"
        );
    }

    #[test]
    fn composes_page_sql_with_trailing_placeholders() {
        let sql = page_sql(
            &clauses(&["is_deleted = false", "customer_uid = $1", "status = $2"]),
            2,
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM transactions WHERE is_deleted = false AND customer_uid = $1 \
             AND status = $2 ORDER BY created_at DESC LIMIT $3 OFFSET $4"
        );
    }

    #[test]
    fn refuses_an_empty_clause_list() {
        assert!(count_sql(&[]).is_err());
        assert!(page_sql(&[], 0).is_err());
    }

    #[test]
    fn composed_sql_carries_no_forbidden_markers() {
        let sql = page_sql(&clauses(&["is_deleted = false", "owners @> $1"]), 1).unwrap();
        assert!(sql::find_forbidden_marker(&sql).is_none());
        assert_eq!(sql::max_placeholder(&sql), 3);
    }
}
