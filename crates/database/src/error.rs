/// Failures of the gateway layer. Everything coming back from the driver is
/// funneled through [`Error::classify`] so callers can tell transport
/// problems apart from bad SQL and plain query failures; the remaining
/// variants are produced before any SQL reaches the server.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid identifier `{0}`")]
    InvalidIdentifier(String),
    #[error("table `{0}` is not registered for gateway writes")]
    UnknownTable(String),
    #[error("column `{column}` is not registered for table `{table}`")]
    UnknownColumn { table: String, column: String },
    #[error("value cannot be bound as a query parameter: {0}")]
    UnsupportedValue(&'static str),
    #[error("unsafe where clause: {0}")]
    UnsafeWhere(&'static str),
    #[error("clause `{0}` is not part of the filter grammar")]
    DisallowedClause(String),
    #[error("statement references ${placeholder} but only {supplied} arguments were supplied")]
    PlaceholderOutOfRange { placeholder: usize, supplied: usize },
    #[error("database connection error")]
    Connection(#[source] sqlx::Error),
    #[error("sql syntax error")]
    Syntax(#[source] sqlx::Error),
    #[error("query failed")]
    Query(#[source] sqlx::Error),
}

impl Error {
    /// Sorts a driver error into the connection/syntax/query taxonomy.
    /// SQLSTATE class 08 (connection exception) counts as a connection
    /// failure even though it arrives as a database error.
    pub fn classify(err: sqlx::Error) -> Self {
        enum Kind {
            Connection,
            Syntax,
            Query,
        }
        let kind = match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Configuration(_) => Kind::Connection,
            sqlx::Error::Database(db) => match db.code().as_deref() {
                Some(code) if code.starts_with("08") => Kind::Connection,
                Some(code) if code.starts_with("42") => Kind::Syntax,
                _ => Kind::Query,
            },
            _ => Kind::Query,
        };
        match kind {
            Kind::Connection => Self::Connection(err),
            Kind::Syntax => Self::Syntax(err),
            Kind::Query => Self::Query(err),
        }
    }

    /// The SQLSTATE of the underlying database error, if there is one.
    pub fn sqlstate(&self) -> Option<String> {
        let source = match self {
            Self::Connection(err) | Self::Syntax(err) | Self::Query(err) => err,
            _ => return None,
        };
        match source {
            sqlx::Error::Database(db) => db.code().map(|code| code.into_owned()),
            _ => None,
        }
    }

    /// Whether the retry envelope may re-run the statement. Connection
    /// failures and serialization/deadlock aborts qualify, syntax errors
    /// never do.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(_) => true,
            Self::Query(_) => matches!(self.sqlstate().as_deref(), Some("40001") | Some("40P01")),
            _ => false,
        }
    }

    /// Short label for the error ring and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidIdentifier(_) => "invalid_identifier",
            Self::UnknownTable(_) => "unknown_table",
            Self::UnknownColumn { .. } => "unknown_column",
            Self::UnsupportedValue(_) => "unsupported_value",
            Self::UnsafeWhere(_) => "unsafe_where",
            Self::DisallowedClause(_) => "disallowed_clause",
            Self::PlaceholderOutOfRange { .. } => "placeholder_out_of_range",
            Self::Connection(_) => "connection",
            Self::Syntax(_) => "syntax",
            Self::Query(_) => "query",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_transport_errors_as_connection() {
        let err = Error::classify(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, Error::Connection(_)));
        assert!(err.is_retryable());

        let err = Error::classify(sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        )));
        assert!(matches!(err, Error::Connection(_)));
    }

    #[test]
    fn classifies_unknown_errors_as_query() {
        let err = Error::classify(sqlx::Error::RowNotFound);
        assert!(matches!(err, Error::Query(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn local_errors_have_no_sqlstate() {
        assert_eq!(Error::InvalidIdentifier("x".into()).sqlstate(), None);
        assert!(!Error::UnsafeWhere("marker").is_retryable());
    }
}
