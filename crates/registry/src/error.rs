/// Everything the registry surfaces to callers. Variants name the contract
/// violation, never the offending payload; raw caller data stays out of
/// error messages.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("missing required field `{0}`")]
    MissingRequired(&'static str),
    #[error("invalid value for `{field}`, expected {expected}")]
    InvalidValue {
        field: String,
        expected: &'static str,
    },
    #[error("invalid meta key at `{0}`")]
    InvalidMetaKey(String),
    #[error("invalid owner allocation at index {0}")]
    InvalidAllocation(usize),
    #[error("`{field}` exceeds the {limit} byte ceiling")]
    BlobTooLarge {
        field: &'static str,
        limit: usize,
    },
    #[error("direction is not a recognized transaction kind")]
    InvalidDirection,
    #[error("status must be a non-empty string")]
    InvalidStatus,
    #[error("date range start is after end")]
    InvalidDateRange,
    #[error("field `{0}` cannot be updated")]
    UnknownField(String),
    #[error("transaction `{0}` not found")]
    TransactionNotFound(String),
    #[error(transparent)]
    Store(#[from] database::Error),
}

impl Error {
    pub fn invalid_value(field: impl Into<String>, expected: &'static str) -> Self {
        Self::InvalidValue {
            field: field.into(),
            expected,
        }
    }

    /// Short label for audit/reporter context.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingRequired(_) => "missing_required",
            Self::InvalidValue { .. } => "invalid_value",
            Self::InvalidMetaKey(_) => "invalid_meta_key",
            Self::InvalidAllocation(_) => "invalid_allocation",
            Self::BlobTooLarge { .. } => "blob_too_large",
            Self::InvalidDirection => "invalid_direction",
            Self::InvalidStatus => "invalid_status",
            Self::InvalidDateRange => "invalid_date_range",
            Self::UnknownField(_) => "unknown_field",
            Self::TransactionNotFound(_) => "transaction_not_found",
            Self::Store(err) => err.kind(),
        }
    }
}
