//! The transaction registry core: a library that enforces the registry's
//! data contract against an untrusted input surface and mediates all traffic
//! to the SQL store. The HTTP surface, the audit log router and the alerting
//! sink live elsewhere and plug in through the [`audit::AuditSink`] and
//! [`report::ErrorSink`] traits.

pub mod audit;
pub mod config;
pub mod dates;
pub mod error;
pub mod ops;
pub mod report;
pub mod sanitize;
pub mod shape;

pub use {
    config::Config,
    error::Error,
    ops::{Page, QueryResult, Registry},
};
