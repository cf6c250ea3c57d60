//! Rule-processing transform service integration.
//!
//! Every normalized envelope is submitted to an external transform
//! service which may rewrite the record or mark it for a silent drop.
//! This module provides:
//! - The [`TransformService`] trait the relay pipeline is written against
//! - The [`TransformOutcome`] returned for each submitted envelope
//! - A TCP client implementation speaking the line-delimited JSON wire
//!   contract of the service

pub mod client;

pub use client::RemoteTransformClient;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Operation type reported to the transform service for every request.
pub const OPERATION_TYPE: &str = "consumer";

/// Operation name identifying this relay's role.
pub const OPERATION_NAME: &str = "logstash-process";

/// Component identifier reported to the transform service.
pub const COMPONENT_NAME: &str = "Logstash";

/// Metadata key the transform service sets to request a silent drop.
pub const DROP_METADATA_KEY: &str = "log_drop";

/// Outcome of submitting one envelope to the transform service.
///
/// A transform failure is not an outcome: it surfaces as a
/// [`crate::error::RelayError::Transform`] and the caller decides how to
/// proceed (the connection handler logs it and moves to the next line).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformOutcome {
    /// Forward this payload downstream. It may differ from the submitted
    /// envelope, the service is allowed to rewrite records.
    Forward(Bytes),

    /// Discard this record without forwarding. Not an error.
    Drop,
}

/// Interface to the rule-processing transform service.
///
/// Implementations perform exactly one request per invocation and never
/// retry failures internally.
#[async_trait]
pub trait TransformService: Send + Sync {
    /// Submit one envelope. The envelope is guaranteed to be valid JSON.
    async fn transform(&self, envelope: Bytes) -> Result<TransformOutcome>;
}

/// Interpret a metadata value as a drop request.
///
/// "true", "1" and "yes" count, case-insensitively. Anything else,
/// including an absent key, means forward.
#[must_use]
pub(crate) fn is_true_like(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "true" | "1" | "yes"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_true_like_values() {
        assert!(is_true_like("true"));
        assert!(is_true_like("TRUE"));
        assert!(is_true_like("True"));
        assert!(is_true_like("1"));
        assert!(is_true_like("yes"));
        assert!(is_true_like("YES"));
    }

    #[test]
    fn test_false_like_values() {
        assert!(!is_true_like("false"));
        assert!(!is_true_like("0"));
        assert!(!is_true_like("no"));
        assert!(!is_true_like(""));
        assert!(!is_true_like("truthy"));
    }
}
