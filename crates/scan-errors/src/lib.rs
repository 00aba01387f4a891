// SPDX-License-Identifier: MIT OR Apache-2.0
//! The four-kind error taxonomy and decoding from the SDK error
//! contract into [`scan_core::CallErr`].
//!
//! Every [`ScanCode`] belongs to exactly one [`ScanErrorKind`] and carries
//! a stable `SCAN-X###` string tag, drawn from a single unified error-code
//! catalog: fatal configuration errors abort a scan
//! before any network activity, service-recoverable and transport errors
//! are retained on the call and only affect exit status, and internal
//! assertions indicate a bug in the registry or scheduler.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use scan_core::CallErr;
use scan_sdk::SdkErrorInfo;
use std::collections::BTreeMap;
use std::fmt;

/// Broad family a [`ScanCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanErrorKind {
    /// Invalid configuration, detected before any network activity.
    Config,
    /// A per-call provider error, recoverable at the scan level.
    Service,
    /// A transport-level failure surfaced after retries were exhausted.
    Transport,
    /// An assertion that should be unreachable if the registry validated.
    Internal,
}

impl fmt::Display for ScanErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Config => "config",
            Self::Service => "service",
            Self::Transport => "transport",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Machine-readable, stable error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanCode {
    // -- Config (SCAN-C###) --
    /// A requested region is not recognized or not supported by a service.
    InvalidRegion,
    /// A requested service name is not registered.
    UnknownService,
    /// Registry compilation found a dependency cycle.
    DependencyCycle,
    /// Two links in the same service declared the same output shape.
    ShapeCollision,
    /// A link's declared input shape has no resolvable dependency.
    UnresolvedDependency,
    /// An API has no registered request constructor, or more than one.
    MissingRequestConstructor,

    // -- Service (SCAN-S###) --
    /// A call returned a provider-level error.
    ApiError,

    // -- Transport (SCAN-T###) --
    /// The SDK's retry layer exhausted retries before returning.
    TransportExhausted,

    // -- Internal (SCAN-I###) --
    /// A call produced an output shape the registry did not expect.
    ShapeMismatch,
    /// Two concrete calls in the same context hashed to the same id.
    DuplicateCallId,
    /// A cycle was detected at runtime despite registry validation.
    RuntimeCycle,
}

impl ScanCode {
    /// Returns the broad [`ScanErrorKind`] this code belongs to.
    #[must_use]
    pub fn kind(&self) -> ScanErrorKind {
        match self {
            Self::InvalidRegion
            | Self::UnknownService
            | Self::DependencyCycle
            | Self::ShapeCollision
            | Self::UnresolvedDependency => ScanErrorKind::Config,

            Self::ApiError => ScanErrorKind::Service,

            Self::TransportExhausted => ScanErrorKind::Transport,

            Self::ShapeMismatch | Self::DuplicateCallId | Self::RuntimeCycle => {
                ScanErrorKind::Internal
            }
        }
    }

    /// Stable `&'static str` tag, e.g. `"SCAN-C001"`.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRegion => "SCAN-C001",
            Self::UnknownService => "SCAN-C002",
            Self::DependencyCycle => "SCAN-C003",
            Self::ShapeCollision => "SCAN-C004",
            Self::UnresolvedDependency => "SCAN-C005",
            Self::ApiError => "SCAN-S001",
            Self::TransportExhausted => "SCAN-T001",
            Self::ShapeMismatch => "SCAN-I001",
            Self::DuplicateCallId => "SCAN-I002",
            Self::RuntimeCycle => "SCAN-I003",
        }
    }
}

impl fmt::Display for ScanCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified scan error: stable code, message, optional cause, and
/// arbitrary structured context for diagnostics.
pub struct ScanError {
    /// Machine-readable error code.
    pub code: ScanCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl ScanError {
    /// Create a new error with the given code and message.
    pub fn new(code: ScanCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value diagnostic.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl serde::Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.kind()`.
    #[must_use]
    pub fn kind(&self) -> ScanErrorKind {
        self.code.kind()
    }

    /// `true` for the two kinds the scan continues past (service,
    /// transport); `false` for config (fatal) and internal (assertion).
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self.kind(), ScanErrorKind::Service | ScanErrorKind::Transport)
    }
}

impl fmt::Debug for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("ScanError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for ScanError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_deref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Decode an [`SdkErrorInfo`] into the [`CallErr`] record attached to a
/// call. `ignore` is left unset; a service adapter's `handle_error` hook
/// decides afterward whether the error is benign.
#[must_use]
pub fn decode_sdk_error(err: &SdkErrorInfo) -> CallErr {
    CallErr {
        status: err.status,
        code: err.code.clone(),
        message: err.message.clone(),
        request_id: err.request_id.clone(),
        ignore: false,
        cause: err.cause.as_deref().map(|c| Box::new(decode_sdk_error(c))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_CODES: &[ScanCode] = &[
        ScanCode::InvalidRegion,
        ScanCode::UnknownService,
        ScanCode::DependencyCycle,
        ScanCode::ShapeCollision,
        ScanCode::UnresolvedDependency,
        ScanCode::ApiError,
        ScanCode::TransportExhausted,
        ScanCode::ShapeMismatch,
        ScanCode::DuplicateCallId,
        ScanCode::RuntimeCycle,
    ];

    #[test]
    fn config_codes_are_fatal_and_not_recoverable() {
        let e = ScanError::new(ScanCode::DependencyCycle, "cycle: B, C, D");
        assert_eq!(e.kind(), ScanErrorKind::Config);
        assert!(!e.is_recoverable());
    }

    #[test]
    fn service_and_transport_codes_are_recoverable() {
        assert!(ScanError::new(ScanCode::ApiError, "denied").is_recoverable());
        assert!(ScanError::new(ScanCode::TransportExhausted, "timeout").is_recoverable());
    }

    #[test]
    fn internal_codes_are_not_recoverable() {
        assert!(!ScanError::new(ScanCode::DuplicateCallId, "dup").is_recoverable());
    }

    #[test]
    fn all_codes_have_unique_tags() {
        let mut seen = std::collections::HashSet::new();
        for code in ALL_CODES {
            assert!(seen.insert(code.as_str()), "duplicate: {}", code.as_str());
        }
        assert_eq!(seen.len(), ALL_CODES.len());
    }

    #[test]
    fn display_includes_code_tag() {
        let e = ScanError::new(ScanCode::UnknownService, "no such service 'foo'");
        assert_eq!(e.to_string(), "[SCAN-C002] no such service 'foo'");
    }

    #[test]
    fn with_context_and_source_chain() {
        let e = ScanError::new(ScanCode::ApiError, "boom")
            .with_context("api", "ListUsers")
            .with_source(std::io::Error::other("io broke"));
        assert_eq!(e.context["api"], serde_json::json!("ListUsers"));
        assert!(std::error::Error::source(&e).is_some());
    }

    #[test]
    fn decode_sdk_error_preserves_fields() {
        let sdk_err = SdkErrorInfo::new(403, "AccessDenied", "nope").with_request_id("req-1");
        let decoded = decode_sdk_error(&sdk_err);
        assert_eq!(decoded.status, 403);
        assert_eq!(decoded.code, "AccessDenied");
        assert_eq!(decoded.request_id.as_deref(), Some("req-1"));
        assert!(!decoded.ignore);
    }

    #[test]
    fn decode_sdk_error_preserves_cause_chain() {
        let inner = SdkErrorInfo::new(500, "InternalError", "backend down");
        let outer = SdkErrorInfo::new(503, "ServiceUnavailable", "retry later").with_cause(inner);
        let decoded = decode_sdk_error(&outer);
        let cause = decoded.cause.expect("cause should be preserved");
        assert_eq!(cause.code, "InternalError");
    }
}
