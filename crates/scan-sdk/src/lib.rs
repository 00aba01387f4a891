// SPDX-License-Identifier: MIT OR Apache-2.0
//! The cloud SDK collaborator contract.
//!
//! The scheduler never talks to a real provider SDK directly — it talks to
//! a [`Request`] (produces a [`Paginator`] for a concrete input) and pages
//! through it until exhaustion or a terminal [`SdkErrorInfo`]. Transport,
//! retry, and wire-format concerns live entirely on the other side of this
//! boundary; the [`mock`] module provides a scriptable stand-in used by
//! every test in the workspace.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;

/// Decoded error surfaced by the SDK collaborator after its own retry
/// layer has given up. Mirrors a typical cloud SDK's error interface:
/// status, provider code, message, upstream request id, and an optional
/// chained cause.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code} ({status}): {message}")]
pub struct SdkErrorInfo {
    /// HTTP status code, or 0 if the transport never reached the wire.
    pub status: u16,
    /// Provider-specific error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Upstream request id, when the transport captured one.
    pub request_id: Option<String>,
    /// Underlying cause, when the transport wrapped an inner error.
    #[source]
    pub cause: Option<Box<SdkErrorInfo>>,
}

impl SdkErrorInfo {
    /// Build a minimal error with no request id or cause.
    pub fn new(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            request_id: None,
            cause: None,
        }
    }

    /// Attach an upstream request id.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Chain an underlying cause.
    #[must_use]
    pub fn with_cause(mut self, cause: SdkErrorInfo) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}

/// Declares which fields of a shape are paginator bookkeeping rather than
/// resource data, so the compactor can strip them without inspecting the
/// SDK's generated types directly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaginatorMeta {
    /// Name of the input field carrying the continuation token.
    pub input_token_field: Option<&'static str>,
    /// Name of the output field carrying the next continuation token.
    pub output_token_field: Option<&'static str>,
    /// Name of the input field carrying a page-size limit.
    pub limit_field: Option<&'static str>,
    /// Name of the output field signalling truncation (e.g. `IsTruncated`).
    pub truncation_field: Option<&'static str>,
}

/// One page of a paginated response.
#[async_trait]
pub trait Paginator: Send {
    /// Fetch the next page. `Ok(None)` signals exhaustion.
    async fn next_page(&mut self) -> Result<Option<serde_json::Value>, SdkErrorInfo>;
}

/// The request constructor a [`scan-registry`](../scan_registry/index.html)
/// link resolves for its API name. Synchronous: building a [`Paginator`]
/// should not itself perform I/O, only capture the concrete input.
pub trait Request: Send + Sync {
    /// Begin a paginated request for the given concrete input.
    fn paginate(&self, input: serde_json::Value) -> Box<dyn Paginator>;

    /// Paginator metadata for this API's output shape, used by the
    /// compactor to drop bookkeeping fields. Defaults to "no pagination".
    fn paginator_meta(&self) -> PaginatorMeta {
        PaginatorMeta::default()
    }
}

/// In-memory mock SDK used throughout the test suite.
pub mod mock {
    use super::{Paginator, PaginatorMeta, Request, SdkErrorInfo};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Arc;

    /// One scripted page: either a successful output value or a terminal
    /// error that ends pagination.
    #[derive(Debug, Clone)]
    pub enum PageResult {
        /// A successful page of output.
        Page(serde_json::Value),
        /// A terminal error; no further pages follow.
        Err(SdkErrorInfo),
    }

    /// A [`Request`] whose pages are produced by a closure over the
    /// concrete input, letting a test script different output per input
    /// (e.g. different policies per IAM user).
    #[derive(Clone)]
    pub struct ScriptedRequest {
        script: Arc<dyn Fn(&serde_json::Value) -> Vec<PageResult> + Send + Sync>,
        meta: PaginatorMeta,
    }

    impl ScriptedRequest {
        /// Build a scripted request from a closure mapping concrete input
        /// to an ordered list of pages.
        pub fn new(script: impl Fn(&serde_json::Value) -> Vec<PageResult> + Send + Sync + 'static) -> Self {
            Self {
                script: Arc::new(script),
                meta: PaginatorMeta::default(),
            }
        }

        /// Attach paginator metadata, for compaction tests.
        #[must_use]
        pub fn with_paginator_meta(mut self, meta: PaginatorMeta) -> Self {
            self.meta = meta;
            self
        }
    }

    impl Request for ScriptedRequest {
        fn paginate(&self, input: serde_json::Value) -> Box<dyn Paginator> {
            Box::new(ScriptedPager {
                pages: (self.script)(&input).into(),
            })
        }

        fn paginator_meta(&self) -> PaginatorMeta {
            self.meta.clone()
        }
    }

    struct ScriptedPager {
        pages: VecDeque<PageResult>,
    }

    #[async_trait]
    impl Paginator for ScriptedPager {
        async fn next_page(&mut self) -> Result<Option<serde_json::Value>, SdkErrorInfo> {
            match self.pages.pop_front() {
                None => Ok(None),
                Some(PageResult::Page(v)) => Ok(Some(v)),
                Some(PageResult::Err(e)) => Err(e),
            }
        }
    }

}
