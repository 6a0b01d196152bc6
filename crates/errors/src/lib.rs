use std::borrow::Cow;

/// ErrorMetadata can be attached to an anyhow error chain via
/// `.context(e /* ErrorMetadata */)`. It tags errors with a classification
/// that callers use to decide whether to swallow, retry or surface them.
///
/// The msg is the human readable description of what went wrong.
///
/// The short_msg is used as a stable tag - usable in tests for string
/// matching and in log/metric labels - that is resilient to changes in copy.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
#[error("{msg}")]
pub struct ErrorMetadata {
    /// The error code associated with this ErrorMetadata
    pub code: ErrorCode,
    /// Short ScreamingCamelCase tag, e.g. MalformedEnvelope
    pub short_msg: Cow<'static, str>,
    /// Longer, descriptive, developer facing message
    pub msg: Cow<'static, str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Malformed input: bad query strings, invalid index names, broken
    /// update envelopes.
    BadRequest,
    /// Missing or invalid update token.
    Unauthenticated,
    /// A referenced index or document does not exist.
    NotFound,
    /// The target of a create or clone already exists.
    AlreadyExists,
    /// Another job holds the per-dataset indexing lock.
    Busy,
    /// The search backend could not be reached after exhausting retries.
    Unavailable,
    /// Invariant violation on our side, e.g. a rebuilt index with no
    /// documents.
    Internal,
}

const INTERNAL_ERROR: &str = "InternalError";
const INTERNAL_ERROR_MSG: &str = "An internal error occurred";

impl ErrorMetadata {
    /// Malformed input. The short_msg should be ScreamingCamelCase (e.g.
    /// UnknownOperation), the msg a descriptive message for the developer.
    pub fn bad_request(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::BadRequest,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    /// Missing or bad credential on a gated operation.
    pub fn unauthenticated(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::Unauthenticated,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    /// Resource missing. Swallowed by idempotent deletes, surfaced
    /// elsewhere.
    pub fn not_found(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::NotFound,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    /// Resource already present. Swallowed by idempotent creates, surfaced
    /// by clone.
    pub fn already_exists(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::AlreadyExists,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    /// A mutually exclusive job is already running.
    pub fn busy(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::Busy,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    /// The backend is unreachable or unhealthy. Fatal to the current
    /// operation; callers may retry at a higher level.
    pub fn unavailable(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::Unavailable,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    /// Invariant violation that is not the caller's fault.
    pub fn internal(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::Internal,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    pub fn is_bad_request(&self) -> bool {
        self.code == ErrorCode::BadRequest
    }

    pub fn is_unauthenticated(&self) -> bool {
        self.code == ErrorCode::Unauthenticated
    }

    pub fn is_not_found(&self) -> bool {
        self.code == ErrorCode::NotFound
    }

    pub fn is_already_exists(&self) -> bool {
        self.code == ErrorCode::AlreadyExists
    }

    pub fn is_busy(&self) -> bool {
        self.code == ErrorCode::Busy
    }

    pub fn is_unavailable(&self) -> bool {
        self.code == ErrorCode::Unavailable
    }

    /// True if the error is deterministically caused by the caller's input
    /// and retrying the identical request cannot succeed.
    pub fn is_deterministic_user_error(&self) -> bool {
        match self.code {
            ErrorCode::BadRequest | ErrorCode::Unauthenticated | ErrorCode::NotFound => true,
            ErrorCode::AlreadyExists
            | ErrorCode::Busy
            | ErrorCode::Unavailable
            | ErrorCode::Internal => false,
        }
    }
}

/// Classification helpers on `anyhow::Error` for chains that may carry an
/// [`ErrorMetadata`]. Untagged errors classify as internal.
pub trait ErrorMetadataAnyhowExt {
    fn is_bad_request(&self) -> bool;
    fn is_unauthenticated(&self) -> bool;
    fn is_not_found(&self) -> bool;
    fn is_already_exists(&self) -> bool;
    fn is_busy(&self) -> bool;
    fn is_unavailable(&self) -> bool;
    fn is_deterministic_user_error(&self) -> bool;
    fn short_msg(&self) -> &str;
    fn msg(&self) -> &str;
    fn map_error_metadata<F: FnOnce(ErrorMetadata) -> ErrorMetadata>(self, f: F) -> Self;
}

impl ErrorMetadataAnyhowExt for anyhow::Error {
    fn is_bad_request(&self) -> bool {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return e.is_bad_request();
        }
        false
    }

    fn is_unauthenticated(&self) -> bool {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return e.is_unauthenticated();
        }
        false
    }

    fn is_not_found(&self) -> bool {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return e.is_not_found();
        }
        false
    }

    fn is_already_exists(&self) -> bool {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return e.is_already_exists();
        }
        false
    }

    fn is_busy(&self) -> bool {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return e.is_busy();
        }
        false
    }

    fn is_unavailable(&self) -> bool {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return e.is_unavailable();
        }
        false
    }

    fn is_deterministic_user_error(&self) -> bool {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return e.is_deterministic_user_error();
        }
        false
    }

    /// Return the short_msg associated with this error
    fn short_msg(&self) -> &str {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return &e.short_msg;
        }
        INTERNAL_ERROR
    }

    /// Return the descriptive msg associated with this error
    fn msg(&self) -> &str {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return &e.msg;
        }
        INTERNAL_ERROR_MSG
    }

    /// If there's an ErrorMetadata attached, replace it in-place, keeping
    /// the rest of the chain.
    fn map_error_metadata<F: FnOnce(ErrorMetadata) -> ErrorMetadata>(self, f: F) -> Self {
        match self.downcast::<ErrorMetadata>() {
            Ok(e) => f(e).into(),
            Err(other) => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use crate::{
        ErrorMetadata,
        ErrorMetadataAnyhowExt,
    };

    fn transport_failure() -> anyhow::Result<()> {
        anyhow::bail!("connection reset by peer")
    }

    #[test]
    fn test_classification_through_chain() {
        let err = transport_failure()
            .context(ErrorMetadata::unavailable(
                "BackendUnavailable",
                "Search backend did not become healthy",
            ))
            .unwrap_err();
        assert!(err.is_unavailable());
        assert!(!err.is_not_found());
        assert_eq!(err.short_msg(), "BackendUnavailable");
    }

    #[test]
    fn test_untagged_is_internal() {
        let err = transport_failure().unwrap_err();
        assert!(!err.is_unavailable());
        assert!(!err.is_deterministic_user_error());
        assert_eq!(err.short_msg(), "InternalError");
    }

    #[test]
    fn test_map_error_metadata() {
        let err = anyhow::Error::new(ErrorMetadata::not_found("IndexNotFound", "no such index"));
        let err = err.map_error_metadata(|e| ErrorMetadata::bad_request(e.short_msg, e.msg));
        assert!(err.is_bad_request());
        assert_eq!(err.short_msg(), "IndexNotFound");
    }
}
