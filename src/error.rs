//! The crate-wide error taxonomy and `Result` alias.
//!
//! Every public operation in this crate returns [`Result<T>`]. There are no
//! panics on caller-supplied-but-invalid input (out-of-range unit/team ids,
//! unbound segments, malformed locality tags) -- those surface as `Err`. The
//! runtime performs no retries; a transport failure is always propagated,
//! never logged and swallowed.

use thiserror::Error;

/// The crate-wide result alias. `Ok(())`/`Ok(T)` stands for the wire-level
/// `OK` return code; the [`Error`] variants cover `ERR_INVAL`, `ERR_NOTFOUND`,
/// and `ERR_OTHER`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the runtime.
///
/// Maps onto the four externally observable return codes: `ERR_INVAL`
/// ([`Error::Invalid`]), `ERR_NOTFOUND` ([`Error::NotFound`]), `ERR_OTHER`
/// ([`Error::Transport`]), and handle/resource exhaustion
/// ([`Error::Exhausted`]).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Out-of-range unit, unknown team, an element count that exceeds a
    /// chunking-disallowed limit, a CAS on a non-integral dtype, or an
    /// unbound segment id.
    #[error("invalid argument: {0}")]
    Invalid(String),

    /// A locality tag walked off the end of the tree, or a subset tag named
    /// in `group_subdomains` is not an immediate child of the parent.
    #[error("not found: {0}")]
    NotFound(String),

    /// The underlying transport returned a non-success status from a call
    /// the runtime cannot recover from locally (flush, window sync, a
    /// collective).
    #[error("transport failure: {0}")]
    Transport(String),

    /// Allocation of a handle slot or sub-request failed.
    #[error("resource exhausted: {0}")]
    Exhausted(String),
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }

    pub(crate) fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub(crate) fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub(crate) fn exhausted(msg: impl Into<String>) -> Self {
        Self::Exhausted(msg.into())
    }
}
