use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("signing secret must not be empty")]
    EmptySecret,
}

/// Why a request was refused
///
/// Logged server-side only; the client always receives the same generic 403
/// no matter which of these fired.
#[derive(Clone, Copy, Debug, Error)]
pub(crate) enum Rejection {
    #[error("CSRF token is blank")]
    MissingServerToken,

    #[error("missing CSRF token in form submission")]
    MissingClientToken,

    #[error("more than one CSRF token in form submission")]
    DuplicateClientToken,

    #[error("invalid token format")]
    MalformedClientToken,

    #[error("could not match session token with form token")]
    TokenMismatch,
}
