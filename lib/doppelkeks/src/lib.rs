#![doc = include_str!("../README.md")]

#[macro_use]
extern crate tracing;

pub use self::{
    error::Error, future::FilterFuture, handle::CsrfHandle, layer::CsrfLayer, newtypes::*,
    service::CsrfService,
};

pub mod token;

mod error;
mod extract;
mod future;
mod handle;
mod layer;
mod service;

use bytes::Bytes;
use http_body_util::{Either, Full};

/// Name shared by the token cookie, the hidden form field, and the query
/// parameter on confirmation links
pub const TOKEN_FIELD_NAME: &str = "token";

/// The one message every rejected request gets to see
const REJECTION_BODY: &str = "Your form submission could not be validated";

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Body type handed to the wrapped service and returned by the filter
///
/// Requests and responses the filter had to buffer come out as `Left`;
/// everything it did not touch streams through as `Right`.
pub type FilterBody<B> = Either<Full<Bytes>, B>;

mod newtypes {
    /// A signed anti-CSRF token, `<hex-digest>!<timestamp>/<nonce>/<username>`
    #[aliri_braid::braid]
    pub struct Token;

    /// The authenticated principal's name
    ///
    /// The host's authentication layer inserts this into the request
    /// extensions before the filter runs; its absence means the requester is
    /// not signed in.
    #[aliri_braid::braid]
    pub struct Username;
}
