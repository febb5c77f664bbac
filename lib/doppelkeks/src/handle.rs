use crate::{
    Token, TokenRef, Username, UsernameRef,
    token::{self, SecretKey},
};
use std::{sync::Mutex, time::SystemTime};
use triomphe::Arc;

pub(crate) struct Shared {
    outbound: Option<Token>,
    set_cookie: bool,
}

struct HandleCtx {
    key: Arc<SecretKey>,
    username: Option<Username>,
    cookie_token: Option<Token>,
}

/// Request-scoped view of the filter, inserted into the request extensions
///
/// Handlers and template glue can ask it for the token that will be stamped
/// into the response; every caller within one request sees the same value.
#[derive(Clone)]
pub struct CsrfHandle {
    ctx: Arc<HandleCtx>,
    shared: Arc<Mutex<Shared>>,
}

impl CsrfHandle {
    pub(crate) fn new(
        key: Arc<SecretKey>,
        username: Option<Username>,
        cookie_token: Option<Token>,
    ) -> Self {
        Self {
            ctx: Arc::new(HandleCtx {
                key,
                username,
                cookie_token,
            }),
            shared: Arc::new(Mutex::new(Shared {
                outbound: None,
                set_cookie: false,
            })),
        }
    }

    #[inline]
    pub(crate) fn key(&self) -> &SecretKey {
        &self.ctx.key
    }

    /// The authenticated principal, if any
    #[inline]
    #[must_use]
    pub fn username(&self) -> Option<&UsernameRef> {
        self.ctx.username.as_deref()
    }

    /// The token the browser presented in its cookie
    #[inline]
    pub(crate) fn server_token(&self) -> Option<&TokenRef> {
        self.ctx.cookie_token.as_deref()
    }

    /// The token to stamp into this response
    ///
    /// Memoized for the lifetime of the request, so a page assembled from
    /// several fragments carries one consistent value: first the token
    /// already chosen for this request, then a still-fresh cookie token,
    /// then a fresh mint (which also schedules the cookie write).
    ///
    /// `None` when the requester is not signed in.
    #[must_use]
    pub fn response_token(&self) -> Option<Token> {
        let username = self.ctx.username.as_ref()?;

        let mut shared = self.shared.lock().unwrap();
        if let Some(ref outbound) = shared.outbound {
            debug!("reusing response token minted earlier in this request");
            return Some(outbound.clone());
        }

        let now = SystemTime::now();
        if let Some(ref cookie_token) = self.ctx.cookie_token {
            if token::validate(cookie_token, &self.ctx.key, username, now)
                && !token::is_soft_expired(cookie_token, now)
            {
                debug!("reusing fresh token from the request cookie");
                shared.outbound = Some(cookie_token.clone());
                return Some(cookie_token.clone());
            }
        }

        debug!("no fresh token on this request; minting a new cookie token");
        let minted = token::mint(username, &self.ctx.key, now);
        shared.outbound = Some(minted.clone());
        shared.set_cookie = true;

        Some(minted)
    }

    /// The token that still needs to be written out as a cookie, if any
    pub(crate) fn pending_cookie(&self) -> Option<Token> {
        let shared = self.shared.lock().unwrap();
        shared.set_cookie.then(|| shared.outbound.clone()).flatten()
    }
}

#[cfg(feature = "axum")]
mod axum_impl {
    use super::CsrfHandle;
    use axum_core::extract::FromRequestParts;
    use http::request::Parts;
    use std::convert::Infallible;

    impl<S> FromRequestParts<S> for CsrfHandle
    where
        S: Sync,
    {
        type Rejection = Infallible;

        async fn from_request_parts(
            parts: &mut Parts,
            _state: &S,
        ) -> Result<Self, Self::Rejection> {
            let handle = parts
                .extensions
                .get::<Self>()
                .expect("Service not wrapped by CSRF middleware")
                .clone();

            Ok(handle)
        }
    }
}
