use crate::{
    BoxError, CsrfHandle, FilterBody, TOKEN_FIELD_NAME, Token, Username, future::FilterFuture,
    token::SecretKey,
};
use bytes::{Bytes, BytesMut};
use cookie::Cookie;
use http::{Method, Request, Response, header};
use http_body::Body;
use http_body_util::Either;
use regex::Regex;
use std::{
    sync::LazyLock,
    task::{self, Poll},
};
use tower::Service;
use triomphe::Arc;

static API_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/api\b").expect("[Bug] Failed to compile API path regex"));

#[derive(Clone)]
pub struct CsrfService<S> {
    inner: S,
    key: Arc<SecretKey>,
}

impl<S> CsrfService<S> {
    pub(crate) fn new(inner: S, key: Arc<SecretKey>) -> Self {
        Self { inner, key }
    }
}

#[inline]
fn is_safe_method(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

fn cookie_token<B>(req: &Request<B>) -> Option<Token> {
    let mut token = None;

    'outer: for header in req.headers().get_all(header::COOKIE) {
        let Ok(value_str) = header.to_str() else {
            continue;
        };

        for cookie in Cookie::split_parse_encoded(value_str) {
            let Ok(cookie) = cookie else {
                continue;
            };

            if cookie.name() == TOKEN_FIELD_NAME {
                let value = cookie.value_trimmed();
                if !value.is_empty() {
                    token = Some(Token::from(value));
                }

                break 'outer;
            }
        }
    }

    token
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for CsrfService<S>
where
    S: Service<Request<FilterBody<ReqBody>>, Response = Response<ResBody>> + Clone,
    S::Error: Into<BoxError>,
    ReqBody: Body<Data = Bytes>,
    ReqBody::Error: Into<BoxError>,
    ResBody: Body<Data = Bytes>,
    ResBody::Error: Into<BoxError>,
{
    type Error = BoxError;
    type Future = FilterFuture<S, S::Future, ReqBody, ResBody>;
    type Response = Response<FilterBody<ResBody>>;

    fn poll_ready(&mut self, cx: &mut task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let username = req.extensions().get::<Username>().cloned();
        let handle = CsrfHandle::new(Arc::clone(&self.key), username, cookie_token(&req));
        req.extensions_mut().insert(handle.clone());

        let exempt = handle.username().is_none()
            || API_PATH.is_match(req.uri().path())
            || is_safe_method(req.method());
        if exempt {
            return FilterFuture::Handler {
                fut: self.inner.call(req.map(Either::Right)),
                handle,
            };
        }

        // hand the driven-to-readiness instance to the future, keep the clone
        let clone = self.inner.clone();
        let service = std::mem::replace(&mut self.inner, clone);

        let (parts, body) = req.into_parts();
        FilterFuture::VerifyRequest {
            body,
            parts: Some(parts),
            buf: BytesMut::new(),
            service: Some(service),
            handle,
        }
    }
}
