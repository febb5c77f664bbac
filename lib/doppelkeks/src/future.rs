use crate::{
    BoxError, CsrfHandle, FilterBody, REJECTION_BODY, TOKEN_FIELD_NAME, error::Rejection, extract,
};
use bytes::{BufMut, Bytes, BytesMut};
use cookie::{Cookie, Expiration};
use http::{HeaderMap, HeaderValue, Request, Response, StatusCode, header, request, response};
use http_body::Body;
use http_body_util::{Either, Full};
use pin_project_lite::pin_project;
use std::{
    future::Future,
    pin::Pin,
    sync::LazyLock,
    task::{self, Poll, ready},
};
use stempel::Injector;
use tower::Service;

static INJECTOR: LazyLock<Injector> = LazyLock::new(|| {
    Injector::new(TOKEN_FIELD_NAME, "confirm-action")
        .expect("[Bug] Failed to compile the injection selectors")
});

pin_project! {
    #[project = FilterFutureProj]
    pub enum FilterFuture<S, Fut, ReqBody, ResBody> {
        VerifyRequest {
            #[pin]
            body: ReqBody,
            parts: Option<request::Parts>,
            buf: BytesMut,
            service: Option<S>,
            handle: CsrfHandle,
        },
        Handler {
            #[pin]
            fut: Fut,
            handle: CsrfHandle,
        },
        RewriteResponse {
            #[pin]
            body: ResBody,
            parts: Option<response::Parts>,
            buf: BytesMut,
            handle: CsrfHandle,
        },
        Finish {
            resp: Option<Response<FilterBody<ResBody>>>,
        },
    }
}

fn is_html(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim_start().starts_with("text/html"))
}

fn reject<ResBody>(rejection: Rejection) -> Response<FilterBody<ResBody>> {
    error!(%rejection, "rejecting state-changing request");

    Response::builder()
        .status(StatusCode::FORBIDDEN)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Either::Left(Full::from(REJECTION_BODY)))
        .unwrap()
}

/// Stamp the response token into the rendered page
///
/// `None` means the body stays as it is: nothing worth stamping, an
/// unauthenticated requester, or (after a loud log line) a rewriter error.
fn rewrite(html: &[u8], handle: &CsrfHandle) -> Option<String> {
    match INJECTOR.contains_targets(html) {
        Ok(true) => {}
        Ok(false) => return None,
        Err(error) => {
            error!(?error, "failed to scan the response body; leaving it untouched");
            return None;
        }
    }

    let token = handle.response_token()?;
    let html = std::str::from_utf8(html).ok()?;

    match INJECTOR.inject(html, token.as_str()) {
        Ok(rewritten) => Some(rewritten),
        Err(error) => {
            error!(?error, "failed to stamp the response body; leaving it untouched");
            None
        }
    }
}

/// Append the `Set-Cookie` header if this request minted a new token
fn finalize<ResBody>(
    mut resp: Response<FilterBody<ResBody>>,
    handle: &CsrfHandle,
) -> Response<FilterBody<ResBody>> {
    if let Some(token) = handle.pending_cookie() {
        let cookie = Cookie::build((TOKEN_FIELD_NAME, token.as_str()))
            .secure(true)
            .http_only(true)
            .path("/")
            .expires(Expiration::Session)
            .build();

        let encoded_cookie = cookie.encoded().to_string();
        let header_value = HeaderValue::from_str(&encoded_cookie).unwrap();

        resp.headers_mut().append(header::SET_COOKIE, header_value);
    }

    resp
}

impl<S, Fut, ReqBody, ResBody> Future for FilterFuture<S, Fut, ReqBody, ResBody>
where
    S: Service<Request<FilterBody<ReqBody>>, Response = Response<ResBody>, Future = Fut>,
    Fut: Future<Output = Result<Response<ResBody>, S::Error>>,
    S::Error: Into<BoxError>,
    ReqBody: Body<Data = Bytes>,
    ReqBody::Error: Into<BoxError>,
    ResBody: Body<Data = Bytes>,
    ResBody::Error: Into<BoxError>,
{
    type Output = Result<Response<FilterBody<ResBody>>, BoxError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<Self::Output> {
        loop {
            let next = match self.as_mut().project() {
                FilterFutureProj::VerifyRequest {
                    mut body,
                    parts,
                    buf,
                    service,
                    handle,
                } => {
                    while let Some(frame) = ready!(body.as_mut().poll_frame(cx))
                        .transpose()
                        .map_err(Into::into)?
                    {
                        if let Ok(data) = frame.into_data() {
                            buf.put(data);
                        }
                    }

                    let mut parts = parts.take().expect("[Bug] Missing request parts");
                    match extract::verify_request(handle, &mut parts, buf) {
                        Ok(stripped) => {
                            let req = Request::from_parts(parts, Either::Left(Full::new(stripped)));
                            let mut service = service.take().expect("[Bug] Missing service");

                            FilterFuture::Handler {
                                fut: service.call(req),
                                handle: handle.clone(),
                            }
                        }
                        Err(rejection) => FilterFuture::Finish {
                            resp: Some(reject(rejection)),
                        },
                    }
                }
                FilterFutureProj::Handler { fut, handle } => {
                    let resp = ready!(fut.poll(cx)).map_err(Into::into)?;

                    if handle.username().is_some() && is_html(resp.headers()) {
                        let (parts, body) = resp.into_parts();

                        FilterFuture::RewriteResponse {
                            body,
                            parts: Some(parts),
                            buf: BytesMut::new(),
                            handle: handle.clone(),
                        }
                    } else {
                        FilterFuture::Finish {
                            resp: Some(finalize(resp.map(Either::Right), handle)),
                        }
                    }
                }
                FilterFutureProj::RewriteResponse {
                    mut body,
                    parts,
                    buf,
                    handle,
                } => {
                    while let Some(frame) = ready!(body.as_mut().poll_frame(cx))
                        .transpose()
                        .map_err(Into::into)?
                    {
                        if let Ok(data) = frame.into_data() {
                            buf.put(data);
                        }
                    }

                    let mut parts = parts.take().expect("[Bug] Missing response parts");
                    let html = std::mem::take(buf);
                    let body = match rewrite(&html, handle) {
                        Some(rewritten) => {
                            parts.headers.insert(
                                header::CONTENT_LENGTH,
                                HeaderValue::from(rewritten.len() as u64),
                            );

                            Bytes::from(rewritten)
                        }
                        None => html.freeze(),
                    };

                    let resp = Response::from_parts(parts, Either::Left(Full::new(body)));
                    FilterFuture::Finish {
                        resp: Some(finalize(resp, handle)),
                    }
                }
                FilterFutureProj::Finish { resp } => {
                    let resp = resp.take().expect("[Bug] Future polled after completion");
                    return Poll::Ready(Ok(resp));
                }
            };

            self.set(next);
        }
    }
}
