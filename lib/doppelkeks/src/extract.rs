//! Pulls the client's token out of a state-changing request
//!
//! The consumed `token` field is stripped from the body (or query string)
//! before the request moves on, so it never shows up in downstream form
//! processing.

use crate::{CsrfHandle, TOKEN_FIELD_NAME, Token, error::Rejection, token};
use bytes::Bytes;
use http::{
    HeaderValue, Uri, header, request,
    uri::PathAndQuery,
};
use std::time::SystemTime;

pub(crate) fn verify_request(
    handle: &CsrfHandle,
    parts: &mut request::Parts,
    body: &[u8],
) -> Result<Bytes, Rejection> {
    let server = handle
        .server_token()
        .ok_or(Rejection::MissingServerToken)?;

    let (client, stripped_body) = if body.is_empty() {
        (query_token(parts)?, Bytes::new())
    } else {
        let (client, remaining) = body_token(body)?;
        let reencoded =
            serde_urlencoded::to_string(&remaining).expect("[Bug] Failed to re-encode form body");

        parts.headers.insert(
            header::CONTENT_LENGTH,
            HeaderValue::from(reencoded.len() as u64),
        );

        (client, Bytes::from(reencoded))
    };

    let client = Token::from(client);
    let username = handle
        .username()
        .expect("[Bug] Unauthenticated request reached token verification");
    if !token::validate(&client, handle.key(), username, SystemTime::now()) {
        return Err(Rejection::MalformedClientToken);
    }

    // the equality check is the actual CSRF defense; the cookie is the
    // source of truth, and the attacker cannot set it
    if client.as_str() != server.as_str() {
        return Err(Rejection::TokenMismatch);
    }

    Ok(stripped_body)
}

fn body_token(body: &[u8]) -> Result<(String, Vec<(String, String)>), Rejection> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(body).unwrap_or_default();

    let mut token = None;
    let mut remaining = Vec::with_capacity(pairs.len());
    for (name, value) in pairs {
        if name == TOKEN_FIELD_NAME {
            if token.replace(value).is_some() {
                return Err(Rejection::DuplicateClientToken);
            }
        } else {
            remaining.push((name, value));
        }
    }

    Ok((token.ok_or(Rejection::MissingClientToken)?, remaining))
}

/// Confirmation links arrive as submissions with an empty body and the
/// token as their only query parameter
fn query_token(parts: &mut request::Parts) -> Result<String, Rejection> {
    let query = parts.uri.query().unwrap_or_default();
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query).unwrap_or_default();

    let (mut tokens, remaining): (Vec<_>, Vec<_>) = pairs
        .into_iter()
        .partition(|(name, _)| name == TOKEN_FIELD_NAME);

    if tokens.len() != 1 {
        return Err(Rejection::MissingClientToken);
    }

    strip_query(parts, &remaining);

    Ok(tokens.swap_remove(0).1)
}

fn strip_query(parts: &mut request::Parts, remaining: &[(String, String)]) {
    let path = parts.uri.path();
    let path_and_query = if remaining.is_empty() {
        path.to_string()
    } else {
        let query = serde_urlencoded::to_string(remaining)
            .expect("[Bug] Failed to re-encode query string");
        format!("{path}?{query}")
    };

    let mut uri_parts = parts.uri.clone().into_parts();
    uri_parts.path_and_query = Some(
        path_and_query
            .parse::<PathAndQuery>()
            .expect("[Bug] Failed to reassemble the request path"),
    );
    parts.uri = Uri::from_parts(uri_parts).expect("[Bug] Failed to reassemble the request URI");
}
