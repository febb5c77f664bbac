//! Codec for the double-submit token
//!
//! A token is a single string of the form
//! `<hex-hmac-sha512>!<timestamp>/<nonce>/<username>`. The message half is
//! plaintext; the digest over it makes the whole thing self-verifying, so
//! the server never has to remember which tokens it handed out.

use crate::{Token, TokenRef, UsernameRef, error::Error};
use hex_simd::AsOut;
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use rand::Rng;
use regex::Regex;
use sha2::Sha512;
use std::{
    sync::LazyLock,
    time::{SystemTime, UNIX_EPOCH},
};
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha512 = Hmac<Sha512>;

/// Tokens older than this are rejected outright
pub const ACCEPTANCE_WINDOW_SECS: u64 = 30 * 60;

/// Tokens older than this are still accepted but due for replacement
pub const ROTATION_THRESHOLD_SECS: u64 = 10 * 60;

const DIGEST_LEN: usize = 64;

static TOKEN_GRAMMAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[0-9a-z]+![0-9]+/[0-9]+/[-_a-z0-9%]+$")
        .expect("[Bug] Failed to compile token grammar regex")
});

/// Everything outside `[A-Za-z0-9_-]` is escaped, so a `/` inside a
/// username can never collide with the field separator
const USERNAME_ESCAPES: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_');

pub(crate) fn encode_username(username: &UsernameRef) -> String {
    utf8_percent_encode(username.as_str(), USERNAME_ESCAPES).to_string()
}

fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map_or(0, |since_epoch| since_epoch.as_secs())
}

/// Server-wide signing secret, zeroized on drop
///
/// Loaded from configuration at startup and stable across restarts;
/// rotating it invalidates every outstanding token at once.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretKey(Box<[u8]>);

impl SecretKey {
    /// An empty secret is a configuration mistake and is reported here, at
    /// startup, instead of surfacing as a 403 on every request
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, Error> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(Error::EmptySecret);
        }

        Ok(Self(secret.into()))
    }
}

impl AsRef<[u8]> for SecretKey {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Fields of a well-formed token
#[derive(Debug, PartialEq, Eq)]
pub struct ParsedToken<'a> {
    pub hash: &'a str,
    pub message: &'a str,
    pub timestamp: u64,
    pub nonce: u64,
    pub username: &'a str,
}

/// Mint a fresh token for `username`
///
/// The nonce keeps two tokens minted within the same second distinct.
pub fn mint(username: &UsernameRef, key: &SecretKey, now: SystemTime) -> Token {
    let timestamp = unix_seconds(now);
    let nonce: u32 = rand::thread_rng().gen_range(1..=999_999);
    let message = format!("{timestamp}/{nonce}/{}", encode_username(username));

    let mut mac =
        HmacSha512::new_from_slice(key.as_ref()).expect("[Bug] HMAC rejected the key length");
    mac.update(message.as_bytes());
    let digest =
        hex_simd::encode_to_string(mac.finalize().into_bytes(), hex_simd::AsciiCase::Lower);

    format!("{digest}!{message}").into()
}

/// Split a token into its fields
///
/// Anything failing the grammar comes back as `None`; adversarial input is
/// data here, not an error.
pub fn parse(token: &TokenRef) -> Option<ParsedToken<'_>> {
    let raw = token.as_str();
    if !TOKEN_GRAMMAR.is_match(raw) {
        return None;
    }

    let (hash, message) = raw.split_once('!')?;
    // limited to three parts so a stray slash can't shift the fields
    let mut fields = message.splitn(3, '/');
    let timestamp = fields.next()?.parse().ok()?;
    let nonce = fields.next()?.parse().ok()?;
    let username = fields.next()?;

    Some(ParsedToken {
        hash,
        message,
        timestamp,
        nonce,
        username,
    })
}

/// Check a token end to end: grammar, signature, acceptance window, and
/// username binding
///
/// One opaque boolean on purpose; reporting which check failed would hand an
/// attacker an oracle.
pub fn validate(
    token: &TokenRef,
    key: &SecretKey,
    username: &UsernameRef,
    now: SystemTime,
) -> bool {
    let Some(parsed) = parse(token) else {
        return false;
    };

    if parsed.hash.len() != DIGEST_LEN * 2 {
        return false;
    }

    let mut decoded_digest = [0_u8; DIGEST_LEN];
    if hex_simd::decode(parsed.hash.as_bytes(), decoded_digest.as_mut().as_out()).is_err() {
        return false;
    }

    let mut mac =
        HmacSha512::new_from_slice(key.as_ref()).expect("[Bug] HMAC rejected the key length");
    mac.update(parsed.message.as_bytes());

    // `verify_slice` compares in constant time
    if mac.verify_slice(&decoded_digest).is_err() {
        return false;
    }

    let now = unix_seconds(now);
    if parsed.timestamp > now || now - parsed.timestamp > ACCEPTANCE_WINDOW_SECS {
        return false;
    }

    parsed.username == encode_username(username)
}

/// Whether a token is old enough to rotate
///
/// Only meaningful for tokens that already passed [`validate`]; a malformed
/// token is plain invalid, never soft-expired.
pub fn is_soft_expired(token: &TokenRef, now: SystemTime) -> bool {
    let Some(parsed) = parse(token) else {
        return false;
    };

    unix_seconds(now).saturating_sub(parsed.timestamp) > ROTATION_THRESHOLD_SECS
}
