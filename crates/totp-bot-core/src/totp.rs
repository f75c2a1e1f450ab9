//! TOTP (RFC 6238) code generation.
//!
//! Codes are 6 digits over a 30 second step with HMAC-SHA1, the defaults
//! every authenticator app assumes when it is only given a base32 seed.

use data_encoding::{BASE32, BASE32_NOPAD};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use thiserror::Error;

type HmacSha1 = Hmac<Sha1>;

/// Number of digits in a generated code
pub const CODE_DIGITS: u32 = 6;
/// Length of one TOTP time step in seconds
pub const TIME_STEP_SECS: i64 = 30;

/// Errors raised while generating a code
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TotpError {
    /// The stored secret is not a usable base32 seed
    #[error("invalid TOTP secret: {0}")]
    InvalidSecret(&'static str),
}

/// Produces a code for a secret at a point in time
#[cfg_attr(test, mockall::automock)]
pub trait CodeGenerator: Send + Sync {
    /// Compute the code valid at `unix_time` for a normalized base32 secret.
    ///
    /// # Errors
    ///
    /// Returns `TotpError::InvalidSecret` if the secret does not decode.
    fn compute_code(&self, secret: &str, unix_time: i64) -> Result<String, TotpError>;
}

/// Source of the current unix time
#[cfg_attr(test, mockall::automock)]
pub trait Clock: Send + Sync {
    /// Seconds since the unix epoch.
    fn now(&self) -> i64;
}

/// Wall clock backed by `chrono`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// RFC 6238 generator with the default parameters
#[derive(Debug, Clone, Copy, Default)]
pub struct Rfc6238;

impl CodeGenerator for Rfc6238 {
    fn compute_code(&self, secret: &str, unix_time: i64) -> Result<String, TotpError> {
        generate_code(secret, unix_time)
    }
}

/// Canonical form of a user-supplied secret: no whitespace, upper-case.
///
/// Applying it twice yields the same string.
#[must_use]
pub fn normalize_secret(secret: &str) -> String {
    secret
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase()
}

/// Generate the code for `secret` at `unix_time`.
///
/// # Errors
///
/// Returns `TotpError::InvalidSecret` if the secret is empty or not base32.
pub fn generate_code(secret: &str, unix_time: i64) -> Result<String, TotpError> {
    let key = decode_secret(secret)?;
    let counter = unix_time.max(0) / TIME_STEP_SECS;

    let mut mac =
        HmacSha1::new_from_slice(&key).map_err(|_| TotpError::InvalidSecret("bad key length"))?;
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    // Dynamic truncation, RFC 4226 section 5.3
    let offset = usize::from(digest[digest.len() - 1] & 0x0f);
    let binary = (u32::from(digest[offset]) & 0x7f) << 24
        | u32::from(digest[offset + 1]) << 16
        | u32::from(digest[offset + 2]) << 8
        | u32::from(digest[offset + 3]);

    let code = binary % 10u32.pow(CODE_DIGITS);
    Ok(format!("{code:0width$}", width = CODE_DIGITS as usize))
}

/// Seconds left before the code for `unix_time` rotates.
#[must_use]
pub fn seconds_remaining(unix_time: i64) -> i64 {
    TIME_STEP_SECS - unix_time.rem_euclid(TIME_STEP_SECS)
}

fn decode_secret(secret: &str) -> Result<Vec<u8>, TotpError> {
    let normalized = normalize_secret(secret);
    if normalized.is_empty() {
        return Err(TotpError::InvalidSecret("secret is empty"));
    }

    let decoded = BASE32_NOPAD
        .decode(normalized.as_bytes())
        .or_else(|_| BASE32.decode(normalized.as_bytes()))
        .map_err(|_| TotpError::InvalidSecret("secret must be valid base32"))?;

    if decoded.is_empty() {
        return Err(TotpError::InvalidSecret("secret decodes to no bytes"));
    }
    Ok(decoded)
}
