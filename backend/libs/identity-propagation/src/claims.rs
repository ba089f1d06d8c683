//! Unverified bearer-token claims
//!
//! **No signature verification happens here.** The payload is decoded as-is
//! on the assumption that the edge gateway verified the token before it
//! reached this process. Anything extracted from it is untrusted without that
//! boundary and is tagged as such by the resolver.

use jsonwebtoken::{DecodingKey, Validation};
use serde_json::{Map, Value};
use thiserror::Error;

const BEARER_PREFIX: &str = "Bearer ";

#[derive(Debug, Error)]
pub enum ClaimError {
    #[error("invalid authorization format (expected 'Bearer <token>')")]
    MissingBearerPrefix,

    #[error("malformed token: {0}")]
    Malformed(#[from] jsonwebtoken::errors::Error),

    #[error("claim 'sub' not found")]
    MissingSubject,

    #[error("claim 'sub' is not a string")]
    NonStringSubject,

    #[error("authorization header is not printable ASCII")]
    NonAsciiHeader,
}

/// Strip the literal `Bearer ` prefix
pub fn bearer_token(authorization: &str) -> Result<&str, ClaimError> {
    authorization
        .strip_prefix(BEARER_PREFIX)
        .ok_or(ClaimError::MissingBearerPrefix)
}

/// Extract the `sub` claim from an `authorization` header value
pub fn subject_from_authorization(authorization: &str) -> Result<String, ClaimError> {
    let token = bearer_token(authorization)?;
    let claims = UnverifiedClaims::decode(token)?;
    claims.subject().map(str::to_string)
}

/// JWT payload decoded without verifying its signature
#[derive(Debug, Clone)]
pub struct UnverifiedClaims {
    claims: Map<String, Value>,
}

impl UnverifiedClaims {
    /// Decode the payload of a compact JWT
    ///
    /// Only structure is checked (three segments, JSON header with a known
    /// `alg`, JSON object payload). Signature, expiry and audience are not.
    pub fn decode(token: &str) -> Result<Self, ClaimError> {
        let mut validation = Validation::default();
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let data = jsonwebtoken::decode::<Map<String, Value>>(
            token,
            &DecodingKey::from_secret(&[]),
            &validation,
        )?;

        Ok(Self {
            claims: data.claims,
        })
    }

    /// The `sub` claim; an empty string counts as absent
    pub fn subject(&self) -> Result<&str, ClaimError> {
        match self.claims.get("sub") {
            None | Some(Value::Null) => Err(ClaimError::MissingSubject),
            Some(Value::String(sub)) if sub.is_empty() => Err(ClaimError::MissingSubject),
            Some(Value::String(sub)) => Ok(sub),
            Some(_) => Err(ClaimError::NonStringSubject),
        }
    }

    pub fn get(&self, claim: &str) -> Option<&Value> {
        self.claims.get(claim)
    }
}
