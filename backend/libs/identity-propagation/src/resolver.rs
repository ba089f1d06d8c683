//! Terminal Identity Resolver
//!
//! Precedence, first match wins:
//! 1. trusted caller header (non-empty)
//! 2. `sub` of the bearer token, decoded without verification
//! 3. [`UNKNOWN_CALLER`]
//!
//! Tenant resolution is independent and always runs. Resolution never fails;
//! every fallback is logged at warn so a sentinel can be audited later.

use crate::carrier::IdentityCarrier;
use crate::claims::{subject_from_authorization, ClaimError};
use crate::{headers, DEFAULT_TENANT, UNKNOWN_CALLER};
use tracing::{debug, warn};

/// Where the caller id came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySource {
    /// Header set by the gateway after it authenticated the caller
    TrustedHeader,
    /// `sub` of a bearer token whose signature was NOT checked here. Only
    /// meaningful when a gateway verified the token upstream.
    UnverifiedClaim,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub caller_id: String,
    pub tenant_id: String,
    /// `None` when the caller id is the sentinel
    pub source: Option<IdentitySource>,
}

impl ResolvedIdentity {
    pub fn is_anonymous(&self) -> bool {
        self.source.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub caller_header: String,
    pub tenant_header: String,
    /// Fall back to the unverified bearer `sub` when the trusted header is absent
    pub allow_unverified_bearer: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            caller_header: headers::CALLER_ID.to_string(),
            tenant_header: headers::TENANT_ID.to_string(),
            allow_unverified_bearer: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IdentityResolver {
    config: ResolverConfig,
}

impl IdentityResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn resolve(&self, carrier: &IdentityCarrier) -> ResolvedIdentity {
        let (caller_id, source) = self.resolve_caller(carrier);
        let tenant_id = self.resolve_tenant(carrier);

        ResolvedIdentity {
            caller_id,
            tenant_id,
            source,
        }
    }

    fn resolve_caller(&self, carrier: &IdentityCarrier) -> (String, Option<IdentitySource>) {
        if let Some(caller) = carrier
            .get(&self.config.caller_header)
            .filter(|value| !value.is_empty())
        {
            return (caller.to_string(), Some(IdentitySource::TrustedHeader));
        }

        if !carrier.contains(headers::AUTHORIZATION) {
            warn!(
                header = %self.config.caller_header,
                fallback = UNKNOWN_CALLER,
                "No caller identity in request metadata"
            );
            return (UNKNOWN_CALLER.to_string(), None);
        }

        if !self.config.allow_unverified_bearer {
            debug!(
                header = %self.config.caller_header,
                "Trusted caller header absent and unverified bearer fallback disabled"
            );
            return (UNKNOWN_CALLER.to_string(), None);
        }

        let subject = carrier
            .get(headers::AUTHORIZATION)
            .ok_or(ClaimError::NonAsciiHeader)
            .and_then(subject_from_authorization);

        match subject {
            Ok(subject) => {
                debug!(caller_id = %subject, "Caller id taken from unverified bearer claim");
                (subject, Some(IdentitySource::UnverifiedClaim))
            }
            Err(e) => {
                warn!(
                    error = %e,
                    fallback = UNKNOWN_CALLER,
                    "Failed to extract caller from bearer token"
                );
                (UNKNOWN_CALLER.to_string(), None)
            }
        }
    }

    fn resolve_tenant(&self, carrier: &IdentityCarrier) -> String {
        match carrier
            .get(&self.config.tenant_header)
            .filter(|value| !value.is_empty())
        {
            Some(tenant) => tenant.to_string(),
            None => {
                warn!(
                    header = %self.config.tenant_header,
                    fallback = DEFAULT_TENANT,
                    "No tenant in request metadata"
                );
                DEFAULT_TENANT.to_string()
            }
        }
    }
}
