//! Identity provider endpoints.

use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::IdentityConfig;

/// Public identity provider domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Domain {
    #[default]
    #[serde(rename = "ic0.app")]
    Ic0App,
    #[serde(rename = "internetcomputer.org")]
    InternetComputerOrg,
}

impl Domain {
    pub fn as_str(self) -> &'static str {
        match self {
            Domain::Ic0App => "ic0.app",
            Domain::InternetComputerOrg => "internetcomputer.org",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "ic0.app" => Ok(Domain::Ic0App),
            "internetcomputer.org" => Ok(Domain::InternetComputerOrg),
            other => anyhow::bail!(
                "Unknown identity domain '{other}' (expected ic0.app or internetcomputer.org)"
            ),
        }
    }
}

/// Resolves the identity provider URL for a sign-in.
///
/// A local replica is only used when `local` is set *and* a canister id is
/// configured; otherwise the public provider for `domain` (or the configured
/// default domain) is used.
///
/// # Errors
/// Returns an error if the resulting URL is malformed (e.g. a bad canister id).
pub fn identity_provider_url(config: &IdentityConfig, domain: Option<Domain>) -> Result<Url> {
    let raw = match config.canister_id.as_deref() {
        Some(canister_id) if config.local => {
            format!("http://{canister_id}.localhost:{}", config.local_port)
        }
        _ => format!("https://identity.{}", domain.unwrap_or(config.domain)),
    };
    Url::parse(&raw).with_context(|| format!("Invalid identity provider URL '{raw}'"))
}
