use anyhow::Context;
use axum::http::{HeaderMap, HeaderName};

use super::IdentityProvider;

/// Trusts a header set by the authenticating proxy in front of the service.
#[derive(Debug, Clone)]
pub struct HeaderIdentityProvider {
    header: HeaderName,
}

impl HeaderIdentityProvider {
    pub fn new(header: &str) -> anyhow::Result<Self> {
        let header = HeaderName::from_bytes(header.trim().as_bytes())
            .with_context(|| format!("invalid identity header name '{}'", header))?;

        Ok(HeaderIdentityProvider { header })
    }
}

impl Default for HeaderIdentityProvider {
    fn default() -> Self {
        HeaderIdentityProvider {
            header: HeaderName::from_static(comms::USER_ID_HEADER),
        }
    }
}

impl IdentityProvider for HeaderIdentityProvider {
    fn user_from_headers(&self, headers: &HeaderMap) -> Option<String> {
        let user_id = headers.get(&self.header)?.to_str().ok()?.trim();

        if user_id.is_empty() {
            None
        } else {
            Some(String::from(user_id))
        }
    }
}
