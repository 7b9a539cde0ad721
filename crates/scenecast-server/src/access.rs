//! Access control gate
//!
//! Runs in order: shared-secret check, origin allow-list, rate limit.
//! The first failing check decides the outcome.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{header, HeaderMap, HeaderValue};
use subtle::ConstantTimeEq;

use crate::rate_limit::RateLimiter;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const API_KEY_QUERY: &str = "apiKey";

const ALLOW_METHODS: &str = "GET, POST, OPTIONS";
const ALLOW_HEADERS: &str = "Content-Type, x-api-key";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessError {
    #[error("Invalid or missing API key")]
    Authentication,
    #[error("Origin not allowed: {origin}")]
    ForbiddenOrigin { origin: String },
    #[error("Rate limit exceeded")]
    RateLimited,
}

/// Whether the endpoint requires the shared secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRequirement {
    Required,
    /// Viewer endpoints.
    Skip,
}

/// The caller attributes the gate looks at.
#[derive(Debug, Clone, Default)]
pub struct AccessRequest {
    pub api_key: Option<String>,
    pub origin: Option<String>,
    pub peer: Option<SocketAddr>,
}

impl AccessRequest {
    /// Extract credentials from headers, falling back to the `apiKey` query value.
    pub fn from_parts(
        headers: &HeaderMap,
        query_api_key: Option<&str>,
        peer: Option<SocketAddr>,
    ) -> Self {
        let header_value = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        Self {
            api_key: header_value(API_KEY_HEADER)
                .or_else(|| query_api_key.map(str::to_string)),
            origin: header_value("origin"),
            peer,
        }
    }

    /// Key used for rate limiting: api key, else peer address, else `anonymous`.
    pub fn rate_key(&self) -> String {
        match (&self.api_key, &self.peer) {
            (Some(key), _) if !key.is_empty() => key.clone(),
            (_, Some(peer)) => peer.ip().to_string(),
            _ => "anonymous".to_string(),
        }
    }
}

/// CORS headers granted by a successful check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorsGrant {
    allow_origin: String,
}

impl CorsGrant {
    pub fn allow_origin(&self) -> &str {
        &self.allow_origin
    }

    pub fn apply(&self, headers: &mut HeaderMap) {
        if let Ok(origin) = HeaderValue::from_str(&self.allow_origin) {
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        }
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOW_METHODS),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOW_HEADERS),
        );
    }
}

#[derive(Debug)]
pub struct AccessGate {
    api_key: Option<String>,
    allowed_origins: Vec<String>,
    limiter: Arc<RateLimiter>,
}

impl AccessGate {
    pub fn new(
        api_key: Option<String>,
        allowed_origins: Vec<String>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            api_key: api_key.filter(|k| !k.is_empty()),
            allowed_origins,
            limiter,
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn check(
        &self,
        request: &AccessRequest,
        auth: AuthRequirement,
    ) -> Result<CorsGrant, AccessError> {
        if auth == AuthRequirement::Required {
            self.authenticate(request.api_key.as_deref())?;
        }
        let grant = self.check_origin(request.origin.as_deref())?;
        if !self.limiter.check(&request.rate_key()).is_allowed() {
            return Err(AccessError::RateLimited);
        }
        Ok(grant)
    }

    /// CORS only, for OPTIONS requests.
    pub fn preflight(&self, origin: Option<&str>) -> Result<CorsGrant, AccessError> {
        self.check_origin(origin)
    }

    fn authenticate(&self, provided: Option<&str>) -> Result<(), AccessError> {
        let Some(secret) = &self.api_key else {
            return Ok(());
        };
        match provided {
            Some(key) if bool::from(key.as_bytes().ct_eq(secret.as_bytes())) => Ok(()),
            _ => Err(AccessError::Authentication),
        }
    }

    fn check_origin(&self, origin: Option<&str>) -> Result<CorsGrant, AccessError> {
        let wildcard = self.allowed_origins.iter().any(|o| o == "*");
        let Some(origin) = origin else {
            return Ok(CorsGrant {
                allow_origin: "*".to_string(),
            });
        };
        if wildcard {
            return Ok(CorsGrant {
                allow_origin: "*".to_string(),
            });
        }
        if self
            .allowed_origins
            .iter()
            .any(|allowed| !allowed.is_empty() && origin.starts_with(allowed.as_str()))
        {
            Ok(CorsGrant {
                allow_origin: origin.to_string(),
            })
        } else {
            Err(AccessError::ForbiddenOrigin {
                origin: origin.to_string(),
            })
        }
    }
}
