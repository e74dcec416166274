//! Client identity extraction.
//!
//! Derives the partition key under which a request's counters are tracked.
//! Assumes a trusted reverse proxy sets the forwarding headers; the value is
//! never validated as a real IP and must not be treated as an
//! authentication signal.

use std::fmt;

use axum::http::HeaderMap;

/// Sentinel used when no client address can be derived.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Per-request client identity; a proxy-derived IP or `"unknown"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn unknown() -> Self {
        Self(UNKNOWN_CLIENT.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == UNKNOWN_CLIENT
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Extract the client identity from request headers.
///
/// Takes the first comma-separated entry of `x-forwarded-for` (the closest
/// original client behind a trusted proxy chain), falls back to `x-real-ip`,
/// then to the `"unknown"` sentinel.
pub fn client_id(headers: &HeaderMap) -> ClientId {
    if let Some(forwarded) = header_str(headers, "x-forwarded-for") {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return ClientId::new(first);
            }
        }
    }

    if let Some(real_ip) = header_str(headers, "x-real-ip") {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return ClientId::new(real_ip);
        }
    }

    ClientId::unknown()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
