//! Domain allow/deny filtering

use crate::error::{Error, Result};
use crate::utils::host_matches;

/// Allow and deny host patterns, fixed at startup
#[derive(Debug, Clone, Default)]
pub struct DomainPolicy {
    allowed: Vec<String>,
    blocked: Vec<String>,
}

impl DomainPolicy {
    pub fn new(allowed: &[String], blocked: &[String]) -> Self {
        let normalize = |entries: &[String]| -> Vec<String> {
            entries
                .iter()
                .map(|e| e.trim().to_lowercase())
                .filter(|e| !e.is_empty())
                .collect()
        };
        Self {
            allowed: normalize(allowed),
            blocked: normalize(blocked),
        }
    }

    /// A non-empty allow-list is authoritative; otherwise the deny-list applies
    pub fn check(&self, host: &str) -> Result<()> {
        if !self.allowed.is_empty() {
            if self.allowed.iter().any(|pattern| host_matches(host, pattern)) {
                return Ok(());
            }
            return Err(Error::DomainBlocked(format!("{} is not in the allowed domains", host)));
        }

        if self.blocked.iter().any(|pattern| host_matches(host, pattern)) {
            return Err(Error::DomainBlocked(host.to_string()));
        }

        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty() && self.blocked.is_empty()
    }
}
