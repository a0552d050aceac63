// src/core/connection_info.rs

//! The declared identity of a Redis instance, as opposed to its live
//! connection state (see [`crate::core::instance`]).

use serde::{Deserialize, Serialize};

/// The declared identity of an instance: host, port, auth, and role.
///
/// Totally ordered and equality-comparable so it can live in a `BTreeSet` as
/// the key reconciliation runs against. Ordering and equality consider every
/// field, including `read_only` and `auth` — two infos that differ only in
/// `read_only` are genuinely different *set elements*, even though
/// reconciliation treats them as the "same instance" for role-change purposes
/// (see [`ConnectionInfo::endpoint_key`]).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub auth: Option<String>,
    #[serde(default)]
    pub read_only: bool,
}

impl ConnectionInfo {
    pub fn new(host: impl Into<String>, port: u16, read_only: bool) -> Self {
        Self {
            host: host.into(),
            port,
            auth: None,
            read_only,
        }
    }

    pub fn with_auth(mut self, auth: impl Into<String>) -> Self {
        self.auth = Some(auth.into());
        self
    }

    /// The part of the identity that survives a role flip: reconciliation
    /// uses this to recognize "the same instance, but its `read_only` flag
    /// changed" rather than treating it as a removal plus an addition.
    pub fn endpoint_key(&self) -> (&str, u16) {
        (&self.host, self.port)
    }
}

impl std::fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_key_ignores_role_and_auth() {
        let a = ConnectionInfo::new("10.0.0.1", 6379, false);
        let b = ConnectionInfo::new("10.0.0.1", 6379, true).with_auth("secret");
        assert_eq!(a.endpoint_key(), b.endpoint_key());
        assert_ne!(a, b);
    }

    #[test]
    fn ordering_is_total() {
        let mut infos = vec![
            ConnectionInfo::new("b", 1, false),
            ConnectionInfo::new("a", 2, false),
            ConnectionInfo::new("a", 1, false),
        ];
        infos.sort();
        assert_eq!(
            infos,
            vec![
                ConnectionInfo::new("a", 1, false),
                ConnectionInfo::new("a", 2, false),
                ConnectionInfo::new("b", 1, false),
            ]
        );
    }
}
