//! Identity providers
//!
//! Turning a case into an authenticated request is delegated to an
//! [`IdentityProvider`], which returns the header map to send when acting as
//! a named identity.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::common::DispatchError;

pub trait IdentityProvider: Send + Sync {
    /// Headers to send as `identity`, starting from the case's own headers
    fn authenticate(
        &self,
        identity: &str,
        server: &Map<String, Value>,
    ) -> Result<Map<String, Value>, DispatchError>;
}

/// Identities declared in configuration as header overrides
#[derive(Debug, Clone, Default)]
pub struct StaticIdentities {
    identities: BTreeMap<String, Map<String, Value>>,
}

impl StaticIdentities {
    pub fn new(identities: BTreeMap<String, Map<String, Value>>) -> Self {
        Self { identities }
    }
}

impl IdentityProvider for StaticIdentities {
    fn authenticate(
        &self,
        identity: &str,
        server: &Map<String, Value>,
    ) -> Result<Map<String, Value>, DispatchError> {
        let overrides =
            self.identities
                .get(identity)
                .ok_or_else(|| DispatchError::Authentication {
                    identity: identity.to_string(),
                    reason: "identity is not declared in `identities`".to_string(),
                })?;

        let mut headers = server.clone();
        for (name, value) in overrides {
            headers.insert(name.clone(), value.clone());
        }
        Ok(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provider() -> StaticIdentities {
        let identities = json!({
            "admin": {"Authorization": "Bearer admin-token"},
            "guest": {"Authorization": "Bearer guest-token", "X-Role": "guest"},
        });
        StaticIdentities::new(serde_json::from_value(identities).unwrap())
    }

    #[test]
    fn test_identity_headers_override_case_headers() {
        let server = json!({"Content-Type": "application/json", "Authorization": "none"});
        let headers = provider()
            .authenticate("admin", server.as_object().unwrap())
            .unwrap();
        assert_eq!(headers["Authorization"], json!("Bearer admin-token"));
        assert_eq!(headers["Content-Type"], json!("application/json"));
    }

    #[test]
    fn test_identities_do_not_accumulate() {
        let server = json!({"Content-Type": "application/json"});
        let provider = provider();
        provider.authenticate("guest", server.as_object().unwrap()).unwrap();
        let headers = provider
            .authenticate("admin", server.as_object().unwrap())
            .unwrap();
        assert!(!headers.contains_key("X-Role"));
    }

    #[test]
    fn test_unknown_identity() {
        let err = provider()
            .authenticate("root", &Map::new())
            .unwrap_err();
        assert!(matches!(err, DispatchError::Authentication { ref identity, .. } if identity == "root"));
    }
}
