//! Shared-secret gate in front of the render routes.

use std::{fmt, sync::Arc};

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::debug;

use super::error::GatewayError;

/// Compares caller tokens against the configured secret.
///
/// Without a configured secret every request is rejected: an unset secret
/// never degrades into an open gate.
#[derive(Clone, Default)]
pub struct AuthGate {
    expected: Option<Arc<[u8]>>,
}

impl AuthGate {
    /// Empty or whitespace-only secrets count as unset.
    pub fn new(secret: Option<&str>) -> Self {
        let expected = secret
            .filter(|value| !value.trim().is_empty())
            .map(|value| Arc::from(Self::hash(value)));
        Self { expected }
    }

    pub fn is_configured(&self) -> bool {
        self.expected.is_some()
    }

    pub fn authorize(&self, provided: Option<&str>) -> Result<(), GatewayError> {
        let matches = match (&self.expected, provided) {
            (Some(expected), Some(token)) => {
                expected.as_ref().ct_eq(Self::hash(token).as_slice()).unwrap_u8() == 1
            }
            _ => false,
        };

        if matches {
            Ok(())
        } else {
            debug!(
                target = "rendergate::auth",
                configured = self.expected.is_some(),
                token_present = provided.is_some(),
                "rejected request token"
            );
            Err(GatewayError::Unauthorized)
        }
    }

    fn hash(token: &str) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hasher.finalize().to_vec()
    }
}

impl fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthGate")
            .field("configured", &self.is_configured())
            .finish()
    }
}
