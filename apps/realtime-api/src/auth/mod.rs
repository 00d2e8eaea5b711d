//! Auth collaborator boundary.
//!
//! The hub never issues or validates credentials itself; it only asks an
//! external resolver to turn a bearer token into a user id.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::ApiError;

/// `resolve(token) → user id | None`. Backed by the platform's session
/// service in production and an in-memory map in tests.
#[async_trait]
pub trait TokenResolver: Send + Sync {
    async fn resolve(&self, token: &str) -> Result<Option<String>, ApiError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation (for tests and single-binary dev runs)
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryTokenResolver {
    tokens: DashMap<String, String>,
}

impl MemoryTokenResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, token: impl Into<String>, user_id: impl Into<String>) {
        self.tokens.insert(token.into(), user_id.into());
    }
}

#[async_trait]
impl TokenResolver for MemoryTokenResolver {
    async fn resolve(&self, token: &str) -> Result<Option<String>, ApiError> {
        Ok(self.tokens.get(token).map(|v| v.clone()))
    }
}
