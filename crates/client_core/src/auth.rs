use std::sync::RwLock;

use shared::{domain::UserId, protocol::Token};

/// Source of the caller's credentials. Consulted read-only by the REST layer,
/// except that a successful sign-in hands the new token back via `save`.
pub trait TokenProvider: Send + Sync {
    fn token(&self) -> Option<Token>;
    fn save(&self, token: &Token);

    fn user_id(&self) -> Option<UserId> {
        self.token().map(|token| token.user_id)
    }
}

#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: RwLock<Option<Token>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: Token) -> Self {
        Self {
            token: RwLock::new(Some(token)),
        }
    }

    pub fn clear(&self) {
        if let Ok(mut guard) = self.token.write() {
            guard.take();
        }
    }
}

impl TokenProvider for MemoryTokenStore {
    fn token(&self) -> Option<Token> {
        self.token.read().ok().and_then(|guard| guard.clone())
    }

    fn save(&self, token: &Token) {
        if let Ok(mut guard) = self.token.write() {
            *guard = Some(token.clone());
        }
    }
}

#[cfg(test)]
#[path = "tests/auth_tests.rs"]
mod tests;
