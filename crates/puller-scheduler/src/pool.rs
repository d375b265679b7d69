// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pool of diagnostic-prefix tokens lent to running workers.
//!
//! Each worker gets a unique token it prefixes its own diagnostic ids with,
//! so reports from concurrently running workers never collide. The pool is
//! sized to the concurrency limit, so a job admitted by the scheduler always
//! finds a free token.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::warn;

/// Token pool errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// Every token is checked out.
    #[error("diagnostic token pool exhausted ({size} tokens in use)")]
    Exhausted { size: usize },

    /// The token was not lent out by this pool.
    #[error("token {0} is not checked out of this pool")]
    NotCheckedOut(String),
}

#[derive(Debug, Default)]
struct PoolState {
    available: VecDeque<String>,
    checked_out: HashSet<String>,
}

/// Check-out/check-in pool of unique diagnostic-prefix tokens.
#[derive(Debug)]
pub struct DiagnosticTokenPool {
    state: Mutex<PoolState>,
    size: usize,
}

impl DiagnosticTokenPool {
    /// Create a pool holding `<prefix>-0` .. `<prefix>-<size-1>`.
    pub fn new(prefix: &str, size: usize) -> Self {
        let available = (0..size).map(|n| format!("{}-{}", prefix, n)).collect();
        Self {
            state: Mutex::new(PoolState {
                available,
                checked_out: HashSet::new(),
            }),
            size,
        }
    }

    /// Total number of tokens owned by the pool.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of tokens currently free.
    pub fn available(&self) -> usize {
        self.state().available.len()
    }

    /// Number of tokens currently lent out.
    pub fn checked_out(&self) -> usize {
        self.state().checked_out.len()
    }

    /// Take a token out of the pool.
    pub fn checkout(&self) -> Result<String, PoolError> {
        let mut state = self.state();
        let token = state
            .available
            .pop_front()
            .ok_or(PoolError::Exhausted { size: self.size })?;
        state.checked_out.insert(token.clone());
        Ok(token)
    }

    /// Return a token previously taken with [`checkout`](Self::checkout).
    pub fn checkin(&self, token: &str) -> Result<(), PoolError> {
        let mut state = self.state();
        if !state.checked_out.remove(token) {
            return Err(PoolError::NotCheckedOut(token.to_string()));
        }
        state.available.push_back(token.to_string());
        Ok(())
    }

    /// Check a token out for as long as the returned lease lives.
    pub fn lease(self: &Arc<Self>) -> Result<TokenLease, PoolError> {
        let token = self.checkout()?;
        Ok(TokenLease {
            pool: Arc::clone(self),
            token,
        })
    }

    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A checked-out token, returned to its pool on drop.
#[derive(Debug)]
pub struct TokenLease {
    pool: Arc<DiagnosticTokenPool>,
    token: String,
}

impl TokenLease {
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl Drop for TokenLease {
    fn drop(&mut self) {
        if let Err(e) = self.pool.checkin(&self.token) {
            warn!(token = %self.token, error = %e, "Failed to return diagnostic token");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_unique() {
        let pool = DiagnosticTokenPool::new("puller", 3);
        let tokens: HashSet<String> = (0..3).map(|_| pool.checkout().unwrap()).collect();
        assert_eq!(tokens.len(), 3);
        assert!(tokens.contains("puller-0"));
        assert!(tokens.contains("puller-2"));
    }

    #[test]
    fn test_exhaustion() {
        let pool = DiagnosticTokenPool::new("p", 1);
        pool.checkout().unwrap();
        assert_eq!(pool.checkout().unwrap_err(), PoolError::Exhausted { size: 1 });
    }

    #[test]
    fn test_checkin_makes_token_available_again() {
        let pool = DiagnosticTokenPool::new("p", 1);
        let token = pool.checkout().unwrap();
        pool.checkin(&token).unwrap();
        assert_eq!(pool.checkout().unwrap(), token);
    }

    #[test]
    fn test_double_checkin_rejected() {
        let pool = DiagnosticTokenPool::new("p", 2);
        let token = pool.checkout().unwrap();
        pool.checkin(&token).unwrap();
        assert_eq!(
            pool.checkin(&token).unwrap_err(),
            PoolError::NotCheckedOut(token.clone())
        );
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_foreign_token_rejected() {
        let pool = DiagnosticTokenPool::new("p", 1);
        assert!(pool.checkin("other-0").is_err());
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_lease_returns_on_drop() {
        let pool = Arc::new(DiagnosticTokenPool::new("p", 2));
        {
            let lease = pool.lease().unwrap();
            assert_eq!(lease.token(), "p-0");
            assert_eq!(pool.checked_out(), 1);
        }
        assert_eq!(pool.checked_out(), 0);
        assert_eq!(pool.available(), 2);
    }
}
