use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

/// Outstanding refresh tokens kept per account; the oldest are revoked first
const MAX_REFRESH_TOKENS: usize = 16;

#[derive(Debug, Clone, Serialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
    pub user_id: String,
    pub expires_in: i64,
    pub token_type: &'static str,
}

/// Issued tokens for the single simulated account
#[derive(Debug)]
pub struct TokenStore {
    user_id: String,
    ttl: Duration,
    access: HashMap<String, DateTime<Utc>>,
    refresh: VecDeque<String>,
}

impl TokenStore {
    pub fn new(user_id: impl Into<String>, ttl: Duration) -> Self {
        Self {
            user_id: user_id.into(),
            ttl,
            access: HashMap::new(),
            refresh: VecDeque::new(),
        }
    }

    pub fn issue(&mut self, now: DateTime<Utc>) -> TokenGrant {
        self.access.retain(|_, expires_at| *expires_at > now);

        let access_token = Uuid::new_v4().simple().to_string();
        let refresh_token = Uuid::new_v4().simple().to_string();
        self.access.insert(access_token.clone(), now + self.ttl);
        self.refresh.push_back(refresh_token.clone());
        while self.refresh.len() > MAX_REFRESH_TOKENS {
            self.refresh.pop_front();
        }

        TokenGrant {
            access_token,
            refresh_token,
            user_id: self.user_id.clone(),
            expires_in: self.ttl.num_seconds(),
            token_type: "Bearer",
        }
    }

    /// Refresh tokens are single use and rotate on every grant
    pub fn refresh(&mut self, refresh_token: &str, now: DateTime<Utc>) -> Option<TokenGrant> {
        let index = self.refresh.iter().position(|t| t == refresh_token)?;
        self.refresh.remove(index);
        Some(self.issue(now))
    }

    pub fn is_valid(&self, access_token: &str, now: DateTime<Utc>) -> bool {
        self.access
            .get(access_token)
            .map(|expires_at| *expires_at > now)
            .unwrap_or(false)
    }
}
