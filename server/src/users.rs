use std::collections::HashMap;

use anyhow::Context;
use bell_protocol::{AccountId, AccountView};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    auth::{self, SessionClaims, SESSION_TTL},
    error::{BellError, BellResult},
};

pub const MIN_PASSWORD_LEN: usize = 6;
const AVATAR_BASE: &str = "https://ui-avatars.com/api/";

// Verified against when the email is unknown so both login failures cost the same.
static DUMMY_HASH: Lazy<Option<String>> = Lazy::new(|| auth::hash_password("bell-dummy").ok());

/// A registered account.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: AccountId,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub avatar: Option<String>,
    pub online: bool,
    pub created_at: i64,
}

impl Account {
    pub fn view(&self) -> AccountView {
        AccountView {
            id: self.id,
            username: self.username.clone(),
            email: self.email.clone(),
            avatar: self.avatar.clone(),
            online: self.online,
            created_at: self.created_at,
        }
    }
}

/// Session token plus the account it was issued for.
#[derive(Debug, Clone, Serialize)]
pub struct SignedIn {
    pub token: String,
    pub user: AccountView,
}

#[derive(Default)]
struct Accounts {
    by_id: HashMap<AccountId, Account>,
    by_email: HashMap<String, AccountId>,
}

/// In-memory account store.
pub struct UserRegistry {
    inner: Mutex<Accounts>,
    secret: Vec<u8>,
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

fn avatar_for(username: &str) -> Option<String> {
    url::Url::parse_with_params(
        AVATAR_BASE,
        &[("name", username), ("background", "random")],
    )
    .ok()
    .map(String::from)
}

fn required<'a>(field: &str, value: &'a str) -> BellResult<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(BellError::validation(format!("{field} is required")));
    }
    Ok(value)
}

impl UserRegistry {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            inner: Mutex::new(Accounts::default()),
            secret: secret.into(),
        }
    }

    /// Create an account and sign it in.
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> BellResult<SignedIn> {
        let username = required("username", username)?.to_string();
        let email = required("email", email)?.to_string();
        if password.is_empty() {
            return Err(BellError::validation("password is required"));
        }
        if !email.contains('@') {
            return Err(BellError::validation("email is invalid"));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(BellError::validation(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        let key = normalize_email(&email);
        if self.inner.lock().by_email.contains_key(&key) {
            return Err(BellError::Conflict("email already registered".into()));
        }

        let password = password.to_string();
        let password_hash = tokio::task::spawn_blocking(move || auth::hash_password(&password))
            .await
            .context("password hashing task failed")??;

        let account = Account {
            id: Uuid::new_v4(),
            avatar: avatar_for(&username),
            username,
            email,
            password_hash,
            online: false,
            created_at: OffsetDateTime::now_utc().unix_timestamp(),
        };
        {
            let mut guard = self.inner.lock();
            // re-check: another registration may have won while we were hashing
            if guard.by_email.contains_key(&key) {
                return Err(BellError::Conflict("email already registered".into()));
            }
            guard.by_email.insert(key, account.id);
            guard.by_id.insert(account.id, account.clone());
        }
        info!(account = %account.id, username = %account.username, "account registered");
        self.sign_in(&account)
    }

    /// Check credentials and sign the account in.
    pub async fn login(&self, email: &str, password: &str) -> BellResult<SignedIn> {
        let email = required("email", email)?;
        if password.is_empty() {
            return Err(BellError::validation("password is required"));
        }
        let account = {
            let guard = self.inner.lock();
            guard
                .by_email
                .get(&normalize_email(email))
                .and_then(|id| guard.by_id.get(id))
                .cloned()
        };
        let hash = match &account {
            Some(a) => Some(a.password_hash.clone()),
            None => DUMMY_HASH.clone(),
        };
        let password = password.to_string();
        let matches = tokio::task::spawn_blocking(move || {
            hash.map(|h| auth::verify_password(&password, &h))
                .unwrap_or(false)
        })
        .await
        .context("password verification task failed")?;

        match account {
            Some(account) if matches => self.sign_in(&account),
            _ => {
                warn!("login rejected");
                Err(BellError::Auth("invalid credentials".into()))
            }
        }
    }

    fn sign_in(&self, account: &Account) -> BellResult<SignedIn> {
        let token = auth::issue_jwt(
            &self.secret,
            account.id,
            &account.username,
            &account.email,
            SESSION_TTL,
        )?;
        Ok(SignedIn {
            token,
            user: account.view(),
        })
    }

    /// Decode a session token. `None` when malformed, expired or foreign.
    pub fn validate_session_token(&self, token: &str) -> Option<SessionClaims> {
        auth::verify_jwt(&self.secret, token).ok()
    }

    pub fn get(&self, id: &AccountId) -> Option<AccountView> {
        self.inner.lock().by_id.get(id).map(Account::view)
    }

    pub fn set_online(&self, id: &AccountId, online: bool) {
        if let Some(account) = self.inner.lock().by_id.get_mut(id) {
            account.online = online;
        }
    }

    pub fn online_count(&self) -> usize {
        self.inner.lock().by_id.values().filter(|a| a.online).count()
    }
}
