use std::sync::Arc;

use database_adapter::{
    LedgerStore,
    model::{NewUser, UserId, UserRecord},
};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::PortfolioError;

pub const MIN_PASSWORD_LENGTH: usize = 6;

#[must_use]
pub fn hash_password(password: &str) -> String {
    format!("{:x}", Sha256::digest(password.as_bytes()))
}

#[must_use]
pub fn verify_password(password: &str, password_hash: &str) -> bool {
    hash_password(password) == password_hash
}

fn validate_password(password: &str) -> Result<(), PortfolioError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(PortfolioError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), PortfolioError> {
    let valid = email.split_once('@').is_some_and(|(local, domain)| {
        !local.is_empty()
            && !domain.contains('@')
            && domain
                .split_once('.')
                .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty())
    });
    if valid && !email.contains(char::is_whitespace) {
        Ok(())
    } else {
        Err(PortfolioError::Validation(format!("invalid email '{email}'")))
    }
}

/// Signup, login and password management on top of the ledger's user table
#[derive(Debug, Clone)]
pub struct UserService {
    ledger: Arc<dyn LedgerStore>,
}

impl UserService {
    #[must_use]
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self { ledger }
    }

    /// Creates a new user with the given details
    ///
    /// # Errors
    /// - `Validation` for an empty username, a malformed email or a weak password
    /// - `Conflict` if the username or email is already taken
    pub async fn signup(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<UserId, PortfolioError> {
        let username = username.trim();
        let email = email.trim();
        if username.is_empty() {
            return Err(PortfolioError::Validation("username must not be empty".into()));
        }
        validate_email(email)?;
        validate_password(password)?;

        let user_id = self
            .ledger
            .create_user(NewUser {
                username: username.to_string(),
                email: email.to_string(),
                password_hash: hash_password(password),
            })
            .await?;
        info!("Created user {username} ({user_id})");
        Ok(user_id)
    }

    /// Authenticates a user by username or email and password
    ///
    /// # Errors
    /// - `Unauthenticated` for an unknown login or a wrong password
    pub async fn authenticate(
        &self,
        login: &str,
        password: &str,
    ) -> Result<UserRecord, PortfolioError> {
        match self.ledger.find_user(login.trim()).await? {
            Some(user) if verify_password(password, &user.password_hash) => Ok(user),
            Some(user) => {
                warn!("Wrong password for user {}", user.id);
                Err(PortfolioError::Unauthenticated)
            }
            None => Err(PortfolioError::Unauthenticated),
        }
    }

    /// # Errors
    /// - `NotFound` if the user does not exist
    pub async fn get(&self, user_id: UserId) -> Result<UserRecord, PortfolioError> {
        self.ledger
            .get_user(&user_id)
            .await?
            .ok_or_else(|| PortfolioError::NotFound(format!("user {user_id}")))
    }

    /// # Errors
    /// - `Unauthenticated` if `current_password` does not match
    /// - `Validation` if `new_password` is too weak
    pub async fn change_password(
        &self,
        user_id: UserId,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), PortfolioError> {
        let user = self.get(user_id).await?;
        if !verify_password(current_password, &user.password_hash) {
            return Err(PortfolioError::Unauthenticated);
        }
        validate_password(new_password)?;
        self.ledger
            .update_password_hash(&user_id, hash_password(new_password))
            .await?;
        info!("Password changed for user {user_id}");
        Ok(())
    }
}
