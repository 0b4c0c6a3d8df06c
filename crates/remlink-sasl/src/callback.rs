//! Credential prompts and callback handlers
//!
//! Mechanisms never see configuration directly. They describe what they need
//! as a batch of [`Callback`] prompts and hand the batch to the application's
//! [`CredentialCallback`], which fills in the answers.

use crate::{Result, SaslError};
use std::collections::HashMap;

/// One credential prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callback {
    /// Ask for an identity
    Name {
        /// Prompt text
        prompt: String,
        /// Identity to use when the handler has no better answer
        default: Option<String>,
        /// Answer
        name: Option<String>,
    },
    /// Ask for the secret of the identity named in the same batch
    Password {
        /// Prompt text
        prompt: String,
        /// Answer
        password: Option<String>,
    },
    /// Ask whether an authenticated identity may act as an authorization identity
    Authorize {
        /// Identity whose credentials were verified
        authentication_id: String,
        /// Identity requested for authorization
        authorization_id: String,
        /// Answer
        authorized: bool,
    },
}

impl Callback {
    /// Identity prompt with a default answer
    pub fn name(prompt: impl Into<String>, default: Option<String>) -> Self {
        Self::Name {
            prompt: prompt.into(),
            default,
            name: None,
        }
    }

    /// Secret prompt
    pub fn password(prompt: impl Into<String>) -> Self {
        Self::Password {
            prompt: prompt.into(),
            password: None,
        }
    }

    /// Authorization check
    pub fn authorize(authentication_id: impl Into<String>, authorization_id: impl Into<String>) -> Self {
        Self::Authorize {
            authentication_id: authentication_id.into(),
            authorization_id: authorization_id.into(),
            authorized: false,
        }
    }
}

/// Application hook answering credential prompts
pub trait CredentialCallback: Send + Sync {
    /// Answer every prompt in the batch, or fail
    fn handle(&self, callbacks: &mut [Callback]) -> Result<()>;
}

impl<F> CredentialCallback for F
where
    F: Fn(&mut [Callback]) -> Result<()> + Send + Sync,
{
    fn handle(&self, callbacks: &mut [Callback]) -> Result<()> {
        self(callbacks)
    }
}

/// Identity answered by the first `Name` prompt of a batch
pub fn answered_name(callbacks: &[Callback]) -> Option<&str> {
    callbacks.iter().find_map(|callback| match callback {
        Callback::Name { name, default, .. } => name.as_deref().or(default.as_deref()),
        _ => None,
    })
}

fn authorize_same_identity(authentication_id: &str, authorization_id: &str) -> bool {
    authorization_id.is_empty() || authorization_id == authentication_id
}

/// Handler with no secrets: accepts defaults and refuses password prompts
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCredentials;

impl CredentialCallback for NoCredentials {
    fn handle(&self, callbacks: &mut [Callback]) -> Result<()> {
        for callback in callbacks.iter_mut() {
            match callback {
                Callback::Name { default, name, .. } => *name = default.clone(),
                Callback::Password { .. } => return Err(SaslError::UnsupportedCallback("password")),
                Callback::Authorize {
                    authentication_id,
                    authorization_id,
                    authorized,
                } => *authorized = authorize_same_identity(authentication_id, authorization_id),
            }
        }
        Ok(())
    }
}

/// Client-side handler answering with a fixed identity and secret
#[derive(Debug, Clone, Default)]
pub struct ClientCredentials {
    username: Option<String>,
    password: Option<String>,
}

impl ClientCredentials {
    /// Use the mechanism's default identity with this secret
    pub fn password(password: impl Into<String>) -> Self {
        Self {
            username: None,
            password: Some(password.into()),
        }
    }

    /// Use a fixed identity and secret
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }
}

impl CredentialCallback for ClientCredentials {
    fn handle(&self, callbacks: &mut [Callback]) -> Result<()> {
        for callback in callbacks.iter_mut() {
            match callback {
                Callback::Name { default, name, .. } => {
                    *name = self.username.clone().or_else(|| default.clone());
                }
                Callback::Password { password, .. } => match &self.password {
                    Some(secret) => *password = Some(secret.clone()),
                    None => return Err(SaslError::UnsupportedCallback("password")),
                },
                Callback::Authorize { .. } => return Err(SaslError::UnsupportedCallback("authorize")),
            }
        }
        Ok(())
    }
}

/// Server-side handler backed by an in-memory user table
#[derive(Debug, Clone, Default)]
pub struct PasswordDatabase {
    users: HashMap<String, String>,
}

impl PasswordDatabase {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a user
    pub fn with_user(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.users.insert(username.into(), password.into());
        self
    }

    /// Number of known users
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether the table has no users
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl FromIterator<(String, String)> for PasswordDatabase {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            users: iter.into_iter().collect(),
        }
    }
}

impl CredentialCallback for PasswordDatabase {
    fn handle(&self, callbacks: &mut [Callback]) -> Result<()> {
        let identity = answered_name(callbacks).map(str::to_owned);
        for callback in callbacks.iter_mut() {
            match callback {
                Callback::Name { default, name, .. } => *name = default.clone(),
                // Unknown users get no password; the mechanism refuses them.
                Callback::Password { password, .. } => {
                    *password = identity.as_ref().and_then(|user| self.users.get(user).cloned());
                }
                Callback::Authorize {
                    authentication_id,
                    authorization_id,
                    authorized,
                } => *authorized = authorize_same_identity(authentication_id, authorization_id),
            }
        }
        Ok(())
    }
}
