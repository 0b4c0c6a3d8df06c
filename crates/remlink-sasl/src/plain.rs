//! The PLAIN mechanism
//!
//! The client answers the first challenge with
//! `authzid NUL authcid NUL password`; the server checks the password and
//! the authorization, and completes after that single response.

use crate::callback::{answered_name, Callback};
use crate::mechanism::{ClientRequest, MechanismFactory, SaslClient, SaslServer, ServerRequest};
use crate::properties::{QOP, QOP_AUTH};
use crate::{CredentialCallback, Result, SaslError};
use std::sync::Arc;
use tracing::debug;

/// Mechanism name
pub const PLAIN: &str = "PLAIN";

/// Factory for PLAIN clients and servers
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainFactory;

impl MechanismFactory for PlainFactory {
    fn name(&self) -> &str {
        PLAIN
    }

    fn is_plaintext(&self) -> bool {
        true
    }

    fn create_client(&self, request: &ClientRequest<'_>) -> Result<Box<dyn SaslClient>> {
        Ok(Box::new(PlainClient {
            username: request.username.to_string(),
            callback: Arc::clone(&request.callback),
            complete: false,
        }))
    }

    fn create_server(&self, request: &ServerRequest<'_>) -> Result<Box<dyn SaslServer>> {
        Ok(Box::new(PlainServer {
            callback: Arc::clone(&request.callback),
            authorization_id: None,
        }))
    }
}

/// Client half of PLAIN
pub struct PlainClient {
    username: String,
    callback: Arc<dyn CredentialCallback>,
    complete: bool,
}

impl SaslClient for PlainClient {
    fn mechanism_name(&self) -> &str {
        PLAIN
    }

    fn evaluate_challenge(&mut self, _challenge: &[u8]) -> Result<Vec<u8>> {
        if self.complete {
            return Err(SaslError::AlreadyComplete);
        }

        let mut callbacks = [
            Callback::name("Username", Some(self.username.clone())),
            Callback::password("Password"),
        ];
        self.callback.handle(&mut callbacks)?;

        let name = answered_name(&callbacks)
            .ok_or_else(|| SaslError::Callback("no username supplied".to_string()))?
            .to_string();
        let password = match &callbacks[1] {
            Callback::Password { password: Some(password), .. } => password.clone(),
            _ => return Err(SaslError::Callback("no password supplied".to_string())),
        };
        if name.contains('\0') || password.contains('\0') {
            return Err(SaslError::Callback("credentials may not contain NUL".to_string()));
        }

        // Empty authorization identity: act as the authenticated user.
        let mut response = Vec::with_capacity(2 + name.len() + password.len());
        response.push(0);
        response.extend_from_slice(name.as_bytes());
        response.push(0);
        response.extend_from_slice(password.as_bytes());

        self.complete = true;
        Ok(response)
    }

    fn is_complete(&self) -> bool {
        self.complete
    }

    fn negotiated_property(&self, name: &str) -> Option<String> {
        (self.complete && name == QOP).then(|| QOP_AUTH.to_string())
    }
}

/// Server half of PLAIN
pub struct PlainServer {
    callback: Arc<dyn CredentialCallback>,
    authorization_id: Option<String>,
}

impl SaslServer for PlainServer {
    fn mechanism_name(&self) -> &str {
        PLAIN
    }

    fn evaluate_response(&mut self, response: &[u8]) -> Result<Vec<u8>> {
        if self.authorization_id.is_some() {
            return Err(SaslError::AlreadyComplete);
        }

        let fields: Vec<&[u8]> = response.split(|b| *b == 0).collect();
        let [authzid, authcid, password] = fields.as_slice() else {
            return Err(SaslError::Malformed(format!(
                "expected 3 NUL-separated fields, got {}",
                fields.len()
            )));
        };
        let authzid = utf8(authzid, "authorization id")?;
        let authcid = utf8(authcid, "authentication id")?;
        let password = utf8(password, "password")?;
        if authcid.is_empty() {
            return Err(SaslError::Malformed("empty authentication id".to_string()));
        }

        let mut callbacks = [
            Callback::name("Username", Some(authcid.to_string())),
            Callback::password("Password"),
        ];
        self.callback.handle(&mut callbacks)?;
        let verified = match &callbacks[1] {
            Callback::Password { password: Some(expected), .. } => {
                constant_time_eq(expected.as_bytes(), password.as_bytes())
            }
            _ => false,
        };
        if !verified {
            debug!("PLAIN credentials refused for {}", authcid);
            return Err(SaslError::AuthenticationFailed("invalid username or password".to_string()));
        }

        let authorization_id = if authzid.is_empty() { authcid } else { authzid };
        let mut authorize = [Callback::authorize(authcid, authorization_id)];
        self.callback.handle(&mut authorize)?;
        if !matches!(authorize[0], Callback::Authorize { authorized: true, .. }) {
            return Err(SaslError::AuthenticationFailed(format!(
                "{} may not act as {}",
                authcid, authorization_id
            )));
        }

        self.authorization_id = Some(authorization_id.to_string());
        Ok(Vec::new())
    }

    fn is_complete(&self) -> bool {
        self.authorization_id.is_some()
    }

    fn authorization_id(&self) -> Option<&str> {
        self.authorization_id.as_deref()
    }

    fn negotiated_property(&self, name: &str) -> Option<String> {
        (self.is_complete() && name == QOP).then(|| QOP_AUTH.to_string())
    }
}

fn utf8<'a>(bytes: &'a [u8], field: &str) -> Result<&'a str> {
    std::str::from_utf8(bytes).map_err(|_| SaslError::Malformed(format!("{} is not UTF-8", field)))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
