// Volunteer login.
//
// The stored credential is the base64 text of the password, not a hash: anyone
// reading the volunteers table can recover every password. Kept only for
// compatibility with the existing table, and must be replaced by a real password
// hash on the backend side.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use std::time::Duration;

use crate::sync::backend::{Backend, VolunteerRecord};
use crate::sync::*;

pub const MIN_PASSWORD_LEN: usize = 4;

/// Trims and checks the login fields before anything is sent to the backend.
pub fn validate_login_input(code: &str, password: &str) -> SyncResult<(String, String)> {
    let code = code.trim();
    let password = password.trim();
    if code.is_empty() || password.is_empty() {
        return InvalidInputSnafu {
            message: "please fill in the code and the password",
        }
        .fail();
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return InvalidInputSnafu {
            message: format!("the password must have at least {} characters", MIN_PASSWORD_LEN),
        }
        .fail();
    }
    Ok((code.to_string(), password.to_string()))
}

/// Decodes a stored credential. None for blank or malformed values.
pub fn decode_stored_password(encoded: &str) -> Option<String> {
    let encoded = encoded.trim();
    if encoded.is_empty() {
        return None;
    }
    let bytes = B64.decode(encoded).ok()?;
    String::from_utf8(bytes).ok()
}

pub struct CredentialVerifier<'a> {
    backend: &'a dyn Backend,
    connect_timeout: Duration,
}

impl<'a> CredentialVerifier<'a> {
    pub fn new(backend: &'a dyn Backend, connect_timeout: Duration) -> CredentialVerifier<'a> {
        CredentialVerifier {
            backend,
            connect_timeout,
        }
    }

    /// Fails with the connectivity error if the backend cannot be reached in time.
    pub async fn check_connectivity(&self) -> SyncResult<()> {
        match tokio::time::timeout(self.connect_timeout, self.backend.ping()).await {
            Ok(res) => res.context(ConnectivitySnafu {}),
            Err(_) => Err(SyncError::Connectivity {
                source: BackendError::Timeout {
                    seconds: self.connect_timeout.as_secs(),
                },
            }),
        }
    }

    /// Looks up the active volunteer and compares the password.
    ///
    /// Every failure gives the same error, whatever the reason.
    pub async fn verify(&self, code: &str, password: &str) -> SyncResult<VolunteerRecord> {
        let (code, password) = validate_login_input(code, password)?;

        let record = match self.backend.find_active_volunteer(&code).await {
            Ok(Some(r)) => r,
            Ok(None) => {
                info!("verify: no active volunteer with code {:?}", code);
                return AuthenticationFailedSnafu {}.fail();
            }
            Err(e) => {
                error!("verify: volunteer lookup failed: {}", e);
                return AuthenticationFailedSnafu {}.fail();
            }
        };

        if !record.is_active || record.code != code {
            info!("verify: volunteer {:?} is not active", code);
            return AuthenticationFailedSnafu {}.fail();
        }

        let stored = match record.password_hash.as_deref().and_then(decode_stored_password) {
            Some(s) => s,
            None => {
                info!("verify: volunteer {:?} has no usable stored password", code);
                return AuthenticationFailedSnafu {}.fail();
            }
        };

        if stored.as_bytes() != password.as_bytes() {
            info!("verify: wrong password for volunteer {:?}", code);
            return AuthenticationFailedSnafu {}.fail();
        }

        debug!("verify: volunteer {:?} authenticated", code);
        Ok(record)
    }

    /// The whole login: input checks, connectivity, then credentials.
    pub async fn login(&self, code: &str, password: &str) -> SyncResult<VolunteerRecord> {
        validate_login_input(code, password)?;
        self.check_connectivity().await?;
        self.verify(code, password).await
    }
}
