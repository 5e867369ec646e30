//! Scan requests as received at the system boundary.
//!
//! [`ScanRequestBody`] is the raw wire shape; [`ScanRequest`] is the
//! validated, immutable value passed by reference through the pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::id::VmId;

/// Hypervisor management-plane credentials.
///
/// `Debug` redacts the password so requests can be logged safely.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Management endpoint host name or address.
    pub hostname: String,
    /// Login user.
    pub username: String,
    /// Login password.
    pub password: String,
    /// TLS certificate thumbprint of the host, handed to the export worker.
    pub fingerprint: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("hostname", &self.hostname)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

impl Credentials {
    fn validate(&self) -> Result<(), CoreError> {
        for (field, value) in [
            ("authentication.hostname", &self.hostname),
            ("authentication.username", &self.username),
            ("authentication.fingerprint", &self.fingerprint),
        ] {
            if value.trim().is_empty() {
                return Err(CoreError::InvalidRequest {
                    field: field.to_owned(),
                    reason: "must not be empty".to_owned(),
                });
            }
        }
        Ok(())
    }
}

/// JSON body accepted by the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct ScanRequestBody {
    pub vm_uuid: String,
    pub authentication: Credentials,
    /// Optional reference into an external inventory provider.
    #[serde(default)]
    pub provider: Option<String>,
}

/// A validated inventory request for one virtual machine.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ScanRequest {
    /// The VM to inventory.
    pub vm_id: VmId,
    /// Credentials for the hypervisor that hosts the VM.
    pub credentials: Credentials,
    /// Inventory-provider reference, carried through for correlation only.
    pub provider: Option<String>,
}

impl ScanRequest {
    /// Builds a validated request.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidRequest`] if the VM identifier is not a
    /// usable path component or a mandatory credential field is blank.
    pub fn new(vm_id: impl Into<String>, credentials: Credentials) -> Result<Self, CoreError> {
        let vm_id = VmId::new(vm_id)?;
        credentials.validate()?;
        Ok(Self { vm_id, credentials, provider: None })
    }

    /// Attaches an inventory-provider reference.
    #[must_use]
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }
}

impl TryFrom<ScanRequestBody> for ScanRequest {
    type Error = CoreError;

    fn try_from(body: ScanRequestBody) -> Result<Self, Self::Error> {
        let request = Self::new(body.vm_uuid, body.authentication)?;
        Ok(match body.provider {
            Some(provider) => request.with_provider(provider),
            None => request,
        })
    }
}
