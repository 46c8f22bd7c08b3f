//! Setup flow for Litter-Robot accounts.
//!
//! Accounts come either from the static configuration (import) or from an
//! interactive user step that checks the credentials against the API first.
//! Only one account can be configured at a time.

use std::collections::BTreeMap;

use tracing::debug;
use tracing::warn;

use super::DOMAIN;
use crate::account::AccountError;
use crate::account::AccountFactory;
use crate::config::AccountConfig;
use crate::engine::entity::slugify;

/// An accepted account.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigEntry {
    pub entry_id: String,
    pub title: String,
    pub data: AccountConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlowResult {
    CreateEntry(ConfigEntry),

    /// Ask for credentials again; `errors["base"]` says why
    ShowForm { errors: BTreeMap<String, String> },

    Abort { reason: String },
}

pub struct ConfigFlow {
    factory: AccountFactory,
    entries: Vec<ConfigEntry>,
}

impl ConfigFlow {
    pub fn new(factory: AccountFactory) -> Self {
        Self {
            factory,
            entries: Vec::new(),
        }
    }

    pub fn entries(&self) -> &[ConfigEntry] {
        &self.entries
    }

    /// Interactive step. Without input the form is shown; with input the
    /// credentials are checked by logging in.
    pub async fn step_user(&mut self, input: Option<AccountConfig>) -> FlowResult {
        if let Some(abort) = self.abort_if_configured() {
            return abort;
        }
        let Some(input) = input else {
            return FlowResult::ShowForm {
                errors: BTreeMap::new(),
            };
        };

        debug!("Attempting to login to Litter-Robot API as {}", input.username);
        let result = match (self.factory)() {
            Ok(account) => account.connect(&input.username, &input.password, false).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                debug!("Successfully logged in");
                self.create_entry(input)
            }
            Err(e) => {
                warn!("Litter-Robot login failed: {}", e);
                let reason = match e {
                    AccountError::Login(_) => "invalid_auth",
                    AccountError::Connection(_) => "cannot_connect",
                    _ => "unknown",
                };
                FlowResult::ShowForm {
                    errors: BTreeMap::from([("base".to_string(), reason.to_string())]),
                }
            }
        }
    }

    /// Step for accounts from the configuration file. Credentials are
    /// checked when the integration logs in during setup.
    pub fn step_import(&mut self, input: AccountConfig) -> FlowResult {
        if let Some(abort) = self.abort_if_configured() {
            return abort;
        }
        self.create_entry(input)
    }

    fn abort_if_configured(&self) -> Option<FlowResult> {
        if self.entries.is_empty() {
            return None;
        }
        Some(FlowResult::Abort {
            reason: "already_configured".to_string(),
        })
    }

    fn create_entry(&mut self, data: AccountConfig) -> FlowResult {
        let entry = ConfigEntry {
            entry_id: format!("{}_{}", DOMAIN, slugify(&data.username)),
            title: data.username.clone(),
            data,
        };
        self.entries.push(entry.clone());
        FlowResult::CreateEntry(entry)
    }
}
