// SPDX-License-Identifier: MIT

//! Application configuration
//!
//! Values come from an optional YAML (or JSON) file, then environment
//! variables override them. Command-line flags override both in `main`.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::capability::{Alerter, NullAlerter, TwilioAlerter};
use crate::error::FlowError;

/// Twilio credentials and phone numbers
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SmsConfig {
    pub account_sid: String,
    pub auth_token: String,
    #[serde(alias = "from_")]
    pub from: String,
    pub to: String,
}

impl SmsConfig {
    /// Read `TWILIO_ACCOUNT_SID`, `TWILIO_AUTH_TOKEN`, `TWILIO_FROM` and
    /// `TWILIO_TO`; all four must be set
    pub fn from_env() -> Option<Self> {
        Some(Self {
            account_sid: env::var("TWILIO_ACCOUNT_SID").ok()?,
            auth_token: env::var("TWILIO_AUTH_TOKEN").ok()?,
            from: env::var("TWILIO_FROM").ok()?,
            to: env::var("TWILIO_TO").ok()?,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct AppConfig {
    /// SQLite database file
    #[serde(default)]
    pub database: Option<PathBuf>,
    #[serde(default)]
    pub sms: Option<SmsConfig>,
}

impl AppConfig {
    /// Load from an optional file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, FlowError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, FlowError> {
        let content = fs::read_to_string(path)
            .map_err(|e| FlowError::config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::parse(&content)
    }

    /// Parse YAML; JSON documents are accepted as well
    pub fn parse(content: &str) -> Result<Self, FlowError> {
        Ok(serde_yaml::from_str(content)?)
    }

    fn apply_env(&mut self) {
        if let Ok(database) = env::var("STEPFLOW_DATABASE") {
            self.database = Some(PathBuf::from(database));
        }
        if let Some(sms) = SmsConfig::from_env() {
            self.sms = Some(sms);
        }
    }

    /// Build the alerter for failure reports
    pub fn alerter(&self) -> Arc<dyn Alerter> {
        match &self.sms {
            Some(sms) => match TwilioAlerter::new(sms.clone()) {
                Ok(alerter) => Arc::new(alerter),
                Err(e) => {
                    log::warn!("Cannot build SMS alerter ({}); alerts disabled", e);
                    Arc::new(NullAlerter)
                }
            },
            None => {
                log::warn!("No SMS configuration found; failure alerts will not be sent");
                Arc::new(NullAlerter)
            }
        }
    }
}
