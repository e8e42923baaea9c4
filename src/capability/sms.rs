// SPDX-License-Identifier: MIT

//! SMS alerting through the Twilio Messages API

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use super::{AlertError, Alerter};
use crate::config::SmsConfig;

const TWILIO_API: &str = "https://api.twilio.com/2010-04-01";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct MessageResponse {
    sid: String,
}

pub struct TwilioAlerter {
    client: Client,
    config: SmsConfig,
    base_url: String,
}

impl TwilioAlerter {
    pub fn new(config: SmsConfig) -> Result<Self, AlertError> {
        Self::with_timeout(config, REQUEST_TIMEOUT)
    }

    /// Build an alerter whose requests fail after `timeout`
    pub fn with_timeout(config: SmsConfig, timeout: Duration) -> Result<Self, AlertError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            config,
            base_url: TWILIO_API.to_string(),
        })
    }

    /// Point the alerter at another API root
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/Accounts/{}/Messages.json",
            self.base_url.trim_end_matches('/'),
            self.config.account_sid
        )
    }
}

#[async_trait]
impl Alerter for TwilioAlerter {
    async fn notify(&self, message: &str) -> Result<(), AlertError> {
        let resp = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&[
                ("To", self.config.to.as_str()),
                ("From", self.config.from.as_str()),
                ("Body", message),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await?;
            return Err(AlertError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let sent: MessageResponse = resp.json().await?;
        log::info!("SMS sent: {}", sent.sid);
        Ok(())
    }
}

/// Alerter used when no SMS configuration is available; every alert fails
/// with `NotConfigured`
#[derive(Debug, Default, Clone)]
pub struct NullAlerter;

#[async_trait]
impl Alerter for NullAlerter {
    async fn notify(&self, _message: &str) -> Result<(), AlertError> {
        Err(AlertError::NotConfigured)
    }
}
