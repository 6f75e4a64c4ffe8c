//! Shoutrrr-compatible service URLs:
//! `service://[user[:pass]@]host[:port][/path][?k=v&...]`.

use crate::notify::NotifyError;
use std::collections::HashMap;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    Slack,
    Discord,
    Smtp,
    Webhook,
}

#[derive(Debug, Clone)]
pub struct ServiceUrl {
    pub kind: ServiceKind,
    pub user: Option<String>,
    pub password: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    pub path: String,
    pub params: HashMap<String, String>,
}

impl ServiceUrl {
    pub fn parse(raw: &str) -> Result<Self, NotifyError> {
        let parsed = Url::parse(raw)
            .map_err(|err| NotifyError::Parse(format!("'{raw}': {err}")))?;

        // Unknown services fall back to the generic webhook dispatcher.
        let kind = match parsed.scheme() {
            "slack" => ServiceKind::Slack,
            "discord" => ServiceKind::Discord,
            "smtp" | "email" => ServiceKind::Smtp,
            "webhook" | "generic" => ServiceKind::Webhook,
            _ => ServiceKind::Webhook,
        };

        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| NotifyError::Parse(format!("'{raw}' has no host")))?
            .to_string();

        let user = Some(parsed.username())
            .filter(|u| !u.is_empty())
            .map(str::to_string);
        let password = parsed.password().map(str::to_string);
        let params = parsed
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        Ok(Self {
            kind,
            user,
            password,
            host,
            port: parsed.port(),
            path: parsed.path().to_string(),
            params,
        })
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}
