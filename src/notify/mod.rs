pub mod smtp;
pub mod url;

use crate::update::events::UpdateEvent;
use crate::update::session::SessionReport;
use self::smtp::MailMessage;
use self::url::{ServiceKind, ServiceUrl};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("invalid notification URL {0}")]
    Parse(String),
    #[error("notification endpoint answered HTTP {0}")]
    Endpoint(u16),
    #[error("notification transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("smtp delivery failed: {0}")]
    Smtp(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The closed set of notification dispatchers.
///
/// Construction happens once at startup from Shoutrrr-compatible URLs;
/// sending is fire-and-forget from the event sink's point of view.
#[derive(Debug, Clone)]
pub enum Notifier {
    Slack {
        endpoint: String,
    },
    Discord {
        endpoint: String,
    },
    Smtp {
        host: String,
        port: u16,
        user: Option<String>,
        password: Option<String>,
        from: String,
        to: Vec<String>,
    },
    Webhook {
        endpoint: String,
    },
}

impl Notifier {
    pub fn from_url(raw: &str) -> Result<Self, NotifyError> {
        let service = ServiceUrl::parse(raw)?;
        match service.kind {
            ServiceKind::Slack => Ok(Self::Slack {
                endpoint: http_endpoint(&service),
            }),
            ServiceKind::Discord => {
                // discord://<token>@<webhook-id>
                let token = service.user.clone().ok_or_else(|| {
                    NotifyError::Parse(format!("'{raw}' is missing the webhook token"))
                })?;
                Ok(Self::Discord {
                    endpoint: format!(
                        "https://discord.com/api/webhooks/{}/{}",
                        service.host, token
                    ),
                })
            }
            ServiceKind::Smtp => {
                let to: Vec<String> = service
                    .param("to")
                    .map(|to| to.split(',').map(str::trim).map(String::from).collect())
                    .unwrap_or_default();
                if to.is_empty() {
                    return Err(NotifyError::Parse(format!(
                        "'{raw}' is missing the to= recipient parameter"
                    )));
                }
                Ok(Self::Smtp {
                    from: service
                        .param("from")
                        .map(String::from)
                        .unwrap_or_else(|| format!("watchz@{}", service.host)),
                    host: service.host,
                    port: service.port.unwrap_or(25),
                    user: service.user,
                    password: service.password,
                    to,
                })
            }
            ServiceKind::Webhook => Ok(Self::Webhook {
                endpoint: http_endpoint(&service),
            }),
        }
    }

    pub async fn send_event(
        &self,
        http: &reqwest::Client,
        event: &UpdateEvent,
    ) -> Result<(), NotifyError> {
        self.send_text(http, "watchz update event", &event.render())
            .await
    }

    pub async fn send_report(
        &self,
        http: &reqwest::Client,
        report: &SessionReport,
    ) -> Result<(), NotifyError> {
        let mut body = report.summary();
        for result in &report.results {
            body.push_str(&format!(
                "\n- {} [{}]{}",
                result.container_name,
                result.outcome,
                result
                    .error
                    .as_deref()
                    .map(|e| format!(": {e}"))
                    .unwrap_or_default()
            ));
        }
        self.send_text(http, "watchz scan report", &body).await
    }

    async fn send_text(
        &self,
        http: &reqwest::Client,
        subject: &str,
        body: &str,
    ) -> Result<(), NotifyError> {
        match self {
            Self::Slack { endpoint } => {
                post_json(http, endpoint, &json!({ "text": body })).await
            }
            Self::Discord { endpoint } => {
                post_json(http, endpoint, &json!({ "content": body })).await
            }
            Self::Webhook { endpoint } => {
                post_json(
                    http,
                    endpoint,
                    &json!({ "title": subject, "message": body }),
                )
                .await
            }
            Self::Smtp {
                host,
                port,
                user,
                password,
                from,
                to,
            } => {
                let auth = match (user, password) {
                    (Some(user), Some(password)) => Some((user.as_str(), password.as_str())),
                    _ => None,
                };
                smtp::send_mail(
                    host,
                    *port,
                    auth,
                    MailMessage {
                        from,
                        to,
                        subject,
                        body,
                    },
                )
                .await
            }
        }
    }
}

async fn post_json(
    http: &reqwest::Client,
    endpoint: &str,
    payload: &serde_json::Value,
) -> Result<(), NotifyError> {
    let response = http.post(endpoint).json(payload).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(NotifyError::Endpoint(status.as_u16()));
    }
    debug!(endpoint, "Notification delivered");
    Ok(())
}

/// Rebuild the target URL with a real scheme. `?insecure=true` downgrades
/// to plain http, for relays on the local network and for tests.
fn http_endpoint(service: &ServiceUrl) -> String {
    let scheme = match service.param("insecure") {
        Some("true") | Some("yes") | Some("1") => "http",
        _ => "https",
    };
    let port = service
        .port
        .map(|p| format!(":{p}"))
        .unwrap_or_default();
    format!("{scheme}://{}{}{}", service.host, port, service.path)
}
