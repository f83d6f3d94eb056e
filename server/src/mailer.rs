//! Transactional email for signup and password-reset codes.

use reqwest::Client;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("mail api rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },
}

#[derive(Clone, Debug)]
pub struct MailApiConfig {
    pub api_url: String,
    pub api_key: String,
    pub sender: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Template {
    SignupOtp,
    ResetPassword,
}

impl Template {
    pub fn subject(&self) -> &'static str {
        match self {
            Template::SignupOtp => "Verify OTP to Sign up",
            Template::ResetPassword => "Reset your apnasquad password",
        }
    }

    fn body(&self) -> &'static str {
        match self {
            Template::SignupOtp => {
                "<p>Hi {{name}},</p>\
                 <p>Your apnasquad verification code is <strong>{{otp}}</strong>.</p>\
                 <p>The code expires in 10 minutes.</p>"
            }
            Template::ResetPassword => {
                "<p>Use <strong>{{otp}}</strong> to reset your apnasquad password.</p>\
                 <p>The code expires in 5 minutes. Ignore this email if you did not ask for it.</p>"
            }
        }
    }

    /// Fills `{{key}}` placeholders; unknown keys render empty.
    pub fn render(&self, values: &HashMap<&str, String>) -> String {
        let mut out = String::new();
        let mut rest = self.body();
        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find("}}") else {
                out.push_str(&rest[start..]);
                return out;
            };
            if let Some(value) = values.get(after[..end].trim()) {
                out.push_str(value);
            }
            rest = &after[end + 2..];
        }
        out.push_str(rest);
        out
    }
}

#[derive(Clone, Debug, Serialize)]
struct OutgoingMail<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html: &'a str,
}

#[cfg(test)]
#[derive(Clone, Debug)]
pub struct SentMail {
    pub to: String,
    pub template: Template,
    pub values: HashMap<String, String>,
}

pub enum Mailer {
    Api { client: Client, config: MailApiConfig },
    /// Logs the message instead of sending it; used when no mail API is configured.
    Log,
    #[cfg(test)]
    Outbox(std::sync::Mutex<Vec<SentMail>>),
}

impl Mailer {
    pub fn api(config: MailApiConfig) -> Result<Self, MailError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Mailer::Api { client, config })
    }

    pub async fn send(
        &self,
        to: &str,
        template: Template,
        values: HashMap<&str, String>,
    ) -> Result<(), MailError> {
        match self {
            Mailer::Api { client, config } => {
                let html = template.render(&values);
                let response = client
                    .post(&config.api_url)
                    .bearer_auth(&config.api_key)
                    .json(&OutgoingMail {
                        from: &config.sender,
                        to,
                        subject: template.subject(),
                        html: &html,
                    })
                    .send()
                    .await?;
                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(MailError::Rejected {
                        status: status.as_u16(),
                        body,
                    });
                }
                tracing::info!(to, subject = template.subject(), "mail sent");
                Ok(())
            }
            Mailer::Log => {
                tracing::info!(
                    to,
                    subject = template.subject(),
                    body = %template.render(&values),
                    "mail api not configured; logging message"
                );
                Ok(())
            }
            #[cfg(test)]
            Mailer::Outbox(outbox) => {
                if let Ok(mut outbox) = outbox.lock() {
                    outbox.push(SentMail {
                        to: to.to_string(),
                        template,
                        values: values
                            .into_iter()
                            .map(|(key, value)| (key.to_string(), value))
                            .collect(),
                    });
                }
                Ok(())
            }
        }
    }

    #[cfg(test)]
    pub fn last_value(&self, to: &str, key: &str) -> Option<String> {
        match self {
            Mailer::Outbox(outbox) => outbox.lock().ok().and_then(|outbox| {
                outbox
                    .iter()
                    .rev()
                    .find(|mail| mail.to == to)
                    .and_then(|mail| mail.values.get(key).cloned())
            }),
            _ => None,
        }
    }
}
