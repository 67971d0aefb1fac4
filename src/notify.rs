//! Completion notices: an in-app message, then an optional email.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::MailConfig;
use crate::db::Database;
use crate::error::AppResult;
use crate::models::{Message, NewMessage, User};

pub const EXPORT_FINISHED_SUBJECT: &str = "CSV Export Finished";
pub const EXPORT_FINISHED_BODY: &str = "This message is to let you know that the CSV export you began has finished. \
You can go back to the View Finished Exports page to download it.";

#[derive(Debug, Serialize)]
struct OutgoingMail<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
}

/// Client for an HTTP mail relay.
#[derive(Debug, Clone)]
pub struct Mailer {
    client: reqwest::Client,
    endpoint: Url,
    from: String,
    api_key: Option<String>,
}

impl Mailer {
    pub fn new(endpoint: Url, from: impl Into<String>, api_key: Option<String>) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            endpoint,
            from: from.into(),
            api_key,
        })
    }

    /// `None` when the relay is not fully configured.
    pub fn from_config(config: Option<&MailConfig>) -> AppResult<Option<Self>> {
        match config {
            Some(mail) if mail.is_configured() => match &mail.endpoint {
                Some(endpoint) => Ok(Some(Self::new(
                    endpoint.clone(),
                    mail.from.clone(),
                    mail.api_key.clone().filter(|key| !key.is_empty()),
                )?)),
                None => Ok(None),
            },
            _ => Ok(None),
        }
    }

    #[instrument(skip(self, text))]
    pub async fn send(&self, to: &str, subject: &str, text: &str) -> AppResult<()> {
        let mail = OutgoingMail {
            from: &self.from,
            to,
            subject,
            text,
        };
        let mut request = self.client.post(self.endpoint.clone()).json(&mail);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        request.send().await?.error_for_status()?;
        debug!("mail accepted by relay");
        Ok(())
    }
}

/// Tell `user` their export is ready.
///
/// The in-app message is always written. Email follows only with a mailer
/// and an address on file; its failure is logged and does not fail the call.
#[instrument(skip(db, mailer, user, now), fields(user_id = user.id))]
pub async fn notify_export_finished(
    db: &Database,
    mailer: Option<&Mailer>,
    user: &User,
    now: DateTime<Utc>,
) -> AppResult<Message> {
    let message = db
        .insert_message(
            &NewMessage {
                subject: EXPORT_FINISHED_SUBJECT.to_string(),
                content: EXPORT_FINISHED_BODY.to_string(),
                sender_id: None,
                recipient_id: user.id,
            },
            now,
        )
        .await?;

    match (mailer, user.email.as_deref().filter(|e| !e.is_empty())) {
        (Some(mailer), Some(address)) => {
            match mailer
                .send(address, EXPORT_FINISHED_SUBJECT, EXPORT_FINISHED_BODY)
                .await
            {
                Ok(()) => info!("export notice emailed"),
                Err(e) => warn!(error = %e, "export notice email failed"),
            }
        }
        (None, _) => debug!("mail not configured, skipping email"),
        (Some(_), None) => debug!("user has no email address, skipping email"),
    }

    Ok(message)
}
