//! Best-effort email delivery for notifications.
//!
//! Sending happens on a detached task so the request that triggered the
//! notification never waits on SMTP. Failures are logged and otherwise
//! ignored; the in-system notification row already exists either way.

use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use sea_orm::{ActiveModelTrait, ActiveValue::Set, DatabaseConnection, EntityTrait};

use crate::config::SmtpConfig;
use crate::db::entities::{notification, user};
use crate::db::now_ts;

/// Outbound mail sender. With no SMTP config this is a no-op.
#[derive(Clone, Default)]
pub struct Mailer {
    smtp: Option<SmtpConfig>,
    site_url: String,
}

impl Mailer {
    pub fn new(smtp: Option<SmtpConfig>, site_url: String) -> Self {
        Self { smtp, site_url }
    }

    /// No-op mailer for tests and email-disabled deployments.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Queue an email for the given notification. Returns immediately; the
    /// send and the email_sent bookkeeping happen on a background task.
    pub fn dispatch(&self, db: DatabaseConnection, recipient: user::Model, row: notification::Model) {
        let Some(smtp) = self.smtp.clone() else {
            return;
        };
        if recipient.email.is_empty() || !recipient.email_notifications {
            return;
        }
        let site_url = self.site_url.clone();

        tokio::spawn(async move {
            let subject = row.title.clone();
            let body = if row.link.is_empty() {
                row.message.clone()
            } else {
                format!("{}\n\n{}{}", row.message, site_url, row.link)
            };
            let to = recipient.email.clone();

            let sent = tokio::task::spawn_blocking(move || send_plain(&smtp, &to, &subject, &body))
                .await
                .unwrap_or(false);

            if sent {
                let update = notification::ActiveModel {
                    id: Set(row.id),
                    email_sent: Set(true),
                    email_sent_at: Set(Some(now_ts())),
                    ..Default::default()
                };
                if let Err(e) = notification::Entity::update(update).exec(&db).await {
                    tracing::warn!("failed to mark notification {} as emailed: {e}", row.id);
                }
            }
        });
    }
}

fn send_plain(smtp: &SmtpConfig, to: &str, subject: &str, body: &str) -> bool {
    let from: Mailbox = match smtp.from.parse() {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!("invalid smtp from address {}: {e}", smtp.from);
            return false;
        }
    };
    let to: Mailbox = match to.parse() {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!("invalid recipient address {to}: {e}");
            return false;
        }
    };

    let message = match Message::builder()
        .from(from)
        .to(to)
        .subject(subject)
        .body(body.to_string())
    {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!("failed to build email: {e}");
            return false;
        }
    };

    let mut builder = SmtpTransport::builder_dangerous(&smtp.host).port(smtp.port);
    if let (Some(username), Some(password)) = (&smtp.username, &smtp.password) {
        builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
    }
    let transport = builder.build();

    match transport.send(&message) {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!("email send failed: {e}");
            false
        }
    }
}
