// src/notify/email.rs
use anyhow::{Context, Result};
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};

use super::Notifier;
use crate::model::AlertNotification;

/// SMTP delivery straight to the guardian's address.
pub struct EmailNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

fn required_env(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("{name} missing"))
}

impl EmailNotifier {
    pub fn from_env() -> Result<Self> {
        let host = required_env("SMTP_HOST")?;
        let user = required_env("SMTP_USER")?;
        let pass = required_env("SMTP_PASS")?;
        let from_addr = required_env("NOTIFY_EMAIL_FROM")?;

        let creds = Credentials::new(user, pass);
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&host)
            .context("invalid SMTP_HOST")?
            .credentials(creds)
            .build();
        let from = from_addr.parse().context("invalid NOTIFY_EMAIL_FROM")?;

        Ok(Self { mailer, from })
    }
}

pub(crate) fn render(alert: &AlertNotification) -> (String, String) {
    let subject = "Wellbeing check-in suggested for your child".to_string();
    let mut body = format!("{}\n\n", alert.summary);
    for (axis, value) in alert.scores.axes() {
        body.push_str(&format!("{axis}: {value:.2}\n"));
    }
    body.push_str(&format!(
        "\nFlagged: {}\nAnalyzed at: {}\n",
        alert.triggered_by.join(", "),
        alert.analyzed_at.to_rfc3339()
    ));
    (subject, body)
}

#[async_trait::async_trait]
impl Notifier for EmailNotifier {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn send(&self, contact: &str, alert: &AlertNotification) -> Result<()> {
        let to: Mailbox = contact.parse().context("invalid guardian address")?;
        let (subject, body) = render(alert);

        let msg = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(header::ContentType::TEXT_PLAIN)
            .body(body)
            .context("build email")?;

        self.mailer.send(msg).await.context("send email")?;
        Ok(())
    }
}
