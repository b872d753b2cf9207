//! Email service for delivering one-time login codes.

use lettre::{
    AsyncFileTransport, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use std::path::Path;

use crate::{config::Config, errors::Error};

pub struct EmailService {
    transport: EmailTransport,
    from_email: String,
    from_name: String,
    reply_to: Option<String>,
}

enum EmailTransport {
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    File(AsyncFileTransport<Tokio1Executor>),
}

impl EmailService {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let email_config = &config.email;

        let transport = match &email_config.transport {
            crate::config::EmailTransportConfig::Smtp {
                host,
                port,
                username,
                password,
                use_tls,
            } => {
                // Use SMTP transport
                if !use_tls {
                    tracing::warn!("SMTP TLS is disabled - this is not recommended for production");
                }

                let mut smtp_builder = if *use_tls {
                    AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                } else {
                    Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host))
                }
                .map_err(|e| Error::Internal {
                    operation: format!("create SMTP transport: {e}"),
                })?
                .port(*port);

                if let (Some(username), Some(password)) = (username, password) {
                    smtp_builder = smtp_builder.credentials(Credentials::new(username.clone(), password.clone()));
                }

                EmailTransport::Smtp(smtp_builder.build())
            }
            crate::config::EmailTransportConfig::File { path } => {
                // Use file transport for development/testing
                let emails_dir = Path::new(path);
                if !emails_dir.exists() {
                    std::fs::create_dir_all(emails_dir).map_err(|e| Error::Internal {
                        operation: format!("create emails directory: {e}"),
                    })?;
                }
                let file_transport = AsyncFileTransport::<Tokio1Executor>::new(emails_dir);
                EmailTransport::File(file_transport)
            }
        };

        Ok(Self {
            transport,
            from_email: email_config.from_email.clone(),
            from_name: email_config.from_name.clone(),
            reply_to: email_config.reply_to.clone(),
        })
    }

    pub async fn send_otp_email(&self, to_email: &str, code: &str, expiry_minutes: u64) -> Result<(), Error> {
        let subject = "Your login code";
        let body = self.create_otp_body(code, expiry_minutes);

        self.send_email(to_email, subject, &body).await
    }

    async fn send_email(&self, to_email: &str, subject: &str, body: &str) -> Result<(), Error> {
        // Create from mailbox
        let from = format!("{} <{}>", self.from_name, self.from_email)
            .parse::<Mailbox>()
            .map_err(|e| Error::Internal {
                operation: format!("parse from email: {e}"),
            })?;

        // Create to mailbox
        let to = to_email.parse::<Mailbox>().map_err(|e| Error::Internal {
            operation: format!("parse to email: {e}"),
        })?;

        // Build message
        let mut builder = Message::builder().from(from).to(to);

        if let Some(reply_to) = &self.reply_to {
            let reply_to = reply_to.parse::<Mailbox>().map_err(|e| Error::Internal {
                operation: format!("parse reply-to email: {e}"),
            })?;
            builder = builder.reply_to(reply_to);
        }

        let message = builder
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(body.to_string())
            .map_err(|e| Error::Internal {
                operation: format!("build email message: {e}"),
            })?;

        // Send based on transport type
        match &self.transport {
            EmailTransport::Smtp(smtp) => {
                smtp.send(message).await.map_err(|e| Error::Internal {
                    operation: format!("send SMTP email: {e}"),
                })?;
            }
            EmailTransport::File(file) => {
                file.send(message).await.map_err(|e| Error::Internal {
                    operation: format!("send file email: {e}"),
                })?;
            }
        }

        Ok(())
    }

    fn create_otp_body(&self, code: &str, expiry_minutes: u64) -> String {
        format!(
            r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Your login code</title>
    <style>
        body {{ font-family: Arial, sans-serif; line-height: 1.6; color: #333; }}
        .container {{ max-width: 600px; margin: 0 auto; padding: 20px; }}
        .code {{ font-size: 32px; font-weight: bold; letter-spacing: 8px; padding: 16px 0; }}
        .footer {{ margin-top: 30px; font-size: 12px; color: #666; }}
    </style>
</head>
<body>
    <div class="container">
        <h2>Your login code</h2>

        <p>Hello,</p>

        <p>Use this code to sign in. If you didn't request a code, you can safely ignore this email.</p>

        <p class="code">{code}</p>

        <p>This code will expire in {expiry_minutes} minutes and can only be used once.</p>

        <div class="footer">
            <p>This is an automated message, please do not reply to this email.</p>
        </div>
    </div>
</body>
</html>"#
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_config;

    #[tokio::test]
    async fn test_email_service_creation() {
        let config = create_test_config();
        let email_service = EmailService::new(&config);
        assert!(email_service.is_ok());
    }

    #[tokio::test]
    async fn test_otp_email_body() {
        let config = create_test_config();
        let email_service = EmailService::new(&config).unwrap();

        let body = email_service.create_otp_body("042617", 10);

        assert!(body.contains("042617"));
        assert!(body.contains("expire in 10 minutes"));
        assert!(body.contains("only be used once"));
    }

    #[tokio::test]
    async fn test_otp_email_delivery_to_file() {
        let config = create_test_config();
        let email_service = EmailService::new(&config).unwrap();

        email_service
            .send_otp_email("someone@example.com", "123456", 10)
            .await
            .unwrap();
    }
}
