//! Send transactional emails through the mail queue.

use std::borrow::Cow;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use lapin::options::{BasicPublishOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::uri::{
    AMQPAuthority, AMQPQueryString, AMQPScheme, AMQPUri, AMQPUserInfo,
};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use rand::distributions::{Alphanumeric, DistString};
use rand::rngs::OsRng;
use serde::Serialize;
use url::Url;

use crate::config::Mail;
use crate::error::{Result, ServerError};

const DEFAULT_AMPQ_HOST: &str = "localhost";
const DEFAULT_AMPQ_PORT: u16 = 5672;
const DEFAULT_AMPQ_VHOST: &str = "/";

const CONTENT_ENCODING: &str = "utf8";
const CONTENT_TYPE: &str = "application/cloudevents+json";
const DATA_CONTENT_TYPE: &str = "application/json";
const CLOUDEVENT_VERSION: &str = "1.0";
const ID_LENGTH: usize = 12;

/// Mail templates list.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Template {
    /// One-time passcode proving control of an email address.
    Otp,
    /// Greets a freshly verified account.
    Welcome,
    /// Confirms a pothole report was recorded.
    ComplaintReceived,
    /// Relays a contact-form message to the support address.
    ContactMessage,
}

#[derive(Debug, Serialize)]
struct Cloudevent<'a> {
    specversion: &'static str,
    r#type: &'static str,
    source: &'static str,
    id: String,
    time: String,
    datacontenttype: &'static str,
    data: Content<'a>,
}

/// Template variables carried by the event.
#[derive(Debug, Default, Serialize)]
pub struct Variables<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<Cow<'a, str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Cow<'a, str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Cow<'a, str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<Cow<'a, str>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    to: Cow<'a, str>,
    name: Cow<'a, str>,
    template: Template,
    #[serde(flatten)]
    variables: Variables<'a>,
}

/// Mail queue manager.
#[derive(Clone, Default)]
pub struct MailManager {
    queue: String,
    conn: Option<Arc<Connection>>,
    #[cfg(test)]
    fail: bool,
}

impl MailManager {
    /// Create a new [`MailManager`].
    pub async fn new(config: &Mail) -> Result<Self> {
        let addr = Url::parse(&config.address)?;
        let uri = AMQPUri {
            scheme: AMQPScheme::from_str(addr.scheme())
                .map_err(|_| ServerError::InvalidScheme)?,
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: config.username.clone(),
                    password: config.password.clone(),
                },
                host: addr.host_str().unwrap_or(DEFAULT_AMPQ_HOST).into(),
                port: addr.port().unwrap_or(DEFAULT_AMPQ_PORT),
            },
            vhost: config
                .vhost
                .clone()
                .unwrap_or(DEFAULT_AMPQ_VHOST.to_string()),
            query: AMQPQueryString {
                channel_max: config.pool,
                ..Default::default()
            },
        };

        let conn_config = ConnectionProperties::default()
            .with_connection_name("roadwatch_mailer".into());
        let conn = Connection::connect_uri(uri, conn_config).await?;

        tracing::info!(%addr, "rabbitmq connected");
        tracing::debug!(queue = config.queue, "rabbitmq queue created");

        Ok(Self {
            queue: config.queue.clone(),
            conn: Some(Arc::new(conn)),
            #[cfg(test)]
            fail: false,
        })
    }

    /// A manager whose every dispatch fails, to exercise rollback paths.
    #[cfg(test)]
    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    async fn create_channel(
        conn: Arc<Connection>,
        queue: &str,
    ) -> Result<Channel> {
        let channel = conn.create_channel().await?;
        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(channel)
    }

    fn create_event(data: Content) -> Cloudevent {
        let id = Alphanumeric.sample_string(&mut OsRng, ID_LENGTH);
        Cloudevent {
            specversion: CLOUDEVENT_VERSION,
            r#type: "com.roadwatch.email",
            source: "com.roadwatch.api",
            id,
            time: Utc::now().with_timezone(&Utc).to_rfc3339(),
            datacontenttype: DATA_CONTENT_TYPE,
            data,
        }
    }

    /// Publish an email event for a specific recipient.
    ///
    /// Without a configured queue this is a no-op: dispatch counts as
    /// success, so a bare instance stays usable for local development.
    pub async fn publish_event(
        &self,
        template: Template,
        to: &str,
        name: &str,
        variables: Variables<'_>,
    ) -> Result<()> {
        #[cfg(test)]
        if self.fail {
            return Err(ServerError::Internal {
                details: "mail dispatch failed".into(),
            });
        }

        let Some(conn) = &self.conn else {
            tracing::debug!(?template, "mail queue not configured, skipped");
            return Ok(());
        };
        let channel =
            Self::create_channel(Arc::clone(conn), &self.queue).await?;

        tracing::trace!(?template, "email event sent");

        let content = Content {
            to: Cow::from(to),
            name: Cow::from(name),
            template,
            variables,
        };
        let payload = Self::create_event(content);
        let payload = serde_json::to_string(&payload)?;

        channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                payload.as_bytes(),
                BasicProperties::default()
                    .with_content_encoding(CONTENT_ENCODING.into())
                    .with_content_type(CONTENT_TYPE.into()),
            )
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfigured_manager_is_noop() {
        let mail = MailManager::default();

        let result = mail
            .publish_event(
                Template::Otp,
                "a@b.com",
                "A",
                Variables {
                    code: Some("042137".into()),
                    ..Default::default()
                },
            )
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_failing_manager_errors() {
        let mail = MailManager::failing();

        let result = mail
            .publish_event(Template::Otp, "a@b.com", "A", Variables::default())
            .await;

        assert!(result.is_err());
    }

    #[test]
    fn test_event_payload_shape() {
        let event = MailManager::create_event(Content {
            to: "a@b.com".into(),
            name: "A".into(),
            template: Template::Otp,
            variables: Variables {
                code: Some("042137".into()),
                ..Default::default()
            },
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["specversion"], "1.0");
        assert_eq!(json["type"], "com.roadwatch.email");
        assert_eq!(json["data"]["template"], "otp");
        assert_eq!(json["data"]["code"], "042137");
        assert!(json["data"].get("location").is_none());
    }
}
