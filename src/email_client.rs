use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use std::time;

use crate::domain::subscriber_email::SubscriberEmail;

const REQUEST_TIMEOUT: time::Duration = time::Duration::from_secs(10);

#[derive(thiserror::Error)]
pub enum SendError {
    #[error("Failed to deliver the message through the mail API.")]
    Transport(#[from] reqwest::Error),
}

impl std::fmt::Debug for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Caused by:\n\t({})", self)
    }
}

/// Mail-transport boundary consumed by the delivery pipeline. Implementations
/// are invoked from many concurrent tasks and must be safe to share.
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
        is_html: bool,
    ) -> Result<(), SendError>;
}

pub struct EmailClient {
    http_client: Client,
    base_url: String,
    sender: SubscriberEmail,
    api_key: Secret<String>,
}

#[derive(serde::Serialize)]
struct SendEmailBody {
    personalizations: Vec<Personalization>,
    from: EmailAddress,
    subject: String,
    content: Vec<Content>,
}

#[derive(serde::Serialize)]
struct EmailAddress {
    email: String,
}

#[derive(serde::Serialize)]
struct Personalization {
    to: Vec<EmailAddress>,
}

#[derive(serde::Serialize)]
struct Content {
    #[serde(rename = "type")]
    content_type: String,
    value: String,
}

impl EmailClient {
    pub fn new(
        base_url: String,
        sender: SubscriberEmail,
        api_key: Secret<String>,
        timeout: Option<time::Duration>,
    ) -> EmailClient {
        let http_client = Client::builder()
            .timeout(timeout.unwrap_or(REQUEST_TIMEOUT))
            .build()
            .unwrap();

        EmailClient {
            http_client,
            base_url,
            sender,
            api_key,
        }
    }
}

#[async_trait]
impl MailSender for EmailClient {
    async fn send(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
        is_html: bool,
    ) -> Result<(), SendError> {
        let url = format!("{}/mail/send", self.base_url);
        let content_type = if is_html { "text/html" } else { "text/plain" };
        let body = SendEmailBody {
            from: EmailAddress {
                email: String::from(self.sender.as_ref()),
            },
            personalizations: vec![Personalization {
                to: vec![EmailAddress {
                    email: String::from(recipient),
                }],
            }],
            subject: String::from(subject),
            content: vec![Content {
                content_type: String::from(content_type),
                value: String::from(body),
            }],
        };

        self.http_client
            .post(&url)
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .json(&body)
            .send()
            .await?
            .error_for_status()?; // return an error when server response status code is 4xx or 5xx

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claim::{assert_err, assert_ok};
    use fake::faker::internet::en::SafeEmail;
    use fake::faker::lorem::en::{Paragraph, Sentence};
    use fake::{Fake, Faker};
    use wiremock::matchers::{any, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct SendBodyMatcher;

    impl wiremock::Match for SendBodyMatcher {
        fn matches(&self, request: &wiremock::Request) -> bool {
            let result: Result<serde_json::Value, _> = serde_json::from_slice(&request.body);

            if let Ok(body) = result {
                return body.get("from").is_some()
                    && body.get("personalizations").is_some()
                    && body.get("subject").is_some()
                    && body.get("content").is_some();
            }

            false
        }
    }

    fn email_client(base_url: String, timeout: Option<time::Duration>) -> EmailClient {
        let sender = SubscriberEmail::parse(SafeEmail().fake()).unwrap();

        EmailClient::new(base_url, sender, Secret::new(Faker.fake()), timeout)
    }

    #[tokio::test]
    async fn send_sends_the_expected_request() {
        let mock_server = MockServer::start().await;
        let email_client = email_client(mock_server.uri(), None);

        Mock::given(header_exists("Authorization"))
            .and(method("POST"))
            .and(path("/mail/send"))
            .and(header("Content-Type", "application/json"))
            .and(SendBodyMatcher)
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let recipient: String = SafeEmail().fake();
        let subject: String = Sentence(1..2).fake();
        let content: String = Paragraph(1..10).fake();

        let response = email_client
            .send(&recipient, &subject, &content, true)
            .await;

        assert_ok!(response);
    }

    #[tokio::test]
    async fn send_marks_the_content_type_from_the_html_flag() {
        let mock_server = MockServer::start().await;
        let email_client = email_client(mock_server.uri(), None);

        Mock::given(any())
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&mock_server)
            .await;

        let recipient: String = SafeEmail().fake();

        assert_ok!(email_client.send(&recipient, "subject", "<p>hi</p>", true).await);
        assert_ok!(email_client.send(&recipient, "subject", "hi", false).await);

        let requests = mock_server.received_requests().await.unwrap();
        let html: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        let plain: serde_json::Value = serde_json::from_slice(&requests[1].body).unwrap();

        assert_eq!(html["content"][0]["type"], "text/html");
        assert_eq!(plain["content"][0]["type"], "text/plain");
    }

    #[tokio::test]
    async fn send_fails_if_server_returns_500() {
        let mock_server = MockServer::start().await;
        let email_client = email_client(mock_server.uri(), None);

        Mock::given(any())
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&mock_server)
            .await;

        let recipient: String = SafeEmail().fake();
        let subject: String = Sentence(1..2).fake();
        let content: String = Paragraph(1..10).fake();

        let response = email_client
            .send(&recipient, &subject, &content, true)
            .await;

        assert_err!(response);
    }

    #[tokio::test]
    async fn send_fails_if_server_takes_too_long() {
        let mock_server = MockServer::start().await;
        let email_client = email_client(
            mock_server.uri(),
            Some(time::Duration::from_millis(100)),
        );

        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_delay(time::Duration::from_millis(120)))
            .expect(1)
            .mount(&mock_server)
            .await;

        let recipient: String = SafeEmail().fake();
        let subject: String = Sentence(1..2).fake();
        let content: String = Paragraph(1..10).fake();

        let response = email_client
            .send(&recipient, &subject, &content, true)
            .await;

        assert_err!(response);
    }
}
