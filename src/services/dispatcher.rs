use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;

use crate::errors::DispatchError;
use crate::state::listener::{PopEvent, Subscription};

/// Body POSTed to a listener's endpoint for every popped value.
///
/// This shape is what subscribers integrate against; keep it stable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Delivery {
    pub id: String,
    pub event: PopEvent,
    pub key: String,
    pub value: String,
    /// RFC 3339, UTC.
    pub timestamp: String,
}

impl Delivery {
    pub fn new(sub: &Subscription, value: String) -> Self {
        Self {
            id: sub.id.clone(),
            event: sub.event,
            key: sub.key.clone(),
            value,
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// Hands one value to one endpoint. Implementations never retry.
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn deliver(&self, endpoint: &str, delivery: &Delivery) -> Result<(), DispatchError>;
}

/// Delivers over HTTP with a shared `reqwest` client.
#[derive(Clone)]
pub struct HttpDispatcher {
    client: Client,
}

impl HttpDispatcher {
    pub fn new(timeout: Duration) -> Result<Self, DispatchError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Dispatch for HttpDispatcher {
    async fn deliver(&self, endpoint: &str, delivery: &Delivery) -> Result<(), DispatchError> {
        self.client
            .post(endpoint)
            .json(delivery)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn subscription(endpoint: &str) -> Subscription {
        Subscription {
            id: "s1".into(),
            event: PopEvent::Lpop,
            key: "q".into(),
            endpoint: endpoint.into(),
        }
    }

    #[tokio::test]
    async fn posts_delivery_as_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/cb"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let endpoint = format!("{}/cb", server.uri());
        let delivery = Delivery::new(&subscription(&endpoint), "v1".into());
        let dispatcher = HttpDispatcher::new(Duration::from_secs(5)).unwrap();

        dispatcher.deliver(&endpoint, &delivery).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = requests[0].body_json().unwrap();
        assert_eq!(body["id"], "s1");
        assert_eq!(body["event"], "lpop");
        assert_eq!(body["key"], "q");
        assert_eq!(body["value"], "v1");
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn error_status_is_a_failed_delivery() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let endpoint = format!("{}/cb", server.uri());
        let delivery = Delivery::new(&subscription(&endpoint), "v1".into());
        let dispatcher = HttpDispatcher::new(Duration::from_secs(5)).unwrap();

        assert!(dispatcher.deliver(&endpoint, &delivery).await.is_err());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_failed_delivery() {
        let dispatcher = HttpDispatcher::new(Duration::from_millis(500)).unwrap();
        let delivery = Delivery::new(&subscription("http://127.0.0.1:9/"), "v1".into());

        assert!(dispatcher
            .deliver("http://127.0.0.1:9/", &delivery)
            .await
            .is_err());
    }
}
