use async_trait::async_trait;
use aws_sdk_sqs::Client;
use aws_sdk_sqs::config::Credentials;
use aws_sdk_sqs::error::DisplayErrorContext;
use tracing::info;

use crate::error::{ImpactError, Result};
use crate::message::Message;
use crate::sink::DeliverySink;

/// Explicit credentials; when absent the default provider chain is used
/// (environment, then the shared credentials file).
#[derive(Debug, Clone)]
pub struct StaticKeys {
    pub access_key_id: String,
    pub secret_access_key: String,
}

pub struct SqsSink {
    client: Client,
    queue_url: String,
}

impl SqsSink {
    pub async fn connect(region: String, queue: &str, keys: Option<StaticKeys>) -> Result<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region));
        if let Some(keys) = keys {
            loader = loader.credentials_provider(Credentials::new(
                keys.access_key_id,
                keys.secret_access_key,
                None,
                None,
                "impact-cli",
            ));
        }
        let config = loader.load().await;
        let client = Client::new(&config);

        let queue_url = if queue.starts_with("https://") {
            queue.to_string()
        } else {
            let output = client
                .get_queue_url()
                .queue_name(queue)
                .send()
                .await
                .map_err(|e| ImpactError::Config(format!("sqs queue {}: {}", queue, DisplayErrorContext(&e))))?;
            output
                .queue_url()
                .ok_or_else(|| ImpactError::Config(format!("sqs queue {} has no url", queue)))?
                .to_string()
        };

        info!("SQS: delivering to {}", queue_url);
        Ok(Self { client, queue_url })
    }
}

#[async_trait]
impl DeliverySink for SqsSink {
    fn name(&self) -> &str {
        "sqs"
    }

    async fn deliver(&self, message: &Message) -> Result<()> {
        let body = message
            .to_json()
            .map_err(|e| ImpactError::Delivery(e.to_string()))?;
        self.client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .send()
            .await
            .map_err(|e| ImpactError::Delivery(format!("sqs: {}", DisplayErrorContext(&e))))?;
        Ok(())
    }
}
