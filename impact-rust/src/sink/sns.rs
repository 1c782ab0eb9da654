use async_trait::async_trait;
use aws_sdk_sns::Client;
use aws_sdk_sns::error::DisplayErrorContext;

use crate::error::{ImpactError, Result};
use crate::message::Message;
use crate::sink::DeliverySink;

pub struct SnsSink {
    client: Client,
    topic_arn: String,
}

impl SnsSink {
    pub async fn new(topic_arn: String, region: String) -> Self {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region))
            .load()
            .await;
        let client = Client::new(&config);
        Self { client, topic_arn }
    }
}

#[async_trait]
impl DeliverySink for SnsSink {
    fn name(&self) -> &str {
        "sns"
    }

    async fn deliver(&self, message: &Message) -> Result<()> {
        let body = message
            .to_json()
            .map_err(|e| ImpactError::Delivery(e.to_string()))?;
        self.client
            .publish()
            .topic_arn(&self.topic_arn)
            .subject(format!("{} level {}", message.source, message.level))
            .message(body)
            .send()
            .await
            .map_err(|e| ImpactError::Delivery(format!("sns: {}", DisplayErrorContext(&e))))?;
        Ok(())
    }
}
