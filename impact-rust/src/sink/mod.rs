use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::{ImpactError, Result};
use crate::message::Message;
use crate::settings::{QUEUE_ENV, REGION_ENV, Settings};

pub mod sns;
pub mod sqs;

use self::sns::SnsSink;
use self::sqs::{SqsSink, StaticKeys};

/// Somewhere a message can be delivered. Retries, if any, belong to the sink.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    fn name(&self) -> &str;
    async fn deliver(&self, message: &Message) -> Result<()>;
}

/// Prints each message as a JSON line.
pub struct StdoutSink;

#[async_trait]
impl DeliverySink for StdoutSink {
    fn name(&self) -> &str {
        "stdout"
    }

    async fn deliver(&self, message: &Message) -> Result<()> {
        let line = message
            .to_json()
            .map_err(|e| ImpactError::Delivery(e.to_string()))?;
        println!("{}", line);
        Ok(())
    }
}

#[derive(Default)]
pub struct SinkManager {
    sinks: Vec<Arc<dyn DeliverySink>>,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.clone().filter(|v| !v.trim().is_empty())
}

impl SinkManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sink: Arc<dyn DeliverySink>) {
        self.sinks.push(sink);
    }

    pub fn names(&self) -> Vec<String> {
        self.sinks.iter().map(|s| s.name().to_string()).collect()
    }

    /// Build the configured sinks. Missing queue details are fatal unless
    /// this is a dry run.
    pub async fn from_settings(settings: &Settings) -> Result<Self> {
        let mut manager = Self::new();

        if settings.settings.verbose {
            manager.push(Arc::new(StdoutSink));
        }

        if settings.settings.dry_run {
            info!("Dry run: messages will not be sent");
            return Ok(manager);
        }

        if settings.queue.enabled {
            let region = non_empty(&settings.queue.region).ok_or_else(|| {
                ImpactError::Config(format!(
                    "unable to find region in environment or command line [{}]",
                    REGION_ENV
                ))
            })?;
            let queue = non_empty(&settings.queue.queue).ok_or_else(|| {
                ImpactError::Config(format!(
                    "unable to find queue in environment or command line [{}]",
                    QUEUE_ENV
                ))
            })?;
            let keys = match (
                non_empty(&settings.queue.aws_access_key_id),
                non_empty(&settings.queue.aws_secret_access_key),
            ) {
                (Some(access_key_id), Some(secret_access_key)) => Some(StaticKeys {
                    access_key_id,
                    secret_access_key,
                }),
                _ => None,
            };
            manager.push(Arc::new(SqsSink::connect(region, &queue, keys).await?));
        }

        if settings.sns.enabled {
            let region = non_empty(&settings.sns.aws_region)
                .or_else(|| non_empty(&settings.queue.region))
                .ok_or_else(|| ImpactError::Config("sns enabled without a region".to_string()))?;
            manager.push(Arc::new(
                SnsSink::new(settings.sns.topic_arn.clone(), region).await,
            ));
        }

        Ok(manager)
    }

    /// Deliver to every sink in turn. All sinks are attempted even when an
    /// earlier one fails.
    pub async fn deliver(&self, message: &Message) -> Result<()> {
        let mut failures = Vec::new();
        for sink in &self.sinks {
            if let Err(e) = sink.deliver(message).await {
                failures.push(format!("{}: {}", sink.name(), e));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ImpactError::Delivery(failures.join("; ")))
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub delivered: u64,
    pub failed: u64,
}

/// Drain the message channel into the sinks until every sender is gone.
pub async fn run_sink(mut rx: mpsc::Receiver<Message>, sinks: SinkManager) -> SinkStats {
    let mut stats = SinkStats::default();
    while let Some(message) = rx.recv().await {
        match sinks.deliver(&message).await {
            Ok(()) => stats.delivered += 1,
            Err(e) => {
                stats.failed += 1;
                warn!(
                    "Delivery failed for {} level {}: {}",
                    message.src_name, message.level, e
                );
            }
        }
    }
    info!(
        "Sink stopped: delivered={}, failed={}",
        stats.delivered, stats.failed
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Mutex;

    struct Recording {
        seen: Mutex<Vec<Message>>,
        fail: bool,
    }

    #[async_trait]
    impl DeliverySink for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        async fn deliver(&self, message: &Message) -> Result<()> {
            self.seen.lock().unwrap().push(message.clone());
            if self.fail {
                Err(ImpactError::Delivery("refused".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn message(level: i32) -> Message {
        Message {
            source: "NZ.WEL".to_string(),
            src_name: "NZ_WEL_10_HHZ".to_string(),
            time: Utc::now(),
            level,
        }
    }

    #[tokio::test]
    async fn test_failing_sink_does_not_block_others() {
        let bad = Arc::new(Recording { seen: Mutex::new(Vec::new()), fail: true });
        let good = Arc::new(Recording { seen: Mutex::new(Vec::new()), fail: false });
        let mut manager = SinkManager::new();
        manager.push(bad.clone());
        manager.push(good.clone());

        let err = manager.deliver(&message(1)).await.unwrap_err();
        assert!(err.to_string().contains("refused"));
        assert_eq!(good.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_run_sink_counts() {
        let sink = Arc::new(Recording { seen: Mutex::new(Vec::new()), fail: false });
        let mut manager = SinkManager::new();
        manager.push(sink.clone());

        let (tx, rx) = mpsc::channel(8);
        let handle = tokio::spawn(run_sink(rx, manager));
        for level in [0, 2, 1] {
            tx.send(message(level)).await.unwrap();
        }
        drop(tx);

        let stats = handle.await.unwrap();
        assert_eq!(stats, SinkStats { delivered: 3, failed: 0 });
        let levels: Vec<i32> = sink.seen.lock().unwrap().iter().map(|m| m.level).collect();
        assert_eq!(levels, vec![0, 2, 1]);
    }

    #[tokio::test]
    async fn test_dry_run_needs_no_queue() {
        let mut settings = Settings::default();
        settings.settings.dry_run = true;
        settings.settings.verbose = true;
        let manager = SinkManager::from_settings(&settings).await.unwrap();
        assert_eq!(manager.names(), vec!["stdout".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_region_is_fatal() {
        let mut settings = Settings::default();
        settings.queue.region = None;
        settings.queue.queue = Some("impact".to_string());
        let err = SinkManager::from_settings(&settings).await.err().unwrap();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("AWS_IMPACT_REGION"));
    }
}
