use std::path::Path;

use chrono::SubsecRound;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{ImpactError, Result};
use crate::intensity::intensity_label;
use crate::message::Message;
use crate::parser::{decode_record, split_records};
use crate::registry::{RegistryStats, StreamRegistry};

/// Dispatcher loop. Owns the registry, so channel state is only ever
/// touched from this task and blocks for one channel are handled in
/// arrival order.
///
/// Returns the registry statistics once the input channel closes.
pub async fn run_pipeline(
    mut input_rx: mpsc::Receiver<Vec<u8>>,
    mut registry: StreamRegistry,
    output_tx: mpsc::Sender<Message>,
    replay: bool,
) -> RegistryStats {
    info!("Pipeline started with {} channels", registry.len());
    let mut records = 0u64;

    while let Some(data) = input_rx.recv().await {
        records += 1;
        let block = match decode_record(&data) {
            Ok(block) => block,
            Err(e) => {
                warn!("Skipping record: {}", e);
                continue;
            }
        };

        let mut message = match registry.process(&block) {
            Ok(Some(message)) => message,
            Ok(None) => continue,
            Err(ImpactError::UnknownStream(key)) => {
                warn!("No stream configuration for {}, ignoring it", key);
                continue;
            }
            Err(e) => {
                warn!("Skipping block: {}", e);
                continue;
            }
        };

        if replay {
            message.time = registry.clock().now().trunc_subsecs(0);
        }

        info!(
            "{} ({}) intensity {} [{}] at {}",
            message.source,
            message.src_name,
            intensity_label(message.level),
            message.level,
            message.time.to_rfc3339()
        );

        if output_tx.send(message).await.is_err() {
            error!("Message channel closed, stopping pipeline");
            break;
        }
    }

    let stats = registry.stats();
    info!(
        "Pipeline stopped: records={}, processed={}, emitted={}, suppressed={}, skipped={}",
        records, stats.processed, stats.emitted, stats.suppressed, stats.skipped
    );
    stats
}

/// Read a file of concatenated records and push each one into the pipeline.
/// Returns the number of records sent.
pub async fn feed_file(path: &Path, tx: &mpsc::Sender<Vec<u8>>) -> Result<usize> {
    let bytes = tokio::fs::read(path).await?;
    let records = split_records(&bytes);
    debug!("{}: {} records", path.display(), records.len());

    let mut sent = 0;
    for record in records {
        if tx.send(record.to_vec()).await.is_err() {
            break;
        }
        sent += 1;
    }
    Ok(sent)
}
