use chrono::{DateTime, Utc};
use clap::Parser;
use impact_rust::parser::header::SeedHeader;
use impact_rust::parser::split_records;
use std::net::{SocketAddr, UdpSocket};
use std::path::PathBuf;
use tokio::select;
use tokio::time::{Duration, Instant, sleep};

/// Replay a miniSEED file over UDP for the real-time mode.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the source miniSEED file
    #[arg(short, long)]
    file: PathBuf,

    /// UDP destination address (IP:Port)
    #[arg(short, long, default_value = "127.0.0.1:18000")]
    addr: SocketAddr,

    /// Playback speed multiplier (1.0 = real-time)
    #[arg(short, long, default_value_t = 1.0)]
    speed: f64,

    /// Restart from the beginning when the end is reached
    #[arg(short, long, default_value_t = false)]
    r#loop: bool,
}

#[derive(Debug, Clone)]
struct IndexedRecord {
    start_time: DateTime<Utc>,
    label: String,
    bytes: Vec<u8>,
}

fn index_records(data: &[u8]) -> Vec<IndexedRecord> {
    let mut index: Vec<IndexedRecord> = split_records(data)
        .into_iter()
        .filter_map(|record| {
            let header = SeedHeader::parse(record).ok()?;
            Some(IndexedRecord {
                start_time: header.start_time,
                label: format!(
                    "{}.{}.{}.{}",
                    header.network, header.station, header.location, header.channel
                ),
                bytes: record.to_vec(),
            })
        })
        .collect();
    index.sort_by_key(|r| r.start_time);
    index
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    if args.speed <= 0.0 {
        return Err("speed must be positive".into());
    }

    tracing::info!("Starting UDP miniSEED streamer");
    tracing::info!("File: {:?}, target: {}, speed: {}x", args.file, args.addr, args.speed);

    let data = std::fs::read(&args.file)?;
    let index = index_records(&data);
    let total = index.len();
    let (Some(first), Some(last)) = (index.first(), index.last()) else {
        tracing::error!("No valid miniSEED records found in file");
        return Ok(());
    };
    tracing::info!("Indexed {} records", total);

    let session_start_data = first.start_time;
    let total_data_duration = (last.start_time - session_start_data).to_std()?;
    let socket = UdpSocket::bind("0.0.0.0:0")?;

    let stop = tokio::signal::ctrl_c();
    tokio::pin!(stop);

    'outer: loop {
        let session_start_real = Instant::now();

        for (i, record) in index.iter().enumerate() {
            let data_elapsed = (record.start_time - session_start_data).to_std()?;
            let target_time = session_start_real + data_elapsed.div_f64(args.speed);
            let now = Instant::now();

            if target_time > now {
                select! {
                    _ = sleep(target_time - now) => {},
                    _ = &mut stop => {
                        tracing::info!("Shutdown signal received");
                        break 'outer;
                    }
                }
            }

            if let Err(e) = socket.send_to(&record.bytes, args.addr) {
                tracing::warn!("Failed to send {}: {}", record.label, e);
                continue;
            }

            if i % 100 == 0 || i == total - 1 {
                let remaining = total_data_duration
                    .checked_sub(data_elapsed)
                    .unwrap_or(Duration::ZERO);
                tracing::info!(
                    "[{:.1}%] Sent record {}/{} ({}). ETA: {:?}",
                    (i + 1) as f64 / total as f64 * 100.0,
                    i + 1,
                    total,
                    record.label,
                    remaining.div_f64(args.speed)
                );
            }
        }

        if !args.r#loop {
            break;
        }
        tracing::info!("Looping back to start");
    }

    tracing::info!("Streamer finished");
    Ok(())
}
