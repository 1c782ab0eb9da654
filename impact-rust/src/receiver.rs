use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::parser::split_records;

/// Listen for records on UDP and forward each one to the pipeline.
/// A datagram may carry several back-to-back records.
pub async fn start_receiver(port: u16, tx: mpsc::Sender<Vec<u8>>) -> std::io::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let socket = UdpSocket::bind(&addr).await?;
    info!("Listening on {}", socket.local_addr()?);
    receive_loop(socket, tx).await
}

pub async fn receive_loop(socket: UdpSocket, tx: mpsc::Sender<Vec<u8>>) -> std::io::Result<()> {
    let mut buf = [0u8; 65535];

    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, source)) => {
                debug!("Received {} bytes from {}", len, source);
                for record in split_records(&buf[..len]) {
                    if tx.send(record.to_vec()).await.is_err() {
                        info!("Receiver channel closed");
                        return Ok(());
                    }
                }
            }
            Err(e) => {
                warn!("Failed to receive packet: {}", e);
            }
        }
    }
}
