//! Node event intake.
//!
//! The node connector delivers [`RawBlockMessage`]s as newline-delimited JSON
//! over a local TCP connection. Transport only: parsing failures drop the
//! line, backpressure propagates through the bounded ingestion channel, and
//! at-least-once delivery is fine because ingestion is idempotent.

use {
    crate::decoder::RawBlockMessage,
    std::net::SocketAddr,
    tokio::{
        io::{AsyncBufReadExt, BufReader},
        net::{TcpListener, TcpStream},
        sync::mpsc,
    },
};

pub async fn listen(
    address: SocketAddr,
    messages: mpsc::Sender<RawBlockMessage>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(address).await?;
    tracing::info!(%address, "listening for node events");
    loop {
        let (socket, peer) = listener.accept().await?;
        let messages = messages.clone();
        tokio::spawn(async move {
            if let Err(err) = forward_messages(socket, messages).await {
                tracing::warn!(?err, %peer, "node event connection ended");
            }
        });
    }
}

async fn forward_messages(
    socket: TcpStream,
    messages: mpsc::Sender<RawBlockMessage>,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(socket).lines();
    while let Some(line) = lines.next_line().await? {
        match serde_json::from_str::<RawBlockMessage>(&line) {
            // a closed channel means the sidecar is shutting down
            Ok(message) => {
                if messages.send(message).await.is_err() {
                    break;
                }
            }
            Err(err) => tracing::error!(?err, "dropping malformed node event"),
        }
    }
    Ok(())
}
