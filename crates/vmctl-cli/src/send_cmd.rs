use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use vmctl_core::Message;

/// Validate each argument as a JSON object, then write them back to back
/// on one connection.
pub async fn send_messages(addr: &str, messages: &[String]) -> Result<()> {
    let payloads = messages
        .iter()
        .enumerate()
        .map(|(i, raw)| {
            let msg: Message = serde_json::from_str(raw)
                .with_context(|| format!("message {} is not a JSON object", i + 1))?;
            serde_json::to_vec(&msg).context("failed to encode message")
        })
        .collect::<Result<Vec<_>>>()?;

    let mut stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("failed to connect to {addr}"))?;
    for payload in &payloads {
        stream
            .write_all(payload)
            .await
            .with_context(|| format!("failed to send to {addr}"))?;
    }
    stream.shutdown().await.context("failed to close connection")?;

    println!("Sent {} message(s) to {addr}.", payloads.len());
    Ok(())
}
