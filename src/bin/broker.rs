//! Rendezvous broker binary.
//!
//! Binds `0.0.0.0:<port>` and accepts websocket upgrades at `/`, handing
//! each connection off to a [`peerlink::broker::BrokerPool`]: one task per
//! accepted connection.

use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio_tungstenite::MaybeTlsStream;

use peerlink::broker::BrokerPool;

/// Rendezvous broker: pairs two clients presenting the same session key.
#[derive(Parser, Debug)]
#[command(name = "peerlink-broker")]
struct Args {
    /// Port to bind on `0.0.0.0`.
    port: u16,
    /// Seconds to hold a lonely offerer before giving up on it.
    #[arg(long, default_value_t = 10)]
    hold_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = TcpListener::bind(&addr).await?;
    log::info!(
        "peerlink-broker listening on {addr} (hold timeout {}s)",
        args.hold_timeout_secs
    );

    let pool = BrokerPool::with_hold_timeout(Duration::from_secs(args.hold_timeout_secs));

    loop {
        let (tcp_stream, peer_addr) = listener.accept().await?;
        let pool = std::sync::Arc::clone(&pool);
        tokio::spawn(async move {
            let ws_stream = match tokio_tungstenite::accept_async(MaybeTlsStream::Plain(tcp_stream))
                .await
            {
                Ok(s) => s,
                Err(e) => {
                    log::warn!("broker: websocket handshake with {peer_addr} failed: {e}");
                    return;
                }
            };
            log::debug!("broker: accepted connection from {peer_addr}");
            pool.handle_connection(ws_stream).await;
        });
    }
}
