//! Example chat front end.
//!
//! Wires a [`peerlink::peer::PeerSession`] to stdio: each line typed goes
//! out as a frame, each inbound frame prints to stdout, and connection
//! state transitions log to stderr. This binary exists only to exercise
//! the library end to end.

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use peerlink::channel::Channel;
use peerlink::config::Settings;
use peerlink::peer::PeerSession;

/// Minimal peer-to-peer chat over a rendezvous-brokered WebRTC channel.
#[derive(Parser, Debug)]
#[command(name = "peerlink-chat")]
struct Args {
    /// Rendezvous broker websocket URL, e.g. ws://localhost:9090.
    #[arg(long)]
    signaling: String,
    /// STUN server URL, repeatable.
    #[arg(long = "stun")]
    stun: Vec<String>,
    /// Optional TURN server URL.
    #[arg(long)]
    turn: Option<String>,
    /// Session key both peers must share.
    #[arg(long)]
    key: String,
    /// Ingress/egress queue capacity.
    #[arg(long, default_value_t = 32)]
    buffer_size: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let settings = Settings::new(
        args.signaling,
        args.stun,
        args.turn,
        args.key,
        args.buffer_size,
    )?;

    let mut session = PeerSession::connect(settings).await?;
    log::info!("connected as {:?}", session.role());

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = stdin.next_line() => {
                match line? {
                    Some(text) => {
                        if session.send(text.as_bytes()).await.is_err() {
                            log::warn!("session closed, stopping input loop");
                            break;
                        }
                    }
                    None => break,
                }
            }
            message = session.recv() => {
                match message {
                    Some(bytes) => {
                        println!("{}", String::from_utf8_lossy(&bytes));
                    }
                    None => {
                        log::info!("ingress queue closed");
                        break;
                    }
                }
            }
            state = session.recv_state() => {
                match state {
                    Some(state) => log::info!("state -> {state:?}"),
                    None => {
                        log::info!("state queue closed");
                        break;
                    }
                }
            }
        }
    }

    session.close().await;
    Ok(())
}
