//! Tiny TCP responder for manual testing: reads one request, answers `ACK`.
//! It does not depend on the scanning code.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const MAX_REQUEST: usize = 1024;

const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(5);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Pause after a failed `accept`: doubles per consecutive failure, capped.
fn next_backoff(current: Option<Duration>) -> Duration {
    current.map_or(ACCEPT_BACKOFF_MIN, |d| (d * 2).min(ACCEPT_BACKOFF_MAX))
}

pub struct AckListener {
    listener: TcpListener,
}

impl AckListener {
    pub async fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept clients until `cancel` fires. Each client is served on its own task.
    pub async fn serve(self, cancel: CancellationToken) -> io::Result<()> {
        info!(addr = %self.local_addr()?, "listening");
        let mut backoff = None;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("shutting down listener");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        backoff = None;
                        info!(%peer, "accepted connection");
                        tokio::spawn(async move {
                            if let Err(e) = handle_client(stream).await {
                                warn!(%peer, error = %e, "client error");
                            }
                        });
                    }
                    // Per-connection failures (reset before accept, fd pressure) are not fatal,
                    // but a persistent one must not spin.
                    Err(e) => {
                        let pause = next_backoff(backoff);
                        backoff = Some(pause);
                        warn!(error = %e, retry_in = ?pause, "accept failed");
                        tokio::select! {
                            _ = cancel.cancelled() => {}
                            _ = time::sleep(pause) => {}
                        }
                    }
                },
            }
        }
    }
}

async fn handle_client(mut stream: TcpStream) -> io::Result<()> {
    let mut buf = [0u8; MAX_REQUEST];
    let n = stream.read(&mut buf).await?;
    info!(request = %String::from_utf8_lossy(&buf[..n]), "received");
    stream.write_all(b"ACK").await?;
    stream.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_backoff_doubles_up_to_cap() {
        let mut pause = next_backoff(None);
        assert_eq!(pause, ACCEPT_BACKOFF_MIN);
        pause = next_backoff(Some(pause));
        assert_eq!(pause, ACCEPT_BACKOFF_MIN * 2);
        for _ in 0..20 {
            pause = next_backoff(Some(pause));
        }
        assert_eq!(pause, ACCEPT_BACKOFF_MAX);
    }

    #[tokio::test]
    async fn replies_ack_and_stops_on_cancel() {
        let listener = AckListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let server = tokio::spawn(listener.serve(cancel.clone()));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"hello").await.unwrap();
        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"ACK");

        cancel.cancel();
        server.await.unwrap().unwrap();
    }
}
