//! TCP transport (`tcp://host:port`).
//!
//! Frame format: `[length:4][envelope:N]`
//!
//! - **length**: size of the envelope bytes (little-endian u32)
//! - **envelope**: the `Envelope` encoded as JSON
//!
//! The receiver answers every frame with a one-byte ack once the envelope is
//! durable on its side (or refused). One connection per send; the sender owns
//! nothing between sends.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use url::Url;

use crate::app::context::MessageContext;
use crate::domain::{CourierError, DeliveryOutcome, Envelope};
use crate::ports::Sender;

/// Maximum frame payload size (1MB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Ack bytes.
pub const ACK_DELIVERED: u8 = 0;
pub const ACK_TRANSIENT: u8 = 1;
pub const ACK_PERMANENT: u8 = 2;

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("frame too large: {size} bytes (max {MAX_FRAME_SIZE})")]
    FrameTooLarge { size: usize },

    #[error("unknown ack byte {0}")]
    UnknownAck(u8),

    #[error("envelope encoding: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl From<WireError> for DeliveryOutcome {
    fn from(err: WireError) -> Self {
        match err {
            WireError::FrameTooLarge { .. } | WireError::Encoding(_) => {
                DeliveryOutcome::permanent(err.to_string())
            }
            WireError::UnknownAck(_) | WireError::Io(_) => DeliveryOutcome::transient(err.to_string()),
        }
    }
}

pub async fn write_frame<W>(writer: &mut W, envelope: &Envelope) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = serde_json::to_vec(envelope)?;
    if bytes.len() > MAX_FRAME_SIZE {
        return Err(WireError::FrameTooLarge { size: bytes.len() });
    }
    writer.write_u32_le(bytes.len() as u32).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// `Ok(None)` on a clean end of stream before a new frame.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Envelope>, WireError>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32_le().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME_SIZE {
        return Err(WireError::FrameTooLarge { size: len });
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(Some(serde_json::from_slice(&buf)?))
}

fn ack_for(outcome: &DeliveryOutcome) -> u8 {
    match outcome {
        DeliveryOutcome::Delivered => ACK_DELIVERED,
        DeliveryOutcome::TransientFailure(_) => ACK_TRANSIENT,
        DeliveryOutcome::PermanentFailure(_) => ACK_PERMANENT,
    }
}

fn outcome_for(ack: u8) -> Result<DeliveryOutcome, WireError> {
    match ack {
        ACK_DELIVERED => Ok(DeliveryOutcome::Delivered),
        ACK_TRANSIENT => Ok(DeliveryOutcome::transient("receiver could not store the envelope")),
        ACK_PERMANENT => Ok(DeliveryOutcome::permanent("receiver refused the envelope")),
        other => Err(WireError::UnknownAck(other)),
    }
}

// ----------------------------------------------------------------------------
// sender
// ----------------------------------------------------------------------------

pub struct TcpSender {
    timeout: Duration,
}

impl TcpSender {
    /// `timeout` bounds connecting, writing and waiting for the ack, each.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn exchange(&self, addr: &str, envelope: &Envelope) -> Result<DeliveryOutcome, WireError> {
        let mut stream = tokio::time::timeout(self.timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| timed_out("connect"))??;
        tokio::time::timeout(self.timeout, write_frame(&mut stream, envelope))
            .await
            .map_err(|_| timed_out("write"))??;
        let ack = tokio::time::timeout(self.timeout, stream.read_u8())
            .await
            .map_err(|_| timed_out("ack"))??;
        outcome_for(ack)
    }
}

impl Default for TcpSender {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

fn timed_out(stage: &str) -> WireError {
    WireError::Io(std::io::Error::new(
        std::io::ErrorKind::TimedOut,
        format!("{stage} timed out"),
    ))
}

fn socket_addr(destination: &Url) -> Result<String, CourierError> {
    match (destination.host_str(), destination.port()) {
        (Some(host), Some(port)) => Ok(format!("{host}:{port}")),
        _ => Err(CourierError::Transport(format!(
            "tcp destination needs host and port: {destination}"
        ))),
    }
}

#[async_trait]
impl Sender for TcpSender {
    fn scheme(&self) -> &str {
        "tcp"
    }

    #[tracing::instrument(skip_all, fields(envelope_id = %envelope.id))]
    async fn send(&self, envelope: &Envelope) -> DeliveryOutcome {
        let Some(destination) = envelope.destination.as_ref() else {
            return DeliveryOutcome::permanent("envelope has no destination");
        };
        let addr = match socket_addr(destination) {
            Ok(addr) => addr,
            // malformed address will not fix itself
            Err(e) => return DeliveryOutcome::permanent(e.to_string()),
        };
        match self.exchange(&addr, envelope).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::debug!(%addr, error = %e, "tcp send failed");
                e.into()
            }
        }
    }
}

// ----------------------------------------------------------------------------
// receiver
// ----------------------------------------------------------------------------

/// Listener that feeds received envelopes into a `MessageContext`.
///
/// Each frame is acked after the inbox copy is persisted; handling then runs
/// on its own task.
pub struct TcpReceiver {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl TcpReceiver {
    pub async fn bind(addr: &str, messaging: MessageContext) -> Result<Self, CourierError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| CourierError::Transport(format!("bind {addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| CourierError::Transport(e.to_string()))?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(accept_loop(listener, messaging, shutdown_rx));
        tracing::info!(%local_addr, "tcp receiver listening");
        Ok(Self {
            local_addr,
            shutdown_tx,
            join,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// `tcp://ip:port` of this listener.
    pub fn uri(&self) -> Result<Url, CourierError> {
        Url::parse(&format!("tcp://{}", self.local_addr))
            .map_err(|e| CourierError::Transport(e.to_string()))
    }

    /// Stop accepting. Connections already open finish their current frame.
    pub async fn shutdown_and_join(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.join.await {
            tracing::error!(error = %e, "tcp receiver task failed");
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    messaging: MessageContext,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        let accepted = tokio::select! {
            changed = shutdown_rx.changed() => {
                // handle dropped without shutdown
                if changed.is_err() {
                    break;
                }
                continue;
            }
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => {
                let messaging = messaging.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(stream, messaging).await {
                        tracing::debug!(%peer, error = %e, "tcp connection closed with error");
                    }
                });
            }
            Err(e) => tracing::warn!(error = %e, "tcp accept failed"),
        }
    }
}

async fn serve_connection(mut stream: TcpStream, messaging: MessageContext) -> Result<(), WireError> {
    loop {
        let envelope = match read_frame(&mut stream).await {
            Ok(Some(envelope)) => envelope,
            Ok(None) => return Ok(()),
            Err(WireError::Encoding(e)) => {
                stream.write_u8(ACK_PERMANENT).await?;
                tracing::warn!(error = %e, "undecodable envelope refused");
                continue;
            }
            Err(e) => return Err(e),
        };

        match messaging.accept_incoming(&envelope).await {
            Ok(incoming) => {
                stream.write_u8(ACK_DELIVERED).await?;
                let messaging = messaging.clone();
                tokio::spawn(async move {
                    let id = incoming.id;
                    if let Err(e) = messaging.handle_incoming(incoming).await {
                        tracing::warn!(envelope_id = %id, error = %e, "could not record outcome");
                    }
                });
            }
            Err(e) => {
                tracing::warn!(envelope_id = %envelope.id, error = %e, "could not accept envelope");
                stream.write_u8(ack_for(&DeliveryOutcome::from(&e))).await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EnvelopeStatus, MessageTypeAlias};
    use crate::testing::{Ping, RecordingHandler, harness, outgoing_envelope, url};

    #[tokio::test]
    async fn frame_roundtrip_over_a_duplex_pipe() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let envelope = outgoing_envelope();
        write_frame(&mut a, &envelope).await.unwrap();
        drop(a);

        assert_eq!(read_frame(&mut b).await.unwrap(), Some(envelope));
        assert!(read_frame(&mut b).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_frames_are_rejected_both_ways() {
        let mut envelope = outgoing_envelope();
        envelope.payload = vec![b'x'; MAX_FRAME_SIZE + 1];
        let mut sink = Vec::new();
        assert!(matches!(
            write_frame(&mut sink, &envelope).await,
            Err(WireError::FrameTooLarge { .. })
        ));

        let mut header: &[u8] = &((MAX_FRAME_SIZE as u32) + 1).to_le_bytes();
        assert!(matches!(
            read_frame(&mut header).await,
            Err(WireError::FrameTooLarge { .. })
        ));
    }

    #[rstest::rstest]
    #[case(ACK_DELIVERED, true)]
    #[case(ACK_TRANSIENT, false)]
    #[case(ACK_PERMANENT, false)]
    fn ack_bytes_map_to_outcomes(#[case] ack: u8, #[case] delivered: bool) {
        let outcome = outcome_for(ack).unwrap();
        assert_eq!(outcome.is_delivered(), delivered);
        assert_eq!(ack_for(&outcome), ack);
    }

    #[tokio::test]
    async fn connection_refused_is_transient() {
        // bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut envelope = outgoing_envelope();
        envelope.destination = Some(url(&format!("tcp://{addr}")));
        let outcome = TcpSender::new(Duration::from_secs(1)).send(&envelope).await;
        assert!(matches!(outcome, DeliveryOutcome::TransientFailure(_)));
    }

    #[tokio::test]
    async fn destination_without_port_is_permanent() {
        let mut envelope = outgoing_envelope();
        envelope.destination = Some(url("tcp://example.invalid"));
        let outcome = TcpSender::default().send(&envelope).await;
        assert!(matches!(outcome, DeliveryOutcome::PermanentFailure(_)));
    }

    #[tokio::test]
    async fn sender_and_receiver_deliver_end_to_end() {
        let recorder = RecordingHandler::default();
        let receiving = harness().handler::<Ping, _>(recorder.clone()).build();
        let receiver = TcpReceiver::bind("127.0.0.1:0", receiving.messaging())
            .await
            .unwrap();

        let mut envelope = outgoing_envelope();
        envelope.message_type = MessageTypeAlias::new("test.ping.v1");
        envelope.payload = br#"{"seq":42}"#.to_vec();
        envelope.destination = Some(receiver.uri().unwrap());

        let outcome = TcpSender::default().send(&envelope).await;
        assert!(outcome.is_delivered());

        for _ in 0..100 {
            if !recorder.seen().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(recorder.seen().await, vec![42]);

        let stored = receiving.store.all().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].causation_id, Some(envelope.id));
        for _ in 0..100 {
            if receiving.status(stored[0].id).await == EnvelopeStatus::Handled {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(receiving.status(stored[0].id).await, EnvelopeStatus::Handled);

        receiver.shutdown_and_join().await;
    }
}
