//! Keyed-frame relay protocol client
//!
//! Binds the abstract relay-client surface to the actual service: a
//! framed protocol spoken over a TLS WebSocket. A frame is one type
//! byte, a big-endian u32 payload length, and the payload; frames are
//! carried inside binary WebSocket messages and may span message
//! boundaries, so the reader buffers.
//!
//! Session setup: the server greets with its public key, the client
//! answers with its own public key plus a NaCl-box-sealed client-info
//! blob. After that, packets flow as `SendPacket` (dst key ‖ payload)
//! out and `RecvPacket` (src key ‖ payload) in.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use crypto_box::aead::{Aead, AeadCore, OsRng};
use crypto_box::SalsaBox;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use log::{debug, trace};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::identity::{PrivateKey, PublicKey};
use crate::relay_client::{RelayClient, RelayDial, RelayMessage};

// ============================================================================
// Frame Types
// ============================================================================

/// Magic prefix of the server-key greeting: "DERP" plus the key emoji
pub const PROTOCOL_MAGIC: &[u8; 8] = b"DERP\xf0\x9f\x94\x91";

/// Protocol version announced in the client-info blob
pub const PROTOCOL_VERSION: u32 = 2;

pub const FRAME_SERVER_KEY: u8 = 0x01;
pub const FRAME_CLIENT_INFO: u8 = 0x02;
pub const FRAME_SERVER_INFO: u8 = 0x03;
pub const FRAME_SEND_PACKET: u8 = 0x04;
pub const FRAME_RECV_PACKET: u8 = 0x05;
pub const FRAME_KEEP_ALIVE: u8 = 0x06;
pub const FRAME_PEER_GONE: u8 = 0x08;
pub const FRAME_PING: u8 = 0x0c;
pub const FRAME_PONG: u8 = 0x0d;
pub const FRAME_HEALTH: u8 = 0x0e;

/// Frame header: type byte + u32 big-endian payload length
const FRAME_HEADER_SIZE: usize = 5;

/// Upper bound on accepted frame payloads; anything larger is a
/// corrupted stream, not a datagram
const MAX_FRAME_SIZE: usize = 1 << 20;

/// NaCl box nonce length used by the client-info seal
const NONCE_SIZE: usize = 24;

// ============================================================================
// Frame Codec
// ============================================================================

/// Encode one frame ready to be sent as a binary message
pub fn encode_frame(frame_type: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.push(frame_type);
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Pull the next complete frame out of `buf`, if one is buffered
pub fn decode_frame(buf: &mut Vec<u8>) -> Result<Option<(u8, Vec<u8>)>> {
    if buf.len() < FRAME_HEADER_SIZE {
        return Ok(None);
    }

    let len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
    if len > MAX_FRAME_SIZE {
        bail!("relay frame too large: {} bytes", len);
    }
    if buf.len() < FRAME_HEADER_SIZE + len {
        return Ok(None);
    }

    let frame_type = buf[0];
    let payload = buf[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + len].to_vec();
    buf.drain(..FRAME_HEADER_SIZE + len);
    Ok(Some((frame_type, payload)))
}

/// Rewrite an `https://` service URL to its WebSocket upgrade form
pub fn websocket_url(url: &str) -> Result<String> {
    if url.starts_with("wss://") || url.starts_with("ws://") {
        Ok(url.to_string())
    } else if let Some(rest) = url.strip_prefix("https://") {
        Ok(format!("wss://{}", rest))
    } else if let Some(rest) = url.strip_prefix("http://") {
        Ok(format!("ws://{}", rest))
    } else {
        bail!("unsupported relay URL scheme: {}", url)
    }
}

// ============================================================================
// Client
// ============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Buffered reader half of the session
struct FrameReader {
    stream: SplitStream<WsStream>,
    buf: Vec<u8>,
}

impl FrameReader {
    /// Read until one complete frame is available
    async fn next_frame(&mut self) -> Result<(u8, Vec<u8>)> {
        loop {
            if let Some(frame) = decode_frame(&mut self.buf)? {
                return Ok(frame);
            }

            match self.stream.next().await {
                Some(Ok(WsMessage::Binary(data))) => self.buf.extend_from_slice(&data),
                Some(Ok(WsMessage::Close(_))) | None => bail!("relay connection closed"),
                // Text is never valid; ping/pong are handled by the
                // websocket layer itself
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e).context("websocket read failed"),
            }
        }
    }
}

/// Live session to the relay service
pub struct DerpClient {
    sink: Mutex<SplitSink<WsStream, WsMessage>>,
    reader: Mutex<FrameReader>,
    closed: CancellationToken,
}

impl DerpClient {
    /// Dial the service at `url`, authenticate as `key`, and complete
    /// the greeting exchange. The server's sealed info frame is left in
    /// the stream and surfaces later through `recv` as `ServerInfo`.
    pub async fn connect(key: &PrivateKey, url: &str) -> Result<Self> {
        let ws_url = websocket_url(url)?;
        debug!("dialing relay service at {}", ws_url);

        let (ws, _response) = connect_async(ws_url.as_str())
            .await
            .with_context(|| format!("failed to connect to relay service {}", ws_url))?;
        let (sink, stream) = ws.split();

        let mut reader = FrameReader {
            stream,
            buf: Vec::new(),
        };
        let mut sink = sink;

        let server_key = read_server_key(&mut reader).await?;
        debug!("relay service key {}", server_key.short());

        let client_info = seal_client_info(key, &server_key)?;
        sink.send(WsMessage::Binary(encode_frame(FRAME_CLIENT_INFO, &client_info)))
            .await
            .context("failed to send client info")?;

        Ok(Self {
            sink: Mutex::new(sink),
            reader: Mutex::new(reader),
            closed: CancellationToken::new(),
        })
    }

    async fn send_frame(&self, frame_type: u8, payload: &[u8]) -> Result<()> {
        if self.closed.is_cancelled() {
            bail!("relay client is closed");
        }
        let mut sink = self.sink.lock().await;
        sink.send(WsMessage::Binary(encode_frame(frame_type, payload)))
            .await
            .context("websocket send failed")
    }
}

#[async_trait]
impl RelayClient for DerpClient {
    async fn send(&self, remote: &PublicKey, payload: &[u8]) -> Result<()> {
        let mut frame = Vec::with_capacity(32 + payload.len());
        frame.extend_from_slice(remote.as_bytes());
        frame.extend_from_slice(payload);
        self.send_frame(FRAME_SEND_PACKET, &frame).await
    }

    async fn recv(&self) -> Result<RelayMessage> {
        loop {
            let (frame_type, payload) = tokio::select! {
                _ = self.closed.cancelled() => bail!("relay client is closed"),
                frame = async {
                    let mut reader = self.reader.lock().await;
                    reader.next_frame().await
                } => frame?,
            };

            match frame_type {
                FRAME_RECV_PACKET => {
                    if payload.len() < 32 {
                        bail!("short recv-packet frame: {} bytes", payload.len());
                    }
                    let mut key = [0u8; 32];
                    key.copy_from_slice(&payload[..32]);
                    return Ok(RelayMessage::ReceivedPacket {
                        source: PublicKey::from_bytes(key),
                        data: payload[32..].to_vec(),
                    });
                }
                FRAME_KEEP_ALIVE => return Ok(RelayMessage::KeepAlive),
                FRAME_SERVER_INFO => return Ok(RelayMessage::ServerInfo),
                FRAME_PEER_GONE => {
                    if payload.len() < 32 {
                        bail!("short peer-gone frame: {} bytes", payload.len());
                    }
                    let mut key = [0u8; 32];
                    key.copy_from_slice(&payload[..32]);
                    return Ok(RelayMessage::PeerGone(PublicKey::from_bytes(key)));
                }
                FRAME_PING => {
                    let mut data = [0u8; 8];
                    let n = payload.len().min(8);
                    data[..n].copy_from_slice(&payload[..n]);
                    // The service expects an echo before surfacing the probe
                    self.send_frame(FRAME_PONG, &data).await?;
                    return Ok(RelayMessage::Ping(data));
                }
                FRAME_PONG => {
                    let mut data = [0u8; 8];
                    let n = payload.len().min(8);
                    data[..n].copy_from_slice(&payload[..n]);
                    return Ok(RelayMessage::Pong(data));
                }
                FRAME_HEALTH => return Ok(RelayMessage::Health),
                other => {
                    trace!("ignoring relay frame type {:#04x}", other);
                    continue;
                }
            }
        }
    }

    async fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();
        let mut sink = self.sink.lock().await;
        let _ = sink.send(WsMessage::Close(None)).await;
    }
}

/// Dialer for the real relay service
pub struct DerpDialer;

#[async_trait]
impl RelayDial for DerpDialer {
    type Client = DerpClient;

    async fn dial(&self, key: &PrivateKey, url: &str) -> Result<DerpClient> {
        DerpClient::connect(key, url).await
    }
}

// ============================================================================
// Handshake Helpers
// ============================================================================

/// Read the greeting frame and extract the service's public key
async fn read_server_key(reader: &mut FrameReader) -> Result<PublicKey> {
    let (frame_type, payload) = reader.next_frame().await?;
    if frame_type != FRAME_SERVER_KEY {
        bail!("expected server-key frame, got type {:#04x}", frame_type);
    }
    if payload.len() < PROTOCOL_MAGIC.len() + 32 {
        bail!("short server-key frame: {} bytes", payload.len());
    }
    if &payload[..PROTOCOL_MAGIC.len()] != PROTOCOL_MAGIC {
        bail!("relay service greeting has wrong magic");
    }

    let mut key = [0u8; 32];
    key.copy_from_slice(&payload[PROTOCOL_MAGIC.len()..PROTOCOL_MAGIC.len() + 32]);
    Ok(PublicKey::from_bytes(key))
}

/// Build the client-info payload: our public key, a fresh nonce, and the
/// info blob sealed to the server key
fn seal_client_info(key: &PrivateKey, server_key: &PublicKey) -> Result<Vec<u8>> {
    let info = serde_json::to_vec(&serde_json::json!({ "version": PROTOCOL_VERSION }))
        .context("failed to encode client info")?;

    let secret = crypto_box::SecretKey::from(*key.as_bytes());
    let server_public = crypto_box::PublicKey::from(*server_key.as_bytes());
    let sealing_box = SalsaBox::new(&server_public, &secret);

    let nonce = SalsaBox::generate_nonce(&mut OsRng);
    let sealed = sealing_box
        .encrypt(&nonce, info.as_slice())
        .map_err(|_| anyhow!("failed to seal client info"))?;

    let mut payload = Vec::with_capacity(32 + NONCE_SIZE + sealed.len());
    payload.extend_from_slice(key.public().as_bytes());
    payload.extend_from_slice(nonce.as_slice());
    payload.extend_from_slice(&sealed);
    Ok(payload)
}
