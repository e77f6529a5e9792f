//! Java edition server list ping.
//!
//! Handshake into the status state, request the status JSON, then optionally
//! send a ping and time the pong. Packets are framed by a VarInt length and
//! start with a VarInt packet id.

use std::time::{Duration, Instant};

use mcwatch_store::Player;
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use super::{ServerStatus, StatusSource};
use crate::error::StatusError;

/// Protocol version sent when only querying status
const PROTOCOL_VERSION: i32 = -1;
const NEXT_STATE_STATUS: i32 = 1;
const STATUS_PACKET_ID: i32 = 0x00;
const PING_PACKET_ID: i32 = 0x01;
const MAX_PACKET_LEN: usize = 2 * 1024 * 1024;
const MAX_VARINT_LEN: usize = 5;

/// Status client for one server.
#[derive(Debug, Clone)]
pub struct JavaStatusClient {
    host: String,
    port: u16,
    timeout: Duration,
}

impl JavaStatusClient {
    /// `timeout` bounds a whole query, connection included.
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    async fn query_inner(&self, with_ping: bool) -> Result<ServerStatus, StatusError> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|source| StatusError::Connect {
                addr: self.addr(),
                source,
            })?;
        stream.set_nodelay(true)?;
        exchange(&mut stream, &self.host, self.port, with_ping).await
    }
}

impl StatusSource for JavaStatusClient {
    async fn query(&self, with_ping: bool) -> Result<ServerStatus, StatusError> {
        tokio::time::timeout(self.timeout, self.query_inner(with_ping))
            .await
            .map_err(|_| StatusError::Timeout(self.timeout))?
    }
}

/// Run the status (and ping) exchange over an open connection.
pub async fn exchange<S>(
    stream: &mut S,
    host: &str,
    port: u16,
    with_ping: bool,
) -> Result<ServerStatus, StatusError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut handshake = Vec::with_capacity(host.len() + 16);
    write_varint(&mut handshake, 0x00);
    write_varint(&mut handshake, PROTOCOL_VERSION);
    write_string(&mut handshake, host);
    handshake.extend_from_slice(&port.to_be_bytes());
    write_varint(&mut handshake, NEXT_STATE_STATUS);
    write_packet(stream, &handshake).await?;

    let mut request = Vec::with_capacity(1);
    write_varint(&mut request, STATUS_PACKET_ID);
    write_packet(stream, &request).await?;

    let body = read_packet(stream).await?;
    let mut buf = body.as_slice();
    expect_packet_id(&mut buf, STATUS_PACKET_ID)?;
    let json = read_string(&mut buf)?;
    let (online, players) = parse_status(json)?;
    debug!(online, sample = players.len(), "status received");

    let ping = if with_ping {
        Some(ping(stream).await?)
    } else {
        None
    };

    Ok(ServerStatus {
        online,
        players,
        ping,
    })
}

/// Round trip of one ping packet, in milliseconds.
async fn ping<S>(stream: &mut S) -> Result<f64, StatusError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let payload: i64 = rand::random();
    let mut packet = Vec::with_capacity(9);
    write_varint(&mut packet, PING_PACKET_ID);
    packet.extend_from_slice(&payload.to_be_bytes());

    let started = Instant::now();
    write_packet(stream, &packet).await?;
    let body = read_packet(stream).await?;
    let elapsed = started.elapsed();

    let mut buf = body.as_slice();
    expect_packet_id(&mut buf, PING_PACKET_ID)?;
    let echoed: [u8; 8] = buf
        .try_into()
        .map_err(|_| StatusError::Protocol(format!("pong payload of {} bytes", buf.len())))?;
    if i64::from_be_bytes(echoed) != payload {
        return Err(StatusError::Protocol("pong payload mismatch".to_string()));
    }
    Ok(elapsed.as_secs_f64() * 1000.0)
}

#[derive(Deserialize)]
struct StatusResponse {
    #[serde(default)]
    players: Option<PlayersField>,
}

#[derive(Deserialize)]
struct PlayersField {
    online: u32,
    #[serde(default)]
    sample: Option<Vec<SampleEntry>>,
}

#[derive(Deserialize)]
struct SampleEntry {
    name: String,
    #[serde(default)]
    id: Option<String>,
}

/// Online count and player sample of a status JSON document.
pub fn parse_status(json: &str) -> Result<(u32, Vec<Player>), StatusError> {
    let response: StatusResponse = serde_json::from_str(json)?;
    let Some(players) = response.players else {
        return Ok((0, Vec::new()));
    };
    let sample = players
        .sample
        .unwrap_or_default()
        .into_iter()
        .map(|entry| match entry.id {
            Some(id) => Player::new(entry.name, id),
            None => Player::named(entry.name),
        })
        .collect();
    Ok((players.online, sample))
}

// ============================================================================
// Framing
// ============================================================================

pub fn write_varint(buf: &mut Vec<u8>, value: i32) {
    let mut value = value as u32;
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

/// Decode a VarInt from the front of `buf`, advancing it.
pub fn read_varint(buf: &mut &[u8]) -> Result<i32, StatusError> {
    let mut value: u32 = 0;
    for i in 0..MAX_VARINT_LEN {
        let (&byte, rest) = buf
            .split_first()
            .ok_or_else(|| StatusError::Protocol("truncated varint".to_string()))?;
        *buf = rest;
        value |= ((byte & 0x7F) as u32) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(value as i32);
        }
    }
    Err(StatusError::Protocol("varint too long".to_string()))
}

async fn read_varint_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<i32, StatusError> {
    let mut value: u32 = 0;
    for i in 0..MAX_VARINT_LEN {
        let byte = reader.read_u8().await?;
        value |= ((byte & 0x7F) as u32) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(value as i32);
        }
    }
    Err(StatusError::Protocol("varint too long".to_string()))
}

fn write_string(buf: &mut Vec<u8>, value: &str) {
    write_varint(buf, value.len() as i32);
    buf.extend_from_slice(value.as_bytes());
}

fn read_string<'a>(buf: &mut &'a [u8]) -> Result<&'a str, StatusError> {
    let len = read_varint(buf)?;
    let len = usize::try_from(len)
        .map_err(|_| StatusError::Protocol(format!("negative string length {len}")))?;
    if len > buf.len() {
        return Err(StatusError::Protocol(format!(
            "string of {len} bytes exceeds packet ({} left)",
            buf.len()
        )));
    }
    let (bytes, rest) = buf.split_at(len);
    *buf = rest;
    std::str::from_utf8(bytes).map_err(|e| StatusError::Protocol(format!("invalid utf-8: {e}")))
}

fn expect_packet_id(buf: &mut &[u8], expected: i32) -> Result<(), StatusError> {
    let id = read_varint(buf)?;
    if id != expected {
        return Err(StatusError::Protocol(format!(
            "unexpected packet id {id:#04x}, expected {expected:#04x}"
        )));
    }
    Ok(())
}

/// Write one length-prefixed packet.
pub async fn write_packet<W: AsyncWrite + Unpin>(writer: &mut W, body: &[u8]) -> Result<(), StatusError> {
    let mut frame = Vec::with_capacity(body.len() + MAX_VARINT_LEN);
    write_varint(&mut frame, body.len() as i32);
    frame.extend_from_slice(body);
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed packet body.
pub async fn read_packet<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, StatusError> {
    let len = read_varint_from(reader).await?;
    let len = usize::try_from(len)
        .ok()
        .filter(|len| *len <= MAX_PACKET_LEN)
        .ok_or_else(|| StatusError::Protocol(format!("invalid packet length {len}")))?;
    let mut body = vec![0; len];
    reader.read_exact(&mut body).await?;
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(value: i32) -> Vec<u8> {
        let mut buf = Vec::new();
        write_varint(&mut buf, value);
        buf
    }

    #[test]
    fn test_varint_known_encodings() {
        assert_eq!(encoded(0), vec![0x00]);
        assert_eq!(encoded(1), vec![0x01]);
        assert_eq!(encoded(127), vec![0x7f]);
        assert_eq!(encoded(128), vec![0x80, 0x01]);
        assert_eq!(encoded(255), vec![0xff, 0x01]);
        assert_eq!(encoded(25565), vec![0xdd, 0xc7, 0x01]);
        assert_eq!(encoded(-1), vec![0xff, 0xff, 0xff, 0xff, 0x0f]);
    }

    #[test]
    fn test_read_varint() {
        let bytes = [0xdd, 0xc7, 0x01, 0x2a];
        let mut buf = &bytes[..];
        assert_eq!(read_varint(&mut buf).unwrap(), 25565);
        assert_eq!(buf, &[0x2a]);

        let mut negative = &[0xff, 0xff, 0xff, 0xff, 0x0f][..];
        assert_eq!(read_varint(&mut negative).unwrap(), -1);
    }

    #[test]
    fn test_read_varint_rejects_bad_input() {
        let mut truncated = &[0x80, 0x80][..];
        assert!(matches!(read_varint(&mut truncated), Err(StatusError::Protocol(_))));

        let mut too_long = &[0xff, 0xff, 0xff, 0xff, 0xff, 0x01][..];
        assert!(matches!(read_varint(&mut too_long), Err(StatusError::Protocol(_))));
    }

    #[test]
    fn test_read_string_bounds() {
        let mut buf = Vec::new();
        write_string(&mut buf, "hello");
        let mut slice = buf.as_slice();
        assert_eq!(read_string(&mut slice).unwrap(), "hello");
        assert!(slice.is_empty());

        let mut short = &[0x05, b'h', b'i'][..];
        assert!(read_string(&mut short).is_err());
    }

    #[test]
    fn test_parse_status() {
        let json = r#"{
            "version": {"name": "1.21", "protocol": 767},
            "players": {
                "max": 20,
                "online": 5,
                "sample": [
                    {"name": "Steve", "id": "8667ba71-b85a-4004-af54-457a9734eed7"},
                    {"name": "Alex", "id": "ec561538-f3fd-461d-aff5-086b22154bce"}
                ]
            },
            "description": {"text": "A Minecraft Server"}
        }"#;
        let (online, players) = parse_status(json).unwrap();
        assert_eq!(online, 5);
        assert_eq!(players.len(), 2);
        assert_eq!(players[0].name, "Steve");
        assert_eq!(players[1].uuid, "ec561538-f3fd-461d-aff5-086b22154bce");
    }

    #[test]
    fn test_parse_status_without_sample() {
        let (online, players) = parse_status(r#"{"players": {"max": 20, "online": 0}}"#).unwrap();
        assert_eq!(online, 0);
        assert!(players.is_empty());

        let (online, _) = parse_status(r#"{"description": "hi"}"#).unwrap();
        assert_eq!(online, 0);

        assert!(matches!(parse_status("not json"), Err(StatusError::Json(_))));
    }

    #[tokio::test]
    async fn test_exchange_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        let server_task = tokio::spawn(async move {
            let handshake = read_packet(&mut server).await.unwrap();
            let mut buf = handshake.as_slice();
            assert_eq!(read_varint(&mut buf).unwrap(), 0x00);
            assert_eq!(read_varint(&mut buf).unwrap(), PROTOCOL_VERSION);
            assert_eq!(read_string(&mut buf).unwrap(), "mc.local");
            assert_eq!(&buf[..2], &25565u16.to_be_bytes());
            buf = &buf[2..];
            assert_eq!(read_varint(&mut buf).unwrap(), NEXT_STATE_STATUS);

            assert_eq!(read_packet(&mut server).await.unwrap(), vec![0x00]);

            let mut response = Vec::new();
            write_varint(&mut response, STATUS_PACKET_ID);
            write_string(&mut response, r#"{"players":{"online":1,"sample":[{"name":"Steve"}]}}"#);
            write_packet(&mut server, &response).await.unwrap();
        });

        let status = exchange(&mut client, "mc.local", 25565, false).await.unwrap();
        server_task.await.unwrap();

        assert_eq!(status.online, 1);
        assert_eq!(status.players, vec![Player::named("Steve")]);
        assert_eq!(status.ping, None);
    }
}
