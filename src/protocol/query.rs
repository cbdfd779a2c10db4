use super::ProtocolError;
use crate::console::PlayerList;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;

/// Query 클라이언트 (GameSpy4 / Minecraft `enable-query`)
///
/// 프로토콜 명세:
/// - UDP, 모든 정수는 빅엔디안
/// - 핸드셰이크로 challenge token을 받은 뒤 full stat 요청
/// - 응답은 NUL 종료 문자열의 key/value 목록과 플레이어 이름 목록
#[derive(Debug, Clone)]
pub struct QueryClient {
    host: String,
    port: u16,
    timeout: Duration,
}

const MAGIC: [u8; 2] = [0xFE, 0xFD];
const TYPE_HANDSHAKE: u8 = 0x09;
const TYPE_STAT: u8 = 0x00;
const SESSION_MASK: i32 = 0x0F0F_0F0F;
const KV_PADDING: &[u8] = b"splitnum\x00\x80\x00";
const PLAYER_PADDING: &[u8] = b"\x01player_\x00\x00";
const MAX_PACKET: usize = 65_535;

/// Parsed full-stat response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FullStat {
    pub motd: String,
    pub version: String,
    pub map: String,
    pub num_players: u32,
    pub max_players: u32,
    pub players: Vec<String>,
    /// Every key/value pair as sent by the server.
    pub data: HashMap<String, String>,
}

impl From<FullStat> for PlayerList {
    fn from(stat: FullStat) -> Self {
        PlayerList {
            count: stat.num_players,
            max: stat.max_players,
            players: stat.players,
        }
    }
}

impl QueryClient {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self { host: host.into(), port, timeout }
    }

    /// Handshake plus full stat, bounded by the client timeout as a whole.
    pub async fn full_stat(&self) -> Result<FullStat, ProtocolError> {
        tokio::time::timeout(self.timeout, self.exchange())
            .await
            .map_err(|_| {
                ProtocolError::TimeoutError(format!(
                    "no query response from {}:{} within {:?}",
                    self.host, self.port, self.timeout
                ))
            })?
    }

    /// Convenience for callers that only want occupancy.
    pub async fn player_list(&self) -> Result<PlayerList, ProtocolError> {
        self.full_stat().await.map(PlayerList::from)
    }

    async fn exchange(&self) -> Result<FullStat, ProtocolError> {
        let addr = format!("{}:{}", self.host, self.port);
        let target = tokio::net::lookup_host(&addr)
            .await
            .map_err(|e| ProtocolError::ConnectionError(format!("Failed to resolve {}: {}", addr, e)))?
            .next()
            .ok_or_else(|| ProtocolError::ConnectionError(format!("No address for {}", addr)))?;

        let bind: SocketAddr = if target.is_ipv4() {
            ([0u8; 4], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind)
            .await
            .map_err(|e| ProtocolError::ConnectionError(format!("Failed to bind UDP socket: {}", e)))?;
        socket
            .connect(target)
            .await
            .map_err(|e| ProtocolError::ConnectionError(format!("Failed to connect to {}: {}", addr, e)))?;

        let session_id = new_session_id();
        let mut buf = vec![0u8; MAX_PACKET];

        send(&socket, &handshake_packet(session_id)?).await?;
        let n = recv(&socket, &mut buf).await?;
        let token = parse_handshake(&buf[..n], session_id)?;

        send(&socket, &full_stat_packet(session_id, token)?).await?;
        let n = recv(&socket, &mut buf).await?;
        let stat = parse_full_stat(&buf[..n], session_id)?;

        tracing::debug!(
            "Query {}: {}/{} players",
            addr,
            stat.num_players,
            stat.max_players
        );
        Ok(stat)
    }
}

async fn send(socket: &UdpSocket, packet: &[u8]) -> Result<(), ProtocolError> {
    socket
        .send(packet)
        .await
        .map_err(|e| ProtocolError::ConnectionError(format!("Failed to send query packet: {}", e)))?;
    Ok(())
}

async fn recv(socket: &UdpSocket, buf: &mut [u8]) -> Result<usize, ProtocolError> {
    socket
        .recv(buf)
        .await
        .map_err(|e| ProtocolError::ConnectionError(format!("Failed to receive query packet: {}", e)))
}

fn new_session_id() -> i32 {
    (uuid::Uuid::new_v4().as_u128() as i32) & SESSION_MASK
}

fn request_header(kind: u8, session_id: i32) -> Result<Vec<u8>, ProtocolError> {
    let mut packet = Vec::with_capacity(15);
    packet.extend_from_slice(&MAGIC);
    packet.push(kind);
    packet
        .write_i32::<BigEndian>(session_id)
        .map_err(|e| ProtocolError::Protocol(format!("Failed to write session id: {}", e)))?;
    Ok(packet)
}

fn handshake_packet(session_id: i32) -> Result<Vec<u8>, ProtocolError> {
    request_header(TYPE_HANDSHAKE, session_id)
}

fn full_stat_packet(session_id: i32, token: i32) -> Result<Vec<u8>, ProtocolError> {
    let mut packet = request_header(TYPE_STAT, session_id)?;
    packet
        .write_i32::<BigEndian>(token)
        .map_err(|e| ProtocolError::Protocol(format!("Failed to write challenge token: {}", e)))?;
    // 4바이트 패딩이 붙으면 basic stat 대신 full stat 응답
    packet.extend_from_slice(&[0, 0, 0, 0]);
    Ok(packet)
}

/// Check the 5-byte response header and return the payload after it.
fn response_body(packet: &[u8], kind: u8, session_id: i32) -> Result<&[u8], ProtocolError> {
    let mut cursor = packet;
    let got_kind = cursor
        .read_u8()
        .map_err(|e| ProtocolError::Protocol(format!("Failed to read packet type: {}", e)))?;
    let got_session = cursor
        .read_i32::<BigEndian>()
        .map_err(|e| ProtocolError::Protocol(format!("Failed to read session id: {}", e)))?;

    if got_kind != kind {
        return Err(ProtocolError::Protocol(format!(
            "Unexpected packet type {:#04x} (expected {:#04x})",
            got_kind, kind
        )));
    }
    if got_session != session_id {
        return Err(ProtocolError::Protocol(format!(
            "Session id mismatch: {} != {}",
            got_session, session_id
        )));
    }
    Ok(cursor)
}

fn parse_handshake(packet: &[u8], session_id: i32) -> Result<i32, ProtocolError> {
    let mut body = response_body(packet, TYPE_HANDSHAKE, session_id)?;
    let raw = read_cstr(&mut body)
        .ok_or_else(|| ProtocolError::Protocol("Truncated challenge token".to_string()))?;
    // 토큰은 i32 범위를 넘는 10진 문자열로 올 수 있음
    raw.trim()
        .parse::<i64>()
        .map(|token| token as i32)
        .map_err(|e| ProtocolError::Protocol(format!("Invalid challenge token '{}': {}", raw, e)))
}

fn parse_full_stat(packet: &[u8], session_id: i32) -> Result<FullStat, ProtocolError> {
    let body = response_body(packet, TYPE_STAT, session_id)?;
    let mut rest = body
        .strip_prefix(KV_PADDING)
        .ok_or_else(|| ProtocolError::Protocol("Missing key/value section".to_string()))?;

    let mut data = HashMap::new();
    loop {
        let key = read_cstr(&mut rest)
            .ok_or_else(|| ProtocolError::Protocol("Truncated key/value section".to_string()))?;
        if key.is_empty() {
            break;
        }
        let value = read_cstr(&mut rest)
            .ok_or_else(|| ProtocolError::Protocol(format!("Missing value for '{}'", key)))?;
        data.insert(key, value);
    }

    let mut players = Vec::new();
    if let Some(mut names) = rest.strip_prefix(PLAYER_PADDING) {
        while let Some(name) = read_cstr(&mut names) {
            if name.is_empty() {
                break;
            }
            players.push(name);
        }
    }

    let field = |key: &str| data.get(key).cloned().unwrap_or_default();
    let count = |key: &str| {
        data.get(key)
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(0)
    };
    let (motd, version, map) = (field("hostname"), field("version"), field("map"));
    let (num_players, max_players) = (count("numplayers"), count("maxplayers"));

    Ok(FullStat { motd, version, map, num_players, max_players, players, data })
}

/// Read a NUL-terminated string and advance past it.
fn read_cstr(input: &mut &[u8]) -> Option<String> {
    let pos = input.iter().position(|&b| b == 0)?;
    let s = String::from_utf8_lossy(&input[..pos]).into_owned();
    *input = &input[pos + 1..];
    Some(s)
}
