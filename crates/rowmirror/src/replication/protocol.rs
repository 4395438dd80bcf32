//! MySQL replication client
//!
//! Just enough of the client/server protocol to follow a binlog:
//! - handshake and authentication (mysql_native_password, caching_sha2_password fast path)
//! - COM_QUERY for session variables
//! - COM_REGISTER_SLAVE
//! - COM_BINLOG_DUMP and the resulting event stream
//!
//! Result sets are not read here; anything that needs one goes through the
//! [`Store`](crate::store::Store).

use anyhow::{bail, Context, Result};
use bytes::{BufMut, Bytes, BytesMut};
use sha1::{Digest, Sha1};
use sha2::Sha256;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, trace, warn};

use crate::common::BinlogPosition;

/// Largest payload a single packet can carry; longer payloads are split.
const MAX_PACKET_SIZE: usize = 0x00FF_FFFF;

/// utf8mb4_general_ci
const CHARSET_UTF8MB4: u8 = 45;

const COM_QUERY: u8 = 0x03;
const COM_BINLOG_DUMP: u8 = 0x12;
const COM_REGISTER_SLAVE: u8 = 0x15;

const OK: u8 = 0x00;
const EOF: u8 = 0xFE;
const ERR: u8 = 0xFF;

/// Client/server capability bits used during the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityFlags(u32);

impl CapabilityFlags {
    pub const CLIENT_LONG_PASSWORD: u32 = 0x0000_0001;
    pub const CLIENT_CONNECT_WITH_DB: u32 = 0x0000_0008;
    pub const CLIENT_PROTOCOL_41: u32 = 0x0000_0200;
    pub const CLIENT_SSL: u32 = 0x0000_0800;
    pub const CLIENT_TRANSACTIONS: u32 = 0x0000_2000;
    pub const CLIENT_SECURE_CONNECTION: u32 = 0x0000_8000;
    pub const CLIENT_PLUGIN_AUTH: u32 = 0x0008_0000;
    pub const CLIENT_DEPRECATE_EOF: u32 = 0x0100_0000;

    pub fn new(flags: u32) -> Self {
        Self(flags)
    }

    pub fn has(&self, flag: u32) -> bool {
        (self.0 & flag) != 0
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

/// Initial greeting sent by the server
#[derive(Debug, Clone)]
pub struct HandshakePacket {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    pub capability_flags: CapabilityFlags,
    pub character_set: u8,
    pub status_flags: u16,
    /// Scramble used by the auth plugins
    pub salt: Vec<u8>,
    pub auth_plugin_name: String,
}

impl HandshakePacket {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut buf = data;

        let protocol_version = take_u8(&mut buf)?;
        if protocol_version != 10 {
            bail!("Unsupported handshake protocol version {}", protocol_version);
        }
        let server_version = take_cstr(&mut buf)?;
        let connection_id = u32::from_le_bytes(take_array(&mut buf)?);
        let mut salt = take(&mut buf, 8)?.to_vec();
        take_u8(&mut buf)?; // filler
        let cap_lower = u16::from_le_bytes(take_array(&mut buf)?);
        let character_set = take_u8(&mut buf)?;
        let status_flags = u16::from_le_bytes(take_array(&mut buf)?);
        let cap_upper = u16::from_le_bytes(take_array(&mut buf)?);
        let capability_flags =
            CapabilityFlags::new((u32::from(cap_upper) << 16) | u32::from(cap_lower));
        let auth_data_len = usize::from(take_u8(&mut buf)?);
        take(&mut buf, 10)?; // reserved

        if capability_flags.has(CapabilityFlags::CLIENT_SECURE_CONNECTION) {
            let len = auth_data_len.saturating_sub(8).max(13).min(buf.len());
            let part2 = take(&mut buf, len)?;
            let end = part2.iter().position(|&b| b == 0).unwrap_or(part2.len());
            salt.extend_from_slice(&part2[..end]);
        }

        let auth_plugin_name = if capability_flags.has(CapabilityFlags::CLIENT_PLUGIN_AUTH) {
            let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
            String::from_utf8_lossy(&buf[..end]).into_owned()
        } else {
            String::new()
        };

        Ok(Self {
            protocol_version,
            server_version,
            connection_id,
            capability_flags,
            character_set,
            status_flags,
            salt,
            auth_plugin_name,
        })
    }
}

fn take<'a>(buf: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
    if buf.len() < n {
        bail!("Handshake packet truncated: need {} bytes, have {}", n, buf.len());
    }
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

fn take_u8(buf: &mut &[u8]) -> Result<u8> {
    Ok(take(buf, 1)?[0])
}

fn take_array<const N: usize>(buf: &mut &[u8]) -> Result<[u8; N]> {
    let mut out = [0u8; N];
    out.copy_from_slice(take(buf, N)?);
    Ok(out)
}

fn take_cstr(buf: &mut &[u8]) -> Result<String> {
    let end = buf
        .iter()
        .position(|&b| b == 0)
        .context("Unterminated string in handshake packet")?;
    let s = String::from_utf8_lossy(&buf[..end]).into_owned();
    *buf = &buf[end + 1..];
    Ok(s)
}

/// `code - message` from an ERR packet
fn server_error(packet: &[u8]) -> String {
    let code = packet
        .get(1..3)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .unwrap_or(0);
    // Protocol 4.1 puts '#' and a five character SQL state before the message
    let message = match packet.get(3) {
        Some(b'#') => packet.get(9..),
        _ => packet.get(3..),
    }
    .unwrap_or_default();
    format!("{} - {}", code, String::from_utf8_lossy(message))
}

/// SHA1(password) XOR SHA1(salt + SHA1(SHA1(password)))
pub fn native_password_scramble(password: Option<&str>, salt: &[u8]) -> Vec<u8> {
    let Some(password) = password.filter(|p| !p.is_empty()) else {
        return Vec::new();
    };
    let stage1 = Sha1::digest(password.as_bytes());
    let stage2 = Sha1::digest(stage1);
    let mut hasher = Sha1::new();
    hasher.update(salt);
    hasher.update(stage2);
    let stage3 = hasher.finalize();
    stage1.iter().zip(stage3.iter()).map(|(a, b)| a ^ b).collect()
}

/// SHA256(password) XOR SHA256(SHA256(SHA256(password)) + salt)
pub fn sha2_password_scramble(password: Option<&str>, salt: &[u8]) -> Vec<u8> {
    let Some(password) = password.filter(|p| !p.is_empty()) else {
        return Vec::new();
    };
    let hash1 = Sha256::digest(password.as_bytes());
    let hash2 = Sha256::digest(hash1);
    let mut hasher = Sha256::new();
    hasher.update(hash2);
    hasher.update(salt);
    let hash3 = hasher.finalize();
    hash1.iter().zip(hash3.iter()).map(|(a, b)| a ^ b).collect()
}

fn scramble(plugin: &str, password: Option<&str>, salt: &[u8]) -> Result<Vec<u8>> {
    match plugin {
        "mysql_native_password" => Ok(native_password_scramble(password, salt)),
        "caching_sha2_password" | "sha256_password" => Ok(sha2_password_scramble(password, salt)),
        "" => Ok(native_password_scramble(password, salt)),
        other => bail!("Unsupported auth plugin: {}", other),
    }
}

/// A replication connection
pub struct BinlogClient<S = TcpStream> {
    stream: BufReader<S>,
    sequence_id: u8,
    server_version: String,
    connection_id: u32,
}

impl<S> std::fmt::Debug for BinlogClient<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinlogClient")
            .field("server_version", &self.server_version)
            .field("connection_id", &self.connection_id)
            .field("sequence_id", &self.sequence_id)
            .finish_non_exhaustive()
    }
}

impl BinlogClient<TcpStream> {
    /// Open a TCP connection and authenticate.
    pub async fn connect(
        host: &str,
        port: u16,
        user: &str,
        password: Option<&str>,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let addr = format!("{}:{}", host, port);
        info!("Connecting to MySQL at {}", addr);

        let stream = match timeout(connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(e).context("Failed to connect to MySQL server"),
            Err(_) => bail!(
                "Connection timeout after {:?} connecting to {}",
                connect_timeout,
                addr
            ),
        };
        stream.set_nodelay(true).ok();

        Self::handshake(stream, user, password).await
    }
}

impl<S> BinlogClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Run the handshake over an established stream.
    pub async fn handshake(stream: S, user: &str, password: Option<&str>) -> Result<Self> {
        let mut client = Self {
            stream: BufReader::new(stream),
            sequence_id: 0,
            server_version: String::new(),
            connection_id: 0,
        };

        let greeting = client.read_packet().await?;
        if greeting.first() == Some(&ERR) {
            bail!("Server refused connection: {}", server_error(&greeting));
        }
        let handshake =
            HandshakePacket::parse(&greeting).context("Failed to parse handshake packet")?;
        client.server_version = handshake.server_version.clone();
        client.connection_id = handshake.connection_id;

        info!(
            "Connected to MySQL {} (connection_id={})",
            handshake.server_version, handshake.connection_id
        );
        debug!("Auth plugin: {}", handshake.auth_plugin_name);

        client.authenticate(user, password, &handshake).await?;
        Ok(client)
    }

    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    pub fn connection_id(&self) -> u32 {
        self.connection_id
    }

    pub fn is_mariadb(&self) -> bool {
        self.server_version.contains("MariaDB")
    }

    /// Read one logical packet, joining continuation packets.
    async fn read_packet(&mut self) -> Result<Vec<u8>> {
        let mut payload = Vec::new();
        loop {
            let mut header = [0u8; 4];
            self.stream
                .read_exact(&mut header)
                .await
                .context("Failed to read packet header")?;
            let len = usize::from(header[0])
                | (usize::from(header[1]) << 8)
                | (usize::from(header[2]) << 16);
            self.sequence_id = header[3].wrapping_add(1);

            let start = payload.len();
            payload.resize(start + len, 0);
            self.stream
                .read_exact(&mut payload[start..])
                .await
                .context("Failed to read packet payload")?;

            if len < MAX_PACKET_SIZE {
                return Ok(payload);
            }
        }
    }

    async fn write_packet(&mut self, data: &[u8]) -> Result<()> {
        if data.len() >= MAX_PACKET_SIZE {
            bail!("Packet too large: {} bytes", data.len());
        }
        let len = data.len();
        let mut packet = BytesMut::with_capacity(4 + len);
        packet.put_u8((len & 0xFF) as u8);
        packet.put_u8(((len >> 8) & 0xFF) as u8);
        packet.put_u8(((len >> 16) & 0xFF) as u8);
        packet.put_u8(self.sequence_id);
        packet.put_slice(data);

        let stream = self.stream.get_mut();
        stream.write_all(&packet).await?;
        stream.flush().await?;
        self.sequence_id = self.sequence_id.wrapping_add(1);
        Ok(())
    }

    async fn authenticate(
        &mut self,
        user: &str,
        password: Option<&str>,
        handshake: &HandshakePacket,
    ) -> Result<()> {
        let client_flags = CapabilityFlags::CLIENT_PROTOCOL_41
            | CapabilityFlags::CLIENT_SECURE_CONNECTION
            | CapabilityFlags::CLIENT_LONG_PASSWORD
            | CapabilityFlags::CLIENT_TRANSACTIONS
            | CapabilityFlags::CLIENT_PLUGIN_AUTH
            | CapabilityFlags::CLIENT_DEPRECATE_EOF;

        let plugin = handshake.auth_plugin_name.as_str();
        let auth_response = match scramble(plugin, password, &handshake.salt) {
            Ok(response) => response,
            Err(_) => {
                warn!("Unknown auth plugin {}, trying mysql_native_password", plugin);
                native_password_scramble(password, &handshake.salt)
            }
        };

        let mut response = BytesMut::with_capacity(64 + user.len() + auth_response.len());
        response.put_u32_le(client_flags);
        response.put_u32_le(MAX_PACKET_SIZE as u32);
        response.put_u8(CHARSET_UTF8MB4);
        response.put_slice(&[0u8; 23]);
        response.put_slice(user.as_bytes());
        response.put_u8(0);
        response.put_u8(auth_response.len() as u8);
        response.put_slice(&auth_response);
        response.put_slice(plugin.as_bytes());
        response.put_u8(0);

        self.write_packet(&response).await?;
        let reply = self.read_packet().await?;
        self.auth_reply(plugin, password, reply).await
    }

    /// Follow the server's answer to an auth response, including one plugin
    /// switch.
    async fn auth_reply(&mut self, plugin: &str, password: Option<&str>, reply: Vec<u8>) -> Result<()> {
        match reply.first() {
            Some(&OK) => {
                debug!("Authentication successful");
                Ok(())
            }
            Some(&ERR) => bail!("Authentication failed: {}", server_error(&reply)),
            Some(&EOF) => {
                let body = &reply[1..];
                let end = body.iter().position(|&b| b == 0).unwrap_or(body.len());
                let switched = String::from_utf8_lossy(&body[..end]).into_owned();
                let salt = body.get(end + 1..).unwrap_or_default();
                let salt = salt.strip_suffix(&[0]).unwrap_or(salt);
                debug!("Auth switch to plugin: {}", switched);

                let response = scramble(&switched, password, salt)?;
                self.write_packet(&response).await?;
                let reply = self.read_packet().await?;
                match reply.first() {
                    Some(&OK) => Ok(()),
                    Some(&ERR) => bail!("Auth switch failed: {}", server_error(&reply)),
                    Some(0x01) if switched == "caching_sha2_password" => {
                        self.sha2_fast_auth(reply).await
                    }
                    _ => bail!("Unexpected auth switch response"),
                }
            }
            Some(0x01) if plugin == "caching_sha2_password" => self.sha2_fast_auth(reply).await,
            Some(other) => bail!("Unexpected auth response: 0x{:02X}", other),
            None => bail!("Empty auth response"),
        }
    }

    /// caching_sha2_password sends 0x01 0x03 when the cached scramble
    /// matched, followed by the final OK.
    async fn sha2_fast_auth(&mut self, reply: Vec<u8>) -> Result<()> {
        if reply.get(1) != Some(&0x03) {
            bail!("caching_sha2_password full authentication requires a secure connection");
        }
        debug!("Fast auth success");
        let ok = self.read_packet().await?;
        match ok.first() {
            Some(&OK) => Ok(()),
            Some(&ERR) => bail!("Authentication failed: {}", server_error(&ok)),
            _ => bail!("Unexpected packet after fast auth"),
        }
    }

    /// Run a statement that returns no result set.
    pub async fn query(&mut self, sql: &str) -> Result<()> {
        self.sequence_id = 0;
        let mut packet = BytesMut::with_capacity(sql.len() + 1);
        packet.put_u8(COM_QUERY);
        packet.put_slice(sql.as_bytes());
        self.write_packet(&packet).await?;

        let reply = self.read_packet().await?;
        match reply.first() {
            Some(&OK) => {
                trace!("Query ok: {}", sql);
                Ok(())
            }
            Some(&ERR) => bail!("Query failed: {}", server_error(&reply)),
            _ => bail!("Query returned a result set: {}", sql),
        }
    }

    /// Announce this connection as a replica.
    pub async fn register_replica(&mut self, server_id: u32) -> Result<()> {
        self.sequence_id = 0;
        let mut packet = BytesMut::with_capacity(18);
        packet.put_u8(COM_REGISTER_SLAVE);
        packet.put_u32_le(server_id);
        packet.put_u8(0); // hostname
        packet.put_u8(0); // user
        packet.put_u8(0); // password
        packet.put_u16_le(0); // port
        packet.put_u32_le(0); // replication rank
        packet.put_u32_le(0); // master id
        self.write_packet(&packet).await?;

        let reply = self.read_packet().await?;
        match reply.first() {
            Some(&OK) => {
                info!("Registered as replica with server_id={}", server_id);
                Ok(())
            }
            Some(&ERR) => bail!("Failed to register as replica: {}", server_error(&reply)),
            _ => bail!("Unexpected response to COM_REGISTER_SLAVE"),
        }
    }

    /// Start streaming from `position`.
    pub async fn binlog_dump(
        &mut self,
        server_id: u32,
        position: &BinlogPosition,
    ) -> Result<BinlogStream<'_, S>> {
        self.sequence_id = 0;
        let mut packet = BytesMut::with_capacity(position.file.len() + 11);
        packet.put_u8(COM_BINLOG_DUMP);
        packet.put_u32_le(position.position);
        packet.put_u16_le(0); // flags: block for new events
        packet.put_u32_le(server_id);
        packet.put_slice(position.file.as_bytes());
        self.write_packet(&packet).await?;

        info!("Started binlog dump from {}", position);
        Ok(BinlogStream { client: self })
    }
}

/// Events of a running binlog dump
pub struct BinlogStream<'a, S = TcpStream> {
    client: &'a mut BinlogClient<S>,
}

impl<S> BinlogStream<'_, S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Next raw event (header included), `None` once the server ends the
    /// stream.
    pub async fn next_event(&mut self) -> Result<Option<Bytes>> {
        let packet = Bytes::from(self.client.read_packet().await?);
        match packet.first() {
            None => Ok(None),
            Some(&OK) => Ok(Some(packet.slice(1..))),
            Some(&EOF) if packet.len() < 9 => {
                debug!("Received EOF in binlog stream");
                Ok(None)
            }
            Some(&ERR) => bail!("Binlog error: {}", server_error(&packet)),
            Some(other) => bail!("Unexpected binlog packet marker 0x{:02X}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::DuplexStream;

    const SALT: &[u8; 20] = b"abcdefgh123456789012";

    fn greeting(plugin: &str) -> Vec<u8> {
        let caps = CapabilityFlags::CLIENT_PROTOCOL_41
            | CapabilityFlags::CLIENT_SECURE_CONNECTION
            | CapabilityFlags::CLIENT_PLUGIN_AUTH;
        let mut p = vec![10];
        p.extend_from_slice(b"8.0.36\0");
        p.extend_from_slice(&7u32.to_le_bytes());
        p.extend_from_slice(&SALT[..8]);
        p.push(0);
        p.extend_from_slice(&(caps as u16).to_le_bytes());
        p.push(CHARSET_UTF8MB4);
        p.extend_from_slice(&2u16.to_le_bytes());
        p.extend_from_slice(&((caps >> 16) as u16).to_le_bytes());
        p.push(21);
        p.extend_from_slice(&[0u8; 10]);
        p.extend_from_slice(&SALT[8..]);
        p.push(0);
        p.extend_from_slice(plugin.as_bytes());
        p.push(0);
        p
    }

    /// Server half of the connection
    struct FakeServer {
        stream: DuplexStream,
        seq: u8,
    }

    impl FakeServer {
        async fn send(&mut self, payload: &[u8]) {
            let len = payload.len();
            let mut packet = vec![len as u8, (len >> 8) as u8, (len >> 16) as u8, self.seq];
            packet.extend_from_slice(payload);
            self.stream.write_all(&packet).await.unwrap();
            self.seq = self.seq.wrapping_add(1);
        }

        async fn recv(&mut self) -> Vec<u8> {
            let mut header = [0u8; 4];
            self.stream.read_exact(&mut header).await.unwrap();
            let len = usize::from(header[0]) | usize::from(header[1]) << 8 | usize::from(header[2]) << 16;
            self.seq = header[3].wrapping_add(1);
            let mut payload = vec![0u8; len];
            self.stream.read_exact(&mut payload).await.unwrap();
            payload
        }
    }

    fn pair() -> (DuplexStream, FakeServer) {
        let (client, server) = tokio::io::duplex(4096);
        (client, FakeServer { stream: server, seq: 0 })
    }

    #[test]
    fn test_native_password_scramble() {
        let result = native_password_scramble(Some("password"), SALT);
        assert_eq!(result.len(), 20);
        assert_ne!(result, native_password_scramble(Some("other"), SALT));
        assert!(native_password_scramble(None, SALT).is_empty());
        assert!(native_password_scramble(Some(""), SALT).is_empty());
    }

    #[test]
    fn test_sha2_password_scramble() {
        assert_eq!(sha2_password_scramble(Some("password"), SALT).len(), 32);
        assert!(sha2_password_scramble(None, SALT).is_empty());
    }

    #[test]
    fn test_parse_handshake() {
        let handshake = HandshakePacket::parse(&greeting("mysql_native_password")).unwrap();
        assert_eq!(handshake.server_version, "8.0.36");
        assert_eq!(handshake.connection_id, 7);
        assert_eq!(handshake.salt, SALT.to_vec());
        assert_eq!(handshake.auth_plugin_name, "mysql_native_password");
        assert!(handshake.capability_flags.has(CapabilityFlags::CLIENT_PLUGIN_AUTH));
    }

    #[test]
    fn test_parse_handshake_with_short_scramble_tail() {
        // Greeting ends right after the 12 scramble bytes, without a NUL
        let packet = greeting("");
        let handshake = HandshakePacket::parse(&packet[..packet.len() - 2]).unwrap();
        assert_eq!(handshake.salt, SALT.to_vec());
        assert_eq!(handshake.auth_plugin_name, "");
    }

    #[test]
    fn test_parse_truncated_handshake() {
        let packet = greeting("mysql_native_password");
        assert!(HandshakePacket::parse(&packet[..12]).is_err());
    }

    #[test]
    fn test_server_error_message() {
        let mut packet = vec![ERR];
        packet.extend_from_slice(&1045u16.to_le_bytes());
        packet.extend_from_slice(b"#28000Access denied");
        assert_eq!(server_error(&packet), "1045 - Access denied");
        assert_eq!(server_error(&[ERR]), "0 - ");
    }

    #[tokio::test]
    async fn test_handshake_and_binlog_dump() {
        let (client_io, mut server) = pair();

        let server_task = tokio::spawn(async move {
            server.send(&greeting("mysql_native_password")).await;

            let response = server.recv().await;
            let user_end = 32 + response[32..].iter().position(|&b| b == 0).unwrap();
            assert_eq!(&response[32..user_end], b"repl");
            let len = usize::from(response[user_end + 1]);
            let auth = &response[user_end + 2..user_end + 2 + len];
            assert_eq!(auth, native_password_scramble(Some("secret"), SALT).as_slice());
            server.send(&[OK, 0, 0, 2, 0, 0, 0]).await;

            let query = server.recv().await;
            assert_eq!(query[0], COM_QUERY);
            assert_eq!(&query[1..], b"SET @master_binlog_checksum = 'NONE'");
            server.send(&[OK, 0, 0, 2, 0, 0, 0]).await;

            let dump = server.recv().await;
            assert_eq!(dump[0], COM_BINLOG_DUMP);
            assert_eq!(u32::from_le_bytes(dump[1..5].try_into().unwrap()), 154);
            assert_eq!(&dump[11..], b"binlog.000003");
            server.send(&[OK, 1, 2, 3]).await;
            server.send(&[EOF, 0, 0, 0, 0]).await;
        });

        let mut client = BinlogClient::handshake(client_io, "repl", Some("secret"))
            .await
            .unwrap();
        assert_eq!(client.server_version(), "8.0.36");
        assert_eq!(client.connection_id(), 7);
        assert!(!client.is_mariadb());

        client
            .query("SET @master_binlog_checksum = 'NONE'")
            .await
            .unwrap();

        let position = BinlogPosition::new("binlog.000003", 154);
        let mut stream = client.binlog_dump(42, &position).await.unwrap();
        assert_eq!(
            stream.next_event().await.unwrap(),
            Some(Bytes::from_static(&[1, 2, 3]))
        );
        assert_eq!(stream.next_event().await.unwrap(), None);

        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_authentication_failure() {
        let (client_io, mut server) = pair();
        tokio::spawn(async move {
            server.send(&greeting("mysql_native_password")).await;
            server.recv().await;
            let mut err = vec![ERR];
            err.extend_from_slice(&1045u16.to_le_bytes());
            err.extend_from_slice(b"#28000Access denied for user");
            server.send(&err).await;
        });

        let err = BinlogClient::handshake(client_io, "repl", Some("wrong"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("1045"), "{err}");
    }

    #[tokio::test]
    async fn test_auth_switch_to_native_password() {
        let (client_io, mut server) = pair();
        tokio::spawn(async move {
            server.send(&greeting("caching_sha2_password")).await;
            server.recv().await;

            let mut switch = vec![EOF];
            switch.extend_from_slice(b"mysql_native_password\0");
            switch.extend_from_slice(SALT);
            switch.push(0);
            server.send(&switch).await;

            let auth = server.recv().await;
            assert_eq!(auth, native_password_scramble(Some("secret"), SALT));
            server.send(&[OK, 0, 0, 2, 0, 0, 0]).await;
        });

        BinlogClient::handshake(client_io, "repl", Some("secret"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_stream_error_packet() {
        let (client_io, mut server) = pair();
        tokio::spawn(async move {
            server.send(&greeting("mysql_native_password")).await;
            server.recv().await;
            server.send(&[OK, 0, 0, 2, 0, 0, 0]).await;
            server.recv().await;
            let mut err = vec![ERR];
            err.extend_from_slice(&1236u16.to_le_bytes());
            err.extend_from_slice(b"#HY000Could not find first log file name");
            server.send(&err).await;
        });

        let mut client = BinlogClient::handshake(client_io, "repl", None).await.unwrap();
        let position = BinlogPosition::new("missing.000001", 4);
        let mut stream = client.binlog_dump(42, &position).await.unwrap();
        let err = stream.next_event().await.unwrap_err();
        assert!(err.to_string().contains("1236"), "{err}");
    }
}
