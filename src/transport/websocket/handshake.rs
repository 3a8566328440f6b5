//! HTTP/1.1 upgrade handshake, server side.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::HandshakeError;

pub const ACCEPT_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
pub const SUPPORTED_VERSION: &str = "13";

/// Raw header lines of an opening request, request line first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRequest {
    pub request_line: String,
    pub headers: Vec<(String, String)>,
}

impl RawRequest {
    /// Value of the first header named `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// A request that passed every check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upgrade {
    pub key: String,
    pub subprotocol: String,
}

/// Read header lines up to the blank line, never more than `max_bytes`.
pub async fn read_request<R>(reader: &mut R, max_bytes: usize) -> Result<RawRequest, HandshakeError>
where
    R: AsyncBufRead + Unpin,
{
    let mut limited = reader.take(max_bytes as u64);
    let mut lines = Vec::new();
    let mut line = Vec::new();

    loop {
        line.clear();
        let n = limited
            .read_until(b'\n', &mut line)
            .await
            .map_err(|_| HandshakeError::ConnectionClosed)?;
        if n == 0 || line.last() != Some(&b'\n') {
            return Err(if limited.limit() == 0 {
                HandshakeError::HeadersTooLarge(max_bytes)
            } else {
                HandshakeError::ConnectionClosed
            });
        }

        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end_matches(['\r', '\n']);
        if text.is_empty() {
            break;
        }
        lines.push(text.to_string());
    }

    let mut lines = lines.into_iter();
    let request_line = lines
        .next()
        .ok_or_else(|| HandshakeError::MalformedRequest(String::new()))?;
    let headers = lines
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            Some((name.trim().to_string(), value.trim().to_string()))
        })
        .collect();

    Ok(RawRequest {
        request_line,
        headers,
    })
}

/// Check a request against RFC 6455 section 4.2.1.
///
/// The version header is checked last, so [`HandshakeError::UnsupportedVersion`]
/// means it was the only thing wrong.
pub fn validate(request: &RawRequest, subprotocol: &str) -> Result<Upgrade, HandshakeError> {
    check_request_line(&request.request_line)?;

    if request.header("Host").map_or(true, str::is_empty) {
        return Err(HandshakeError::MissingHost);
    }

    let upgrade = request.header("Upgrade").unwrap_or_default();
    let connection = request.header("Connection").unwrap_or_default();
    if !contains_token(upgrade, "websocket") || !contains_token(connection, "upgrade") {
        return Err(HandshakeError::NotAnUpgrade);
    }

    let offered = request.header("Sec-WebSocket-Protocol").unwrap_or_default();
    if !contains_token(offered, subprotocol) {
        return Err(HandshakeError::SubprotocolMismatch(subprotocol.to_string()));
    }

    let key = request
        .header("Sec-WebSocket-Key")
        .ok_or(HandshakeError::MissingKey)?;
    match STANDARD.decode(key) {
        Ok(nonce) if nonce.len() == 16 => {}
        _ => return Err(HandshakeError::InvalidKey(key.to_string())),
    }

    let version = request.header("Sec-WebSocket-Version");
    if version != Some(SUPPORTED_VERSION) {
        return Err(HandshakeError::UnsupportedVersion(version.map(str::to_string)));
    }

    Ok(Upgrade {
        key: key.to_string(),
        subprotocol: subprotocol.to_string(),
    })
}

fn check_request_line(line: &str) -> Result<(), HandshakeError> {
    let malformed = || HandshakeError::MalformedRequest(line.to_string());

    let mut parts = line.split_whitespace();
    let (Some(method), Some(_target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(malformed());
    };
    if method != "GET" {
        return Err(malformed());
    }

    let (major, minor) = version
        .strip_prefix("HTTP/")
        .and_then(|v| v.split_once('.'))
        .ok_or_else(malformed)?;
    let major: u32 = major.parse().map_err(|_| malformed())?;
    let minor: u32 = minor.parse().map_err(|_| malformed())?;
    if (major, minor) < (1, 1) {
        return Err(HandshakeError::UnsupportedHttpVersion(major, minor));
    }
    Ok(())
}

/// Whether a comma-separated header value lists `token` (case-insensitive).
fn contains_token(value: &str, token: &str) -> bool {
    value
        .split(',')
        .any(|item| item.trim().eq_ignore_ascii_case(token))
}

/// `base64(sha1(key + GUID))`.
pub fn accept_token(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(ACCEPT_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

pub fn switching_protocols(upgrade: &Upgrade) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Protocol: {}\r\n\
         Sec-WebSocket-Accept: {}\r\n\
         \r\n",
        upgrade.subprotocol,
        accept_token(&upgrade.key)
    )
}

pub fn bad_request(error: &HandshakeError) -> String {
    let version = match error {
        HandshakeError::UnsupportedVersion(_) => {
            format!("Sec-WebSocket-Version: {}\r\n", SUPPORTED_VERSION)
        }
        _ => String::new(),
    };
    format!(
        "HTTP/1.1 400 Bad Request\r\n\
         Connection: close\r\n\
         {}Content-Length: 0\r\n\
         \r\n",
        version
    )
}

/// Run the server half of the handshake on an already accepted stream.
pub async fn accept<R, W>(
    reader: &mut R,
    writer: &mut W,
    subprotocol: &str,
    max_header_bytes: usize,
) -> Result<Upgrade, HandshakeError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let outcome = match read_request(reader, max_header_bytes).await {
        Ok(request) => validate(&request, subprotocol),
        Err(HandshakeError::ConnectionClosed) => return Err(HandshakeError::ConnectionClosed),
        Err(e) => Err(e),
    };

    let response = match &outcome {
        Ok(upgrade) => switching_protocols(upgrade),
        Err(e) => bad_request(e),
    };
    // A peer that vanished before reading the response changes nothing.
    let _ = writer.write_all(response.as_bytes()).await;
    let _ = writer.flush().await;

    outcome
}
