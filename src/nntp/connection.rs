use std::borrow::Cow;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_native_tls::TlsConnector;

use crate::config::DownloadConfig;
use crate::error::{EdrError, NntpError};

type Result<T> = std::result::Result<T, EdrError>;

/// Async NNTP connection that can be pooled.
///
/// Articles are addressed by message-id only, so no GROUP selection is ever
/// issued. Every command runs under the per-connection deadline.
impl std::fmt::Debug for NntpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NntpConnection")
            .field("command_timeout", &self.command_timeout)
            .finish_non_exhaustive()
    }
}

pub struct NntpConnection {
    writer: Box<dyn AsyncWrite + Unpin + Send>,
    reader: BufReader<Box<dyn AsyncRead + Unpin + Send>>,
    command_timeout: Duration,
}

impl NntpConnection {
    /// Create a new NNTP connection with optional shared TLS connector
    ///
    /// Using a shared TLS connector enables session reuse across connections
    /// to the same server, which significantly reduces handshake overhead.
    pub async fn connect(
        config: &DownloadConfig,
        tls_connector: Option<Arc<TlsConnector>>,
    ) -> Result<Self> {
        let addr = format!("{}:{}", config.host, config.port);
        let command_timeout = Duration::from_secs(config.command_timeout_secs);

        let tcp_stream = timeout(command_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| NntpError::Timeout {
                seconds: command_timeout.as_secs(),
            })?
            .map_err(|e| NntpError::ConnectionFailed {
                host: config.host.clone(),
                port: config.port,
                source: e,
            })?;

        tcp_stream.set_nodelay(true)?;

        let (reader, writer): (
            Box<dyn AsyncRead + Unpin + Send>,
            Box<dyn AsyncWrite + Unpin + Send>,
        ) = if config.ssl {
            let connector = if let Some(shared_connector) = tls_connector {
                shared_connector
            } else {
                // Fallback: create new connector (for testing)
                let mut tls_builder = native_tls::TlsConnector::builder();
                if !config.verify_ssl_certs {
                    tls_builder.danger_accept_invalid_certs(true);
                    tls_builder.danger_accept_invalid_hostnames(true);
                }
                let native_connector = tls_builder.build()?;
                Arc::new(TlsConnector::from(native_connector))
            };

            let tls_stream = timeout(command_timeout, connector.connect(&config.host, tcp_stream))
                .await
                .map_err(|_| NntpError::Timeout {
                    seconds: command_timeout.as_secs(),
                })?
                .map_err(|e| NntpError::Tls(e.to_string()))?;

            let (read_half, write_half) = tokio::io::split(tls_stream);
            (Box::new(read_half), Box::new(write_half))
        } else {
            let (read_half, write_half) = tokio::io::split(tcp_stream);
            (Box::new(read_half), Box::new(write_half))
        };

        let reader = BufReader::with_capacity(256 * 1024, reader);

        let mut conn = Self {
            writer,
            reader,
            command_timeout,
        };

        conn.initialize(config).await?;

        Ok(conn)
    }

    async fn initialize(&mut self, config: &DownloadConfig) -> Result<()> {
        // Read server greeting
        let response = self.read_response_deadline().await?;
        if !response.starts_with("200") && !response.starts_with("201") {
            return Err(
                NntpError::Protocol(format!("server greeting failed: {}", response)).into(),
            );
        }

        if config.user.is_empty() {
            return Ok(());
        }
        self.authenticate(config).await
    }

    async fn authenticate(&mut self, config: &DownloadConfig) -> Result<()> {
        self.send_command(&format!("AUTHINFO USER {}", config.user))
            .await?;
        let response = self.read_response_deadline().await?;

        if response.starts_with("381") {
            // Server wants password
            self.send_command(&format!("AUTHINFO PASS {}", config.pass))
                .await?;
            let response = self.read_response_deadline().await?;

            if !response.starts_with("281") {
                // Sanitize response to avoid leaking sensitive info
                let sanitized = response.split_whitespace().next().unwrap_or("unknown");
                return Err(NntpError::AuthFailed(sanitized.to_string()).into());
            }
        } else if !response.starts_with("281") {
            let sanitized = response.split_whitespace().next().unwrap_or("unknown");
            return Err(NntpError::AuthFailed(sanitized.to_string()).into());
        }

        Ok(())
    }

    /// Fetch the raw body of one article.
    ///
    /// Returns the dot-unstuffed body lines joined with `\n`, ready for the
    /// yEnc decoder. A 430/423 reply is `ArticleNotFound`; the connection
    /// stays healthy. Any other unexpected status is a protocol fault and the
    /// caller must discard the connection.
    pub async fn fetch_body(&mut self, message_id: &str) -> Result<Vec<u8>> {
        let msg_id = normalize_message_id(message_id);
        self.send_command(&format!("BODY {}", msg_id)).await?;

        let response = self.read_response_deadline().await?;
        if response.starts_with("430") || response.starts_with("423") {
            return Err(NntpError::ArticleNotFound {
                message_id: message_id.to_string(),
            }
            .into());
        }
        if !response.starts_with("222") {
            return Err(NntpError::Protocol(format!("BODY: unexpected {}", response)).into());
        }

        let deadline = self.command_timeout;
        timeout(deadline, self.read_dot_terminated())
            .await
            .map_err(|_| NntpError::Timeout {
                seconds: deadline.as_secs(),
            })?
    }

    /// Existence check without downloading. Ok(false) means the article is
    /// gone (430/423); the connection remains usable either way.
    pub async fn stat(&mut self, message_id: &str) -> Result<bool> {
        let msg_id = normalize_message_id(message_id);
        self.send_command(&format!("STAT {}", msg_id)).await?;

        let response = self.read_response_deadline().await?;
        if response.starts_with("223") {
            Ok(true)
        } else if response.starts_with("430") || response.starts_with("423") {
            Ok(false)
        } else {
            Err(NntpError::Protocol(format!("STAT: unexpected {}", response)).into())
        }
    }

    /// Read a dot-terminated multi-line payload, unescaping dot-stuffing.
    async fn read_dot_terminated(&mut self) -> Result<Vec<u8>> {
        let mut body = Vec::with_capacity(1024 * 1024);
        let mut line = Vec::new();

        loop {
            line.clear();

            let bytes_read = self.reader.read_until(b'\n', &mut line).await?;
            if bytes_read == 0 {
                return Err(NntpError::Protocol("EOF before body terminator".to_string()).into());
            }

            // Termination: single dot followed by newline
            if line == b".\r\n" || line == b".\n" {
                break;
            }

            // Dot-stuffing: leading ".." becomes "."
            if line.len() >= 2 && line[0] == b'.' && line[1] == b'.' {
                line.remove(0);
            }

            // Strip CRLF but keep a newline so the decoder sees line structure
            if line.ends_with(b"\r\n") {
                body.extend_from_slice(&line[..line.len() - 2]);
            } else if line.ends_with(b"\n") {
                body.extend_from_slice(&line[..line.len() - 1]);
            } else {
                body.extend_from_slice(&line);
            }

            body.push(b'\n');
        }

        Ok(body)
    }

    async fn send_command(&mut self, command: &str) -> Result<()> {
        self.writer.write_all(command.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn read_response(&mut self) -> Result<String> {
        let mut response = String::new();
        self.reader.read_line(&mut response).await?;

        if response.ends_with("\r\n") {
            response.truncate(response.len() - 2);
        } else if response.ends_with('\n') {
            response.truncate(response.len() - 1);
        }

        Ok(response)
    }

    async fn read_response_deadline(&mut self) -> Result<String> {
        let deadline = self.command_timeout;
        timeout(deadline, self.read_response())
            .await
            .map_err(|_| NntpError::Timeout {
                seconds: deadline.as_secs(),
            })?
    }

    /// Keepalive no-op. DATE (111) is cheap and answered by every server.
    pub async fn ping(&mut self) -> bool {
        if self.send_command("DATE").await.is_err() {
            return false;
        }
        match timeout(Duration::from_secs(5), self.read_response()).await {
            Ok(Ok(response)) => response.starts_with("111"),
            _ => false,
        }
    }

    /// Close the connection gracefully
    pub async fn close(&mut self) {
        let _ = self.send_command("QUIT").await;
        let _ = timeout(Duration::from_secs(2), self.read_response()).await;
    }
}

/// Catalog rows may store message-ids with or without angle brackets; the
/// wire always wants them bracketed.
pub fn normalize_message_id(message_id: &str) -> Cow<'_, str> {
    if message_id.starts_with('<') && message_id.ends_with('>') {
        Cow::Borrowed(message_id)
    } else {
        Cow::Owned(format!("<{}>", message_id))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::MockNntpServer;
    use super::*;
    use crate::error::{EdrError, NntpError};
    use crate::yenc;

    #[test]
    fn test_message_id_normalization() {
        assert_eq!(normalize_message_id("abc@news"), "<abc@news>");
        assert_eq!(normalize_message_id("<abc@news>"), "<abc@news>");
    }

    #[tokio::test]
    async fn test_connect_and_authenticate() {
        let server = MockNntpServer::start().await;
        let mut conn = NntpConnection::connect(&server.config(), None)
            .await
            .unwrap();
        assert!(conn.ping().await);
        conn.close().await;
    }

    #[tokio::test]
    async fn test_bad_password_is_auth_failure() {
        let server = MockNntpServer::start().await;
        let mut config = server.config();
        config.pass = "wrong".to_string();

        let err = NntpConnection::connect(&config, None).await.unwrap_err();
        assert!(matches!(err, EdrError::Nntp(NntpError::AuthFailed(_))));
    }

    #[tokio::test]
    async fn test_fetch_body_round_trips() {
        let server = MockNntpServer::start().await;
        let payload = yenc::testing::payload(50_000, 5);
        server.add_article("one@test", yenc::testing::encode(&payload, "one.bin", None));

        let mut conn = NntpConnection::connect(&server.config(), None)
            .await
            .unwrap();
        let body = conn.fetch_body("one@test").await.unwrap();
        let decoded = yenc::decode(&body).unwrap();
        assert_eq!(decoded.data, payload);
    }

    #[tokio::test]
    async fn test_missing_article_is_not_found_and_connection_survives() {
        let server = MockNntpServer::start().await;
        server.add_article("real@test", yenc::testing::encode(b"hello", "h", None));

        let mut conn = NntpConnection::connect(&server.config(), None)
            .await
            .unwrap();

        let err = conn.fetch_body("ghost@test").await.unwrap_err();
        assert!(matches!(
            err,
            EdrError::Nntp(NntpError::ArticleNotFound { .. })
        ));

        // 430 is a logical result; the same connection keeps working
        let body = conn.fetch_body("real@test").await.unwrap();
        assert_eq!(yenc::decode(&body).unwrap().data, b"hello");
    }

    #[tokio::test]
    async fn test_stat() {
        let server = MockNntpServer::start().await;
        server.add_article("here@test", yenc::testing::encode(b"x", "x", None));

        let mut conn = NntpConnection::connect(&server.config(), None)
            .await
            .unwrap();
        assert!(conn.stat("here@test").await.unwrap());
        assert!(!conn.stat("gone@test").await.unwrap());
    }

    #[tokio::test]
    async fn test_dot_stuffed_body_lines() {
        let server = MockNntpServer::start().await;
        // A payload line that starts with '.' once encoded: craft a body whose
        // first payload byte encodes to '.', exercising unstuffing end-to-end.
        let payload = vec![b'.'.wrapping_sub(42); 64];
        server.add_article("dots@test", yenc::testing::encode(&payload, "d", None));

        let mut conn = NntpConnection::connect(&server.config(), None)
            .await
            .unwrap();
        let body = conn.fetch_body("dots@test").await.unwrap();
        assert_eq!(yenc::decode(&body).unwrap().data, payload);
    }
}
