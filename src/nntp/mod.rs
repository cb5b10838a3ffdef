//! NNTP protocol implementation and connection pooling
//!
//! This module provides async NNTP connection handling with connection
//! pooling and health checks. Articles are fetched by message-id only.

mod connection;
mod pool;

pub use connection::{normalize_message_id, NntpConnection};
pub use pool::{NntpConnectionManager, NntpPool, NntpPoolBuilder, NntpPoolExt, PooledConnection};

#[cfg(test)]
pub(crate) mod testing {
    //! Minimal in-process NNTP server for tests.
    //!
    //! Speaks the subset the core uses: greeting, AUTHINFO USER/PASS, DATE,
    //! STAT, BODY (with dot-stuffing), QUIT. Counts BODY commands so
    //! single-flight tests can assert fetch deduplication.

    use crate::config::DownloadConfig;
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{TcpListener, TcpStream};

    pub(crate) const TEST_USER: &str = "tester";
    pub(crate) const TEST_PASS: &str = "sekrit";

    #[derive(Clone)]
    pub(crate) struct MockNntpServer {
        pub addr: SocketAddr,
        articles: Arc<Mutex<HashMap<String, Vec<u8>>>>,
        body_commands: Arc<AtomicUsize>,
    }

    impl MockNntpServer {
        pub(crate) async fn start() -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let server = Self {
                addr,
                articles: Arc::new(Mutex::new(HashMap::new())),
                body_commands: Arc::new(AtomicUsize::new(0)),
            };

            let accept = server.clone();
            tokio::spawn(async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        break;
                    };
                    let conn = accept.clone();
                    tokio::spawn(async move {
                        let _ = conn.serve(stream).await;
                    });
                }
            });

            server
        }

        /// Register an article body (already yEnc-encoded, `\n`-separated
        /// lines). The id is stored without angle brackets.
        pub(crate) fn add_article(&self, message_id: &str, body: Vec<u8>) {
            self.articles
                .lock()
                .unwrap()
                .insert(message_id.trim_matches(['<', '>']).to_string(), body);
        }

        pub(crate) fn remove_article(&self, message_id: &str) {
            self.articles
                .lock()
                .unwrap()
                .remove(message_id.trim_matches(['<', '>']));
        }

        /// How many BODY commands have been issued across all connections.
        pub(crate) fn body_command_count(&self) -> usize {
            self.body_commands.load(Ordering::SeqCst)
        }

        /// Plaintext config pointed at this server.
        pub(crate) fn config(&self) -> DownloadConfig {
            DownloadConfig {
                host: self.addr.ip().to_string(),
                port: self.addr.port(),
                ssl: false,
                verify_ssl_certs: true,
                user: TEST_USER.to_string(),
                pass: TEST_PASS.to_string(),
                connections: 4,
                command_timeout_secs: 5,
                prefetch_segments: 0,
            }
        }

        async fn serve(&self, stream: TcpStream) -> std::io::Result<()> {
            let (read_half, mut writer) = stream.into_split();
            let mut reader = BufReader::new(read_half);

            writer.write_all(b"200 mock news server ready\r\n").await?;

            let mut line = String::new();
            loop {
                line.clear();
                if reader.read_line(&mut line).await? == 0 {
                    return Ok(());
                }
                let command = line.trim_end();

                if let Some(user) = command.strip_prefix("AUTHINFO USER ") {
                    if user == TEST_USER {
                        writer.write_all(b"381 password required\r\n").await?;
                    } else {
                        writer.write_all(b"481 no such user\r\n").await?;
                    }
                } else if let Some(pass) = command.strip_prefix("AUTHINFO PASS ") {
                    if pass == TEST_PASS {
                        writer.write_all(b"281 authentication accepted\r\n").await?;
                    } else {
                        writer.write_all(b"481 authentication failed\r\n").await?;
                    }
                } else if command == "DATE" {
                    writer.write_all(b"111 20250101000000\r\n").await?;
                } else if let Some(id) = command.strip_prefix("STAT ") {
                    let known = self
                        .articles
                        .lock()
                        .unwrap()
                        .contains_key(id.trim_matches(['<', '>']));
                    if known {
                        writer
                            .write_all(format!("223 0 {} exists\r\n", id).as_bytes())
                            .await?;
                    } else {
                        writer.write_all(b"430 no such article\r\n").await?;
                    }
                } else if let Some(id) = command.strip_prefix("BODY ") {
                    self.body_commands.fetch_add(1, Ordering::SeqCst);
                    let body = self
                        .articles
                        .lock()
                        .unwrap()
                        .get(id.trim_matches(['<', '>']))
                        .cloned();
                    match body {
                        Some(body) => {
                            writer
                                .write_all(format!("222 0 {} body follows\r\n", id).as_bytes())
                                .await?;
                            for body_line in body.split(|&b| b == b'\n') {
                                if body_line.is_empty() {
                                    continue;
                                }
                                // Dot-stuff on the way out
                                if body_line.first() == Some(&b'.') {
                                    writer.write_all(b".").await?;
                                }
                                writer.write_all(body_line).await?;
                                writer.write_all(b"\r\n").await?;
                            }
                            writer.write_all(b".\r\n").await?;
                        }
                        None => {
                            writer.write_all(b"430 no such article\r\n").await?;
                        }
                    }
                } else if command == "QUIT" {
                    writer.write_all(b"205 goodbye\r\n").await?;
                    return Ok(());
                } else {
                    writer.write_all(b"500 command not recognized\r\n").await?;
                }
            }
        }
    }
}
