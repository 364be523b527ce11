//! PostgreSQL replication client
//!
//! Low-level TCP client speaking the streaming replication protocol.
//! Authenticates with cleartext, MD5, or SCRAM-SHA-256 and enters CopyBoth
//! mode via `START_REPLICATION ... LOGICAL`.

use crate::error::{CdcError, Result};
use crate::protocol::scram::ScramSha256;
use bytes::{BufMut, Bytes, BytesMut};
use md5::{Digest, Md5};
use postgres_protocol::message::{backend, frontend};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tracing::{debug, info};

/// Connection establishment timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on a single protocol frame; anything larger is treated as a
/// protocol violation rather than an allocation request.
const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// PostgreSQL epoch (2000-01-01T00:00:00Z) as a Unix offset, in seconds.
const PG_EPOCH_UNIX_SECS: u64 = 946_684_800;

/// Client connected in replication mode, pre-CopyBoth.
pub struct ReplicationClient {
    stream: BufReader<TcpStream>,
}

impl ReplicationClient {
    /// Connect to PostgreSQL in replication mode and authenticate.
    pub async fn connect(
        host: &str,
        port: u16,
        user: &str,
        database: &str,
        password: Option<&str>,
    ) -> Result<Self> {
        info!("Connecting to {}:{} as {} (replication)", host, port, user);

        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port)))
            .await
            .map_err(|_| CdcError::connection(format!("Connect timeout to {}:{}", host, port)))?
            .map_err(|e| CdcError::connection(format!("Connect to {}:{} failed: {}", host, port, e)))?;
        let mut stream = BufReader::new(stream);

        // Startup: replication=database requests a walsender session that
        // still allows CREATE_REPLICATION_SLOT / START_REPLICATION.
        let params = vec![
            ("user", user),
            ("database", database),
            ("replication", "database"),
        ];
        let mut buf = BytesMut::new();
        frontend::startup_message(params, &mut buf)?;
        stream.write_all(&buf).await?;
        stream.flush().await?;

        Self::authenticate(&mut stream, user, password).await?;

        // Drain parameter status / backend key data until ReadyForQuery.
        loop {
            let (type_code, _body) = read_frame(&mut stream).await?;
            match type_code {
                b'Z' => {
                    debug!("Replication session ready");
                    break;
                }
                b'E' => {
                    return Err(CdcError::connection(
                        "Server returned an error before ReadyForQuery",
                    ))
                }
                _ => {}
            }
        }

        Ok(Self { stream })
    }

    async fn authenticate(
        stream: &mut BufReader<TcpStream>,
        user: &str,
        password: Option<&str>,
    ) -> Result<()> {
        let mut scram: Option<ScramSha256> = None;

        loop {
            let (type_code, body) = read_frame(stream).await?;

            let mut raw = BytesMut::with_capacity(1 + 4 + body.len());
            raw.put_u8(type_code);
            raw.put_i32((body.len() + 4) as i32);
            raw.put_slice(&body);

            let msg = backend::Message::parse(&mut raw)
                .map_err(|e| CdcError::connection(format!("Bad auth message: {}", e)))?
                .ok_or_else(|| CdcError::connection("Truncated auth message"))?;

            match msg {
                backend::Message::AuthenticationOk => {
                    debug!("Authentication successful");
                    return Ok(());
                }
                backend::Message::AuthenticationCleartextPassword => {
                    let pass = required_password(password)?;
                    let mut buf = BytesMut::new();
                    frontend::password_message(pass.as_bytes(), &mut buf)?;
                    stream.write_all(&buf).await?;
                    stream.flush().await?;
                }
                backend::Message::AuthenticationMd5Password(body) => {
                    let pass = required_password(password)?;
                    let hash = hash_md5_password(user, pass, &body.salt());
                    let mut buf = BytesMut::new();
                    frontend::password_message(hash.as_bytes(), &mut buf)?;
                    stream.write_all(&buf).await?;
                    stream.flush().await?;
                }
                backend::Message::AuthenticationSasl(_) => {
                    let pass = required_password(password)?;
                    let exchange = ScramSha256::new(user, pass);
                    let mut buf = BytesMut::new();
                    frontend::sasl_initial_response(
                        ScramSha256::MECHANISM,
                        &exchange.client_first(),
                        &mut buf,
                    )?;
                    stream.write_all(&buf).await?;
                    stream.flush().await?;
                    scram = Some(exchange);
                }
                backend::Message::AuthenticationSaslContinue(body) => {
                    let exchange = scram
                        .as_mut()
                        .ok_or_else(|| CdcError::connection("SASL continue before initial"))?;
                    let client_final = exchange
                        .client_final(body.data())
                        .map_err(|e| CdcError::connection(format!("SCRAM: {}", e)))?;
                    let mut buf = BytesMut::new();
                    frontend::sasl_response(&client_final, &mut buf)?;
                    stream.write_all(&buf).await?;
                    stream.flush().await?;
                }
                backend::Message::AuthenticationSaslFinal(body) => {
                    let exchange = scram
                        .as_ref()
                        .ok_or_else(|| CdcError::connection("SASL final before initial"))?;
                    exchange
                        .verify_server(body.data())
                        .map_err(|e| CdcError::connection(format!("SCRAM: {}", e)))?;
                }
                backend::Message::ErrorResponse(_) => {
                    return Err(CdcError::connection("Authentication rejected by server"));
                }
                _ => {
                    return Err(CdcError::connection(format!(
                        "Unexpected message during auth: {:#04x}",
                        type_code
                    )))
                }
            }
        }
    }

    /// Start streaming from a logical slot and hand over the socket as a
    /// [`ReplicationStream`].
    ///
    /// `start_lsn` 0 resumes from the slot's confirmed flush position.
    pub async fn start_replication(
        mut self,
        slot_name: &str,
        start_lsn: u64,
        publication_names: &[String],
    ) -> Result<ReplicationStream> {
        let query = format!(
            "START_REPLICATION SLOT {} LOGICAL {:X}/{:X} (proto_version '1', publication_names '{}')",
            slot_name,
            (start_lsn >> 32) as u32,
            start_lsn as u32,
            publication_names.join(",")
        );
        debug!("Starting replication: {}", query);

        let mut buf = BytesMut::new();
        frontend::query(&query, &mut buf)?;
        self.stream.write_all(&buf).await?;
        self.stream.flush().await?;

        let (type_code, _body) = read_frame(&mut self.stream).await?;
        match type_code {
            b'W' => {
                info!("Entered CopyBoth mode on slot {}", slot_name);
                Ok(ReplicationStream {
                    stream: self.stream,
                })
            }
            b'E' => Err(CdcError::replication(format!(
                "START_REPLICATION on slot {} rejected",
                slot_name
            ))),
            t => Err(CdcError::replication(format!(
                "Unexpected response to START_REPLICATION: {:#04x}",
                t
            ))),
        }
    }
}

/// Active CopyBoth stream carrying WAL data.
pub struct ReplicationStream {
    stream: BufReader<TcpStream>,
}

impl ReplicationStream {
    /// Read the next CopyData payload.
    ///
    /// Returns `Ok(None)` when the server ends the copy stream.
    pub async fn next_message(&mut self) -> Result<Option<Bytes>> {
        let (type_code, body) = read_frame(&mut self.stream).await?;
        match type_code {
            b'd' => Ok(Some(Bytes::from(body))),
            b'c' => Ok(None),
            b'E' => Err(CdcError::replication("Error frame on replication stream")),
            t => Err(CdcError::replication(format!(
                "Unexpected frame on replication stream: {:#04x}",
                t
            ))),
        }
    }

    /// Send a standby status update acknowledging `lsn`.
    ///
    /// Written, flushed, and applied positions are all reported as `lsn`;
    /// the slot releases WAL up to that point.
    pub async fn send_status_update(&mut self, lsn: u64) -> Result<()> {
        let mut payload = BytesMut::with_capacity(34);
        payload.put_u8(b'r');
        payload.put_u64(lsn);
        payload.put_u64(lsn);
        payload.put_u64(lsn);
        payload.put_i64(pg_epoch_micros());
        payload.put_u8(0); // no reply requested

        let mut frame = BytesMut::with_capacity(1 + 4 + payload.len());
        frame.put_u8(b'd');
        frame.put_i32((payload.len() + 4) as i32);
        frame.put_slice(&payload);

        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        Ok(())
    }
}

async fn read_frame(stream: &mut BufReader<TcpStream>) -> Result<(u8, Vec<u8>)> {
    let type_code = stream.read_u8().await?;
    let len = stream.read_i32().await? as usize;

    if len < 4 || len > MAX_FRAME_SIZE {
        return Err(CdcError::replication(format!("Invalid frame length: {}", len)));
    }

    let mut body = vec![0u8; len - 4];
    stream.read_exact(&mut body).await?;
    Ok((type_code, body))
}

fn required_password(password: Option<&str>) -> Result<&str> {
    password.ok_or_else(|| CdcError::connection("Password required but not provided"))
}

fn hash_md5_password(user: &str, pass: &str, salt: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(pass);
    hasher.update(user);
    let inner = hex::encode(hasher.finalize());

    let mut hasher = Md5::new();
    hasher.update(inner);
    hasher.update(salt);
    format!("md5{}", hex::encode(hasher.finalize()))
}

/// Microseconds since the PostgreSQL epoch, for status update timestamps.
fn pg_epoch_micros() -> i64 {
    let pg_epoch =
        std::time::SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(PG_EPOCH_UNIX_SECS);
    std::time::SystemTime::now()
        .duration_since(pg_epoch)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md5_password_hash() {
        // md5(md5(password + user) + salt), hex-encoded with md5 prefix
        let hash = hash_md5_password("walhook", "secret", &[0x01, 0x02, 0x03, 0x04]);
        assert!(hash.starts_with("md5"));
        assert_eq!(hash.len(), 3 + 32);
    }

    #[test]
    fn test_pg_epoch_is_after_unix_epoch() {
        assert!(pg_epoch_micros() > 0);
    }
}
