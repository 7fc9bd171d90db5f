//! Out-of-process provider transport.
//!
//! A remote provider is a child process speaking length-prefixed JSON frames
//! over stdin/stdout: each call ships one `{"method", "arg"}` request frame
//! and reads back one envelope frame. Frames are a u32 little-endian length
//! followed by the payload, exchanged atomically under a lock so concurrent
//! callers cannot interleave requests.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::Config;
use crate::envelope::{Envelope, VersionRecord};
use crate::error::{Result, SchemaError};
use crate::manifest::{Command, Query};
use crate::provider::DatabaseProvider;

/// Upper bound on a single frame; a response larger than this is a protocol
/// violation, not a legitimate result.
const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

#[derive(Serialize, Deserialize)]
struct RemoteCall {
    method: String,
    arg: String,
}

struct ProcessIo {
    // held so the child is reaped when the provider is dropped
    _child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// A provider backed by a child process.
pub struct RemoteProvider {
    name: String,
    io: Mutex<ProcessIo>,
}

impl RemoteProvider {
    /// Spawn the provider binary and attach to its pipes.
    pub fn spawn(path: &Path) -> Result<Self> {
        let mut child = tokio::process::Command::new(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                SchemaError::Config(format!(
                    "cannot start provider binary '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SchemaError::Runtime("provider child has no stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SchemaError::Runtime("provider child has no stdout".into()))?;
        Ok(Self {
            name: path.display().to_string(),
            io: Mutex::new(ProcessIo {
                _child: child,
                stdin,
                stdout: BufReader::new(stdout),
            }),
        })
    }

    /// One request/response round-trip. Transport faults become error
    /// envelopes so the engine sees a uniform failure signal.
    async fn call(&self, method: &str, arg: String) -> Envelope {
        match self.try_call(method, arg).await {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("remote provider '{}' call {} failed: {}", self.name, method, e);
                Envelope::from_error(e)
            }
        }
    }

    async fn try_call(&self, method: &str, arg: String) -> Result<Envelope> {
        let request = serde_json::to_vec(&RemoteCall {
            method: method.to_string(),
            arg,
        })?;
        let mut io = self.io.lock().await;
        write_frame(&mut io.stdin, &request).await?;
        let response = read_frame(&mut io.stdout).await?;
        drop(io);

        debug!("remote provider call {} returned {} bytes", method, response.len());
        let text = String::from_utf8(response)
            .map_err(|e| SchemaError::Runtime(format!("provider response is not UTF-8: {}", e)))?;
        Envelope::from_json(&text)
    }

    fn encode<T: Serialize>(value: &T) -> String {
        serde_json::to_string(value).unwrap_or_default()
    }
}

/// Write one length-prefixed frame.
async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    writer.write_all(&(payload.len() as u32).to_le_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame.
async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).await?;
    let len = u32::from_le_bytes(len_bytes);
    if len > MAX_FRAME_LEN {
        return Err(SchemaError::Runtime(format!(
            "provider frame of {} bytes exceeds the {} byte limit",
            len, MAX_FRAME_LEN
        )));
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

#[async_trait]
impl DatabaseProvider for RemoteProvider {
    async fn setup(&self, config: &Config) -> Envelope {
        self.call("setup", Self::encode(config)).await
    }

    async fn get_info(&self) -> Envelope {
        self.call("getInfo", String::new()).await
    }

    async fn get_version(&self) -> Envelope {
        self.call("getVersion", String::new()).await
    }

    async fn set_version(&self, version: &VersionRecord) -> Envelope {
        self.call("setVersion", Self::encode(version)).await
    }

    async fn run_command(&self, command: &Command) -> Envelope {
        self.call("runCommand", Self::encode(command)).await
    }

    async fn run_query(&self, query: &Query) -> Envelope {
        self.call("runQuery", Self::encode(query)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_roundtrip() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        write_frame(&mut client, b"{\"method\":\"getVersion\",\"arg\":\"\"}")
            .await
            .unwrap();
        let frame = read_frame(&mut server).await.unwrap();
        let call: RemoteCall = serde_json::from_slice(&frame).unwrap();
        assert_eq!(call.method, "getVersion");
        assert_eq!(call.arg, "");
    }

    #[tokio::test]
    async fn test_empty_frame() {
        let (mut client, mut server) = tokio::io::duplex(64);
        write_frame(&mut client, b"").await.unwrap();
        assert_eq!(read_frame(&mut server).await.unwrap(), Vec::<u8>::new());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client
            .write_all(&(MAX_FRAME_LEN + 1).to_le_bytes())
            .await
            .unwrap();
        let err = read_frame(&mut server).await.unwrap_err();
        assert!(matches!(err, SchemaError::Runtime(_)));
    }
}
