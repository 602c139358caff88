use std::path::Path;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::debug;

use crewmux_protocol::{Request, Response};

/// One persistent connection to crewmux-server. The gateway opens a fresh
/// one per subscription and per input delivery, so each connection carries
/// exactly one request/reply exchange before optionally turning into an
/// event stream.
pub struct CrewmuxClient {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: tokio::net::unix::OwnedWriteHalf,
}

impl CrewmuxClient {
    /// Connect to the daemon, falling back to the default socket path.
    pub async fn connect(socket_path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match socket_path {
            Some(p) => p.to_path_buf(),
            None => crewmux_protocol::paths::default_socket_path(),
        };
        debug!(socket = %path.display(), "connecting to crewmux-server");
        let stream = UnixStream::connect(&path).await?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        })
    }

    /// Send a request and wait for its reply line.
    pub async fn request(&mut self, req: &Request) -> anyhow::Result<Response> {
        let json = serde_json::to_string(req)?;
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;

        let mut line = String::new();
        self.reader.read_line(&mut line).await?;
        if line.is_empty() {
            anyhow::bail!("server closed connection");
        }
        let resp: Response = serde_json::from_str(line.trim())?;
        Ok(resp)
    }

    /// Send a request and unwrap its `Ok` payload. Daemon-reported errors and
    /// out-of-place event lines both surface as failures.
    pub async fn request_data(
        &mut self,
        req: &Request,
    ) -> anyhow::Result<Option<serde_json::Value>> {
        match self.request(req).await? {
            Response::Ok { data } => Ok(data),
            Response::Error { message, .. } => anyhow::bail!(message),
            Response::Event(_) => anyhow::bail!("event received in reply position"),
        }
    }

    /// Read the next line from the server (response or event).
    pub async fn read_line(&mut self) -> anyhow::Result<Option<String>> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(line))
    }
}
