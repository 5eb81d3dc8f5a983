//! Thin TCP client used by the Process Controller to talk to the Command
//! Service and Data Service as an ordinary client, grounded in
//! `hmc_master.py`'s `sock_connect`/`send` helpers.

use anyhow::{anyhow, Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;

pub struct CommandClient {
    reader: BufReader<OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
}

impl CommandClient {
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("connecting to command service at {addr}"))?;
        let (r, w) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(r),
            writer: w,
        })
    }

    /// Sends one request and reads back one line of response.
    pub async fn send(&mut self, request: &str) -> Result<String> {
        self.writer.write_all(request.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        let mut line = String::new();
        self.reader.read_line(&mut line).await?;
        Ok(line.trim_end().to_string())
    }

    /// Convenience for set-and-check commands: errors if the reply starts
    /// with `ERR`.
    pub async fn send_ok(&mut self, request: &str) -> Result<String> {
        let reply = self.send(request).await?;
        if reply.starts_with("ERR") {
            return Err(anyhow!("command {request} failed: {reply}"));
        }
        Ok(reply)
    }

    pub async fn read_f64(&mut self, request: &str) -> Result<f64> {
        let reply = self.send_ok(request).await?;
        reply
            .parse::<f64>()
            .with_context(|| format!("parsing response to {request}: {reply}"))
    }
}
