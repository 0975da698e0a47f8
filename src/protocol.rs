//! Line-framed stdio adaptor between the proxy and the rest of the process
//! (§4.7). One request line in produces exactly one response line out, in
//! arrival order; EOF on stdin is the process's shutdown signal.

use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter, Stdin, Stdout};

pub struct ProxyProtocol {
    reader: BufReader<Stdin>,
    writer: BufWriter<Stdout>,
}

impl ProxyProtocol {
    pub fn new() -> Self {
        Self {
            reader: BufReader::new(io::stdin()),
            writer: BufWriter::new(io::stdout()),
        }
    }

    /// Read the next request line, trimming trailing whitespace. Returns
    /// `Ok(None)` on EOF, which signals the caller to shut down.
    pub async fn next_request(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(None);
        }
        while matches!(line.chars().last(), Some(c) if c.is_whitespace()) {
            line.pop();
        }
        Ok(Some(line))
    }

    /// Write one fully-formatted response line (including its trailing
    /// newline) and flush, so the proxy sees it immediately.
    pub async fn respond(&mut self, response: &str) -> io::Result<()> {
        self.writer.write_all(response.as_bytes()).await?;
        self.writer.flush().await
    }
}

impl Default for ProxyProtocol {
    fn default() -> Self {
        Self::new()
    }
}
