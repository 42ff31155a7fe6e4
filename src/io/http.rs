use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderName, ACCEPT_RANGES, CONTENT_LENGTH, RANGE};
use reqwest::StatusCode;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use super::ReadAt;
use anyhow::{anyhow, bail, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_ATTEMPTS: u32 = 10;

/// Byte source backed by HTTP `Range` requests against a single URL.
pub struct HttpRangeReader {
    client: Client,
    url: String,
    size: u64,
    transferred_bytes: AtomicU64,
}

fn header_str<'a>(resp: &'a Response, name: &HeaderName) -> Option<&'a str> {
    resp.headers().get(name).and_then(|v| v.to_str().ok())
}

impl HttpRangeReader {
    /// Probe `url` with a HEAD request.
    ///
    /// The server has to advertise byte ranges and report a length up front;
    /// archives are read by seeking, so a plain download is no use.
    pub fn new(url: String) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let probe = client.head(&url).send()?;

        if !probe.status().is_success() {
            bail!("HEAD {} returned {}", url, probe.status());
        }
        if !header_str(&probe, &ACCEPT_RANGES).is_some_and(|v| v.contains("bytes")) {
            bail!("{} does not accept byte range requests", url);
        }
        let size = header_str(&probe, &CONTENT_LENGTH)
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| anyhow!("{} did not report a Content-Length", url))?;

        debug!(%url, size, "remote archive probed");
        Ok(Self {
            client,
            url,
            size,
            transferred_bytes: AtomicU64::new(0),
        })
    }

    /// Payload bytes received so far, across all range requests.
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes.load(Ordering::Relaxed)
    }

    /// Issue one ranged GET for `first..=last`, retrying on timeouts and
    /// connection failures with a linear backoff.
    fn fetch_range(&self, first: u64, last: u64) -> io::Result<Response> {
        let mut attempt = 0;
        loop {
            let sent = self
                .client
                .get(&self.url)
                .header(RANGE, format!("bytes={first}-{last}"))
                .send();
            match sent {
                Ok(resp) if resp.status() == StatusCode::PARTIAL_CONTENT => return Ok(resp),
                Ok(resp) => {
                    return Err(io::Error::other(format!(
                        "range request answered with {}",
                        resp.status()
                    )))
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    attempt += 1;
                    if attempt >= MAX_ATTEMPTS {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("giving up on {} after {attempt} attempts", self.url),
                        ));
                    }
                    warn!(attempt, error = %e, "range request failed, retrying");
                    std::thread::sleep(Duration::from_millis(500 * u64::from(attempt)));
                }
                Err(e) => return Err(io::Error::other(e)),
            }
        }
    }
}

/// Bytes readable at `offset`, at most `len`. The remainder of a large
/// resource may not fit in `usize` on 32-bit targets.
fn clamp_to_end(size: u64, offset: u64, len: usize) -> usize {
    let remaining = usize::try_from(size.saturating_sub(offset)).unwrap_or(usize::MAX);
    len.min(remaining)
}

impl ReadAt for HttpRangeReader {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        // past the end is EOF, not an unsatisfiable range
        if buf.is_empty() || offset >= self.size {
            return Ok(0);
        }

        let want = clamp_to_end(self.size, offset, buf.len());
        let last = offset + want as u64 - 1;
        let mut filled = 0;

        // servers may return less than asked; keep requesting the remainder
        while filled < want {
            let body = self
                .fetch_range(offset + filled as u64, last)?
                .bytes()
                .map_err(io::Error::other)?;
            if body.is_empty() {
                break;
            }
            let n = body.len().min(want - filled);
            buf[filled..filled + n].copy_from_slice(&body[..n]);
            filled += n;
            self.transferred_bytes.fetch_add(n as u64, Ordering::Relaxed);
        }

        Ok(filled)
    }

    fn size(&self) -> u64 {
        self.size
    }
}
