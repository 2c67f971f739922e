//! The Graphite exporter.
//!
//! Delivers every point of a series to a Graphite backend exactly once, in
//! series order, batched and rate limited. Two wire formats are spoken: the
//! pickle receiver's length-prefixed binary frames (port 2004 by default) and
//! the plaintext line protocol. The bytes pushed down the socket can
//! optionally be teed into a local file per series for offline inspection.

use std::num::NonZeroU32;
use std::path::PathBuf;

use async_trait::async_trait;
use cartload_series::Series;
use cartload_throttle::Throttle;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{Duration, timeout};
use tracing::{debug, info};

fn default_port() -> u16 {
    // Graphite's pickle receiver.
    2004
}

fn default_max_points_per_second() -> NonZeroU32 {
    NonZeroU32::new(1_000).expect("1000 is non-zero")
}

fn default_batch_size() -> NonZeroU32 {
    NonZeroU32::new(100).expect("100 is non-zero")
}

fn default_write_timeout_millis() -> u64 {
    10_000
}

fn default_wait_timeout_millis() -> u64 {
    60_000
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "snake_case")]
/// The wire format spoken to the backend.
pub enum WireFormat {
    /// Length-prefixed pickle frames, Graphite's binary protocol.
    #[default]
    Pickle,
    /// One `<name> <value> <seconds>` line per point.
    Plaintext,
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
/// Configuration of the exporter.
pub struct Config {
    /// The host of the target Graphite backend.
    pub host: String,
    /// The port of the target backend.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Prefix prepended to every metric name, trailing separator included.
    #[serde(default)]
    pub metric_prefix: String,
    /// Ceiling on sustained throughput, in points per second.
    #[serde(default = "default_max_points_per_second")]
    pub max_points_per_second: NonZeroU32,
    /// Points accumulated before a flush.
    #[serde(default = "default_batch_size")]
    pub batch_size: NonZeroU32,
    /// The wire format to speak.
    #[serde(default)]
    pub format: WireFormat,
    /// Directory to tee per-series wire bytes into, if set.
    #[serde(default)]
    pub tee_dir: Option<PathBuf>,
    /// Deadline, in milliseconds, on each socket connect and write.
    #[serde(default = "default_write_timeout_millis")]
    pub write_timeout_millis: u64,
    /// Deadline, in milliseconds, on each rate-limiter wait.
    #[serde(default = "default_wait_timeout_millis")]
    pub wait_timeout_millis: u64,
}

impl Config {
    /// The throttle configuration implied by the configured point rate.
    #[must_use]
    pub fn throttle_config(&self) -> cartload_throttle::Config {
        cartload_throttle::Config::Stable {
            maximum_capacity: self.max_points_per_second,
            timeout_micros: self.wait_timeout_millis.saturating_mul(1_000),
        }
    }
}

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Exporter`] and its transports.
pub enum Error {
    /// Error connecting to the backend
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        /// Target address
        addr: String,
        /// Underlying IO error
        #[source]
        source: Box<std::io::Error>,
    },
    /// Error writing to the backend
    #[error("Failed to write to {addr} after {bytes_sent} bytes: {source}")]
    Write {
        /// Target address
        addr: String,
        /// Bytes sent on this connection before the error
        bytes_sent: u64,
        /// Underlying IO error
        #[source]
        source: Box<std::io::Error>,
    },
    /// A connect or write deadline elapsed
    #[error("Deadline of {millis}ms elapsed during {operation} to {addr}")]
    Timeout {
        /// Target address
        addr: String,
        /// The operation that timed out
        operation: &'static str,
        /// The configured deadline
        millis: u64,
    },
    /// A batch could not be pickle-encoded
    #[error("Pickle encoding failed: {0}")]
    Pickle(#[from] serde_pickle::Error),
    /// A pickle frame exceeded the 4-byte length header
    #[error("Pickle payload of {bytes} bytes exceeds the frame length header")]
    PayloadTooLarge {
        /// Encoded payload size
        bytes: usize,
    },
    /// Tee file IO error
    #[error("Tee file IO failed: {0}")]
    Io(#[from] std::io::Error),
    /// Throttle error
    #[error("Throttle error: {0}")]
    Throttle(#[from] cartload_throttle::Error),
}

/// One metric observation ready for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricPoint {
    /// Fully prefixed metric name.
    pub name: String,
    /// Unix seconds of the period start.
    pub timestamp: i64,
    /// The observed value.
    pub value: i64,
}

/// The delivery seam: something that can push encoded batches at a backend.
///
/// Kept as a trait so the batching and rate-limiting logic can be exercised
/// against a recording transport in tests.
#[async_trait]
pub trait Transport {
    /// Deliver one batch, in order.
    async fn send(&mut self, batch: &[MetricPoint]) -> Result<(), Error>;

    /// Flush buffered bytes and release the underlying resources.
    async fn finish(&mut self) -> Result<(), Error>;
}

/// Summary of one series' export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportSummary {
    /// Points delivered.
    pub points: u64,
    /// Flushes performed.
    pub flushes: u64,
}

/// The exporter: batches a series' points and pushes them through a
/// [`Transport`] under a throttle.
#[derive(Debug)]
pub struct Exporter<T> {
    transport: T,
    throttle: Throttle,
    batch_size: NonZeroU32,
    metric_prefix: String,
}

impl<T> Exporter<T>
where
    T: Transport + Send,
{
    /// Create a new [`Exporter`] over `transport`.
    pub fn new(
        transport: T,
        throttle: Throttle,
        batch_size: NonZeroU32,
        metric_prefix: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            throttle,
            batch_size,
            metric_prefix: metric_prefix.into(),
        }
    }

    /// Deliver every point of `series`, in chronological order, then flush
    /// and release the transport.
    ///
    /// # Errors
    ///
    /// Function will return an error if the throttle denies capacity or the
    /// transport fails; the series' export is aborted at that point and no
    /// further bytes are written.
    pub async fn export(&mut self, series: &Series) -> Result<ExportSummary, Error> {
        let batch_size = self.batch_size.get() as usize;
        let mut batch: Vec<MetricPoint> = Vec::with_capacity(batch_size);
        let mut summary = ExportSummary {
            points: 0,
            flushes: 0,
        };

        let name = format!("{}{}", self.metric_prefix, series.name());
        for point in series.points() {
            batch.push(MetricPoint {
                name: name.clone(),
                timestamp: point.stamp.as_secs(),
                value: point.value,
            });
            if batch.len() >= batch_size {
                self.flush(&mut batch, &mut summary).await?;
            }
        }
        // Send the final partial batch.
        if !batch.is_empty() {
            self.flush(&mut batch, &mut summary).await?;
        }

        self.transport.finish().await?;
        info!(
            series = series.name(),
            points = summary.points,
            flushes = summary.flushes,
            "export complete"
        );
        Ok(summary)
    }

    async fn flush(
        &mut self,
        batch: &mut Vec<MetricPoint>,
        summary: &mut ExportSummary,
    ) -> Result<(), Error> {
        let Some(permits) = NonZeroU32::new(u32::try_from(batch.len()).unwrap_or(u32::MAX))
        else {
            return Ok(());
        };
        self.throttle.wait_for(permits).await?;
        self.transport.send(batch).await?;
        summary.points += u64::from(permits.get());
        summary.flushes += 1;
        batch.clear();
        Ok(())
    }
}

/// Encode a batch as a Graphite pickle frame: a pickled list of
/// `(name, (seconds, value))` tuples behind a 4-byte big-endian length
/// header.
pub(crate) fn encode_pickle(batch: &[MetricPoint]) -> Result<Vec<u8>, Error> {
    let tuples: Vec<(&str, (i64, i64))> = batch
        .iter()
        .map(|point| (point.name.as_str(), (point.timestamp, point.value)))
        .collect();
    let payload = serde_pickle::to_vec(&tuples, serde_pickle::SerOptions::new())?;

    let header = u32::try_from(payload.len())
        .map_err(|_| Error::PayloadTooLarge {
            bytes: payload.len(),
        })?
        .to_be_bytes();

    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&header);
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Encode a batch as plaintext protocol lines.
pub(crate) fn encode_plaintext(batch: &[MetricPoint]) -> Vec<u8> {
    use std::fmt::Write;

    let mut out = String::new();
    for point in batch {
        // Infallible for String targets.
        let _ = writeln!(out, "{} {} {}", point.name, point.value, point.timestamp);
    }
    out.into_bytes()
}

/// The live Graphite transport: one TCP connection, one optional tee file.
#[derive(Debug)]
pub struct GraphiteTransport {
    stream: TcpStream,
    tee: Option<tokio::fs::File>,
    format: WireFormat,
    addr: String,
    bytes_sent: u64,
    write_timeout: Duration,
}

impl GraphiteTransport {
    /// Open a connection for one series' transmission.
    ///
    /// When `config.tee_dir` is set the exact wire bytes are also appended to
    /// `<tee_dir>/<series_name>.<ext>`.
    ///
    /// # Errors
    ///
    /// Function will return an error if the connection cannot be established
    /// within the deadline or the tee file cannot be created.
    pub async fn connect(config: &Config, series_name: &str) -> Result<Self, Error> {
        let addr = format!("{}:{}", config.host, config.port);
        let write_timeout = Duration::from_millis(config.write_timeout_millis);

        let stream = timeout(write_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_elapsed| Error::Timeout {
                addr: addr.clone(),
                operation: "connect",
                millis: config.write_timeout_millis,
            })?
            .map_err(|source| Error::Connect {
                addr: addr.clone(),
                source: Box::new(source),
            })?;

        let tee = match &config.tee_dir {
            Some(dir) => {
                let ext = match config.format {
                    WireFormat::Pickle => "pickle",
                    WireFormat::Plaintext => "txt",
                };
                let path = dir.join(format!("{series_name}.{ext}"));
                debug!(path = %path.display(), "teeing wire bytes");
                Some(tokio::fs::File::create(path).await?)
            }
            None => None,
        };

        Ok(Self {
            stream,
            tee,
            format: config.format,
            addr,
            bytes_sent: 0,
            write_timeout,
        })
    }

    async fn write_wire(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let millis = u64::try_from(self.write_timeout.as_millis()).unwrap_or(u64::MAX);
        timeout(self.write_timeout, self.stream.write_all(bytes))
            .await
            .map_err(|_elapsed| Error::Timeout {
                addr: self.addr.clone(),
                operation: "write",
                millis,
            })?
            .map_err(|source| Error::Write {
                addr: self.addr.clone(),
                bytes_sent: self.bytes_sent,
                source: Box::new(source),
            })?;
        self.bytes_sent += bytes.len() as u64;

        if let Some(tee) = &mut self.tee {
            tee.write_all(bytes).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for GraphiteTransport {
    async fn send(&mut self, batch: &[MetricPoint]) -> Result<(), Error> {
        let bytes = match self.format {
            WireFormat::Pickle => encode_pickle(batch)?,
            WireFormat::Plaintext => encode_plaintext(batch),
        };
        self.write_wire(&bytes).await
    }

    async fn finish(&mut self) -> Result<(), Error> {
        if let Some(tee) = &mut self.tee {
            tee.flush().await?;
        }
        let millis = u64::try_from(self.write_timeout.as_millis()).unwrap_or(u64::MAX);
        timeout(self.write_timeout, self.stream.shutdown())
            .await
            .map_err(|_elapsed| Error::Timeout {
                addr: self.addr.clone(),
                operation: "shutdown",
                millis,
            })?
            .map_err(|source| Error::Write {
                addr: self.addr.clone(),
                bytes_sent: self.bytes_sent,
                source: Box::new(source),
            })?;
        Ok(())
    }
}
