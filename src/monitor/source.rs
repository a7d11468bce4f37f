//! Byte sources for the live monitor.
//!
//! A [`Connector`] opens a [`ByteSource`]; the monitor reconnects through it
//! after the source fails or closes.

use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info};

use crate::config::DataLinkConfig;
use crate::error::{DaqError, Result};

/// A stream of raw bytes from the device.
#[async_trait]
pub trait ByteSource: Send {
    /// Read the next available bytes into `buf`.
    ///
    /// Returns `Ok(0)` at end of stream.
    async fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Opens byte sources.
#[async_trait]
pub trait Connector: Send {
    /// Open a new source.
    async fn connect(&mut self) -> Result<Box<dyn ByteSource>>;

    /// Human readable name of the data link.
    fn describe(&self) -> String;

    /// Whether the monitor should try again after a failure or end of stream.
    fn reconnects(&self) -> bool {
        true
    }
}

/// [`ByteSource`] over any async reader.
pub struct StreamSource<R> {
    reader: R,
}

impl<R> StreamSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> ByteSource for StreamSource<R> {
    async fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf).await
    }
}

/// Device serial port
#[derive(Debug, Clone)]
pub struct SerialConnector {
    port: String,
    baud_rate: u32,
}

impl SerialConnector {
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
        }
    }

    pub fn from_config(config: &DataLinkConfig) -> Self {
        Self::new(config.port.clone(), config.baud_rate)
    }

    pub fn port(&self) -> &str {
        &self.port
    }
}

#[async_trait]
impl Connector for SerialConnector {
    /// Open the port as 8N1 without flow control.
    ///
    /// # Errors
    ///
    /// Returns `Serial` error if the port cannot be opened.
    async fn connect(&mut self) -> Result<Box<dyn ByteSource>> {
        debug!("Trying to open serial port: {}", self.port);
        let stream = tokio_serial::new(&self.port, self.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| DaqError::Serial(format!("Failed to open {}: {}", self.port, e)))?;
        info!("Opened serial port {} at {} baud", self.port, self.baud_rate);
        Ok(Box::new(StreamSource::new(stream)))
    }

    fn describe(&self) -> String {
        format!("{} @ {}", self.port, self.baud_rate)
    }
}

/// Replays a recording file once.
#[derive(Debug, Clone)]
pub struct FileConnector {
    path: PathBuf,
    opened: bool,
}

impl FileConnector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            opened: false,
        }
    }
}

#[async_trait]
impl Connector for FileConnector {
    async fn connect(&mut self) -> Result<Box<dyn ByteSource>> {
        let file = tokio::fs::File::open(&self.path).await?;
        self.opened = true;
        info!("Replaying {}", self.path.display());
        Ok(Box::new(StreamSource::new(file)))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn reconnects(&self) -> bool {
        !self.opened
    }
}


#[cfg(test)]
mod tests {
    use super::mocks::MockSource;
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_stream_source_reads_in_order() {
        let reader = tokio_test::io::Builder::new().read(b"abc").read(b"de").build();
        let mut source = StreamSource::new(reader);
        let mut buf = [0u8; 16];

        assert_eq!(source.read_chunk(&mut buf).await.unwrap(), 3);
        assert_eq!(&buf[..3], b"abc");
        assert_eq!(source.read_chunk(&mut buf).await.unwrap(), 2);
        assert_eq!(&buf[..2], b"de");
        assert_eq!(source.read_chunk(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stream_source_read_error() {
        let reader = tokio_test::io::Builder::new()
            .read_error(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
            .build();
        let mut source = StreamSource::new(reader);
        let mut buf = [0u8; 4];
        let err = source.read_chunk(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_mock_source_splits_large_chunks() {
        let mut source = MockSource::new(vec![Ok(vec![1, 2, 3, 4, 5]), Err(io::ErrorKind::TimedOut)]);
        let mut buf = [0u8; 3];
        assert_eq!(source.read_chunk(&mut buf).await.unwrap(), 3);
        assert_eq!(buf, [1, 2, 3]);
        assert_eq!(source.read_chunk(&mut buf).await.unwrap(), 2);
        assert_eq!(&buf[..2], &[4, 5]);
        assert!(source.read_chunk(&mut buf).await.is_err());
        assert_eq!(source.read_chunk(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_serial_connector_invalid_port() {
        let mut connector = SerialConnector::new("/dev/nonexistent_serial_device_12345", 115200);
        match connector.connect().await {
            Err(DaqError::Serial(msg)) => {
                assert!(msg.contains("/dev/nonexistent_serial_device_12345"));
                assert!(msg.contains("Failed to open"));
            }
            Err(other) => panic!("Expected Serial error, got: {:?}", other),
            Ok(_) => panic!("Expected Serial error"),
        }
        assert_eq!(connector.describe(), "/dev/nonexistent_serial_device_12345 @ 115200");
    }

    #[tokio::test]
    async fn test_file_connector_replays_once() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[1, 2, 3]).unwrap();

        let mut connector = FileConnector::new(file.path());
        assert!(connector.reconnects());
        let mut source = connector.connect().await.unwrap();
        assert!(!connector.reconnects());

        let mut buf = [0u8; 8];
        assert_eq!(source.read_chunk(&mut buf).await.unwrap(), 3);
        assert_eq!(source.read_chunk(&mut buf).await.unwrap(), 0);
    }
}
