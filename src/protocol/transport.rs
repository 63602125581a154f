use std::{
    fmt,
    io::{self, Read, Write},
    time::Duration,
};

use log::{debug, info, trace};
use serialport::{DataBits, Parity, SerialPort, SerialPortType, StopBits};
use thiserror::Error;

/// Line speed the terminal expects.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Upper bound on bytes pulled from the port by a single read.
pub const DEFAULT_MAX_READ: usize = 1024;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("transport is closed")]
    Closed,
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("Transport IO Error: {0}")]
    Io(#[from] io::Error),
}

/// Byte pipe to the terminal.
///
/// Implementations must never block past the wait handed to [`read_chunk`], and
/// return an empty chunk when nothing arrived in time.
///
/// [`read_chunk`]: SerialTransport::read_chunk
pub trait SerialTransport: Send {
    fn write(&mut self, bytes: &[u8], timeout: Duration) -> Result<(), TransportError>;

    fn read_chunk(&mut self, max_wait: Duration) -> Result<Vec<u8>, TransportError>;

    fn is_open(&self) -> bool;

    fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// A serial device the host can talk to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.name)?;
        if let (Some(vid), Some(pid)) = (self.vendor_id, self.product_id) {
            write!(f, " [{vid:04x}:{pid:04x}]")?;
        }
        Ok(())
    }
}

/// Discovers devices and opens transports to them.
pub trait DeviceProvider {
    fn list_devices(&self) -> Result<Vec<DeviceInfo>, TransportError>;

    /// Opens `device_id`; reads on the transport return at most `max_read` bytes.
    fn open(
        &self,
        device_id: &str,
        max_read: usize,
    ) -> Result<Box<dyn SerialTransport>, TransportError>;
}

/// Devices reachable through the operating system's serial ports.
#[derive(Debug, Clone)]
pub struct SerialPortProvider {
    baud_rate: u32,
}

impl Default for SerialPortProvider {
    fn default() -> Self {
        Self::new(DEFAULT_BAUD_RATE)
    }
}

impl SerialPortProvider {
    pub fn new(baud_rate: u32) -> Self {
        Self { baud_rate }
    }
}

impl DeviceProvider for SerialPortProvider {
    fn list_devices(&self) -> Result<Vec<DeviceInfo>, TransportError> {
        let ports = serialport::available_ports()?;
        debug!("found {} serial ports", ports.len());

        Ok(ports
            .into_iter()
            .map(|port| match port.port_type {
                SerialPortType::UsbPort(usb) => DeviceInfo {
                    name: usb.product.unwrap_or_else(|| "USB serial device".to_string()),
                    id: port.port_name,
                    vendor_id: Some(usb.vid),
                    product_id: Some(usb.pid),
                },
                _ => DeviceInfo {
                    name: "serial device".to_string(),
                    id: port.port_name,
                    vendor_id: None,
                    product_id: None,
                },
            })
            .collect())
    }

    fn open(
        &self,
        device_id: &str,
        max_read: usize,
    ) -> Result<Box<dyn SerialTransport>, TransportError> {
        let port = serialport::new(device_id, self.baud_rate)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => TransportError::DeviceNotFound(device_id.into()),
                _ => TransportError::Serial(e),
            })?;

        info!("opened {device_id} at {} baud", self.baud_rate);
        Ok(Box::new(SerialPortTransport::new(port, max_read)))
    }
}

/// [`SerialTransport`] over a `serialport` handle.
pub struct SerialPortTransport {
    port: Option<Box<dyn SerialPort>>,
    scratch: Vec<u8>,
}

impl SerialPortTransport {
    pub fn new(port: Box<dyn SerialPort>, max_read: usize) -> Self {
        Self {
            port: Some(port),
            scratch: vec![0; max_read.max(1)],
        }
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, TransportError> {
        self.port.as_mut().ok_or(TransportError::Closed)
    }
}

impl SerialTransport for SerialPortTransport {
    fn write(&mut self, bytes: &[u8], timeout: Duration) -> Result<(), TransportError> {
        let port = self.port()?;
        port.set_timeout(timeout)?;
        port.write_all(bytes)?;
        port.flush()?;
        trace!("wrote {} bytes", bytes.len());
        Ok(())
    }

    fn read_chunk(&mut self, max_wait: Duration) -> Result<Vec<u8>, TransportError> {
        let mut scratch = std::mem::take(&mut self.scratch);
        let res = self.port().and_then(|port| {
            port.set_timeout(max_wait)?;
            match port.read(&mut scratch) {
                Ok(n) => Ok(scratch[..n].to_vec()),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(Vec::new()),
                Err(e) => Err(TransportError::Io(e)),
            }
        });
        self.scratch = scratch;
        res
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if self.port.take().is_some() {
            info!("serial port closed");
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod scripted {
    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
        thread,
    };

    use super::*;

    /// One read attempt worth of behaviour.
    #[derive(Debug, Clone)]
    pub(crate) enum Step {
        Chunk(Vec<u8>),
        /// Nothing arrives; the read waits out its full budget.
        Idle,
        Fail,
    }

    /// In-memory transport that replays a fixed script of reads.
    pub(crate) struct ScriptedTransport {
        steps: VecDeque<Step>,
        writes: Arc<Mutex<Vec<Vec<u8>>>>,
        fail_write: bool,
        open: bool,
    }

    impl ScriptedTransport {
        pub(crate) fn new(steps: impl IntoIterator<Item = Step>) -> Self {
            Self {
                steps: steps.into_iter().collect(),
                writes: Arc::new(Mutex::new(Vec::new())),
                fail_write: false,
                open: true,
            }
        }

        pub(crate) fn failing_write() -> Self {
            Self {
                fail_write: true,
                ..Self::new([])
            }
        }

        pub(crate) fn writes(&self) -> Arc<Mutex<Vec<Vec<u8>>>> {
            Arc::clone(&self.writes)
        }
    }

    impl SerialTransport for ScriptedTransport {
        fn write(&mut self, bytes: &[u8], _timeout: Duration) -> Result<(), TransportError> {
            if self.fail_write {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "cable unplugged").into());
            }
            self.writes.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }

        fn read_chunk(&mut self, max_wait: Duration) -> Result<Vec<u8>, TransportError> {
            match self.steps.pop_front() {
                Some(Step::Chunk(bytes)) => Ok(bytes),
                Some(Step::Fail) => {
                    Err(io::Error::new(io::ErrorKind::BrokenPipe, "cable unplugged").into())
                }
                Some(Step::Idle) | None => {
                    thread::sleep(max_wait);
                    Ok(Vec::new())
                }
            }
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn close(&mut self) -> Result<(), TransportError> {
            self.open = false;
            Ok(())
        }
    }
}
