use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use log::{info, warn};

use super::{
    CancelReport, ConnectionReport, Response,
    connection::{ConnectionState, OpenError, TransportHandle},
    correlation::CorrelationPolicy,
    frame::{FrameCodec, LooseCodec},
    request::Request,
    session::{CommandError, CommandSession, SessionConfig},
    transport::{DeviceInfo, DeviceProvider, SerialPortProvider, TransportError},
};

/// Host side of a payment terminal link.
///
/// Owns the connection state for one terminal and runs commands against it one at a
/// time. Cancellation can be requested from another thread through a [`Canceller`].
pub struct PaymentTerminal<P = SerialPortProvider> {
    provider: P,
    codec: Box<dyn FrameCodec + Send + Sync>,
    config: SessionConfig,
    correlation: CorrelationPolicy,
    state: Arc<ConnectionState>,
    device: Mutex<Option<String>>,
}

impl Default for PaymentTerminal<SerialPortProvider> {
    fn default() -> Self {
        Self::new(SerialPortProvider::default())
    }
}

impl<P: DeviceProvider> PaymentTerminal<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            codec: Box::new(LooseCodec),
            config: SessionConfig::default(),
            correlation: CorrelationPolicy::default(),
            state: Arc::new(ConnectionState::new()),
            device: Mutex::new(None),
        }
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_codec(mut self, codec: impl FrameCodec + Send + Sync + 'static) -> Self {
        self.codec = Box::new(codec);
        self
    }

    pub fn with_correlation(mut self, correlation: CorrelationPolicy) -> Self {
        self.correlation = correlation;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn list_devices(&self) -> Result<Vec<DeviceInfo>, TransportError> {
        self.provider.list_devices()
    }

    /// Opens `device_id`, failing if a device is already open.
    pub fn connect(&self, device_id: &str) -> Result<TransportHandle, OpenError> {
        let handle = self
            .state
            .open(|| self.provider.open(device_id, self.config.max_read))?;
        if let Ok(mut device) = self.device.lock() {
            *device = Some(device_id.to_string());
        }
        Ok(handle)
    }

    pub fn open(&self, device_id: &str) -> ConnectionReport {
        match self.connect(device_id) {
            Ok(_) => ConnectionReport::ok("Connection opened successfully"),
            Err(e) => {
                warn!("failed to open {device_id}: {e}");
                ConnectionReport::failed(e.to_string())
            }
        }
    }

    pub fn close(&self) -> ConnectionReport {
        let device = self.device.lock().ok().and_then(|mut d| d.take());
        match self.state.close() {
            Ok(()) => {
                if let Some(device) = device {
                    info!("closed {device}");
                }
                ConnectionReport::ok("Connection closed successfully")
            }
            Err(e) => ConnectionReport::failed(e.to_string()),
        }
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    /// Device id of the open connection, if any.
    pub fn device(&self) -> Option<String> {
        self.device.lock().ok().and_then(|d| d.clone())
    }

    pub fn send(&self, request: Request) -> Result<Response, CommandError> {
        CommandSession::begin(
            &self.state,
            self.codec.as_ref(),
            &self.config,
            &self.correlation,
        )?
        .run(request)
    }

    /// Sends `content` tagged with the two hex digit `tag`.
    ///
    /// `sequence` is truncated to 16 bits; without `timeout` the configured default
    /// deadline applies.
    pub fn send_command(
        &self,
        tag: &str,
        content: &[u8],
        sequence: Option<u32>,
        timeout: Option<Duration>,
    ) -> Result<Response, CommandError> {
        let mut request = Request::parse(tag, content)?;
        if let Some(timeout) = timeout {
            request = request.with_timeout(timeout);
        }
        if let Some(sequence) = sequence {
            request = request.with_sequence(sequence);
        }
        self.send(request)
    }

    pub fn cancel_command(&self) -> CancelReport {
        self.state.cancel_command()
    }

    pub fn canceller(&self) -> Canceller {
        Canceller {
            state: Arc::clone(&self.state),
        }
    }
}

/// Cancels whatever command its terminal is running; safe to move to other threads.
#[derive(Debug, Clone)]
pub struct Canceller {
    state: Arc<ConnectionState>,
}

impl Canceller {
    pub fn cancel(&self) -> CancelReport {
        self.state.cancel_command()
    }

    /// Whether a command is running right now.
    pub fn is_busy(&self) -> bool {
        self.state.is_busy()
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Instant};

    use super::*;
    use crate::protocol::{
        RequestKind,
        frame::{self, StrictCodec},
        transport::{
            SerialTransport,
            scripted::{ScriptedTransport, Step},
        },
    };

    /// Hands out one scripted transport per `open`.
    struct ScriptedProvider {
        transports: Mutex<Vec<ScriptedTransport>>,
        max_read: Mutex<Option<usize>>,
    }

    impl ScriptedProvider {
        fn new(transports: Vec<ScriptedTransport>) -> Self {
            Self {
                transports: Mutex::new(transports),
                max_read: Mutex::new(None),
            }
        }
    }

    impl DeviceProvider for ScriptedProvider {
        fn list_devices(&self) -> Result<Vec<DeviceInfo>, TransportError> {
            Ok(vec![DeviceInfo {
                id: "scripted0".to_string(),
                name: "scripted terminal".to_string(),
                vendor_id: Some(0x1234),
                product_id: Some(0x0001),
            }])
        }

        fn open(
            &self,
            device_id: &str,
            max_read: usize,
        ) -> Result<Box<dyn SerialTransport>, TransportError> {
            if device_id != "scripted0" {
                return Err(TransportError::DeviceNotFound(device_id.to_string()));
            }
            *self.max_read.lock().unwrap() = Some(max_read);
            let transport = self.transports.lock().unwrap().pop();
            match transport {
                Some(t) => Ok(Box::new(t)),
                None => Err(TransportError::Closed),
            }
        }
    }

    fn fast_config() -> SessionConfig {
        SessionConfig {
            read_attempt: Duration::from_millis(20),
            idle_delay: Duration::from_millis(2),
            write_timeout: Duration::from_millis(100),
            default_timeout: Duration::from_millis(100),
            max_read: 32,
        }
    }

    fn terminal(steps: Vec<Step>) -> PaymentTerminal<ScriptedProvider> {
        PaymentTerminal::new(ScriptedProvider::new(vec![ScriptedTransport::new(steps)]))
            .with_config(fast_config())
    }

    #[test]
    fn handshake_round_trip() {
        let answer = frame::encode(
            &Request::new(RequestKind::HandshakeResponse, "1234").with_sequence(0xABCD),
        )
        .unwrap();
        let terminal = terminal(vec![Step::Chunk(answer)]);

        let devices = terminal.list_devices().unwrap();
        let report = terminal.open(&devices[0].id);
        assert!(report.success, "{}", report.message);
        assert_eq!(terminal.device().as_deref(), Some("scripted0"));

        let resp = terminal
            .send_command("F1", b"1234", Some(0xABCD), Some(Duration::from_secs(1)))
            .unwrap();
        assert_eq!(resp.parsed_content(), Some("1234"));

        let report = terminal.close();
        assert!(report.success);
        assert_eq!(report.message, "Connection closed successfully");
        assert!(!terminal.is_open());
        assert_eq!(terminal.device(), None);
    }

    #[test]
    fn open_unknown_device_fails() {
        let terminal = terminal(vec![]);
        let report = terminal.open("ttyUSB9");

        assert!(!report.success);
        assert!(report.message.contains("ttyUSB9"));
    }

    #[test]
    fn open_twice_fails() {
        let terminal = terminal(vec![]);
        assert!(terminal.open("scripted0").success);

        let res = terminal.connect("scripted0");
        assert!(matches!(res, Err(OpenError::AlreadyOpen)));
    }

    #[test]
    fn send_before_open_is_not_connected() {
        let terminal = terminal(vec![]);
        let res = terminal.send_command("F1", b"1234", None, None);

        assert!(matches!(res, Err(CommandError::NotConnected)));
    }

    #[test]
    fn invalid_tag_is_rejected_before_sending() {
        let terminal = terminal(vec![]);
        terminal.open("scripted0");

        let res = terminal.send_command("F1F", b"", None, None);
        assert!(matches!(res, Err(CommandError::Encode(_))));
    }

    #[test]
    fn default_timeout_comes_from_config() {
        let terminal = terminal(vec![]);
        terminal.open("scripted0");

        let started = Instant::now();
        let resp = terminal.send_command("C1", b"", None, None).unwrap();

        assert_eq!(resp, Response::Timeout);
        assert!(started.elapsed() >= fast_config().default_timeout);
    }

    #[test]
    fn send_without_deadline_uses_configured_default() {
        let terminal = terminal(vec![]);
        terminal.open("scripted0");

        let started = Instant::now();
        let resp = terminal.send(Request::handshake("1234")).unwrap();
        let elapsed = started.elapsed();

        assert_eq!(resp, Response::Timeout);
        assert!(elapsed >= fast_config().default_timeout, "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(1), "{elapsed:?}");
    }

    #[test]
    fn open_passes_configured_read_size() {
        let terminal = terminal(vec![]);
        assert!(terminal.open("scripted0").success);

        assert_eq!(*terminal.provider.max_read.lock().unwrap(), Some(32));
    }

    #[test]
    fn canceller_reports_busy_only_while_command_runs() {
        let terminal = terminal(vec![]);
        terminal.open("scripted0");
        let canceller = terminal.canceller();
        assert!(!canceller.is_busy());

        let watcher = canceller.clone();
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(40));
            let busy = watcher.is_busy();
            watcher.cancel();
            busy
        });
        let resp = terminal
            .send_command("01", b"{}", None, Some(Duration::from_secs(5)))
            .unwrap();

        assert_eq!(resp, Response::Cancelled);
        assert!(worker.join().unwrap());
        assert!(!canceller.is_busy());
    }

    #[test]
    fn canceller_stops_command_from_another_thread() {
        let terminal = terminal(vec![]);
        terminal.open("scripted0");
        let canceller = terminal.canceller();

        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(40));
            canceller.cancel()
        });
        let resp = terminal
            .send_command("01", b"{}", None, Some(Duration::from_secs(5)))
            .unwrap();

        assert_eq!(resp, Response::Cancelled);
        assert!(worker.join().unwrap().success);
    }

    #[test]
    fn cancel_when_idle_is_ok() {
        let terminal = terminal(vec![]);
        assert!(terminal.cancel_command().success);
    }

    #[test]
    fn strict_codec_can_be_selected() {
        let answer = frame::encode(&Request::new(RequestKind::CancelResponse, "")).unwrap();
        let terminal = terminal(vec![Step::Chunk(answer)]).with_codec(StrictCodec);
        terminal.open("scripted0");

        let resp = terminal.send(Request::cancel()).unwrap();
        assert!(resp.is_success());
    }
}
