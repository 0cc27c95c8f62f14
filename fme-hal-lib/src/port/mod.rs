#[cfg(target_os = "linux")]
mod linux;
#[cfg(not(target_os = "linux"))]
mod other;

#[cfg(target_os = "linux")]
use linux::{do_open_port, is_port_open};
#[cfg(not(target_os = "linux"))]
use other::{do_open_port, is_port_open};

pub use serialport::SerialPort;

use anyhow::Result;
use log::{debug, error, info, warn};
use serialport::ClearBuffer;
use std::io::{self, Read, Write};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::protocol::{validate_response, ErrorKind, Response, Transport, WRITE_TERMINATOR};

#[derive(Error, Debug)]
pub enum OpenPortError {
    #[error("{port_name:?} busy")]
    PortBusy { port_name: String },
    #[error("rs485 configuration failed on {port_name:?}")]
    Rs485Error { port_name: String },
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
trait Rs485 {
    fn rs485_is_enabled(&self) -> Result<bool>;
    fn rs485_enable(&self, enable: bool) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct PortConfig {
    pub port_name: String,
    pub baudrate: u32,
    /// Skip the busy-port check.
    pub force: bool,
    /// Switch the UART into kernel RS-485 mode (Linux only).
    pub rs485: bool,
    /// Settle time after raising RTS/DTR; the boards are powered from these lines.
    pub open_pause: Duration,
    /// Gap between writing a frame and starting to read the answer.
    pub write_pause: Duration,
    pub write_timeout: Duration,
    pub read_timeout: Duration,
    /// Read timeout for selector frames.
    pub selector_timeout: Duration,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            port_name: "/dev/ttyUSB0".to_string(),
            baudrate: 9600,
            force: false,
            rs485: false,
            open_pause: Duration::from_millis(3000),
            write_pause: Duration::from_millis(10),
            write_timeout: Duration::from_millis(5000),
            read_timeout: Duration::from_millis(5000),
            selector_timeout: Duration::from_millis(5000),
        }
    }
}

/// Byte-level surface of an open serial line.
pub trait Device: Read + Write + Send {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;
    fn set_rts(&mut self, level: bool) -> Result<()>;
    fn set_dtr(&mut self, level: bool) -> Result<()>;
    fn clear_input(&mut self) -> Result<()>;
    fn clear_output(&mut self) -> Result<()>;
}

impl Device for Box<dyn SerialPort> {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        Ok(SerialPort::set_timeout(&mut **self, timeout)?)
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        Ok(self.write_request_to_send(level)?)
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        Ok(self.write_data_terminal_ready(level)?)
    }

    fn clear_input(&mut self) -> Result<()> {
        Ok(self.clear(ClearBuffer::Input)?)
    }

    fn clear_output(&mut self) -> Result<()> {
        Ok(self.clear(ClearBuffer::Output)?)
    }
}

/// Opens the configured UART as 8-N-1 without flow control.
pub fn open_device(config: &PortConfig) -> Result<Box<dyn Device>> {
    if !config.force && is_port_open(&config.port_name) {
        return Err(OpenPortError::PortBusy {
            port_name: config.port_name.clone(),
        }
        .into());
    }

    let port = do_open_port(config)?;
    debug!(
        "open_port OK: {} @ {} baud",
        &config.port_name, config.baudrate
    );
    Ok(Box::new(port))
}

type Connector = Box<dyn FnMut(&PortConfig) -> Result<Box<dyn Device>> + Send>;

/// Decides whether the bytes read so far form a complete frame.
pub type Validator = fn(&[u8]) -> bool;

/// Owns the bus connection for the lifetime of the process.
pub struct Port {
    config: PortConfig,
    connector: Connector,
    validate: Validator,
    device: Option<Box<dyn Device>>,
}

impl Port {
    pub fn new(config: PortConfig) -> Self {
        Self::with_connector(config, open_device)
    }

    pub fn with_connector<F>(config: PortConfig, connector: F) -> Self
    where
        F: FnMut(&PortConfig) -> Result<Box<dyn Device>> + Send + 'static,
    {
        Self {
            config,
            connector: Box::new(connector),
            validate: validate_response,
            device: None,
        }
    }

    pub fn with_validator(mut self, validate: Validator) -> Self {
        self.validate = validate;
        self
    }

    pub fn config(&self) -> &PortConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    pub fn open(&mut self) -> bool {
        if self.is_open() {
            debug!("port {} is already open", self.config.port_name);
            return true;
        }

        let mut device = match (self.connector)(&self.config) {
            Ok(device) => device,
            Err(e) => {
                error!("error opening port {}: {:#}", self.config.port_name, e);
                return false;
            }
        };

        if let Err(e) = device.set_rts(true).and_then(|_| device.set_dtr(true)) {
            error!("can't raise control lines on {}: {:#}", self.config.port_name, e);
            return false;
        }

        thread::sleep(self.config.open_pause);
        self.device = Some(device);

        if self.reset_buffers(true) {
            info!("port {} opened", self.config.port_name);
            return true;
        }

        self.close();
        false
    }

    pub fn close(&mut self) -> bool {
        let mut device = match self.device.take() {
            Some(device) => device,
            None => {
                debug!("port {} is not open", self.config.port_name);
                return false;
            }
        };

        if let Err(e) = device.set_rts(true).and_then(|_| device.set_dtr(false)) {
            warn!("can't drop DTR on {}: {:#}", self.config.port_name, e);
        }

        info!("port {} closed", self.config.port_name);
        true
    }

    pub fn reset_buffers(&mut self, reset_output: bool) -> bool {
        let device = match self.device.as_mut() {
            Some(device) => device,
            None => return false,
        };

        let res = device.clear_input().and_then(|_| {
            if reset_output {
                device.clear_output()
            } else {
                Ok(())
            }
        });

        match res {
            Ok(_) => true,
            Err(e) => {
                warn!("buffer reset failed: {:#}", e);
                false
            }
        }
    }
}

impl Transport for Port {
    fn send_recv(&mut self, payload: &str, read_timeout: Duration) -> Response {
        self.reset_buffers(true);

        let device = match self.device.as_mut() {
            Some(device) => device,
            None => {
                warn!("send {:?}: port is not open", payload);
                return Response::failed(ErrorKind::CommunicationError);
            }
        };

        debug!("send {:?}", payload);
        if let Err(e) = write_frame(&mut **device, payload, self.config.write_timeout) {
            warn!("error sending {:?}: {:#}", payload, e);
            return Response::failed(ErrorKind::CommunicationError);
        }

        thread::sleep(self.config.write_pause);

        let response = read_frame(&mut **device, read_timeout, self.validate);
        match response.error {
            None => debug!("recv {:?}", response.text()),
            Some(_) => warn!(
                "no valid answer to {:?} within {:?}, got {:02X?}",
                payload, read_timeout, response.raw
            ),
        }
        response
    }
}

fn write_frame(device: &mut dyn Device, payload: &str, timeout: Duration) -> Result<()> {
    device.set_timeout(timeout)?;
    device.write_all(payload.as_bytes())?;
    device.write_all(WRITE_TERMINATOR)?;
    device.flush()?;
    Ok(())
}

/// Reads one byte at a time until the accumulated input forms a valid frame.
fn read_frame(device: &mut dyn Device, timeout: Duration, validate: Validator) -> Response {
    let deadline = Instant::now() + timeout;
    let mut data = Vec::new();
    let mut byte = [0u8; 1];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }

        if let Err(e) = device.set_timeout(remaining) {
            warn!("can't set read timeout: {:#}", e);
            break;
        }

        match device.read(&mut byte) {
            Ok(1) => {
                data.push(byte[0]);
                if validate(&data) {
                    return Response::received(data);
                }
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                warn!("read failed: {}", e);
                break;
            }
        }
    }

    Response {
        raw: data,
        ..Response::failed(ErrorKind::CommunicationError)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Default)]
    pub struct MockState {
        pub rx: VecDeque<u8>,
        /// Answers moved into `rx` as each terminated frame is written.
        pub replies: VecDeque<Vec<u8>>,
        pub written: Vec<u8>,
        pub rts: bool,
        pub dtr: bool,
        pub input_clears: usize,
        pub output_clears: usize,
        pub fail_writes: bool,
        pub disconnected: bool,
        pub opens: usize,
        /// Every timeout applied, in order.
        pub timeouts: Vec<Duration>,
    }

    /// Fake UART; bytes in `rx` are read back one at a time.
    #[derive(Clone, Default)]
    pub struct MockDevice(pub Arc<Mutex<MockState>>);

    impl Read for MockDevice {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut state = self.0.lock().unwrap();
            if state.disconnected {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
            }
            let next = state.rx.pop_front();
            match next {
                Some(b) => {
                    buf[0] = b;
                    Ok(1)
                }
                None => {
                    drop(state);
                    thread::sleep(Duration::from_millis(1));
                    Err(io::Error::new(io::ErrorKind::TimedOut, "timed out"))
                }
            }
        }
    }

    impl Write for MockDevice {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let mut state = self.0.lock().unwrap();
            if state.fail_writes {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "write timed out"));
            }
            state.written.extend_from_slice(buf);
            if buf.ends_with(WRITE_TERMINATOR) {
                if let Some(reply) = state.replies.pop_front() {
                    state.rx.extend(reply);
                }
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Device for MockDevice {
        fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
            self.0.lock().unwrap().timeouts.push(timeout);
            Ok(())
        }

        fn set_rts(&mut self, level: bool) -> Result<()> {
            self.0.lock().unwrap().rts = level;
            Ok(())
        }

        fn set_dtr(&mut self, level: bool) -> Result<()> {
            self.0.lock().unwrap().dtr = level;
            Ok(())
        }

        fn clear_input(&mut self) -> Result<()> {
            let mut state = self.0.lock().unwrap();
            state.input_clears += 1;
            state.rx.clear();
            Ok(())
        }

        fn clear_output(&mut self) -> Result<()> {
            self.0.lock().unwrap().output_clears += 1;
            Ok(())
        }
    }

    fn quick_config() -> PortConfig {
        PortConfig {
            port_name: "mock".to_string(),
            open_pause: Duration::ZERO,
            write_pause: Duration::ZERO,
            ..Default::default()
        }
    }

    fn reply(mock: &MockDevice, bytes: &[u8]) {
        mock.0.lock().unwrap().replies.push_back(bytes.to_vec());
    }

    fn mock_port() -> (Port, MockDevice) {
        let mock = MockDevice::default();
        let handle = mock.clone();
        let port = Port::with_connector(quick_config(), move |_| {
            handle.0.lock().unwrap().opens += 1;
            Ok(Box::new(handle.clone()) as Box<dyn Device>)
        });
        (port, mock)
    }

    #[test]
    fn open_is_idempotent() {
        let (mut port, mock) = mock_port();

        assert!(port.open());
        assert!(port.open());

        let state = mock.0.lock().unwrap();
        assert_eq!(state.opens, 1);
        assert!(state.rts);
        assert!(state.dtr);
        assert_eq!(state.input_clears, 1);
        assert_eq!(state.output_clears, 1);
    }

    #[test]
    fn open_failure_leaves_port_closed() {
        let mut port = Port::with_connector(quick_config(), |_| {
            Err(anyhow::anyhow!("no such device"))
        });

        assert!(!port.open());
        assert!(!port.is_open());
    }

    #[test]
    fn close_drops_dtr() {
        let (mut port, mock) = mock_port();

        assert!(!port.close());
        assert!(port.open());
        assert!(port.close());
        assert!(!port.is_open());

        let state = mock.0.lock().unwrap();
        assert!(!state.dtr);
        assert!(state.rts);
    }

    #[test]
    fn reset_buffers_requires_open_port() {
        let (mut port, mock) = mock_port();
        assert!(!port.reset_buffers(true));

        port.open();
        assert!(port.reset_buffers(false));

        let state = mock.0.lock().unwrap();
        assert_eq!(state.input_clears, 2);
        assert_eq!(state.output_clears, 1);
    }

    #[test]
    fn send_recv_on_closed_port() {
        let (mut port, mock) = mock_port();

        let r = port.send_recv("H001", Duration::from_millis(50));
        assert!(r.is_comm_error());
        assert!(!r.valid);
        assert!(mock.0.lock().unwrap().written.is_empty());
    }

    #[test]
    fn send_recv_writes_terminated_frame() {
        let (mut port, mock) = mock_port();
        port.open();
        mock.0.lock().unwrap().timeouts.clear();
        reply(&mock, b"0010OK\r\n");

        let r = port.send_recv("S", Duration::from_millis(200));

        assert!(r.success());
        assert_eq!(r.text(), "0010OK");
        assert_eq!(r.raw, b"0010OK");

        let state = mock.0.lock().unwrap();
        assert_eq!(state.written, b"S\r");
        assert_eq!(state.timeouts[0], port.config().write_timeout);
        assert!(state.timeouts.len() > 1);
        assert!(state.timeouts[1..]
            .iter()
            .all(|&t| t > Duration::ZERO && t <= Duration::from_millis(200)));
    }

    #[test]
    fn send_recv_stops_at_terminator() {
        let (mut port, mock) = mock_port();
        port.open();
        reply(&mock, b"ERRtrailing");

        let r = port.send_recv("Q", Duration::from_millis(200));

        assert!(r.success());
        assert_eq!(r.text(), "ERR");
        assert_eq!(mock.0.lock().unwrap().rx.len(), "trailing".len());
    }

    #[test]
    fn send_recv_with_custom_validator() {
        let (port, mock) = mock_port();
        let mut port = port.with_validator(|data| data.ends_with(b"\n"));
        port.open();
        reply(&mock, b"V1.2 OK\nnext");

        let r = port.send_recv("W", Duration::from_millis(200));

        assert!(r.success());
        assert_eq!(r.text(), "V1.2 OK\n");
    }

    #[test]
    fn send_recv_timeout_is_comm_error() {
        let (mut port, mock) = mock_port();
        port.open();
        reply(&mock, b"garbage");

        let started = Instant::now();
        let r = port.send_recv("S", Duration::from_millis(30));

        assert!(started.elapsed() >= Duration::from_millis(30));
        assert!(r.is_comm_error());
        assert!(!r.valid);
        assert_eq!(r.raw, b"garbage");
        assert_eq!(r.text, None);
    }

    #[test]
    fn send_recv_write_failure_skips_read() {
        let (mut port, mock) = mock_port();
        port.open();
        mock.0.lock().unwrap().fail_writes = true;
        reply(&mock, b"OK");

        let r = port.send_recv("S", Duration::from_millis(200));

        assert!(r.is_comm_error());
        let state = mock.0.lock().unwrap();
        assert!(state.rx.is_empty());
        assert_eq!(state.replies.len(), 1);
    }

    #[test]
    fn send_recv_clears_buffers_each_time() {
        let (mut port, mock) = mock_port();
        port.open();
        reply(&mock, b"OK");
        reply(&mock, b"OK");

        assert!(port.send_recv("A", Duration::from_millis(100)).success());
        assert!(port.send_recv("B", Duration::from_millis(100)).success());

        let state = mock.0.lock().unwrap();
        assert_eq!(state.input_clears, 3);
        assert_eq!(state.output_clears, 3);
    }

    #[test]
    fn send_recv_discards_stale_input() {
        let (mut port, mock) = mock_port();
        port.open();
        mock.0.lock().unwrap().rx.extend(b"0000OK");

        let r = port.send_recv("S", Duration::from_millis(30));

        assert!(r.is_comm_error());
        assert!(r.raw.is_empty());
        assert_eq!(mock.0.lock().unwrap().written, b"S\r");
    }

    #[test]
    fn send_recv_leftover_does_not_reach_next_frame() {
        let (mut port, mock) = mock_port();
        port.open();
        reply(&mock, b"OKOK");

        assert!(port.send_recv("A", Duration::from_millis(100)).success());
        let r = port.send_recv("B", Duration::from_millis(30));

        assert!(r.is_comm_error());
        assert!(r.raw.is_empty());
    }

    #[test]
    fn send_recv_aborts_on_disconnect() {
        let (mut port, mock) = mock_port();
        port.open();
        mock.0.lock().unwrap().disconnected = true;

        let started = Instant::now();
        let r = port.send_recv("S", Duration::from_secs(5));

        assert!(r.is_comm_error());
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
