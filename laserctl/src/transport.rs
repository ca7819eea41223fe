/*!
Line transport to the mount controller.

The controller protocol is line based, so the transport exposes whole lines. A read
that times out yields an empty line; the device link counts those against its wait
budget.
*/

use crate::device::DeviceError;
use serialport::{DataBits, FlowControl, Parity, SerialPort, SerialPortType, StopBits};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::time::Duration;
use tracing::{debug, info};

/// Transport trait for the line protocol
pub trait LineTransport: Send {
    /// Read one line without its terminator. An empty string means nothing arrived
    /// before the read timeout.
    fn read_line(&mut self) -> Result<String, DeviceError>;

    /// Write one token followed by a newline
    fn write_line(&mut self, token: &str) -> Result<(), DeviceError>;
}

/// Serial transport for the USB link to the controller
pub struct SerialTransport {
    reader: BufReader<Box<dyn SerialPort>>,
    writer: Box<dyn SerialPort>,
    pending: Vec<u8>,
}

impl SerialTransport {
    /// Open a serial port
    ///
    /// # Arguments
    /// * `path` - Serial port path (e.g., "/dev/ttyUSB0")
    /// * `baud_rate` - Baud rate (the controller uses 9600)
    /// * `read_timeout` - Time a single read may block before it counts as empty
    pub fn open(path: &str, baud_rate: u32, read_timeout: Duration) -> Result<Self, DeviceError> {
        let unavailable = |source| DeviceError::Unavailable {
            path: path.to_string(),
            source,
        };

        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(read_timeout)
            .open()
            .map_err(unavailable)?;
        let writer = port.try_clone().map_err(unavailable)?;

        info!("Opened serial port: {} at {} baud", path, baud_rate);

        Ok(Self {
            reader: BufReader::new(port),
            writer,
            pending: Vec::new(),
        })
    }

    fn take_pending(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.pending).trim_end().to_string();
        self.pending.clear();
        line
    }
}

impl LineTransport for SerialTransport {
    fn read_line(&mut self) -> Result<String, DeviceError> {
        // Bytes read before a timeout stay in `pending` until the newline arrives
        match self.reader.read_until(b'\n', &mut self.pending) {
            Ok(_) if self.pending.ends_with(b"\n") => Ok(self.take_pending()),
            Ok(_) => Ok(String::new()),
            Err(e) if e.kind() == ErrorKind::TimedOut => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_line(&mut self, token: &str) -> Result<(), DeviceError> {
        self.writer.write_all(token.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        debug!("-> {}", token);
        Ok(())
    }
}

/// List the USB serial ports the controller may be attached to
pub fn available_ports() -> Result<Vec<String>, serialport::Error> {
    let ports = serialport::available_ports()?
        .into_iter()
        .filter(|port| {
            matches!(port.port_type, SerialPortType::UsbPort(_)) || port.port_name.contains("USB")
        })
        .map(|port| port.port_name)
        .collect();

    Ok(ports)
}

#[cfg(test)]
pub mod scripted {
    //! In-memory transport replaying a scripted controller

    use super::LineTransport;
    use crate::device::DeviceError;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Replays queued lines; an exhausted script behaves like a silent controller
    #[derive(Clone, Default)]
    pub struct ScriptedTransport {
        script: Arc<Mutex<VecDeque<String>>>,
        written: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedTransport {
        pub fn new(lines: &[&str]) -> Self {
            let transport = Self::default();
            transport.push(lines);
            transport
        }

        /// Queue more controller output
        pub fn push(&self, lines: &[&str]) {
            let mut script = self.script.lock().unwrap();
            script.extend(lines.iter().map(|l| l.to_string()));
        }

        /// Everything the host wrote so far
        pub fn written(&self) -> Vec<String> {
            self.written.lock().unwrap().clone()
        }

        /// Controller output not consumed yet
        pub fn remaining(&self) -> Vec<String> {
            self.script.lock().unwrap().iter().cloned().collect()
        }
    }

    impl LineTransport for ScriptedTransport {
        fn read_line(&mut self) -> Result<String, DeviceError> {
            Ok(self.script.lock().unwrap().pop_front().unwrap_or_default())
        }

        fn write_line(&mut self, token: &str) -> Result<(), DeviceError> {
            self.written.lock().unwrap().push(token.to_string());
            Ok(())
        }
    }
}
