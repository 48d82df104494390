//! 串口连接管理器
//!
//! 该模块实现了通过串口访问开发板控制台的连接

use log::{debug, warn};
use mio_serial::SerialPort;
use std::io::{ErrorKind, Read, Write};
use std::thread;
use std::time::Duration;

use crate::config::serial_config::SerialConfig;
use crate::connection::ConsoleConnection;
use crate::dut::DutError;

/// 串口连接
pub struct SerialConnection {
    config: SerialConfig,
    port: Option<Box<dyn SerialPort + Send>>, // 线程安全
}

impl SerialConnection {
    /// Opens the port right away so a missing device fails acquisition.
    pub fn open(config: SerialConfig) -> Result<Self, DutError> {
        let port = Self::open_port(&config)?;
        Ok(Self {
            config,
            port: Some(port),
        })
    }

    /// 打开串口（使用mio-serial）
    fn open_port(config: &SerialConfig) -> Result<Box<dyn SerialPort + Send>, DutError> {
        debug!("Opening serial port {} at {} baud", config.port, config.baud_rate);
        let stream = mio_serial::new(&config.port, config.baud_rate)
            .timeout(config.timeout)
            .open_native()
            .map_err(|e| {
                DutError::Acquisition(format!("Unable to open serial port {}: {e}", config.port))
            })?; // 无法打开串口
        Ok(Box::new(stream))
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort + Send>, DutError> {
        let name = self.config.port.clone();
        self.port
            .as_mut()
            .ok_or_else(|| DutError::Disconnected(format!("serial port {name} is closed")))
    }
}

fn serial_err(e: mio_serial::Error) -> DutError {
    DutError::Io(std::io::Error::other(e.to_string()))
}

impl ConsoleConnection for SerialConnection {
    fn write_line(&mut self, line: &str) -> Result<(), DutError> {
        let port = self.port()?;
        port.write_all(line.as_bytes())?;
        port.write_all(b"\n")?;
        port.flush()?;
        Ok(())
    }

    fn read_available(&mut self, timeout: Duration) -> Result<Vec<u8>, DutError> {
        let name = self.config.port.clone();
        let port = self.port()?;
        port.set_timeout(timeout.max(Duration::from_millis(1))).map_err(serial_err)?;
        let mut buf = vec![0u8; 4096];
        match port.read(&mut buf) {
            Ok(0) => Err(DutError::Disconnected(format!("serial port {name} returned EOF"))),
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => Ok(Vec::new()),
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                Err(DutError::Disconnected(format!("serial port {name}: {e}")))
            }
            Err(e) => Err(DutError::Io(e)),
        }
    }

    /// 通过DTR/RTS拉低EN引脚复位芯片
    fn reset(&mut self) -> Result<(), DutError> {
        if !self.config.hard_reset {
            return Err(DutError::Unsupported(format!(
                "hard reset disabled for {}",
                self.config.port
            )));
        }
        debug!("Hard resetting board on {}", self.config.port);
        let port = self.port()?;
        port.write_data_terminal_ready(false).map_err(serial_err)?;
        port.write_request_to_send(true).map_err(serial_err)?;
        thread::sleep(Duration::from_millis(100));
        port.write_request_to_send(false).map_err(serial_err)?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), DutError> {
        if self.port.take().is_some() {
            debug!("Closed serial port {}", self.config.port);
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("serial:{}", self.config.port)
    }
}

impl Drop for SerialConnection {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close {}: {e}", self.config.port);
        }
    }
}
