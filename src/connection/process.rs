//! 进程连接管理器
//!
//! Runs the test application as a child process (QEMU, a host build of the
//! firmware, ...) and uses its stdin/stdout as the board console. stdout and
//! stderr are read by one thread each and funnelled into a single channel.

use log::{debug, warn};
use std::collections::BTreeMap;
use std::io::{ErrorKind, Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use crate::connection::ConsoleConnection;
use crate::dut::DutError;

/// 进程连接
pub struct ProcessConnection {
    command: String,
    env: BTreeMap<String, String>,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    output: Option<Receiver<Vec<u8>>>,
}

impl ProcessConnection {
    /// 启动进程
    pub fn spawn(command: String, env: BTreeMap<String, String>) -> Result<Self, DutError> {
        let mut connection = Self {
            command,
            env,
            child: None,
            stdin: None,
            output: None,
        };
        connection.start()?;
        Ok(connection)
    }

    fn start(&mut self) -> Result<(), DutError> {
        debug!("Spawning console process: {}", self.command);
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                DutError::Acquisition(format!("Unable to start process `{}`: {e}", self.command))
            })?;

        let (tx, rx) = mpsc::channel();
        if let Some(stdout) = child.stdout.take() {
            pump(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            pump(stderr, tx);
        }

        self.stdin = child.stdin.take();
        self.child = Some(child);
        self.output = Some(rx);
        Ok(())
    }

    fn stop(&mut self) {
        self.stdin = None;
        self.output = None;
        if let Some(mut child) = self.child.take() {
            // 已退出的进程kill会失败，忽略
            let _ = child.kill();
            match child.wait() {
                Ok(status) => debug!("Console process exited: {status}"),
                Err(e) => warn!("Failed to reap console process: {e}"),
            }
        }
    }
}

/// Forwards everything read from `source` into `tx` until EOF.
fn pump<R: Read + Send + 'static>(mut source: R, tx: Sender<Vec<u8>>) {
    thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    });
}

impl ConsoleConnection for ProcessConnection {
    fn write_line(&mut self, line: &str) -> Result<(), DutError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| DutError::Disconnected("console process is not running".to_string()))?;
        let written = stdin
            .write_all(line.as_bytes())
            .and_then(|_| stdin.write_all(b"\n"))
            .and_then(|_| stdin.flush());
        match written {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                Err(DutError::Disconnected(format!("console process closed stdin: {e}")))
            }
            Err(e) => Err(DutError::Io(e)),
        }
    }

    fn read_available(&mut self, timeout: Duration) -> Result<Vec<u8>, DutError> {
        let rx = self
            .output
            .as_ref()
            .ok_or_else(|| DutError::Disconnected("console process is not running".to_string()))?;
        match rx.recv_timeout(timeout) {
            Ok(mut bytes) => {
                while let Ok(more) = rx.try_recv() {
                    bytes.extend_from_slice(&more);
                }
                Ok(bytes)
            }
            Err(RecvTimeoutError::Timeout) => Ok(Vec::new()),
            Err(RecvTimeoutError::Disconnected) => {
                Err(DutError::Disconnected("console process exited".to_string()))
            }
        }
    }

    /// 重启进程
    fn reset(&mut self) -> Result<(), DutError> {
        debug!("Restarting console process");
        self.stop();
        self.start()
    }

    fn close(&mut self) -> Result<(), DutError> {
        self.stop();
        Ok(())
    }

    fn describe(&self) -> String {
        format!("process:{}", self.command)
    }
}

impl Drop for ProcessConnection {
    fn drop(&mut self) {
        self.stop();
    }
}
