//! UART-backed motion port.
//!
//! The serialport crate is blocking, so the port is split across a
//! dedicated reader thread and short blocking writes:
//!
//! - the reader thread accumulates bytes into newline-delimited tokens and
//!   forwards them over an unbounded channel to the async side;
//! - writes run under `spawn_blocking` against the shared port handle.
//!
//! On a port error the reader drops the handle and silently re-opens in the
//! background; while the port is down, writes surface
//! [`LinkError::Disconnected`] and unrelated hub work continues.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use wayhub_types::LinkError;

use crate::motion::MotionPort;

const REOPEN_BACKOFF: Duration = Duration::from_secs(2);

struct PortShared {
    port: Mutex<Option<Box<dyn SerialPort>>>,
    path: String,
    baud: u32,
    shutdown: AtomicBool,
}

/// Serial [`MotionPort`] with a background reader thread.
pub struct SerialMotionPort {
    shared: Arc<PortShared>,
    tokens: mpsc::UnboundedReceiver<String>,
}

impl SerialMotionPort {
    /// Open the UART and start the reader thread.
    pub fn open(path: &str, baud: u32) -> Result<Self, LinkError> {
        let port = open_port(path, baud)?;
        info!(%path, baud, "opened motion controller serial port");

        let shared = Arc::new(PortShared {
            port: Mutex::new(Some(port)),
            path: path.to_string(),
            baud,
            shutdown: AtomicBool::new(false),
        });
        let (token_tx, token_rx) = mpsc::unbounded_channel();

        let reader = Arc::clone(&shared);
        thread::Builder::new()
            .name("wayhub-serial-reader".to_string())
            .spawn(move || reader_loop(reader, token_tx))
            .map_err(|e| LinkError::Io(e.to_string()))?;

        Ok(Self {
            shared,
            tokens: token_rx,
        })
    }
}

impl Drop for SerialMotionPort {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Relaxed);
    }
}

#[async_trait]
impl MotionPort for SerialMotionPort {
    async fn write_frame(&mut self, frame: &str) -> Result<(), LinkError> {
        let shared = Arc::clone(&self.shared);
        let data = frame.as_bytes().to_vec();
        tokio::task::spawn_blocking(move || {
            let Ok(mut guard) = shared.port.lock() else {
                return Err(LinkError::Io("serial port mutex poisoned".into()));
            };
            let Some(port) = guard.as_mut() else {
                return Err(LinkError::Disconnected);
            };
            port.write_all(&data)
                .and_then(|()| port.flush())
                .map_err(|e| LinkError::Io(e.to_string()))
        })
        .await
        .map_err(|e| LinkError::Io(e.to_string()))?
    }

    async fn read_token(&mut self) -> Result<String, LinkError> {
        self.tokens.recv().await.ok_or(LinkError::Disconnected)
    }
}

fn open_port(path: &str, baud: u32) -> Result<Box<dyn SerialPort>, LinkError> {
    serialport::new(path, baud)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(Duration::from_millis(50))
        .open()
        .map_err(|e| LinkError::Io(e.to_string()))
}

fn reader_loop(shared: Arc<PortShared>, tokens: mpsc::UnboundedSender<String>) {
    let mut buf = [0u8; 256];
    let mut line: Vec<u8> = Vec::new();

    while !shared.shutdown.load(Ordering::Relaxed) {
        if tokens.is_closed() {
            break;
        }

        let read = {
            let Ok(mut guard) = shared.port.lock() else {
                error!("serial reader: mutex poisoned, exiting");
                return;
            };
            match guard.as_mut() {
                Some(port) => match port.read(&mut buf) {
                    Ok(n) => Ok(n),
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
                    Err(e) => {
                        // Drop the handle; the reopen path below takes over.
                        *guard = None;
                        Err(e)
                    }
                },
                None => {
                    drop(guard);
                    reopen(&shared);
                    continue;
                }
            }
        };

        match read {
            Ok(0) => {}
            Ok(n) => {
                for &byte in &buf[..n] {
                    match byte {
                        b'\n' => {
                            if !line.is_empty() {
                                let token = String::from_utf8_lossy(&line).into_owned();
                                debug!(%token, "serial token");
                                let _ = tokens.send(token);
                                line.clear();
                            }
                        }
                        b'\r' => {}
                        other => line.push(other),
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "serial read failed, reconnecting");
                line.clear();
            }
        }
    }

    debug!("serial reader thread exiting");
}

fn reopen(shared: &PortShared) {
    thread::sleep(REOPEN_BACKOFF);
    if shared.shutdown.load(Ordering::Relaxed) {
        return;
    }
    match open_port(&shared.path, shared.baud) {
        Ok(port) => {
            if let Ok(mut guard) = shared.port.lock() {
                *guard = Some(port);
                info!(path = %shared.path, "serial port reconnected");
            }
        }
        Err(e) => {
            debug!(path = %shared.path, error = %e, "serial reopen failed");
        }
    }
}
