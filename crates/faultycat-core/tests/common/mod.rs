//! Scripted fake transport shared by the integration tests

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use faultycat_core::protocol::{Link, ProtocolError, Transport};
use tracing_subscriber::EnvFilter;

/// Route library logs to the test output; `RUST_LOG=debug` shows the wire
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// What the fake board has seen and what it will answer
#[derive(Default)]
pub struct Board {
    /// Every line written, terminator stripped, across all links
    pub written: Vec<String>,
    /// Read windows requested, in order
    pub windows: Vec<Duration>,
    /// Replies by command text; consumed front to back
    pub replies: HashMap<String, VecDeque<String>>,
    /// Fail the write with this zero-based index
    pub fail_write_at: Option<usize>,
    /// Fail the read with this zero-based index
    pub fail_read_at: Option<usize>,
    /// Wall-clock time every open and read blocks for
    pub io_delay: Duration,
    /// Refuse to open ports
    pub refuse_open: bool,
    pub opens: usize,
    pub closes: usize,
    last_command: Option<String>,
}

#[derive(Clone, Default)]
pub struct FakeTransport {
    pub board: Arc<Mutex<Board>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        init_tracing();
        Self::default()
    }

    /// Queue `reply` for the next time `command` is written
    pub fn reply(&self, command: &str, reply: &str) -> &Self {
        self.board
            .lock()
            .unwrap()
            .replies
            .entry(command.to_string())
            .or_default()
            .push_back(reply.to_string());
        self
    }

    pub fn fail_write_at(&self, index: usize) {
        self.board.lock().unwrap().fail_write_at = Some(index);
    }

    pub fn fail_read_at(&self, index: usize) {
        self.board.lock().unwrap().fail_read_at = Some(index);
    }

    /// Make opens and reads block like a slow board
    pub fn delay_io(&self, delay: Duration) {
        self.board.lock().unwrap().io_delay = delay;
    }

    pub fn refuse_open(&self) {
        self.board.lock().unwrap().refuse_open = true;
    }

    pub fn written(&self) -> Vec<String> {
        self.board.lock().unwrap().written.clone()
    }

    pub fn windows(&self) -> Vec<Duration> {
        self.board.lock().unwrap().windows.clone()
    }

    pub fn opens(&self) -> usize {
        self.board.lock().unwrap().opens
    }

    pub fn closes(&self) -> usize {
        self.board.lock().unwrap().closes
    }
}

impl Transport for FakeTransport {
    fn open(&self, port_name: &str) -> Result<Box<dyn Link>, ProtocolError> {
        stall(&self.board);
        let mut board = self.board.lock().unwrap();
        if board.refuse_open {
            return Err(ProtocolError::PortNotFound(port_name.to_string()));
        }
        board.opens += 1;
        Ok(Box::new(FakeLink {
            board: Arc::clone(&self.board),
        }))
    }
}

/// Sleep for the configured delay without holding the board lock
fn stall(board: &Mutex<Board>) {
    let delay = board.lock().unwrap().io_delay;
    if !delay.is_zero() {
        std::thread::sleep(delay);
    }
}

struct FakeLink {
    board: Arc<Mutex<Board>>,
}

impl Link for FakeLink {
    fn write_all(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        let mut board = self.board.lock().unwrap();
        if board.fail_write_at == Some(board.written.len()) {
            return Err(ProtocolError::ConnectionLost("device unplugged".into()));
        }
        let line = String::from_utf8_lossy(data).trim_end_matches(['\r', '\n']).to_string();
        board.written.push(line.clone());
        board.last_command = Some(line);
        Ok(())
    }

    fn read(&mut self, window: Duration) -> Result<Vec<u8>, ProtocolError> {
        stall(&self.board);
        let mut board = self.board.lock().unwrap();
        if board.fail_read_at == Some(board.windows.len()) {
            return Err(ProtocolError::ConnectionLost("read failed".into()));
        }
        board.windows.push(window);
        let Some(command) = board.last_command.take() else {
            return Ok(Vec::new());
        };
        let reply = board
            .replies
            .get_mut(&command)
            .and_then(VecDeque::pop_front)
            .unwrap_or_default();
        Ok(reply.into_bytes())
    }

    fn close(&mut self) -> Result<(), ProtocolError> {
        self.board.lock().unwrap().closes += 1;
        Ok(())
    }
}
