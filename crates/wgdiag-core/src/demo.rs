//! Demo Mode - Simulated diagnostic adapter
//!
//! Behaves like an ELM327-class adapter connected to a common-rail diesel
//! ECU: echoes requests, answers `AT` commands, accepts the KWP init and
//! security sequence, and serves `21 xx` data frames with a little noise on
//! live values. Used for running without hardware and by the test suite,
//! which also uses its fault-injection controls.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashSet, VecDeque};
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::protocol::{Channel, Connector, ProtocolError};

/// Canned `21 xx` responses captured from an idling engine
const FRAME_2112: &str = "61 12 0B 3E 0A DB 08 B7 08 B7 00 00 02 FD 0B A1 02 4A 03 AE 0B BB 01 32 01 2B 00 6F 09 7F 03 A0 00 00";
const FRAME_2120: &str = "61 20 03 5A 03 3C 03 FE 00 01 00 94 00 4A 01 B3 01 6E 01 0C 03 02 02 66 00 84 00 5C 03 A0 03 03";
const FRAME_2122: &str = "61 22 0B 43 0A DD 08 B7 08 B7 00 00 00 00 02 43 03 AD 0B CD 03 B8 02 67 02 E4 02 E4 02 85 08 B7 00 0C";
const FRAME_2126: &str = "61 26 00 00 00 00 00 00 5B 37 7F FF 00 00 2F A0 00 29 00 29 00 29 00 29 00 48 00 23 00 00 0B 41";
const FRAME_2128: &str = "61 28 02 EE 03 2C 02 EE 02 EE 02 EC 02 EE 02 EE 00 00 00 CC FF 3C 00 68 FF FB FF 94 00 00 F6";

/// Live 16-bit words that get noise: (frame id, token index, max deviation)
const NOISY_WORDS: &[(u8, usize, i32)] = &[
    (0x12, 18, 3),  // map actual
    (0x12, 20, 15), // rail actual
    (0x20, 14, 10), // maf actual
    (0x28, 2, 12),  // rpm
    (0x28, 4, 20),  // iq
];

/// Nominal battery voltage
const BATTERY_VOLTAGE: f64 = 12.6;

struct Pending {
    ready_at: Instant,
    bytes: VecDeque<u8>,
}

struct DemoState {
    rng: StdRng,
    jitter: bool,
    echo: bool,
    input: Vec<u8>,
    output: VecDeque<Pending>,
    silent: HashSet<String>,
    partial: HashSet<String>,
    interrupted: HashSet<String>,
    reply_delay: Duration,
    fail_io: bool,
    refuse_connections: bool,
    requests: Vec<String>,
    overlaps: usize,
    connections: usize,
}

/// Simulated adapter.
///
/// Clones share the same state, so a test can keep a handle for control and
/// inspection while the worker owns the channel.
#[derive(Clone)]
pub struct DemoAdapter {
    state: Arc<Mutex<DemoState>>,
}

impl Default for DemoAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl DemoAdapter {
    /// Adapter with random noise on live values
    pub fn new() -> Self {
        Self::build(StdRng::from_entropy(), true)
    }

    /// Adapter with reproducible noise
    pub fn with_seed(seed: u64) -> Self {
        Self::build(StdRng::seed_from_u64(seed), true)
    }

    /// Adapter serving the canned frames unchanged
    pub fn deterministic() -> Self {
        Self::build(StdRng::seed_from_u64(0), false)
    }

    fn build(rng: StdRng, jitter: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(DemoState {
                rng,
                jitter,
                echo: true,
                input: Vec::new(),
                output: VecDeque::new(),
                silent: HashSet::new(),
                partial: HashSet::new(),
                interrupted: HashSet::new(),
                reply_delay: Duration::ZERO,
                fail_io: false,
                refuse_connections: false,
                requests: Vec::new(),
                overlaps: 0,
                connections: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DemoState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Never answer `request`, not even with an echo
    pub fn set_silent(&self, request: &str) {
        self.lock().silent.insert(request.to_string());
    }

    /// Answer `request` without the closing prompt
    pub fn set_partial(&self, request: &str) {
        self.lock().partial.insert(request.to_string());
    }

    /// Put a `STOPPED` notice in front of the reply to `request`
    pub fn set_interrupted(&self, request: &str) {
        self.lock().interrupted.insert(request.to_string());
    }

    /// Delay every reply
    pub fn set_reply_delay(&self, delay: Duration) {
        self.lock().reply_delay = delay;
    }

    /// Make reads and writes fail until the next connection
    pub fn set_fail_io(&self, fail: bool) {
        self.lock().fail_io = fail;
    }

    /// Make [`DemoConnector`] refuse to connect
    pub fn set_refuse_connections(&self, refuse: bool) {
        self.lock().refuse_connections = refuse;
    }

    /// Every request received, in order
    pub fn requests(&self) -> Vec<String> {
        self.lock().requests.clone()
    }

    /// Number of requests received
    pub fn request_count(&self) -> usize {
        self.lock().requests.len()
    }

    /// Requests that arrived while an earlier reply was still unread
    pub fn overlaps(&self) -> usize {
        self.lock().overlaps
    }

    /// Number of successful connections
    pub fn connections(&self) -> usize {
        self.lock().connections
    }

    fn connect(&self) -> Result<(), ProtocolError> {
        let mut state = self.lock();
        if state.refuse_connections {
            return Err(ProtocolError::ConnectionFailed(
                "demo adapter refused the connection".to_string(),
            ));
        }
        state.connections += 1;
        state.fail_io = false;
        state.echo = true;
        state.input.clear();
        state.output.clear();
        Ok(())
    }
}

fn broken_link() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "demo adapter link failure")
}

impl DemoState {
    fn receive_line(&mut self, line: &str) {
        self.requests.push(line.to_string());
        if !self.output.is_empty() {
            self.overlaps += 1;
        }
        if self.silent.contains(line) {
            return;
        }

        let mut reply = String::new();
        if self.echo {
            reply.push_str(line);
            reply.push('\r');
        }
        if self.interrupted.contains(line) {
            reply.push_str("STOPPED\r");
        }
        reply.push_str(&self.answer(line));
        if !self.partial.contains(line) {
            reply.push_str("\r\r>");
        }

        self.output.push_back(Pending {
            ready_at: Instant::now() + self.reply_delay,
            bytes: reply.into_bytes().into(),
        });
    }

    fn answer(&mut self, line: &str) -> String {
        let request = line.to_ascii_uppercase();
        match request.as_str() {
            "ATZ" | "ATI" => "ELM327 v1.5".to_string(),
            "ATE0" => {
                self.echo = false;
                "OK".to_string()
            }
            "ATE1" => {
                self.echo = true;
                "OK".to_string()
            }
            "ATRV" => {
                let noise = if self.jitter {
                    self.rng.gen_range(-0.2..0.2)
                } else {
                    0.0
                };
                format!("{:.1}V", BATTERY_VOLTAGE + noise)
            }
            "ATFI" => "BUS INIT: OK".to_string(),
            r if r.starts_with("AT") => "OK".to_string(),
            "81" => "C1 EF 8F".to_string(),
            "27 01" => "67 01 3A 5C".to_string(),
            "27 02 CD 46" => "7F 27 35".to_string(),
            "31 25 00" => "71 25".to_string(),
            "21 12" => self.frame(0x12, FRAME_2112),
            "21 20" => self.frame(0x20, FRAME_2120),
            "21 22" => self.frame(0x22, FRAME_2122),
            "21 26" => self.frame(0x26, FRAME_2126),
            "21 28" => self.frame(0x28, FRAME_2128),
            _ => "?".to_string(),
        }
    }

    fn frame(&mut self, id: u8, canned: &str) -> String {
        if !self.jitter {
            return canned.to_string();
        }

        let mut tokens: Vec<String> = canned.split(' ').map(String::from).collect();
        for &(frame, idx, spread) in NOISY_WORDS {
            if frame != id || idx + 1 >= tokens.len() {
                continue;
            }
            let word = format!("{}{}", tokens[idx], tokens[idx + 1]);
            let Ok(raw) = i32::from_str_radix(&word, 16) else {
                continue;
            };
            let noisy = (raw + self.rng.gen_range(-spread..=spread)).clamp(0, 0x7FFF);
            tokens[idx] = format!("{:02X}", noisy >> 8);
            tokens[idx + 1] = format!("{:02X}", noisy & 0xFF);
        }
        tokens.join(" ")
    }

    fn ready_len(&self, now: Instant) -> usize {
        self.output
            .iter()
            .take_while(|p| p.ready_at <= now)
            .map(|p| p.bytes.len())
            .sum()
    }
}

impl Read for DemoAdapter {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.lock();
        if state.fail_io {
            return Err(broken_link());
        }

        let now = Instant::now();
        let mut n = 0;
        while n < buf.len() {
            let Some(front) = state.output.front_mut() else {
                break;
            };
            if front.ready_at > now {
                break;
            }
            while n < buf.len() {
                match front.bytes.pop_front() {
                    Some(b) => {
                        buf[n] = b;
                        n += 1;
                    }
                    None => break,
                }
            }
            if front.bytes.is_empty() {
                state.output.pop_front();
            }
        }
        Ok(n)
    }
}

impl Write for DemoAdapter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.lock();
        if state.fail_io {
            return Err(broken_link());
        }

        state.input.extend_from_slice(buf);
        while let Some(pos) = state.input.iter().position(|&b| b == b'\r' || b == b'\n') {
            let line: Vec<u8> = state.input.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line).trim().to_string();
            if !line.is_empty() {
                state.receive_line(&line);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Channel for DemoAdapter {
    fn bytes_to_read(&mut self) -> io::Result<u32> {
        let state = self.lock();
        if state.fail_io {
            return Err(broken_link());
        }
        Ok(state.ready_len(Instant::now()) as u32)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.lock().output.clear();
        Ok(())
    }

    fn try_clone(&self) -> io::Result<Box<dyn Channel>> {
        Ok(Box::new(self.clone()))
    }
}

/// Connector handing out a shared [`DemoAdapter`] whatever the address
#[derive(Clone)]
pub struct DemoConnector {
    adapter: DemoAdapter,
}

impl DemoConnector {
    /// Connect to `adapter`
    pub fn new(adapter: DemoAdapter) -> Self {
        Self { adapter }
    }

    /// The adapter connections go to
    pub fn adapter(&self) -> &DemoAdapter {
        &self.adapter
    }
}

impl Connector for DemoConnector {
    fn name(&self) -> &str {
        "demo"
    }

    fn connect(&self, _address: &str) -> Result<Box<dyn Channel>, ProtocolError> {
        self.adapter.connect()?;
        Ok(Box::new(self.adapter.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(adapter: &mut DemoAdapter, request: &str) -> String {
        adapter.write_all(format!("{}\n\r", request).as_bytes()).unwrap();
        let mut buf = vec![0u8; adapter.bytes_to_read().unwrap() as usize];
        let n = adapter.read(&mut buf).unwrap();
        String::from_utf8_lossy(&buf[..n]).to_string()
    }

    #[test]
    fn test_reset_reply_with_echo() {
        let mut adapter = DemoAdapter::deterministic();
        assert_eq!(exchange(&mut adapter, "ATZ"), "ATZ\rELM327 v1.5\r\r>");
        assert_eq!(adapter.requests(), vec!["ATZ"]);
    }

    #[test]
    fn test_echo_off() {
        let mut adapter = DemoAdapter::deterministic();
        assert_eq!(exchange(&mut adapter, "ATE0"), "ATE0\rOK\r\r>");
        assert_eq!(exchange(&mut adapter, "81"), "C1 EF 8F\r\r>");
    }

    #[test]
    fn test_deterministic_frames() {
        let mut adapter = DemoAdapter::deterministic();
        let reply = exchange(&mut adapter, "21 20");
        assert_eq!(reply, format!("21 20\r{}\r\r>", FRAME_2120));
    }

    #[test]
    fn test_jitter_keeps_frame_shape() {
        let mut adapter = DemoAdapter::with_seed(7);
        for _ in 0..20 {
            let reply = exchange(&mut adapter, "21 28");
            let frame = reply
                .strip_prefix("21 28\r")
                .and_then(|r| r.strip_suffix("\r\r>"))
                .unwrap();
            assert_eq!(frame.split(' ').count(), FRAME_2128.split(' ').count());
            assert!(frame.starts_with("61 28 "));
        }
    }

    #[test]
    fn test_battery_voltage() {
        let mut adapter = DemoAdapter::deterministic();
        assert_eq!(exchange(&mut adapter, "ATRV"), "ATRV\r12.6V\r\r>");
    }

    #[test]
    fn test_fault_controls() {
        let mut adapter = DemoAdapter::deterministic();
        adapter.set_silent("21 12");
        adapter.set_partial("21 22");
        adapter.set_interrupted("ATFI");

        assert_eq!(exchange(&mut adapter, "21 12"), "");
        assert_eq!(exchange(&mut adapter, "21 22"), format!("21 22\r{}", FRAME_2122));
        assert_eq!(exchange(&mut adapter, "ATFI"), "ATFI\rSTOPPED\rBUS INIT: OK\r\r>");
        assert_eq!(exchange(&mut adapter, "XYZ"), "XYZ\r?\r\r>");

        adapter.set_fail_io(true);
        assert!(adapter.bytes_to_read().is_err());
    }

    #[test]
    fn test_overlap_counter() {
        let mut adapter = DemoAdapter::deterministic();
        adapter.write_all(b"ATZ\n\r").unwrap();
        adapter.write_all(b"ATSP5\n\r").unwrap();
        assert_eq!(adapter.overlaps(), 1);
    }

    #[test]
    fn test_connector_refusal() {
        let adapter = DemoAdapter::deterministic();
        let connector = DemoConnector::new(adapter.clone());
        assert!(connector.connect("demo").is_ok());
        adapter.set_refuse_connections(true);
        assert!(connector.connect("demo").is_err());
        assert_eq!(adapter.connections(), 1);
    }
}
