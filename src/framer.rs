//! Serial byte-stream framer.
//!
//! Frame format on the wire: `<LEAD><TYPE><LEN><BODY of LEN bytes>`, with any amount of
//! non-frame noise possibly appearing between frames. Runs as a dedicated OS thread; only
//! writes the outgoing queue and reads the serial port, never touching parser state.

use crate::serial::SerialPort;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// A frame lifted off the wire, queued for the parser.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub origin_id: String,
    pub packet_type_code: u8,
    pub body: Vec<u8>,
    pub receive_time: f64,
}

fn now_unix_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Reads framed packets until `stop_flag` is observed between frames, or the serial port
/// closes unrecoverably. On return (including the error path), sets `stop_flag` so sibling
/// tasks (parser, routine) wind down too.
pub fn run(
    port: Arc<Mutex<dyn SerialPort>>,
    leading_bytes: HashMap<u8, String>,
    rx_buffer_capacity: u32,
    tx: SyncSender<RawFrame>,
    stop_flag: Arc<AtomicBool>,
) -> Result<()> {
    let result = run_inner(&port, &leading_bytes, rx_buffer_capacity, &tx, &stop_flag);
    stop_flag.store(true, Ordering::SeqCst);
    result
}

fn run_inner(
    port: &Arc<Mutex<dyn SerialPort>>,
    leading_bytes: &HashMap<u8, String>,
    rx_buffer_capacity: u32,
    tx: &SyncSender<RawFrame>,
    stop_flag: &Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if stop_flag.load(Ordering::SeqCst) {
            return Ok(());
        }

        let lead = match read_byte(port)? {
            Some(byte) => byte,
            None => {
                // A real port paces this loop via its read timeout; a non-blocking
                // double (e.g. the dummy port) would otherwise spin a core at 100%
                // while idle.
                std::thread::sleep(std::time::Duration::from_millis(1));
                continue;
            }
        };

        let Some(origin_id) = leading_bytes.get(&lead) else {
            // Unknown leading byte: noise on the link, resynchronize by discarding it.
            continue;
        };

        let packet_type_code = match read_byte(port)? {
            Some(byte) => byte,
            None => {
                // Partial frame interrupted (e.g. by stop-triggered port closure); drop it.
                continue;
            }
        };
        let len = match read_byte(port)? {
            Some(byte) => byte,
            None => continue,
        };

        let receive_time = now_unix_seconds();

        let body = {
            let mut guard = port.lock().unwrap();
            match guard.read_exact_bytes(len as usize) {
                Ok(body) => body,
                Err(err) => {
                    tracing::warn!(error = %err, "partial frame dropped while reading body");
                    continue;
                }
            }
        };

        let waiting = {
            let mut guard = port.lock().unwrap();
            guard.bytes_waiting().unwrap_or(0)
        };
        if waiting >= rx_buffer_capacity {
            tracing::warn!(
                waiting,
                rx_buffer_capacity,
                "serial rx buffer full; data loss is possible"
            );
        }

        let frame = RawFrame {
            origin_id: origin_id.clone(),
            packet_type_code,
            body,
            receive_time,
        };
        if tx.send(frame).is_err() {
            // Parser side hung up; nothing more to do.
            return Ok(());
        }
    }
}

fn read_byte(port: &Arc<Mutex<dyn SerialPort>>) -> Result<Option<u8>> {
    let mut guard = port.lock().unwrap();
    guard.read_byte().context("serial read failed in framer")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::DummySerialPort;
    use std::sync::mpsc::sync_channel;
    use std::thread;
    use std::time::Duration;

    fn leading_bytes() -> HashMap<u8, String> {
        [(0xAA, "base-station".to_string()), (0xF6, "0".to_string())]
            .into_iter()
            .collect()
    }

    #[test]
    fn extracts_a_well_formed_frame_and_enqueues_it() {
        let dummy = DummySerialPort::new();
        dummy.push_inbound(&[0xAA, 7, 3, 1, 2, 3]);
        let port: Arc<Mutex<dyn SerialPort>> = Arc::new(Mutex::new(dummy));
        let (tx, rx) = sync_channel(8);
        let stop_flag = Arc::new(AtomicBool::new(false));

        let handle = {
            let port = Arc::clone(&port);
            let stop_flag = Arc::clone(&stop_flag);
            thread::spawn(move || run(port, leading_bytes(), 4095, tx, stop_flag))
        };

        let frame = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(frame.origin_id, "base-station");
        assert_eq!(frame.packet_type_code, 7);
        assert_eq!(frame.body, vec![1, 2, 3]);

        stop_flag.store(true, Ordering::SeqCst);
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn discards_noise_before_a_known_leading_byte() {
        let dummy = DummySerialPort::new();
        dummy.push_inbound(&[0x00, 0x11, 0xF6, 9, 1, 42]);
        let port: Arc<Mutex<dyn SerialPort>> = Arc::new(Mutex::new(dummy));
        let (tx, rx) = sync_channel(8);
        let stop_flag = Arc::new(AtomicBool::new(false));

        let handle = {
            let port = Arc::clone(&port);
            let stop_flag = Arc::clone(&stop_flag);
            thread::spawn(move || run(port, leading_bytes(), 4095, tx, stop_flag))
        };

        let frame = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(frame.origin_id, "0");
        assert_eq!(frame.packet_type_code, 9);
        assert_eq!(frame.body, vec![42]);

        stop_flag.store(true, Ordering::SeqCst);
        handle.join().unwrap().unwrap();
    }
}
