//! Packet parser: payload decoding, packet-loss detection, handle table updates.

use crate::config::{Configuration, Endian, HandleTable, NodeConfig, Sensor, HANDLE_DEFINITION_PACKET_TYPE};
use crate::error::ParseError;
use crate::framer::RawFrame;
use crate::window::WindowBatcher;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

const SENSOR_FRAME_BODY_LEN: usize = 244;
const TIMESTAMP_OFFSET: usize = 240;

/// Per-node parser state: live handle table plus per-sensor timestamp history used for
/// packet-loss detection.
struct NodeState {
    handle_table: HandleTable,
    sleep: bool,
    previous_timestamp: HashMap<Sensor, f64>,
    periods: HashMap<Sensor, f64>,
    buffers: HashMap<Sensor, Vec<Vec<f64>>>,
}

impl NodeState {
    fn new(node_config: &NodeConfig) -> Self {
        let mut previous_timestamp = HashMap::new();
        let mut buffers = HashMap::new();
        for sensor in Sensor::ALL {
            previous_timestamp.insert(sensor, -1.0);
            let rows = node_config.number_of_sensors[&sensor];
            let cols = node_config.samples_per_packet[&sensor];
            buffers.insert(sensor, vec![vec![0.0; cols]; rows]);
        }
        Self {
            handle_table: HandleTable::from_initial(node_config),
            sleep: false,
            previous_timestamp,
            periods: node_config.periods(),
            buffers,
        }
    }
}

pub struct Parser {
    configuration: Configuration,
    nodes: HashMap<String, NodeState>,
}

impl Parser {
    pub fn new(configuration: Configuration) -> Self {
        let nodes = configuration
            .nodes
            .iter()
            .map(|(node_id, node_config)| (node_id.clone(), NodeState::new(node_config)))
            .collect();
        Self { configuration, nodes }
    }

    /// Dequeue loop with a fixed timeout. If `stop_when_no_more_data_after` is set and
    /// a dequeue times out, the parser exits instead of continuing to wait.
    pub fn run(
        &mut self,
        rx: &Receiver<RawFrame>,
        dequeue_timeout: Duration,
        stop_when_no_more_data_after: Option<Duration>,
        batcher: &mut WindowBatcher,
        stop_flag: &Arc<AtomicBool>,
    ) -> Result<()> {
        let result = self.run_inner(rx, dequeue_timeout, stop_when_no_more_data_after, batcher, stop_flag);
        stop_flag.store(true, Ordering::SeqCst);
        result
    }

    fn run_inner(
        &mut self,
        rx: &Receiver<RawFrame>,
        dequeue_timeout: Duration,
        stop_when_no_more_data_after: Option<Duration>,
        batcher: &mut WindowBatcher,
        stop_flag: &Arc<AtomicBool>,
    ) -> Result<()> {
        let timeout = stop_when_no_more_data_after.unwrap_or(dequeue_timeout);

        loop {
            if stop_flag.load(Ordering::SeqCst) {
                return Ok(());
            }

            let frame = match rx.recv_timeout(timeout) {
                Ok(frame) => frame,
                Err(RecvTimeoutError::Timeout) => {
                    if stop_when_no_more_data_after.is_some() {
                        return Ok(());
                    }
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => return Ok(()),
            };

            if let Err(err) = self.handle_frame(frame, batcher) {
                tracing::warn!(error = %err, "dropping record after parse failure");
            }
        }
    }

    fn handle_frame(&mut self, frame: RawFrame, batcher: &mut WindowBatcher) -> Result<()> {
        if frame.packet_type_code == HANDLE_DEFINITION_PACKET_TYPE {
            self.update_handles(&frame.origin_id, &frame.body);
            return Ok(());
        }

        let Some(node_config) = self.configuration.nodes.get(&frame.origin_id) else {
            tracing::debug!(node_id = %frame.origin_id, "frame from a non-sensor origin; ignored");
            return Ok(());
        };
        let node_config = node_config.clone();
        let endian = self.configuration.gateway.endian;

        let Some(node_state) = self.nodes.get_mut(&frame.origin_id) else {
            return Ok(());
        };

        let Some(label) = node_state.handle_table.get(&frame.packet_type_code.to_string()) else {
            tracing::error!(
                node_id = %frame.origin_id,
                packet_type_code = frame.packet_type_code,
                "received packet with unknown handle"
            );
            return Ok(());
        };
        let label = label.to_string();

        if frame.body.len() == SENSOR_FRAME_BODY_LEN {
            let timestamp = read_timestamp(&frame.body);
            let sensors = decode_sensor_frame(&frame.origin_id, &label, &frame.body, &node_config, endian, node_state)?;

            for sensor in sensors {
                check_for_packet_loss(node_state, &node_config, sensor, timestamp);
                emit_samples(&frame.origin_id, sensor, timestamp, node_state, batcher)?;
            }
            return Ok(());
        }

        if matches!(label.as_str(), "Mic 1" | "Cmd Decline" | "Sleep State" | "Info message") {
            parse_info_packet(&frame.origin_id, &label, &frame.body, &node_config, node_state, endian);
        }
        Ok(())
    }

    /// Replace a node's handle table wholesale on a matching-span control frame.
    fn update_handles(&mut self, node_id: &str, body: &[u8]) {
        if body.len() < 3 {
            tracing::error!(node_id, "handle update frame too short to contain start/end");
            return;
        }
        let start = body[0] as u16;
        let end = body[2] as u16;

        let Some(node_state) = self.nodes.get_mut(node_id) else {
            return;
        };

        if node_state.handle_table.try_update(start, end) {
            tracing::info!(node_id, start, end, "successfully updated handles");
        } else {
            tracing::error!(node_id, start, end, "handle error: unexpected table span");
        }
    }
}

fn read_timestamp(body: &[u8]) -> f64 {
    let bytes = &body[TIMESTAMP_OFFSET..TIMESTAMP_OFFSET + 4];
    let raw = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    raw as f64 / 65536.0
}

fn read_unsigned(bytes: &[u8], endian: Endian) -> u64 {
    match endian {
        Endian::Little => bytes.iter().rev().fold(0u64, |acc, &b| (acc << 8) | b as u64),
        Endian::Big => bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64),
    }
}

fn read_signed(bytes: &[u8], endian: Endian) -> i64 {
    let bits = bytes.len() * 8;
    let raw = read_unsigned(bytes, endian);
    if bits < 64 && (raw & (1 << (bits - 1))) != 0 {
        raw as i64 - (1i64 << bits)
    } else {
        raw as i64
    }
}

fn read_f32(bytes: &[u8], endian: Endian) -> f32 {
    let arr = [bytes[0], bytes[1], bytes[2], bytes[3]];
    match endian {
        Endian::Little => f32::from_le_bytes(arr),
        Endian::Big => f32::from_be_bytes(arr),
    }
}

/// Slices `[start, end)` out of `body`, turning an out-of-range request (a configured
/// `number_of_sensors`/`samples_per_packet` combination that doesn't actually fit a 244-byte
/// frame) into a dropped-record error instead of an index-out-of-bounds panic.
fn body_slice<'a>(
    body: &'a [u8],
    start: usize,
    end: usize,
    node_id: &str,
    label: &str,
) -> Result<&'a [u8], ParseError> {
    body.get(start..end).ok_or_else(|| ParseError::MalformedFrame {
        node_id: node_id.to_string(),
        packet_type: label.to_string(),
        reason: format!(
            "configured layout requires body bytes [{start}, {end}) but the frame body is {} bytes",
            body.len()
        ),
    })
}

/// Same guard for the per-sensor staging buffer: its shape comes from `number_of_sensors`/
/// `samples_per_packet` too, and a mismatch between sensors sharing one frame (e.g. `Baros_P`
/// and `Baros_T` configured with different `number_of_sensors`) must not panic either.
fn buffer_cell<'a>(
    buffer: &'a mut [Vec<f64>],
    row: usize,
    col: usize,
    node_id: &str,
    label: &str,
) -> Result<&'a mut f64, ParseError> {
    buffer
        .get_mut(row)
        .and_then(|r| r.get_mut(col))
        .ok_or_else(|| ParseError::MalformedFrame {
            node_id: node_id.to_string(),
            packet_type: label.to_string(),
            reason: format!("configured buffer shape has no row {row} col {col}"),
        })
}

/// Decodes a 244-byte sensor frame's payload into the node's persistent per-sensor buffers and
/// returns which sensors were produced.
///
/// Packet-loss detection only ever runs on 244-byte frames; shorter frames never carry a
/// first-sample timestamp to check against. This is a known limitation inherited from the wire
/// protocol itself, not an omission in this decoder.
fn decode_sensor_frame(
    node_id: &str,
    label: &str,
    body: &[u8],
    node_config: &NodeConfig,
    endian: Endian,
    node_state: &mut NodeState,
) -> Result<Vec<Sensor>, ParseError> {
    match label {
        "Abs. baros" => {
            let bytes_per_sample = 6;
            let n = node_config.number_of_sensors[&Sensor::BarosP];
            let baros_p = node_state.buffers.get_mut(&Sensor::BarosP).unwrap();
            for j in 0..n {
                let offset = bytes_per_sample * j;
                let bytes = body_slice(body, offset, offset + 4, node_id, label)?;
                *buffer_cell(baros_p, j, 0, node_id, label)? = read_unsigned(bytes, endian) as f64;
            }
            let baros_t = node_state.buffers.get_mut(&Sensor::BarosT).unwrap();
            for j in 0..n {
                let offset = bytes_per_sample * j + 4;
                let bytes = body_slice(body, offset, offset + 2, node_id, label)?;
                *buffer_cell(baros_t, j, 0, node_id, label)? = read_signed(bytes, endian) as f64;
            }
            Ok(vec![Sensor::BarosP, Sensor::BarosT])
        }

        "Diff. baros" => {
            let bytes_per_sample = 2;
            let n = node_config.number_of_sensors[&Sensor::DiffBaros];
            let s = node_config.samples_per_packet[&Sensor::DiffBaros];
            let buffer = node_state.buffers.get_mut(&Sensor::DiffBaros).unwrap();
            for i in 0..s {
                for j in 0..n {
                    let idx = n * i + j;
                    let offset = bytes_per_sample * idx;
                    let bytes = body_slice(body, offset, offset + 2, node_id, label)?;
                    *buffer_cell(buffer, j, i, node_id, label)? = read_unsigned(bytes, endian) as f64;
                }
            }
            Ok(vec![Sensor::DiffBaros])
        }

        "Mic 0" => {
            let bytes_per_sample = 3;
            let s = node_config.samples_per_packet[&Sensor::Mics] / 2;
            let n = node_config.number_of_sensors[&Sensor::Mics] / 2;
            let buffer = node_state.buffers.get_mut(&Sensor::Mics).unwrap();
            for i in 0..s {
                for j in 0..n {
                    let idx = j + 20 * i;
                    // Unlike every other sensor, microphone samples are big-endian even when
                    // the gateway is configured little-endian.
                    let read_at = |index: usize| -> Result<f64, ParseError> {
                        let offset = bytes_per_sample * index;
                        let bytes = body_slice(body, offset, offset + 3, node_id, label)?;
                        Ok(read_signed(bytes, Endian::Big) as f64)
                    };
                    let v00 = read_at(idx)?;
                    let v01 = read_at(idx + 5)?;
                    let v10 = read_at(idx + 10)?;
                    let v11 = read_at(idx + 15)?;
                    *buffer_cell(buffer, j, 2 * i, node_id, label)? = v00;
                    *buffer_cell(buffer, j, 2 * i + 1, node_id, label)? = v01;
                    *buffer_cell(buffer, j + 5, 2 * i, node_id, label)? = v10;
                    *buffer_cell(buffer, j + 5, 2 * i + 1, node_id, label)? = v11;
                }
            }
            Ok(vec![Sensor::Mics])
        }

        "IMU Accel" | "IMU Gyro" | "IMU Magnetometer" => {
            let sensor = match label {
                "IMU Accel" => Sensor::Acc,
                "IMU Gyro" => Sensor::Gyro,
                _ => Sensor::Mag,
            };
            let s = node_config.samples_per_packet[&sensor];
            let buffer = node_state.buffers.get_mut(&sensor).unwrap();
            for i in 0..s {
                let index = 6 * i;
                let x = body_slice(body, index, index + 2, node_id, label)?;
                let y = body_slice(body, index + 2, index + 4, node_id, label)?;
                let z = body_slice(body, index + 4, index + 6, node_id, label)?;
                *buffer_cell(buffer, 0, i, node_id, label)? = read_signed(x, endian) as f64;
                *buffer_cell(buffer, 1, i, node_id, label)? = read_signed(y, endian) as f64;
                *buffer_cell(buffer, 2, i, node_id, label)? = read_signed(z, endian) as f64;
            }
            Ok(vec![sensor])
        }

        // The handle table's two analog channels are two halves of the same two-sensor
        // "Analog Vbat" buffer (channel 0 from "Analog1", channel 1 from "Analog2"); each
        // packet refreshes only its own row since the two ADC channels report independently.
        "Analog1" | "Analog2" => {
            let channel = if label == "Analog1" { 0 } else { 1 };
            let bytes_per_sample = 4;
            let s = node_config.samples_per_packet[&Sensor::AnalogVbat];
            let buffer = node_state.buffers.get_mut(&Sensor::AnalogVbat).unwrap();
            for i in 0..s {
                let offset = bytes_per_sample * i;
                let bytes = body_slice(body, offset, offset + 4, node_id, label)?;
                *buffer_cell(buffer, channel, i, node_id, label)? = read_unsigned(bytes, endian) as f64 / 1e6;
            }
            Ok(vec![Sensor::AnalogVbat])
        }

        "Constat" => {
            let bytes_per_sample = 10;
            let s = node_config.samples_per_packet[&Sensor::Constat];
            let buffer = node_state.buffers.get_mut(&Sensor::Constat).unwrap();
            for i in 0..s {
                let offset = bytes_per_sample * i;
                let b0 = body_slice(body, offset, offset + 4, node_id, label)?;
                let b1 = body_slice(body, offset + 4, offset + 5, node_id, label)?;
                let b2 = body_slice(body, offset + 5, offset + 6, node_id, label)?;
                let b3 = body_slice(body, offset + 6, offset + 10, node_id, label)?;
                *buffer_cell(buffer, 0, i, node_id, label)? = read_f32(b0, endian) as f64;
                *buffer_cell(buffer, 1, i, node_id, label)? = read_signed(b1, endian) as f64;
                *buffer_cell(buffer, 2, i, node_id, label)? = read_signed(b2, endian) as f64;
                *buffer_cell(buffer, 3, i, node_id, label)? = read_unsigned(b3, endian) as f64;
            }
            Ok(vec![Sensor::Constat])
        }

        other => Err(ParseError::UnknownPacketType(
            other.to_string(),
            "sensor frame".to_string(),
        )),
    }
}

fn parse_info_packet(
    node_id: &str,
    label: &str,
    body: &[u8],
    node_config: &NodeConfig,
    node_state: &mut NodeState,
    endian: Endian,
) {
    match label {
        "Mic 1" => match body.first() {
            Some(1) => tracing::info!(node_id, "microphone data reading done"),
            Some(2) => tracing::info!(node_id, "microphone data erasing done"),
            Some(3) => tracing::info!(node_id, "microphones started"),
            _ => {}
        },

        "Cmd Decline" => {
            let reason_index = read_unsigned(body, endian).to_string();
            if let Some(reason) = node_config.decline_reason.get(&reason_index) {
                tracing::info!(node_id, reason_index = %reason_index, reason, "command declined");
            } else {
                tracing::warn!(node_id, reason_index = %reason_index, "command declined with unknown reason index");
            }
        }

        "Sleep State" => {
            let state_index = read_unsigned(body, endian).to_string();
            if let Some(description) = node_config.sleep_state.get(&state_index) {
                tracing::info!(node_id, state_index = %state_index, description);
            }

            if state_index == "1" {
                node_state.sleep = true;
            } else {
                node_state.sleep = false;
                for value in node_state.previous_timestamp.values_mut() {
                    *value = -1.0;
                }
            }
        }

        "Info message" => {
            let Some(&info_byte) = body.first() else { return };
            let info_index = info_byte.to_string();
            let Some(info_type) = node_config.info_type.get(&info_index) else {
                tracing::warn!(node_id, info_index = %info_index, "unknown info message subtype");
                return;
            };
            tracing::info!(node_id, info_index = %info_index, info_type);

            if info_type == "Battery info" && body.len() >= 13 {
                let voltage = read_unsigned(&body[1..5], endian) as f64 / 1_000_000.0;
                let cycle = read_unsigned(&body[5..9], endian) as f64 / 100.0;
                let state_of_charge = read_unsigned(&body[9..13], endian) as f64 / 256.0;
                tracing::info!(node_id, voltage, cycle, state_of_charge, "battery info");
            }
        }

        _ => {}
    }
}

/// Packet-loss detection, run once per (node, sensor) per sensor frame.
fn check_for_packet_loss(node_state: &mut NodeState, node_config: &NodeConfig, sensor: Sensor, timestamp: f64) {
    let previous = node_state.previous_timestamp[&sensor];

    if previous == -1.0 {
        tracing::info!(sensor = %sensor, "received first packet for sensor");
    } else {
        let samples_per_packet = node_config.samples_per_packet[&sensor] as f64;
        let period = node_state.periods[&sensor];
        let expected = previous + samples_per_packet * period;
        let deviation = timestamp - expected;

        if deviation.abs() > node_config.max_timestamp_slack {
            if node_state.sleep {
                // Only Constat arrives while a node is asleep; every other deviation here is
                // a stale wakeup artifact, not loss.
            } else if matches!(sensor, Sensor::Acc | Sensor::Gyro | Sensor::Mag) {
                let new_period = (timestamp - previous) / samples_per_packet;
                node_state.periods.insert(sensor, new_period);
                tracing::debug!(sensor = %sensor, period_ms = new_period * 1000.0, "re-estimated IMU period");
            } else {
                tracing::warn!(
                    sensor = %sensor,
                    deviation_ms = deviation * 1000.0,
                    "possible packet loss"
                );
            }
        }
    }

    node_state.previous_timestamp.insert(sensor, timestamp);
}

fn emit_samples(
    node_id: &str,
    sensor: Sensor,
    timestamp: f64,
    node_state: &NodeState,
    batcher: &mut WindowBatcher,
) -> Result<()> {
    let period = node_state.periods[&sensor];
    let buffer = &node_state.buffers[&sensor];
    let samples_per_packet = buffer.first().map(|row| row.len()).unwrap_or(0);

    for i in 0..samples_per_packet {
        let mut sample = Vec::with_capacity(buffer.len() + 1);
        sample.push(timestamp + i as f64 * period);
        for row in buffer {
            sample.push(row[i]);
        }
        batcher.add(node_id, sensor.as_str(), sample)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NodeConfig, BASE_STATION_ID};
    use crate::window::{Window, WindowSink};
    use std::sync::{Arc, Mutex};
    use std::time::Duration as StdDuration;

    #[derive(Clone, Default)]
    struct RecordingSink(Arc<Mutex<Vec<Window>>>);

    impl WindowSink for RecordingSink {
        fn handle_window(&mut self, window: Window) -> Result<()> {
            self.0.lock().unwrap().push(window);
            Ok(())
        }
    }

    fn make_batcher() -> (WindowBatcher, RecordingSink) {
        let sink = RecordingSink::default();
        let mut skeleton = HashMap::new();
        skeleton.insert("0".to_string(), Sensor::ALL.iter().map(|s| s.as_str().to_string()).collect());
        let batcher = WindowBatcher::new(skeleton, StdDuration::from_secs(3600), 0.0, vec![Box::new(sink.clone())]);
        (batcher, sink)
    }

    #[test]
    fn unknown_handle_is_logged_and_discarded_without_error() {
        let mut configuration = Configuration::default();
        configuration.nodes.insert("0".to_string(), NodeConfig::default());
        let mut parser = Parser::new(configuration);
        let (mut batcher, sink) = make_batcher();

        let frame = RawFrame {
            origin_id: "0".to_string(),
            packet_type_code: 253,
            body: vec![1, 2, 3],
            receive_time: 0.0,
        };
        parser.handle_frame(frame, &mut batcher).unwrap();
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[test]
    fn base_station_origin_frames_are_ignored() {
        let mut parser = Parser::new(Configuration::default());
        let (mut batcher, _sink) = make_batcher();
        let frame = RawFrame {
            origin_id: BASE_STATION_ID.to_string(),
            packet_type_code: 1,
            body: vec![0],
            receive_time: 0.0,
        };
        parser.handle_frame(frame, &mut batcher).unwrap();
    }

    #[test]
    fn sleep_state_enter_then_exit_resets_previous_timestamps() {
        let mut configuration = Configuration::default();
        configuration.nodes.insert("0".to_string(), NodeConfig::default());
        let mut parser = Parser::new(configuration.clone());
        let node_config = configuration.nodes["0"].clone();
        let node_state = parser.nodes.get_mut("0").unwrap();
        node_state.previous_timestamp.insert(Sensor::BarosP, 42.0);

        parse_info_packet("0", "Sleep State", &[1], &node_config, node_state, Endian::Little);
        assert!(node_state.sleep);
        assert_eq!(node_state.previous_timestamp[&Sensor::BarosP], 42.0);

        parse_info_packet("0", "Sleep State", &[0], &node_config, node_state, Endian::Little);
        assert!(!node_state.sleep);
        assert_eq!(node_state.previous_timestamp[&Sensor::BarosP], -1.0);
    }

    #[test]
    fn imu_period_is_re_estimated_on_large_deviation() {
        let node_config = NodeConfig::default();
        let mut node_state = NodeState::new(&node_config);
        node_state.previous_timestamp.insert(Sensor::Acc, 0.0);

        let samples_per_packet = node_config.samples_per_packet[&Sensor::Acc] as f64;
        let drifted_timestamp = samples_per_packet * node_state.periods[&Sensor::Acc] * 2.0;

        check_for_packet_loss(&mut node_state, &node_config, Sensor::Acc, drifted_timestamp);

        let expected_period = drifted_timestamp / samples_per_packet;
        assert!((node_state.periods[&Sensor::Acc] - expected_period).abs() < 1e-9);
    }

    #[test]
    fn mic_0_decodes_big_endian_regardless_of_gateway_endian() {
        let mut node_config = NodeConfig::default();
        node_config.mics_freq = 15625.0;
        let mut node_state = NodeState::new(&node_config);

        let mut body = vec![0u8; SENSOR_FRAME_BODY_LEN];
        // idx = 0 + 20*0 = 0, so sensor 0's first pair comes from byte triplets 0 and 5.
        body[0..3].copy_from_slice(&[0x00, 0x01, 0x00]); // value 256, positive
        body[15..18].copy_from_slice(&[0xFF, 0xFF, 0xFF]); // -1 as a 3-byte two's complement value

        decode_sensor_frame("0", "Mic 0", &body, &node_config, Endian::Little, &mut node_state).unwrap();

        let buffer = &node_state.buffers[&Sensor::Mics];
        assert_eq!(buffer[0][0], 256.0);
        assert_eq!(buffer[0][1], -1.0);
    }

    #[test]
    fn unsupported_analog_kinetron_label_is_an_unknown_packet_type_error() {
        let node_config = NodeConfig::default();
        let mut node_state = NodeState::new(&node_config);
        let body = vec![0u8; SENSOR_FRAME_BODY_LEN];
        let err = decode_sensor_frame("0", "Analog Kinetron", &body, &node_config, Endian::Little, &mut node_state)
            .unwrap_err();
        assert!(matches!(err, ParseError::UnknownPacketType(_, _)));
    }

    #[test]
    fn oversized_configured_layout_is_a_malformed_frame_error_not_a_panic() {
        let mut node_config = NodeConfig::default();
        // A number_of_sensors this large makes "Abs. baros" (6 bytes/sample) need far more than
        // the fixed 244-byte body; this must be caught and reported, not panic the parser thread.
        node_config.number_of_sensors.insert(Sensor::BarosP, 100);
        let mut node_state = NodeState::new(&node_config);
        let body = vec![0u8; SENSOR_FRAME_BODY_LEN];

        let err = decode_sensor_frame("0", "Abs. baros", &body, &node_config, Endian::Little, &mut node_state)
            .unwrap_err();
        assert!(matches!(err, ParseError::MalformedFrame { .. }));
    }

    #[test]
    fn mismatched_baros_p_and_baros_t_counts_are_a_malformed_frame_error_not_a_panic() {
        let mut node_config = NodeConfig::default();
        node_config.number_of_sensors.insert(Sensor::BarosP, 5);
        node_config.number_of_sensors.insert(Sensor::BarosT, 2);
        let mut node_state = NodeState::new(&node_config);
        let body = vec![0u8; SENSOR_FRAME_BODY_LEN];

        let err = decode_sensor_frame("0", "Abs. baros", &body, &node_config, Endian::Little, &mut node_state)
            .unwrap_err();
        assert!(matches!(err, ParseError::MalformedFrame { .. }));
    }
}
