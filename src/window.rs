//! Windowed batching of parsed samples.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// One decoded sample: `[timestamp_seconds, v0, v1, ..., v_{k-1}]`.
pub type Sample = Vec<f64>;

/// A fixed-duration window of samples, keyed by node id then sensor name.
///
/// `window_index` is deliberately not part of the wire/file format (spec.md §6): it names the
/// window (`window-<n>.json`, the object path) rather than being a field inside it, so it's
/// skipped on both serialization and deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Window {
    #[serde(skip)]
    pub window_index: u64,
    pub sensor_time_offset: f64,
    pub sensor_data: HashMap<String, HashMap<String, Vec<Sample>>>,
}

impl Window {
    fn empty(window_index: u64, sensor_time_offset: f64, skeleton: &HashMap<String, Vec<String>>) -> Self {
        let mut sensor_data = HashMap::with_capacity(skeleton.len());
        for (node_id, sensor_names) in skeleton {
            let mut per_sensor = HashMap::with_capacity(sensor_names.len());
            for sensor_name in sensor_names {
                per_sensor.insert(sensor_name.clone(), Vec::new());
            }
            sensor_data.insert(node_id.clone(), per_sensor);
        }
        Self {
            window_index,
            sensor_time_offset,
            sensor_data,
        }
    }
}

/// A consumer of finalized windows (e.g. a local writer or a remote uploader). Each sink gets
/// its own independently owned `Window` value, so one sink mutating or holding onto its copy
/// can never affect another.
pub trait WindowSink: Send {
    fn handle_window(&mut self, window: Window) -> Result<()>;
}

/// Accumulates samples into windows and fans finalized windows out to sinks.
pub struct WindowBatcher {
    skeleton: HashMap<String, Vec<String>>,
    window_size: Duration,
    window_index: u64,
    window_start_time: Instant,
    session_start_wall_clock: f64,
    current: Window,
    sinks: Vec<Box<dyn WindowSink>>,
}

impl WindowBatcher {
    /// `skeleton` maps each node id to the sensor names that node can produce, derived from
    /// configuration (`NodeConfig::sensor` set) at session start.
    pub fn new(
        skeleton: HashMap<String, Vec<String>>,
        window_size: Duration,
        session_start_wall_clock: f64,
        sinks: Vec<Box<dyn WindowSink>>,
    ) -> Self {
        let current = Window::empty(0, session_start_wall_clock, &skeleton);
        Self {
            skeleton,
            window_size,
            window_index: 0,
            window_start_time: Instant::now(),
            session_start_wall_clock,
            current,
            sinks,
        }
    }

    /// Append a sample to the current window for `(node_id, sensor_name)`, finalizing the window
    /// if the configured interval has elapsed.
    pub fn add(&mut self, node_id: &str, sensor_name: &str, sample: Sample) -> Result<()> {
        let per_node = self
            .current
            .sensor_data
            .entry(node_id.to_string())
            .or_default();
        per_node
            .entry(sensor_name.to_string())
            .or_default()
            .push(sample);

        if self.window_start_time.elapsed() >= self.window_size {
            self.finalize()?;
        }
        Ok(())
    }

    /// Hand the current window to every sink, then open a fresh one.
    pub fn finalize(&mut self) -> Result<()> {
        let next_index = self.window_index + 1;
        let finished = std::mem::replace(
            &mut self.current,
            Window::empty(next_index, self.session_start_wall_clock, &self.skeleton),
        );

        for sink in &mut self.sinks {
            sink.handle_window(finished.clone())?;
        }

        self.window_index = next_index;
        self.window_start_time = Instant::now();
        Ok(())
    }

    /// Finalize unconditionally, even a near-empty window, for use at shutdown.
    pub fn flush(&mut self) -> Result<()> {
        self.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingSink(Arc<Mutex<Vec<Window>>>);

    impl WindowSink for RecordingSink {
        fn handle_window(&mut self, window: Window) -> Result<()> {
            self.0.lock().unwrap().push(window);
            Ok(())
        }
    }

    fn skeleton() -> HashMap<String, Vec<String>> {
        [("0".to_string(), vec!["Baros_P".to_string()])]
            .into_iter()
            .collect()
    }

    #[test]
    fn finalize_hands_independent_copies_to_every_sink() {
        let sink_a = RecordingSink::default();
        let sink_b = RecordingSink::default();
        let mut batcher = WindowBatcher::new(
            skeleton(),
            Duration::from_secs(3600),
            0.0,
            vec![Box::new(sink_a.clone()), Box::new(sink_b.clone())],
        );

        batcher.add("0", "Baros_P", vec![1.0, 2.0]).unwrap();
        batcher.finalize().unwrap();

        let a = sink_a.0.lock().unwrap();
        let b = sink_b.0.lock().unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        assert_eq!(a[0].sensor_data["0"]["Baros_P"], vec![vec![1.0, 2.0]]);
        assert_eq!(a[0].sensor_data["0"]["Baros_P"], b[0].sensor_data["0"]["Baros_P"]);
    }

    #[test]
    fn window_boundary_splits_samples_across_windows() {
        let sink = RecordingSink::default();
        let mut batcher = WindowBatcher::new(
            skeleton(),
            Duration::from_millis(10),
            0.0,
            vec![Box::new(sink.clone())],
        );

        batcher.add("0", "Baros_P", vec![0.0, 1.0]).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        batcher.add("0", "Baros_P", vec![0.02, 2.0]).unwrap();
        batcher.flush().unwrap();

        let windows = sink.0.lock().unwrap();
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].window_index, 0);
        assert_eq!(windows[1].window_index, 1);
        assert_eq!(windows[0].sensor_data["0"]["Baros_P"], vec![vec![0.0, 1.0]]);
        assert_eq!(windows[1].sensor_data["0"]["Baros_P"], vec![vec![0.02, 2.0]]);
    }

    #[test]
    fn flush_emits_even_a_small_window() {
        let sink = RecordingSink::default();
        let mut batcher = WindowBatcher::new(
            skeleton(),
            Duration::from_secs(3600),
            0.0,
            vec![Box::new(sink.clone())],
        );
        batcher.add("0", "Baros_P", vec![0.0, 1.0]).unwrap();
        batcher.flush().unwrap();
        assert_eq!(sink.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn serialized_window_has_only_the_two_spec_fields() {
        let window = Window::empty(3, 12.5, &skeleton());
        let value = serde_json::to_value(&window).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 2);
        assert!(object.contains_key("sensor_time_offset"));
        assert!(object.contains_key("sensor_data"));
        assert!(!object.contains_key("window_index"));
    }
}
