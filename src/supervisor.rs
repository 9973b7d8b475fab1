//! Supervisor: owns the stop flag, spawns the framer/parser/command threads, and guarantees
//! ordered shutdown.

use crate::config::{Configuration, Sensor};
use crate::framer;
use crate::parser::Parser;
use crate::routine::{self, Routine};
use crate::serial::SerialPort;
use crate::window::{WindowBatcher, WindowSink};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::sync_channel;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// How the command source is wired for a run: a finite routine, or the interactive stdin
/// alternative, or neither (passive listening only).
pub enum CommandSource {
    Routine(Routine),
    Interactive { commands_log_path: PathBuf },
    None,
}

pub struct SupervisorConfig {
    pub port: Arc<Mutex<dyn SerialPort>>,
    pub configuration: Configuration,
    pub leading_bytes: HashMap<u8, String>,
    pub rx_buffer_capacity: u32,
    pub dequeue_timeout: Duration,
    pub stop_when_no_more_data_after: Option<Duration>,
    pub sinks: Vec<Box<dyn WindowSink>>,
    pub window_size: Duration,
    pub session_start_wall_clock: f64,
    pub command_source: CommandSource,
    /// Run once, synchronously, after the main stop signal fires and before the port is
    /// dropped (e.g. to put sensors to sleep on exit).
    pub stop_routine: Option<Routine>,
    pub stop_poll_interval: Duration,
}

fn sensor_skeleton(configuration: &Configuration) -> HashMap<String, Vec<String>> {
    configuration
        .nodes
        .keys()
        .map(|node_id| {
            let sensor_names = Sensor::ALL.iter().map(|sensor| sensor.as_str().to_string()).collect();
            (node_id.clone(), sensor_names)
        })
        .collect()
}

/// Blocks until `stop_flag` is set (by a child task or an external signal handler), then joins
/// every child task in order and flushes the final window.
pub fn run(config: SupervisorConfig, stop_flag: Arc<AtomicBool>) -> Result<()> {
    let SupervisorConfig {
        port,
        configuration,
        leading_bytes,
        rx_buffer_capacity,
        dequeue_timeout,
        stop_when_no_more_data_after,
        sinks,
        window_size,
        session_start_wall_clock,
        command_source,
        stop_routine,
        stop_poll_interval,
    } = config;

    let (tx, rx) = sync_channel(1024);

    let framer_handle: JoinHandle<Result<()>> = {
        let port = Arc::clone(&port);
        let stop_flag = Arc::clone(&stop_flag);
        std::thread::Builder::new()
            .name("gateway-framer".to_string())
            .spawn(move || framer::run(port, leading_bytes, rx_buffer_capacity, tx, stop_flag))
            .context("failed to spawn framer thread")?
    };

    let parser_handle: JoinHandle<Result<()>> = {
        let stop_flag = Arc::clone(&stop_flag);
        let skeleton = sensor_skeleton(&configuration);
        let mut parser = Parser::new(configuration);
        std::thread::Builder::new()
            .name("gateway-parser".to_string())
            .spawn(move || {
                let mut batcher = WindowBatcher::new(skeleton, window_size, session_start_wall_clock, sinks);
                let result = parser.run(&rx, dequeue_timeout, stop_when_no_more_data_after, &mut batcher, &stop_flag);
                if let Err(err) = batcher.flush() {
                    tracing::warn!(error = %err, "failed to flush final window on shutdown");
                }
                result
            })
            .context("failed to spawn parser thread")?
    };

    let command_handle: Option<JoinHandle<Result<()>>> = match command_source {
        CommandSource::Routine(routine) => {
            let port = Arc::clone(&port);
            let stop_flag = Arc::clone(&stop_flag);
            Some(
                std::thread::Builder::new()
                    .name("gateway-routine".to_string())
                    .spawn(move || routine.run(&port, &stop_flag))
                    .context("failed to spawn routine thread")?,
            )
        }
        CommandSource::Interactive { commands_log_path } => {
            let port = Arc::clone(&port);
            let stop_flag = Arc::clone(&stop_flag);
            Some(
                std::thread::Builder::new()
                    .name("gateway-interactive".to_string())
                    .spawn(move || routine::run_interactive(&port, &stop_flag, &commands_log_path))
                    .context("failed to spawn interactive thread")?,
            )
        }
        CommandSource::None => None,
    };

    while !stop_flag.load(Ordering::SeqCst) {
        std::thread::sleep(stop_poll_interval);
    }

    join_logging(framer_handle, "framer");
    join_logging(parser_handle, "parser");
    if let Some(handle) = command_handle {
        join_logging(handle, "command source");
    }

    if let Some(stop_routine) = stop_routine {
        if let Err(err) = stop_routine.run(&port, &Arc::new(AtomicBool::new(false))) {
            tracing::warn!(error = %err, "stop routine failed");
        }
    }

    // The serial port closes when every `Arc<Mutex<dyn SerialPort>>` clone is dropped; every
    // thread holding one has now been joined, so only this function's `port` remains.
    drop(port);

    Ok(())
}

fn join_logging(handle: JoinHandle<Result<()>>, name: &str) {
    match handle.join() {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::warn!(error = %err, task = name, "task exited with an error"),
        Err(_) => tracing::error!(task = name, "task panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::serial::DummySerialPort;
    use crate::window::Window;
    use std::sync::Mutex as StdMutex;

    #[derive(Clone, Default)]
    struct RecordingSink(Arc<StdMutex<Vec<Window>>>);

    impl WindowSink for RecordingSink {
        fn handle_window(&mut self, window: Window) -> Result<()> {
            self.0.lock().unwrap().push(window);
            Ok(())
        }
    }

    #[test]
    fn stop_flag_set_externally_drains_and_returns() {
        let dummy = DummySerialPort::new();
        let port: Arc<Mutex<dyn SerialPort>> = Arc::new(Mutex::new(dummy));

        let mut configuration = Configuration::default();
        configuration.nodes.insert("0".to_string(), NodeConfig::default());
        let leading_bytes = configuration.leading_bytes_map();

        let sink = RecordingSink::default();
        let stop_flag = Arc::new(AtomicBool::new(false));

        let config = SupervisorConfig {
            port,
            configuration,
            leading_bytes,
            rx_buffer_capacity: 4095,
            dequeue_timeout: Duration::from_millis(20),
            stop_when_no_more_data_after: None,
            sinks: vec![Box::new(sink.clone())],
            window_size: Duration::from_secs(3600),
            session_start_wall_clock: 0.0,
            command_source: CommandSource::None,
            stop_routine: None,
            stop_poll_interval: Duration::from_millis(5),
        };

        {
            let stop_flag = Arc::clone(&stop_flag);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(30));
                stop_flag.store(true, Ordering::SeqCst);
            });
        }

        run(config, stop_flag).unwrap();

        // The parser flushes an (empty) final window on shutdown.
        assert_eq!(sink.0.lock().unwrap().len(), 1);
    }
}
