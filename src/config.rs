//! Gateway and node configuration.
//!
//! A strongly typed, validated record in place of a duck-typed configuration dict.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

pub const BASE_STATION_ID: &str = "base-station";
pub const HANDLE_DEFINITION_PACKET_TYPE: u8 = 255;

/// The enumerated sensors a node may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sensor {
    Mics,
    #[serde(rename = "Baros_P")]
    BarosP,
    #[serde(rename = "Baros_T")]
    BarosT,
    #[serde(rename = "Diff_Baros")]
    DiffBaros,
    Acc,
    Gyro,
    Mag,
    #[serde(rename = "Analog Vbat")]
    AnalogVbat,
    Constat,
    #[serde(rename = "battery_info")]
    BatteryInfo,
}

impl Sensor {
    pub const ALL: [Sensor; 10] = [
        Sensor::Mics,
        Sensor::BarosP,
        Sensor::BarosT,
        Sensor::DiffBaros,
        Sensor::Acc,
        Sensor::Gyro,
        Sensor::Mag,
        Sensor::AnalogVbat,
        Sensor::Constat,
        Sensor::BatteryInfo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Sensor::Mics => "Mics",
            Sensor::BarosP => "Baros_P",
            Sensor::BarosT => "Baros_T",
            Sensor::DiffBaros => "Diff_Baros",
            Sensor::Acc => "Acc",
            Sensor::Gyro => "Gyro",
            Sensor::Mag => "Mag",
            Sensor::AnalogVbat => "Analog Vbat",
            Sensor::Constat => "Constat",
            Sensor::BatteryInfo => "battery_info",
        }
    }
}

impl std::fmt::Display for Sensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    Little,
    Big,
}

/// Gateway-wide configuration shared by every node on the link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_baudrate")]
    pub baudrate: u32,
    #[serde(default = "default_endian")]
    pub endian: Endian,
    #[serde(default = "default_serial_buffer_rx_size")]
    pub serial_buffer_rx_size: u32,
    #[serde(default = "default_serial_buffer_tx_size")]
    pub serial_buffer_tx_size: u32,
    #[serde(default = "default_packet_key")]
    pub packet_key: u8,
    #[serde(default = "default_packet_key_offset")]
    pub packet_key_offset: u8,
    #[serde(default = "default_unknown")]
    pub installation_reference: String,
    #[serde(default = "default_unknown")]
    pub turbine_id: String,
    #[serde(default = "default_unknown")]
    pub receiver_firmware_version: String,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
    #[serde(default = "default_local_info_types")]
    pub local_info_types: HashMap<String, String>,
    #[serde(default = "default_initial_gateway_handles")]
    pub initial_gateway_handles: HashMap<String, String>,
}

fn default_baudrate() -> u32 {
    2_300_000
}
fn default_endian() -> Endian {
    Endian::Little
}
fn default_serial_buffer_rx_size() -> u32 {
    4095
}
fn default_serial_buffer_tx_size() -> u32 {
    1280
}
fn default_packet_key() -> u8 {
    254
}
fn default_packet_key_offset() -> u8 {
    245
}
fn default_unknown() -> String {
    "unknown".to_string()
}
fn default_local_info_types() -> HashMap<String, String> {
    [
        (
            "0",
            "Synchronization not ready as not every sensor node is connected",
        ),
        ("1", "Time synchronization info"),
        ("2", "Time sync exception"),
        ("4", "Time sync coarse data record error"),
        ("8", "Time sync alignment error"),
        ("16", "Time sync coarse data time diff error"),
        ("32", "Device not connected"),
        ("64", "Select message destination successful"),
        ("128", "Time sync success"),
        ("129", "Coarse sync finish"),
        ("130", "Time sync msg sent"),
        ("240", "Command not registered"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}
fn default_initial_gateway_handles() -> HashMap<String, String> {
    [("64", "Local Info Message")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            baudrate: default_baudrate(),
            endian: default_endian(),
            serial_buffer_rx_size: default_serial_buffer_rx_size(),
            serial_buffer_tx_size: default_serial_buffer_tx_size(),
            packet_key: default_packet_key(),
            packet_key_offset: default_packet_key_offset(),
            installation_reference: default_unknown(),
            turbine_id: default_unknown(),
            receiver_firmware_version: default_unknown(),
            latitude: 0.0,
            longitude: 0.0,
            local_info_types: default_local_info_types(),
            initial_gateway_handles: default_initial_gateway_handles(),
        }
    }
}

/// The canonical handle labels assigned on a successful `type_handle_def` update.
pub const CANONICAL_HANDLE_LABELS: [&str; 13] = [
    "Abs. baros",
    "Diff. baros",
    "Mic 0",
    "Mic 1",
    "IMU Accel",
    "IMU Gyro",
    "IMU Magnetometer",
    "Analog1",
    "Analog2",
    "Constat",
    "Cmd Decline",
    "Sleep State",
    "Info message",
];

fn default_handle_table_span() -> u16 {
    26
}

fn default_initial_node_handles() -> HashMap<String, String> {
    [
        ("34", "Abs. baros"),
        ("36", "Diff. baros"),
        ("38", "Mic 0"),
        ("40", "Mic 1"),
        ("42", "IMU Accel"),
        ("44", "IMU Gyro"),
        ("46", "IMU Magnetometer"),
        ("48", "Analog1"),
        ("50", "Analog2"),
        ("52", "Constat"),
        ("54", "Cmd Decline"),
        ("56", "Sleep State"),
        ("58", "Remote Info Message"),
        ("60", "Timestamp Packet 0"),
        ("62", "Timestamp Packet 1"),
        ("64", "Local Info Message"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn default_decline_reasons() -> HashMap<String, String> {
    [
        ("0", "Bad block detection ongoing"),
        ("1", "Task already registered, cannot register again"),
        ("2", "Task is not registered, cannot de-register"),
        ("3", "Connection parameter update unfinished"),
        ("4", "Not ready to sleep"),
        ("5", "Not in sleep"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn default_sleep_states() -> HashMap<String, String> {
    [("0", "Exiting sleep"), ("1", "Entering sleep")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn default_info_types() -> HashMap<String, String> {
    [("0", "Battery info"), ("1", "Status feedback")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn default_samples_per_packet() -> HashMap<Sensor, usize> {
    [
        (Sensor::Mics, 8),
        (Sensor::DiffBaros, 24),
        (Sensor::BarosP, 1),
        (Sensor::BarosT, 1),
        (Sensor::Acc, 40),
        (Sensor::Gyro, 40),
        (Sensor::Mag, 40),
        (Sensor::AnalogVbat, 60),
        (Sensor::Constat, 24),
        (Sensor::BatteryInfo, 1),
    ]
    .into_iter()
    .collect()
}

fn default_number_of_sensors() -> HashMap<Sensor, usize> {
    [
        (Sensor::Mics, 10),
        (Sensor::BarosP, 40),
        (Sensor::BarosT, 40),
        (Sensor::DiffBaros, 5),
        (Sensor::Acc, 3),
        (Sensor::Gyro, 3),
        (Sensor::Mag, 3),
        (Sensor::AnalogVbat, 2),
        (Sensor::Constat, 4),
        (Sensor::BatteryInfo, 3),
    ]
    .into_iter()
    .collect()
}

/// A conversion constant given either as a scalar (expanded at load time) or a
/// per-sensor-index vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConversionConstant {
    Scalar(f64),
    Vector(Vec<f64>),
}

fn default_sensor_conversion_constants() -> HashMap<Sensor, ConversionConstant> {
    [
        (Sensor::Mics, 1.0),
        (Sensor::DiffBaros, 1.0),
        (Sensor::BarosP, 40.96),
        (Sensor::BarosT, 100.0),
        (Sensor::Acc, 1.0),
        (Sensor::Gyro, 1.0),
        (Sensor::Mag, 1.0),
        (Sensor::AnalogVbat, 1.0),
        (Sensor::Constat, 1.0),
        (Sensor::BatteryInfo, 1.0),
    ]
    .into_iter()
    .map(|(k, v)| (k, ConversionConstant::Scalar(v)))
    .collect()
}

/// Raw, possibly-scalar node configuration as loaded from JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_mics_freq")]
    pub mics_freq: f64,
    #[serde(default = "default_baros_freq")]
    pub baros_freq: f64,
    #[serde(default = "default_diff_baros_freq")]
    pub diff_baros_freq: f64,
    #[serde(default = "default_acc_freq")]
    pub acc_freq: f64,
    #[serde(default = "default_gyro_freq")]
    pub gyro_freq: f64,
    #[serde(default = "default_mag_freq")]
    pub mag_freq: f64,
    #[serde(default = "default_analog_freq")]
    pub analog_freq: f64,
    #[serde(default = "default_constat_period")]
    pub constat_period: f64,
    #[serde(default = "default_battery_info_period")]
    pub battery_info_period: f64,
    #[serde(default = "default_max_timestamp_slack")]
    pub max_timestamp_slack: f64,
    #[serde(default = "default_max_period_drift")]
    pub max_period_drift: f64,
    #[serde(default = "default_handle_table_span")]
    pub handle_table_span: u16,
    #[serde(default = "default_samples_per_packet")]
    pub samples_per_packet: HashMap<Sensor, usize>,
    #[serde(default = "default_number_of_sensors")]
    pub number_of_sensors: HashMap<Sensor, usize>,
    #[serde(default = "default_sensor_conversion_constants")]
    pub sensor_conversion_constants: HashMap<Sensor, ConversionConstant>,
    #[serde(default = "default_initial_node_handles")]
    pub initial_node_handles: HashMap<String, String>,
    #[serde(default = "default_decline_reasons")]
    pub decline_reason: HashMap<String, String>,
    #[serde(default = "default_sleep_states")]
    pub sleep_state: HashMap<String, String>,
    #[serde(default = "default_info_types")]
    pub info_type: HashMap<String, String>,
}

fn default_mics_freq() -> f64 {
    15625.0
}
fn default_baros_freq() -> f64 {
    100.0
}
fn default_diff_baros_freq() -> f64 {
    1000.0
}
fn default_acc_freq() -> f64 {
    100.0
}
fn default_gyro_freq() -> f64 {
    100.0
}
fn default_mag_freq() -> f64 {
    12.5
}
fn default_analog_freq() -> f64 {
    16384.0
}
fn default_constat_period() -> f64 {
    45.0
}
fn default_battery_info_period() -> f64 {
    3600.0
}
fn default_max_timestamp_slack() -> f64 {
    5e-3
}
fn default_max_period_drift() -> f64 {
    0.02
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            mics_freq: default_mics_freq(),
            baros_freq: default_baros_freq(),
            diff_baros_freq: default_diff_baros_freq(),
            acc_freq: default_acc_freq(),
            gyro_freq: default_gyro_freq(),
            mag_freq: default_mag_freq(),
            analog_freq: default_analog_freq(),
            constat_period: default_constat_period(),
            battery_info_period: default_battery_info_period(),
            max_timestamp_slack: default_max_timestamp_slack(),
            max_period_drift: default_max_period_drift(),
            handle_table_span: default_handle_table_span(),
            samples_per_packet: default_samples_per_packet(),
            number_of_sensors: default_number_of_sensors(),
            sensor_conversion_constants: default_sensor_conversion_constants(),
            initial_node_handles: default_initial_node_handles(),
            decline_reason: default_decline_reasons(),
            sleep_state: default_sleep_states(),
            info_type: default_info_types(),
        }
    }
}

impl NodeConfig {
    /// Periods (seconds per sample) for each sensor, derived from frequencies.
    pub fn periods(&self) -> HashMap<Sensor, f64> {
        [
            (Sensor::Mics, 1.0 / self.mics_freq),
            (Sensor::BarosP, 1.0 / self.baros_freq),
            (Sensor::BarosT, 1.0 / self.baros_freq),
            (Sensor::DiffBaros, 1.0 / self.diff_baros_freq),
            (Sensor::Acc, 1.0 / self.acc_freq),
            (Sensor::Gyro, 1.0 / self.gyro_freq),
            (Sensor::Mag, 1.0 / self.mag_freq),
            (Sensor::AnalogVbat, 1.0 / self.analog_freq),
            (Sensor::Constat, self.constat_period / 1000.0),
            (Sensor::BatteryInfo, self.battery_info_period),
        ]
        .into_iter()
        .collect()
    }

    /// Expand scalar conversion constants into per-sensor-index vectors,
    /// validating that any explicitly supplied vector matches `number_of_sensors`.
    fn expanded_conversion_constants(&self) -> Result<HashMap<Sensor, Vec<f64>>, ConfigError> {
        let mut out = HashMap::new();
        for (sensor, constant) in &self.sensor_conversion_constants {
            let expected = *self.number_of_sensors.get(sensor).ok_or_else(|| {
                ConfigError::IncompleteSensorTable(sensor.to_string(), "number_of_sensors")
            })?;
            let vector = match constant {
                ConversionConstant::Scalar(value) => vec![*value; expected],
                ConversionConstant::Vector(values) => {
                    if values.len() != expected {
                        return Err(ConfigError::ConversionConstantLengthMismatch {
                            sensor: sensor.to_string(),
                            got: values.len(),
                            expected,
                        });
                    }
                    values.clone()
                }
            };
            out.insert(*sensor, vector);
        }
        Ok(out)
    }

    fn check(&self) -> Result<(), ConfigError> {
        for sensor in Sensor::ALL {
            if !self.samples_per_packet.contains_key(&sensor) {
                return Err(ConfigError::IncompleteSensorTable(
                    sensor.to_string(),
                    "samples_per_packet",
                ));
            }
            if !self.number_of_sensors.contains_key(&sensor) {
                return Err(ConfigError::IncompleteSensorTable(
                    sensor.to_string(),
                    "number_of_sensors",
                ));
            }
            if !self.sensor_conversion_constants.contains_key(&sensor) {
                return Err(ConfigError::IncompleteSensorTable(
                    sensor.to_string(),
                    "sensor_conversion_constants",
                ));
            }
        }
        self.expanded_conversion_constants().map(|_| ())
    }
}

/// Per-node runtime handle table: numeric handle id (as a string key) -> semantic packet type.
#[derive(Debug, Clone)]
pub struct HandleTable {
    pub labels: HashMap<String, String>,
    pub span: u16,
}

impl HandleTable {
    pub fn from_initial(node: &NodeConfig) -> Self {
        Self {
            labels: node.initial_node_handles.clone(),
            span: node.handle_table_span,
        }
    }

    pub fn get(&self, handle: &str) -> Option<&str> {
        self.labels.get(handle).map(|s| s.as_str())
    }

    /// Attempt a wholesale replacement; returns `false` (table unchanged) if the span
    /// doesn't match this node's configured width.
    pub fn try_update(&mut self, start: u16, end: u16) -> bool {
        if end.saturating_sub(start) != self.span {
            return false;
        }
        let mut labels = HashMap::with_capacity(CANONICAL_HANDLE_LABELS.len());
        for (i, label) in CANONICAL_HANDLE_LABELS.iter().enumerate() {
            let handle = start + 2 * (i as u16 + 1);
            labels.insert(handle.to_string(), (*label).to_string());
        }
        self.labels = labels;
        true
    }
}

/// Measurement-campaign metadata carried alongside the configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeasurementCampaign {
    pub label: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub gateway: GatewayConfig,
    pub nodes: HashMap<String, NodeConfig>,
    #[serde(default)]
    pub measurement_campaign: MeasurementCampaign,
}

impl Default for Configuration {
    fn default() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert("0".to_string(), NodeConfig::default());
        Self {
            gateway: GatewayConfig::default(),
            nodes,
            measurement_campaign: MeasurementCampaign::default(),
        }
    }
}

impl Configuration {
    /// Load and validate a configuration from a JSON file, falling back to defaults if the
    /// path does not exist.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        }

        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Configuration = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nodes.is_empty() {
            return Err(ConfigError::MissingKey("nodes".to_string()));
        }
        for node in self.nodes.values() {
            node.check()?;
        }
        Ok(())
    }

    pub fn node_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.nodes.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// The leading byte for a given node id, or the base-station leading byte if `None`.
    pub fn leading_byte(&self, node_id: Option<&str>) -> u8 {
        match node_id {
            None => self.gateway.packet_key,
            Some(id) => {
                let n: u16 = id.parse().unwrap_or(0);
                self.gateway.packet_key_offset.wrapping_add(n as u8)
            }
        }
    }

    /// Maps leading bytes to node ids (or the base-station sentinel).
    pub fn leading_bytes_map(&self) -> HashMap<u8, String> {
        let mut map = HashMap::new();
        map.insert(self.leading_byte(None), BASE_STATION_ID.to_string());
        for node_id in self.node_ids() {
            map.insert(self.leading_byte(Some(&node_id)), node_id);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_configuration_validates() {
        let config = Configuration::default();
        config.validate().expect("default configuration must validate");
    }

    #[test]
    fn scalar_conversion_constant_expands_to_vector_of_expected_length() {
        let node = NodeConfig::default();
        let expanded = node.expanded_conversion_constants().unwrap();
        assert_eq!(expanded[&Sensor::BarosP].len(), node.number_of_sensors[&Sensor::BarosP]);
    }

    #[test]
    fn mismatched_vector_conversion_constant_fails_validation() {
        let mut node = NodeConfig::default();
        node.sensor_conversion_constants.insert(
            Sensor::BarosP,
            ConversionConstant::Vector(vec![1.0, 2.0]),
        );
        let err = node.check().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ConversionConstantLengthMismatch { .. }
        ));
    }

    #[test]
    fn leading_bytes_map_resolves_base_station_and_nodes() {
        let config = Configuration::default();
        let map = config.leading_bytes_map();
        assert_eq!(map[&config.gateway.packet_key], BASE_STATION_ID);
        assert_eq!(
            map[&(config.gateway.packet_key_offset)],
            "0".to_string()
        );
    }

    #[test]
    fn handle_table_update_rejects_mismatched_span() {
        let node = NodeConfig::default();
        let mut table = HandleTable::from_initial(&node);
        assert!(!table.try_update(10, 30));
        assert!(table.try_update(10, 36));
        assert_eq!(table.get("12"), Some("Abs. baros"));
    }

    #[test]
    fn periods_derive_constat_and_battery_info_specially() {
        let node = NodeConfig::default();
        let periods = node.periods();
        assert_eq!(periods[&Sensor::Constat], node.constat_period / 1000.0);
        assert_eq!(periods[&Sensor::BatteryInfo], node.battery_info_period);
    }
}
