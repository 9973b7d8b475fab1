use thiserror::Error;

/// Errors that abort a single record or frame but never the data plane as a whole.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("received packet with unknown semantic type {0:?} for node {1}")]
    UnknownPacketType(String, String),

    #[error("malformed sensor frame for node {node_id} packet type {packet_type:?}: {reason}")]
    MalformedFrame {
        node_id: String,
        packet_type: String,
        reason: String,
    },
}

/// Errors that are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration key: {0}")]
    MissingKey(String),

    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error(
        "sensor conversion constant list for {sensor} has length {got}, expected {expected} (number_of_sensors)"
    )]
    ConversionConstantLengthMismatch {
        sensor: String,
        got: usize,
        expected: usize,
    },

    #[error("sensor {0:?} is missing an entry in {1}")]
    IncompleteSensorTable(String, &'static str),

    #[error("failed to read configuration file {path:?}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Returned when neither a local nor a remote sink is enabled at startup.
#[derive(Debug, Error)]
#[error("data from the gateway must either be saved locally or uploaded to the cloud")]
pub struct DataMustBeSavedError;

/// Raised at routine-scheduler construction when delays/periods are inconsistent.
#[derive(Debug, Error)]
pub enum RoutineError {
    #[error("command {command:?} has delay {delay}s greater than the routine period {period}s")]
    DelayExceedsPeriod {
        command: String,
        delay: f64,
        period: f64,
    },

    #[error("stop_after ({stop_after}s) must be greater than or equal to period ({period}s)")]
    StopAfterBeforePeriod { stop_after: f64, period: f64 },
}
