//! Unified error types for platio
//!
//! Every library error maps onto one of three kinds (see [`ErrorKind`]):
//! misuse by the caller, a failing hardware or driver call, or a platform
//! description that contradicts itself.

use crate::topo::Domain;
use thiserror::Error;

/// Coarse classification of a [`PlatformError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The caller asked for something invalid
    Usage,
    /// A backend call failed or the feature is unavailable
    Hardware,
    /// Topology or table invariants do not hold
    Consistency,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Usage => "usage",
            ErrorKind::Hardware => "hardware",
            ErrorKind::Consistency => "consistency",
        };
        f.write_str(name)
    }
}

/// Top-level application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Error from the signal/control layer
    #[error("{0}")]
    Platform(#[from] PlatformError),

    /// Error from configuration parsing/validation
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Error from a control-loop service
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    /// No backend could be loaded on this machine
    #[error("No signal/control backends could be loaded")]
    NoBackends,

    /// Malformed command input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<HardwareError> for AppError {
    fn from(err: HardwareError) -> Self {
        AppError::Platform(PlatformError::Hardware(err))
    }
}

impl From<TopologyError> for AppError {
    fn from(err: TopologyError) -> Self {
        AppError::Platform(PlatformError::Topology(err))
    }
}

/// Errors raised by IoGroups and the platform layer
#[derive(Error, Debug)]
pub enum PlatformError {
    /// Signal name not provided by any loaded backend
    #[error("Unknown signal: {0}")]
    UnknownSignal(String),

    /// Control name not provided by any loaded backend
    #[error("Unknown control: {0}")]
    UnknownControl(String),

    /// Request domain differs from the native domain of the name
    #[error("Wrong domain for {name}: expected {expected}, got {actual}")]
    WrongDomain {
        name: String,
        expected: Domain,
        actual: Domain,
    },

    /// Domain index outside `[0, count)`
    #[error("Index {index} out of range for domain {domain} (count {count})")]
    IndexOutOfRange {
        domain: Domain,
        index: usize,
        count: usize,
    },

    /// Batch handle that was never returned by a push
    #[error("Batch index {0} out of range")]
    BatchIndexOutOfRange(usize),

    /// `sample()` called before the first `read_batch()`
    #[error("Signal sampled before read_batch()")]
    SampleBeforeRead,

    /// `push_*()` called after the first `read_batch()`
    #[error("Cannot push after call to read_batch()")]
    PushAfterRead,

    /// Control that must be written immediately was pushed
    #[error("Control {0} cannot be pushed in batch writes")]
    NotBatchable(String),

    /// A name was registered twice in one table
    #[error("Name already registered: {0}")]
    AliasConflict(String),

    /// Hardware or driver failure
    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),

    /// Topology lookup failure
    #[error("Topology error: {0}")]
    Topology(#[from] TopologyError),

    /// Internal table invariant violated
    #[error("Consistency error: {0}")]
    Consistency(String),
}

impl PlatformError {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlatformError::Hardware(_) => ErrorKind::Hardware,
            PlatformError::Topology(e) => e.kind(),
            PlatformError::Consistency(_) => ErrorKind::Consistency,
            _ => ErrorKind::Usage,
        }
    }
}

/// Errors from hardware access (NVML, ISST, sysfs)
#[derive(Error, Debug)]
pub enum HardwareError {
    /// Failed to initialize a vendor library
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),

    /// NVML library not found
    #[error("NVML library not found. Is the NVIDIA driver installed?")]
    LibraryNotFound,

    /// Device not found at index
    #[error("Device not found at index {0}")]
    DeviceNotFound(u32),

    /// Operation not supported by this hardware
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    /// Insufficient permissions
    #[error("Insufficient permissions: {0}. Try running with sudo.")]
    InsufficientPermissions(String),

    /// GPU is lost (fallen off bus, etc.)
    #[error("GPU is lost or has become inaccessible")]
    GpuLost,

    /// Invalid argument passed to the driver
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A write dependency on another control is not satisfied
    #[error("Write precondition not met: {0}")]
    PreconditionUnmet(String),

    /// Device file or sysfs attribute access failed
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Value read from the device could not be interpreted
    #[error("Malformed value from {path}: {value:?}")]
    Malformed { path: String, value: String },

    /// Unknown driver error
    #[error("Driver error: {0}")]
    Unknown(String),
}

/// Errors from topology construction and lookup
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    /// Nesting of `inner` within `outer` is undefined
    #[error("Domain {inner} is not nested within {outer}")]
    UnsupportedNesting { inner: Domain, outer: Domain },

    /// Domain index outside `[0, count)`
    #[error("Index {index} out of range for domain {domain} (count {count})")]
    IndexOutOfRange {
        domain: Domain,
        index: usize,
        count: usize,
    },

    /// Unrecognized domain name
    #[error("Unknown domain name: {0}")]
    UnknownDomain(String),

    /// GPU chips cannot be split evenly over GPUs
    #[error("GPU chip count {num_gpu_chip} is not a multiple of GPU count {num_gpu}")]
    UnevenSubdevices { num_gpu: usize, num_gpu_chip: usize },

    /// Counts describe an impossible machine
    #[error("Invalid topology: {0}")]
    InvalidCounts(String),

    /// Reading the system description failed
    #[error("Topology detection failed: {0}")]
    Detection(String),
}

impl TopologyError {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            TopologyError::UnsupportedNesting { .. }
            | TopologyError::IndexOutOfRange { .. }
            | TopologyError::UnknownDomain(_) => ErrorKind::Usage,
            TopologyError::UnevenSubdevices { .. } | TopologyError::InvalidCounts(_) => {
                ErrorKind::Consistency
            }
            TopologyError::Detection(_) => ErrorKind::Hardware,
        }
    }
}

/// Errors from configuration parsing and validation
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    /// Failed to parse a file
    #[error("Failed to parse {path}: {message}")]
    ParseError { path: String, message: String },

    /// Invalid config value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Errors from control-loop services
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Platform operation failed
    #[error("{0}")]
    Platform(#[from] PlatformError),

    /// Requested bounds fall outside the platform range or are inverted
    #[error("Invalid frequency bounds: [{min}, {max}] (platform range [{platform_min}, {platform_max}])")]
    InvalidBounds {
        min: f64,
        max: f64,
        platform_min: f64,
        platform_max: f64,
    },

    /// Request vector does not match the number of controlled domains
    #[error("Size of request vector ({actual}) does not match control domain count ({expected})")]
    RequestSize { expected: usize, actual: usize },

    /// Governor used in the wrong lifecycle phase
    #[error("Invalid governor state: {0}")]
    InvalidState(String),

    /// Control domain cannot hold the native control domain
    #[error("Domain {requested} does not contain native control domain {native}")]
    InvalidDomain { requested: Domain, native: Domain },
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
