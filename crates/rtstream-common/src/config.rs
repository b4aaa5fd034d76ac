//! Configuration structures for the rtstream runtime.
//!
//! Supports TOML deserialization with defaults matching the reference
//! deployment (32 ms streaming, 2 s command polling, 5 s status reports,
//! 128-byte chunks). Configuration is read once at launch; nothing here is
//! reloaded while tasks run.

use crate::time::Timespec;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default streaming chunk size in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 128;

const STREAMER_PRIORITY: u8 = 3;
const LISTENER_PRIORITY: u8 = 2;
const REPORTER_PRIORITY: u8 = 1;

const_assert!(DEFAULT_CHUNK_SIZE > 0);
const_assert!(STREAMER_PRIORITY > LISTENER_PRIORITY);
const_assert!(LISTENER_PRIORITY > REPORTER_PRIORITY);

/// The three task kinds the runtime schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Streams chunks from the source to the transport.
    Streamer,
    /// Applies control characters to the pause flag.
    Listener,
    /// Emits the pause state to the status sink.
    Reporter,
}

impl TaskKind {
    /// All kinds, highest priority first.
    pub const ALL: [TaskKind; 3] = [Self::Streamer, Self::Listener, Self::Reporter];

    /// Thread and log name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Streamer => "audio-streamer",
            Self::Listener => "command-listener",
            Self::Reporter => "state-reporter",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Fixed I/O chunk size in bytes.
    pub chunk_size: usize,

    /// Path of the chunked data source.
    pub source: PathBuf,

    /// Path of the output transport device.
    pub transport: PathBuf,

    /// Streaming task (highest priority).
    pub streamer: TaskConfig,

    /// Command listening task.
    pub listener: TaskConfig,

    /// State reporting task (lowest priority).
    pub reporter: TaskConfig,

    /// Real-time configuration.
    pub realtime: RealtimeConfig,

    /// Cycle metrics configuration.
    pub metrics: MetricsConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            source: PathBuf::from("/let_it_be.raw"),
            transport: PathBuf::from("/dev/com1"),
            streamer: TaskConfig {
                period: Duration::from_millis(32),
                priority: STREAMER_PRIORITY,
            },
            listener: TaskConfig {
                period: Duration::from_secs(2),
                priority: LISTENER_PRIORITY,
            },
            reporter: TaskConfig {
                period: Duration::from_secs(5),
                priority: REPORTER_PRIORITY,
            },
            realtime: RealtimeConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

/// Period and static priority of one task. Both fields are required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Nominal cycle length.
    #[serde(with = "humantime_serde")]
    pub period: Duration,

    /// Fixed scheduling priority (1-99, higher runs first).
    pub priority: u8,
}

/// Scheduling record consumed by the platform adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulingConfig {
    /// Task the record belongs to.
    pub kind: TaskKind,
    /// Static thread priority.
    pub priority: u8,
    /// Cycle length.
    pub period: Timespec,
    /// Priority ceiling of the shared pause state.
    pub ceiling: u8,
}

/// Real-time scheduling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Enable real-time scheduling (requires privileges).
    pub enabled: bool,

    /// Scheduler policy: "fifo" or "rr" (round-robin).
    pub policy: SchedPolicy,

    /// CPU affinity for the task threads.
    pub cpu_affinity: CpuAffinity,

    /// Lock all memory pages (mlockall).
    pub lock_memory: bool,

    /// Stack bytes each task thread pre-faults before its first cycle.
    pub prefault_stack_size: usize,

    /// Fail at startup if RT requirements cannot be met.
    pub fail_fast: bool,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            policy: SchedPolicy::Fifo,
            cpu_affinity: CpuAffinity::None,
            lock_memory: true,
            prefault_stack_size: 512 * 1024, // 512 KiB
            fail_fast: false,
        }
    }
}

/// Cycle metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Samples retained per task.
    pub history: usize,

    /// Log a summary every this many cycles (0 disables).
    pub report_every: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            history: 1_000,
            report_every: 1_000,
        }
    }
}

/// Scheduler policy for real-time threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SchedPolicy {
    /// SCHED_FIFO: First-in-first-out real-time.
    #[default]
    Fifo,
    /// SCHED_RR: Round-robin real-time.
    Rr,
    /// SCHED_OTHER: Normal time-sharing (non-RT).
    Other,
}

/// CPU affinity specification.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CpuAffinity {
    /// No affinity set (OS chooses).
    #[default]
    None,
    /// Pin to a single CPU core.
    Single(usize),
    /// Pin to a set of CPU cores.
    Set(Vec<usize>),
}

impl Serialize for CpuAffinity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            CpuAffinity::None => serializer.serialize_none(),
            CpuAffinity::Single(cpu) => serializer.serialize_u64(*cpu as u64),
            CpuAffinity::Set(cpus) => cpus.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for CpuAffinity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::{self, Visitor};

        struct CpuAffinityVisitor;

        impl<'de> Visitor<'de> for CpuAffinityVisitor {
            type Value = CpuAffinity;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("null, an integer, or an array of integers")
            }

            fn visit_none<E>(self) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(CpuAffinity::None)
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(CpuAffinity::None)
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(CpuAffinity::Single(value as usize))
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                usize::try_from(value)
                    .map(CpuAffinity::Single)
                    .map_err(|_| de::Error::custom("CPU index cannot be negative"))
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: de::SeqAccess<'de>,
            {
                let mut cpus = Vec::new();
                while let Some(cpu) = seq.next_element::<usize>()? {
                    cpus.push(cpu);
                }
                Ok(CpuAffinity::Set(cpus))
            }
        }

        deserializer.deserialize_any(CpuAffinityVisitor)
    }
}

impl RuntimeConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Configuration of one task kind.
    #[must_use]
    pub fn task(&self, kind: TaskKind) -> &TaskConfig {
        match kind {
            TaskKind::Streamer => &self.streamer,
            TaskKind::Listener => &self.listener,
            TaskKind::Reporter => &self.reporter,
        }
    }

    /// Priority ceiling of the shared pause state: the highest task priority.
    #[must_use]
    pub fn ceiling(&self) -> u8 {
        TaskKind::ALL
            .iter()
            .map(|&kind| self.task(kind).priority)
            .max()
            .unwrap_or(STREAMER_PRIORITY)
    }

    /// Scheduling record for one task kind.
    #[must_use]
    pub fn scheduling(&self, kind: TaskKind) -> SchedulingConfig {
        let task = self.task(kind);
        SchedulingConfig {
            kind,
            priority: task.priority,
            period: Timespec::from(task.period),
            ceiling: self.ceiling(),
        }
    }

    /// Check the invariants the runtime relies on.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first violated rule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be non-zero".into()));
        }

        for kind in TaskKind::ALL {
            let task = self.task(kind);
            if task.period.is_zero() {
                return Err(ConfigError::Invalid(format!("{kind}: period must be non-zero")));
            }
            if !(1..=99).contains(&task.priority) {
                return Err(ConfigError::Invalid(format!(
                    "{kind}: priority {} outside 1..=99",
                    task.priority
                )));
            }
        }

        if !(self.streamer.priority > self.listener.priority
            && self.listener.priority > self.reporter.priority)
        {
            return Err(ConfigError::Invalid(format!(
                "priorities must be strictly ordered streamer > listener > reporter, got {} / {} / {}",
                self.streamer.priority, self.listener.priority, self.reporter.priority
            )));
        }

        Ok(())
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Semantically invalid configuration.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
