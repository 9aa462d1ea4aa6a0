//! Core presence-tracking engine.
//!
//! This crate holds everything that doesn't need a running process: MAC
//! parsing, the adapter and registry client traits (plus their fakes for
//! tests), the probe engine, the device scheduler, the decision state
//! machine, override loading, the fast-path queue, and the pairing agent.
//! `presence-daemon` wires these together into a runnable binary.

pub mod adapter;
pub mod decision;
pub mod device;
pub mod error;
pub mod fast_path;
pub mod mac;
pub mod overrides;
pub mod pairing;
pub mod probe;
pub mod registry;
pub mod scheduler;
pub mod state;

pub use adapter::AdapterDriver;
pub use decision::{decide, note_transition, Decision, DecisionConfig, DecisionReason};
pub use device::{DeviceRecord, DeviceStatus};
pub use error::{PresenceError, Result};
pub use fast_path::{FastPathEvent, FastPathQueue, FastPathSource};
pub use mac::MacAddress;
pub use overrides::{OverrideLoadError, Overrides};
pub use pairing::{register_with_bluez, BluetoothAgent, PairingAgentState};
pub use probe::{probe_batch, L2pingResistance, ProbeConfig};
pub use registry::{AttendanceEntry, ConvexRegistryClient, NewDevice, RegistryClient, RegistryConfig};
pub use scheduler::{select_probe_set, SchedulerConfig, SchedulerState};
pub use state::{EngineState, PresenceStatus, SignalSource, SignalStats};
