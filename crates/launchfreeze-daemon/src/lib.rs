//! LaunchFreeze Daemon
//!
//! Linux host integration for the launch freezer: `/proc` process registry,
//! signal-based freezing, `sysinfo` CPU sampling and scripted event replay.

pub mod config;
pub mod linux;
pub mod replay;
pub mod sampler;

pub use config::Config;
pub use linux::{ProcfsRegistry, SignalFreezer};
pub use replay::Script;
pub use sampler::SysinfoCpuSource;
