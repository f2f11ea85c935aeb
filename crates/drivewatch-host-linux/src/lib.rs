//! Linux collaborators for drivewatchd
//!
//! Provides:
//! - Console alert rendering
//! - System metrics (CPU, memory, load, disk, temperature) via `sysinfo`
//! - Line-oriented badge scanner input
//! - Media hand-off into a spool directory
//! - Stable hardware identifier from the machine id

mod alerts;
mod metrics;
mod scanner;
mod spool;

pub use alerts::*;
pub use metrics::*;
pub use scanner::*;
pub use spool::*;

use std::path::Path;

/// Hardware identifier derived from `/etc/machine-id`, if readable
pub fn machine_id() -> Option<String> {
    read_machine_id(Path::new("/etc/machine-id"))
}

fn read_machine_id(path: &Path) -> Option<String> {
    let id = std::fs::read_to_string(path).ok()?;
    let id = id.trim();
    (!id.is_empty()).then(|| format!("dw-{}", id.chars().take(12).collect::<String>()))
}
