//! Host access for accelerator nodes
//!
//! PCI inventory, sysfs device operations, kernel environment checks and the
//! external command seam used by the node daemon.

pub mod command;
pub mod discovery;
pub mod error;
pub mod kernel;
pub mod paths;
pub mod pci;
pub mod sysfs;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use command::{CommandOutput, CommandRunner, SystemCommandRunner};
pub use discovery::AcceleratorDiscoveryConfig;
pub use error::HostError;
pub use paths::HostPaths;
pub use pci::get_inventory;
pub use sysfs::Sysfs;

#[cfg(any(test, feature = "test-util"))]
pub use mock::MockCommandRunner;
