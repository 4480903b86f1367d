//! SR-IOV FEC/VRB CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the accelerator operator and node
//! daemon, in two parallel families: `sriovfec.intel.com/v2` and
//! `sriovvrb.intel.com/v1`.

pub mod bbdev;
pub mod error;
pub mod family;
pub mod inventory;
pub mod physical_function;
pub mod sriovfec;
pub mod sriovvrb;
pub mod status;
pub mod validation;

pub use bbdev::*;
pub use error::*;
pub use family::*;
pub use inventory::*;
pub use physical_function::*;
pub use sriovfec::*;
pub use sriovvrb::*;
pub use status::*;
