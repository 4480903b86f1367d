//! Kernel environment checks
//!
//! Reads the boot command line, loaded module parameters and the lockdown mode
//! the node daemon validates a spec against before touching hardware.

use std::fs;
use std::io;

use crate::error::HostError;
use crate::paths::HostPaths;

/// Boot parameters SR-IOV accelerators need
pub const REQUIRED_CMDLINE_PARAMS: &[&str] = &["intel_iommu=on", "iommu=pt"];

/// Required parameters missing from `/proc/cmdline`
pub fn missing_cmdline_params(paths: &HostPaths) -> Result<Vec<&'static str>, HostError> {
    let path = paths.cmdline();
    let cmdline = fs::read_to_string(&path).map_err(|e| HostError::io(&path, e))?;
    let tokens: Vec<&str> = cmdline.split_whitespace().collect();

    Ok(REQUIRED_CMDLINE_PARAMS
        .iter()
        .copied()
        .filter(|param| !tokens.contains(param))
        .collect())
}

/// Boolean module parameter
///
/// `None` when the module is not loaded; an unreadable parameter of a loaded
/// module counts as disabled.
pub fn module_parameter(paths: &HostPaths, module: &str, param: &str) -> Result<Option<bool>, HostError> {
    if !paths.module(module).exists() {
        return Ok(None);
    }
    let path = paths.module_parameter(module, param);
    match fs::read_to_string(&path) {
        Ok(value) => Ok(Some(matches!(value.trim(), "Y" | "y" | "1"))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Some(false)),
        Err(e) => Err(HostError::io(&path, e)),
    }
}

/// Whether kernel lockdown is off (`[none]` selected); a missing file means no lockdown support
pub fn lockdown_disabled(paths: &HostPaths) -> Result<bool, HostError> {
    let path = paths.lockdown();
    match fs::read_to_string(&path) {
        Ok(value) => Ok(value.contains("[none]")),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(HostError::io(&path, e)),
    }
}
