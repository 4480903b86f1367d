//! pf_bb_config process management
//!
//! The tool keeps running after configuring a card to serve its command
//! socket. Processes are found by matching the PCI address on the command line.

use sriov_host::{CommandRunner, HostError, HostPaths};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const PF_BB_CONFIG: &str = "pf_bb_config";

fn pattern(pci: &str) -> String {
    format!("{PF_BB_CONFIG}.*{pci}")
}

/// Whether a pf_bb_config instance serves `pci`
pub async fn is_running(runner: &dyn CommandRunner, pci: &str) -> Result<bool, HostError> {
    let args = vec!["-f".to_string(), pattern(pci)];
    let output = runner.run("pgrep", &args).await?;
    match output.status {
        0 => Ok(true),
        1 => Ok(false),
        status => Err(HostError::Command {
            command: format!("pgrep -f {}", pattern(pci)),
            status,
            stderr: output.stderr,
        }),
    }
}

/// Kill the instance serving `pci` and remove its socket
///
/// Exit code 1 (no such process) is not an error.
pub async fn stop(runner: &dyn CommandRunner, paths: &HostPaths, pci: &str) -> Result<(), HostError> {
    let args = vec!["-f".to_string(), pattern(pci)];
    let output = runner.run("pkill", &args).await?;
    match output.status {
        0 => info!(pci, "Stopped pf_bb_config"),
        1 => debug!(pci, "No pf_bb_config running"),
        status => {
            return Err(HostError::Command {
                command: format!("pkill -f {}", pattern(pci)),
                status,
                stderr: output.stderr,
            });
        }
    }

    let socket = paths.pf_bb_config_socket(pci);
    match tokio::fs::remove_file(&socket).await {
        Ok(()) => debug!(socket = %socket.display(), "Removed stale pf_bb_config socket"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(socket = %socket.display(), "Failed to remove socket: {}", e),
    }
    Ok(())
}

/// Arguments for `pf_bb_config <device> -c <ini> -p <pci> [-v <token>] [-f <fft>]`
pub fn arguments(
    device: &str,
    ini: &Path,
    pci: &str,
    vfio_token: Option<&str>,
    fft_table: Option<&PathBuf>,
) -> Vec<String> {
    let mut args = vec![
        device.to_string(),
        "-c".to_string(),
        ini.display().to_string(),
        "-p".to_string(),
        pci.to_string(),
    ];
    if let Some(token) = vfio_token {
        args.extend(["-v".to_string(), token.to_string()]);
    }
    if let Some(table) = fft_table {
        args.extend(["-f".to_string(), table.display().to_string()]);
    }
    args
}

/// First line of `pf_bb_config --version`, empty when unavailable
pub async fn version(runner: &dyn CommandRunner) -> String {
    match runner.run(PF_BB_CONFIG, &["--version".to_string()]).await {
        Ok(output) if output.success() => output
            .stdout
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .to_string(),
        Ok(output) => {
            debug!(status = output.status, "pf_bb_config --version failed");
            String::new()
        }
        Err(e) => {
            debug!("pf_bb_config not available: {}", e);
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sriov_host::MockCommandRunner;
    use sriov_host::testing::FakeSysfs;

    #[tokio::test]
    async fn test_is_running_maps_pgrep_status() {
        let runner = MockCommandRunner::new();
        runner.respond_with("pgrep", 0, "4242\n");
        assert!(is_running(&runner, "0000:f7:00.0").await.unwrap());

        runner.respond_with("pgrep", 1, "");
        assert!(!is_running(&runner, "0000:f7:00.0").await.unwrap());

        runner.respond_with("pgrep", 2, "");
        assert!(is_running(&runner, "0000:f7:00.0").await.is_err());

        assert_eq!(
            runner.command_lines()[0],
            "pgrep -f pf_bb_config.*0000:f7:00.0"
        );
    }

    #[tokio::test]
    async fn test_stop_tolerates_missing_process_and_removes_socket() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeSysfs::new(dir.path());
        let socket = fake.paths.pf_bb_config_socket("0000:f7:00.0");
        std::fs::write(&socket, "").unwrap();

        let runner = MockCommandRunner::new();
        runner.respond_with("pkill", 1, "");
        stop(&runner, &fake.paths, "0000:f7:00.0").await.unwrap();
        assert!(!socket.exists());

        runner.respond_with("pkill", 3, "");
        assert!(stop(&runner, &fake.paths, "0000:f7:00.0").await.is_err());
    }

    #[test]
    fn test_arguments() {
        let fft = PathBuf::from("/opt/fft.bin");
        assert_eq!(
            arguments("VRB1", Path::new("/w/a.ini"), "0000:f7:00.0", Some("tok"), Some(&fft)),
            vec!["VRB1", "-c", "/w/a.ini", "-p", "0000:f7:00.0", "-v", "tok", "-f", "/opt/fft.bin"]
        );
        assert_eq!(
            arguments("ACC100", Path::new("/w/b.ini"), "0000:14:00.1", None, None),
            vec!["ACC100", "-c", "/w/b.ini", "-p", "0000:14:00.1"]
        );
    }

    #[tokio::test]
    async fn test_version() {
        let runner = MockCommandRunner::new();
        runner.respond_with(PF_BB_CONFIG, 0, "Version 24.03-0-g1a2b3c\nextra\n");
        assert_eq!(version(&runner).await, "Version 24.03-0-g1a2b3c");

        runner.respond_with(PF_BB_CONFIG, 127, "");
        assert_eq!(version(&runner).await, "");
    }
}
