//! pf_bb_config socket command gateway
//!
//! A running `pf_bb_config` listens on `/tmp/pf_bb_config.<pci>.sock` for
//! binary command frames and answers by appending to its log files:
//! confirmations go to the main log, dumps to the response log, which ends
//! each answer with `-- End of Response --`.
//!
//! Frame layout, little-endian: `u16 id | u16 payload length | u64 reserved (0) | payload`.

use sriov_host::HostPaths;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tracing::debug;

use crate::error::BbDevError;

/// Terminator of every answer in the response log
pub const END_OF_RESPONSE: &str = "-- End of Response --";

/// Socket connect and write deadline
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// How long to wait for the answer to appear in the log
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Log polling cadence
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

const FRAME_HEADER_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    ClusterReset,
    PfFlr,
}

/// Which log file a command answers in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Main,
    Response,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayCommand {
    ResetMode(ResetMode),
    AutoReset(bool),
    ClearLog,
    /// Register dump for the given PCI device ID
    RegDump(u16),
    /// Read one 32-bit MMIO register
    MmRead(u32),
    /// Per-VF counters used by telemetry
    DeviceData,
}

impl GatewayCommand {
    pub fn id(&self) -> u16 {
        match self {
            GatewayCommand::ResetMode(_) => 1,
            GatewayCommand::AutoReset(_) => 2,
            GatewayCommand::ClearLog => 3,
            GatewayCommand::RegDump(_) => 4,
            GatewayCommand::MmRead(_) => 5,
            GatewayCommand::DeviceData => 6,
        }
    }

    pub fn payload(&self) -> Vec<u8> {
        match *self {
            GatewayCommand::ResetMode(ResetMode::ClusterReset) => vec![0],
            GatewayCommand::ResetMode(ResetMode::PfFlr) => vec![1],
            GatewayCommand::AutoReset(on) => vec![u8::from(on)],
            GatewayCommand::ClearLog | GatewayCommand::DeviceData => Vec::new(),
            GatewayCommand::RegDump(device_id) => device_id.to_le_bytes().to_vec(),
            GatewayCommand::MmRead(address) => address.to_le_bytes().to_vec(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let payload = self.payload();
        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
        frame.extend_from_slice(&self.id().to_le_bytes());
        // Payloads are at most four bytes
        frame.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        frame.extend_from_slice(&0u64.to_le_bytes());
        frame.extend_from_slice(&payload);
        frame
    }

    pub fn log_kind(&self) -> LogKind {
        match self {
            GatewayCommand::ResetMode(_) | GatewayCommand::AutoReset(_) | GatewayCommand::ClearLog => {
                LogKind::Main
            }
            GatewayCommand::RegDump(_) | GatewayCommand::MmRead(_) | GatewayCommand::DeviceData => {
                LogKind::Response
            }
        }
    }

    /// Text whose appearance in the log completes the command
    pub fn terminator(&self) -> &'static str {
        match self {
            GatewayCommand::ResetMode(ResetMode::ClusterReset) => "Reset mode set to cluster reset",
            GatewayCommand::ResetMode(ResetMode::PfFlr) => "Reset mode set to PF FLR",
            GatewayCommand::AutoReset(true) => "Auto reset enabled",
            GatewayCommand::AutoReset(false) => "Auto reset disabled",
            GatewayCommand::ClearLog => "Log file cleared",
            _ => END_OF_RESPONSE,
        }
    }
}

impl fmt::Display for GatewayCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayCommand::ResetMode(ResetMode::ClusterReset) => f.write_str("reset_mode cluster_reset"),
            GatewayCommand::ResetMode(ResetMode::PfFlr) => f.write_str("reset_mode pf_flr"),
            GatewayCommand::AutoReset(on) => write!(f, "auto_reset {}", if *on { "on" } else { "off" }),
            GatewayCommand::ClearLog => f.write_str("clear_log"),
            GatewayCommand::RegDump(id) => write!(f, "reg_dump {id:#06x}"),
            GatewayCommand::MmRead(address) => write!(f, "mm_read {address:#010x}"),
            GatewayCommand::DeviceData => f.write_str("device_data"),
        }
    }
}

/// Client for one device's pf_bb_config instance
#[derive(Debug, Clone)]
pub struct GatewayClient {
    socket: PathBuf,
    main_log: PathBuf,
    response_log: PathBuf,
    response_timeout: Duration,
}

impl GatewayClient {
    pub fn new(socket: PathBuf, main_log: PathBuf, response_log: PathBuf) -> Self {
        Self {
            socket,
            main_log,
            response_log,
            response_timeout: RESPONSE_TIMEOUT,
        }
    }

    pub fn for_device(paths: &HostPaths, pci: &str) -> Self {
        Self::new(
            paths.pf_bb_config_socket(pci),
            paths.pf_bb_config_log(pci),
            paths.pf_bb_config_response_log(pci),
        )
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    fn log_path(&self, kind: LogKind) -> &Path {
        match kind {
            LogKind::Main => &self.main_log,
            LogKind::Response => &self.response_log,
        }
    }

    /// Send a command and wait for its answer
    ///
    /// Returns the log text produced by the command, up to and including the
    /// terminator.
    pub async fn send(&self, command: GatewayCommand) -> Result<String, BbDevError> {
        let log = self.log_path(command.log_kind());

        // Response log is truncated; main log is read from its current end
        tokio::fs::write(&self.response_log, b"")
            .await
            .map_err(|e| BbDevError::io(&self.response_log, e))?;
        let offset = match command.log_kind() {
            LogKind::Response => 0,
            LogKind::Main => tokio::fs::metadata(log).await.map(|m| m.len()).unwrap_or(0),
        };

        debug!(socket = %self.socket.display(), command = %command, "Sending pf_bb_config command");
        self.write_frame(&command.encode()).await?;
        self.wait_for(log, offset, command.terminator(), &command).await
    }

    async fn write_frame(&self, frame: &[u8]) -> Result<(), BbDevError> {
        let socket_err = |source| BbDevError::Socket {
            path: self.socket.clone(),
            source,
        };
        let mut stream = tokio::time::timeout(WRITE_TIMEOUT, UnixStream::connect(&self.socket))
            .await
            .map_err(|_| BbDevError::Timeout(format!("connecting to {}", self.socket.display())))?
            .map_err(socket_err)?;
        tokio::time::timeout(WRITE_TIMEOUT, stream.write_all(frame))
            .await
            .map_err(|_| BbDevError::Timeout(format!("writing to {}", self.socket.display())))?
            .map_err(socket_err)?;
        Ok(())
    }

    async fn wait_for(
        &self,
        log: &Path,
        offset: u64,
        terminator: &str,
        command: &GatewayCommand,
    ) -> Result<String, BbDevError> {
        let deadline = tokio::time::Instant::now() + self.response_timeout;
        let start = usize::try_from(offset).unwrap_or(usize::MAX);

        loop {
            if let Ok(content) = tokio::fs::read(log).await {
                // A log shorter than the offset was truncated by the command
                let fresh = String::from_utf8_lossy(content.get(start..).unwrap_or(&content[..]));
                if let Some(pos) = fresh.find(terminator) {
                    return Ok(fresh[..pos + terminator.len()].to_string());
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(BbDevError::Timeout(format!(
                    "waiting for '{command}' response in {}",
                    log.display()
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::UnixListener;

    #[test]
    fn test_frame_layout() {
        assert_eq!(
            GatewayCommand::MmRead(0x00B8_0000).encode(),
            vec![5, 0, 4, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x00, 0x00, 0xB8, 0x00]
        );
        assert_eq!(
            GatewayCommand::RegDump(0x0d5c).encode(),
            vec![4, 0, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x5c, 0x0d]
        );
        assert_eq!(GatewayCommand::ClearLog.encode().len(), FRAME_HEADER_LEN);
        assert_eq!(GatewayCommand::ResetMode(ResetMode::PfFlr).payload(), vec![1]);
        assert_eq!(GatewayCommand::AutoReset(false).payload(), vec![0]);
    }

    #[test]
    fn test_log_routing() {
        assert_eq!(GatewayCommand::DeviceData.log_kind(), LogKind::Response);
        assert_eq!(GatewayCommand::DeviceData.terminator(), END_OF_RESPONSE);
        assert_eq!(GatewayCommand::AutoReset(true).log_kind(), LogKind::Main);
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        client: GatewayClient,
        listener: UnixListener,
        main_log: PathBuf,
        response_log: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("pf_bb_config.0000:14:00.1.sock");
        let main_log = dir.path().join("pf_bb_cfg_0000:14:00.1.log");
        let response_log = dir.path().join("pf_bb_cfg_0000:14:00.1_response.log");
        let listener = UnixListener::bind(&socket).unwrap();
        let client = GatewayClient::new(socket, main_log.clone(), response_log.clone());
        Fixture {
            _dir: dir,
            client,
            listener,
            main_log,
            response_log,
        }
    }

    #[tokio::test]
    async fn test_response_command_round_trip() {
        let fx = fixture();
        std::fs::write(&fx.response_log, "stale dump\n-- End of Response --\n").unwrap();

        let listener = fx.listener;
        let response_log = fx.response_log.clone();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut frame = vec![0u8; FRAME_HEADER_LEN];
            stream.read_exact(&mut frame).await.unwrap();
            tokio::time::sleep(Duration::from_millis(120)).await;
            std::fs::write(&response_log, "VF0 counters 1 2 3\n-- End of Response --\n").unwrap();
            frame
        });

        let answer = fx.client.send(GatewayCommand::DeviceData).await.unwrap();
        assert_eq!(answer, "VF0 counters 1 2 3\n-- End of Response --");
        assert_eq!(server.await.unwrap()[0], 6);
    }

    #[tokio::test]
    async fn test_main_log_ignores_earlier_lines() {
        let fx = fixture();
        std::fs::write(&fx.main_log, "Auto reset enabled\n").unwrap();

        let listener = fx.listener;
        let main_log = fx.main_log.clone();
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_millis(60)).await;
            let mut log = std::fs::read_to_string(&main_log).unwrap();
            log.push_str("Auto reset disabled\n");
            std::fs::write(&main_log, log).unwrap();
        });

        let answer = fx.client.send(GatewayCommand::AutoReset(false)).await.unwrap();
        assert_eq!(answer, "Auto reset disabled");
    }

    #[tokio::test]
    async fn test_clear_log_after_truncation() {
        let fx = fixture();
        std::fs::write(
            &fx.main_log,
            "Queue group 0 configured\nQueue group 1 configured\nAuto reset enabled\n",
        )
        .unwrap();
        std::fs::write(&fx.response_log, "old dump\n-- End of Response --\n").unwrap();

        let listener = fx.listener;
        let main_log = fx.main_log.clone();
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_millis(60)).await;
            std::fs::write(&main_log, "Log file cleared\n").unwrap();
        });

        let answer = fx.client.send(GatewayCommand::ClearLog).await.unwrap();
        assert_eq!(answer, "Log file cleared");
        assert_eq!(std::fs::read_to_string(&fx.response_log).unwrap(), "");
    }

    #[tokio::test]
    async fn test_missing_answer_times_out() {
        let fx = fixture();
        let listener = fx.listener;
        tokio::spawn(async move {
            let _ = listener.accept().await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let client = fx.client.with_response_timeout(Duration::from_millis(150));
        let err = client.send(GatewayCommand::MmRead(0)).await.unwrap_err();
        assert!(matches!(err, BbDevError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_missing_socket_is_socket_error() {
        let dir = tempfile::tempdir().unwrap();
        let client = GatewayClient::new(
            dir.path().join("absent.sock"),
            dir.path().join("main.log"),
            dir.path().join("response.log"),
        );
        let err = client.send(GatewayCommand::ClearLog).await.unwrap_err();
        assert!(matches!(err, BbDevError::Socket { .. }));
    }
}
