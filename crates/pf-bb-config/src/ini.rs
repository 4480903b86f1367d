//! pf_bb_config INI rendering
//!
//! Produces the configuration file `pf_bb_config <device> -c <file>` reads.
//! Section and key names are fixed by the tool's parser.

use crds::{CardConfig, N3000BBDevConfig, QueueGroupConfig, UplinkDownlink};
use std::fmt::Write as _;
use std::path::Path;

use crate::error::BbDevError;

fn section(out: &mut String, name: &str, entries: &[(&str, String)]) {
    if !out.is_empty() && !out.ends_with("\n\n") {
        out.push('\n');
    }
    let _ = writeln!(out, "[{name}]");
    for (key, value) in entries {
        let _ = writeln!(out, "{key} = {value}");
    }
}

fn flag(value: bool) -> String {
    if value { "1" } else { "0" }.to_string()
}

fn queue_group(out: &mut String, name: &str, group: &QueueGroupConfig) {
    section(
        out,
        name,
        &[
            ("num_qgroups", group.num_queue_groups.to_string()),
            ("num_aqs_per_groups", group.num_aqs_per_groups.to_string()),
            ("aq_depth_log2", group.aq_depth_log2.to_string()),
        ],
    );
}

fn link(out: &mut String, name: &str, link: &UplinkDownlink) {
    let vfqmap = link
        .queues
        .as_array()
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",");
    section(
        out,
        name,
        &[
            ("bandwidth", link.bandwidth.to_string()),
            ("load_balance", link.load_balance.to_string()),
            ("vfqmap", vfqmap),
        ],
    );
}

fn render_n3000(config: &N3000BBDevConfig) -> String {
    let mut out = String::new();
    section(&mut out, "MODE", &[("pf_mode_en", flag(config.pf_mode))]);
    link(&mut out, "UL", &config.uplink);
    link(&mut out, "DL", &config.downlink);
    section(&mut out, "FLR", &[("flr_time_out", config.flr_timeout.to_string())]);
    out
}

fn render_queue_card(card: &CardConfig<'_>, max_queue_size: u32, wrap_default: bool) -> String {
    let mut out = String::new();
    section(&mut out, "MODE", &[("pf_mode_en", flag(card.pf_mode()))]);
    section(
        &mut out,
        "VFBUNDLES",
        &[("num_vf_bundles", card.num_vf_bundles().unwrap_or_default().to_string())],
    );
    section(&mut out, "MAXQSIZE", &[("max_queue_size", max_queue_size.to_string())]);
    for (name, group) in card.queue_groups() {
        queue_group(&mut out, name, group);
    }
    if wrap_default {
        format!("[DEFAULT]\n{out}")
    } else {
        out
    }
}

/// INI text for the populated bbDevConfig arm
pub fn render_ini(card: &CardConfig<'_>) -> String {
    match card {
        CardConfig::N3000(config) => render_n3000(config),
        CardConfig::Acc100(config) => render_queue_card(card, config.max_queue_size, false),
        CardConfig::Acc200(config) | CardConfig::Vrb1(config) => {
            render_queue_card(card, config.max_queue_size, true)
        }
        CardConfig::Vrb2(config) => render_queue_card(card, config.max_queue_size, true),
    }
}

/// Render and write the INI file, replacing any previous one
pub async fn write_ini(path: &Path, card: &CardConfig<'_>) -> Result<(), BbDevError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| BbDevError::io(parent, e))?;
    }
    tokio::fs::write(path, render_ini(card))
        .await
        .map_err(|e| BbDevError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{ACC100BBDevConfig, UplinkDownlinkQueues, VRB2BBDevConfig};

    fn qg(n: u32) -> QueueGroupConfig {
        QueueGroupConfig {
            num_queue_groups: n,
            num_aqs_per_groups: 16,
            aq_depth_log2: 4,
        }
    }

    #[test]
    fn test_acc100_ini() {
        let config = ACC100BBDevConfig {
            pf_mode: false,
            num_vf_bundles: 16,
            max_queue_size: 1024,
            uplink4g: qg(0),
            downlink4g: qg(0),
            uplink5g: qg(4),
            downlink5g: qg(4),
        };
        let expected = "\
[MODE]
pf_mode_en = 0

[VFBUNDLES]
num_vf_bundles = 16

[MAXQSIZE]
max_queue_size = 1024

[QUL4G]
num_qgroups = 0
num_aqs_per_groups = 16
aq_depth_log2 = 4

[QDL4G]
num_qgroups = 0
num_aqs_per_groups = 16
aq_depth_log2 = 4

[QUL5G]
num_qgroups = 4
num_aqs_per_groups = 16
aq_depth_log2 = 4

[QDL5G]
num_qgroups = 4
num_aqs_per_groups = 16
aq_depth_log2 = 4
";
        assert_eq!(render_ini(&CardConfig::Acc100(&config)), expected);
    }

    #[test]
    fn test_n3000_ini() {
        let config = N3000BBDevConfig {
            network_type: "FPGA_5GNR".to_string(),
            pf_mode: true,
            flr_timeout: 610,
            uplink: UplinkDownlink {
                bandwidth: 3,
                load_balance: 128,
                queues: UplinkDownlinkQueues {
                    vf0: 16,
                    vf1: 16,
                    ..Default::default()
                },
            },
            downlink: UplinkDownlink {
                bandwidth: 3,
                load_balance: 128,
                queues: UplinkDownlinkQueues {
                    vf0: 16,
                    vf7: 16,
                    ..Default::default()
                },
            },
        };
        let expected = "\
[MODE]
pf_mode_en = 1

[UL]
bandwidth = 3
load_balance = 128
vfqmap = 16,16,0,0,0,0,0,0

[DL]
bandwidth = 3
load_balance = 128
vfqmap = 16,0,0,0,0,0,0,16

[FLR]
flr_time_out = 610
";
        assert_eq!(render_ini(&CardConfig::N3000(&config)), expected);
    }

    #[test]
    fn test_vrb2_ini_has_default_header_and_extra_groups() {
        let config = VRB2BBDevConfig {
            num_vf_bundles: 2,
            max_queue_size: 1024,
            qfft: qg(2),
            qmld: qg(1),
            ..Default::default()
        };
        let ini = render_ini(&CardConfig::Vrb2(&config));
        assert!(ini.starts_with("[DEFAULT]\n[MODE]\npf_mode_en = 0\n"));
        let sections: Vec<_> = ini.lines().filter(|l| l.starts_with('[')).collect();
        assert_eq!(
            sections,
            vec![
                "[DEFAULT]", "[MODE]", "[VFBUNDLES]", "[MAXQSIZE]", "[QUL4G]", "[QDL4G]",
                "[QUL5G]", "[QDL5G]", "[QFFT]", "[QMLD]"
            ]
        );
    }

    #[tokio::test]
    async fn test_write_ini_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("configs/0000:14:00.1.ini");
        let config = ACC100BBDevConfig::default();
        write_ini(&path, &CardConfig::Acc100(&config)).await.unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("[MODE]"));
    }
}
