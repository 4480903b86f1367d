//! Baseband device configuration
//!
//! Per-card-model queue configuration handed to `pf_bb_config`. The CRDs carry
//! one optional field per card model; exactly one of them may be populated, and
//! [`BBDevConfigSet::card`] resolves the populated arm into a [`CardConfig`]
//! that the INI renderer and the admission rules dispatch on.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CrdError;

/// Queue-group layout for one operation type (4G/5G uplink/downlink, FFT, MLD)
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct QueueGroupConfig {
    /// Number of queue groups
    pub num_queue_groups: u32,

    /// Number of atomic queues per group
    pub num_aqs_per_groups: u32,

    /// Queue depth as log2
    pub aq_depth_log2: u32,
}

/// Per-VF queue counts of an N3000 link (`vf0` .. `vf7`)
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub struct UplinkDownlinkQueues {
    #[serde(default)]
    pub vf0: u32,
    #[serde(default)]
    pub vf1: u32,
    #[serde(default)]
    pub vf2: u32,
    #[serde(default)]
    pub vf3: u32,
    #[serde(default)]
    pub vf4: u32,
    #[serde(default)]
    pub vf5: u32,
    #[serde(default)]
    pub vf6: u32,
    #[serde(default)]
    pub vf7: u32,
}

impl UplinkDownlinkQueues {
    pub fn as_array(&self) -> [u32; 8] {
        [
            self.vf0, self.vf1, self.vf2, self.vf3, self.vf4, self.vf5, self.vf6, self.vf7,
        ]
    }

    pub fn total(&self) -> u64 {
        self.as_array().iter().map(|q| u64::from(*q)).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct UplinkDownlink {
    pub bandwidth: u32,
    pub load_balance: u32,
    pub queues: UplinkDownlinkQueues,
}

/// N3000 (FPGA 5GNR) configuration
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct N3000BBDevConfig {
    /// FEC network type; informational, "FPGA_5GNR" and "FPGA_LTE" are recognized
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub network_type: String,

    #[serde(default)]
    pub pf_mode: bool,

    pub flr_timeout: u32,

    pub downlink: UplinkDownlink,

    pub uplink: UplinkDownlink,
}

/// ACC100 configuration
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ACC100BBDevConfig {
    #[serde(default)]
    pub pf_mode: bool,

    pub num_vf_bundles: u32,

    pub max_queue_size: u32,

    #[serde(rename = "uplink4G")]
    pub uplink4g: QueueGroupConfig,

    #[serde(rename = "downlink4G")]
    pub downlink4g: QueueGroupConfig,

    #[serde(rename = "uplink5G")]
    pub uplink5g: QueueGroupConfig,

    #[serde(rename = "downlink5G")]
    pub downlink5g: QueueGroupConfig,
}

/// Location and SHA-1 of a custom FFT lookup-table tarball
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct FftLutParam {
    /// HTTPS URL of a `.tar.gz` holding the table
    pub fft_url: String,

    /// Hex encoded SHA-1 of the tarball
    pub fft_checksum: String,
}

/// ACC200 configuration (same layout as VRB1)
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ACC200BBDevConfig {
    #[serde(default)]
    pub pf_mode: bool,

    pub num_vf_bundles: u32,

    pub max_queue_size: u32,

    #[serde(rename = "uplink4G")]
    pub uplink4g: QueueGroupConfig,

    #[serde(rename = "downlink4G")]
    pub downlink4g: QueueGroupConfig,

    #[serde(rename = "uplink5G")]
    pub uplink5g: QueueGroupConfig,

    #[serde(rename = "downlink5G")]
    pub downlink5g: QueueGroupConfig,

    pub qfft: QueueGroupConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fft_lut: Option<FftLutParam>,
}

/// VRB1 configuration
pub type VRB1BBDevConfig = ACC200BBDevConfig;

/// VRB2 configuration
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct VRB2BBDevConfig {
    #[serde(default)]
    pub pf_mode: bool,

    pub num_vf_bundles: u32,

    pub max_queue_size: u32,

    #[serde(rename = "uplink4G")]
    pub uplink4g: QueueGroupConfig,

    #[serde(rename = "downlink4G")]
    pub downlink4g: QueueGroupConfig,

    #[serde(rename = "uplink5G")]
    pub uplink5g: QueueGroupConfig,

    #[serde(rename = "downlink5G")]
    pub downlink5g: QueueGroupConfig,

    pub qfft: QueueGroupConfig,

    pub qmld: QueueGroupConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fft_lut: Option<FftLutParam>,
}

/// Card models recognized by the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CardModel {
    N3000,
    Acc100,
    /// ACC200 and VRB1 share hardware and limits
    Acc200,
    Vrb2,
}

impl CardModel {
    /// Upper bound on the summed queue groups (N3000: queues per link)
    pub fn queue_cap(self) -> u64 {
        match self {
            CardModel::N3000 => 32,
            CardModel::Acc100 => 8,
            CardModel::Acc200 => 16,
            CardModel::Vrb2 => 32,
        }
    }

    /// Whether `pf_bb_config` needs an FFT lookup table for this model
    pub fn needs_fft(self) -> bool {
        matches!(self, CardModel::Acc200 | CardModel::Vrb2)
    }
}

impl fmt::Display for CardModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CardModel::N3000 => "N3000",
            CardModel::Acc100 => "ACC100",
            CardModel::Acc200 => "ACC200/VRB1",
            CardModel::Vrb2 => "VRB2",
        };
        f.write_str(name)
    }
}

/// The populated arm of a bbDevConfig
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardConfig<'a> {
    N3000(&'a N3000BBDevConfig),
    Acc100(&'a ACC100BBDevConfig),
    Acc200(&'a ACC200BBDevConfig),
    Vrb1(&'a VRB1BBDevConfig),
    Vrb2(&'a VRB2BBDevConfig),
}

impl<'a> CardConfig<'a> {
    pub fn model(&self) -> CardModel {
        match self {
            CardConfig::N3000(_) => CardModel::N3000,
            CardConfig::Acc100(_) => CardModel::Acc100,
            CardConfig::Acc200(_) | CardConfig::Vrb1(_) => CardModel::Acc200,
            CardConfig::Vrb2(_) => CardModel::Vrb2,
        }
    }

    /// Device name argument passed to `pf_bb_config`
    pub fn device_name(&self) -> &'static str {
        match self {
            CardConfig::N3000(_) => "FPGA_5GNR",
            CardConfig::Acc100(_) => "ACC100",
            CardConfig::Acc200(_) => "ACC200",
            CardConfig::Vrb1(_) => "VRB1",
            CardConfig::Vrb2(_) => "VRB2",
        }
    }

    pub fn pf_mode(&self) -> bool {
        match self {
            CardConfig::N3000(c) => c.pf_mode,
            CardConfig::Acc100(c) => c.pf_mode,
            CardConfig::Acc200(c) | CardConfig::Vrb1(c) => c.pf_mode,
            CardConfig::Vrb2(c) => c.pf_mode,
        }
    }

    /// `numVfBundles`, absent for N3000
    pub fn num_vf_bundles(&self) -> Option<u32> {
        match self {
            CardConfig::N3000(_) => None,
            CardConfig::Acc100(c) => Some(c.num_vf_bundles),
            CardConfig::Acc200(c) | CardConfig::Vrb1(c) => Some(c.num_vf_bundles),
            CardConfig::Vrb2(c) => Some(c.num_vf_bundles),
        }
    }

    /// Queue-group configs by INI section name, in rendering order
    pub fn queue_groups(&self) -> Vec<(&'static str, &'a QueueGroupConfig)> {
        match *self {
            CardConfig::N3000(_) => Vec::new(),
            CardConfig::Acc100(c) => vec![
                ("QUL4G", &c.uplink4g),
                ("QDL4G", &c.downlink4g),
                ("QUL5G", &c.uplink5g),
                ("QDL5G", &c.downlink5g),
            ],
            CardConfig::Acc200(c) | CardConfig::Vrb1(c) => vec![
                ("QUL4G", &c.uplink4g),
                ("QDL4G", &c.downlink4g),
                ("QUL5G", &c.uplink5g),
                ("QDL5G", &c.downlink5g),
                ("QFFT", &c.qfft),
            ],
            CardConfig::Vrb2(c) => vec![
                ("QUL4G", &c.uplink4g),
                ("QDL4G", &c.downlink4g),
                ("QUL5G", &c.uplink5g),
                ("QDL5G", &c.downlink5g),
                ("QFFT", &c.qfft),
                ("QMLD", &c.qmld),
            ],
        }
    }

    pub fn fft_lut(&self) -> Option<&'a FftLutParam> {
        match *self {
            CardConfig::Acc200(c) | CardConfig::Vrb1(c) => c.fft_lut.as_ref(),
            CardConfig::Vrb2(c) => c.fft_lut.as_ref(),
            _ => None,
        }
    }

    pub fn needs_fft(&self) -> bool {
        self.model().needs_fft()
    }
}

/// A family's bbDevConfig union
pub trait BBDevConfigSet {
    /// Resolve the populated arm
    ///
    /// Returns `Ok(None)` when nothing is populated and an error when more
    /// than one arm is.
    fn card(&self) -> Result<Option<CardConfig<'_>>, CrdError>;
}

fn single_arm<'a>(arms: Vec<(&'static str, Option<CardConfig<'a>>)>) -> Result<Option<CardConfig<'a>>, CrdError> {
    let populated: Vec<_> = arms
        .into_iter()
        .filter_map(|(name, arm)| arm.map(|card| (name, card)))
        .collect();

    match populated.as_slice() {
        [] => Ok(None),
        [(_, card)] => Ok(Some(*card)),
        many => Err(CrdError::MultipleBbDevConfigs(
            many.iter()
                .map(|(name, _)| *name)
                .collect::<Vec<_>>()
                .join(", "),
        )),
    }
}

/// bbDevConfig of the sriovfec family
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct FecBBDevConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n3000: Option<N3000BBDevConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acc100: Option<ACC100BBDevConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acc200: Option<ACC200BBDevConfig>,
}

impl BBDevConfigSet for FecBBDevConfig {
    fn card(&self) -> Result<Option<CardConfig<'_>>, CrdError> {
        single_arm(vec![
            ("n3000", self.n3000.as_ref().map(CardConfig::N3000)),
            ("acc100", self.acc100.as_ref().map(CardConfig::Acc100)),
            ("acc200", self.acc200.as_ref().map(CardConfig::Acc200)),
        ])
    }
}

/// bbDevConfig of the sriovvrb family
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct VrbBBDevConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vrb1: Option<VRB1BBDevConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vrb2: Option<VRB2BBDevConfig>,
}

impl BBDevConfigSet for VrbBBDevConfig {
    fn card(&self) -> Result<Option<CardConfig<'_>>, CrdError> {
        single_arm(vec![
            ("vrb1", self.vrb1.as_ref().map(CardConfig::Vrb1)),
            ("vrb2", self.vrb2.as_ref().map(CardConfig::Vrb2)),
        ])
    }
}
