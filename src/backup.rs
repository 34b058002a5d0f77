//! Coordinator backup documents.
//!
//! A backup is a JSON object with three sections: `metadata` identifying
//! the format and its creator, `network` holding the logical network state
//! (identifiers, keys, children), and `nvram` holding the raw catalogued
//! item contents in hex. Documents round-trip byte-for-byte through
//! [`BackupDocument::to_json`] / [`BackupDocument::from_json`].

use crate::error::{Error, Result};
use crate::nvram::NvramSnapshot;
use crate::types::{Channels, Ieee, KeyData, Nwk, PanId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const BACKUP_FORMAT: &str = "znp-host/network-backup";
pub const BACKUP_VERSION: u32 = 1;

fn encode_hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02x}", b)).collect()
}

fn decode_hex(text: &str) -> Result<Vec<u8>> {
    if text.len() % 2 != 0 || !text.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::Backup(format!("Invalid hex string: {:?}", text)));
    }

    Ok((0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&text[i..i + 2], 16).unwrap())
        .collect())
}

/// Who and when produced a backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub format: String,
    pub version: u32,
    /// Producing software, e.g. `znp-host@0.3.0`
    pub source: String,
    /// RFC 3339 creation time
    pub timestamp: String,
}

impl BackupMetadata {
    pub fn new() -> Self {
        Self {
            format: BACKUP_FORMAT.to_string(),
            version: BACKUP_VERSION,
            source: format!("znp-host@{}", env!("CARGO_PKG_VERSION")),
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        }
    }
}

impl Default for BackupMetadata {
    fn default() -> Self {
        Self::new()
    }
}

/// A link key belonging to one child or neighbor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkKeyBackup {
    /// 32 hex characters
    pub key: String,
    pub tx_counter: u32,
    pub rx_counter: u32,
}

/// One device known to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildBackup {
    /// 16 hex characters, big-endian
    pub ieee: String,
    /// Short address; absent when only the key is known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nwk: Option<u16>,
    /// Whether the device is a direct child of the coordinator
    #[serde(default)]
    pub is_child: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_key: Option<LinkKeyBackup>,
}

/// The logical network state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkBackup {
    pub pan_id: u16,
    /// 16 hex characters, big-endian
    pub extended_pan_id: String,
    pub channel: u8,
    pub channel_mask: u32,
    pub nwk_update_id: u8,
    /// 32 hex characters
    pub network_key: String,
    pub key_sequence: u8,
    /// Outgoing network key frame counter at backup time
    #[serde(default)]
    pub frame_counter: u32,
    /// 32 hex characters
    pub tc_link_key: String,
    /// Trust center link key seed, present on Z-Stack 3 networks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tclk_seed: Option<String>,
    #[serde(default)]
    pub children: Vec<ChildBackup>,
}

/// The raw NVRAM section: hex values keyed by hex ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NvramBackup {
    /// `"0021" -> bytes` for legacy items
    #[serde(default)]
    pub legacy: BTreeMap<String, String>,
    /// `"01:0004:0000" -> bytes` for extended items
    #[serde(default)]
    pub extended: BTreeMap<String, String>,
}

/// A complete coordinator backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupDocument {
    pub metadata: BackupMetadata,
    pub network: NetworkBackup,
    pub nvram: NvramBackup,
}

impl BackupDocument {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let document: BackupDocument = serde_json::from_str(text)?;
        document.validate()?;
        Ok(document)
    }

    /// Schema checks beyond what serde enforces.
    pub fn validate(&self) -> Result<()> {
        if self.metadata.format != BACKUP_FORMAT {
            return Err(Error::Backup(format!(
                "Unknown backup format {:?}",
                self.metadata.format
            )));
        }

        if self.metadata.version != BACKUP_VERSION {
            return Err(Error::Backup(format!(
                "Unsupported backup version {}",
                self.metadata.version
            )));
        }

        self.network.extended_pan_id()?;
        self.network.network_key()?;
        self.network.tc_link_key()?;

        if !(11..=26).contains(&self.network.channel) {
            return Err(Error::Backup(format!(
                "Channel {} is not a 2.4 GHz channel",
                self.network.channel
            )));
        }

        for child in &self.network.children {
            parse_ieee(&child.ieee)?;
            if let Some(key) = &child.link_key {
                parse_key(&key.key)?;
            }
        }

        for key in self.nvram.legacy.keys() {
            u16::from_str_radix(key, 16)
                .map_err(|_| Error::Backup(format!("Invalid legacy NV id {:?}", key)))?;
        }

        for key in self.nvram.extended.keys() {
            parse_extended_key(key)?;
        }

        Ok(())
    }
}

impl NetworkBackup {
    pub fn pan(&self) -> PanId {
        PanId(self.pan_id)
    }

    pub fn extended_pan_id(&self) -> Result<Ieee> {
        parse_ieee(&self.extended_pan_id)
    }

    pub fn channel_mask(&self) -> Channels {
        Channels(self.channel_mask)
    }

    pub fn network_key(&self) -> Result<KeyData> {
        parse_key(&self.network_key)
    }

    pub fn tc_link_key(&self) -> Result<KeyData> {
        parse_key(&self.tc_link_key)
    }

    pub fn tclk_seed(&self) -> Result<Option<KeyData>> {
        self.tclk_seed.as_deref().map(parse_key).transpose()
    }
}

impl ChildBackup {
    pub fn ieee_addr(&self) -> Result<Ieee> {
        parse_ieee(&self.ieee)
    }

    pub fn nwk_addr(&self) -> Option<Nwk> {
        self.nwk.map(Nwk)
    }
}

pub fn format_ieee(ieee: Ieee) -> String {
    encode_hex(&ieee.0.to_be_bytes())
}

pub fn parse_ieee(text: &str) -> Result<Ieee> {
    let bytes = decode_hex(text)?;
    let bytes: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::Backup(format!("Invalid IEEE address {:?}", text)))?;
    Ok(Ieee(u64::from_be_bytes(bytes)))
}

pub fn format_key(key: KeyData) -> String {
    encode_hex(&key.0)
}

pub fn parse_key(text: &str) -> Result<KeyData> {
    let bytes = decode_hex(text)?;
    let bytes: [u8; 16] = bytes
        .try_into()
        .map_err(|_| Error::Backup(format!("Invalid key {:?}", text)))?;
    Ok(KeyData(bytes))
}

fn parse_extended_key(key: &str) -> Result<(u8, u16, u16)> {
    let parts: Vec<&str> = key.split(':').collect();
    let [sys_id, item_id, sub_id] = parts.as_slice() else {
        return Err(Error::Backup(format!("Invalid extended NV key {:?}", key)));
    };

    Ok((
        u8::from_str_radix(sys_id, 16)
            .map_err(|_| Error::Backup(format!("Invalid extended NV key {:?}", key)))?,
        u16::from_str_radix(item_id, 16)
            .map_err(|_| Error::Backup(format!("Invalid extended NV key {:?}", key)))?,
        u16::from_str_radix(sub_id, 16)
            .map_err(|_| Error::Backup(format!("Invalid extended NV key {:?}", key)))?,
    ))
}

impl NvramBackup {
    pub fn from_snapshot(snapshot: &NvramSnapshot) -> Self {
        let legacy = snapshot
            .legacy
            .iter()
            .map(|(id, value)| (format!("{:04x}", id), encode_hex(value)))
            .collect();

        let extended = snapshot
            .extended
            .iter()
            .map(|((sys_id, item_id, sub_id), value)| {
                (
                    format!("{:02x}:{:04x}:{:04x}", sys_id, item_id, sub_id),
                    encode_hex(value),
                )
            })
            .collect();

        Self { legacy, extended }
    }

    pub fn to_snapshot(&self) -> Result<NvramSnapshot> {
        let mut snapshot = NvramSnapshot::default();

        for (id, value) in &self.legacy {
            let id = u16::from_str_radix(id, 16)
                .map_err(|_| Error::Backup(format!("Invalid legacy NV id {:?}", id)))?;
            snapshot.legacy.insert(id, decode_hex(value)?);
        }

        for (key, value) in &self.extended {
            snapshot
                .extended
                .insert(parse_extended_key(key)?, decode_hex(value)?);
        }

        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_document() -> BackupDocument {
        BackupDocument {
            metadata: BackupMetadata {
                format: BACKUP_FORMAT.to_string(),
                version: BACKUP_VERSION,
                source: "znp-host@0.3.0".to_string(),
                timestamp: "2024-06-01T12:00:00Z".to_string(),
            },
            network: NetworkBackup {
                pan_id: 0xA162,
                extended_pan_id: "00124b0012345678".to_string(),
                channel: 15,
                channel_mask: Channels::from_channel(15).0,
                nwk_update_id: 0,
                network_key: "0102030405060708090a0b0c0d0e0f10".to_string(),
                key_sequence: 0,
                frame_counter: 12_500,
                tc_link_key: format_key(KeyData::default_tc_link_key()),
                tclk_seed: Some("ffeeddccbbaa99887766554433221100".to_string()),
                children: vec![ChildBackup {
                    ieee: "00124b0000aabbcc".to_string(),
                    nwk: Some(0x4522),
                    is_child: true,
                    link_key: Some(LinkKeyBackup {
                        key: "101112131415161718191a1b1c1d1e1f".to_string(),
                        tx_counter: 300,
                        rx_counter: 20,
                    }),
                }],
            },
            nvram: NvramBackup {
                legacy: BTreeMap::from([
                    ("0021".to_string(), "0005".to_string()),
                    ("0083".to_string(), "62a1".to_string()),
                ]),
                extended: BTreeMap::from([("01:0004:0000".to_string(), "deadbeef".to_string())]),
            },
        }
    }

    #[test]
    fn test_json_round_trip() {
        let document = sample_document();
        let json = document.to_json().unwrap();
        let parsed = BackupDocument::from_json(&json).unwrap();
        assert_eq!(parsed, document);

        // Round-trip stability: serialising again yields identical text
        assert_eq!(parsed.to_json().unwrap(), json);
    }

    #[test]
    fn test_rejects_foreign_format() {
        let mut document = sample_document();
        document.metadata.format = "somebody-else/backup".to_string();
        let json = serde_json::to_string(&document).unwrap();
        assert!(BackupDocument::from_json(&json).is_err());
    }

    #[test]
    fn test_rejects_bad_channel() {
        let mut document = sample_document();
        document.network.channel = 9;
        assert!(document.validate().is_err());
    }

    #[test]
    fn test_ieee_hex_round_trip() {
        let ieee = Ieee(0x00124B0012345678);
        assert_eq!(format_ieee(ieee), "00124b0012345678");
        assert_eq!(parse_ieee("00124b0012345678").unwrap(), ieee);
    }

    #[test]
    fn test_nvram_snapshot_round_trip() {
        let mut snapshot = NvramSnapshot::default();
        snapshot.legacy.insert(0x0021, vec![1, 2, 3]);
        snapshot.extended.insert((1, 4, 0), vec![0xAA]);

        let section = NvramBackup::from_snapshot(&snapshot);
        assert_eq!(section.legacy["0021"], "010203");
        assert_eq!(section.extended["01:0004:0000"], "aa");
        assert_eq!(section.to_snapshot().unwrap(), snapshot);
    }

    #[test]
    fn test_bad_hex_rejected() {
        assert!(decode_hex("zz").is_err());
        assert!(decode_hex("abc").is_err());
        assert!(parse_key("0102").is_err());
    }
}
