//! Security material stored on the coordinator: network frame counters,
//! the trust center link key seed, and the per-device link key tables.
//!
//! Z-Stack does not store most device link keys directly. Keys derived
//! from the TCLK seed are stored as a rotation count ("shift"): rotating
//! the seed left by the shift and XORing it with the device's IEEE address
//! repeated twice yields the key. Keys that do not match any rotation of
//! the seed live unhashed in the APS key-data table, referenced through
//! the APS link key table by address-manager index.
//!
//! Each storage generation keeps these tables in a different place:
//! Z-Stack 1.2 has only the network key item, 3.0 spreads tables across
//! legacy NV id ranges, and 3.30+ moved them into the extended store.

use crate::error::{Error, Result};
use crate::nvram::{items, ExNvId, Nvram, OsalNvId};
use crate::types::{
    AddrMgrEntry, AddrMgrUserType, ApsKeyDataEntry, ApsLinkKeyEntry, Ieee, KeyAttributes,
    KeyData, NvStruct, Nwk, NwkActiveKeyItems, NwkSecMaterialDesc, StructReader, TclkDevEntry,
    ZstackVersion, AUTHENTICATED_CBCK,
};

/// Frame counter headroom added when restoring a backup, covering frames
/// sent after the backup was taken.
pub const FRAME_COUNTER_INCREMENT: u32 = 2500;

/// A device link key with its frame counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredKey {
    pub key: KeyData,
    pub tx_counter: u32,
    pub rx_counter: u32,
}

/// A device record reconstructed from the coordinator's tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredDevice {
    pub ieee: Ieee,
    pub nwk: Nwk,
    pub is_child: bool,
    pub key: Option<StoredKey>,
}

fn rotate(data: &[u8; 16], shift: usize) -> [u8; 16] {
    let mut out = [0u8; 16];
    for (index, slot) in out.iter_mut().enumerate() {
        *slot = data[(index + shift) % 16];
    }
    out
}

/// Derive a device's link key from the TCLK seed and its stored shift.
pub fn compute_key(ieee: Ieee, tclk_seed: KeyData, shift: usize) -> KeyData {
    let rotated = rotate(&tclk_seed.0, shift);
    let ieee_bytes = ieee.to_bytes();

    let mut key = [0u8; 16];
    for (index, slot) in key.iter_mut().enumerate() {
        *slot = rotated[index] ^ ieee_bytes[index % 8];
    }
    KeyData(key)
}

/// Invert [`compute_key`]: recover the seed candidate for a known key.
pub fn compute_tclk_seed(ieee: Ieee, key: KeyData, shift: usize) -> KeyData {
    let ieee_bytes = ieee.to_bytes();

    let mut rotated = [0u8; 16];
    for (index, slot) in rotated.iter_mut().enumerate() {
        *slot = key.0[index] ^ ieee_bytes[index % 8];
    }
    KeyData(rotate(&rotated, 16 - shift % 16))
}

/// Find the seed rotation producing `key` for `ieee`, if there is one.
pub fn find_key_shift(ieee: Ieee, key: KeyData, tclk_seed: KeyData) -> Option<usize> {
    (0..16).find(|shift| compute_key(ieee, tclk_seed, *shift) == key)
}

fn count_seed_matches(keys: &[(Ieee, KeyData)], tclk_seed: KeyData) -> usize {
    keys.iter()
        .filter(|(ieee, key)| find_key_shift(*ieee, *key, tclk_seed).is_some())
        .count()
}

/// Pick the seed covering the most device keys, preferring the current one
/// on a tie so restores do not churn NVRAM.
pub fn find_optimal_tclk_seed(devices: &[StoredDevice], tclk_seed: KeyData) -> KeyData {
    let keys: Vec<(Ieee, KeyData)> = devices
        .iter()
        .filter_map(|d| d.key.map(|k| (d.ieee, k.key)))
        .collect();

    if keys.is_empty() {
        return tclk_seed;
    }

    let current_count = count_seed_matches(&keys, tclk_seed);

    let best = keys
        .iter()
        .map(|(ieee, key)| {
            let candidate = compute_tclk_seed(*ieee, *key, 0);
            (count_seed_matches(&keys, candidate), candidate)
        })
        .max_by_key(|(count, _)| *count);

    match best {
        Some((count, seed)) if count > current_count => seed,
        _ => tclk_seed,
    }
}

/// Read the trust center (network key) outgoing frame counter.
pub fn read_tc_frame_counter(
    nvram: &Nvram,
    version: ZstackVersion,
    aligned: bool,
    ext_pan_id: Ieee,
) -> Result<u32> {
    if version == ZstackVersion::Z1_2 {
        let raw = nvram.osal_read(OsalNvId::NWKKEY)?;
        let key_info = NwkActiveKeyItems::from_bytes(&raw, aligned)
            .map_err(|_| Error::NvramMismatch {
                item: OsalNvId::NWKKEY.to_string(),
            })?;
        return Ok(key_info.frame_counter);
    }

    let entries = if version.has_extended_nv() {
        nvram.ex_read_table(ExNvId::NWK_SEC_MATERIAL_TABLE)?
    } else {
        nvram.osal_read_table(items::LEGACY_NWK_SEC_MATERIAL_TABLE)?
    };

    let mut global_entry = None;

    for raw in &entries {
        let entry = NwkSecMaterialDesc::from_bytes(raw, aligned).map_err(|_| {
            Error::NvramMismatch {
                item: "NWK_SEC_MATERIAL_TABLE".to_string(),
            }
        })?;

        if entry.extended_pan_id == ext_pan_id {
            // Always prefer the entry for our own network
            return Ok(entry.frame_counter);
        } else if entry.extended_pan_id == Ieee::ALL_ONES {
            global_entry = Some(entry);
        }
    }

    global_entry
        .map(|entry| entry.frame_counter)
        .ok_or_else(|| Error::NvramMissing {
            item: "NWK_SEC_MATERIAL_TABLE".to_string(),
        })
}

/// Write the trust center frame counter for the given network.
pub fn write_tc_frame_counter(
    nvram: &Nvram,
    version: ZstackVersion,
    aligned: bool,
    counter: u32,
    ext_pan_id: Ieee,
) -> Result<()> {
    if version == ZstackVersion::Z1_2 {
        let raw = nvram.osal_read(OsalNvId::NWKKEY)?;
        let mut key_info = NwkActiveKeyItems::from_bytes(&raw, aligned)
            .map_err(|_| Error::NvramMismatch {
                item: OsalNvId::NWKKEY.to_string(),
            })?;
        key_info.frame_counter = counter;
        return nvram.osal_write(OsalNvId::NWKKEY, &key_info.to_bytes(aligned), false);
    }

    let entry = NwkSecMaterialDesc {
        frame_counter: counter,
        extended_pan_id: ext_pan_id,
    }
    .to_bytes(aligned);

    let fill = NwkSecMaterialDesc {
        frame_counter: 0,
        extended_pan_id: Ieee::ALL_ZEROES,
    }
    .to_bytes(aligned);

    // These tables are tiny, so they are rewritten whole
    if version.has_extended_nv() {
        nvram.ex_write_table(ExNvId::NWK_SEC_MATERIAL_TABLE, &[entry], &fill)
    } else {
        nvram.osal_write_table(items::LEGACY_NWK_SEC_MATERIAL_TABLE, &[entry], &fill)
    }
}

/// Read every address-manager entry, across both storage layouts.
pub fn read_addr_mgr_entries(
    nvram: &Nvram,
    version: ZstackVersion,
    aligned: bool,
) -> Result<Vec<AddrMgrEntry>> {
    if version.has_extended_nv() {
        let mut entries = Vec::new();
        for raw in nvram.ex_read_table(ExNvId::ADDRMGR)? {
            entries.push(AddrMgrEntry::from_bytes(&raw, aligned).map_err(|_| {
                Error::NvramMismatch {
                    item: "ADDRMGR".to_string(),
                }
            })?);
        }
        Ok(entries)
    } else {
        // One array-valued NV item on older firmware
        let raw = nvram.osal_read(OsalNvId::ADDRMGR)?;
        Ok(AddrMgrEntry::read_table(&raw, aligned))
    }
}

fn read_tclk_entries(
    nvram: &Nvram,
    version: ZstackVersion,
    aligned: bool,
) -> Result<Vec<TclkDevEntry>> {
    let raws = if version.has_extended_nv() {
        nvram.ex_read_table(ExNvId::TCLK_TABLE)?
    } else {
        nvram.osal_read_table(items::LEGACY_TCLK_TABLE)?
    };

    raws.iter()
        .map(|raw| {
            TclkDevEntry::from_bytes(raw, aligned).map_err(|_| Error::NvramMismatch {
                item: "TCLK_TABLE".to_string(),
            })
        })
        .collect()
}

fn read_aps_key_data_entries(
    nvram: &Nvram,
    version: ZstackVersion,
    aligned: bool,
) -> Result<Vec<ApsKeyDataEntry>> {
    let raws = if version.has_extended_nv() {
        nvram.ex_read_table(ExNvId::APS_KEY_DATA_TABLE)?
    } else {
        nvram.osal_read_table(items::LEGACY_APS_KEY_DATA_TABLE)?
    };

    raws.iter()
        .map(|raw| {
            ApsKeyDataEntry::from_bytes(raw, aligned).map_err(|_| Error::NvramMismatch {
                item: "APS_KEY_DATA_TABLE".to_string(),
            })
        })
        .collect()
}

/// Parse the APS link key table: a u16 entry count followed by entries,
/// with uninitialised slack at the end.
fn parse_aps_link_key_table(raw: &[u8], aligned: bool) -> Result<Vec<ApsLinkKeyEntry>> {
    if raw.len() < 2 {
        return Ok(Vec::new());
    }

    let count = u16::from_le_bytes([raw[0], raw[1]]) as usize;
    let mut reader = StructReader::new(&raw[2..], aligned);
    let mut entries = Vec::with_capacity(count);

    for _ in 0..count {
        entries.push(
            ApsLinkKeyEntry::read(&mut reader).map_err(|_| Error::NvramMismatch {
                item: OsalNvId::APS_LINK_KEY_TABLE.to_string(),
            })?,
        );
    }

    Ok(entries)
}

fn serialize_aps_link_key_table(entries: &[ApsLinkKeyEntry], aligned: bool) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    for entry in entries {
        out.extend_from_slice(&entry.to_bytes(aligned));
    }
    out
}

/// Reconstruct every known device with its link key, if any.
pub fn read_devices(
    nvram: &Nvram,
    version: ZstackVersion,
    aligned: bool,
) -> Result<Vec<StoredDevice>> {
    let tclk_seed = if version.is_zstack3() {
        let raw = nvram.osal_read(OsalNvId::TCLK_SEED)?;
        KeyData(raw.try_into().map_err(|_| Error::NvramMismatch {
            item: OsalNvId::TCLK_SEED.to_string(),
        })?)
    } else {
        KeyData::EMPTY
    };

    let addr_mgr = read_addr_mgr_entries(nvram, version, aligned)?;
    let mut devices: Vec<StoredDevice> = Vec::new();

    for entry in &addr_mgr {
        if entry.is_empty() || entry.user_type == AddrMgrUserType::DEFAULT {
            continue;
        }

        devices.push(StoredDevice {
            ieee: entry.ext_addr,
            nwk: entry.nwk_addr,
            is_child: entry.user_type.contains(AddrMgrUserType::ASSOC),
            key: None,
        });
    }

    if version == ZstackVersion::Z1_2 {
        return Ok(devices);
    }

    // Hashed keys: derived from the seed by the stored shift
    for entry in read_tclk_entries(nvram, version, aligned)? {
        if entry.ext_addr == Ieee::ALL_ZEROES {
            continue;
        }

        let key = StoredKey {
            key: compute_key(entry.ext_addr, tclk_seed, entry.seed_shift_ic_index as usize),
            tx_counter: entry.tx_frame_counter,
            rx_counter: entry.rx_frame_counter,
        };

        match devices.iter_mut().find(|d| d.ieee == entry.ext_addr) {
            Some(device) => device.key = Some(key),
            None => log::warn!(
                "Skipping hashed link key for unknown device {}",
                entry.ext_addr
            ),
        }
    }

    // Unhashed keys: stored verbatim, linked through the APS link key table
    let aps_key_data = read_aps_key_data_entries(nvram, version, aligned)?;
    let link_key_table_raw = match nvram.osal_read(OsalNvId::APS_LINK_KEY_TABLE) {
        Ok(raw) => raw,
        Err(Error::NvramMissing { .. }) => return Ok(devices),
        Err(e) => return Err(e),
    };

    let offset_base = if version.has_extended_nv() {
        0x0000
    } else {
        items::LEGACY_APS_KEY_DATA_TABLE.start.0
    };

    for entry in parse_aps_link_key_table(&link_key_table_raw, aligned)? {
        if entry.authentication_state != AUTHENTICATED_CBCK {
            continue;
        }

        let Some(key_index) = entry.link_key_nv_id.checked_sub(offset_base) else {
            log::warn!("APS link key table entry has an out-of-range NV id");
            continue;
        };
        let addr_index = entry.address_manager_index as usize;

        let (Some(key_entry), Some(addr_entry)) = (
            aps_key_data.get(key_index as usize),
            addr_mgr.get(addr_index),
        ) else {
            log::warn!("APS link key table entry points outside its tables");
            continue;
        };

        let key = StoredKey {
            key: key_entry.key,
            tx_counter: key_entry.tx_frame_counter,
            rx_counter: key_entry.rx_frame_counter,
        };

        match devices.iter_mut().find(|d| d.ieee == addr_entry.ext_addr) {
            Some(device) => device.key = Some(key),
            None => log::warn!(
                "Skipping unhashed link key for unknown device {}",
                addr_entry.ext_addr
            ),
        }
    }

    Ok(devices)
}

/// Write the address manager entries for a device set.
fn write_addr_mgr_entries(
    nvram: &Nvram,
    version: ZstackVersion,
    aligned: bool,
    devices: &[StoredDevice],
) -> Result<()> {
    let entries: Vec<AddrMgrEntry> = devices
        .iter()
        .map(|dev| {
            let mut user_type = AddrMgrUserType::DEFAULT;
            if dev.key.is_some() {
                user_type = user_type | AddrMgrUserType::SECURITY;
            }
            if dev.is_child {
                user_type = user_type | AddrMgrUserType::ASSOC;
            }

            AddrMgrEntry {
                user_type,
                nwk_addr: dev.nwk,
                ext_addr: dev.ieee,
            }
        })
        .collect();

    let fill = AddrMgrEntry::empty();

    if version.has_extended_nv() {
        let raw_entries: Vec<Vec<u8>> = entries.iter().map(|e| e.to_bytes(aligned)).collect();
        return nvram.ex_write_table(ExNvId::ADDRMGR, &raw_entries, &fill.to_bytes(aligned));
    }

    // Older firmware stores the whole table as one fixed-capacity array
    let raw = nvram.osal_read(OsalNvId::ADDRMGR)?;
    let capacity = AddrMgrEntry::read_table(&raw, aligned).len();

    if entries.len() > capacity {
        return Err(Error::Backup(format!(
            "Address manager only holds {} entries, backup has {}",
            capacity,
            entries.len()
        )));
    }

    let mut table = Vec::new();
    for index in 0..capacity {
        let entry = entries.get(index).unwrap_or(&fill);
        table.extend_from_slice(&entry.to_bytes(aligned));
    }

    nvram.osal_write(OsalNvId::ADDRMGR, &table, false)
}

/// Write a device set (children and link keys) back to the coordinator.
///
/// Frame counters are advanced by `counter_increment` to stay ahead of any
/// frames sent after the backup was taken. Returns the TCLK seed actually
/// in use, which may differ from the provided one if another seed covers
/// more of the device keys.
pub fn write_devices(
    nvram: &Nvram,
    version: ZstackVersion,
    aligned: bool,
    devices: &[StoredDevice],
    tclk_seed: KeyData,
    counter_increment: u32,
) -> Result<KeyData> {
    let tclk_seed = find_optimal_tclk_seed(devices, tclk_seed);

    let mut hashed = Vec::new();
    let mut aps_key_data = Vec::new();
    let mut link_key_entries = Vec::new();

    for (index, dev) in devices.iter().enumerate() {
        let Some(key) = dev.key else {
            continue;
        };

        match find_key_shift(dev.ieee, key.key, tclk_seed) {
            Some(shift) => {
                hashed.push(TclkDevEntry {
                    tx_frame_counter: key.tx_counter + counter_increment,
                    rx_frame_counter: key.rx_counter,
                    ext_addr: dev.ieee,
                    key_attributes: KeyAttributes::Verified,
                    key_type: 0,
                    seed_shift_ic_index: shift as u8,
                });
            }
            None => {
                let offset_base = if version.has_extended_nv() {
                    0x0000
                } else {
                    items::LEGACY_APS_KEY_DATA_TABLE.start.0
                };

                aps_key_data.push(ApsKeyDataEntry {
                    key: key.key,
                    tx_frame_counter: key.tx_counter + counter_increment,
                    rx_frame_counter: key.rx_counter,
                });

                link_key_entries.push(ApsLinkKeyEntry {
                    address_manager_index: index as u16,
                    link_key_nv_id: offset_base + (aps_key_data.len() as u16 - 1),
                    authentication_state: AUTHENTICATED_CBCK,
                });
            }
        }
    }

    // The link key table has a compile-time capacity; preserve its size
    let old_link_key_table = match nvram.osal_read(OsalNvId::APS_LINK_KEY_TABLE) {
        Ok(raw) => Some(raw),
        Err(Error::NvramMissing { .. }) => None,
        Err(e) => return Err(e),
    };

    write_addr_mgr_entries(nvram, version, aligned, devices)?;

    let Some(old_table) = old_link_key_table else {
        return Ok(tclk_seed);
    };

    let mut new_table = serialize_aps_link_key_table(&link_key_entries, aligned);
    if new_table.len() > old_table.len() {
        return Err(Error::Backup(
            "APS link key table is larger than the firmware's capacity".to_string(),
        ));
    }
    new_table.resize(old_table.len(), 0x00);
    nvram.osal_write(OsalNvId::APS_LINK_KEY_TABLE, &new_table, false)?;

    let tclk_fill = TclkDevEntry {
        tx_frame_counter: 0,
        rx_frame_counter: 0,
        ext_addr: Ieee::ALL_ZEROES,
        key_attributes: KeyAttributes::DefaultKey,
        key_type: 0,
        seed_shift_ic_index: 0,
    }
    .to_bytes(aligned);

    let aps_fill = ApsKeyDataEntry {
        key: KeyData::EMPTY,
        tx_frame_counter: 0,
        rx_frame_counter: 0,
    }
    .to_bytes(aligned);

    let hashed_raw: Vec<Vec<u8>> = hashed.iter().map(|e| e.to_bytes(aligned)).collect();
    let aps_raw: Vec<Vec<u8>> = aps_key_data.iter().map(|e| e.to_bytes(aligned)).collect();

    if version.has_extended_nv() {
        nvram.ex_write_table(ExNvId::TCLK_TABLE, &hashed_raw, &tclk_fill)?;
        nvram.ex_write_table(ExNvId::APS_KEY_DATA_TABLE, &aps_raw, &aps_fill)?;
    } else {
        nvram.osal_write_table(items::LEGACY_TCLK_TABLE, &hashed_raw, &tclk_fill)?;
        nvram.osal_write_table(items::LEGACY_APS_KEY_DATA_TABLE, &aps_raw, &aps_fill)?;
    }

    Ok(tclk_seed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed() -> KeyData {
        KeyData([
            0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB, 0xCC,
            0xDD, 0xEE, 0xFF,
        ])
    }

    #[test]
    fn test_key_derivation_round_trip() {
        let ieee = Ieee(0x00124B0011223344);

        for shift in 0..16 {
            let key = compute_key(ieee, seed(), shift);
            assert_eq!(find_key_shift(ieee, key, seed()), Some(shift));

            // The recovered seed candidate derives the same key
            let candidate = compute_tclk_seed(ieee, key, shift);
            assert_eq!(compute_key(ieee, candidate, shift), key);
        }
    }

    #[test]
    fn test_unrelated_key_has_no_shift() {
        let ieee = Ieee(0x00124B0011223344);
        assert_eq!(find_key_shift(ieee, KeyData([0x5A; 16]), seed()), None);
    }

    #[test]
    fn test_optimal_seed_prefers_majority() {
        let ieee_a = Ieee(0xAAAA);
        let ieee_b = Ieee(0xBBBB);
        let other_seed = KeyData([0x77; 16]);

        let devices = vec![
            StoredDevice {
                ieee: ieee_a,
                nwk: Nwk(1),
                is_child: true,
                key: Some(StoredKey {
                    key: compute_key(ieee_a, other_seed, 3),
                    tx_counter: 0,
                    rx_counter: 0,
                }),
            },
            StoredDevice {
                ieee: ieee_b,
                nwk: Nwk(2),
                is_child: true,
                key: Some(StoredKey {
                    key: compute_key(ieee_b, other_seed, 9),
                    tx_counter: 0,
                    rx_counter: 0,
                }),
            },
        ];

        let chosen = find_optimal_tclk_seed(&devices, seed());
        // Both keys derive from rotations of `other_seed`, so any rotation
        // of it must win over the unrelated current seed
        assert_eq!(count_seed_matches(
            &devices
                .iter()
                .map(|d| (d.ieee, d.key.unwrap().key))
                .collect::<Vec<_>>(),
            chosen
        ), 2);
    }

    #[test]
    fn test_optimal_seed_keeps_current_on_tie() {
        let ieee = Ieee(0xCCCC);
        let devices = vec![StoredDevice {
            ieee,
            nwk: Nwk(3),
            is_child: false,
            key: Some(StoredKey {
                key: compute_key(ieee, seed(), 0),
                tx_counter: 0,
                rx_counter: 0,
            }),
        }];

        assert_eq!(find_optimal_tclk_seed(&devices, seed()), seed());
    }

    #[test]
    fn test_aps_link_key_table_round_trip() {
        let entries = vec![
            ApsLinkKeyEntry {
                address_manager_index: 2,
                link_key_nv_id: 0x0201,
                authentication_state: AUTHENTICATED_CBCK,
            },
            ApsLinkKeyEntry {
                address_manager_index: 5,
                link_key_nv_id: 0x0202,
                authentication_state: AUTHENTICATED_CBCK,
            },
        ];

        for aligned in [false, true] {
            let mut raw = serialize_aps_link_key_table(&entries, aligned);
            raw.extend_from_slice(&[0x00; 7]); // firmware slack
            assert_eq!(parse_aps_link_key_table(&raw, aligned).unwrap(), entries);
        }
    }
}
