//! NVRAM manager
//!
//! Reads and writes every firmware-known persistent item across the two
//! OSAL storage layouts: the legacy id space (`SYS.OSALNV*`) shared by all
//! Z-Stack versions, and the extended `(system, item, sub)` store
//! (`SYS.NV*`) introduced with Z-Stack 3.30.
//!
//! Items larger than one frame are chunked at 244 bytes, the biggest value
//! that fits a single NV write request. Writes recreate items whose stored
//! length differs and are idempotent under retries.
//!
//! Multi-step operations (backup, restore, table rewrites, resets) hold an
//! exclusive lease so concurrent writers cannot corrupt the iteration.

pub mod items;

pub use items::{ExNvId, LegacyTable, NvSysId, OsalNvId};

use crate::bus::MtBus;
use crate::commands::{sapi, sys, MtCommand};
use crate::error::{ensure_success, Error, Result};
use crate::types::{Capabilities, LongBytes, ShortBytes, Status};
use parking_lot::{Mutex, MutexGuard};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Largest value chunk in a single NV read or write request.
const CHUNK_SIZE: usize = 244;

/// Raw contents of the catalogued NV items, keyed for stable iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NvramSnapshot {
    /// Legacy items by id
    pub legacy: BTreeMap<u16, Vec<u8>>,
    /// Extended items by `(sys_id, item_id, sub_id)`
    pub extended: BTreeMap<(u8, u16, u16), Vec<u8>>,
}

/// How much state a reset clears.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetDepth {
    /// Clear the network-forming items so the next start forms fresh
    NetworkOnly,
    /// Delete every catalogued item
    Factory,
}

pub struct Nvram {
    bus: Arc<MtBus>,
    lease: Mutex<()>,
    capabilities: Capabilities,
}

impl Nvram {
    pub fn new(bus: Arc<MtBus>, capabilities: Capabilities) -> Self {
        Self {
            bus,
            lease: Mutex::new(()),
            capabilities,
        }
    }

    /// Take the exclusive lease for a caller-scoped multi-step operation.
    pub fn begin(&self) -> MutexGuard<'_, ()> {
        self.lease.lock()
    }

    // -----------------------------------------------------------------
    // Legacy OSAL id space
    // -----------------------------------------------------------------

    /// Stored length of a legacy item; 0 means it does not exist.
    pub fn osal_length(&self, id: OsalNvId) -> Result<u16> {
        Ok(self.bus.request(&sys::OsalNvLength { id: id.0 })?.item_len)
    }

    /// Read a complete legacy item.
    pub fn osal_read(&self, id: OsalNvId) -> Result<Vec<u8>> {
        let _lease = self.lease.lock();
        self.osal_read_unlocked(id)
    }

    fn osal_read_unlocked(&self, id: OsalNvId) -> Result<Vec<u8>> {
        // The deprecated poll rate item lies about its length; read it raw
        // and treat any refusal as absence
        if id.is_proxied() {
            let rsp = self.bus.request(&sys::OsalNvRead { id: id.0, offset: 0 })?;
            if rsp.status != Status::Success || rsp.value.0.is_empty() {
                return Err(Error::NvramMissing {
                    item: id.to_string(),
                });
            }
            return Ok(rsp.value.0);
        }

        let length = self.osal_length(id)? as usize;
        if length == 0 {
            return Err(Error::NvramMissing {
                item: id.to_string(),
            });
        }

        let mut data = Vec::with_capacity(length);

        while data.len() < length {
            let rsp = self.bus.request(&sys::OsalNvReadExt {
                id: id.0,
                offset: data.len() as u16,
            })?;

            if rsp.status == Status::InvalidParameter {
                // Security policy refused the read; older firmware leaks
                // some of these items through the SAPI configuration call.
                return self.sapi_read_fallback(id);
            }
            ensure_success(sys::OsalNvReadExt::NAME, rsp.status)?;

            if rsp.value.0.is_empty() {
                return Err(Error::command_status(sys::OsalNvReadExt::NAME, rsp.status));
            }
            data.extend_from_slice(&rsp.value.0);
        }

        data.truncate(length);
        Ok(data)
    }

    fn sapi_read_fallback(&self, id: OsalNvId) -> Result<Vec<u8>> {
        if !self.capabilities.contains(Capabilities::SAPI) || id.0 > 0xFF {
            return Err(Error::command_status(
                sys::OsalNvReadExt::NAME,
                Status::InvalidParameter,
            ));
        }

        let rsp = self.bus.request(&sapi::ZbReadConfiguration {
            config_id: id.0 as u8,
        })?;
        ensure_success(sapi::ZbReadConfiguration::NAME, rsp.status)?;
        Ok(rsp.value.0)
    }

    /// Write a complete legacy item, recreating it when the stored length
    /// differs and `create` allows it.
    pub fn osal_write(&self, id: OsalNvId, value: &[u8], create: bool) -> Result<()> {
        let _lease = self.lease.lock();
        self.osal_write_unlocked(id, value, create)
    }

    fn osal_write_unlocked(&self, id: OsalNvId, value: &[u8], create: bool) -> Result<()> {
        assert!(!value.is_empty(), "NV values cannot be empty");

        let length = self.osal_length(id)? as usize;

        if length != value.len() && !id.is_proxied() {
            if !create {
                return if length == 0 {
                    Err(Error::NvramMissing {
                        item: id.to_string(),
                    })
                } else {
                    Err(Error::NvramMismatch {
                        item: id.to_string(),
                    })
                };
            }

            if length != 0 {
                let rsp = self.bus.request(&sys::OsalNvDelete {
                    id: id.0,
                    item_len: length as u16,
                })?;
                ensure_success(sys::OsalNvDelete::NAME, rsp.status)?;
            }

            let rsp = self.bus.request(&sys::OsalNvItemInit {
                id: id.0,
                item_len: value.len() as u16,
                value: ShortBytes(value[..value.len().min(CHUNK_SIZE)].to_vec()),
            })?;
            // NV_ITEM_UNINIT is the "item was created" status
            if rsp.status != Status::NvItemUninit && rsp.status != Status::Success {
                return Err(Error::command_status(sys::OsalNvItemInit::NAME, rsp.status));
            }
        }

        for (index, chunk) in value.chunks(CHUNK_SIZE).enumerate() {
            let rsp = self.bus.request(&sys::OsalNvWriteExt {
                id: id.0,
                offset: (index * CHUNK_SIZE) as u16,
                value: LongBytes(chunk.to_vec()),
            })?;
            ensure_success(sys::OsalNvWriteExt::NAME, rsp.status)?;
        }

        Ok(())
    }

    /// Delete a legacy item. Returns whether it existed.
    pub fn osal_delete(&self, id: OsalNvId) -> Result<bool> {
        let _lease = self.lease.lock();
        self.osal_delete_unlocked(id)
    }

    fn osal_delete_unlocked(&self, id: OsalNvId) -> Result<bool> {
        let length = self.osal_length(id)?;
        if length == 0 {
            return Ok(false);
        }

        let rsp = self.bus.request(&sys::OsalNvDelete {
            id: id.0,
            item_len: length,
        })?;
        Ok(rsp.status == Status::Success)
    }

    /// Read a legacy table range until the first missing entry.
    pub fn osal_read_table(&self, table: LegacyTable) -> Result<Vec<Vec<u8>>> {
        let _lease = self.lease.lock();
        let mut entries = Vec::new();

        for id in table.ids() {
            match self.osal_read_unlocked(id) {
                Ok(value) => entries.push(value),
                Err(Error::NvramMissing { .. }) => break,
                Err(e) => return Err(e),
            }
        }

        Ok(entries)
    }

    /// Rewrite a legacy table range: provided values first, the fill value
    /// in every remaining existing slot.
    pub fn osal_write_table(
        &self,
        table: LegacyTable,
        values: &[Vec<u8>],
        fill: &[u8],
    ) -> Result<()> {
        let _lease = self.lease.lock();
        let mut values = values.iter();

        for id in table.ids() {
            let value = values.next().map(|v| v.as_slice());

            match value {
                Some(value) => self.osal_write_unlocked(id, value, true)?,
                None => {
                    // Fill only slots that already exist
                    if self.osal_length(id)? == 0 {
                        break;
                    }
                    self.osal_write_unlocked(id, fill, true)?;
                }
            }
        }

        Ok(())
    }

    // -----------------------------------------------------------------
    // Extended (sys, item, sub) store
    // -----------------------------------------------------------------

    /// Stored length of an extended item; 0 means it does not exist.
    pub fn ex_length(&self, sys_id: NvSysId, item_id: ExNvId, sub_id: u16) -> Result<u32> {
        Ok(self
            .bus
            .request(&sys::NvLength {
                sys_id: sys_id.0,
                item_id: item_id.0,
                sub_id,
            })?
            .length)
    }

    /// Read a complete extended item.
    pub fn ex_read(&self, sys_id: NvSysId, item_id: ExNvId, sub_id: u16) -> Result<Vec<u8>> {
        let _lease = self.lease.lock();
        self.ex_read_unlocked(sys_id, item_id, sub_id)
    }

    fn ex_read_unlocked(
        &self,
        sys_id: NvSysId,
        item_id: ExNvId,
        sub_id: u16,
    ) -> Result<Vec<u8>> {
        let length = self.ex_length(sys_id, item_id, sub_id)? as usize;
        if length == 0 {
            return Err(Error::NvramMissing {
                item: format!("{}[0x{:04X}]", item_id, sub_id),
            });
        }

        let mut data = Vec::with_capacity(length);

        while data.len() < length {
            let chunk = (length - data.len()).min(CHUNK_SIZE) as u8;
            let rsp = self.bus.request(&sys::NvRead {
                sys_id: sys_id.0,
                item_id: item_id.0,
                sub_id,
                offset: data.len() as u16,
                length: chunk,
            })?;
            ensure_success(sys::NvRead::NAME, rsp.status)?;

            if rsp.value.0.is_empty() {
                return Err(Error::command_status(sys::NvRead::NAME, rsp.status));
            }
            data.extend_from_slice(&rsp.value.0);
        }

        data.truncate(length);
        Ok(data)
    }

    /// Write a complete extended item, creating or resizing as needed.
    pub fn ex_write(
        &self,
        sys_id: NvSysId,
        item_id: ExNvId,
        sub_id: u16,
        value: &[u8],
    ) -> Result<()> {
        let _lease = self.lease.lock();
        self.ex_write_unlocked(sys_id, item_id, sub_id, value)
    }

    fn ex_write_unlocked(
        &self,
        sys_id: NvSysId,
        item_id: ExNvId,
        sub_id: u16,
        value: &[u8],
    ) -> Result<()> {
        assert!(!value.is_empty(), "NV values cannot be empty");

        let length = self.ex_length(sys_id, item_id, sub_id)? as usize;

        if length != value.len() {
            if length != 0 {
                let rsp = self.bus.request(&sys::NvDelete {
                    sys_id: sys_id.0,
                    item_id: item_id.0,
                    sub_id,
                })?;
                ensure_success(sys::NvDelete::NAME, rsp.status)?;
            }

            let rsp = self.bus.request(&sys::NvCreate {
                sys_id: sys_id.0,
                item_id: item_id.0,
                sub_id,
                length: value.len() as u32,
            })?;
            if rsp.status != Status::NvItemUninit && rsp.status != Status::Success {
                return Err(Error::command_status(sys::NvCreate::NAME, rsp.status));
            }
        }

        for (index, chunk) in value.chunks(CHUNK_SIZE).enumerate() {
            let rsp = self.bus.request(&sys::NvWrite {
                sys_id: sys_id.0,
                item_id: item_id.0,
                sub_id,
                offset: (index * CHUNK_SIZE) as u16,
                value: ShortBytes(chunk.to_vec()),
            })?;
            ensure_success(sys::NvWrite::NAME, rsp.status)?;
        }

        Ok(())
    }

    /// Delete an extended item. Returns whether it existed.
    pub fn ex_delete(&self, sys_id: NvSysId, item_id: ExNvId, sub_id: u16) -> Result<bool> {
        let rsp = self.bus.request(&sys::NvDelete {
            sys_id: sys_id.0,
            item_id: item_id.0,
            sub_id,
        })?;
        Ok(rsp.status == Status::Success)
    }

    /// Read consecutive sub-ids of an extended table until the first gap.
    pub fn ex_read_table(&self, item_id: ExNvId) -> Result<Vec<Vec<u8>>> {
        let _lease = self.lease.lock();
        let mut entries = Vec::new();

        for sub_id in 0..u16::MAX {
            match self.ex_read_unlocked(NvSysId::ZSTACK, item_id, sub_id) {
                Ok(value) => entries.push(value),
                Err(Error::NvramMissing { .. }) => break,
                Err(e) => return Err(e),
            }
        }

        Ok(entries)
    }

    /// Rewrite an extended table: provided values first, then the fill
    /// value in every remaining existing slot.
    pub fn ex_write_table(
        &self,
        item_id: ExNvId,
        values: &[Vec<u8>],
        fill: &[u8],
    ) -> Result<()> {
        let _lease = self.lease.lock();

        for (sub_id, value) in values.iter().enumerate() {
            self.ex_write_unlocked(NvSysId::ZSTACK, item_id, sub_id as u16, value)?;
        }

        for sub_id in values.len()..u16::MAX as usize {
            if self.ex_length(NvSysId::ZSTACK, item_id, sub_id as u16)? == 0 {
                break;
            }
            self.ex_write_unlocked(NvSysId::ZSTACK, item_id, sub_id as u16, fill)?;
        }

        Ok(())
    }

    // -----------------------------------------------------------------
    // Whole-store operations
    // -----------------------------------------------------------------

    /// Snapshot every catalogued item. Missing items are simply absent from
    /// the result; items hidden by the security policy are logged and
    /// skipped rather than failing the backup.
    pub fn backup(&self, include_extended: bool) -> Result<NvramSnapshot> {
        let _lease = self.lease.lock();
        let mut snapshot = NvramSnapshot::default();

        let singular = items::KNOWN_OSAL_ITEMS.iter().map(|(id, _)| *id);
        let tabular = items::LEGACY_TABLES.iter().flat_map(|t| t.ids());

        for id in singular.chain(tabular) {
            match self.osal_read_unlocked(id) {
                Ok(value) => {
                    snapshot.legacy.insert(id.0, value);
                }
                Err(Error::NvramMissing { .. }) => {}
                Err(Error::CommandStatus { .. }) if id.is_secure() => {
                    log::warn!("Skipping unreadable secure item {}", id);
                }
                Err(e) => return Err(e),
            }
        }

        if include_extended {
            for (item_id, _) in items::KNOWN_EX_ITEMS {
                if *item_id == ExNvId::LEGACY {
                    continue;
                }

                for sub_id in 0..u16::MAX {
                    match self.ex_read_unlocked(NvSysId::ZSTACK, *item_id, sub_id) {
                        Ok(value) => {
                            snapshot
                                .extended
                                .insert((NvSysId::ZSTACK.0, item_id.0, sub_id), value);
                        }
                        Err(Error::NvramMissing { .. }) => break,
                        Err(e) => return Err(e),
                    }
                }
            }
        }

        Ok(snapshot)
    }

    /// Write a snapshot back and verify every item by reading it again.
    pub fn restore(&self, snapshot: &NvramSnapshot) -> Result<()> {
        let _lease = self.lease.lock();

        for (id, value) in &snapshot.legacy {
            let id = OsalNvId(*id);
            self.osal_write_unlocked(id, value, true)?;

            let written = self.osal_read_unlocked(id)?;
            if written != *value {
                return Err(Error::NvramMismatch {
                    item: id.to_string(),
                });
            }
        }

        for ((sys_id, item_id, sub_id), value) in &snapshot.extended {
            let sys_id = NvSysId(*sys_id);
            let item_id = ExNvId(*item_id);
            self.ex_write_unlocked(sys_id, item_id, *sub_id, value)?;

            let written = self.ex_read_unlocked(sys_id, item_id, *sub_id)?;
            if written != *value {
                return Err(Error::NvramMismatch {
                    item: format!("{}[0x{:04X}]", item_id, sub_id),
                });
            }
        }

        Ok(())
    }

    /// Clear persistent state to the requested depth. The caller resets the
    /// device afterwards so the firmware reinitialises.
    pub fn reset(&self, depth: ResetDepth, extended_store: bool) -> Result<()> {
        let _lease = self.lease.lock();

        match depth {
            ResetDepth::NetworkOnly => {
                // Clearing the configured markers plus the startup option is
                // what makes Z-Stack rebuild its network state on boot.
                self.osal_delete_unlocked(OsalNvId::HAS_CONFIGURED_ZSTACK1)?;
                self.osal_delete_unlocked(OsalNvId::HAS_CONFIGURED_ZSTACK3)?;
                self.osal_delete_unlocked(OsalNvId::BDBNODEISONANETWORK)?;

                let startup = crate::types::StartupOptions::CLEAR_STATE
                    | crate::types::StartupOptions::CLEAR_CONFIG;
                self.osal_write_unlocked(OsalNvId::STARTUP_OPTION, &[startup.0], true)?;
            }
            ResetDepth::Factory => {
                for (id, _) in items::KNOWN_OSAL_ITEMS {
                    self.osal_delete_unlocked(*id)?;
                }

                for table in items::LEGACY_TABLES {
                    for id in table.ids() {
                        if !self.osal_delete_unlocked(id)? {
                            break;
                        }
                    }
                }

                if extended_store {
                    for (item_id, _) in items::KNOWN_EX_ITEMS {
                        if *item_id == ExNvId::LEGACY {
                            continue;
                        }

                        for sub_id in 0..u16::MAX {
                            if !self.ex_delete(NvSysId::ZSTACK, *item_id, sub_id)? {
                                break;
                            }
                        }
                    }
                }
            }
        }

        Ok(())
    }
}
