//! CC2531 serial bootloader client.
//!
//! The bootloader speaks regular MT frames in the `UBL_FUNC` subsystem,
//! request and response both AREQs. Flash is addressed in 4-byte words and
//! moved in the buffer size reported by the handshake. An image carries its
//! own CRC at offset 0x90 as a `(crc, shadow)` pair; flashing is refused
//! when the computed CRC-32 disagrees, because a bad image bricks the stick
//! until it is reflashed over debug pins.

use crate::bus::MtBus;
use crate::commands::ubl::{
    self, BootloaderDeviceType, BootloaderStatus, EnableReq, EnableRsp, HandshakeReq,
    HandshakeRsp, ReadReq, ReadRsp, WriteReq, WriteRsp,
};
use crate::error::{Error, Result};
use crate::types::Bytes;
use crc::{Crc, CRC_32_ISO_HDLC};
use std::time::Duration;

const BOOTLOADER_TIMEOUT: Duration = Duration::from_secs(5);

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Geometry reported by the bootloader handshake.
#[derive(Debug, Clone, Copy)]
pub struct BootloaderInfo {
    pub revision: u32,
    pub device_type: BootloaderDeviceType,
    pub buffer_size: u32,
    pub page_size: u32,
}

/// Client for a device sitting in its serial bootloader.
pub struct Bootloader<'a> {
    bus: &'a MtBus,
    info: BootloaderInfo,
}

impl<'a> Bootloader<'a> {
    /// Handshake with the bootloader. Fails if the device is running its
    /// application image instead.
    pub fn connect(bus: &'a MtBus) -> Result<Self> {
        let waiter = bus.wait_for(|_: &HandshakeRsp| true);
        bus.send(&HandshakeReq {})?;
        let rsp = waiter.wait(BOOTLOADER_TIMEOUT)?;

        check(rsp.status, "handshake")?;

        let info = BootloaderInfo {
            revision: rsp.bootloader_revision,
            device_type: rsp.device_type,
            buffer_size: rsp.buffer_size,
            page_size: rsp.page_size,
        };

        log::info!(
            "Bootloader rev {} on {:?}: {} byte buffers, {} byte pages",
            info.revision,
            info.device_type,
            info.buffer_size,
            info.page_size
        );

        Ok(Self { bus, info })
    }

    pub fn info(&self) -> BootloaderInfo {
        self.info
    }

    /// Read the full application image.
    pub fn read_image(&self) -> Result<Vec<u8>> {
        let mut image = Vec::with_capacity(ubl::IMAGE_SIZE);

        while image.len() < ubl::IMAGE_SIZE {
            let word_addr = (image.len() / ubl::FLASH_WORD_SIZE) as u16;

            let waiter = self.bus.wait_for(|_: &ReadRsp| true);
            self.bus.send(&ReadReq {
                flash_word_addr: word_addr,
            })?;
            let rsp = waiter.wait(BOOTLOADER_TIMEOUT)?;

            check(rsp.status, "read")?;

            let (Some(addr), Some(data)) = (rsp.flash_word_addr, rsp.data) else {
                return Err(Error::Bootloader(
                    "Read response is missing its payload".to_string(),
                ));
            };

            if addr != word_addr {
                return Err(Error::Bootloader(format!(
                    "Read out of sequence: asked for word 0x{:04X}, got 0x{:04X}",
                    word_addr, addr
                )));
            }

            image.extend_from_slice(&data.0);
        }

        image.truncate(ubl::IMAGE_SIZE);
        Ok(image)
    }

    /// Write and activate an application image.
    ///
    /// The image must be exactly [`ubl::IMAGE_SIZE`] bytes and carry a
    /// valid embedded CRC; both are checked before a single byte is
    /// written.
    pub fn write_image(&self, image: &[u8]) -> Result<()> {
        if image.len() != ubl::IMAGE_SIZE {
            return Err(Error::Bootloader(format!(
                "Image must be exactly {} bytes, got {}",
                ubl::IMAGE_SIZE,
                image.len()
            )));
        }

        verify_image_crc(image)?;

        let buffer_size = self.info.buffer_size as usize;

        for (index, chunk) in image.chunks(buffer_size).enumerate() {
            let word_addr = (index * buffer_size / ubl::FLASH_WORD_SIZE) as u16;

            let waiter = self.bus.wait_for(|_: &WriteRsp| true);
            self.bus.send(&WriteReq {
                flash_word_addr: word_addr,
                data: Bytes(chunk.to_vec()),
            })?;
            let rsp = waiter.wait(BOOTLOADER_TIMEOUT)?;

            check(rsp.status, "write")?;

            if index % 32 == 0 {
                log::debug!(
                    "Flashed {}/{} bytes",
                    (index + 1) * buffer_size,
                    image.len()
                );
            }
        }

        // Validate and jump into the new image
        let waiter = self.bus.wait_for(|_: &EnableRsp| true);
        self.bus.send(&EnableReq {})?;
        let rsp = waiter.wait(BOOTLOADER_TIMEOUT)?;
        check(rsp.status, "enable")?;

        log::info!("Image flashed and enabled");
        Ok(())
    }
}

fn check(status: BootloaderStatus, operation: &str) -> Result<()> {
    if status == BootloaderStatus::Success {
        Ok(())
    } else {
        Err(Error::Bootloader(format!(
            "Bootloader {} failed: {:?}",
            operation, status
        )))
    }
}

/// Check an image's embedded CRC pair against the CRC-32 of its contents.
///
/// The pair at [`ubl::IMAGE_CRC_OFFSET`] holds `(crc, crc_shadow)`; the
/// image region is summed with both words blanked to 0xFFFFFFFF, the
/// erased-flash value they had when the CRC was computed.
pub fn verify_image_crc(image: &[u8]) -> Result<()> {
    if image.len() < ubl::IMAGE_CRC_OFFSET + 8 {
        return Err(Error::Bootloader("Image is too short".to_string()));
    }

    let stored_crc = u32::from_le_bytes(
        image[ubl::IMAGE_CRC_OFFSET..ubl::IMAGE_CRC_OFFSET + 4]
            .try_into()
            .unwrap(),
    );

    let mut digest = CRC32.digest();
    digest.update(&image[..ubl::IMAGE_CRC_OFFSET]);
    digest.update(&[0xFF; 8]);
    digest.update(&image[ubl::IMAGE_CRC_OFFSET + 8..]);
    let computed = digest.finalize();

    if stored_crc != computed {
        return Err(Error::Bootloader(format!(
            "Image CRC mismatch: embedded 0x{:08X}, computed 0x{:08X}",
            stored_crc, computed
        )));
    }

    Ok(())
}

/// Stamp an image's CRC pair, for building test fixtures and repairing
/// images assembled from raw flash dumps.
pub fn stamp_image_crc(image: &mut [u8]) -> Result<u32> {
    if image.len() < ubl::IMAGE_CRC_OFFSET + 8 {
        return Err(Error::Bootloader("Image is too short".to_string()));
    }

    let mut digest = CRC32.digest();
    digest.update(&image[..ubl::IMAGE_CRC_OFFSET]);
    digest.update(&[0xFF; 8]);
    digest.update(&image[ubl::IMAGE_CRC_OFFSET + 8..]);
    let crc = digest.finalize();

    image[ubl::IMAGE_CRC_OFFSET..ubl::IMAGE_CRC_OFFSET + 4]
        .copy_from_slice(&crc.to_le_bytes());
    image[ubl::IMAGE_CRC_OFFSET + 4..ubl::IMAGE_CRC_OFFSET + 8]
        .copy_from_slice(&crc.to_le_bytes());

    Ok(crc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc_round_trip() {
        let mut image = vec![0xA5; 1024];
        let crc = stamp_image_crc(&mut image).unwrap();
        assert_ne!(crc, 0);
        verify_image_crc(&image).unwrap();
    }

    #[test]
    fn test_corrupted_image_rejected() {
        let mut image = vec![0xA5; 1024];
        stamp_image_crc(&mut image).unwrap();
        image[500] ^= 0x01;
        assert!(verify_image_crc(&image).is_err());
    }

    #[test]
    fn test_short_image_rejected() {
        assert!(verify_image_crc(&[0x00; 16]).is_err());
    }
}
