//! Firmware update from removable storage.
//!
//! Implements [`BootstrapPort`].  The image is streamed from the card into
//! the inactive OTA partition in fixed-size chunks; nothing is marked
//! bootable until the whole file has been written.
//!
//! - **`target_os = "espidf"`**: card presence from the detect switch,
//!   partition writes through `esp-ota`, reboot on success.
//! - **all other targets**: the "card" is a host file; writes are counted
//!   and discarded.

use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use log::{info, warn};

use crate::app::ports::BootstrapPort;
use crate::error::BootstrapError;

const MAX_IMAGE_SIZE: u64 = 4 * 1024 * 1024;
const CHUNK_SIZE: usize = 4096;
/// First byte of every ESP application image.
const IMAGE_MAGIC: u8 = 0xE9;

/// Destination of the image bytes.
trait ImageSink {
    fn write(&mut self, chunk: &[u8]) -> Result<(), BootstrapError>;
    fn finish(self) -> Result<(), BootstrapError>;
}

/// Stream a validated image into `sink`.  Returns the bytes written.
fn stream_image(mut src: impl Read, len: u64, sink: impl ImageSink) -> Result<u64, BootstrapError> {
    if len == 0 || len > MAX_IMAGE_SIZE {
        warn!("SD: image size {} out of range", len);
        return Err(BootstrapError::ImageInvalid);
    }
    let mut sink = sink;
    let mut buf = [0u8; CHUNK_SIZE];
    let mut written = 0u64;
    loop {
        let n = src.read(&mut buf).map_err(|e| {
            warn!("SD: read failed at {} ({})", written, e);
            BootstrapError::ImageInvalid
        })?;
        if n == 0 {
            break;
        }
        if written == 0 && buf[0] != IMAGE_MAGIC {
            warn!("SD: bad image magic 0x{:02x}", buf[0]);
            return Err(BootstrapError::ImageInvalid);
        }
        sink.write(&buf[..n])?;
        written += n as u64;
    }
    if written != len {
        warn!("SD: short image ({} of {} bytes)", written, len);
        return Err(BootstrapError::ImageInvalid);
    }
    sink.finish()?;
    Ok(written)
}

pub struct SdUpdate {
    image_path: PathBuf,
}

impl SdUpdate {
    /// `image_path` is where the update file appears when media is present
    /// (the card's mount point on the device).
    pub fn new(image_path: impl Into<PathBuf>) -> Self {
        Self { image_path: image_path.into() }
    }

    fn open(&self) -> Result<(File, u64), BootstrapError> {
        let file = File::open(&self.image_path).map_err(|e| {
            warn!("SD: cannot open {} ({})", self.image_path.display(), e);
            BootstrapError::ImageInvalid
        })?;
        let len = file.metadata().map_err(|_| BootstrapError::ImageInvalid)?.len();
        Ok((file, len))
    }
}

// ── ESP-IDF ───────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
struct OtaSink(esp_ota::OtaUpdate);

#[cfg(target_os = "espidf")]
impl ImageSink for OtaSink {
    fn write(&mut self, chunk: &[u8]) -> Result<(), BootstrapError> {
        self.0.write(chunk).map_err(|e| {
            warn!("esp-ota write failed: {:?}", e);
            BootstrapError::WriteFailed
        })
    }

    fn finish(self) -> Result<(), BootstrapError> {
        let mut completed = self.0.finalize().map_err(|e| {
            warn!("esp-ota finalize failed: {:?}", e);
            BootstrapError::ImageInvalid
        })?;
        completed.set_as_boot_partition().map_err(|e| {
            warn!("esp-ota set_as_boot_partition failed: {:?}", e);
            BootstrapError::WriteFailed
        })
    }
}

#[cfg(target_os = "espidf")]
impl BootstrapPort for SdUpdate {
    fn storage_detected(&mut self) -> bool {
        // Detect switch pulls LOW with a card inserted.
        !crate::drivers::hw_init::gpio_read(crate::pins::SD_DETECT_GPIO) && self.image_path.exists()
    }

    fn run_firmware_update(&mut self) -> Result<(), BootstrapError> {
        let (file, len) = self.open()?;
        let update = esp_ota::OtaUpdate::begin().map_err(|e| {
            warn!("esp-ota begin failed: {:?}", e);
            BootstrapError::WriteFailed
        })?;
        let written = stream_image(file, len, OtaSink(update))?;
        info!("SD: {} bytes flashed, restarting", written);
        esp_ota::restart();
    }
}

// ── Simulation ────────────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
#[derive(Default)]
struct CountingSink {
    bytes: u64,
}

#[cfg(not(target_os = "espidf"))]
impl ImageSink for CountingSink {
    fn write(&mut self, chunk: &[u8]) -> Result<(), BootstrapError> {
        self.bytes += chunk.len() as u64;
        Ok(())
    }

    fn finish(self) -> Result<(), BootstrapError> {
        info!("SD(sim): image accepted ({} bytes), not flashed", self.bytes);
        Ok(())
    }
}

#[cfg(not(target_os = "espidf"))]
impl BootstrapPort for SdUpdate {
    fn storage_detected(&mut self) -> bool {
        self.image_path.exists()
    }

    fn run_firmware_update(&mut self) -> Result<(), BootstrapError> {
        let (file, len) = self.open()?;
        stream_image(file, len, CountingSink::default()).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Collect<'a>(&'a mut Vec<u8>);

    impl ImageSink for Collect<'_> {
        fn write(&mut self, chunk: &[u8]) -> Result<(), BootstrapError> {
            self.0.extend_from_slice(chunk);
            Ok(())
        }

        fn finish(self) -> Result<(), BootstrapError> {
            Ok(())
        }
    }

    #[test]
    fn streams_whole_image() {
        let mut image = vec![0u8; CHUNK_SIZE * 2 + 17];
        image[0] = IMAGE_MAGIC;
        let mut out = Vec::new();
        let n = stream_image(image.as_slice(), image.len() as u64, Collect(&mut out)).unwrap();
        assert_eq!(n, image.len() as u64);
        assert_eq!(out, image);
    }

    #[test]
    fn rejects_bad_magic_and_empty() {
        let mut out = Vec::new();
        let image = [0u8; 64];
        assert_eq!(stream_image(&image[..], 64, Collect(&mut out)), Err(BootstrapError::ImageInvalid));
        assert_eq!(stream_image(&[][..], 0, Collect(&mut out)), Err(BootstrapError::ImageInvalid));
    }

    #[test]
    fn missing_file_means_no_media() {
        let mut sd = SdUpdate::new("/nonexistent/charger-update.bin");
        assert!(!sd.storage_detected());
        assert_eq!(sd.run_firmware_update(), Err(BootstrapError::ImageInvalid));
    }

    #[test]
    fn host_file_is_accepted() {
        let path = std::env::temp_dir().join(format!("charger-sd-{}.bin", std::process::id()));
        let mut image = vec![0u8; 1000];
        image[0] = IMAGE_MAGIC;
        std::fs::write(&path, &image).unwrap();

        let mut sd = SdUpdate::new(&path);
        assert!(sd.storage_detected());
        assert_eq!(sd.run_firmware_update(), Ok(()));
        std::fs::remove_file(&path).unwrap();
    }
}
