//! SD-card storage: the optional `CONFIG.YML` override and the persisted
//! panel frame.
//!
//! Every operation is self-contained: it claims the bus, mounts volume 0,
//! does its reads or writes and closes every handle again, so the card can
//! be power-gated between calls. FAT short names only, hence `CONFIG.YML`
//! rather than `config.yaml`.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;
use embedded_hal_bus::spi::ExclusiveDevice;
use embedded_sdmmc::{
    Mode, SdCard, SdCardError, TimeSource, Timestamp, VolumeIdx, VolumeManager,
};

use inkcal_core::frame::PLANE_BYTES;

pub const CONFIG_FILE: &str = "CONFIG.YML";
pub const FRAME_FILE: &str = "CALENDAR.RAW";

/// Stored-frame header: magic, then panel width and height, little endian.
const FRAME_MAGIC: [u8; 4] = *b"ICAL";
const FRAME_HEADER_LEN: usize = 8;

/// Fixed timestamp source; FAT timestamps are irrelevant to this device.
#[derive(Clone, Copy, Debug, Default)]
pub struct FixedTimeSource;

impl TimeSource for FixedTimeSource {
    fn get_timestamp(&self) -> Timestamp {
        // 2026-01-01 00:00:00
        Timestamp {
            year_since_1970: 56,
            zero_indexed_month: 0,
            zero_indexed_day: 0,
            hours: 0,
            minutes: 0,
            seconds: 0,
        }
    }
}

#[derive(Debug)]
pub enum SdError<BusErr, CsErr>
where
    BusErr: core::fmt::Debug,
    CsErr: core::fmt::Debug,
{
    ChipSelect(CsErr),
    Spi(BusErr),
    Card(SdCardError),
    Filesystem(embedded_sdmmc::Error<SdCardError>),
}

/// Reads `CONFIG.YML` into `out`. `Ok(false)` means the file (or the whole
/// filesystem entry) is absent, which is a supported configuration.
pub fn read_config<BUS, CS, DELAY>(
    bus: &mut BUS,
    cs: &mut CS,
    delay: &mut DELAY,
    out: &mut [u8],
) -> Result<Option<usize>, SdError<BUS::Error, CS::Error>>
where
    BUS: SpiBus,
    CS: OutputPin,
    DELAY: DelayNs,
    BUS::Error: core::fmt::Debug,
    CS::Error: core::fmt::Debug,
{
    let mut volume_mgr = mount(bus, cs, delay)?;
    let mut volume = volume_mgr
        .open_volume(VolumeIdx(0))
        .map_err(SdError::Filesystem)?;
    let mut root_dir = volume.open_root_dir().map_err(SdError::Filesystem)?;

    let mut file = match root_dir.open_file_in_dir(CONFIG_FILE, Mode::ReadOnly) {
        Ok(file) => file,
        Err(embedded_sdmmc::Error::NotFound) => return Ok(None),
        Err(err) => return Err(SdError::Filesystem(err)),
    };

    let read = read_to_end(&mut file, out).map_err(SdError::Filesystem)?;
    file.close().map_err(SdError::Filesystem)?;
    root_dir.close().map_err(SdError::Filesystem)?;
    volume.close().map_err(SdError::Filesystem)?;
    Ok(Some(read))
}

/// Restores the persisted frame into the given planes. `Ok(false)` when no
/// valid `CALENDAR.RAW` exists; the planes may be partially written in
/// that case and the caller should treat the frame as blank.
pub fn load_frame<BUS, CS, DELAY>(
    bus: &mut BUS,
    cs: &mut CS,
    delay: &mut DELAY,
    mono: &mut [u8; PLANE_BYTES],
    chroma: &mut [u8; PLANE_BYTES],
) -> Result<bool, SdError<BUS::Error, CS::Error>>
where
    BUS: SpiBus,
    CS: OutputPin,
    DELAY: DelayNs,
    BUS::Error: core::fmt::Debug,
    CS::Error: core::fmt::Debug,
{
    let mut volume_mgr = mount(bus, cs, delay)?;
    let mut volume = volume_mgr
        .open_volume(VolumeIdx(0))
        .map_err(SdError::Filesystem)?;
    let mut root_dir = volume.open_root_dir().map_err(SdError::Filesystem)?;

    let mut file = match root_dir.open_file_in_dir(FRAME_FILE, Mode::ReadOnly) {
        Ok(file) => file,
        Err(embedded_sdmmc::Error::NotFound) => return Ok(false),
        Err(err) => return Err(SdError::Filesystem(err)),
    };

    let mut header = [0u8; FRAME_HEADER_LEN];
    let ok = read_to_end(&mut file, &mut header).map_err(SdError::Filesystem)? == FRAME_HEADER_LEN
        && header[..4] == FRAME_MAGIC
        && u16::from_le_bytes([header[4], header[5]]) as usize == inkcal_core::frame::WIDTH
        && u16::from_le_bytes([header[6], header[7]]) as usize == inkcal_core::frame::HEIGHT
        && read_to_end(&mut file, mono).map_err(SdError::Filesystem)? == PLANE_BYTES
        && read_to_end(&mut file, chroma).map_err(SdError::Filesystem)? == PLANE_BYTES;

    if !ok {
        log::warn!("stored frame is missing or malformed, ignoring it");
    }

    file.close().map_err(SdError::Filesystem)?;
    root_dir.close().map_err(SdError::Filesystem)?;
    volume.close().map_err(SdError::Filesystem)?;
    Ok(ok)
}

/// Persists the decoded frame so the next boot can show it even when its
/// own fetch fails.
pub fn save_frame<BUS, CS, DELAY>(
    bus: &mut BUS,
    cs: &mut CS,
    delay: &mut DELAY,
    mono: &[u8; PLANE_BYTES],
    chroma: &[u8; PLANE_BYTES],
) -> Result<(), SdError<BUS::Error, CS::Error>>
where
    BUS: SpiBus,
    CS: OutputPin,
    DELAY: DelayNs,
    BUS::Error: core::fmt::Debug,
    CS::Error: core::fmt::Debug,
{
    let mut volume_mgr = mount(bus, cs, delay)?;
    let mut volume = volume_mgr
        .open_volume(VolumeIdx(0))
        .map_err(SdError::Filesystem)?;
    let mut root_dir = volume.open_root_dir().map_err(SdError::Filesystem)?;
    let mut file = root_dir
        .open_file_in_dir(FRAME_FILE, Mode::ReadWriteCreateOrTruncate)
        .map_err(SdError::Filesystem)?;

    let mut header = [0u8; FRAME_HEADER_LEN];
    header[..4].copy_from_slice(&FRAME_MAGIC);
    header[4..6].copy_from_slice(&(inkcal_core::frame::WIDTH as u16).to_le_bytes());
    header[6..8].copy_from_slice(&(inkcal_core::frame::HEIGHT as u16).to_le_bytes());
    file.write(&header).map_err(SdError::Filesystem)?;
    file.write(mono).map_err(SdError::Filesystem)?;
    file.write(chroma).map_err(SdError::Filesystem)?;

    file.close().map_err(SdError::Filesystem)?;
    root_dir.close().map_err(SdError::Filesystem)?;
    volume.close().map_err(SdError::Filesystem)?;
    Ok(())
}

type Card<'a, BUS, CS, DELAY> =
    SdCard<ExclusiveDevice<&'a mut BUS, &'a mut CS, embedded_hal_bus::spi::NoDelay>, &'a mut DELAY>;

fn mount<'a, BUS, CS, DELAY>(
    bus: &'a mut BUS,
    cs: &'a mut CS,
    delay: &'a mut DELAY,
) -> Result<VolumeManager<Card<'a, BUS, CS, DELAY>, FixedTimeSource>, SdError<BUS::Error, CS::Error>>
where
    BUS: SpiBus,
    CS: OutputPin,
    DELAY: DelayNs,
    BUS::Error: core::fmt::Debug,
    CS::Error: core::fmt::Debug,
{
    cs.set_high().map_err(SdError::ChipSelect)?;

    // SD SPI init requires >=74 clock cycles with CS deasserted.
    let preclock = [0xFFu8; 10];
    bus.write(&preclock).map_err(SdError::Spi)?;

    let spi_device =
        ExclusiveDevice::new_no_delay(bus, cs).map_err(SdError::ChipSelect)?;
    let sd_card = SdCard::new(spi_device, delay);
    Ok(VolumeManager::new(sd_card, FixedTimeSource))
}

fn read_to_end<D, T, const MAX_DIRS: usize, const MAX_FILES: usize, const MAX_VOLUMES: usize>(
    file: &mut embedded_sdmmc::File<'_, D, T, MAX_DIRS, MAX_FILES, MAX_VOLUMES>,
    out: &mut [u8],
) -> Result<usize, embedded_sdmmc::Error<D::Error>>
where
    D: embedded_sdmmc::BlockDevice,
    T: TimeSource,
{
    let mut total = 0usize;
    while total < out.len() {
        let read_now = file.read(&mut out[total..])?;
        if read_now == 0 || file.is_eof() {
            total = total.saturating_add(read_now);
            break;
        }
        total = total.saturating_add(read_now);
    }
    Ok(total)
}
