//! UC8179-class tri-color e-paper panel (800x480, GDEW075Z08 family).
//!
//! Thin command adapter: init sequence, two-plane frame write, blocking
//! refresh and panel deep sleep. Waveform tables stay in the controller's
//! OTP; nothing here knows about pixels beyond shoving plane bytes out.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal::spi::SpiDevice;

use inkcal_core::frame::PLANE_BYTES;

// Controller command bytes.
const CMD_PANEL_SETTING: u8 = 0x00;
const CMD_POWER_SETTING: u8 = 0x01;
const CMD_POWER_OFF: u8 = 0x02;
const CMD_POWER_ON: u8 = 0x04;
const CMD_DEEP_SLEEP: u8 = 0x07;
const CMD_DATA_BW: u8 = 0x10;
const CMD_REFRESH: u8 = 0x12;
const CMD_DATA_RED: u8 = 0x13;
const CMD_DUAL_SPI: u8 = 0x15;
const CMD_VCOM_INTERVAL: u8 = 0x50;
const CMD_TCON: u8 = 0x60;
const CMD_RESOLUTION: u8 = 0x61;

const DEEP_SLEEP_CHECK: u8 = 0xA5;

/// A full refresh on this film takes tens of seconds in the cold.
const REFRESH_TIMEOUT_MS: u32 = 40_000;
const POWER_TIMEOUT_MS: u32 = 5_000;

/// Plane data is streamed in slices this big to keep SPI transactions
/// bounded.
const CHUNK: usize = 4_000;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PanelError<SpiErr, DcErr, RstErr, BusyErr> {
    Spi(SpiErr),
    Dc(DcErr),
    Rst(RstErr),
    Busy(BusyErr),
    /// BUSY never released within the stage's deadline.
    BusyTimeout,
}

type PanelResult<T, SPI, DC, RST, BUSY> = Result<
    T,
    PanelError<
        <SPI as embedded_hal::spi::ErrorType>::Error,
        <DC as embedded_hal::digital::ErrorType>::Error,
        <RST as embedded_hal::digital::ErrorType>::Error,
        <BUSY as embedded_hal::digital::ErrorType>::Error,
    >,
>;

/// Panel driver over an owned SPI device and control pins. Chip select
/// belongs to the SPI device; DC switches command/data framing.
pub struct TriColorEpd<SPI, DC, RST, BUSY, D> {
    spi: SPI,
    dc: DC,
    rst: RST,
    busy: BUSY,
    delay: D,
}

impl<SPI, DC, RST, BUSY, D> TriColorEpd<SPI, DC, RST, BUSY, D>
where
    SPI: SpiDevice<u8>,
    DC: OutputPin,
    RST: OutputPin,
    BUSY: InputPin,
    D: DelayNs,
{
    pub fn new(spi: SPI, dc: DC, rst: RST, busy: BUSY, delay: D) -> Self {
        Self {
            spi,
            dc,
            rst,
            busy,
            delay,
        }
    }

    /// Hardware reset plus the power-on configuration sequence. The panel
    /// is left powered and idle, ready for plane data.
    pub fn init(&mut self) -> PanelResult<(), SPI, DC, RST, BUSY> {
        self.rst.set_low().map_err(PanelError::Rst)?;
        self.delay.delay_ms(10);
        self.rst.set_high().map_err(PanelError::Rst)?;
        self.delay.delay_ms(10);

        self.command(CMD_POWER_SETTING, &[0x07, 0x07, 0x3F, 0x3F])?;
        self.command(CMD_POWER_ON, &[])?;
        self.wait_idle(POWER_TIMEOUT_MS)?;
        // KW/R mode, LUT from OTP, scan defaults.
        self.command(CMD_PANEL_SETTING, &[0x0F])?;
        self.command(CMD_RESOLUTION, &[0x03, 0x20, 0x01, 0xE0])?;
        self.command(CMD_DUAL_SPI, &[0x00])?;
        self.command(CMD_VCOM_INTERVAL, &[0x11, 0x07])?;
        self.command(CMD_TCON, &[0x22])?;
        Ok(())
    }

    /// Streams both planes to controller RAM. Mono arrives as drawn
    /// (1 = white); the chromatic plane is inverted on the way out because
    /// the controller wants 1 = colored.
    pub fn write_frame(
        &mut self,
        mono: &[u8; PLANE_BYTES],
        chroma: &[u8; PLANE_BYTES],
    ) -> PanelResult<(), SPI, DC, RST, BUSY> {
        self.command(CMD_DATA_BW, &[])?;
        for chunk in mono.chunks(CHUNK) {
            self.data(chunk)?;
        }

        self.command(CMD_DATA_RED, &[])?;
        let mut buf = [0u8; CHUNK];
        for chunk in chroma.chunks(CHUNK) {
            for (out, &b) in buf.iter_mut().zip(chunk) {
                *out = !b;
            }
            self.data(&buf[..chunk.len()])?;
        }
        Ok(())
    }

    /// Kicks a full refresh and blocks until the film settles.
    pub fn refresh(&mut self) -> PanelResult<(), SPI, DC, RST, BUSY> {
        // A refresh issued while one is running corrupts the image.
        self.wait_idle(REFRESH_TIMEOUT_MS)?;
        self.command(CMD_REFRESH, &[])?;
        self.delay.delay_us(100);
        self.wait_idle(REFRESH_TIMEOUT_MS)
    }

    /// Powers the panel down into its deep-sleep state. Requires a
    /// hardware reset (another [`Self::init`]) to wake.
    pub fn sleep(&mut self) -> PanelResult<(), SPI, DC, RST, BUSY> {
        self.command(CMD_POWER_OFF, &[])?;
        self.wait_idle(POWER_TIMEOUT_MS)?;
        self.command(CMD_DEEP_SLEEP, &[DEEP_SLEEP_CHECK])
    }

    fn command(&mut self, cmd: u8, data: &[u8]) -> PanelResult<(), SPI, DC, RST, BUSY> {
        self.dc.set_low().map_err(PanelError::Dc)?;
        self.spi.write(&[cmd]).map_err(PanelError::Spi)?;
        if data.is_empty() {
            return Ok(());
        }
        self.data(data)
    }

    fn data(&mut self, data: &[u8]) -> PanelResult<(), SPI, DC, RST, BUSY> {
        self.dc.set_high().map_err(PanelError::Dc)?;
        self.spi.write(data).map_err(PanelError::Spi)
    }

    // BUSY is active low on this controller.
    fn wait_idle(&mut self, max_ms: u32) -> PanelResult<(), SPI, DC, RST, BUSY> {
        let mut waited = 0;
        while self.busy.is_low().map_err(PanelError::Busy)? {
            if waited >= max_ms {
                return Err(PanelError::BusyTimeout);
            }
            self.delay.delay_ms(10);
            waited += 10;
        }
        Ok(())
    }
}
