use core::convert::Infallible;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal::spi::{SpiBus, SpiDevice};
use esp_hal::peripherals::LPWR;
use esp_hal::rtc_cntl::{Rtc, sleep::TimerWakeupSource};
use esp_radio::wifi::WifiController;
use inkcal_core::sleep::{self, SleepControl};
use inkcal_hal_esp32s3::panel::TriColorEpd;
use log::info;

struct BoardShutdown<'a, 'w, SPI, DC, RST, BUSY, D, SDBUS, SDCS> {
    panel: &'a mut TriColorEpd<SPI, DC, RST, BUSY, D>,
    sd_bus: &'a mut SDBUS,
    sd_cs: &'a mut SDCS,
    wifi: &'a mut WifiController<'w>,
    wake_after_secs: Option<u64>,
}

impl<SPI, DC, RST, BUSY, D, SDBUS, SDCS> SleepControl
    for BoardShutdown<'_, '_, SPI, DC, RST, BUSY, D, SDBUS, SDCS>
where
    SPI: SpiDevice<u8>,
    DC: OutputPin,
    RST: OutputPin,
    BUSY: InputPin,
    D: DelayNs,
    SDBUS: SpiBus<u8>,
    SDCS: OutputPin,
{
    type Error = Infallible;

    fn arm_wake_timer(&mut self, seconds: u64) -> Result<(), Infallible> {
        self.wake_after_secs = Some(seconds);
        Ok(())
    }

    fn shutdown_network(&mut self) {
        if let Err(err) = self.wifi.stop() {
            log::warn!("wifi stop failed: {err:?}");
        }
    }

    fn suspend_storage(&mut self) {
        // Panel deep sleep needs a hardware reset to undo; the next boot
        // re-inits anyway.
        if self.panel.sleep().is_err() {
            log::warn!("panel refused its deep sleep command");
        }
        // Keep the SD bus idle and CS deasserted so no transaction remains
        // active across the power gate.
        let _ = self.sd_bus.flush();
        let _ = self.sd_cs.set_high();
    }
}

pub(super) fn enter_deep_sleep<SPI, DC, RST, BUSY, D, SDBUS, SDCS>(
    panel: &mut TriColorEpd<SPI, DC, RST, BUSY, D>,
    sd_bus: &mut SDBUS,
    sd_cs: &mut SDCS,
    wifi: &mut WifiController<'_>,
    seconds: u64,
) -> !
where
    SPI: SpiDevice<u8>,
    DC: OutputPin,
    RST: OutputPin,
    BUSY: InputPin,
    D: DelayNs,
    SDBUS: SpiBus<u8>,
    SDCS: OutputPin,
{
    let mut board = BoardShutdown {
        panel,
        sd_bus,
        sd_cs,
        wifi,
        wake_after_secs: None,
    };
    let seconds = match sleep::prepare_for_sleep(&mut board, seconds) {
        Ok(()) => board.wake_after_secs.unwrap_or(sleep::FALLBACK_SLEEP_SECS),
        Err(never) => match never {},
    };

    info!("entering deep sleep for {seconds}s");
    let wake_source = TimerWakeupSource::new(core::time::Duration::from_secs(seconds));
    let mut rtc = Rtc::new(unsafe { LPWR::steal() });
    rtc.sleep_deep(&[&wake_source]);
}

/// Last-resort sleep for failures so early that no orderly shutdown is
/// possible, short enough that a transient fault self-heals.
pub(super) fn fallback_sleep() -> ! {
    info!(
        "entering fallback deep sleep for {}s",
        sleep::FALLBACK_SLEEP_SECS
    );
    let wake_source =
        TimerWakeupSource::new(core::time::Duration::from_secs(sleep::FALLBACK_SLEEP_SECS));
    let mut rtc = Rtc::new(unsafe { LPWR::steal() });
    rtc.sleep_deep(&[&wake_source]);
}
