//! Battery voltage sensing through ADC1.
//!
//! The cell sits behind a 1:2 divider into GPIO4, so the pin sees roughly
//! half the cell voltage. The scale factor was calibrated against a
//! multimeter rather than derived; adjust it if readings drift from
//! reality.

use esp_hal::Blocking;
use esp_hal::analog::adc::{Adc, AdcConfig, AdcPin, Attenuation};
use esp_hal::peripherals::{ADC1, GPIO4};

/// Divider plus characterization fudge, in thousandths.
const CALIBRATION_MILLI: u32 = 2_140;
const ADC_FULL_SCALE: u32 = 4_095;
const ADC_REF_MV: u32 = 3_300;

pub struct BatterySense<'d> {
    adc: Adc<'d, ADC1<'d>, Blocking>,
    pin: AdcPin<GPIO4<'d>, ADC1<'d>>,
}

impl<'d> BatterySense<'d> {
    pub fn new(adc: ADC1<'d>, pin: GPIO4<'d>) -> Self {
        let mut config = AdcConfig::new();
        let pin = config.enable_pin(pin, Attenuation::_11dB);
        let adc = Adc::new(adc, config);
        Self { adc, pin }
    }

    /// One blocking conversion, scaled to cell millivolts.
    pub fn read_millivolts(&mut self) -> u32 {
        let raw = loop {
            match self.adc.read_oneshot(&mut self.pin) {
                Ok(value) => break value as u32,
                Err(nb::Error::WouldBlock) => continue,
                Err(nb::Error::Other(_)) => {
                    log::warn!("battery ADC conversion failed, reporting empty");
                    break 0;
                }
            }
        };
        raw * ADC_REF_MV / ADC_FULL_SCALE * CALIBRATION_MILLI / 1_000
    }

    /// Cell voltage in volts for the capacity lookup.
    pub fn read_voltage(&mut self) -> f32 {
        self.read_millivolts() as f32 / 1_000.0
    }
}
