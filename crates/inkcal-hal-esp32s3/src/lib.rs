#![no_std]

//! ESP32-S3 board glue for the inkcal firmware: tri-color e-paper panel
//! adapter, SD-card config and frame storage, battery sensing and the
//! RTC-memory persisted state.

pub mod battery_adc;
pub mod panel;
pub mod rtc_state;
pub mod storage;
