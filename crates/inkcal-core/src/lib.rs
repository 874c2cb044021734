#![cfg_attr(not(test), no_std)]

//! Hardware-independent logic for the inkcal e-paper calendar client.
//!
//! Everything in this crate is pure and host-testable: the battery fuel
//! gauge, wall-clock and wake-time math, the SNTP packet codec, the remote
//! log queue, HTTP head parsing, the streaming BMP reader, panel frame
//! compositing, configuration and the sleep plan. Board glue lives in
//! `inkcal-hal-esp32s3`; network and scheduling glue lives in the binary.

pub mod battery;
pub mod bmp;
pub mod clock;
pub mod config;
pub mod frame;
pub mod glyphs;
pub mod http;
pub mod logging;
pub mod ntp;
pub mod retry;
pub mod sleep;
pub mod state;
