//! Persisted state in RTC fast memory.
//!
//! RTC fast RAM keeps its contents across deep sleep but not across a
//! power loss, and it wakes holding garbage after a cold boot. A magic word
//! distinguishes a surviving copy from noise; anything without it reads as
//! the zeroed first-boot state.

use inkcal_core::state::PersistedState;

const STATE_MAGIC: u32 = 0x494E_4B43; // "INKC"

#[derive(Clone, Copy)]
struct Retained {
    magic: u32,
    state: PersistedState,
}

#[esp_hal::ram(unstable(rtc_fast))]
static mut RETAINED: Retained = Retained {
    magic: 0,
    state: PersistedState {
        boot_count: 0,
        last_boot_time: 0,
        last_sleep_time: 0,
        target_wake_time: 0,
        drift_secs: 0,
    },
};

/// Reads the state that survived deep sleep, or the default after a cold
/// boot or corruption.
pub fn load() -> PersistedState {
    // Single-core startup path; nothing else touches RETAINED yet.
    let retained = unsafe { &*&raw const RETAINED };
    if retained.magic == STATE_MAGIC {
        retained.state
    } else {
        PersistedState::default()
    }
}

/// Writes the state back so the next boot can pick it up.
pub fn store(state: &PersistedState) {
    let retained = unsafe { &mut *&raw mut RETAINED };
    retained.state = *state;
    retained.magic = STATE_MAGIC;
}
