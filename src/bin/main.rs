#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use core::fmt::Write as _;

use embassy_executor::Spawner;
use embassy_time::{Instant, Timer};
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal::spi::{SpiBus, SpiDevice};
use embedded_hal_bus::spi::ExclusiveDevice;
use esp_hal::clock::CpuClock;
use esp_hal::delay::Delay;
use esp_hal::gpio::{Input, InputConfig, Level, Output, OutputConfig, Pull};
use esp_hal::rtc_cntl::{SocResetReason, reset_reason, wakeup_cause};
use esp_hal::spi::master::{Config as SpiConfig, Spi};
use esp_hal::system::Cpu;
use esp_hal::time::Rate;
use esp_hal::timer::timg::TimerGroup;
use esp_radio::wifi::WifiController;
use inkcal_core::battery::{BatteryProfile, LIPO_2000MAH};
use inkcal_core::clock::{WallClock, compute_wake, fmt_timestamp};
use inkcal_core::config::Config;
use inkcal_core::frame::PanelFrame;
use inkcal_core::logging::{LogLevel, RemoteLogger};
use inkcal_core::retry::RetryPlan;
use inkcal_core::sleep::{self, WakeDecision};
use inkcal_core::state::PersistedState;
use inkcal_hal_esp32s3::battery_adc::BatterySense;
use inkcal_hal_esp32s3::panel::TriColorEpd;
use inkcal_hal_esp32s3::{rtc_state, storage};
use log::{LevelFilter, info, warn};
use static_cell::{ConstStaticCell, StaticCell};

#[path = "main/fetch.rs"]
mod fetch;
#[path = "main/net.rs"]
mod net;
#[path = "main/power.rs"]
mod power;
#[path = "main/remote_log.rs"]
mod remote_log;
#[path = "main/timesync.rs"]
mod timesync;

const PANEL_SPI_HZ: u32 = 10_000_000;
const SD_SPI_HZ: u32 = 1_000_000;
const CONFIG_BUF_BYTES: usize = 2_048;
const FETCH_RETRY_PAUSE_SECS: u64 = 5;

/// Build-time Wi-Fi credentials; the SD config file overrides both.
const WIFI_SSID_OVERRIDE: Option<&str> = option_env!("INKCAL_WIFI_SSID");
const WIFI_PASSWORD_OVERRIDE: Option<&str> = option_env!("INKCAL_WIFI_PASSWORD");

/// Both panel planes, kept out of the main stack frame.
static FRAME: ConstStaticCell<PanelFrame> = ConstStaticCell::new(PanelFrame::new());
static NET_RESOURCES: StaticCell<embassy_net::StackResources<6>> = StaticCell::new();

/// What this particular board actually has, probed once at startup. The
/// pipeline itself is the same on every board; absent pieces just skip
/// their stages.
struct Capabilities {
    has_storage: bool,
    has_remote_logging: bool,
    battery_profile: &'static BatteryProfile,
}

#[panic_handler]
fn panic(_: &core::panic::PanicInfo) -> ! {
    loop {}
}

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

fn uptime_secs() -> u64 {
    Instant::now().as_secs()
}

fn fmt_msg<const N: usize>(args: core::fmt::Arguments<'_>) -> heapless::String<N> {
    let mut msg = heapless::String::new();
    // Overlong messages keep their truncated prefix.
    let _ = msg.write_fmt(args);
    msg
}

/// Records one line for serial and the remote queue, stamped with the
/// current wall-clock estimate.
async fn report(
    logger: &mut RemoteLogger,
    link: &mut Option<remote_log::MqttLink<'_>>,
    clock: &WallClock,
    level: LogLevel,
    msg: &str,
) {
    let ts = fmt_timestamp(clock.now(uptime_secs()));
    remote_log::emit(logger, link, level, &ts, msg).await;
}

/// Persists the cycle state, then powers everything down and sleeps.
/// `clock_valid` false keeps the stored wake target at zero so the next
/// boot does not seed its clock from garbage.
fn finish_cycle<SPI, DC, RST, BUSY, D, SDBUS, SDCS>(
    mut persisted: PersistedState,
    now: i64,
    decision: WakeDecision,
    clock_valid: bool,
    panel: &mut TriColorEpd<SPI, DC, RST, BUSY, D>,
    sd_bus: &mut SDBUS,
    sd_cs: &mut SDCS,
    wifi: &mut WifiController<'_>,
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
    let seconds = sleep::plan_sleep(decision, now);
    persisted.last_sleep_time = now;
    persisted.target_wake_time = if clock_valid {
        now.saturating_add(seconds as i64)
    } else {
        0
    };
    rtc_state::store(&persisted);

    if clock_valid {
        info!(
            "next wake at {} ({seconds}s away)",
            fmt_timestamp(persisted.target_wake_time)
        );
    }
    power::enter_deep_sleep(panel, sd_bus, sd_cs, wifi, seconds)
}

#[allow(
    clippy::large_stack_frames,
    reason = "it's not unusual to allocate larger buffers etc. in main"
)]
#[esp_rtos::main]
async fn main(_spawner: Spawner) -> ! {
    esp_println::logger::init_logger(LevelFilter::Info);
    esp_println::println!("boot: inkcal starting");

    let hal_config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(hal_config);
    let boot_reset_reason = reset_reason(Cpu::ProCpu);
    let boot_wakeup_cause = wakeup_cause();
    info!(
        "boot reset_reason={:?} wakeup_cause={:?}",
        boot_reset_reason, boot_wakeup_cause
    );
    let woke_from_deep_sleep = boot_reset_reason == Some(SocResetReason::CoreDeepSleep);

    // esp-radio requires an allocator.
    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 65536);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    let mut persisted = rtc_state::load();
    persisted.record_boot();

    // Until NTP answers, the scheduled wake target doubles as a
    // provisional wall clock: the RTC timer fired at that very time.
    let mut clock = WallClock::unset();
    if woke_from_deep_sleep && persisted.target_wake_time != 0 {
        clock.set(persisted.target_wake_time, uptime_secs());
    }

    // Wiring used by this board:
    // EPD on SPI2: SCK=GPIO12, MOSI=GPIO11, CS=GPIO10, DC=GPIO9,
    //              RST=GPIO46, BUSY=GPIO3
    // SD  on SPI3: SCK=GPIO7, MOSI=GPIO40, MISO=GPIO41, CS=GPIO8
    // Battery divider on GPIO4 (ADC1)
    let mut sd_bus = Spi::new(
        peripherals.SPI3,
        SpiConfig::default()
            .with_frequency(Rate::from_hz(SD_SPI_HZ))
            .with_mode(esp_hal::spi::Mode::_0),
    )
    .unwrap()
    .with_sck(peripherals.GPIO7)
    .with_mosi(peripherals.GPIO40)
    .with_miso(peripherals.GPIO41);
    let mut sd_cs = Output::new(peripherals.GPIO8, Level::High, OutputConfig::default());
    let mut sd_delay = Delay::new();

    // Compiled defaults, then build-time credentials, then the SD file.
    let mut config = Config::default();
    if let Some(ssid) = WIFI_SSID_OVERRIDE {
        config.wifi_ssid.clear();
        let _ = config.wifi_ssid.push_str(ssid);
    }
    if let Some(pass) = WIFI_PASSWORD_OVERRIDE {
        config.wifi_pass.clear();
        let _ = config.wifi_pass.push_str(pass);
    }

    let mut has_storage = true;
    {
        let mut config_buf = [0u8; CONFIG_BUF_BYTES];
        match storage::read_config(&mut sd_bus, &mut sd_cs, &mut sd_delay, &mut config_buf) {
            Ok(Some(len)) => match core::str::from_utf8(&config_buf[..len]) {
                Ok(text) => {
                    config.apply_yaml(text);
                    info!("configuration loaded from sd card");
                }
                Err(_) => warn!("config file is not valid utf-8, using defaults"),
            },
            Ok(None) => info!("no config file on sd card, using defaults"),
            Err(err) => {
                warn!("sd card unavailable: {err:?}");
                has_storage = false;
            }
        }
    }

    let caps = Capabilities {
        has_storage,
        has_remote_logging: config.mqtt_enabled,
        battery_profile: &LIPO_2000MAH,
    };

    let mut battery = BatterySense::new(peripherals.ADC1, peripherals.GPIO4);
    let battery_mv = battery.read_millivolts();
    let battery_percent = caps.battery_profile.capacity(battery_mv as f32 / 1_000.0);

    let frame = FRAME.take();

    let panel_spi = Spi::new(
        peripherals.SPI2,
        SpiConfig::default()
            .with_frequency(Rate::from_hz(PANEL_SPI_HZ))
            .with_mode(esp_hal::spi::Mode::_0),
    )
    .unwrap()
    .with_sck(peripherals.GPIO12)
    .with_mosi(peripherals.GPIO11);
    let panel_cs = Output::new(peripherals.GPIO10, Level::High, OutputConfig::default());
    let panel_device = ExclusiveDevice::new(panel_spi, panel_cs, Delay::new()).unwrap();
    let mut panel = TriColorEpd::new(
        panel_device,
        Output::new(peripherals.GPIO9, Level::Low, OutputConfig::default()),
        Output::new(peripherals.GPIO46, Level::High, OutputConfig::default()),
        Input::new(peripherals.GPIO3, InputConfig::default().with_pull(Pull::Up)),
        Delay::new(),
    );
    if let Err(err) = panel.init() {
        warn!("panel init failed: {err:?}");
    }

    // Bring last cycle's image back so a failed fetch still shows a
    // calendar instead of a blank panel.
    let mut restored = false;
    if caps.has_storage {
        let (mono, chroma) = frame.planes_mut();
        match storage::load_frame(&mut sd_bus, &mut sd_cs, &mut sd_delay, mono, chroma) {
            Ok(found) => {
                restored = found;
                if !found {
                    frame.clear();
                }
            }
            Err(err) => {
                warn!("frame restore failed: {err:?}");
                frame.clear();
            }
        }
    }

    let radio = match esp_radio::init() {
        Ok(radio) => radio,
        Err(err) => {
            warn!("esp-radio init failed: {err:?}");
            power::fallback_sleep();
        }
    };
    let (mut wifi_controller, interfaces) =
        match esp_radio::wifi::new(&radio, peripherals.WIFI, esp_radio::wifi::Config::default()) {
            Ok(parts) => parts,
            Err(err) => {
                warn!("wifi peripheral init failed: {err:?}");
                power::fallback_sleep();
            }
        };

    let stack_config = embassy_net::Config::dhcpv4(Default::default());
    let (stack, mut net_runner) = embassy_net::new(
        interfaces.sta,
        stack_config,
        NET_RESOURCES.init(embassy_net::StackResources::<6>::new()),
        0x71C3_A9D4_0B52_8F6E,
    );

    let net_future = net_runner.run();
    let cycle_future = async {
        let mut logger = RemoteLogger::new(config.log_level);
        // Declared before `mqtt` so the link's borrow of these buffers
        // cannot outlive them.
        let mut link_bufs = remote_log::LinkBuffers::new();
        let mut mqtt: Option<remote_log::MqttLink<'_>> = None;

        {
            let msg = fmt_msg::<128>(format_args!(
                "boot #{}, deep_sleep_wake={woke_from_deep_sleep}, frame_restored={restored}",
                persisted.boot_count
            ));
            report(&mut logger, &mut mqtt, &clock, LogLevel::Info, &msg).await;

            let level = if battery_percent <= 10 {
                LogLevel::Warning
            } else {
                LogLevel::Info
            };
            let msg = fmt_msg::<64>(format_args!("battery {battery_mv} mV, {battery_percent}%"));
            report(&mut logger, &mut mqtt, &clock, level, &msg).await;
        }

        if let Err(err) = net::connect(
            &mut wifi_controller,
            stack,
            &config.wifi_ssid,
            &config.wifi_pass,
            config.wifi_retries,
        )
        .await
        {
            warn!("wifi bring-up failed: {err:?}");
            report(
                &mut logger,
                &mut mqtt,
                &clock,
                LogLevel::Error,
                "wifi connection failed, showing error panel",
            )
            .await;

            let now = clock.now(uptime_secs());
            frame.compose_error("WIFI FAILED", &fmt_timestamp(now));
            frame.draw_battery(battery_percent, true);
            let (mono, chroma) = frame.planes();
            let shown = match panel.write_frame(mono, chroma) {
                Ok(()) => panel.refresh(),
                Err(err) => Err(err),
            };
            if let Err(err) = shown {
                warn!("error panel refresh failed: {err:?}");
            }

            let decision = compute_wake(now, config.daily_refresh, clock.is_set());
            finish_cycle(
                persisted,
                now,
                decision,
                clock.is_set(),
                &mut panel,
                &mut sd_bus,
                &mut sd_cs,
                &mut wifi_controller,
            );
        }

        match timesync::fetch_unix_time(stack, &config.ntp_host).await {
            Ok(utc) => {
                let local = utc + config.gmt_offset_hours as i64 * 3_600;
                let uptime = uptime_secs();
                clock.set(local, uptime);
                persisted.record_drift(local - uptime as i64);
                let msg = fmt_msg::<96>(format_args!(
                    "time synced: {} (drift {}s)",
                    fmt_timestamp(local),
                    persisted.drift_secs
                ));
                report(&mut logger, &mut mqtt, &clock, LogLevel::Info, &msg).await;
            }
            Err(err) => {
                warn!("ntp sync failed: {err:?}");
                report(
                    &mut logger,
                    &mut mqtt,
                    &clock,
                    LogLevel::Warning,
                    "time sync failed, continuing on the provisional clock",
                )
                .await;
            }
        }

        if caps.has_remote_logging {
            match remote_log::connect(stack, &config, &mut link_bufs).await {
                Ok(mut link) => match remote_log::drain_backlog(&mut logger, &mut link).await {
                    Ok(()) => mqtt = Some(link),
                    Err(code) => {
                        // An unusable session stays buffering; the backlog
                        // is still queued for the serial log.
                        warn!("mqtt backlog drain failed, dropping session: {code:?}");
                        link.shutdown().await;
                    }
                },
                Err(err) => warn!("mqtt connect failed, logs stay local: {err:?}"),
            }
        }

        let mut outcome: Option<fetch::FetchOutcome> = None;
        for attempt in RetryPlan::new(config.calendar_retries) {
            match fetch::fetch_image(stack, &config.calendar_url, battery_mv, frame).await {
                Ok(result) => {
                    let msg = match result.content_length {
                        Some(len) => fmt_msg::<96>(format_args!(
                            "calendar fetched: {}x{} depth {}, {len} bytes",
                            result.info.width, result.info.height, result.info.depth
                        )),
                        None => fmt_msg::<96>(format_args!(
                            "calendar fetched: {}x{} depth {}",
                            result.info.width, result.info.height, result.info.depth
                        )),
                    };
                    report(&mut logger, &mut mqtt, &clock, LogLevel::Info, &msg).await;
                    outcome = Some(result);
                    break;
                }
                Err(err) => {
                    let msg =
                        fmt_msg::<128>(format_args!("fetch attempt #{attempt} failed: {err:?}"));
                    report(&mut logger, &mut mqtt, &clock, LogLevel::Warning, &msg).await;
                    Timer::after_secs(FETCH_RETRY_PAUSE_SECS).await;
                }
            }
        }

        let mut wake_tod = config.daily_refresh;
        match &outcome {
            Some(result) => {
                if let Some(tod) = result.next_refresh {
                    let msg = fmt_msg::<64>(format_args!(
                        "server moved next refresh to {:02}:{:02}:{:02}",
                        tod.hour, tod.minute, tod.second
                    ));
                    report(&mut logger, &mut mqtt, &clock, LogLevel::Notice, &msg).await;
                    wake_tod = tod;
                }
                if caps.has_storage {
                    let (mono, chroma) = frame.planes();
                    if let Err(err) =
                        storage::save_frame(&mut sd_bus, &mut sd_cs, &mut sd_delay, mono, chroma)
                    {
                        warn!("frame save failed: {err:?}");
                    }
                }
                frame.draw_battery(battery_percent, false);
            }
            None => {
                report(
                    &mut logger,
                    &mut mqtt,
                    &clock,
                    LogLevel::Error,
                    "calendar refresh failed, showing error panel",
                )
                .await;
                frame.compose_error("REFRESH FAILED", &fmt_timestamp(clock.now(uptime_secs())));
                frame.draw_battery(battery_percent, true);
            }
        }

        let mut displayed = false;
        for attempt in RetryPlan::new(config.calendar_retries) {
            let (mono, chroma) = frame.planes();
            let result = match panel.write_frame(mono, chroma) {
                Ok(()) => panel.refresh(),
                Err(err) => Err(err),
            };
            match result {
                Ok(()) => {
                    displayed = true;
                    break;
                }
                Err(err) => {
                    let msg =
                        fmt_msg::<128>(format_args!("display attempt #{attempt} failed: {err:?}"));
                    report(&mut logger, &mut mqtt, &clock, LogLevel::Warning, &msg).await;
                    // A wedged controller sometimes recovers after reset.
                    let _ = panel.init();
                }
            }
        }
        let (level, msg) = if displayed {
            (LogLevel::Info, "display refreshed")
        } else {
            (LogLevel::Error, "display refresh failed")
        };
        report(&mut logger, &mut mqtt, &clock, level, msg).await;

        let now = clock.now(uptime_secs());
        let decision = compute_wake(now, wake_tod, clock.is_set());
        {
            let msg = fmt_msg::<96>(format_args!(
                "cycle done, sleeping (wake plan {decision:?})"
            ));
            report(&mut logger, &mut mqtt, &clock, LogLevel::Notice, &msg).await;
        }
        if let Some(link) = mqtt.take() {
            link.shutdown().await;
        }

        finish_cycle(
            persisted,
            now,
            decision,
            clock.is_set(),
            &mut panel,
            &mut sd_bus,
            &mut sd_cs,
            &mut wifi_controller,
        )
    };

    let _ = embassy_futures::join::join(net_future, cycle_future).await;
    unreachable!()
}
