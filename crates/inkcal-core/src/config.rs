//! Device configuration: compiled-in defaults plus an optional `config.yaml`
//! override from the SD card.
//!
//! The parser handles the small YAML subset the config file actually uses:
//! top-level sections, one level of indented `key: value` pairs, full-line
//! comments and optional double quotes around values. Unknown keys warn and
//! are skipped so an old firmware survives a newer config file.

use heapless::String;

use crate::clock::TimeOfDay;
use crate::logging::LogLevel;

/// All tunables for one boot cycle. Loaded once, immutable afterwards.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// Where the rendered calendar image lives.
    pub calendar_url: String<128>,
    /// Local time of day to refresh at.
    pub daily_refresh: TimeOfDay,
    /// Download/draw retries per cycle.
    pub calendar_retries: u32,

    pub wifi_ssid: String<32>,
    pub wifi_pass: String<64>,
    pub wifi_retries: u32,

    pub ntp_host: String<64>,
    /// Timezone offset from GMT in hours; applied once at NTP sync.
    pub gmt_offset_hours: i32,

    pub mqtt_enabled: bool,
    pub mqtt_broker: String<64>,
    pub mqtt_port: u16,
    pub mqtt_client_id: String<48>,
    pub mqtt_topic: String<64>,
    pub mqtt_retries: u32,

    pub log_level: LogLevel,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            calendar_url: str_field("http://localhost:8080/calendar.bmp"),
            daily_refresh: TimeOfDay::new(9, 0, 0),
            calendar_retries: 3,
            wifi_ssid: str_field("XXXX"),
            wifi_pass: str_field("XXXX"),
            wifi_retries: 6,
            ntp_host: str_field("pool.ntp.org"),
            gmt_offset_hours: 0,
            mqtt_enabled: false,
            mqtt_broker: str_field("localhost"),
            mqtt_port: 1883,
            mqtt_client_id: str_field("inkcal-client"),
            mqtt_topic: str_field("inkcal/logs"),
            mqtt_retries: 3,
            log_level: LogLevel::Info,
        }
    }
}

fn str_field<const N: usize>(s: &str) -> String<N> {
    let mut out = String::new();
    let _ = out.push_str(s);
    out
}

impl Config {
    /// Applies `config.yaml` text over the current values. Malformed or
    /// unknown entries keep the existing value and warn; a config file can
    /// degrade settings but never brick the boot.
    pub fn apply_yaml(&mut self, text: &str) {
        let mut section = "";
        for raw in text.lines() {
            let line = raw.trim_end();
            if line.trim_start().is_empty() || line.trim_start().starts_with('#') {
                continue;
            }

            let indented = line.starts_with(' ') || line.starts_with('\t');
            let line = line.trim_start();

            if !indented {
                if let Some(name) = line.strip_suffix(':') {
                    section = name.trim();
                } else {
                    log::warn!("config: ignoring top-level entry {line:?}");
                }
                continue;
            }

            let Some((key, value)) = line.split_once(':') else {
                log::warn!("config: ignoring malformed line {line:?}");
                continue;
            };
            self.apply(section, key.trim(), unquote(value.trim()));
        }
    }

    fn apply(&mut self, section: &str, key: &str, value: &str) {
        match (section, key) {
            ("calendar", "url") => set_str(&mut self.calendar_url, key, value),
            ("calendar", "daily_refresh_time") => match TimeOfDay::parse(value) {
                Some(t) => self.daily_refresh = t,
                None => log::warn!("config: bad daily_refresh_time {value:?}"),
            },
            ("calendar", "retries") => set_num(&mut self.calendar_retries, key, value),

            ("wifi", "ssid") => set_str(&mut self.wifi_ssid, key, value),
            ("wifi", "pass") => set_str(&mut self.wifi_pass, key, value),
            ("wifi", "retries") => set_num(&mut self.wifi_retries, key, value),

            ("ntp", "host") => set_str(&mut self.ntp_host, key, value),
            ("ntp", "gmt_offset") => set_num(&mut self.gmt_offset_hours, key, value),
            // Olson zone names need a tz database this device does not
            // carry; a numeric offset is honoured, anything else runs as
            // GMT.
            ("ntp", "timezone") => match value.parse() {
                Ok(v) => self.gmt_offset_hours = v,
                Err(_) => {
                    log::warn!("config: timezone {value:?} unsupported, using GMT offset 0");
                    self.gmt_offset_hours = 0;
                }
            },

            ("mqtt_logger", "enabled") => match value {
                "true" => self.mqtt_enabled = true,
                "false" => self.mqtt_enabled = false,
                _ => log::warn!("config: bad mqtt_logger.enabled {value:?}"),
            },
            ("mqtt_logger", "broker") => set_str(&mut self.mqtt_broker, key, value),
            ("mqtt_logger", "port") => set_num(&mut self.mqtt_port, key, value),
            ("mqtt_logger", "client_id") => set_str(&mut self.mqtt_client_id, key, value),
            ("mqtt_logger", "topic") => set_str(&mut self.mqtt_topic, key, value),
            ("mqtt_logger", "retries") => set_num(&mut self.mqtt_retries, key, value),

            ("logging", "level") => match parse_level(value) {
                Some(level) => self.log_level = level,
                None => log::warn!("config: unknown log level {value:?}"),
            },

            _ => log::warn!("config: unknown key {section}.{key}"),
        }
    }
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

fn set_str<const N: usize>(field: &mut String<N>, key: &str, value: &str) {
    let mut replacement = String::new();
    if replacement.push_str(value).is_err() {
        log::warn!("config: value for {key} too long, keeping previous");
        return;
    }
    *field = replacement;
}

fn set_num<T: core::str::FromStr>(field: &mut T, key: &str, value: &str) {
    match value.parse() {
        Ok(v) => *field = v,
        Err(_) => log::warn!("config: bad numeric value for {key}: {value:?}"),
    }
}

fn parse_level(value: &str) -> Option<LogLevel> {
    let names = [
        ("critical", LogLevel::Critical),
        ("error", LogLevel::Error),
        ("warning", LogLevel::Warning),
        ("notice", LogLevel::Notice),
        ("info", LogLevel::Info),
        ("debug", LogLevel::Debug),
    ];
    names
        .into_iter()
        .find(|(name, _)| value.eq_ignore_ascii_case(name))
        .map(|(_, level)| level)
}
