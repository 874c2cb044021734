//! Remote log queue: syslog-style levels, buffered until a broker accepts.
//!
//! Lines are echoed to the serial console through the `log` facade the
//! moment they are produced. The remote copy waits in a bounded queue until
//! the MQTT session is up, then drains oldest-first so broker-side order
//! matches what actually happened. The transport itself lives in the
//! binary; this type only decides what to keep and when to hand it over.

use core::fmt::Write;

/// How many lines survive a cycle with no broker. Overflow drops the
/// oldest line first.
pub const QUEUE_DEPTH: usize = 10;

/// One formatted log line.
pub type LogLine = heapless::String<160>;

/// Syslog-style severity, most severe first.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum LogLevel {
    Critical = 0,
    Error = 1,
    Warning = 2,
    Notice = 3,
    Info = 4,
    Debug = 5,
}

impl LogLevel {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Critical => "CRITICAL",
            Self::Error => "ERROR",
            Self::Warning => "WARNING",
            Self::Notice => "NOTICE",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
        }
    }

    const fn as_log(self) -> log::Level {
        match self {
            Self::Critical | Self::Error => log::Level::Error,
            Self::Warning => log::Level::Warn,
            Self::Notice | Self::Info => log::Level::Info,
            Self::Debug => log::Level::Debug,
        }
    }
}

/// Publication state: buffering until a broker connection exists, then
/// direct hand-off.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Mode {
    Buffering,
    Direct,
}

pub struct RemoteLogger {
    threshold: LogLevel,
    queue: heapless::Deque<LogLine, QUEUE_DEPTH>,
    mode: Mode,
    dropped: u32,
}

impl RemoteLogger {
    pub const fn new(threshold: LogLevel) -> Self {
        Self {
            threshold,
            queue: heapless::Deque::new(),
            mode: Mode::Buffering,
            dropped: 0,
        }
    }

    /// Records one message. Returns a line the caller must publish now
    /// (Direct mode only); in Buffering mode the line is queued instead.
    ///
    /// Messages less severe than the threshold vanish entirely, serial echo
    /// included.
    pub fn log(&mut self, level: LogLevel, timestamp: &str, msg: &str) -> Option<LogLine> {
        if level > self.threshold {
            return None;
        }

        let mut line = LogLine::new();
        if write!(line, "{timestamp} - {} - {msg}", level.label()).is_err() {
            // Overlong message: keep the truncated prefix.
        }
        log::log!(level.as_log(), "{}", line.as_str());

        match self.mode {
            Mode::Direct => Some(line),
            Mode::Buffering => {
                if self.queue.is_full() {
                    self.queue.pop_front();
                    self.dropped += 1;
                }
                // Capacity was just ensured.
                let _ = self.queue.push_back(line);
                None
            }
        }
    }

    /// Switches to Direct mode. The caller must drain [`Self::pop_queued`]
    /// to exhaustion before logging anything new, so the backlog reaches
    /// the broker in FIFO order ahead of fresh lines.
    pub fn mark_connected(&mut self) {
        self.mode = Mode::Direct;
    }

    /// Falls back to Buffering after a broker loss.
    pub fn mark_disconnected(&mut self) {
        self.mode = Mode::Buffering;
    }

    /// Oldest buffered line without removing it, so a caller whose
    /// hand-off can fail pops only after the line actually got through.
    pub fn peek_queued(&self) -> Option<&LogLine> {
        self.queue.front()
    }

    /// Oldest buffered line, if any.
    pub fn pop_queued(&mut self) -> Option<LogLine> {
        self.queue.pop_front()
    }

    pub fn is_direct(&self) -> bool {
        self.mode == Mode::Direct
    }

    /// Lines lost to queue overflow since boot.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TS: &str = "01-01-2024 09:00:00";

    #[test]
    fn lines_carry_timestamp_and_level() {
        let mut logger = RemoteLogger::new(LogLevel::Debug);
        logger.mark_connected();
        let line = logger.log(LogLevel::Warning, TS, "low battery").unwrap();
        assert_eq!(line.as_str(), "01-01-2024 09:00:00 - WARNING - low battery");
    }

    #[test]
    fn messages_past_the_threshold_are_dropped() {
        let mut logger = RemoteLogger::new(LogLevel::Warning);
        logger.mark_connected();
        assert!(logger.log(LogLevel::Debug, TS, "noise").is_none());
        assert!(logger.log(LogLevel::Info, TS, "noise").is_none());
        assert!(logger.log(LogLevel::Warning, TS, "kept").is_some());
        assert!(logger.log(LogLevel::Critical, TS, "kept").is_some());
    }

    #[test]
    fn buffered_lines_drain_in_fifo_order() {
        let mut logger = RemoteLogger::new(LogLevel::Debug);
        assert!(logger.log(LogLevel::Info, TS, "a").is_none());
        assert!(logger.log(LogLevel::Info, TS, "b").is_none());
        assert!(logger.log(LogLevel::Info, TS, "c").is_none());

        logger.mark_connected();
        let drained: Vec<String> = core::iter::from_fn(|| logger.pop_queued())
            .map(|l| l.as_str().to_owned())
            .collect();
        assert!(drained[0].ends_with("- a"));
        assert!(drained[1].ends_with("- b"));
        assert!(drained[2].ends_with("- c"));
    }

    #[test]
    fn overflow_drops_the_oldest_line() {
        let mut logger = RemoteLogger::new(LogLevel::Debug);
        for i in 0..QUEUE_DEPTH + 3 {
            let mut msg = heapless::String::<8>::new();
            write!(msg, "{i}").unwrap();
            logger.log(LogLevel::Info, TS, &msg);
        }
        assert_eq!(logger.dropped(), 3);

        logger.mark_connected();
        let first = logger.pop_queued().unwrap();
        assert!(first.ends_with("- 3"), "oldest surviving line was {first}");
        let mut last = first;
        while let Some(line) = logger.pop_queued() {
            last = line;
        }
        assert!(last.ends_with("- 12"));
    }

    #[test]
    fn peeked_lines_stay_queued_until_popped() {
        let mut logger = RemoteLogger::new(LogLevel::Debug);
        logger.log(LogLevel::Info, TS, "a");
        logger.log(LogLevel::Info, TS, "b");

        // A failed hand-off peeks without popping; nothing is lost.
        assert!(logger.peek_queued().unwrap().ends_with("- a"));
        assert!(logger.peek_queued().unwrap().ends_with("- a"));

        assert!(logger.pop_queued().unwrap().ends_with("- a"));
        assert!(logger.peek_queued().unwrap().ends_with("- b"));
        assert!(logger.pop_queued().unwrap().ends_with("- b"));
        assert!(logger.peek_queued().is_none());
    }

    #[test]
    fn direct_mode_bypasses_the_queue() {
        let mut logger = RemoteLogger::new(LogLevel::Debug);
        logger.mark_connected();
        assert!(logger.log(LogLevel::Info, TS, "x").is_some());
        assert!(logger.pop_queued().is_none());
    }

    #[test]
    fn disconnect_resumes_buffering() {
        let mut logger = RemoteLogger::new(LogLevel::Debug);
        logger.mark_connected();
        logger.mark_disconnected();
        assert!(logger.log(LogLevel::Info, TS, "x").is_none());
        assert!(logger.pop_queued().is_some());
    }
}
