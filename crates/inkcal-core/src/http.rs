//! Minimal HTTP/1.x client pieces: URL splitting, request building and an
//! incremental response-head parser.
//!
//! The fetch path needs exactly one verb against one LAN server, so this
//! stays deliberately small: no chunked encoding, no redirects, no TLS.

use core::fmt::Write;

use crate::clock::TimeOfDay;

pub const DEFAULT_PORT: u16 = 80;

/// Longest accepted status or header line.
const MAX_LINE: usize = 256;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HttpError {
    /// URL was not `http://host[:port][/path]`.
    BadUrl,
    /// Malformed status line.
    BadStatusLine,
    /// A head line exceeded [`MAX_LINE`].
    LineTooLong,
}

/// A split `http://` URL borrowing from the configuration string.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Url<'a> {
    pub host: &'a str,
    pub port: u16,
    pub path: &'a str,
}

impl<'a> Url<'a> {
    pub fn parse(raw: &'a str) -> Result<Self, HttpError> {
        let rest = raw.strip_prefix("http://").ok_or(HttpError::BadUrl)?;
        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, "/"),
        };

        let (host, port) = match authority.rfind(':') {
            Some(i) => {
                let port: u16 = authority[i + 1..].parse().map_err(|_| HttpError::BadUrl)?;
                (&authority[..i], port)
            }
            None => (authority, DEFAULT_PORT),
        };

        if host.is_empty() {
            return Err(HttpError::BadUrl);
        }

        Ok(Self { host, port, path })
    }
}

/// Builds the GET request for the rendered image, reporting the measured
/// battery voltage as a query parameter so the server can draw it.
pub fn build_image_request(url: &Url<'_>, battery_mv: Option<u32>) -> heapless::String<384> {
    let mut req = heapless::String::new();
    let _ = write!(req, "GET {}", url.path);
    if let Some(mv) = battery_mv {
        let sep = if url.path.contains('?') { '&' } else { '?' };
        let _ = write!(req, "{sep}bvolt={}.{:02}", mv / 1_000, mv % 1_000 / 10);
    }
    let _ = write!(
        req,
        " HTTP/1.1\r\nHost: {}\r\nUser-Agent: inkcal\r\nConnection: close\r\n\r\n",
        url.host
    );
    req
}

/// Everything interesting from a response head.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ResponseHead {
    pub status: u16,
    pub content_length: Option<u32>,
    /// Server-driven wake override from the `X-Next-Refresh` header,
    /// applying to this cycle only.
    pub next_refresh: Option<TimeOfDay>,
}

/// Return of [`HeadParser::feed`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HeadProgress {
    /// More head bytes are needed.
    Partial,
    /// Head finished; the body starts `consumed` bytes into the last fed
    /// chunk.
    Complete { consumed: usize },
}

/// Incremental parser for an HTTP/1.x response head. Bytes arrive in
/// whatever chunks the socket produces; leftover body bytes in the final
/// chunk are reported, not swallowed.
#[derive(Debug, Default)]
pub struct HeadParser {
    head: ResponseHead,
    line: heapless::Vec<u8, MAX_LINE>,
    saw_status: bool,
}

impl HeadParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn head(&self) -> &ResponseHead {
        &self.head
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Result<HeadProgress, HttpError> {
        for (i, &b) in chunk.iter().enumerate() {
            if b != b'\n' {
                if self.line.push(b).is_err() {
                    return Err(HttpError::LineTooLong);
                }
                continue;
            }

            let mut line = core::mem::take(&mut self.line);
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = core::str::from_utf8(&line).map_err(|_| HttpError::BadStatusLine)?;

            if !self.saw_status {
                self.head.status = parse_status_line(line)?;
                self.saw_status = true;
            } else if line.is_empty() {
                return Ok(HeadProgress::Complete { consumed: i + 1 });
            } else {
                self.record_header(line);
            }
        }
        Ok(HeadProgress::Partial)
    }

    fn record_header(&mut self, line: &str) {
        let Some((name, value)) = line.split_once(':') else {
            return;
        };
        let name = name.trim();
        let value = value.trim();

        if name.eq_ignore_ascii_case("content-length") {
            self.head.content_length = value.parse().ok();
        } else if name.eq_ignore_ascii_case("x-next-refresh") {
            self.head.next_refresh = TimeOfDay::parse(value);
            if self.head.next_refresh.is_none() {
                log::warn!("ignoring malformed X-Next-Refresh value {value:?}");
            }
        }
    }
}

fn parse_status_line(line: &str) -> Result<u16, HttpError> {
    let mut parts = line.split_ascii_whitespace();
    let version = parts.next().ok_or(HttpError::BadStatusLine)?;
    if !version.starts_with("HTTP/1.") {
        return Err(HttpError::BadStatusLine);
    }
    parts
        .next()
        .and_then(|code| code.parse().ok())
        .ok_or(HttpError::BadStatusLine)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_split_into_host_port_path() {
        assert_eq!(
            Url::parse("http://calendar.lan:8080/calendar.bmp"),
            Ok(Url {
                host: "calendar.lan",
                port: 8080,
                path: "/calendar.bmp"
            })
        );
        assert_eq!(
            Url::parse("http://10.0.0.5"),
            Ok(Url {
                host: "10.0.0.5",
                port: DEFAULT_PORT,
                path: "/"
            })
        );
    }

    #[test]
    fn bad_urls_are_rejected() {
        assert_eq!(Url::parse("https://secure.lan/x"), Err(HttpError::BadUrl));
        assert_eq!(Url::parse("calendar.lan/x"), Err(HttpError::BadUrl));
        assert_eq!(Url::parse("http://:80/x"), Err(HttpError::BadUrl));
        assert_eq!(Url::parse("http://h:99999/x"), Err(HttpError::BadUrl));
    }

    #[test]
    fn request_reports_battery_voltage() {
        let url = Url::parse("http://calendar.lan/calendar.bmp").unwrap();
        let req = build_image_request(&url, Some(4_058));
        assert!(req.starts_with("GET /calendar.bmp?bvolt=4.05 HTTP/1.1\r\n"));
        assert!(req.contains("Host: calendar.lan\r\n"));
        assert!(req.ends_with("Connection: close\r\n\r\n"));
    }

    #[test]
    fn request_without_voltage_has_no_query() {
        let url = Url::parse("http://calendar.lan/calendar.bmp").unwrap();
        let req = build_image_request(&url, None);
        assert!(req.starts_with("GET /calendar.bmp HTTP/1.1\r\n"));
    }

    #[test]
    fn existing_query_is_extended_not_replaced() {
        let url = Url::parse("http://calendar.lan/cal.bmp?user=7").unwrap();
        let req = build_image_request(&url, Some(3_700));
        assert!(req.starts_with("GET /cal.bmp?user=7&bvolt=3.70 HTTP/1.1\r\n"));
    }

    #[test]
    fn head_parses_across_arbitrary_chunk_splits() {
        let head = b"HTTP/1.1 200 OK\r\nContent-Length: 1234\r\nX-Next-Refresh: 07:30:00\r\n\r\nBMxx";
        for split in 1..head.len() - 1 {
            let mut p = HeadParser::new();
            let first = p.feed(&head[..split]).unwrap();
            let progress = match first {
                HeadProgress::Complete { consumed } => (true, consumed),
                HeadProgress::Partial => match p.feed(&head[split..]).unwrap() {
                    HeadProgress::Complete { consumed } => (false, consumed),
                    HeadProgress::Partial => panic!("head never completed at split {split}"),
                },
            };

            // Body must begin exactly at "BMxx".
            let body_start = if progress.0 {
                progress.1
            } else {
                split + progress.1
            };
            assert_eq!(&head[body_start..], b"BMxx", "split {split}");

            assert_eq!(p.head().status, 200);
            assert_eq!(p.head().content_length, Some(1234));
            assert_eq!(p.head().next_refresh, Some(TimeOfDay::new(7, 30, 0)));
        }
    }

    #[test]
    fn header_names_are_case_insensitive() {
        let mut p = HeadParser::new();
        let r = p
            .feed(b"HTTP/1.1 200 OK\r\ncontent-length: 9\r\nX-NEXT-REFRESH: 01:02:03\r\n\r\n")
            .unwrap();
        assert!(matches!(r, HeadProgress::Complete { .. }));
        assert_eq!(p.head().content_length, Some(9));
        assert_eq!(p.head().next_refresh, Some(TimeOfDay::new(1, 2, 3)));
    }

    #[test]
    fn non_200_status_is_reported_not_hidden() {
        let mut p = HeadParser::new();
        let r = p.feed(b"HTTP/1.1 404 Not Found\r\n\r\n").unwrap();
        assert!(matches!(r, HeadProgress::Complete { .. }));
        assert_eq!(p.head().status, 404);
    }

    #[test]
    fn malformed_next_refresh_is_ignored() {
        let mut p = HeadParser::new();
        p.feed(b"HTTP/1.1 200 OK\r\nX-Next-Refresh: soon\r\n\r\n")
            .unwrap();
        assert_eq!(p.head().next_refresh, None);
    }

    #[test]
    fn garbage_status_line_is_an_error() {
        let mut p = HeadParser::new();
        assert_eq!(
            p.feed(b"ICY 200 OK\r\n\r\n"),
            Err(HttpError::BadStatusLine)
        );
    }
}
