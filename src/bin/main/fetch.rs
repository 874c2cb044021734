//! Calendar image download: one HTTP GET, decoded straight off the socket
//! into the panel frame.

use embassy_net::{Stack, tcp::TcpSocket};
use embassy_time::{Duration, WithTimeout};
use embedded_io_async::Write;
use inkcal_core::bmp::{self, BmpError, BmpInfo};
use inkcal_core::clock::TimeOfDay;
use inkcal_core::frame::PanelFrame;
use inkcal_core::http::{self, HeadParser, HeadProgress, Url};

use super::net;

const CONNECT_TIMEOUT_SECS: u64 = 10;
/// Per-read inactivity limit on the whole transfer.
const SOCKET_TIMEOUT_SECS: u64 = 30;
/// A body read stalled this long counts as end-of-stream; the decoder then
/// reports how far it got.
const STALL_TIMEOUT_SECS: u64 = 2;
const CHUNK: usize = 512;

#[derive(Debug)]
pub(super) enum FetchError {
    BadUrl,
    Resolve(net::ResolveError),
    Connect,
    /// Socket write/read failure, including a connection that closed
    /// before the head finished.
    Io,
    Head(http::HttpError),
    /// The server answered, but not with the image.
    Status(u16),
    Image(BmpError<embassy_net::tcp::Error>),
}

pub(super) struct FetchOutcome {
    pub info: BmpInfo,
    /// Server-driven wake override for this cycle.
    pub next_refresh: Option<TimeOfDay>,
    pub content_length: Option<u32>,
}

/// Body bytes: first whatever followed the head in its final chunk, then
/// the socket. Stalls map onto `Ok(0)` so a dead server ends the decode
/// instead of hanging it.
struct BodySource<'a, 'b> {
    socket: &'a mut TcpSocket<'b>,
    pending: [u8; CHUNK],
    pos: usize,
    len: usize,
}

impl embedded_io_async::ErrorType for BodySource<'_, '_> {
    type Error = embassy_net::tcp::Error;
}

impl embedded_io_async::Read for BodySource<'_, '_> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if self.pos < self.len {
            let n = (self.len - self.pos).min(buf.len());
            buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
            self.pos += n;
            return Ok(n);
        }
        match self
            .socket
            .read(buf)
            .with_timeout(Duration::from_secs(STALL_TIMEOUT_SECS))
            .await
        {
            Ok(result) => result,
            Err(_) => Ok(0),
        }
    }
}

/// Downloads the rendered calendar and decodes it into `frame`. The frame
/// is cleared only after a successful response head, so a refused or
/// misbehaving server leaves the restored image intact.
pub(super) async fn fetch_image(
    stack: Stack<'_>,
    url_str: &str,
    battery_mv: u32,
    frame: &mut PanelFrame,
) -> Result<FetchOutcome, FetchError> {
    let url = Url::parse(url_str).map_err(|_| FetchError::BadUrl)?;
    let addr = net::resolve(stack, url.host).await.map_err(FetchError::Resolve)?;

    let mut rx_buf = [0u8; 4_096];
    let mut tx_buf = [0u8; 512];
    let mut socket = TcpSocket::new(stack, &mut rx_buf, &mut tx_buf);
    socket.set_timeout(Some(Duration::from_secs(SOCKET_TIMEOUT_SECS)));

    socket
        .connect((addr, url.port))
        .with_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .await
        .map_err(|_| FetchError::Connect)?
        .map_err(|_| FetchError::Connect)?;

    let request = http::build_image_request(&url, Some(battery_mv));
    socket
        .write_all(request.as_bytes())
        .await
        .map_err(|_| FetchError::Io)?;

    let mut parser = HeadParser::new();
    let mut chunk = [0u8; CHUNK];
    let (body_pos, body_len) = loop {
        let n = socket.read(&mut chunk).await.map_err(|_| FetchError::Io)?;
        if n == 0 {
            return Err(FetchError::Io);
        }
        match parser.feed(&chunk[..n]).map_err(FetchError::Head)? {
            HeadProgress::Partial => {}
            HeadProgress::Complete { consumed } => break (consumed, n),
        }
    };

    let head = *parser.head();
    if head.status != 200 {
        return Err(FetchError::Status(head.status));
    }

    frame.clear();
    let mut source = BodySource {
        socket: &mut socket,
        pending: chunk,
        pos: body_pos,
        len: body_len,
    };
    let info = bmp::decode(&mut source, true, |y, mono, chroma| {
        frame.write_row(y, mono, chroma);
    })
    .await
    .map_err(FetchError::Image)?;

    Ok(FetchOutcome {
        info,
        next_refresh: head.next_refresh,
        content_length: head.content_length,
    })
}
