//! Streaming BMP reader for server-rendered calendar images.
//!
//! Decodes straight off the socket into per-row bit masks, so the full
//! pixel image never exists in RAM: one padded input row and two 100-byte
//! output rows are the whole working set. Supported inputs are uncompressed
//! (`BI_RGB`) or bitfield (`BI_BITFIELDS`) files at 1/4/8/16/24 bits per
//! pixel, bottom-up or top-down.
//!
//! Each pixel is classified against the tri-color panel's palette: whitish
//! stays paper-white, strongly red (or yellow) pixels go to the chromatic
//! plane, everything else inks black. Whitish wins over colored.

use embedded_io_async::{Read, ReadExactError};

use crate::frame;

pub const MAX_WIDTH: usize = frame::WIDTH;
pub const MAX_HEIGHT: usize = frame::HEIGHT;
const OUT_BYTES: usize = MAX_WIDTH / 8;
const ROW_BUF: usize = MAX_WIDTH * 3;

const BMP_SIGNATURE: u16 = 0x4D42;
const HEADER_LEN: usize = 34;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BmpError<E> {
    /// Transport failure.
    Source(E),
    /// Stream ended mid-file.
    Truncated,
    /// Not a BMP file.
    BadMagic(u16),
    UnsupportedPlanes(u16),
    /// Compression other than BI_RGB / BI_BITFIELDS.
    UnsupportedFormat(u32),
    UnsupportedDepth(u16),
    /// Internally inconsistent header (zero dimensions, pixel data
    /// overlapping the header, ...).
    BadLayout,
}

/// Facts about a decoded file.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BmpInfo {
    pub width: u32,
    pub height: u32,
    pub depth: u16,
    pub top_down: bool,
    /// Rows handed to the sink after clamping to the panel.
    pub rows: u32,
}

/// Decodes one BMP stream, invoking `emit(y, mono_row, chroma_row)` once
/// per image row in storage order. `y` is the panel row (already
/// un-flipped for bottom-up files); row slices are MSB-first, one bit per
/// pixel, trailing bits left white. The mono plane uses 1 = white, the
/// chromatic plane 0 = inked.
///
/// `with_color` false classifies everything black-and-white; 1-bit files
/// force this regardless, matching how they are rendered server-side.
///
/// The transport should map stalls and disconnects onto end-of-stream,
/// which surfaces here as [`BmpError::Truncated`].
pub async fn decode<S, F>(
    src: &mut S,
    with_color: bool,
    mut emit: F,
) -> Result<BmpInfo, BmpError<S::Error>>
where
    S: Read,
    F: FnMut(usize, &[u8], &[u8]),
{
    let mut hdr = [0u8; HEADER_LEN];
    read_exact(src, &mut hdr).await?;

    let sig = u16_le(&hdr[0..2]);
    if sig != BMP_SIGNATURE {
        return Err(BmpError::BadMagic(sig));
    }

    let image_offset = u32_le(&hdr[10..14]);
    let width = u32_le(&hdr[18..22]);
    let height_raw = u32_le(&hdr[22..26]) as i32;
    let planes = u16_le(&hdr[26..28]);
    let depth = u16_le(&hdr[28..30]);
    let format = u32_le(&hdr[30..34]);

    if planes != 1 {
        return Err(BmpError::UnsupportedPlanes(planes));
    }
    if format != 0 && format != 3 {
        return Err(BmpError::UnsupportedFormat(format));
    }
    if !matches!(depth, 1 | 4 | 8 | 16 | 24) {
        return Err(BmpError::UnsupportedDepth(depth));
    }
    if width == 0 || height_raw == 0 {
        return Err(BmpError::BadLayout);
    }

    let top_down = height_raw < 0;
    let height = height_raw.unsigned_abs();
    // 1-bit files carry no color worth keeping.
    let with_color = with_color && depth != 1;

    log::debug!("bmp: {width}x{height_raw} depth {depth} format {format} offset {image_offset}");

    // Rows are padded to a 4-byte boundary.
    let row_size: u64 = if depth < 8 {
        ((width as u64 * depth as u64 + 8 - depth as u64) / 8 + 3) & !3
    } else {
        (width as u64 * depth as u64 / 8 + 3) & !3
    };

    let w = (width as usize).min(MAX_WIDTH);
    let h = (height as usize).min(MAX_HEIGHT);

    let mut bytes_read = HEADER_LEN as u64;

    // Palette classification for indexed files, one bit per entry.
    let mut mono_palette = [0u8; 32];
    let mut color_palette = [0u8; 32];
    if depth <= 8 {
        let entries = 1u32 << depth;
        let palette_start = image_offset
            .checked_sub(entries * 4)
            .ok_or(BmpError::BadLayout)? as u64;
        if palette_start < bytes_read {
            return Err(BmpError::BadLayout);
        }
        skip(src, palette_start - bytes_read).await?;
        bytes_read = palette_start;

        for pn in 0..entries as usize {
            let mut quad = [0u8; 4];
            read_exact(src, &mut quad).await?;
            bytes_read += 4;
            let (b, g, r) = (quad[0] as u16, quad[1] as u16, quad[2] as u16);
            if is_whitish(r, g, b, with_color) {
                mono_palette[pn / 8] |= 1 << (pn % 8);
            }
            if is_colored(r, g, b) {
                color_palette[pn / 8] |= 1 << (pn % 8);
            }
        }
    }

    // Bottom-up files taller than the panel: the surplus is at the start
    // of the pixel data, skip straight past it.
    let first_row = if top_down {
        image_offset as u64
    } else {
        image_offset as u64 + (height as u64 - h as u64) * row_size
    };
    if first_row < bytes_read {
        return Err(BmpError::BadLayout);
    }
    skip(src, first_row - bytes_read).await?;

    let needed = match depth {
        24 => w * 3,
        16 => w * 2,
        d => (w * d as usize).div_ceil(8),
    };
    let out_len = w.div_ceil(8);
    // Only palette depths pack pixels within a byte; 16/24-bit reads
    // consume whole bytes and never shift.
    let shift = 8u32.saturating_sub(depth as u32);
    let mask: u8 = if depth < 8 { 0xFF >> depth } else { 0xFF };

    let mut row_buf = [0u8; ROW_BUF];
    let mut mono_out = [0xFFu8; OUT_BYTES];
    let mut chroma_out = [0xFFu8; OUT_BYTES];

    for row in 0..h {
        read_exact(src, &mut row_buf[..needed]).await?;
        skip(src, row_size - needed as u64).await?;

        mono_out[..out_len].fill(0xFF);
        chroma_out[..out_len].fill(0xFF);

        let mut in_idx = 0;
        let mut in_byte = 0u8;
        let mut in_bits = 0u32;
        for col in 0..w {
            let (whitish, colored) = match depth {
                24 => {
                    let (b, g, r) = (
                        row_buf[in_idx] as u16,
                        row_buf[in_idx + 1] as u16,
                        row_buf[in_idx + 2] as u16,
                    );
                    in_idx += 3;
                    (is_whitish(r, g, b, with_color), is_colored(r, g, b))
                }
                16 => {
                    let (lsb, msb) = (row_buf[in_idx] as u16, row_buf[in_idx + 1] as u16);
                    in_idx += 2;
                    let (r, g, b) = if format == 0 {
                        // xRGB 5-5-5
                        (
                            (msb & 0x7C) << 1,
                            ((msb & 0x03) << 6) | ((lsb & 0xE0) >> 2),
                            (lsb & 0x1F) << 3,
                        )
                    } else {
                        // RGB 5-6-5
                        (
                            msb & 0xF8,
                            ((msb & 0x07) << 5) | ((lsb & 0xE0) >> 3),
                            (lsb & 0x1F) << 3,
                        )
                    };
                    (is_whitish(r, g, b, with_color), is_colored(r, g, b))
                }
                _ => {
                    if in_bits == 0 {
                        in_byte = row_buf[in_idx];
                        in_idx += 1;
                        in_bits = 8;
                    }
                    let pn = ((in_byte >> shift) & mask) as usize;
                    // Wrapping: at depth 8 the byte is spent and reloads
                    // on the next pixel anyway.
                    in_byte = in_byte.wrapping_shl(depth as u32);
                    in_bits -= depth as u32;
                    (
                        mono_palette[pn / 8] & (1 << (pn % 8)) != 0,
                        color_palette[pn / 8] & (1 << (pn % 8)) != 0,
                    )
                }
            };

            if whitish {
                // Stays paper-white.
            } else if colored && with_color {
                chroma_out[col / 8] &= !(0x80 >> (col % 8));
            } else {
                mono_out[col / 8] &= !(0x80 >> (col % 8));
            }
        }

        let y = if top_down { row } else { h - 1 - row };
        emit(y, &mono_out[..out_len], &chroma_out[..out_len]);
    }

    Ok(BmpInfo {
        width,
        height,
        depth,
        top_down,
        rows: h as u32,
    })
}

fn is_whitish(r: u16, g: u16, b: u16, with_color: bool) -> bool {
    if with_color {
        r > 0x80 && g > 0x80 && b > 0x80
    } else {
        r + g + b > 3 * 0x80
    }
}

// Reddish or yellowish.
fn is_colored(r: u16, g: u16, b: u16) -> bool {
    r > 0xF0 || (g > 0xF0 && b > 0xF0)
}

async fn read_exact<S: Read>(src: &mut S, buf: &mut [u8]) -> Result<(), BmpError<S::Error>> {
    src.read_exact(buf).await.map_err(|err| match err {
        ReadExactError::UnexpectedEof => BmpError::Truncated,
        ReadExactError::Other(err) => BmpError::Source(err),
    })
}

async fn skip<S: Read>(src: &mut S, mut n: u64) -> Result<(), BmpError<S::Error>> {
    let mut scratch = [0u8; 64];
    while n > 0 {
        let take = scratch.len().min(n as usize);
        read_exact(src, &mut scratch[..take]).await?;
        n -= take as u64;
    }
    Ok(())
}

fn u16_le(b: &[u8]) -> u16 {
    u16::from_le_bytes([b[0], b[1]])
}

fn u32_le(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

#[cfg(test)]
mod tests {
    use core::pin::pin;
    use core::task::{Context, Poll, Waker};

    use super::*;

    /// Slice-backed sources never pend, so a single-poll loop suffices.
    fn block_on<F: Future>(fut: F) -> F::Output {
        let mut fut = pin!(fut);
        let mut cx = Context::from_waker(Waker::noop());
        loop {
            if let Poll::Ready(out) = fut.as_mut().poll(&mut cx) {
                return out;
            }
        }
    }

    const WHITE: [u8; 3] = [0xFF, 0xFF, 0xFF];
    const BLACK: [u8; 3] = [0x00, 0x00, 0x00];
    const RED: [u8; 3] = [0x00, 0x00, 0xFF]; // stored B, G, R

    fn bmp(
        width: u32,
        height: i32,
        depth: u16,
        format: u32,
        palette: &[[u8; 4]],
        pixel_data: &[u8],
    ) -> Vec<u8> {
        let image_offset = 54 + 4 * palette.len() as u32;
        let mut out = Vec::new();
        out.extend_from_slice(b"BM");
        out.extend_from_slice(&0u32.to_le_bytes()); // file size, unread
        out.extend_from_slice(&0u32.to_le_bytes()); // reserved
        out.extend_from_slice(&image_offset.to_le_bytes());
        out.extend_from_slice(&40u32.to_le_bytes()); // info header size
        out.extend_from_slice(&width.to_le_bytes());
        out.extend_from_slice(&(height as u32).to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes()); // planes
        out.extend_from_slice(&depth.to_le_bytes());
        out.extend_from_slice(&format.to_le_bytes());
        out.resize(54, 0); // rest of the info header
        for quad in palette {
            out.extend_from_slice(quad);
        }
        out.extend_from_slice(pixel_data);
        out
    }

    fn run(data: &[u8], with_color: bool) -> (BmpInfo, Vec<(usize, Vec<u8>, Vec<u8>)>) {
        let mut rows = Vec::new();
        let mut src: &[u8] = data;
        let info = block_on(decode(&mut src, with_color, |y, mono, chroma| {
            rows.push((y, mono.to_vec(), chroma.to_vec()));
        }))
        .unwrap();
        (info, rows)
    }

    fn row24(pixels: &[[u8; 3]], row_size: usize) -> Vec<u8> {
        let mut r: Vec<u8> = pixels.iter().flatten().copied().collect();
        r.resize(row_size, 0);
        r
    }

    #[test]
    fn bottom_up_24_bit_lands_unflipped() {
        // Image top row: black, white. Bottom row: red, white.
        // Bottom-up storage writes the bottom row first.
        let mut data = row24(&[RED, WHITE], 8);
        data.extend(row24(&[BLACK, WHITE], 8));
        let file = bmp(2, 2, 24, 0, &[], &data);

        let (info, rows) = run(&file, true);
        assert_eq!(info.width, 2);
        assert_eq!(info.height, 2);
        assert_eq!(info.rows, 2);
        assert!(!info.top_down);

        assert_eq!(rows[0], (1, vec![0xFF], vec![0x7F])); // red pixel, chromatic
        assert_eq!(rows[1], (0, vec![0x7F], vec![0xFF])); // black pixel, mono
    }

    #[test]
    fn negative_height_means_top_down() {
        let mut data = row24(&[BLACK, WHITE], 8);
        data.extend(row24(&[RED, WHITE], 8));
        let file = bmp(2, -2, 24, 0, &[], &data);

        let (info, rows) = run(&file, true);
        assert!(info.top_down);
        assert_eq!(rows[0], (0, vec![0x7F], vec![0xFF]));
        assert_eq!(rows[1], (1, vec![0xFF], vec![0x7F]));
    }

    #[test]
    fn monochrome_mode_sends_red_to_black() {
        let data = row24(&[RED, WHITE], 8);
        let file = bmp(2, 1, 24, 0, &[], &data);
        let (_, rows) = run(&file, false);
        // Red fails the brightness sum, so it inks black.
        assert_eq!(rows[0], (0, vec![0x7F], vec![0xFF]));
    }

    #[test]
    fn one_bit_palette_decodes_msb_first() {
        let palette = [[0, 0, 0, 0], [0xFF, 0xFF, 0xFF, 0]];
        // Ten pixels 1010101010, padded to a 4-byte row.
        let file = bmp(10, 1, 1, 0, &palette, &[0xAA, 0x80, 0, 0]);

        let (info, rows) = run(&file, true);
        assert_eq!(info.depth, 1);
        // Trailing bits of the last output byte stay white.
        assert_eq!(rows[0], (0, vec![0xAA, 0xBF], vec![0xFF, 0xFF]));
    }

    #[test]
    fn four_bit_palette_classifies_by_entry() {
        let mut palette = [[0u8; 4]; 16];
        palette[1] = [0xFF, 0xFF, 0xFF, 0]; // white
        palette[2] = [0x00, 0x00, 0xFF, 0]; // red
        // Pixels: 0 (black), 1 (white), 2 (red); nibbles 01 2x.
        let file = bmp(3, 1, 4, 0, &palette, &[0x01, 0x20, 0, 0]);

        let (_, rows) = run(&file, true);
        assert_eq!(rows[0], (0, vec![0x7F], vec![0xDF]));
    }

    #[test]
    fn eight_bit_palette_reads_whole_bytes() {
        let mut palette = vec![[0u8; 4]; 256];
        palette[7] = [0xFF, 0xFF, 0xFF, 0]; // white
        palette[200] = [0x00, 0x00, 0xFF, 0]; // red
        // Pixels: 0 (black), 7 (white), 200 (red).
        let file = bmp(3, 1, 8, 0, &palette, &[0, 7, 200, 0]);

        let (info, rows) = run(&file, true);
        assert_eq!(info.depth, 8);
        assert_eq!(rows[0], (0, vec![0x7F], vec![0xDF]));
    }

    #[test]
    fn sixteen_bit_565_reads_bitfield_red() {
        // One pure-red 565 pixel: 0xF800.
        let file = bmp(1, 1, 16, 3, &[], &[0x00, 0xF8, 0, 0]);
        let (info, rows) = run(&file, true);
        assert_eq!(info.depth, 16);
        assert_eq!(rows[0], (0, vec![0xFF], vec![0x7F]));
    }

    #[test]
    fn sixteen_bit_555_reads_plain_red() {
        // One pure-red 555 pixel: 0x7C00.
        let file = bmp(1, 1, 16, 0, &[], &[0x00, 0x7C, 0, 0]);
        let (_, rows) = run(&file, true);
        assert_eq!(rows[0], (0, vec![0xFF], vec![0x7F]));
    }

    #[test]
    fn narrow_rows_keep_trailing_bits_white() {
        let data = row24(&[BLACK, BLACK, BLACK], 12);
        let file = bmp(3, 1, 24, 0, &[], &data);
        let (_, rows) = run(&file, true);
        assert_eq!(rows[0], (0, vec![0x1F], vec![0xFF]));
    }

    #[test]
    fn truncated_stream_is_a_typed_error() {
        let data = row24(&[BLACK, WHITE], 8);
        let mut file = bmp(2, 2, 24, 0, &[], &data); // promises 2 rows, has 1
        file.truncate(file.len() - 3);
        let mut src: &[u8] = &file;
        let err = block_on(decode(&mut src, true, |_, _, _| {})).unwrap_err();
        assert_eq!(err, BmpError::Truncated);
    }

    #[test]
    fn bad_headers_are_rejected_up_front() {
        let good = bmp(1, 1, 24, 0, &[], &row24(&[WHITE], 4));

        let mut bad = good.clone();
        bad[0] = b'P';
        let mut src: &[u8] = &bad;
        assert!(matches!(
            block_on(decode(&mut src, true, |_, _, _| {})),
            Err(BmpError::BadMagic(_))
        ));

        let mut bad = good.clone();
        bad[26] = 2; // planes
        let mut src: &[u8] = &bad;
        assert_eq!(
            block_on(decode(&mut src, true, |_, _, _| {})).unwrap_err(),
            BmpError::UnsupportedPlanes(2)
        );

        let mut bad = good.clone();
        bad[30] = 1; // RLE compression
        let mut src: &[u8] = &bad;
        assert_eq!(
            block_on(decode(&mut src, true, |_, _, _| {})).unwrap_err(),
            BmpError::UnsupportedFormat(1)
        );

        let mut bad = good.clone();
        bad[28] = 32;
        let mut src: &[u8] = &bad;
        assert_eq!(
            block_on(decode(&mut src, true, |_, _, _| {})).unwrap_err(),
            BmpError::UnsupportedDepth(32)
        );

        let mut bad = good;
        bad[18..22].fill(0); // zero width
        let mut src: &[u8] = &bad;
        assert_eq!(
            block_on(decode(&mut src, true, |_, _, _| {})).unwrap_err(),
            BmpError::BadLayout
        );
    }

    #[test]
    fn oversize_height_is_clamped_to_the_panel() {
        // Top-down so the kept rows are the first ones in the stream.
        let mut data = Vec::new();
        for _ in 0..MAX_HEIGHT + 2 {
            data.extend(row24(&[BLACK], 4));
        }
        let file = bmp(1, -((MAX_HEIGHT as i32) + 2), 24, 0, &[], &data);
        let (info, rows) = run(&file, true);
        assert_eq!(info.rows, MAX_HEIGHT as u32);
        assert_eq!(rows.len(), MAX_HEIGHT);
        assert_eq!(rows.last().unwrap().0, MAX_HEIGHT - 1);
    }
}
