//! Monochrome label bitmaps and their row-command encoding.
//!
//! Rows are packed MSB-first (bit 7 of byte 0 is the leftmost pixel), a set
//! bit is a printed (black) dot, and bits past the bitmap width are zero.
//! Consecutive blank rows collapse into `PrintEmptyRow` commands carrying a
//! repeat count; every other row becomes a `PrintBitmapRow` command.

use crate::command::Command;
use crate::packet::{MAX_PAYLOAD, Packet};
use crate::{NiimbotError, Result};

/// Bytes preceding the pixel data in a bitmap-row payload.
const BITMAP_ROW_HEADER: usize = 6;

/// Largest repeat count a blank-row command can carry.
pub const MAX_BLANK_RUN: u16 = u8::MAX as u16;

/// A packed 1bpp label image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    width: u16,
    height: u16,
    data: Vec<u8>,
}

impl Bitmap {
    /// Wrap already packed row data (`ceil(width / 8)` bytes per row).
    pub fn from_packed(width: u16, height: u16, mut data: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(NiimbotError::InvalidBitmap(format!(
                "dimensions must be non-zero, got {width}x{height}"
            )));
        }
        let stride = stride_for(width);
        if stride + BITMAP_ROW_HEADER > MAX_PAYLOAD {
            return Err(NiimbotError::InvalidBitmap(format!(
                "width {width} does not fit a single row command"
            )));
        }
        let expected = stride * height as usize;
        if data.len() != expected {
            return Err(NiimbotError::InvalidBitmap(format!(
                "expected {expected} bytes for {width}x{height}, got {}",
                data.len()
            )));
        }

        // Clear padding bits so blank detection only sees real pixels.
        let tail_bits = width as usize % 8;
        if tail_bits != 0 {
            let mask = 0xffu8 << (8 - tail_bits);
            for row in data.chunks_mut(stride) {
                if let Some(last) = row.last_mut() {
                    *last &= mask;
                }
            }
        }

        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Pack one `bool` per pixel (row-major, `true` = black).
    pub fn from_pixels(width: u16, height: u16, pixels: &[bool]) -> Result<Self> {
        let required = width as usize * height as usize;
        if pixels.len() != required {
            return Err(NiimbotError::InvalidBitmap(format!(
                "expected {required} pixels, got {}",
                pixels.len()
            )));
        }
        let stride = stride_for(width);
        let mut data = vec![0u8; stride * height as usize];
        for (y, row) in pixels.chunks(width.max(1) as usize).enumerate() {
            for (x, &black) in row.iter().enumerate() {
                if black {
                    data[y * stride + x / 8] |= 0x80 >> (x % 8);
                }
            }
        }
        Self::from_packed(width, height, data)
    }

    /// Threshold a grayscale image: luma below `threshold` prints.
    pub fn from_gray(img: &image::GrayImage, threshold: u8) -> Result<Self> {
        let (w, h) = img.dimensions();
        let width = u16::try_from(w)
            .map_err(|_| NiimbotError::InvalidBitmap(format!("width {w} too large")))?;
        let height = u16::try_from(h)
            .map_err(|_| NiimbotError::InvalidBitmap(format!("height {h} too large")))?;
        let pixels: Vec<bool> = img.pixels().map(|p| p.0[0] < threshold).collect();
        Self::from_pixels(width, height, &pixels)
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    /// Bytes per packed row.
    pub fn stride(&self) -> usize {
        stride_for(self.width)
    }

    pub fn row(&self, y: u16) -> &[u8] {
        let stride = self.stride();
        let start = y as usize * stride;
        &self.data[start..start + stride]
    }

    pub fn is_blank_row(&self, y: u16) -> bool {
        self.row(y).iter().all(|&b| b == 0)
    }
}

fn stride_for(width: u16) -> usize {
    (width as usize).div_ceil(8)
}

/// One encoded print-row command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowCommand {
    /// `count` blank rows starting at `row`.
    Blank { row: u16, count: u8 },
    /// Packed pixel data for a single row.
    Bitmap { row: u16, data: Vec<u8> },
}

impl RowCommand {
    pub fn to_packet(&self) -> Packet {
        match self {
            Self::Blank { row, count } => {
                let [hi, lo] = row.to_be_bytes();
                Packet {
                    command: Command::PrintEmptyRow.id(),
                    payload: vec![hi, lo, *count],
                }
            }
            Self::Bitmap { row, data } => {
                let [hi, lo] = row.to_be_bytes();
                let mut payload = Vec::with_capacity(BITMAP_ROW_HEADER + data.len());
                // Row index, three pixel-count bytes (left zero), repeat = 1.
                payload.extend_from_slice(&[hi, lo, 0, 0, 0, 1]);
                payload.extend_from_slice(data);
                Packet {
                    command: Command::PrintBitmapRow.id(),
                    payload,
                }
            }
        }
    }
}

/// Encode a bitmap into its ordered row commands.
pub fn encode_rows(bitmap: &Bitmap) -> Vec<RowCommand> {
    let mut out = Vec::new();
    let mut blank_start: Option<u16> = None;

    let flush = |out: &mut Vec<RowCommand>, start: u16, end: u16| {
        let mut row = start;
        while row < end {
            let count = (end - row).min(MAX_BLANK_RUN);
            out.push(RowCommand::Blank {
                row,
                count: count as u8,
            });
            row += count;
        }
    };

    for y in 0..bitmap.height() {
        if bitmap.is_blank_row(y) {
            blank_start.get_or_insert(y);
            continue;
        }
        if let Some(start) = blank_start.take() {
            flush(&mut out, start, y);
        }
        out.push(RowCommand::Bitmap {
            row: y,
            data: bitmap.row(y).to_vec(),
        });
    }
    if let Some(start) = blank_start {
        flush(&mut out, start, bitmap.height());
    }

    out
}

/// Encode a bitmap straight into wire packets.
pub fn encode_packets(bitmap: &Bitmap) -> Vec<Packet> {
    encode_rows(bitmap).iter().map(RowCommand::to_packet).collect()
}
