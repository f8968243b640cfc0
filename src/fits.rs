//! FITS data cube writer.
//!
//! Frames are stored as a single 3-axis primary array (`width × height ×
//! count`). The file is laid out completely at creation time, so each frame
//! is written straight to its slot and survives an aborted recording. Header
//! space is reserved up front; metadata cards can be added until it runs out.

use std::{
    fs::{self, File, OpenOptions},
    io::{ErrorKind, Seek, SeekFrom, Write},
    path::Path,
};

use crate::{
    sink::{FrameSink, MetadataValue, PixelDepth, SinkOptions},
    Error, Result,
};

/// Size of a FITS logical record.
pub const BLOCK_SIZE: usize = 2880;
/// Size of one header card.
pub const CARD_SIZE: usize = 80;

/// Header records reserved at creation.
const HEADER_BLOCKS: usize = 2;
const HEADER_SIZE: usize = HEADER_BLOCKS * BLOCK_SIZE;
const HEADER_CARDS: usize = HEADER_SIZE / CARD_SIZE;
/// Column where the value of a `KEY = value` card starts.
const VALUE_OFFSET: usize = 10;

/// Writes recorded frames into a FITS file.
///
/// Sample layout follows the pixel depth: `U8` is stored as `BITPIX = 8`,
/// `I16` as big-endian `BITPIX = 16`. Incoming 16-bit frames are expected in
/// the camera's little-endian byte order.
#[derive(Debug)]
pub struct FitsSink {
    file: Option<File>,
    options: SinkOptions,
    /// Number of cards written, not counting `END`.
    cards: usize,
}

impl FitsSink {
    /// Creates the output file and writes the primary header.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Sink`] for invalid dimensions, when the file exists and
    /// `overwrite` is not set, or when it cannot be created.
    pub fn create(options: SinkOptions) -> Result<Self> {
        options.validate()?;

        let file = open_output(&options.path, options.overwrite)?;
        let data_len = options.frame_bytes() as u64 * options.frame_count;
        let total = HEADER_SIZE as u64 + padded(data_len);
        file.set_len(total)
            .map_err(|e| Error::Sink(format!("Cannot allocate file space. {e}")))?;

        let mut sink = Self {
            file: Some(file),
            options,
            cards: 0,
        };
        sink.write_primary_header()?;
        log::debug!(
            "created FITS cube {} ({}x{}x{}, {total} bytes)",
            sink.options.path.display(),
            sink.options.width,
            sink.options.height,
            sink.options.frame_count
        );
        Ok(sink)
    }

    pub fn path(&self) -> &Path {
        &self.options.path
    }

    pub fn options(&self) -> &SinkOptions {
        &self.options
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn write_primary_header(&mut self) -> Result<()> {
        let blank = vec![b' '; HEADER_SIZE];
        self.file_mut("write header")?.write_all(&blank)?;

        let bitpix: i64 = match self.options.pixel_depth {
            PixelDepth::U8 => 8,
            PixelDepth::I16 => 16,
        };
        let date = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string();
        let cards = [
            logical_card("SIMPLE", true, "file does conform to FITS standard"),
            value_card("BITPIX", &MetadataValue::Int(bitpix), "number of bits per data pixel"),
            value_card("NAXIS", &MetadataValue::Int(3), "number of data axes"),
            value_card(
                "NAXIS1",
                &MetadataValue::Int(i64::from(self.options.width)),
                "length of data axis 1",
            ),
            value_card(
                "NAXIS2",
                &MetadataValue::Int(i64::from(self.options.height)),
                "length of data axis 2",
            ),
            value_card(
                "NAXIS3",
                &MetadataValue::Int(self.options.frame_count as i64),
                "length of data axis 3",
            ),
            value_card(
                "DATE",
                &MetadataValue::Text(date),
                "file creation date (YYYY-MM-DDThh:mm:ss UT)",
            ),
        ];
        for card in &cards {
            self.append_card(card)?;
        }
        Ok(())
    }

    /// Writes `card` at the next free header position and moves `END` behind it.
    fn append_card(&mut self, card: &[u8; CARD_SIZE]) -> Result<()> {
        if self.cards + 1 >= HEADER_CARDS {
            return Err(Error::Sink("Cannot write header entry, header is full.".into()));
        }
        let offset = (self.cards * CARD_SIZE) as u64;
        let end = end_card();
        let file = self.file_mut("write header entry")?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(card)?;
        file.write_all(&end)?;
        self.cards += 1;
        Ok(())
    }

    fn file_mut(&mut self, action: &str) -> Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| Error::Sink(format!("Cannot {action}, file not open.")))
    }
}

impl FrameSink for FitsSink {
    fn write_frame(&mut self, index: u64, data: &[u8]) -> Result<()> {
        let frame_bytes = self.options.frame_bytes();
        self.options.check_frame(index, data)?;
        let offset = HEADER_SIZE as u64 + (index - 1) * frame_bytes as u64;
        let data = &data[..frame_bytes];

        let encoded;
        let bytes = match self.options.pixel_depth {
            PixelDepth::U8 => data,
            PixelDepth::I16 => {
                encoded = swap_to_big_endian(data);
                &encoded[..]
            }
        };

        let file = self.file_mut("write frame")?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(bytes)
            .map_err(|e| Error::Sink(format!("Cannot write frame {index}. {e}")))
    }

    fn write_metadata(&mut self, key: &str, value: MetadataValue, comment: &str) -> Result<()> {
        if key.is_empty() || key.len() > 8 || !key.bytes().all(is_keyword_byte) {
            return Err(Error::Sink(format!("Invalid header keyword '{key}'.")));
        }
        let field = value_field(&value);
        if VALUE_OFFSET + field.len() > CARD_SIZE {
            return Err(Error::Sink(format!(
                "Value of header keyword '{key}' does not fit in a header entry."
            )));
        }
        let text = card_text(key, &field, comment);
        if text.len() > CARD_SIZE {
            log::warn!("comment of header keyword {key} truncated to fit the header entry");
        }
        self.append_card(&card_from(&text))
    }

    fn discard(&mut self) -> Result<()> {
        let was_open = self.file.is_some();
        self.close()?;
        if was_open {
            fs::remove_file(&self.options.path)?;
            log::debug!("removed {}", self.options.path.display());
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
            file.sync_all()?;
            log::debug!("closed {}", self.options.path.display());
        }
        Ok(())
    }
}

impl Drop for FitsSink {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("closing {} failed: {e}", self.options.path.display());
        }
    }
}

fn open_output(path: &Path, overwrite: bool) -> Result<File> {
    let mut open = OpenOptions::new();
    open.read(true).write(true);
    if overwrite {
        open.create(true).truncate(true);
    } else {
        open.create_new(true);
    }
    open.open(path).map_err(|e| match e.kind() {
        ErrorKind::AlreadyExists => Error::Sink(format!(
            "Cannot create the file '{}', it already exists.",
            path.display()
        )),
        _ => Error::Sink(format!("Cannot create the file '{}'. {e}", path.display())),
    })
}

fn padded(len: u64) -> u64 {
    len.div_ceil(BLOCK_SIZE as u64) * BLOCK_SIZE as u64
}

fn is_keyword_byte(b: u8) -> bool {
    b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'-' || b == b'_'
}

fn swap_to_big_endian(data: &[u8]) -> Vec<u8> {
    data.chunks_exact(2).flat_map(|s| [s[1], s[0]]).collect()
}

fn card_from(text: &str) -> [u8; CARD_SIZE] {
    let mut card = [b' '; CARD_SIZE];
    for (dst, src) in card.iter_mut().zip(text.bytes().filter(u8::is_ascii)) {
        *dst = src;
    }
    card
}

fn end_card() -> [u8; CARD_SIZE] {
    card_from("END")
}

fn logical_card(key: &str, value: bool, comment: &str) -> [u8; CARD_SIZE] {
    let value = if value { "T" } else { "F" };
    card_from(&format!("{key:<8}= {value:>20} / {comment}"))
}

/// Formats a `KEY = value / comment` card in fixed format.
fn value_card(key: &str, value: &MetadataValue, comment: &str) -> [u8; CARD_SIZE] {
    card_from(&card_text(key, &value_field(value), comment))
}

fn card_text(key: &str, field: &str, comment: &str) -> String {
    format!("{key:<8}= {field} / {comment}")
}

fn value_field(value: &MetadataValue) -> String {
    match value {
        MetadataValue::Text(s) => {
            let quoted = format!("'{:<8}'", s.replace('\'', "''"));
            format!("{quoted:<20}")
        }
        MetadataValue::Int(i) => format!("{i:>20}"),
        MetadataValue::Real(r) => format!("{:>20}", format_real(*r)),
    }
}

fn format_real(value: f64) -> String {
    let plain = value.to_string();
    if plain.len() <= 20 && value.is_finite() {
        if plain.contains('.') {
            plain
        } else {
            format!("{plain}.0")
        }
    } else {
        format!("{value:E}")
    }
}
