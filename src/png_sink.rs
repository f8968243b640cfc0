//! Image-sequence output: one grayscale PNG per frame.

use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use png::{BitDepth, ColorType, Encoder};

use crate::{
    sink::{FrameSink, MetadataValue, PixelDepth, SinkOptions},
    Error, Result,
};

/// Name of the file collecting the metadata of a sequence.
pub const METADATA_FILE: &str = "metadata.txt";

/// Writes each frame to `<dir>/frame_NNNNNN.png`.
///
/// The output path of the [`SinkOptions`] names the directory. Metadata is kept
/// in memory and written to [`METADATA_FILE`] when the sink is closed.
#[derive(Debug)]
pub struct PngSequenceSink {
    options: SinkOptions,
    metadata: Vec<(String, MetadataValue, String)>,
    written: Vec<u64>,
    created_dir: bool,
    open: bool,
}

impl PngSequenceSink {
    /// Creates the output directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Sink`] for invalid dimensions, or if the directory
    /// already exists and `overwrite` is not set.
    pub fn create(options: SinkOptions) -> Result<Self> {
        options.validate()?;
        let dir = &options.path;
        let existed = dir.exists();
        if existed {
            if !options.overwrite {
                return Err(Error::Sink(format!(
                    "Cannot create '{}', it already exists.",
                    dir.display()
                )));
            }
            if !dir.is_dir() {
                return Err(Error::Sink(format!(
                    "Cannot create '{}', not a directory.",
                    dir.display()
                )));
            }
        }
        fs::create_dir_all(dir)
            .map_err(|e| Error::Sink(format!("Cannot create '{}'. {e}", dir.display())))?;

        Ok(Self {
            options,
            metadata: Vec::new(),
            written: Vec::new(),
            created_dir: !existed,
            open: true,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.options.path
    }

    /// Path of the image for the 1-based frame `index`.
    pub fn frame_path(&self, index: u64) -> PathBuf {
        self.options.path.join(format!("frame_{index:06}.png"))
    }

    fn encode(&self, path: &Path, data: &[u8]) -> Result<()> {
        let file = File::create(path)?;
        let mut encoder = Encoder::new(
            BufWriter::new(file),
            self.options.width,
            self.options.height,
        );
        encoder.set_color(ColorType::Grayscale);

        let frame = &data[..self.options.frame_bytes()];
        let swapped;
        let samples = match self.options.pixel_depth {
            PixelDepth::U8 => {
                encoder.set_depth(BitDepth::Eight);
                frame
            }
            PixelDepth::I16 => {
                // PNG stores 16-bit samples big-endian
                encoder.set_depth(BitDepth::Sixteen);
                swapped = frame
                    .chunks_exact(2)
                    .flat_map(|s| [s[1], s[0]])
                    .collect::<Vec<u8>>();
                &swapped[..]
            }
        };

        encoder
            .write_header()
            .and_then(|mut writer| writer.write_image_data(samples))
            .map_err(|e| Error::Sink(format!("PNG encoding failed: {e}")))
    }

    fn write_metadata_file(&self) -> Result<()> {
        let path = self.options.path.join(METADATA_FILE);
        let mut out = BufWriter::new(File::create(path)?);
        for (key, value, comment) in &self.metadata {
            writeln!(out, "{key} = {value} / {comment}")?;
        }
        out.flush()?;
        Ok(())
    }
}

impl FrameSink for PngSequenceSink {
    fn write_frame(&mut self, index: u64, data: &[u8]) -> Result<()> {
        if !self.open {
            return Err(Error::Sink("Cannot write frame, sink closed.".into()));
        }
        self.options.check_frame(index, data)?;
        let path = self.frame_path(index);
        self.encode(&path, data)?;
        self.written.push(index);
        Ok(())
    }

    fn write_metadata(&mut self, key: &str, value: MetadataValue, comment: &str) -> Result<()> {
        if !self.open {
            return Err(Error::Sink("Cannot write header entry, sink closed.".into()));
        }
        self.metadata
            .push((key.to_owned(), value, comment.to_owned()));
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.write_metadata_file()
    }

    /// Removes the images written so far, and the directory if this sink
    /// created it. Nothing else in a reused directory is touched.
    fn discard(&mut self) -> Result<()> {
        self.open = false;
        for index in std::mem::take(&mut self.written) {
            fs::remove_file(self.frame_path(index))?;
        }
        if self.created_dir && self.options.path.is_dir() {
            fs::remove_dir(&self.options.path)?;
            self.created_dir = false;
        }
        Ok(())
    }
}

impl Drop for PngSequenceSink {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("closing {} failed: {e}", self.options.path.display());
        }
    }
}
