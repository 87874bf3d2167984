//! # Telemetry Sink
//!
//! Scalar metrics and sample images written during training. Every write is
//! best-effort from the trainer's point of view: it logs failures and carries on.

use crate::tensor::{Tensor, TensorData};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const SCALARS_FILE: &str = "scalars.jsonl";

#[derive(thiserror::Error, Debug)]
pub enum TelemetryError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to encode scalar record: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to write image: {0}")]
    Image(#[from] image::ImageError),
    #[error("Cannot export tensor of shape {0:?} as an image; expected [1|3, H, W]")]
    UnsupportedImage(Vec<usize>),
}

/// Destination for training metrics.
pub trait TelemetrySink: Send {
    fn write_scalar(&mut self, tag: &str, value: TensorData, step: usize) -> Result<(), TelemetryError>;

    /// `tensor` is `[C, H, W]` with values in `[0, 1]`; `index` tells apart
    /// several images written under the same tag and step.
    fn write_image(&mut self, tag: &str, tensor: &Tensor, step: usize, index: usize) -> Result<(), TelemetryError>;
}

/// One line of `scalars.jsonl`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScalarRecord {
    pub tag: String,
    pub step: usize,
    pub value: TensorData,
}

/// Appends scalars as JSON lines and writes images as PNG files under `log_dir`.
#[derive(Debug)]
pub struct FileSink {
    log_dir: PathBuf,
    scalars: File,
}

impl FileSink {
    pub fn new(log_dir: &Path) -> Result<Self, TelemetryError> {
        let io = |source| TelemetryError::Io {
            path: log_dir.to_path_buf(),
            source,
        };
        std::fs::create_dir_all(log_dir).map_err(io)?;
        let path = log_dir.join(SCALARS_FILE);
        let scalars = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| TelemetryError::Io { path, source })?;
        Ok(FileSink {
            log_dir: log_dir.to_path_buf(),
            scalars,
        })
    }

    /// `{log_dir}/images/{tag}/{step}_{index}.png`; a `/` in the tag becomes a
    /// nested directory.
    pub fn image_path(&self, tag: &str, step: usize, index: usize) -> PathBuf {
        self.log_dir
            .join("images")
            .join(tag)
            .join(format!("{}_{}.png", step, index))
    }
}

impl TelemetrySink for FileSink {
    fn write_scalar(&mut self, tag: &str, value: TensorData, step: usize) -> Result<(), TelemetryError> {
        let record = ScalarRecord {
            tag: tag.to_string(),
            step,
            value,
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        let path = self.log_dir.join(SCALARS_FILE);
        self.scalars
            .write_all(line.as_bytes())
            .map_err(|source| TelemetryError::Io { path, source })
    }

    fn write_image(&mut self, tag: &str, tensor: &Tensor, step: usize, index: usize) -> Result<(), TelemetryError> {
        let path = self.image_path(tag, step, index);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| TelemetryError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        encode_image(tensor)?.save(&path)?;
        Ok(())
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn write_scalar(&mut self, _tag: &str, _value: TensorData, _step: usize) -> Result<(), TelemetryError> {
        Ok(())
    }

    fn write_image(&mut self, _tag: &str, _tensor: &Tensor, _step: usize, _index: usize) -> Result<(), TelemetryError> {
        Ok(())
    }
}

fn to_byte(value: TensorData) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Converts a `[1, H, W]` or `[3, H, W]` tensor into an 8-bit image.
pub fn encode_image(tensor: &Tensor) -> Result<image::DynamicImage, TelemetryError> {
    let shape = tensor.shape().to_vec();
    let (channels, height, width) = match shape.as_slice() {
        &[c, h, w] if c == 1 || c == 3 => (c, h, w),
        _ => return Err(TelemetryError::UnsupportedImage(shape.clone())),
    };
    let plane = height * width;
    let values: Vec<TensorData> = tensor.data().iter().copied().collect();
    // Channel-planar to interleaved.
    let mut bytes = Vec::with_capacity(values.len());
    for pixel in 0..plane {
        for channel in 0..channels {
            bytes.push(to_byte(values[channel * plane + pixel]));
        }
    }

    let unsupported = || TelemetryError::UnsupportedImage(shape.clone());
    let (w, h) = (width as u32, height as u32);
    let encoded = if channels == 1 {
        image::DynamicImage::ImageLuma8(image::GrayImage::from_raw(w, h, bytes).ok_or_else(unsupported)?)
    } else {
        image::DynamicImage::ImageRgb8(image::RgbImage::from_raw(w, h, bytes).ok_or_else(unsupported)?)
    };
    Ok(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("wgan_gp_telemetry_{}_{}", name, std::process::id()))
    }

    #[test]
    fn scalars_are_appended_as_json_lines() {
        let dir = temp_dir("scalars");
        let _ = std::fs::remove_dir_all(&dir);
        {
            let mut sink = FileSink::new(&dir).unwrap();
            sink.write_scalar("critic/neg_loss", 1.5, 0).unwrap();
            sink.write_scalar("generator/loss", -2.0, 0).unwrap();
        }
        let mut sink = FileSink::new(&dir).unwrap();
        sink.write_scalar("generator/loss", -1.0, 1).unwrap();

        let text = std::fs::read_to_string(dir.join(SCALARS_FILE)).unwrap();
        let records: Vec<ScalarRecord> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].tag, "critic/neg_loss");
        assert_eq!(records[2].step, 1);
        assert_eq!(records[2].value, -1.0);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn grayscale_images_are_written_as_png() {
        let dir = temp_dir("images");
        let _ = std::fs::remove_dir_all(&dir);
        let mut sink = FileSink::new(&dir).unwrap();
        let sample = Tensor::from_vec(&[1, 2, 3], vec![0.0, 0.2, 0.4, 0.6, 0.8, 1.0]).unwrap();
        sink.write_image("generator/output", &sample, 100, 3).unwrap();

        let path = sink.image_path("generator/output", 100, 3);
        assert!(path.ends_with("images/generator/output/100_3.png"));
        let decoded = image::open(&path).unwrap().to_luma8();
        assert_eq!(decoded.dimensions(), (3, 2));
        assert_eq!(decoded.get_pixel(0, 0).0[0], 0);
        assert_eq!(decoded.get_pixel(2, 1).0[0], 255);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn rgb_planes_are_interleaved() {
        let sample = Tensor::from_vec(&[3, 1, 2], vec![1.0, 0.0, 0.0, 1.0, 0.0, 0.0]).unwrap();
        let rgb = encode_image(&sample).unwrap().to_rgb8();
        assert_eq!(rgb.get_pixel(0, 0).0, [255, 0, 0]);
        assert_eq!(rgb.get_pixel(1, 0).0, [0, 255, 0]);
    }

    #[test]
    fn unsupported_shapes_are_rejected() {
        let two_channels = Tensor::from_vec(&[2, 1, 1], vec![0.0, 1.0]).unwrap();
        assert!(matches!(encode_image(&two_channels), Err(TelemetryError::UnsupportedImage(_))));
        let flat = Tensor::from_vec(&[4], vec![0.0; 4]).unwrap();
        assert!(encode_image(&flat).is_err());
    }
}
