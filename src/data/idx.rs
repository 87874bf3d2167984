//! IDX (MNIST) file loading.
//!
//! # IDX3 image file layout
//! ```text
//! bytes  0-1:   0x00 0x00   (reserved, must be zero)
//! byte   2:     0x08        (dtype = uint8)
//! byte   3:     0x03        (number of dimensions = 3)
//! bytes  4-7:   N           (number of images, big-endian u32)
//! bytes  8-11:  rows        (big-endian u32)
//! bytes 12-15:  cols        (big-endian u32)
//! bytes 16..:   N * rows * cols bytes, row-major, uint8
//! ```
//!
//! # IDX1 label file layout
//! ```text
//! bytes  0-3:   0x00 0x00 0x08 0x01
//! bytes  4-7:   N           (number of labels, big-endian u32)
//! bytes  8..:   N bytes, each a class index
//! ```

use super::{DataError, Dataset};
use crate::tensor::TensorData;
use ndarray::{ArrayD, IxDyn};
use std::path::Path;

/// Accepted file names, canonical spelling first.
pub const IMAGES_FILES: [&str; 2] = ["train-images-idx3-ubyte", "train-images.idx3-ubyte"];
pub const LABELS_FILES: [&str; 2] = ["train-labels-idx1-ubyte", "train-labels.idx1-ubyte"];

/// Pixels are scaled by 1/256, so values lie in `[0, 255/256]`.
const PIXEL_SCALE: TensorData = 1.0 / 256.0;

/// Decoded IDX3 image file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdxImages {
    pub count: usize,
    pub rows: usize,
    pub cols: usize,
    pub pixels: Vec<u8>,
}

fn read_u32(bytes: &[u8], offset: usize) -> usize {
    u32::from_be_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]]) as usize
}

fn check_magic(kind: &'static str, bytes: &[u8], dims: u8, header_len: usize) -> Result<(), DataError> {
    if bytes.len() < header_len {
        return Err(DataError::Malformed {
            kind,
            reason: format!("expected at least {} header bytes, got {}", header_len, bytes.len()),
        });
    }
    if bytes[0] != 0x00 || bytes[1] != 0x00 {
        return Err(DataError::Malformed {
            kind,
            reason: format!("bytes 0-1 must be 0x00 0x00, got 0x{:02X} 0x{:02X}", bytes[0], bytes[1]),
        });
    }
    if bytes[2] != 0x08 {
        return Err(DataError::Malformed {
            kind,
            reason: format!("dtype byte must be 0x08 (uint8), got 0x{:02X}", bytes[2]),
        });
    }
    if bytes[3] != dims {
        return Err(DataError::Malformed {
            kind,
            reason: format!("expected {} dimensions, got {}", dims, bytes[3]),
        });
    }
    Ok(())
}

pub fn parse_idx_images(bytes: &[u8]) -> Result<IdxImages, DataError> {
    const KIND: &str = "image";
    check_magic(KIND, bytes, 3, 16)?;
    let count = read_u32(bytes, 4);
    let rows = read_u32(bytes, 8);
    let cols = read_u32(bytes, 12);

    let needed = count
        .checked_mul(rows)
        .and_then(|n| n.checked_mul(cols))
        .ok_or_else(|| DataError::Malformed {
            kind: KIND,
            reason: format!("{} x {} x {} overflows usize", count, rows, cols),
        })?;
    let payload = &bytes[16..];
    if payload.len() < needed {
        return Err(DataError::Malformed {
            kind: KIND,
            reason: format!(
                "header declares {} images of {}x{} ({} bytes), file holds {}",
                count,
                rows,
                cols,
                needed,
                payload.len()
            ),
        });
    }

    Ok(IdxImages {
        count,
        rows,
        cols,
        pixels: payload[..needed].to_vec(),
    })
}

pub fn parse_idx_labels(bytes: &[u8]) -> Result<Vec<usize>, DataError> {
    const KIND: &str = "label";
    check_magic(KIND, bytes, 1, 8)?;
    let count = read_u32(bytes, 4);
    let payload = &bytes[8..];
    if payload.len() < count {
        return Err(DataError::Malformed {
            kind: KIND,
            reason: format!("header declares {} labels, file holds {}", count, payload.len()),
        });
    }
    Ok(payload[..count].iter().map(|&b| b as usize).collect())
}

/// Builds a dataset of `[N, 1, rows, cols]` images from an IDX pair.
pub fn parse_idx_pair(image_bytes: &[u8], label_bytes: &[u8], num_classes: usize) -> Result<Dataset, DataError> {
    let images = parse_idx_images(image_bytes)?;
    let labels = parse_idx_labels(label_bytes)?;
    let pixels: Vec<TensorData> = images.pixels.iter().map(|&p| p as TensorData * PIXEL_SCALE).collect();
    let array = ArrayD::from_shape_vec(IxDyn(&[images.count, 1, images.rows, images.cols]), pixels)?;
    Dataset::new(array, labels, num_classes)
}

/// Reads the first of `names` that exists in `dir`; reports the canonical name otherwise.
fn read_first(dir: &Path, names: &[&str]) -> Result<Vec<u8>, DataError> {
    let path = names
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
        .unwrap_or_else(|| dir.join(names[0]));
    std::fs::read(&path).map_err(|source| DataError::Io { path, source })
}

/// Loads the MNIST training split (`train-images-idx3-ubyte`,
/// `train-labels-idx1-ubyte`) from `dir`.
pub fn load_idx_dataset(dir: &Path, num_classes: usize) -> Result<Dataset, DataError> {
    let image_bytes = read_first(dir, &IMAGES_FILES)?;
    let label_bytes = read_first(dir, &LABELS_FILES)?;
    let dataset = parse_idx_pair(&image_bytes, &label_bytes, num_classes)?;
    log::info!(
        "Loaded {} samples of shape {:?} from {}",
        dataset.len(),
        dataset.sample_shape(),
        dir.display()
    );
    Ok(dataset)
}
