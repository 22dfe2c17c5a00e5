//! Preview preparation.
//!
//! Previews carry the compressed bytes plus what a viewer needs to label
//! them. Dimensions come from the JPEG frame header; nothing is decoded.

use bytes::Bytes;

use crate::item::WorkItem;

/// A compressed image ready to be shown.
#[derive(Debug, Clone)]
pub struct Preview {
    pub seq: Option<u64>,
    pub name: String,
    /// `(width, height)` when the data carries a JPEG frame header.
    pub dimensions: Option<(u16, u16)>,
    pub source_len: usize,
    pub compressed_len: usize,
    pub data: Bytes,
}

impl Preview {
    pub fn prepare(item: WorkItem) -> Self {
        Self {
            seq: item.seq,
            dimensions: jpeg_dimensions(&item.data),
            source_len: item.source_len,
            compressed_len: item.data.len(),
            name: item.name,
            data: item.data,
        }
    }

    pub fn ratio(&self) -> f64 {
        if self.source_len == 0 {
            1.0
        } else {
            self.compressed_len as f64 / self.source_len as f64
        }
    }
}

const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;
const SOS: u8 = 0xDA;

/// Start-of-frame markers, excluding DHT (C4), JPG (C8) and DAC (CC).
fn is_sof(marker: u8) -> bool {
    matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC)
}

/// Markers without a length field.
fn is_standalone(marker: u8) -> bool {
    matches!(marker, 0x01 | 0xD0..=0xD7 | SOI | EOI)
}

/// Read `(width, height)` from the first start-of-frame segment.
pub fn jpeg_dimensions(data: &[u8]) -> Option<(u16, u16)> {
    if data.get(..2)? != [0xFF, SOI] {
        return None;
    }

    let mut pos = 2;
    loop {
        if *data.get(pos)? != 0xFF {
            return None;
        }
        // Any number of fill bytes may precede a marker.
        while *data.get(pos)? == 0xFF {
            pos += 1;
        }
        let marker = *data.get(pos)?;
        pos += 1;

        if is_standalone(marker) {
            if marker == EOI {
                return None;
            }
            continue;
        }
        if marker == SOS {
            return None;
        }

        let len = u16::from_be_bytes([*data.get(pos)?, *data.get(pos + 1)?]) as usize;
        if len < 2 {
            return None;
        }
        if is_sof(marker) {
            // length(2) precision(1) height(2) width(2)
            let segment = data.get(pos..pos + 7)?;
            let height = u16::from_be_bytes([segment[3], segment[4]]);
            let width = u16::from_be_bytes([segment[5], segment[6]]);
            return Some((width, height));
        }
        pos += len;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Smallest marker sequence carrying a baseline frame header.
    pub(crate) fn synthetic_jpeg(width: u16, height: u16, padding: usize) -> Vec<u8> {
        let mut data = vec![0xFF, SOI];
        // APP0 with a 4-byte body.
        data.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x06, b'J', b'F', b'I', b'F']);
        // SOF0: length 11, precision 8, dims, one component.
        data.extend_from_slice(&[0xFF, 0xC0, 0x00, 0x0B, 0x08]);
        data.extend_from_slice(&height.to_be_bytes());
        data.extend_from_slice(&width.to_be_bytes());
        data.extend_from_slice(&[0x01, 0x01, 0x11, 0x00]);
        data.extend_from_slice(&[0xFF, SOS, 0x00, 0x02]);
        data.extend(std::iter::repeat_n(0x5A, padding));
        data.extend_from_slice(&[0xFF, EOI]);
        data
    }

    #[test]
    fn reads_frame_dimensions() {
        assert_eq!(jpeg_dimensions(&synthetic_jpeg(640, 480, 16)), Some((640, 480)));
    }

    #[test]
    fn skips_fill_bytes_before_markers() {
        let mut data = synthetic_jpeg(3, 2, 0);
        data.insert(2, 0xFF);
        assert_eq!(jpeg_dimensions(&data), Some((3, 2)));
    }

    #[test]
    fn rejects_non_jpeg_and_truncated_data() {
        assert_eq!(jpeg_dimensions(b"\x89PNG\r\n"), None);
        assert_eq!(jpeg_dimensions(&[]), None);
        let data = synthetic_jpeg(10, 10, 0);
        assert_eq!(jpeg_dimensions(&data[..12]), None);
    }

    #[test]
    fn scan_before_frame_header_has_no_dimensions() {
        let data = [0xFF, SOI, 0xFF, SOS, 0x00, 0x02, 0xFF, EOI];
        assert_eq!(jpeg_dimensions(&data), None);
    }

    #[test]
    fn prepare_records_sizes() {
        let item = WorkItem::new("a.jpg", vec![0u8; 400]).with_seq(2);
        let compressed = item.with_data(synthetic_jpeg(8, 4, 0));
        let preview = Preview::prepare(compressed);
        assert_eq!(preview.seq, Some(2));
        assert_eq!(preview.dimensions, Some((8, 4)));
        assert_eq!(preview.source_len, 400);
        assert_eq!(preview.compressed_len, preview.data.len());
        assert!(preview.ratio() < 1.0);
    }
}
