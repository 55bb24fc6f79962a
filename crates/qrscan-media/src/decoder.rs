//! QR symbol decoding for single frames.

use std::path::Path;

use crate::error::{MediaError, MediaResult};

/// Decodes at most one code symbol from an image file.
///
/// Implementations are called from blocking threads and must be
/// shareable across them.
pub trait CodeDecoder: Send + Sync {
    /// `Ok(None)` means the frame holds no decodable symbol.
    fn decode(&self, frame: &Path) -> MediaResult<Option<String>>;
}

/// QR decoder backed by `rqrr`.
#[derive(Debug, Clone, Copy, Default)]
pub struct QrDecoder;

impl QrDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl CodeDecoder for QrDecoder {
    fn decode(&self, frame: &Path) -> MediaResult<Option<String>> {
        let image = image::open(frame)
            .map_err(|e| MediaError::decode_failed(frame, e.to_string()))?
            .to_luma8();

        let (width, height) = image.dimensions();
        let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
            width as usize,
            height as usize,
            |x, y| image.get_pixel(x as u32, y as u32).0[0],
        );

        // A frame may show several grids; the first that decodes wins
        Ok(prepared
            .detect_grids()
            .into_iter()
            .find_map(|grid| grid.decode().ok().map(|(_, content)| content)))
    }
}
