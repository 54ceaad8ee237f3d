//! Frame container shared by sources, inference backends and the annotator.
//!
//! - `Frame`: packed RGB8 pixels plus dimensions. Pixel bytes are private and
//!   only reachable through read-only accessors.
//! - `BoundingBox`: pixel-space rectangle `(x1, y1)`-`(x2, y2)`, `x2`/`y2` exclusive.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Bytes per pixel of every frame flowing through the pipeline.
pub const RGB_CHANNELS: usize = 3;

// ----------------------------------------------------------------------------
// BoundingBox
// ----------------------------------------------------------------------------

/// Rectangle in frame pixel coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Build from floating point detector output, truncating like an integer cast.
    pub fn from_f32(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self::new(x1 as i32, y1 as i32, x2 as i32, y2 as i32)
    }

    pub fn width(&self) -> i32 {
        (self.x2 - self.x1).max(0)
    }

    pub fn height(&self) -> i32 {
        (self.y2 - self.y1).max(0)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Clamp into a `width` x `height` frame. Returns `None` when nothing is left.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<BoundingBox> {
        let w = width as i32;
        let h = height as i32;
        let clamped = BoundingBox {
            x1: self.x1.clamp(0, w),
            y1: self.y1.clamp(0, h),
            x2: self.x2.clamp(0, w),
            y2: self.y2.clamp(0, h),
        };
        if clamped.is_empty() {
            None
        } else {
            Some(clamped)
        }
    }
}

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// One decoded video frame in packed RGB8.
///
/// Not `Clone`; stages borrow frames.
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    /// Wrap packed RGB8 pixels. The buffer length must match the dimensions.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(RGB_CHANNELS))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// RGB value at `(x, y)`, or `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = ((y as usize) * (self.width as usize) + x as usize) * RGB_CHANNELS;
        Some([self.data[idx], self.data[idx + 1], self.data[idx + 2]])
    }

    /// Copy the region under `bbox` into a new frame.
    ///
    /// The box is clamped to the frame first; an empty region yields `None`.
    pub fn crop(&self, bbox: &BoundingBox) -> Option<Frame> {
        let region = bbox.clamp_to(self.width, self.height)?;
        let crop_w = region.width() as usize;
        let crop_h = region.height() as usize;
        let row_bytes = self.width as usize * RGB_CHANNELS;
        let mut data = Vec::with_capacity(crop_w * crop_h * RGB_CHANNELS);
        for row in region.y1 as usize..region.y2 as usize {
            let start = row * row_bytes + region.x1 as usize * RGB_CHANNELS;
            data.extend_from_slice(&self.data[start..start + crop_w * RGB_CHANNELS]);
        }
        Some(Frame {
            data,
            width: crop_w as u32,
            height: crop_h as u32,
        })
    }

    /// Consume the frame, returning its pixel buffer.
    pub fn into_pixels(self) -> Vec<u8> {
        self.data
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_frame(width: u32, height: u32) -> Frame {
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&[x as u8, y as u8, 7]);
            }
        }
        Frame::from_rgb(data, width, height).unwrap()
    }

    #[test]
    fn rejects_mismatched_buffer() {
        assert!(Frame::from_rgb(vec![0u8; 10], 4, 4).is_err());
    }

    #[test]
    fn crop_copies_region_rows() {
        let frame = gradient_frame(8, 6);
        let crop = frame.crop(&BoundingBox::new(2, 1, 5, 3)).expect("crop");
        assert_eq!((crop.width, crop.height), (3, 2));
        assert_eq!(crop.pixel(0, 0), Some([2, 1, 7]));
        assert_eq!(crop.pixel(2, 1), Some([4, 2, 7]));
    }

    #[test]
    fn crop_clamps_out_of_bounds_boxes() {
        let frame = gradient_frame(8, 6);
        let crop = frame.crop(&BoundingBox::new(-4, -2, 3, 100)).expect("crop");
        assert_eq!((crop.width, crop.height), (3, 6));
        assert!(frame.crop(&BoundingBox::new(10, 10, 20, 20)).is_none());
        assert!(frame.crop(&BoundingBox::new(3, 3, 3, 5)).is_none());
    }

    #[test]
    fn bounding_box_truncates_float_coordinates() {
        let bbox = BoundingBox::from_f32(1.9, 2.2, 10.7, 4.0);
        assert_eq!(bbox, BoundingBox::new(1, 2, 10, 4));
        assert_eq!(bbox.width(), 9);
    }
}
