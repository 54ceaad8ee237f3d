//! Annotated JPEG rendering for live snapshots.
//!
//! Read plates are outlined in green, unreadable ones in orange, each with a
//! solid tab above the box so the outline stays visible after compression.

use anyhow::{anyhow, Result};
use image::{codecs::jpeg::JpegEncoder, ImageBuffer, Rgb, RgbImage};

use crate::frame::{BoundingBox, Frame};
use crate::live::LiveDetection;
use crate::stabilize::PlateState;

pub const DEFAULT_JPEG_QUALITY: u8 = 80;

const READ_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const UNREAD_COLOR: Rgb<u8> = Rgb([255, 165, 0]);
const BOX_THICKNESS: i32 = 2;
const TAB_HEIGHT: i32 = 6;

/// Draw `detections` onto `frame` and encode it as JPEG.
pub fn render_jpeg(frame: Frame, detections: &[LiveDetection], quality: u8) -> Result<Vec<u8>> {
    let (width, height) = (frame.width, frame.height);
    let mut image = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_raw(width, height, frame.into_pixels())
        .ok_or_else(|| anyhow!("failed to convert frame into image buffer"))?;
    draw_detections(&mut image, detections);

    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode_image(&image)
        .map_err(|err| anyhow!("JPEG encode failed: {err}"))?;
    Ok(buffer)
}

pub(crate) fn draw_detections(image: &mut RgbImage, detections: &[LiveDetection]) {
    for detection in detections {
        let color = match detection.state {
            PlateState::Unrecognized => UNREAD_COLOR,
            _ => READ_COLOR,
        };
        let b = detection.bbox;
        for inset in 0..BOX_THICKNESS {
            draw_rectangle(image, b.x1 + inset, b.y1 + inset, b.x2 - 1 - inset, b.y2 - 1 - inset, color);
        }
        let tab_width = (b.width() / 2).max(BOX_THICKNESS);
        fill_rect(
            image,
            BoundingBox::new(b.x1, b.y1 - TAB_HEIGHT, b.x1 + tab_width, b.y1),
            color,
        );
    }
}

fn draw_rectangle(image: &mut RgbImage, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    if right < left || bottom < top {
        return;
    }
    let width = image.width() as i32;
    let height = image.height() as i32;
    let mut put = |x: i32, y: i32| {
        if (0..width).contains(&x) && (0..height).contains(&y) {
            *image.get_pixel_mut(x as u32, y as u32) = color;
        }
    };
    for x in left..=right {
        put(x, top);
        put(x, bottom);
    }
    for y in top..=bottom {
        put(left, y);
        put(right, y);
    }
}

fn fill_rect(image: &mut RgbImage, area: BoundingBox, color: Rgb<u8>) {
    let Some(area) = area.clamp_to(image.width(), image.height()) else {
        return;
    };
    for y in area.y1..area.y2 {
        for x in area.x1..area.x2 {
            *image.get_pixel_mut(x as u32, y as u32) = color;
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
