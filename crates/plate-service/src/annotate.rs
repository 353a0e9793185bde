use common::plates::BoundingBox;
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

pub const VEHICLE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const PLATE_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const LINE_WIDTH: u32 = 3;

/// Draw vehicle and plate boxes over a copy of `image`
pub fn annotate(image: &DynamicImage, vehicles: &[BoundingBox], plates: &[BoundingBox]) -> RgbImage {
    let mut canvas = image.to_rgb8();

    for bbox in vehicles {
        draw_box(&mut canvas, bbox, VEHICLE_COLOR);
    }
    for bbox in plates {
        draw_box(&mut canvas, bbox, PLATE_COLOR);
    }

    canvas
}

fn draw_box(canvas: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>) {
    // Thicken the outline inwards while the box is large enough
    for inset in 0..LINE_WIDTH {
        let width = bbox.width().saturating_sub(2 * inset);
        let height = bbox.height().saturating_sub(2 * inset);
        if width == 0 || height == 0 {
            break;
        }
        let rect = Rect::at((bbox.x1 + inset) as i32, (bbox.y1 + inset) as i32).of_size(width, height);
        draw_hollow_rect_mut(canvas, rect, color);
    }
}
