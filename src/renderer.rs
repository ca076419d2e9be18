use eframe::egui::{self, Color32, ColorImage, Painter, Pos2, Rect, Stroke, Vec2};
use image::RgbaImage;

use crate::slices::ViewId;

/// Converts slice pixels for upload, scaling colour channels by `brightness`.
pub fn render_rgba(image: &RgbaImage, brightness: f32) -> ColorImage {
    let width_px = image.width() as usize;
    let height_px = image.height() as usize;
    let pixel_count = width_px.saturating_mul(height_px);
    let mut pixels = Vec::with_capacity(pixel_count);
    let scale = |value: u8| (value as f32 * brightness).round().clamp(0.0, 255.0) as u8;

    for chunk in image.as_raw().chunks_exact(4).take(pixel_count) {
        pixels.push(if brightness == 1.0 {
            Color32::from_rgba_unmultiplied(chunk[0], chunk[1], chunk[2], chunk[3])
        } else {
            Color32::from_rgba_unmultiplied(
                scale(chunk[0]),
                scale(chunk[1]),
                scale(chunk[2]),
                chunk[3],
            )
        });
    }

    if pixels.len() < pixel_count {
        pixels.resize(pixel_count, Color32::BLACK);
    }

    ColorImage {
        size: [width_px, height_px],
        pixels,
    }
}

/// Largest rectangle with the image's aspect ratio centred in `area`.
pub fn fit_rect(area: Rect, image_size: Vec2) -> Rect {
    if image_size.x <= 0.0 || image_size.y <= 0.0 {
        return area;
    }
    let scale = (area.width() / image_size.x).min(area.height() / image_size.y);
    Rect::from_center_size(area.center(), image_size * scale.max(0.0))
}

pub fn view_color(view: ViewId) -> Color32 {
    match view {
        ViewId::Axial => Color32::from_rgb(0x4f, 0x9d, 0xff),
        ViewId::Coronal => Color32::from_rgb(0x52, 0xc4, 0x1a),
        ViewId::Sagittal => Color32::from_rgb(0xfa, 0x8c, 0x16),
    }
}

/// Planes drawn as the vertical and horizontal crosshair lines in `view`.
pub fn crosshair_planes(view: ViewId) -> (ViewId, ViewId) {
    match view {
        ViewId::Axial => (ViewId::Sagittal, ViewId::Coronal),
        ViewId::Coronal => (ViewId::Sagittal, ViewId::Axial),
        ViewId::Sagittal => (ViewId::Coronal, ViewId::Axial),
    }
}

pub fn paint_crosshair(painter: &Painter, view: ViewId, image_rect: Rect, marker: Pos2) {
    let (vertical, horizontal) = crosshair_planes(view);
    let clip = painter.clip_rect().intersect(image_rect);
    let painter = painter.with_clip_rect(clip);
    painter.line_segment(
        [
            Pos2::new(marker.x, image_rect.top()),
            Pos2::new(marker.x, image_rect.bottom()),
        ],
        Stroke::new(1.0, view_color(vertical)),
    );
    painter.line_segment(
        [
            Pos2::new(image_rect.left(), marker.y),
            Pos2::new(image_rect.right(), marker.y),
        ],
        Stroke::new(1.0, view_color(horizontal)),
    );
    painter.circle_stroke(marker, 4.0, Stroke::new(1.5, Color32::WHITE));
}

pub fn paint_placeholder(painter: &Painter, rect: Rect, text: &str) {
    painter.rect_filled(rect, 4.0, Color32::from_gray(24));
    painter.text(
        rect.center(),
        egui::Align2::CENTER_CENTER,
        text,
        egui::FontId::proportional(13.0),
        Color32::from_gray(150),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_rgba_keeps_channels() {
        let mut image = RgbaImage::new(2, 1);
        image.put_pixel(0, 0, image::Rgba([10, 20, 30, 255]));
        image.put_pixel(1, 0, image::Rgba([200, 100, 50, 255]));
        let rendered = render_rgba(&image, 1.0);
        assert_eq!(rendered.size, [2, 1]);
        assert_eq!(rendered.pixels[0], Color32::from_rgb(10, 20, 30));
        assert_eq!(rendered.pixels[1], Color32::from_rgb(200, 100, 50));
    }

    #[test]
    fn brightness_scales_and_saturates_colour() {
        let mut image = RgbaImage::new(2, 1);
        image.put_pixel(0, 0, image::Rgba([10, 20, 30, 255]));
        image.put_pixel(1, 0, image::Rgba([200, 100, 50, 255]));
        let brighter = render_rgba(&image, 2.0);
        assert_eq!(brighter.pixels[0], Color32::from_rgb(20, 40, 60));
        assert_eq!(brighter.pixels[1], Color32::from_rgb(255, 200, 100));
        let darker = render_rgba(&image, 0.5);
        assert_eq!(darker.pixels[0], Color32::from_rgb(5, 10, 15));
    }

    #[test]
    fn fit_rect_preserves_aspect() {
        let area = Rect::from_min_size(Pos2::ZERO, Vec2::new(400.0, 200.0));
        let fitted = fit_rect(area, Vec2::new(100.0, 100.0));
        assert_eq!(fitted.size(), Vec2::new(200.0, 200.0));
        assert_eq!(fitted.center(), area.center());
        assert_eq!(fit_rect(area, Vec2::ZERO), area);
    }

    #[test]
    fn crosshair_lines_show_the_other_planes() {
        for view in ViewId::ALL {
            let (vertical, horizontal) = crosshair_planes(view);
            assert_ne!(vertical, view);
            assert_ne!(horizontal, view);
            assert_ne!(vertical, horizontal);
        }
    }
}
