use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::{imageops, DynamicImage, ImageFormat, RgbaImage};
use rand::Rng;

use crate::slices::{SliceImage, ViewId};

pub const DEFAULT_MIN_REGION: u32 = 60;
pub const DEFAULT_MAX_REGION: u32 = 100;

/// Sub-rectangle of a slice in source pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionSpec {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

pub fn random_region<R: Rng + ?Sized>(
    rng: &mut R,
    image_width: u32,
    image_height: u32,
    min_size: u32,
    max_size: u32,
) -> RegionSpec {
    let (min_size, max_size) = if min_size > max_size {
        (max_size, min_size)
    } else {
        (min_size, max_size)
    };
    let width = rng.gen_range(min_size..=max_size);
    let height = rng.gen_range(min_size..=max_size);
    RegionSpec {
        x: rng.gen_range(0..=image_width.saturating_sub(width)),
        y: rng.gen_range(0..=image_height.saturating_sub(height)),
        width,
        height,
    }
}

type RegionKey = (u32, u32, u32, u32);

/// Rolls a region once per `(width, height, min, max)` and then always returns it.
#[derive(Debug, Default)]
pub struct RegionCache {
    regions: HashMap<RegionKey, RegionSpec>,
}

impl RegionCache {
    pub fn region(
        &mut self,
        image_width: u32,
        image_height: u32,
        min_size: u32,
        max_size: u32,
    ) -> RegionSpec {
        self.region_with(
            &mut rand::thread_rng(),
            image_width,
            image_height,
            min_size,
            max_size,
        )
    }

    pub fn region_with<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        image_width: u32,
        image_height: u32,
        min_size: u32,
        max_size: u32,
    ) -> RegionSpec {
        *self
            .regions
            .entry((image_width, image_height, min_size, max_size))
            .or_insert_with(|| random_region(rng, image_width, image_height, min_size, max_size))
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }
}

/// Pixel data of a clipped region.
#[derive(Debug)]
pub struct RenderedCrop {
    pub width: u32,
    pub height: u32,
    pixels: RgbaImage,
}

impl RenderedCrop {
    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn png_data_url(&self) -> Result<String> {
        let mut bytes = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(self.pixels.clone())
            .write_to(&mut bytes, ImageFormat::Png)
            .context("Could not encode crop as PNG")?;
        Ok(format!(
            "data:image/png;base64,{}",
            BASE64.encode(bytes.into_inner())
        ))
    }
}

#[derive(Debug, Clone)]
pub enum CropOutcome {
    Ready(Arc<RenderedCrop>),
    /// The source slice has not been decoded yet.
    Pending,
    /// The region falls outside the image.
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CropKey {
    view: ViewId,
    index: usize,
    region: RegionSpec,
}

/// Append-only cache of rendered crops keyed by `(view, index, region)`.
#[derive(Debug, Default)]
pub struct CropCache {
    crops: HashMap<CropKey, Option<Arc<RenderedCrop>>>,
}

impl CropCache {
    pub fn crop(
        &mut self,
        view: ViewId,
        index: usize,
        region: RegionSpec,
        source: Option<&SliceImage>,
    ) -> CropOutcome {
        let key = CropKey {
            view,
            index,
            region,
        };
        if let Some(entry) = self.crops.get(&key) {
            return outcome(entry);
        }
        let Some(source) = source else {
            return CropOutcome::Pending;
        };

        let rendered = render_crop(source, region).map(Arc::new);
        if rendered.is_none() {
            log::debug!("empty crop for {view} slice {index} at {region:?}");
        }
        let result = outcome(&rendered);
        self.crops.insert(key, rendered);
        result
    }

    pub fn len(&self) -> usize {
        self.crops.len()
    }
}

fn outcome(entry: &Option<Arc<RenderedCrop>>) -> CropOutcome {
    match entry {
        Some(crop) => CropOutcome::Ready(Arc::clone(crop)),
        None => CropOutcome::Empty,
    }
}

fn render_crop(source: &SliceImage, region: RegionSpec) -> Option<RenderedCrop> {
    let sx = region.x;
    let sy = region.y;
    let width = region.width.min(source.width.saturating_sub(sx));
    let height = region.height.min(source.height.saturating_sub(sy));
    if width == 0 || height == 0 {
        return None;
    }
    let pixels = imageops::crop_imm(source.pixels(), sx, sy, width, height).to_image();
    Some(RenderedCrop {
        width,
        height,
        pixels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::slices::solid_slice;

    #[test]
    fn same_dimensions_return_same_region() {
        let mut cache = RegionCache::default();
        let first = cache.region(512, 512, DEFAULT_MIN_REGION, DEFAULT_MAX_REGION);
        let second = cache.region(512, 512, DEFAULT_MIN_REGION, DEFAULT_MAX_REGION);
        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);

        assert!((60..=100).contains(&first.width));
        assert!((60..=100).contains(&first.height));
        assert!(first.x + first.width <= 512);
        assert!(first.y + first.height <= 512);
    }

    #[test]
    fn key_includes_size_bounds() {
        let mut cache = RegionCache::default();
        cache.region(512, 512, 60, 100);
        cache.region(512, 512, 10, 20);
        cache.region(256, 512, 60, 100);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn small_image_pins_origin_to_zero() {
        let region = random_region(&mut rand::thread_rng(), 40, 30, 60, 100);
        assert_eq!((region.x, region.y), (0, 0));
    }

    #[test]
    fn inverted_bounds_are_swapped() {
        let mut rng = rand::thread_rng();
        for _ in 0..20 {
            let region = random_region(&mut rng, 300, 300, 90, 50);
            assert!((50..=90).contains(&region.width));
        }
    }

    #[test]
    fn crop_is_clipped_to_image() {
        let mut crops = CropCache::default();
        let source = solid_slice(100, 80, 42);
        let region = RegionSpec {
            x: 70,
            y: 60,
            width: 60,
            height: 60,
        };
        let CropOutcome::Ready(crop) = crops.crop(ViewId::Axial, 3, region, Some(&source)) else {
            panic!("expected a rendered crop");
        };
        assert_eq!((crop.width, crop.height), (30, 20));
        assert_eq!(crop.pixels().get_pixel(0, 0).0, [42, 42, 42, 255]);
    }

    #[test]
    fn degenerate_crop_is_empty() {
        let mut crops = CropCache::default();
        let source = solid_slice(50, 50, 0);
        let region = RegionSpec {
            x: 50,
            y: 10,
            width: 60,
            height: 60,
        };
        assert!(matches!(
            crops.crop(ViewId::Coronal, 0, region, Some(&source)),
            CropOutcome::Empty
        ));
    }

    #[test]
    fn undecoded_source_defers_render() {
        let mut crops = CropCache::default();
        let region = RegionSpec {
            x: 0,
            y: 0,
            width: 10,
            height: 10,
        };
        assert!(matches!(
            crops.crop(ViewId::Sagittal, 1, region, None),
            CropOutcome::Pending
        ));
        assert_eq!(crops.len(), 0);

        let source = solid_slice(20, 20, 5);
        assert!(matches!(
            crops.crop(ViewId::Sagittal, 1, region, Some(&source)),
            CropOutcome::Ready(_)
        ));
    }

    #[test]
    fn cached_crop_is_shared() {
        let mut crops = CropCache::default();
        let source = solid_slice(20, 20, 5);
        let region = RegionSpec {
            x: 2,
            y: 2,
            width: 8,
            height: 8,
        };
        let CropOutcome::Ready(first) = crops.crop(ViewId::Axial, 0, region, Some(&source)) else {
            panic!("expected a rendered crop");
        };
        let CropOutcome::Ready(second) = crops.crop(ViewId::Axial, 0, region, None) else {
            panic!("expected a cached crop");
        };
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn crop_encodes_as_png_data_url() {
        let mut crops = CropCache::default();
        let source = solid_slice(4, 4, 200);
        let region = RegionSpec {
            x: 0,
            y: 0,
            width: 2,
            height: 2,
        };
        let CropOutcome::Ready(crop) = crops.crop(ViewId::Axial, 0, region, Some(&source)) else {
            panic!("expected a rendered crop");
        };
        let url = crop.png_data_url().expect("png encoding");
        assert!(url.starts_with("data:image/png;base64,iVBORw0KGgo"));
    }
}
