use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use image::RgbaImage;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewId {
    Axial,
    Coronal,
    Sagittal,
}

impl ViewId {
    pub const ALL: [ViewId; 3] = [ViewId::Axial, ViewId::Coronal, ViewId::Sagittal];

    pub fn as_str(self) -> &'static str {
        match self {
            ViewId::Axial => "axial",
            ViewId::Coronal => "coronal",
            ViewId::Sagittal => "sagittal",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            ViewId::Axial => "Axial",
            ViewId::Coronal => "Coronal",
            ViewId::Sagittal => "Sagittal",
        }
    }

    pub fn index(self) -> usize {
        match self {
            ViewId::Axial => 0,
            ViewId::Coronal => 1,
            ViewId::Sagittal => 2,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "axial" => Some(ViewId::Axial),
            "coronal" => Some(ViewId::Coronal),
            "sagittal" => Some(ViewId::Sagittal),
            _ => None,
        }
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authoritative stack sizes as reported by the `/slices-count` endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SliceCounts {
    #[serde(default)]
    pub axial: usize,
    #[serde(default)]
    pub coronal: usize,
    #[serde(default)]
    pub sagittal: usize,
}

impl SliceCounts {
    /// Degenerate single-slice stacks used when the backend cannot be reached.
    pub fn fallback() -> Self {
        Self {
            axial: 1,
            coronal: 1,
            sagittal: 1,
        }
    }

    pub fn get(&self, view: ViewId) -> usize {
        match view {
            ViewId::Axial => self.axial,
            ViewId::Coronal => self.coronal,
            ViewId::Sagittal => self.sagittal,
        }
    }

    /// Replaces zero counts with `1`, matching the backend contract.
    pub fn normalized(self) -> Self {
        Self {
            axial: self.axial.max(1),
            coronal: self.coronal.max(1),
            sagittal: self.sagittal.max(1),
        }
    }

    pub fn total(&self) -> usize {
        self.axial + self.coronal + self.sagittal
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoxelSpacing {
    pub x_spacing_mm: f32,
    pub y_spacing_mm: f32,
    pub z_spacing_mm: f32,
}

impl VoxelSpacing {
    /// Spacing along the axis that selects slices in `view`.
    pub fn slice_spacing(&self, view: ViewId) -> f32 {
        match view {
            ViewId::Axial => self.z_spacing_mm,
            ViewId::Coronal => self.y_spacing_mm,
            ViewId::Sagittal => self.x_spacing_mm,
        }
    }

    pub fn depth_mm(&self, view: ViewId, index: usize) -> f32 {
        index as f32 * self.slice_spacing(view)
    }

    /// Converts an in-plane pixel distance to millimetres along the view's horizontal axis.
    pub fn in_plane_mm(&self, view: ViewId, pixels: f32) -> f32 {
        match view {
            ViewId::Axial | ViewId::Coronal => pixels * self.x_spacing_mm,
            ViewId::Sagittal => pixels * self.y_spacing_mm,
        }
    }
}

/// A decoded slice. Pixel data is shared so crops and textures never copy the source.
#[derive(Debug, Clone)]
pub struct SliceImage {
    pub width: u32,
    pub height: u32,
    pixels: Arc<RgbaImage>,
}

impl SliceImage {
    pub fn from_rgba(pixels: RgbaImage) -> Self {
        Self {
            width: pixels.width(),
            height: pixels.height(),
            pixels: Arc::new(pixels),
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let decoded = image::load_from_memory(bytes).context("Could not decode slice image")?;
        Ok(Self::from_rgba(decoded.to_rgba8()))
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }
}

/// Sparse, fixed-length slot arena for one orthogonal stack.
#[derive(Debug, Default)]
pub struct SliceCollection {
    slots: Vec<Option<Arc<SliceImage>>>,
    loaded: usize,
    generation: u64,
}

impl SliceCollection {
    pub fn count(&self) -> usize {
        self.slots.len()
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn images(&self) -> &[Option<Arc<SliceImage>>] {
        &self.slots
    }

    pub fn is_complete(&self) -> bool {
        !self.slots.is_empty() && self.loaded == self.slots.len()
    }

    pub fn percent_loaded(&self) -> u32 {
        if self.slots.is_empty() {
            return 0;
        }
        ((self.loaded as f32 / self.slots.len() as f32) * 100.0).round() as u32
    }

    fn reset(&mut self, count: usize) -> u64 {
        self.generation += 1;
        self.slots = vec![None; count];
        self.loaded = 0;
        self.generation
    }

    fn commit(&mut self, generation: u64, index: usize, image: Arc<SliceImage>) -> bool {
        if generation != self.generation {
            return false;
        }
        let Some(slot) = self.slots.get_mut(index) else {
            return false;
        };
        if slot.is_none() {
            self.loaded += 1;
        }
        *slot = Some(image);
        true
    }
}

#[derive(Debug, Default)]
pub struct SliceStore {
    collections: [SliceCollection; 3],
    spacing: Option<VoxelSpacing>,
}

impl SliceStore {
    /// `spacing` is `None` when no physical scale is known; millimetre readouts are then hidden.
    pub fn new(spacing: Option<VoxelSpacing>) -> Self {
        Self {
            collections: Default::default(),
            spacing,
        }
    }

    pub fn collection(&self, view: ViewId) -> &SliceCollection {
        &self.collections[view.index()]
    }

    pub fn images(&self, view: ViewId) -> &[Option<Arc<SliceImage>>] {
        self.collection(view).images()
    }

    pub fn get(&self, view: ViewId, index: usize) -> Option<&Arc<SliceImage>> {
        self.images(view).get(index).and_then(Option::as_ref)
    }

    pub fn count(&self, view: ViewId) -> usize {
        self.collection(view).count()
    }

    pub fn loaded_count(&self, view: ViewId) -> usize {
        self.collection(view).loaded_count()
    }

    pub fn spacing(&self) -> Option<VoxelSpacing> {
        self.spacing
    }

    /// Preallocates `count` empty slots and invalidates every in-flight write for `view`.
    pub fn reset_view(&mut self, view: ViewId, count: usize) -> u64 {
        self.collections[view.index()].reset(count)
    }

    /// Reinitialises all three stacks; returns the new generation per view.
    pub fn load_all_views(&mut self, counts: SliceCounts) -> [u64; 3] {
        ViewId::ALL.map(|view| self.reset_view(view, counts.get(view)))
    }

    /// Writes `image` into slot `index` if `generation` is still current.
    pub fn commit(
        &mut self,
        view: ViewId,
        generation: u64,
        index: usize,
        image: Arc<SliceImage>,
    ) -> bool {
        self.collections[view.index()].commit(generation, index, image)
    }
}

#[cfg(test)]
pub(crate) fn solid_slice(width: u32, height: u32, value: u8) -> SliceImage {
    SliceImage::from_rgba(RgbaImage::from_pixel(
        width,
        height,
        image::Rgba([value, value, value, 255]),
    ))
}
