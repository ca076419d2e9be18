use crate::slices::ViewId;

/// Shared 3D viewing position. Every component lies in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedCursor {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Default for NormalizedCursor {
    fn default() -> Self {
        Self {
            x: 0.5,
            y: 0.5,
            z: 0.5,
        }
    }
}

impl NormalizedCursor {
    pub fn clamped(self) -> Self {
        Self {
            x: clamp_unit(self.x),
            y: clamp_unit(self.y),
            z: clamp_unit(self.z),
        }
    }

    /// Slice index shown by `view` for a stack of `count` slices.
    pub fn slice_index(&self, view: ViewId, count: usize) -> usize {
        if count <= 1 {
            return 0;
        }
        let last = (count - 1) as f32;
        let position = match view {
            ViewId::Axial => self.z,
            ViewId::Coronal => 1.0 - self.y,
            ViewId::Sagittal => self.x,
        };
        ((clamp_unit(position) * last).round() as usize).min(count - 1)
    }

    /// Horizontal and vertical image-relative position of the crosshair in `view`.
    pub fn in_plane_position(&self, view: ViewId) -> (f32, f32) {
        match view {
            ViewId::Axial => (self.x, 1.0 - self.y),
            ViewId::Coronal => (self.x, 1.0 - self.z),
            ViewId::Sagittal => (1.0 - self.y, 1.0 - self.z),
        }
    }

    fn with_in_plane(mut self, view: ViewId, u: f32, v: f32) -> Self {
        let u = clamp_unit(u);
        let v = clamp_unit(v);
        match view {
            ViewId::Axial => {
                self.x = u;
                self.y = 1.0 - v;
            }
            ViewId::Coronal => {
                self.x = u;
                self.z = 1.0 - v;
            }
            ViewId::Sagittal => {
                self.y = 1.0 - u;
                self.z = 1.0 - v;
            }
        }
        self
    }

    fn with_slice_index(mut self, view: ViewId, index: usize, count: usize) -> Self {
        if count <= 1 {
            return self;
        }
        let t = index.min(count - 1) as f32 / (count - 1) as f32;
        match view {
            ViewId::Axial => self.z = t,
            ViewId::Coronal => self.y = 1.0 - t,
            ViewId::Sagittal => self.x = t,
        }
        self
    }
}

fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

/// Owner of the shared cursor. Views write through axis-scoped setters only;
/// each setter reports whether anything changed so equal writes stay silent.
#[derive(Debug, Default)]
pub struct CrosshairModel {
    cursor: NormalizedCursor,
    revision: u64,
    reported_revision: u64,
}

impl CrosshairModel {
    pub fn cursor(&self) -> NormalizedCursor {
        self.cursor
    }

    pub fn slice_index(&self, view: ViewId, count: usize) -> usize {
        self.cursor.slice_index(view, count)
    }

    pub fn in_plane_position(&self, view: ViewId) -> (f32, f32) {
        self.cursor.in_plane_position(view)
    }

    pub fn set_cursor(&mut self, cursor: NormalizedCursor) -> bool {
        self.replace(cursor.clamped())
    }

    /// Moves the two in-plane axes of `view` to image-relative `(u, v)`.
    pub fn set_in_plane(&mut self, view: ViewId, u: f32, v: f32) -> bool {
        self.replace(self.cursor.with_in_plane(view, u, v))
    }

    /// Moves only the slice-selecting axis of `view`. Single-slice stacks leave it untouched.
    pub fn set_slice_index(&mut self, view: ViewId, index: usize, count: usize) -> bool {
        self.replace(self.cursor.with_slice_index(view, index, count))
    }

    pub fn step_slice(&mut self, view: ViewId, delta: i32, count: usize) -> bool {
        if count <= 1 || delta == 0 {
            return false;
        }
        let current = self.slice_index(view, count) as i64;
        let target = (current + i64::from(delta)).clamp(0, (count - 1) as i64) as usize;
        self.set_slice_index(view, target, count)
    }

    /// Returns the cursor once per batch of changes since the last call.
    pub fn take_change(&mut self) -> Option<NormalizedCursor> {
        if self.reported_revision == self.revision {
            return None;
        }
        self.reported_revision = self.revision;
        Some(self.cursor)
    }

    fn replace(&mut self, next: NormalizedCursor) -> bool {
        if next == self.cursor {
            return false;
        }
        self.cursor = next;
        self.revision += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    fn cursor(x: f32, y: f32, z: f32) -> NormalizedCursor {
        NormalizedCursor { x, y, z }
    }

    fn model_at(x: f32, y: f32, z: f32) -> CrosshairModel {
        let mut model = CrosshairModel::default();
        model.set_cursor(cursor(x, y, z));
        model.take_change();
        model
    }

    #[test]
    fn index_boundaries() {
        let start = cursor(0.5, 0.5, 0.0);
        let end = cursor(0.5, 0.5, 1.0);
        assert_eq!(start.slice_index(ViewId::Axial, 100), 0);
        assert_eq!(end.slice_index(ViewId::Axial, 100), 99);
        assert_eq!(end.slice_index(ViewId::Axial, 1), 0);
        assert_eq!(start.slice_index(ViewId::Axial, 1), 0);
        assert_eq!(end.slice_index(ViewId::Axial, 0), 0);
    }

    #[test]
    fn coronal_index_runs_against_y() {
        let top = cursor(0.5, 0.0, 0.5);
        assert_eq!(top.slice_index(ViewId::Coronal, 40), 39);
        let bottom = cursor(0.5, 1.0, 0.5);
        assert_eq!(bottom.slice_index(ViewId::Coronal, 40), 0);
    }

    #[test]
    fn slider_value_round_trips_through_axis() {
        let mut model = CrosshairModel::default();
        assert!(model.set_slice_index(ViewId::Axial, 49, 100));
        assert!(approx(model.cursor().z, 49.0 / 99.0));
        assert_eq!(model.slice_index(ViewId::Axial, 100), 49);

        for view in ViewId::ALL {
            for index in [0, 7, 24] {
                model.set_slice_index(view, index, 25);
                assert_eq!(model.slice_index(view, 25), index);
            }
        }
    }

    #[test]
    fn slice_setter_only_touches_its_axis() {
        let mut model = model_at(0.2, 0.3, 0.4);
        model.set_slice_index(ViewId::Coronal, 10, 40);
        let cursor = model.cursor();
        assert!(approx(cursor.x, 0.2));
        assert!(approx(cursor.z, 0.4));
        assert!(approx(cursor.y, 1.0 - 10.0 / 39.0));
    }

    #[test]
    fn single_slice_stack_leaves_cursor_unchanged() {
        let mut model = model_at(0.2, 0.3, 0.4);
        assert!(!model.set_slice_index(ViewId::Sagittal, 0, 1));
        assert!(approx(model.cursor().x, 0.2));
    }

    #[test]
    fn in_plane_mapping_inverts_screen_axes() {
        let mut model = model_at(0.5, 0.5, 0.5);
        model.set_in_plane(ViewId::Axial, 0.25, 0.1);
        assert!(approx(model.cursor().x, 0.25));
        assert!(approx(model.cursor().y, 0.9));
        assert!(approx(model.cursor().z, 0.5));

        model.set_in_plane(ViewId::Coronal, 0.6, 0.2);
        assert!(approx(model.cursor().x, 0.6));
        assert!(approx(model.cursor().z, 0.8));

        model.set_in_plane(ViewId::Sagittal, 0.3, 0.7);
        assert!(approx(model.cursor().y, 0.7));
        assert!(approx(model.cursor().z, 0.3));

        for view in ViewId::ALL {
            model.set_in_plane(view, 0.15, 0.85);
            let (u, v) = model.in_plane_position(view);
            assert!(approx(u, 0.15) && approx(v, 0.85), "{view}: ({u}, {v})");
        }
    }

    #[test]
    fn in_plane_values_are_clamped() {
        let mut model = CrosshairModel::default();
        model.set_in_plane(ViewId::Axial, 1.4, -0.2);
        assert!(approx(model.cursor().x, 1.0));
        assert!(approx(model.cursor().y, 1.0));
    }

    #[test]
    fn equal_writes_do_not_notify() {
        let mut model = CrosshairModel::default();
        assert!(model.set_in_plane(ViewId::Axial, 0.3, 0.3));
        assert_eq!(model.take_change().map(|c| c.x), Some(0.3));

        assert!(!model.set_in_plane(ViewId::Axial, 0.3, 0.3));
        assert!(!model.set_cursor(model.cursor()));
        assert!(model.take_change().is_none());
    }

    #[test]
    fn set_cursor_clamps_and_recentres() {
        let mut model = CrosshairModel::default();
        assert!(model.set_cursor(cursor(1.5, -0.5, 0.25)));
        assert_eq!(model.cursor(), cursor(1.0, 0.0, 0.25));
        assert!(model.set_cursor(NormalizedCursor::default()));
        assert_eq!(model.take_change(), Some(NormalizedCursor::default()));
    }

    #[test]
    fn step_slice_clamps_to_stack() {
        let mut model = CrosshairModel::default();
        model.set_slice_index(ViewId::Sagittal, 1, 10);
        assert!(model.step_slice(ViewId::Sagittal, -5, 10));
        assert_eq!(model.slice_index(ViewId::Sagittal, 10), 0);
        assert!(!model.step_slice(ViewId::Sagittal, -1, 10));
        model.step_slice(ViewId::Sagittal, 50, 10);
        assert_eq!(model.slice_index(ViewId::Sagittal, 10), 9);
    }
}
