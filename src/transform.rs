use eframe::egui::{PointerButton, Pos2, Rect, Vec2};

pub const MIN_ZOOM: f32 = 0.1;
pub const MAX_ZOOM: f32 = 5.0;
const ZOOM_STEP: f32 = 1.2;
pub const CROSSHAIR_GRAB_RADIUS: f32 = 12.0;
const SCRUB_PIXELS_PER_SLICE: f32 = 20.0;
pub const MIN_BRIGHTNESS: f32 = 0.1;
pub const MAX_BRIGHTNESS: f32 = 3.0;
const BRIGHTNESS_PIXELS_PER_UNIT: f32 = 200.0;

/// Per-view zoom and pan. Lives only as long as the viewer window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewState {
    pub zoom: f32,
    pub pan: Vec2,
    /// Display gain applied to the shown slice; 1 leaves pixels untouched.
    pub brightness: f32,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            zoom: 1.0,
            pan: Vec2::ZERO,
            brightness: 1.0,
        }
    }
}

impl ViewState {
    pub fn zoom_in(&mut self) {
        self.zoom = (self.zoom * ZOOM_STEP).clamp(MIN_ZOOM, MAX_ZOOM);
    }

    pub fn zoom_out(&mut self) {
        self.zoom = (self.zoom / ZOOM_STEP).clamp(MIN_ZOOM, MAX_ZOOM);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn set_brightness(&mut self, brightness: f32) {
        self.brightness = brightness.clamp(MIN_BRIGHTNESS, MAX_BRIGHTNESS);
    }

    pub fn reset_brightness(&mut self) {
        self.brightness = 1.0;
    }

    pub fn pan_by(&mut self, delta: Vec2) {
        self.pan += delta;
    }

    /// Screen rectangle covered by the image inside `canvas`.
    pub fn image_rect(&self, canvas: Rect) -> Rect {
        let size = canvas.size() * self.zoom;
        let origin = canvas.min + (canvas.size() - size) * 0.5 + self.pan;
        Rect::from_min_size(origin, size)
    }

    /// Image-relative `(u, v)` to a canvas position.
    pub fn to_canvas(&self, canvas: Rect, u: f32, v: f32) -> Pos2 {
        let image = self.image_rect(canvas);
        image.min + Vec2::new(u * image.width(), v * image.height())
    }

    /// Canvas position to image-relative coordinates, not clamped.
    pub fn to_relative(&self, canvas: Rect, pos: Pos2) -> Vec2 {
        let image = self.image_rect(canvas);
        if image.width() <= 0.0 || image.height() <= 0.0 {
            return Vec2::splat(f32::NAN);
        }
        let offset = pos - image.min;
        Vec2::new(offset.x / image.width(), offset.y / image.height())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerMode {
    Idle,
    DraggingCrosshair,
    Panning { last: Pos2 },
    Scrubbing { start_y: f32, start_index: usize },
    AdjustingBrightness { start_x: f32, start_brightness: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerAction {
    None,
    /// Plain click outside the image.
    Ignored,
    Seek { u: f32, v: f32 },
    DragTo { u: f32, v: f32 },
    Pan(Vec2),
    StepTo(usize),
    Brightness(f32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerPress {
    pub button: PointerButton,
    pub ctrl: bool,
    pub shift: bool,
}

/// Pointer state machine for one viewport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewInteraction {
    pub state: ViewState,
    mode: PointerMode,
    scroll_accum: f32,
}

impl Default for ViewInteraction {
    fn default() -> Self {
        Self {
            state: ViewState::default(),
            mode: PointerMode::Idle,
            scroll_accum: 0.0,
        }
    }
}

impl ViewInteraction {
    pub fn mode(&self) -> PointerMode {
        self.mode
    }

    /// `crosshair` is the current image-relative crosshair position in this view.
    pub fn pointer_down(
        &mut self,
        canvas: Rect,
        pos: Pos2,
        press: PointerPress,
        crosshair: (f32, f32),
        slice_index: usize,
    ) -> PointerAction {
        if press.button == PointerButton::Secondary
            || (press.button == PointerButton::Primary && press.ctrl)
        {
            self.mode = PointerMode::Panning { last: pos };
            return PointerAction::None;
        }
        if press.button == PointerButton::Primary && press.shift {
            self.mode = PointerMode::AdjustingBrightness {
                start_x: pos.x,
                start_brightness: self.state.brightness,
            };
            return PointerAction::None;
        }
        if press.button == PointerButton::Middle {
            self.mode = PointerMode::Scrubbing {
                start_y: pos.y,
                start_index: slice_index,
            };
            return PointerAction::None;
        }
        if press.button != PointerButton::Primary {
            return PointerAction::None;
        }

        let marker = self.state.to_canvas(canvas, crosshair.0, crosshair.1);
        if marker.distance(pos) < CROSSHAIR_GRAB_RADIUS {
            self.mode = PointerMode::DraggingCrosshair;
            return PointerAction::None;
        }

        let relative = self.state.to_relative(canvas, pos);
        if !(0.0..=1.0).contains(&relative.x) || !(0.0..=1.0).contains(&relative.y) {
            return PointerAction::Ignored;
        }
        PointerAction::Seek {
            u: relative.x,
            v: relative.y,
        }
    }

    pub fn pointer_move(&mut self, canvas: Rect, pos: Pos2, count: usize) -> PointerAction {
        match self.mode {
            PointerMode::Idle => PointerAction::None,
            PointerMode::DraggingCrosshair => {
                let relative = self.state.to_relative(canvas, pos);
                if relative.x.is_nan() || relative.y.is_nan() {
                    return PointerAction::None;
                }
                PointerAction::DragTo {
                    u: relative.x.clamp(0.0, 1.0),
                    v: relative.y.clamp(0.0, 1.0),
                }
            }
            PointerMode::Panning { last } => {
                let delta = pos - last;
                self.mode = PointerMode::Panning { last: pos };
                if delta == Vec2::ZERO {
                    return PointerAction::None;
                }
                self.state.pan_by(delta);
                PointerAction::Pan(delta)
            }
            PointerMode::Scrubbing {
                start_y,
                start_index,
            } => {
                if count == 0 {
                    return PointerAction::None;
                }
                let steps = ((pos.y - start_y) / SCRUB_PIXELS_PER_SLICE).trunc() as i64;
                let target = (start_index as i64 + steps).clamp(0, (count - 1) as i64);
                PointerAction::StepTo(target as usize)
            }
            PointerMode::AdjustingBrightness {
                start_x,
                start_brightness,
            } => {
                let previous = self.state.brightness;
                self.state.set_brightness(
                    start_brightness + (pos.x - start_x) / BRIGHTNESS_PIXELS_PER_UNIT,
                );
                if self.state.brightness == previous {
                    return PointerAction::None;
                }
                PointerAction::Brightness(self.state.brightness)
            }
        }
    }

    pub fn pointer_up(&mut self) {
        self.mode = PointerMode::Idle;
    }

    /// Turns wheel movement into whole slice steps, carrying the remainder.
    pub fn slice_steps_from_scroll(&mut self, scroll: f32) -> i32 {
        slice_steps_from_scroll(&mut self.scroll_accum, scroll)
    }
}

fn slice_steps_from_scroll(scroll_accum: &mut f32, scroll: f32) -> i32 {
    const DEAD_ZONE: f32 = 0.5;
    const PIXELS_PER_SLICE_STEP: f32 = 30.0;

    if scroll.abs() <= DEAD_ZONE {
        return 0;
    }

    // Drop the residual when the wheel reverses.
    if *scroll_accum != 0.0 && scroll.signum() != scroll_accum.signum() {
        *scroll_accum = 0.0;
    }
    *scroll_accum += scroll;

    let raw_steps = (*scroll_accum / PIXELS_PER_SLICE_STEP).trunc() as i32;
    if raw_steps == 0 {
        return 0;
    }

    *scroll_accum -= raw_steps as f32 * PIXELS_PER_SLICE_STEP;
    -raw_steps
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canvas() -> Rect {
        Rect::from_min_size(Pos2::new(10.0, 20.0), Vec2::new(400.0, 300.0))
    }

    fn primary() -> PointerPress {
        PointerPress {
            button: PointerButton::Primary,
            ctrl: false,
            shift: false,
        }
    }

    #[test]
    fn forward_and_inverse_mapping_round_trip() {
        let state = ViewState {
            zoom: 2.5,
            pan: Vec2::new(13.0, -7.0),
            ..ViewState::default()
        };
        for (u, v) in [(0.0, 0.0), (0.25, 0.8), (1.0, 1.0), (0.5, 0.125)] {
            let pos = state.to_canvas(canvas(), u, v);
            let back = state.to_relative(canvas(), pos);
            assert!((back.x - u).abs() < 1e-5);
            assert!((back.y - v).abs() < 1e-5);
        }
    }

    #[test]
    fn image_rect_is_centred_then_panned() {
        let state = ViewState {
            zoom: 0.5,
            pan: Vec2::new(5.0, 0.0),
            ..ViewState::default()
        };
        let rect = state.image_rect(canvas());
        assert_eq!(rect.min, Pos2::new(115.0, 95.0));
        assert_eq!(rect.size(), Vec2::new(200.0, 150.0));
    }

    #[test]
    fn plain_click_outside_image_is_ignored() {
        let mut view = ViewInteraction::default();
        let outside = view.state.to_canvas(canvas(), 1.05, 0.3);
        let action = view.pointer_down(canvas(), outside, primary(), (0.5, 0.5), 0);
        assert_eq!(action, PointerAction::Ignored);
        assert_eq!(view.mode(), PointerMode::Idle);
    }

    #[test]
    fn plain_click_inside_image_seeks() {
        let mut view = ViewInteraction::default();
        let pos = view.state.to_canvas(canvas(), 0.25, 0.75);
        match view.pointer_down(canvas(), pos, primary(), (0.5, 0.5), 0) {
            PointerAction::Seek { u, v } => {
                assert!((u - 0.25).abs() < 1e-5);
                assert!((v - 0.75).abs() < 1e-5);
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn crosshair_drag_clamps_instead_of_ignoring() {
        let mut view = ViewInteraction::default();
        let marker = view.state.to_canvas(canvas(), 0.5, 0.5);
        let action = view.pointer_down(
            canvas(),
            marker + Vec2::new(5.0, 5.0),
            primary(),
            (0.5, 0.5),
            0,
        );
        assert_eq!(action, PointerAction::None);
        assert_eq!(view.mode(), PointerMode::DraggingCrosshair);

        let far = view.state.to_canvas(canvas(), 1.4, -0.2);
        assert_eq!(
            view.pointer_move(canvas(), far, 10),
            PointerAction::DragTo { u: 1.0, v: 0.0 }
        );
        view.pointer_up();
        assert_eq!(view.mode(), PointerMode::Idle);
        assert_eq!(view.pointer_move(canvas(), far, 10), PointerAction::None);
    }

    #[test]
    fn secondary_or_ctrl_drag_pans() {
        for press in [
            PointerPress {
                button: PointerButton::Secondary,
                ..primary()
            },
            PointerPress {
                ctrl: true,
                ..primary()
            },
        ] {
            let mut view = ViewInteraction::default();
            let start = Pos2::new(100.0, 100.0);
            view.pointer_down(canvas(), start, press, (0.5, 0.5), 0);
            let action = view.pointer_move(canvas(), Pos2::new(110.0, 95.0), 10);
            assert_eq!(action, PointerAction::Pan(Vec2::new(10.0, -5.0)));
            assert_eq!(view.state.pan, Vec2::new(10.0, -5.0));
        }
    }

    #[test]
    fn middle_drag_scrubs_slices() {
        let mut view = ViewInteraction::default();
        let press = PointerPress {
            button: PointerButton::Middle,
            ..primary()
        };
        view.pointer_down(canvas(), Pos2::new(50.0, 100.0), press, (0.5, 0.5), 4);
        assert_eq!(
            view.pointer_move(canvas(), Pos2::new(50.0, 145.0), 10),
            PointerAction::StepTo(6)
        );
        assert_eq!(
            view.pointer_move(canvas(), Pos2::new(50.0, -500.0), 10),
            PointerAction::StepTo(0)
        );
        assert_eq!(
            view.pointer_move(canvas(), Pos2::new(50.0, 900.0), 10),
            PointerAction::StepTo(9)
        );
    }

    #[test]
    fn zoom_is_multiplicative_and_clamped() {
        let mut state = ViewState::default();
        state.zoom_in();
        assert!((state.zoom - 1.2).abs() < 1e-6);
        for _ in 0..30 {
            state.zoom_in();
        }
        assert_eq!(state.zoom, MAX_ZOOM);
        for _ in 0..60 {
            state.zoom_out();
        }
        assert_eq!(state.zoom, MIN_ZOOM);
    }

    #[test]
    fn shift_drag_adjusts_brightness_within_bounds() {
        let mut view = ViewInteraction::default();
        let press = PointerPress {
            shift: true,
            ..primary()
        };
        let start = Pos2::new(100.0, 100.0);
        assert_eq!(
            view.pointer_down(canvas(), start, press, (0.5, 0.5), 0),
            PointerAction::None
        );
        assert_eq!(
            view.pointer_move(canvas(), Pos2::new(200.0, 140.0), 10),
            PointerAction::Brightness(1.5)
        );
        view.pointer_move(canvas(), Pos2::new(2000.0, 100.0), 10);
        assert_eq!(view.state.brightness, MAX_BRIGHTNESS);
        view.pointer_move(canvas(), Pos2::new(-2000.0, 100.0), 10);
        assert_eq!(view.state.brightness, MIN_BRIGHTNESS);
        assert_eq!(
            view.pointer_move(canvas(), Pos2::new(-2100.0, 100.0), 10),
            PointerAction::None
        );

        view.pointer_up();
        view.state.reset_brightness();
        assert_eq!(view.state.brightness, 1.0);
        assert_eq!(view.state.zoom, 1.0);
    }

    #[test]
    fn reset_affects_only_one_view() {
        let mut first = ViewInteraction::default();
        let mut second = ViewInteraction::default();
        first.state.zoom_in();
        first.state.pan_by(Vec2::new(3.0, 4.0));
        second.state.zoom_out();
        first.state.reset();
        assert_eq!(first.state, ViewState::default());
        assert!((second.state.zoom - 1.0 / 1.2).abs() < 1e-6);
    }

    #[test]
    fn scroll_accumulates_into_steps() {
        let mut view = ViewInteraction::default();
        assert_eq!(view.slice_steps_from_scroll(0.2), 0);
        assert_eq!(view.slice_steps_from_scroll(20.0), 0);
        assert_eq!(view.slice_steps_from_scroll(20.0), -1);
        assert_eq!(view.slice_steps_from_scroll(-65.0), 2);
    }
}
