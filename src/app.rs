use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use eframe::egui::{self, PointerButton, Sense, TextureHandle, TextureOptions};

use crate::backend::{
    fetch_slice_counts_with_fallback, normalize_base_url, CountFetch, HttpSliceSource,
};
use crate::crosshair::{CrosshairModel, NormalizedCursor};
use crate::grid::{
    cell_label, CellState, GridDialog, GridWindow, SeriesFilter, ITEM_GAP, ITEM_HEIGHT, ITEM_WIDTH,
};
use crate::launch::LaunchConfig;
use crate::loader::ProgressiveLoader;
use crate::region::{CropCache, CropOutcome, RegionCache, DEFAULT_MAX_REGION, DEFAULT_MIN_REGION};
use crate::renderer::{fit_rect, paint_crosshair, paint_placeholder, render_rgba, view_color};
use crate::selection::{EventBus, LoggingSink, SliceSelectionStore, ViewerEvent};
use crate::signing::{SigningSecret, UrlSigner};
use crate::slices::{SliceCounts, SliceImage, SliceStore, ViewId};
use crate::transform::{PointerAction, PointerMode, PointerPress, ViewInteraction};

const APP_TITLE: &str = "OrthoView";
const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
const VIEW_GAP: f32 = 4.0;
const THUMB_LABEL_HEIGHT: f32 = 18.0;
const FULL_UV: egui::Rect = egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0));

#[derive(Default)]
struct ViewportPanel {
    interaction: ViewInteraction,
    texture: Option<TextureHandle>,
    shown: Option<Arc<SliceImage>>,
    shown_brightness: f32,
}

struct PreviewTexture {
    view: ViewId,
    index: usize,
    texture: TextureHandle,
}

enum GridCommand {
    Preview(usize),
    Navigate(i64),
    Back,
    Select(usize),
    ToggleSelection(ViewId, usize),
    CopyCrop(ViewId, usize),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct NavigationKeys {
    escape: bool,
    previous: bool,
    next: bool,
    up: bool,
    down: bool,
}

/// Reads this frame's navigation keys. The open grid takes left/right for itself.
fn read_navigation_keys(input: &mut egui::InputState, grid_open: bool) -> NavigationKeys {
    let mut horizontal = |key: egui::Key| {
        if grid_open {
            input.consume_key(egui::Modifiers::NONE, key)
        } else {
            input.key_pressed(key)
        }
    };
    let previous = horizontal(egui::Key::ArrowLeft);
    let next = horizontal(egui::Key::ArrowRight);
    NavigationKeys {
        escape: input.consume_key(egui::Modifiers::NONE, egui::Key::Escape),
        previous,
        next,
        up: input.key_pressed(egui::Key::ArrowUp),
        down: input.key_pressed(egui::Key::ArrowDown),
    }
}

pub struct OrthoViewerApp {
    config: LaunchConfig,
    store: SliceStore,
    loader: Option<ProgressiveLoader>,
    counts_receiver: Option<Receiver<CountFetch>>,
    counts: Option<SliceCounts>,
    counts_failed: bool,
    crosshair: CrosshairModel,
    panels: [ViewportPanel; 3],
    hovered_view: Option<ViewId>,
    regions: RegionCache,
    crops: CropCache,
    thumb_textures: HashMap<(ViewId, usize), TextureHandle>,
    preview_texture: Option<PreviewTexture>,
    grid: GridDialog,
    grid_series: SeriesFilter,
    selections: SliceSelectionStore,
    events: EventBus,
    status_line: String,
}

impl OrthoViewerApp {
    pub fn new(config: LaunchConfig, initial_status: Option<String>) -> Self {
        let mut status_line = initial_status.unwrap_or_default();
        let base_url = normalize_base_url(&config.backend_url);
        let loader = match Self::build_loader(&config, &base_url) {
            Ok(loader) => loader,
            Err(err) => {
                log::error!("could not set up slice source: {err:#}");
                status_line = format!("Slice source error: {err:#}");
                None
            }
        };
        if loader.is_none() && status_line.is_empty() {
            status_line =
                "No signing secret configured; slice images will not be requested.".to_string();
        }

        let mut events = EventBus::default();
        events.subscribe(Box::new(LoggingSink));

        let mut grid = GridDialog::default();
        if let Some(series) = config.series {
            grid.open(series);
        }

        log::info!("fetching slice counts from {base_url}");
        Self {
            store: SliceStore::new(config.voxel_spacing),
            loader,
            counts_receiver: Some(Self::spawn_count_fetch(base_url)),
            counts: None,
            counts_failed: false,
            crosshair: CrosshairModel::default(),
            panels: Default::default(),
            hovered_view: None,
            regions: RegionCache::default(),
            crops: CropCache::default(),
            thumb_textures: HashMap::new(),
            preview_texture: None,
            grid,
            grid_series: config.series.unwrap_or(SeriesFilter::All),
            selections: SliceSelectionStore::default(),
            events,
            status_line,
            config,
        }
    }

    fn build_loader(
        config: &LaunchConfig,
        base_url: &str,
    ) -> anyhow::Result<Option<ProgressiveLoader>> {
        let Some(secret) = config.signing_secret.as_deref() else {
            log::warn!("no signing secret supplied; slice images will not be requested");
            return Ok(None);
        };
        let signer = UrlSigner::new(base_url, SigningSecret::new(secret));
        let source = HttpSliceSource::new(signer, config.width, config.quality)?;
        Ok(Some(
            ProgressiveLoader::new(Arc::new(source)).with_prefetch(config.prefetch),
        ))
    }

    fn spawn_count_fetch(base_url: String) -> Receiver<CountFetch> {
        let (sender, receiver) = mpsc::channel();
        thread::spawn(move || {
            let _ = sender.send(fetch_slice_counts_with_fallback(&base_url));
        });
        receiver
    }

    fn retry_slice_counts(&mut self) {
        if self.counts_receiver.is_some() {
            return;
        }
        let base_url = normalize_base_url(&self.config.backend_url);
        log::info!("retrying slice counts from {base_url}");
        self.status_line = "Retrying slice counts...".to_string();
        self.counts_receiver = Some(Self::spawn_count_fetch(base_url));
    }

    fn poll_slice_counts(&mut self, ctx: &egui::Context) {
        let Some(receiver) = self.counts_receiver.take() else {
            return;
        };

        match receiver.try_recv() {
            Ok(fetch) => self.apply_count_fetch(fetch),
            Err(TryRecvError::Empty) => {
                self.counts_receiver = Some(receiver);
                ctx.request_repaint_after(Duration::from_millis(16));
            }
            Err(TryRecvError::Disconnected) => {
                log::warn!("slice count worker disconnected; using single-slice stacks");
                self.apply_count_fetch(CountFetch {
                    counts: SliceCounts::fallback(),
                    error: Some("count worker stopped".to_string()),
                });
            }
        }
    }

    /// A failed fetch still applies its fallback counts; the error stays on the status line.
    fn apply_count_fetch(&mut self, fetch: CountFetch) {
        let recovered = self.counts_failed && !fetch.is_fallback();
        self.counts_failed = fetch.is_fallback();
        if let Some(error) = fetch.error.as_deref() {
            self.status_line =
                format!("Slice counts unavailable ({error}); showing single-slice stacks.");
        } else if recovered {
            self.status_line = "Slice counts loaded.".to_string();
        }
        self.apply_slice_counts(fetch.counts);
    }

    fn apply_slice_counts(&mut self, counts: SliceCounts) {
        self.counts = Some(counts);
        self.thumb_textures.clear();
        self.preview_texture = None;
        for panel in &mut self.panels {
            panel.shown = None;
        }

        match self.loader.as_mut() {
            Some(loader) => {
                for view in ViewId::ALL {
                    loader.restart(&mut self.store, view, counts.get(view));
                }
            }
            None => {
                self.store.load_all_views(counts);
            }
        }
    }

    fn poll_slice_loads(&mut self, ctx: &egui::Context) {
        let Some(loader) = self.loader.as_mut() else {
            return;
        };
        loader.poll(&mut self.store);
        if loader.any_loading() {
            ctx.request_repaint_after(Duration::from_millis(16));
        }
    }

    fn is_loading(&self) -> bool {
        self.counts_receiver.is_some()
            || self.loader.as_ref().is_some_and(ProgressiveLoader::any_loading)
    }

    fn cell_state(&self, view: ViewId, index: usize) -> CellState {
        match self.loader.as_ref() {
            Some(loader) => loader.cell_state(&self.store, view, index),
            None => CellState::of(self.store.get(view, index).is_some(), true),
        }
    }

    fn request_cell(&mut self, view: ViewId, index: usize) {
        if let Some(loader) = self.loader.as_mut() {
            loader.request_cell(&self.store, view, index);
        }
    }

    fn publish_cursor_change(&mut self) {
        if let Some(cursor) = self.crosshair.take_change() {
            self.events.publish(ViewerEvent::CursorMoved(cursor));
        }
    }

    fn open_grid(&mut self, series: SeriesFilter) {
        self.grid.open(series);
        self.preview_texture = None;
        let (Some(loader), Some(counts)) = (self.loader.as_mut(), self.counts) else {
            return;
        };
        for view in series.views() {
            loader.ensure(&mut self.store, *view, counts.get(*view));
        }
    }

    fn handle_keyboard(&mut self, ctx: &egui::Context) {
        let grid_open = self.grid.is_open();
        let NavigationKeys {
            escape,
            previous,
            next,
            up,
            down,
        } = ctx.input_mut(|input| read_navigation_keys(input, grid_open));

        if grid_open {
            if escape {
                self.grid.escape();
            }
            let total = match (self.grid.series(), self.counts) {
                (Some(series), Some(counts)) => series.len(&counts),
                _ => 0,
            };
            if previous {
                self.grid.navigate(-1, total);
            }
            if next {
                self.grid.navigate(1, total);
            }
            return;
        }

        let Some(view) = self.hovered_view else {
            return;
        };
        let count = self.store.count(view);
        if up {
            self.crosshair.step_slice(view, 1, count);
        }
        if down {
            self.crosshair.step_slice(view, -1, count);
        }
    }

    fn dominant_scroll_axis(raw_scroll: egui::Vec2, smooth_scroll: egui::Vec2) -> f32 {
        let pick = |delta: egui::Vec2| {
            if delta.y.abs() >= delta.x.abs() {
                delta.y
            } else {
                delta.x
            }
        };

        if smooth_scroll != egui::Vec2::ZERO {
            pick(smooth_scroll)
        } else {
            pick(raw_scroll)
        }
    }

    fn sync_panel_texture(
        ctx: &egui::Context,
        view: ViewId,
        panel: &mut ViewportPanel,
        image: Option<&Arc<SliceImage>>,
    ) {
        let Some(image) = image else {
            panel.shown = None;
            return;
        };
        let brightness = panel.interaction.state.brightness;
        if panel.shown_brightness == brightness
            && panel
                .shown
                .as_ref()
                .is_some_and(|shown| Arc::ptr_eq(shown, image))
        {
            return;
        }

        let color_image = render_rgba(image.pixels(), brightness);
        match panel.texture.as_mut() {
            Some(texture) => texture.set(color_image, TextureOptions::LINEAR),
            None => {
                panel.texture = Some(ctx.load_texture(
                    format!("{view}-slice"),
                    color_image,
                    TextureOptions::LINEAR,
                ));
            }
        }
        panel.shown = Some(Arc::clone(image));
        panel.shown_brightness = brightness;
    }

    fn placeholder_text(&self, view: ViewId, index: usize, count: usize) -> &'static str {
        if self.counts.is_none() {
            return "Waiting for slice counts...";
        }
        if self.loader.is_none() {
            return "No signing secret";
        }
        if count == 0 {
            return "Empty stack";
        }
        match self.cell_state(view, index) {
            CellState::Pending | CellState::Loaded => "Loading...",
            CellState::Failed => "Slice unavailable",
        }
    }

    /// Draws one orthogonal view; returns whether the pointer is over its canvas.
    fn show_view(&mut self, ui: &mut egui::Ui, view: ViewId) -> bool {
        let count = self.store.count(view);
        let index = self.crosshair.slice_index(view, count);
        self.request_cell(view, index);
        let image = self.store.get(view, index).cloned();
        let spacing = self.store.spacing();
        let collection = self.store.collection(view);
        let (loaded, percent) = (collection.loaded_count(), collection.percent_loaded());
        let placeholder = self.placeholder_text(view, index, count);
        let panel = &mut self.panels[view.index()];

        ui.horizontal(|ui| {
            ui.label(
                egui::RichText::new(view.title())
                    .strong()
                    .color(view_color(view)),
            );
            if count > 0 {
                ui.label(format!("{}/{}", index + 1, count));
            }
            if let Some(spacing) = spacing {
                ui.label(format!("{:.1} mm", spacing.depth_mm(view, index)));
                if let Some(image) = image.as_ref() {
                    ui.label(format!(
                        "FOV {:.0} mm",
                        spacing.in_plane_mm(view, image.width as f32)
                    ));
                }
            }
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                if ui.small_button("Reset").clicked() {
                    panel.interaction.state.reset();
                }
                if ui.small_button("-").clicked() {
                    panel.interaction.state.zoom_out();
                }
                if ui.small_button("+").clicked() {
                    panel.interaction.state.zoom_in();
                }
                ui.label(format!("{:.0}%", panel.interaction.state.zoom * 100.0));
                let brightness = panel.interaction.state.brightness;
                if brightness != 1.0 {
                    ui.label(
                        egui::RichText::new(format!("Brightness {:.0}%", brightness * 100.0))
                            .weak(),
                    );
                }
            });
        });
        ui.label(
            egui::RichText::new(format!("Loaded {loaded}/{count} ({percent}%)"))
                .small()
                .weak(),
        );

        let slider_height = ui.spacing().interact_size.y + 6.0;
        let canvas_size = egui::vec2(
            ui.available_width(),
            (ui.available_height() - slider_height).max(32.0),
        );
        let (area, response) = ui.allocate_exact_size(canvas_size, Sense::click_and_drag());

        Self::sync_panel_texture(ui.ctx(), view, panel, image.as_ref());
        let image_size = image
            .as_ref()
            .map(|image| egui::vec2(image.width as f32, image.height as f32))
            .unwrap_or(area.size());
        let canvas = fit_rect(area, image_size);

        let (pointer_pos, pressed, released, modifiers, scroll) = ui.input(|input| {
            let pressed = [
                PointerButton::Primary,
                PointerButton::Secondary,
                PointerButton::Middle,
            ]
            .into_iter()
            .find(|button| input.pointer.button_pressed(*button));
            (
                input.pointer.interact_pos(),
                pressed,
                input.pointer.any_released(),
                input.modifiers,
                Self::dominant_scroll_axis(input.raw_scroll_delta, input.smooth_scroll_delta),
            )
        });

        let mut action = PointerAction::None;
        match (pointer_pos, pressed) {
            (Some(pos), Some(button)) if response.hovered() => {
                action = panel.interaction.pointer_down(
                    canvas,
                    pos,
                    PointerPress {
                        button,
                        ctrl: modifiers.ctrl,
                        shift: modifiers.shift,
                    },
                    self.crosshair.in_plane_position(view),
                    index,
                );
            }
            (Some(pos), _) if panel.interaction.mode() != PointerMode::Idle => {
                action = panel.interaction.pointer_move(canvas, pos, count);
            }
            _ => {}
        }
        if released {
            panel.interaction.pointer_up();
        }

        match action {
            PointerAction::Seek { u, v } | PointerAction::DragTo { u, v } => {
                self.crosshair.set_in_plane(view, u, v);
            }
            PointerAction::StepTo(target) => {
                self.crosshair.set_slice_index(view, target, count);
            }
            PointerAction::Brightness(_)
            | PointerAction::None
            | PointerAction::Ignored
            | PointerAction::Pan(_) => {}
        }
        if response.double_clicked() {
            panel.interaction.state.reset_brightness();
        }

        if response.hovered() && scroll != 0.0 {
            let steps = panel.interaction.slice_steps_from_scroll(scroll);
            if steps != 0 {
                self.crosshair.step_slice(view, steps, count);
            }
        }

        match panel.interaction.mode() {
            PointerMode::Panning { .. } => ui.ctx().set_cursor_icon(egui::CursorIcon::Grabbing),
            PointerMode::DraggingCrosshair => ui.ctx().set_cursor_icon(egui::CursorIcon::Crosshair),
            PointerMode::Scrubbing { .. } => {
                ui.ctx().set_cursor_icon(egui::CursorIcon::ResizeVertical)
            }
            PointerMode::AdjustingBrightness { .. } => {
                ui.ctx().set_cursor_icon(egui::CursorIcon::ResizeHorizontal)
            }
            PointerMode::Idle => {}
        }

        let painter = ui.painter_at(area);
        painter.rect_filled(area, 0.0, egui::Color32::BLACK);
        let image_rect = panel.interaction.state.image_rect(canvas);
        match (panel.texture.as_ref(), image.as_ref()) {
            (Some(texture), Some(_)) => {
                painter.image(texture.id(), image_rect, FULL_UV, egui::Color32::WHITE);
            }
            _ => paint_placeholder(&painter, image_rect, placeholder),
        }
        let (u, v) = self.crosshair.in_plane_position(view);
        let marker = panel.interaction.state.to_canvas(canvas, u, v);
        paint_crosshair(&painter, view, image_rect, marker);

        let index = self.crosshair.slice_index(view, count);
        ui.add_enabled_ui(count > 1, |ui| {
            let mut value = index;
            ui.spacing_mut().slider_width = (ui.available_width() - 60.0).max(40.0);
            let slider = egui::Slider::new(&mut value, 0..=count.saturating_sub(1));
            if ui.add(slider).changed() {
                self.crosshair.set_slice_index(view, value, count);
            }
        });

        response.hovered()
    }

    fn show_viewports(&mut self, ui: &mut egui::Ui) {
        let available = ui.available_size();
        let column_width = ((available.x - VIEW_GAP * 2.0) / 3.0).max(1.0);
        let mut hovered = None;

        ui.horizontal_top(|ui| {
            ui.spacing_mut().item_spacing.x = VIEW_GAP;
            for view in ViewId::ALL {
                ui.allocate_ui_with_layout(
                    egui::vec2(column_width, available.y),
                    egui::Layout::top_down(egui::Align::Min),
                    |ui| {
                        ui.set_min_size(egui::vec2(column_width, available.y));
                        if self.show_view(ui, view) {
                            hovered = Some(view);
                        }
                    },
                );
            }
        });
        self.hovered_view = hovered;
    }

    fn thumbnail_texture(
        &mut self,
        ctx: &egui::Context,
        view: ViewId,
        index: usize,
        image: &SliceImage,
    ) -> Option<TextureHandle> {
        if let Some(texture) = self.thumb_textures.get(&(view, index)) {
            return Some(texture.clone());
        }
        let region = self.regions.region(
            image.width,
            image.height,
            DEFAULT_MIN_REGION,
            DEFAULT_MAX_REGION,
        );
        match self.crops.crop(view, index, region, Some(image)) {
            CropOutcome::Ready(crop) => {
                let texture = ctx.load_texture(
                    format!("thumb-{view}-{index}"),
                    render_rgba(crop.pixels(), 1.0),
                    TextureOptions::LINEAR,
                );
                self.thumb_textures.insert((view, index), texture.clone());
                Some(texture)
            }
            CropOutcome::Pending | CropOutcome::Empty => None,
        }
    }

    fn paint_grid_cell(
        &mut self,
        ui: &egui::Ui,
        rect: egui::Rect,
        view: ViewId,
        index: usize,
        hovered: bool,
    ) {
        let painter = ui.painter_at(rect);
        let image_rect = egui::Rect::from_min_max(
            rect.min,
            egui::pos2(rect.max.x, rect.max.y - THUMB_LABEL_HEIGHT),
        );
        let image = self.store.get(view, index).cloned();
        let state = self.cell_state(view, index);
        if state == CellState::Pending {
            self.request_cell(view, index);
        }

        match state {
            CellState::Loaded => {
                let texture = image
                    .as_ref()
                    .and_then(|image| self.thumbnail_texture(ui.ctx(), view, index, image));
                match texture {
                    Some(texture) => {
                        painter.rect_filled(image_rect, 4.0, egui::Color32::BLACK);
                        painter.image(
                            texture.id(),
                            fit_rect(image_rect, texture.size_vec2()),
                            FULL_UV,
                            egui::Color32::WHITE,
                        );
                    }
                    // A degenerate crop keeps its placeholder.
                    None => paint_placeholder(&painter, image_rect, "..."),
                }
            }
            CellState::Pending => paint_placeholder(&painter, image_rect, "Loading..."),
            CellState::Failed => paint_placeholder(&painter, image_rect, "Unavailable"),
        }

        if hovered {
            painter.rect_stroke(
                image_rect,
                4.0,
                egui::Stroke::new(1.5, view_color(view)),
            );
        }

        let selected = self
            .config
            .entity
            .as_deref()
            .is_some_and(|entity| self.selections.contains(entity, view, index));
        let label = if selected {
            format!("{} *", cell_label(view, index))
        } else {
            cell_label(view, index)
        };
        painter.text(
            egui::pos2(rect.center().x, rect.max.y - THUMB_LABEL_HEIGHT * 0.5),
            egui::Align2::CENTER_CENTER,
            label,
            egui::FontId::proportional(12.0),
            ui.visuals().text_color(),
        );
    }

    fn show_grid_cells(
        &mut self,
        ui: &mut egui::Ui,
        series: SeriesFilter,
        counts: &SliceCounts,
        pending: &mut Option<GridCommand>,
    ) {
        let total = series.len(counts);
        ui.label(
            egui::RichText::new(format!(
                "{total} slices. Click to jump, right-click to preview. {} regions, {} crops cached.",
                self.regions.len(),
                self.crops.len()
            ))
            .weak(),
        );
        let container_width = ui.available_width();

        egui::ScrollArea::vertical()
            .auto_shrink([false, false])
            .show_viewport(ui, |ui, viewport| {
                let window =
                    GridWindow::compute(total, container_width, viewport.height(), viewport.min.y);
                ui.set_min_height(window.total_height());
                ui.set_min_width(window.content_width().min(container_width));
                let origin = ui.max_rect().min;

                for cell in window.cells() {
                    let Some((view, index)) = series.resolve(cell.index, counts) else {
                        continue;
                    };
                    let rect = egui::Rect::from_min_size(
                        origin + egui::vec2(cell.left, cell.top),
                        egui::vec2(ITEM_WIDTH, ITEM_HEIGHT - ITEM_GAP),
                    );
                    let response =
                        ui.interact(rect, ui.id().with(("grid-cell", cell.index)), Sense::click());
                    self.paint_grid_cell(ui, rect, view, index, response.hovered());
                    if response.secondary_clicked() {
                        *pending = Some(GridCommand::Preview(cell.index));
                    } else if response.clicked() {
                        *pending = Some(GridCommand::Select(cell.index));
                    }
                }
            });
    }

    fn show_grid_preview(
        &mut self,
        ui: &mut egui::Ui,
        series: SeriesFilter,
        position: usize,
        counts: &SliceCounts,
        pending: &mut Option<GridCommand>,
    ) {
        let total = series.len(counts);
        let Some((view, index)) = series.resolve(position, counts) else {
            *pending = Some(GridCommand::Back);
            return;
        };

        ui.horizontal(|ui| {
            if ui.button("Back to grid").clicked() {
                *pending = Some(GridCommand::Back);
            }
            ui.separator();
            if ui
                .add_enabled(position > 0, egui::Button::new("Previous"))
                .clicked()
            {
                *pending = Some(GridCommand::Navigate(-1));
            }
            ui.label(format!("{} ({}/{})", cell_label(view, index), position + 1, total));
            if ui
                .add_enabled(position + 1 < total, egui::Button::new("Next"))
                .clicked()
            {
                *pending = Some(GridCommand::Navigate(1));
            }
            ui.separator();
            if ui.button("Go to slice").clicked() {
                *pending = Some(GridCommand::Select(position));
            }
            if ui.button("Copy crop").clicked() {
                *pending = Some(GridCommand::CopyCrop(view, index));
            }
            if let Some(entity) = self.config.entity.as_deref() {
                let mut selected = self.selections.contains(entity, view, index);
                if ui
                    .checkbox(&mut selected, format!("Selected for {entity}"))
                    .changed()
                {
                    *pending = Some(GridCommand::ToggleSelection(view, index));
                }
            }
        });
        if let Some(spacing) = self.store.spacing() {
            ui.label(egui::RichText::new(format!("{:.1} mm", spacing.depth_mm(view, index))).weak());
        }

        let (area, _) = ui.allocate_exact_size(ui.available_size(), Sense::hover());
        let painter = ui.painter_at(area);
        painter.rect_filled(area, 0.0, egui::Color32::BLACK);

        let state = self.cell_state(view, index);
        if state == CellState::Pending {
            self.request_cell(view, index);
        }
        let Some(image) = self.store.get(view, index).cloned() else {
            let text = match state {
                CellState::Failed => "Unavailable",
                CellState::Pending | CellState::Loaded => "Loading...",
            };
            paint_placeholder(&painter, area, text);
            return;
        };

        let stale = self
            .preview_texture
            .as_ref()
            .map_or(true, |preview| preview.view != view || preview.index != index);
        if stale {
            self.preview_texture = Some(PreviewTexture {
                view,
                index,
                texture: ui.ctx().load_texture(
                    "grid-preview",
                    render_rgba(image.pixels(), 1.0),
                    TextureOptions::LINEAR,
                ),
            });
        }
        if let Some(preview) = self.preview_texture.as_ref() {
            painter.image(
                preview.texture.id(),
                fit_rect(area, preview.texture.size_vec2()),
                FULL_UV,
                egui::Color32::WHITE,
            );
        }
    }

    fn show_grid_window(&mut self, ctx: &egui::Context) {
        let (Some(series), Some(counts)) = (self.grid.series(), self.counts) else {
            return;
        };
        let mut window_open = true;
        let mut pending = None;

        egui::Window::new(format!("{} slices", series.label()))
            .id(egui::Id::new("slice-grid"))
            .open(&mut window_open)
            .default_size([780.0, 540.0])
            .resizable(true)
            .show(ctx, |ui| match self.grid.preview_index() {
                Some(position) => self.show_grid_preview(ui, series, position, &counts, &mut pending),
                None => self.show_grid_cells(ui, series, &counts, &mut pending),
            });

        if !window_open {
            self.grid.close();
            self.preview_texture = None;
            return;
        }
        if let Some(command) = pending {
            self.apply_grid_command(ctx, command, &counts);
        }
    }

    fn apply_grid_command(&mut self, ctx: &egui::Context, command: GridCommand, counts: &SliceCounts) {
        let total = self.grid.series().map_or(0, |series| series.len(counts));
        match command {
            GridCommand::Preview(position) => {
                self.grid.preview(position, total);
            }
            GridCommand::Navigate(delta) => {
                self.grid.navigate(delta, total);
            }
            GridCommand::Back => self.grid.escape(),
            GridCommand::Select(position) => {
                if let Some((view, index)) = self.grid.select(position, counts) {
                    self.preview_texture = None;
                    self.crosshair
                        .set_slice_index(view, index, self.store.count(view));
                    self.events
                        .publish(ViewerEvent::SliceSelected { view, index });
                }
            }
            GridCommand::ToggleSelection(view, index) => {
                if let Some(entity) = self.config.entity.as_deref() {
                    let selected = self.selections.toggle(entity, view, index);
                    log::info!(
                        "{} {view} slice {index} for {entity}",
                        if selected { "selected" } else { "deselected" }
                    );
                }
            }
            GridCommand::CopyCrop(view, index) => self.copy_crop(ctx, view, index),
        }
    }

    fn copy_crop(&mut self, ctx: &egui::Context, view: ViewId, index: usize) {
        let Some(image) = self.store.get(view, index).cloned() else {
            self.status_line = "Slice is not loaded yet.".to_string();
            return;
        };
        let region = self.regions.region(
            image.width,
            image.height,
            DEFAULT_MIN_REGION,
            DEFAULT_MAX_REGION,
        );
        match self.crops.crop(view, index, region, Some(image.as_ref())) {
            CropOutcome::Ready(crop) => match crop.png_data_url() {
                Ok(url) => {
                    ctx.copy_text(url);
                    self.status_line = format!(
                        "Copied {}x{} crop of {} to the clipboard.",
                        crop.width,
                        crop.height,
                        cell_label(view, index)
                    );
                }
                Err(err) => {
                    log::warn!("crop export failed: {err:#}");
                    self.status_line = format!("Crop export failed: {err:#}");
                }
            },
            CropOutcome::Pending => self.status_line = "Slice is not loaded yet.".to_string(),
            CropOutcome::Empty => {
                self.status_line = "Crop region lies outside this slice.".to_string();
            }
        }
    }

    fn copy_selections(&mut self, ctx: &egui::Context) {
        match self.selections.to_json() {
            Ok(json) => {
                ctx.copy_text(json);
                self.status_line = "Copied slice selections to the clipboard.".to_string();
            }
            Err(err) => self.status_line = format!("{err:#}"),
        }
    }

    fn show_toolbar(&mut self, ctx: &egui::Context) {
        let mut open_grid = false;
        let mut copy_selections = false;
        let mut retry_counts = false;

        egui::TopBottomPanel::top("toolbar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.strong(format!("{APP_TITLE} v{APP_VERSION}"));
                ui.separator();
                egui::ComboBox::from_id_salt("grid-series")
                    .selected_text(self.grid_series.label())
                    .show_ui(ui, |ui| {
                        for choice in SeriesFilter::CHOICES {
                            ui.selectable_value(&mut self.grid_series, choice, choice.label());
                        }
                    });
                if ui
                    .add_enabled(self.counts.is_some(), egui::Button::new("Slice grid"))
                    .clicked()
                {
                    open_grid = true;
                }
                if ui.button("Reset views").clicked() {
                    for panel in &mut self.panels {
                        panel.interaction.state.reset();
                    }
                    self.crosshair.set_cursor(NormalizedCursor::default());
                }
                if self.counts_failed
                    && ui
                        .add_enabled(self.counts_receiver.is_none(), egui::Button::new("Retry counts"))
                        .clicked()
                {
                    retry_counts = true;
                }
                if let Some(entity) = self.config.entity.as_deref() {
                    ui.separator();
                    let summary = ui.label(format!(
                        "{entity}: {} selected",
                        self.selections.total_for(entity)
                    ));
                    summary.on_hover_ui(|ui| {
                        for view in ViewId::ALL {
                            let slices = self.selections.slices(entity, view);
                            if !slices.is_empty() {
                                ui.label(format!("{}: {slices:?}", view.title()));
                            }
                        }
                    });
                    if ui.button("Copy selections").clicked() {
                        copy_selections = true;
                    }
                }
            });
        });

        if open_grid {
            self.open_grid(self.grid_series);
        }
        if copy_selections {
            self.copy_selections(ctx);
        }
        if retry_counts {
            self.retry_slice_counts();
        }
    }

    fn show_status_bar(&self, ctx: &egui::Context) {
        let cursor = self.crosshair.cursor();
        egui::TopBottomPanel::bottom("status").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.label(self.status_line.as_str());
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    ui.monospace(format!(
                        "x {:.3}  y {:.3}  z {:.3}",
                        cursor.x, cursor.y, cursor.z
                    ));
                    if self.is_loading() {
                        ui.spinner();
                    }
                });
            });
        });
    }
}

impl eframe::App for OrthoViewerApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_slice_counts(ctx);
        self.poll_slice_loads(ctx);
        self.handle_keyboard(ctx);

        self.show_toolbar(ctx);
        self.show_status_bar(ctx);
        egui::CentralPanel::default().show(ctx, |ui| self.show_viewports(ui));
        self.show_grid_window(ctx);

        self.publish_cursor_change();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_press(key: egui::Key) -> egui::Event {
        egui::Event::Key {
            key,
            physical_key: None,
            pressed: true,
            repeat: false,
            modifiers: egui::Modifiers::NONE,
        }
    }

    /// Runs one frame with `events` and reports the keys read plus whether
    /// ArrowLeft is still visible to later widgets.
    fn read_frame(events: Vec<egui::Event>, grid_open: bool) -> (NavigationKeys, bool) {
        let ctx = egui::Context::default();
        let mut outcome = (NavigationKeys::default(), false);
        let _ = ctx.run(
            egui::RawInput {
                events,
                ..Default::default()
            },
            |ctx| {
                outcome = ctx.input_mut(|input| {
                    let keys = read_navigation_keys(input, grid_open);
                    (keys, input.key_pressed(egui::Key::ArrowLeft))
                });
            },
        );
        outcome
    }

    #[test]
    fn open_grid_consumes_horizontal_arrows() {
        let (keys, left_still_pressed) = read_frame(
            vec![key_press(egui::Key::ArrowLeft), key_press(egui::Key::ArrowRight)],
            true,
        );
        assert!(keys.previous && keys.next);
        assert!(!left_still_pressed);
    }

    #[test]
    fn closed_grid_leaves_arrows_for_other_widgets() {
        let (keys, left_still_pressed) = read_frame(
            vec![key_press(egui::Key::ArrowLeft), key_press(egui::Key::ArrowUp)],
            false,
        );
        assert!(keys.previous && keys.up);
        assert!(!keys.next && !keys.escape);
        assert!(left_still_pressed);
    }
}
