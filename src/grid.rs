use crate::slices::{SliceCounts, ViewId};

pub const ITEM_WIDTH: f32 = 160.0;
pub const ITEM_HEIGHT: f32 = 132.0;
pub const ITEM_GAP: f32 = 12.0;
const CONTAINER_PADDING: f32 = 24.0;
const BUFFER_ROWS: usize = 2;

/// Which stack the grid shows. `All` concatenates axial, coronal, then sagittal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesFilter {
    View(ViewId),
    All,
}

impl SeriesFilter {
    pub const CHOICES: [SeriesFilter; 4] = [
        SeriesFilter::View(ViewId::Axial),
        SeriesFilter::View(ViewId::Coronal),
        SeriesFilter::View(ViewId::Sagittal),
        SeriesFilter::All,
    ];

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("all") {
            return Some(SeriesFilter::All);
        }
        ViewId::parse(value).map(SeriesFilter::View)
    }

    pub fn label(self) -> &'static str {
        match self {
            SeriesFilter::View(view) => view.title(),
            SeriesFilter::All => "All views",
        }
    }

    pub fn views(self) -> &'static [ViewId] {
        match self {
            SeriesFilter::View(ViewId::Axial) => &[ViewId::Axial],
            SeriesFilter::View(ViewId::Coronal) => &[ViewId::Coronal],
            SeriesFilter::View(ViewId::Sagittal) => &[ViewId::Sagittal],
            SeriesFilter::All => &ViewId::ALL,
        }
    }

    pub fn len(self, counts: &SliceCounts) -> usize {
        match self {
            SeriesFilter::View(view) => counts.get(view),
            SeriesFilter::All => counts.total(),
        }
    }

    /// Maps a grid position back to `(view, local index)`.
    pub fn resolve(self, index: usize, counts: &SliceCounts) -> Option<(ViewId, usize)> {
        match self {
            SeriesFilter::View(view) => (index < counts.get(view)).then_some((view, index)),
            SeriesFilter::All => resolve_concatenated(index, counts),
        }
    }
}

/// Resolves an index into the axial+coronal+sagittal concatenation.
/// Indices past the last sagittal slice yield `None`.
pub fn resolve_concatenated(index: usize, counts: &SliceCounts) -> Option<(ViewId, usize)> {
    let mut remaining = index;
    for view in ViewId::ALL {
        let count = counts.get(view);
        if remaining < count {
            return Some((view, remaining));
        }
        remaining = remaining.checked_sub(count)?;
    }
    None
}

pub fn cell_label(view: ViewId, local_index: usize) -> String {
    format!("{} #{}", view.title(), local_index + 1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellState {
    Pending,
    Loaded,
    Failed,
}

impl CellState {
    /// A cell is pending until its own fetch either fills the slot or fails.
    pub fn of(has_image: bool, failed: bool) -> Self {
        match (has_image, failed) {
            (true, _) => CellState::Loaded,
            (false, true) => CellState::Failed,
            (false, false) => CellState::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridCell {
    pub index: usize,
    pub top: f32,
    pub left: f32,
}

/// The rows of a virtualized grid that intersect the viewport, plus a buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridWindow {
    pub total_items: usize,
    pub items_per_row: usize,
    pub total_rows: usize,
    pub first_row: usize,
    pub end_row: usize,
}

impl GridWindow {
    pub fn compute(
        total_items: usize,
        container_width: f32,
        container_height: f32,
        scroll_top: f32,
    ) -> Self {
        let usable = (container_width - CONTAINER_PADDING).max(0.0);
        let items_per_row = ((usable / (ITEM_WIDTH + ITEM_GAP)).floor() as usize).max(1);
        let total_rows = total_items.div_ceil(items_per_row);
        let visible_rows = (container_height.max(0.0) / ITEM_HEIGHT).ceil() as usize + BUFFER_ROWS;
        let first_row = ((scroll_top.max(0.0) / ITEM_HEIGHT).floor() as usize)
            .saturating_sub(1)
            .min(total_rows);
        let end_row = (first_row + visible_rows).min(total_rows);
        Self {
            total_items,
            items_per_row,
            total_rows,
            first_row,
            end_row,
        }
    }

    /// Height reserved for every row, rendered or not.
    pub fn total_height(&self) -> f32 {
        self.total_rows as f32 * ITEM_HEIGHT
    }

    pub fn content_width(&self) -> f32 {
        self.items_per_row as f32 * (ITEM_WIDTH + ITEM_GAP)
    }

    pub fn cells(&self) -> impl Iterator<Item = GridCell> + '_ {
        let start = self.first_row * self.items_per_row;
        let end = (self.end_row * self.items_per_row).min(self.total_items);
        (start..end).map(move |index| {
            let row = index / self.items_per_row;
            let column = index % self.items_per_row;
            GridCell {
                index,
                top: row as f32 * ITEM_HEIGHT,
                left: column as f32 * (ITEM_WIDTH + ITEM_GAP),
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GridDialog {
    #[default]
    Closed,
    Open {
        series: SeriesFilter,
    },
    Preview {
        series: SeriesFilter,
        index: usize,
    },
}

impl GridDialog {
    pub fn open(&mut self, series: SeriesFilter) {
        *self = GridDialog::Open { series };
    }

    pub fn close(&mut self) {
        *self = GridDialog::Closed;
    }

    pub fn is_open(&self) -> bool {
        !matches!(self, GridDialog::Closed)
    }

    pub fn series(&self) -> Option<SeriesFilter> {
        match *self {
            GridDialog::Closed => None,
            GridDialog::Open { series } | GridDialog::Preview { series, .. } => Some(series),
        }
    }

    pub fn preview_index(&self) -> Option<usize> {
        match *self {
            GridDialog::Preview { index, .. } => Some(index),
            _ => None,
        }
    }

    pub fn preview(&mut self, index: usize, len: usize) -> bool {
        let Some(series) = self.series() else {
            return false;
        };
        if index >= len {
            return false;
        }
        *self = GridDialog::Preview { series, index };
        true
    }

    /// Moves the preview by `delta`; requests past either end are ignored.
    pub fn navigate(&mut self, delta: i64, len: usize) -> bool {
        let GridDialog::Preview { series, index } = *self else {
            return false;
        };
        let target = index as i64 + delta;
        if target < 0 || target >= len as i64 || target == index as i64 {
            return false;
        }
        *self = GridDialog::Preview {
            series,
            index: target as usize,
        };
        true
    }

    /// Leaves the preview, or closes the grid if no preview is shown.
    pub fn escape(&mut self) {
        *self = match *self {
            GridDialog::Preview { series, .. } => GridDialog::Open { series },
            _ => GridDialog::Closed,
        };
    }

    /// Resolves `index` for the current series and closes the dialog.
    pub fn select(&mut self, index: usize, counts: &SliceCounts) -> Option<(ViewId, usize)> {
        let series = self.series()?;
        let resolved = series.resolve(index, counts);
        if resolved.is_some() {
            self.close();
        }
        resolved
    }
}
