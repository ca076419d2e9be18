use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::crosshair::NormalizedCursor;
use crate::slices::ViewId;

/// Notifications the viewer publishes to its collaborators.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ViewerEvent {
    CursorMoved(NormalizedCursor),
    SliceSelected { view: ViewId, index: usize },
}

pub trait ViewerEventSink {
    fn handle(&mut self, event: &ViewerEvent);
}

#[derive(Debug, Default)]
pub struct LoggingSink;

impl ViewerEventSink for LoggingSink {
    fn handle(&mut self, event: &ViewerEvent) {
        match event {
            ViewerEvent::CursorMoved(cursor) => log::debug!(
                "cursor moved to ({:.3}, {:.3}, {:.3})",
                cursor.x,
                cursor.y,
                cursor.z
            ),
            ViewerEvent::SliceSelected { view, index } => {
                log::info!("selected {view} slice {index}")
            }
        }
    }
}

#[derive(Default)]
pub struct EventBus {
    sinks: Vec<Box<dyn ViewerEventSink>>,
}

impl EventBus {
    pub fn subscribe(&mut self, sink: Box<dyn ViewerEventSink>) {
        self.sinks.push(sink);
    }

    pub fn publish(&mut self, event: ViewerEvent) {
        for sink in &mut self.sinks {
            sink.handle(&event);
        }
    }
}

/// Slices picked per external entity (for example a tooth number).
/// Lives for the session only; persisting it is the caller's job.
#[derive(Debug, Default, Serialize)]
#[serde(transparent)]
pub struct SliceSelectionStore {
    selections: BTreeMap<String, BTreeMap<ViewId, BTreeSet<usize>>>,
}

impl SliceSelectionStore {
    pub fn add(&mut self, entity: &str, view: ViewId, index: usize) -> bool {
        self.selections
            .entry(entity.to_string())
            .or_default()
            .entry(view)
            .or_default()
            .insert(index)
    }

    pub fn remove(&mut self, entity: &str, view: ViewId, index: usize) -> bool {
        let Some(views) = self.selections.get_mut(entity) else {
            return false;
        };
        let Some(indices) = views.get_mut(&view) else {
            return false;
        };
        let removed = indices.remove(&index);
        if indices.is_empty() {
            views.remove(&view);
        }
        if views.is_empty() {
            self.selections.remove(entity);
        }
        removed
    }

    /// Flips membership and returns whether the slice is now selected.
    pub fn toggle(&mut self, entity: &str, view: ViewId, index: usize) -> bool {
        if self.contains(entity, view, index) {
            self.remove(entity, view, index);
            false
        } else {
            self.add(entity, view, index)
        }
    }

    pub fn contains(&self, entity: &str, view: ViewId, index: usize) -> bool {
        self.selections
            .get(entity)
            .and_then(|views| views.get(&view))
            .is_some_and(|indices| indices.contains(&index))
    }

    pub fn slices(&self, entity: &str, view: ViewId) -> Vec<usize> {
        self.selections
            .get(entity)
            .and_then(|views| views.get(&view))
            .map(|indices| indices.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn total_for(&self, entity: &str) -> usize {
        self.selections
            .get(entity)
            .map(|views| views.values().map(BTreeSet::len).sum())
            .unwrap_or(0)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Could not serialize slice selections")
    }
}
