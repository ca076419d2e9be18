use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, OnceLock};
use std::thread;

use anyhow::Result;

use crate::grid::CellState;
use crate::slices::{SliceImage, SliceStore, ViewId};

/// Anything that can produce encoded image bytes for one slice.
pub trait SliceSource: Send + Sync {
    fn fetch(&self, view: ViewId, index: usize) -> Result<Vec<u8>>;
}

#[derive(Debug)]
pub struct LoadEvent {
    pub view: ViewId,
    pub generation: u64,
    pub index: usize,
    pub result: Result<SliceImage, String>,
}

#[derive(Debug)]
struct ViewRequest {
    generation: u64,
    count: usize,
    prefetch: bool,
    /// Events still owed: every slot when prefetching, otherwise one per claimed cell.
    expected: usize,
    settled: usize,
    alive: Arc<AtomicBool>,
    /// Set once a worker or a cell fetch owns a slot, so each index is fetched once.
    claims: Arc<Vec<AtomicBool>>,
    failed: HashSet<usize>,
}

impl ViewRequest {
    fn new(generation: u64, count: usize, prefetch: bool) -> Self {
        Self {
            generation,
            count,
            prefetch,
            expected: if prefetch { count } else { 0 },
            settled: 0,
            alive: Arc::new(AtomicBool::new(true)),
            claims: Arc::new((0..count).map(|_| AtomicBool::new(false)).collect()),
            failed: HashSet::new(),
        }
    }

    fn is_settled(&self) -> bool {
        self.settled >= self.expected
    }
}

pub struct ProgressiveLoader {
    source: Arc<dyn SliceSource>,
    sender: Sender<LoadEvent>,
    receiver: Receiver<LoadEvent>,
    requests: [Option<ViewRequest>; 3],
    prefetch: bool,
}

impl ProgressiveLoader {
    pub fn new(source: Arc<dyn SliceSource>) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            source,
            sender,
            receiver,
            requests: [None, None, None],
            prefetch: true,
        }
    }

    /// With prefetch off, stacks are only sized on restart and slices arrive
    /// through [`ProgressiveLoader::request_cell`].
    pub fn with_prefetch(mut self, prefetch: bool) -> Self {
        self.prefetch = prefetch;
        self
    }

    /// Starts loading `count` slices for `view` unless the same request is still
    /// running or already filled every slot. A settled prefetch with gaps is retried.
    pub fn ensure(&mut self, store: &mut SliceStore, view: ViewId, count: usize) -> bool {
        let collection = store.collection(view);
        let unchanged = self.requests[view.index()]
            .as_ref()
            .is_some_and(|request| {
                request.count == count
                    && request.generation == collection.generation()
                    && (!request.prefetch || !request.is_settled() || collection.is_complete())
            });
        if unchanged {
            return false;
        }
        self.restart(store, view, count);
        true
    }

    /// Clears the stack for `view` and, when prefetching, issues one fetch per index.
    pub fn restart(&mut self, store: &mut SliceStore, view: ViewId, count: usize) {
        self.cancel(view);
        let generation = store.reset_view(view, count);
        let request = ViewRequest::new(generation, count, self.prefetch);
        let alive = Arc::clone(&request.alive);
        let claims = Arc::clone(&request.claims);
        self.requests[view.index()] = Some(request);
        if count == 0 || !self.prefetch {
            return;
        }

        let worker_count = fetch_worker_count(count);
        log::info!("loading {count} {view} slices with {worker_count} workers");
        for worker_id in 0..worker_count {
            let source = Arc::clone(&self.source);
            let sender = self.sender.clone();
            let alive = Arc::clone(&alive);
            let claims = Arc::clone(&claims);
            thread::spawn(move || {
                for index in (worker_id..count).step_by(worker_count) {
                    if !alive.load(Ordering::Relaxed) {
                        return;
                    }
                    if claims[index].swap(true, Ordering::AcqRel) {
                        continue;
                    }
                    let result = fetch_slice(source.as_ref(), view, index);
                    if !alive.load(Ordering::Relaxed) {
                        return;
                    }
                    let event = LoadEvent {
                        view,
                        generation,
                        index,
                        result,
                    };
                    if sender.send(event).is_err() {
                        return;
                    }
                }
            });
        }
    }

    /// Fetches one slot on its own thread unless it is loaded, failed, or already claimed.
    /// Visible grid cells and the shown slice call this every frame.
    pub fn request_cell(&mut self, store: &SliceStore, view: ViewId, index: usize) -> bool {
        let Some(request) = self.requests[view.index()].as_mut() else {
            return false;
        };
        if request.generation != store.collection(view).generation()
            || index >= request.count
            || store.get(view, index).is_some()
            || request.failed.contains(&index)
        {
            return false;
        }
        if request.claims[index].swap(true, Ordering::AcqRel) {
            return false;
        }
        if !request.prefetch {
            request.expected += 1;
        }

        let source = Arc::clone(&self.source);
        let sender = self.sender.clone();
        let alive = Arc::clone(&request.alive);
        let generation = request.generation;
        log::debug!("requesting {view} slice {index}");
        thread::spawn(move || {
            let result = fetch_slice(source.as_ref(), view, index);
            if alive.load(Ordering::Relaxed) {
                let _ = sender.send(LoadEvent {
                    view,
                    generation,
                    index,
                    result,
                });
            }
        });
        true
    }

    pub fn cell_state(&self, store: &SliceStore, view: ViewId, index: usize) -> CellState {
        let failed = self.requests[view.index()]
            .as_ref()
            .is_some_and(|request| request.failed.contains(&index));
        CellState::of(store.get(view, index).is_some(), failed)
    }

    /// Stops in-flight work for `view`; results that still arrive are discarded.
    pub fn cancel(&mut self, view: ViewId) {
        if let Some(request) = self.requests[view.index()].take() {
            request.alive.store(false, Ordering::Relaxed);
            if !request.is_settled() {
                log::debug!(
                    "cancelled {view} load after {}/{} slices",
                    request.settled,
                    request.expected
                );
            }
        }
    }

    pub fn cancel_all(&mut self) {
        for view in ViewId::ALL {
            self.cancel(view);
        }
    }

    pub fn is_loading(&self, view: ViewId) -> bool {
        self.requests[view.index()]
            .as_ref()
            .is_some_and(|request| !request.is_settled())
    }

    pub fn any_loading(&self) -> bool {
        ViewId::ALL.into_iter().any(|view| self.is_loading(view))
    }

    /// Drains finished fetches into `store`; returns how many slots were filled.
    pub fn poll(&mut self, store: &mut SliceStore) -> usize {
        let mut committed = 0;
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.apply(store, event) {
                        committed += 1;
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        committed
    }

    pub fn apply(&mut self, store: &mut SliceStore, event: LoadEvent) -> bool {
        let Some(request) = self.requests[event.view.index()].as_mut() else {
            return false;
        };
        if request.generation != event.generation || !request.alive.load(Ordering::Relaxed) {
            return false;
        }
        request.settled += 1;

        let committed = match event.result {
            Ok(image) => store.commit(event.view, event.generation, event.index, Arc::new(image)),
            Err(err) => {
                log::warn!(
                    "failed to load {} slice {}: {err}",
                    event.view,
                    event.index
                );
                request.failed.insert(event.index);
                false
            }
        };

        if request.prefetch && request.is_settled() {
            log::info!(
                "{} stack settled: {}/{} slices loaded",
                event.view,
                store.loaded_count(event.view),
                request.count
            );
        }
        committed
    }
}

impl Drop for ProgressiveLoader {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

fn fetch_slice(source: &dyn SliceSource, view: ViewId, index: usize) -> Result<SliceImage, String> {
    source
        .fetch(view, index)
        .and_then(|bytes| SliceImage::decode(&bytes))
        .map_err(|err| format!("{err:#}"))
}

fn fetch_worker_count(slice_count: usize) -> usize {
    let auto_workers = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
        .clamp(2, 8);

    let configured = configured_fetch_workers().unwrap_or(auto_workers);
    configured.clamp(1, 32).min(slice_count.max(1))
}

fn configured_fetch_workers() -> Option<usize> {
    static CONFIG: OnceLock<Option<usize>> = OnceLock::new();

    *CONFIG.get_or_init(|| {
        let raw = std::env::var("ORTHOVIEW_FETCH_WORKERS").ok()?;
        let value = raw.trim().parse::<usize>().ok()?;
        if value == 0 {
            return None;
        }
        Some(value)
    })
}

#[cfg(test)]
pub(crate) fn encode_png(width: u32, height: u32, value: u8) -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(width, height, image::Rgba([value, value, value, 255]));
    let mut bytes = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut bytes, image::ImageFormat::Png)
        .expect("png encoding");
    bytes.into_inner()
}
