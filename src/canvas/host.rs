//! Canvas host: one drawing slot, its surface and its frame task
//!
//! The host sizes a surface to its container, follows container resizes through
//! an observer, and drives the render loop at the display rate. A slot holds at
//! most one surface, one observer and one frame task: mounting again tears the
//! previous ones down first.

use super::surface::{CanvasError, Surface, SurfaceFactory, SurfaceSize};
use crate::pipeline::RenderLoop;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

struct ContainerInner {
    size: Mutex<SurfaceSize>,
    observers: Mutex<Vec<(u64, mpsc::UnboundedSender<SurfaceSize>)>>,
    next_observer: AtomicU64,
}

/// View-side container whose size changes are pushed to observers
#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
}

impl Container {
    pub fn new(size: SurfaceSize) -> Self {
        Self {
            inner: Arc::new(ContainerInner {
                size: Mutex::new(size),
                observers: Mutex::new(Vec::new()),
                next_observer: AtomicU64::new(1),
            }),
        }
    }

    pub fn size(&self) -> SurfaceSize {
        *lock(&self.inner.size)
    }

    /// Updates the size and notifies every connected observer
    pub fn resize(&self, size: SurfaceSize) {
        *lock(&self.inner.size) = size;
        lock(&self.inner.observers).retain(|(_, tx)| tx.send(size).is_ok());
    }

    /// Registers an observer. Dropping or disconnecting the guard unregisters it.
    pub fn observe(&self) -> (ResizeObserver, mpsc::UnboundedReceiver<SurfaceSize>) {
        let id = self.inner.next_observer.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.inner.observers).push((id, tx));
        let observer = ResizeObserver {
            id,
            container: Arc::downgrade(&self.inner),
        };
        (observer, rx)
    }

    /// Number of connected observers
    pub fn observer_count(&self) -> usize {
        lock(&self.inner.observers).len()
    }
}

/// Registration of one observer on a container
pub struct ResizeObserver {
    id: u64,
    container: Weak<ContainerInner>,
}

impl ResizeObserver {
    /// Unregisters synchronously. Idempotent.
    pub fn disconnect(&self) {
        if let Some(inner) = self.container.upgrade() {
            lock(&inner.observers).retain(|(id, _)| *id != self.id);
        }
    }
}

impl Drop for ResizeObserver {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct SlotState {
    alive: bool,
    surface: Option<Box<dyn Surface>>,
    render: RenderLoop,
    frames: u64,
}

struct MountedSlot {
    shared: Arc<Mutex<SlotState>>,
    observer: ResizeObserver,
    task: JoinHandle<()>,
}

/// Owner of one visual slot
pub struct CanvasHost {
    factory: Arc<dyn SurfaceFactory>,
    frame_period: Duration,
    mounted: Option<MountedSlot>,
}

impl CanvasHost {
    pub fn new(factory: Arc<dyn SurfaceFactory>, frame_period: Duration) -> Self {
        Self {
            factory,
            frame_period: frame_period.max(Duration::from_millis(1)),
            mounted: None,
        }
    }

    /// Mounts `render` into a surface sized to `container`.
    ///
    /// Anything previously mounted is released first. Must run inside a tokio
    /// runtime. A container with a zero dimension defers surface creation until
    /// its first drawable size.
    pub fn mount(&mut self, container: &Container, render: RenderLoop) -> Result<(), CanvasError> {
        self.unmount();

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| CanvasError::NoRuntime)?;
        let size = container.size();
        let surface = if size.is_drawable() {
            Some(self.factory.create(size)?)
        } else {
            tracing::debug!("Container not drawable yet ({}x{})", size.width, size.height);
            None
        };

        let (observer, resizes) = container.observe();
        let shared = Arc::new(Mutex::new(SlotState {
            alive: true,
            surface,
            render,
            frames: 0,
        }));
        let task = runtime.spawn(run_slot(
            Arc::clone(&shared),
            Arc::clone(&self.factory),
            resizes,
            self.frame_period,
        ));

        tracing::info!("Canvas mounted ({}x{})", size.width, size.height);
        self.mounted = Some(MountedSlot {
            shared,
            observer,
            task,
        });
        Ok(())
    }

    /// Stops the frame task, disconnects the observer and releases the surface.
    ///
    /// Synchronous: once this returns no frame is drawn for this slot.
    pub fn unmount(&mut self) {
        let Some(slot) = self.mounted.take() else {
            return;
        };

        {
            // Waits for an in-flight frame to finish
            let mut state = lock(&slot.shared);
            state.alive = false;
            state.surface = None;
        }
        slot.observer.disconnect();
        slot.task.abort();
        tracing::info!("Canvas unmounted");
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.is_some()
    }

    /// Frames drawn since the slot was mounted
    pub fn frames_drawn(&self) -> Option<u64> {
        self.mounted.as_ref().map(|slot| lock(&slot.shared).frames)
    }

    /// Current surface size, `None` while unmounted or not drawable yet
    pub fn surface_size(&self) -> Option<SurfaceSize> {
        let slot = self.mounted.as_ref()?;
        let state = lock(&slot.shared);
        state.surface.as_ref().map(|s| s.size())
    }

    /// Runs `f` against the mounted surface
    pub fn with_surface<R>(&self, f: impl FnOnce(&dyn Surface) -> R) -> Option<R> {
        let slot = self.mounted.as_ref()?;
        let state = lock(&slot.shared);
        state.surface.as_deref().map(|surface| f(surface))
    }
}

impl Drop for CanvasHost {
    fn drop(&mut self) {
        self.unmount();
    }
}

async fn run_slot(
    shared: Arc<Mutex<SlotState>>,
    factory: Arc<dyn SurfaceFactory>,
    mut resizes: mpsc::UnboundedReceiver<SurfaceSize>,
    period: Duration,
) {
    let started = Instant::now();
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !draw_frame(&shared, started.elapsed()) {
                    break;
                }
            }
            resized = resizes.recv() => {
                let Some(size) = resized else {
                    // Observer disconnected
                    break;
                };
                if !apply_resize(&shared, factory.as_ref(), size) {
                    break;
                }
            }
        }
    }
}

/// Returns false once the slot has been unmounted
fn draw_frame(shared: &Mutex<SlotState>, elapsed: Duration) -> bool {
    let mut state = lock(shared);
    if !state.alive {
        return false;
    }

    let SlotState {
        surface,
        render,
        frames,
        ..
    } = &mut *state;
    if let Some(surface) = surface.as_deref_mut() {
        render.tick(surface, elapsed);
        *frames += 1;
    }
    true
}

fn apply_resize(shared: &Mutex<SlotState>, factory: &dyn SurfaceFactory, size: SurfaceSize) -> bool {
    let mut guard = lock(shared);
    let state = &mut *guard;
    if !state.alive {
        return false;
    }
    if !size.is_drawable() {
        tracing::debug!("Ignoring container size {}x{}", size.width, size.height);
        return true;
    }

    let result = match state.surface {
        Some(ref mut surface) => surface.resize(size),
        None => factory.create(size).map(|surface| {
            state.surface = Some(surface);
        }),
    };
    match result {
        Ok(()) => tracing::debug!("Surface resized to {}x{}", size.width, size.height),
        Err(e) => tracing::warn!("Surface resize failed: {}", e),
    }
    true
}
