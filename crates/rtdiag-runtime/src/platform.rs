//! Execution platform seam: clock, sleep, and unit creation.
//!
//! The harness never schedules anything itself. It consumes four
//! primitives from whatever runs it:
//! 1. a monotonic millisecond clock ([`Clock`])
//! 2. a blocking relative sleep and wait-until ([`Platform::sleep_ms`],
//!    [`Platform::sleep_until_ms`])
//! 3. creation of a concurrently-executing unit in a priority class
//!    ([`Platform::spawn`])
//! 4. dispatch notifications delivered to a [`SchedulerObserver`]
//!
//! [`ThreadPlatform`] provides all four on top of OS threads. The OS
//! scheduler makes the real dispatch decisions; the adapter keeps a
//! uniprocessor view of the units (one holder of the processor plus a
//! ready set) and raises the observer hooks at the points it can see
//! from user space:
//!
//! - unit created: `on_enqueue` (from the creating thread)
//! - unit starts, or wakes from a sleep that actually blocked (`on_enqueue`
//!   first): if the processor is free or the unit outranks the holder,
//!   `on_dequeue`, the displaced holder is re-enqueued, then
//!   `on_context_switch(last, unit)`. Otherwise the unit waits.
//! - holder about to block or exit: the highest-class waiting unit, oldest
//!   first, gets `on_dequeue` and `on_context_switch(holder, next)`
//! - waiting unit about to block or exit: `on_dequeue`
//!
//! `last` is the unit most recently dispatched by this adapter, so the
//! first dispatch of a run reports no predecessor.

use crate::counters::{DispatchedUnit, SchedulerObserver};
use crate::realtime;
use crate::spinlock::SpinLock;
use rtdiag_common::config::RealtimeConfig;
use rtdiag_common::error::{HarnessError, HarnessResult};
use rtdiag_common::task::PriorityClass;
use std::cell::Cell;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Monotonic millisecond time source.
pub trait Clock: Send + Sync {
    /// Milliseconds since the clock's epoch.
    fn now_ms(&self) -> u64;
}

/// [`Clock`] anchored at an [`Instant`]; zero at construction.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    /// Start a clock at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// The instant corresponding to `ms` on this clock.
    #[must_use]
    pub fn instant_at(&self, ms: u64) -> Instant {
        self.epoch + Duration::from_millis(ms)
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Body executed by a unit.
pub type UnitBody = Box<dyn FnOnce() + Send + 'static>;

/// Creation parameters for one unit.
#[derive(Debug, Clone)]
pub struct UnitSpec {
    /// Thread name (kept short; Linux truncates at 15 bytes).
    pub name: String,
    /// Identity and priority class reported to the observer.
    pub unit: DispatchedUnit,
}

impl UnitSpec {
    /// Build a spec.
    #[must_use]
    pub fn new(name: impl Into<String>, id: u32, class: PriorityClass) -> Self {
        Self {
            name: name.into(),
            unit: DispatchedUnit::new(id, class),
        }
    }
}

/// Services the harness needs from its execution environment.
pub trait Platform: Clock {
    /// Block the caller for `ms` milliseconds, relinquishing the processor.
    fn sleep_ms(&self, ms: u64);

    /// Block the caller until `now_ms() >= target_ms`. Returns immediately
    /// if the target has already passed.
    fn sleep_until_ms(&self, target_ms: u64);

    /// Create a unit running `body` in the given class.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Spawn`] if the unit cannot be created.
    fn spawn(&self, spec: UnitSpec, body: UnitBody) -> HarnessResult<UnitHandle>;

    /// Forget dispatch history from earlier runs.
    fn reset(&self) {}
}

/// Handle to a created unit.
pub struct UnitHandle {
    name: String,
    thread: Option<JoinHandle<()>>,
}

impl fmt::Debug for UnitHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitHandle")
            .field("name", &self.name)
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl UnitHandle {
    /// Handle to a unit backed by an OS thread.
    #[must_use]
    pub fn from_thread(name: impl Into<String>, thread: JoinHandle<()>) -> Self {
        Self {
            name: name.into(),
            thread: Some(thread),
        }
    }

    /// Handle to a unit whose body already ran to completion.
    #[must_use]
    pub fn completed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            thread: None,
        }
    }

    /// Unit name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true once the unit's body has returned.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the unit to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if the unit panicked.
    pub fn join(self) -> HarnessResult<()> {
        match self.thread {
            None => Ok(()),
            Some(handle) => handle.join().map_err(|_| HarnessError::Spawn {
                name: self.name,
                reason: "unit panicked".into(),
            }),
        }
    }
}

thread_local! {
    /// Unit running on this thread, if the thread is a harness unit.
    static CURRENT_UNIT: Cell<Option<DispatchedUnit>> = const { Cell::new(None) };
}

/// Who holds the processor and who waits for it.
#[derive(Debug)]
struct DispatchModel {
    /// Unit most recently dispatched.
    last: Option<DispatchedUnit>,
    /// `last` still holds the processor (it has not blocked or exited).
    holding: bool,
    /// Runnable units waiting for the processor, oldest first.
    ready: Vec<DispatchedUnit>,
}

impl DispatchModel {
    fn new() -> Self {
        Self {
            last: None,
            holding: false,
            ready: Vec::with_capacity(64),
        }
    }

    fn holder(&self) -> Option<DispatchedUnit> {
        self.last.filter(|_| self.holding)
    }

    fn remove_ready(&mut self, unit: DispatchedUnit) -> bool {
        match self.ready.iter().position(|u| *u == unit) {
            Some(pos) => {
                self.ready.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Highest class first, oldest within a class.
    fn take_next(&mut self) -> Option<DispatchedUnit> {
        let mut best: Option<usize> = None;
        for (i, unit) in self.ready.iter().enumerate() {
            if best.map_or(true, |b| unit.class.outranks(self.ready[b].class)) {
                best = Some(i);
            }
        }
        best.map(|i| self.ready.remove(i))
    }
}

/// Dispatch bookkeeping shared with every unit thread.
///
/// Hooks are raised with the model locked so the observer sees events in
/// the order the model applied them.
struct DispatchState {
    observer: Arc<dyn SchedulerObserver>,
    model: SpinLock<DispatchModel>,
}

impl DispatchState {
    fn new(observer: Arc<dyn SchedulerObserver>) -> Self {
        Self {
            observer,
            model: SpinLock::new(DispatchModel::new()),
        }
    }

    /// A new unit exists and is runnable.
    fn created(&self, unit: DispatchedUnit) {
        let mut model = self.model.lock();
        model.ready.push(unit);
        self.observer.on_enqueue();
    }

    /// Creation failed after [`created`](Self::created).
    fn abandoned(&self, unit: DispatchedUnit) {
        let mut model = self.model.lock();
        if model.remove_ready(unit) {
            self.observer.on_dequeue();
        }
    }

    /// `unit` executes for the first time.
    fn started(&self, unit: DispatchedUnit) {
        let mut model = self.model.lock();
        self.offer(&mut model, unit);
    }

    /// `unit` woke from a sleep that actually blocked.
    fn woke(&self, unit: DispatchedUnit) {
        let mut model = self.model.lock();
        model.ready.push(unit);
        self.observer.on_enqueue();
        self.offer(&mut model, unit);
    }

    /// `unit` is about to block or exit.
    fn releasing(&self, unit: DispatchedUnit) {
        let mut model = self.model.lock();
        if model.holder() == Some(unit) {
            model.holding = false;
            if let Some(next) = model.take_next() {
                self.observer.on_dequeue();
                self.switch_to(&mut model, next);
            }
        } else if model.remove_ready(unit) {
            // Ran alongside the holder without ever being dispatched
            self.observer.on_dequeue();
        }
    }

    /// Dispatch `unit` (in the ready set) if it may take the processor.
    fn offer(&self, model: &mut DispatchModel, unit: DispatchedUnit) {
        let displaced = match model.holder() {
            Some(holder) if !unit.class.outranks(holder.class) => return,
            holder => holder,
        };
        if model.remove_ready(unit) {
            self.observer.on_dequeue();
        }
        if let Some(holder) = displaced {
            model.ready.push(holder);
            self.observer.on_enqueue();
        }
        self.switch_to(model, unit);
    }

    fn switch_to(&self, model: &mut DispatchModel, unit: DispatchedUnit) {
        let from = model.last.replace(unit);
        model.holding = true;
        self.observer.on_context_switch(from, unit);
    }

    fn reset(&self) {
        let mut model = self.model.lock();
        model.last = None;
        model.holding = false;
        model.ready.clear();
    }
}

/// Marks the calling thread as a running unit until dropped; dropping
/// (return or panic) releases the processor for good.
struct UnitScope {
    state: Arc<DispatchState>,
    unit: DispatchedUnit,
}

impl UnitScope {
    fn enter(state: Arc<DispatchState>, unit: DispatchedUnit) -> Self {
        CURRENT_UNIT.with(|c| c.set(Some(unit)));
        state.started(unit);
        Self { state, unit }
    }
}

impl Drop for UnitScope {
    fn drop(&mut self) {
        CURRENT_UNIT.with(|c| c.set(None));
        self.state.releasing(self.unit);
    }
}

/// [`Platform`] backed by OS threads with optional real-time policy.
pub struct ThreadPlatform {
    clock: MonotonicClock,
    realtime: RealtimeConfig,
    dispatch: Arc<DispatchState>,
}

impl fmt::Debug for ThreadPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPlatform")
            .field("clock", &self.clock)
            .field("realtime", &self.realtime)
            .field("last_dispatched", &self.dispatch.model.lock().last)
            .finish_non_exhaustive()
    }
}

impl ThreadPlatform {
    /// Create a platform whose clock starts now.
    #[must_use]
    pub fn new(observer: Arc<dyn SchedulerObserver>, realtime: RealtimeConfig) -> Self {
        Self::with_clock(MonotonicClock::new(), observer, realtime)
    }

    /// Create a platform on an existing clock, so other components can
    /// timestamp events on the same timebase.
    #[must_use]
    pub fn with_clock(
        clock: MonotonicClock,
        observer: Arc<dyn SchedulerObserver>,
        realtime: RealtimeConfig,
    ) -> Self {
        Self {
            clock,
            realtime,
            dispatch: Arc::new(DispatchState::new(observer)),
        }
    }

    /// The platform clock.
    #[must_use]
    pub fn clock(&self) -> MonotonicClock {
        self.clock
    }

    /// Sleep until `deadline`. A unit that actually blocks gives up the
    /// processor first and competes for it again on wake.
    fn block_until(&self, deadline: Instant) {
        if Instant::now() >= deadline {
            return;
        }
        let unit = CURRENT_UNIT.with(Cell::get);
        if let Some(unit) = unit {
            self.dispatch.releasing(unit);
        }
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(deadline - now);
        }
        if let Some(unit) = unit {
            self.dispatch.woke(unit);
        }
    }
}

impl Clock for ThreadPlatform {
    #[inline]
    fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }
}

impl Platform for ThreadPlatform {
    fn sleep_ms(&self, ms: u64) {
        if ms == 0 {
            return;
        }
        self.block_until(Instant::now() + Duration::from_millis(ms));
    }

    fn sleep_until_ms(&self, target_ms: u64) {
        self.block_until(self.clock.instant_at(target_ms));
    }

    fn reset(&self) {
        self.dispatch.reset();
    }

    fn spawn(&self, spec: UnitSpec, body: UnitBody) -> HarnessResult<UnitHandle> {
        let UnitSpec { name, unit } = spec;
        let state = Arc::clone(&self.dispatch);
        let realtime = self.realtime.clone();

        // Runnable from the moment it exists
        self.dispatch.created(unit);

        let spawned = thread::Builder::new().name(name.clone()).spawn(move || {
            if let Err(e) = realtime::apply_unit_policy(&realtime, unit.class) {
                warn!(unit_id = unit.id, error = %e, "Running unit without class policy");
            }
            let _scope = UnitScope::enter(state, unit);
            body();
        });

        match spawned {
            Ok(handle) => {
                debug!(unit = %name, class = %unit.class, "Unit created");
                Ok(UnitHandle::from_thread(name, handle))
            }
            Err(e) => {
                // Never became runnable after all
                self.dispatch.abandoned(unit);
                Err(HarnessError::Spawn {
                    name,
                    reason: e.to_string(),
                })
            }
        }
    }
}
