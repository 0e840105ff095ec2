//! Deterministic doubles for unit tests: a virtual clock, an inline
//! platform that runs unit bodies on the caller, a burner that advances
//! virtual time, and an observer that records every hook.

#![allow(dead_code)] // Not every test uses every helper

use crate::burner::CpuBurner;
use crate::counters::{DiagCounters, DispatchedUnit, SchedulerObserver};
use crate::platform::{Clock, Platform, UnitBody, UnitHandle, UnitSpec};
use rtdiag_common::error::HarnessResult;
use rtdiag_common::stats::SchedStats;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Virtual millisecond clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn advance_to(&self, target: u64) {
        self.now.fetch_max(target, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Platform on a [`ManualClock`]; `spawn` runs the body to completion
/// before returning, so units execute one after another.
#[derive(Debug, Default)]
pub struct InlinePlatform {
    pub clock: Arc<ManualClock>,
    pub spawned: Mutex<Vec<UnitSpec>>,
    pub sleeps: Mutex<Vec<u64>>,
    pub resets: AtomicUsize,
}

impl InlinePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawned_names(&self) -> Vec<String> {
        self.spawned
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.name.clone())
            .collect()
    }
}

impl Clock for InlinePlatform {
    fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }
}

impl Platform for InlinePlatform {
    fn sleep_ms(&self, ms: u64) {
        self.sleeps.lock().unwrap().push(ms);
        self.clock.advance(ms);
    }

    fn sleep_until_ms(&self, target_ms: u64) {
        self.clock.advance_to(target_ms);
    }

    fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }

    fn spawn(&self, spec: UnitSpec, body: UnitBody) -> HarnessResult<UnitHandle> {
        let name = spec.name.clone();
        self.spawned.lock().unwrap().push(spec);
        body();
        Ok(UnitHandle::completed(name))
    }
}

/// Burner that advances a [`ManualClock`] instead of spinning.
#[derive(Debug, Clone)]
pub struct VirtualBurner {
    pub clock: Arc<ManualClock>,
}

impl CpuBurner for VirtualBurner {
    fn burn(&self, ms: u32) {
        self.clock.advance(u64::from(ms));
    }
}

/// One observed hook call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    Enqueue,
    Dequeue,
    Switch {
        from: Option<DispatchedUnit>,
        to: DispatchedUnit,
    },
}

/// Observer that logs every hook in call order and forwards to real counters.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    counters: DiagCounters,
    seq: AtomicU64,
    events: Mutex<Vec<(u64, HookEvent)>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(u64, HookEvent)> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: HookEvent) {
        let mut events = self.events.lock().unwrap();
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        events.push((seq, event));
    }
}

impl SchedulerObserver for RecordingObserver {
    fn reset(&self) {
        self.counters.reset();
        self.events.lock().unwrap().clear();
    }

    fn snapshot(&self) -> SchedStats {
        self.counters.snapshot()
    }

    fn on_enqueue(&self) {
        self.counters.on_enqueue();
        self.push(HookEvent::Enqueue);
    }

    fn on_dequeue(&self) {
        self.counters.on_dequeue();
        self.push(HookEvent::Dequeue);
    }

    fn on_context_switch(&self, from: Option<DispatchedUnit>, to: DispatchedUnit) {
        self.counters.on_context_switch(from, to);
        self.push(HookEvent::Switch { from, to });
    }
}
