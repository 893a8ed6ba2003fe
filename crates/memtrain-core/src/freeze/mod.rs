//! Freeze engine: one background task per enabled entry, rewriting the
//! entry's value on a fixed interval.

mod signal;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::memory::{MemoryAccess, Value, WriteMemory};
use crate::table::{CheatEntry, EntryId, EntryState, EntryStatus, EntryTarget, lock_state};

pub use signal::ShutdownSignal;

struct FreezeTask {
    signal: Arc<ShutdownSignal>,
    thread: JoinHandle<()>,
    state: Arc<Mutex<EntryState>>,
}

/// Everything a freeze thread owns
struct TaskContext {
    name: String,
    target: EntryTarget,
    value: Value,
    memory: MemoryAccess,
    signal: Arc<ShutdownSignal>,
    state: Arc<Mutex<EntryState>>,
    interval: Duration,
    max_failures: u32,
}

/// Per-entry task table keyed by [`EntryId`]
pub struct FreezeEngine {
    tasks: Mutex<HashMap<EntryId, FreezeTask>>,
    interval: Duration,
    max_failures: u32,
}

impl FreezeEngine {
    pub fn new(interval: Duration, max_failures: u32) -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            interval,
            max_failures: max_failures.max(1),
        }
    }

    /// Start freezing `entry`. A no-op when its task is already running.
    ///
    /// The target is resolved once up front; an entry that cannot be
    /// resolved gets no task.
    pub fn enable(&self, entry: &CheatEntry, memory: MemoryAccess) -> Result<()> {
        let mut tasks = self.lock();
        match tasks.get(&entry.id) {
            Some(task) if !task.thread.is_finished() => {
                debug!("Freeze for '{}' already active", entry.name);
                return Ok(());
            }
            Some(_) => {
                if let Some(finished) = tasks.remove(&entry.id) {
                    join(finished);
                }
            }
            None => {}
        }

        let address = entry.target.resolve(&memory)?;
        memory.write_value(address, &entry.frozen_value)?;

        let signal = Arc::new(ShutdownSignal::new());
        let state = entry.shared_state();
        let context = TaskContext {
            name: entry.name.clone(),
            target: entry.target.clone(),
            value: entry.frozen_value,
            memory,
            signal: Arc::clone(&signal),
            state: Arc::clone(&state),
            interval: self.interval,
            max_failures: self.max_failures,
        };

        *lock_state(&state) = EntryState {
            enabled: true,
            status: EntryStatus::Ok,
            last_error: None,
        };
        let spawned = thread::Builder::new()
            .name(format!("freeze-{}", entry.id))
            .spawn(move || run(context));
        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                lock_state(&state).enabled = false;
                return Err(e.into());
            }
        };
        tasks.insert(
            entry.id,
            FreezeTask {
                signal,
                thread,
                state,
            },
        );
        info!("Freezing '{}' at {:#x} = {}", entry.name, address, entry.frozen_value);
        Ok(())
    }

    /// Stop freezing the entry. Returns whether a task was removed.
    pub fn disable(&self, id: EntryId) -> bool {
        let task = self.lock().remove(&id);
        match task {
            Some(task) => {
                task.signal.trigger();
                lock_state(&task.state).enabled = false;
                join(task);
                debug!("Freeze {} stopped", id);
                true
            }
            None => false,
        }
    }

    /// Stop and join every task.
    pub fn stop_all(&self) {
        let tasks: Vec<FreezeTask> = self.lock().drain().map(|(_, task)| task).collect();
        if tasks.is_empty() {
            return;
        }

        for task in &tasks {
            task.signal.trigger();
            lock_state(&task.state).enabled = false;
        }
        let count = tasks.len();
        for task in tasks {
            join(task);
        }
        info!("Stopped {} freeze task(s)", count);
    }

    pub fn is_active(&self, id: EntryId) -> bool {
        self.lock()
            .get(&id)
            .is_some_and(|task| !task.thread.is_finished())
    }

    pub fn active_count(&self) -> usize {
        self.lock()
            .values()
            .filter(|task| !task.thread.is_finished())
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<EntryId, FreezeTask>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for FreezeEngine {
    fn drop(&mut self) {
        self.stop_all();
    }
}

fn join(task: FreezeTask) {
    if task.thread.join().is_err() {
        warn!("Freeze thread panicked");
    }
}

fn run(ctx: TaskContext) {
    let mut failures = 0u32;

    loop {
        let result = ctx
            .target
            .resolve(&ctx.memory)
            .and_then(|address| ctx.memory.write_value(address, &ctx.value));

        match result {
            Ok(()) => failures = 0,
            Err(Error::NotAttached) => {
                mark_detached(&ctx);
                break;
            }
            Err(Error::ProcessGone) => {
                mark_stale(&ctx, &Error::ProcessGone);
                break;
            }
            Err(e) => {
                failures += 1;
                debug!(
                    "Freeze '{}' failed ({}/{}): {}",
                    ctx.name, failures, ctx.max_failures, e
                );
                if failures >= ctx.max_failures {
                    mark_stale(&ctx, &e);
                    break;
                }
            }
        }

        if ctx.signal.wait(ctx.interval) {
            break;
        }
    }
}

// Both markers test the signal under the state lock: disable triggers before
// it takes that lock, so a triggered signal means disable owns the state.

fn mark_stale(ctx: &TaskContext, err: &Error) {
    let mut state = lock_state(&ctx.state);
    if ctx.signal.is_triggered() {
        return;
    }
    warn!("Freeze '{}' stopped: {}", ctx.name, err);
    state.enabled = false;
    state.status = EntryStatus::Stale;
    state.last_error = Some(err.to_string());
}

/// The handle was closed under a running task. The entry is not stale,
/// just no longer frozen.
fn mark_detached(ctx: &TaskContext) {
    let mut state = lock_state(&ctx.state);
    if ctx.signal.is_triggered() {
        return;
    }
    info!("Freeze '{}' stopped: process detached", ctx.name);
    state.enabled = false;
    state.last_error = Some(Error::NotAttached.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ReadMemory;
    use crate::pointer::PointerChain;
    use crate::process::{MockProcess, MockProcessBuilder, ProcessHandle};
    use std::time::Instant;

    fn setup() -> (MockProcess, MemoryAccess) {
        let process = MockProcessBuilder::new(11)
            .region(0x400000, 0x1000)
            .module("game.exe", 0x400000, 0x1000)
            .region(0x900000, 0x1000)
            .build();
        let memory = MemoryAccess::new(Arc::new(ProcessHandle::from_backend(Box::new(
            process.clone(),
        ))));
        (process, memory)
    }

    fn engine() -> FreezeEngine {
        FreezeEngine::new(Duration::from_millis(10), 3)
    }

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_freeze_overrides_external_writes() {
        let (process, memory) = setup();
        let engine = engine();
        let entry = CheatEntry::new("hp", EntryTarget::Address(0x900010), Value::I32(999));

        engine.enable(&entry, memory.clone()).unwrap();
        assert_eq!(process.peek_i32(0x900010), 999);

        process.poke_i32(0x900010, 1);
        assert!(wait_until(Duration::from_secs(2), || process.peek_i32(0x900010) == 999));
        assert!(entry.is_enabled());
        assert_eq!(entry.status(), EntryStatus::Ok);

        engine.disable(entry.id);
        process.poke_i32(0x900010, 1);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(memory.read_i32(0x900010).unwrap(), 1);
        assert!(!entry.is_enabled());
    }

    #[test]
    fn test_enable_twice_is_one_task() {
        let (_process, memory) = setup();
        let engine = engine();
        let entry = CheatEntry::new("hp", EntryTarget::Address(0x900010), Value::I32(5));

        engine.enable(&entry, memory.clone()).unwrap();
        engine.enable(&entry, memory).unwrap();
        assert_eq!(engine.active_count(), 1);
        assert!(engine.is_active(entry.id));

        assert!(engine.disable(entry.id));
        assert!(!engine.disable(entry.id));
        assert_eq!(engine.active_count(), 0);
        assert!(!engine.is_active(entry.id));
    }

    #[test]
    fn test_unresolvable_entry_refused() {
        let (_process, memory) = setup();
        let engine = engine();
        let chain = PointerChain::new(
            "game.exe+100".parse().unwrap(),
            vec![0x10],
            crate::memory::ValueType::I32,
        );
        let entry = CheatEntry::new("ammo", EntryTarget::Pointer(chain), Value::I32(50));

        assert!(matches!(
            engine.enable(&entry, memory),
            Err(Error::PointerUnresolved(_))
        ));
        assert_eq!(engine.active_count(), 0);
        assert!(!entry.is_enabled());
    }

    #[test]
    fn test_repeated_failures_mark_stale() {
        let (process, memory) = setup();
        let engine = engine();
        process.poke_ptr(0x400100, 0x900000);
        let chain = PointerChain::new(
            "game.exe+100".parse().unwrap(),
            vec![0x20],
            crate::memory::ValueType::I32,
        );
        let entry = CheatEntry::new("ammo", EntryTarget::Pointer(chain), Value::I32(50));

        engine.enable(&entry, memory).unwrap();
        assert_eq!(process.peek_i32(0x900020), 50);

        // break the chain
        process.poke_ptr(0x400100, 0);
        assert!(wait_until(Duration::from_secs(2), || entry.status() == EntryStatus::Stale));
        assert!(!entry.is_enabled());
        assert!(entry.last_error().is_some());
        assert!(wait_until(Duration::from_secs(2), || engine.active_count() == 0));
    }

    #[test]
    fn test_process_exit_stops_immediately() {
        let (process, memory) = setup();
        let engine = FreezeEngine::new(Duration::from_millis(10), 1000);
        let entry = CheatEntry::new("hp", EntryTarget::Address(0x900010), Value::I32(7));

        engine.enable(&entry, memory).unwrap();
        process.kill();
        assert!(wait_until(Duration::from_secs(2), || entry.status() == EntryStatus::Stale));
        assert_eq!(
            entry.last_error().as_deref(),
            Some(Error::ProcessGone.to_string().as_str())
        );
    }

    #[test]
    fn test_detach_under_running_task_disables_entry() {
        let (_process, memory) = setup();
        let engine = FreezeEngine::new(Duration::from_millis(10), 1000);
        let entry = CheatEntry::new("hp", EntryTarget::Address(0x900010), Value::I32(7));

        engine.enable(&entry, memory.clone()).unwrap();
        assert!(entry.is_enabled());

        memory.handle().close();
        assert!(wait_until(Duration::from_secs(2), || engine.active_count() == 0));
        assert!(!entry.is_enabled());
        assert_eq!(entry.status(), EntryStatus::Ok);
        assert_eq!(
            entry.last_error().as_deref(),
            Some(Error::NotAttached.to_string().as_str())
        );
    }

    #[test]
    fn test_markers_yield_to_disable() {
        let (_process, memory) = setup();
        let entry = CheatEntry::new("hp", EntryTarget::Address(0x900010), Value::I32(7));
        *lock_state(&entry.shared_state()) = EntryState {
            enabled: true,
            status: EntryStatus::Ok,
            last_error: None,
        };
        let ctx = TaskContext {
            name: entry.name.clone(),
            target: entry.target.clone(),
            value: entry.frozen_value,
            memory,
            signal: Arc::new(ShutdownSignal::new()),
            state: entry.shared_state(),
            interval: Duration::from_millis(10),
            max_failures: 1,
        };

        // disable triggers first, then clears `enabled` under the lock
        ctx.signal.trigger();
        mark_stale(&ctx, &Error::ProcessGone);
        mark_detached(&ctx);
        assert_eq!(entry.status(), EntryStatus::Ok);
        assert!(entry.last_error().is_none());
        assert!(entry.is_enabled());
    }

    #[test]
    fn test_reenable_after_stale() {
        let (process, memory) = setup();
        let engine = engine();
        process.poke_ptr(0x400100, 0x900000);
        let chain = PointerChain::new(
            "game.exe+100".parse().unwrap(),
            vec![0x20],
            crate::memory::ValueType::I32,
        );
        let entry = CheatEntry::new("ammo", EntryTarget::Pointer(chain), Value::I32(50));

        engine.enable(&entry, memory.clone()).unwrap();
        process.poke_ptr(0x400100, 0);
        assert!(wait_until(Duration::from_secs(2), || !engine.is_active(entry.id)));

        process.poke_ptr(0x400100, 0x900000);
        engine.enable(&entry, memory).unwrap();
        assert!(engine.is_active(entry.id));
        assert_eq!(entry.status(), EntryStatus::Ok);
        assert_eq!(engine.active_count(), 1);
    }

    #[test]
    fn test_stop_all() {
        let (_process, memory) = setup();
        let engine = engine();
        let a = CheatEntry::new("a", EntryTarget::Address(0x900010), Value::I32(1));
        let b = CheatEntry::new("b", EntryTarget::Address(0x900020), Value::I32(2));
        engine.enable(&a, memory.clone()).unwrap();
        engine.enable(&b, memory).unwrap();
        assert_eq!(engine.active_count(), 2);

        engine.stop_all();
        assert_eq!(engine.active_count(), 0);
        assert!(!a.is_enabled());
        assert!(!b.is_enabled());
        assert_eq!(a.status(), EntryStatus::Ok);
    }
}
