//! Goroutine lifecycle model with per-goroutine side tables.
//!
//! Mirrors what the runtime patches do inside the Go scheduler:
//!
//! - goroutine structs are pooled; a reused slot is *not* zeroed when it is
//!   handed out again
//! - every side table is reset on exit, after the exit callbacks ran
//! - creation reads the parent identity before switching to the system
//!   goroutine, and fires create callbacks once the child exists

use crate::hooks::registry::{Frozen, Registry};
use crate::hooks::trap::{FuncKey, SharedInterceptor};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GoroutineId(pub u64);

impl GoroutineId {
    /// The scheduler's own system goroutine (g0).
    pub const SYSTEM: GoroutineId = GoroutineId(0);
    pub const MAIN: GoroutineId = GoroutineId(1);
}

impl fmt::Display for GoroutineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// Hidden per-goroutine extension state.
#[derive(Default)]
pub struct SideTable {
    loose_json: bool,
    locals: HashMap<&'static str, Box<dyn Any + Send + Sync>>,
    interceptors: Vec<(FuncKey, SharedInterceptor)>,
}

impl SideTable {
    /// Whether the table is in its zero state.
    pub fn is_zero(&self) -> bool {
        !self.loose_json && self.locals.is_empty() && self.interceptors.is_empty()
    }

    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.locals.get(key).and_then(|v| v.downcast_ref())
    }

    pub fn set<T: Any + Send + Sync>(&mut self, key: &'static str, value: T) {
        self.locals.insert(key, Box::new(value));
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.locals.remove(key).is_some()
    }

    pub fn loose_json(&self) -> bool {
        self.loose_json
    }

    pub fn set_loose_json(&mut self, loose: bool) {
        self.loose_json = loose;
    }

    pub fn add_interceptor(&mut self, key: FuncKey, interceptor: SharedInterceptor) {
        self.interceptors.push((key, interceptor));
    }

    pub fn interceptors_for(&self, key: &FuncKey) -> Vec<&SharedInterceptor> {
        self.interceptors
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, i)| i)
            .collect()
    }

    pub fn clear(&mut self) {
        *self = SideTable::default();
    }
}

impl fmt::Debug for SideTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.locals.keys().collect();
        keys.sort();
        f.debug_struct("SideTable")
            .field("loose_json", &self.loose_json)
            .field("locals", &keys)
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}

/// Arguments to a create callback.
pub struct CreateEvent<'a> {
    pub parent: GoroutineId,
    pub child: GoroutineId,
    pub parent_table: &'a SideTable,
    pub child_table: &'a mut SideTable,
}

pub type CreateHook = Box<dyn Fn(&mut CreateEvent<'_>) + Send + Sync>;
pub type ExitHook = Box<dyn Fn(GoroutineId, &SideTable) + Send + Sync>;
pub type InitHook = Box<dyn FnOnce() + Send>;

/// Lifecycle callbacks, open during program initialization.
#[derive(Default)]
pub struct LifecycleRegistry {
    create: Registry<CreateHook>,
    exit: Registry<ExitHook>,
    init_finished: Registry<InitHook>,
}

impl LifecycleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_create(&mut self, hook: impl Fn(&mut CreateEvent<'_>) + Send + Sync + 'static) {
        self.create.register(Box::new(hook));
    }

    pub fn on_exit(&mut self, hook: impl Fn(GoroutineId, &SideTable) + Send + Sync + 'static) {
        self.exit.register(Box::new(hook));
    }

    pub fn on_init_finished(&mut self, hook: impl FnOnce() + Send + 'static) {
        self.init_finished.register(Box::new(hook));
    }

    /// The init-finished latch: runs init callbacks once, in order, and
    /// closes registration.
    pub fn finish_init(self) -> LifecycleHooks {
        for hook in self.init_finished {
            hook();
        }
        LifecycleHooks {
            create: self.create.freeze(),
            exit: self.exit.freeze(),
        }
    }
}

impl fmt::Debug for LifecycleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleRegistry")
            .field("create", &self.create.len())
            .field("exit", &self.exit.len())
            .field("init_finished", &self.init_finished.len())
            .finish()
    }
}

/// Frozen lifecycle callbacks; read without locks.
#[derive(Clone, Debug)]
pub struct LifecycleHooks {
    create: Frozen<CreateHook>,
    exit: Frozen<ExitHook>,
}

impl LifecycleHooks {
    pub fn none() -> Self {
        LifecycleRegistry::new().finish_init()
    }
}

static INSTALLED: OnceLock<LifecycleHooks> = OnceLock::new();

/// Publish hooks process-wide; only the first call wins.
pub fn install(hooks: LifecycleHooks) -> Result<&'static LifecycleHooks, LifecycleHooks> {
    let mut pending = Some(hooks);
    let current = INSTALLED.get_or_init(|| pending.take().unwrap_or_else(LifecycleHooks::none));
    match pending {
        None => Ok(current),
        Some(rejected) => Err(rejected),
    }
}

pub fn installed() -> Option<&'static LifecycleHooks> {
    INSTALLED.get()
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    #[error("goroutine {0} is not live")]
    NotLive(GoroutineId),

    #[error("the system goroutine cannot exit")]
    SystemExit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Live,
    Dead,
}

#[derive(Debug)]
struct G {
    goid: GoroutineId,
    status: Status,
    table: SideTable,
}

/// Single-threaded scheduler model driving the lifecycle hooks.
#[derive(Debug)]
pub struct Scheduler {
    hooks: LifecycleHooks,
    slots: Vec<G>,
    free: Vec<usize>,
    by_id: HashMap<GoroutineId, usize>,
    next_goid: u64,
    current: usize,
}

const SYSTEM_SLOT: usize = 0;

impl Scheduler {
    /// A scheduler running the main goroutine.
    pub fn new(hooks: LifecycleHooks) -> Self {
        let mut sched = Self {
            hooks,
            slots: Vec::new(),
            free: Vec::new(),
            by_id: HashMap::new(),
            next_goid: 0,
            current: SYSTEM_SLOT,
        };
        sched.alloc();
        sched.current = sched.alloc();
        sched
    }

    pub fn current(&self) -> GoroutineId {
        self.slots[self.current].goid
    }

    pub fn switch_to(&mut self, id: GoroutineId) -> Result<(), SchedError> {
        self.current = self.slot(id)?;
        Ok(())
    }

    /// Execute a `go` statement on the current goroutine.
    pub fn spawn(&mut self) -> GoroutineId {
        // read before moving onto g0, where getg() would answer g0
        let parent_slot = self.current;
        let parent = self.slots[parent_slot].goid;

        self.current = SYSTEM_SLOT;
        let child_slot = self.alloc();
        self.current = parent_slot;

        let child = self.slots[child_slot].goid;
        trace!(%parent, %child, slot = child_slot, "goroutine created");

        let (parent_g, child_g) = pair_mut(&mut self.slots, parent_slot, child_slot);
        let mut event = CreateEvent {
            parent,
            child,
            parent_table: &parent_g.table,
            child_table: &mut child_g.table,
        };
        for hook in &self.hooks.create {
            hook(&mut event);
        }
        child
    }

    /// The current goroutine returns from its entry function.
    pub fn exit_current(&mut self) -> Result<GoroutineId, SchedError> {
        if self.current == SYSTEM_SLOT {
            return Err(SchedError::SystemExit);
        }
        let slot = self.current;
        let goid = self.slots[slot].goid;

        for hook in &self.hooks.exit {
            hook(goid, &self.slots[slot].table);
        }
        // pooled slots are handed out again without zeroing
        self.slots[slot].table.clear();
        self.slots[slot].status = Status::Dead;

        self.by_id.remove(&goid);
        self.free.push(slot);
        self.current = SYSTEM_SLOT;
        trace!(%goid, slot, "goroutine exited");
        Ok(goid)
    }

    /// Switch to `id` and exit it.
    pub fn exit(&mut self, id: GoroutineId) -> Result<(), SchedError> {
        self.switch_to(id)?;
        self.exit_current().map(|_| ())
    }

    pub fn side_table(&self, id: GoroutineId) -> Option<&SideTable> {
        self.slot(id).ok().map(|s| &self.slots[s].table)
    }

    pub fn side_table_mut(&mut self, id: GoroutineId) -> Option<&mut SideTable> {
        let slot = self.slot(id).ok()?;
        Some(&mut self.slots[slot].table)
    }

    /// Pool slot backing `id`, for observing reuse.
    pub fn slot_of(&self, id: GoroutineId) -> Option<usize> {
        self.slot(id).ok()
    }

    pub fn live(&self) -> usize {
        self.slots.iter().filter(|g| g.status == Status::Live).count()
    }

    fn slot(&self, id: GoroutineId) -> Result<usize, SchedError> {
        self.by_id.get(&id).copied().ok_or(SchedError::NotLive(id))
    }

    fn alloc(&mut self) -> usize {
        let goid = GoroutineId(self.next_goid);
        self.next_goid += 1;

        let slot = match self.free.pop() {
            Some(slot) => {
                let g = &mut self.slots[slot];
                g.goid = goid;
                g.status = Status::Live;
                slot
            }
            None => {
                self.slots.push(G {
                    goid,
                    status: Status::Live,
                    table: SideTable::default(),
                });
                self.slots.len() - 1
            }
        };
        self.by_id.insert(goid, slot);
        slot
    }
}

fn pair_mut<T>(items: &mut [T], shared: usize, exclusive: usize) -> (&T, &mut T) {
    if shared < exclusive {
        let (left, right) = items.split_at_mut(exclusive);
        (&left[shared], &mut right[0])
    } else {
        let (left, right) = items.split_at_mut(shared);
        (&right[0], &mut left[exclusive])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_main_is_running() {
        let sched = Scheduler::new(LifecycleHooks::none());
        assert_eq!(sched.current(), GoroutineId::MAIN);
        assert_eq!(sched.live(), 2);
    }

    #[test]
    fn test_create_callback_sees_spawning_goroutine() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut reg = LifecycleRegistry::new();
        let log = Arc::clone(&seen);
        reg.on_create(move |ev| log.lock().unwrap().push((ev.parent, ev.child)));
        let mut sched = Scheduler::new(reg.finish_init());

        let a = sched.spawn();
        sched.switch_to(a).unwrap();
        let observed = sched.current();
        let b = sched.spawn();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], (GoroutineId::MAIN, a));
        assert_eq!(seen[1], (observed, b));
        assert!(seen.iter().all(|(p, _)| *p != GoroutineId::SYSTEM));
    }

    #[test]
    fn test_reused_slot_starts_zero() {
        let mut sched = Scheduler::new(LifecycleHooks::none());

        let first = sched.spawn();
        let slot = sched.slot_of(first).unwrap();
        let table = sched.side_table_mut(first).unwrap();
        table.set("trace_id", 7u32);
        table.set_loose_json(true);

        sched.exit(first).unwrap();
        sched.switch_to(GoroutineId::MAIN).unwrap();

        let second = sched.spawn();
        assert_eq!(sched.slot_of(second), Some(slot));
        assert_ne!(second, first);
        let table = sched.side_table(second).unwrap();
        assert!(table.is_zero());
        assert_eq!(table.get::<u32>("trace_id"), None);
    }

    #[test]
    fn test_create_callback_populates_child() {
        let mut reg = LifecycleRegistry::new();
        reg.on_create(|ev| {
            let loose = ev.parent_table.loose_json();
            ev.child_table.set_loose_json(loose);
        });
        let mut sched = Scheduler::new(reg.finish_init());

        sched
            .side_table_mut(GoroutineId::MAIN)
            .unwrap()
            .set_loose_json(true);
        let child = sched.spawn();
        assert!(sched.side_table(child).unwrap().loose_json());
    }

    #[test]
    fn test_exit_callbacks_see_table_before_clear() {
        let seen = Arc::new(Mutex::new(None));
        let mut reg = LifecycleRegistry::new();
        let out = Arc::clone(&seen);
        reg.on_exit(move |g, table| {
            *out.lock().unwrap() = Some((g, table.get::<&str>("tag").copied()));
        });
        let mut sched = Scheduler::new(reg.finish_init());

        let g = sched.spawn();
        sched.side_table_mut(g).unwrap().set("tag", "worker");
        sched.exit(g).unwrap();

        assert_eq!(*seen.lock().unwrap(), Some((g, Some("worker"))));
        assert!(sched.side_table(g).is_none());
    }

    #[test]
    fn test_init_hooks_run_once_in_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut reg = LifecycleRegistry::new();
        for i in 0..3 {
            let order = Arc::clone(&order);
            reg.on_init_finished(move || order.lock().unwrap().push(i));
        }
        let _hooks = reg.finish_init();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_system_goroutine_cannot_exit() {
        let mut sched = Scheduler::new(LifecycleHooks::none());
        sched.exit_current().unwrap();
        assert_eq!(sched.exit_current(), Err(SchedError::SystemExit));
        assert_eq!(
            sched.switch_to(GoroutineId::MAIN),
            Err(SchedError::NotLive(GoroutineId::MAIN))
        );
    }

    #[test]
    fn test_install_is_first_wins() {
        let first = install(LifecycleHooks::none());
        assert!(first.is_ok());
        assert!(install(LifecycleHooks::none()).is_err());
        assert!(installed().is_some());
    }
}
