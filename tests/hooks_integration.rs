//! Runtime hook model: lifecycle callbacks driving trap dispatch.

use goroot_patcher::hooks::{
    capture, Call, Flow, FuncKey, GoroutineId, Interceptor, LifecycleRegistry, Mock, Scheduler,
    SharedInterceptor, TrapRegistry,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

struct Counter(AtomicUsize);

impl Interceptor for Counter {
    fn pre(&self, _call: &mut Call) -> Flow {
        self.0.fetch_add(1, Ordering::SeqCst);
        Flow::Continue
    }
}

fn fetch() -> FuncKey {
    FuncKey::method("example.com/app/client", "*Client", "Fetch")
}

#[test]
fn test_goroutine_local_mock_is_inherited_but_not_leaked() {
    // children inherit the parent's local interceptors, like a context
    let mut lifecycle = LifecycleRegistry::new();
    lifecycle.on_create(|ev| {
        let inherited = ev.parent_table.interceptors_for(&fetch());
        let inherited: Vec<SharedInterceptor> = inherited.into_iter().cloned().collect();
        for interceptor in inherited {
            ev.child_table.add_interceptor(fetch(), interceptor);
        }
    });
    let mut sched = Scheduler::new(lifecycle.finish_init());
    let traps = TrapRegistry::new().freeze();

    let worker = sched.spawn();
    sched.switch_to(worker).unwrap();
    sched
        .side_table_mut(worker)
        .unwrap()
        .add_interceptor(fetch(), Arc::new(Mock::returning(vec![json!("cached")])));

    let child = sched.spawn();
    let mut call = Call::new(fetch(), vec![json!("/users")]);
    let d = traps.dispatch(sched.side_table(child).unwrap(), &mut call, |c| {
        c.results = vec![json!("network")]
    });
    assert!(!d.original_ran);
    assert_eq!(call.results, vec![json!("cached")]);

    // main never had the mock
    let mut call = Call::new(fetch(), vec![]);
    traps.dispatch(sched.side_table(GoroutineId::MAIN).unwrap(), &mut call, |c| {
        c.results = vec![json!("network")]
    });
    assert_eq!(call.results, vec![json!("network")]);

    // a goroutine reusing the worker's slot starts clean
    sched.exit(child).unwrap();
    sched.exit(worker).unwrap();
    sched.switch_to(GoroutineId::MAIN).unwrap();
    let fresh = sched.spawn();
    assert!(sched.side_table(fresh).unwrap().is_zero());
}

#[test]
fn test_global_interceptors_count_every_goroutine() {
    let counter = Arc::new(Counter(AtomicUsize::new(0)));
    let mut registry = TrapRegistry::new();
    registry.register(fetch(), counter.clone());
    let traps = registry.freeze();
    assert!(traps.is_trapped(&fetch()));

    let mut sched = Scheduler::new(LifecycleRegistry::new().finish_init());
    let ids: Vec<_> = (0..3).map(|_| sched.spawn()).collect();
    for id in &ids {
        let mut call = Call::new(fetch(), vec![]);
        traps.dispatch(sched.side_table(*id).unwrap(), &mut call, |_| {});
    }
    assert_eq!(counter.0.load(Ordering::SeqCst), 3);
}

#[test]
fn test_exit_hook_records_every_exit_once() {
    let exits = Arc::new(Mutex::new(Vec::new()));
    let mut lifecycle = LifecycleRegistry::new();
    let log = Arc::clone(&exits);
    lifecycle.on_exit(move |g, _| log.lock().unwrap().push(g));
    let mut sched = Scheduler::new(lifecycle.finish_init());

    let a = sched.spawn();
    let b = sched.spawn();
    sched.exit(b).unwrap();
    sched.exit(a).unwrap();
    assert!(sched.exit(a).is_err());

    assert_eq!(*exits.lock().unwrap(), vec![b, a]);
}

#[test]
fn test_loose_capture_follows_goroutine_flag() {
    let mut lifecycle = LifecycleRegistry::new();
    lifecycle.on_create(|ev| {
        let loose = ev.parent_table.loose_json();
        ev.child_table.set_loose_json(loose);
    });
    let mut sched = Scheduler::new(lifecycle.finish_init());
    sched
        .side_table_mut(GoroutineId::MAIN)
        .unwrap()
        .set_loose_json(true);
    let child = sched.spawn();

    let mut unsupported = BTreeMap::new();
    unsupported.insert((1, 2), "tuple keys");

    let value = capture(sched.side_table(child).unwrap(), &unsupported).unwrap();
    assert!(value.as_str().unwrap().starts_with("<unsupported:"));

    sched.exit(child).unwrap();
    sched.switch_to(GoroutineId::MAIN).unwrap();
    sched
        .side_table_mut(GoroutineId::MAIN)
        .unwrap()
        .set_loose_json(false);
    let strict = sched.spawn();
    assert!(capture(sched.side_table(strict).unwrap(), &unsupported).is_err());
}
