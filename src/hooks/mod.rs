//! Host-side model of the runtime hooks woven into a patched toolchain.
//!
//! The runtime bundle adds a hidden side table to every goroutine, lifecycle
//! callbacks around goroutine creation and exit, and a trap entry point that
//! instrumented functions call. This module reproduces those semantics so
//! they can be exercised and tested without a Go toolchain.

pub mod goroutine;
pub mod registry;
pub mod trap;

pub use goroutine::{
    install, installed, CreateEvent, GoroutineId, LifecycleHooks, LifecycleRegistry, SchedError,
    Scheduler, SideTable,
};
pub use registry::{Frozen, Registry};
pub use trap::{
    capture, Call, Dispatched, Flow, FuncKey, Interceptor, Mock, SharedInterceptor, TrapRegistry,
    TrapTable,
};
