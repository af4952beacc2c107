//! Interceptor dispatch for trapped calls.
//!
//! Every instrumented function calls the runtime trap with its identity and
//! captured arguments. Interceptors registered for that identity run around
//! the original body and may replace its results.

use crate::hooks::goroutine::SideTable;
use crate::hooks::registry::{Frozen, Registry};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Package-qualified function identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncKey {
    pub pkg: String,
    pub name: String,
    /// Receiver type for methods, e.g. `*Client`
    pub recv: Option<String>,
}

impl FuncKey {
    pub fn func(pkg: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            pkg: pkg.into(),
            name: name.into(),
            recv: None,
        }
    }

    pub fn method(pkg: impl Into<String>, recv: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            pkg: pkg.into(),
            name: name.into(),
            recv: Some(recv.into()),
        }
    }
}

impl fmt::Display for FuncKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.recv {
            Some(recv) if recv.starts_with('*') => write!(f, "{}.({}).{}", self.pkg, recv, self.name),
            Some(recv) => write!(f, "{}.{}.{}", self.pkg, recv, self.name),
            None => write!(f, "{}.{}", self.pkg, self.name),
        }
    }
}

/// A trapped call in flight.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub key: FuncKey,
    pub args: Vec<Value>,
    pub results: Vec<Value>,
}

impl Call {
    pub fn new(key: FuncKey, args: Vec<Value>) -> Self {
        Self {
            key,
            args,
            results: Vec::new(),
        }
    }
}

/// What a pre-hook decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Run the remaining interceptors and the original body
    Continue,
    /// Skip the original body; `Call::results` holds the answer
    Return,
}

pub trait Interceptor: Send + Sync {
    fn pre(&self, _call: &mut Call) -> Flow {
        Flow::Continue
    }

    fn post(&self, _call: &mut Call) {}
}

/// Fixed results, skipping the original body.
#[derive(Debug, Clone)]
pub struct Mock {
    results: Vec<Value>,
}

impl Mock {
    pub fn returning(results: Vec<Value>) -> Self {
        Self { results }
    }
}

impl Interceptor for Mock {
    fn pre(&self, call: &mut Call) -> Flow {
        call.results = self.results.clone();
        Flow::Return
    }
}

pub type SharedInterceptor = Arc<dyn Interceptor>;

/// Result of [`TrapTable::dispatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatched {
    pub interceptors: usize,
    pub original_ran: bool,
}

/// Global interceptors, open for registration during init.
#[derive(Default)]
pub struct TrapRegistry {
    by_key: HashMap<FuncKey, Registry<SharedInterceptor>>,
}

impl TrapRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: FuncKey, interceptor: SharedInterceptor) {
        self.by_key.entry(key).or_default().register(interceptor);
    }

    pub fn freeze(self) -> TrapTable {
        TrapTable {
            by_key: self
                .by_key
                .into_iter()
                .map(|(k, reg)| (k, reg.freeze()))
                .collect(),
        }
    }
}

/// Frozen global interceptors.
#[derive(Clone, Default)]
pub struct TrapTable {
    by_key: HashMap<FuncKey, Frozen<SharedInterceptor>>,
}

impl fmt::Debug for TrapTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrapTable").field("keys", &self.by_key.len()).finish()
    }
}

impl TrapTable {
    pub fn is_trapped(&self, key: &FuncKey) -> bool {
        self.by_key.contains_key(key)
    }

    /// Run interceptors around `original`.
    ///
    /// Goroutine-local interceptors from `locals` run before global ones.
    /// Post-hooks run in reverse order, only for interceptors whose pre-hook
    /// ran.
    pub fn dispatch(
        &self,
        locals: &SideTable,
        call: &mut Call,
        original: impl FnOnce(&mut Call),
    ) -> Dispatched {
        let mut chain = locals.interceptors_for(&call.key);
        if let Some(global) = self.by_key.get(&call.key) {
            chain.extend(global.iter());
        }

        let mut entered = 0;
        let mut short_circuit = false;
        for interceptor in &chain {
            entered += 1;
            if interceptor.pre(call) == Flow::Return {
                short_circuit = true;
                break;
            }
        }

        if !short_circuit {
            original(call);
        }

        for interceptor in chain[..entered].iter().rev() {
            interceptor.post(call);
        }

        Dispatched {
            interceptors: entered,
            original_ran: !short_circuit,
        }
    }
}

/// Capture a value as JSON for a trapped call.
///
/// With loose marshaling enabled on the goroutine, a value that cannot be
/// encoded becomes a placeholder string instead of an error.
pub fn capture<T: Serialize + ?Sized>(locals: &SideTable, value: &T) -> Result<Value, serde_json::Error> {
    match serde_json::to_value(value) {
        Ok(v) => Ok(v),
        Err(e) if locals.loose_json() => Ok(Value::String(format!("<unsupported: {e}>"))),
        Err(e) => Err(e),
    }
}
