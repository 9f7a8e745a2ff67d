use anyhow::{Result, anyhow};
use boundary::{Handle, HandleTable, MemoryViews, Utf8Decoder};
use platform::{ElementId, FetchRequest, FetchResponse, FileInfo, Platform};
use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::{Rc, Weak};
use std::sync::Arc;
use wasmtime::{Memory, StoreLimits, StoreLimitsBuilder, Table, TypedFunc};

use crate::closure::{ClosureRef, Task};
use crate::config::BridgeConfig;
use crate::pending::{PendingOps, PromiseRef};
use crate::value::{HostValue, ObserverId};

pub const UNDEFINED: Handle = Handle::from_raw(0);
pub const NULL: Handle = Handle::from_raw(1);
pub const TRUE: Handle = Handle::from_raw(2);
pub const FALSE: Handle = Handle::from_raw(3);

/// The guest exports the host calls back into.
#[derive(Clone)]
pub(crate) struct GuestExports {
    pub memory: Memory,
    pub malloc: TypedFunc<(i32, i32), i32>,
    pub realloc: TypedFunc<(i32, i32, i32, i32), i32>,
    pub free: Option<TypedFunc<(i32, i32, i32), ()>>,
    pub table: Option<Table>,
    pub start: Option<TypedFunc<(), ()>>,
}

/// Shared by every handle to the observer. Only observers with targets are
/// registered with the host state, and only weakly.
#[derive(Debug)]
pub struct ResizeObserver {
    pub(crate) id: ObserverId,
    pub(crate) callback: ClosureRef,
    /// Observed elements with the size last reported for each.
    pub(crate) targets: RefCell<Vec<(ElementId, Option<(f64, f64)>)>>,
}

pub type ObserverRef = Rc<ResizeObserver>;

/// Per-instance host context, owned by the wasmtime store.
pub struct HostState {
    pub(crate) values: HandleTable<HostValue>,
    pub(crate) decoder: Utf8Decoder,
    pub(crate) views: MemoryViews,
    pub(crate) platform: Arc<dyn Platform>,
    pub(crate) exports: Option<GuestExports>,
    pub(crate) pending: PendingOps,
    pub(crate) microtasks: VecDeque<Task>,
    pub(crate) frames: Vec<(i32, ClosureRef)>,
    next_frame: i32,
    pub(crate) observers: BTreeMap<ObserverId, Weak<ResizeObserver>>,
    next_observer: u32,
    pub(crate) closures: Vec<ClosureRef>,
    pub(crate) limits: StoreLimits,
}

impl HostState {
    pub fn new(platform: Arc<dyn Platform>, config: &BridgeConfig) -> Self {
        let limits = match config.max_memory_bytes {
            Some(bytes) => StoreLimitsBuilder::new().memory_size(bytes).build(),
            None => StoreLimits::default(),
        };
        Self {
            values: HandleTable::with_reserved([
                HostValue::Undefined,
                HostValue::Null,
                HostValue::Bool(true),
                HostValue::Bool(false),
            ]),
            decoder: Utf8Decoder::new(config.decoder_reset_bytes),
            views: MemoryViews::new(),
            platform,
            exports: None,
            pending: PendingOps::default(),
            microtasks: VecDeque::new(),
            frames: Vec::new(),
            next_frame: 0,
            observers: BTreeMap::new(),
            next_observer: 0,
            closures: Vec::new(),
            limits,
        }
    }

    pub fn platform(&self) -> &dyn Platform {
        self.platform.as_ref()
    }

    /// Box a value for the guest. Constants map onto their reserved handles.
    pub fn box_value(&mut self, value: HostValue) -> Handle {
        match value {
            HostValue::Undefined => UNDEFINED,
            HostValue::Null => NULL,
            HostValue::Bool(true) => TRUE,
            HostValue::Bool(false) => FALSE,
            value => self.values.insert(value),
        }
    }

    pub fn value(&self, handle: Handle) -> boundary::Result<&HostValue> {
        self.values.get(handle)
    }

    pub fn live_handles(&self) -> usize {
        self.values.live()
    }

    pub fn decoder(&self) -> &Utf8Decoder {
        &self.decoder
    }

    pub(crate) fn get(&self, raw: i32) -> boundary::Result<&HostValue> {
        self.values.get(Handle::from_abi(raw))
    }

    pub(crate) fn exports(&self) -> Result<&GuestExports> {
        self.exports
            .as_ref()
            .ok_or_else(|| anyhow!("guest exports are not bound yet"))
    }

    pub(crate) fn bind(&mut self, exports: GuestExports) {
        self.exports = Some(exports);
        self.views.invalidate();
    }

    pub(crate) fn register_closure(&mut self, closure: ClosureRef) {
        self.closures.retain(|existing| !existing.borrow().is_destroyed());
        self.closures.push(closure);
    }

    pub(crate) fn request_frame(&mut self, callback: ClosureRef) -> i32 {
        self.next_frame += 1;
        self.frames.push((self.next_frame, callback));
        self.next_frame
    }

    pub(crate) fn cancel_frame(&mut self, id: i32) {
        self.frames.retain(|(frame, _)| *frame != id);
    }

    pub(crate) fn new_observer(&mut self, callback: ClosureRef) -> ObserverRef {
        self.next_observer += 1;
        Rc::new(ResizeObserver {
            id: ObserverId(self.next_observer),
            callback,
            targets: RefCell::new(Vec::new()),
        })
    }

    pub(crate) fn connect_observer(&mut self, observer: &ObserverRef) {
        self.prune_observers();
        self.observers.insert(observer.id, Rc::downgrade(observer));
    }

    pub(crate) fn disconnect_observer(&mut self, observer: &ResizeObserver) {
        observer.targets.borrow_mut().clear();
        self.observers.remove(&observer.id);
    }

    /// Forget observers whose last handle is gone.
    pub(crate) fn prune_observers(&mut self) {
        self.observers.retain(|_, observer| observer.strong_count() > 0);
    }

    /// Observers still reachable from the guest and watching something.
    pub fn connected_observers(&self) -> usize {
        self.observers
            .values()
            .filter(|observer| observer.strong_count() > 0)
            .count()
    }

    pub(crate) fn element(&self, raw: i32) -> Result<ElementId> {
        match self.get(raw)? {
            HostValue::Element(element) => Ok(*element),
            other => Err(mismatch(raw, "an element", other)),
        }
    }

    pub(crate) fn closure(&self, raw: i32) -> Result<ClosureRef> {
        match self.get(raw)? {
            HostValue::Closure(closure) => Ok(closure.clone()),
            other => Err(mismatch(raw, "a function", other)),
        }
    }

    /// Like [`HostState::closure`], but `undefined` and `null` mean "no
    /// callback".
    pub(crate) fn optional_closure(&self, raw: i32) -> Result<Option<ClosureRef>> {
        match self.get(raw)? {
            HostValue::Undefined | HostValue::Null => Ok(None),
            _ => self.closure(raw).map(Some),
        }
    }

    pub(crate) fn request(&self, raw: i32) -> Result<Rc<RefCell<FetchRequest>>> {
        match self.get(raw)? {
            HostValue::Request(request) => Ok(request.clone()),
            other => Err(mismatch(raw, "a request", other)),
        }
    }

    pub(crate) fn response(&self, raw: i32) -> Result<Rc<FetchResponse>> {
        match self.get(raw)? {
            HostValue::Response(response) => Ok(response.clone()),
            other => Err(mismatch(raw, "a response", other)),
        }
    }

    pub(crate) fn promise(&self, raw: i32) -> Result<PromiseRef> {
        match self.get(raw)? {
            HostValue::Promise(promise) => Ok(promise.clone()),
            other => Err(mismatch(raw, "a promise", other)),
        }
    }

    pub(crate) fn array(&self, raw: i32) -> Result<Rc<RefCell<Vec<HostValue>>>> {
        match self.get(raw)? {
            HostValue::Array(items) => Ok(items.clone()),
            other => Err(mismatch(raw, "an array", other)),
        }
    }

    pub(crate) fn bytes(&self, raw: i32) -> Result<Rc<[u8]>> {
        match self.get(raw)? {
            HostValue::Bytes(bytes) => Ok(bytes.clone()),
            other => Err(mismatch(raw, "a byte array", other)),
        }
    }

    pub(crate) fn file(&self, raw: i32) -> Result<Rc<FileInfo>> {
        match self.get(raw)? {
            HostValue::File(file) => Ok(file.clone()),
            other => Err(mismatch(raw, "a file", other)),
        }
    }

    pub(crate) fn observer(&self, raw: i32) -> Result<ObserverRef> {
        match self.get(raw)? {
            HostValue::Observer(observer) => Ok(observer.clone()),
            other => Err(mismatch(raw, "a resize observer", other)),
        }
    }
}

fn mismatch(raw: i32, expected: &str, found: &HostValue) -> anyhow::Error {
    let kind = match found {
        HostValue::Undefined => "undefined",
        HostValue::Null => "null",
        HostValue::Bool(_) => "a boolean",
        HostValue::Number(_) => "a number",
        HostValue::String(_) => "a string",
        HostValue::Bytes(_) => "a byte array",
        HostValue::Array(_) => "an array",
        HostValue::Object(_) => "an object",
        HostValue::Error(_) => "an error",
        HostValue::Element(_) => "an element",
        HostValue::Request(_) => "a request",
        HostValue::Response(_) => "a response",
        HostValue::Promise(_) => "a promise",
        HostValue::Closure(_) => "a function",
        HostValue::Observer(_) => "a resize observer",
        HostValue::File(_) => "a file",
    };
    anyhow!("handle {} is {kind}, expected {expected}", Handle::from_abi(raw))
}
