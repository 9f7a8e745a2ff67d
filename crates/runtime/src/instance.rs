use anyhow::Result;
use boundary::{GuestSlice, Handle, MemoryView};
use platform::Platform;
use std::rc::Weak;
use wasmtime::{Store, TypedFunc, WasmParams, WasmResults};

use crate::closure::{self, ClosureError, ClosureRef, Task};
use crate::memory::{self, ResultSlot};
use crate::state::HostState;
use crate::value::HostValue;

/// A running guest module together with its host context.
pub struct Instance {
    store: Store<HostState>,
    instance: wasmtime::Instance,
}

impl Instance {
    pub(crate) fn new(store: Store<HostState>, instance: wasmtime::Instance) -> Self {
        Self { store, instance }
    }

    pub fn platform(&self) -> &dyn Platform {
        self.store.data().platform()
    }

    pub fn state(&self) -> &HostState {
        self.store.data()
    }

    pub fn typed_func<P, R>(&mut self, name: &str) -> Result<TypedFunc<P, R>>
    where
        P: WasmParams,
        R: WasmResults,
    {
        self.instance.get_typed_func::<P, R>(&mut self.store, name)
    }

    /// Call an exported function. Traps come back as errors.
    pub fn call<P, R>(&mut self, name: &str, params: P) -> Result<R>
    where
        P: WasmParams,
        R: WasmResults,
    {
        let func = self.typed_func::<P, R>(name)?;
        func.call(&mut self.store, params)
    }

    pub fn value(&self, handle: Handle) -> boundary::Result<&HostValue> {
        self.store.data().value(handle)
    }

    pub fn box_value(&mut self, value: HostValue) -> Handle {
        self.store.data_mut().box_value(value)
    }

    pub fn release(&mut self, handle: Handle) -> boundary::Result<Option<HostValue>> {
        self.store.data_mut().values.release(handle)
    }

    pub fn live_handles(&self) -> usize {
        self.store.data().live_handles()
    }

    pub fn read_string(&mut self, ptr: u32, len: u32) -> Result<String> {
        memory::read_str(&mut self.store, ptr as i32, len as i32)
    }

    /// Copy `text` into a fresh guest allocation.
    pub fn pass_string(&mut self, text: &str) -> Result<GuestSlice> {
        memory::pass_str(&mut self.store, text)
    }

    /// Decode a guest-owned string and hand the buffer back to the guest
    /// allocator when it exports `bridge_free`.
    pub fn take_string(&mut self, slice: GuestSlice) -> Result<String> {
        let text = self.read_string(slice.ptr, slice.len)?;
        let free = self.store.data().exports()?.free.clone();
        if let Some(free) = free {
            free.call(&mut self.store, (slice.ptr as i32, slice.len as i32, 1))?;
        }
        Ok(text)
    }

    pub fn read_result_slot(&mut self, ptr: u32) -> Result<ResultSlot> {
        memory::with_view(&mut self.store, |view, data| ResultSlot::read(view, data, ptr))
    }

    pub fn read_bytes(&mut self, ptr: u32, len: u32) -> Result<Vec<u8>> {
        memory::read_bytes(&mut self.store, ptr as i32, len as i32)
    }

    /// The current view of linear memory, rebuilt if the memory grew.
    pub fn memory_view(&mut self) -> Result<MemoryView> {
        memory::with_view(&mut self.store, |view, _| Ok(view))
    }

    /// Fails with `StaleView` when `view` predates a memory growth.
    pub fn validate_view(&mut self, view: MemoryView) -> Result<()> {
        let memory = self.store.data().exports()?.memory;
        let len = memory.data_size(&self.store);
        let views = &mut self.store.data_mut().views;
        views.refresh(len);
        Ok(views.validate(view)?)
    }

    pub fn pending_operations(&self) -> usize {
        self.store.data().pending.in_flight()
    }

    pub fn unsettled_promises(&self) -> usize {
        self.store.data().pending.unsettled()
    }

    /// Run queued microtasks, including ones they queue, until none are left.
    pub fn run_microtasks(&mut self) -> Result<usize> {
        let mut ran = 0;
        while let Some(task) = self.store.data_mut().microtasks.pop_front() {
            ran += self.run_task(task)?;
        }
        Ok(ran)
    }

    /// Drive host futures to completion, delivering each settlement to the
    /// guest as its own turn followed by a microtask checkpoint. Returns the
    /// number of guest callbacks that ran.
    pub async fn run_until_idle(&mut self) -> Result<usize> {
        let mut ran = self.run_microtasks()?;
        loop {
            let next = self.store.data_mut().pending.next_completion().await;
            let Some((id, settlement)) = next else {
                break;
            };
            tracing::debug!(promise = id.0, ok = settlement.is_ok(), "host operation settled");
            let tasks = self.store.data_mut().pending.settle(id, settlement);
            for task in tasks {
                ran += self.run_task(task)?;
            }
            ran += self.run_microtasks()?;
        }
        Ok(ran)
    }

    /// Run one animation frame: the callbacks requested before this tick,
    /// then resize observations, then microtasks. Frames requested from a
    /// callback wait for the next tick.
    pub fn tick_frame(&mut self, timestamp: f64) -> Result<usize> {
        let frames = std::mem::take(&mut self.store.data_mut().frames);
        let mut ran = 0;
        for (_, callback) in frames {
            ran += self.run_task(Task {
                callback,
                arg: HostValue::Number(timestamp),
            })?;
        }
        ran += self.deliver_resize_observations()?;
        ran += self.run_microtasks()?;
        Ok(ran)
    }

    /// Report elements whose size changed since the last delivery, as an
    /// array of `{ target, width, height }` per observer.
    pub fn deliver_resize_observations(&mut self) -> Result<usize> {
        let mut deliveries: Vec<(ClosureRef, HostValue)> = Vec::new();
        {
            let state = self.store.data_mut();
            state.prune_observers();
            let platform = state.platform.clone();
            for observer in state.observers.values().filter_map(Weak::upgrade) {
                let mut entries = Vec::new();
                for (target, last) in observer.targets.borrow_mut().iter_mut() {
                    let size = match platform.document().size(*target) {
                        Ok(size) => size,
                        Err(err) => {
                            tracing::debug!(element = target.0, "skipping resize target: {err:#}");
                            continue;
                        }
                    };
                    if *last == Some(size) {
                        continue;
                    }
                    *last = Some(size);
                    entries.push(HostValue::object([
                        ("target".to_string(), HostValue::Element(*target)),
                        ("width".to_string(), HostValue::Number(size.0)),
                        ("height".to_string(), HostValue::Number(size.1)),
                    ]));
                }
                if !entries.is_empty() {
                    deliveries.push((observer.callback.clone(), HostValue::array(entries)));
                }
            }
        }

        let mut ran = 0;
        for (callback, arg) in deliveries {
            ran += self.run_task(Task { callback, arg })?;
        }
        Ok(ran)
    }

    /// Run the destructor of every closure the guest still holds. Returns
    /// how many ran.
    pub fn shutdown(mut self) -> Result<usize> {
        let closures = std::mem::take(&mut self.store.data_mut().closures);
        let mut destroyed = 0;
        for closure in closures {
            if closure::destroy(&mut self.store, &closure)? {
                destroyed += 1;
            }
        }
        tracing::debug!(destroyed, live = self.live_handles(), "instance shut down");
        Ok(destroyed)
    }

    /// A callback dropped while its event was queued is skipped.
    fn run_task(&mut self, task: Task) -> Result<usize> {
        match closure::invoke(&mut self.store, &task.callback, task.arg) {
            Ok(()) => Ok(1),
            Err(err) if err.downcast_ref::<ClosureError>() == Some(&ClosureError::Dropped) => {
                tracing::warn!("skipping callback that was dropped before it ran");
                Ok(0)
            }
            Err(err) => Err(err),
        }
    }
}
