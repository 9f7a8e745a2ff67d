use anyhow::Result;
use wasmtime::{Caller, Linker};

use crate::closure::Task;
use crate::imports::MODULE;
use crate::memory::{read_str, write_result};
use crate::state::HostState;
use crate::value::HostValue;

pub(super) fn register(linker: &mut Linker<HostState>) -> Result<()> {
    linker.func_wrap(MODULE, "document_body", document_body)?;
    linker.func_wrap(MODULE, "create_element", create_element)?;
    linker.func_wrap(MODULE, "get_element_by_id", get_element_by_id)?;
    linker.func_wrap(MODULE, "set_attribute", set_attribute)?;
    linker.func_wrap(MODULE, "get_attribute", get_attribute)?;
    linker.func_wrap(MODULE, "append_child", append_child)?;
    linker.func_wrap(MODULE, "remove_child", remove_child)?;
    linker.func_wrap(MODULE, "set_inner_text", set_inner_text)?;
    linker.func_wrap(MODULE, "element_width", element_width)?;
    linker.func_wrap(MODULE, "element_height", element_height)?;
    linker.func_wrap(MODULE, "request_animation_frame", request_animation_frame)?;
    linker.func_wrap(MODULE, "cancel_animation_frame", cancel_animation_frame)?;
    linker.func_wrap(MODULE, "queue_microtask", queue_microtask)?;
    Ok(())
}

fn document_body(mut caller: Caller<'_, HostState>) -> i32 {
    let state = caller.data_mut();
    let body = state.platform().document().body();
    state.box_value(HostValue::Element(body)).to_abi()
}

fn create_element(mut caller: Caller<'_, HostState>, ptr: i32, len: i32, ret_ptr: i32) -> Result<()> {
    let tag = read_str(&mut caller, ptr, len)?;
    let outcome = caller
        .data()
        .platform()
        .document()
        .create_element(&tag)
        .map(HostValue::Element);
    write_result(&mut caller, ret_ptr, outcome)
}

/// `null` when no element carries the id.
fn get_element_by_id(mut caller: Caller<'_, HostState>, ptr: i32, len: i32) -> Result<i32> {
    let id = read_str(&mut caller, ptr, len)?;
    let state = caller.data_mut();
    let value = state
        .platform()
        .document()
        .element_by_id(&id)
        .map_or(HostValue::Null, HostValue::Element);
    Ok(state.box_value(value).to_abi())
}

fn set_attribute(
    mut caller: Caller<'_, HostState>,
    element: i32,
    name_ptr: i32,
    name_len: i32,
    value_ptr: i32,
    value_len: i32,
    ret_ptr: i32,
) -> Result<()> {
    let element = caller.data().element(element)?;
    let name = read_str(&mut caller, name_ptr, name_len)?;
    let value = read_str(&mut caller, value_ptr, value_len)?;
    let outcome = caller
        .data()
        .platform()
        .document()
        .set_attribute(element, &name, &value)
        .map(|()| HostValue::Undefined);
    write_result(&mut caller, ret_ptr, outcome)
}

/// The slot holds the attribute as a string, or `null` when it is absent.
fn get_attribute(
    mut caller: Caller<'_, HostState>,
    element: i32,
    name_ptr: i32,
    name_len: i32,
    ret_ptr: i32,
) -> Result<()> {
    let element = caller.data().element(element)?;
    let name = read_str(&mut caller, name_ptr, name_len)?;
    let outcome = caller
        .data()
        .platform()
        .document()
        .attribute(element, &name)
        .map(|value| value.map_or(HostValue::Null, HostValue::string));
    write_result(&mut caller, ret_ptr, outcome)
}

fn append_child(mut caller: Caller<'_, HostState>, parent: i32, child: i32, ret_ptr: i32) -> Result<()> {
    let state = caller.data();
    let (parent, child) = (state.element(parent)?, state.element(child)?);
    let outcome = state
        .platform()
        .document()
        .append_child(parent, child)
        .map(|()| HostValue::Undefined);
    write_result(&mut caller, ret_ptr, outcome)
}

fn remove_child(mut caller: Caller<'_, HostState>, parent: i32, child: i32, ret_ptr: i32) -> Result<()> {
    let state = caller.data();
    let (parent, child) = (state.element(parent)?, state.element(child)?);
    let outcome = state
        .platform()
        .document()
        .remove_child(parent, child)
        .map(|()| HostValue::Undefined);
    write_result(&mut caller, ret_ptr, outcome)
}

fn set_inner_text(
    mut caller: Caller<'_, HostState>,
    element: i32,
    ptr: i32,
    len: i32,
    ret_ptr: i32,
) -> Result<()> {
    let element = caller.data().element(element)?;
    let text = read_str(&mut caller, ptr, len)?;
    let outcome = caller
        .data()
        .platform()
        .document()
        .set_inner_text(element, &text)
        .map(|()| HostValue::Undefined);
    write_result(&mut caller, ret_ptr, outcome)
}

/// The slot holds the width as a number.
fn element_width(mut caller: Caller<'_, HostState>, element: i32, ret_ptr: i32) -> Result<()> {
    let element = caller.data().element(element)?;
    let outcome = caller
        .data()
        .platform()
        .document()
        .size(element)
        .map(|(width, _)| HostValue::Number(width));
    write_result(&mut caller, ret_ptr, outcome)
}

/// The slot holds the height as a number.
fn element_height(mut caller: Caller<'_, HostState>, element: i32, ret_ptr: i32) -> Result<()> {
    let element = caller.data().element(element)?;
    let outcome = caller
        .data()
        .platform()
        .document()
        .size(element)
        .map(|(_, height)| HostValue::Number(height));
    write_result(&mut caller, ret_ptr, outcome)
}

fn request_animation_frame(mut caller: Caller<'_, HostState>, callback: i32) -> Result<i32> {
    let state = caller.data_mut();
    let callback = state.closure(callback)?;
    Ok(state.request_frame(callback))
}

fn cancel_animation_frame(mut caller: Caller<'_, HostState>, id: i32) {
    caller.data_mut().cancel_frame(id);
}

fn queue_microtask(mut caller: Caller<'_, HostState>, callback: i32) -> Result<()> {
    let state = caller.data_mut();
    let callback = state.closure(callback)?;
    state.microtasks.push_back(Task {
        callback,
        arg: HostValue::Undefined,
    });
    Ok(())
}
