use anyhow::{Result, anyhow, bail};
use boundary::Handle;
use platform::FetchRequest;
use std::cell::RefCell;
use std::rc::Rc;
use wasmtime::{Caller, Linker};

use crate::imports::MODULE;
use crate::memory::{read_str, write_result, write_str};
use crate::state::HostState;
use crate::value::{HostError, HostValue};

pub(super) fn register(linker: &mut Linker<HostState>) -> Result<()> {
    linker.func_wrap(MODULE, "request_new", request_new)?;
    linker.func_wrap(MODULE, "request_set_header", request_set_header)?;
    linker.func_wrap(MODULE, "request_set_body", request_set_body)?;
    linker.func_wrap(MODULE, "fetch", fetch)?;
    linker.func_wrap(MODULE, "response_status", response_status)?;
    linker.func_wrap(MODULE, "response_ok", response_ok)?;
    linker.func_wrap(MODULE, "response_header", response_header)?;
    linker.func_wrap(MODULE, "response_bytes", response_bytes)?;
    linker.func_wrap(MODULE, "promise_then", promise_then)?;
    Ok(())
}

const STANDARD_METHODS: &[&str] = &["DELETE", "GET", "HEAD", "OPTIONS", "POST", "PUT", "PATCH"];

/// Standard methods are case-normalized; anything else must be a valid
/// token and is kept as written.
fn normalize_method(method: &str) -> Result<String> {
    if method.is_empty() {
        return Ok("GET".to_string());
    }
    let token = method.bytes().all(|b| {
        b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
    });
    if !token {
        bail!("TypeError: '{method}' is not a valid HTTP method");
    }
    let upper = method.to_ascii_uppercase();
    Ok(if STANDARD_METHODS.contains(&upper.as_str()) {
        upper
    } else {
        method.to_string()
    })
}

fn request_new(
    mut caller: Caller<'_, HostState>,
    url_ptr: i32,
    url_len: i32,
    method_ptr: i32,
    method_len: i32,
    ret_ptr: i32,
) -> Result<()> {
    let url = read_str(&mut caller, url_ptr, url_len)?;
    let method = read_str(&mut caller, method_ptr, method_len)?;
    let outcome = normalize_method(&method).and_then(|method| {
        if url.is_empty() {
            bail!("TypeError: request url is empty");
        }
        let request = FetchRequest {
            method,
            ..FetchRequest::get(url)
        };
        Ok(HostValue::Request(Rc::new(RefCell::new(request))))
    });
    write_result(&mut caller, ret_ptr, outcome)
}

fn request_set_header(
    mut caller: Caller<'_, HostState>,
    request: i32,
    name_ptr: i32,
    name_len: i32,
    value_ptr: i32,
    value_len: i32,
) -> Result<()> {
    let request = caller.data().request(request)?;
    let name = read_str(&mut caller, name_ptr, name_len)?;
    let value = read_str(&mut caller, value_ptr, value_len)?;
    request.borrow_mut().headers.push((name, value));
    Ok(())
}

/// Accepts bytes, a string, or `null`/`undefined` to clear the body.
fn request_set_body(caller: Caller<'_, HostState>, request: i32, body: i32) -> Result<()> {
    let state = caller.data();
    let request = state.request(request)?;
    let body = match state.get(body)? {
        HostValue::Bytes(bytes) => Some(bytes.to_vec()),
        HostValue::String(text) => Some(text.as_bytes().to_vec()),
        HostValue::Undefined | HostValue::Null => None,
        _ => bail!("handle {} is not a valid request body", Handle::from_abi(body)),
    };
    request.borrow_mut().body = body;
    Ok(())
}

/// Start a fetch and return a promise for the response. A plain string is
/// taken as a GET of that url.
fn fetch(mut caller: Caller<'_, HostState>, input: i32) -> Result<i32> {
    let state = caller.data_mut();
    let request = match state.get(input)? {
        HostValue::Request(request) => request.borrow().clone(),
        HostValue::String(url) => FetchRequest::get(url.to_string()),
        _ => return Err(anyhow!("handle {} is not a request or url", Handle::from_abi(input))),
    };
    tracing::debug!(url = %request.url, method = %request.method, "fetch");
    let response = state.platform().net().fetch(request);
    let promise = state.pending.spawn(async move {
        response
            .await
            .map(|response| HostValue::Response(Rc::new(response)))
            .map_err(|err| HostError::from_anyhow(&err))
    });
    Ok(state.box_value(HostValue::Promise(promise)).to_abi())
}

fn response_status(caller: Caller<'_, HostState>, response: i32) -> Result<i32> {
    Ok(i32::from(caller.data().response(response)?.status))
}

fn response_ok(caller: Caller<'_, HostState>, response: i32) -> Result<i32> {
    Ok(i32::from(caller.data().response(response)?.ok()))
}

/// Returns 1 and writes the value when the header is present and readable.
fn response_header(
    mut caller: Caller<'_, HostState>,
    response: i32,
    name_ptr: i32,
    name_len: i32,
    out_ptr: i32,
) -> Result<i32> {
    let response = caller.data().response(response)?;
    let name = read_str(&mut caller, name_ptr, name_len)?;
    if !response.kind.is_transparent() {
        return Ok(0);
    }
    match response.header(&name) {
        Some(value) => {
            write_str(&mut caller, out_ptr, value)?;
            Ok(1)
        }
        None => Ok(0),
    }
}

/// Opaque responses read as an empty body.
fn response_bytes(mut caller: Caller<'_, HostState>, response: i32) -> Result<i32> {
    let state = caller.data_mut();
    let response = state.response(response)?;
    let body: Rc<[u8]> = if response.kind.is_transparent() {
        response.body.as_slice().into()
    } else {
        Rc::from(Vec::new())
    };
    Ok(state.box_value(HostValue::Bytes(body)).to_abi())
}

/// Either callback may be `null`. Reactions to a promise that already
/// settled run on the next microtask checkpoint.
fn promise_then(mut caller: Caller<'_, HostState>, promise: i32, on_ok: i32, on_err: i32) -> Result<()> {
    let state = caller.data_mut();
    let promise = state.promise(promise)?;
    let on_ok = state.optional_closure(on_ok)?;
    let on_err = state.optional_closure(on_err)?;
    if let Some(task) = promise.then(on_ok, on_err) {
        state.microtasks.push_back(task);
    }
    Ok(())
}
