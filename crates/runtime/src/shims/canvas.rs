use anyhow::{Result, anyhow};
use wasmtime::{Caller, Linker};

use crate::imports::MODULE;
use crate::memory::{read_bytes, write_i32_pair, write_result};
use crate::state::HostState;
use crate::value::HostValue;

pub(super) fn register(linker: &mut Linker<HostState>) -> Result<()> {
    linker.func_wrap(MODULE, "canvas_size", canvas_size)?;
    linker.func_wrap(MODULE, "canvas_resize", canvas_resize)?;
    linker.func_wrap(MODULE, "canvas_clear", canvas_clear)?;
    linker.func_wrap(MODULE, "canvas_fill_rect", canvas_fill_rect)?;
    linker.func_wrap(MODULE, "canvas_put_image", canvas_put_image)?;
    linker.func_wrap(MODULE, "canvas_read_pixels", canvas_read_pixels)?;
    Ok(())
}

/// Negative extents are a host-side `RangeError`, not a trap.
fn extent(width: i32, height: i32) -> Result<(u32, u32)> {
    match (u32::try_from(width), u32::try_from(height)) {
        (Ok(width), Ok(height)) => Ok((width, height)),
        _ => Err(anyhow!("RangeError: negative extent {width}x{height}")),
    }
}

fn canvas_size(mut caller: Caller<'_, HostState>, out_ptr: i32) -> Result<()> {
    let (width, height) = caller.data().platform().canvas().size();
    write_i32_pair(&mut caller, out_ptr, width as i32, height as i32)
}

fn canvas_resize(mut caller: Caller<'_, HostState>, width: i32, height: i32, ret_ptr: i32) -> Result<()> {
    let outcome = extent(width, height).and_then(|(width, height)| {
        caller
            .data()
            .platform()
            .canvas()
            .resize(width, height)
            .map(|()| HostValue::Undefined)
    });
    write_result(&mut caller, ret_ptr, outcome)
}

fn canvas_clear(caller: Caller<'_, HostState>, r: f32, g: f32, b: f32, a: f32) {
    caller.data().platform().canvas().clear([r, g, b, a]);
}

/// `rgba` is packed as `0xRRGGBBAA`.
fn canvas_fill_rect(
    mut caller: Caller<'_, HostState>,
    x: i32,
    y: i32,
    width: i32,
    height: i32,
    rgba: i32,
    ret_ptr: i32,
) -> Result<()> {
    let outcome = extent(width, height).and_then(|(width, height)| {
        caller
            .data()
            .platform()
            .canvas()
            .fill_rect(x, y, width, height, (rgba as u32).to_be_bytes())
            .map(|()| HostValue::Undefined)
    });
    write_result(&mut caller, ret_ptr, outcome)
}

#[allow(clippy::too_many_arguments)]
fn canvas_put_image(
    mut caller: Caller<'_, HostState>,
    x: i32,
    y: i32,
    width: i32,
    height: i32,
    ptr: i32,
    len: i32,
    ret_ptr: i32,
) -> Result<()> {
    let pixels = read_bytes(&mut caller, ptr, len)?;
    let outcome = extent(width, height).and_then(|(width, height)| {
        caller
            .data()
            .platform()
            .canvas()
            .put_image(x, y, width, height, &pixels)
            .map(|()| HostValue::Undefined)
    });
    write_result(&mut caller, ret_ptr, outcome)
}

fn canvas_read_pixels(
    mut caller: Caller<'_, HostState>,
    x: i32,
    y: i32,
    width: i32,
    height: i32,
    ret_ptr: i32,
) -> Result<()> {
    let outcome = extent(width, height).and_then(|(width, height)| {
        caller
            .data()
            .platform()
            .canvas()
            .read_pixels(x, y, width, height)
            .map(|pixels| HostValue::Bytes(pixels.into()))
    });
    write_result(&mut caller, ret_ptr, outcome)
}
