use anyhow::{Result, anyhow};
use platform::DrawingContext;
use std::sync::Mutex;

const DEFAULT_WIDTH: u32 = 300;
const DEFAULT_HEIGHT: u32 = 150;
const MAX_SIDE: u32 = 16384;

struct Framebuffer {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

/// Byte length of an RGBA region, bounded by the same limit as the canvas.
fn region_bytes(width: u32, height: u32) -> Result<usize> {
    if width > MAX_SIDE || height > MAX_SIDE {
        return Err(anyhow!(
            "RangeError: region {width}x{height} exceeds {MAX_SIDE}"
        ));
    }
    Ok(width as usize * height as usize * 4)
}

impl Framebuffer {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * 4],
        }
    }

    /// Clip a rectangle to the framebuffer, returning `(x0, y0, x1, y1)`.
    fn clip(&self, x: i32, y: i32, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = i64::from(x).max(0);
        let y0 = i64::from(y).max(0);
        let x1 = (i64::from(x) + i64::from(width)).min(i64::from(self.width));
        let y1 = (i64::from(y) + i64::from(height)).min(i64::from(self.height));
        (x0 < x1 && y0 < y1).then(|| (x0 as u32, y0 as u32, x1 as u32, y1 as u32))
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 4
    }
}

/// RGBA8 software framebuffer.
pub struct HeadlessCanvas {
    framebuffer: Mutex<Framebuffer>,
}

impl Default for HeadlessCanvas {
    fn default() -> Self {
        Self {
            framebuffer: Mutex::new(Framebuffer::new(DEFAULT_WIDTH, DEFAULT_HEIGHT)),
        }
    }
}

impl HeadlessCanvas {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Framebuffer>> {
        self.framebuffer
            .lock()
            .map_err(|_| anyhow!("failed to lock headless canvas"))
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        let framebuffer = self.lock().ok()?;
        if x >= framebuffer.width || y >= framebuffer.height {
            return None;
        }
        let offset = framebuffer.offset(x, y);
        let mut rgba = [0u8; 4];
        rgba.copy_from_slice(&framebuffer.pixels[offset..offset + 4]);
        Some(rgba)
    }
}

impl DrawingContext for HeadlessCanvas {
    fn size(&self) -> (u32, u32) {
        self.lock()
            .map(|framebuffer| (framebuffer.width, framebuffer.height))
            .unwrap_or((0, 0))
    }

    fn resize(&self, width: u32, height: u32) -> Result<()> {
        if width > MAX_SIDE || height > MAX_SIDE {
            return Err(anyhow!(
                "RangeError: canvas size {width}x{height} exceeds {MAX_SIDE}"
            ));
        }
        let mut framebuffer = self.lock()?;
        *framebuffer = Framebuffer::new(width, height);
        Ok(())
    }

    fn clear(&self, rgba: [f32; 4]) {
        let color = rgba.map(|channel| (channel.clamp(0.0, 1.0) * 255.0).round() as u8);
        if let Ok(mut framebuffer) = self.lock() {
            for pixel in framebuffer.pixels.chunks_exact_mut(4) {
                pixel.copy_from_slice(&color);
            }
        }
    }

    fn fill_rect(&self, x: i32, y: i32, width: u32, height: u32, rgba: [u8; 4]) -> Result<()> {
        let mut framebuffer = self.lock()?;
        let Some((x0, y0, x1, y1)) = framebuffer.clip(x, y, width, height) else {
            return Ok(());
        };
        for row in y0..y1 {
            let start = framebuffer.offset(x0, row);
            let end = framebuffer.offset(x1, row);
            for pixel in framebuffer.pixels[start..end].chunks_exact_mut(4) {
                pixel.copy_from_slice(&rgba);
            }
        }
        Ok(())
    }

    fn put_image(&self, x: i32, y: i32, width: u32, height: u32, pixels: &[u8]) -> Result<()> {
        let expected = region_bytes(width, height)?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "IndexSizeError: expected {expected} bytes for {width}x{height}, got {}",
                pixels.len()
            ));
        }
        let mut framebuffer = self.lock()?;
        let Some((x0, y0, x1, y1)) = framebuffer.clip(x, y, width, height) else {
            return Ok(());
        };
        let src_x = (i64::from(x0) - i64::from(x)) as usize;
        let row_bytes = (x1 - x0) as usize * 4;
        for row in y0..y1 {
            let src_y = (i64::from(row) - i64::from(y)) as usize;
            let src = (src_y * width as usize + src_x) * 4;
            let dst = framebuffer.offset(x0, row);
            framebuffer.pixels[dst..dst + row_bytes].copy_from_slice(&pixels[src..src + row_bytes]);
        }
        Ok(())
    }

    fn read_pixels(&self, x: i32, y: i32, width: u32, height: u32) -> Result<Vec<u8>> {
        let mut out = vec![0u8; region_bytes(width, height)?];
        let framebuffer = self.lock()?;
        let Some((x0, y0, x1, y1)) = framebuffer.clip(x, y, width, height) else {
            return Ok(out);
        };
        let dst_x = (i64::from(x0) - i64::from(x)) as usize;
        let row_bytes = (x1 - x0) as usize * 4;
        for row in y0..y1 {
            let dst_y = (i64::from(row) - i64::from(y)) as usize;
            let dst = (dst_y * width as usize + dst_x) * 4;
            let src = framebuffer.offset(x0, row);
            out[dst..dst + row_bytes].copy_from_slice(&framebuffer.pixels[src..src + row_bytes]);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_fills_every_pixel() {
        let canvas = HeadlessCanvas::default();
        canvas.resize(4, 2).unwrap();
        canvas.clear([1.0, 0.0, 0.5, 1.0]);
        assert_eq!(canvas.pixel(3, 1), Some([255, 0, 128, 255]));
    }

    #[test]
    fn fill_rect_is_clipped() {
        let canvas = HeadlessCanvas::default();
        canvas.resize(4, 4).unwrap();
        canvas.fill_rect(-2, 2, 4, 10, [9, 9, 9, 9]).unwrap();
        assert_eq!(canvas.pixel(0, 3), Some([9, 9, 9, 9]));
        assert_eq!(canvas.pixel(1, 2), Some([9, 9, 9, 9]));
        assert_eq!(canvas.pixel(2, 2), Some([0, 0, 0, 0]));
        assert_eq!(canvas.pixel(0, 1), Some([0, 0, 0, 0]));
    }

    #[test]
    fn put_then_read_returns_same_pixels() {
        let canvas = HeadlessCanvas::default();
        canvas.resize(8, 8).unwrap();
        let image: Vec<u8> = (0..2 * 2 * 4).map(|n| n as u8).collect();
        canvas.put_image(3, 5, 2, 2, &image).unwrap();
        assert_eq!(canvas.read_pixels(3, 5, 2, 2).unwrap(), image);
    }

    #[test]
    fn put_image_checks_buffer_length() {
        let canvas = HeadlessCanvas::default();
        assert!(canvas.put_image(0, 0, 2, 2, &[0; 3]).is_err());
    }

    #[test]
    fn oversized_regions_are_range_errors() {
        let canvas = HeadlessCanvas::default();
        let err = canvas.read_pixels(0, 0, i32::MAX as u32, i32::MAX as u32).unwrap_err();
        assert!(err.to_string().starts_with("RangeError:"));
        assert!(canvas.put_image(0, 0, u32::MAX, 2, &[]).is_err());
        assert_eq!(canvas.read_pixels(-1, -1, 2, 1).unwrap(), vec![0; 8]);
    }

    #[test]
    fn oversized_resize_fails() {
        let canvas = HeadlessCanvas::default();
        assert!(canvas.resize(MAX_SIDE + 1, 1).is_err());
        assert_eq!(canvas.size(), (DEFAULT_WIDTH, DEFAULT_HEIGHT));
    }
}
