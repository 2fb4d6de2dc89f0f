// Dispatch kernels
// Runs one interpreter invocation per target element on the engine's rayon
// pool and blends results into the target.
use rayon::prelude::*;
use rayon::ThreadPool;

use super::compiler::Kernel;
use super::memory::{DeviceArray, Filter, Texels, Wrap};
use crate::error::{Error, Result};
use crate::lang::{Interpreter, Textures, Value};

/// Snapshot of an array bound to a texture unit, normalized to floats.
/// Taken before dispatch so reads never observe the kernel's own writes.
pub struct TextureView {
    width: usize,
    rows: usize,
    dims: u8,
    channels: usize,
    data: Vec<f32>,
    wrap: Wrap,
    filter: Filter,
}

impl TextureView {
    pub fn capture(array: &DeviceArray) -> Self {
        let desc = array.desc();
        let (wrap, filter) = array.sampling();
        Self {
            width: desc.width,
            rows: desc.rows(),
            dims: desc.dims(),
            channels: desc.channels,
            data: array.texels.read().normalized(),
            wrap,
            filter,
        }
    }

    /// RGBA at an in-range texel. Missing green and blue read as 0, missing
    /// alpha as 1.
    fn texel(&self, x: usize, y: usize) -> [f32; 4] {
        let start = (y * self.width + x) * self.channels;
        let t = &self.data[start..start + self.channels];
        match self.channels {
            1 => [t[0], 0.0, 0.0, 1.0],
            2 => [t[0], t[1], 0.0, 1.0],
            _ => [t[0], t[1], t[2], t[3]],
        }
    }

    fn wrap_index(&self, i: i64, len: usize) -> usize {
        let len = len as i64;
        match self.wrap {
            Wrap::ClampToEdge => i.clamp(0, len - 1) as usize,
            Wrap::Repeat => i.rem_euclid(len) as usize,
        }
    }

    fn sample(&self, u: f32, v: f32) -> [f32; 4] {
        // 1. Normalized coordinates to texel space
        let (fx, fy) = (u * self.width as f32, v * self.rows as f32);
        match self.filter {
            Filter::Nearest => {
                let x = self.wrap_index(fx.floor() as i64, self.width);
                let y = if self.dims == 1 { 0 } else { self.wrap_index(fy.floor() as i64, self.rows) };
                self.texel(x, y)
            }
            Filter::Linear => {
                // 2. Texel centres sit at +0.5; find the lower neighbour and weight
                let (fx, fy) = (fx - 0.5, fy - 0.5);
                let (x0, tx) = (fx.floor(), fx - fx.floor());
                let (y0, ty) = (fy.floor(), fy - fy.floor());

                // 3. Wrap both neighbours. Casts saturate for huge coordinates,
                //    so the upper neighbour must not overflow.
                let xs = [
                    self.wrap_index(x0 as i64, self.width),
                    self.wrap_index((x0 as i64).saturating_add(1), self.width),
                ];
                if self.dims == 1 {
                    return lerp(self.texel(xs[0], 0), self.texel(xs[1], 0), tx);
                }
                let ys = [
                    self.wrap_index(y0 as i64, self.rows),
                    self.wrap_index((y0 as i64).saturating_add(1), self.rows),
                ];

                // 4. Blend along x, then y
                let top = lerp(self.texel(xs[0], ys[0]), self.texel(xs[1], ys[0]), tx);
                let bottom = lerp(self.texel(xs[0], ys[1]), self.texel(xs[1], ys[1]), tx);
                lerp(top, bottom, ty)
            }
        }
    }
}

fn lerp(a: [f32; 4], b: [f32; 4], t: f32) -> [f32; 4] {
    std::array::from_fn(|i| a[i] + (b[i] - a[i]) * t)
}

const UNBOUND: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// Texture units for one dispatch.
pub struct BoundTextures {
    pub units: Vec<Option<TextureView>>,
}

impl BoundTextures {
    fn view(&self, unit: i32, dims: u8) -> std::result::Result<Option<&TextureView>, String> {
        let view = usize::try_from(unit)
            .ok()
            .and_then(|u| self.units.get(u))
            .and_then(Option::as_ref);
        match view {
            Some(view) if view.dims != dims => Err(format!(
                "sampler{dims}D on unit {unit} is bound to a {}D array",
                view.dims
            )),
            other => Ok(other),
        }
    }
}

impl Textures for BoundTextures {
    fn size(&self, unit: i32, dims: u8) -> std::result::Result<[i32; 2], String> {
        Ok(self
            .view(unit, dims)?
            .map_or([0, 0], |v| [v.width as i32, if v.dims == 1 { 0 } else { v.rows as i32 }]))
    }

    fn fetch(&self, unit: i32, dims: u8, texel: [i32; 2]) -> std::result::Result<[f32; 4], String> {
        let Some(view) = self.view(unit, dims)? else {
            return Ok(UNBOUND);
        };
        let [x, y] = texel;
        let y = if dims == 1 { 0 } else { y };
        if x < 0 || y < 0 || x as usize >= view.width || y as usize >= view.rows {
            return Ok([0.0; 4]);
        }
        Ok(view.texel(x as usize, y as usize))
    }

    fn sample(&self, unit: i32, dims: u8, coord: [f32; 2]) -> std::result::Result<[f32; 4], String> {
        Ok(self
            .view(unit, dims)?
            .map_or(UNBOUND, |view| view.sample(coord[0], coord[1])))
    }
}

/// Element types results can be blended into.
trait Blend: Copy + Send {
    fn blend(self, value: f32) -> Self;
}

impl Blend for f32 {
    fn blend(self, value: f32) -> f32 {
        self + value
    }
}

impl Blend for u8 {
    /// Normalize, add, clamp to `[0, 1]` and round back.
    fn blend(self, value: f32) -> u8 {
        let sum = (f32::from(self) / 255.0 + value).clamp(0.0, 1.0);
        (sum * 255.0).round() as u8
    }
}

fn blend_rows<T: Blend>(
    pool: &ThreadPool,
    texels: &mut [T],
    width: usize,
    channels: usize,
    interp: &Interpreter<'_>,
) -> std::result::Result<(), String> {
    pool.install(|| {
        texels
            .par_chunks_mut(width * channels)
            .enumerate()
            .try_for_each(|(y, row)| {
                for (x, element) in row.chunks_mut(channels).enumerate() {
                    if let Some(value) = interp.invoke(x, y)? {
                        for (dst, v) in element.iter_mut().zip(value.rgba()) {
                            *dst = dst.blend(v);
                        }
                    }
                }
                Ok(())
            })
    })
}

/// Execute `kernel` over every element of `target`, adding results into it.
/// Results land in a staging copy that replaces the target only when every
/// invocation succeeded.
pub fn dispatch(
    pool: &ThreadPool,
    kernel: &Kernel,
    params: &[Value],
    textures: &BoundTextures,
    target: &DeviceArray,
    max_loop_iterations: u64,
) -> Result<()> {
    let interp = Interpreter::new(kernel.program(), params, textures, max_loop_iterations);
    let desc = *target.desc();

    // 1. Hold the target for the whole run and work on a copy
    let mut texels = target.texels.write();
    let mut staged = texels.clone();

    // 2. One invocation per element, rows in parallel
    match &mut staged {
        Texels::F32(data) => blend_rows(pool, data, desc.width, desc.channels, &interp),
        Texels::U8(data) => blend_rows(pool, data, desc.width, desc.channels, &interp),
    }
    .map_err(Error::Execution)?;

    // 3. Every invocation succeeded; commit
    *texels = staged;
    Ok(())
}
