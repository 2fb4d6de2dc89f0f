// Execution context
use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::compiler::{Kernel, KernelHandle, ParamInfo};
use super::kernels::{self, BoundTextures, TextureView};
use super::memory::{Access, ArrayHandle};
use super::params::{BindingTable, ParamOffset, ScalarKind};
use super::Engine;
use crate::error::{Error, Result};

/// Dispatch state owned by one caller: the current kernel and a binding
/// table per kernel used through this context. Tables survive switching
/// kernels with [`Context::use_kernel`].
pub struct Context {
    engine: Engine,
    current: Option<KernelHandle>,
    tables: HashMap<KernelHandle, BindingTable>,
}

impl Context {
    pub fn new(engine: &Engine) -> Self {
        Self {
            engine: engine.clone(),
            current: None,
            tables: HashMap::new(),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn current_kernel(&self) -> Option<KernelHandle> {
        self.current
    }

    /// Select the kernel later setters and `run` act on; `None` clears it.
    pub fn use_kernel(&mut self, kernel: Option<KernelHandle>) -> Result<()> {
        if let Some(handle) = kernel {
            let compiled = self.engine.kernel(handle)?;
            let units = self.engine.config().max_texture_units;
            self.tables
                .entry(handle)
                .or_insert_with(|| BindingTable::new(&compiled, units));
        }
        self.tables
            .retain(|&k, _| Some(k) == kernel || self.engine.kernel(k).is_ok());
        self.current = kernel;
        debug!(?kernel, "kernel in use");
        Ok(())
    }

    fn current(&self) -> Result<(KernelHandle, Arc<Kernel>)> {
        let handle = self.current.ok_or(Error::NoCurrentKernel)?;
        Ok((handle, self.engine.kernel(handle)?))
    }

    /// Resolve `offset` against the current kernel and hand its table and
    /// parameter to `write`.
    fn with_param<F>(&mut self, offset: ParamOffset, write: F) -> Result<()>
    where
        F: FnOnce(&mut BindingTable, usize, &ParamInfo) -> Result<()>,
    {
        let (handle, kernel) = self.current()?;
        if offset.kernel != handle {
            warn!(?offset, current = ?handle, "parameter offset from another kernel");
            return Err(Error::ForeignParameter);
        }
        let index = offset.index as usize;
        let param = kernel.params().get(index).ok_or(Error::ForeignParameter)?;
        let units = self.engine.config().max_texture_units;
        let table = self
            .tables
            .entry(handle)
            .or_insert_with(|| BindingTable::new(&kernel, units));
        write(table, index, param).inspect_err(|e| warn!(param = %param.name, error = %e, "parameter rejected"))
    }

    fn set_floats(&mut self, offset: ParamOffset, values: &[f32]) -> Result<()> {
        self.with_param(offset, |table, index, param| {
            table.write_scalars(index, param, ScalarKind::Float, values, &[])
        })
    }

    fn set_ints(&mut self, offset: ParamOffset, values: &[i32]) -> Result<()> {
        let units = self.engine.config().max_texture_units;
        self.with_param(offset, |table, index, param| {
            if param.ty.is_sampler() {
                let unit = values[0];
                if unit < 0 || unit as u32 >= units {
                    return Err(Error::TextureUnit {
                        unit: unit as u32,
                        units,
                    });
                }
            }
            table.write_scalars(index, param, ScalarKind::Int, &[], values)
        })
    }

    pub fn set_param_1f(&mut self, offset: ParamOffset, x: f32) -> Result<()> {
        self.set_floats(offset, &[x])
    }

    pub fn set_param_2f(&mut self, offset: ParamOffset, x: f32, y: f32) -> Result<()> {
        self.set_floats(offset, &[x, y])
    }

    pub fn set_param_3f(&mut self, offset: ParamOffset, x: f32, y: f32, z: f32) -> Result<()> {
        self.set_floats(offset, &[x, y, z])
    }

    pub fn set_param_4f(&mut self, offset: ParamOffset, x: f32, y: f32, z: f32, w: f32) -> Result<()> {
        self.set_floats(offset, &[x, y, z, w])
    }

    pub fn set_param_1i(&mut self, offset: ParamOffset, x: i32) -> Result<()> {
        self.set_ints(offset, &[x])
    }

    pub fn set_param_2i(&mut self, offset: ParamOffset, x: i32, y: i32) -> Result<()> {
        self.set_ints(offset, &[x, y])
    }

    pub fn set_param_3i(&mut self, offset: ParamOffset, x: i32, y: i32, z: i32) -> Result<()> {
        self.set_ints(offset, &[x, y, z])
    }

    pub fn set_param_4i(&mut self, offset: ParamOffset, x: i32, y: i32, z: i32, w: i32) -> Result<()> {
        self.set_ints(offset, &[x, y, z, w])
    }

    /// `m` is column-major unless `transpose` is set, in which case it is
    /// read as row-major and stored transposed.
    pub fn set_param_matrix4f(&mut self, offset: ParamOffset, m: &[f32; 16], transpose: bool) -> Result<()> {
        self.with_param(offset, |table, index, param| table.write_matrix(index, param, m, transpose))
    }

    /// Bind `array` to texture `unit` and point the sampler parameter at it.
    pub fn set_param_array(&mut self, offset: ParamOffset, unit: u32, array: ArrayHandle) -> Result<()> {
        self.engine.array(array)?;
        self.with_param(offset, |table, index, param| table.bind_array(index, param, unit, array))
    }

    /// Raw binding table of the current kernel.
    pub fn binding_bytes(&self) -> Result<&[u8]> {
        let (handle, _) = self.current()?;
        self.tables
            .get(&handle)
            .map(|table| table.bytes())
            .ok_or(Error::NoCurrentKernel)
    }

    /// Execute the current kernel once per element of `target`, adding the
    /// kernel's output into it.
    pub fn run(&mut self, target: ArrayHandle) -> Result<()> {
        // 1. Resolve kernel and target
        let (handle, kernel) = self.current()?;
        let target_array = self.engine.array(target)?;
        if target_array.desc().access != Access::ReadWrite {
            warn!(?target, "run target is read-only");
            return Err(Error::ReadOnlyArray);
        }
        let units = self.engine.config().max_texture_units;
        let table = self
            .tables
            .entry(handle)
            .or_insert_with(|| BindingTable::new(&kernel, units));

        let unset: Vec<&str> = table.unset(&kernel).collect();
        if !unset.is_empty() {
            debug!(?unset, "parameters never set read as zero");
        }

        // 2. Snapshot bound arrays so invocations never see this run's writes
        let mut views = Vec::with_capacity(table.units().len());
        for unit in table.units() {
            views.push(match unit {
                Some(array) => Some(TextureView::capture(&*self.engine.array(*array)?)),
                None => None,
            });
        }
        let textures = BoundTextures { units: views };
        let params = table.values(&kernel);

        // 3. Dispatch on the engine pool
        let desc = *target_array.desc();
        kernels::dispatch(
            self.engine.pool(),
            &kernel,
            &params,
            &textures,
            &target_array,
            self.engine.config().max_loop_iterations,
        )
        .inspect_err(|e| warn!(?handle, error = %e, "run failed"))?;
        info!(
            ?handle,
            width = desc.width,
            rows = desc.rows(),
            invocations = desc.width * desc.rows(),
            "kernel run"
        );
        Ok(())
    }
}
