// Python bindings
use numpy::{IntoPyArray, PyReadonlyArrayDyn};
use pyo3::create_exception;
use pyo3::exceptions::{PyException, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyBytes;

use crate::config::EngineConfig;
use crate::engine::context::Context;
use crate::engine::memory::{Access, ArrayDesc, ArrayHandle, Filter, Format, HostBuffer, HostData, Wrap};
use crate::engine::{compiler::KernelHandle, link::LinkHandle, params, Engine};
use crate::error::Error;

create_exception!(fraktal_core, FraktalError, PyException);

impl From<Error> for PyErr {
    fn from(err: Error) -> PyErr {
        FraktalError::new_err(err.to_string())
    }
}

/// Resolved parameter position; only valid for the kernel it came from.
#[pyclass(name = "ParamOffset", frozen)]
#[derive(Clone, Copy)]
struct PyParamOffset(params::ParamOffset);

#[pymethods]
impl PyParamOffset {
    #[getter]
    fn kernel(&self) -> u64 {
        self.0.kernel.to_raw()
    }

    #[getter]
    fn index(&self) -> u32 {
        self.0.index
    }

    fn __repr__(&self) -> String {
        format!("ParamOffset(kernel={}, index={})", self.0.kernel.to_raw(), self.0.index)
    }
}

#[pyclass(name = "Engine", frozen)]
struct PyEngine {
    engine: Engine,
}

#[pymethods]
impl PyEngine {
    /// `config` is an optional JSON object of engine limits.
    #[new]
    #[pyo3(signature = (config=None))]
    fn new(config: Option<&str>) -> PyResult<Self> {
        let config = match config {
            Some(json) => EngineConfig::from_json(json)?,
            None => EngineConfig::from_env()?,
        };
        Ok(Self {
            engine: Engine::with_config(config)?,
        })
    }

    #[pyo3(signature = (width, height, channels, format, access, data=None))]
    fn create_array(
        &self,
        width: usize,
        height: usize,
        channels: usize,
        format: i32,
        access: i32,
        data: Option<&Bound<'_, PyAny>>,
    ) -> PyResult<u64> {
        let desc = ArrayDesc::new(width, height, channels, Format::try_from(format)?, Access::try_from(access)?);
        let handle = match data {
            None => self.engine.create_array(desc, None)?,
            Some(obj) => {
                if let Ok(values) = obj.extract::<PyReadonlyArrayDyn<'_, f32>>() {
                    let values = values.as_slice().map_err(|e| PyValueError::new_err(e.to_string()))?;
                    self.engine.create_array(desc, Some(HostData::F32(values)))?
                } else if let Ok(values) = obj.extract::<PyReadonlyArrayDyn<'_, u8>>() {
                    let values = values.as_slice().map_err(|e| PyValueError::new_err(e.to_string()))?;
                    self.engine.create_array(desc, Some(HostData::U8(values)))?
                } else {
                    return Err(PyValueError::new_err("data must be a float32 or uint8 numpy array"));
                }
            }
        };
        Ok(handle.to_raw())
    }

    fn destroy_array(&self, array: u64) -> PyResult<()> {
        Ok(self.engine.destroy_array(ArrayHandle::from_raw(array))?)
    }

    fn zero_array(&self, array: u64) -> PyResult<()> {
        Ok(self.engine.zero_array(ArrayHandle::from_raw(array))?)
    }

    /// Flat numpy array, float32 or uint8 to match the array format.
    fn to_host(&self, py: Python<'_>, array: u64) -> PyResult<PyObject> {
        Ok(match self.engine.to_host(ArrayHandle::from_raw(array))? {
            HostBuffer::F32(values) => values.into_pyarray(py).into_any().unbind(),
            HostBuffer::U8(values) => values.into_pyarray(py).into_any().unbind(),
        })
    }

    fn array_size(&self, array: u64) -> PyResult<(usize, usize)> {
        Ok(self.engine.array_size(ArrayHandle::from_raw(array))?)
    }

    fn array_channels(&self, array: u64) -> PyResult<usize> {
        Ok(self.engine.array_channels(ArrayHandle::from_raw(array))?)
    }

    fn array_format(&self, array: u64) -> PyResult<i32> {
        Ok(self.engine.array_format(ArrayHandle::from_raw(array))?.into())
    }

    fn array_access(&self, array: u64) -> PyResult<i32> {
        Ok(self.engine.array_access(ArrayHandle::from_raw(array))?.into())
    }

    fn set_array_sampling(&self, array: u64, wrap: i32, filter: i32) -> PyResult<()> {
        Ok(self.engine.set_array_sampling(
            ArrayHandle::from_raw(array),
            Wrap::try_from(wrap)?,
            Filter::try_from(filter)?,
        )?)
    }

    /// float32 array shaped `(rows, width, channels)`.
    fn to_ndarray(&self, py: Python<'_>, array: u64) -> PyResult<PyObject> {
        let view = self.engine.to_ndarray(ArrayHandle::from_raw(array))?;
        Ok(view.into_pyarray(py).into_any().unbind())
    }

    fn device_bytes(&self) -> usize {
        self.engine.device_bytes()
    }

    fn create_link(&self) -> u64 {
        self.engine.create_link().to_raw()
    }

    fn add_link_data(&self, link: u64, data: &[u8], name: &str) -> PyResult<()> {
        Ok(self.engine.add_link_data(LinkHandle::from_raw(link), data, name)?)
    }

    fn add_link_file(&self, link: u64, path: &str) -> PyResult<()> {
        Ok(self.engine.add_link_file(LinkHandle::from_raw(link), path)?)
    }

    fn destroy_link(&self, link: u64) -> PyResult<()> {
        Ok(self.engine.destroy_link(LinkHandle::from_raw(link))?)
    }

    fn link_kernel(&self, link: u64) -> PyResult<u64> {
        Ok(self.engine.link_kernel(LinkHandle::from_raw(link))?.to_raw())
    }

    fn load_kernel(&self, path: &str) -> PyResult<u64> {
        Ok(self.engine.load_kernel(path)?.to_raw())
    }

    fn destroy_kernel(&self, kernel: u64) -> PyResult<()> {
        Ok(self.engine.destroy_kernel(KernelHandle::from_raw(kernel))?)
    }

    fn param_offset(&self, kernel: u64, name: &str) -> PyResult<PyParamOffset> {
        Ok(PyParamOffset(self.engine.param_offset(KernelHandle::from_raw(kernel), name)?))
    }

    /// `(name, type, byte_offset)` per parameter, in declaration order.
    fn kernel_params(&self, kernel: u64) -> PyResult<Vec<(String, String, usize)>> {
        Ok(self
            .engine
            .kernel_params(KernelHandle::from_raw(kernel))?
            .into_iter()
            .map(|p| (p.name, p.ty.to_string(), p.byte_offset))
            .collect())
    }
}

#[pyclass(name = "Context")]
struct PyContext {
    context: Context,
}

#[pymethods]
impl PyContext {
    #[new]
    fn new(engine: &PyEngine) -> Self {
        Self {
            context: Context::new(&engine.engine),
        }
    }

    #[pyo3(name = "use", signature = (kernel=None))]
    fn use_kernel(&mut self, kernel: Option<u64>) -> PyResult<()> {
        Ok(self.context.use_kernel(kernel.map(KernelHandle::from_raw))?)
    }

    fn set_param_1f(&mut self, offset: PyParamOffset, x: f32) -> PyResult<()> {
        Ok(self.context.set_param_1f(offset.0, x)?)
    }

    fn set_param_2f(&mut self, offset: PyParamOffset, x: f32, y: f32) -> PyResult<()> {
        Ok(self.context.set_param_2f(offset.0, x, y)?)
    }

    fn set_param_3f(&mut self, offset: PyParamOffset, x: f32, y: f32, z: f32) -> PyResult<()> {
        Ok(self.context.set_param_3f(offset.0, x, y, z)?)
    }

    fn set_param_4f(&mut self, offset: PyParamOffset, x: f32, y: f32, z: f32, w: f32) -> PyResult<()> {
        Ok(self.context.set_param_4f(offset.0, x, y, z, w)?)
    }

    fn set_param_1i(&mut self, offset: PyParamOffset, x: i32) -> PyResult<()> {
        Ok(self.context.set_param_1i(offset.0, x)?)
    }

    fn set_param_2i(&mut self, offset: PyParamOffset, x: i32, y: i32) -> PyResult<()> {
        Ok(self.context.set_param_2i(offset.0, x, y)?)
    }

    fn set_param_3i(&mut self, offset: PyParamOffset, x: i32, y: i32, z: i32) -> PyResult<()> {
        Ok(self.context.set_param_3i(offset.0, x, y, z)?)
    }

    fn set_param_4i(&mut self, offset: PyParamOffset, x: i32, y: i32, z: i32, w: i32) -> PyResult<()> {
        Ok(self.context.set_param_4i(offset.0, x, y, z, w)?)
    }

    #[pyo3(signature = (offset, values, transpose=false))]
    fn set_param_matrix4f(&mut self, offset: PyParamOffset, values: Vec<f32>, transpose: bool) -> PyResult<()> {
        let m: [f32; 16] = values
            .try_into()
            .map_err(|v: Vec<f32>| PyValueError::new_err(format!("expected 16 values, got {}", v.len())))?;
        Ok(self.context.set_param_matrix4f(offset.0, &m, transpose)?)
    }

    fn set_param_array(&mut self, offset: PyParamOffset, unit: u32, array: u64) -> PyResult<()> {
        Ok(self.context.set_param_array(offset.0, unit, ArrayHandle::from_raw(array))?)
    }

    fn binding_bytes<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyBytes>> {
        Ok(PyBytes::new(py, self.context.binding_bytes()?))
    }

    /// Releases the GIL while the kernel runs.
    fn run(&mut self, py: Python<'_>, target: u64) -> PyResult<()> {
        let context = &mut self.context;
        Ok(py.allow_threads(|| context.run(ArrayHandle::from_raw(target)))?)
    }
}

#[pymodule]
fn fraktal_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    crate::telemetry::init_tracing();
    m.add_class::<PyEngine>()?;
    m.add_class::<PyContext>()?;
    m.add_class::<PyParamOffset>()?;
    m.add("FraktalError", m.py().get_type::<FraktalError>())?;
    m.add("READ_ONLY", i32::from(Access::ReadOnly))?;
    m.add("READ_WRITE", i32::from(Access::ReadWrite))?;
    m.add("FLOAT", i32::from(Format::Float32))?;
    m.add("UINT8", i32::from(Format::UInt8))?;
    m.add("CLAMP_TO_EDGE", i32::from(Wrap::ClampToEdge))?;
    m.add("REPEAT", i32::from(Wrap::Repeat))?;
    m.add("LINEAR", i32::from(Filter::Linear))?;
    m.add("NEAREST", i32::from(Filter::Nearest))?;
    Ok(())
}
