// Module Definition
pub mod compiler; // Link -> Kernel, parameter tables
pub mod context; // Current kernel, bindings and run
pub mod handle;
pub mod kernels; // Parallel dispatch and texture sampling
pub mod link;
pub mod memory; // Device arrays and the byte budget
pub mod params;

use std::path::Path;
use std::sync::Arc;

use ndarray::Array3;
use parking_lot::RwLock;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use compiler::{Kernel, KernelHandle, ParamInfo};
use handle::Arena;
use link::{Link, LinkHandle};
use memory::{Access, ArrayDesc, ArrayHandle, ArrayStore, DeviceArray, Filter, Format, HostBuffer, HostData, Wrap};
use params::ParamOffset;

struct Shared {
    config: EngineConfig,
    arrays: RwLock<ArrayStore>,
    links: RwLock<Arena<Link>>,
    kernels: RwLock<Arena<Kernel>>,
    pool: ThreadPool,
}

/// The software device: arrays, links and kernels. Cloning is cheap and
/// every clone sees the same stores; dispatch goes through a
/// [`context::Context`].
#[derive(Clone)]
pub struct Engine {
    shared: Arc<Shared>,
}

impl Engine {
    pub fn new() -> Result<Self> {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .thread_name(|i| format!("fraktal-worker-{i}"))
            .stack_size(config.worker_stack_bytes)
            .build()
            .map_err(|e| Error::Allocation(format!("worker pool: {e}")))?;
        info!(
            threads = pool.current_num_threads(),
            max_device_bytes = config.max_device_bytes,
            texture_units = config.max_texture_units,
            "engine started"
        );
        Ok(Self {
            shared: Arc::new(Shared {
                arrays: RwLock::new(ArrayStore::new(config.max_device_bytes)),
                links: RwLock::new(Arena::default()),
                kernels: RwLock::new(Arena::default()),
                pool,
                config,
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub(crate) fn pool(&self) -> &ThreadPool {
        &self.shared.pool
    }

    // ------------------------------------------------------------- arrays

    pub fn create_array(&self, desc: ArrayDesc, data: Option<HostData<'_>>) -> Result<ArrayHandle> {
        self.shared.arrays.write().create(desc, data)
    }

    pub fn destroy_array(&self, array: ArrayHandle) -> Result<()> {
        self.shared.arrays.write().destroy(array)
    }

    pub(crate) fn array(&self, array: ArrayHandle) -> Result<Arc<DeviceArray>> {
        self.shared.arrays.read().get(array)
    }

    pub fn zero_array(&self, array: ArrayHandle) -> Result<()> {
        self.shared.arrays.read().zero(array)
    }

    pub fn to_host(&self, array: ArrayHandle) -> Result<HostBuffer> {
        Ok(self.array(array)?.to_host())
    }

    pub fn to_ndarray(&self, array: ArrayHandle) -> Result<Array3<f32>> {
        self.shared.arrays.read().to_ndarray(array)
    }

    /// `(width, height)` as given at creation; height is 0 for 1D arrays.
    pub fn array_size(&self, array: ArrayHandle) -> Result<(usize, usize)> {
        let array = self.array(array)?;
        Ok((array.desc().width, array.desc().height))
    }

    pub fn array_channels(&self, array: ArrayHandle) -> Result<usize> {
        Ok(self.array(array)?.desc().channels)
    }

    pub fn array_format(&self, array: ArrayHandle) -> Result<Format> {
        Ok(self.array(array)?.desc().format)
    }

    pub fn array_access(&self, array: ArrayHandle) -> Result<Access> {
        Ok(self.array(array)?.desc().access)
    }

    pub fn set_array_sampling(&self, array: ArrayHandle, wrap: Wrap, filter: Filter) -> Result<()> {
        self.shared.arrays.read().set_sampling(array, wrap, filter)
    }

    /// Bytes held by live arrays.
    pub fn device_bytes(&self) -> usize {
        self.shared.arrays.read().used_bytes()
    }

    // -------------------------------------------------------------- links

    pub fn create_link(&self) -> LinkHandle {
        let link = self
            .shared
            .links
            .write()
            .insert(Link::new(self.shared.config.max_link_fragments));
        debug!(?link, "link created");
        link
    }

    fn link(&self, link: LinkHandle) -> Result<Arc<Link>> {
        self.shared
            .links
            .read()
            .get(link)
            .ok_or(Error::InvalidHandle("link"))
    }

    pub fn add_link_data(&self, link: LinkHandle, source: &[u8], name: &str) -> Result<()> {
        self.link(link)?.add_data(source, name)
    }

    pub fn add_link_file(&self, link: LinkHandle, path: impl AsRef<Path>) -> Result<()> {
        self.link(link)?.add_file(path.as_ref())
    }

    pub fn destroy_link(&self, link: LinkHandle) -> Result<()> {
        self.shared
            .links
            .write()
            .remove(link)
            .map(|_| debug!(?link, "link destroyed"))
            .ok_or(Error::InvalidHandle("link"))
    }

    // ------------------------------------------------------------ kernels

    /// Compile the link's fragments in order. Seals the link; it stays valid
    /// until destroyed.
    pub fn link_kernel(&self, link: LinkHandle) -> Result<KernelHandle> {
        let fragments = self.link(link)?.seal();
        // Parsing and checking recurse per nesting level; run them on a
        // worker so the bound stack size applies.
        let max_depth = self.shared.config.max_expression_depth;
        let kernel = self
            .shared
            .pool
            .install(|| compiler::compile(&fragments, max_depth))?;
        Ok(self.shared.kernels.write().insert(kernel))
    }

    pub fn load_kernel(&self, path: impl AsRef<Path>) -> Result<KernelHandle> {
        let link = self.create_link();
        let result = self
            .add_link_file(link, path)
            .and_then(|_| self.link_kernel(link));
        self.destroy_link(link)?;
        result
    }

    /// Invalidates the kernel and every [`ParamOffset`] resolved from it.
    pub fn destroy_kernel(&self, kernel: KernelHandle) -> Result<()> {
        self.shared
            .kernels
            .write()
            .remove(kernel)
            .map(|_| debug!(?kernel, "kernel destroyed"))
            .ok_or(Error::InvalidHandle("kernel"))
    }

    pub(crate) fn kernel(&self, kernel: KernelHandle) -> Result<Arc<Kernel>> {
        self.shared
            .kernels
            .read()
            .get(kernel)
            .ok_or(Error::InvalidHandle("kernel"))
    }

    pub fn param_offset(&self, kernel: KernelHandle, name: &str) -> Result<ParamOffset> {
        let index = self
            .kernel(kernel)?
            .param_index(name)
            .ok_or_else(|| Error::UnknownParameter(name.to_string()))?;
        Ok(ParamOffset {
            kernel,
            index: index as u32,
        })
    }

    pub fn kernel_params(&self, kernel: KernelHandle) -> Result<Vec<ParamInfo>> {
        Ok(self.kernel(kernel)?.params().to_vec())
    }
}
