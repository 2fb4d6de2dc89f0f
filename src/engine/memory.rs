// Array Store
use ndarray::Array3;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::handle::{Arena, Handle};
use crate::error::{Error, Result};

pub type ArrayHandle = Handle<DeviceArray>;

macro_rules! int_enum {
    ($(#[$meta:meta])* $name:ident, $err:expr, { $($variant:ident = $value:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(i32)]
        pub enum $name {
            $($variant = $value),+
        }

        impl TryFrom<i32> for $name {
            type Error = Error;

            fn try_from(value: i32) -> Result<Self> {
                match value {
                    $($value => Ok($name::$variant),)+
                    _ => Err($err(value)),
                }
            }
        }

        impl From<$name> for i32 {
            fn from(value: $name) -> i32 {
                value as i32
            }
        }
    };
}

fn invalid(kind: &'static str) -> impl Fn(i32) -> Error {
    move |value| Error::InvalidEnum { kind, value }
}

int_enum!(
    /// Whether kernels may write an array.
    Access, invalid("access mode"), { ReadOnly = 0, ReadWrite = 1 }
);

int_enum!(
    /// Element format. An unknown tag is an allocation failure, as the
    /// device could not create such an array.
    Format, |value| Error::Allocation(format!("unrecognized format tag {value}")), {
        Float32 = 2,
        UInt8 = 3,
    }
);

int_enum!(Wrap, invalid("wrap mode"), { ClampToEdge = 4, Repeat = 5 });

int_enum!(Filter, invalid("filter mode"), { Linear = 6, Nearest = 7 });

impl Format {
    pub fn element_bytes(self) -> usize {
        match self {
            Format::Float32 => 4,
            Format::UInt8 => 1,
        }
    }
}

/// Shape and format of an array, fixed at creation. `height == 0` makes a
/// 1D array of `width` elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayDesc {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub format: Format,
    pub access: Access,
}

impl ArrayDesc {
    pub fn new(width: usize, height: usize, channels: usize, format: Format, access: Access) -> Self {
        Self {
            width,
            height,
            channels,
            format,
            access,
        }
    }

    pub fn rows(&self) -> usize {
        self.height.max(1)
    }

    pub fn dims(&self) -> u8 {
        if self.height == 0 {
            1
        } else {
            2
        }
    }

    pub fn elements(&self) -> usize {
        self.width * self.rows() * self.channels
    }

    fn validate(&self) -> Result<usize> {
        if self.width == 0 {
            return Err(Error::InvalidArray("width must be positive".into()));
        }
        if !matches!(self.channels, 1 | 2 | 4) {
            return Err(Error::InvalidArray(format!(
                "channels must be 1, 2 or 4, got {}",
                self.channels
            )));
        }
        self.width
            .checked_mul(self.rows())
            .and_then(|n| n.checked_mul(self.channels))
            .and_then(|n| n.checked_mul(self.format.element_bytes()))
            .ok_or_else(|| Error::Allocation("array size overflows".into()))
    }
}

/// Host-side data used to seed an array.
#[derive(Debug, Clone, Copy)]
pub enum HostData<'a> {
    F32(&'a [f32]),
    U8(&'a [u8]),
}

impl HostData<'_> {
    pub fn len(&self) -> usize {
        match self {
            HostData::F32(d) => d.len(),
            HostData::U8(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn format(&self) -> Format {
        match self {
            HostData::F32(_) => Format::Float32,
            HostData::U8(_) => Format::UInt8,
        }
    }
}

/// Array contents downloaded to the host, row-major and channel-interleaved.
#[derive(Debug, Clone, PartialEq)]
pub enum HostBuffer {
    F32(Vec<f32>),
    U8(Vec<u8>),
}

impl HostBuffer {
    pub fn len(&self) -> usize {
        match self {
            HostBuffer::F32(d) => d.len(),
            HostBuffer::U8(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match self {
            HostBuffer::F32(d) => Some(d),
            HostBuffer::U8(_) => None,
        }
    }

    pub fn as_u8(&self) -> Option<&[u8]> {
        match self {
            HostBuffer::U8(d) => Some(d),
            HostBuffer::F32(_) => None,
        }
    }
}

/// Device-side storage.
#[derive(Debug, Clone)]
pub(crate) enum Texels {
    F32(Vec<f32>),
    U8(Vec<u8>),
}

fn reserve<T: Clone>(len: usize, fill: T) -> Result<Vec<T>> {
    let mut texels = Vec::new();
    texels
        .try_reserve_exact(len)
        .map_err(|e| Error::Allocation(e.to_string()))?;
    texels.resize(len, fill);
    Ok(texels)
}

impl Texels {
    fn zeroed(desc: &ArrayDesc) -> Result<Self> {
        Ok(match desc.format {
            Format::Float32 => Texels::F32(reserve(desc.elements(), 0.0)?),
            Format::UInt8 => Texels::U8(reserve(desc.elements(), 0)?),
        })
    }

    /// Element values in `[0, 1]` for uint8, as stored for float32.
    pub(crate) fn normalized(&self) -> Vec<f32> {
        match self {
            Texels::F32(d) => d.clone(),
            Texels::U8(d) => d.iter().map(|&v| f32::from(v) / 255.0).collect(),
        }
    }
}

pub struct DeviceArray {
    desc: ArrayDesc,
    pub(crate) texels: RwLock<Texels>,
    sampling: Mutex<(Wrap, Filter)>,
}

impl DeviceArray {
    pub fn desc(&self) -> &ArrayDesc {
        &self.desc
    }

    pub fn sampling(&self) -> (Wrap, Filter) {
        *self.sampling.lock()
    }

    pub fn to_host(&self) -> HostBuffer {
        match &*self.texels.read() {
            Texels::F32(d) => HostBuffer::F32(d.clone()),
            Texels::U8(d) => HostBuffer::U8(d.clone()),
        }
    }
}

/// Owns every live array and enforces the device byte budget.
pub struct ArrayStore {
    arrays: Arena<DeviceArray>,
    used_bytes: usize,
    max_bytes: usize,
}

impl ArrayStore {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            arrays: Arena::default(),
            used_bytes: 0,
            max_bytes,
        }
    }

    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    /// Allocate an array, optionally seeded from `data`; otherwise zeroed.
    pub fn create(&mut self, desc: ArrayDesc, data: Option<HostData<'_>>) -> Result<ArrayHandle> {
        let bytes = desc.validate()?;
        if let Some(data) = data {
            if data.format() != desc.format {
                return Err(Error::Allocation(format!(
                    "host data is {:?}, array format is {:?}",
                    data.format(),
                    desc.format
                )));
            }
            if data.len() != desc.elements() {
                return Err(Error::DataLength {
                    expected: desc.elements(),
                    found: data.len(),
                });
            }
        }
        let remaining = self.max_bytes.saturating_sub(self.used_bytes);
        if bytes > remaining {
            return Err(Error::Allocation(format!(
                "{bytes} bytes requested, {remaining} of {} bytes available",
                self.max_bytes
            )));
        }

        let mut texels = Texels::zeroed(&desc)?;
        match (&mut texels, data) {
            (Texels::F32(dst), Some(HostData::F32(src))) => dst.copy_from_slice(src),
            (Texels::U8(dst), Some(HostData::U8(src))) => dst.copy_from_slice(src),
            _ => {}
        }

        self.used_bytes += bytes;
        let handle = self.arrays.insert(DeviceArray {
            desc,
            texels: RwLock::new(texels),
            sampling: Mutex::new((Wrap::ClampToEdge, Filter::Nearest)),
        });
        debug!(?handle, width = desc.width, height = desc.height, channels = desc.channels, format = ?desc.format, bytes, "array created");
        Ok(handle)
    }

    pub fn destroy(&mut self, handle: ArrayHandle) -> Result<()> {
        let array = self
            .arrays
            .remove(handle)
            .ok_or(Error::InvalidHandle("array"))?;
        let bytes = array.desc.elements() * array.desc.format.element_bytes();
        self.used_bytes = self.used_bytes.saturating_sub(bytes);
        debug!(?handle, bytes, "array destroyed");
        Ok(())
    }

    pub fn get(&self, handle: ArrayHandle) -> Result<std::sync::Arc<DeviceArray>> {
        self.arrays.get(handle).ok_or(Error::InvalidHandle("array"))
    }

    pub fn zero(&self, handle: ArrayHandle) -> Result<()> {
        let array = self.get(handle)?;
        if array.desc.access != Access::ReadWrite {
            return Err(Error::ReadOnlyArray);
        }
        match &mut *array.texels.write() {
            Texels::F32(d) => d.fill(0.0),
            Texels::U8(d) => d.fill(0),
        }
        Ok(())
    }

    pub fn set_sampling(&self, handle: ArrayHandle, wrap: Wrap, filter: Filter) -> Result<()> {
        *self.get(handle)?.sampling.lock() = (wrap, filter);
        Ok(())
    }

    /// Contents as an `(rows, width, channels)` view. uint8 elements keep
    /// their integer values.
    pub fn to_ndarray(&self, handle: ArrayHandle) -> Result<Array3<f32>> {
        let array = self.get(handle)?;
        let desc = array.desc;
        let values = match &*array.texels.read() {
            Texels::F32(d) => d.clone(),
            Texels::U8(d) => d.iter().map(|&v| f32::from(v)).collect(),
        };
        Array3::from_shape_vec((desc.rows(), desc.width, desc.channels), values)
            .map_err(|e| Error::InvalidArray(e.to_string()))
    }
}
