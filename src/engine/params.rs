// Parameter binding tables
use bitvec::prelude::*;

use super::compiler::{Kernel, KernelHandle, ParamInfo};
use super::memory::ArrayHandle;
use crate::error::{Error, Result};
use crate::lang::{Type, Value};

/// Stable position of a named parameter in one kernel's binding table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamOffset {
    pub kernel: KernelHandle,
    pub index: u32,
}

/// Scalar kind a setter writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Float,
    Int,
}

fn setter_name(kind: ScalarKind, lanes: usize) -> String {
    match kind {
        ScalarKind::Float => format!("{lanes}f"),
        ScalarKind::Int => format!("{lanes}i"),
    }
}

fn type_error(param: &ParamInfo, found: String) -> Error {
    Error::ParamType {
        name: param.name.clone(),
        expected: param.ty.to_string(),
        found,
    }
}

/// Raw little-endian parameter storage for one kernel, plus the arrays bound
/// to texture units.
#[derive(Debug, Clone)]
pub struct BindingTable {
    bytes: Vec<u8>,
    written: BitVec,
    units: Vec<Option<ArrayHandle>>,
}

impl BindingTable {
    pub fn new(kernel: &Kernel, texture_units: u32) -> Self {
        Self {
            bytes: vec![0; kernel.table_bytes()],
            written: bitvec![0; kernel.params().len()],
            units: vec![None; texture_units as usize],
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_written(&self, index: usize) -> bool {
        self.written.get(index).is_some_and(|bit| *bit)
    }

    /// Parameters never set since the table was created.
    pub fn unset<'k>(&'k self, kernel: &'k Kernel) -> impl Iterator<Item = &'k str> + 'k {
        kernel
            .params()
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.is_written(*i))
            .map(|(_, p)| p.name.as_str())
    }

    pub fn units(&self) -> &[Option<ArrayHandle>] {
        &self.units
    }

    fn put(&mut self, at: usize, words: impl IntoIterator<Item = [u8; 4]>) {
        for (i, word) in words.into_iter().enumerate() {
            let start = at + i * 4;
            self.bytes[start..start + 4].copy_from_slice(&word);
        }
    }

    /// `set_param_{N}{f,i}`. Float setters need `float`/`vecN`; int setters
    /// accept `int`, `ivecN`, `bool` and, for one lane, a sampler's unit.
    pub fn write_scalars(&mut self, index: usize, param: &ParamInfo, kind: ScalarKind, values: &[f32], ints: &[i32]) -> Result<()> {
        let lanes = values.len().max(ints.len());
        let ok = match (kind, param.ty) {
            (ScalarKind::Float, Type::Float) => lanes == 1,
            (ScalarKind::Float, Type::Vec(n)) => lanes == n as usize,
            (ScalarKind::Int, Type::Int | Type::Bool) => lanes == 1,
            (ScalarKind::Int, Type::IVec(n)) => lanes == n as usize,
            (ScalarKind::Int, Type::Sampler1D | Type::Sampler2D) => lanes == 1,
            _ => false,
        };
        if !ok {
            return Err(type_error(param, setter_name(kind, lanes)));
        }
        match kind {
            ScalarKind::Float => self.put(param.byte_offset, values.iter().map(|v| v.to_le_bytes())),
            ScalarKind::Int => self.put(param.byte_offset, ints.iter().map(|v| v.to_le_bytes())),
        }
        self.written.set(index, true);
        Ok(())
    }

    /// Stores `m` as given, or its transpose when `transpose` is set.
    pub fn write_matrix(&mut self, index: usize, param: &ParamInfo, m: &[f32; 16], transpose: bool) -> Result<()> {
        if param.ty != Type::Mat4 {
            return Err(type_error(param, "matrix4f".into()));
        }
        let stored: [f32; 16] = if transpose {
            std::array::from_fn(|i| m[(i % 4) * 4 + i / 4])
        } else {
            *m
        };
        self.put(param.byte_offset, stored.iter().map(|v| v.to_le_bytes()));
        self.written.set(index, true);
        Ok(())
    }

    /// Point a sampler at `unit` and bind `array` there.
    pub fn bind_array(&mut self, index: usize, param: &ParamInfo, unit: u32, array: ArrayHandle) -> Result<()> {
        if !param.ty.is_sampler() {
            return Err(type_error(param, "array".into()));
        }
        let units = self.units.len() as u32;
        let slot = self
            .units
            .get_mut(unit as usize)
            .ok_or(Error::TextureUnit { unit, units })?;
        *slot = Some(array);
        self.put(param.byte_offset, [(unit as i32).to_le_bytes()]);
        self.written.set(index, true);
        Ok(())
    }

    fn word(&self, at: usize) -> [u8; 4] {
        let mut word = [0; 4];
        word.copy_from_slice(&self.bytes[at..at + 4]);
        word
    }

    fn f32_at(&self, at: usize) -> f32 {
        f32::from_le_bytes(self.word(at))
    }

    fn i32_at(&self, at: usize) -> i32 {
        i32::from_le_bytes(self.word(at))
    }

    /// Decode every parameter into interpreter values, in declaration order.
    pub fn values(&self, kernel: &Kernel) -> Vec<Value> {
        kernel
            .params()
            .iter()
            .map(|p| {
                let at = p.byte_offset;
                match p.ty {
                    Type::Bool => Value::Bool(self.i32_at(at) != 0),
                    Type::Int => Value::Int(self.i32_at(at)),
                    Type::Float => Value::Float(self.f32_at(at)),
                    Type::Vec(n) => {
                        let lanes: Vec<f32> = (0..n as usize).map(|i| self.f32_at(at + i * 4)).collect();
                        Value::vec(&lanes)
                    }
                    Type::IVec(n) => {
                        let lanes: Vec<i32> = (0..n as usize).map(|i| self.i32_at(at + i * 4)).collect();
                        Value::ivec(&lanes)
                    }
                    Type::Mat4 => Value::Mat4(std::array::from_fn(|i| self.f32_at(at + i * 4))),
                    Type::Sampler1D | Type::Sampler2D => Value::Sampler(self.i32_at(at)),
                    Type::Void => Value::Void,
                }
            })
            .collect()
    }
}
