//! Dense f32 tensors

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Named parameter tensors, ordered by name so every worker walks them identically
pub type NamedTensors = BTreeMap<String, Tensor>;

/// A dense row-major f32 tensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl Tensor {
    /// Create a tensor, returning None if the data length does not match the shape
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Option<Self> {
        if shape.iter().product::<usize>() != data.len() {
            return None;
        }
        Some(Self { shape, data })
    }

    /// Tensor of the given shape filled with `value`
    pub fn filled(shape: Vec<usize>, value: f32) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![value; len],
        }
    }

    /// Tensor of zeros
    pub fn zeros(shape: Vec<usize>) -> Self {
        Self::filled(shape, 0.0)
    }

    /// True when the element count matches the shape
    pub fn is_consistent(&self) -> bool {
        self.shape.iter().product::<usize>() == self.data.len()
    }

    /// Number of elements
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Copy `other` into this tensor's existing storage.
    ///
    /// Returns false (and leaves self untouched) when the shapes or element
    /// counts differ.
    pub fn copy_from(&mut self, other: &Tensor) -> bool {
        if self.shape != other.shape || self.data.len() != other.data.len() {
            return false;
        }
        self.data.copy_from_slice(&other.data);
        true
    }

    /// Apply `f` to every element in place
    pub fn map_inplace(&mut self, f: impl Fn(f32) -> f32) {
        for x in &mut self.data {
            *x = f(*x);
        }
    }
}
