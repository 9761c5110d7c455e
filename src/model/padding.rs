use burn::prelude::*;

use crate::config::PadType;
use crate::tensor_ops::{pad_reflect, pad_replicate, pad_replicate_detached, pad_zero};

/// How one convolution layer fills its border before convolving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BorderMode {
    /// Mirror the input, edge excluded.
    Reflect,
    /// Repeat the edge values.
    Replicate,
    /// Repeat the edge values of a detached copy; the border carries no gradient.
    ReplicateDetached,
    /// Fill with zeros.
    Zero,
    /// No border; the convolution shrinks its input.
    Valid,
}

impl BorderMode {
    /// Border of a layer for the given network padding strategy.
    pub fn for_layer(pad_type: PadType, first_layer: bool) -> Self {
        match pad_type {
            PadType::InterpolateDetach => Self::ReplicateDetached,
            PadType::ReflectStart if first_layer => Self::Reflect,
            PadType::ReflectStart => Self::Zero,
            PadType::Unpadded => Self::Valid,
            PadType::Reflect => Self::Reflect,
            PadType::Replicate => Self::Replicate,
            PadType::Zero => Self::Zero,
        }
    }

    /// Pads `amount` pixels on every side of the two trailing dimensions.
    pub fn apply<B: Backend>(&self, x: Tensor<B, 4>, amount: usize) -> Tensor<B, 4> {
        if amount == 0 {
            return x;
        }
        let padding = (amount, amount, amount, amount);

        match self {
            Self::Reflect => pad_reflect(x, padding),
            Self::Replicate => pad_replicate(x, padding),
            Self::ReplicateDetached => pad_replicate_detached(x, padding),
            Self::Zero => pad_zero(x, padding),
            Self::Valid => x,
        }
    }
}
