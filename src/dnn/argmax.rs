use crate::dnn::layer::Layer;
use crate::AdvFloat;
use ndarray::Array1;
use ndarray_stats::QuantileExt;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result};

/// Hard one-hot of the largest input.
///
/// Piecewise constant, so it has no useful gradient and networks containing it
/// refuse to differentiate.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Argmax {
    ndims: usize,
}

impl Argmax {
    pub const fn new(ndims: usize) -> Self {
        Self { ndims }
    }
}

impl Display for Argmax {
    fn fmt(&self, f: &mut Formatter) -> Result {
        write!(f, "Argmax")
    }
}

#[typetag::serde]
impl Layer for Argmax {
    fn input_dim(&self) -> usize {
        self.ndims
    }

    fn output_dim(&self) -> usize {
        self.ndims
    }

    fn forward1(&self, input: &Array1<AdvFloat>) -> Array1<AdvFloat> {
        let mut out = Array1::zeros(self.ndims);
        if let Ok(idx) = input.argmax() {
            out[idx] = 1.;
        }
        out
    }

    fn backward1(
        &self,
        _input: &Array1<AdvFloat>,
        _output: &Array1<AdvFloat>,
        _cotangent: &Array1<AdvFloat>,
    ) -> Array1<AdvFloat> {
        Array1::zeros(self.ndims)
    }

    fn is_differentiable(&self) -> bool {
        false
    }
}
