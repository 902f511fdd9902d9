use crate::affine::Affine2;
use crate::dnn::layer::Layer;
use crate::AdvFloat;
use ndarray::Array1;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Dense {
    aff: Affine2,
}

impl Dense {
    pub const fn new(aff: Affine2) -> Self {
        Self { aff }
    }

    pub fn from_parts(mul: Array2<AdvFloat>, add: Array1<AdvFloat>) -> Self {
        Self {
            aff: Affine2::new(mul, add),
        }
    }

    pub const fn affine(&self) -> &Affine2 {
        &self.aff
    }
}

#[typetag::serde]
impl Layer for Dense {
    fn input_dim(&self) -> usize {
        self.aff.input_dim()
    }

    fn output_dim(&self) -> usize {
        self.aff.output_dim()
    }

    fn forward1(&self, input: &Array1<AdvFloat>) -> Array1<AdvFloat> {
        debug_assert_eq!(input.len(), self.input_dim());
        self.aff.apply(&input.view())
    }

    fn backward1(
        &self,
        _input: &Array1<AdvFloat>,
        _output: &Array1<AdvFloat>,
        cotangent: &Array1<AdvFloat>,
    ) -> Array1<AdvFloat> {
        self.aff.pullback(&cotangent.view())
    }
}

impl fmt::Display for Dense {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Dense {}", self.aff.output_dim())
    }
}
