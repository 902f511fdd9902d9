use crate::dnn::layer::Layer;
use crate::AdvFloat;
use ndarray::Array1;
use ndarray::Zip;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result};

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ReLU {
    ndims: usize,
}

impl ReLU {
    pub const fn new(ndims: usize) -> Self {
        Self { ndims }
    }
}

impl Display for ReLU {
    fn fmt(&self, f: &mut Formatter) -> Result {
        write!(f, "ReLU")
    }
}

#[typetag::serde]
impl Layer for ReLU {
    fn input_dim(&self) -> usize {
        self.ndims
    }

    fn output_dim(&self) -> usize {
        self.ndims
    }

    fn forward1(&self, input: &Array1<AdvFloat>) -> Array1<AdvFloat> {
        input.mapv(|x| if x.lt(&0.) { 0. } else { x })
    }

    fn is_activation(&self) -> bool {
        true
    }

    /// Subgradient 0 at the kink, matching the usual autodiff convention.
    fn backward1(
        &self,
        input: &Array1<AdvFloat>,
        _output: &Array1<AdvFloat>,
        cotangent: &Array1<AdvFloat>,
    ) -> Array1<AdvFloat> {
        Zip::from(input)
            .and(cotangent)
            .map_collect(|&x, &g| if x > 0. { g } else { 0. })
    }
}
