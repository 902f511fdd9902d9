use crate::dnn::layer::Layer;
use crate::AdvFloat;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result};

/// Normalizes logits into a probability distribution.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Softmax {
    ndims: usize,
}

impl Softmax {
    pub const fn new(ndims: usize) -> Self {
        Self { ndims }
    }
}

impl Display for Softmax {
    fn fmt(&self, f: &mut Formatter) -> Result {
        write!(f, "Softmax")
    }
}

#[typetag::serde]
impl Layer for Softmax {
    fn input_dim(&self) -> usize {
        self.ndims
    }

    fn output_dim(&self) -> usize {
        self.ndims
    }

    fn forward1(&self, input: &Array1<AdvFloat>) -> Array1<AdvFloat> {
        let max = input.fold(AdvFloat::NEG_INFINITY, |acc, &x| acc.max(x));
        let exps = input.mapv(|x| (x - max).exp());
        let total = exps.sum();
        exps / total
    }

    /// `J^T g = p * (g - <g, p>)`
    fn backward1(
        &self,
        _input: &Array1<AdvFloat>,
        output: &Array1<AdvFloat>,
        cotangent: &Array1<AdvFloat>,
    ) -> Array1<AdvFloat> {
        let inner = output.dot(cotangent);
        output * &(cotangent - inner)
    }
}
