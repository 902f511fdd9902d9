use crate::AdvFloat;
use dyn_clone::DynClone;
use ndarray::Array1;
use std::fmt::{Debug, Display};

/// A stateless operation on flattened activations.
///
/// Layers must deterministically produce identical outputs from identical inputs.
/// `backward1` is the vector-Jacobian product: given the input the layer saw, the
/// output it produced, and a cotangent on that output, it returns the cotangent
/// on the input. Parameters are never touched.
#[typetag::serde(tag = "type")]
pub trait Layer: DynClone + Display + Debug + Send + Sync {
    fn input_dim(&self) -> usize;
    fn output_dim(&self) -> usize;

    fn forward1(&self, input: &Array1<AdvFloat>) -> Array1<AdvFloat>;

    fn backward1(
        &self,
        input: &Array1<AdvFloat>,
        output: &Array1<AdvFloat>,
        cotangent: &Array1<AdvFloat>,
    ) -> Array1<AdvFloat>;

    fn is_activation(&self) -> bool {
        false
    }

    fn is_differentiable(&self) -> bool {
        // Only piecewise-constant layers (e.g. Argmax) override this
        true
    }
}

dyn_clone::clone_trait_object!(Layer);
