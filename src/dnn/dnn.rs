use crate::dnn::layer::Layer;
use crate::error::{AttackError, Result};
use crate::AdvFloat;
use log::trace;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A sequential network over flattened activations.
#[derive(Clone, Default, Debug, Serialize, Deserialize)]
pub struct DNN {
    layers: Vec<Box<dyn Layer>>,
}

impl DNN {
    pub fn new(layers: Vec<Box<dyn Layer>>) -> Self {
        Self { layers }
    }

    pub fn add_layer(&mut self, layer: Box<dyn Layer>) {
        self.layers.push(layer);
    }

    pub fn get_layers(&self) -> &[Box<dyn Layer>] {
        &self.layers
    }

    pub fn input_dim(&self) -> Option<usize> {
        self.layers.first().map(|l| l.input_dim())
    }

    pub fn output_dim(&self) -> Option<usize> {
        self.layers.last().map(|l| l.output_dim())
    }

    /// Checks that consecutive layers agree on their dimensions.
    ///
    /// # Errors
    /// `ShapeMismatch` naming the first pair of layers that disagree.
    pub fn validate(&self) -> Result<()> {
        for (prev, next) in self.layers.iter().zip(self.layers.iter().skip(1)) {
            if prev.output_dim() != next.input_dim() {
                return Err(AttackError::shape_mismatch(
                    &[next.input_dim()],
                    &[prev.output_dim()],
                ));
            }
        }
        Ok(())
    }

    pub fn forward1(&self, input: &Array1<AdvFloat>) -> Array1<AdvFloat> {
        self.layers
            .iter()
            .fold(input.clone(), |x, layer| layer.forward1(&x))
    }

    /// Forward pass that keeps every intermediate activation, input first.
    pub fn forward_trace(&self, input: &Array1<AdvFloat>) -> Vec<Array1<AdvFloat>> {
        let mut activations = Vec::with_capacity(self.layers.len() + 1);
        activations.push(input.clone());
        for layer in &self.layers {
            let next = layer.forward1(activations.last().unwrap_or(input));
            activations.push(next);
        }
        activations
    }

    /// Reverse-mode vector-Jacobian product of the whole network.
    ///
    /// Returns `J(input)^T cotangent`, the gradient with respect to the input of
    /// `<forward1(input), cotangent>`.
    ///
    /// # Errors
    /// `GradientUnavailable` if any layer is not differentiable.
    pub fn vjp1(
        &self,
        input: &Array1<AdvFloat>,
        cotangent: &Array1<AdvFloat>,
    ) -> Result<Array1<AdvFloat>> {
        if let Some(layer) = self.layers.iter().find(|l| !l.is_differentiable()) {
            return Err(AttackError::GradientUnavailable(format!(
                "layer {} is not differentiable",
                layer
            )));
        }
        let activations = self.forward_trace(input);
        let grad = self
            .layers
            .iter()
            .zip(activations.windows(2))
            .rev()
            .fold(cotangent.clone(), |g, (layer, io)| {
                trace!("backward through {}", layer);
                layer.backward1(&io[0], &io[1], &g)
            });
        Ok(grad)
    }
}

impl fmt::Display for DNN {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let layers: Vec<String> = self.layers.iter().map(|x| format!("{}", x)).collect();
        write!(
            f,
            "Input {} => {}",
            self.input_dim().unwrap_or(0),
            layers.join(" => ")
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dnn::{Argmax, Dense, ReLU, Softmax};
    use crate::test_util::*;
    use ndarray::array;
    use proptest::prelude::*;

    #[test]
    fn test_forward_trace_matches_forward() {
        let dnn = DNN::new(vec![
            Box::new(Dense::from_parts(array![[1., -1.], [2., 0.5]], array![0., -1.])),
            Box::new(ReLU::new(2)),
            Box::new(Softmax::new(2)),
        ]);
        let x = array![0.25, 0.75];
        let trace = dnn.forward_trace(&x);
        assert_eq!(trace.len(), 4);
        assert_eq!(trace[0], x);
        assert_eq!(trace.last().unwrap(), &dnn.forward1(&x));
    }

    #[test]
    fn test_validate_rejects_mismatched_layers() {
        let dnn = DNN::new(vec![
            Box::new(Dense::from_parts(array![[1., -1.], [2., 0.5]], array![0., -1.])),
            Box::new(ReLU::new(3)),
        ]);
        assert_eq!(
            dnn.validate(),
            Err(AttackError::ShapeMismatch {
                expected: vec![3],
                actual: vec![2]
            })
        );
    }

    #[test]
    fn test_argmax_blocks_gradient() {
        let dnn = DNN::new(vec![
            Box::new(Dense::from_parts(array![[1., 0.], [0., 1.]], array![0., 0.])),
            Box::new(Argmax::new(2)),
        ]);
        let res = dnn.vjp1(&array![0.1, 0.2], &array![1., 0.]);
        assert!(matches!(res, Err(AttackError::GradientUnavailable(_))));
    }

    #[test]
    fn test_serde_roundtrip_preserves_forward() {
        let dnn = DNN::new(vec![
            Box::new(Dense::from_parts(array![[1., -1.], [2., 0.5]], array![0., -1.])),
            Box::new(ReLU::new(2)),
            Box::new(Softmax::new(2)),
        ]);
        let json = serde_json::to_string(&dnn).unwrap();
        let restored: DNN = serde_json::from_str(&json).unwrap();
        let x = array![0.3, 0.9];
        assert_eq!(dnn.forward1(&x), restored.forward1(&x));
    }

    proptest! {
        #[test]
        fn test_vjp_matches_finite_difference(dnn in fc_dnn(3, 2, 2, 4), x in array1(3), g in array1(2)) {
            let h = 1e-5;
            // The difference quotient is unreliable right at a ReLU switch
            prop_assume!(!near_relu_kink(&dnn, &x, 0.1));
            let analytic = dnn.vjp1(&x, &g).unwrap();
            for i in 0..3 {
                let mut plus = x.clone();
                plus[i] += h;
                let mut minus = x.clone();
                minus[i] -= h;
                let numeric = (dnn.forward1(&plus).dot(&g) - dnn.forward1(&minus).dot(&g)) / (2. * h);
                let scale = 1. + numeric.abs().max(analytic[i].abs());
                prop_assert!((analytic[i] - numeric).abs() < 1e-3 * scale);
            }
        }
    }
}
