//! The classifier capability the attack engine consumes.
//!
//! Anything that can score an image and pull a cotangent on those scores back to
//! the input can be attacked. The engine only ever holds `&dyn Classifier`, so
//! implementations are never mutated by an attack.
use crate::dnn::DNN;
use crate::error::{AttackError, Result};
use crate::tensorshape::ImageShape;
use crate::AdvFloat;
use ndarray::{Array1, ArrayD, ArrayView1, ArrayViewD, IxDyn};
use ndarray_stats::QuantileExt;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

pub trait Classifier: Debug + Send + Sync {
    fn input_shape(&self) -> ImageShape;

    fn num_classes(&self) -> usize;

    /// Class probabilities for a `[1, h, w, c]` input.
    ///
    /// # Errors
    /// `ShapeMismatch` if the input does not match `input_shape`.
    fn forward(&self, input: &ArrayViewD<AdvFloat>) -> Result<Array1<AdvFloat>>;

    /// Gradient with respect to `input` of `<forward(input), cotangent>`.
    ///
    /// # Errors
    /// `GradientUnavailable` if the model cannot be differentiated, `ShapeMismatch`
    /// on bad input or cotangent shapes.
    fn vjp(
        &self,
        input: &ArrayViewD<AdvFloat>,
        cotangent: &ArrayView1<AdvFloat>,
    ) -> Result<ArrayD<AdvFloat>>;

    /// # Errors
    /// See `forward`.
    fn predict(&self, input: &ArrayViewD<AdvFloat>) -> Result<Prediction> {
        Prediction::new(self.forward(input)?)
    }
}

/// A `DNN` whose first layer reads a flattened NHWC image.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SequentialClassifier {
    dnn: DNN,
    input_shape: ImageShape,
}

impl SequentialClassifier {
    /// # Errors
    /// `ShapeMismatch` if the network's layers disagree with each other or with
    /// `input_shape`.
    pub fn new(dnn: DNN, input_shape: ImageShape) -> Result<Self> {
        dnn.validate()?;
        match dnn.input_dim() {
            Some(dim) if dim == input_shape.numel() => Ok(Self { dnn, input_shape }),
            Some(dim) => Err(AttackError::shape_mismatch(&[input_shape.numel()], &[dim])),
            None => Err(AttackError::shape_mismatch(&[input_shape.numel()], &[])),
        }
    }

    pub const fn dnn(&self) -> &DNN {
        &self.dnn
    }

    fn flatten(&self, input: &ArrayViewD<AdvFloat>) -> Result<Array1<AdvFloat>> {
        if !self.input_shape.is_compatible_with(input.shape()) {
            return Err(AttackError::shape_mismatch(
                &self.input_shape.dims(),
                input.shape(),
            ));
        }
        Ok(input.iter().copied().collect())
    }
}

impl Classifier for SequentialClassifier {
    fn input_shape(&self) -> ImageShape {
        self.input_shape
    }

    fn num_classes(&self) -> usize {
        self.dnn.output_dim().unwrap_or(0)
    }

    fn forward(&self, input: &ArrayViewD<AdvFloat>) -> Result<Array1<AdvFloat>> {
        Ok(self.dnn.forward1(&self.flatten(input)?))
    }

    fn vjp(
        &self,
        input: &ArrayViewD<AdvFloat>,
        cotangent: &ArrayView1<AdvFloat>,
    ) -> Result<ArrayD<AdvFloat>> {
        if cotangent.len() != self.num_classes() {
            return Err(AttackError::shape_mismatch(
                &[self.num_classes()],
                &[cotangent.len()],
            ));
        }
        let flat = self.flatten(input)?;
        let grad = self.dnn.vjp1(&flat, &cotangent.to_owned())?;
        grad.into_shape(IxDyn(&self.input_shape.dims()))
            .map_err(|e| AttackError::Internal(e.to_string()))
    }
}

/// Model output on one image.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Prediction {
    pub probabilities: Array1<AdvFloat>,
    pub top_class: usize,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ClassScore {
    pub class: usize,
    pub class_name: String,
    pub probability: AdvFloat,
}

impl Prediction {
    /// # Errors
    /// `NonFinite` if any score is NaN or infinite, `ShapeMismatch` if there are
    /// no scores at all.
    pub fn new(probabilities: Array1<AdvFloat>) -> Result<Self> {
        Self::at_step(probabilities, 0)
    }

    /// As `new`, for scores of an input produced by `step` attack steps.
    ///
    /// # Errors
    /// See `new`; a `NonFinite` error names `step`.
    pub fn at_step(probabilities: Array1<AdvFloat>, step: usize) -> Result<Self> {
        if probabilities.iter().any(|p| !p.is_finite()) {
            return Err(AttackError::NonFinite {
                step,
                what: "prediction",
            });
        }
        let top_class = probabilities
            .argmax()
            .map_err(|_| AttackError::shape_mismatch(&[1], &[0]))?;
        Ok(Self {
            probabilities,
            top_class,
        })
    }

    /// The `k` most likely classes, best first. Ties keep the lower index first.
    /// Classes without a name are labelled by their index.
    pub fn top_k(&self, k: usize, class_names: &[String]) -> Vec<ClassScore> {
        let mut order: Vec<usize> = (0..self.probabilities.len()).collect();
        order.sort_by_key(|&i| std::cmp::Reverse(OrderedFloat(self.probabilities[i])));
        order
            .into_iter()
            .take(k)
            .map(|class| ClassScore {
                class,
                class_name: class_names
                    .get(class)
                    .cloned()
                    .unwrap_or_else(|| class.to_string()),
                probability: self.probabilities[class],
            })
            .collect()
    }
}
