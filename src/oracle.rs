//! Loss and input-gradient evaluation.
//!
//! The loss is categorical cross-entropy between the classifier's output
//! distribution and a one-hot label. Probabilities are clipped to
//! `[PROB_CLIP, 1 - PROB_CLIP]` before the log, and a clipped entry contributes
//! no gradient.
use crate::error::{AttackError, Result};
use crate::model::Classifier;
use crate::AdvFloat;
use ndarray::{Array1, ArrayD, ArrayView1, ArrayViewD, Zip};

pub const PROB_CLIP: AdvFloat = 1e-7;

#[derive(Clone, Debug, PartialEq)]
pub struct Evaluation {
    pub loss: AdvFloat,
    pub gradient: ArrayD<AdvFloat>,
}

pub trait GradientOracle: Sync {
    /// # Errors
    /// `GradientUnavailable` if no gradient can be computed; `ShapeMismatch` if
    /// `tensor` or `label` do not fit the model.
    fn evaluate(
        &self,
        tensor: &ArrayViewD<AdvFloat>,
        label: &ArrayView1<AdvFloat>,
    ) -> Result<Evaluation>;

    /// Forward pass of the wrapped model.
    ///
    /// # Errors
    /// See `Classifier::forward`.
    fn forward(&self, tensor: &ArrayViewD<AdvFloat>) -> Result<Array1<AdvFloat>>;
}

pub fn cross_entropy(
    probabilities: &ArrayView1<AdvFloat>,
    label: &ArrayView1<AdvFloat>,
) -> AdvFloat {
    -Zip::from(probabilities)
        .and(label)
        .fold(0., |acc, &p, &y| acc + y * p.max(PROB_CLIP).min(1. - PROB_CLIP).ln())
}

/// `dL/dp` for the clipped cross-entropy.
fn cross_entropy_cotangent(
    probabilities: &ArrayView1<AdvFloat>,
    label: &ArrayView1<AdvFloat>,
) -> Array1<AdvFloat> {
    Zip::from(probabilities).and(label).map_collect(|&p, &y| {
        if (PROB_CLIP..=1. - PROB_CLIP).contains(&p) {
            -y / p
        } else {
            0.
        }
    })
}

fn check_label(label: &ArrayView1<AdvFloat>, nclasses: usize) -> Result<()> {
    if label.len() == nclasses {
        Ok(())
    } else {
        Err(AttackError::shape_mismatch(&[nclasses], &[label.len()]))
    }
}

/// Reverse-mode oracle: one forward pass, one vector-Jacobian product.
#[derive(Debug, Clone, Copy)]
pub struct ModelOracle<'a, M: Classifier + ?Sized> {
    model: &'a M,
}

impl<'a, M: Classifier + ?Sized> ModelOracle<'a, M> {
    pub const fn new(model: &'a M) -> Self {
        Self { model }
    }
}

impl<'a, M: Classifier + ?Sized> GradientOracle for ModelOracle<'a, M> {
    fn evaluate(
        &self,
        tensor: &ArrayViewD<AdvFloat>,
        label: &ArrayView1<AdvFloat>,
    ) -> Result<Evaluation> {
        check_label(label, self.model.num_classes())?;
        let probabilities = self.model.forward(tensor)?;
        let loss = cross_entropy(&probabilities.view(), label);
        let cotangent = cross_entropy_cotangent(&probabilities.view(), label);
        let gradient = self.model.vjp(tensor, &cotangent.view())?;
        if gradient.shape() != tensor.shape() {
            return Err(AttackError::shape_mismatch(tensor.shape(), gradient.shape()));
        }
        Ok(Evaluation { loss, gradient })
    }

    fn forward(&self, tensor: &ArrayViewD<AdvFloat>) -> Result<Array1<AdvFloat>> {
        self.model.forward(tensor)
    }
}

/// Central finite differences of the loss, one pair of forward passes per element.
///
/// Only practical for small inputs; needs nothing from the model beyond `forward`.
#[derive(Debug, Clone, Copy)]
pub struct FiniteDifferenceOracle<'a, M: Classifier + ?Sized> {
    model: &'a M,
    step: AdvFloat,
}

impl<'a, M: Classifier + ?Sized> FiniteDifferenceOracle<'a, M> {
    pub const fn new(model: &'a M) -> Self {
        Self { model, step: 1e-5 }
    }

    #[must_use]
    pub const fn with_step(mut self, step: AdvFloat) -> Self {
        self.step = step;
        self
    }
}

impl<'a, M: Classifier + ?Sized> GradientOracle for FiniteDifferenceOracle<'a, M> {
    fn evaluate(
        &self,
        tensor: &ArrayViewD<AdvFloat>,
        label: &ArrayView1<AdvFloat>,
    ) -> Result<Evaluation> {
        check_label(label, self.model.num_classes())?;
        let loss_at = |t: &ArrayViewD<AdvFloat>| -> Result<AdvFloat> {
            Ok(cross_entropy(&self.model.forward(t)?.view(), label))
        };
        let loss = loss_at(tensor)?;
        let mut probe = tensor.to_owned();
        let mut gradient = ArrayD::zeros(tensor.raw_dim());
        for (idx, &x) in tensor.indexed_iter() {
            probe[&idx] = x + self.step;
            let plus = loss_at(&probe.view())?;
            probe[&idx] = x - self.step;
            let minus = loss_at(&probe.view())?;
            probe[&idx] = x;
            gradient[&idx] = (plus - minus) / (2. * self.step);
        }
        Ok(Evaluation { loss, gradient })
    }

    fn forward(&self, tensor: &ArrayViewD<AdvFloat>) -> Result<Array1<AdvFloat>> {
        self.model.forward(tensor)
    }
}
