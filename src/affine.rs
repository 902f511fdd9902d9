//! Representation of affine transformations
use crate::AdvFloat;
use ndarray::{Array, Array1, Array2, ArrayView1, ArrayView2, Dimension, Ix2};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::ops::Mul;

pub type Affine2 = Affine<Ix2>;

/// Affine map data structure
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Affine<D: Dimension> {
    basis: Array<AdvFloat, D>,
    shift: Array1<AdvFloat>,
}

impl<D: Dimension> Display for Affine<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::result::Result<(), std::fmt::Error> {
        write!(
            f,
            "Basis {:?} Shift {:?}",
            self.basis.shape(),
            self.shift.shape()
        )
    }
}

impl<D: Dimension> Affine<D> {
    pub fn shift(&self) -> ArrayView1<AdvFloat> {
        self.shift.view()
    }
}

/// Assumes that the affine is f(x) = Ax + b
impl Affine2 {
    /// # Panics
    /// If improper shapes are passed in
    pub fn new(basis: Array2<AdvFloat>, shift: Array1<AdvFloat>) -> Self {
        debug_assert_eq!(basis.shape()[0], shift.len());
        Self { basis, shift }
    }

    pub fn basis(&self) -> ArrayView2<AdvFloat> {
        self.basis.view()
    }

    pub fn input_dim(&self) -> usize {
        self.basis.shape()[1]
    }

    pub fn output_dim(&self) -> usize {
        self.shift.len()
    }

    pub fn apply(&self, x: &ArrayView1<AdvFloat>) -> Array1<AdvFloat> {
        self.basis.dot(x) + &self.shift
    }

    /// Pulls a cotangent on the output back to the input: `A^T g`.
    ///
    /// The shift does not depend on the input, so it drops out.
    pub fn pullback(&self, cotangent: &ArrayView1<AdvFloat>) -> Array1<AdvFloat> {
        debug_assert_eq!(cotangent.len(), self.output_dim());
        self.basis.t().dot(cotangent)
    }
}

/// Scale Affine by scalar
impl<D: Dimension> Mul<AdvFloat> for Affine<D> {
    type Output = Self;

    fn mul(self, rhs: AdvFloat) -> Self {
        Self {
            basis: &self.basis * rhs,
            shift: &self.shift * rhs,
        }
    }
}

impl<'a, 'b> Mul<&'b Affine2> for &'a Affine2 {
    type Output = Affine2;

    #[allow(clippy::suspicious_arithmetic_impl)]
    fn mul(self, rhs: &'b Affine2) -> Affine2 {
        let basis = self.basis.dot(&rhs.basis);
        let shift = self.basis.dot(&rhs.shift) + self.shift.clone();
        Affine { basis, shift }
    }
}

#[cfg(test)]
mod tests {
    use crate::affine::Affine2;
    use crate::test_util::*;
    use ndarray::array;
    use proptest::prelude::*;

    #[test]
    fn test_pullback_is_transpose() {
        let aff = Affine2::new(array![[1., 2., 3.], [4., 5., 6.]], array![10., 20.]);
        let g = array![1., -1.];
        assert_eq!(aff.pullback(&g.view()), array![-3., -3., -3.]);
    }

    proptest! {
        #[test]
        fn test_affine_composability(start in array1(4), aff_1 in affine2(2, 3), aff_2 in affine2(4, 2)) {
            let result_1 = (&aff_1 * &aff_2).apply(&start.view());
            let result_2 = aff_1.apply(&aff_2.apply(&start.view()).view());
            prop_assert!(result_1.iter().zip(result_2.iter()).all(|(a, b)| (a - b).abs() < 1e-8));
        }

        #[test]
        fn test_pullback_adjoint(x in array1(3), g in array1(2), aff in affine2(3, 2)) {
            // <A x, g> == <x, A^T g>
            let linear = &aff.apply(&x.view()) - &aff.shift();
            let lhs = linear.dot(&g);
            let rhs: f64 = x.dot(&aff.pullback(&g.view()));
            prop_assert!((lhs - rhs).abs() < 1e-8 * (1. + lhs.abs()));
        }
    }
}
