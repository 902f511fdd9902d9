#![allow(dead_code)]
use ndarray::{array, Array, Array1, ArrayD, ArrayView1, ArrayViewD, Dim, IxDyn};
use perturb_rs::affine::Affine2;
use perturb_rs::dnn::{Dense, ReLU, Softmax, DNN};
use perturb_rs::model::{Classifier, SequentialClassifier};
use perturb_rs::{AdvFloat, ImageShape, Result};
use rand::Rng;

pub fn affine2<R: Rng>(in_dim: usize, out_dim: usize, rng: &mut R) -> Affine2 {
    let basis_vec = (0..(in_dim * out_dim)).map(|_| rng.gen_range(-0.5..0.5)).collect();
    let shift_vec: Vec<f64> = (0..out_dim).map(|_| rng.gen_range(-0.1..0.1)).collect();
    let shape = Dim([out_dim, in_dim]);

    let basis = Array::from_shape_vec(shape, basis_vec).unwrap();
    let shift = Array::from(shift_vec);
    Affine2::new(basis, shift)
}

/// Dense/ReLU stack ending in a softmax over `nclasses`.
pub fn make_classifier<R: Rng>(
    shape: ImageShape,
    hidden: usize,
    nclasses: usize,
    rng: &mut R,
) -> SequentialClassifier {
    let mut dnn = DNN::default();
    dnn.add_layer(Box::new(Dense::new(affine2(shape.numel(), hidden, rng))));
    dnn.add_layer(Box::new(ReLU::new(hidden)));
    dnn.add_layer(Box::new(Dense::new(affine2(hidden, nclasses, rng))));
    dnn.add_layer(Box::new(Softmax::new(nclasses)));
    SequentialClassifier::new(dnn, shape).unwrap()
}

pub fn random_image<R: Rng>(
    shape: ImageShape,
    low: AdvFloat,
    high: AdvFloat,
    rng: &mut R,
) -> ArrayD<AdvFloat> {
    Array::from_shape_fn(IxDyn(&shape.dims()), |_| rng.gen_range(low..=high))
}

/// Two pixels scored by `[[1, -1], [-1, 1]]` followed by a softmax.
pub fn two_pixel_classifier() -> SequentialClassifier {
    let dnn = DNN::new(vec![
        Box::new(Dense::from_parts(array![[1., -1.], [-1., 1.]], array![0., 0.])),
        Box::new(Softmax::new(2)),
    ]);
    SequentialClassifier::new(dnn, ImageShape::new(1, 2, 1)).unwrap()
}

/// Same probabilities for every input.
#[derive(Debug)]
pub struct ConstantClassifier {
    pub shape: ImageShape,
    pub probabilities: Array1<AdvFloat>,
}

impl Classifier for ConstantClassifier {
    fn input_shape(&self) -> ImageShape {
        self.shape
    }

    fn num_classes(&self) -> usize {
        self.probabilities.len()
    }

    fn forward(&self, _input: &ArrayViewD<AdvFloat>) -> Result<Array1<AdvFloat>> {
        Ok(self.probabilities.clone())
    }

    fn vjp(
        &self,
        input: &ArrayViewD<AdvFloat>,
        _cotangent: &ArrayView1<AdvFloat>,
    ) -> Result<ArrayD<AdvFloat>> {
        Ok(ArrayD::zeros(input.raw_dim()))
    }
}

/// Predicts normally but panics when asked for a gradient.
#[derive(Debug)]
pub struct PanickingClassifier(pub SequentialClassifier);

impl Classifier for PanickingClassifier {
    fn input_shape(&self) -> ImageShape {
        self.0.input_shape()
    }

    fn num_classes(&self) -> usize {
        self.0.num_classes()
    }

    fn forward(&self, input: &ArrayViewD<AdvFloat>) -> Result<Array1<AdvFloat>> {
        self.0.forward(input)
    }

    fn vjp(
        &self,
        _input: &ArrayViewD<AdvFloat>,
        _cotangent: &ArrayView1<AdvFloat>,
    ) -> Result<ArrayD<AdvFloat>> {
        panic!("backend crashed")
    }
}
