#![cfg(test)]
use crate::affine::Affine2;
use crate::dnn::{Dense, ReLU, Softmax, DNN};
use crate::model::SequentialClassifier;
use crate::tensorshape::ImageShape;
use crate::AdvFloat;
use ndarray::{Array1, Array2, Array3, Array4, ArrayD, IxDyn};
use proptest::arbitrary::functor::ArbitraryF1;
use proptest::prelude::*;
use proptest::sample::SizeRange;

prop_compose! {
    pub fn array1(len: usize)(v in Vec::lift1_with(-10. .. 10., SizeRange::new(len..=len))) -> Array1<AdvFloat> {
        Array1::from_vec(v)
    }
}

prop_compose! {
    pub fn unit_array1(len: usize)(v in Vec::lift1_with(0. ..=1., SizeRange::new(len..=len))) -> Array1<AdvFloat> {
        Array1::from_vec(v)
    }
}

prop_compose! {
    pub fn array2(rows: usize, cols: usize)(v in Vec::lift1_with(-10. .. 10., SizeRange::new(rows * cols..=rows * cols))) -> Array2<AdvFloat> {
        Array2::from_shape_vec((rows, cols), v).unwrap()
    }
}

prop_compose! {
    pub fn array3(d0: usize, d1: usize, d2: usize)(v in Vec::lift1_with(-10. .. 10., SizeRange::new(d0 * d1 * d2..=d0 * d1 * d2))) -> Array3<AdvFloat> {
        Array3::from_shape_vec((d0, d1, d2), v).unwrap()
    }
}

prop_compose! {
    pub fn array4(d0: usize, d1: usize, d2: usize, d3: usize)(v in Vec::lift1_with(-10. .. 10., SizeRange::new(d0 * d1 * d2 * d3..=d0 * d1 * d2 * d3))) -> Array4<AdvFloat> {
        Array4::from_shape_vec((d0, d1, d2, d3), v).unwrap()
    }
}

prop_compose! {
    pub fn affine2(in_dim: usize, out_dim: usize)(basis in array2(out_dim, in_dim), shift in array1(out_dim)) -> Affine2 {
        Affine2::new(basis, shift)
    }
}

prop_compose! {
    /// Image tensor of shape `[1, h, w, c]` with values in `[0, 1]`.
    pub fn unit_image(shape: ImageShape)(v in unit_array1(shape.numel())) -> ArrayD<AdvFloat> {
        v.into_shape(IxDyn(&shape.dims())).unwrap()
    }
}

prop_compose! {
    /// Dense/ReLU stack ending in a dense layer with `output_size` logits.
    pub fn fc_dnn(input_size: usize, output_size: usize, nlayers: usize, max_layer_width: usize)(repr_sizes in Vec::lift1_with(1..max_layer_width, SizeRange::new(nlayers..=nlayers)).prop_map(move |mut x| {x.insert(0, input_size); x.push(output_size); x}))(affines in {let pairs = repr_sizes.iter().zip(repr_sizes.iter().skip(1)); pairs.map(|(&x, &y)| affine2(x,y)).collect::<Vec<_>>()}) -> DNN {
        let mut dnn = DNN::default();
        let n = affines.len();
        affines.into_iter().enumerate().for_each(|(i, aff)| {
            let output_dim = aff.output_dim();
            dnn.add_layer(Box::new(Dense::new(aff)));
            if i + 1 < n {
                dnn.add_layer(Box::new(ReLU::new(output_dim)));
            }
        });
        dnn
    }
}

prop_compose! {
    /// Small softmax classifier over a `shape` image, scaled so the softmax does not saturate.
    pub fn image_classifier(shape: ImageShape, nclasses: usize)(hidden in affine2(shape.numel(), 4), head in affine2(4, nclasses)) -> SequentialClassifier {
        let dnn = DNN::new(vec![
            Box::new(Dense::new(hidden * 0.05)),
            Box::new(ReLU::new(4)),
            Box::new(Dense::new(head * 0.05)),
            Box::new(Softmax::new(nclasses)),
        ]);
        SequentialClassifier::new(dnn, shape).unwrap()
    }
}

/// Whether any pre-activation feeding a ReLU lies within `margin` of zero.
pub fn near_relu_kink(dnn: &DNN, x: &Array1<AdvFloat>, margin: AdvFloat) -> bool {
    let trace = dnn.forward_trace(x);
    dnn.get_layers()
        .iter()
        .zip(trace.iter())
        .filter(|(layer, _)| layer.is_activation())
        .any(|(_, input)| input.iter().any(|v| v.abs() < margin))
}
