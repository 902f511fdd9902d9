//! 2D convolution, lowered to an affine map over flattened NHWC data
use crate::affine::Affine2;
use crate::dnn::layer::Layer;
use crate::tensorshape::ImageShape;
use crate::AdvFloat;
use itertools::Itertools;
use ndarray::{Array1, Array2, Array3, Array4, ArrayView3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Serialized form of a `Conv`; the lowered affine is rebuilt on load.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ConvParams {
    kernel: Array4<AdvFloat>,
    bias: Array1<AdvFloat>,
    input_shape: ImageShape,
    strides: (usize, usize),
    padding: ((usize, usize), (usize, usize)),
}

/// Assumes that data is always in a flattened state.
/// Weights are of the shape: (`kernel_h`, `kernel_w`, `channels_in`, `channels_out`)
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(from = "ConvParams", into = "ConvParams")]
pub struct Conv {
    kernel: Array4<AdvFloat>, // (K_h, K_w, C_in, C_out) following tf convention
    bias: Array1<AdvFloat>,   // (C_out)
    input_shape: ImageShape,
    strides: (usize, usize),                   // (y, x)
    padding: ((usize, usize), (usize, usize)), // ((top, bottom), (left, right))
    affine: Affine2,
}

impl From<ConvParams> for Conv {
    fn from(p: ConvParams) -> Self {
        Self::new(p.kernel, p.bias, p.input_shape, p.strides, p.padding)
    }
}

impl From<Conv> for ConvParams {
    fn from(c: Conv) -> Self {
        Self {
            kernel: c.kernel,
            bias: c.bias,
            input_shape: c.input_shape,
            strides: c.strides,
            padding: c.padding,
        }
    }
}

impl Conv {
    /// # Panics
    /// If improper shapes are passed in
    pub fn new(
        kernel: Array4<AdvFloat>,
        bias: Array1<AdvFloat>,
        input_shape: ImageShape,
        strides: (usize, usize),
        padding: ((usize, usize), (usize, usize)),
    ) -> Self {
        assert_eq!(kernel.shape()[3], bias.len());
        assert_eq!(kernel.shape()[2], input_shape.channels);
        assert!(strides.0 > 0 && strides.1 > 0);
        let affine = Self::construct_affine(&kernel, &bias, input_shape, strides, padding);
        Self {
            kernel,
            bias,
            input_shape,
            strides,
            padding,
            affine,
        }
    }

    pub const fn input_shape(&self) -> ImageShape {
        self.input_shape
    }

    pub const fn get_affine(&self) -> &Affine2 {
        &self.affine
    }

    pub fn output_shape(&self) -> ImageShape {
        Self::calculate_output_shape(&self.kernel, self.input_shape, self.strides, self.padding)
    }

    fn calculate_output_shape(
        kernel: &Array4<AdvFloat>,
        input_shape: ImageShape,
        strides: (usize, usize),
        padding: ((usize, usize), (usize, usize)),
    ) -> ImageShape {
        let k_h = kernel.shape()[0];
        let k_w = kernel.shape()[1];
        let h_out =
            (input_shape.height + padding.0 .0 + padding.0 .1 - (k_h - 1) - 1) / strides.0 + 1;
        let w_out =
            (input_shape.width + padding.1 .0 + padding.1 .1 - (k_w - 1) - 1) / strides.1 + 1;
        ImageShape::new(h_out, w_out, kernel.shape()[3])
    }

    fn construct_affine(
        kernel: &Array4<AdvFloat>,
        bias: &Array1<AdvFloat>,
        input_shape: ImageShape,
        strides: (usize, usize),
        padding: ((usize, usize), (usize, usize)),
    ) -> Affine2 {
        let ImageShape {
            height: h_in,
            width: w_in,
            channels: c_in,
        } = input_shape;
        let ImageShape {
            height: h_out,
            width: w_out,
            channels: c_out,
        } = Self::calculate_output_shape(kernel, input_shape, strides, padding);
        let k_h = kernel.shape()[0];
        let k_w = kernel.shape()[1];

        let mut weight = Array2::<AdvFloat>::zeros((h_out * w_out * c_out, h_in * w_in * c_in));
        for (y_out, x_out) in (0..h_out).cartesian_product(0..w_out) {
            let y_0 = y_out * strides.0;
            let x_0 = x_out * strides.1;

            for k_y in 0..k_h {
                if y_0 + k_y < padding.0 .0 || y_0 + k_y >= h_in + padding.0 .0 {
                    // Padding value is 0
                    continue;
                }
                let y_in = y_0 + k_y - padding.0 .0;
                for k_x in 0..k_w {
                    if x_0 + k_x < padding.1 .0 || x_0 + k_x >= w_in + padding.1 .0 {
                        continue;
                    }
                    let x_in = x_0 + k_x - padding.1 .0;

                    for (f_in, f_out) in (0..c_in).cartesian_product(0..c_out) {
                        let input_idx = y_in * (w_in * c_in) + x_in * c_in + f_in;
                        let output_idx = y_out * (w_out * c_out) + x_out * c_out + f_out;
                        weight[[output_idx, input_idx]] = kernel[[k_y, k_x, f_in, f_out]];
                    }
                }
            }
        }

        let shift = Array1::from_iter(
            (0..h_out * w_out)
                .cartesian_product(0..c_out)
                .map(|(_, f_out)| bias[f_out]),
        );
        Affine2::new(weight, shift)
    }

    /// Direct convolution; used to check the lowered affine.
    ///
    /// # Panics
    /// If `data` does not match the input shape
    pub fn convolve(&self, data: ArrayView3<AdvFloat>) -> Array3<AdvFloat> {
        let ImageShape {
            height: h_in,
            width: w_in,
            channels: c_in,
        } = self.input_shape;
        let ImageShape {
            height: h_out,
            width: w_out,
            channels: c_out,
        } = self.output_shape();
        let k_h = self.kernel.shape()[0];
        let k_w = self.kernel.shape()[1];

        assert_eq!(data.shape(), &[h_in, w_in, c_in]);
        let mut output = Array3::<AdvFloat>::zeros((h_out, w_out, c_out));
        for ((y_out, x_out), f_out) in (0..h_out)
            .cartesian_product(0..w_out)
            .cartesian_product(0..c_out)
        {
            output[[y_out, x_out, f_out]] = self.bias[f_out];
        }

        for (y_out, x_out) in (0..h_out).cartesian_product(0..w_out) {
            let y_0 = y_out * self.strides.0;
            let x_0 = x_out * self.strides.1;

            for k_y in 0..k_h {
                if y_0 + k_y < self.padding.0 .0 || y_0 + k_y >= h_in + self.padding.0 .0 {
                    continue;
                }
                let y_in = y_0 + k_y - self.padding.0 .0;
                for k_x in 0..k_w {
                    if x_0 + k_x < self.padding.1 .0 || x_0 + k_x >= w_in + self.padding.1 .0 {
                        continue;
                    }
                    let x_in = x_0 + k_x - self.padding.1 .0;

                    for (f_in, f_out) in (0..c_in).cartesian_product(0..c_out) {
                        output[[y_out, x_out, f_out]] +=
                            data[[y_in, x_in, f_in]] * self.kernel[[k_y, k_x, f_in, f_out]];
                    }
                }
            }
        }
        output
    }
}

#[typetag::serde]
impl Layer for Conv {
    fn input_dim(&self) -> usize {
        self.affine.input_dim()
    }

    fn output_dim(&self) -> usize {
        self.affine.output_dim()
    }

    fn forward1(&self, input: &Array1<AdvFloat>) -> Array1<AdvFloat> {
        debug_assert_eq!(input.len(), self.input_dim());
        self.affine.apply(&input.view())
    }

    fn backward1(
        &self,
        _input: &Array1<AdvFloat>,
        _output: &Array1<AdvFloat>,
        cotangent: &Array1<AdvFloat>,
    ) -> Array1<AdvFloat> {
        self.affine.pullback(&cotangent.view())
    }
}

impl fmt::Display for Conv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Conv {}x{}, {}",
            self.kernel.shape()[0],
            self.kernel.shape()[1],
            self.kernel.shape()[3]
        )
    }
}
