use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Index;

/// Spatial shape of a single image tensor.
///
/// Tensors are laid out NHWC with a batch dimension of one, so an `ImageShape`
/// of `28x28x1` corresponds to an array of shape `[1, 28, 28, 1]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct ImageShape {
	pub height: usize,
	pub width: usize,
	pub channels: usize,
}

impl ImageShape {
	pub const fn new(height: usize, width: usize, channels: usize) -> Self {
		Self {
			height,
			width,
			channels,
		}
	}

	/// Full tensor dimensions, batch first.
	pub const fn dims(&self) -> [usize; 4] {
		[1, self.height, self.width, self.channels]
	}

	/// Number of scalar elements in one image.
	pub const fn numel(&self) -> usize {
		self.height * self.width * self.channels
	}

	pub fn is_compatible_with(&self, shape: &[usize]) -> bool {
		shape == self.dims()
	}

	/// # Errors
	/// Returns the offending shape if it is not `[1, h, w, c]`.
	pub fn from_tensor_shape(shape: &[usize]) -> Result<Self, Vec<usize>> {
		match *shape {
			[1, height, width, channels] => Ok(Self::new(height, width, channels)),
			_ => Err(shape.to_vec()),
		}
	}
}

impl Index<usize> for ImageShape {
	type Output = usize;

	fn index(&self, idx: usize) -> &usize {
		match idx {
			0 => &1,
			1 => &self.height,
			2 => &self.width,
			3 => &self.channels,
			_ => panic!("ImageShape index {} out of range", idx),
		}
	}
}

impl fmt::Display for ImageShape {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}x{}x{}", self.height, self.width, self.channels)
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn test_dims_are_nhwc() {
		let shape = ImageShape::new(28, 28, 1);
		assert_eq!(shape.dims(), [1, 28, 28, 1]);
		assert_eq!(shape.numel(), 784);
		assert_eq!(shape[3], 1);
		assert!(shape.is_compatible_with(&[1, 28, 28, 1]));
		assert!(!shape.is_compatible_with(&[28, 28, 1]));
	}

	#[test]
	fn test_from_tensor_shape() {
		assert_eq!(
			ImageShape::from_tensor_shape(&[1, 32, 32, 3]),
			Ok(ImageShape::new(32, 32, 3))
		);
		assert_eq!(
			ImageShape::from_tensor_shape(&[2, 32, 32, 3]),
			Err(vec![2, 32, 32, 3])
		);
	}
}
