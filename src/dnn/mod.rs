pub mod argmax;
pub mod conv;
pub mod dense;
pub mod dnn;
pub mod layer;
pub mod relu;
pub mod softmax;

pub use argmax::Argmax;
pub use conv::Conv;
pub use dense::Dense;
pub use dnn::DNN;
pub use layer::Layer;
pub use relu::ReLU;
pub use softmax::Softmax;
