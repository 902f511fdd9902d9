#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::similar_names)]
#![allow(clippy::module_name_repetitions)]
extern crate itertools;
extern crate ndarray;
extern crate ndarray_stats;
extern crate serde;

pub mod affine;
pub mod attack;
pub mod codec;
pub mod dnn;
pub mod error;
pub mod model;
pub mod oracle;
pub mod perturbation;
pub mod projection;
pub mod provider;
pub mod tensorshape;
pub mod test_util;

pub use attack::{
    run_attack, run_attack_with_oracle, run_attacks, AttackConfig, AttackJob, AttackKind,
    AttackResult,
};
pub use codec::{decode_image, encode_image, DisplayOptions, ModelFamily, NormalizationScheme};
pub use error::{AttackError, ErrorCategory, Result};
pub use model::{Classifier, ClassScore, Prediction};
pub use oracle::{Evaluation, FiniteDifferenceOracle, GradientOracle, ModelOracle};
pub use projection::{ChannelRanges, ValidRange};
pub use provider::{InMemoryModelProvider, ModelHandle, ModelProvider};
pub use tensorshape::ImageShape;

pub type AdvFloat = f64;
