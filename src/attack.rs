//! Attack orchestration: validation, self-labelling, dispatch and result assembly.
use crate::error::{AttackError, Result};
use crate::model::{Classifier, Prediction};
use crate::oracle::{GradientOracle, ModelOracle};
use crate::perturbation::{iterative, projected, single_step, Perturbation, StepParams};
use crate::projection::{linf_distance, ChannelRanges, ValidRange};
use crate::AdvFloat;
use log::info;
use ndarray::{Array1, ArrayD, ArrayViewD};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttackKind {
    #[serde(alias = "fgsm")]
    SingleStep,
    #[serde(alias = "bim")]
    Iterative,
    #[serde(alias = "pgd")]
    Projected,
}

impl AttackKind {
    pub const fn short_name(self) -> &'static str {
        match self {
            Self::SingleStep => "fgsm",
            Self::Iterative => "bim",
            Self::Projected => "pgd",
        }
    }

    pub const fn is_iterative(self) -> bool {
        !matches!(self, Self::SingleStep)
    }
}

impl FromStr for AttackKind {
    type Err = AttackError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fgsm" | "single-step" => Ok(Self::SingleStep),
            "bim" | "iterative" => Ok(Self::Iterative),
            "pgd" | "projected" => Ok(Self::Projected),
            _ => Err(AttackError::UnsupportedAttackKind(s.to_string())),
        }
    }
}

impl Display for AttackKind {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.short_name())
    }
}

/// Parameters for one attack run.
///
/// Missing fields in serialized configs take the defaults of their kind, so
/// `{"kind": "bim"}` runs 10 iterations while `{"kind": "pgd"}` runs 40.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(from = "ConfigRepr", into = "ConfigRepr")]
pub struct AttackConfig {
    pub kind: AttackKind,
    pub epsilon: AdvFloat,
    /// Ignored by single-step attacks.
    pub step_size: AdvFloat,
    /// Ignored by single-step attacks.
    pub iterations: usize,
    pub range: ValidRange,
    /// Per-channel bounds within `range`, for inputs whose channels are normalized
    /// differently.
    pub channels: Option<ChannelRanges>,
    /// Wall-clock budget for iterative kinds.
    pub deadline: Option<Duration>,
}

impl AttackConfig {
    pub const DEFAULT_EPSILON: AdvFloat = 0.05;
    pub const DEFAULT_STEP_SIZE: AdvFloat = 0.01;

    pub const fn for_kind(kind: AttackKind) -> Self {
        let iterations = match kind {
            AttackKind::SingleStep => 1,
            AttackKind::Iterative => 10,
            AttackKind::Projected => 40,
        };
        Self {
            kind,
            epsilon: Self::DEFAULT_EPSILON,
            step_size: Self::DEFAULT_STEP_SIZE,
            iterations,
            range: ValidRange::unit(),
            channels: None,
            deadline: None,
        }
    }

    #[must_use]
    pub fn with_epsilon(mut self, epsilon: AdvFloat) -> Self {
        self.epsilon = epsilon;
        self
    }

    #[must_use]
    pub fn with_step_size(mut self, step_size: AdvFloat) -> Self {
        self.step_size = step_size;
        self
    }

    #[must_use]
    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    #[must_use]
    pub fn with_range(mut self, range: ValidRange) -> Self {
        self.range = range;
        self
    }

    #[must_use]
    pub fn with_channels(mut self, channels: ChannelRanges) -> Self {
        self.channels = Some(channels);
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// # Errors
    /// `InvalidEpsilon` or `InvalidStepSize`, or `Internal` if `json` is not a config.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| AttackError::Internal(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// `InvalidEpsilon` unless epsilon is finite and within `[0, range.span()]`.
    /// `InvalidStepSize` unless iterative kinds have a finite positive step.
    /// `InvalidRange` if a channel range reaches outside `range`.
    pub fn validate(&self) -> Result<()> {
        let max = self.range.span();
        if !self.epsilon.is_finite() || self.epsilon < 0. || self.epsilon > max {
            return Err(AttackError::InvalidEpsilon {
                epsilon: self.epsilon,
                max,
            });
        }
        if self.kind.is_iterative() && !(self.step_size.is_finite() && self.step_size > 0.) {
            return Err(AttackError::InvalidStepSize {
                step_size: self.step_size,
            });
        }
        if let Some(channels) = &self.channels {
            if let Some(r) = channels.ranges().iter().find(|r| !self.range.contains_range(r)) {
                return Err(AttackError::InvalidRange(format!(
                    "channel range {r} is not within {}",
                    self.range
                )));
            }
        }
        Ok(())
    }

    fn step_params(&self) -> StepParams<'_> {
        StepParams {
            epsilon: self.epsilon,
            step_size: self.step_size,
            iterations: self.iterations,
            range: self.range,
            channels: self.channels.as_ref(),
        }
    }
}

impl Default for AttackConfig {
    fn default() -> Self {
        Self::for_kind(AttackKind::Projected)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct ConfigRepr {
    #[serde(default = "default_kind")]
    kind: AttackKind,
    #[serde(default)]
    epsilon: Option<AdvFloat>,
    #[serde(default)]
    step_size: Option<AdvFloat>,
    #[serde(default)]
    iterations: Option<usize>,
    #[serde(default)]
    range: Option<ValidRange>,
    #[serde(default)]
    channels: Option<ChannelRanges>,
    #[serde(default)]
    deadline: Option<Duration>,
}

const fn default_kind() -> AttackKind {
    AttackKind::Projected
}

impl From<ConfigRepr> for AttackConfig {
    fn from(repr: ConfigRepr) -> Self {
        let base = Self::for_kind(repr.kind);
        Self {
            kind: repr.kind,
            epsilon: repr.epsilon.unwrap_or(base.epsilon),
            step_size: repr.step_size.unwrap_or(base.step_size),
            iterations: repr.iterations.unwrap_or(base.iterations),
            range: repr.range.unwrap_or(base.range),
            channels: repr.channels,
            deadline: repr.deadline,
        }
    }
}

impl From<AttackConfig> for ConfigRepr {
    fn from(config: AttackConfig) -> Self {
        Self {
            kind: config.kind,
            epsilon: Some(config.epsilon),
            step_size: Some(config.step_size),
            iterations: Some(config.iterations),
            range: Some(config.range),
            channels: config.channels,
            deadline: config.deadline,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AttackResult {
    pub original_prediction: Prediction,
    pub adversarial_prediction: Prediction,
    pub adversarial_tensor: ArrayD<AdvFloat>,
    /// The top class changed.
    pub success: bool,
    /// The deadline cut the run short.
    pub partial: bool,
    pub steps_completed: usize,
}

/// Attacks `model` on `tensor`, labelling with the model's own top class.
///
/// # Errors
/// Input errors for bad configs or tensors, `GradientUnavailable` from the model,
/// `NonFinite` if a step diverges and `Internal` if the model panics.
pub fn run_attack(
    tensor: &ArrayViewD<AdvFloat>,
    model: &dyn Classifier,
    config: &AttackConfig,
) -> Result<AttackResult> {
    config.validate()?;
    let shape = model.input_shape();
    if !shape.is_compatible_with(tensor.shape()) {
        return Err(AttackError::shape_mismatch(&shape.dims(), tensor.shape()));
    }
    run_attack_with_oracle(tensor, &ModelOracle::new(model), config)
}

/// As `run_attack`, with gradients and predictions from `oracle`.
///
/// # Errors
/// See `run_attack`.
pub fn run_attack_with_oracle<O: GradientOracle + ?Sized>(
    tensor: &ArrayViewD<AdvFloat>,
    oracle: &O,
    config: &AttackConfig,
) -> Result<AttackResult> {
    config.validate()?;
    if let Some(channels) = &config.channels {
        if tensor.shape().last() != Some(&channels.channels()) {
            let mut expected = tensor.shape().to_vec();
            if let Some(last) = expected.last_mut() {
                *last = channels.channels();
            }
            return Err(AttackError::shape_mismatch(&expected, tensor.shape()));
        }
    }
    let in_channels = config.channels.as_ref().map_or(true, |c| c.is_member(tensor));
    if !(in_channels && config.range.is_member(tensor)) {
        return Err(AttackError::OutOfRange {
            low: config.range.low,
            high: config.range.high,
        });
    }
    catch_unwind(AssertUnwindSafe(|| attack_unchecked(tensor, oracle, config)))
        .unwrap_or_else(|payload| Err(AttackError::Internal(panic_message(&*payload))))
}

fn attack_unchecked<O: GradientOracle + ?Sized>(
    tensor: &ArrayViewD<AdvFloat>,
    oracle: &O,
    config: &AttackConfig,
) -> Result<AttackResult> {
    let start = Instant::now();
    let original_prediction = Prediction::new(oracle.forward(tensor)?)?;
    let mut label = Array1::zeros(original_prediction.probabilities.len());
    label[original_prediction.top_class] = 1.;

    let deadline = config.deadline.map(|d| start + d);
    let params = config.step_params();
    let Perturbation {
        tensor: adversarial_tensor,
        steps_completed,
        partial,
    } = match config.kind {
        AttackKind::SingleStep => single_step(oracle, tensor, &label.view(), &params)?,
        AttackKind::Iterative => {
            iterative(oracle, tensor, &label.view(), &params, deadline, |_, _| {})?
        }
        AttackKind::Projected => {
            projected(oracle, tensor, &label.view(), &params, deadline, |_, _| {})?
        }
    };

    let adversarial_prediction =
        Prediction::at_step(oracle.forward(&adversarial_tensor.view())?, steps_completed)?;
    let success = adversarial_prediction.top_class != original_prediction.top_class;
    info!(
        "{} eps={} steps={}{}: class {} -> {} (linf {:.4}, {:?})",
        config.kind,
        config.epsilon,
        steps_completed,
        if partial { " (partial)" } else { "" },
        original_prediction.top_class,
        adversarial_prediction.top_class,
        linf_distance(&adversarial_tensor.view(), tensor),
        start.elapsed()
    );
    Ok(AttackResult {
        original_prediction,
        adversarial_prediction,
        adversarial_tensor,
        success,
        partial,
        steps_completed,
    })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .map_or_else(|| "model panicked".to_string(), |m| format!("model panicked: {m}"))
}

/// One independent unit of work for `run_attacks`.
#[derive(Clone, Debug)]
pub struct AttackJob {
    pub tensor: ArrayD<AdvFloat>,
    pub model: Arc<dyn Classifier>,
    pub config: AttackConfig,
}

/// Runs every job on the rayon pool. Results are in job order.
pub fn run_attacks(jobs: &[AttackJob]) -> Vec<Result<AttackResult>> {
    jobs.par_iter()
        .map(|job| run_attack(&job.tensor.view(), job.model.as_ref(), &job.config))
        .collect()
}
