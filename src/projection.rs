//! Range clamping and L-infinity ball projection.
//!
//! Every function here is pure: inputs are borrowed, outputs are freshly
//! allocated, and nothing is cached between calls.
use crate::error::{AttackError, Result};
use crate::AdvFloat;
use ndarray::{Array, ArrayD, ArrayView, ArrayViewD, Axis, Dimension, Zip};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Closed interval `[low, high]` that every tensor element must stay within.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct ValidRange {
    pub low: AdvFloat,
    pub high: AdvFloat,
}

impl ValidRange {
    /// # Errors
    /// `InvalidRange` if `low >= high` or either end is not finite.
    pub fn new(low: AdvFloat, high: AdvFloat) -> Result<Self> {
        if low.is_finite() && high.is_finite() && low < high {
            Ok(Self { low, high })
        } else {
            Err(AttackError::InvalidRange(format!("[{low}, {high}]")))
        }
    }

    pub const fn unit() -> Self {
        Self {
            low: 0.,
            high: 1.,
        }
    }

    pub const fn symmetric() -> Self {
        Self {
            low: -1.,
            high: 1.,
        }
    }

    pub fn span(&self) -> AdvFloat {
        self.high - self.low
    }

    pub fn clamp(&self, x: AdvFloat) -> AdvFloat {
        x.max(self.low).min(self.high)
    }

    pub fn is_member<D: Dimension>(&self, t: &ArrayView<AdvFloat, D>) -> bool {
        t.iter().all(|&x| self.contains(x))
    }

    pub fn contains(&self, x: AdvFloat) -> bool {
        self.low <= x && x <= self.high
    }

    pub fn contains_range(&self, other: &Self) -> bool {
        self.low <= other.low && other.high <= self.high
    }
}

impl Default for ValidRange {
    fn default() -> Self {
        Self::unit()
    }
}

impl Display for ValidRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.low, self.high)
    }
}

/// One range per channel of a channel-last tensor.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(try_from = "Vec<ValidRange>", into = "Vec<ValidRange>")]
pub struct ChannelRanges(Vec<ValidRange>);

impl ChannelRanges {
    /// # Errors
    /// `InvalidRange` if `ranges` is empty.
    pub fn new(ranges: Vec<ValidRange>) -> Result<Self> {
        if ranges.is_empty() {
            return Err(AttackError::InvalidRange("no channel ranges".to_string()));
        }
        Ok(Self(ranges))
    }

    pub fn channels(&self) -> usize {
        self.0.len()
    }

    pub fn ranges(&self) -> &[ValidRange] {
        &self.0
    }

    /// Smallest single range containing every channel's range.
    pub fn hull(&self) -> ValidRange {
        self.0.iter().fold(self.0[0], |hull, r| ValidRange {
            low: hull.low.min(r.low),
            high: hull.high.max(r.high),
        })
    }

    /// Clamps each element to the range of its channel, the last axis.
    pub fn clamp(&self, t: &ArrayViewD<AdvFloat>) -> ArrayD<AdvFloat> {
        let mut out = t.to_owned();
        if let Some(last) = out.ndim().checked_sub(1) {
            for mut lane in out.lanes_mut(Axis(last)) {
                lane.iter_mut()
                    .zip(&self.0)
                    .for_each(|(x, r)| *x = r.clamp(*x));
            }
        }
        out
    }

    /// False unless the last axis has one entry per channel.
    pub fn is_member(&self, t: &ArrayViewD<AdvFloat>) -> bool {
        t.shape().last() == Some(&self.0.len())
            && t.lanes(Axis(t.ndim() - 1))
                .into_iter()
                .all(|lane| lane.iter().zip(&self.0).all(|(&x, r)| r.contains(x)))
    }
}

impl TryFrom<Vec<ValidRange>> for ChannelRanges {
    type Error = AttackError;

    fn try_from(ranges: Vec<ValidRange>) -> Result<Self> {
        Self::new(ranges)
    }
}

impl From<ChannelRanges> for Vec<ValidRange> {
    fn from(ranges: ChannelRanges) -> Self {
        ranges.0
    }
}

/// Sign of a gradient element, with `sign(0) = 0`.
pub fn sign(x: AdvFloat) -> AdvFloat {
    if x > 0. {
        1.
    } else if x < 0. {
        -1.
    } else {
        0.
    }
}

pub fn clamp_range<D: Dimension>(
    t: &ArrayView<AdvFloat, D>,
    range: ValidRange,
) -> Array<AdvFloat, D> {
    t.mapv(|x| range.clamp(x))
}

pub fn project_linf_ball<D: Dimension>(
    delta: &ArrayView<AdvFloat, D>,
    epsilon: AdvFloat,
) -> Array<AdvFloat, D> {
    delta.mapv(|d| d.max(-epsilon).min(epsilon))
}

/// Pulls `candidate` back into the epsilon ball around `origin`, then into `range`.
pub fn project_onto_ball<D: Dimension>(
    candidate: &ArrayView<AdvFloat, D>,
    origin: &ArrayView<AdvFloat, D>,
    epsilon: AdvFloat,
    range: ValidRange,
) -> Array<AdvFloat, D> {
    let delta = project_linf_ball(&(candidate - origin).view(), epsilon);
    clamp_range(&(origin + &delta).view(), range)
}

/// Largest absolute elementwise difference.
pub fn linf_distance<D: Dimension>(
    a: &ArrayView<AdvFloat, D>,
    b: &ArrayView<AdvFloat, D>,
) -> AdvFloat {
    Zip::from(a)
        .and(b)
        .fold(0., |acc: AdvFloat, &x, &y| acc.max((x - y).abs()))
}

/// `clamp_range(x + scale * sign(gradient), range)`
pub fn signed_step<D: Dimension>(
    x: &ArrayView<AdvFloat, D>,
    gradient: &ArrayView<AdvFloat, D>,
    scale: AdvFloat,
    range: ValidRange,
) -> Array<AdvFloat, D> {
    let moved = Zip::from(x)
        .and(gradient)
        .map_collect(|&x, &g| x + scale * sign(g));
    clamp_range(&moved.view(), range)
}
