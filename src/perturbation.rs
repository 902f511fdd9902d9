//! Gradient-sign attack steps.
//!
//! * single-step: `clamp(x + eps * sign(grad(x)))`
//! * iterative: repeated `clamp(x_t + alpha * sign(grad(x_t)))`, projected into the
//!   epsilon ball around the original once, after the last step
//! * projected: the same step, projected into the epsilon ball after every step
//!
//! None of these mutate their input; each step allocates a fresh tensor.
use crate::error::{AttackError, Result};
use crate::oracle::{Evaluation, GradientOracle};
use crate::projection::{project_onto_ball, signed_step, ChannelRanges, ValidRange};
use crate::AdvFloat;
use log::{debug, warn};
use ndarray::{ArrayD, ArrayView1, ArrayViewD};
use std::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepParams<'a> {
    pub epsilon: AdvFloat,
    pub step_size: AdvFloat,
    pub iterations: usize,
    pub range: ValidRange,
    /// Tighter per-channel bounds inside `range`, applied after it.
    pub channels: Option<&'a ChannelRanges>,
}

impl StepParams<'_> {
    fn clamp_channels(&self, x: ArrayD<AdvFloat>) -> ArrayD<AdvFloat> {
        match self.channels {
            Some(channels) => channels.clamp(&x.view()),
            None => x,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Perturbation {
    pub tensor: ArrayD<AdvFloat>,
    pub steps_completed: usize,
    /// The deadline expired before all iterations ran.
    pub partial: bool,
}

/// Where the epsilon-ball projection happens in the iterative loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Projection {
    AfterLoop,
    EveryStep,
}

fn checked_evaluate<O: GradientOracle + ?Sized>(
    oracle: &O,
    x: &ArrayViewD<AdvFloat>,
    label: &ArrayView1<AdvFloat>,
    step: usize,
) -> Result<Evaluation> {
    let eval = oracle.evaluate(x, label)?;
    if !eval.loss.is_finite() {
        return Err(AttackError::NonFinite { step, what: "loss" });
    }
    if eval.gradient.iter().any(|g| !g.is_finite()) {
        return Err(AttackError::NonFinite {
            step,
            what: "gradient",
        });
    }
    Ok(eval)
}

/// Moves every element by `params.epsilon`; step size and iterations are unused.
///
/// # Errors
/// Propagates oracle errors; `NonFinite` for a NaN or infinite loss or gradient.
pub fn single_step<O: GradientOracle + ?Sized>(
    oracle: &O,
    x0: &ArrayViewD<AdvFloat>,
    label: &ArrayView1<AdvFloat>,
    params: &StepParams,
) -> Result<Perturbation> {
    let eval = checked_evaluate(oracle, x0, label, 0)?;
    debug!("single step: loss {}", eval.loss);
    let stepped = signed_step(x0, &eval.gradient.view(), params.epsilon, params.range);
    Ok(Perturbation {
        tensor: params.clamp_channels(stepped),
        steps_completed: 1,
        partial: false,
    })
}

/// Basic iterative method. The epsilon bound holds for the returned tensor but
/// not for the iterates passed to `visit`.
///
/// `visit` is called with the number of completed steps and the current iterate.
///
/// # Errors
/// See `single_step`.
pub fn iterative<O: GradientOracle + ?Sized>(
    oracle: &O,
    x0: &ArrayViewD<AdvFloat>,
    label: &ArrayView1<AdvFloat>,
    params: &StepParams,
    deadline: Option<Instant>,
    visit: impl FnMut(usize, &ArrayViewD<AdvFloat>),
) -> Result<Perturbation> {
    run_steps(
        oracle,
        x0,
        label,
        params,
        Projection::AfterLoop,
        deadline,
        visit,
    )
}

/// Projected gradient descent. Every iterate passed to `visit` is within
/// epsilon of `x0`.
///
/// # Errors
/// See `single_step`.
pub fn projected<O: GradientOracle + ?Sized>(
    oracle: &O,
    x0: &ArrayViewD<AdvFloat>,
    label: &ArrayView1<AdvFloat>,
    params: &StepParams,
    deadline: Option<Instant>,
    visit: impl FnMut(usize, &ArrayViewD<AdvFloat>),
) -> Result<Perturbation> {
    run_steps(
        oracle,
        x0,
        label,
        params,
        Projection::EveryStep,
        deadline,
        visit,
    )
}

fn run_steps<O: GradientOracle + ?Sized>(
    oracle: &O,
    x0: &ArrayViewD<AdvFloat>,
    label: &ArrayView1<AdvFloat>,
    params: &StepParams,
    projection: Projection,
    deadline: Option<Instant>,
    mut visit: impl FnMut(usize, &ArrayViewD<AdvFloat>),
) -> Result<Perturbation> {
    let mut x = x0.to_owned();
    let mut steps_completed = 0;
    let mut partial = false;

    for step in 0..params.iterations {
        if step > 0 && deadline.map_or(false, |d| Instant::now() >= d) {
            warn!(
                "deadline expired after {} of {} steps",
                step, params.iterations
            );
            partial = true;
            break;
        }
        let eval = checked_evaluate(oracle, &x.view(), label, step)?;
        debug!("step {}: loss {}", step, eval.loss);
        let stepped = signed_step(&x.view(), &eval.gradient.view(), params.step_size, params.range);
        x = params.clamp_channels(match projection {
            Projection::EveryStep => {
                project_onto_ball(&stepped.view(), x0, params.epsilon, params.range)
            }
            Projection::AfterLoop => stepped,
        });
        steps_completed = step + 1;
        visit(steps_completed, &x.view());
    }

    if projection == Projection::AfterLoop && steps_completed > 0 {
        x = params.clamp_channels(project_onto_ball(&x.view(), x0, params.epsilon, params.range));
    }

    Ok(Perturbation {
        tensor: x,
        steps_completed,
        partial,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::Classifier;
    use crate::oracle::ModelOracle;
    use crate::projection::linf_distance;
    use crate::tensorshape::ImageShape;
    use crate::test_util::*;
    use ndarray::{Array, Array1, IxDyn};
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Gradient of a fixed sign pattern, counting calls.
    struct FixedOracle {
        gradient: ArrayD<AdvFloat>,
        calls: AtomicUsize,
    }

    impl FixedOracle {
        fn new(gradient: ArrayD<AdvFloat>) -> Self {
            Self {
                gradient,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl GradientOracle for FixedOracle {
        fn evaluate(
            &self,
            _tensor: &ArrayViewD<AdvFloat>,
            _label: &ArrayView1<AdvFloat>,
        ) -> Result<Evaluation> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Evaluation {
                loss: 1.,
                gradient: self.gradient.clone(),
            })
        }

        fn forward(&self, _tensor: &ArrayViewD<AdvFloat>) -> Result<Array1<AdvFloat>> {
            Ok(Array1::from_elem(2, 0.5))
        }
    }

    fn tensor(values: Vec<AdvFloat>) -> ArrayD<AdvFloat> {
        let n = values.len();
        Array::from_shape_vec(IxDyn(&[1, 1, n, 1]), values).unwrap()
    }

    fn label() -> Array1<AdvFloat> {
        Array1::from_vec(vec![1., 0.])
    }

    fn params(epsilon: AdvFloat, step_size: AdvFloat, iterations: usize) -> StepParams<'static> {
        StepParams {
            epsilon,
            step_size,
            iterations,
            range: ValidRange::unit(),
            channels: None,
        }
    }

    #[test]
    fn test_single_step_calls_oracle_once() {
        for epsilon in [0., 0.01, 0.3, 1.] {
            let oracle = FixedOracle::new(tensor(vec![1., -1., 0.]));
            let x = tensor(vec![0.5, 0.5, 0.5]);
            single_step(&oracle, &x.view(), &label().view(), &params(epsilon, 0.01, 1)).unwrap();
            assert_eq!(oracle.calls(), 1);
        }
    }

    #[test]
    fn test_single_step_moves_by_epsilon() {
        let oracle = FixedOracle::new(tensor(vec![3., -0.2, 0.]));
        let x = tensor(vec![0.5, 0.5, 0.5]);
        let adv = single_step(&oracle, &x.view(), &label().view(), &params(0.25, 0.01, 1)).unwrap();
        assert_eq!(adv.tensor, tensor(vec![0.75, 0.25, 0.5]));
        assert_eq!(x, tensor(vec![0.5, 0.5, 0.5]));
    }

    #[test]
    fn test_zero_iterations_is_identity() {
        let oracle = FixedOracle::new(tensor(vec![1., -1., 1.]));
        let x = tensor(vec![0.1, 0.2, 0.3]);
        let p = params(0.1, 0.01, 0);
        let bim = iterative(&oracle, &x.view(), &label().view(), &p, None, |_, _| {}).unwrap();
        let pgd = projected(&oracle, &x.view(), &label().view(), &p, None, |_, _| {}).unwrap();
        assert_eq!(oracle.calls(), 0);
        for result in [bim, pgd] {
            assert_eq!(result.steps_completed, 0);
            assert!(result
                .tensor
                .iter()
                .zip(x.iter())
                .all(|(a, b)| a.to_bits() == b.to_bits()));
        }
    }

    #[test]
    fn test_iterative_calls_oracle_per_step() {
        let oracle = FixedOracle::new(tensor(vec![1., -1.]));
        let x = tensor(vec![0.5, 0.5]);
        iterative(&oracle, &x.view(), &label().view(), &params(0.1, 0.01, 7), None, |_, _| {}).unwrap();
        assert_eq!(oracle.calls(), 7);
    }

    #[test]
    fn test_projection_timing_differs() {
        // Constant gradient sign: each step moves 0.125, epsilon is 0.2
        let oracle = FixedOracle::new(tensor(vec![1., -1.]));
        let x = tensor(vec![0.5, 0.5]);
        let p = params(0.2, 0.125, 4);

        let mut bim_mid_loop = vec![];
        let bim = iterative(&oracle, &x.view(), &label().view(), &p, None, |_, it| {
            bim_mid_loop.push(linf_distance(it, &x.view()));
        })
        .unwrap();
        let mut pgd_mid_loop = vec![];
        let pgd = projected(&oracle, &x.view(), &label().view(), &p, None, |_, it| {
            pgd_mid_loop.push(linf_distance(it, &x.view()));
        })
        .unwrap();

        // Iterative only honours epsilon at the end
        assert!(bim_mid_loop.iter().any(|&d| d > p.epsilon));
        assert!(linf_distance(&bim.tensor.view(), &x.view()) <= p.epsilon + 1e-12);
        // Projected honours it after every step
        assert_eq!(pgd_mid_loop.len(), 4);
        assert!(pgd_mid_loop.iter().all(|&d| d <= p.epsilon + 1e-12));
        assert_eq!(bim.tensor, pgd.tensor);
        assert!((bim.tensor[[0, 0, 0, 0]] - 0.7).abs() < 1e-12);
        assert!((bim.tensor[[0, 0, 1, 0]] - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_non_finite_gradient_reports_step() {
        struct Exploding;
        impl GradientOracle for Exploding {
            fn evaluate(
                &self,
                tensor: &ArrayViewD<AdvFloat>,
                _label: &ArrayView1<AdvFloat>,
            ) -> Result<Evaluation> {
                // Finite on the clean input, NaN once the input has moved
                let moved = tensor.iter().any(|&v| v != 0.5);
                Ok(Evaluation {
                    loss: 1.,
                    gradient: tensor.mapv(|_| if moved { AdvFloat::NAN } else { 1. }),
                })
            }

            fn forward(&self, _tensor: &ArrayViewD<AdvFloat>) -> Result<Array1<AdvFloat>> {
                Ok(Array1::from_elem(2, 0.5))
            }
        }
        let x = tensor(vec![0.5, 0.5]);
        let res = projected(&Exploding, &x.view(), &label().view(), &params(0.1, 0.01, 5), None, |_, _| {});
        assert_eq!(
            res,
            Err(AttackError::NonFinite {
                step: 1,
                what: "gradient"
            })
        );
    }

    #[test]
    fn test_channel_ranges_bound_every_iterate() {
        // One pixel, two channels; the second may only move within [0.4, 0.6]
        let channels =
            ChannelRanges::new(vec![ValidRange::unit(), ValidRange::new(0.4, 0.6).unwrap()]).unwrap();
        let pixel = |a, b| Array::from_shape_vec(IxDyn(&[1, 1, 1, 2]), vec![a, b]).unwrap();
        let oracle = FixedOracle::new(pixel(1., 1.));
        let x = pixel(0.5, 0.5);
        let p = StepParams {
            channels: Some(&channels),
            ..params(0.3, 0.125, 4)
        };

        let fgsm = single_step(&oracle, &x.view(), &label().view(), &p).unwrap();
        let mut in_channels = true;
        let bim = iterative(&oracle, &x.view(), &label().view(), &p, None, |_, it| {
            in_channels &= channels.is_member(it);
        })
        .unwrap();
        let pgd = projected(&oracle, &x.view(), &label().view(), &p, None, |_, it| {
            in_channels &= channels.is_member(it);
        })
        .unwrap();
        assert!(in_channels);
        for res in [fgsm, bim, pgd] {
            assert!((res.tensor[[0, 0, 0, 0]] - 0.8).abs() < 1e-12);
            assert_eq!(res.tensor[[0, 0, 0, 1]], 0.6);
        }
    }

    #[test]
    fn test_expired_deadline_returns_partial() {
        let oracle = FixedOracle::new(tensor(vec![1., -1.]));
        let x = tensor(vec![0.5, 0.5]);
        let p = params(0.05, 0.125, 40);
        let deadline = Some(Instant::now());
        let res = iterative(&oracle, &x.view(), &label().view(), &p, deadline, |_, _| {}).unwrap();
        assert!(res.partial);
        assert_eq!(res.steps_completed, 1);
        assert!(linf_distance(&res.tensor.view(), &x.view()) <= p.epsilon + 1e-12);
    }

    proptest! {
        #[test]
        fn test_all_iterates_in_range(
            model in image_classifier(ImageShape::new(2, 2, 1), 3),
            x in unit_image(ImageShape::new(2, 2, 1)),
            epsilon in 0. ..=1.0f64,
            step_size in 0.001 .. 0.5f64,
            iterations in 0..12usize,
        ) {
            let range = ValidRange::unit();
            let oracle = ModelOracle::new(&model);
            let pred = model.predict(&x.view()).unwrap();
            let mut y = Array1::zeros(3);
            y[pred.top_class] = 1.;
            let p = StepParams { epsilon, step_size, iterations, range, channels: None };

            let fgsm = single_step(&oracle, &x.view(), &y.view(), &p).unwrap();
            prop_assert!(range.is_member(&fgsm.tensor.view()));
            prop_assert!(linf_distance(&fgsm.tensor.view(), &x.view()) <= epsilon + 1e-12);

            let mut in_range = true;
            let bim = iterative(&oracle, &x.view(), &y.view(), &p, None, |_, it| {
                in_range &= range.is_member(it);
            }).unwrap();
            prop_assert!(in_range);
            prop_assert!(range.is_member(&bim.tensor.view()));
            prop_assert!(linf_distance(&bim.tensor.view(), &x.view()) <= epsilon + 1e-12);

            let mut in_ball = true;
            let pgd = projected(&oracle, &x.view(), &y.view(), &p, None, |_, it| {
                in_ball &= range.is_member(it) && linf_distance(it, &x.view()) <= epsilon + 1e-12;
            }).unwrap();
            prop_assert!(in_ball);
            prop_assert_eq!(pgd.steps_completed, iterations);
        }
    }
}
