use criterion::{criterion_group, criterion_main, Criterion};
use ndarray::{Array, IxDyn};
use ndarray_rand::rand_distr::{Normal, Uniform};
use ndarray_rand::RandomExt;
use perturb_rs::affine::Affine2;
use perturb_rs::dnn::{Dense, ReLU, Softmax, DNN};
use perturb_rs::model::SequentialClassifier;
use perturb_rs::oracle::{GradientOracle, ModelOracle};
use perturb_rs::{run_attack, AttackConfig, AttackKind, ImageShape};
use rand::Rng;
use rand::SeedableRng;
use rand_pcg::Pcg64;
use std::time::Duration;

fn build_classifier<R: Rng>(shape: ImageShape, rng: &mut R) -> SequentialClassifier {
    let input_size = shape.numel();
    let dist = Normal::new(0., 0.05).unwrap();
    let dnn = DNN::new(vec![
        Box::new(Dense::new(Affine2::new(
            Array::random_using((64, input_size), dist, rng),
            Array::random_using(64, dist, rng),
        ))),
        Box::new(ReLU::new(64)),
        Box::new(Dense::new(Affine2::new(
            Array::random_using((64, 64), dist, rng),
            Array::random_using(64, dist, rng),
        ))),
        Box::new(ReLU::new(64)),
        Box::new(Dense::new(Affine2::new(
            Array::random_using((10, 64), dist, rng),
            Array::random_using(10, dist, rng),
        ))),
        Box::new(Softmax::new(10)),
    ]);
    SequentialClassifier::new(dnn, shape).unwrap()
}

fn bench(c: &mut Criterion) {
    let mut rng = Pcg64::seed_from_u64(69);
    let shape = ImageShape::new(28, 28, 1);
    let model = build_classifier(shape, &mut rng);
    let x = Array::random_using(IxDyn(&shape.dims()), Uniform::new(0., 1.), &mut rng);
    let mut label = ndarray::Array1::zeros(10);
    label[3] = 1.;

    c.bench_function("oracle::evaluate mnist mlp", |b| {
        let oracle = ModelOracle::new(&model);
        b.iter(|| oracle.evaluate(&x.view(), &label.view()).unwrap())
    });

    let mut group = c.benchmark_group("run_attack");
    group.measurement_time(Duration::from_secs(20));
    for kind in [AttackKind::SingleStep, AttackKind::Iterative, AttackKind::Projected] {
        let config = AttackConfig::for_kind(kind);
        group.bench_function(format!("{kind} mnist mlp"), |b| {
            b.iter(|| run_attack(&x.view(), &model, &config).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench);
criterion_main!(benches);
