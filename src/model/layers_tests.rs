use super::*;
use rand::SeedableRng;

const EPS: f32 = 1e-2;

fn rng() -> StdRng {
    StdRng::seed_from_u64(17)
}

fn random_tensor(rng: &mut StdRng, n: usize, c: usize, h: usize, w: usize) -> Tensor {
    let data = (0..n * c * h * w).map(|_| rng.gen_range(-1.0..1.0)).collect();
    Tensor::from_vec(n, c, h, w, data)
}

/// Σ out·r, a loss whose output gradient is exactly `r`
fn linear_loss(out: &Tensor, r: &Tensor) -> f32 {
    out.data.iter().zip(&r.data).map(|(a, b)| a * b).sum()
}

fn assert_close(analytic: f32, numeric: f32, what: &str) {
    let scale = analytic.abs().max(numeric.abs()).max(1.0);
    assert!(
        (analytic - numeric).abs() <= 2e-2 * scale,
        "{}: analytic {} vs numeric {}",
        what,
        analytic,
        numeric
    );
}

#[test]
fn test_conv_input_and_weight_gradients() {
    let mut rng = rng();
    let mut conv = Conv2d::new(2, 3, 0.0, &mut rng);
    let x = random_tensor(&mut rng, 2, 2, 4, 5);
    let r = random_tensor(&mut rng, 2, 3, 4, 5);

    let grad_input = conv.backward(&x, &r);

    for j in (0..x.len()).step_by(3) {
        let mut plus = x.clone();
        let mut minus = x.clone();
        plus.data[j] += EPS;
        minus.data[j] -= EPS;
        let numeric =
            (linear_loss(&conv.infer(&plus), &r) - linear_loss(&conv.infer(&minus), &r)) / (2.0 * EPS);
        assert_close(grad_input.data[j], numeric, &format!("conv dx[{}]", j));
    }

    let grad_weight = conv.grad_weight.clone();
    for j in (0..conv.weight.len()).step_by(5) {
        let original = conv.weight[j];
        conv.weight[j] = original + EPS;
        let up = linear_loss(&conv.infer(&x), &r);
        conv.weight[j] = original - EPS;
        let down = linear_loss(&conv.infer(&x), &r);
        conv.weight[j] = original;
        assert_close(grad_weight[j], (up - down) / (2.0 * EPS), &format!("conv dw[{}]", j));
    }

    let bias_grad: f32 = r.data[..20].iter().sum::<f32>() + r.data[60..80].iter().sum::<f32>();
    assert_close(conv.grad_bias[0], bias_grad, "conv db[0]");
}

#[test]
fn test_conv_same_padding_keeps_shape_and_center_tap() {
    let mut rng = rng();
    let mut conv = Conv2d::new(1, 1, 0.0, &mut rng);
    conv.weight = vec![0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0];
    let x = random_tensor(&mut rng, 1, 1, 3, 4);
    let out = conv.infer(&x);
    assert_eq!((out.h, out.w), (3, 4));
    assert_eq!(out.data, x.data);

    // Shift kernel: output(y, x) = input(y, x + 1), zero beyond the edge
    conv.weight = vec![0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0];
    let out = conv.infer(&x);
    assert_eq!(out.data[0], x.data[1]);
    assert_eq!(out.data[3], 0.0);
}

#[test]
fn test_dense_gradients() {
    let mut rng = rng();
    let mut dense = Dense::new(6, 4, 0.0, &mut rng);
    let x = random_tensor(&mut rng, 3, 6, 1, 1);
    let r = random_tensor(&mut rng, 3, 4, 1, 1);

    let grad_input = dense.backward(&x, &r);
    for j in 0..x.len() {
        let mut plus = x.clone();
        let mut minus = x.clone();
        plus.data[j] += EPS;
        minus.data[j] -= EPS;
        let numeric = (linear_loss(&dense.infer(&plus), &r) - linear_loss(&dense.infer(&minus), &r))
            / (2.0 * EPS);
        assert_close(grad_input.data[j], numeric, &format!("dense dx[{}]", j));
    }

    let grad_weight = dense.grad_weight.clone();
    for j in 0..dense.weight.len() {
        let original = dense.weight[j];
        dense.weight[j] = original + EPS;
        let up = linear_loss(&dense.infer(&x), &r);
        dense.weight[j] = original - EPS;
        let down = linear_loss(&dense.infer(&x), &r);
        dense.weight[j] = original;
        assert_close(grad_weight[j], (up - down) / (2.0 * EPS), &format!("dense dw[{}]", j));
    }
}

#[test]
fn test_l2_gradient_is_added_to_kernels() {
    let mut rng = rng();
    let mut plain = Dense::new(3, 2, 0.0, &mut rng);
    let mut regularized = plain.clone();
    regularized.l2 = 0.5;

    let x = random_tensor(&mut rng, 2, 3, 1, 1);
    let r = random_tensor(&mut rng, 2, 2, 1, 1);
    plain.backward(&x, &r);
    regularized.backward(&x, &r);

    for j in 0..plain.weight.len() {
        let expected = plain.grad_weight[j] + 2.0 * 0.5 * plain.weight[j];
        assert!((regularized.grad_weight[j] - expected).abs() < 1e-6);
    }
    assert_eq!(plain.grad_bias, regularized.grad_bias);

    let penalty = 0.5 * plain.weight.iter().map(|w| w * w).sum::<f32>();
    assert!((Layer::Dense(regularized).l2_penalty() - penalty).abs() < 1e-6);
}

#[test]
fn test_batch_norm_gradients() {
    let mut rng = rng();
    let mut bn = BatchNorm::new(2, 0.9, 1e-3);
    bn.gamma = vec![1.5, 0.7];
    bn.beta = vec![0.1, -0.2];
    let x = random_tensor(&mut rng, 3, 2, 2, 2);
    let r = random_tensor(&mut rng, 3, 2, 2, 2);

    let (_, cache) = bn.forward_train(&x);
    let grad_input = bn.backward(&cache, &r);

    for j in 0..x.len() {
        let mut plus = x.clone();
        let mut minus = x.clone();
        plus.data[j] += EPS;
        minus.data[j] -= EPS;
        let up = linear_loss(&bn.forward_train(&plus).0, &r);
        let down = linear_loss(&bn.forward_train(&minus).0, &r);
        assert_close(grad_input.data[j], (up - down) / (2.0 * EPS), &format!("bn dx[{}]", j));
    }

    // dβ is the sum of output gradients of the channel
    let expected_beta: f32 = (0..3)
        .map(|n| r.data[r.plane_offset(n, 1)..r.plane_offset(n, 1) + 4].iter().sum::<f32>())
        .sum();
    assert_close(bn.grad_beta[1], expected_beta, "bn dbeta[1]");
}

#[test]
fn test_batch_norm_inference_uses_running_statistics() {
    let mut bn = BatchNorm::new(1, 0.0, 1e-3);
    let x = Tensor::from_vec(4, 1, 1, 1, vec![1.0, 2.0, 3.0, 4.0]);
    bn.forward_train(&x);
    // Momentum 0 copies the batch statistics
    assert!((bn.running_mean[0] - 2.5).abs() < 1e-6);
    assert!((bn.running_var[0] - 5.0 / 3.0).abs() < 1e-5);

    let out = bn.infer(&Tensor::from_vec(1, 1, 1, 1, vec![2.5]));
    assert!(out.data[0].abs() < 1e-6);
}

#[test]
fn test_max_pool_routes_gradient_to_argmax() {
    let mut rng = rng();
    let mut layer = Layer::MaxPool2;
    let x = Tensor::from_vec(1, 1, 3, 4, vec![
        1.0, 5.0, 0.0, 2.0, //
        3.0, 4.0, 7.0, 1.0, //
        9.0, 9.0, 9.0, 9.0,
    ]);
    let (out, cache) = layer.forward_train(x, &mut rng);
    assert_eq!((out.h, out.w), (1, 2));
    assert_eq!(out.data, vec![5.0, 7.0]);

    let grad = layer.backward(cache, Tensor::from_vec(1, 1, 1, 2, vec![1.0, 2.0]));
    assert_eq!(grad.data[1], 1.0);
    assert_eq!(grad.data[6], 2.0);
    assert_eq!(grad.data.iter().sum::<f32>(), 3.0);
}

#[test]
fn test_global_average_pool_and_backward() {
    let mut rng = rng();
    let mut layer = Layer::GlobalAvgPool;
    let x = Tensor::from_vec(1, 2, 1, 2, vec![1.0, 3.0, -2.0, 2.0]);
    let (out, cache) = layer.forward_train(x, &mut rng);
    assert_eq!(out.data, vec![2.0, 0.0]);

    let grad = layer.backward(cache, Tensor::from_vec(1, 2, 1, 1, vec![1.0, 4.0]));
    assert_eq!(grad.data, vec![0.5, 0.5, 2.0, 2.0]);
}

#[test]
fn test_dropout_scales_kept_units_and_is_identity_at_inference() {
    let mut rng = rng();
    let mut layer = Layer::Dropout { rate: 0.5 };
    let x = Tensor::from_vec(1, 1000, 1, 1, vec![1.0; 1000]);

    assert_eq!(layer.infer(&x), x);

    let (out, _) = layer.forward_train(x, &mut rng);
    let kept = out.data.iter().filter(|&&v| v > 0.0).count();
    assert!(out.data.iter().all(|&v| v == 0.0 || (v - 2.0).abs() < 1e-6));
    assert!((400..600).contains(&kept), "kept {} of 1000", kept);
}

#[test]
fn test_relu_backward_masks_negative_inputs() {
    let mut rng = rng();
    let mut layer = Layer::Relu;
    let x = Tensor::from_vec(1, 1, 1, 3, vec![-1.0, 0.5, 2.0]);
    let (out, cache) = layer.forward_train(x, &mut rng);
    assert_eq!(out.data, vec![0.0, 0.5, 2.0]);
    let grad = layer.backward(cache, Tensor::from_vec(1, 1, 1, 3, vec![3.0, 3.0, 3.0]));
    assert_eq!(grad.data, vec![0.0, 3.0, 3.0]);
}
