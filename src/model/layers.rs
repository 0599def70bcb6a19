// Layers module - building blocks of the convolutional network
//
// Every layer has two forward paths:
// - `forward_train` uses batch statistics and dropout and returns the cache
//   its `backward` needs
// - `infer` is deterministic and borrows the layer immutably, so a trained
//   network can be shared between threads
//
// Gradients are recomputed (not accumulated) on every backward pass; the L2
// penalty gradient 2λw is folded into kernel gradients there.

use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::tensor::Tensor;

/// Glorot-uniform initialization
fn glorot_uniform(rng: &mut StdRng, fan_in: usize, fan_out: usize, count: usize) -> Vec<f32> {
    let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
    (0..count).map(|_| rng.gen_range(-limit..limit)).collect()
}

fn reset_grad(grad: &mut Vec<f32>, len: usize) {
    grad.clear();
    grad.resize(len, 0.0);
}

/// Output columns `x0..x1` whose source column `x + kx - 1` exists
fn column_range(kx: usize, width: usize) -> (usize, usize) {
    let x0 = if kx == 0 { 1 } else { 0 };
    let x1 = (width + 1).saturating_sub(kx).min(width);
    (x0, x1)
}

/// 3×3 convolution, stride 1, zero "same" padding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Conv2d {
    pub in_channels: usize,
    pub out_channels: usize,
    pub l2: f32,
    /// Shape [out][in][3][3]
    weight: Vec<f32>,
    bias: Vec<f32>,
    #[serde(skip)]
    grad_weight: Vec<f32>,
    #[serde(skip)]
    grad_bias: Vec<f32>,
}

impl Conv2d {
    pub fn new(in_channels: usize, out_channels: usize, l2: f32, rng: &mut StdRng) -> Self {
        Self {
            in_channels,
            out_channels,
            l2,
            weight: glorot_uniform(
                rng,
                in_channels * 9,
                out_channels * 9,
                out_channels * in_channels * 9,
            ),
            bias: vec![0.0; out_channels],
            grad_weight: Vec::new(),
            grad_bias: Vec::new(),
        }
    }

    fn kernel(&self, o: usize, i: usize) -> &[f32] {
        let start = (o * self.in_channels + i) * 9;
        &self.weight[start..start + 9]
    }

    pub fn infer(&self, x: &Tensor) -> Tensor {
        let (h, w) = (x.h, x.w);
        let plane = h * w;
        let mut out = Tensor::zeros(x.n, self.out_channels, h, w);

        for n in 0..x.n {
            for o in 0..self.out_channels {
                let out_offset = out.plane_offset(n, o);
                let out_plane = &mut out.data[out_offset..out_offset + plane];
                out_plane.fill(self.bias[o]);

                for i in 0..self.in_channels {
                    let in_offset = x.plane_offset(n, i);
                    let in_plane = &x.data[in_offset..in_offset + plane];
                    let kernel = self.kernel(o, i);

                    for ky in 0..3 {
                        for kx in 0..3 {
                            let wv = kernel[ky * 3 + kx];
                            let (x0, x1) = column_range(kx, w);
                            if x0 >= x1 {
                                continue;
                            }
                            for y in 0..h {
                                let sy = y + ky;
                                if sy < 1 || sy > h {
                                    continue;
                                }
                                let src = (sy - 1) * w + x0 + kx - 1;
                                let dst = y * w + x0;
                                let out_row = &mut out_plane[dst..dst + (x1 - x0)];
                                let in_row = &in_plane[src..src + (x1 - x0)];
                                for (o_v, &i_v) in out_row.iter_mut().zip(in_row) {
                                    *o_v += wv * i_v;
                                }
                            }
                        }
                    }
                }
            }
        }

        out
    }

    pub fn backward(&mut self, input: &Tensor, grad: &Tensor) -> Tensor {
        let (h, w) = (input.h, input.w);
        let plane = h * w;
        reset_grad(&mut self.grad_weight, self.weight.len());
        reset_grad(&mut self.grad_bias, self.bias.len());
        let mut grad_input = input.same_shape();

        for n in 0..input.n {
            for o in 0..self.out_channels {
                let g_offset = grad.plane_offset(n, o);
                let g_plane = &grad.data[g_offset..g_offset + plane];
                self.grad_bias[o] += g_plane.iter().sum::<f32>();

                for i in 0..self.in_channels {
                    let in_offset = input.plane_offset(n, i);
                    let in_plane = &input.data[in_offset..in_offset + plane];
                    let k_start = (o * self.in_channels + i) * 9;

                    for ky in 0..3 {
                        for kx in 0..3 {
                            let (x0, x1) = column_range(kx, w);
                            if x0 >= x1 {
                                continue;
                            }
                            let wv = self.weight[k_start + ky * 3 + kx];
                            let mut dw = 0.0f32;
                            for y in 0..h {
                                let sy = y + ky;
                                if sy < 1 || sy > h {
                                    continue;
                                }
                                let src = (sy - 1) * w + x0 + kx - 1;
                                let dst = y * w + x0;
                                let len = x1 - x0;
                                let g_row = &g_plane[dst..dst + len];
                                let in_row = &in_plane[src..src + len];
                                dw += g_row.iter().zip(in_row).map(|(g, v)| g * v).sum::<f32>();

                                let gi = &mut grad_input.data
                                    [in_offset + src..in_offset + src + len];
                                for (gi_v, &g_v) in gi.iter_mut().zip(g_row) {
                                    *gi_v += wv * g_v;
                                }
                            }
                            self.grad_weight[k_start + ky * 3 + kx] += dw;
                        }
                    }
                }
            }
        }

        if self.l2 > 0.0 {
            for (g, &wv) in self.grad_weight.iter_mut().zip(&self.weight) {
                *g += 2.0 * self.l2 * wv;
            }
        }

        grad_input
    }

    fn l2_penalty(&self) -> f32 {
        self.l2 * self.weight.iter().map(|w| w * w).sum::<f32>()
    }
}

/// Batch normalization over channels (N, H and W reduced)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct BatchNorm {
    pub channels: usize,
    pub momentum: f32,
    pub epsilon: f32,
    gamma: Vec<f32>,
    beta: Vec<f32>,
    running_mean: Vec<f32>,
    running_var: Vec<f32>,
    #[serde(skip)]
    grad_gamma: Vec<f32>,
    #[serde(skip)]
    grad_beta: Vec<f32>,
}

/// Normalized activations and per-channel 1/σ of a training batch
#[derive(Debug, Clone)]
pub(crate) struct BatchNormCache {
    x_hat: Vec<f32>,
    inv_std: Vec<f32>,
}

impl BatchNorm {
    pub fn new(channels: usize, momentum: f32, epsilon: f32) -> Self {
        Self {
            channels,
            momentum,
            epsilon,
            gamma: vec![1.0; channels],
            beta: vec![0.0; channels],
            running_mean: vec![0.0; channels],
            running_var: vec![1.0; channels],
            grad_gamma: Vec::new(),
            grad_beta: Vec::new(),
        }
    }

    pub fn forward_train(&mut self, x: &Tensor) -> (Tensor, BatchNormCache) {
        let plane = x.plane_len();
        let count = (x.n * plane) as f32;
        let mut out = x.same_shape();
        let mut x_hat = vec![0.0f32; x.len()];
        let mut inv_std = vec![0.0f32; self.channels];

        for c in 0..self.channels {
            let mut sum = 0.0f64;
            for n in 0..x.n {
                let offset = x.plane_offset(n, c);
                sum += x.data[offset..offset + plane].iter().map(|&v| v as f64).sum::<f64>();
            }
            let mean = (sum / count as f64) as f32;

            let mut sq = 0.0f64;
            for n in 0..x.n {
                let offset = x.plane_offset(n, c);
                sq += x.data[offset..offset + plane]
                    .iter()
                    .map(|&v| ((v - mean) as f64).powi(2))
                    .sum::<f64>();
            }
            let var = (sq / count as f64) as f32;
            let istd = 1.0 / (var + self.epsilon).sqrt();
            inv_std[c] = istd;

            for n in 0..x.n {
                let offset = x.plane_offset(n, c);
                for j in offset..offset + plane {
                    let xh = (x.data[j] - mean) * istd;
                    x_hat[j] = xh;
                    out.data[j] = self.gamma[c] * xh + self.beta[c];
                }
            }

            // Moving statistics track the unbiased batch variance
            let unbiased = if count > 1.0 {
                var * count / (count - 1.0)
            } else {
                var
            };
            self.running_mean[c] = self.momentum * self.running_mean[c] + (1.0 - self.momentum) * mean;
            self.running_var[c] =
                self.momentum * self.running_var[c] + (1.0 - self.momentum) * unbiased;
        }

        (out, BatchNormCache { x_hat, inv_std })
    }

    pub fn infer(&self, x: &Tensor) -> Tensor {
        let plane = x.plane_len();
        let mut out = x.same_shape();
        for c in 0..self.channels {
            let scale = self.gamma[c] / (self.running_var[c] + self.epsilon).sqrt();
            let shift = self.beta[c] - self.running_mean[c] * scale;
            for n in 0..x.n {
                let offset = x.plane_offset(n, c);
                for j in offset..offset + plane {
                    out.data[j] = x.data[j] * scale + shift;
                }
            }
        }
        out
    }

    pub fn backward(&mut self, cache: &BatchNormCache, grad: &Tensor) -> Tensor {
        let plane = grad.plane_len();
        let count = (grad.n * plane) as f32;
        reset_grad(&mut self.grad_gamma, self.channels);
        reset_grad(&mut self.grad_beta, self.channels);
        let mut grad_input = grad.same_shape();

        for c in 0..self.channels {
            let mut sum_dy = 0.0f32;
            let mut sum_dy_xhat = 0.0f32;
            for n in 0..grad.n {
                let offset = grad.plane_offset(n, c);
                for j in offset..offset + plane {
                    sum_dy += grad.data[j];
                    sum_dy_xhat += grad.data[j] * cache.x_hat[j];
                }
            }
            self.grad_beta[c] = sum_dy;
            self.grad_gamma[c] = sum_dy_xhat;

            let scale = self.gamma[c] * cache.inv_std[c] / count;
            for n in 0..grad.n {
                let offset = grad.plane_offset(n, c);
                for j in offset..offset + plane {
                    grad_input.data[j] =
                        scale * (count * grad.data[j] - sum_dy - cache.x_hat[j] * sum_dy_xhat);
                }
            }
        }

        grad_input
    }
}

/// 2×2 max pooling, stride 2, odd trailing rows/columns dropped
#[derive(Debug, Clone)]
pub(crate) struct MaxPoolCache {
    input_shape: (usize, usize, usize, usize),
    argmax: Vec<usize>,
}

fn max_pool(x: &Tensor) -> (Tensor, Vec<usize>) {
    let (oh, ow) = (x.h / 2, x.w / 2);
    let mut out = Tensor::zeros(x.n, x.c, oh, ow);
    let mut argmax = vec![0usize; out.len()];

    for n in 0..x.n {
        for c in 0..x.c {
            let in_offset = x.plane_offset(n, c);
            let out_offset = out.plane_offset(n, c);
            for y in 0..oh {
                for xo in 0..ow {
                    let mut best_index = in_offset + (2 * y) * x.w + 2 * xo;
                    let mut best = x.data[best_index];
                    for (dy, dx) in [(0, 1), (1, 0), (1, 1)] {
                        let j = in_offset + (2 * y + dy) * x.w + 2 * xo + dx;
                        if x.data[j] > best {
                            best = x.data[j];
                            best_index = j;
                        }
                    }
                    out.data[out_offset + y * ow + xo] = best;
                    argmax[out_offset + y * ow + xo] = best_index;
                }
            }
        }
    }

    (out, argmax)
}

/// Inverted dropout mask (0 or 1/(1-rate))
#[derive(Debug, Clone)]
pub(crate) struct DropoutCache {
    mask: Vec<f32>,
}

/// Fully connected layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Dense {
    pub in_features: usize,
    pub out_features: usize,
    pub l2: f32,
    /// Shape [in][out]
    weight: Vec<f32>,
    bias: Vec<f32>,
    #[serde(skip)]
    grad_weight: Vec<f32>,
    #[serde(skip)]
    grad_bias: Vec<f32>,
}

impl Dense {
    pub fn new(in_features: usize, out_features: usize, l2: f32, rng: &mut StdRng) -> Self {
        Self {
            in_features,
            out_features,
            l2,
            weight: glorot_uniform(rng, in_features, out_features, in_features * out_features),
            bias: vec![0.0; out_features],
            grad_weight: Vec::new(),
            grad_bias: Vec::new(),
        }
    }

    pub fn infer(&self, x: &Tensor) -> Tensor {
        let mut out = Tensor::zeros(x.n, self.out_features, 1, 1);
        for n in 0..x.n {
            let input = &x.data[n * self.in_features..(n + 1) * self.in_features];
            let output = &mut out.data[n * self.out_features..(n + 1) * self.out_features];
            output.copy_from_slice(&self.bias);
            for (i, &v) in input.iter().enumerate() {
                let row = &self.weight[i * self.out_features..(i + 1) * self.out_features];
                for (o, &wv) in output.iter_mut().zip(row) {
                    *o += v * wv;
                }
            }
        }
        out
    }

    pub fn backward(&mut self, input: &Tensor, grad: &Tensor) -> Tensor {
        reset_grad(&mut self.grad_weight, self.weight.len());
        reset_grad(&mut self.grad_bias, self.bias.len());
        let mut grad_input = input.same_shape();

        for n in 0..input.n {
            let x = &input.data[n * self.in_features..(n + 1) * self.in_features];
            let g = &grad.data[n * self.out_features..(n + 1) * self.out_features];
            for (b, &gv) in self.grad_bias.iter_mut().zip(g) {
                *b += gv;
            }
            let gi = &mut grad_input.data[n * self.in_features..(n + 1) * self.in_features];
            for i in 0..self.in_features {
                let row = i * self.out_features..(i + 1) * self.out_features;
                let mut acc = 0.0f32;
                for ((dw, &wv), &gv) in self.grad_weight[row.clone()]
                    .iter_mut()
                    .zip(&self.weight[row])
                    .zip(g)
                {
                    *dw += x[i] * gv;
                    acc += wv * gv;
                }
                gi[i] = acc;
            }
        }

        if self.l2 > 0.0 {
            for (g, &wv) in self.grad_weight.iter_mut().zip(&self.weight) {
                *g += 2.0 * self.l2 * wv;
            }
        }

        grad_input
    }

    fn l2_penalty(&self) -> f32 {
        self.l2 * self.weight.iter().map(|w| w * w).sum::<f32>()
    }
}

/// One network stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum Layer {
    Conv(Conv2d),
    BatchNorm(BatchNorm),
    Relu,
    MaxPool2,
    Dropout { rate: f32 },
    GlobalAvgPool,
    Dense(Dense),
}

/// What a layer kept from its training forward pass
#[derive(Debug, Clone)]
pub(crate) enum LayerCache {
    Input(Tensor),
    BatchNorm(BatchNormCache),
    Output(Tensor),
    MaxPool(MaxPoolCache),
    Dropout(DropoutCache),
    Shape(usize, usize),
    Identity,
}

impl Layer {
    /// Deterministic forward pass (running statistics, no dropout)
    pub fn infer(&self, x: &Tensor) -> Tensor {
        match self {
            Layer::Conv(conv) => conv.infer(x),
            Layer::BatchNorm(bn) => bn.infer(x),
            Layer::Relu => {
                let mut out = x.clone();
                out.data.iter_mut().for_each(|v| *v = v.max(0.0));
                out
            }
            Layer::MaxPool2 => max_pool(x).0,
            Layer::Dropout { .. } => x.clone(),
            Layer::GlobalAvgPool => global_avg_pool(x),
            Layer::Dense(dense) => dense.infer(x),
        }
    }

    /// Training forward pass
    pub fn forward_train(&mut self, x: Tensor, rng: &mut StdRng) -> (Tensor, LayerCache) {
        match self {
            Layer::Conv(conv) => {
                let out = conv.infer(&x);
                (out, LayerCache::Input(x))
            }
            Layer::BatchNorm(bn) => {
                let (out, cache) = bn.forward_train(&x);
                (out, LayerCache::BatchNorm(cache))
            }
            Layer::Relu => {
                let mut out = x;
                out.data.iter_mut().for_each(|v| *v = v.max(0.0));
                let cache = LayerCache::Output(out.clone());
                (out, cache)
            }
            Layer::MaxPool2 => {
                let input_shape = (x.n, x.c, x.h, x.w);
                let (out, argmax) = max_pool(&x);
                (out, LayerCache::MaxPool(MaxPoolCache { input_shape, argmax }))
            }
            Layer::Dropout { rate } => {
                if *rate <= 0.0 {
                    return (x, LayerCache::Identity);
                }
                let keep = 1.0 - *rate;
                let scale = 1.0 / keep;
                let mask: Vec<f32> = (0..x.len())
                    .map(|_| if rng.gen::<f32>() < keep { scale } else { 0.0 })
                    .collect();
                let mut out = x;
                for (v, &m) in out.data.iter_mut().zip(&mask) {
                    *v *= m;
                }
                (out, LayerCache::Dropout(DropoutCache { mask }))
            }
            Layer::GlobalAvgPool => {
                let shape = (x.h, x.w);
                (global_avg_pool(&x), LayerCache::Shape(shape.0, shape.1))
            }
            Layer::Dense(dense) => {
                let out = dense.infer(&x);
                (out, LayerCache::Input(x))
            }
        }
    }

    /// Backward pass; stores parameter gradients and returns the input gradient
    pub fn backward(&mut self, cache: LayerCache, grad: Tensor) -> Tensor {
        match (self, cache) {
            (Layer::Conv(conv), LayerCache::Input(input)) => conv.backward(&input, &grad),
            (Layer::BatchNorm(bn), LayerCache::BatchNorm(cache)) => bn.backward(&cache, &grad),
            (Layer::Relu, LayerCache::Output(out)) => {
                let mut grad = grad;
                for (g, &o) in grad.data.iter_mut().zip(&out.data) {
                    if o <= 0.0 {
                        *g = 0.0;
                    }
                }
                grad
            }
            (Layer::MaxPool2, LayerCache::MaxPool(cache)) => {
                let (n, c, h, w) = cache.input_shape;
                let mut grad_input = Tensor::zeros(n, c, h, w);
                for (&index, &g) in cache.argmax.iter().zip(&grad.data) {
                    grad_input.data[index] += g;
                }
                grad_input
            }
            (Layer::Dropout { .. }, LayerCache::Dropout(cache)) => {
                let mut grad = grad;
                for (g, &m) in grad.data.iter_mut().zip(&cache.mask) {
                    *g *= m;
                }
                grad
            }
            (Layer::Dropout { .. }, LayerCache::Identity) => grad,
            (Layer::GlobalAvgPool, LayerCache::Shape(h, w)) => {
                let mut grad_input = Tensor::zeros(grad.n, grad.c, h, w);
                let area = (h * w) as f32;
                for (plane, &g) in grad_input.data.chunks_mut(h * w).zip(&grad.data) {
                    plane.fill(g / area);
                }
                grad_input
            }
            (Layer::Dense(dense), LayerCache::Input(input)) => dense.backward(&input, &grad),
            (layer, cache) => unreachable!(
                "cache {:?} was not produced by layer {}",
                std::mem::discriminant(&cache),
                layer.name()
            ),
        }
    }

    /// Visit (parameters, gradients) pairs in a fixed order
    pub fn for_each_param(&mut self, f: &mut dyn FnMut(&mut [f32], &[f32])) {
        match self {
            Layer::Conv(conv) => {
                f(&mut conv.weight, &conv.grad_weight);
                f(&mut conv.bias, &conv.grad_bias);
            }
            Layer::BatchNorm(bn) => {
                f(&mut bn.gamma, &bn.grad_gamma);
                f(&mut bn.beta, &bn.grad_beta);
            }
            Layer::Dense(dense) => {
                f(&mut dense.weight, &dense.grad_weight);
                f(&mut dense.bias, &dense.grad_bias);
            }
            _ => {}
        }
    }

    /// λ·Σw² of regularized kernels
    pub fn l2_penalty(&self) -> f32 {
        match self {
            Layer::Conv(conv) => conv.l2_penalty(),
            Layer::Dense(dense) => dense.l2_penalty(),
            _ => 0.0,
        }
    }

    pub fn parameter_count(&self) -> usize {
        match self {
            Layer::Conv(conv) => conv.weight.len() + conv.bias.len(),
            Layer::BatchNorm(bn) => 2 * bn.channels,
            Layer::Dense(dense) => dense.weight.len() + dense.bias.len(),
            _ => 0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Layer::Conv(_) => "conv3x3",
            Layer::BatchNorm(_) => "batch_norm",
            Layer::Relu => "relu",
            Layer::MaxPool2 => "max_pool2",
            Layer::Dropout { .. } => "dropout",
            Layer::GlobalAvgPool => "global_avg_pool",
            Layer::Dense(_) => "dense",
        }
    }
}

fn global_avg_pool(x: &Tensor) -> Tensor {
    let plane = x.plane_len();
    let mut out = Tensor::zeros(x.n, x.c, 1, 1);
    if plane == 0 {
        return out;
    }
    for (o, chunk) in out.data.iter_mut().zip(x.data.chunks(plane)) {
        *o = chunk.iter().sum::<f32>() / plane as f32;
    }
    out
}

#[cfg(test)]
#[path = "layers_tests.rs"]
mod tests;
