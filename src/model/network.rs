// Network module - layer stack of the scream classifier
//
// Topology (widths and rates from ConvNetConfig):
//   4 × [conv3x3 → batch norm → ReLU → (max-pool 2×2 | global avg pool) → dropout]
//   2 × [dense → batch norm → ReLU → dropout]
//   dense(1) → logit (sigmoid applied by callers)

use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use super::layers::{BatchNorm, Conv2d, Dense, Layer, LayerCache};
use super::tensor::Tensor;
use crate::config::ConvNetConfig;
use crate::error::ModelError;

/// Max-pooling stages before global pooling
const POOLING_STAGES: u32 = 3;

/// Numerically stable logistic function
pub(crate) fn sigmoid(z: f32) -> f32 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ConvNet {
    input_shape: (usize, usize),
    layers: Vec<Layer>,
}

impl ConvNet {
    /// Build a freshly initialized network
    ///
    /// # Arguments
    /// * `config` - Topology and regularization
    /// * `input_shape` - (rows, columns) of the single-channel input
    /// * `rng` - Source for weight initialization
    pub fn new(
        config: &ConvNetConfig,
        input_shape: (usize, usize),
        rng: &mut StdRng,
    ) -> Result<Self, ModelError> {
        config.validate()?;
        let min_side = 1usize << POOLING_STAGES;
        if input_shape.0 < min_side || input_shape.1 < min_side {
            return Err(ModelError::InvalidConfig {
                reason: format!(
                    "input {}x{} is too small for {} pooling stages (minimum {}x{})",
                    input_shape.0, input_shape.1, POOLING_STAGES, min_side, min_side
                ),
            });
        }

        let momentum = config.batch_norm_momentum;
        let epsilon = config.batch_norm_epsilon;
        let mut layers = Vec::new();

        let mut channels = 1;
        for (block, (&width, &rate)) in config
            .conv_channels
            .iter()
            .zip(config.conv_dropout.iter())
            .enumerate()
        {
            layers.push(Layer::Conv(Conv2d::new(channels, width, config.conv_l2, rng)));
            layers.push(Layer::BatchNorm(BatchNorm::new(width, momentum, epsilon)));
            layers.push(Layer::Relu);
            if block < POOLING_STAGES as usize {
                layers.push(Layer::MaxPool2);
            } else {
                layers.push(Layer::GlobalAvgPool);
            }
            layers.push(Layer::Dropout { rate });
            channels = width;
        }

        let mut features = channels;
        for (&units, &rate) in config.dense_units.iter().zip(config.dense_dropout.iter()) {
            layers.push(Layer::Dense(Dense::new(features, units, config.dense_l2, rng)));
            layers.push(Layer::BatchNorm(BatchNorm::new(units, momentum, epsilon)));
            layers.push(Layer::Relu);
            layers.push(Layer::Dropout { rate });
            features = units;
        }
        layers.push(Layer::Dense(Dense::new(features, 1, 0.0, rng)));

        Ok(Self {
            input_shape,
            layers,
        })
    }

    pub fn input_shape(&self) -> (usize, usize) {
        self.input_shape
    }

    /// Deterministic logits for a batch
    pub fn infer(&self, batch: &Tensor) -> Vec<f32> {
        let mut x = batch.clone();
        for layer in &self.layers {
            x = layer.infer(&x);
        }
        x.data
    }

    /// Training-mode logits plus the caches `backward` consumes
    pub fn forward_train(&mut self, batch: Tensor, rng: &mut StdRng) -> (Vec<f32>, Vec<LayerCache>) {
        let mut caches = Vec::with_capacity(self.layers.len());
        let mut x = batch;
        for layer in self.layers.iter_mut() {
            let (out, cache) = layer.forward_train(x, rng);
            caches.push(cache);
            x = out;
        }
        (x.data, caches)
    }

    /// Back-propagate d(loss)/d(logit) and store every parameter gradient
    pub fn backward(&mut self, caches: Vec<LayerCache>, grad_logits: &[f32]) {
        let mut grad = Tensor::from_vec(grad_logits.len(), 1, 1, 1, grad_logits.to_vec());
        for (layer, cache) in self.layers.iter_mut().zip(caches).rev() {
            grad = layer.backward(cache, grad);
        }
    }

    pub fn for_each_param(&mut self, f: &mut dyn FnMut(&mut [f32], &[f32])) {
        for layer in self.layers.iter_mut() {
            layer.for_each_param(f);
        }
    }

    /// Total L2 regularization term
    pub fn l2_penalty(&self) -> f32 {
        self.layers.iter().map(Layer::l2_penalty).sum()
    }

    pub fn parameter_count(&self) -> usize {
        self.layers.iter().map(Layer::parameter_count).sum()
    }

    /// One line per layer, for logging
    pub fn summary(&self) -> String {
        let names: Vec<&str> = self.layers.iter().map(Layer::name).collect();
        format!(
            "input {}x{}, {} layers, {} parameters: {}",
            self.input_shape.0,
            self.input_shape.1,
            self.layers.len(),
            self.parameter_count(),
            names.join(" → ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::optimizer::Adam;
    use crate::testing::compact_network_config;
    use rand::{Rng, SeedableRng};

    fn random_batch(rng: &mut StdRng, n: usize, h: usize, w: usize) -> Tensor {
        let data = (0..n * h * w).map(|_| rng.gen_range(-1.0..1.0)).collect();
        Tensor::from_vec(n, 1, h, w, data)
    }

    #[test]
    fn test_reference_topology() {
        let mut rng = StdRng::seed_from_u64(1);
        let net = ConvNet::new(&ConvNetConfig::default(), (215, 130), &mut rng).unwrap();
        // 4 conv blocks of 5 layers, 2 dense blocks of 4, output dense
        assert_eq!(net.layers.len(), 4 * 5 + 2 * 4 + 1);

        let convs: Vec<usize> = net
            .layers
            .iter()
            .filter_map(|l| match l {
                Layer::Conv(c) => Some(c.out_channels),
                _ => None,
            })
            .collect();
        assert_eq!(convs, vec![32, 64, 128, 128]);

        let dropouts: Vec<f32> = net
            .layers
            .iter()
            .filter_map(|l| match l {
                Layer::Dropout { rate } => Some(*rate),
                _ => None,
            })
            .collect();
        assert_eq!(dropouts, vec![0.25, 0.30, 0.40, 0.5, 0.6, 0.5]);
        println!("{}", net.summary());
    }

    #[test]
    fn test_too_small_input_rejected() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(matches!(
            ConvNet::new(&ConvNetConfig::default(), (7, 130), &mut rng),
            Err(ModelError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_inference_is_deterministic_and_batch_independent() {
        let mut rng = StdRng::seed_from_u64(3);
        let net = ConvNet::new(&compact_network_config(), (16, 12), &mut rng).unwrap();
        let batch = random_batch(&mut rng, 3, 16, 12);

        let logits = net.infer(&batch);
        assert_eq!(logits.len(), 3);
        assert_eq!(logits, net.infer(&batch));

        let single = Tensor::from_vec(1, 1, 16, 12, batch.data[16 * 12..2 * 16 * 12].to_vec());
        assert!((net.infer(&single)[0] - logits[1]).abs() < 1e-5);
    }

    #[test]
    fn test_training_steps_reduce_loss_on_fixed_batch() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut net = ConvNet::new(&compact_network_config(), (16, 16), &mut rng).unwrap();
        let batch = random_batch(&mut rng, 4, 16, 16);
        let targets = [1.0f32, 0.0, 1.0, 0.0];
        let mut adam = Adam::new(1e-2);

        let loss_of = |logits: &[f32]| -> f32 {
            logits
                .iter()
                .zip(&targets)
                .map(|(&z, &y)| {
                    let p = sigmoid(z).clamp(1e-7, 1.0 - 1e-7);
                    -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
                })
                .sum::<f32>()
                / targets.len() as f32
        };

        let (logits, _) = net.forward_train(batch.clone(), &mut rng);
        let initial = loss_of(&logits);
        let mut last = initial;
        for _ in 0..60 {
            let (logits, caches) = net.forward_train(batch.clone(), &mut rng);
            last = loss_of(&logits);
            let grads: Vec<f32> = logits
                .iter()
                .zip(&targets)
                .map(|(&z, &y)| (sigmoid(z) - y) / targets.len() as f32)
                .collect();
            net.backward(caches, &grads);
            adam.step(&mut net);
        }
        println!("loss {} -> {}", initial, last);
        assert!(last < initial * 0.5, "loss {} -> {}", initial, last);
    }

    #[test]
    fn test_sigmoid_is_stable() {
        assert_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(100.0) <= 1.0);
        assert!(sigmoid(-100.0) >= 0.0);
        assert!(sigmoid(-100.0).is_finite());
    }
}
