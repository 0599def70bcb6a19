// Optimizer module - Adam with bias correction

use super::network::ConvNet;

const BETA1: f32 = 0.9;
const BETA2: f32 = 0.999;
const EPSILON: f32 = 1e-7;

/// Adam optimizer state for one network
///
/// Moment buffers are indexed by the order in which
/// `ConvNet::for_each_param` visits parameter slices.
pub(crate) struct Adam {
    learning_rate: f32,
    step: i32,
    first_moment: Vec<Vec<f32>>,
    second_moment: Vec<Vec<f32>>,
}

impl Adam {
    pub fn new(learning_rate: f32) -> Self {
        Self {
            learning_rate,
            step: 0,
            first_moment: Vec::new(),
            second_moment: Vec::new(),
        }
    }

    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    pub fn set_learning_rate(&mut self, learning_rate: f32) {
        self.learning_rate = learning_rate;
    }

    /// Apply one update using the gradients stored by the last backward pass
    pub fn step(&mut self, network: &mut ConvNet) {
        self.step += 1;
        let correction1 = 1.0 - BETA1.powi(self.step);
        let correction2 = 1.0 - BETA2.powi(self.step);
        let lr_t = self.learning_rate * correction2.sqrt() / correction1;

        let first_moment = &mut self.first_moment;
        let second_moment = &mut self.second_moment;
        let mut slot = 0usize;

        network.for_each_param(&mut |params: &mut [f32], grads: &[f32]| {
            if first_moment.len() <= slot {
                first_moment.push(vec![0.0; params.len()]);
                second_moment.push(vec![0.0; params.len()]);
            }
            // Parameters without a gradient this step (never reached by backward) stay put
            if grads.len() == params.len() {
                let m = &mut first_moment[slot];
                let v = &mut second_moment[slot];
                for i in 0..params.len() {
                    let g = grads[i];
                    m[i] = BETA1 * m[i] + (1.0 - BETA1) * g;
                    v[i] = BETA2 * v[i] + (1.0 - BETA2) * g * g;
                    params[i] -= lr_t * m[i] / (v[i].sqrt() + EPSILON);
                }
            }
            slot += 1;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_step_moves_each_parameter_by_learning_rate() {
        use crate::model::tensor::Tensor;
        use crate::testing::compact_network_config;
        use rand::{rngs::StdRng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(9);
        let mut net = ConvNet::new(&compact_network_config(), (8, 8), &mut rng).unwrap();
        let batch = Tensor::from_vec(2, 1, 8, 8, (0..128).map(|i| (i as f32 * 0.37).sin()).collect());
        let (logits, caches) = net.forward_train(batch, &mut rng);
        net.backward(caches, &[logits[0] - 1.0, logits[1]]);

        let mut before = Vec::new();
        net.for_each_param(&mut |params: &mut [f32], _: &[f32]| before.extend_from_slice(params));

        let mut adam = Adam::new(0.01);
        adam.step(&mut net);

        let mut after = Vec::new();
        let mut grads = Vec::new();
        net.for_each_param(&mut |params: &mut [f32], g: &[f32]| {
            after.extend_from_slice(params);
            grads.extend_from_slice(g);
        });

        // With bias correction the first step is ≈ lr · sign(g)
        for ((b, a), g) in before.iter().zip(&after).zip(&grads) {
            if g.abs() > 1e-4 {
                assert!(((b - a) - 0.01 * g.signum()).abs() < 1e-3);
            }
        }
    }

    #[test]
    fn test_learning_rate_can_be_lowered() {
        let mut adam = Adam::new(1e-3);
        adam.set_learning_rate(5e-4);
        assert_eq!(adam.learning_rate(), 5e-4);
    }
}
