use ndarray::Array4;

const TRAIN_TIMESTEPS: usize = 1000;
const BETA_START: f64 = 0.00085;
const BETA_END: f64 = 0.012;
const STEPS_OFFSET: usize = 1;

/// Deterministic DDIM sampler (eta = 0) with the Stable Diffusion 1.x
/// "scaled linear" noise schedule.
#[derive(Debug, Clone)]
pub struct DdimScheduler {
    alphas_cumprod: Vec<f64>,
    timesteps: Vec<usize>,
    step_ratio: usize,
}

impl DdimScheduler {
    pub fn new(inference_steps: usize) -> anyhow::Result<Self> {
        if inference_steps == 0 || inference_steps > TRAIN_TIMESTEPS {
            anyhow::bail!(
                "inference steps must be in 1..={TRAIN_TIMESTEPS}, got {inference_steps}"
            );
        }

        let start = BETA_START.sqrt();
        let end = BETA_END.sqrt();
        let mut alphas_cumprod = Vec::with_capacity(TRAIN_TIMESTEPS);
        let mut running = 1.0f64;
        for i in 0..TRAIN_TIMESTEPS {
            let beta = start + (end - start) * i as f64 / (TRAIN_TIMESTEPS - 1) as f64;
            running *= 1.0 - beta * beta;
            alphas_cumprod.push(running);
        }

        let step_ratio = TRAIN_TIMESTEPS / inference_steps;
        let timesteps = (0..inference_steps)
            .rev()
            .map(|i| i * step_ratio + STEPS_OFFSET)
            .collect();

        Ok(Self {
            alphas_cumprod,
            timesteps,
            step_ratio,
        })
    }

    /// Timesteps to visit, noisiest first.
    pub fn timesteps(&self) -> &[usize] {
        &self.timesteps
    }

    fn alpha_at(&self, timestep: usize) -> f64 {
        self.alphas_cumprod[timestep.min(TRAIN_TIMESTEPS - 1)]
    }

    /// Moves `sample` from `timestep` to the previous timestep given the
    /// predicted noise.
    pub fn step(&self, noise: &Array4<f32>, timestep: usize, sample: &Array4<f32>) -> Array4<f32> {
        let alpha_t = self.alpha_at(timestep);
        let alpha_prev = match timestep.checked_sub(self.step_ratio) {
            Some(prev) => self.alpha_at(prev),
            // set_alpha_to_one = false: the final step lands on alpha_0
            None => self.alphas_cumprod[0],
        };

        let sqrt_alpha_t = alpha_t.sqrt() as f32;
        let sqrt_one_minus_t = (1.0 - alpha_t).sqrt() as f32;
        let sqrt_alpha_prev = alpha_prev.sqrt() as f32;
        let sqrt_one_minus_prev = (1.0 - alpha_prev).sqrt() as f32;

        let mut out = sample.clone();
        ndarray::Zip::from(&mut out)
            .and(noise)
            .for_each(|x, &eps| {
                let predicted_original = (*x - sqrt_one_minus_t * eps) / sqrt_alpha_t;
                *x = sqrt_alpha_prev * predicted_original + sqrt_one_minus_prev * eps;
            });
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timesteps_descend_with_offset() {
        let scheduler = DdimScheduler::new(50).unwrap();
        let ts = scheduler.timesteps();

        assert_eq!(ts.len(), 50);
        assert_eq!(ts[0], 981);
        assert_eq!(ts[49], 1);
        assert!(ts.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn test_rejects_zero_steps() {
        assert!(DdimScheduler::new(0).is_err());
    }

    #[test]
    fn test_step_recovers_clean_sample_with_exact_noise() {
        let scheduler = DdimScheduler::new(10).unwrap();
        let t = scheduler.timesteps()[0];
        let alpha_t = scheduler.alpha_at(t);
        let alpha_prev = scheduler.alpha_at(t - 100);

        let clean = Array4::<f32>::from_elem((1, 1, 2, 2), 0.5);
        let noise = Array4::<f32>::from_elem((1, 1, 2, 2), -1.0);
        let noisy = &clean * alpha_t.sqrt() as f32 + &noise * (1.0 - alpha_t).sqrt() as f32;

        let prev = scheduler.step(&noise, t, &noisy);
        let expected = 0.5 * alpha_prev.sqrt() as f32 - (1.0 - alpha_prev).sqrt() as f32;

        assert!(prev.iter().all(|v| (v - expected).abs() < 1e-4));
    }
}
