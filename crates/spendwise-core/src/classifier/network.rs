//! Embedding → recurrent → dense network with softmax output
//!
//! Forward pass for a token sequence `x_1..x_T` (padding ids are skipped):
//!
//! ```text
//! h_t = tanh(E[x_t] · W_in + h_{t-1} · W_rec + b_h)      h_0 = 0
//! p   = softmax(h_T · W_out + b_out)
//! ```
//!
//! Training minimises cross-entropy with backpropagation through time, a
//! global gradient-norm clip and Adam updates.

use serde::{Deserialize, Serialize};

use super::rng::Rng;
use crate::error::{Error, Result};
use crate::text::{OOV_ID, PAD_ID};

const BETA1: f32 = 0.9;
const BETA2: f32 = 0.999;
const ADAM_EPS: f32 = 1e-8;
const GRAD_CLIP_NORM: f32 = 5.0;

/// Dimensions of a network; `num_labels` never changes after creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelShape {
    /// Embedding rows (highest vocabulary id + 1)
    pub vocab_rows: usize,
    pub embedding_dim: usize,
    pub hidden_units: usize,
    pub num_labels: usize,
}

impl ModelShape {
    fn validate(&self) -> Result<()> {
        if self.num_labels < 2 {
            return Err(Error::Training(format!(
                "A classifier needs at least 2 labels, got {}",
                self.num_labels
            )));
        }
        if self.vocab_rows <= OOV_ID as usize
            || self.embedding_dim == 0
            || self.hidden_units == 0
        {
            return Err(Error::Training(format!("Invalid model shape: {:?}", self)));
        }
        Ok(())
    }
}

/// One encoded training example
#[derive(Debug, Clone, PartialEq)]
pub struct Example {
    pub sequence: Vec<u32>,
    pub label: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitOptions {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitReport {
    pub epochs: usize,
    pub batches: usize,
    /// Mean loss over the final epoch
    pub final_loss: f32,
}

/// Flat weight tensors; also reused as the gradient accumulator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Params {
    embedding: Vec<f32>,
    w_input: Vec<f32>,
    w_recurrent: Vec<f32>,
    b_hidden: Vec<f32>,
    w_output: Vec<f32>,
    b_output: Vec<f32>,
}

impl Params {
    fn zeros(shape: &ModelShape) -> Self {
        let ModelShape {
            vocab_rows: v,
            embedding_dim: e,
            hidden_units: h,
            num_labels: l,
        } = *shape;
        Self {
            embedding: vec![0.0; v * e],
            w_input: vec![0.0; e * h],
            w_recurrent: vec![0.0; h * h],
            b_hidden: vec![0.0; h],
            w_output: vec![0.0; h * l],
            b_output: vec![0.0; l],
        }
    }

    fn random(shape: &ModelShape, rng: &mut Rng) -> Self {
        let mut params = Self::zeros(shape);
        let fill = |data: &mut [f32], sigma: f64, rng: &mut Rng| {
            for w in data.iter_mut() {
                *w = rng.gauss(0.0, sigma) as f32;
            }
        };
        fill(&mut params.embedding[..], 0.1, rng);
        fill(
            &mut params.w_input[..],
            (1.0 / shape.embedding_dim as f64).sqrt(),
            rng,
        );
        fill(
            &mut params.w_recurrent[..],
            (1.0 / shape.hidden_units as f64).sqrt() * 0.5,
            rng,
        );
        fill(
            &mut params.w_output[..],
            (1.0 / shape.hidden_units as f64).sqrt(),
            rng,
        );
        params
    }

    fn tensors(&self) -> [&[f32]; 6] {
        [
            &self.embedding[..],
            &self.w_input[..],
            &self.w_recurrent[..],
            &self.b_hidden[..],
            &self.w_output[..],
            &self.b_output[..],
        ]
    }

    fn tensors_mut(&mut self) -> [&mut [f32]; 6] {
        [
            &mut self.embedding[..],
            &mut self.w_input[..],
            &mut self.w_recurrent[..],
            &mut self.b_hidden[..],
            &mut self.w_output[..],
            &mut self.b_output[..],
        ]
    }

    fn scale(&mut self, factor: f32) {
        for tensor in self.tensors_mut() {
            for g in tensor.iter_mut() {
                *g *= factor;
            }
        }
    }

    fn norm(&self) -> f32 {
        self.tensors()
            .iter()
            .flat_map(|t| t.iter())
            .map(|g| g * g)
            .sum::<f32>()
            .sqrt()
    }
}

/// Adam moment estimates (in memory only)
#[derive(Debug, Clone, Default)]
struct Adam {
    step: u32,
    m: Vec<Vec<f32>>,
    v: Vec<Vec<f32>>,
}

impl Adam {
    fn apply(&mut self, params: &mut Params, grads: &Params, lr: f32) {
        let sizes: Vec<usize> = grads.tensors().iter().map(|t| t.len()).collect();
        if self.m.iter().map(Vec::len).ne(sizes.iter().copied()) {
            self.m = sizes.iter().map(|&n| vec![0.0; n]).collect();
            self.v = sizes.iter().map(|&n| vec![0.0; n]).collect();
            self.step = 0;
        }

        self.step += 1;
        let t = self.step.min(i32::MAX as u32) as i32;
        let bc1 = 1.0 - BETA1.powi(t);
        let bc2 = 1.0 - BETA2.powi(t);

        for (((p, g), m), v) in params
            .tensors_mut()
            .into_iter()
            .zip(grads.tensors())
            .zip(self.m.iter_mut())
            .zip(self.v.iter_mut())
        {
            for i in 0..p.len() {
                m[i] = BETA1 * m[i] + (1.0 - BETA1) * g[i];
                v[i] = BETA2 * v[i] + (1.0 - BETA2) * g[i] * g[i];
                let m_hat = m[i] / bc1;
                let v_hat = v[i] / bc2;
                p[i] -= lr * m_hat / (v_hat.sqrt() + ADAM_EPS);
            }
        }
    }
}

/// Activations kept from a forward pass for backpropagation
struct Trace {
    rows: Vec<usize>,
    /// `hidden[0]` is the zero initial state, `hidden[t]` follows token `t`
    hidden: Vec<Vec<f32>>,
    probs: Vec<f32>,
}

/// The trainable network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceModel {
    shape: ModelShape,
    params: Params,
    #[serde(skip)]
    optimizer: Adam,
}

impl SequenceModel {
    /// Create a randomly initialised network
    pub fn new(shape: ModelShape, rng: &mut Rng) -> Result<Self> {
        shape.validate()?;
        Ok(Self {
            shape,
            params: Params::random(&shape, rng),
            optimizer: Adam::default(),
        })
    }

    pub fn shape(&self) -> ModelShape {
        self.shape
    }

    pub fn num_labels(&self) -> usize {
        self.shape.num_labels
    }

    /// Check that tensor sizes agree with the declared shape (after deserializing)
    pub fn validate(&self) -> Result<()> {
        self.shape.validate()?;
        let expected = Params::zeros(&self.shape);
        let consistent = expected
            .tensors()
            .iter()
            .zip(self.params.tensors())
            .all(|(a, b)| a.len() == b.len());
        if !consistent {
            return Err(Error::InvalidData(format!(
                "Model weights do not match shape {:?}",
                self.shape
            )));
        }
        if self.params.tensors().iter().any(|t| t.iter().any(|w| !w.is_finite())) {
            return Err(Error::InvalidData("Model weights contain NaN/inf".into()));
        }
        Ok(())
    }

    /// Probability distribution over all labels
    pub fn predict(&self, sequence: &[u32]) -> Vec<f32> {
        self.forward(sequence).probs
    }

    /// One gradient step on a batch; returns the mean loss
    pub fn train_batch(&mut self, batch: &[Example], learning_rate: f32) -> Result<f32> {
        if batch.is_empty() {
            return Ok(0.0);
        }
        for example in batch {
            self.check_label(example.label)?;
        }

        let mut grads = Params::zeros(&self.shape);
        let mut loss = 0.0;
        for example in batch {
            loss += self.accumulate(&example.sequence, example.label, &mut grads);
        }

        let n = batch.len() as f32;
        grads.scale(1.0 / n);
        let norm = grads.norm();
        if norm > GRAD_CLIP_NORM {
            grads.scale(GRAD_CLIP_NORM / norm);
        }

        self.optimizer.apply(&mut self.params, &grads, learning_rate);
        Ok(loss / n)
    }

    /// Mini-batch training for a fixed number of epochs
    ///
    /// `should_stop` is polled before every batch; when it returns true the
    /// call ends with [`Error::Cancelled`] and the caller must discard `self`.
    pub fn fit(
        &mut self,
        examples: &[Example],
        options: &FitOptions,
        rng: &mut Rng,
        should_stop: impl Fn() -> bool,
    ) -> Result<FitReport> {
        if examples.is_empty() {
            return Err(Error::Training("No training examples".into()));
        }
        for example in examples {
            self.check_label(example.label)?;
        }

        let batch_size = options.batch_size.max(1);
        let mut order: Vec<usize> = (0..examples.len()).collect();
        let mut batches = 0;
        let mut final_loss = 0.0;

        for _ in 0..options.epochs {
            rng.shuffle(&mut order);
            let mut epoch_loss = 0.0;
            let mut epoch_batches = 0;

            for chunk in order.chunks(batch_size) {
                if should_stop() {
                    return Err(Error::Cancelled);
                }
                let batch: Vec<Example> = chunk.iter().map(|&i| examples[i].clone()).collect();
                epoch_loss += self.train_batch(&batch, options.learning_rate)?;
                epoch_batches += 1;
            }

            batches += epoch_batches;
            final_loss = epoch_loss / epoch_batches.max(1) as f32;
        }

        Ok(FitReport {
            epochs: options.epochs,
            batches,
            final_loss,
        })
    }

    fn check_label(&self, label: usize) -> Result<()> {
        if label >= self.shape.num_labels {
            return Err(Error::LabelOutOfRange {
                index: label,
                labels: self.shape.num_labels,
            });
        }
        Ok(())
    }

    /// Ids past the embedding table (vocabulary grew without retraining) read as OOV
    fn token_row(&self, id: u32) -> usize {
        let row = id as usize;
        if row < self.shape.vocab_rows {
            row
        } else {
            OOV_ID as usize
        }
    }

    fn forward(&self, sequence: &[u32]) -> Trace {
        let e = self.shape.embedding_dim;
        let h = self.shape.hidden_units;
        let l = self.shape.num_labels;
        let p = &self.params;

        let rows: Vec<usize> = sequence
            .iter()
            .filter(|&&id| id != PAD_ID)
            .map(|&id| self.token_row(id))
            .collect();

        let mut hidden = Vec::with_capacity(rows.len() + 1);
        hidden.push(vec![0.0f32; h]);

        for &row in &rows {
            let x = &p.embedding[row * e..(row + 1) * e];
            let prev = &hidden[hidden.len() - 1];
            let mut next = p.b_hidden.clone();

            for (i, &xi) in x.iter().enumerate() {
                let w = &p.w_input[i * h..(i + 1) * h];
                for (n, &wj) in next.iter_mut().zip(w) {
                    *n += xi * wj;
                }
            }
            for (i, &hi) in prev.iter().enumerate() {
                let w = &p.w_recurrent[i * h..(i + 1) * h];
                for (n, &wj) in next.iter_mut().zip(w) {
                    *n += hi * wj;
                }
            }
            for n in next.iter_mut() {
                *n = n.tanh();
            }
            hidden.push(next);
        }

        let last = &hidden[hidden.len() - 1];
        let mut logits = p.b_output.clone();
        for (i, &hi) in last.iter().enumerate() {
            let w = &p.w_output[i * l..(i + 1) * l];
            for (z, &wk) in logits.iter_mut().zip(w) {
                *z += hi * wk;
            }
        }

        Trace {
            rows,
            hidden,
            probs: softmax(&logits),
        }
    }

    /// Add this example's gradients into `grads`; returns its loss
    fn accumulate(&self, sequence: &[u32], label: usize, grads: &mut Params) -> f32 {
        let e = self.shape.embedding_dim;
        let h = self.shape.hidden_units;
        let l = self.shape.num_labels;
        let p = &self.params;

        let trace = self.forward(sequence);
        let loss = -trace.probs[label].max(1e-12).ln();

        let mut dz = trace.probs.clone();
        dz[label] -= 1.0;

        let last = &trace.hidden[trace.hidden.len() - 1];
        for (i, &hi) in last.iter().enumerate() {
            let g = &mut grads.w_output[i * l..(i + 1) * l];
            for (gk, &dk) in g.iter_mut().zip(&dz) {
                *gk += hi * dk;
            }
        }
        for (gk, &dk) in grads.b_output.iter_mut().zip(&dz) {
            *gk += dk;
        }

        let mut dh: Vec<f32> = (0..h)
            .map(|i| dot(&p.w_output[i * l..(i + 1) * l], &dz))
            .collect();

        for t in (0..trace.rows.len()).rev() {
            let row = trace.rows[t];
            let h_t = &trace.hidden[t + 1];
            let h_prev = &trace.hidden[t];
            let x = &p.embedding[row * e..(row + 1) * e];

            let da: Vec<f32> = dh
                .iter()
                .zip(h_t)
                .map(|(d, hv)| d * (1.0 - hv * hv))
                .collect();

            for (g, &d) in grads.b_hidden.iter_mut().zip(&da) {
                *g += d;
            }
            for (i, &xi) in x.iter().enumerate() {
                let g = &mut grads.w_input[i * h..(i + 1) * h];
                for (gj, &dj) in g.iter_mut().zip(&da) {
                    *gj += xi * dj;
                }
                grads.embedding[row * e + i] += dot(&p.w_input[i * h..(i + 1) * h], &da);
            }
            for (i, &hi) in h_prev.iter().enumerate() {
                let g = &mut grads.w_recurrent[i * h..(i + 1) * h];
                for (gj, &dj) in g.iter_mut().zip(&da) {
                    *gj += hi * dj;
                }
            }

            dh = (0..h)
                .map(|i| dot(&p.w_recurrent[i * h..(i + 1) * h], &da))
                .collect();
        }

        loss
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|z| (z - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|x| x / sum).collect()
}

/// Index and value of the highest probability; ties go to the first index
pub fn argmax(probs: &[f32]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &p) in probs.iter().enumerate() {
        match best {
            Some((_, b)) if p <= b => {}
            _ => best = Some((i, p)),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_shape() -> ModelShape {
        ModelShape {
            vocab_rows: 10,
            embedding_dim: 3,
            hidden_units: 4,
            num_labels: 3,
        }
    }

    fn loss_of(model: &SequenceModel, sequence: &[u32], label: usize) -> f32 {
        -model.predict(sequence)[label].ln()
    }

    #[test]
    fn test_rejects_single_label() {
        let shape = ModelShape {
            num_labels: 1,
            ..tiny_shape()
        };
        assert!(SequenceModel::new(shape, &mut Rng::new(1)).is_err());
    }

    #[test]
    fn test_predict_is_distribution() {
        let model = SequenceModel::new(tiny_shape(), &mut Rng::new(1)).unwrap();
        for seq in [vec![0, 0, 0, 0], vec![2, 3, 0, 0], vec![9, 99, 1, 4]] {
            let probs = model.predict(&seq);
            assert_eq!(probs.len(), 3);
            let sum: f32 = probs.iter().sum();
            assert!((sum - 1.0).abs() < 1e-5);
            assert!(probs.iter().all(|p| *p >= 0.0));
        }
    }

    #[test]
    fn test_trailing_padding_is_ignored() {
        let model = SequenceModel::new(tiny_shape(), &mut Rng::new(5)).unwrap();
        assert_eq!(model.predict(&[2, 3]), model.predict(&[2, 3, 0, 0, 0]));
    }

    #[test]
    fn test_gradients_match_finite_differences() {
        let model = SequenceModel::new(tiny_shape(), &mut Rng::new(11)).unwrap();
        let sequence = [2u32, 3, 4, 0];
        let label = 1;

        let mut grads = Params::zeros(&model.shape);
        model.accumulate(&sequence, label, &mut grads);

        // (tensor index, element index)
        let probes = [(0usize, 6usize), (1, 0), (2, 5), (3, 1), (4, 2), (5, 0)];
        let eps = 1e-2f32;

        for (tensor, index) in probes {
            let mut plus = model.clone();
            plus.params.tensors_mut()[tensor][index] += eps;
            let mut minus = model.clone();
            minus.params.tensors_mut()[tensor][index] -= eps;

            let numeric =
                (loss_of(&plus, &sequence, label) - loss_of(&minus, &sequence, label)) / (2.0 * eps);
            let analytic = grads.tensors()[tensor][index];
            assert!(
                (numeric - analytic).abs() < 1e-3 + 0.05 * numeric.abs(),
                "tensor {} index {}: numeric {} analytic {}",
                tensor,
                index,
                numeric,
                analytic
            );
        }
    }

    #[test]
    fn test_fit_learns_separable_set() {
        let mut rng = Rng::new(42);
        let mut model = SequenceModel::new(tiny_shape(), &mut rng).unwrap();
        let examples = vec![
            Example { sequence: vec![2, 3, 0, 0], label: 0 },
            Example { sequence: vec![3, 2, 0, 0], label: 0 },
            Example { sequence: vec![4, 5, 0, 0], label: 1 },
            Example { sequence: vec![5, 4, 0, 0], label: 1 },
            Example { sequence: vec![6, 7, 0, 0], label: 2 },
            Example { sequence: vec![7, 6, 0, 0], label: 2 },
        ];
        let options = FitOptions {
            epochs: 120,
            batch_size: 2,
            learning_rate: 0.05,
        };

        let report = model.fit(&examples, &options, &mut rng, || false).unwrap();
        assert_eq!(report.epochs, 120);
        assert_eq!(report.batches, 120 * 3);

        for example in &examples {
            let (label, _) = argmax(&model.predict(&example.sequence)).unwrap();
            assert_eq!(label, example.label);
        }
    }

    #[test]
    fn test_fit_cancelled() {
        let mut rng = Rng::new(1);
        let mut model = SequenceModel::new(tiny_shape(), &mut rng).unwrap();
        let examples = vec![Example { sequence: vec![2], label: 0 }];
        let options = FitOptions {
            epochs: 3,
            batch_size: 1,
            learning_rate: 0.01,
        };
        let result = model.fit(&examples, &options, &mut rng, || true);
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn test_label_out_of_range() {
        let mut model = SequenceModel::new(tiny_shape(), &mut Rng::new(1)).unwrap();
        let batch = [Example { sequence: vec![2], label: 3 }];
        let result = model.train_batch(&batch, 0.01);
        assert!(matches!(
            result,
            Err(Error::LabelOutOfRange { index: 3, labels: 3 })
        ));
    }

    #[test]
    fn test_serde_roundtrip_validates() {
        let model = SequenceModel::new(tiny_shape(), &mut Rng::new(9)).unwrap();
        let json = serde_json::to_string(&model).unwrap();
        let back: SequenceModel = serde_json::from_str(&json).unwrap();
        back.validate().unwrap();
        assert_eq!(back.predict(&[2, 3]), model.predict(&[2, 3]));

        let mut broken = back.clone();
        broken.params.b_output.pop();
        assert!(broken.validate().is_err());
    }

    #[test]
    fn test_argmax_tie_breaks_first() {
        assert_eq!(argmax(&[0.25, 0.5, 0.25]), Some((1, 0.5)));
        assert_eq!(argmax(&[0.5, 0.5]), Some((0, 0.5)));
        assert_eq!(argmax(&[]), None);
    }
}
