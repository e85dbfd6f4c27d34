// projeto: lstmpetr4
// file: src/neural/model.rs
// Stacked LSTM regressor: LSTM(50) -> Dropout -> LSTM(50) -> Dropout -> Dense(1)

use ndarray::linalg::general_mat_mul;
use ndarray::{s, Array1, Array2, Array3, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::neural::utils::{glorot_uniform, orthogonal, sigmoid_scalar, AdamOptimizer, TrainingError};

pub const HIDDEN_UNITS: usize = 50;
pub const DROPOUT_RATE: f64 = 0.2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub window: usize,
    pub hidden_size: usize,
    pub dropout_rate: f64,
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
}

impl ModelConfig {
    pub fn new(window: usize) -> Self {
        ModelConfig {
            window,
            hidden_size: HIDDEN_UNITS,
            dropout_rate: DROPOUT_RATE,
            learning_rate: 0.001,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
        }
    }

    pub fn validate(&self) -> Result<(), TrainingError> {
        if self.window == 0 {
            return Err(TrainingError::ModelConfiguration("window must be positive".to_string()));
        }
        if self.hidden_size == 0 {
            return Err(TrainingError::ModelConfiguration("hidden_size must be positive".to_string()));
        }
        if !(0.0..1.0).contains(&self.dropout_rate) {
            return Err(TrainingError::ModelConfiguration(
                format!("dropout_rate must be in [0, 1), got {}", self.dropout_rate)
            ));
        }
        if !(self.learning_rate > 0.0) {
            return Err(TrainingError::ModelConfiguration(
                format!("learning_rate must be positive, got {}", self.learning_rate)
            ));
        }
        Ok(())
    }
}

/// One LSTM layer. Gate blocks are stacked as input, forget, cell, output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LstmLayer {
    pub w: Array2<f64>,  // input kernel [4H, D]
    pub u: Array2<f64>,  // recurrent kernel [4H, H]
    pub b: Array1<f64>,  // bias [4H]
}

struct StepCache {
    x: Array1<f64>,
    h_prev: Array1<f64>,
    c_prev: Array1<f64>,
    i: Array1<f64>,
    f: Array1<f64>,
    g: Array1<f64>,
    o: Array1<f64>,
    c: Array1<f64>,
}

#[derive(Debug, Clone)]
pub struct LayerGradients {
    pub w: Array2<f64>,
    pub u: Array2<f64>,
    pub b: Array1<f64>,
}

impl LayerGradients {
    fn zeros(layer: &LstmLayer) -> Self {
        LayerGradients {
            w: Array2::zeros(layer.w.raw_dim()),
            u: Array2::zeros(layer.u.raw_dim()),
            b: Array1::zeros(layer.b.raw_dim()),
        }
    }

    fn accumulate(&mut self, other: &LayerGradients) {
        self.w += &other.w;
        self.u += &other.u;
        self.b += &other.b;
    }

    fn is_finite(&self) -> bool {
        self.w.iter().chain(self.u.iter()).chain(self.b.iter()).all(|v| v.is_finite())
    }
}

fn add_outer(acc: &mut Array2<f64>, col: &Array1<f64>, row: &Array1<f64>) {
    let col = col.view().insert_axis(Axis(1));
    let row = row.view().insert_axis(Axis(0));
    general_mat_mul(1.0, &col, &row, 1.0, acc);
}

impl LstmLayer {
    fn new(input_size: usize, hidden_size: usize, rng: &mut StdRng) -> Result<Self, TrainingError> {
        let gates = 4 * hidden_size;
        let mut b: Array1<f64> = Array1::zeros(gates);
        // unit forget bias
        b.slice_mut(s![hidden_size..2 * hidden_size]).fill(1.0);

        Ok(LstmLayer {
            w: glorot_uniform(gates, input_size, rng)?,
            u: orthogonal(gates, hidden_size, rng)?,
            b,
        })
    }

    pub fn hidden_size(&self) -> usize {
        self.u.ncols()
    }

    pub fn input_size(&self) -> usize {
        self.w.ncols()
    }

    fn step(&self, x: ArrayView1<f64>, h_prev: &Array1<f64>, c_prev: &Array1<f64>) -> StepCache {
        let h = self.hidden_size();
        let z = self.w.dot(&x) + self.u.dot(h_prev) + &self.b;

        let i = z.slice(s![0..h]).mapv(sigmoid_scalar);
        let f = z.slice(s![h..2 * h]).mapv(sigmoid_scalar);
        let g = z.slice(s![2 * h..3 * h]).mapv(f64::tanh);
        let o = z.slice(s![3 * h..4 * h]).mapv(sigmoid_scalar);
        let c = &f * c_prev + &i * &g;

        StepCache {
            x: x.to_owned(),
            h_prev: h_prev.clone(),
            c_prev: c_prev.clone(),
            i,
            f,
            g,
            o,
            c,
        }
    }

    /// Runs the layer over `[T, D]` inputs, returning `[T, H]` hidden states.
    fn forward_with_cache(&self, inputs: ArrayView2<f64>) -> (Array2<f64>, Vec<StepCache>) {
        let hidden = self.hidden_size();
        let steps = inputs.nrows();
        let mut outputs: Array2<f64> = Array2::zeros((steps, hidden));
        let mut caches = Vec::with_capacity(steps);
        let mut h: Array1<f64> = Array1::zeros(hidden);
        let mut c: Array1<f64> = Array1::zeros(hidden);

        for t in 0..steps {
            let cache = self.step(inputs.row(t), &h, &c);
            h = &cache.o * &cache.c.mapv(f64::tanh);
            c = cache.c.clone();
            outputs.row_mut(t).assign(&h);
            caches.push(cache);
        }

        (outputs, caches)
    }

    pub fn forward_sequence(&self, inputs: ArrayView2<f64>) -> Array2<f64> {
        self.forward_with_cache(inputs).0
    }

    /// Backpropagation through time. Accumulates parameter gradients into
    /// `grads` and returns the gradient with respect to the inputs.
    fn backward(&self, caches: &[StepCache], d_outputs: &Array2<f64>, grads: &mut LayerGradients) -> Array2<f64> {
        let h = self.hidden_size();
        let steps = caches.len();
        let mut d_inputs: Array2<f64> = Array2::zeros((steps, self.input_size()));
        let mut dh_next: Array1<f64> = Array1::zeros(h);
        let mut dc_next: Array1<f64> = Array1::zeros(h);
        let mut dz: Array1<f64> = Array1::zeros(4 * h);

        for t in (0..steps).rev() {
            let cache = &caches[t];
            let dh = &d_outputs.row(t) + &dh_next;
            let tanh_c = cache.c.mapv(f64::tanh);

            let d_o = &dh * &tanh_c;
            let dc = &dc_next + &(&dh * &cache.o * &tanh_c.mapv(|v| 1.0 - v * v));
            let d_i = &dc * &cache.g;
            let d_f = &dc * &cache.c_prev;
            let d_g = &dc * &cache.i;

            dz.slice_mut(s![0..h]).assign(&(&d_i * &cache.i.mapv(|v| v * (1.0 - v))));
            dz.slice_mut(s![h..2 * h]).assign(&(&d_f * &cache.f.mapv(|v| v * (1.0 - v))));
            dz.slice_mut(s![2 * h..3 * h]).assign(&(&d_g * &cache.g.mapv(|v| 1.0 - v * v)));
            dz.slice_mut(s![3 * h..4 * h]).assign(&(&d_o * &cache.o.mapv(|v| v * (1.0 - v))));

            add_outer(&mut grads.w, &dz, &cache.x);
            add_outer(&mut grads.u, &dz, &cache.h_prev);
            grads.b += &dz;

            d_inputs.row_mut(t).assign(&self.w.t().dot(&dz));
            dh_next = self.u.t().dot(&dz);
            dc_next = &dc * &cache.f;
        }

        d_inputs
    }
}

/// Inverted dropout masks for one training sample: kept units are scaled by `1 / (1 - rate)`.
#[derive(Debug, Clone)]
pub struct DropoutMasks {
    sequence: Array2<f64>,
    last: Array1<f64>,
}

impl DropoutMasks {
    pub fn sample(window: usize, hidden: usize, rate: f64, rng: &mut StdRng) -> Self {
        let keep = 1.0 - rate;
        let scale = 1.0 / keep;
        let mut draw = || if rng.random_bool(keep) { scale } else { 0.0 };
        let sequence = Array2::from_shape_fn((window, hidden), |_| draw());
        let last = Array1::from_shape_fn(hidden, |_| draw());
        DropoutMasks { sequence, last }
    }

    pub fn identity(window: usize, hidden: usize) -> Self {
        DropoutMasks {
            sequence: Array2::ones((window, hidden)),
            last: Array1::ones(hidden),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LstmNetwork {
    pub lstm1: LstmLayer,
    pub lstm2: LstmLayer,
    pub dense_w: Array1<f64>,
    pub dense_b: Array1<f64>,
}

#[derive(Debug, Clone)]
pub struct Gradients {
    pub lstm1: LayerGradients,
    pub lstm2: LayerGradients,
    pub dense_w: Array1<f64>,
    pub dense_b: Array1<f64>,
}

impl Gradients {
    fn zeros(network: &LstmNetwork) -> Self {
        Gradients {
            lstm1: LayerGradients::zeros(&network.lstm1),
            lstm2: LayerGradients::zeros(&network.lstm2),
            dense_w: Array1::zeros(network.dense_w.raw_dim()),
            dense_b: Array1::zeros(1),
        }
    }

    fn accumulate(&mut self, other: &Gradients) {
        self.lstm1.accumulate(&other.lstm1);
        self.lstm2.accumulate(&other.lstm2);
        self.dense_w += &other.dense_w;
        self.dense_b += &other.dense_b;
    }

    fn is_finite(&self) -> bool {
        self.lstm1.is_finite()
            && self.lstm2.is_finite()
            && self.dense_w.iter().chain(self.dense_b.iter()).all(|v| v.is_finite())
    }
}

impl LstmNetwork {
    fn new(hidden: usize, rng: &mut StdRng) -> Result<Self, TrainingError> {
        let lstm1 = LstmLayer::new(1, hidden, rng)?;
        let lstm2 = LstmLayer::new(hidden, hidden, rng)?;
        let dense_w = glorot_uniform(1, hidden, rng)?.row(0).to_owned();

        Ok(LstmNetwork { lstm1, lstm2, dense_w, dense_b: Array1::zeros(1) })
    }

    /// Inference forward pass over a `[W, 1]` window. Dropout is never applied here.
    pub fn forward(&self, x: ArrayView2<f64>) -> f64 {
        let h1 = self.lstm1.forward_sequence(x);
        let h2 = self.lstm2.forward_sequence(h1.view());
        let last = h2.row(h2.nrows() - 1);
        self.dense_w.dot(&last) + self.dense_b[0]
    }

    /// Training forward and backward pass for one sample. `scale` weights the
    /// squared-error gradient, normally `1 / batch_size`.
    pub fn sample_gradients(&self, x: ArrayView2<f64>, target: f64, masks: &DropoutMasks, scale: f64) -> (f64, Gradients) {
        let mut grads = Gradients::zeros(self);

        let (h1, cache1) = self.lstm1.forward_with_cache(x);
        let a1 = &h1 * &masks.sequence;
        let (h2, cache2) = self.lstm2.forward_with_cache(a1.view());
        let steps = h2.nrows();
        let a2 = &h2.row(steps - 1) * &masks.last;
        let prediction = self.dense_w.dot(&a2) + self.dense_b[0];

        let dy = 2.0 * (prediction - target) * scale;
        grads.dense_w = &a2 * dy;
        grads.dense_b[0] = dy;

        let mut d_h2: Array2<f64> = Array2::zeros(h2.raw_dim());
        d_h2.row_mut(steps - 1).assign(&(&self.dense_w * dy * &masks.last));
        let d_a1 = self.lstm2.backward(&cache2, &d_h2, &mut grads.lstm2);
        let d_h1 = &d_a1 * &masks.sequence;
        self.lstm1.backward(&cache1, &d_h1, &mut grads.lstm1);

        (prediction, grads)
    }

    fn is_finite(&self) -> bool {
        [&self.lstm1, &self.lstm2]
            .iter()
            .all(|l| l.w.iter().chain(l.u.iter()).chain(l.b.iter()).all(|v| v.is_finite()))
            && self.dense_w.iter().chain(self.dense_b.iter()).all(|v| v.is_finite())
    }
}

/// Anything that maps `[n, W, 1]` scaled windows to `n` scaled next-step values.
pub trait SequenceModel {
    fn window(&self) -> usize;

    fn predict(&self, inputs: &Array3<f64>) -> Array1<f64>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BatchOutcome {
    pub squared_error: f64,
    pub absolute_error: f64,
    pub samples: usize,
}

/// Compiled model: architecture, weights, and optimizer state, persisted together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LstmModel {
    pub config: ModelConfig,
    pub network: LstmNetwork,
    pub optimizer: AdamOptimizer,
}

impl LstmModel {
    pub fn num_parameters(&self) -> usize {
        let layer = |l: &LstmLayer| l.w.len() + l.u.len() + l.b.len();
        layer(&self.network.lstm1) + layer(&self.network.lstm2) + self.network.dense_w.len() + 1
    }

    /// One optimizer step on the samples at `batch`. Dropout masks are drawn
    /// sequentially from `rng` before the parallel gradient pass.
    pub fn train_batch(
        &mut self,
        x: &Array3<f64>,
        y: &Array1<f64>,
        batch: &[usize],
        rng: &mut StdRng,
    ) -> Result<BatchOutcome, TrainingError> {
        if batch.is_empty() {
            return Ok(BatchOutcome::default());
        }

        let (window, hidden, rate) = (self.config.window, self.config.hidden_size, self.config.dropout_rate);
        let masks: Vec<DropoutMasks> = batch
            .iter()
            .map(|_| DropoutMasks::sample(window, hidden, rate, rng))
            .collect();

        let scale = 1.0 / batch.len() as f64;
        let network = &self.network;
        let results: Vec<(f64, Gradients)> = batch
            .par_iter()
            .zip(masks.par_iter())
            .map(|(&i, m)| network.sample_gradients(x.index_axis(Axis(0), i), y[i], m, scale))
            .collect();

        let mut total = Gradients::zeros(network);
        let mut outcome = BatchOutcome::default();
        for (&i, (prediction, grads)) in batch.iter().zip(results.iter()) {
            let err = prediction - y[i];
            outcome.squared_error += err * err;
            outcome.absolute_error += err.abs();
            outcome.samples += 1;
            total.accumulate(grads);
        }

        if !outcome.squared_error.is_finite() || !total.is_finite() {
            return Err(TrainingError::Training("non-finite loss or gradient".to_string()));
        }

        self.apply_gradients(&total);
        Ok(outcome)
    }

    fn apply_gradients(&mut self, grads: &Gradients) {
        let optimizer = &mut self.optimizer;
        let net = &mut self.network;

        optimizer.next_step();
        optimizer.update("lstm1.kernel", &mut net.lstm1.w, &grads.lstm1.w);
        optimizer.update("lstm1.recurrent", &mut net.lstm1.u, &grads.lstm1.u);
        optimizer.update("lstm1.bias", &mut net.lstm1.b, &grads.lstm1.b);
        optimizer.update("lstm2.kernel", &mut net.lstm2.w, &grads.lstm2.w);
        optimizer.update("lstm2.recurrent", &mut net.lstm2.u, &grads.lstm2.u);
        optimizer.update("lstm2.bias", &mut net.lstm2.b, &grads.lstm2.b);
        optimizer.update("dense.kernel", &mut net.dense_w, &grads.dense_w);
        optimizer.update("dense.bias", &mut net.dense_b, &grads.dense_b);
    }

    /// Shape and finiteness checks for weights coming from disk.
    pub fn validate(&self) -> Result<(), TrainingError> {
        self.config.validate()?;
        let h = self.config.hidden_size;
        let gates = 4 * h;
        let net = &self.network;

        let checks = [
            ("lstm1.kernel", net.lstm1.w.dim() == (gates, 1)),
            ("lstm1.recurrent", net.lstm1.u.dim() == (gates, h)),
            ("lstm1.bias", net.lstm1.b.len() == gates),
            ("lstm2.kernel", net.lstm2.w.dim() == (gates, h)),
            ("lstm2.recurrent", net.lstm2.u.dim() == (gates, h)),
            ("lstm2.bias", net.lstm2.b.len() == gates),
            ("dense.kernel", net.dense_w.len() == h),
            ("dense.bias", net.dense_b.len() == 1),
        ];
        if let Some((name, _)) = checks.iter().find(|(_, ok)| !ok) {
            return Err(TrainingError::Shape(format!(
                "{} does not match hidden size {}", name, h
            )));
        }
        if !net.is_finite() {
            return Err(TrainingError::Serialization("model contains non-finite weights".to_string()));
        }
        Ok(())
    }
}

impl SequenceModel for LstmModel {
    fn window(&self) -> usize {
        self.config.window
    }

    fn predict(&self, inputs: &Array3<f64>) -> Array1<f64> {
        let network = &self.network;
        let predictions: Vec<f64> = (0..inputs.len_of(Axis(0)))
            .into_par_iter()
            .map(|i| network.forward(inputs.index_axis(Axis(0), i)))
            .collect();
        Array1::from(predictions)
    }
}

/// Builds the compiled two-layer LSTM for a given window length.
#[derive(Debug, Clone)]
pub struct ModelBuilder {
    config: ModelConfig,
}

impl ModelBuilder {
    pub fn new(window: usize) -> Self {
        ModelBuilder { config: ModelConfig::new(window) }
    }

    pub fn from_config(config: ModelConfig) -> Self {
        ModelBuilder { config }
    }

    pub fn hidden_size(mut self, hidden_size: usize) -> Self {
        self.config.hidden_size = hidden_size;
        self
    }

    pub fn dropout_rate(mut self, rate: f64) -> Self {
        self.config.dropout_rate = rate;
        self
    }

    pub fn learning_rate(mut self, lr: f64) -> Self {
        self.config.learning_rate = lr;
        self
    }

    pub fn build(&self, rng: &mut StdRng) -> Result<LstmModel, TrainingError> {
        self.config.validate()?;
        let c = &self.config;
        let network = LstmNetwork::new(c.hidden_size, rng)?;
        let optimizer = AdamOptimizer::new(c.learning_rate, c.beta1, c.beta2, c.epsilon);
        let model = LstmModel { config: c.clone(), network, optimizer };

        log::info!(
            "🛠️ [Model] LSTM({h}) -> Dropout({r}) -> LSTM({h}) -> Dropout({r}) -> Dense(1), window {w}, {p} parameters",
            h = c.hidden_size,
            r = c.dropout_rate,
            w = c.window,
            p = model.num_parameters()
        );
        Ok(model)
    }
}
