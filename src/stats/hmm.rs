//! Left-to-right hidden Markov models with per-state Gaussian-mixture
//! emissions: Forward-Backward, Viterbi, and Baum-Welch training.

use nalgebra::DVector;

use crate::config::TrainingConfig;
use crate::error::{NexusSynthError, Result};
use crate::stats::gaussian::{log_sum_exp, GaussianMixture};

/// Transition probabilities out of one state in the left-to-right
/// topology: self-loop, advance to the next state, or exit (only
/// meaningful for the final state).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub self_loop_prob: f64,
    pub next_state_prob: f64,
    pub exit_prob: f64,
}

impl Transition {
    pub fn validate(&self) -> Result<()> {
        let sum = self.self_loop_prob + self.next_state_prob + self.exit_prob;
        if (sum - 1.0).abs() > 1e-6 {
            return Err(NexusSynthError::invalid_parameters(format!(
                "transition probabilities must sum to 1, got {sum}"
            )));
        }
        Ok(())
    }
}

/// One state in a [`PhonemeHmm`]: an emission distribution and its
/// outgoing transition probabilities.
#[derive(Debug, Clone)]
pub struct HmmState {
    pub state_id: usize,
    pub emission: GaussianMixture,
    pub transition: Transition,
}

/// A left-to-right HMM: state 0 is the only entry point, the last state
/// the only exit; only self-loop and forward transitions are nonzero.
#[derive(Debug, Clone)]
pub struct PhonemeHmm {
    states: Vec<HmmState>,
}

/// Training telemetry accumulated across Baum-Welch iterations.
#[derive(Debug, Clone, Default)]
pub struct TrainingStats {
    pub log_likelihoods: Vec<f64>,
    pub validation_scores: Vec<f64>,
    pub parameter_changes: Vec<f64>,
    pub final_iteration: usize,
    pub final_log_likelihood: f64,
    pub best_validation_score: f64,
    pub converged: bool,
    pub convergence_reason: String,
}

impl PhonemeHmm {
    pub fn new(states: Vec<HmmState>) -> Result<Self> {
        if states.is_empty() {
            return Err(NexusSynthError::invalid_configuration("PhonemeHmm requires at least one state"));
        }
        for state in &states {
            state.transition.validate()?;
        }
        Ok(Self { states })
    }

    /// Builds a uniformly-initialized left-to-right model with `n_states`
    /// states, each emitting from `emission_template` (cloned per state).
    pub fn uniform(n_states: usize, emission_template: GaussianMixture) -> Result<Self> {
        if n_states == 0 {
            return Err(NexusSynthError::invalid_configuration("n_states must be positive"));
        }
        let states = (0..n_states)
            .map(|i| {
                let transition = if i == n_states - 1 {
                    Transition { self_loop_prob: 0.5, next_state_prob: 0.0, exit_prob: 0.5 }
                } else {
                    Transition { self_loop_prob: 0.5, next_state_prob: 0.5, exit_prob: 0.0 }
                };
                HmmState { state_id: i, emission: emission_template.clone(), transition }
            })
            .collect();
        Self::new(states)
    }

    pub fn num_states(&self) -> usize {
        self.states.len()
    }

    pub fn states(&self) -> &[HmmState] {
        &self.states
    }

    fn log_self(&self, i: usize) -> f64 {
        self.states[i].transition.self_loop_prob.max(1e-300).ln()
    }

    fn log_next(&self, i: usize) -> f64 {
        self.states[i].transition.next_state_prob.max(1e-300).ln()
    }

    fn log_emission(&self, i: usize, obs: &DVector<f64>) -> f64 {
        self.states[i].emission.log_likelihood(obs)
    }

    /// Forward recursion in log space. Returns `alpha[t][i]`.
    pub fn forward(&self, observations: &[DVector<f64>]) -> Vec<Vec<f64>> {
        let n = self.num_states();
        let t_len = observations.len();
        let mut alpha = vec![vec![f64::NEG_INFINITY; n]; t_len];
        if t_len == 0 {
            return alpha;
        }
        alpha[0][0] = self.log_emission(0, &observations[0]);
        for t in 1..t_len {
            for j in 0..n {
                let mut terms = Vec::with_capacity(2);
                terms.push(alpha[t - 1][j] + self.log_self(j));
                if j > 0 {
                    terms.push(alpha[t - 1][j - 1] + self.log_next(j - 1));
                }
                alpha[t][j] = log_sum_exp(&terms) + self.log_emission(j, &observations[t]);
            }
        }
        alpha
    }

    /// Backward recursion in log space. Returns `beta[t][i]`.
    pub fn backward(&self, observations: &[DVector<f64>]) -> Vec<Vec<f64>> {
        let n = self.num_states();
        let t_len = observations.len();
        let mut beta = vec![vec![f64::NEG_INFINITY; n]; t_len];
        if t_len == 0 {
            return beta;
        }
        beta[t_len - 1][n - 1] = 0.0;
        for t in (0..t_len - 1).rev() {
            for i in 0..n {
                let mut terms = Vec::with_capacity(2);
                terms.push(self.log_self(i) + self.log_emission(i, &observations[t + 1]) + beta[t + 1][i]);
                if i + 1 < n {
                    terms.push(
                        self.log_next(i) + self.log_emission(i + 1, &observations[t + 1]) + beta[t + 1][i + 1],
                    );
                }
                beta[t][i] = log_sum_exp(&terms);
            }
        }
        beta
    }

    /// State posteriors `gamma_t(i) = exp(alpha_t(i) + beta_t(i) - Z_t)`
    /// and the mean per-frame log-likelihood (used as the total
    /// log-likelihood for convergence checks).
    pub fn state_posteriors(
        &self,
        alpha: &[Vec<f64>],
        beta: &[Vec<f64>],
    ) -> (Vec<Vec<f64>>, f64) {
        let t_len = alpha.len();
        let mut gamma = vec![vec![0.0; self.num_states()]; t_len];
        let mut z_sum = 0.0;
        for t in 0..t_len {
            let combined: Vec<f64> = alpha[t].iter().zip(beta[t].iter()).map(|(&a, &b)| a + b).collect();
            let z = log_sum_exp(&combined);
            z_sum += z;
            for i in 0..self.num_states() {
                gamma[t][i] = (combined[i] - z).exp();
            }
        }
        let mean_log_likelihood = if t_len > 0 { z_sum / t_len as f64 } else { f64::NEG_INFINITY };
        (gamma, mean_log_likelihood)
    }

    /// Max-product (Viterbi) decoding; ties prefer the self-loop unless
    /// the forward transition strictly dominates.
    pub fn viterbi(&self, observations: &[DVector<f64>]) -> Vec<usize> {
        let n = self.num_states();
        let t_len = observations.len();
        if t_len == 0 {
            return Vec::new();
        }
        let mut delta = vec![vec![f64::NEG_INFINITY; n]; t_len];
        let mut backptr = vec![vec![0usize; n]; t_len];
        delta[0][0] = self.log_emission(0, &observations[0]);

        for t in 1..t_len {
            for j in 0..n {
                let from_self = delta[t - 1][j] + self.log_self(j);
                let from_prev = if j > 0 { delta[t - 1][j - 1] + self.log_next(j - 1) } else { f64::NEG_INFINITY };
                let (best, arg) = if from_prev > from_self { (from_prev, j.saturating_sub(1)) } else { (from_self, j) };
                delta[t][j] = best + self.log_emission(j, &observations[t]);
                backptr[t][j] = arg;
            }
        }

        let last = t_len - 1;
        let mut state = (0..n).max_by(|&a, &b| delta[last][a].partial_cmp(&delta[last][b]).unwrap()).unwrap();
        let mut path = vec![0usize; t_len];
        path[last] = state;
        for t in (1..t_len).rev() {
            state = backptr[t][state];
            path[t - 1] = state;
        }
        path
    }

    /// One Baum-Welch M-step given forward/backward posteriors for a
    /// batch of independent observation sequences.
    fn m_step(&mut self, sequences: &[Vec<DVector<f64>>], gammas: &[Vec<Vec<f64>>]) -> Result<f64> {
        let n = self.num_states();
        let mut self_counts = vec![0.0; n];
        let mut next_counts = vec![0.0; n];
        let mut total_counts = vec![0.0; n];

        for (gamma, _) in gammas.iter().zip(sequences.iter()) {
            let t_len = gamma.len();
            for t in 0..t_len.saturating_sub(1) {
                for i in 0..n {
                    total_counts[i] += gamma[t][i];
                    self_counts[i] += gamma[t][i] * gamma[t + 1][i] * self.states[i].transition.self_loop_prob;
                    if i + 1 < n {
                        next_counts[i] +=
                            gamma[t][i] * gamma[t + 1][i + 1] * self.states[i].transition.next_state_prob;
                    }
                }
            }
        }

        let mut max_param_change = 0.0f64;
        for i in 0..n {
            if total_counts[i] <= 0.0 {
                continue;
            }
            let new_self = self_counts[i] / total_counts[i];
            let new_next = if i + 1 < n { next_counts[i] / total_counts[i] } else { 0.0 };
            let new_exit = (1.0 - new_self - new_next).max(0.0);
            let norm = (new_self + new_next + new_exit).max(1e-12);
            let transition = Transition {
                self_loop_prob: new_self / norm,
                next_state_prob: new_next / norm,
                exit_prob: new_exit / norm,
            };
            max_param_change = max_param_change
                .max((transition.self_loop_prob - self.states[i].transition.self_loop_prob).abs())
                .max((transition.next_state_prob - self.states[i].transition.next_state_prob).abs());
            self.states[i].transition = transition;
        }

        for i in 0..n {
            let mut weighted: Vec<DVector<f64>> = Vec::new();
            for (sequence, gamma) in sequences.iter().zip(gammas.iter()) {
                for (t, obs) in sequence.iter().enumerate() {
                    if gamma[t][i] > 1e-10 {
                        weighted.push(obs.clone());
                    }
                }
            }
            if !weighted.is_empty() {
                self.states[i].emission.em_step(&weighted)?;
            }
        }

        Ok(max_param_change)
    }

    /// Runs Baum-Welch EM over a batch of independent observation
    /// sequences until one of the convergence criteria in
    /// [`TrainingConfig`] is met.
    ///
    /// When `config.use_validation_set` is set, the tail
    /// `validation_split` fraction of `sequences` is held out: it
    /// contributes to `validation_scores` each iteration but never to
    /// the M-step, so `check_convergence`'s early-stop criterion tracks
    /// generalization rather than training-set likelihood.
    pub fn train(&mut self, sequences: &[Vec<DVector<f64>>], config: &TrainingConfig) -> Result<TrainingStats> {
        config.validate()?;
        let mut stats = TrainingStats::default();
        let mut best_score = f64::NEG_INFINITY;

        let use_validation = config.use_validation_set && sequences.len() >= 2;
        let train_len = if use_validation {
            let val_count =
                ((sequences.len() as f64 * config.validation_split).round() as usize).clamp(1, sequences.len() - 1);
            sequences.len() - val_count
        } else {
            sequences.len()
        };
        let (train_sequences, validation_sequences) = sequences.split_at(train_len);

        for iteration in 0..config.max_iterations {
            let mut gammas = Vec::with_capacity(train_sequences.len());
            let mut total_ll = 0.0;
            let mut numerically_unstable = false;

            for sequence in train_sequences {
                let alpha = self.forward(sequence);
                let beta = self.backward(sequence);
                let (gamma, ll) = self.state_posteriors(&alpha, &beta);
                if !ll.is_finite() {
                    numerically_unstable = true;
                }
                total_ll += ll;
                gammas.push(gamma);
            }

            if numerically_unstable {
                stats.converged = false;
                stats.convergence_reason = "numerical".to_string();
                stats.final_iteration = iteration;
                break;
            }

            let mean_ll = total_ll / train_sequences.len().max(1) as f64;
            stats.log_likelihoods.push(mean_ll);
            stats.final_log_likelihood = mean_ll;

            let validation_score = if use_validation {
                let mut val_total_ll = 0.0;
                for sequence in validation_sequences {
                    let alpha = self.forward(sequence);
                    let beta = self.backward(sequence);
                    let (_, ll) = self.state_posteriors(&alpha, &beta);
                    val_total_ll += ll;
                }
                val_total_ll / validation_sequences.len().max(1) as f64
            } else {
                mean_ll
            };
            best_score = best_score.max(validation_score);
            stats.best_validation_score = best_score;
            stats.validation_scores.push(validation_score);

            let param_change = self.m_step(train_sequences, &gammas)?;
            stats.parameter_changes.push(param_change);
            stats.final_iteration = iteration;

            if let Some(reason) = check_convergence(&stats, config) {
                stats.converged = true;
                stats.convergence_reason = reason;
                break;
            }
        }

        if stats.convergence_reason.is_empty() {
            stats.convergence_reason = "max_iterations".to_string();
        }
        Ok(stats)
    }
}

fn check_convergence(stats: &TrainingStats, config: &TrainingConfig) -> Option<String> {
    let window = config.convergence_window;
    if config.use_validation_set && stats.validation_scores.len() >= window + 1 {
        let recent = &stats.validation_scores[stats.validation_scores.len() - window..];
        let recent_best = recent.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        if stats.best_validation_score - recent_best > config.convergence_threshold {
            return Some("validation_plateau".to_string());
        }
    }
    if stats.log_likelihoods.len() >= window + 1 {
        let recent = &stats.log_likelihoods[stats.log_likelihoods.len() - window..];
        let improvement = recent.last().unwrap() - recent.first().unwrap();
        if improvement.abs() < config.convergence_threshold {
            return Some("log_likelihood_plateau".to_string());
        }
    }
    if let Some(&last_change) = stats.parameter_changes.last() {
        if last_change < config.parameter_threshold {
            return Some("parameter_stability".to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::gaussian::GaussianComponent;
    use nalgebra::DMatrix;

    fn unit_mixture(mean: f64) -> GaussianMixture {
        GaussianMixture::new(vec![GaussianComponent::new(
            DVector::from_vec(vec![mean]),
            DMatrix::identity(1, 1) * 0.25,
            1.0,
        )
        .unwrap()])
    }

    fn two_state_model() -> PhonemeHmm {
        let s0 = HmmState {
            state_id: 0,
            emission: unit_mixture(-1.0),
            transition: Transition { self_loop_prob: 0.6, next_state_prob: 0.4, exit_prob: 0.0 },
        };
        let s1 = HmmState {
            state_id: 1,
            emission: unit_mixture(1.0),
            transition: Transition { self_loop_prob: 0.7, next_state_prob: 0.0, exit_prob: 0.3 },
        };
        PhonemeHmm::new(vec![s0, s1]).unwrap()
    }

    fn synthetic_sequence() -> Vec<DVector<f64>> {
        (0..20).map(|t| DVector::from_vec(vec![if t < 10 { -1.0 } else { 1.0 }])).collect()
    }

    #[test]
    fn forward_backward_posteriors_sum_to_one() {
        let model = two_state_model();
        let sequence = synthetic_sequence();
        let alpha = model.forward(&sequence);
        let beta = model.backward(&sequence);
        let (gamma, _) = model.state_posteriors(&alpha, &beta);
        for row in &gamma {
            let sum: f64 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-6, "gamma row sums to {sum}");
        }
    }

    #[test]
    fn forward_backward_consistency_at_final_frame() {
        let model = two_state_model();
        let sequence = synthetic_sequence();
        let alpha = model.forward(&sequence);
        let beta = model.backward(&sequence);
        let last = sequence.len() - 1;
        let n = model.num_states();
        let lhs = alpha[last][n - 1];
        let combined: Vec<f64> = (0..n).map(|i| alpha[last][i] + beta[last][i]).collect();
        let rhs = log_sum_exp(&combined);
        assert!((lhs - rhs).abs() < 1e-6, "lhs={lhs} rhs={rhs}");
    }

    #[test]
    fn em_training_is_monotonic_and_separates_means() {
        let mut model = two_state_model();
        let sequences: Vec<Vec<DVector<f64>>> = (0..5).map(|_| synthetic_sequence()).collect();
        let config = TrainingConfig { max_iterations: 20, convergence_threshold: 1e-3, ..Default::default() };
        let stats = model.train(&sequences, &config).unwrap();

        for window in stats.log_likelihoods.windows(2) {
            assert!(window[1] >= window[0] - 0.1, "log-likelihood decreased beyond tolerance");
        }
        let means: Vec<f64> = model.states().iter().map(|s| s.emission.components()[0].mean()[0]).collect();
        assert!((means[0] - means[1]).abs() > 0.01);
    }

    #[test]
    fn viterbi_returns_one_state_per_observation() {
        let model = two_state_model();
        let sequence = synthetic_sequence();
        let path = model.viterbi(&sequence);
        assert_eq!(path.len(), sequence.len());
    }

    #[test]
    fn validation_split_holds_out_sequences_from_the_m_step() {
        let mut model = two_state_model();
        let sequences: Vec<Vec<DVector<f64>>> = (0..10).map(|_| synthetic_sequence()).collect();
        let config = TrainingConfig {
            max_iterations: 10,
            use_validation_set: true,
            validation_split: 0.3,
            ..Default::default()
        };
        let stats = model.train(&sequences, &config).unwrap();

        assert_eq!(stats.validation_scores.len(), stats.log_likelihoods.len());
        assert!(stats.best_validation_score.is_finite());
        assert!(stats.best_validation_score >= stats.validation_scores[0]);
    }

    #[test]
    fn validation_plateau_stops_before_max_iterations() {
        let mut model = two_state_model();
        let sequences: Vec<Vec<DVector<f64>>> = (0..10).map(|_| synthetic_sequence()).collect();
        let config = TrainingConfig {
            max_iterations: 50,
            convergence_threshold: 10.0,
            convergence_window: 2,
            parameter_threshold: -1.0,
            use_validation_set: true,
            validation_split: 0.3,
            ..Default::default()
        };
        let stats = model.train(&sequences, &config).unwrap();

        assert!(stats.converged);
        assert_eq!(stats.convergence_reason, "validation_plateau");
        assert!(stats.final_iteration < config.max_iterations - 1);
    }
}
