//! Consensus parameters.

/// Parameters for the Avalanche consensus instance.
#[derive(Debug, Clone)]
pub struct Parameters {
    /// Sample size (k) - number of peers polled each round
    pub k: usize,

    /// Quorum size (alpha) - votes needed for a successful poll
    pub alpha: usize,

    /// Consecutive successes needed for non-conflicted items
    pub beta_virtuous: usize,

    /// Consecutive successes needed for conflicted items
    pub beta_rogue: usize,

    /// Polls the sampling layer may keep in flight at once
    pub concurrent_repolls: usize,

    /// Maximum number of parents a vertex may reference
    pub parents: usize,

    /// Maximum number of transactions batched into a vertex
    pub batch_size: usize,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            k: 20,
            alpha: 15,
            beta_virtuous: 15,
            beta_rogue: 20,
            concurrent_repolls: 4,
            parents: 5,
            batch_size: 30,
        }
    }
}

impl Parameters {
    /// Creates new parameters with the given thresholds.
    pub fn new(k: usize, alpha: usize, beta_virtuous: usize, beta_rogue: usize) -> Self {
        Self {
            k,
            alpha,
            beta_virtuous,
            beta_rogue,
            ..Default::default()
        }
    }

    /// Validates the parameters.
    pub fn validate(&self) -> Result<(), String> {
        if self.k == 0 {
            return Err("k must be positive".to_string());
        }
        if 2 * self.alpha <= self.k {
            return Err(format!(
                "alpha must be over half of k: alpha = {}, k = {}",
                self.alpha, self.k
            ));
        }
        if self.alpha > self.k {
            return Err(format!(
                "alpha must be <= k: alpha = {}, k = {}",
                self.alpha, self.k
            ));
        }
        if self.beta_virtuous == 0 {
            return Err("beta_virtuous must be positive".to_string());
        }
        if self.beta_rogue < self.beta_virtuous {
            return Err(format!(
                "beta_rogue must be >= beta_virtuous: beta_rogue = {}, beta_virtuous = {}",
                self.beta_rogue, self.beta_virtuous
            ));
        }
        if self.concurrent_repolls == 0 {
            return Err("concurrent_repolls must be positive".to_string());
        }
        if self.concurrent_repolls > self.beta_virtuous {
            return Err(format!(
                "concurrent_repolls must be <= beta_virtuous: concurrent_repolls = {}, beta_virtuous = {}",
                self.concurrent_repolls, self.beta_virtuous
            ));
        }
        if self.parents < 2 {
            return Err("parents must be >= 2".to_string());
        }
        if self.batch_size == 0 {
            return Err("batch_size must be positive".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_valid() {
        let params = Parameters::default();
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_invalid_k() {
        let params = Parameters {
            k: 0,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_alpha_must_be_majority() {
        let params = Parameters {
            k: 20,
            alpha: 10,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_invalid_alpha() {
        let params = Parameters {
            k: 20,
            alpha: 25,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_invalid_beta() {
        let params = Parameters {
            beta_virtuous: 20,
            beta_rogue: 15,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_invalid_repolls() {
        let params = Parameters {
            concurrent_repolls: 16,
            beta_virtuous: 15,
            ..Default::default()
        };
        assert!(params.validate().is_err());

        let params = Parameters {
            concurrent_repolls: 0,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_invalid_parents() {
        let params = Parameters {
            parents: 1,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_invalid_batch_size() {
        let params = Parameters {
            batch_size: 0,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }
}
