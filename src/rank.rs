/// Bayesian weighted-rating math. Pure functions over `(rating, num_ratings)`
/// pairs; the store feeds these from one query scope at a time.

#[derive(Debug, thiserror::Error)]
pub enum RankError {
    /// The scope mean is undefined with fewer than 2 rated rows; callers
    /// fall back to raw-rating ordering.
    #[error("scope has too few rated items for weighted ranking ({rated} rated)")]
    ScopeTooSmall { rated: usize },
}

#[derive(Debug, Clone, Copy)]
pub struct RankConfig {
    /// Quantile of the scope's vote-count distribution used to derive the
    /// minimum-votes threshold `m`.
    pub min_votes_quantile: f64,
}

impl Default for RankConfig {
    fn default() -> Self {
        Self {
            min_votes_quantile: 0.6,
        }
    }
}

/// Scope-level inputs to the weighting formula: `mean` is `C`, `min_votes`
/// is `m`.
#[derive(Debug, Clone, Copy)]
pub struct ScopeStats {
    pub mean: f64,
    pub min_votes: f64,
}

/// `(v / (v + m)) * R + (m / (v + m)) * C`. With `v = 0` the result is
/// exactly `scope_mean`: an unrated item carries no evidence of its own.
pub fn bayesian_avg(rating: f64, votes: u64, min_votes: f64, scope_mean: f64) -> f64 {
    if votes == 0 {
        return scope_mean;
    }
    let v = votes as f64;
    (v / (v + min_votes)) * rating + (min_votes / (v + min_votes)) * scope_mean
}

/// Nearest-rank quantile of the vote counts, floored at 1.0 so the formula
/// always shrinks zero-vote items fully and never divides by `v + 0`.
pub fn min_votes_threshold(votes: &[u64], quantile: f64) -> f64 {
    if votes.is_empty() {
        return 1.0;
    }
    let mut sorted = votes.to_vec();
    sorted.sort_unstable();

    let quantile = quantile.clamp(0.0, 1.0);
    let rank = (quantile * sorted.len() as f64).ceil() as usize;
    let idx = rank.saturating_sub(1).min(sorted.len() - 1);

    (sorted[idx] as f64).max(1.0)
}

/// Derive `C` and `m` from the scope's rated rows.
pub fn scope_stats(rated: &[(f64, u64)], config: RankConfig) -> Result<ScopeStats, RankError> {
    if rated.len() < 2 {
        return Err(RankError::ScopeTooSmall { rated: rated.len() });
    }

    let mean = rated.iter().map(|(r, _)| r).sum::<f64>() / rated.len() as f64;
    let votes: Vec<u64> = rated.iter().map(|(_, v)| *v).collect();
    let min_votes = min_votes_threshold(&votes, config.min_votes_quantile);

    Ok(ScopeStats { mean, min_votes })
}
