use crate::models::{Challenge, ChallengeStatus};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::info;

/// In-memory record of solved challenges, shared across requests
pub struct Scoreboard {
    solved: DashMap<Challenge, DateTime<Utc>>,
    safety_mode: bool,
    runtime_env: Option<String>,
}

impl Scoreboard {
    pub fn new(safety_mode: bool, runtime_env: Option<String>) -> Self {
        Self {
            solved: DashMap::new(),
            safety_mode,
            runtime_env,
        }
    }

    pub fn is_enabled(&self, challenge: Challenge) -> bool {
        if !self.safety_mode {
            return true;
        }
        match &self.runtime_env {
            Some(env) => !challenge
                .disabled_env()
                .iter()
                .any(|d| d.eq_ignore_ascii_case(env)),
            None => true,
        }
    }

    pub fn is_solved(&self, challenge: Challenge) -> bool {
        self.solved.contains_key(&challenge)
    }

    pub fn not_solved(&self, challenge: Challenge) -> bool {
        !self.is_solved(challenge)
    }

    /// Marks a challenge solved. Returns false if it was solved already.
    pub fn solve(&self, challenge: Challenge) -> bool {
        let mut newly_solved = false;
        self.solved.entry(challenge).or_insert_with(|| {
            newly_solved = true;
            Utc::now()
        });
        if newly_solved {
            info!("🎯 Challenge solved: {} ({})", challenge.name(), challenge.key());
        }
        newly_solved
    }

    /// Solves `challenge` when `predicate` holds. The predicate is not evaluated
    /// for challenges that are already solved.
    pub fn solve_if(&self, challenge: Challenge, predicate: impl FnOnce() -> bool) -> bool {
        if self.is_solved(challenge) {
            return false;
        }
        predicate() && self.solve(challenge)
    }

    pub fn snapshot(&self) -> Vec<ChallengeStatus> {
        Challenge::ALL
            .iter()
            .map(|c| {
                let solved_at = self.solved.get(c).map(|t| *t);
                ChallengeStatus {
                    key: c.key().to_string(),
                    name: c.name().to_string(),
                    description: c.description().to_string(),
                    difficulty: c.difficulty(),
                    enabled: self.is_enabled(*c),
                    solved: solved_at.is_some(),
                    solved_at,
                }
            })
            .collect()
    }
}
