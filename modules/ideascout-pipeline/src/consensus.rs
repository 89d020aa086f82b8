//! Combine classifier votes into one keep/discard/borderline decision.
//!
//! Everything here is pure and total: the live classify stage and the dry
//! runner call the same functions and must agree on every input.

use ideascout_common::{Decision, Verdict};

/// Both models agreeing above this confidence skips the weighted formula.
pub const SHORTCUT_CONFIDENCE: f64 = 0.8;
pub const KEEP_THRESHOLD: f64 = 0.6;
pub const DISCARD_THRESHOLD: f64 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vote {
    pub verdict: Verdict,
    pub confidence: f64,
}

impl Vote {
    pub fn new(verdict: Verdict, confidence: f64) -> Self {
        Self {
            verdict,
            confidence: sanitize(confidence),
        }
    }

    pub fn keep(confidence: f64) -> Self {
        Self::new(Verdict::Keep, confidence)
    }

    pub fn skip(confidence: f64) -> Self {
        Self::new(Verdict::Skip, confidence)
    }

    fn weight(&self) -> f64 {
        sanitize(self.confidence) * self.verdict.keep_flag()
    }
}

/// What the classifiers returned for one item.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Votes {
    /// Only one classifier is configured. `None` means it failed.
    SingleProvider(Option<Vote>),
    BothOk(Vote, Vote),
    OnlyPrimaryOk(Vote),
    OnlySecondaryOk(Vote),
    BothFailed,
}

impl Votes {
    /// Build the dual-provider case from the two slots' outcomes.
    pub fn dual(primary: Option<Vote>, secondary: Option<Vote>) -> Self {
        match (primary, secondary) {
            (Some(a), Some(b)) => Votes::BothOk(a, b),
            (Some(a), None) => Votes::OnlyPrimaryOk(a),
            (None, Some(b)) => Votes::OnlySecondaryOk(b),
            (None, None) => Votes::BothFailed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Outcome {
    pub score: f64,
    pub decision: Decision,
}

impl Outcome {
    fn discard() -> Self {
        Self {
            score: 0.0,
            decision: Decision::Discard,
        }
    }
}

fn sanitize(confidence: f64) -> f64 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

/// Map a combined score onto a decision.
pub fn threshold(score: f64) -> Decision {
    if score >= KEEP_THRESHOLD {
        Decision::Keep
    } else if score < DISCARD_THRESHOLD {
        Decision::Discard
    } else {
        Decision::Borderline
    }
}

/// Two successful votes: the shortcut rule, then the weighted mean.
pub fn decide(a: Vote, b: Vote) -> Outcome {
    let strong = sanitize(a.confidence) > SHORTCUT_CONFIDENCE
        && sanitize(b.confidence) > SHORTCUT_CONFIDENCE;
    if a.verdict == b.verdict && strong {
        return match a.verdict {
            Verdict::Keep => Outcome {
                score: 1.0,
                decision: Decision::Keep,
            },
            Verdict::Skip => Outcome::discard(),
        };
    }

    let score = (a.weight() + b.weight()) / 2.0;
    Outcome {
        score,
        decision: threshold(score),
    }
}

/// The only configured classifier answered: thresholds apply to its own weight.
pub fn single_provider(vote: Vote) -> Outcome {
    let score = vote.weight();
    Outcome {
        score,
        decision: threshold(score),
    }
}

/// Two classifiers were expected but one failed. A skip is final; a keep
/// counts at half confidence.
pub fn partial_failure(survivor: Vote) -> Outcome {
    match survivor.verdict {
        Verdict::Skip => Outcome::discard(),
        Verdict::Keep => {
            let score = sanitize(survivor.confidence) / 2.0;
            Outcome {
                score,
                decision: threshold(score),
            }
        }
    }
}

pub fn combine(votes: Votes) -> Outcome {
    match votes {
        Votes::BothOk(a, b) => decide(a, b),
        Votes::OnlyPrimaryOk(v) | Votes::OnlySecondaryOk(v) => partial_failure(v),
        Votes::SingleProvider(Some(v)) => single_provider(v),
        Votes::SingleProvider(None) | Votes::BothFailed => Outcome::discard(),
    }
}
