//! Factor extraction and residualization
//!
//! Raw factors per symbol (momentum, technical, volume, quality, social,
//! catalyst) are scalar summaries of facade time series and books; the
//! ordered Gram-Schmidt pass removes shared variance from later factors
//! while leaving momentum untouched. Everything here is pure: the
//! orchestrator gathers inputs, these modules only compute.

pub mod catalyst;
pub mod momentum;
pub mod quality;
pub mod residualize;
pub mod social;
pub mod technical;
pub mod volume;

pub use residualize::{residualize, ResidualizeOutcome};
pub use social::{NullSocial, SocialSource, StaticSocial};

use crate::types::Symbol;
use serde::{Deserialize, Serialize};

/// Raw factor vector for one symbol
///
/// All values are finite reals. `catalyst` participates in the weighted
/// composite but not in the orthogonalization order; `social` only ever
/// feeds the capped additive term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorVector {
    pub symbol: Symbol,
    pub momentum_core: f64,
    pub technical: f64,
    pub volume: f64,
    pub quality: f64,
    pub social: f64,
    pub catalyst: f64,
}

impl FactorVector {
    /// Reject non-finite factor values before they can reach the scorer
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("momentum_core", self.momentum_core),
            ("technical", self.technical),
            ("volume", self.volume),
            ("quality", self.quality),
            ("social", self.social),
            ("catalyst", self.catalyst),
        ] {
            if !value.is_finite() {
                return Err(format!("factor {} is not finite: {}", name, value));
            }
        }
        Ok(())
    }
}

/// Factor vector after ordered Gram-Schmidt
///
/// `momentum_core` is bit-equal to the raw input. `catalyst` is carried
/// through untouched since it sits outside the orthogonalization order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResidualVector {
    pub symbol: Symbol,
    pub momentum_core: f64,
    pub technical_resid: f64,
    pub volume_resid: f64,
    pub quality_resid: f64,
    pub social_resid: f64,
    pub catalyst: f64,
}
