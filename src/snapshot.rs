//! Serializable description of a basis, for inspection and warm starts.
//!
//! Variables are identified by name: structural variables by the name given when they were
//! added, logical variables by the name of their constraint. Infinite bounds are written as
//! `null`.

use crate::model::VariableState;
use serde::{Deserialize, Serialize};

/// A basic variable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BasicEntry {
    /// Variable name.
    pub name: String,
    /// Current value.
    pub value: f64,
    /// Lower bound, `None` if unbounded below.
    pub lower_bound: Option<f64>,
    /// Upper bound, `None` if unbounded above.
    pub upper_bound: Option<f64>,
}

/// State of a nonbasic variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NonbasicState {
    /// At its lower bound.
    AtLower,
    /// At its upper bound.
    AtUpper,
    /// Free, at zero.
    Free,
    /// Both bounds equal.
    Fixed,
}

impl NonbasicState {
    pub(crate) fn from_state(state: VariableState) -> Option<NonbasicState> {
        match state {
            VariableState::Basic => None,
            VariableState::AtLower => Some(NonbasicState::AtLower),
            VariableState::AtUpper => Some(NonbasicState::AtUpper),
            VariableState::Free => Some(NonbasicState::Free),
            VariableState::Fixed => Some(NonbasicState::Fixed),
        }
    }

    pub(crate) fn to_state(self) -> VariableState {
        match self {
            NonbasicState::AtLower => VariableState::AtLower,
            NonbasicState::AtUpper => VariableState::AtUpper,
            NonbasicState::Free => VariableState::Free,
            NonbasicState::Fixed => VariableState::Fixed,
        }
    }
}

/// A nonbasic variable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NonbasicEntry {
    /// Variable name.
    pub name: String,
    /// Which bound it is at.
    pub state: NonbasicState,
    /// Current value.
    pub value: f64,
}

/// All variables of a problem split into basic (in row order) and nonbasic ones.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BasisSnapshot {
    /// Basic variables, one per constraint.
    pub basic: Vec<BasicEntry>,
    /// Remaining variables.
    pub nonbasic: Vec<NonbasicEntry>,
}

pub(crate) fn finite_or_none(bound: f64) -> Option<f64> {
    if bound.is_finite() {
        Some(bound)
    } else {
        None
    }
}
