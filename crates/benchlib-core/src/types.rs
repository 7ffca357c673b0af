//! Shared types for per-card addressing.
//!
//! A BSI chassis aggregates up to 16 physically addressable cards. Most
//! operations can target one card or broadcast to (and gather from) all of
//! them; [`CardSelect`] captures that choice with the invalid selectors
//! ruled out at construction, and [`PerCard`] carries the correspondingly
//! shaped result.

use crate::error::{Error, Result};

/// Maximum number of cards a chassis can hold.
pub const MAX_CARDS: usize = 16;

/// Card addressing for an operation: one card or broadcast to all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardSelect {
    /// Address all cards simultaneously (wire value 0); replies are
    /// gathered from every existing card.
    All,
    /// Address a single card, 1..=16.
    Card(u8),
}

impl CardSelect {
    /// Build a `CardSelect` from the wire-level selector 0..=16.
    ///
    /// 0 means broadcast; 1..=16 selects a single card. Anything larger is
    /// rejected.
    pub fn new(selector: u8) -> Result<Self> {
        match selector {
            0 => Ok(CardSelect::All),
            1..=16 => Ok(CardSelect::Card(selector)),
            n => Err(Error::InvalidParameter(format!(
                "card selector {} out of range 0..=16",
                n
            ))),
        }
    }

    /// Select a single card, validating the 1..=16 range.
    pub fn card(number: u8) -> Result<Self> {
        if (1..=MAX_CARDS as u8).contains(&number) {
            Ok(CardSelect::Card(number))
        } else {
            Err(Error::InvalidParameter(format!(
                "card number {} out of range 1..=16",
                number
            )))
        }
    }

    /// The zero-based parameter-list slot for a single-card selection,
    /// `None` for broadcast.
    pub fn slot(&self) -> Option<usize> {
        match self {
            CardSelect::All => None,
            CardSelect::Card(n) => Some(*n as usize - 1),
        }
    }

    /// Whether this selection is the broadcast form.
    pub fn is_all(&self) -> bool {
        matches!(self, CardSelect::All)
    }
}

impl std::fmt::Display for CardSelect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CardSelect::All => write!(f, "all cards"),
            CardSelect::Card(n) => write!(f, "card {}", n),
        }
    }
}

/// A decoded result shaped by the card selection that produced it.
///
/// Single-card operations yield `Single`; broadcast operations yield
/// `AllCards` with one entry per discovered card (not per physical slot).
#[derive(Debug, Clone, PartialEq)]
pub enum PerCard<T> {
    /// Result from one selected card.
    Single(T),
    /// Results gathered from every existing card, index 0 = card 1.
    AllCards(Vec<T>),
}

impl<T> PerCard<T> {
    /// Consume a single-card result.
    ///
    /// Returns [`Error::Protocol`] if this is a broadcast result; callers
    /// that passed `CardSelect::Card(..)` can rely on this succeeding.
    pub fn into_single(self) -> Result<T> {
        match self {
            PerCard::Single(v) => Ok(v),
            PerCard::AllCards(_) => Err(Error::Protocol(
                "expected single-card result, got broadcast result".into(),
            )),
        }
    }

    /// Consume the result as a vector: one element for a single card,
    /// one per card for broadcast.
    pub fn into_vec(self) -> Vec<T> {
        match self {
            PerCard::Single(v) => vec![v],
            PerCard::AllCards(v) => v,
        }
    }

    /// Map over each contained value, preserving the shape.
    pub fn map<U, F: FnMut(T) -> U>(self, mut f: F) -> PerCard<U> {
        match self {
            PerCard::Single(v) => PerCard::Single(f(v)),
            PerCard::AllCards(v) => PerCard::AllCards(v.into_iter().map(f).collect()),
        }
    }
}
