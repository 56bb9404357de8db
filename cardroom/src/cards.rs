//! Card ranks, hands and twenty-one totals.
//!
//! Hands are persisted as comma-joined rank symbols (`"A,10,K"`), which is the
//! format [`Hand::parse`] reads and [`Hand`]'s `Display` writes.

use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Highest total that does not bust.
pub const TWENTY_ONE: u32 = 21;

/// Card rank. Suits play no part in the game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rank {
    Two,
    Three,
    Four,
    Five,
    Six,
    Seven,
    Eight,
    Nine,
    Ten,
    Jack,
    Queen,
    King,
    Ace,
}

/// Every rank once, in symbol order.
pub const RANKS: [Rank; 13] = [
    Rank::Two,
    Rank::Three,
    Rank::Four,
    Rank::Five,
    Rank::Six,
    Rank::Seven,
    Rank::Eight,
    Rank::Nine,
    Rank::Ten,
    Rank::Jack,
    Rank::Queen,
    Rank::King,
    Rank::Ace,
];

impl Rank {
    /// Stored symbol (`"2"`..`"10"`, `"J"`, `"Q"`, `"K"`, `"A"`).
    pub fn symbol(self) -> &'static str {
        match self {
            Rank::Two => "2",
            Rank::Three => "3",
            Rank::Four => "4",
            Rank::Five => "5",
            Rank::Six => "6",
            Rank::Seven => "7",
            Rank::Eight => "8",
            Rank::Nine => "9",
            Rank::Ten => "10",
            Rank::Jack => "J",
            Rank::Queen => "Q",
            Rank::King => "K",
            Rank::Ace => "A",
        }
    }

    /// Point value with an ace counted as 1.
    pub fn base_value(self) -> u32 {
        match self {
            Rank::Two => 2,
            Rank::Three => 3,
            Rank::Four => 4,
            Rank::Five => 5,
            Rank::Six => 6,
            Rank::Seven => 7,
            Rank::Eight => 8,
            Rank::Nine => 9,
            Rank::Ten | Rank::Jack | Rank::Queen | Rank::King => 10,
            Rank::Ace => 1,
        }
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A token that is not a rank symbol
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown card: {0:?}")]
pub struct CardParseError(pub String);

impl FromStr for Rank {
    type Err = CardParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim();
        RANKS
            .iter()
            .copied()
            .find(|rank| rank.symbol().eq_ignore_ascii_case(token))
            .ok_or_else(|| CardParseError(token.to_string()))
    }
}

impl Serialize for Rank {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.symbol())
    }
}

impl<'de> Deserialize<'de> for Rank {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let symbol = String::deserialize(deserializer)?;
        symbol.parse().map_err(serde::de::Error::custom)
    }
}

/// Draw one card uniformly at random. Cards are drawn with replacement.
pub fn draw_card<R: Rng + ?Sized>(rng: &mut R) -> Rank {
    RANKS[rng.random_range(0..RANKS.len())]
}

/// Cards held by one player, in the order they were dealt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hand(Vec<Rank>);

impl Hand {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ranks(ranks: Vec<Rank>) -> Self {
        Self(ranks)
    }

    /// Opening hand of two random cards.
    pub fn deal_initial<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self(vec![draw_card(rng), draw_card(rng)])
    }

    /// Parse a stored `"A,10,K"` column. Blank input is an empty hand.
    pub fn parse(stored: &str) -> Result<Self, CardParseError> {
        if stored.trim().is_empty() {
            return Ok(Self::new());
        }

        stored
            .split(',')
            .map(str::parse)
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    pub fn push(&mut self, rank: Rank) {
        self.0.push(rank);
    }

    pub fn cards(&self) -> &[Rank] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Twenty-one total.
    ///
    /// Non-aces are summed first; each ace then counts 11 when that keeps the
    /// running total at or below 21, otherwise 1.
    pub fn total(&self) -> u32 {
        let mut total = 0;
        let mut aces = 0;

        for rank in &self.0 {
            match rank {
                Rank::Ace => aces += 1,
                other => total += other.base_value(),
            }
        }

        for _ in 0..aces {
            total += if total + 11 <= TWENTY_ONE { 11 } else { 1 };
        }

        total
    }

    pub fn is_bust(&self) -> bool {
        self.total() > TWENTY_ONE
    }

    /// Reached or passed 21; no further cards can be taken.
    pub fn is_complete(&self) -> bool {
        self.total() >= TWENTY_ONE
    }
}

impl fmt::Display for Hand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, rank) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            f.write_str(rank.symbol())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};

    fn hand(s: &str) -> Hand {
        Hand::parse(s).unwrap()
    }

    #[test]
    fn test_face_cards_count_ten() {
        assert_eq!(hand("K,Q").total(), 20);
        assert_eq!(hand("J,10").total(), 20);
    }

    #[test]
    fn test_ace_counts_high_when_it_fits() {
        assert_eq!(hand("A,K").total(), 21);
        assert_eq!(hand("A,5").total(), 16);
    }

    #[test]
    fn test_ace_counts_low_when_high_would_bust() {
        assert_eq!(hand("K,9,A").total(), 20);
        assert_eq!(hand("A,A").total(), 12);
        assert_eq!(hand("A,A,A,A").total(), 14);
    }

    #[test]
    fn test_aces_resolved_after_other_cards() {
        // The ace is dealt first but still sees the 9 and 5 before choosing.
        assert_eq!(hand("A,9,5").total(), 15);
    }

    #[test]
    fn test_bust_and_complete() {
        let bust = hand("K,Q,5");
        assert!(bust.is_bust());
        assert!(bust.is_complete());

        let exact = hand("7,7,7");
        assert!(!exact.is_bust());
        assert!(exact.is_complete());

        assert!(!hand("10,9").is_complete());
    }

    #[test]
    fn test_parse_blank_is_empty() {
        assert!(hand("").is_empty());
        assert!(hand("   ").is_empty());
        assert_eq!(hand("").total(), 0);
    }

    #[test]
    fn test_parse_rejects_unknown_token() {
        let err = Hand::parse("A,1,K").unwrap_err();
        assert_eq!(err, CardParseError("1".to_string()));
    }

    #[test]
    fn test_display_matches_stored_format() {
        let h = Hand::from_ranks(vec![Rank::Ace, Rank::Ten, Rank::King]);
        assert_eq!(h.to_string(), "A,10,K");
        assert_eq!(Hand::parse(&h.to_string()).unwrap(), h);
    }

    #[test]
    fn test_parse_is_lenient_about_case_and_spaces() {
        assert_eq!(hand(" a, k "), Hand::from_ranks(vec![Rank::Ace, Rank::King]));
    }

    #[test]
    fn test_deal_initial_has_two_cards() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let h = Hand::deal_initial(&mut rng);
            assert_eq!(h.len(), 2);
            assert!(h.total() >= 4 && h.total() <= 21);
        }
    }

    #[test]
    fn test_draw_card_reaches_every_rank() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..2_000 {
            seen.insert(draw_card(&mut rng));
        }
        assert_eq!(seen.len(), RANKS.len());
    }

    #[test]
    fn test_hand_serializes_as_symbol_array() {
        let json = serde_json::to_string(&hand("A,10")).unwrap();
        assert_eq!(json, r#"["A","10"]"#);
    }
}
