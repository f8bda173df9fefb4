//! Card ids and dealing for the two-deck landlord game.
//!
//! A card id is `suit * 100 + rank` with suits 0..4 and ranks 3..=15
//! (15 being the two); the jokers are 520 (small) and 521 (big).

use rand::seq::SliceRandom;
use rand::Rng;

pub type CardId = u16;

pub const SMALL_JOKER: CardId = 520;
pub const BIG_JOKER: CardId = 521;
pub const DECKS: usize = 2;
pub const DECK_SIZE: usize = 54;
pub const HAND_SIZE: usize = 25;
pub const BOTTOM_SIZE: usize = 8;

fn single_deck() -> impl Iterator<Item = CardId> {
    (0..4u16)
        .flat_map(|suit| (3..=15u16).map(move |rank| suit * 100 + rank))
        .chain([SMALL_JOKER, BIG_JOKER])
}

/// Two merged decks in canonical order.
pub fn double_deck() -> Vec<CardId> {
    let mut deck = Vec::with_capacity(DECKS * DECK_SIZE);
    for _ in 0..DECKS {
        deck.extend(single_deck());
    }
    deck
}

/// A full deal: `players` hands of [`HAND_SIZE`] plus the bottom cards.
#[derive(Debug, Clone)]
pub struct Deal {
    pub hands: Vec<Vec<CardId>>,
    pub bottom: Vec<CardId>,
}

/// Shuffle two decks and deal round-robin; whatever is left is the bottom.
pub fn deal<R: Rng + ?Sized>(rng: &mut R, players: usize) -> Deal {
    let mut deck = double_deck();
    deck.shuffle(rng);
    let dealt = players * HAND_SIZE;
    let mut hands = vec![Vec::with_capacity(HAND_SIZE + BOTTOM_SIZE); players];
    for (i, card) in deck[..dealt].iter().enumerate() {
        hands[i % players].push(*card);
    }
    Deal { hands, bottom: deck[dealt..].to_vec() }
}

/// Remove one copy of each card in `cards` from `hand`; absent cards are
/// skipped.
pub fn remove_cards(hand: &mut Vec<CardId>, cards: &[CardId]) {
    for card in cards {
        if let Some(pos) = hand.iter().position(|c| c == card) {
            hand.remove(pos);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn sorted(mut v: Vec<CardId>) -> Vec<CardId> {
        v.sort_unstable();
        v
    }

    #[test]
    fn double_deck_has_two_of_each_card() {
        let deck = double_deck();
        assert_eq!(deck.len(), 108);
        for card in single_deck() {
            assert_eq!(deck.iter().filter(|c| **c == card).count(), 2, "card {card}");
        }
    }

    #[test]
    fn deal_preserves_every_card() {
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let deal = deal(&mut rng, 4);
            assert!(deal.hands.iter().all(|h| h.len() == HAND_SIZE));
            assert_eq!(deal.bottom.len(), BOTTOM_SIZE);

            let mut all: Vec<CardId> = deal.hands.concat();
            all.extend(&deal.bottom);
            assert_eq!(sorted(all), sorted(double_deck()));
        }
    }

    #[test]
    fn remove_cards_takes_one_copy_and_ignores_missing() {
        let mut hand = vec![103, 103, 204];
        remove_cards(&mut hand, &[103, 999]);
        assert_eq!(hand, vec![103, 204]);
    }
}
