//! Blackjack rules: five hands against a dealer that draws to 17.
//!
//! Every participant hand (each player's, and the dealer's) draws from its
//! own fresh seeded 52-card shuffle per hand, so play order between players
//! never changes anyone's cards and a full 64-player arena can't exhaust a
//! shared deck.

use crate::domain::Error;
use arena_core::Address;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const DEALER_STAND_TOTAL: u32 = 17;

pub const SCORE_BUST: i64 = -10;
pub const SCORE_WIN: i64 = 20;
pub const SCORE_PUSH: i64 = 5;
pub const SCORE_LOSS: i64 = 0;
pub const SCORE_NATURAL: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    /// 1 = ace, 11..=13 = face cards.
    pub rank: u8,
    pub suit: u8,
}

impl Card {
    fn base_value(&self) -> u32 {
        match self.rank {
            1 => 11,
            11..=13 => 10,
            rank => rank as u32,
        }
    }
}

/// Hand total with ace demotion: aces count 11 until the total busts, then
/// drop to 1 one at a time.
pub fn hand_total(cards: &[Card]) -> u32 {
    let mut total: u32 = cards.iter().map(Card::base_value).sum();
    let mut soft_aces = cards.iter().filter(|c| c.rank == 1).count();
    while total > 21 && soft_aces > 0 {
        total -= 10;
        soft_aces -= 1;
    }
    total
}

fn fresh_deck(rng: &mut ChaCha20Rng) -> Vec<Card> {
    let mut deck: Vec<Card> = (0..4)
        .flat_map(|suit| (1..=13).map(move |rank| Card { rank, suit }))
        .collect();
    deck.shuffle(rng);
    deck
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlackjackAction {
    Hit,
    Stand,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandState {
    pub cards: Vec<Card>,
    deck: Vec<Card>,
    pub standing: bool,
}

impl HandState {
    fn deal(rng: &mut ChaCha20Rng) -> Self {
        let mut deck = fresh_deck(rng);
        let cards = vec![
            deck.pop().unwrap_or(Card { rank: 2, suit: 0 }),
            deck.pop().unwrap_or(Card { rank: 2, suit: 1 }),
        ];
        Self {
            cards,
            deck,
            standing: false,
        }
    }

    pub fn total(&self) -> u32 {
        hand_total(&self.cards)
    }

    pub fn busted(&self) -> bool {
        self.total() > 21
    }

    /// 21 on the opening two cards.
    pub fn natural(&self) -> bool {
        self.cards.len() == 2 && self.total() == 21
    }

    pub fn done(&self) -> bool {
        self.standing || self.busted()
    }

    fn draw(&mut self) -> Card {
        // 52 cards can't run out before a hand busts, but don't panic if
        // someone ever changes the deck size.
        self.deck.pop().unwrap_or(Card { rank: 2, suit: 3 })
    }

    pub fn hit(&mut self) -> Result<Card, Error> {
        if self.done() {
            return Err(Error::InvalidMove("hand is already complete".to_string()));
        }
        let card = self.draw();
        self.cards.push(card);
        Ok(card)
    }

    pub fn stand(&mut self) -> Result<(), Error> {
        if self.done() {
            return Err(Error::InvalidMove("hand is already complete".to_string()));
        }
        self.standing = true;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlackjackRound {
    pub hand_number: u32,
    pub dealer: HandState,
    pub hands: BTreeMap<Address, HandState>,
}

pub fn build_round(
    players: &[Address],
    hand_number: u32,
    mut rng_for: impl FnMut(&[u8]) -> ChaCha20Rng,
) -> BlackjackRound {
    let dealer = HandState::deal(&mut rng_for(b"dealer"));
    let hands = players
        .iter()
        .map(|player| {
            let mut rng = rng_for(player.as_bytes());
            (*player, HandState::deal(&mut rng))
        })
        .collect();

    BlackjackRound {
        hand_number,
        dealer,
        hands,
    }
}

impl BlackjackRound {
    pub fn apply(&mut self, player: &Address, action: BlackjackAction) -> Result<(), Error> {
        let hand = self
            .hands
            .get_mut(player)
            .ok_or(Error::NotAParticipant(*player))?;
        match action {
            BlackjackAction::Hit => hand.hit().map(|_| ()),
            BlackjackAction::Stand => hand.stand(),
        }
    }

    pub fn player_done(&self, player: &Address) -> bool {
        self.hands.get(player).map_or(true, HandState::done)
    }

    pub fn all_done(&self) -> bool {
        self.hands.values().all(HandState::done)
    }

    /// House policy used for absent players: hit below 17, then stand.
    pub fn auto_play(&mut self, player: &Address) -> Result<(), Error> {
        let hand = self
            .hands
            .get_mut(player)
            .ok_or(Error::NotAParticipant(*player))?;
        while !hand.done() && hand.total() < DEALER_STAND_TOTAL {
            hand.hit()?;
        }
        if !hand.done() {
            hand.stand()?;
        }
        Ok(())
    }

    /// Dealer draws to 17, then every hand settles. Returns per-player score
    /// deltas.
    pub fn resolve(&mut self) -> Vec<(Address, i64)> {
        while hand_total(&self.dealer.cards) < DEALER_STAND_TOTAL {
            let card = self.dealer.draw();
            self.dealer.cards.push(card);
        }
        let dealer_total = self.dealer.total();
        let dealer_busted = dealer_total > 21;
        let dealer_natural = self.dealer.natural();

        self.hands
            .iter()
            .map(|(player, hand)| {
                let delta = if hand.busted() {
                    SCORE_BUST
                } else if hand.natural() {
                    if dealer_natural {
                        SCORE_PUSH
                    } else {
                        SCORE_NATURAL
                    }
                } else if dealer_busted || hand.total() > dealer_total {
                    SCORE_WIN
                } else if hand.total() == dealer_total {
                    SCORE_PUSH
                } else {
                    SCORE_LOSS
                };
                (*player, delta)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn hand(cards: &[(u8, u8)]) -> HandState {
        HandState {
            cards: cards.iter().map(|&(rank, suit)| Card { rank, suit }).collect(),
            deck: fresh_deck(&mut ChaCha20Rng::from_seed([0u8; 32])),
            standing: false,
        }
    }

    #[test]
    fn ace_demotion() {
        // A + 9 = soft 20.
        assert_eq!(hand_total(&hand(&[(1, 0), (9, 1)]).cards), 20);
        // A + 9 + 5: ace drops to 1 -> 15.
        assert_eq!(hand_total(&hand(&[(1, 0), (9, 1), (5, 2)]).cards), 15);
        // A + A + 9: one ace drops -> 21.
        assert_eq!(hand_total(&hand(&[(1, 0), (1, 1), (9, 2)]).cards), 21);
        // A + A + K + K: both aces drop -> 22, bust.
        assert_eq!(hand_total(&hand(&[(1, 0), (1, 1), (13, 2), (13, 3)]).cards), 22);
        // Face cards count ten.
        assert_eq!(hand_total(&hand(&[(11, 0), (12, 1)]).cards), 20);
    }

    #[test]
    fn natural_is_two_card_21() {
        assert!(hand(&[(1, 0), (13, 1)]).natural());
        assert!(!hand(&[(1, 0), (5, 1), (5, 2)]).natural());
    }

    #[test]
    fn deal_is_deterministic_per_seed() {
        let a = HandState::deal(&mut ChaCha20Rng::from_seed([4u8; 32]));
        let b = HandState::deal(&mut ChaCha20Rng::from_seed([4u8; 32]));
        assert_eq!(a.cards, b.cards);
        assert_eq!(a.deck.len(), 50);
    }

    #[test]
    fn hit_after_stand_rejected() {
        let mut hand = HandState::deal(&mut ChaCha20Rng::from_seed([4u8; 32]));
        hand.stand().unwrap();
        assert!(hand.hit().is_err());
        assert!(hand.stand().is_err());
    }

    #[test]
    fn resolution_outcomes() {
        let players: Vec<Address> = (0..5)
            .map(|i| Address::synthesize("p", i as i128))
            .collect();
        let mut round = build_round(&players, 1, |context| {
            let mut seed = [0u8; 32];
            seed[..context.len().min(32)]
                .copy_from_slice(&context[..context.len().min(32)]);
            ChaCha20Rng::from_seed(seed)
        });

        // Fix the dealer at a hard 18.
        round.dealer = hand(&[(10, 0), (8, 1)]);

        round.hands.insert(players[0], hand(&[(10, 0), (9, 1)])); // 19, beats 18
        round.hands.insert(players[1], hand(&[(10, 0), (8, 2)])); // push
        round.hands.insert(players[2], hand(&[(10, 0), (7, 1)])); // 17, loss
        let mut busted = hand(&[(10, 0), (9, 1), (5, 2)]); // 24
        busted.standing = false;
        round.hands.insert(players[3], busted);
        round.hands.insert(players[4], hand(&[(1, 0), (13, 1)])); // natural

        let deltas: BTreeMap<Address, i64> = round.resolve().into_iter().collect();
        assert_eq!(deltas[&players[0]], SCORE_WIN);
        assert_eq!(deltas[&players[1]], SCORE_PUSH);
        assert_eq!(deltas[&players[2]], SCORE_LOSS);
        assert_eq!(deltas[&players[3]], SCORE_BUST);
        assert_eq!(deltas[&players[4]], SCORE_NATURAL);
    }

    #[test]
    fn dealer_bust_pays_standing_hands() {
        let players = vec![Address::synthesize("p", 0)];
        let mut round = build_round(&players, 1, |_| ChaCha20Rng::from_seed([1u8; 32]));

        // Dealer at 16 with a forced bust card on top of the deck.
        let mut dealer = hand(&[(10, 0), (6, 1)]);
        dealer.deck.push(Card { rank: 10, suit: 2 });
        round.dealer = dealer;
        round.hands.insert(players[0], hand(&[(10, 0), (2, 1)])); // 12, stands

        let deltas = round.resolve();
        assert!(round.dealer.total() > 21);
        assert_eq!(deltas[0].1, SCORE_WIN);
    }

    #[test]
    fn auto_play_follows_house_policy() {
        let players = vec![Address::synthesize("p", 0)];
        let mut round = build_round(&players, 1, |_| ChaCha20Rng::from_seed([8u8; 32]));
        round.auto_play(&players[0]).unwrap();

        let hand = &round.hands[&players[0]];
        assert!(hand.done());
        assert!(hand.busted() || hand.total() >= DEALER_STAND_TOTAL);
    }
}
