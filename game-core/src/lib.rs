use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

pub const DECK_SIZE: usize = 52;

/// The seat holding this card opens the round.
pub const SEVEN_OF_HEARTS: Card = Card { id: 7 };

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Suit {
    Hearts,
    Diamonds,
    Clubs,
    Spades,
}

impl Suit {
    pub const ALL: [Suit; 4] = [Suit::Hearts, Suit::Diamonds, Suit::Clubs, Suit::Spades];

    fn index(&self) -> usize {
        match self {
            Suit::Hearts => 0,
            Suit::Diamonds => 1,
            Suit::Clubs => 2,
            Suit::Spades => 3,
        }
    }

    pub fn from_char(ch: char) -> Option<Self> {
        match ch {
            'H' => Some(Suit::Hearts),
            'D' => Some(Suit::Diamonds),
            'C' => Some(Suit::Clubs),
            'S' => Some(Suit::Spades),
            _ => None,
        }
    }

    pub fn to_char(&self) -> char {
        match self {
            Suit::Hearts => 'H',
            Suit::Diamonds => 'D',
            Suit::Clubs => 'C',
            Suit::Spades => 'S',
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Rank {
    Ace = 1,
    Two = 2,
    Three = 3,
    Four = 4,
    Five = 5,
    Six = 6,
    Seven = 7,
    Eight = 8,
    Nine = 9,
    Ten = 10,
    Jack = 11,
    Queen = 12,
    King = 13,
}

impl Rank {
    pub const ALL: [Rank; 13] = [
        Rank::Ace,
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
    ];

    pub fn value(&self) -> u8 {
        *self as u8
    }

    pub fn from_value(value: u8) -> Option<Self> {
        let index = value.checked_sub(1)? as usize;
        Self::ALL.get(index).copied()
    }

    /// Neighbour one step down. Aces have none.
    pub fn lower(&self) -> Option<Self> {
        Self::from_value(self.value() - 1)
    }

    /// Neighbour one step up. Kings have none.
    pub fn higher(&self) -> Option<Self> {
        Self::from_value(self.value() + 1)
    }

    /// Penalty points for a card still held when the round ends.
    pub fn score(&self) -> u32 {
        u32::from(self.value())
    }

    pub fn from_char(ch: char) -> Option<Self> {
        match ch {
            'A' => Some(Rank::Ace),
            'T' => Some(Rank::Ten),
            'J' => Some(Rank::Jack),
            'Q' => Some(Rank::Queen),
            'K' => Some(Rank::King),
            '2'..='9' => Self::from_value(ch as u8 - b'0'),
            _ => None,
        }
    }

    pub fn to_char(&self) -> char {
        match self {
            Rank::Ace => 'A',
            Rank::Ten => 'T',
            Rank::Jack => 'J',
            Rank::Queen => 'Q',
            Rank::King => 'K',
            other => (b'0' + other.value()) as char,
        }
    }
}

/// A card identity in `1..=52`: hearts first, then diamonds, clubs and
/// spades, each running ace to king.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Card {
    id: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InvalidCardId(pub u8);

impl fmt::Display for InvalidCardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "card id {} is outside 1..=52", self.0)
    }
}

impl std::error::Error for InvalidCardId {}

impl Card {
    pub fn from_id(id: u8) -> Option<Self> {
        (1..=DECK_SIZE as u8).contains(&id).then_some(Card { id })
    }

    pub fn new(rank: Rank, suit: Suit) -> Self {
        Card {
            id: suit.index() as u8 * 13 + rank.value(),
        }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn suit(&self) -> Suit {
        Suit::ALL[usize::from((self.id - 1) / 13)]
    }

    pub fn rank(&self) -> Rank {
        Rank::ALL[usize::from((self.id - 1) % 13)]
    }

    pub fn code(&self) -> String {
        format!("{}{}", self.rank().to_char(), self.suit().to_char())
    }

    pub fn from_code(code: &str) -> Option<Self> {
        let mut chars = code.chars();
        let rank = Rank::from_char(chars.next()?)?;
        let suit = Suit::from_char(chars.next()?)?;
        if chars.next().is_some() {
            return None;
        }
        Some(Card::new(rank, suit))
    }
}

impl TryFrom<u8> for Card {
    type Error = InvalidCardId;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Card::from_id(id).ok_or(InvalidCardId(id))
    }
}

impl From<Card> for u8 {
    fn from(card: Card) -> Self {
        card.id
    }
}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

pub fn standard_deck() -> Vec<Card> {
    (1..=DECK_SIZE as u8).map(|id| Card { id }).collect()
}

pub fn shuffled_deck(seed: u64) -> Vec<Card> {
    let mut deck = standard_deck();
    let mut rng = StdRng::seed_from_u64(seed);
    deck.shuffle(&mut rng);
    deck
}

/// Deals one card per seat per pass, starting at seat 1, until the deck runs out.
pub fn deal(deck: &[Card], seat_count: usize) -> Vec<Vec<Card>> {
    if seat_count == 0 {
        return Vec::new();
    }
    let mut hands = vec![Vec::with_capacity(deck.len() / seat_count + 1); seat_count];
    for (i, card) in deck.iter().enumerate() {
        hands[i % seat_count].push(*card);
    }
    hands
}

pub fn sort_hand(hand: &mut [Card]) {
    hand.sort();
}

pub fn hand_score(hand: &[Card]) -> u32 {
    hand.iter().map(|card| card.rank().score()).sum()
}

/// Face-up runs of played cards, one lane per suit, each kept in rank order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    lanes: [Vec<Card>; 4],
}

impl Layout {
    pub fn is_empty(&self) -> bool {
        self.lanes.iter().all(Vec::is_empty)
    }

    pub fn len(&self) -> usize {
        self.lanes.iter().map(Vec::len).sum()
    }

    pub fn lane(&self, suit: Suit) -> &[Card] {
        &self.lanes[suit.index()]
    }

    pub fn lanes(&self) -> impl Iterator<Item = (Suit, &[Card])> {
        Suit::ALL
            .into_iter()
            .map(move |suit| (suit, self.lane(suit)))
    }

    pub fn contains(&self, card: Card) -> bool {
        self.lane(card.suit()).contains(&card)
    }

    fn lane_has_rank(&self, suit: Suit, rank: Rank) -> bool {
        self.lane(suit).iter().any(|card| card.rank() == rank)
    }

    fn place(&mut self, card: Card) {
        let lane = &mut self.lanes[card.suit().index()];
        lane.push(card);
        lane.sort_by_key(|c| c.rank());
    }
}

pub fn is_playable(card: Card, layout: &Layout) -> bool {
    let rank = card.rank();
    if rank == Rank::Seven {
        return !layout.contains(card);
    }
    if layout.is_empty() {
        return false;
    }
    let suit = card.suit();
    if !layout.lane_has_rank(suit, Rank::Seven) {
        return false;
    }
    let touches = |neighbour: Option<Rank>| {
        neighbour.map_or(false, |r| layout.lane_has_rank(suit, r))
    };
    touches(rank.lower()) || touches(rank.higher())
}

/// Legal plays from `hand`, ascending by card id, without duplicates.
pub fn valid_moves(hand: &[Card], layout: &Layout) -> Vec<Card> {
    hand.iter()
        .copied()
        .filter(|card| is_playable(*card, layout))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatScore {
    pub seat: u8,
    pub score: u32,
    pub remaining_cards: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameState {
    /// `hands[i]` belongs to seat `i + 1`.
    pub hands: Vec<Vec<Card>>,
    pub layout: Layout,
    pub turn: u8,
    pub winner: Option<u8>,
    /// Cards of seats removed mid-round. They stay out of play.
    pub retired: Vec<Card>,
    /// Seed the deal came from; replaying it reproduces every hand.
    pub deck_seed: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GameError {
    NotYourTurn,
    UnknownSeat,
    CardNotHeld,
    IllegalMove,
    GameOver,
}

impl fmt::Display for GameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            GameError::NotYourTurn => "it is not your turn",
            GameError::UnknownSeat => "no such seat",
            GameError::CardNotHeld => "card is not in your hand",
            GameError::IllegalMove => "card cannot be placed on the layout",
            GameError::GameOver => "the round is over",
        };
        f.write_str(text)
    }
}

impl std::error::Error for GameError {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MoveOutcome {
    pub card: Card,
    pub next_turn: u8,
    pub winner: Option<u8>,
}

impl GameState {
    pub fn new(seat_count: usize, seed: u64) -> Self {
        let mut state = Self::from_deck(&shuffled_deck(seed), seat_count);
        state.deck_seed = seed;
        state
    }

    pub fn from_deck(deck: &[Card], seat_count: usize) -> Self {
        let mut hands = deal(deck, seat_count);
        for hand in hands.iter_mut() {
            sort_hand(hand);
        }
        let turn = hands
            .iter()
            .position(|hand| hand.contains(&SEVEN_OF_HEARTS))
            .map(|idx| idx as u8 + 1)
            .unwrap_or(1);
        GameState {
            hands,
            layout: Layout::default(),
            turn,
            winner: None,
            retired: Vec::new(),
            deck_seed: 0,
        }
    }

    pub fn seat_count(&self) -> u8 {
        self.hands.len() as u8
    }

    fn seat_index(&self, seat: u8) -> Result<usize, GameError> {
        let idx = seat.checked_sub(1).ok_or(GameError::UnknownSeat)? as usize;
        if idx < self.hands.len() {
            Ok(idx)
        } else {
            Err(GameError::UnknownSeat)
        }
    }

    pub fn hand(&self, seat: u8) -> Option<&[Card]> {
        let idx = self.seat_index(seat).ok()?;
        Some(&self.hands[idx])
    }

    pub fn is_over(&self) -> bool {
        self.winner.is_some()
    }

    pub fn valid_moves_for(&self, seat: u8) -> Vec<Card> {
        self.hand(seat)
            .map(|hand| valid_moves(hand, &self.layout))
            .unwrap_or_default()
    }

    fn next_seat(&self, seat: u8) -> u8 {
        (seat % self.seat_count()) + 1
    }

    pub fn apply_move(&mut self, seat: u8, card: Card) -> Result<MoveOutcome, GameError> {
        if self.is_over() {
            return Err(GameError::GameOver);
        }
        let idx = self.seat_index(seat)?;
        if seat != self.turn {
            return Err(GameError::NotYourTurn);
        }
        let pos = self.hands[idx]
            .iter()
            .position(|c| *c == card)
            .ok_or(GameError::CardNotHeld)?;
        if !is_playable(card, &self.layout) {
            return Err(GameError::IllegalMove);
        }
        self.hands[idx].remove(pos);
        self.layout.place(card);
        if self.hands[idx].is_empty() {
            self.winner = Some(seat);
            return Ok(MoveOutcome {
                card,
                next_turn: self.turn,
                winner: Some(seat),
            });
        }
        self.turn = self.next_seat(seat);
        Ok(MoveOutcome {
            card,
            next_turn: self.turn,
            winner: None,
        })
    }

    /// Passing is allowed even when a legal play exists.
    pub fn pass(&mut self, seat: u8) -> Result<u8, GameError> {
        if self.is_over() {
            return Err(GameError::GameOver);
        }
        self.seat_index(seat)?;
        if seat != self.turn {
            return Err(GameError::NotYourTurn);
        }
        self.turn = self.next_seat(seat);
        Ok(self.turn)
    }

    /// Drops a seat from the round and shifts later seats down by one.
    ///
    /// If the removed seat held the turn, the turn stays on the same number
    /// (the next seat in order) or wraps to seat 1 when that number no longer
    /// exists.
    pub fn remove_seat(&mut self, seat: u8) -> Result<(), GameError> {
        let idx = self.seat_index(seat)?;
        let hand = self.hands.remove(idx);
        self.retired.extend(hand);
        let remaining = self.seat_count();
        self.turn = if remaining == 0 {
            1
        } else if self.turn == seat {
            if seat > remaining {
                1
            } else {
                seat
            }
        } else if self.turn > seat {
            self.turn - 1
        } else {
            self.turn
        };
        Ok(())
    }

    /// Remaining-hand penalties, lowest first; ties keep seat order.
    pub fn scores(&self) -> Vec<SeatScore> {
        let mut scores: Vec<SeatScore> = self
            .hands
            .iter()
            .enumerate()
            .map(|(idx, hand)| SeatScore {
                seat: idx as u8 + 1,
                score: hand_score(hand),
                remaining_cards: hand.len(),
            })
            .collect();
        scores.sort_by_key(|s| (s.score, s.seat));
        scores
    }

    pub fn card_count(&self) -> usize {
        self.hands.iter().map(Vec::len).sum::<usize>() + self.layout.len() + self.retired.len()
    }
}
