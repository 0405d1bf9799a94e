//! The producer role.

use crate::{Backend, Error, Pair, ResourceType, SemIndex, ITEMS};
use core::fmt::{self, Display, Formatter};
use getrandom::getrandom;
use std::collections::VecDeque;
use tracing::{debug, info};


/// Where the agent's pairs come from.
pub trait PairSource {
    /// The next pair to publish.
    ///
    /// # Errors
    /// If no pair can be produced, e.g. [`Error::Entropy`].
    fn next_pair(&mut self) -> Result<Pair, Error>;
}

impl<P: PairSource + ?Sized> PairSource for &mut P {
    fn next_pair(&mut self) -> Result<Pair, Error> { (**self).next_pair() }
}


/// Uniformly random pairs, from the OS's random source.
///
/// The first resource is uniform over the three types.  The second is drawn without replacement
/// from the remaining two, so a pair of equal resources can't be produced.
#[allow(missing_copy_implementations)] // A copy would replay the same draws.
#[derive(Debug)]
pub struct RandomPairs {
    buf: [u8; Self::BUF_LEN],
    pos: usize,
}

impl RandomPairs {
    const BUF_LEN: usize = 64;
    // The largest multiple of `ITEMS` that fits in a byte, so that `% ITEMS` isn't biased.
    #[allow(clippy::as_conversions, clippy::cast_possible_truncation)]
    const UNBIASED: u8 = (256 / ITEMS * ITEMS) as u8 - 1;

    /// A source that will refill from the OS when first used.
    #[must_use]
    pub const fn new() -> Self { Self { buf: [0; Self::BUF_LEN], pos: Self::BUF_LEN } }

    fn byte(&mut self) -> Result<u8, Error> {
        if self.pos == Self::BUF_LEN {
            getrandom(&mut self.buf).map_err(Error::Entropy)?;
            self.pos = 0;
        }
        let b = self.buf[self.pos];
        self.pos += 1;
        Ok(b)
    }
}

impl Default for RandomPairs {
    fn default() -> Self { Self::new() }
}

impl PairSource for RandomPairs {
    fn next_pair(&mut self) -> Result<Pair, Error> {
        let first = loop {
            let b = self.byte()?;
            if b <= Self::UNBIASED {
                break usize::from(b) % ITEMS;
            }
        };
        let offset = self.byte()?;
        #[allow(clippy::unreachable)]
        let Some(first) = ResourceType::from_index(first) else { unreachable!() };
        Ok(Pair::from_draw(first, offset))
    }
}


/// A fixed sequence of pairs, then random ones once it runs out.
#[derive(Debug, Default)]
pub struct ScriptedPairs {
    script: VecDeque<Pair>,
    after:  RandomPairs,
}

impl ScriptedPairs {
    /// Replays `script` in order.
    #[must_use]
    pub fn new(script: impl IntoIterator<Item = Pair>) -> Self {
        Self { script: script.into_iter().collect(), after: RandomPairs::new() }
    }

    /// How many scripted pairs haven't been used yet.
    #[must_use]
    pub fn remaining(&self) -> usize { self.script.len() }
}

impl PairSource for ScriptedPairs {
    fn next_pair(&mut self) -> Result<Pair, Error> {
        match self.script.pop_front() {
            Some(pair) => Ok(pair),
            None => self.after.next_pair(),
        }
    }
}


/// One pair put on the table, and the smoker it was meant for.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Publication {
    /// 1-based count of publications in this session.
    pub round:  u32,
    /// What was put on the table.
    pub pair:   Pair,
    /// The one smoker that was woken.
    pub smoker: ResourceType,
}

impl Display for Publication {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "#{}: {} for smoker {}", self.round, self.pair, self.smoker.index())
    }
}


/// Why the agent's loop ended.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Stop {
    /// The round budget was reached, and this agent closed the session.
    BudgetReached,
    /// Somebody else closed the session.
    Cancelled,
}


/// The sole producer.
#[derive(Debug)]
pub struct Agent<'b, B, P> {
    backend: &'b B,
    pairs:   P,
    budget:  u32,
    log:     Vec<Publication>,
}

impl<'b, B: Backend, P: PairSource> Agent<'b, B, P> {
    /// An agent that stops after `budget` consumptions have completed.
    pub const fn new(backend: &'b B, pairs: P, budget: u32) -> Self {
        Self { backend, pairs, budget, log: Vec::new() }
    }

    /// One turn: wait for the table to be free, then either stop or publish one pair and wake
    /// the one smoker that can use it.
    ///
    /// Returns `Ok(None)` while the session goes on.
    ///
    /// # Errors
    /// If waiting, signalling, or drawing a pair fails.  The session is not closed by this.
    pub fn step(&mut self) -> Result<Option<Stop>, Error> {
        if !self.backend.acquire(SemIndex::Agent)? {
            return Ok(Some(Stop::Cancelled));
        }
        let table = self.backend.table();
        let rounds = table.rounds();
        if rounds >= self.budget {
            info!(rounds, "maximum rounds reached, closing the session");
            let _first = self.backend.close()?;
            return Ok(Some(Stop::BudgetReached));
        }
        let pair = self.pairs.next_pair()?;
        let round = table.publish(pair);
        let smoker = pair.eligible();
        info!(round, first = %pair.first(), second = %pair.second(),
              "agent puts {pair} on the table");
        self.log.push(Publication { round, pair, smoker });
        self.backend.signal(SemIndex::Smoker(smoker))?;
        debug!(round, smoker = smoker.index(), "agent woke the smoker that has {smoker}");
        Ok(None)
    }

    /// Take turns until the budget is reached or the session is closed.
    ///
    /// # Errors
    /// As for [`Self::step`].
    pub fn run(&mut self) -> Result<Stop, Error> {
        loop {
            if let Some(stop) = self.step()? {
                break Ok(stop);
            }
        }
    }

    /// Everything published so far, in order.
    #[must_use]
    pub fn publications(&self) -> &[Publication] { &self.log }

    /// Give up the record of publications.
    #[must_use]
    pub fn into_publications(self) -> Vec<Publication> { self.log }
}


#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::{backend::local::Local, ResourceType::{Match, Paper, Tobacco}};

    #[test]
    fn random_pairs_are_valid_and_varied() {
        let mut pairs = RandomPairs::new();
        let mut eligible = [0_u32; ITEMS];
        for _ in 0 .. 600 {
            let p = pairs.next_pair().unwrap();
            assert_ne!(p.first(), p.second());
            eligible[p.eligible().index()] += 1;
        }
        // Astronomically unlikely to fail if the draw is uniform.
        assert!(eligible.iter().all(|&n| n > 100), "{eligible:?}");
    }

    #[test]
    fn scripted_then_random() {
        let script = [Pair::new(Tobacco, Paper).unwrap(), Pair::new(Paper, Match).unwrap()];
        let mut pairs = ScriptedPairs::new(script);
        assert_eq!(pairs.remaining(), 2);
        assert_eq!(pairs.next_pair().unwrap(), script[0]);
        assert_eq!(pairs.next_pair().unwrap(), script[1]);
        assert_eq!(pairs.remaining(), 0);
        let p = pairs.next_pair().unwrap();
        assert_ne!(p.first(), p.second());
    }

    #[test]
    fn step_publishes_and_wakes_one() {
        let b = Local::create().unwrap();
        let pair = Pair::new(Tobacco, Paper).unwrap();
        let mut agent = Agent::new(&b, ScriptedPairs::new([pair]), 3);
        assert_eq!(agent.step().unwrap(), None);
        assert_eq!(b.table().present(), [true, true, false]);
        assert_eq!(b.value(SemIndex::Smoker(Match)).unwrap(), 1);
        assert_eq!(b.value(SemIndex::Smoker(Tobacco)).unwrap(), 0);
        assert_eq!(b.value(SemIndex::Smoker(Paper)).unwrap(), 0);
        assert_eq!(b.value(SemIndex::Agent).unwrap(), 0);
        assert_eq!(agent.publications(), [Publication { round: 1, pair, smoker: Match }]);
    }

    #[test]
    fn zero_budget_publishes_nothing() {
        let b = Local::create().unwrap();
        let mut agent = Agent::new(&b, RandomPairs::new(), 0);
        assert_eq!(agent.run().unwrap(), Stop::BudgetReached);
        assert!(agent.publications().is_empty());
        assert_eq!(b.table().published(), 0);
        assert!(b.table().is_closed());
    }

    #[test]
    fn stops_when_closed() {
        let b = Local::create().unwrap();
        b.close().unwrap();
        let mut agent = Agent::new(&b, RandomPairs::new(), 5);
        assert_eq!(agent.run().unwrap(), Stop::Cancelled);
        assert!(agent.into_publications().is_empty());
    }
}
