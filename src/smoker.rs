//! The consumer roles.

use crate::{Backend, Error, ResourceType, SemIndex, Taken};
use core::time::Duration;
use std::thread;
use tracing::{info, warn};


/// One completed consumption.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Consumption {
    /// Which smoker, by the resource it holds.
    pub smoker: ResourceType,
    /// What it took off the table.
    pub taken:  Taken,
    /// The round total right after this consumption.
    pub round:  u32,
}


/// A consumer that permanently holds one resource, and so can only use a pair of the other
/// two.
#[derive(Debug)]
pub struct Smoker<'b, B> {
    backend:    &'b B,
    holds:      ResourceType,
    smoke_time: Duration,
    log:        Vec<Consumption>,
}

impl<'b, B: Backend> Smoker<'b, B> {
    /// The smoker that holds `holds`, which spends `smoke_time` consuming each pair.
    pub const fn new(backend: &'b B, holds: ResourceType, smoke_time: Duration) -> Self {
        Self { backend, holds, smoke_time, log: Vec::new() }
    }

    /// Which resource this smoker holds, which also names it.
    #[must_use]
    pub const fn holds(&self) -> ResourceType { self.holds }

    /// One turn: wait to be woken, empty the table, consume, count the round, and give the turn
    /// back to the agent.
    ///
    /// Returns `Ok(None)` if the session was closed instead.
    ///
    /// # Errors
    /// If waiting or signalling fails.
    pub fn step(&mut self) -> Result<Option<Consumption>, Error> {
        if !self.backend.acquire(SemIndex::Smoker(self.holds))? {
            return Ok(None);
        }
        let index = self.holds.index();
        let table = self.backend.table();
        info!(smoker = index, "smoker {index} has {}", self.holds);
        let taken = table.drain();
        info!(smoker = index, "smoker {index} takes {taken} from the table");
        if !taken.completes(self.holds) {
            // Only a protocol violation could cause this.
            warn!(smoker = index, %taken, "smoker woken for a table it can't use");
        }
        info!(smoker = index, "smoker {index} rolls and smokes a cigarette");
        thread::sleep(self.smoke_time);
        let round = table.complete_round();
        info!(smoker = index, round, "round complete");
        self.backend.signal(SemIndex::Agent)?;
        let consumption = Consumption { smoker: self.holds, taken, round };
        self.log.push(consumption);
        Ok(Some(consumption))
    }

    /// Take turns until the session is closed.
    ///
    /// # Errors
    /// As for [`Self::step`].
    pub fn run(&mut self) -> Result<(), Error> {
        while self.step()?.is_some() {}
        Ok(())
    }

    /// Everything consumed so far, in order.
    #[must_use]
    pub fn consumptions(&self) -> &[Consumption] { &self.log }

    /// Give up the record of consumptions.
    #[must_use]
    pub fn into_consumptions(self) -> Vec<Consumption> { self.log }
}


#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::{backend::local::Local, Pair, ResourceType::{Match, Paper, Tobacco}};

    #[test]
    fn step_drains_counts_and_releases() {
        let b = Local::create().unwrap();
        let pair = Pair::new(Tobacco, Match).unwrap();
        // Play the agent's part by hand.
        b.wait(SemIndex::Agent).unwrap();
        b.table().publish(pair);
        b.signal(SemIndex::Smoker(Paper)).unwrap();

        let mut smoker = Smoker::new(&b, Paper, Duration::ZERO);
        assert_eq!(smoker.holds(), Paper);
        let c = smoker.step().unwrap().unwrap();
        assert_eq!(c.smoker, Paper);
        assert!(c.taken.is(pair));
        assert_eq!(c.round, 1);
        assert_eq!(b.table().present(), [false; 3]);
        assert_eq!(b.table().rounds(), 1);
        assert_eq!(b.value(SemIndex::Agent).unwrap(), 1);
        assert_eq!(smoker.consumptions(), [c]);
    }

    #[test]
    fn stops_when_closed() {
        let b = Local::create().unwrap();
        b.close().unwrap();
        let mut smoker = Smoker::new(&b, Match, Duration::ZERO);
        smoker.run().unwrap();
        assert!(smoker.into_consumptions().is_empty());
        assert_eq!(b.table().rounds(), 0);
    }
}
