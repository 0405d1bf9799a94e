//! The mutable state that lives in the shared block.

use crate::{Pair, ResourceType, ITEMS};
use core::{array,
           fmt::{self, Display, Formatter},
           sync::atomic::{AtomicBool, AtomicU32,
                          Ordering::{AcqRel, Acquire, Relaxed}}};


/// The table: which resources are on it, plus the counters every role reads.
///
/// This is placed directly into memory that is shared between execution contexts (an anonymous
/// shared mapping, a POSIX shared-memory object, a System V segment, or plain heap memory for
/// threads), so it is `repr(C)` and valid when all-zero.
///
/// # Exclusion
///
/// No lock protects `present`.  Exclusion comes from the rendezvous: the agent only writes it
/// between waking on the agent semaphore and signalling exactly one smoker semaphore, and that
/// smoker only reads and clears it between waking on its own semaphore and signalling the agent
/// semaphore.  At most one context is ever between those points, and the semaphores' wait/post
/// pairs order the accesses.  The fields are atomics anyway, so that a protocol bug is a logic
/// error instead of undefined behavior, and `rounds` is incremented atomically because the agent
/// reads it as soon as it wakes.
#[repr(C)]
#[derive(Debug)]
pub struct TableState {
    present:   [AtomicBool; ITEMS],
    closed:    AtomicBool,
    rounds:    AtomicU32,
    published: AtomicU32,
}


impl TableState {
    /// Nothing on the table, no rounds completed, not closed.
    #[must_use]
    #[inline]
    pub const fn new() -> Self {
        Self {
            present:   [AtomicBool::new(false), AtomicBool::new(false), AtomicBool::new(false)],
            closed:    AtomicBool::new(false),
            rounds:    AtomicU32::new(0),
            published: AtomicU32::new(0),
        }
    }

    /// Put both resources of `pair` on the table.
    ///
    /// Only the agent calls this, and only while it holds the turn.  The slots are overwritten
    /// unconditionally, so leftovers from a cancelled round don't matter.
    #[inline]
    pub fn publish(&self, pair: Pair) -> u32 {
        self.present[pair.first().index()].store(true, Relaxed);
        self.present[pair.second().index()].store(true, Relaxed);
        self.published.fetch_add(1, Relaxed) + 1
    }

    /// Take everything that's on the table, leaving it empty.
    ///
    /// Only the eligible smoker calls this, and only while it holds the turn.
    #[inline]
    pub fn drain(&self) -> Taken {
        let mut taken = Taken([false; ITEMS]);
        for (slot, flag) in taken.0.iter_mut().zip(&self.present) {
            *slot = flag.swap(false, Relaxed);
        }
        taken
    }

    /// Which resources are on the table right now.
    #[must_use]
    #[inline]
    pub fn present(&self) -> [bool; ITEMS] { array::from_fn(|i| self.present[i].load(Relaxed)) }

    /// Count one more completed consumption, and return the new total.
    #[inline]
    pub fn complete_round(&self) -> u32 { self.rounds.fetch_add(1, AcqRel) + 1 }

    /// How many consumptions have completed.  Never decreases.
    #[must_use]
    #[inline]
    pub fn rounds(&self) -> u32 { self.rounds.load(Acquire) }

    /// How many pairs the agent has put on the table.
    #[must_use]
    #[inline]
    pub fn published(&self) -> u32 { self.published.load(Relaxed) }

    /// Mark the session as over.  Returns `true` only for the call that did it.
    ///
    /// This doesn't wake anybody; see [`Backend::close`](crate::Backend::close).
    #[inline]
    pub fn close(&self) -> bool { !self.closed.swap(true, AcqRel) }

    /// Whether [`Self::close`] has been called, by any context.
    #[must_use]
    #[inline]
    pub fn is_closed(&self) -> bool { self.closed.load(Acquire) }
}

impl Default for TableState {
    #[inline]
    fn default() -> Self { Self::new() }
}


/// What a smoker picked up off the table.
#[must_use]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Taken([bool; ITEMS]);

impl Taken {
    /// The resources that were taken, in index order.
    #[inline]
    pub fn iter(self) -> impl Iterator<Item = ResourceType> {
        ResourceType::ALL.into_iter().filter(move |r| self.0[r.index()])
    }

    /// How many resources were taken.
    #[must_use]
    #[inline]
    pub fn count(self) -> usize { self.0.iter().filter(|&&t| t).count() }

    /// Whether exactly the two resources of `pair` were taken.
    #[must_use]
    #[inline]
    pub fn is(self, pair: Pair) -> bool {
        self.count() == 2 && pair.contains(ResourceType::Tobacco) == self.0[0]
            && pair.contains(ResourceType::Paper) == self.0[1]
            && pair.contains(ResourceType::Match) == self.0[2]
    }

    /// Whether this is exactly what the smoker that holds `holds` needs.
    #[must_use]
    #[inline]
    pub fn completes(self, holds: ResourceType) -> bool {
        self.count() == 2 && !self.0[holds.index()]
    }
}

impl Display for Taken {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut any = false;
        for r in self.iter() {
            if any {
                f.write_str(" and ")?;
            }
            Display::fmt(&r, f)?;
            any = true;
        }
        if !any {
            f.write_str("nothing")?;
        }
        Ok(())
    }
}
