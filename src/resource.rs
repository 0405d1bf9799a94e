//! The three resource types and the mapping from a published pair to the one eligible smoker.

use crate::ITEMS;
use core::fmt::{self, Display, Formatter};


/// One of the three things needed to roll a cigarette.
///
/// A smoker is identified by the resource type it holds, so this also names the smokers.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ResourceType {
    /// Index 0.
    Tobacco = 0,
    /// Index 1.
    Paper   = 1,
    /// Index 2.
    Match   = 2,
}

impl ResourceType {
    /// In index order.
    pub const ALL: [Self; ITEMS] = [Self::Tobacco, Self::Paper, Self::Match];

    /// The position of `self` in the table's presence flags and in the semaphore set.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        #[allow(clippy::as_conversions)]
        let i = self as u8;
        i as usize
    }

    /// The inverse of [`Self::index`].
    #[must_use]
    #[inline]
    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::Tobacco),
            1 => Some(Self::Paper),
            2 => Some(Self::Match),
            _ => None,
        }
    }

    /// Lower-case name, for progress lines.
    #[must_use]
    #[inline]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Tobacco => "tobacco",
            Self::Paper => "paper",
            Self::Match => "match",
        }
    }
}

impl Display for ResourceType {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result { f.write_str(self.name()) }
}


/// The index of the smoker that can proceed when the resources at indices `a` and `b` are on the
/// table: the index of the resource type that was *not* chosen.
///
/// This relies on the three indices summing to `0 + 1 + 2 == 3`.  It must never be called with
/// `a == b` (nor with an index outside `0 .. 3`), which [`Pair`] makes unrepresentable.
#[must_use]
#[inline]
pub const fn eligible_index(a: usize, b: usize) -> usize {
    debug_assert!(a != b && a < ITEMS && b < ITEMS, "indices must be distinct resources");
    ITEMS - a - b
}


/// Two distinct resource types that the agent places on the table together.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Pair {
    first:  ResourceType,
    second: ResourceType,
}

impl Pair {
    /// `None` if `first == second`, which is never a valid publication.
    #[must_use]
    #[inline]
    pub const fn new(first: ResourceType, second: ResourceType) -> Option<Self> {
        if first.index() == second.index() {
            None
        } else {
            Some(Self { first, second })
        }
    }

    /// Sampling without replacement: the second resource is `first` offset by one or two
    /// positions, so it can't equal the first.  Only the low bit of `offset` is used.
    #[must_use]
    #[inline]
    pub const fn from_draw(first: ResourceType, offset: u8) -> Self {
        let step = 1 + (offset % 2) as usize;
        let second = (first.index() + step) % ITEMS;
        match ResourceType::from_index(second) {
            Some(second) => Self { first, second },
            #[allow(clippy::unreachable)]
            None => unreachable!(), // Note: modulo `ITEMS` is always in range.
        }
    }

    /// The resource placed first.
    #[must_use]
    #[inline]
    pub const fn first(self) -> ResourceType { self.first }

    /// The resource placed second.
    #[must_use]
    #[inline]
    pub const fn second(self) -> ResourceType { self.second }

    /// Whether `resource` is one of the two.
    #[must_use]
    #[inline]
    pub const fn contains(self, resource: ResourceType) -> bool {
        self.first.index() == resource.index() || self.second.index() == resource.index()
    }

    /// The resource type that is absent, i.e. the smoker holding it, the only one able to
    /// proceed.
    #[must_use]
    #[inline]
    pub const fn eligible(self) -> ResourceType {
        match ResourceType::from_index(eligible_index(self.first.index(), self.second.index())) {
            Some(smoker) => smoker,
            #[allow(clippy::unreachable)]
            None => unreachable!(), // Note: the pair is distinct by construction.
        }
    }
}

impl Display for Pair {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} and {}", self.first, self.second)
    }
}
