use std::time::Instant;

use crate::source::Source;

/// Number of hash buckets in the source table. Real-time sessions rarely
/// exceed low hundreds of participants, so a small prime keeps the memory
/// footprint down at the cost of slightly longer chains.
pub(crate) const TABLE_SIZE: usize = 11;

/// Hash-indexed table of per-source state, chained per bucket with newest
/// entries at the head. Iteration order (bucket by bucket, chains newest
/// first) is part of the observable behavior: report-block composition and
/// teardown walk it.
#[derive(Debug)]
pub(crate) struct SourceTable {
    buckets: Vec<Vec<Source>>,
    len: usize,
}

fn hash(ssrc: u32) -> usize {
    (ssrc % TABLE_SIZE as u32) as usize
}

impl SourceTable {
    pub(crate) fn new() -> Self {
        SourceTable {
            buckets: (0..TABLE_SIZE).map(|_| Vec::new()).collect(),
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn contains(&self, ssrc: u32) -> bool {
        self.get(ssrc).is_some()
    }

    pub(crate) fn get(&self, ssrc: u32) -> Option<&Source> {
        self.buckets[hash(ssrc)].iter().find(|s| s.ssrc == ssrc)
    }

    pub(crate) fn get_mut(&mut self, ssrc: u32) -> Option<&mut Source> {
        self.buckets[hash(ssrc)]
            .iter_mut()
            .find(|s| s.ssrc == ssrc)
    }

    /// Insert a new source at the head of its chain. The caller must have
    /// checked the ssrc is not already present.
    pub(crate) fn insert(&mut self, source: Source) {
        debug_assert!(!self.contains(source.ssrc));
        self.buckets[hash(source.ssrc)].insert(0, source);
        self.len += 1;
        self.check();
    }

    /// Unlink and return a source. Removing an unknown ssrc is a caller
    /// bug, not a network condition, and fails loudly.
    pub(crate) fn remove(&mut self, ssrc: u32) -> Source {
        let chain = &mut self.buckets[hash(ssrc)];
        let pos = chain
            .iter()
            .position(|s| s.ssrc == ssrc)
            .unwrap_or_else(|| panic!("removing unknown source 0x{ssrc:08x}"));
        let source = chain.remove(pos);
        self.len -= 1;
        self.check();
        source
    }

    /// Stamp a source as just heard from.
    pub(crate) fn touch(&mut self, ssrc: u32, now: Instant) -> bool {
        match self.get_mut(ssrc) {
            Some(s) => {
                s.last_active = now;
                true
            }
            None => false,
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Source> {
        self.buckets.iter().flatten()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Source> {
        self.buckets.iter_mut().flatten()
    }

    /// Sanity check mirroring the tracked length against the chains.
    fn check(&self) {
        debug_assert_eq!(self.len, self.buckets.iter().map(Vec::len).sum::<usize>());
    }
}
