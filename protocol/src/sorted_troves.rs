//! Sorted list of active troves ordered by nominal ICR.
//!
//! Ascending order: the head is the worst-collateralized trove (lowest
//! NICR) and the tail the best. Equal NICRs are ordered by insertion
//! sequence, earlier insertions nearer the head, so every pair of entries
//! compares strictly.
//!
//! Nodes live in a map keyed by owner and carry their own `prev`/`next`
//! links, so removal is O(1) and insertion costs the distance between the
//! supplied hint and the real position. Hints are only a starting point:
//! stale or missing hints are discarded and the walk restarts from whatever
//! survives (or from the head), bounded by `max_steps` links.

use odra::prelude::*;
use odra::casper_types::U256;
use std::collections::BTreeMap;
use crate::errors::{CdpError, CdpResult};

/// Entry in the sorted trove list
#[odra::odra_type]
pub struct SortedTroveEntry {
    /// Trove owner
    pub owner: Address,
    /// Nominal ICR used for ordering
    pub nicr: U256,
    /// Insertion sequence number (tie-break)
    pub seq: u64,
    /// Neighbour with the next lower rank
    pub prev: Option<Address>,
    /// Neighbour with the next higher rank
    pub next: Option<Address>,
}

impl SortedTroveEntry {
    fn key(&self) -> RankKey {
        (self.nicr, self.seq)
    }
}

type RankKey = (U256, u64);

/// Insert position as `(prev, next)` neighbours
pub type InsertPosition = (Option<Address>, Option<Address>);

#[derive(Debug, Clone)]
pub struct SortedTroves {
    entries: BTreeMap<Address, SortedTroveEntry>,
    head: Option<Address>,
    tail: Option<Address>,
    next_seq: u64,
    max_steps: u32,
}

impl SortedTroves {
    pub fn new(max_steps: u32) -> Self {
        Self {
            entries: BTreeMap::new(),
            head: None,
            tail: None,
            next_seq: 0,
            max_steps,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, owner: &Address) -> bool {
        self.entries.contains_key(owner)
    }

    /// Worst-ranked trove (lowest NICR)
    pub fn head(&self) -> Option<Address> {
        self.head
    }

    /// Best-ranked trove (highest NICR)
    pub fn tail(&self) -> Option<Address> {
        self.tail
    }

    /// Next trove towards the tail
    pub fn next(&self, owner: &Address) -> Option<Address> {
        self.entries.get(owner).and_then(|e| e.next)
    }

    /// Next trove towards the head
    pub fn prev(&self, owner: &Address) -> Option<Address> {
        self.entries.get(owner).and_then(|e| e.prev)
    }

    pub fn nicr_of(&self, owner: &Address) -> Option<U256> {
        self.entries.get(owner).map(|e| e.nicr)
    }

    pub fn entry(&self, owner: &Address) -> Option<&SortedTroveEntry> {
        self.entries.get(owner)
    }

    pub fn max_steps(&self) -> u32 {
        self.max_steps
    }

    /// Iterate `(owner, nicr)` from head to tail
    pub fn iter(&self) -> SortedIter<'_> {
        SortedIter { list: self, cursor: self.head }
    }

    /// Insert `owner` with rank `nicr`, starting the search at the hints
    pub fn insert(
        &mut self,
        owner: Address,
        nicr: U256,
        prev_hint: Option<Address>,
        next_hint: Option<Address>,
    ) -> CdpResult<()> {
        if self.contains(&owner) {
            return Err(CdpError::DuplicateNode);
        }
        if nicr.is_zero() {
            return Err(CdpError::InvalidRank);
        }

        let seq = self.next_seq;
        let (prev, next) = self.locate((nicr, seq), prev_hint, next_hint)?;

        self.link(SortedTroveEntry { owner, nicr, seq, prev, next });
        self.next_seq += 1;
        Ok(())
    }

    /// Unlink `owner` and return its entry
    pub fn remove(&mut self, owner: &Address) -> CdpResult<SortedTroveEntry> {
        let entry = self.entries.remove(owner).ok_or(CdpError::NodeNotFound)?;

        match entry.prev {
            Some(prev) => self.set_next(&prev, entry.next),
            None => self.head = entry.next,
        }
        match entry.next {
            Some(next) => self.set_prev(&next, entry.prev),
            None => self.tail = entry.prev,
        }
        Ok(entry)
    }

    /// Move `owner` to the position for `nicr`.
    ///
    /// If no position can be found from the hints the entry is put back
    /// where it was and the error is returned.
    pub fn reinsert(
        &mut self,
        owner: Address,
        nicr: U256,
        prev_hint: Option<Address>,
        next_hint: Option<Address>,
    ) -> CdpResult<()> {
        if nicr.is_zero() {
            return Err(CdpError::InvalidRank);
        }
        let old = self.remove(&owner)?;
        if let Err(err) = self.insert(owner, nicr, prev_hint, next_hint) {
            // prev/next of `old` are still adjacent: nothing else moved
            self.link(old);
            return Err(err);
        }
        Ok(())
    }

    /// Exact `(prev, next)` neighbours for a new entry ranked `nicr`.
    ///
    /// Read-only; the second phase of the approximate-then-exact hint
    /// protocol.
    pub fn find_insert_position(
        &self,
        nicr: U256,
        prev_hint: Option<Address>,
        next_hint: Option<Address>,
    ) -> CdpResult<InsertPosition> {
        self.locate((nicr, self.next_seq), prev_hint, next_hint)
    }

    /// Whether `(prev, next)` brackets `nicr` for a new insertion
    pub fn is_valid_insert_position(
        &self,
        nicr: U256,
        prev: Option<Address>,
        next: Option<Address>,
    ) -> bool {
        self.brackets((nicr, self.next_seq), prev, next)
    }

    /// Walks the whole list checking links and strict ordering
    pub fn is_sorted(&self) -> bool {
        let mut count = 0usize;
        let mut last: Option<&SortedTroveEntry> = None;
        let mut cursor = self.head;
        while let Some(owner) = cursor {
            let entry = match self.entries.get(&owner) {
                Some(e) => e,
                None => return false,
            };
            if entry.prev != last.map(|l| l.owner) {
                return false;
            }
            if let Some(previous) = last {
                if previous.key() >= entry.key() {
                    return false;
                }
            }
            count += 1;
            last = Some(entry);
            cursor = entry.next;
        }
        last.map(|l| l.owner) == self.tail && count == self.entries.len()
    }

    fn key_of(&self, owner: &Address) -> CdpResult<RankKey> {
        self.entries
            .get(owner)
            .map(SortedTroveEntry::key)
            .ok_or(CdpError::NodeNotFound)
    }

    fn locate(
        &self,
        key: RankKey,
        prev_hint: Option<Address>,
        next_hint: Option<Address>,
    ) -> CdpResult<InsertPosition> {
        // Drop hints that are gone or sit on the wrong side of `key`
        let prev = prev_hint.filter(|p| self.entries.get(p).map_or(false, |e| e.key() < key));
        let next = next_hint.filter(|n| self.entries.get(n).map_or(false, |e| e.key() > key));

        if self.brackets(key, prev, next) {
            return Ok((prev, next));
        }

        match (prev, next) {
            (Some(p), _) => self.walk_forward(key, p),
            (None, Some(n)) => self.walk_backward(key, n),
            (None, None) => match self.head {
                None => Ok((None, None)),
                Some(head) if self.key_of(&head)? > key => Ok((None, Some(head))),
                Some(head) => {
                    tracing::debug!("no usable insert hint, walking from head");
                    self.walk_forward(key, head)
                }
            },
        }
    }

    fn brackets(&self, key: RankKey, prev: Option<Address>, next: Option<Address>) -> bool {
        match (prev, next) {
            (None, None) => self.is_empty(),
            (None, Some(n)) => {
                self.head == Some(n) && self.entries.get(&n).map_or(false, |e| key < e.key())
            }
            (Some(p), None) => {
                self.tail == Some(p) && self.entries.get(&p).map_or(false, |e| e.key() < key)
            }
            (Some(p), Some(n)) => match (self.entries.get(&p), self.entries.get(&n)) {
                (Some(pe), Some(ne)) => pe.next == Some(n) && pe.key() < key && key < ne.key(),
                _ => false,
            },
        }
    }

    /// Walk towards the tail from `start` (ranked below `key`)
    fn walk_forward(&self, key: RankKey, start: Address) -> CdpResult<InsertPosition> {
        let mut current = start;
        for _ in 0..=self.max_steps {
            let following = self.entries.get(&current).ok_or(CdpError::NodeNotFound)?.next;
            match following {
                None => return Ok((Some(current), None)),
                Some(n) if self.key_of(&n)? > key => return Ok((Some(current), Some(n))),
                Some(n) => current = n,
            }
        }
        tracing::debug!(max_steps = self.max_steps, "insert hint walk exhausted");
        Err(CdpError::InvalidHint)
    }

    /// Walk towards the head from `start` (ranked above `key`)
    fn walk_backward(&self, key: RankKey, start: Address) -> CdpResult<InsertPosition> {
        let mut current = start;
        for _ in 0..=self.max_steps {
            let preceding = self.entries.get(&current).ok_or(CdpError::NodeNotFound)?.prev;
            match preceding {
                None => return Ok((None, Some(current))),
                Some(p) if self.key_of(&p)? < key => return Ok((Some(p), Some(current))),
                Some(p) => current = p,
            }
        }
        tracing::debug!(max_steps = self.max_steps, "insert hint walk exhausted");
        Err(CdpError::InvalidHint)
    }

    fn link(&mut self, entry: SortedTroveEntry) {
        let owner = entry.owner;
        match entry.prev {
            Some(prev) => self.set_next(&prev, Some(owner)),
            None => self.head = Some(owner),
        }
        match entry.next {
            Some(next) => self.set_prev(&next, Some(owner)),
            None => self.tail = Some(owner),
        }
        self.entries.insert(owner, entry);
    }

    fn set_next(&mut self, owner: &Address, next: Option<Address>) {
        if let Some(entry) = self.entries.get_mut(owner) {
            entry.next = next;
        }
    }

    fn set_prev(&mut self, owner: &Address, prev: Option<Address>) {
        if let Some(entry) = self.entries.get_mut(owner) {
            entry.prev = prev;
        }
    }
}

/// Head-to-tail iterator over `(owner, nicr)`
pub struct SortedIter<'a> {
    list: &'a SortedTroves,
    cursor: Option<Address>,
}

impl<'a> Iterator for SortedIter<'a> {
    type Item = (Address, U256);

    fn next(&mut self) -> Option<Self::Item> {
        let owner = self.cursor?;
        let entry = self.list.entries.get(&owner)?;
        self.cursor = entry.next;
        Some((owner, entry.nicr))
    }
}
