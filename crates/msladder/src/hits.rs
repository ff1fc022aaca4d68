use serde::Serialize;

use crate::ion_series::Kind;
use crate::mass::Scaled;

/// A theoretical ion that matched an experimental peak
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MatchedIon {
    pub kind: Kind,
    pub charge: u8,
    /// 1-based position within the series
    pub number: usize,
    /// Theoretical m/z
    pub mz: Scaled,
    pub peak_mz: Scaled,
    pub intensity: u32,
    pub rank: u32,
}

/// A candidate match retained for a spectrum at one charge
#[derive(Clone, Debug, PartialEq)]
pub struct HitRecord {
    /// Index of the entry in the sequence source
    pub sequence: usize,
    pub start: usize,
    /// Exclusive
    pub end: usize,
    pub charge: u8,
    /// Matched ladder positions
    pub hits: usize,
    /// Theoretical neutral mass
    pub mass: Scaled,
    /// Neutral precursor mass of the spectrum at `charge`
    pub experimental: Scaled,
    pub missed_cleavages: u8,
    pub matches: Vec<MatchedIon>,
    /// Applied variable modifications: (absolute position, modification index)
    pub mods: Vec<(usize, usize)>,
}

impl HitRecord {
    fn same_peptide(&self, other: &HitRecord) -> bool {
        self.sequence == other.sequence
            && self.start == other.start
            && self.end == other.end
            && self.mass == other.mass
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    /// Matched positions whose peak is more intense than `threshold` times
    /// `max_intensity`. A position matched at both product charges counts once
    pub fn count_hits(&self, threshold: f64, max_intensity: u32) -> usize {
        let cut = threshold * max_intensity as f64;
        let mut positions = self
            .matches
            .iter()
            .filter(|ion| ion.intensity as f64 > cut)
            .map(|ion| (ion.kind, ion.number))
            .collect::<Vec<_>>();
        positions.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.is_forward().cmp(&b.0.is_forward())));
        positions.dedup();
        positions.len()
    }
}

/// Bounded list of the best records for one spectrum at one charge.
///
/// Below capacity every record with at least `min_hits` hits is kept. Once
/// full, a new record must beat the watermark (the lowest retained hit
/// count) and replaces the first record holding it.
#[derive(Clone, Debug)]
pub struct HitTracker {
    capacity: usize,
    min_hits: usize,
    records: Vec<HitRecord>,
    watermark: usize,
}

impl HitTracker {
    pub fn new(capacity: usize, min_hits: usize) -> Self {
        HitTracker {
            capacity,
            min_hits,
            records: Vec::with_capacity(capacity),
            watermark: min_hits.saturating_sub(1),
        }
    }

    pub fn watermark(&self) -> usize {
        self.watermark
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[HitRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<HitRecord> {
        self.records
    }

    /// Cheap check before building a record
    #[inline]
    pub fn would_accept(&self, hits: usize) -> bool {
        hits >= self.min_hits && (self.records.len() < self.capacity || hits > self.watermark)
    }

    fn recompute(&mut self) {
        self.watermark = match self.records.len() >= self.capacity {
            true => self
                .records
                .iter()
                .map(|r| r.hits)
                .min()
                .unwrap_or(self.min_hits.saturating_sub(1)),
            false => self.min_hits.saturating_sub(1),
        };
    }

    /// Returns `true` if the record was kept
    pub fn offer(&mut self, record: HitRecord) -> bool {
        if record.hits < self.min_hits || self.capacity == 0 {
            return false;
        }

        if let Some(existing) = self.records.iter_mut().find(|r| r.same_peptide(&record)) {
            if record.hits > existing.hits {
                *existing = record;
                self.recompute();
                return true;
            }
            return false;
        }

        if self.records.len() < self.capacity {
            self.records.push(record);
            self.recompute();
            return true;
        }

        if record.hits <= self.watermark {
            return false;
        }
        let watermark = self.watermark;
        if let Some(slot) = self.records.iter_mut().find(|r| r.hits == watermark) {
            *slot = record;
        }
        self.recompute();
        true
    }

    /// Offer every record of `other`
    pub fn merge(&mut self, other: HitTracker) {
        for record in other.records {
            self.offer(record);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use quickcheck_macros::quickcheck;

    fn record(sequence: usize, hits: usize) -> HitRecord {
        HitRecord {
            sequence,
            start: 0,
            end: 5,
            charge: 1,
            hits,
            mass: 500000,
            experimental: 500000,
            missed_cleavages: 0,
            matches: Vec::new(),
            mods: Vec::new(),
        }
    }

    #[test]
    fn eviction() {
        let mut tracker = HitTracker::new(3, 2);
        assert_eq!(tracker.watermark(), 1);
        assert!(!tracker.offer(record(0, 1)));
        assert!(tracker.offer(record(1, 4)));
        assert!(tracker.offer(record(2, 3)));
        assert!(tracker.offer(record(3, 3)));
        assert_eq!(tracker.watermark(), 3);

        assert!(!tracker.would_accept(3));
        assert!(!tracker.offer(record(4, 3)));
        assert!(tracker.would_accept(5));
        assert!(tracker.offer(record(5, 5)));

        // first minimum slot was replaced
        let ids = tracker.records().iter().map(|r| r.sequence).collect::<Vec<_>>();
        assert_eq!(ids, vec![1, 5, 3]);
        assert_eq!(tracker.watermark(), 3);
    }

    #[test]
    fn same_peptide_keeps_best() {
        let mut tracker = HitTracker::new(3, 2);
        assert!(tracker.offer(record(0, 3)));
        assert!(!tracker.offer(record(0, 3)));
        assert!(!tracker.offer(record(0, 2)));
        assert!(tracker.offer(record(0, 6)));
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.records()[0].hits, 6);

        let mut other = record(0, 6);
        other.mass += 15995;
        assert!(tracker.offer(other));
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn merge_trackers() {
        let mut a = HitTracker::new(2, 2);
        let mut b = HitTracker::new(2, 2);
        a.offer(record(0, 2));
        a.offer(record(1, 8));
        b.offer(record(2, 5));
        b.offer(record(3, 1));
        a.merge(b);
        let mut hits = a.records().iter().map(|r| r.hits).collect::<Vec<_>>();
        hits.sort_unstable();
        assert_eq!(hits, vec![5, 8]);
    }

    #[test]
    fn count_hits_dedups_charges() {
        let ion = |kind, charge, number, intensity| MatchedIon {
            kind,
            charge,
            number,
            mz: 0,
            peak_mz: 0,
            intensity,
            rank: 0,
        };
        let mut r = record(0, 3);
        r.matches = vec![
            ion(Kind::B, 1, 1, 100),
            ion(Kind::B, 2, 1, 50),
            ion(Kind::B, 1, 2, 10),
            ion(Kind::Y, 1, 1, 40),
        ];
        assert_eq!(r.count_hits(0.0, 100), 3);
        assert_eq!(r.count_hits(0.2, 100), 2);
        assert_eq!(r.count_hits(0.45, 100), 1);
        assert_eq!(r.count_hits(1.0, 100), 0);
    }

    #[quickcheck]
    fn capacity_and_watermark(offers: Vec<(u8, u8)>, capacity: u8, min_hits: u8) -> bool {
        let capacity = capacity as usize % 16;
        let min_hits = min_hits as usize % 4;
        let mut tracker = HitTracker::new(capacity, min_hits);
        for (id, hits) in offers {
            tracker.offer(record(id as usize % 8, hits as usize % 32));
            let ok = tracker.len() <= capacity
                && tracker
                    .records()
                    .iter()
                    .all(|r| r.hits >= tracker.watermark() && r.hits >= min_hits);
            if !ok {
                return false;
            }
        }
        true
    }
}
