use serde::{Deserialize, Serialize};

use crate::enzyme::MAX_PEPTIDE_LEN;
use crate::mass::{MassTable, Scaled, CO, H, NH3};
use crate::modification::ModSite;
use crate::spectrum::Peak;
use crate::Error;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    A,
    B,
    C,
    X,
    Y,
    Z,
}

impl Kind {
    /// A/B/C ions are built from the N-terminus
    pub fn is_forward(&self) -> bool {
        matches!(self, Kind::A | Kind::B | Kind::C)
    }

    /// Neutral mass added to the summed residues of the fragment
    fn offset(&self, table: &MassTable) -> Scaled {
        let water = table.water();
        match self {
            Kind::A => -table.scale(CO),
            Kind::B => 0,
            Kind::C => table.scale(NH3),
            Kind::X => water + table.scale(CO - 2.0 * H),
            Kind::Y => water,
            Kind::Z => water - table.scale(NH3 - H),
        }
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let c = match self {
            Kind::A => 'a',
            Kind::B => 'b',
            Kind::C => 'c',
            Kind::X => 'x',
            Kind::Y => 'y',
            Kind::Z => 'z',
        };
        write!(f, "{}", c)
    }
}

/// Theoretical fragment m/z values for one peptide, ion series, charge and
/// modification mask, with a hit counter per entry.
///
/// Buffers are allocated once and reused: [`Ladder::build`] overwrites the
/// entries and [`Ladder::clear_hits`] resets the counters between spectra.
#[derive(Clone, Debug)]
pub struct Ladder {
    pub kind: Kind,
    pub charge: u8,
    pub start: usize,
    pub end: usize,
    /// Ascending m/z, one entry per cleavable bond
    pub mz: Vec<Scaled>,
    hits: Vec<u16>,
    peaks: Vec<Option<Peak>>,
    deltas: Vec<Scaled>,
}

/// Per-position modification deltas of `start..end` for one mask
fn position_deltas(start: usize, end: usize, mask: u64, sites: &[ModSite], out: &mut Vec<Scaled>) {
    out.clear();
    out.resize(end - start, 0);
    for (bit, site) in sites.iter().enumerate().take(64) {
        if site.fixed || mask & (1 << bit) != 0 {
            if let Some(delta) = site
                .position
                .checked_sub(start)
                .and_then(|idx| out.get_mut(idx))
            {
                *delta += site.delta;
            }
        }
    }
}

#[inline]
fn to_mz(neutral: Scaled, charge: u8, proton: Scaled) -> Scaled {
    let z = charge as Scaled;
    let charged = neutral + z * proton;
    // round to nearest
    (charged + z / 2) / z
}

impl Ladder {
    pub fn new(kind: Kind, charge: u8) -> Self {
        Ladder {
            kind,
            charge,
            start: 0,
            end: 0,
            mz: Vec::with_capacity(MAX_PEPTIDE_LEN),
            hits: Vec::with_capacity(MAX_PEPTIDE_LEN),
            peaks: Vec::with_capacity(MAX_PEPTIDE_LEN),
            deltas: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.mz.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mz.is_empty()
    }

    fn reset(&mut self, start: usize, end: usize) {
        self.start = start;
        self.end = end;
        self.mz.clear();
        self.hits.clear();
        self.peaks.clear();
    }

    fn push(&mut self, neutral: Scaled, proton: Scaled) {
        self.mz.push(to_mz(neutral, self.charge, proton));
        self.hits.push(0);
        self.peaks.push(None);
    }

    /// Build the ladder for `protein[start..end]`. Fixed sites always
    /// contribute their delta, variable ones only where `mask` is set.
    ///
    /// Fails, leaving the ladder empty, when the peptide is empty or longer
    /// than [`MAX_PEPTIDE_LEN`]
    pub fn build(
        &mut self,
        protein: &[u8],
        start: usize,
        end: usize,
        table: &MassTable,
        mask: u64,
        sites: &[ModSite],
    ) -> Result<(), Error> {
        let mut deltas = std::mem::take(&mut self.deltas);
        let built = build_series(
            std::slice::from_mut(self),
            protein,
            start,
            end,
            table,
            mask,
            sites,
            &mut deltas,
        );
        self.deltas = deltas;
        built
    }

    /// Is there an entry within `[mz - tol, mz + tol]`?
    #[inline]
    pub fn contains(&self, mz: Scaled, tol: Scaled) -> bool {
        let idx = self.mz.partition_point(|&x| x < mz - tol);
        self.mz.get(idx).map(|&x| x <= mz + tol).unwrap_or(false)
    }

    /// Count a peak against entry `idx`
    #[inline]
    pub fn record(&mut self, idx: usize, peak: Peak) {
        self.hits[idx] = self.hits[idx].saturating_add(1);
        if self.peaks[idx].is_none() {
            self.peaks[idx] = Some(peak);
        }
    }

    /// Merge the hit counters of a same-shaped ladder (same peptide and
    /// series, other charge) into this one
    pub fn or(&mut self, other: &Ladder) {
        for (a, b) in self.hits.iter_mut().zip(other.hits.iter()) {
            *a |= *b;
        }
    }

    pub fn clear_hits(&mut self) {
        self.hits.fill(0);
        self.peaks.fill(None);
    }

    /// Number of entries matched at least once
    pub fn hit_count(&self) -> usize {
        self.hits.iter().filter(|&&h| h > 0).count()
    }

    pub fn hits(&self) -> &[u16] {
        &self.hits
    }

    /// Matched entries: (ion number, theoretical m/z, first peak matched)
    pub fn matches(&self) -> impl Iterator<Item = (usize, Scaled, Peak)> + '_ {
        self.mz
            .iter()
            .zip(self.peaks.iter())
            .enumerate()
            .filter_map(|(idx, (&mz, peak))| peak.map(|p| (idx + 1, mz, p)))
    }
}

/// Build every ladder in `ladders` (all of the same ion series, different
/// charges) from a single walk over the residues
#[allow(clippy::too_many_arguments)]
fn build_series(
    ladders: &mut [Ladder],
    protein: &[u8],
    start: usize,
    end: usize,
    table: &MassTable,
    mask: u64,
    sites: &[ModSite],
    deltas: &mut Vec<Scaled>,
) -> Result<(), Error> {
    for ladder in ladders.iter_mut() {
        ladder.reset(start, end);
    }
    let len = end.saturating_sub(start);
    if len == 0 || len > MAX_PEPTIDE_LEN || end > protein.len() {
        return Err(Error::LadderCapacity(len));
    }
    let kind = match ladders.first() {
        Some(ladder) => ladder.kind,
        None => return Ok(()),
    };

    position_deltas(start, end, mask, sites, deltas);
    let proton = table.proton();
    let residue = |idx: usize| table.residue(protein[start + idx]).unwrap_or(0) + deltas[idx];

    let mut neutral = kind.offset(table);
    if kind.is_forward() {
        for idx in 0..len - 1 {
            neutral += residue(idx);
            for ladder in ladders.iter_mut() {
                ladder.push(neutral, proton);
            }
        }
    } else {
        for idx in (1..len).rev() {
            neutral += residue(idx);
            for ladder in ladders.iter_mut() {
                ladder.push(neutral, proton);
            }
        }
    }
    Ok(())
}

/// The four ladders searched for one modified peptide: forward and
/// backward series at charges 1 and 2
#[derive(Clone, Debug)]
pub struct LadderSet {
    /// `[charge 1, charge 2]`
    pub forward: [Ladder; 2],
    pub backward: [Ladder; 2],
    deltas: Vec<Scaled>,
}

impl LadderSet {
    pub fn new(forward: Kind, backward: Kind) -> Self {
        LadderSet {
            forward: [Ladder::new(forward, 1), Ladder::new(forward, 2)],
            backward: [Ladder::new(backward, 1), Ladder::new(backward, 2)],
            deltas: Vec::with_capacity(MAX_PEPTIDE_LEN),
        }
    }

    pub fn build(
        &mut self,
        protein: &[u8],
        start: usize,
        end: usize,
        table: &MassTable,
        mask: u64,
        sites: &[ModSite],
    ) -> Result<(), Error> {
        build_series(
            &mut self.forward,
            protein,
            start,
            end,
            table,
            mask,
            sites,
            &mut self.deltas,
        )?;
        build_series(
            &mut self.backward,
            protein,
            start,
            end,
            table,
            mask,
            sites,
            &mut self.deltas,
        )
    }

    pub fn clear_hits(&mut self) {
        self.forward
            .iter_mut()
            .chain(self.backward.iter_mut())
            .for_each(Ladder::clear_hits);
    }

    /// Fold the charge 2 counters into the charge 1 ladders
    pub fn or(&mut self) {
        let [z1, z2] = &mut self.forward;
        z1.or(z2);
        let [z1, z2] = &mut self.backward;
        z1.or(z2);
    }

    /// Matched positions over both series, after [`LadderSet::or`]
    pub fn hit_count(&self) -> usize {
        self.forward[0].hit_count() + self.backward[0].hit_count()
    }

    /// Entries over the charge 1 ladders, i.e. `2 * (len - 1)`
    pub fn ions(&self) -> usize {
        self.forward[0].len() + self.backward[0].len()
    }

    pub fn ladders(&self) -> impl Iterator<Item = &Ladder> {
        self.forward.iter().chain(self.backward.iter())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mass::MassKind;

    fn table() -> MassTable {
        MassTable::new(MassKind::Monoisotopic, 100_000).unwrap()
    }

    fn check_within(ladder: &Ladder, table: &MassTable, expected_mz: &[f64]) {
        let observed = ladder
            .mz
            .iter()
            .map(|&mz| table.unscale(mz))
            .collect::<Vec<_>>();
        assert_eq!(expected_mz.len(), observed.len());
        assert!(
            expected_mz
                .iter()
                .zip(observed.iter())
                .all(|(a, b)| (a - b).abs() < 0.005),
            "{:?}",
            expected_mz
                .iter()
                .zip(observed.iter())
                .map(|(a, b)| a - b)
                .collect::<Vec<_>>()
        );
    }

    fn ladder(kind: Kind, charge: u8, sequence: &[u8], table: &MassTable) -> Ladder {
        let mut ladder = Ladder::new(kind, charge);
        ladder
            .build(sequence, 0, sequence.len(), table, 0, &[])
            .unwrap();
        ladder
    }

    #[test]
    fn abc_xyz() {
        let t = table();
        let peptide = b"PEPTIDE";
        let expected_a = vec![70.065, 199.108, 296.160, 397.208, 510.292, 625.32];
        let expected_b = vec![98.0600, 227.1026, 324.155, 425.2030, 538.287, 653.314];
        let expected_c = vec![115.086, 244.129, 341.182, 442.229, 555.314, 670.341];
        let mut expected_x = vec![729.294, 600.251, 503.198, 402.151, 289.066, 174.039];
        let mut expected_y = vec![703.314, 574.2719, 477.219, 376.171, 263.0874, 148.0604];
        expected_x.reverse();
        expected_y.reverse();
        let expected_z = expected_y
            .iter()
            .map(|y| y - 16.018724)
            .collect::<Vec<_>>();

        check_within(&ladder(Kind::A, 1, peptide, &t), &t, &expected_a);
        check_within(&ladder(Kind::B, 1, peptide, &t), &t, &expected_b);
        check_within(&ladder(Kind::C, 1, peptide, &t), &t, &expected_c);
        check_within(&ladder(Kind::X, 1, peptide, &t), &t, &expected_x);
        check_within(&ladder(Kind::Y, 1, peptide, &t), &t, &expected_y);
        check_within(&ladder(Kind::Z, 1, peptide, &t), &t, &expected_z);
    }

    #[test]
    fn doubly_charged() {
        let t = table();
        let peptide = b"PEPTIDE";
        let expected_b = [98.0600, 227.1026, 324.155, 425.2030, 538.287, 653.314]
            .iter()
            .map(|mz| (mz + 1.0072764) / 2.0)
            .collect::<Vec<_>>();
        check_within(&ladder(Kind::B, 2, peptide, &t), &t, &expected_b);

        let mut set = LadderSet::new(Kind::B, Kind::Y);
        set.build(peptide, 0, peptide.len(), &t, 0, &[]).unwrap();
        assert_eq!(set.forward[1].mz, ladder(Kind::B, 2, peptide, &t).mz);
        assert_eq!(set.backward[0].mz, ladder(Kind::Y, 1, peptide, &t).mz);
        assert_eq!(set.ions(), 12);
    }

    #[test]
    fn capacity() {
        let t = table();
        let mut l = ladder(Kind::B, 1, b"PEPTIDE", &t);
        assert!(matches!(
            l.build(b"PEPTIDE", 3, 3, &t, 0, &[]),
            Err(Error::LadderCapacity(0))
        ));
        assert!(l.is_empty());

        let long = vec![b'G'; MAX_PEPTIDE_LEN + 1];
        assert!(l.build(&long, 0, long.len(), &t, 0, &[]).is_err());
        assert!(l.build(&long, 1, long.len(), &t, 0, &[]).is_ok());
        assert_eq!(l.len(), MAX_PEPTIDE_LEN - 1);
    }

    #[test]
    fn variable_delta_monotonicity() {
        let t = table();
        let protein = b"KPEPTIDEK";
        let (start, end) = (1, 8);
        let site = |delta| ModSite {
            position: 4,
            modification: 0,
            delta,
            fixed: false,
        };

        for kind in [Kind::B, Kind::Y] {
            let mut base = Ladder::new(kind, 1);
            base.build(protein, start, end, &t, 0, &[site(1_000_000)]).unwrap();

            for delta in [1_000_000, 1_500_000, 8_000_000] {
                let mut modified = Ladder::new(kind, 1);
                let sites = [site(delta)];
                modified.build(protein, start, end, &t, 1, &sites).unwrap();

                for (idx, (a, b)) in base.mz.iter().zip(modified.mz.iter()).enumerate() {
                    // Residue covered by entry `idx`
                    let covers_site = match kind.is_forward() {
                        true => start + idx >= 4,
                        false => end - 1 - idx <= 4,
                    };
                    match covers_site {
                        true => assert_eq!(b - a, delta, "{} {}", kind, idx),
                        false => assert_eq!(a, b, "{} {}", kind, idx),
                    }
                }
            }
        }
    }

    #[test]
    fn fixed_sites_ignore_mask() {
        let t = table();
        let sites = [ModSite {
            position: 1,
            modification: 0,
            delta: t.scale(57.021464),
            fixed: true,
        }];
        let mut a = Ladder::new(Kind::B, 1);
        a.build(b"ACDEK", 0, 5, &t, 0, &sites).unwrap();
        let mut b = Ladder::new(Kind::B, 1);
        b.build(b"ACDEK", 0, 5, &t, 1, &sites).unwrap();
        assert_eq!(a.mz, b.mz);
        check_within(&a, &t, &[72.04439, 232.07504, 347.10198, 476.14457]);
    }

    #[test]
    fn hits_and_or() {
        let t = table();
        let mut set = LadderSet::new(Kind::B, Kind::Y);
        set.build(b"PEPTIDE", 0, 7, &t, 0, &[]).unwrap();
        let peak = Peak {
            mz: 0,
            intensity: 10,
            rank: 1,
        };
        set.forward[0].record(0, peak);
        set.forward[1].record(0, peak);
        set.forward[1].record(3, peak);
        set.backward[1].record(5, peak);
        set.or();
        assert_eq!(set.hit_count(), 3);
        assert_eq!(set.forward[1].matches().count(), 2);

        assert!(set.forward[0].contains(set.forward[0].mz[2] + 10, 10));
        assert!(!set.forward[0].contains(set.forward[0].mz[2] + 11, 10));

        set.clear_hits();
        assert_eq!(set.hit_count(), 0);
        assert_eq!(set.forward[0].len(), 6);
    }

    #[test]
    fn rebuild_reuses_buffers() {
        let t = table();
        let mut ladder = Ladder::new(Kind::Y, 1);
        ladder.build(b"PEPTIDEK", 0, 8, &t, 0, &[]).unwrap();
        let (mz, deltas) = (ladder.mz.as_ptr(), ladder.deltas.as_ptr());
        ladder.build(b"PEPTIDE", 0, 7, &t, 0, &[]).unwrap();
        assert_eq!(ladder.mz.as_ptr(), mz);
        assert_eq!(ladder.deltas.as_ptr(), deltas);
        assert_eq!(ladder.len(), 6);
    }
}
