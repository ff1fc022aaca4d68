use std::cmp::Ordering;

use crate::mass::{MassTable, Scaled};
use crate::spectrum::SpectrumPeaks;

/// One precursor window: spectrum `spectrum` could be a peptide of neutral
/// mass `lo..=hi` at precursor charge `charge`
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub lo: Scaled,
    pub hi: Scaled,
    /// Index into the spectra the collection was built over
    pub spectrum: usize,
    pub charge: u8,
}

/// Precursor-mass interval index over all searchable spectra.
///
/// Borrows the spectra, so it cannot outlive them. Built once before the
/// scan and read-only afterwards.
pub struct PeakCollection<'s> {
    spectra: &'s [SpectrumPeaks],
    entries: Vec<Entry>,
    /// Widest `hi - lo` of any entry
    max_span: Scaled,
    max_mass: Scaled,
}

impl<'s> PeakCollection<'s> {
    /// Insert `[M - t, M + t]` for every searchable spectrum and each of its
    /// charges, where `M` is the neutral precursor mass at that charge and
    /// `t` is `tolerance`, multiplied by the charge when `scale_with_charge`
    pub fn new(
        spectra: &'s [SpectrumPeaks],
        tolerance: Scaled,
        scale_with_charge: bool,
        table: &MassTable,
    ) -> Self {
        let mut entries = spectra
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_searchable())
            .flat_map(|(idx, s)| {
                s.charges.iter().map(move |&charge| {
                    let mass = s.neutral_mass(charge, table);
                    let tol = match scale_with_charge {
                        true => tolerance.saturating_mul(charge as Scaled),
                        false => tolerance,
                    };
                    Entry {
                        lo: mass.saturating_sub(tol),
                        hi: mass.saturating_add(tol),
                        spectrum: idx,
                        charge,
                    }
                })
            })
            .collect::<Vec<_>>();
        entries.sort_by(|a, b| a.lo.cmp(&b.lo).then_with(|| a.spectrum.cmp(&b.spectrum)));

        let max_span = entries.iter().map(|e| e.hi.saturating_sub(e.lo)).max().unwrap_or(0);
        let max_mass = entries.iter().map(|e| e.hi).max().unwrap_or(0);

        log::trace!(
            "indexed {} precursor windows over {} spectra",
            entries.len(),
            spectra.len()
        );

        PeakCollection {
            spectra,
            entries,
            max_span,
            max_mass,
        }
    }

    /// Every window containing `mass`, bounds inclusive
    pub fn query(&self, mass: Scaled) -> impl Iterator<Item = &Entry> + '_ {
        let (left, right) = binary_search_slice(
            &self.entries,
            |entry, lo| entry.lo.cmp(lo),
            mass.saturating_sub(self.max_span),
            mass,
        );
        self.entries[left..right]
            .iter()
            .filter(move |entry| entry.lo <= mass && mass <= entry.hi)
    }

    /// Largest upper bound of any window. Nothing heavier can match
    pub fn max_mass(&self) -> Scaled {
        self.max_mass
    }

    pub fn spectra(&self) -> &'s [SpectrumPeaks] {
        self.spectra
    }

    pub fn spectrum(&self, entry: &Entry) -> &'s SpectrumPeaks {
        &self.spectra[entry.spectrum]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Return the widest `left` and `right` indices into a `slice` (sorted by the
/// function `key`) such that all values between `low` and `high` are
/// contained in `slice[left..right]`
///
/// # Invariants
///
/// * `slice[left] <= low || left == 0`
/// * `slice[right] <= high && (slice[right+1] > high || right == slice.len())`
/// * `0 <= left <= right <= slice.len()`
#[inline]
pub fn binary_search_slice<T, F, S>(slice: &[T], key: F, low: S, high: S) -> (usize, usize)
where
    F: Fn(&T, &S) -> Ordering,
{
    let left_idx = match slice.binary_search_by(|a| key(a, &low)) {
        Ok(idx) | Err(idx) => {
            let mut idx = idx.saturating_sub(1);
            while idx > 0 && key(&slice[idx], &low) != Ordering::Less {
                idx -= 1;
            }
            idx
        }
    };

    let right_idx = match slice[left_idx..].binary_search_by(|a| key(a, &high)) {
        Ok(idx) | Err(idx) => {
            let mut idx = idx + left_idx;
            while idx < slice.len() && key(&slice[idx], &high) != Ordering::Greater {
                idx = idx.saturating_add(1);
            }
            idx.min(slice.len())
        }
    };
    (left_idx, right_idx)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mass::MassKind;
    use crate::spectrum::{ChargeSettings, CullSettings, RawSpectrum};

    #[test]
    fn binary_search_slice_smoke() {
        // Make sure that our query returns the maximal set of indices
        let data = [10, 15, 20, 25, 30, 35, 40];
        let bounds = binary_search_slice(&data, |a: &i32, b| a.cmp(b), 17, 35);
        assert_eq!(bounds, (1, 6));
        assert!(data[bounds.0] <= 17);
        assert_eq!(&data[bounds.0..bounds.1], &[15, 20, 25, 30, 35]);

        let bounds = binary_search_slice(&data, |a: &i32, b| a.cmp(b), 0, 50);
        assert_eq!(bounds, (0, data.len()));
    }

    #[test]
    fn binary_search_slice_run() {
        let data = [10, 15, 15, 15, 15, 20, 25, 30, 30, 35, 40];
        let (left, right) = binary_search_slice(&data, |a: &i32, b| a.cmp(b), 15, 32);
        assert!(data[left] <= 15);
        assert!(data[right] > 32);
        assert_eq!(&data[left..right], &[10, 15, 15, 15, 15, 20, 25, 30, 30]);
    }

    fn spectra(table: &MassTable) -> Vec<SpectrumPeaks> {
        let cull = CullSettings {
            tolerance: 500,
            cut_lo: 0.0,
            single_window: 27000,
            single_num: 2,
            double_window: 14000,
            double_num: 2,
            top_hits: 3,
            min_peaks: 1,
        };
        let charge = ChargeSettings {
            min_charge: 1,
            max_charge: 3,
            consider_mult: 3,
            plus_one: 0.8,
            calculate_plus_one: true,
            use_spectrum_charge: true,
        };
        let raw = |id, precursor_mz, charge| RawSpectrum {
            id,
            name: format!("spectrum {}", id),
            precursor_mz,
            charge,
            mz: vec![100.0, 200.0, 300.0],
            intensity: vec![1.0, 2.0, 3.0],
        };
        vec![
            SpectrumPeaks::process(&raw(0, 501.0072764, Some(1)), table, &cull, &charge),
            SpectrumPeaks::process(&raw(1, 251.008, Some(2)), table, &cull, &charge),
            SpectrumPeaks::process(&raw(2, 0.0, Some(2)), table, &cull, &charge),
            // not +1 with all peaks above the precursor
            SpectrumPeaks::process(&raw(3, 51.0072764, None), table, &cull, &charge),
        ]
    }

    #[test]
    fn query_windows() {
        let table = MassTable::new(MassKind::Monoisotopic, 1000).unwrap();
        let spectra = spectra(&table);
        assert!(spectra[2].error.is_some());

        let collection = PeakCollection::new(&spectra, 2000, false, &table);
        // spectrum 2 is not indexed, spectrum 3 gets charges 1..=3
        assert_eq!(collection.len(), 5);
        assert_eq!(collection.max_mass(), 502001);

        let hits = collection.query(500000).collect::<Vec<_>>();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().any(|e| e.spectrum == 0 && e.charge == 1));
        assert!(hits.iter().any(|e| e.spectrum == 1 && e.charge == 2));

        // inclusive bounds
        assert_eq!(collection.query(498000).count(), 1);
        assert_eq!(collection.query(502000).count(), 2);
        assert_eq!(collection.query(502001).count(), 1);
        assert_eq!(collection.query(502002).count(), 0);
        assert_eq!(collection.query(100000).count(), 1);
        assert_eq!(
            collection.spectrum(collection.query(150000).next().unwrap()).id,
            3
        );

        let scaled = PeakCollection::new(&spectra, 2000, true, &table);
        assert_eq!(scaled.query(503500).count(), 1);
        assert_eq!(scaled.query(155999).count(), 1);
        assert_eq!(scaled.query(156000).count(), 0);
    }
}
