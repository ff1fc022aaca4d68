use serde::{Deserialize, Serialize};

use crate::ion_series::Ladder;
use crate::mass::{MassTable, Scaled, PROTON};
use crate::Error;

/// Highest precursor charge that will ever be searched
pub const MAX_CHARGE: u8 = 10;

/// An already-parsed spectrum, as handed over by a file reader
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RawSpectrum {
    pub id: usize,
    /// Free text, passed through to the report unexamined
    pub name: String,
    /// Precursor m/z in Da
    pub precursor_mz: f64,
    /// Charge reported by the instrument, if any
    pub charge: Option<u8>,
    pub mz: Vec<f64>,
    pub intensity: Vec<f32>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Peak {
    pub mz: Scaled,
    pub intensity: u32,
    /// Intensity rank within its list, 1 = most intense. 0 until ranked
    pub rank: u32,
}

/// The four peak lists held by every spectrum
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PeakList {
    Original = 0,
    /// Culled for singly charged product ions
    Culled1 = 1,
    /// Culled allowing multiply charged product ions
    Culled2 = 2,
    /// Most intense peaks of the list used for the highest charge
    TopHits = 3,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeState {
    /// Configured range searched without attempting to detect +1
    Unknown,
    /// Detected as singly charged
    Plus1,
    /// Not +1, configured range searched
    NotPlus1,
    /// Taken from the spectrum
    Supplied,
}

#[derive(Clone, Debug, Serialize)]
pub struct CullSettings {
    /// Product ion tolerance
    pub tolerance: Scaled,
    /// Baseline: keep peaks above this fraction of the most intense peak
    pub cut_lo: f64,
    pub single_window: Scaled,
    pub single_num: usize,
    pub double_window: Scaled,
    pub double_num: usize,
    pub top_hits: usize,
    pub min_peaks: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct ChargeSettings {
    pub min_charge: u8,
    pub max_charge: u8,
    /// Precursor charge from which multiply charged products are considered
    pub consider_mult: u8,
    /// Fraction of peaks below the precursor above which a spectrum is +1
    pub plus_one: f64,
    pub calculate_plus_one: bool,
    pub use_spectrum_charge: bool,
}

/// Per-worker "used" flags for one peak list. Spectra are shared read-only
/// between workers, so the bitmap lives with whoever is comparing.
#[derive(Default, Debug)]
pub struct UsedPeaks {
    flags: Vec<bool>,
}

impl UsedPeaks {
    /// Reset for a list of `len` peaks. Must be called before every
    /// independent comparison pass
    pub fn clear(&mut self, len: usize) {
        self.flags.clear();
        self.flags.resize(len, false);
    }
}

/// Lowest/highest peak at or below a precursor mass, see [`SpectrumPeaks::high_low`]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HighLow {
    pub high: Scaled,
    pub low: Scaled,
    pub n_peaks: usize,
    /// Peaks below half the precursor mass
    pub n_lo: usize,
    pub n_hi: usize,
}

pub struct SpectrumPeaks {
    pub id: usize,
    pub name: String,
    pub precursor_mz: Scaled,
    pub spectrum_charge: Option<u8>,
    pub charges: Vec<u8>,
    pub charge_state: ChargeState,
    /// Product ion tolerance
    pub tolerance: Scaled,
    pub consider_mult: u8,
    /// Set when the spectrum cannot be searched; it is then skipped by the
    /// index but still reported
    pub error: Option<Error>,
    lists: [Vec<Peak>; 4],
}

/// Assign ranks over a list sorted by intensity, most intense first
pub fn rank(peaks: &mut [Peak]) {
    for (idx, peak) in peaks.iter_mut().enumerate() {
        peak.rank = idx as u32 + 1;
    }
}

fn sort_by_intensity(peaks: &mut [Peak]) {
    // stable: ties keep ascending m/z
    peaks.sort_by(|a, b| b.intensity.cmp(&a.intensity));
}

/// Keep the intensity-sorted prefix above `cut` times the most intense peak
pub fn cull_baseline(peaks: &mut Vec<Peak>, cut: f64) {
    let max = match peaks.first() {
        Some(peak) => peak.intensity as f64,
        None => return,
    };
    let keep = peaks
        .iter()
        .take_while(|peak| peak.intensity as f64 > cut * max)
        .count();
    peaks.truncate(keep);
}

/// Starting from the most intense peak, delete every weaker peak in
/// `(mz - tol, mz + span + tol)`, keeping the monoisotopic member of a cluster
pub fn cull_isotopes(peaks: &mut Vec<Peak>, tol: Scaled, span: Scaled) {
    let mut deleted = vec![false; peaks.len()];
    for i in 0..peaks.len() {
        if deleted[i] {
            continue;
        }
        let mz = peaks[i].mz;
        for j in i + 1..peaks.len() {
            if !deleted[j] && peaks[j].mz < mz + span + tol && peaks[j].mz > mz - tol {
                deleted[j] = true;
            }
        }
    }
    let mut flags = deleted.into_iter();
    peaks.retain(|_| !flags.next().unwrap_or(false));
}

impl SpectrumPeaks {
    /// Copy a raw spectrum into the original list, sorted by m/z. Any
    /// problem with the precursor is stored as the spectrum's error.
    pub fn load(raw: &RawSpectrum, table: &MassTable, tolerance: Scaled) -> Self {
        let mut original = raw
            .mz
            .iter()
            .zip(raw.intensity.iter())
            .filter(|(mz, _)| mz.is_finite() && **mz > 0.0)
            .map(|(&mz, &intensity)| Peak {
                mz: table.scale(mz),
                intensity: intensity.max(0.0).round() as u32,
                rank: 0,
            })
            .collect::<Vec<_>>();
        original.sort_by_key(|peak| peak.mz);

        let error = match raw.precursor_mz.is_finite() && raw.precursor_mz > 0.0 {
            true if raw.charge != Some(0) => None,
            _ => Some(Error::InvalidPrecursor),
        };

        SpectrumPeaks {
            id: raw.id,
            name: raw.name.clone(),
            precursor_mz: table.scale(raw.precursor_mz),
            spectrum_charge: raw.charge,
            charges: Vec::new(),
            charge_state: ChargeState::Unknown,
            tolerance,
            consider_mult: MAX_CHARGE,
            error,
            lists: [original, Vec::new(), Vec::new(), Vec::new()],
        }
    }

    /// Load, determine charge and cull in one go
    pub fn process(
        raw: &RawSpectrum,
        table: &MassTable,
        cull: &CullSettings,
        charge: &ChargeSettings,
    ) -> Self {
        let mut spectrum = Self::load(raw, table, cull.tolerance);
        if spectrum.error.is_none() {
            spectrum.determine_charge(charge);
            spectrum.cull_all(cull, table);
        }
        if let Some(err) = &spectrum.error {
            log::debug!("spectrum {} ({}): {}", spectrum.id, spectrum.name, err);
        }
        spectrum
    }

    pub fn peaks(&self, list: PeakList) -> &[Peak] {
        &self.lists[list as usize]
    }

    pub fn is_searchable(&self) -> bool {
        self.error.is_none() && !self.charges.is_empty()
    }

    /// Neutral precursor mass assuming charge `z`, `None` when it does not
    /// fit a [`Scaled`]
    pub fn checked_neutral_mass(&self, z: u8, table: &MassTable) -> Option<Scaled> {
        let mass = self.precursor_mz as i64 * z as i64 - table.scale(z as f64 * PROTON) as i64;
        Scaled::try_from(mass).ok()
    }

    /// Neutral precursor mass assuming charge `z`. Saturates for charges
    /// [`SpectrumPeaks::cull_all`] has not vetted.
    pub fn neutral_mass(&self, z: u8, table: &MassTable) -> Scaled {
        self.checked_neutral_mass(z, table).unwrap_or(Scaled::MAX)
    }

    /// Culled list used for precursor charge `charge`
    pub fn which(&self, charge: u8) -> PeakList {
        match charge < self.consider_mult {
            true => PeakList::Culled1,
            false => PeakList::Culled2,
        }
    }

    pub fn max_intensity(&self, list: PeakList) -> u32 {
        self.peaks(list)
            .iter()
            .map(|peak| peak.intensity)
            .max()
            .unwrap_or(0)
    }

    /// Number of original peaks at or below the +1 precursor (plus one peak),
    /// capped at the peak count
    fn percent_below(&self) -> usize {
        let original = self.peaks(PeakList::Original);
        let limit = self.precursor_mz.saturating_add(self.tolerance / 2);
        let below = original.partition_point(|peak| peak.mz <= limit);
        (below + 1).min(original.len())
    }

    pub fn determine_charge(&mut self, settings: &ChargeSettings) {
        let max = settings.max_charge.clamp(1, MAX_CHARGE);
        let min = settings.min_charge.clamp(1, max);
        self.consider_mult = settings.consider_mult.min(MAX_CHARGE);

        if settings.use_spectrum_charge {
            if let Some(z) = self.spectrum_charge.filter(|&z| z > 0) {
                self.charges = vec![z.min(MAX_CHARGE)];
                self.charge_state = ChargeState::Supplied;
                return;
            }
        }

        let n = self.peaks(PeakList::Original).len();
        if settings.calculate_plus_one {
            if min <= 1 && n > 0 && self.percent_below() as f64 / n as f64 > settings.plus_one {
                self.charges = vec![1];
                self.charge_state = ChargeState::Plus1;
                return;
            }
            self.charge_state = ChargeState::NotPlus1;
        } else {
            self.charge_state = ChargeState::Unknown;
        }
        self.charges = (min..=max).collect();
    }

    /// Build the culled lists and the top hit list. Requires charges to have
    /// been determined. A precursor whose neutral mass overflows at any
    /// candidate charge is marked invalid.
    pub fn cull_all(&mut self, settings: &CullSettings, table: &MassTable) {
        let (min, max) = match (self.charges.first(), self.charges.last()) {
            (Some(&min), Some(&max)) => (min, max),
            _ => {
                self.error = Some(Error::InvalidPrecursor);
                return;
            }
        };
        if self
            .charges
            .iter()
            .any(|&z| self.checked_neutral_mass(z, table).is_none())
        {
            log::warn!(
                "spectrum {} ({}): precursor mass out of range",
                self.id,
                self.name
            );
            self.error = Some(Error::InvalidPrecursor);
            return;
        }

        if min < self.consider_mult {
            self.lists[PeakList::Culled1 as usize] = self.cull(settings, table, false);
        }
        if max >= self.consider_mult {
            self.lists[PeakList::Culled2 as usize] = self.cull(settings, table, true);
        }

        let mut top = self.peaks(self.which(max)).to_vec();
        sort_by_intensity(&mut top);
        top.truncate(settings.top_hits);
        top.sort_by_key(|peak| peak.mz);
        self.lists[PeakList::TopHits as usize] = top;

        let found = self.peaks(self.which(min)).len();
        if found < settings.min_peaks {
            self.error = Some(Error::InsufficientPeaks {
                found,
                required: settings.min_peaks,
            });
        }
    }

    /// Produce a culled copy of the original list, ranked and sorted by m/z
    pub fn cull(
        &self,
        settings: &CullSettings,
        table: &MassTable,
        consider_mult: bool,
    ) -> Vec<Peak> {
        let tol = settings.tolerance;
        let mut temp = self.peaks(PeakList::Original).to_vec();
        sort_by_intensity(&mut temp);

        for &z in &self.charges {
            let precursor = self.neutral_mass(z, table);
            temp.retain(|peak| {
                !(peak.mz > precursor.saturating_sub(tol) && peak.mz < precursor.saturating_add(tol))
            });
        }

        cull_baseline(&mut temp, settings.cut_lo);
        cull_isotopes(&mut temp, tol, table.scale(2.0));
        self.cull_windows(&mut temp, settings, table, consider_mult);

        rank(&mut temp);
        temp.sort_by_key(|peak| peak.mz);
        temp
    }

    /// Density limiting over an intensity-sorted list: around each retained
    /// peak at most a quota of weaker peaks survive inside the window.
    /// Peaks 1, 16, 17 or 18 Da below a retained peak are linked to it.
    fn cull_windows(
        &self,
        peaks: &mut Vec<Peak>,
        settings: &CullSettings,
        table: &MassTable,
        consider_mult: bool,
    ) {
        let tol = settings.tolerance;
        let offsets = [1.0, 16.0, 17.0, 18.0].map(|da| table.scale(da));
        let is_major = |big: Scaled, test: Scaled| {
            offsets
                .iter()
                .any(|&d| test < big - d + tol && test > big - d - tol)
        };

        let n = peaks.len();
        let mut deleted = vec![false; n];
        let mut linked = vec![false; n];

        for i in 0..n.saturating_sub(1) {
            if deleted[i] {
                continue;
            }
            let mz = peaks[i].mz;
            let (window, allowed) = match !consider_mult || mz > self.precursor_mz {
                true => (settings.single_window, settings.single_num),
                false => (settings.double_window, settings.double_num),
            };

            let mut count = 0;
            for j in i + 1..n {
                if deleted[j] {
                    continue;
                }
                let other = peaks[j].mz;
                if !(other < mz + window + tol && other > mz - window - tol) {
                    continue;
                }
                if is_major(mz, other) {
                    linked[j] = true;
                    continue;
                }
                if linked[j] {
                    count += 1;
                    if count <= allowed {
                        continue;
                    }
                }
                count += 1;
                if count <= allowed {
                    continue;
                }
                deleted[j] = true;
            }
        }

        let mut flags = deleted.into_iter();
        peaks.retain(|_| !flags.next().unwrap_or(false));
    }

    /// Linear scan for a peak within `[value - tol, value + tol]`
    pub fn contains(&self, value: Scaled, list: PeakList) -> bool {
        self.peaks(list)
            .iter()
            .any(|peak| peak.mz >= value - self.tolerance && peak.mz <= value + self.tolerance)
    }

    /// Binary search variant of [`SpectrumPeaks::contains`]
    #[inline]
    pub fn contains_fast(&self, value: Scaled, list: PeakList) -> bool {
        let peaks = self.peaks(list);
        let idx = peaks.partition_point(|peak| peak.mz < value - self.tolerance);
        peaks
            .get(idx)
            .map(|peak| peak.mz <= value + self.tolerance)
            .unwrap_or(false)
    }

    /// Merge walk of an ascending ladder against an ascending peak list.
    ///
    /// Every overlap is counted in the return value, but a peak increments
    /// a ladder entry's hit counter only the first time it is used, and the
    /// matched peak is recorded on that entry.
    pub fn compare_sorted(&self, ladder: &mut Ladder, list: PeakList, used: &mut UsedPeaks) -> usize {
        let peaks = self.peaks(list);
        if ladder.is_empty() || peaks.is_empty() {
            return 0;
        }
        if used.flags.len() < peaks.len() {
            used.flags.resize(peaks.len(), false);
        }

        let tol = self.tolerance;
        let (mut i, mut j) = (0, 0);
        let mut matched = 0;
        while i < ladder.len() && j < peaks.len() {
            let theoretical = ladder.mz[i];
            if peaks[j].mz < theoretical - tol {
                j += 1;
            } else if peaks[j].mz > theoretical + tol {
                i += 1;
            } else {
                if !used.flags[j] {
                    used.flags[j] = true;
                    ladder.record(i, peaks[j]);
                }
                matched += 1;
                i += 1;
                j += 1;
            }
        }
        matched
    }

    /// Does any of the most intense peaks land on the ladder?
    pub fn compare_top(&self, ladder: &Ladder) -> bool {
        self.peaks(PeakList::TopHits)
            .iter()
            .any(|peak| ladder.contains(peak.mz, self.tolerance))
    }

    /// Lowest and highest peak at or below `mass` in the list used for
    /// `charge`, considering only peaks above `threshold` times the most
    /// intense one
    pub fn high_low(&self, mass: Scaled, charge: u8, threshold: f64) -> Option<HighLow> {
        let list = self.which(charge);
        let peaks = self.peaks(list);
        if peaks.len() < 2 {
            return None;
        }
        let cut = threshold * self.max_intensity(list) as f64;

        let mut hl = HighLow {
            high: 0,
            low: mass,
            n_peaks: 0,
            n_lo: 0,
            n_hi: 0,
        };
        for peak in peaks
            .iter()
            .filter(|peak| peak.intensity as f64 > cut && peak.mz <= mass)
        {
            hl.high = hl.high.max(peak.mz);
            hl.low = hl.low.min(peak.mz);
            hl.n_peaks += 1;
            if (peak.mz as f64) < mass as f64 / 2.0 {
                hl.n_lo += 1;
            } else {
                hl.n_hi += 1;
            }
        }
        Some(hl)
    }
}
