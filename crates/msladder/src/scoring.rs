use serde::{Deserialize, Serialize};

use crate::hits::HitRecord;
use crate::mass::{MassTable, Scaled};
use crate::spectrum::SpectrumPeaks;
use crate::Error;

/// Reported in place of an e-value that is not finite
pub const HIGH_EVALUE: f64 = f64::MAX;

/// Top-hit normalisation stops once a term falls to this value...
pub const TOP_HIT_FLOOR: f64 = 1e-20;
/// ...or after this many terms
pub const TOP_HIT_MAX_ITER: usize = 1000;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreType {
    /// Plain Poisson tail probability
    Poisson,
    /// Poisson weighted by the chance of explaining one of the top peaks
    TopHit,
}

impl Default for ScoreType {
    fn default() -> Self {
        Self::Poisson
    }
}

/// `P(X < hits)` for `X ~ Poisson(mean)`, summing the terms iteratively
fn poisson_cdf_below(mean: f64, hits: usize) -> f64 {
    let mut term = (-mean).exp();
    let mut sum = term;
    for i in 1..hits {
        term *= mean / i as f64;
        sum += term;
    }
    sum
}

/// Raise a single-candidate tail probability to `n` independent candidates:
/// `1 - (1 - single)^n`, never returning exactly zero
fn over_candidates(single: f64, n: f64) -> f64 {
    let single = single.clamp(0.0, 1.0);
    let p = -(n * (-single).ln_1p()).exp_m1();
    p.max(f64::MIN_POSITIVE)
}

/// Probability that the best of `n` random candidates has `hits` or more
/// matches, `1 - CDF(hits - 1; mean)^n`
pub fn pvalue(mean: f64, hits: usize, n: f64) -> f64 {
    if hits == 0 {
        return 1.0;
    }
    over_candidates(1.0 - poisson_cdf_below(mean, hits), n)
}

/// Expected number of random candidates scoring this well
pub fn evalue(pvalue: f64, n: f64) -> f64 {
    pvalue * n
}

/// `Poisson(i; mean) * (1 - (1 - p_top)^i)`
pub fn top_hit_term(mean: f64, i: usize, p_top: f64) -> f64 {
    let mut poisson = (-mean).exp();
    for k in 1..=i {
        poisson *= mean / k as f64;
    }
    poisson * (1.0 - (1.0 - p_top).powi(i as i32))
}

/// `sum_{i >= 1} top_hit_term(mean, i, p_top)`, truncated
fn top_hit_normal(mean: f64, p_top: f64) -> f64 {
    let mut poisson = (-mean).exp();
    let mut sum = 0.0;
    for i in 1..=TOP_HIT_MAX_ITER {
        poisson *= mean / i as f64;
        let term = poisson * (1.0 - (1.0 - p_top).powi(i as i32));
        sum += term;
        // terms rise until the mode, only stop on the way down
        if term <= TOP_HIT_FLOOR && i as f64 > mean {
            break;
        }
    }
    sum
}

/// Top-hit weighted variant of [`pvalue`]
pub fn top_hit_pvalue(mean: f64, hits: usize, n: f64, p_top: f64) -> f64 {
    if hits == 0 {
        return 1.0;
    }
    let normal = top_hit_normal(mean, p_top);
    if normal.is_nan() || normal <= 0.0 {
        return 1.0;
    }
    let mut poisson = (-mean).exp();
    let mut below = 0.0;
    for i in 1..hits {
        poisson *= mean / i as f64;
        below += poisson * (1.0 - (1.0 - p_top).powi(i as i32));
    }
    over_candidates(1.0 - below / normal, n)
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct Score {
    pub evalue: f64,
    pub pvalue: f64,
    /// Intensity threshold at which the best e-value was found
    pub threshold: f64,
    pub mean: f64,
    pub hits: usize,
}

/// Turns a record's match counts into p- and e-values
#[derive(Clone, Debug, Serialize)]
pub struct ScoringModel {
    pub score_type: ScoreType,
    /// Product ion tolerance
    pub tolerance: Scaled,
    pub cut_lo: f64,
    pub cut_hi: f64,
    pub cut_inc: f64,
    /// Added to the candidate count, once per product charge considered
    pub pseudocount: usize,
    pub top_hits: usize,
}

impl ScoringModel {
    /// Expected number of random matches for a peptide of `len` residues and
    /// neutral `mass` against the peaks of `spectrum` at `charge`
    pub fn poisson_mean(
        &self,
        len: usize,
        mass: Scaled,
        spectrum: &SpectrumPeaks,
        charge: u8,
        threshold: f64,
        table: &MassTable,
    ) -> Result<f64, Error> {
        let hl = spectrum
            .high_low(mass, charge, threshold)
            .ok_or(Error::ScoringUndefined)?;
        if hl.n_peaks < 2 || hl.high <= hl.low || len < 2 {
            return Err(Error::ScoringUndefined);
        }
        let range = table.unscale(hl.high - hl.low);
        let ions = 2.0 * (len - 1) as f64;
        let density = hl.n_peaks as f64 / range;
        // inclusive integer window, so a zero tolerance still matches one unit
        let window = table.unscale(self.tolerance.saturating_mul(2).saturating_add(1));
        let mut mean = window * density * ions;
        if charge >= spectrum.consider_mult {
            mean *= 1.0 + (range / table.unscale(mass)).min(1.0);
        }
        Ok(mean)
    }

    /// Number of candidates a record competed against
    pub fn candidates(&self, examined: usize, charge: u8, consider_mult: u8) -> f64 {
        let factor = match charge >= consider_mult {
            true => charge as usize,
            false => 1,
        };
        (examined + factor * self.pseudocount) as f64
    }

    fn thresholds(&self) -> impl Iterator<Item = f64> {
        let (lo, hi, inc) = (self.cut_lo, self.cut_hi, self.cut_inc);
        let steps = match inc > 0.0 && hi > lo {
            true => ((hi - lo) / inc + 1e-9).floor() as usize,
            false => 0,
        };
        (0..=steps).map(move |step| lo + step as f64 * inc)
    }

    /// Sweep the intensity threshold and keep the lowest e-value.
    /// `None` when no threshold gives a usable mean.
    pub fn score(
        &self,
        record: &HitRecord,
        spectrum: &SpectrumPeaks,
        examined: usize,
        table: &MassTable,
    ) -> Option<Score> {
        let max_intensity = spectrum.max_intensity(spectrum.which(record.charge));
        let n = self.candidates(examined, record.charge, spectrum.consider_mult);

        let mut best: Option<Score> = None;
        for threshold in self.thresholds() {
            let mean = match self.poisson_mean(
                record.len(),
                record.mass,
                spectrum,
                record.charge,
                threshold,
                table,
            ) {
                Ok(mean) if mean.is_finite() && mean > 0.0 => mean,
                _ => continue,
            };
            let hits = record.count_hits(threshold, max_intensity);
            if (hits as f64) < mean {
                continue;
            }

            let pvalue = match self.score_type {
                ScoreType::Poisson => pvalue(mean, hits, n),
                ScoreType::TopHit => {
                    let n_peaks = spectrum
                        .high_low(record.mass, record.charge, threshold)
                        .map(|hl| hl.n_peaks)
                        .unwrap_or(0)
                        .max(1);
                    let p_top = (self.top_hits as f64 / n_peaks as f64).min(1.0);
                    top_hit_pvalue(mean, hits, n, p_top)
                }
            };
            let mut e = evalue(pvalue, n);
            if !e.is_finite() {
                e = HIGH_EVALUE;
            }
            if best.map(|b| e < b.evalue).unwrap_or(true) {
                best = Some(Score {
                    evalue: e,
                    pvalue,
                    threshold,
                    mean,
                    hits,
                });
            }
        }
        best
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mass::MassKind;
    use crate::spectrum::{ChargeSettings, CullSettings, RawSpectrum};
    use quickcheck_macros::quickcheck;

    #[test]
    fn pvalue_edges() {
        assert_eq!(pvalue(2.0, 0, 100.0), 1.0);
        // P(X >= 1) = 1 - e^-mean for a single candidate
        assert!((pvalue(2.0, 1, 1.0) - (1.0 - (-2.0f64).exp())).abs() < 1e-12);
        // clamped, never zero
        let p = pvalue(0.01, 200, 1.0);
        assert!(p > 0.0 && p < 1e-12);
        assert_eq!(over_candidates(0.0, 1000.0), f64::MIN_POSITIVE);
        assert_eq!(over_candidates(-1e-17, 1.0), f64::MIN_POSITIVE);
        assert_eq!(evalue(0.5, 10.0), 5.0);
    }

    #[test]
    fn pvalue_known() {
        // P(X >= 3; 1.0) = 1 - e^-1 (1 + 1 + 0.5)
        let single = 1.0 - (-1.0f64).exp() * 2.5;
        assert!((pvalue(1.0, 3, 1.0) - single).abs() < 1e-12);
        let n = 50.0;
        let expected = 1.0 - (1.0 - single).powf(n);
        assert!((pvalue(1.0, 3, n) - expected).abs() < 1e-12);
    }

    #[quickcheck]
    fn pvalue_monotonic(mean: u16, n: u16) -> bool {
        let mean = mean as f64 / 1000.0 + 0.001;
        let n = n as f64 + 1.0;
        (1..60).all(|h| pvalue(mean, h + 1, n) <= pvalue(mean, h, n))
    }

    #[test]
    fn top_hit_terminates() {
        for mean in [0.1, 1.0, 10.0, 100.0, 700.0] {
            for p_top in [0.0, 0.01, 0.5, 1.0] {
                let normal = top_hit_normal(mean, p_top);
                assert!(normal.is_finite());
                let p = top_hit_pvalue(mean, 3, 10.0, p_top);
                assert!(p > 0.0 && p <= 1.0, "{} {} {}", mean, p_top, p);
            }
        }
        // with every match on a top peak, the weight is 1 and the sum is 1 - e^-mean
        let normal = top_hit_normal(2.0, 1.0);
        assert!((normal - (1.0 - (-2.0f64).exp())).abs() < 1e-12);
        assert!((top_hit_term(2.0, 2, 1.0) - 2.0 * (-2.0f64).exp()).abs() < 1e-12);
        assert_eq!(top_hit_term(2.0, 2, 0.0), 0.0);
    }

    #[test]
    fn top_hit_monotonic() {
        let mut last = 1.0;
        for hits in 1..30 {
            let p = top_hit_pvalue(3.0, hits, 100.0, 0.2);
            assert!(p <= last);
            last = p;
        }
    }

    fn model() -> ScoringModel {
        ScoringModel {
            score_type: ScoreType::Poisson,
            tolerance: 500,
            cut_lo: 0.0,
            cut_hi: 0.2,
            cut_inc: 0.0005,
            pseudocount: 1,
            top_hits: 3,
        }
    }

    #[test]
    fn threshold_grid() {
        let thresholds = model().thresholds().collect::<Vec<_>>();
        assert_eq!(thresholds.len(), 401);
        assert!((thresholds[400] - 0.2).abs() < 1e-9);

        let mut single = model();
        single.cut_hi = 0.0;
        assert_eq!(single.thresholds().collect::<Vec<_>>(), vec![0.0]);
    }

    #[test]
    fn candidate_count() {
        let m = model();
        assert_eq!(m.candidates(10, 1, 3), 11.0);
        assert_eq!(m.candidates(10, 3, 3), 13.0);
    }

    #[test]
    fn mean_from_density() {
        let table = MassTable::new(MassKind::Monoisotopic, 1000).unwrap();
        let raw = RawSpectrum {
            id: 0,
            name: String::new(),
            precursor_mz: 1001.0,
            charge: Some(1),
            mz: (1..=11).map(|i| i as f64 * 80.0).collect(),
            intensity: vec![10.0; 11],
        };
        let cull = CullSettings {
            tolerance: 500,
            cut_lo: 0.0,
            single_window: 27000,
            single_num: 2,
            double_window: 14000,
            double_num: 2,
            top_hits: 3,
            min_peaks: 2,
        };
        let charge = ChargeSettings {
            min_charge: 1,
            max_charge: 3,
            consider_mult: 3,
            plus_one: 0.8,
            calculate_plus_one: true,
            use_spectrum_charge: true,
        };
        let spectrum = SpectrumPeaks::process(&raw, &table, &cull, &charge);
        assert!(spectrum.error.is_none());

        // 11 peaks over 800 Da, a 6 residue peptide has 10 ions
        let mean = model()
            .poisson_mean(6, 1_000_000, &spectrum, 1, 0.0, &table)
            .unwrap();
        let expected = 1.001 * (11.0 / 800.0) * 10.0;
        assert!((mean - expected).abs() < 1e-9, "{}", mean);

        let exact = ScoringModel {
            tolerance: 0,
            ..model()
        };
        let mean = exact
            .poisson_mean(6, 1_000_000, &spectrum, 1, 0.0, &table)
            .unwrap();
        assert!((mean - 0.001 * (11.0 / 800.0) * 10.0).abs() < 1e-12, "{}", mean);

        assert!(matches!(
            model().poisson_mean(6, 80_000, &spectrum, 1, 0.0, &table),
            Err(Error::ScoringUndefined)
        ));
    }
}
