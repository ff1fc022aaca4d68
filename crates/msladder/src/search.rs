use std::fmt::Write;
use std::sync::atomic::{AtomicBool, Ordering};

use fnv::FnvHashMap;
use rayon::prelude::*;
use serde::Serialize;

use crate::collection::PeakCollection;
use crate::enzyme::{Candidate, Digester};
use crate::fasta::SequenceSource;
use crate::hits::{HitRecord, HitTracker, MatchedIon};
use crate::ion_series::LadderSet;
use crate::mass::{MassTable, Scaled};
use crate::modification::{combinations, MassAndMask, ModificationSet};
use crate::parameters::Parameters;
use crate::scoring::ScoringModel;
use crate::spectrum::{ChargeState, CullSettings, RawSpectrum, SpectrumPeaks, UsedPeaks};
use crate::Error;

/// Where a peptide occurs in the sequence source
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Location {
    pub sequence: usize,
    pub start: usize,
    /// Exclusive
    pub end: usize,
    pub header: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct ScoredHit {
    /// Residues with variable modifications written inline, e.g. `PEPM[+15.9949]K`
    pub peptide: String,
    pub sequence: String,
    /// Variable modifications: (0-based offset in the peptide, mass)
    pub mods: Vec<(usize, f32)>,
    pub evalue: f64,
    pub pvalue: f64,
    pub charge: u8,
    pub hits: usize,
    /// Intensity threshold that gave the best e-value
    pub threshold: f64,
    pub theoretical_mass: f64,
    pub experimental_mass: f64,
    pub missed_cleavages: u8,
    pub locations: Vec<Location>,
    pub matches: Vec<MatchedIon>,
}

#[derive(Clone, Debug, Serialize)]
pub struct SpectrumResult {
    pub id: usize,
    pub name: String,
    pub charge_state: ChargeState,
    pub charges: Vec<u8>,
    pub error_code: Option<u8>,
    pub error: Option<String>,
    /// Best first
    pub hits: Vec<ScoredHit>,
}

type Key = (usize, u8);

/// Everything one rayon worker mutates during the scan
struct Worker {
    ladders: LadderSet,
    used: UsedPeaks,
    combos: Vec<MassAndMask>,
    trackers: FnvHashMap<Key, HitTracker>,
    examined: FnvHashMap<Key, usize>,
    truncated: usize,
    peptides: usize,
}

impl Worker {
    fn reduce(mut self, other: Self) -> Self {
        for (key, tracker) in other.trackers {
            match self.trackers.get_mut(&key) {
                Some(existing) => existing.merge(tracker),
                None => {
                    self.trackers.insert(key, tracker);
                }
            }
        }
        for (key, n) in other.examined {
            *self.examined.entry(key).or_default() += n;
        }
        self.truncated += other.truncated;
        self.peptides += other.peptides;
        self
    }
}

pub struct SearchEngine {
    pub parameters: Parameters,
    precursor: MassTable,
    product: MassTable,
    mods: ModificationSet,
    digester: Digester,
    cull: CullSettings,
    scoring: ScoringModel,
}

impl SearchEngine {
    pub fn new(parameters: Parameters) -> Result<Self, Error> {
        let precursor = parameters.precursor_table()?;
        let product = parameters.product_table()?;
        let mods = ModificationSet::new(&parameters.static_mods, &parameters.variable_mods, &product);
        let digester = parameters.enzyme.build()?;
        let cull = parameters.cull_settings(&product);
        let scoring = parameters.scoring_model(&product);
        Ok(SearchEngine {
            parameters,
            precursor,
            product,
            mods,
            digester,
            cull,
            scoring,
        })
    }

    pub fn modifications(&self) -> &ModificationSet {
        &self.mods
    }

    /// Load, determine charge and cull every spectrum
    pub fn prepare(&self, raw: &[RawSpectrum]) -> Vec<SpectrumPeaks> {
        let spectra = raw
            .par_iter()
            .map(|r| SpectrumPeaks::process(r, &self.product, &self.cull, &self.parameters.charge))
            .collect::<Vec<_>>();
        let searchable = spectra.iter().filter(|s| s.is_searchable()).count();
        log::info!(
            "prepared {} spectra, {} searchable",
            spectra.len(),
            searchable
        );
        spectra
    }

    fn worker(&self) -> Worker {
        Worker {
            ladders: LadderSet::new(self.parameters.forward, self.parameters.backward),
            used: UsedPeaks::default(),
            combos: Vec::with_capacity(self.parameters.max_combinations),
            trackers: FnvHashMap::default(),
            examined: FnvHashMap::default(),
            truncated: 0,
            peptides: 0,
        }
    }

    fn accepts_taxonomy<S: SequenceSource>(&self, source: &S, idx: usize) -> bool {
        match &self.parameters.taxonomy {
            Some(allowed) => source
                .taxonomy(idx)
                .map(|t| allowed.contains(&t))
                .unwrap_or(false),
            None => true,
        }
    }

    /// Scan every entry of `source` against `spectra` and score what was
    /// retained. Spectra that failed preparation are reported with their
    /// error and no hits.
    pub fn search<S: SequenceSource>(
        &self,
        source: &S,
        spectra: &[SpectrumPeaks],
        cancel: &AtomicBool,
    ) -> Result<Vec<SpectrumResult>, Error> {
        let start = std::time::Instant::now();
        let collection = PeakCollection::new(
            spectra,
            self.precursor.scale(self.parameters.precursor_tol),
            self.parameters.scale_precursor_tol,
            &self.precursor,
        );

        let worker = (0..source.len())
            .into_par_iter()
            .fold(
                || self.worker(),
                |mut worker, idx| {
                    if cancel.load(Ordering::Relaxed) || !self.accepts_taxonomy(source, idx) {
                        return worker;
                    }
                    self.scan_entry(&mut worker, &collection, source.sequence(idx), idx);
                    worker
                },
            )
            .reduce(|| self.worker(), Worker::reduce);

        if cancel.load(Ordering::Relaxed) {
            return Err(Error::Cancelled);
        }
        if worker.truncated > 0 {
            log::warn!(
                "{} peptides: {}",
                worker.truncated,
                Error::CombinationOverflow {
                    limit: self.parameters.max_combinations
                }
            );
        }
        log::info!(
            "scanned {} peptides from {} sequences in {:?}",
            worker.peptides,
            source.len(),
            start.elapsed()
        );

        let results = spectra
            .par_iter()
            .enumerate()
            .map(|(idx, spectrum)| self.report(source, idx, spectrum, &worker))
            .collect::<Vec<_>>();
        log::info!(
            "{} of {} spectra have hits",
            results.iter().filter(|r| !r.hits.is_empty()).count(),
            results.len()
        );
        Ok(results)
    }

    fn scan_entry(
        &self,
        worker: &mut Worker,
        collection: &PeakCollection,
        protein: &[u8],
        sequence: usize,
    ) {
        let water = self.precursor.water();
        for candidate in self.digester.digest(protein, &self.mods, &self.precursor) {
            worker.peptides += 1;
            let truncated = combinations(
                &candidate.sites,
                candidate.mass + water,
                self.parameters.max_variable_mods,
                self.parameters.max_combinations,
                &mut worker.combos,
            );
            if truncated || candidate.truncated {
                worker.truncated += 1;
                log::debug!(
                    "{}: {}",
                    String::from_utf8_lossy(candidate.sequence(protein)),
                    Error::CombinationOverflow {
                        limit: self.parameters.max_combinations
                    }
                );
            }

            // masses are ascending, so an empty lookup for one mass means the
            // same mass can be skipped
            let mut empty: Option<Scaled> = None;
            let combos = std::mem::take(&mut worker.combos);
            for combo in &combos {
                if combo.mass > collection.max_mass() {
                    break;
                }
                if empty == Some(combo.mass) {
                    continue;
                }
                let found =
                    self.scan_combination(worker, collection, protein, sequence, &candidate, combo);
                empty = match found {
                    true => None,
                    false => Some(combo.mass),
                };
            }
            worker.combos = combos;
        }
    }

    /// Compare one modified form of `candidate` against every spectrum in
    /// range. Returns `false` if no spectrum was in range.
    fn scan_combination(
        &self,
        worker: &mut Worker,
        collection: &PeakCollection,
        protein: &[u8],
        sequence: usize,
        candidate: &Candidate,
        combo: &MassAndMask,
    ) -> bool {
        let mut built = false;
        let mut found = false;
        for entry in collection.query(combo.mass) {
            found = true;
            let spectrum = collection.spectrum(entry);
            if built {
                worker.ladders.clear_hits();
            } else {
                if let Err(e) = worker.ladders.build(
                    protein,
                    candidate.start,
                    candidate.end,
                    &self.product,
                    combo.mask,
                    &candidate.sites,
                ) {
                    log::debug!("{}", e);
                    return found;
                }
                built = true;
            }

            let multiply = entry.charge >= spectrum.consider_mult;
            let ladders = &mut worker.ladders;
            let screened = ladders.forward[0..1 + multiply as usize]
                .iter()
                .chain(ladders.backward[0..1 + multiply as usize].iter())
                .any(|ladder| spectrum.compare_top(ladder));
            if !screened {
                continue;
            }

            let key = (entry.spectrum, entry.charge);
            *worker.examined.entry(key).or_default() += 1;

            let list = spectrum.which(entry.charge);
            worker.used.clear(spectrum.peaks(list).len());
            let series = 1 + multiply as usize;
            for ladder in ladders.forward[..series]
                .iter_mut()
                .chain(ladders.backward[..series].iter_mut())
            {
                spectrum.compare_sorted(ladder, list, &mut worker.used);
            }
            ladders.or();
            let hits = ladders.hit_count();

            let tracker = worker.trackers.entry(key).or_insert_with(|| {
                HitTracker::new(self.parameters.hit_capacity, self.parameters.min_hits)
            });
            if !tracker.would_accept(hits) {
                continue;
            }

            let matches = ladders
                .ladders()
                .flat_map(|ladder| {
                    ladder.matches().map(move |(number, mz, peak)| MatchedIon {
                        kind: ladder.kind,
                        charge: ladder.charge,
                        number,
                        mz,
                        peak_mz: peak.mz,
                        intensity: peak.intensity,
                        rank: peak.rank,
                    })
                })
                .collect();
            let mods = candidate
                .sites
                .iter()
                .enumerate()
                .take(64)
                .filter(|&(bit, site)| !site.fixed && combo.mask & (1 << bit) != 0)
                .map(|(_, site)| (site.position, site.modification))
                .collect();

            tracker.offer(HitRecord {
                sequence,
                start: candidate.start,
                end: candidate.end,
                charge: entry.charge,
                hits,
                mass: combo.mass,
                experimental: spectrum.neutral_mass(entry.charge, &self.precursor),
                missed_cleavages: candidate.missed_cleavages,
                matches,
                mods,
            });
        }
        found
    }

    /// Residues of a record with its variable modifications written inline
    fn peptide_string(&self, residues: &[u8], record: &HitRecord) -> (String, Vec<(usize, f32)>) {
        let modifications = self.mods.modifications();
        let mut mods = record
            .mods
            .iter()
            .map(|&(position, idx)| (position - record.start, modifications[idx].mass))
            .collect::<Vec<_>>();
        mods.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.total_cmp(&b.1)));

        let mut peptide = String::with_capacity(residues.len() + 12 * mods.len());
        for (offset, &aa) in residues.iter().enumerate() {
            peptide.push(aa as char);
            for (_, mass) in mods.iter().filter(|(o, _)| *o == offset) {
                let _ = write!(peptide, "[{:+}]", mass);
            }
        }
        (peptide, mods)
    }

    fn report<S: SequenceSource>(
        &self,
        source: &S,
        idx: usize,
        spectrum: &SpectrumPeaks,
        worker: &Worker,
    ) -> SpectrumResult {
        let mut result = SpectrumResult {
            id: spectrum.id,
            name: spectrum.name.clone(),
            charge_state: spectrum.charge_state,
            charges: spectrum.charges.clone(),
            error_code: spectrum.error.as_ref().map(Error::code),
            error: spectrum.error.as_ref().map(|e| e.to_string()),
            hits: Vec::new(),
        };
        if !spectrum.is_searchable() {
            return result;
        }

        let mut scored = Vec::new();
        for &charge in &spectrum.charges {
            let key = (idx, charge);
            let tracker = match worker.trackers.get(&key) {
                Some(tracker) => tracker,
                None => continue,
            };
            let examined = worker.examined.get(&key).copied().unwrap_or(0);
            for record in tracker.records() {
                let score = match self.scoring.score(record, spectrum, examined, &self.product) {
                    Some(score) if score.evalue <= self.parameters.max_evalue => score,
                    _ => continue,
                };
                let residues = &source.sequence(record.sequence)[record.start..record.end];
                let (peptide, mods) = self.peptide_string(residues, record);
                scored.push(ScoredHit {
                    peptide,
                    sequence: String::from_utf8_lossy(residues).into_owned(),
                    mods,
                    evalue: score.evalue,
                    pvalue: score.pvalue,
                    charge,
                    hits: score.hits,
                    threshold: score.threshold,
                    theoretical_mass: self.precursor.unscale(record.mass),
                    experimental_mass: self.precursor.unscale(record.experimental),
                    missed_cleavages: record.missed_cleavages,
                    locations: vec![Location {
                        sequence: record.sequence,
                        start: record.start,
                        end: record.end,
                        header: source.header(record.sequence).to_string(),
                    }],
                    matches: record.matches.clone(),
                });
            }
        }

        scored.sort_by(|a, b| {
            a.evalue
                .total_cmp(&b.evalue)
                .then_with(|| a.peptide.cmp(&b.peptide))
                .then_with(|| a.locations[0].sequence.cmp(&b.locations[0].sequence))
                .then_with(|| a.locations[0].start.cmp(&b.locations[0].start))
        });

        let mut seen: FnvHashMap<String, usize> = FnvHashMap::default();
        for hit in scored {
            match seen.get(&hit.peptide) {
                Some(&pos) => {
                    let existing: &mut ScoredHit = &mut result.hits[pos];
                    for location in hit.locations {
                        if !existing.locations.contains(&location) {
                            existing.locations.push(location);
                        }
                    }
                }
                None => {
                    seen.insert(hit.peptide.clone(), result.hits.len());
                    result.hits.push(hit);
                }
            }
        }
        result.hits.truncate(self.parameters.hit_list_len);
        log::debug!(
            "spectrum {} ({}): {} hits",
            spectrum.id,
            spectrum.name,
            result.hits.len()
        );
        result
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fasta::Fasta;
    use crate::parameters::Builder;

    fn engine(json: &str) -> SearchEngine {
        let builder: Builder = serde_json::from_str(json).unwrap();
        SearchEngine::new(builder.make_parameters().unwrap()).unwrap()
    }

    #[test]
    fn peptide_string() {
        let engine = engine(r#"{"variable_mods": {"M": [15.9949]}}"#);
        let record = HitRecord {
            sequence: 0,
            start: 10,
            end: 14,
            charge: 1,
            hits: 4,
            mass: 0,
            experimental: 0,
            missed_cleavages: 0,
            matches: Vec::new(),
            mods: vec![(12, 0)],
        };
        let (peptide, mods) = engine.peptide_string(b"PEMK", &record);
        assert_eq!(peptide, "PEM[+15.9949]K");
        assert_eq!(mods, vec![(2, 15.9949)]);
    }

    #[test]
    fn failed_spectra_are_reported() {
        let engine = engine(r#"{"min_peaks": 4}"#);
        let raw = vec![
            RawSpectrum {
                id: 7,
                name: "too few".into(),
                precursor_mz: 500.0,
                charge: Some(1),
                mz: vec![100.0, 200.0],
                intensity: vec![10.0, 20.0],
            },
            RawSpectrum {
                id: 8,
                name: "no precursor".into(),
                precursor_mz: 0.0,
                charge: Some(1),
                mz: vec![100.0, 200.0, 300.0, 400.0],
                intensity: vec![10.0, 20.0, 30.0, 40.0],
            },
        ];
        let spectra = engine.prepare(&raw);
        let fasta = Fasta::parse(">p\nPEPTIDEK\n".into());
        let results = engine
            .search(&fasta, &spectra, &AtomicBool::new(false))
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].error_code, Some(1));
        assert_eq!(results[1].error_code, Some(2));
        assert!(results.iter().all(|r| r.hits.is_empty()));
    }

    #[test]
    fn cancelled() {
        let engine = engine("{}");
        let fasta = Fasta::parse(">p\nPEPTIDEK\n".into());
        let err = engine
            .search(&fasta, &[], &AtomicBool::new(true))
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn identical_masses_are_each_scored() {
        let engine = engine(
            r#"{
                "product_tol": 0.0,
                "precursor_tol": 0.05,
                "variable_mods": {"M": [15.9949]},
                "single_num": 10,
                "double_num": 10,
                "use_spectrum_charge": true
            }"#,
        );
        let table = &engine.product;
        let ox = table.scale(15.9949f32 as f64);
        // oxidation on the first methionine only
        let residues = [b'A', b'M', b'G', b'M', b'K']
            .iter()
            .enumerate()
            .map(|(idx, &aa)| table.residue(aa).unwrap() + if idx == 1 { ox } else { 0 })
            .collect::<Vec<_>>();
        let mut mz = Vec::new();
        for idx in 1..residues.len() {
            let b = residues[..idx].iter().sum::<Scaled>() + table.proton();
            let y = residues[idx..].iter().sum::<Scaled>() + table.water() + table.proton();
            mz.push(table.unscale(b));
            mz.push(table.unscale(y));
        }
        mz.sort_by(f64::total_cmp);
        let neutral = residues.iter().sum::<Scaled>() + table.water();
        let raw = RawSpectrum {
            id: 0,
            name: "AM[ox]GMK".into(),
            precursor_mz: table.unscale(neutral + table.proton()),
            charge: Some(1),
            intensity: vec![100.0; mz.len()],
            mz,
        };

        let spectra = engine.prepare(&[raw]);
        assert!(spectra[0].is_searchable());
        let collection = PeakCollection::new(
            &spectra,
            engine.precursor.scale(engine.parameters.precursor_tol),
            engine.parameters.scale_precursor_tol,
            &engine.precursor,
        );
        let mut worker = engine.worker();
        engine.scan_entry(&mut worker, &collection, b"AMGMK", 0);

        // both single oxidation forms share a mass, and both are compared
        assert_eq!(worker.examined[&(0, 1)], 2);
        let mut retained = worker.trackers[&(0, 1)]
            .records()
            .iter()
            .map(|r| (r.mods.clone(), r.hits))
            .collect::<Vec<_>>();
        retained.sort();
        assert_eq!(retained, vec![(vec![(1, 0)], 8), (vec![(3, 0)], 4)]);

        let fasta = Fasta::parse(">p\nAMGMK\n".into());
        let results = engine
            .search(&fasta, &spectra, &AtomicBool::new(false))
            .unwrap();
        let best = &results[0].hits[0];
        assert_eq!(best.peptide, "AM[+15.9949]GMK");
        assert_eq!(best.mods, vec![(1, 15.9949)]);
        assert_eq!(best.hits, 8);
    }
}
