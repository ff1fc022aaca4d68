use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::time::Instant;

use anyhow::Context;
use log::info;
use msladder_core::fasta::Fasta;
use msladder_core::search::{SearchEngine, SpectrumResult};
use msladder_core::spectrum::RawSpectrum;
use rayon::prelude::*;

use crate::dta;
use crate::input::Search;

pub struct Runner {
    pub parameters: Search,
    engine: SearchEngine,
    fasta: Fasta,
    start: Instant,
}

impl Runner {
    pub fn new(parameters: Search) -> anyhow::Result<Self> {
        let start = Instant::now();
        let fasta = msladder_core::read_fasta(&parameters.fasta)
            .with_context(|| format!("Failed to read FASTA from `{}`", parameters.fasta))?;
        info!(
            "read {} sequences from {} in {:#?}",
            fasta.targets.len(),
            parameters.fasta,
            start.elapsed()
        );
        let engine = SearchEngine::new(parameters.search.clone())?;
        Ok(Runner {
            parameters,
            engine,
            fasta,
            start,
        })
    }

    // Create a path for `file_name` in the output directory
    pub(crate) fn make_path<S: AsRef<str>>(&self, file_name: S) -> PathBuf {
        self.parameters.output_directory.join(file_name.as_ref())
    }

    /// Read every spectrum file, numbering spectra consecutively across files
    pub fn read_spectra(&self) -> anyhow::Result<Vec<RawSpectrum>> {
        let start = Instant::now();
        let per_file = self
            .parameters
            .spectra_paths
            .par_iter()
            .map(|path| dta::read_dta(path, 0))
            .collect::<anyhow::Result<Vec<_>>>()?;

        let mut spectra = Vec::new();
        for mut file in per_file {
            for spectrum in file.iter_mut() {
                spectrum.id += spectra.len();
            }
            spectra.extend(file);
        }
        info!(
            "- file IO: {:8} ms ({} spectra)",
            start.elapsed().as_millis(),
            spectra.len()
        );
        Ok(spectra)
    }

    pub fn search(&self, raw: &[RawSpectrum]) -> anyhow::Result<Vec<SpectrumResult>> {
        let start = Instant::now();
        let spectra = self.engine.prepare(raw);
        let results = self
            .engine
            .search(&self.fasta, &spectra, &AtomicBool::new(false))?;
        let duration = start.elapsed().as_millis() as usize;
        let rate = raw.len() * 1000 / (duration + 1);
        info!("- search:  {:8} ms ({} spectra/s)", duration, rate);
        Ok(results)
    }

    pub fn run(mut self) -> anyhow::Result<Vec<SpectrumResult>> {
        let raw = self.read_spectra()?;
        let results = self.search(&raw)?;

        let identified = results.iter().filter(|r| !r.hits.is_empty()).count();
        let failed = results.iter().filter(|r| r.error_code.is_some()).count();
        info!(
            "identified {} of {} spectra ({} could not be searched)",
            identified,
            results.len(),
            failed
        );

        let path = self.write_results(&results)?;
        self.parameters.output_paths.push(path);

        let path = self.make_path("results.json");
        self.parameters
            .output_paths
            .push(path.display().to_string());
        println!("{}", serde_json::to_string_pretty(&self.parameters)?);

        let bytes = serde_json::to_vec_pretty(&self.parameters)?;
        std::fs::write(&path, bytes)?;

        info!("finished in {}s", self.start.elapsed().as_secs());
        Ok(results)
    }
}
