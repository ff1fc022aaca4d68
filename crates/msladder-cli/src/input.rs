use std::path::PathBuf;

use anyhow::{ensure, Context};
use clap::ArgMatches;
use msladder_core::parameters::{Builder, Parameters};
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
/// Actual search parameters - may include overrides or default values not set by user
pub struct Search {
    pub version: String,
    pub search: Parameters,
    pub fasta: String,
    pub spectra_paths: Vec<String>,
    pub output_paths: Vec<String>,

    #[serde(skip_serializing)]
    pub output_directory: PathBuf,
}

#[derive(Deserialize, Default)]
/// Input search parameters deserialized from JSON file
pub struct Input {
    #[serde(default)]
    search: Builder,
    fasta: Option<String>,
    spectra_paths: Option<Vec<String>>,
    output_directory: Option<String>,
}

impl Input {
    pub fn from_arguments(matches: ArgMatches) -> anyhow::Result<Self> {
        let mut input = match matches.get_one::<String>("parameters") {
            Some(path) => Input::load(path)
                .with_context(|| format!("Failed to read parameters from `{path}`"))?,
            None => Input::default(),
        };

        // Handle JSON configuration overrides
        if let Some(output_directory) = matches.get_one::<String>("output_directory") {
            log::trace!("overriding `output_directory` parameter.");
            input.output_directory = Some(output_directory.into());
        }
        if let Some(fasta) = matches.get_one::<String>("fasta") {
            log::trace!("overriding `fasta` parameter.");
            input.fasta = Some(fasta.into());
        }
        if let Some(paths) = matches.get_many::<String>("spectra_paths") {
            log::trace!("overriding `spectra_paths` parameter.");
            input.spectra_paths = Some(paths.map(|p| p.into()).collect());
        }

        ensure!(
            input.fasta.is_some(),
            "`fasta` must be set. For more information try '--help'"
        );
        ensure!(
            input.spectra_paths.as_ref().map(|p| !p.is_empty()).unwrap_or(false),
            "`spectra_paths` must be set. For more information try '--help'"
        );

        Ok(input)
    }

    pub fn load<S: AsRef<str>>(path: S) -> anyhow::Result<Self> {
        msladder_core::read_json(path.as_ref()).map_err(anyhow::Error::from)
    }

    pub fn build(self) -> anyhow::Result<Search> {
        let search = self.search.make_parameters()?;

        if search.precursor_tol < search.product_tol {
            log::warn!(
                "precursor tolerance ({} Da) is tighter than product tolerance ({} Da)",
                search.precursor_tol,
                search.product_tol
            );
        }

        let output_directory = match self.output_directory {
            Some(path) => {
                let path = PathBuf::from(path);
                std::fs::create_dir_all(&path).with_context(|| {
                    format!("Failed to create output directory `{}`", path.display())
                })?;
                path
            }
            None => std::env::current_dir()?,
        };

        Ok(Search {
            version: clap::crate_version!().into(),
            search,
            fasta: self.fasta.context("`fasta` must be provided")?,
            spectra_paths: self.spectra_paths.unwrap_or_default(),
            output_paths: Vec::new(),
            output_directory,
        })
    }
}
