use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::enzyme::{Digester, Enzyme, EnzymeKind, Specificity, MAX_PEPTIDE_LEN};
use crate::ion_series::Kind;
use crate::mass::{MassKind, MassTable};
use crate::modification::{validate_mods, validate_var_mods, ModificationSpecificity};
use crate::scoring::{ScoreType, ScoringModel};
use crate::spectrum::{ChargeSettings, CullSettings, MAX_CHARGE};
use crate::Error;

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct EnzymeBuilder {
    /// Named cleavage rule, ignored when `cleave_at` is given
    pub name: Option<EnzymeKind>,
    /// How many missed cleavages to use
    pub missed_cleavages: Option<u8>,
    /// Minimum peptide length that will be searched
    pub min_len: Option<usize>,
    /// Maximum peptide length that will be searched
    pub max_len: Option<usize>,
    pub cleave_at: Option<String>,
    pub restrict: Option<char>,
    pub c_terminal: Option<bool>,
    /// Semi- or non-specific digestion
    pub specificity: Option<Specificity>,
}

impl Default for EnzymeBuilder {
    fn default() -> Self {
        Self {
            name: Some(EnzymeKind::Trypsin),
            missed_cleavages: Some(1),
            min_len: Some(4),
            max_len: Some(40),
            cleave_at: None,
            restrict: None,
            c_terminal: None,
            specificity: None,
        }
    }
}

impl EnzymeBuilder {
    pub fn build(&self) -> Result<Digester, Error> {
        let enzyme = match &self.cleave_at {
            Some(cleave) => {
                Enzyme::new(cleave, self.restrict, self.c_terminal.unwrap_or(true))?
            }
            None => self.name.unwrap_or_default().build()?,
        };
        Ok(Digester::new(
            enzyme,
            self.missed_cleavages.unwrap_or(1),
            self.min_len.unwrap_or(4),
            self.max_len.unwrap_or(40),
        )
        .with_specificity(self.specificity.unwrap_or_default()))
    }
}

#[derive(Deserialize, Default, Debug)]
/// Search settings as read from a parameter file. Everything is optional
pub struct Builder {
    /// Fixed point scale applied to every mass
    pub mass_scale: Option<i32>,
    pub precursor_mass_kind: Option<MassKind>,
    pub product_mass_kind: Option<MassKind>,
    /// Precursor tolerance in Da
    pub precursor_tol: Option<f64>,
    /// Product ion tolerance in Da
    pub product_tol: Option<f64>,
    /// Multiply the precursor tolerance by the precursor charge
    pub scale_precursor_tol: Option<bool>,

    pub enzyme: Option<EnzymeBuilder>,
    /// Static modifications to add to matching amino acids
    pub static_mods: Option<HashMap<String, f32>>,
    /// Variable modifications to add to matching amino acids
    pub variable_mods: Option<HashMap<String, Vec<f32>>>,
    /// Limit number of variable modifications on a peptide
    pub max_variable_mods: Option<usize>,
    /// Limit number of modified forms generated per peptide
    pub max_combinations: Option<usize>,
    /// Fragment ion series: the first N-terminal and the first C-terminal
    /// kind listed are searched
    pub ion_kinds: Option<Vec<Kind>>,

    pub cut_lo: Option<f64>,
    pub cut_hi: Option<f64>,
    pub cut_inc: Option<f64>,
    /// Density limiting window (Da) and quota where only singly charged
    /// products are expected
    pub single_window: Option<f64>,
    pub single_num: Option<usize>,
    pub double_window: Option<f64>,
    pub double_num: Option<usize>,
    /// Number of most intense peaks used to screen candidates
    pub top_hits: Option<usize>,
    pub min_peaks: Option<usize>,

    pub min_charge: Option<u8>,
    pub max_charge: Option<u8>,
    pub consider_mult: Option<u8>,
    pub plus_one: Option<f64>,
    pub calculate_plus_one: Option<bool>,
    pub use_spectrum_charge: Option<bool>,

    /// Hits reported per spectrum
    pub hit_list_len: Option<usize>,
    /// Records retained per spectrum and charge during the scan
    pub hit_capacity: Option<usize>,
    pub min_hits: Option<usize>,
    pub max_evalue: Option<f64>,
    pub pseudocount: Option<usize>,
    pub score_type: Option<ScoreType>,
    /// Only search sequences with one of these taxonomy ids
    pub taxonomy: Option<Vec<u32>>,
}

#[derive(Serialize, Clone, Debug)]
pub struct Parameters {
    pub mass_scale: i32,
    pub precursor_mass_kind: MassKind,
    pub product_mass_kind: MassKind,
    pub precursor_tol: f64,
    pub product_tol: f64,
    pub scale_precursor_tol: bool,
    pub enzyme: EnzymeBuilder,
    pub static_mods: HashMap<ModificationSpecificity, f32>,
    pub variable_mods: HashMap<ModificationSpecificity, Vec<f32>>,
    pub max_variable_mods: usize,
    pub max_combinations: usize,
    pub forward: Kind,
    pub backward: Kind,
    pub cut_lo: f64,
    pub cut_hi: f64,
    pub cut_inc: f64,
    pub single_window: f64,
    pub single_num: usize,
    pub double_window: f64,
    pub double_num: usize,
    pub top_hits: usize,
    pub min_peaks: usize,
    pub charge: ChargeSettings,
    pub hit_list_len: usize,
    pub hit_capacity: usize,
    pub min_hits: usize,
    pub max_evalue: f64,
    pub pseudocount: usize,
    pub score_type: ScoreType,
    pub taxonomy: Option<Vec<u32>>,
}

fn invalid<T>(msg: String) -> Result<T, Error> {
    Err(Error::ConfigurationInvalid(msg))
}

fn tolerance(name: &str, value: f64) -> Result<f64, Error> {
    if !value.is_finite() || value < 0.0 {
        return invalid(format!("{} must be a non-negative number, got {}", name, value));
    }
    Ok(value)
}

impl Builder {
    pub fn make_parameters(self) -> Result<Parameters, Error> {
        let product_tol = tolerance("product_tol", self.product_tol.unwrap_or(0.8))?;
        let precursor_tol = tolerance("precursor_tol", self.precursor_tol.unwrap_or(2.0))?;
        if product_tol > 2.0 {
            log::warn!("product tolerance of {} Da is unusually wide", product_tol);
        }

        let (forward, backward) = match self.ion_kinds {
            Some(kinds) => {
                let forward = kinds.iter().copied().find(Kind::is_forward);
                let backward = kinds.iter().copied().find(|k| !k.is_forward());
                if kinds.len() > 2 {
                    log::warn!("only one ion series per terminus is searched: {:?}", kinds);
                }
                match (forward, backward) {
                    (Some(f), Some(b)) => (f, b),
                    _ => {
                        return invalid(format!(
                            "ion_kinds needs an N-terminal and a C-terminal series, got {:?}",
                            kinds
                        ))
                    }
                }
            }
            None => (Kind::B, Kind::Y),
        };

        let cut_lo = self.cut_lo.unwrap_or(0.0);
        let cut_hi = self.cut_hi.unwrap_or(0.2);
        let cut_inc = self.cut_inc.unwrap_or(0.0005);
        if !(0.0..=1.0).contains(&cut_lo) || !(cut_lo..=1.0).contains(&cut_hi) {
            return invalid(format!(
                "intensity cuts must satisfy 0 <= cut_lo <= cut_hi <= 1, got {} and {}",
                cut_lo, cut_hi
            ));
        }
        if cut_inc.is_nan() || cut_inc <= 0.0 {
            return invalid(format!("cut_inc must be positive, got {}", cut_inc));
        }

        let max_charge = self.max_charge.unwrap_or(3);
        let min_charge = self.min_charge.unwrap_or(1);
        if min_charge == 0 || min_charge > max_charge {
            return invalid(format!(
                "charge range {}..={} is empty",
                min_charge, max_charge
            ));
        }
        if max_charge > MAX_CHARGE {
            log::warn!(
                "max_charge {} is above the supported maximum, clamping to {}",
                max_charge,
                MAX_CHARGE
            );
        }

        let hit_list_len = self.hit_list_len.unwrap_or(30);
        if hit_list_len == 0 {
            return invalid("hit_list_len must be at least 1".into());
        }

        let mut enzyme = self.enzyme.unwrap_or_default();
        if enzyme.max_len.unwrap_or(40) > MAX_PEPTIDE_LEN {
            log::warn!(
                "maximum peptide length is capped at {} residues",
                MAX_PEPTIDE_LEN
            );
            enzyme.max_len = Some(MAX_PEPTIDE_LEN);
        }

        let max_variable_mods = self.max_variable_mods.unwrap_or(2);
        if max_variable_mods > 8 {
            log::warn!(
                "searching up to {} variable modifications per peptide will be slow",
                max_variable_mods
            );
        }

        Ok(Parameters {
            mass_scale: self.mass_scale.unwrap_or(1000),
            precursor_mass_kind: self.precursor_mass_kind.unwrap_or_default(),
            product_mass_kind: self.product_mass_kind.unwrap_or_default(),
            precursor_tol,
            product_tol,
            scale_precursor_tol: self.scale_precursor_tol.unwrap_or(false),
            enzyme,
            static_mods: validate_mods(self.static_mods),
            variable_mods: validate_var_mods(self.variable_mods),
            max_variable_mods,
            max_combinations: self.max_combinations.unwrap_or(64).max(1),
            forward,
            backward,
            cut_lo,
            cut_hi,
            cut_inc,
            single_window: tolerance("single_window", self.single_window.unwrap_or(27.0))?,
            single_num: self.single_num.unwrap_or(2),
            double_window: tolerance("double_window", self.double_window.unwrap_or(14.0))?,
            double_num: self.double_num.unwrap_or(2),
            top_hits: self.top_hits.unwrap_or(3),
            min_peaks: self.min_peaks.unwrap_or(4),
            charge: ChargeSettings {
                min_charge,
                max_charge: max_charge.min(MAX_CHARGE),
                consider_mult: self.consider_mult.unwrap_or(3),
                plus_one: self.plus_one.unwrap_or(0.8),
                calculate_plus_one: self.calculate_plus_one.unwrap_or(true),
                use_spectrum_charge: self.use_spectrum_charge.unwrap_or(false),
            },
            hit_list_len,
            hit_capacity: self.hit_capacity.unwrap_or(hit_list_len).max(1),
            min_hits: self.min_hits.unwrap_or(2),
            max_evalue: self.max_evalue.unwrap_or(1.0),
            pseudocount: self.pseudocount.unwrap_or(1),
            score_type: self.score_type.unwrap_or_default(),
            taxonomy: self.taxonomy,
        })
    }
}

impl Parameters {
    pub fn precursor_table(&self) -> Result<MassTable, Error> {
        MassTable::new(self.precursor_mass_kind, self.mass_scale)
    }

    pub fn product_table(&self) -> Result<MassTable, Error> {
        MassTable::new(self.product_mass_kind, self.mass_scale)
    }

    pub fn cull_settings(&self, table: &MassTable) -> CullSettings {
        CullSettings {
            tolerance: table.scale(self.product_tol),
            cut_lo: self.cut_lo,
            single_window: table.scale(self.single_window),
            single_num: self.single_num,
            double_window: table.scale(self.double_window),
            double_num: self.double_num,
            top_hits: self.top_hits,
            min_peaks: self.min_peaks,
        }
    }

    pub fn scoring_model(&self, table: &MassTable) -> ScoringModel {
        ScoringModel {
            score_type: self.score_type,
            tolerance: table.scale(self.product_tol),
            cut_lo: self.cut_lo,
            cut_hi: self.cut_hi,
            cut_inc: self.cut_inc,
            pseudocount: self.pseudocount,
            top_hits: self.top_hits,
        }
    }
}
