use std::collections::VecDeque;

use regex::bytes::Regex;
use serde::{Deserialize, Serialize};

use crate::mass::{MassTable, Scaled, VALID_AA};
use crate::modification::{ModSite, ModificationSet};
use crate::Error;

/// Longest peptide that can be turned into a ladder
pub const MAX_PEPTIDE_LEN: usize = 128;

/// Width of a modification mask; sites past this are dropped
pub const MAX_MOD_SITES: usize = 64;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnzymeKind {
    Trypsin,
    TrypsinP,
    LysC,
    LysCP,
    LysN,
    ArgC,
    AspN,
    GluC,
    Chymotrypsin,
    CnBr,
    WholeProtein,
}

impl Default for EnzymeKind {
    fn default() -> Self {
        Self::Trypsin
    }
}

impl EnzymeKind {
    pub fn build(&self) -> Result<Enzyme, Error> {
        match self {
            EnzymeKind::Trypsin => Enzyme::new("KR", Some('P'), true),
            EnzymeKind::TrypsinP => Enzyme::new("KR", None, true),
            EnzymeKind::LysC => Enzyme::new("K", Some('P'), true),
            EnzymeKind::LysCP => Enzyme::new("K", None, true),
            EnzymeKind::LysN => Enzyme::new("K", None, false),
            EnzymeKind::ArgC => Enzyme::new("R", Some('P'), true),
            EnzymeKind::AspN => Enzyme::new("D", None, false),
            EnzymeKind::GluC => Enzyme::new("DE", Some('P'), true),
            EnzymeKind::Chymotrypsin => Enzyme::new("FYWL", Some('P'), true),
            EnzymeKind::CnBr => Enzyme::new("M", None, true),
            EnzymeKind::WholeProtein => Enzyme::new("$", None, true),
        }
    }
}

/// Which peptide ends must fall on a cleavage site
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Specificity {
    /// Both ends, with up to `missed_cleavages` sites inside
    Full,
    /// At least one end. Internal sites are counted but not limited
    Semi,
    /// Any substring within the length bounds
    None,
}

impl Default for Specificity {
    fn default() -> Self {
        Self::Full
    }
}

#[derive(Clone, Debug)]
pub struct Enzyme {
    // Skip cleaving if the site is followed matching this AA
    pub skip_suffix: Option<u8>,
    // Regex for matching cleavage sites
    regex: Regex,
    // Cleave at c-terminal?
    pub c_terminal: bool,
}

impl Enzyme {
    pub fn new(cleave: &str, skip_suffix: Option<char>, c_terminal: bool) -> Result<Self, Error> {
        if !(cleave.bytes().all(|x| VALID_AA.contains(&x)) || cleave == "$") {
            return Err(Error::ConfigurationInvalid(format!(
                "enzyme cleavage sequence contains non-amino acid characters: {}",
                cleave
            )));
        }
        if let Some(x) = skip_suffix.filter(|x| !VALID_AA.contains(&(*x as u8))) {
            return Err(Error::ConfigurationInvalid(format!(
                "enzyme cleavage restriction is non-amino acid character: {}",
                x
            )));
        }

        let invalid = |e: regex::Error| Error::ConfigurationInvalid(e.to_string());
        match cleave {
            "" | "$" => Ok(Enzyme {
                regex: Regex::new("$").map_err(invalid)?,
                skip_suffix: None,
                c_terminal: true,
            }),
            _ => Ok(Enzyme {
                regex: Regex::new(&format!("[{}]", cleave)).map_err(invalid)?,
                skip_suffix: skip_suffix.map(|c| c as u8),
                c_terminal,
            }),
        }
    }

    /// Non-empty fragments between consecutive cut points, in sequence order
    pub fn cleavage_sites(&self, sequence: &[u8]) -> Vec<std::ops::Range<usize>> {
        let mut ranges = Vec::new();
        let mut left = 0;
        for mat in self.regex.find_iter(sequence) {
            let right = match self.c_terminal {
                true => mat.end(),
                false => mat.start(),
            };
            if let Some(skip) = self.skip_suffix {
                if sequence.get(right) == Some(&skip) {
                    continue;
                }
            }
            if right > left {
                ranges.push(left..right);
                left = right;
            }
        }
        if left < sequence.len() {
            ranges.push(left..sequence.len());
        }
        ranges
    }
}

/// A peptide produced by digestion: a range into the borrowed protein
/// sequence plus everything needed to enumerate modified masses
#[derive(Clone, Debug, PartialEq)]
pub struct Candidate {
    pub start: usize,
    /// Exclusive
    pub end: usize,
    pub missed_cleavages: u8,
    /// Summed residue masses, without water or modifications
    pub mass: Scaled,
    pub sites: Vec<ModSite>,
    /// Sites dropped because the mask was full
    pub truncated: bool,
    // Number of trailing `sites` anchored on the C-terminal residue
    c_sites: usize,
}

impl Candidate {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    pub fn sequence<'s>(&self, protein: &'s [u8]) -> &'s [u8] {
        &protein[self.start..self.end]
    }

    /// A candidate over `protein[start..end]` with every modification site
    /// that applies to it
    fn span(
        protein: &[u8],
        start: usize,
        end: usize,
        mass: Scaled,
        missed_cleavages: u8,
        mods: &ModificationSet,
        buf: &mut Vec<ModSite>,
    ) -> Self {
        let mut candidate = Candidate {
            start,
            end,
            missed_cleavages,
            mass,
            sites: Vec::new(),
            truncated: false,
            c_sites: 0,
        };
        buf.clear();
        mods.n_terminal_sites(protein, start, buf);
        mods.residue_sites(protein, start, end, buf);
        candidate.push_sites(buf);
        buf.clear();
        mods.c_terminal_sites(protein, end, buf);
        candidate.c_sites = candidate.push_sites(buf);
        candidate
    }

    fn push_sites(&mut self, sites: &[ModSite]) -> usize {
        let room = MAX_MOD_SITES.saturating_sub(self.sites.len());
        if sites.len() > room {
            self.truncated = true;
        }
        let n = sites.len().min(room);
        self.sites.extend_from_slice(&sites[..n]);
        n
    }

    /// Fold the next fragment into this candidate: add its mass and sites,
    /// and move the C-terminal sites onto the new last residue
    fn extend(&mut self, fragment: &Fragment) {
        self.sites.truncate(self.sites.len() - self.c_sites);
        self.push_sites(&fragment.residue_sites);
        self.c_sites = self.push_sites(&fragment.c_sites);
        self.end = fragment.end;
        self.mass += fragment.mass;
        self.missed_cleavages += 1;
    }
}

/// One fully-cleaved piece of the protein, computed once
struct Fragment {
    start: usize,
    end: usize,
    mass: Scaled,
    residue_sites: Vec<ModSite>,
    c_sites: Vec<ModSite>,
}

pub struct Digester {
    pub enzyme: Enzyme,
    /// Number of missed cleavages to produce
    pub missed_cleavages: u8,
    /// Inclusive
    pub min_len: usize,
    /// Inclusive
    pub max_len: usize,
    pub specificity: Specificity,
}

impl Digester {
    pub fn new(enzyme: Enzyme, missed_cleavages: u8, min_len: usize, max_len: usize) -> Self {
        Digester {
            enzyme,
            missed_cleavages,
            min_len,
            max_len: max_len.min(MAX_PEPTIDE_LEN),
            specificity: Specificity::Full,
        }
    }

    pub fn with_specificity(mut self, specificity: Specificity) -> Self {
        self.specificity = specificity;
        self
    }

    /// Digest `protein` into candidates. Fully specific digestion yields
    /// peptides spanning `0..=missed_cleavages` missed cleavages.
    pub fn digest(
        &self,
        protein: &[u8],
        mods: &ModificationSet,
        table: &MassTable,
    ) -> Vec<Candidate> {
        match self.specificity {
            Specificity::Full => self.digest_specific(protein, mods, table),
            Specificity::Semi | Specificity::None => self.digest_partial(protein, mods, table),
        }
    }

    /// Every substring of `protein` within the length bounds, extended one
    /// residue at a time from each start. Semi-specific digestion keeps only
    /// those with a cleavage site (or a protein terminus) at one end at least.
    fn digest_partial(
        &self,
        protein: &[u8],
        mods: &ModificationSet,
        table: &MassTable,
    ) -> Vec<Candidate> {
        let mut boundary = vec![false; protein.len() + 1];
        boundary[0] = true;
        for range in self.enzyme.cleavage_sites(protein) {
            boundary[range.end] = true;
        }
        let semi = self.specificity == Specificity::Semi;

        let mut candidates = Vec::new();
        let mut buf = Vec::new();
        for start in 0..protein.len() {
            let mut mass = 0;
            let mut missed = 0u8;
            let last = protein.len().min(start + self.max_len);
            for end in start + 1..=last {
                mass += match table.residue(protein[end - 1]) {
                    Some(residue) => residue,
                    None => break,
                };
                let specific = !semi || boundary[start] || boundary[end];
                if end - start >= self.min_len && specific {
                    candidates.push(Candidate::span(
                        protein, start, end, mass, missed, mods, &mut buf,
                    ));
                }
                // a site at `end` is internal to every longer peptide
                if boundary[end] {
                    missed = missed.saturating_add(1);
                }
            }
        }
        candidates
    }

    /// A sliding window keeps the open candidates that may still be extended.
    /// Each new fragment has its mass and modification sites computed once,
    /// and is then folded into every open candidate by addition.
    fn digest_specific(
        &self,
        protein: &[u8],
        mods: &ModificationSet,
        table: &MassTable,
    ) -> Vec<Candidate> {
        let mut window: VecDeque<Candidate> =
            VecDeque::with_capacity(self.missed_cleavages as usize + 1);
        let mut candidates = Vec::new();

        for range in self.enzyme.cleavage_sites(protein) {
            let mass = match table.residues(&protein[range.clone()]) {
                Some(mass) => mass,
                None => {
                    // Nothing may span a residue without a mass
                    window.clear();
                    continue;
                }
            };

            let mut fragment = Fragment {
                start: range.start,
                end: range.end,
                mass,
                residue_sites: Vec::new(),
                c_sites: Vec::new(),
            };
            mods.residue_sites(protein, range.start, range.end, &mut fragment.residue_sites);
            mods.c_terminal_sites(protein, range.end, &mut fragment.c_sites);

            if window.len() > self.missed_cleavages as usize {
                window.pop_front();
            }
            for candidate in window.iter_mut() {
                candidate.extend(&fragment);
            }

            let mut candidate = Candidate {
                start: fragment.start,
                end: fragment.end,
                missed_cleavages: 0,
                mass: fragment.mass,
                sites: Vec::new(),
                truncated: false,
                c_sites: 0,
            };
            let mut n_sites = Vec::new();
            mods.n_terminal_sites(protein, fragment.start, &mut n_sites);
            candidate.push_sites(&n_sites);
            candidate.push_sites(&fragment.residue_sites);
            candidate.c_sites = candidate.push_sites(&fragment.c_sites);
            window.push_back(candidate);

            candidates.extend(
                window
                    .iter()
                    .filter(|c| c.len() >= self.min_len && c.len() <= self.max_len)
                    .cloned(),
            );
        }
        candidates
    }
}
