use std::{
    collections::HashMap,
    fmt::{Display, Write},
    str::FromStr,
};

use serde::Serialize;

use crate::mass::{MassTable, Scaled, VALID_AA};

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ModificationSpecificity {
    PeptideN(Option<u8>),
    PeptideC(Option<u8>),
    ProteinN(Option<u8>),
    ProteinC(Option<u8>),
    Residue(u8),
}

impl ModificationSpecificity {
    fn accepts(&self, aa: u8) -> bool {
        match self {
            Self::PeptideN(r) | Self::PeptideC(r) | Self::ProteinN(r) | Self::ProteinC(r) => {
                r.map(|r| r == aa).unwrap_or(true)
            }
            Self::Residue(r) => *r == aa,
        }
    }
}

impl Display for ModificationSpecificity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let r = match self {
            ModificationSpecificity::PeptideN(r) => {
                f.write_char('^')?;
                *r
            }
            ModificationSpecificity::PeptideC(r) => {
                f.write_char('$')?;
                *r
            }
            ModificationSpecificity::ProteinN(r) => {
                f.write_char('[')?;
                *r
            }
            ModificationSpecificity::ProteinC(r) => {
                f.write_char(']')?;
                *r
            }
            ModificationSpecificity::Residue(r) => Some(*r),
        };

        if let Some(r) = r {
            f.write_char(r as char)?;
        }

        Ok(())
    }
}

impl Serialize for ModificationSpecificity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InvalidModification {
    Empty,
    InvalidResidue(char),
    TooLong(String),
}

impl FromStr for ModificationSpecificity {
    type Err = InvalidModification;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() > 2 {
            return Err(InvalidModification::TooLong(s.into()));
        }
        let residue = |rest: &str| -> Result<Option<u8>, InvalidModification> {
            match rest.chars().next() {
                Some(c) if VALID_AA.contains(&(c as u8)) => Ok(Some(c as u8)),
                Some(c) => Err(InvalidModification::InvalidResidue(c)),
                None => Ok(None),
            }
        };
        if let Some(rest) = s.strip_prefix('^') {
            return residue(rest).map(ModificationSpecificity::PeptideN);
        }
        if let Some(rest) = s.strip_prefix('$') {
            return residue(rest).map(ModificationSpecificity::PeptideC);
        }
        if let Some(rest) = s.strip_prefix('[') {
            return residue(rest).map(ModificationSpecificity::ProteinN);
        }
        if let Some(rest) = s.strip_prefix(']') {
            return residue(rest).map(ModificationSpecificity::ProteinC);
        }
        if s.len() > 1 {
            return Err(InvalidModification::TooLong(s.into()));
        }
        match residue(s)? {
            Some(c) => Ok(ModificationSpecificity::Residue(c)),
            None => Err(InvalidModification::Empty),
        }
    }
}

fn report_invalid(err: InvalidModification) {
    match err {
        InvalidModification::Empty => {
            log::error!("Skipping invalid modification string: empty")
        }
        InvalidModification::InvalidResidue(c) => {
            log::error!(
                "Skipping invalid modification string: unrecognized residue ({})",
                c
            )
        }
        InvalidModification::TooLong(s) => {
            log::error!("Skipping invalid modification string: {} is too long", s)
        }
    }
}

pub fn validate_mods(input: Option<HashMap<String, f32>>) -> HashMap<ModificationSpecificity, f32> {
    let mut output = HashMap::new();
    for (s, mass) in input.unwrap_or_default() {
        match ModificationSpecificity::from_str(&s) {
            Ok(m) => {
                output.insert(m, mass);
            }
            Err(e) => report_invalid(e),
        }
    }
    output
}

pub fn validate_var_mods(
    input: Option<HashMap<String, Vec<f32>>>,
) -> HashMap<ModificationSpecificity, Vec<f32>> {
    let mut output = HashMap::new();
    for (s, mass) in input.unwrap_or_default() {
        match ModificationSpecificity::from_str(&s) {
            Ok(m) => {
                output.insert(m, mass);
            }
            Err(e) => report_invalid(e),
        }
    }
    output
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct Modification {
    pub specificity: ModificationSpecificity,
    /// Mass delta in Da
    pub mass: f32,
    #[serde(skip_serializing)]
    pub delta: Scaled,
    pub fixed: bool,
}

impl Display for Modification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.mass.is_sign_positive() {
            write!(f, "{}[+{}]", self.specificity, self.mass)
        } else {
            write!(f, "{}[{}]", self.specificity, self.mass)
        }
    }
}

/// One place on a sequence where a modification may (variable) or must
/// (fixed) be applied
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ModSite {
    /// Absolute index of the modified residue in the protein sequence
    pub position: usize,
    /// Index into [`ModificationSet::modifications`]
    pub modification: usize,
    pub delta: Scaled,
    pub fixed: bool,
}

/// All configured modifications, grouped by how they attach to a sequence
#[derive(Clone, Debug, Default)]
pub struct ModificationSet {
    modifications: Vec<Modification>,
    by_residue: Vec<Vec<usize>>,
    peptide_n: Vec<usize>,
    peptide_c: Vec<usize>,
    protein_n: Vec<usize>,
    protein_c: Vec<usize>,
}

impl ModificationSet {
    pub fn new(
        fixed: &HashMap<ModificationSpecificity, f32>,
        variable: &HashMap<ModificationSpecificity, Vec<f32>>,
        table: &MassTable,
    ) -> Self {
        let mut modifications = fixed
            .iter()
            .map(|(&specificity, &mass)| (specificity, mass, true))
            .chain(
                variable
                    .iter()
                    .flat_map(|(&s, masses)| masses.iter().map(move |&m| (s, m, false))),
            )
            .map(|(specificity, mass, fixed)| Modification {
                specificity,
                mass,
                delta: table.scale(mass as f64),
                fixed,
            })
            .collect::<Vec<_>>();

        // HashMap iteration order is random, keep site numbering reproducible
        modifications.sort_by(|a, b| {
            b.fixed
                .cmp(&a.fixed)
                .then_with(|| a.specificity.cmp(&b.specificity))
                .then_with(|| a.mass.total_cmp(&b.mass))
        });

        let mut set = ModificationSet {
            by_residue: vec![Vec::new(); 26],
            ..Default::default()
        };
        for (idx, m) in modifications.iter().enumerate() {
            match m.specificity {
                ModificationSpecificity::Residue(r) => {
                    if let Some(slot) = set.by_residue.get_mut(r.wrapping_sub(b'A') as usize) {
                        slot.push(idx);
                    }
                }
                ModificationSpecificity::PeptideN(_) => set.peptide_n.push(idx),
                ModificationSpecificity::PeptideC(_) => set.peptide_c.push(idx),
                ModificationSpecificity::ProteinN(_) => set.protein_n.push(idx),
                ModificationSpecificity::ProteinC(_) => set.protein_c.push(idx),
            }
        }
        set.modifications = modifications;
        set
    }

    pub fn modifications(&self) -> &[Modification] {
        &self.modifications
    }

    pub fn is_empty(&self) -> bool {
        self.modifications.is_empty()
    }

    /// Push the sites at `position` for every modification in `groups`
    /// accepting `aa`. When any fixed modification applies, variable
    /// modifications of the same attachment class are not offered there.
    fn push_sites(&self, groups: &[&[usize]], aa: u8, position: usize, out: &mut Vec<ModSite>) {
        let matching = || {
            groups
                .iter()
                .flat_map(|g| g.iter())
                .copied()
                .filter(move |&idx| self.modifications[idx].specificity.accepts(aa))
        };
        let any_fixed = matching().any(|idx| self.modifications[idx].fixed);
        for idx in matching() {
            let m = &self.modifications[idx];
            if any_fixed && !m.fixed {
                continue;
            }
            out.push(ModSite {
                position,
                modification: idx,
                delta: m.delta,
                fixed: m.fixed,
            });
        }
    }

    /// Residue-specific sites on `protein[start..end]`
    pub fn residue_sites(&self, protein: &[u8], start: usize, end: usize, out: &mut Vec<ModSite>) {
        for (position, &aa) in protein.iter().enumerate().take(end).skip(start) {
            if let Some(group) = self.by_residue.get(aa.wrapping_sub(b'A') as usize) {
                if !group.is_empty() {
                    self.push_sites(&[group.as_slice()], aa, position, out);
                }
            }
        }
    }

    /// Sites on the first residue of a peptide starting at `start`. Protein
    /// N-terminal modifications are only offered when the peptide starts the protein.
    pub fn n_terminal_sites(&self, protein: &[u8], start: usize, out: &mut Vec<ModSite>) {
        let aa = match protein.get(start) {
            Some(&aa) => aa,
            None => return,
        };
        if start == 0 {
            self.push_sites(&[&self.peptide_n[..], &self.protein_n[..]], aa, start, out);
        } else {
            self.push_sites(&[&self.peptide_n[..]], aa, start, out);
        }
    }

    /// Sites on the last residue of a peptide ending (exclusive) at `end`
    pub fn c_terminal_sites(&self, protein: &[u8], end: usize, out: &mut Vec<ModSite>) {
        let position = match end.checked_sub(1) {
            Some(p) if p < protein.len() => p,
            _ => return,
        };
        let aa = protein[position];
        if end == protein.len() {
            self.push_sites(&[&self.peptide_c[..], &self.protein_c[..]], aa, position, out);
        } else {
            self.push_sites(&[&self.peptide_c[..]], aa, position, out);
        }
    }
}

/// One modified form of a peptide: its neutral mass (water included) and
/// a bitmask over the candidate's sites saying which are applied
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MassAndMask {
    pub mass: Scaled,
    pub mask: u64,
}

/// Enumerate the modified forms of a peptide with unmodified mass `base`.
///
/// Fixed sites are always applied. Subsets of the variable sites are
/// generated in order of increasing size, up to `max_mods` at a time, and
/// generation stops after `limit` forms. The output is sorted by mass.
/// Returns `true` when the limit cut the enumeration short.
pub fn combinations(
    sites: &[ModSite],
    base: Scaled,
    max_mods: usize,
    limit: usize,
    out: &mut Vec<MassAndMask>,
) -> bool {
    out.clear();
    let mut fixed_mask = 0u64;
    let mut fixed_mass = base;
    let mut variable = Vec::new();
    for (bit, site) in sites.iter().enumerate().take(64) {
        if site.fixed {
            fixed_mask |= 1 << bit;
            fixed_mass += site.delta;
        } else {
            variable.push(bit);
        }
    }

    let mut truncated = false;
    let mut idx = Vec::with_capacity(max_mods);
    'outer: for k in 0..=max_mods.min(variable.len()) {
        // lexicographic k-subsets of `variable`
        idx.clear();
        idx.extend(0..k);
        loop {
            if out.len() == limit {
                truncated = true;
                break 'outer;
            }
            let mut mask = fixed_mask;
            let mut mass = fixed_mass;
            for &i in &idx {
                mask |= 1 << variable[i];
                mass += sites[variable[i]].delta;
            }
            out.push(MassAndMask { mass, mask });

            // advance to the next subset
            let n = variable.len();
            let mut j = k;
            while j > 0 && idx[j - 1] == n - k + j - 1 {
                j -= 1;
            }
            if j == 0 {
                break;
            }
            idx[j - 1] += 1;
            for l in j..k {
                idx[l] = idx[l - 1] + 1;
            }
        }
    }

    out.sort_by_key(|m| m.mass);
    truncated
}
