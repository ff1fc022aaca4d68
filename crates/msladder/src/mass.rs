use serde::{Deserialize, Serialize};

use crate::Error;

pub const H2O: f64 = 18.010565;
pub const H2O_AVERAGE: f64 = 18.01528;
pub const PROTON: f64 = 1.0072764;
pub const NH3: f64 = 17.026548;
pub const H: f64 = 1.007825;
pub const CO: f64 = 27.994915;

/// Fixed-point mass: a mass in Da multiplied by the table scale and rounded
pub type Scaled = i32;

/// Heaviest mass (Da) that must survive scaling into a [`Scaled`]
const MAX_REPRESENTABLE: f64 = 10_000.0;

pub const VALID_AA: [u8; 25] = [
    b'A', b'B', b'C', b'D', b'E', b'F', b'G', b'H', b'I', b'J', b'K', b'L', b'M', b'N', b'O', b'P',
    b'Q', b'R', b'S', b'T', b'U', b'V', b'W', b'Y', b'Z',
];

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MassKind {
    Monoisotopic,
    Average,
}

impl Default for MassKind {
    fn default() -> Self {
        Self::Monoisotopic
    }
}

impl MassKind {
    fn residue(&self, aa: u8) -> Option<f64> {
        match self {
            MassKind::Monoisotopic => monoisotopic(aa),
            MassKind::Average => average(aa),
        }
    }

    fn water(&self) -> f64 {
        match self {
            MassKind::Monoisotopic => H2O,
            MassKind::Average => H2O_AVERAGE,
        }
    }
}

fn monoisotopic(aa: u8) -> Option<f64> {
    let mass = match aa {
        b'A' => 71.03711,
        b'R' => 156.1011,
        b'N' => 114.04293,
        b'D' => 115.02694,
        b'C' => 103.00919,
        b'E' => 129.04259,
        b'Q' => 128.05858,
        b'G' => 57.02146,
        b'H' => 137.05891,
        b'I' => 113.08406,
        b'L' => 113.08406,
        b'J' => 113.08406,
        b'K' => 128.09496,
        b'M' => 131.0405,
        b'F' => 147.0684,
        b'P' => 97.05276,
        b'S' => 87.03203,
        b'T' => 101.04768,
        b'W' => 186.07931,
        b'Y' => 163.06333,
        b'V' => 99.06841,
        b'U' => 150.95363,
        b'O' => 237.14773,
        // Ambiguity codes take the mean of their two members
        b'B' => 114.534935,
        b'Z' => 128.550585,
        _ => return None,
    };
    Some(mass)
}

fn average(aa: u8) -> Option<f64> {
    let mass = match aa {
        b'A' => 71.0788,
        b'R' => 156.1875,
        b'N' => 114.1038,
        b'D' => 115.0886,
        b'C' => 103.1388,
        b'E' => 129.1155,
        b'Q' => 128.1307,
        b'G' => 57.0519,
        b'H' => 137.1411,
        b'I' => 113.1594,
        b'L' => 113.1594,
        b'J' => 113.1594,
        b'K' => 128.1741,
        b'M' => 131.1926,
        b'F' => 147.1766,
        b'P' => 97.1167,
        b'S' => 87.0782,
        b'T' => 101.1051,
        b'W' => 186.2132,
        b'Y' => 163.1760,
        b'V' => 99.1326,
        b'U' => 150.0388,
        b'O' => 237.3018,
        b'B' => 114.5962,
        b'Z' => 128.6231,
        _ => return None,
    };
    Some(mass)
}

/// Per-residue masses in fixed point. Built once at startup and shared
/// by reference with everything that needs to compute a mass.
#[derive(Clone, Debug)]
pub struct MassTable {
    kind: MassKind,
    scale: i32,
    residues: [Option<Scaled>; 26],
    water: Scaled,
    proton: Scaled,
}

impl MassTable {
    pub fn new(kind: MassKind, scale: i32) -> Result<Self, Error> {
        if scale <= 0 || MAX_REPRESENTABLE * scale as f64 > i32::MAX as f64 {
            return Err(Error::ConfigurationInvalid(format!(
                "mass scale {} cannot represent masses up to {} Da",
                scale, MAX_REPRESENTABLE
            )));
        }

        let to_scaled = |mass: f64| (mass * scale as f64).round() as Scaled;

        let mut residues = [None; 26];
        for (slot, aa) in residues.iter_mut().zip(b'A'..=b'Z') {
            *slot = kind.residue(aa).map(to_scaled);
        }

        Ok(MassTable {
            kind,
            scale,
            residues,
            water: to_scaled(kind.water()),
            proton: to_scaled(PROTON),
        })
    }

    /// Scaled residue mass, or `None` for letters without a defined mass (e.g. `X`)
    #[inline]
    pub fn residue(&self, aa: u8) -> Option<Scaled> {
        self.residues
            .get(aa.wrapping_sub(b'A') as usize)
            .copied()
            .flatten()
    }

    /// Sum of residue masses over `sequence`, `None` if any residue is undefined
    pub fn residues(&self, sequence: &[u8]) -> Option<Scaled> {
        sequence
            .iter()
            .try_fold(0, |acc, &aa| Some(acc + self.residue(aa)?))
    }

    #[inline]
    pub fn scale(&self, mass: f64) -> Scaled {
        (mass * self.scale as f64).round() as Scaled
    }

    #[inline]
    pub fn unscale(&self, mass: Scaled) -> f64 {
        mass as f64 / self.scale as f64
    }

    pub fn factor(&self) -> i32 {
        self.scale
    }

    pub fn kind(&self) -> MassKind {
        self.kind
    }

    pub fn water(&self) -> Scaled {
        self.water
    }

    pub fn proton(&self) -> Scaled {
        self.proton
    }
}
