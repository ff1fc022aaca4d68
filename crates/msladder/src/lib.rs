pub mod collection;
pub mod enzyme;
pub mod fasta;
pub mod hits;
pub mod ion_series;
pub mod mass;
pub mod modification;
pub mod parameters;
pub mod scoring;
pub mod search;
pub mod spectrum;

#[derive(Debug)]
pub enum Error {
    /// Too few peaks survived culling for the spectrum to be searched
    InsufficientPeaks { found: usize, required: usize },
    /// Non-positive precursor m/z or charge
    InvalidPrecursor,
    /// Modification enumeration for one peptide was truncated at `limit`
    CombinationOverflow { limit: usize },
    /// Too few peaks in range to define a peak density
    ScoringUndefined,
    /// Ladder could not be built for a peptide of this length
    LadderCapacity(usize),
    ConfigurationInvalid(String),
    Cancelled,
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl Error {
    /// Stable numeric code written next to spectra that could not be searched
    pub fn code(&self) -> u8 {
        match self {
            Self::InsufficientPeaks { .. } => 1,
            Self::InvalidPrecursor => 2,
            Self::CombinationOverflow { .. } => 3,
            Self::ScoringUndefined => 4,
            Self::LadderCapacity(_) => 5,
            Self::ConfigurationInvalid(_) => 6,
            Self::Cancelled => 7,
            Self::Io(_) => 8,
            Self::Json(_) => 9,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientPeaks { found, required } => write!(
                f,
                "insufficient peaks after culling: {} (at least {} required)",
                found, required
            ),
            Self::InvalidPrecursor => f.write_str("precursor m/z and charge must be positive"),
            Self::CombinationOverflow { limit } => {
                write!(f, "modification combinations truncated at {}", limit)
            }
            Self::ScoringUndefined => f.write_str("too few peaks to compute a peak density"),
            Self::LadderCapacity(len) => write!(f, "cannot build a ladder for length {}", len),
            Self::ConfigurationInvalid(msg) => write!(f, "invalid configuration: {}", msg),
            Self::Cancelled => f.write_str("search cancelled"),
            Self::Io(e) => e.fmt(f),
            Self::Json(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

pub fn read_fasta<S: AsRef<std::path::Path>>(path: S) -> Result<fasta::Fasta, Error> {
    let contents = std::fs::read_to_string(path)?;
    Ok(fasta::Fasta::parse(contents))
}

pub fn read_json<S, T>(path: S) -> Result<T, Error>
where
    S: AsRef<std::path::Path>,
    T: for<'de> serde::Deserialize<'de>,
{
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}
