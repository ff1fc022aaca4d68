use std::sync::Arc;

/// The minimal view of a protein sequence collection the search needs
pub trait SequenceSource: Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Residues of entry `idx`, upper case
    fn sequence(&self, idx: usize) -> &[u8];

    /// Taxonomy id of entry `idx`, if known
    fn taxonomy(&self, idx: usize) -> Option<u32>;

    /// Defline of entry `idx`, used only when building the report
    fn header(&self, idx: usize) -> &str;
}

#[derive(Clone, Debug, PartialEq)]
pub struct Protein {
    /// Header up to the first whitespace
    pub accession: Arc<String>,
    /// Full header line, without the leading `>`
    pub header: String,
    pub sequence: Vec<u8>,
    /// `OX=` field of UniProt style headers
    pub taxonomy: Option<u32>,
}

pub struct Fasta {
    pub targets: Vec<Protein>,
}

fn taxonomy(header: &str) -> Option<u32> {
    header
        .split_ascii_whitespace()
        .find_map(|field| field.strip_prefix("OX="))
        .and_then(|id| id.parse().ok())
}

impl Fasta {
    // Parse a string into a fasta database
    pub fn parse(contents: String) -> Fasta {
        let mut targets = Vec::new();
        let mut last_id: Option<&str> = None;
        let mut s = Vec::new();

        let push = |id: Option<&str>, seq: Vec<u8>, targets: &mut Vec<Protein>| {
            if seq.is_empty() {
                return;
            }
            let header = id.unwrap_or_default();
            targets.push(Protein {
                accession: Arc::new(
                    header
                        .split_ascii_whitespace()
                        .next()
                        .unwrap_or_default()
                        .to_string(),
                ),
                header: header.to_string(),
                sequence: seq,
                taxonomy: taxonomy(header),
            });
        };

        for line in contents.as_str().lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(id) = line.strip_prefix('>') {
                push(last_id, std::mem::take(&mut s), &mut targets);
                last_id = Some(id);
            } else {
                s.extend(
                    line.bytes()
                        .filter(|b| b.is_ascii_alphabetic())
                        .map(|b| b.to_ascii_uppercase()),
                );
            }
        }
        push(last_id, s, &mut targets);

        log::trace!("read {} sequences", targets.len());
        Fasta { targets }
    }
}

impl SequenceSource for Fasta {
    fn len(&self) -> usize {
        self.targets.len()
    }

    fn sequence(&self, idx: usize) -> &[u8] {
        &self.targets[idx].sequence
    }

    fn taxonomy(&self, idx: usize) -> Option<u32> {
        self.targets[idx].taxonomy
    }

    fn header(&self, idx: usize) -> &str {
        &self.targets[idx].header
    }
}
