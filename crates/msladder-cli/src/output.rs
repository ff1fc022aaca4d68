use msladder_core::search::{ScoredHit, SpectrumResult};
use rayon::prelude::*;

use crate::runner::Runner;

const HEADERS: [&str; 17] = [
    "spectrum_id",
    "spectrum",
    "charge_state",
    "error_code",
    "rank",
    "peptide",
    "sequence",
    "evalue",
    "pvalue",
    "charge",
    "matched_ions",
    "threshold",
    "calcmass",
    "expmass",
    "missed_cleavages",
    "proteins",
    "start",
];

fn accession(header: &str) -> &str {
    header.split_ascii_whitespace().next().unwrap_or_default()
}

impl Runner {
    /// One row per hit. Spectra without hits (including those that could not
    /// be searched) get a single row with empty hit columns
    pub fn serialize_result(&self, result: &SpectrumResult) -> Vec<csv::ByteRecord> {
        let spectrum = |record: &mut csv::ByteRecord| {
            record.push_field(itoa::Buffer::new().format(result.id).as_bytes());
            record.push_field(result.name.as_bytes());
            record.push_field(charge_state(result).as_bytes());
            match result.error_code {
                Some(code) => record.push_field(itoa::Buffer::new().format(code).as_bytes()),
                None => record.push_field(b""),
            }
        };

        if result.hits.is_empty() {
            let mut record = csv::ByteRecord::new();
            spectrum(&mut record);
            for _ in 4..HEADERS.len() {
                record.push_field(b"");
            }
            return vec![record];
        }

        result
            .hits
            .iter()
            .enumerate()
            .map(|(rank, hit)| {
                let mut record = csv::ByteRecord::new();
                spectrum(&mut record);
                self.serialize_hit(&mut record, rank + 1, hit);
                record
            })
            .collect()
    }

    fn serialize_hit(&self, record: &mut csv::ByteRecord, rank: usize, hit: &ScoredHit) {
        record.push_field(itoa::Buffer::new().format(rank).as_bytes());
        record.push_field(hit.peptide.as_bytes());
        record.push_field(hit.sequence.as_bytes());
        record.push_field(ryu::Buffer::new().format(hit.evalue).as_bytes());
        record.push_field(ryu::Buffer::new().format(hit.pvalue).as_bytes());
        record.push_field(itoa::Buffer::new().format(hit.charge).as_bytes());
        record.push_field(itoa::Buffer::new().format(hit.hits).as_bytes());
        record.push_field(ryu::Buffer::new().format(hit.threshold).as_bytes());
        record.push_field(ryu::Buffer::new().format(hit.theoretical_mass).as_bytes());
        record.push_field(ryu::Buffer::new().format(hit.experimental_mass).as_bytes());
        record.push_field(itoa::Buffer::new().format(hit.missed_cleavages).as_bytes());
        let proteins = hit
            .locations
            .iter()
            .map(|loc| accession(&loc.header))
            .collect::<Vec<_>>()
            .join(";");
        record.push_field(proteins.as_bytes());
        let starts = hit
            .locations
            .iter()
            .map(|loc| itoa::Buffer::new().format(loc.start + 1).to_string())
            .collect::<Vec<_>>()
            .join(";");
        record.push_field(starts.as_bytes());
    }

    pub fn write_results(&self, results: &[SpectrumResult]) -> anyhow::Result<String> {
        let path = self.make_path("results.msladder.tsv");

        let mut wtr = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(vec![]);

        wtr.write_byte_record(&csv::ByteRecord::from(HEADERS.to_vec()))?;
        for record in results
            .par_iter()
            .flat_map_iter(|result| self.serialize_result(result))
            .collect::<Vec<_>>()
        {
            wtr.write_byte_record(&record)?;
        }

        wtr.flush()?;
        let bytes = wtr.into_inner()?;
        std::fs::write(&path, bytes)?;
        Ok(path.display().to_string())
    }
}

fn charge_state(result: &SpectrumResult) -> String {
    let charges = result
        .charges
        .iter()
        .map(|z| itoa::Buffer::new().format(*z).to_string())
        .collect::<Vec<_>>()
        .join(",");
    match serde_json::to_value(result.charge_state) {
        Ok(serde_json::Value::String(state)) => format!("{}:{}", state, charges),
        _ => charges,
    }
}
