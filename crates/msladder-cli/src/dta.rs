//! Reader for DTA peak lists.
//!
//! Each spectrum starts with a `M+H charge` line followed by `m/z intensity`
//! lines. A file may hold several spectra separated by blank lines.

use std::path::Path;

use anyhow::{bail, Context};
use msladder_core::mass::PROTON;
use msladder_core::spectrum::RawSpectrum;

fn pair(line: &str) -> Option<(f64, f64)> {
    let mut fields = line.split_ascii_whitespace();
    let a = fields.next()?.parse().ok()?;
    let b = fields.next()?.parse().ok()?;
    Some((a, b))
}

/// Precursor m/z from a DTA `M+H` value. A charge of 0 means unknown and the
/// value is used as is.
pub fn precursor_mz(mh: f64, charge: u8) -> f64 {
    match charge {
        0 => mh,
        z => (mh - PROTON + z as f64 * PROTON) / z as f64,
    }
}

/// Parse the contents of a DTA file. Spectra are numbered from `first_id`
/// and named `name`, with a `.n` suffix when the file holds more than one
pub fn parse(contents: &str, name: &str, first_id: usize) -> anyhow::Result<Vec<RawSpectrum>> {
    let mut blocks: Vec<Vec<(usize, &str)>> = vec![Vec::new()];
    for (line_no, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            if blocks.last().map(|b| !b.is_empty()).unwrap_or(false) {
                blocks.push(Vec::new());
            }
            continue;
        }
        if let Some(block) = blocks.last_mut() {
            block.push((line_no + 1, line));
        }
    }
    blocks.retain(|b| !b.is_empty());

    let multiple = blocks.len() > 1;
    let mut spectra = Vec::with_capacity(blocks.len());
    for (n, block) in blocks.into_iter().enumerate() {
        let (header_no, header) = block[0];
        let (mh, charge) = pair(header)
            .with_context(|| format!("{}:{}: expected `M+H charge`", name, header_no))?;
        if charge < 0.0 || charge > u8::MAX as f64 || charge.fract() != 0.0 {
            bail!("{}:{}: invalid charge {}", name, header_no, charge);
        }
        let charge = charge as u8;

        let mut mz = Vec::with_capacity(block.len() - 1);
        let mut intensity = Vec::with_capacity(block.len() - 1);
        for &(line_no, line) in &block[1..] {
            let (m, i) =
                pair(line).with_context(|| format!("{}:{}: expected `m/z intensity`", name, line_no))?;
            mz.push(m);
            intensity.push(i.min(u32::MAX as f64) as f32);
        }

        spectra.push(RawSpectrum {
            id: first_id + n,
            name: match multiple {
                true => format!("{}.{}", name, n + 1),
                false => name.to_string(),
            },
            precursor_mz: precursor_mz(mh, charge),
            charge: (charge > 0).then_some(charge),
            mz,
            intensity,
        });
    }
    Ok(spectra)
}

pub fn read_dta<P: AsRef<Path>>(path: P, first_id: usize) -> anyhow::Result<Vec<RawSpectrum>> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read spectra from `{}`", path.display()))?;
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    parse(&contents, &name, first_id)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn single() {
        let spectra = parse("1243.6 2\n100.1 20\n200.2 30.5\n", "scan", 3).unwrap();
        assert_eq!(spectra.len(), 1);
        let s = &spectra[0];
        assert_eq!(s.id, 3);
        assert_eq!(s.name, "scan");
        assert_eq!(s.charge, Some(2));
        assert!((s.precursor_mz - (1243.6 + PROTON) / 2.0).abs() < 1e-9);
        assert_eq!(s.mz, vec![100.1, 200.2]);
        assert_eq!(s.intensity, vec![20.0, 30.5]);
    }

    #[test]
    fn batch() {
        let contents = "500.0 1\n100.0 1\n\n\n600.0 0\n150.0 2\n160.0 3\n";
        let spectra = parse(contents, "batch", 0).unwrap();
        assert_eq!(spectra.len(), 2);
        assert_eq!(spectra[0].name, "batch.1");
        assert_eq!(spectra[0].precursor_mz, 500.0);
        assert_eq!(spectra[1].id, 1);
        assert_eq!(spectra[1].charge, None);
        assert_eq!(spectra[1].mz.len(), 2);
    }

    #[test]
    fn malformed() {
        assert!(parse("500.0\n100.0 1\n", "x", 0).is_err());
        assert!(parse("500.0 1\n100.0 abc\n", "x", 0).is_err());
        assert!(parse("500.0 1.5\n", "x", 0).is_err());
    }
}
