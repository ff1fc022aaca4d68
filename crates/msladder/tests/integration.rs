//! Search a synthetic spectrum built from the b and y ions of a known peptide

use std::sync::atomic::AtomicBool;

use msladder_core::fasta::Fasta;
use msladder_core::ion_series::Kind;
use msladder_core::mass::{MassKind, MassTable, Scaled};
use msladder_core::parameters::Builder;
use msladder_core::search::SearchEngine;
use msladder_core::spectrum::RawSpectrum;

const FASTA: &str = r#"
>sp|P00001|TEST_HUMAN Synthetic test protein OS=Homo sapiens OX=9606
GGGRACDEKRGGG
>sp|P00002|OTHER_YEAST Unrelated protein OX=4932
MSLLKWNNPPRAAGG
"#;

const CARBAMIDOMETHYL: f32 = 57.021464;

fn engine(product_tol: f64, extra: &str) -> SearchEngine {
    let json = format!(
        r#"{{
            "product_tol": {},
            "precursor_tol": 0.05,
            "static_mods": {{"C": {}}},
            "cut_lo": 0.0,
            "single_num": 10,
            "double_num": 10,
            "use_spectrum_charge": true,
            "min_peaks": 4
            {}
        }}"#,
        product_tol, CARBAMIDOMETHYL, extra
    );
    let builder: Builder = serde_json::from_str(&json).unwrap();
    SearchEngine::new(builder.make_parameters().unwrap()).unwrap()
}

/// b and y ions of ACDEK with carbamidomethyl cysteine, at exactly the
/// fixed point masses the engine computes
fn spectrum() -> RawSpectrum {
    let table = MassTable::new(MassKind::Monoisotopic, 1000).unwrap();
    let residues = b"ACDEK"
        .iter()
        .map(|&aa| match aa {
            b'C' => table.residue(aa).unwrap() + table.scale(CARBAMIDOMETHYL as f64),
            _ => table.residue(aa).unwrap(),
        })
        .collect::<Vec<Scaled>>();
    let mut mz = Vec::new();
    for idx in 1..residues.len() {
        let b = residues[..idx].iter().sum::<Scaled>() + table.proton();
        let y = residues[idx..].iter().sum::<Scaled>() + table.water() + table.proton();
        mz.push(table.unscale(b));
        mz.push(table.unscale(y));
    }
    mz.sort_by(f64::total_cmp);
    RawSpectrum {
        id: 0,
        name: "ACDEK.1.1.1".into(),
        precursor_mz: 622.2501,
        charge: Some(1),
        intensity: vec![100.0; mz.len()],
        mz,
    }
}

#[test]
fn round_trip() {
    let engine = engine(0.0, "");
    let fasta = Fasta::parse(FASTA.into());
    let spectra = engine.prepare(&[spectrum()]);
    assert!(spectra[0].is_searchable());

    let results = engine
        .search(&fasta, &spectra, &AtomicBool::new(false))
        .unwrap();
    assert_eq!(results.len(), 1);
    let hits = &results[0].hits;
    assert_eq!(hits.len(), 1);

    let hit = &hits[0];
    assert_eq!(hit.sequence, "ACDEK");
    assert_eq!(hit.peptide, "ACDEK");
    assert_eq!(hit.charge, 1);
    assert_eq!(hit.hits, 2 * (5 - 1));
    assert!(hit.evalue < 1.0);
    assert_eq!(hit.locations.len(), 1);
    assert_eq!((hit.locations[0].start, hit.locations[0].end), (4, 9));
    assert!(hit.locations[0].header.starts_with("sp|P00001|TEST_HUMAN"));
    assert!((hit.theoretical_mass - 621.2428).abs() < 0.01);

    let b = hit.matches.iter().filter(|m| m.kind == Kind::B).count();
    let y = hit.matches.iter().filter(|m| m.kind == Kind::Y).count();
    assert_eq!((b, y), (4, 4));
}

#[test]
fn taxonomy_filter() {
    let engine = engine(0.02, r#", "taxonomy": [4932]"#);
    let fasta = Fasta::parse(FASTA.into());
    let spectra = engine.prepare(&[spectrum()]);
    let results = engine
        .search(&fasta, &spectra, &AtomicBool::new(false))
        .unwrap();
    assert!(results[0].hits.is_empty());
}

#[test]
fn variable_modification_is_reported() {
    // the same spectrum, but cysteine only carbamidomethylated as a variable mod
    let json = r#"{
        "product_tol": 0.02,
        "precursor_tol": 0.05,
        "variable_mods": {"C": [57.0215]},
        "single_num": 10,
        "double_num": 10,
        "use_spectrum_charge": true
    }"#;
    let builder: Builder = serde_json::from_str(json).unwrap();
    let engine = SearchEngine::new(builder.make_parameters().unwrap()).unwrap();
    let fasta = Fasta::parse(FASTA.into());
    let spectra = engine.prepare(&[spectrum()]);
    let results = engine
        .search(&fasta, &spectra, &AtomicBool::new(false))
        .unwrap();

    let hit = &results[0].hits[0];
    assert_eq!(hit.peptide, "AC[+57.0215]DEK");
    assert_eq!(hit.mods, vec![(1, 57.0215)]);
    assert_eq!(hit.hits, 8);
}
