use msladder_cli::input::Input;
use msladder_cli::runner::Runner;

#[test]
fn integration() -> anyhow::Result<()> {
    let output = std::env::temp_dir().join("msladder-cli-integration");
    let input: Input = serde_json::from_str(&format!(
        r#"{{
            "search": {{
                "product_tol": 0.02,
                "precursor_tol": 0.05,
                "static_mods": {{"C": 57.021464}},
                "single_num": 10,
                "double_num": 10,
                "use_spectrum_charge": true
            }},
            "fasta": "../../tests/ACDEK.fasta",
            "spectra_paths": ["../../tests/ACDEK.dta"],
            "output_directory": {:?}
        }}"#,
        output.display().to_string()
    ))?;

    let runner = input.build().and_then(Runner::new)?;
    let results = runner.run()?;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].name, "ACDEK");
    assert_eq!(results[0].hits[0].peptide, "ACDEK");
    assert_eq!(results[0].hits[0].hits, 8);

    let tsv = std::fs::read_to_string(output.join("results.msladder.tsv"))?;
    let mut lines = tsv.lines();
    assert!(lines.next().unwrap().starts_with("spectrum_id\tspectrum\t"));
    let row = lines.next().unwrap().split('\t').collect::<Vec<_>>();
    assert_eq!(row[1], "ACDEK");
    assert_eq!(row[2], "supplied:1");
    assert_eq!(row[5], "ACDEK");
    assert_eq!(row[15], "sp|P00001|TEST_HUMAN");
    assert_eq!(row[16], "5");
    assert!(output.join("results.json").exists());
    Ok(())
}

#[test]
fn config_file() -> anyhow::Result<()> {
    let input = Input::load("../../tests/config.json")?;
    let search = input.build()?;
    assert_eq!(search.spectra_paths, vec!["tests/ACDEK.dta".to_string()]);
    assert_eq!(search.search.variable_mods.len(), 1);
    Ok(())
}
