use std::fs;
use std::path::Path;
use std::process::Command;

use tempfile::tempdir;

fn write_prediction_dir(dir: &Path) {
    fs::create_dir_all(dir).expect("create prediction dir");
    for source in ["CCLE", "gCSI"] {
        for target in ["CCLE", "gCSI"] {
            for split in 0..3 {
                for (m, model) in ["deepcdr", "lgbm"].iter().enumerate() {
                    let mut text = String::from("improve_sample_id,auc_true,auc_pred\n");
                    for i in 0..12 {
                        let truth = (i as f64 * 0.37 + split as f64 * 0.11).sin().abs();
                        let shift = if source == target { 0.02 } else { 0.15 };
                        let wobble = ((i + m * 5 + split) % 4) as f64 * shift;
                        text.push_str(&format!("{target}_{i},{truth},{}\n", truth + wobble));
                    }
                    let name = format!("{source}_{target}_split_{split}_{model}.csv");
                    fs::write(dir.join(name), text).expect("write prediction file");
                }
            }
        }
    }
}

#[test]
fn run_writes_the_full_artifact_tree() {
    let tmp = tempdir().expect("temporary directory");
    let input = tmp.path().join("predictions");
    let output = tmp.path().join("results");
    write_prediction_dir(&input);

    let overlaps = tmp.path().join("overlap.csv");
    fs::write(
        &overlaps,
        "source,target,shared_drugs,shared_cells,target_drugs,target_cells\n\
CCLE,CCLE,24,400,24,400\n\
CCLE,gCSI,10,180,16,310\n\
gCSI,CCLE,12,170,24,400\n\
gCSI,gCSI,16,310,16,310\n",
    )
    .expect("write overlap counts");

    let exe = env!("CARGO_BIN_EXE_crossgen");
    let status = Command::new(exe)
        .args([
            "run",
            "--input",
            input.to_str().expect("path str"),
            "--output",
            output.to_str().expect("path str"),
            "--overlaps",
            overlaps.to_str().expect("path str"),
        ])
        .status()
        .expect("run crossgen cli");

    assert!(status.success(), "CLI exited with status {status:?}");
    for file in [
        "scores.csv",
        "missing.csv",
        "significance.csv",
        "coverage_correlation.csv",
        "matrices/G_lgbm_r2.csv",
        "matrices/G_deepcdr_mae.csv",
        "normalized/Gn_lgbm_r2.csv",
        "normalized/aggregates.csv",
        "normalized/summary.csv",
    ] {
        assert!(output.join(file).exists(), "{file} missing");
    }
    let missing = fs::read_to_string(output.join("missing.csv")).expect("read missing list");
    assert_eq!(missing.lines().count(), 1, "no combination should be missing");
}

#[test]
fn stages_can_be_run_one_at_a_time() {
    let tmp = tempdir().expect("temporary directory");
    let input = tmp.path().join("predictions");
    let output = tmp.path().join("results");
    write_prediction_dir(&input);
    let exe = env!("CARGO_BIN_EXE_crossgen");

    let stage = |name: &str| {
        Command::new(exe)
            .args([
                name,
                "--input",
                input.to_str().expect("path str"),
                "--output",
                output.to_str().expect("path str"),
            ])
            .status()
            .expect("run crossgen cli")
    };

    let status = stage("matrices");
    assert!(!status.success(), "matrices must fail before scores exist");

    for name in ["scores", "matrices", "normalize", "significance"] {
        let status = stage(name);
        assert!(status.success(), "{name} exited with status {status:?}");
    }
    assert!(output.join("matrices/G_deepcdr_scc.csv").exists());
    assert!(output.join("normalized/summary.csv").exists());
    assert!(!output.join("coverage_correlation.csv").exists());
}

#[test]
fn configuration_file_and_strict_flag_are_honored() {
    let tmp = tempdir().expect("temporary directory");
    let input = tmp.path().join("predictions");
    let output = tmp.path().join("results");
    write_prediction_dir(&input);
    fs::remove_file(input.join("gCSI_CCLE_split_1_lgbm.csv")).expect("remove one file");

    let config = tmp.path().join("crossgen.toml");
    fs::write(
        &config,
        format!(
            "[input]\npredictions_dir = {:?}\n\n[output]\nroot = {:?}\n\n[scoring]\nmetrics = [\"r2\", \"scc\"]\n",
            input.to_str().expect("path str"),
            output.to_str().expect("path str")
        ),
    )
    .expect("write config");

    let exe = env!("CARGO_BIN_EXE_crossgen");
    let lenient = Command::new(exe)
        .args(["scores", "--config", config.to_str().expect("path str")])
        .status()
        .expect("run crossgen cli");
    assert!(lenient.success(), "CLI exited with status {lenient:?}");
    let missing = fs::read_to_string(output.join("missing.csv")).expect("read missing list");
    assert!(missing.contains("gCSI,CCLE,1,lgbm"));
    let scores = fs::read_to_string(output.join("scores.csv")).expect("read scores");
    assert!(!scores.contains(",mse,"));

    let strict = Command::new(exe)
        .args([
            "scores",
            "--config",
            config.to_str().expect("path str"),
            "--strict-missing",
        ])
        .output()
        .expect("run crossgen cli");
    assert_eq!(strict.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&strict.stderr);
    assert!(stderr.contains("Error:"), "unexpected stderr: {stderr}");
}

#[test]
fn malformed_prediction_file_is_reported() {
    let tmp = tempdir().expect("temporary directory");
    let input = tmp.path().join("predictions");
    fs::create_dir_all(&input).expect("create prediction dir");
    fs::write(
        input.join("CCLE_CCLE_split_0_lgbm.csv"),
        "improve_sample_id,auc_true\nCCLE_0,0.4\n",
    )
    .expect("write prediction file");

    let exe = env!("CARGO_BIN_EXE_crossgen");
    let result = Command::new(exe)
        .args([
            "scores",
            "--input",
            input.to_str().expect("path str"),
            "--output",
            tmp.path().join("results").to_str().expect("path str"),
        ])
        .output()
        .expect("run crossgen cli");
    assert_eq!(result.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&result.stderr);
    assert!(stderr.contains("auc_pred"), "unexpected stderr: {stderr}");
}
