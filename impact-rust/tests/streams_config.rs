use std::fs;

use impact_rust::error::ImpactError;
use impact_rust::streams::load_streams;
use tempfile::tempdir;

#[test]
fn test_same_streams_in_every_format() {
    let dir = tempdir().unwrap();

    let json = dir.path().join("impact.json");
    fs::write(
        &json,
        r#"{"NZ_WEL_10_HHZ": {"calibration": {"sensitivity": 2.5}, "label": "Wellington",
            "thresholds": [{"amplitude": 0.0, "level": 0}, {"amplitude": 0.1, "level": 3}]}}"#,
    )
    .unwrap();

    let toml = dir.path().join("impact.toml");
    fs::write(
        &toml,
        r#"[NZ_WEL_10_HHZ]
label = "Wellington"
calibration = { sensitivity = 2.5 }
thresholds = [{ amplitude = 0.0, level = 0 }, { amplitude = 0.1, level = 3 }]
"#,
    )
    .unwrap();

    let yaml = dir.path().join("impact.yml");
    fs::write(
        &yaml,
        r#"NZ_WEL_10_HHZ:
  label: Wellington
  calibration: { sensitivity: 2.5 }
  thresholds: [{ amplitude: 0.0, level: 0 }, { amplitude: 0.1, level: 3 }]
"#,
    )
    .unwrap();

    let from_json = load_streams(&json).unwrap();
    assert_eq!(from_json, load_streams(&toml).unwrap());
    assert_eq!(from_json, load_streams(&yaml).unwrap());

    let wel = &from_json["NZ_WEL_10_HHZ"];
    assert_eq!(wel.label.as_deref(), Some("Wellington"));
    assert_eq!(wel.calibration.units, "m/s");
    assert_eq!(wel.thresholds.len(), 2);
    assert_eq!(wel.probation, None);
}

#[test]
fn test_duplicate_key_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("impact.json");
    let entry = r#"{"calibration": {"sensitivity": 1.0}, "thresholds": [{"amplitude": 0, "level": 0}]}"#;
    fs::write(&path, format!(r#"{{"A_B__HHZ": {entry}, "A_B__HHZ": {entry}}}"#)).unwrap();

    let err = load_streams(&path).unwrap_err();
    assert!(matches!(err, ImpactError::Config(_)));
    assert!(err.to_string().contains("duplicate stream key"));
}

#[test]
fn test_decreasing_thresholds_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("impact.json");
    fs::write(
        &path,
        r#"{"A_B__HHZ": {"calibration": {"sensitivity": 1.0},
            "thresholds": [{"amplitude": 10, "level": 1}, {"amplitude": 5, "level": 2}]}}"#,
    )
    .unwrap();

    let err = load_streams(&path).unwrap_err();
    assert!(err.is_fatal());
}

#[test]
fn test_missing_file_is_fatal() {
    let dir = tempdir().unwrap();
    let err = load_streams(&dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, ImpactError::Config(_)));
}
