// Integration tests for saving and restoring model state on disk.

use approx::assert_relative_eq;
use gan_networks::architecture::{build_model, ArchitectureConfig, LayerConfig};
use gan_networks::config::ModelConfig;
use gan_networks::state::{load_state, save_state, StateDict};
use gan_networks::{NetworkError, Tensor};
use std::io::Write;
use tempfile::NamedTempFile;

fn architecture() -> ArchitectureConfig {
    ArchitectureConfig {
        layers: vec![
            LayerConfig::dense(&[3], 4, "lrelu").with_batch_norm(),
            LayerConfig::dropout(0.2),
            LayerConfig::dense(&[4], 2, "tanh"),
        ],
    }
}

#[test]
fn test_save_and_load_model_state() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut source = build_model(&architecture(), &ModelConfig::with_seed(1)).unwrap();
    let input = Tensor::from_vec(vec![2, 3], vec![0.1, -0.4, 0.9, 1.2, 0.0, -0.3]).unwrap();
    let output = source.forward(&input).unwrap();
    source.backward(&Tensor::full(output.shape(), 1.0)).unwrap();
    source.apply_deltas(0.1).unwrap();
    source.set_training(false);

    let file = NamedTempFile::new().unwrap();
    save_state(&source.export_state(), file.path()).unwrap();

    let mut target = build_model(&architecture(), &ModelConfig::with_seed(2)).unwrap();
    target.set_training(false);
    target.import_state(&load_state(file.path()).unwrap()).unwrap();

    let expected = source.forward(&input).unwrap();
    let actual = target.forward(&input).unwrap();
    for (a, b) in expected.data().iter().zip(actual.data()) {
        assert_relative_eq!(*a, *b, epsilon = 1e-6);
    }
}

#[test]
fn test_flat_keys_on_disk() {
    let model = build_model(&architecture(), &ModelConfig::default()).unwrap();
    let json = model.export_state().to_json().unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    let tensors = value["tensors"].as_object().unwrap();

    let mut keys: Vec<_> = tensors.keys().cloned().collect();
    keys.sort();
    assert_eq!(
        keys,
        vec![
            "layer_0_B",
            "layer_0_W",
            "layer_0_running_mean",
            "layer_0_running_var",
            "layer_0_scale",
            "layer_0_shift",
            "layer_2_B",
            "layer_2_W",
        ]
    );
    assert_eq!(tensors["layer_2_W"]["shape"], serde_json::json!([4, 2]));
}

#[test]
fn test_load_rejects_unknown_key() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(br#"{ "tensors": { "layer_0_gamma": { "shape": [1], "data": [1.0] } } }"#)
        .unwrap();
    assert!(matches!(
        load_state(file.path()),
        Err(NetworkError::InvalidStateKey { .. })
    ));
}

#[test]
fn test_load_rejects_truncated_tensor() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(br#"{ "tensors": { "layer_0_W": { "shape": [2, 2], "data": [1.0] } } }"#)
        .unwrap();
    assert!(matches!(
        load_state(file.path()),
        Err(NetworkError::ShapeMismatch { .. })
    ));
}

#[test]
fn test_truncated_snapshot_never_reaches_model() {
    let config = ArchitectureConfig {
        layers: vec![LayerConfig::dense(&[2], 2, "linear")],
    };
    let mut model = build_model(&config, &ModelConfig::default()).unwrap();
    let before = model.export_state();

    let json = r#"{ "tensors": {
        "layer_0_W": { "shape": [2, 2], "data": [1.0] },
        "layer_0_B": { "shape": [2], "data": [0.0, 0.0] }
    } }"#;
    let result = StateDict::from_json(json).and_then(|state| model.import_state(&state));
    assert!(matches!(result, Err(NetworkError::ShapeMismatch { .. })));

    assert_eq!(model.export_state(), before);
    let output = model.forward(&Tensor::full(&[1, 2], 1.0)).unwrap();
    assert_eq!(output.shape(), &[1, 2]);
}

#[test]
fn test_load_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.json");
    assert!(matches!(load_state(&path), Err(NetworkError::Io(_))));
}

#[test]
fn test_empty_state_round_trip() {
    let file = NamedTempFile::new().unwrap();
    save_state(&StateDict::new(), file.path()).unwrap();
    assert!(load_state(file.path()).unwrap().is_empty());
}
