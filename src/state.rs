//! State snapshots
//!
//! A [`StateDict`] maps `(layer index, field)` to a tensor. In memory the key is
//! structured; the flat string form (`layer_3_W`, `layer_0_running_var`, ...) only
//! appears at the storage boundary via [`StateDict::to_flat`],
//! [`StateDict::from_flat`] and the JSON helpers.

use crate::error::{NetworkError, Result};
use crate::tensor::{RawTensor, Tensor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

/// Role of a persisted tensor within its layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StateField {
    Weights,
    Biases,
    Scale,
    Shift,
    RunningMean,
    RunningVar,
}

impl StateField {
    pub const PARAMETERS: [StateField; 2] = [StateField::Weights, StateField::Biases];
    pub const STATISTICS: [StateField; 4] = [
        StateField::Scale,
        StateField::Shift,
        StateField::RunningMean,
        StateField::RunningVar,
    ];

    /// Suffix used in the flat key form.
    pub fn as_str(self) -> &'static str {
        match self {
            StateField::Weights => "W",
            StateField::Biases => "B",
            StateField::Scale => "scale",
            StateField::Shift => "shift",
            StateField::RunningMean => "running_mean",
            StateField::RunningVar => "running_var",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "W" => Some(StateField::Weights),
            "B" => Some(StateField::Biases),
            "scale" => Some(StateField::Scale),
            "shift" => Some(StateField::Shift),
            "running_mean" => Some(StateField::RunningMean),
            "running_var" => Some(StateField::RunningVar),
            _ => None,
        }
    }
}

/// Structured snapshot key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateKey {
    pub layer: usize,
    pub field: StateField,
}

impl StateKey {
    pub fn new(layer: usize, field: StateField) -> Self {
        Self { layer, field }
    }

    /// Parse the flat form `layer_{index}_{field}`.
    ///
    /// # Errors
    ///
    /// `InvalidStateKey` if the prefix, index or field suffix is malformed.
    pub fn parse(key: &str) -> Result<Self> {
        let invalid = || NetworkError::InvalidStateKey {
            key: key.to_string(),
        };
        let rest = key.strip_prefix("layer_").ok_or_else(invalid)?;
        let (index, field) = rest.split_once('_').ok_or_else(invalid)?;
        if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let layer = index.parse::<usize>().map_err(|_| invalid())?;
        let field = StateField::parse(field).ok_or_else(invalid)?;
        Ok(Self { layer, field })
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "layer_{}_{}", self.layer, self.field.as_str())
    }
}

/// Exported model state: every persisted tensor keyed by layer and role.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateDict {
    entries: BTreeMap<StateKey, Tensor>,
}

/// Flat, string-keyed form written to storage.
#[derive(Debug, Clone, Serialize)]
struct FlatState {
    tensors: BTreeMap<String, Tensor>,
}

/// Flat form as read back, with tensor lengths not yet checked.
#[derive(Debug, Deserialize)]
struct RawFlatState {
    tensors: BTreeMap<String, RawTensor>,
}

impl StateDict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: StateKey, tensor: Tensor) -> Option<Tensor> {
        self.entries.insert(key, tensor)
    }

    pub fn get(&self, key: &StateKey) -> Option<&Tensor> {
        self.entries.get(key)
    }

    pub fn remove(&mut self, key: &StateKey) -> Option<Tensor> {
        self.entries.remove(key)
    }

    pub fn contains(&self, key: &StateKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Look up a key, reporting its absence as `MissingStateKey`.
    pub fn require(&self, key: StateKey) -> Result<&Tensor> {
        self.entries
            .get(&key)
            .ok_or_else(|| NetworkError::MissingStateKey {
                key: key.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in (layer, field) order.
    pub fn iter(&self) -> impl Iterator<Item = (&StateKey, &Tensor)> {
        self.entries.iter()
    }

    pub fn to_flat(&self) -> BTreeMap<String, Tensor> {
        self.entries
            .iter()
            .map(|(key, tensor)| (key.to_string(), tensor.clone()))
            .collect()
    }

    pub fn from_flat(flat: BTreeMap<String, Tensor>) -> Result<Self> {
        let mut entries = BTreeMap::new();
        for (key, tensor) in flat {
            entries.insert(StateKey::parse(&key)?, tensor);
        }
        Ok(Self { entries })
    }

    pub fn to_json(&self) -> Result<String> {
        let flat = FlatState {
            tensors: self.to_flat(),
        };
        Ok(serde_json::to_string(&flat)?)
    }

    /// Parse the JSON form written by [`StateDict::to_json`].
    ///
    /// # Errors
    ///
    /// * `Json` if the document is malformed
    /// * `ShapeMismatch` if a tensor's data length disagrees with its shape
    /// * `InvalidStateKey` for an unrecognised key
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawFlatState = serde_json::from_str(json)?;
        let mut flat = BTreeMap::new();
        for (key, tensor) in raw.tensors {
            flat.insert(key, Tensor::try_from(tensor)?);
        }
        Self::from_flat(flat)
    }
}

/// Write a snapshot to `path` as JSON.
pub fn save_state(state: &StateDict, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    fs::write(path, state.to_json()?)?;
    log::debug!("Saved {} state tensors to {}", state.len(), path.display());
    Ok(())
}

/// Read a snapshot written by [`save_state`].
pub fn load_state(path: impl AsRef<Path>) -> Result<StateDict> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    let state = StateDict::from_json(&contents)?;
    log::debug!("Loaded {} state tensors from {}", state.len(), path.display());
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_format() {
        assert_eq!(StateKey::new(0, StateField::Weights).to_string(), "layer_0_W");
        assert_eq!(StateKey::new(12, StateField::Biases).to_string(), "layer_12_B");
        assert_eq!(
            StateKey::new(3, StateField::RunningVar).to_string(),
            "layer_3_running_var"
        );
    }

    #[test]
    fn test_key_parse() {
        assert_eq!(
            StateKey::parse("layer_2_running_mean").unwrap(),
            StateKey::new(2, StateField::RunningMean)
        );
        assert_eq!(
            StateKey::parse("layer_10_scale").unwrap(),
            StateKey::new(10, StateField::Scale)
        );
    }

    #[test]
    fn test_key_parse_rejects_malformed() {
        let malformed = [
            "layer_x_W",
            "layer__W",
            "layer_1_gamma",
            "weights_1_W",
            "layer_1",
            "layer_+1_W",
        ];
        for key in malformed {
            assert!(
                matches!(StateKey::parse(key), Err(NetworkError::InvalidStateKey { .. })),
                "{} should be rejected",
                key
            );
        }
    }

    #[test]
    fn test_require_missing() {
        let state = StateDict::new();
        let err = state.require(StateKey::new(4, StateField::Shift)).unwrap_err();
        assert!(matches!(err, NetworkError::MissingStateKey { ref key } if key == "layer_4_shift"));
    }

    #[test]
    fn test_flat_conversion() {
        let mut state = StateDict::new();
        state.insert(StateKey::new(0, StateField::Weights), Tensor::full(&[2, 2], 0.5));
        state.insert(StateKey::new(0, StateField::Biases), Tensor::zeros(&[2]));

        let keys: Vec<String> = state.iter().map(|(key, _)| key.to_string()).collect();
        assert_eq!(keys, vec!["layer_0_W", "layer_0_B"]);

        let flat = state.to_flat();
        assert!(flat.contains_key("layer_0_W"));
        assert!(flat.contains_key("layer_0_B"));
        assert_eq!(StateDict::from_flat(flat).unwrap(), state);
    }

    #[test]
    fn test_from_flat_rejects_unknown_key() {
        let mut flat = BTreeMap::new();
        flat.insert("layer_0_momentum".to_string(), Tensor::zeros(&[1]));
        assert!(StateDict::from_flat(flat).is_err());
    }

    #[test]
    fn test_json_file_persistence() {
        let mut state = StateDict::new();
        state.insert(
            StateKey::new(1, StateField::Scale),
            Tensor::from_vec(vec![3], vec![1.0, 0.5, -0.25]).unwrap(),
        );

        let file = tempfile::NamedTempFile::new().unwrap();
        save_state(&state, file.path()).unwrap();
        let loaded = load_state(file.path()).unwrap();
        assert_eq!(loaded, state);
    }
}
