//! Loading models from persisted descriptors.

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use super::{EchoModel, ModelError, SequenceModel};

/// On-disk description of a model, tagged by `kind`.
///
/// ```json
/// { "kind": "echo", "alpha": 0.01, "parallel_size": 1000, "default_delay": 0.05 }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelDescriptor {
    Echo(EchoModel),
}

impl ModelDescriptor {
    /// Check the parameters and build the model.
    pub fn into_model(self) -> Result<Arc<dyn SequenceModel>, ModelError> {
        match self {
            ModelDescriptor::Echo(model) => {
                model.validate()?;
                Ok(Arc::new(model))
            }
        }
    }
}

/// Load the model described by the file at `path`.
///
/// Any failure here is reported as [`ModelError::Load`] so startup can abort
/// before the pipeline is built.
pub fn load_model(path: impl AsRef<Path>) -> Result<Arc<dyn SequenceModel>, ModelError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ModelError::Load(format!("{}: {}", path.display(), e)))?;
    let descriptor: ModelDescriptor = serde_json::from_str(&raw)
        .map_err(|e| ModelError::Load(format!("Invalid format of the model {}: {}", path.display(), e)))?;

    let model = descriptor
        .into_model()
        .map_err(|e| ModelError::Load(format!("{}: {}", path.display(), e)))?;
    tracing::info!(model = model.name(), path = %path.display(), "Loaded model");
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_descriptor(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_echo_model() {
        let file = write_descriptor(r#"{"kind": "echo", "alpha": 0.0, "default_delay": 0.0}"#);
        let model = load_model(file.path()).unwrap();
        assert_eq!(model.name(), "echo");
    }

    #[test]
    fn test_descriptor_defaults() {
        let descriptor: ModelDescriptor = serde_json::from_str(r#"{"kind": "echo"}"#).unwrap();
        assert_eq!(descriptor, ModelDescriptor::Echo(EchoModel::default()));
    }

    #[test]
    fn test_missing_file_is_load_error() {
        let err = load_model("/nonexistent/model.json").err().unwrap();
        assert!(matches!(err, ModelError::Load(_)));
    }

    #[test]
    fn test_unknown_kind_is_load_error() {
        let file = write_descriptor(r#"{"kind": "transformer"}"#);
        let err = load_model(file.path()).err().unwrap();
        match err {
            ModelError::Load(message) => assert!(message.contains("Invalid format")),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_unusable_parameters_rejected_at_load() {
        for contents in [
            r#"{"kind": "echo", "alpha": 1e300}"#,
            r#"{"kind": "echo", "default_delay": -1.0}"#,
            r#"{"kind": "echo", "parallel_size": 0}"#,
        ] {
            let file = write_descriptor(contents);
            match load_model(file.path()).err().unwrap() {
                ModelError::Load(message) => assert!(message.contains(&file.path().display().to_string())),
                other => panic!("unexpected error {:?}", other),
            }
        }
    }
}
