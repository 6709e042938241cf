//! Identity of the deployment the unit under test lives in.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Length of generated model names.
const MODEL_NAME_LEN: usize = 20;

/// Model (deployment) identity.
///
/// `Model::default()` generates a random name and uuid once; clones keep
/// them, so every snapshot derived from the same template agrees on the
/// model it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    /// Model name.
    pub name: String,
    /// Model uuid.
    pub uuid: String,
}

impl Model {
    /// Create a model with a fixed identity.
    #[must_use]
    pub fn new(name: impl Into<String>, uuid: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uuid: uuid.into(),
        }
    }
}

impl Default for Model {
    fn default() -> Self {
        let name = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(MODEL_NAME_LEN)
            .map(char::from)
            .collect();
        Self {
            name,
            uuid: Uuid::new_v4().to_string(),
        }
    }
}
