//! Persona catalog and per-conversation character selection.

pub mod catalog;
pub mod selector;

pub use catalog::{Persona, PersonaCatalog, StaticPersonaCatalog, DEFAULT_PERSONA_ID};
pub use selector::CharacterSelector;

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

/// Load the catalog from `path` when given, otherwise use the built-in cast.
pub async fn create_catalog(path: Option<&Path>) -> Result<Arc<dyn PersonaCatalog>> {
    match path {
        Some(path) => {
            let catalog = StaticPersonaCatalog::from_json_file(path).await?;
            tracing::info!(
                path = %path.display(),
                personas = catalog.len(),
                "Persona catalog loaded"
            );
            Ok(Arc::new(catalog))
        }
        None => Ok(Arc::new(StaticPersonaCatalog::builtin())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_catalog_defaults_to_builtin() {
        let catalog = create_catalog(None).await.unwrap();
        assert_eq!(catalog.name(), "static");
        assert_eq!(catalog.default_persona().id, DEFAULT_PERSONA_ID);
    }

    #[tokio::test]
    async fn create_catalog_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(create_catalog(Some(&missing)).await.is_err());
    }
}
