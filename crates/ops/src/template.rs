//! Manifest templating.
//!
//! Rendered manifests are written to scratch files and applied with the
//! client binary, the same flow the rest of the pipeline expects from
//! every operator install.

use std::path::PathBuf;

use handlebars::Handlebars;
use serde::Serialize;

use crate::error::OpsError;

/// Render a handlebars template string with the given data.
///
/// # Errors
///
/// Returns an error if the template fails to parse or render.
pub fn render<T: Serialize>(template: &str, data: &T) -> Result<String, OpsError> {
    let mut registry = Handlebars::new();
    registry.set_strict_mode(true);
    registry.register_escape_fn(handlebars::no_escape);
    Ok(registry.render_template(template, data)?)
}

/// Write manifest content to a named scratch file and keep it on disk
/// for the lifetime of the run so the applied file stays inspectable.
///
/// # Errors
///
/// Returns an error if the file cannot be created or written.
pub fn write_temp_manifest(content: &str, prefix: &str) -> Result<PathBuf, OpsError> {
    let file = tempfile::Builder::new()
        .prefix(prefix)
        .suffix(".yaml")
        .tempfile()?;
    std::fs::write(file.path(), content)?;
    let (_, path) = file.keep().map_err(|e| OpsError::Io(e.error))?;
    Ok(path)
}

/// Re-serialize a YAML value and write it to a scratch manifest.
///
/// # Errors
///
/// Returns an error on serialization or filesystem failure.
pub fn write_yaml_manifest(value: &serde_yaml::Value, prefix: &str) -> Result<PathBuf, OpsError> {
    let content = serde_yaml::to_string(value)?;
    write_temp_manifest(&content, prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_substitutes_fields() {
        let rendered = render(
            "metadata:\n  name: {{name}}\n  namespace: {{namespace}}\n",
            &json!({"name": "odf-catalog", "namespace": "openshift-marketplace"}),
        )
        .unwrap();
        assert!(rendered.contains("name: odf-catalog"));
        assert!(rendered.contains("namespace: openshift-marketplace"));
    }

    #[test]
    fn test_render_strict_mode_rejects_missing_field() {
        assert!(render("{{missing}}", &json!({})).is_err());
    }

    #[test]
    fn test_render_does_not_escape_urls() {
        let rendered = render(
            "image: {{image}}",
            &json!({"image": "quay.io/acme/catalog:v4.12"}),
        )
        .unwrap();
        assert_eq!(rendered, "image: quay.io/acme/catalog:v4.12");
    }

    #[test]
    fn test_write_temp_manifest_round_trip() {
        let path = write_temp_manifest("kind: Namespace\n", "namespace_manifest").unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "kind: Namespace\n");
        std::fs::remove_file(path).unwrap();
    }
}
