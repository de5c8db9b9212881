//! Writes the OpenAPI document of the REST fallback to a file or stdout.

use std::fs;
use std::io::Write;
use std::path::Path;

use utoipa::OpenApi;

use crate::openapi::ApiDoc;

/// Renders the document. A target ending in `.json`, or the bare word
/// `json`, selects JSON; everything else is YAML. `None` and the bare
/// formats stream to `out`.
///
/// # Errors
/// Returns an error if serialization or the write fails.
pub fn export_openapi(
    target: Option<&str>,
    out: &mut impl Write,
) -> Result<(), Box<dyn std::error::Error>> {
    let document = ApiDoc::openapi();

    match target {
        None | Some("yaml") => out.write_all(document.to_yaml()?.as_bytes())?,
        Some("json") => out.write_all(document.to_pretty_json()?.as_bytes())?,
        Some(path) => {
            let path = Path::new(path);
            let rendered = if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
                document.to_pretty_json()?
            } else {
                document.to_yaml()?
            };
            fs::write(path, rendered)?;
            writeln!(out, "OpenAPI document written to {}", path.display())?;
        }
    }

    Ok(())
}
