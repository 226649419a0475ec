//! Generated HTML documents hosting bundled test code.

use crate::result::EnsayoResult;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempPath;

/// Placeholder replaced with the bundled script text
pub const BUNDLE_PLACEHOLDER: &str = "{{BUNDLE_CODE}}";

/// Placeholder replaced with the body fragment
pub const BODY_PLACEHOLDER: &str = "{{BODY_CONTENT}}";

/// Template used when none is configured.
///
/// The readiness flag is set after the bundle has executed. Custom
/// templates must set it themselves.
pub const DEFAULT_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>ensayo</title>
</head>
<body>
{{BODY_CONTENT}}
<script>
{{BUNDLE_CODE}}
window.testReady = true;
</script>
</body>
</html>
"#;

/// Predicate satisfied once the page signalled readiness (and, when a
/// global is named, defined it)
#[must_use]
pub fn ready_predicate(global: Option<&str>) -> String {
    match global {
        Some(global) => format!("{} && window.testReady === true", global_predicate(global)),
        None => "window.testReady === true".to_string(),
    }
}

/// Predicate satisfied once `window[global]` is defined
#[must_use]
pub fn global_predicate(global: &str) -> String {
    let key = serde_json::Value::String(global.to_string());
    format!("window[{key}] !== undefined")
}

/// Fill a template's placeholders.
///
/// `</script` inside the bundle is escaped so it cannot close the host tag.
#[must_use]
pub fn render(template: &str, bundle: &str, body: &str) -> String {
    let bundle = bundle.replace("</script", "<\\/script");
    template
        .replace(BODY_PLACEHOLDER, body)
        .replace(BUNDLE_PLACEHOLDER, &bundle)
}

/// `file://` URL for a local path
#[must_use]
pub fn file_url(path: &Path) -> String {
    let text = path.to_string_lossy().replace('\\', "/");
    if text.starts_with('/') {
        format!("file://{text}")
    } else {
        format!("file:///{text}")
    }
}

/// A rendered document written to a temp file; deleted on drop
#[derive(Debug)]
pub struct HtmlDocument {
    path: TempPath,
}

impl HtmlDocument {
    /// Write `html` to a fresh temp file
    pub fn write(html: &str) -> EnsayoResult<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("ensayo-")
            .suffix(".html")
            .tempfile()?;
        file.write_all(html.as_bytes())?;
        file.flush()?;
        Ok(Self {
            path: file.into_temp_path(),
        })
    }

    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.path.to_path_buf()
    }

    #[must_use]
    pub fn url(&self) -> String {
        file_url(&self.path)
    }

    /// Delete the file now, logging instead of failing
    pub fn remove(self) {
        let shown = self.path.display().to_string();
        if let Err(e) = self.path.close() {
            tracing::warn!(path = %shown, error = %e, "could not delete test document");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_render_default_template() {
        let html = render(DEFAULT_TEMPLATE, "var App = {};", "<div id=\"root\"></div>");
        assert!(html.contains("var App = {};\nwindow.testReady = true;"));
        assert!(html.contains("<div id=\"root\"></div>"));
        assert!(!html.contains("{{"));
    }

    #[test]
    fn test_render_escapes_script_close() {
        let html = render("<script>{{BUNDLE_CODE}}</script>", "s = '</script>'", "");
        assert_eq!(html, "<script>s = '<\\/script>'</script>");
    }

    #[test]
    fn test_predicates() {
        assert_eq!(ready_predicate(None), "window.testReady === true");
        assert_eq!(global_predicate("App"), "window[\"App\"] !== undefined");
        assert_eq!(
            ready_predicate(Some("App")),
            "window[\"App\"] !== undefined && window.testReady === true"
        );
    }

    #[test]
    fn test_document_lifecycle() {
        let doc = HtmlDocument::write("<p>hi</p>").unwrap();
        let path = doc.path();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "<p>hi</p>");
        assert!(doc.url().starts_with("file://"));
        assert!(doc.url().ends_with(".html"));
        doc.remove();
        assert!(!path.exists());
    }

    #[test]
    fn test_drop_deletes() {
        let doc = HtmlDocument::write("x").unwrap();
        let path = doc.path();
        drop(doc);
        assert!(!path.exists());
    }
}
