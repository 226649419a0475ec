//! In-memory `document.cookie` stand-in.
//!
//! Each [`CookieDocument`] owns its own jar; assigning `"name=value; attrs"`
//! adds or updates one cookie, and reading yields `"a=1; b=2"` in insertion
//! order, the way a browser document does.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};

/// Same site cookie setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SameSite {
    Strict,
    #[default]
    Lax,
    None,
}

impl SameSite {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "strict" => Some(Self::Strict),
            "lax" => Some(Self::Lax),
            "none" => Some(Self::None),
            _ => None,
        }
    }
}

/// One stored cookie with its attributes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: Option<String>,
    pub path: Option<String>,
    /// Raw `Expires` attribute text
    pub expires: Option<String>,
    /// `Max-Age` in seconds
    pub max_age: Option<i64>,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: SameSite,
}

impl Cookie {
    #[must_use]
    pub fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            domain: None,
            path: None,
            expires: None,
            max_age: None,
            http_only: false,
            secure: false,
            same_site: SameSite::default(),
        }
    }

    /// Parse a `Set-Cookie`-style assignment; `None` when there is no `name=`
    #[must_use]
    pub fn parse(assignment: &str) -> Option<Self> {
        let mut parts = assignment.split(';');
        let (name, value) = parts.next()?.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        let mut cookie = Self::new(name, value.trim());
        for attribute in parts {
            let (key, val) = attribute
                .split_once('=')
                .map_or((attribute.trim(), ""), |(k, v)| (k.trim(), v.trim()));
            match key.to_ascii_lowercase().as_str() {
                "path" => cookie.path = Some(val.to_string()),
                "domain" => cookie.domain = Some(val.to_string()),
                "expires" => cookie.expires = Some(val.to_string()),
                "max-age" => cookie.max_age = val.parse().ok(),
                "secure" => cookie.secure = true,
                "httponly" => cookie.http_only = true,
                "samesite" => {
                    if let Some(same_site) = SameSite::parse(val) {
                        cookie.same_site = same_site;
                    }
                }
                _ => {}
            }
        }
        Some(cookie)
    }

    /// An empty value or a non-positive `Max-Age` deletes the cookie
    #[must_use]
    pub fn is_removal(&self) -> bool {
        self.value.is_empty() || self.max_age.is_some_and(|age| age <= 0)
    }
}

/// A document whose `cookie` property accumulates assignments
#[derive(Debug, Clone, Default)]
pub struct CookieDocument {
    jar: Arc<Mutex<Vec<Cookie>>>,
}

/// A fresh document with an empty jar
#[must_use]
pub fn create_cookie_document() -> CookieDocument {
    CookieDocument::default()
}

impl CookieDocument {
    /// Assign `document.cookie = assignment`
    pub fn set_cookie(&self, assignment: &str) {
        let Some(cookie) = Cookie::parse(assignment) else {
            tracing::debug!(assignment, "ignored malformed cookie assignment");
            return;
        };
        let mut jar = self.jar.lock().unwrap_or_else(PoisonError::into_inner);
        let existing = jar.iter().position(|c| c.name == cookie.name);
        match (existing, cookie.is_removal()) {
            (Some(index), true) => {
                jar.remove(index);
            }
            (None, true) => {}
            (Some(index), false) => jar[index] = cookie,
            (None, false) => jar.push(cookie),
        }
    }

    /// Read `document.cookie`
    #[must_use]
    pub fn cookie(&self) -> String {
        self.jar
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Stored cookie by name, with attributes
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Cookie> {
        self.jar
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|c| c.name == name)
            .cloned()
    }

    #[must_use]
    pub fn cookies(&self) -> Vec<Cookie> {
        self.jar
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        self.jar
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulates_in_order() {
        let doc = create_cookie_document();
        doc.set_cookie("a=1");
        doc.set_cookie("b=2");
        assert_eq!(doc.cookie(), "a=1; b=2");
    }

    #[test]
    fn test_updates_by_name() {
        let doc = create_cookie_document();
        doc.set_cookie("a=1");
        doc.set_cookie("b=2");
        doc.set_cookie("a=2");
        assert_eq!(doc.cookie(), "a=2; b=2");
    }

    #[test]
    fn test_empty_value_removes() {
        let doc = create_cookie_document();
        doc.set_cookie("a=1");
        doc.set_cookie("b=2");
        doc.set_cookie("a=");
        assert_eq!(doc.cookie(), "b=2");
        doc.set_cookie("b=x; Max-Age=0");
        assert_eq!(doc.cookie(), "");
    }

    #[test]
    fn test_documents_do_not_share_state() {
        let first = create_cookie_document();
        let second = create_cookie_document();
        first.set_cookie("a=1");
        assert_eq!(second.cookie(), "");
    }

    #[test]
    fn test_attributes_parsed() {
        let doc = create_cookie_document();
        doc.set_cookie("session=abc; Path=/app; Domain=example.com; Secure; HttpOnly; SameSite=Strict; Max-Age=60");
        let cookie = doc.get("session").unwrap();
        assert_eq!(cookie.value, "abc");
        assert_eq!(cookie.path.as_deref(), Some("/app"));
        assert_eq!(cookie.domain.as_deref(), Some("example.com"));
        assert!(cookie.secure);
        assert!(cookie.http_only);
        assert_eq!(cookie.same_site, SameSite::Strict);
        assert_eq!(cookie.max_age, Some(60));
        assert_eq!(doc.cookie(), "session=abc");
    }

    #[test]
    fn test_malformed_assignment_ignored() {
        let doc = create_cookie_document();
        doc.set_cookie("novalue");
        doc.set_cookie("=1");
        assert_eq!(doc.cookie(), "");
    }
}
