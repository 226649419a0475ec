//! Locale-dependent message text.
//!
//! Only the wording of human-readable messages depends on the locale;
//! control flow never does.

use std::sync::OnceLock;

/// Supported message locales
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Locale {
    /// English
    #[default]
    En,
    /// Spanish
    Es,
}

impl Locale {
    /// Parse a POSIX-style locale tag such as `es_ES.UTF-8` or `en-US`
    #[must_use]
    pub fn parse(tag: &str) -> Option<Self> {
        let language = tag
            .split(|c: char| c == '.' || c == '@')
            .next()?
            .split(|c: char| c == '_' || c == '-')
            .next()?
            .to_ascii_lowercase();
        match language.as_str() {
            "en" => Some(Self::En),
            "es" => Some(Self::Es),
            _ => None,
        }
    }

    /// First of `LANGUAGE`, `LC_ALL`, `LANG` naming a supported locale
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve the locale from an arbitrary key lookup
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        ["LANGUAGE", "LC_ALL", "LANG"]
            .iter()
            .filter_map(|key| lookup(key))
            .find_map(|value| value.split(':').find_map(Self::parse))
            .unwrap_or_default()
    }

    /// Locale of the current process, resolved once
    #[must_use]
    pub fn current() -> Self {
        static CURRENT: OnceLock<Locale> = OnceLock::new();
        *CURRENT.get_or_init(Self::from_env)
    }
}

/// Message text for configuration errors and failure reports
#[derive(Debug, Clone, Copy)]
pub struct Messages {
    locale: Locale,
}

impl Messages {
    /// Messages for a locale
    #[must_use]
    pub const fn new(locale: Locale) -> Self {
        Self { locale }
    }

    /// Messages for the current process locale
    #[must_use]
    pub fn current() -> Self {
        Self::new(Locale::current())
    }

    /// `it`/`test` called while no suite body is executing
    #[must_use]
    pub fn registration_outside_suite(&self, test: &str) -> String {
        match self.locale {
            Locale::En => format!(
                "it(\"{test}\") was called outside a describe() body; this runtime only \
                 accepts tests registered while a suite body is executing (not from inside \
                 a running test)"
            ),
            Locale::Es => format!(
                "it(\"{test}\") se llamó fuera del cuerpo de un describe(); este runtime solo \
                 acepta pruebas registradas mientras se ejecuta el cuerpo de una suite (no \
                 desde una prueba en ejecución)"
            ),
        }
    }

    /// Registration after the runtime already started running
    #[must_use]
    pub fn registration_after_start(&self, test: &str) -> String {
        match self.locale {
            Locale::En => format!("cannot register \"{test}\": the test run has already started"),
            Locale::Es => {
                format!("no se puede registrar \"{test}\": la ejecución ya comenzó")
            }
        }
    }

    /// Empty suite or test name
    #[must_use]
    pub fn empty_name(&self, call: &str) -> String {
        match self.locale {
            Locale::En => format!("{call}() expects a non-empty name"),
            Locale::Es => format!("{call}() espera un nombre no vacío"),
        }
    }

    /// Expected/received block used by matchers
    #[must_use]
    pub fn expected_received(&self, expected: &str, received: &str) -> String {
        match self.locale {
            Locale::En => format!("Expected: {expected}\nReceived: {received}"),
            Locale::Es => format!("Esperado: {expected}\nRecibido: {received}"),
        }
    }

    /// Browser page never signalled readiness
    #[must_use]
    pub fn page_not_ready(&self, entry: &str, global: Option<&str>, console: &[String]) -> String {
        let mut message = match (self.locale, global) {
            (Locale::En, Some(global)) => format!(
                "window.{global} was never defined after loading {entry}"
            ),
            (Locale::En, None) => {
                format!("window.testReady was never set after loading {entry}")
            }
            (Locale::Es, Some(global)) => format!(
                "window.{global} nunca se definió tras cargar {entry}"
            ),
            (Locale::Es, None) => {
                format!("window.testReady nunca se activó tras cargar {entry}")
            }
        };
        if !console.is_empty() {
            let header = match self.locale {
                Locale::En => "console errors",
                Locale::Es => "errores de consola",
            };
            message.push_str(&format!("\n{header}:\n  {}", console.join("\n  ")));
        }
        message
    }
}
