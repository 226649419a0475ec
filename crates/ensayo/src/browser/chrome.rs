//! Chrome/Chromium executable autodetection.

use std::path::{Path, PathBuf};

/// Environment variable that overrides autodetection
pub const CHROME_PATH_ENV: &str = "CHROME_PATH";

#[cfg(target_os = "macos")]
const CANDIDATES: &[&str] = &[
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    "/Applications/Google Chrome Canary.app/Contents/MacOS/Google Chrome Canary",
    "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
];

#[cfg(target_os = "windows")]
const CANDIDATES: &[&str] = &[
    r"C:\Program Files\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files\Chromium\Application\chrome.exe",
    r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
];

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
const CANDIDATES: &[&str] = &[
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-stable",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/snap/bin/chromium",
    "/usr/local/bin/chromium",
    "/opt/google/chrome/chrome",
];

/// Well-known install locations for this platform, in search order
#[must_use]
pub fn candidates() -> &'static [&'static str] {
    CANDIDATES
}

/// `CHROME_PATH` if it names a file, else the first existing candidate
#[must_use]
pub fn find_chrome() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(CHROME_PATH_ENV).map(PathBuf::from) {
        if path.is_file() {
            return Some(path);
        }
        tracing::warn!(path = %path.display(), "CHROME_PATH does not name a file; searching defaults");
    }
    first_file(CANDIDATES.iter().map(Path::new))
}

/// First path that exists and is a regular file
pub fn first_file<'a>(paths: impl IntoIterator<Item = &'a Path>) -> Option<PathBuf> {
    paths
        .into_iter()
        .find(|path| path.is_file())
        .map(Path::to_path_buf)
}
