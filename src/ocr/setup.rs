use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::log;
use crate::paths::get_tesseract_dir;

#[cfg(windows)]
const EXECUTABLE_NAME: &str = "tesseract.exe";
#[cfg(not(windows))]
const EXECUTABLE_NAME: &str = "tesseract";

#[cfg(windows)]
const COMMON_INSTALL_DIRS: &[&str] = &[
    r"C:\Program Files\Tesseract-OCR",
    r"C:\Program Files (x86)\Tesseract-OCR",
];
#[cfg(not(windows))]
const COMMON_INSTALL_DIRS: &[&str] = &["/usr/bin", "/usr/local/bin", "/opt/homebrew/bin"];

/// Finds the Tesseract executable: the configured path, then the per-user
/// data directory, then `PATH`, then common install locations.
pub fn find_tesseract_executable(configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = configured {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        log(&format!(
            "Configured Tesseract not found at {}, searching elsewhere",
            path.display()
        ));
    }

    let local_exe = get_tesseract_dir().join(EXECUTABLE_NAME);
    if local_exe.is_file() {
        return Ok(local_exe);
    }

    // Check PATH
    if responds_to_version(Path::new("tesseract")) {
        return Ok(PathBuf::from("tesseract"));
    }

    for dir in COMMON_INSTALL_DIRS {
        let p = Path::new(dir).join(EXECUTABLE_NAME);
        if p.is_file() {
            return Ok(p);
        }
    }

    Err(anyhow!(
        "Tesseract not found. Install Tesseract-OCR, put it on PATH, or set ocr.tesseractPath"
    ))
}

/// Finds a tessdata directory containing `<language>.traineddata`: the
/// configured directory (or its `tessdata` child), then the per-user data
/// directory.
///
/// `None` lets Tesseract fall back to its compiled-in location.
pub fn find_tessdata_dir(configured: Option<&Path>, language: &str) -> Option<PathBuf> {
    let traineddata = format!("{}.traineddata", language);
    let has_language = |dir: &Path| dir.join(&traineddata).is_file();

    if let Some(dir) = configured {
        for candidate in [dir.to_path_buf(), dir.join("tessdata")] {
            if has_language(&candidate) {
                return Some(candidate);
            }
        }
        log(&format!(
            "Configured tessdata dir {} has no {}",
            dir.display(),
            traineddata
        ));
    }

    let local_tessdata = get_tesseract_dir().join("tessdata");
    if has_language(&local_tessdata) {
        return Some(local_tessdata);
    }

    None
}

fn responds_to_version(executable: &Path) -> bool {
    Command::new(executable)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}
