//! Language selection for a code cell.

use gateway_core::kernel::{BackendLanguage, KernelFlavor};

/// Recognise a cell magic line such as `%%python`.
fn magic_language(line: &str) -> Option<BackendLanguage> {
    match line.trim().to_lowercase().as_str() {
        "%%python" => Some(BackendLanguage::Python),
        "%%sql" => Some(BackendLanguage::Sql),
        "%%objectscript" => Some(BackendLanguage::ObjectScript),
        _ => None,
    }
}

/// Pick the backend language for `code` and return the code to send.
///
/// Only the polyglot flavor looks at the first line; a recognised magic is
/// stripped, anything else leaves the code untouched and runs as ObjectScript.
pub fn select_language(flavor: KernelFlavor, code: &str) -> (BackendLanguage, &str) {
    if !flavor.accepts_magics() {
        return (flavor.native_language(), code);
    }
    let (first, rest) = code.split_once('\n').unwrap_or((code, ""));
    match magic_language(first) {
        Some(language) => (language, rest),
        None => (flavor.native_language(), code),
    }
}
