//! Asset path helpers
//!
//! Bundle paths always use forward slashes. Index lookups are
//! case-insensitive; the spelling used at import time is what enumeration
//! returns.

/// Replace backslashes with forward slashes
pub fn correct_slashes(path: &str) -> String {
    if path.contains('\\') {
        path.replace('\\', "/")
    } else {
        path.to_string()
    }
}

/// Key used for case-insensitive index lookups
pub fn index_key(path: &str) -> String {
    correct_slashes(path).to_lowercase()
}

/// Case-insensitive prefix test on normalized paths
pub fn has_prefix(path: &str, prefix: &str) -> bool {
    index_key(path).starts_with(&index_key(prefix))
}

/// `dir/name.ext` + `ru` -> `dir/name.ru.ext`
///
/// The extension is everything from the last dot of the final path segment,
/// so `cfg/.hidden` becomes `cfg/.ru.hidden`. A trailing dot is dropped.
pub fn localized_variant(path: &str, language: &str) -> String {
    let path = correct_slashes(path);
    let name_start = path.rfind('/').map(|i| i + 1).unwrap_or(0);
    match path[name_start..].rfind('.') {
        Some(dot) => {
            let dot = name_start + dot;
            let extension = &path[dot..];
            let extension = if extension == "." { "" } else { extension };
            format!("{}.{}{}", &path[..dot], language, extension)
        }
        None => format!("{}.{}", path, language),
    }
}
