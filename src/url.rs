//! URI helpers for storage endpoints

use std::path::PathBuf;

/// Scheme of a URI (`file`, `gsiftp`, `root`, ...), lowercased. `None` for bare paths.
pub fn scheme(uri: &str) -> Option<String> {
    let s = uri.trim();
    let colon = s.find(':')?;
    let candidate = &s[..colon];
    let valid = !candidate.is_empty()
        && candidate
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        && candidate.chars().next().is_some_and(|c| c.is_ascii_alphabetic());
    if valid {
        Some(candidate.to_ascii_lowercase())
    } else {
        None
    }
}

/// Resolve a `file://` URI (or a bare absolute path) to a local path.
///
/// Accepts `file:///abs/path`, `file://localhost/abs/path` and `file:/abs/path`.
pub fn local_path(uri: &str) -> Option<PathBuf> {
    let s = uri.trim();
    match scheme(s).as_deref() {
        None => {
            if s.starts_with('/') {
                Some(PathBuf::from(s))
            } else {
                None
            }
        }
        Some("file") => {
            let mut rest = &s["file:".len()..];
            if let Some(r) = rest.strip_prefix("//") {
                // authority is either empty or localhost
                let (host, path) = match r.find('/') {
                    Some(i) => (&r[..i], &r[i..]),
                    None => (r, ""),
                };
                if !(host.is_empty() || host.eq_ignore_ascii_case("localhost")) {
                    return None;
                }
                rest = path;
            }
            if rest.starts_with('/') {
                Some(PathBuf::from(rest))
            } else {
                None
            }
        }
        Some(_) => None,
    }
}

/// Unit-level destination directory: `endpoint + base/rel`.
///
/// The endpoint is a URI prefix and is concatenated as-is; only the slash
/// between base and rel is normalized.
pub fn unit_dir_uri(endpoint: &str, base: &str, rel: &str) -> String {
    let base = base.trim_end_matches('/');
    let rel = rel.trim_matches('/');
    if rel.is_empty() {
        format!("{endpoint}{base}")
    } else {
        format!("{endpoint}{base}/{rel}")
    }
}

/// Append one path segment to a directory URI.
pub fn join(dir: &str, name: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), name.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_scheme_detection() {
        assert_eq!(scheme("gsiftp://se.example.org:2811/data").as_deref(), Some("gsiftp"));
        assert_eq!(scheme("FILE:///tmp").as_deref(), Some("file"));
        assert_eq!(scheme("/plain/path"), None);
        assert_eq!(scheme("relative/dir:x"), None);
    }

    #[test]
    fn test_local_path_forms() {
        assert_eq!(local_path("file:///tmp/x").as_deref(), Some(Path::new("/tmp/x")));
        assert_eq!(local_path("file://localhost/tmp/x").as_deref(), Some(Path::new("/tmp/x")));
        assert_eq!(local_path("file:/tmp/x").as_deref(), Some(Path::new("/tmp/x")));
        assert_eq!(local_path("/tmp/x").as_deref(), Some(Path::new("/tmp/x")));
        assert!(local_path("file://otherhost/tmp/x").is_none());
        assert!(local_path("root://eos.example.org//eos/x").is_none());
        assert!(local_path("tmp/x").is_none());
    }

    #[test]
    fn test_unit_dir_uri() {
        assert_eq!(
            unit_dir_uri("davs://se.example.org:443", "/store/user", "run1"),
            "davs://se.example.org:443/store/user/run1"
        );
        assert_eq!(unit_dir_uri("file://", "/backup/", "/data/"), "file:///backup/data");
        assert_eq!(join("file:///backup/data/", "a.txt"), "file:///backup/data/a.txt");
    }
}
