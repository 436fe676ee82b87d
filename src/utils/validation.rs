/// File type of an upload: everything after the last '.', lowercased.
/// A name without a dot is its own file type.
pub fn file_type(filename: &str) -> String {
    match filename.rfind('.') {
        Some(idx) => filename[idx + 1..].to_lowercase(),
        None => filename.to_lowercase(),
    }
}

/// Checks a file type against the configured allowlist
pub fn is_allowed_type(file_type: &str, allowed: &[String]) -> bool {
    allowed.iter().any(|t| t == file_type)
}

/// Removes line breaks and shortens `text` to at most `length` characters,
/// marking the cut with "..."
pub fn trunc(text: &str, length: usize) -> String {
    let flat: String = text.chars().filter(|c| *c != '\r' && *c != '\n').collect();
    if flat.chars().count() > length {
        let mut cut: String = flat.chars().take(length.saturating_sub(1)).collect();
        cut.push_str("...");
        cut
    } else {
        flat
    }
}

/// Detects content of a Unix `/etc/passwd` file
pub fn matches_etc_passwd_file(text: &str) -> bool {
    if text.contains("Note that this file is consulted directly") {
        return true;
    }
    text.split(['\n', '\r', '>', '<'])
        .any(|line| is_passwd_record(line.trim()))
}

fn is_passwd_record(line: &str) -> bool {
    let fields: Vec<&str> = line.split(':').collect();
    if fields.len() < 7 || fields[0].is_empty() {
        return false;
    }
    let numeric = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
    let word = |s: &str| s.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-');
    word(fields[0]) && word(fields[1]) && numeric(fields[2]) && numeric(fields[3])
}

/// Detects content of a Windows `system.ini` file
pub fn matches_system_ini_file(text: &str) -> bool {
    const MARKERS: &[&str] = &["; for 16-bit app support", "[drivers]", "[mci]", "[mail]"];
    let lower = text.to_lowercase();
    MARKERS.iter().any(|m| lower.contains(m))
}
