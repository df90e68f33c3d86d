use std::path::PathBuf;

use dirs_next::home_dir;

/// Expand a leading `~` to the current user's home directory.
///
/// Paths without a leading `~`, and `~` when no home directory is known, are
/// returned unchanged apart from trimming.
pub fn expand_tilde(path: &str) -> PathBuf {
    let trimmed = path.trim();
    let rest = match trimmed {
        "~" => "",
        _ => match trimmed.strip_prefix("~/").or_else(|| trimmed.strip_prefix("~\\")) {
            Some(rest) => rest,
            None => return PathBuf::from(trimmed),
        },
    };
    match home_dir() {
        Some(home) if rest.is_empty() => home,
        Some(home) => home.join(rest),
        None => PathBuf::from(trimmed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_home_prefixes() {
        let Some(home) = home_dir() else { return };
        assert_eq!(expand_tilde("~"), home);
        assert_eq!(expand_tilde(" ~/.config/inquest/providers.json "), home.join(".config/inquest/providers.json"));
    }

    #[test]
    fn leaves_other_paths_alone() {
        assert_eq!(expand_tilde("/etc/inquest/providers.json"), PathBuf::from("/etc/inquest/providers.json"));
        assert_eq!(expand_tilde("relative/~/file"), PathBuf::from("relative/~/file"));
        assert_eq!(expand_tilde("~other/file"), PathBuf::from("~other/file"));
    }
}
