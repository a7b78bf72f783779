//! Pure parsers for git output. No I/O happens here.

use super::types::NumstatEntry;

/// Parse `git diff --numstat` output.
///
/// Each line is `<added>\t<deleted>\t<path>`. Binary files report `-` for
/// both counts and parse as zero. Renamed paths are folded onto their
/// destination path.
pub fn parse_numstat(output: &str) -> Vec<NumstatEntry> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(3, '\t');
            let added = parts.next()?;
            let deleted = parts.next()?;
            let path = parts.next()?;
            if path.is_empty() {
                return None;
            }
            Some(NumstatEntry {
                path: fold_rename_path(path),
                added: parse_count(added),
                deleted: parse_count(deleted),
            })
        })
        .collect()
}

/// Parse one output line per entry, dropping blanks (`rev-list`,
/// `diff --name-only`, `ls-files` all share this shape).
pub fn parse_line_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Fold git's rename syntaxes onto the destination path.
///
/// Handles both the whole-path form `old.rs => new.rs` and the braced
/// common-prefix form `src/{old => new}/file.rs`.
pub fn fold_rename_path(path: &str) -> String {
    if let (Some(start), Some(end)) = (path.find('{'), path.find('}')) {
        if start < end {
            let inner = &path[start + 1..end];
            if let Some((_, new)) = inner.split_once(" => ") {
                let mut folded = String::with_capacity(path.len());
                folded.push_str(&path[..start]);
                folded.push_str(new);
                folded.push_str(&path[end + 1..]);
                return folded.replace("//", "/");
            }
        }
    }

    if let Some((_, new)) = path.split_once(" => ") {
        return new.to_string();
    }

    path.to_string()
}

fn parse_count(field: &str) -> u64 {
    // Binary files show "-" in numstat output.
    field.trim().parse().unwrap_or(0)
}
