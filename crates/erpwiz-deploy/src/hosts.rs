//! Local name resolution for `.localhost`-style sites: an entry in the
//! system hosts file pointing the site at the loopback address.

use std::io::Write;
use std::path::{Path, PathBuf};

/// Outcome of a hosts file registration attempt. Lack of privileges is a
/// reportable outcome, not an error: the caller prints the line for the
/// operator to add by hand and the deployment still counts as successful.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostsUpdate {
    Added,
    AlreadyPresent,
    PermissionDenied { path: PathBuf, line: String },
}

pub fn hosts_file_path() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from(r"C:\Windows\System32\drivers\etc\hosts")
    } else {
        PathBuf::from("/etc/hosts")
    }
}

fn entry_line(site: &str) -> String {
    format!("127.0.0.1\t{site}")
}

fn has_entry(content: &str, site: &str) -> bool {
    content.lines().any(|line| {
        let line = line.split('#').next().unwrap_or("");
        let mut fields = line.split_whitespace();
        fields.next() == Some("127.0.0.1") && fields.any(|name| name == site)
    })
}

/// Register `site` in the hosts file at `path`, appending a loopback entry
/// unless one already exists.
pub fn register_site(path: &Path, site: &str) -> std::io::Result<HostsUpdate> {
    let line = entry_line(site);
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
            return Ok(HostsUpdate::PermissionDenied {
                path: path.to_path_buf(),
                line,
            });
        }
        Err(err) => return Err(err),
    };
    if has_entry(&content, site) {
        return Ok(HostsUpdate::AlreadyPresent);
    }

    let mut file = match std::fs::OpenOptions::new().append(true).open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
            return Ok(HostsUpdate::PermissionDenied {
                path: path.to_path_buf(),
                line,
            });
        }
        Err(err) => return Err(err),
    };
    if content.ends_with('\n') || content.is_empty() {
        writeln!(file, "{line}")?;
    } else {
        writeln!(file, "\n{line}")?;
    }
    Ok(HostsUpdate::Added)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_missing_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts");
        std::fs::write(&path, "127.0.0.1\tlocalhost\n").unwrap();
        let update = register_site(&path, "mysite.localhost").unwrap();
        assert_eq!(update, HostsUpdate::Added);
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("127.0.0.1\tmysite.localhost\n"));
    }

    #[test]
    fn existing_entry_is_not_duplicated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts");
        std::fs::write(&path, "127.0.0.1 localhost mysite.localhost\n").unwrap();
        let update = register_site(&path, "mysite.localhost").unwrap();
        assert_eq!(update, HostsUpdate::AlreadyPresent);
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.matches("mysite.localhost").count(), 1);
    }

    #[test]
    fn commented_entries_do_not_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts");
        std::fs::write(&path, "# 127.0.0.1 mysite.localhost\n").unwrap();
        let update = register_site(&path, "mysite.localhost").unwrap();
        assert_eq!(update, HostsUpdate::Added);
    }

    #[test]
    fn missing_trailing_newline_is_handled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts");
        std::fs::write(&path, "127.0.0.1 localhost").unwrap();
        register_site(&path, "mysite.localhost").unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("localhost\n127.0.0.1\tmysite.localhost\n"));
    }

    #[cfg(unix)]
    #[test]
    fn unwritable_file_reports_the_line_to_add() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts");
        std::fs::write(&path, "127.0.0.1 localhost\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o444)).unwrap();
        // Root ignores file modes; the fallback cannot be provoked then.
        if std::fs::OpenOptions::new().append(true).open(&path).is_ok() {
            return;
        }
        let update = register_site(&path, "mysite.localhost").unwrap();
        match update {
            HostsUpdate::PermissionDenied { line, .. } => {
                assert_eq!(line, "127.0.0.1\tmysite.localhost");
            }
            other => panic!("expected PermissionDenied, got {other:?}"),
        }
    }
}
