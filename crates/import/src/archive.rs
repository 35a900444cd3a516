use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

/// `<completed>/<account>/<YYYYMMDDHHMMSS>_<name>`, with a `-N` counter after
/// the timestamp if that name is already taken.
pub fn archive_path(completed: &Path, account_id: &str, file_name: &str, at: DateTime<Local>) -> PathBuf {
    let dir = completed.join(account_id);
    let stamp = at.format("%Y%m%d%H%M%S").to_string();

    let mut candidate = dir.join(format!("{stamp}_{file_name}"));
    let mut n = 1;
    while candidate.exists() {
        candidate = dir.join(format!("{stamp}-{n}_{file_name}"));
        n += 1;
    }
    candidate
}

/// Create the account's archive directory and pick a free destination for
/// `source`. Nothing is moved yet.
pub async fn prepare_archive(completed: &Path, account_id: &str, source: &Path) -> io::Result<PathBuf> {
    let file_name = source
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "source has no file name"))?;

    tokio::fs::create_dir_all(completed.join(account_id)).await?;
    Ok(archive_path(completed, account_id, file_name, Local::now()))
}

/// Move `source` to a destination from [`prepare_archive`].
pub async fn move_to_archive(source: &Path, dest: &Path) -> io::Result<()> {
    if let Err(e) = tokio::fs::rename(source, dest).await {
        // Rename fails across filesystems; fall back to copy + remove.
        tracing::debug!("rename failed ({e}), copying {}", source.display());
        tokio::fs::copy(source, dest).await?;
        tokio::fs::remove_file(source).await?;
    }
    Ok(())
}

/// Move a processed file into the archive tree and return its new path.
pub async fn archive_file(completed: &Path, account_id: &str, source: &Path) -> io::Result<PathBuf> {
    let dest = prepare_archive(completed, account_id, source).await?;
    move_to_archive(source, &dest).await?;
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn archive_path_layout() {
        let at = Local.with_ymd_and_hms(2024, 1, 15, 9, 5, 3).unwrap();
        let path = archive_path(Path::new("/data/completed"), "checking", "jan.csv", at);
        assert_eq!(path, PathBuf::from("/data/completed/checking/20240115090503_jan.csv"));
    }

    #[test]
    fn archive_path_avoids_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let at = Local.with_ymd_and_hms(2024, 1, 15, 9, 5, 3).unwrap();
        let account_dir = dir.path().join("checking");
        std::fs::create_dir_all(&account_dir).unwrap();
        std::fs::write(account_dir.join("20240115090503_jan.csv"), "").unwrap();
        std::fs::write(account_dir.join("20240115090503-1_jan.csv"), "").unwrap();

        let path = archive_path(dir.path(), "checking", "jan.csv", at);
        assert_eq!(path, account_dir.join("20240115090503-2_jan.csv"));
    }

    #[tokio::test]
    async fn archive_file_moves_source() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.csv");
        std::fs::write(&source, "a,b\n").unwrap();

        let dest = archive_file(&dir.path().join("completed"), "visa", &source).await.unwrap();
        assert!(!source.exists());
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "a,b\n");
        assert!(dest.file_name().unwrap().to_str().unwrap().ends_with("_in.csv"));
        assert_eq!(dest.parent().unwrap(), dir.path().join("completed").join("visa"));
    }

    #[tokio::test]
    async fn same_name_twice_gets_distinct_archives() {
        let dir = tempfile::tempdir().unwrap();
        let completed = dir.path().join("completed");
        let source = dir.path().join("in.csv");

        std::fs::write(&source, "1").unwrap();
        let first = archive_file(&completed, "visa", &source).await.unwrap();
        std::fs::write(&source, "2").unwrap();
        let second = archive_file(&completed, "visa", &source).await.unwrap();

        assert_ne!(first, second);
        assert_eq!(std::fs::read_to_string(first).unwrap(), "1");
        assert_eq!(std::fs::read_to_string(second).unwrap(), "2");
    }

    #[tokio::test]
    async fn prepare_fails_when_completed_root_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let completed = dir.path().join("completed");
        std::fs::write(&completed, "").unwrap();
        let source = dir.path().join("in.csv");
        std::fs::write(&source, "1").unwrap();

        assert!(prepare_archive(&completed, "visa", &source).await.is_err());
        assert!(source.exists());
    }
}
