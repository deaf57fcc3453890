//! Foundational low-level utilities shared across herald crates.
//!
//! Provides the atomic snapshot-write primitive backing the event store and
//! overlay persistence, plus time helpers used by repost rate limiting.

pub mod snapshot_io;
pub mod time_utils;

pub use snapshot_io::{read_snapshot, write_snapshot, SnapshotRead};
pub use time_utils::{current_unix_timestamp, current_unix_timestamp_ms};

#[cfg(test)]
mod tests {
    use std::fs::read_to_string;

    use super::*;

    #[test]
    fn time_utils_ms_and_seconds_agree() {
        let now_s = current_unix_timestamp();
        let now_ms = current_unix_timestamp_ms();
        let now_ms_s = now_ms / 1_000;
        assert!(now_ms_s >= now_s);
        assert!(now_ms_s <= now_s.saturating_add(1));
    }

    #[test]
    fn write_snapshot_writes_content_and_backup() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("state.json");

        write_snapshot(&path, "{\"v\":1}").expect("first write");
        assert_eq!(read_to_string(&path).expect("read"), "{\"v\":1}");
        assert!(!snapshot_io::backup_path(&path).exists());

        write_snapshot(&path, "{\"v\":2}").expect("second write");
        assert_eq!(read_to_string(&path).expect("read"), "{\"v\":2}");
        assert_eq!(
            read_to_string(snapshot_io::backup_path(&path)).expect("read backup"),
            "{\"v\":1}"
        );
    }

    #[test]
    fn read_snapshot_falls_back_to_backup() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("state.json");

        write_snapshot(&path, "old").expect("write old");
        write_snapshot(&path, "new").expect("write new");
        std::fs::remove_file(&path).expect("drop current");

        match read_snapshot(&path).expect("read") {
            SnapshotRead::Backup(content) => assert_eq!(content, "old"),
            other => panic!("expected backup read, got {other:?}"),
        }
    }

    #[test]
    fn read_snapshot_reports_missing_when_nothing_exists() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("absent.json");
        assert!(matches!(
            read_snapshot(&path).expect("read"),
            SnapshotRead::Missing
        ));
    }
}
