//! Daily and size-capped rolling file for the audit trail.
//!
//! The active file is `<dir>/gateway-YYYY-MM-DD.log`. It is rolled when the
//! UTC date changes or when the next line would push it past the size cap.
//! A rolled file is gzip-compressed to `gateway-YYYY-MM-DD.log.gz` (or
//! `gateway-YYYY-MM-DD.N.log.gz` when that day already has archives) and the
//! plain file is removed. Archives older than the retention period are
//! deleted on every roll and on open.
//!
//! All I/O here is blocking; the audit writer drives it from a blocking task.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{Days, NaiveDate, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::{debug, info};

const FILE_PREFIX: &str = "gateway-";
const PLAIN_SUFFIX: &str = ".log";
const ARCHIVE_SUFFIX: &str = ".log.gz";
const DATE_FORMAT: &str = "%Y-%m-%d";

struct ActiveFile {
    date: NaiveDate,
    path: PathBuf,
    writer: BufWriter<File>,
    size: u64,
}

/// Append-only log file with rotation, compression and retention.
pub struct RollingFile {
    directory: PathBuf,
    max_file_size: u64,
    retention_days: u32,
    active: Option<ActiveFile>,
}

impl RollingFile {
    /// Open the log directory, creating it if needed.
    ///
    /// Plain logs left behind from earlier days are compressed and expired
    /// archives removed before the first write.
    ///
    /// # Errors
    ///
    /// Returns any I/O error from creating or scanning the directory.
    pub fn open(directory: impl Into<PathBuf>, max_file_size: u64, retention_days: u32) -> io::Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;

        let file = Self {
            directory,
            max_file_size: max_file_size.max(1),
            retention_days,
            active: None,
        };
        file.sweep(Utc::now().date_naive())?;
        Ok(file)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of the plain log file for `date`.
    pub fn log_path(&self, date: NaiveDate) -> PathBuf {
        self.directory
            .join(format!("{FILE_PREFIX}{}{PLAIN_SUFFIX}", date.format(DATE_FORMAT)))
    }

    /// Append one line stamped with today's UTC date.
    ///
    /// # Errors
    ///
    /// Returns any I/O error from writing or rolling.
    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.write_line_at(line, Utc::now().date_naive())
    }

    /// Append one line to the file for `date`, rolling first if needed.
    ///
    /// # Errors
    ///
    /// Returns any I/O error from writing or rolling.
    pub fn write_line_at(&mut self, line: &str, date: NaiveDate) -> io::Result<()> {
        let line_len = line.len() as u64 + 1;

        let needs_roll = self
            .active
            .as_ref()
            .is_some_and(|active| active.date != date || self.would_overflow(active.size, line_len));
        if needs_roll {
            self.roll(date)?;
        }

        if self.active.is_none() {
            let opened = self.open_active(date)?;
            let overflow = self.would_overflow(opened.size, line_len);
            self.active = Some(opened);
            if overflow {
                // Leftover file from an earlier run is already at the cap
                self.roll(date)?;
                self.active = Some(self.open_active(date)?);
            }
        }

        let Some(active) = self.active.as_mut() else {
            return Err(io::Error::other("no active log file"));
        };
        active.writer.write_all(line.as_bytes())?;
        active.writer.write_all(b"\n")?;
        active.writer.flush()?;
        active.size += line_len;
        Ok(())
    }

    /// Flush buffered output of the active file.
    ///
    /// # Errors
    ///
    /// Returns the flush error, if any.
    pub fn flush(&mut self) -> io::Result<()> {
        match self.active.as_mut() {
            Some(active) => active.writer.flush(),
            None => Ok(()),
        }
    }

    /// Compress plain logs dated before `today` and delete expired archives.
    ///
    /// # Errors
    ///
    /// Returns any I/O error from scanning, compressing or deleting.
    pub fn sweep(&self, today: NaiveDate) -> io::Result<()> {
        for (path, date, compressed) in self.scan()? {
            if !compressed && date < today {
                self.archive(&path, date)?;
            }
        }
        self.prune(today)
    }

    fn would_overflow(&self, size: u64, line_len: u64) -> bool {
        size > 0 && size + line_len > self.max_file_size
    }

    fn open_active(&self, date: NaiveDate) -> io::Result<ActiveFile> {
        let path = self.log_path(date);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let size = file.metadata()?.len();
        debug!(path = %path.display(), size, "Opened audit log file");

        Ok(ActiveFile {
            date,
            path,
            writer: BufWriter::new(file),
            size,
        })
    }

    /// Close and archive the active file, then apply retention.
    fn roll(&mut self, today: NaiveDate) -> io::Result<()> {
        if let Some(mut active) = self.active.take() {
            active.writer.flush()?;
            let ActiveFile { path, date, writer, .. } = active;
            drop(writer);
            self.archive(&path, date)?;
        }
        self.prune(today)
    }

    /// Gzip `path` into the next free archive name for `date` and remove it.
    fn archive(&self, path: &Path, date: NaiveDate) -> io::Result<()> {
        let target = self.next_archive_path(date);

        let mut source = File::open(path)?;
        let mut encoder = GzEncoder::new(File::create(&target)?, Compression::default());
        io::copy(&mut source, &mut encoder)?;
        encoder.finish()?.sync_all()?;
        fs::remove_file(path)?;

        info!(archive = %target.display(), "Rotated audit log");
        Ok(())
    }

    fn next_archive_path(&self, date: NaiveDate) -> PathBuf {
        let stamp = date.format(DATE_FORMAT).to_string();
        let first = self.directory.join(format!("{FILE_PREFIX}{stamp}{ARCHIVE_SUFFIX}"));
        if !first.exists() {
            return first;
        }

        (1u32..)
            .map(|n| self.directory.join(format!("{FILE_PREFIX}{stamp}.{n}{ARCHIVE_SUFFIX}")))
            .find(|candidate| !candidate.exists())
            .unwrap_or(first)
    }

    fn prune(&self, today: NaiveDate) -> io::Result<()> {
        let Some(cutoff) = today.checked_sub_days(Days::new(u64::from(self.retention_days))) else {
            return Ok(());
        };

        for (path, date, compressed) in self.scan()? {
            if compressed && date < cutoff {
                fs::remove_file(&path)?;
                info!(archive = %path.display(), "Removed expired audit log archive");
            }
        }
        Ok(())
    }

    /// Log files in the directory: (path, date, is_archive).
    fn scan(&self) -> io::Result<Vec<(PathBuf, NaiveDate, bool)>> {
        let mut found = Vec::new();
        for entry in fs::read_dir(&self.directory)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some((date, compressed)) = parse_log_name(name) {
                found.push((entry.path(), date, compressed));
            }
        }
        Ok(found)
    }
}

/// Parse `gateway-YYYY-MM-DD.log`, `gateway-YYYY-MM-DD.log.gz` or
/// `gateway-YYYY-MM-DD.N.log.gz`.
fn parse_log_name(name: &str) -> Option<(NaiveDate, bool)> {
    let rest = name.strip_prefix(FILE_PREFIX)?;
    let date = NaiveDate::parse_from_str(rest.get(..10)?, DATE_FORMAT).ok()?;
    let tail = rest.get(10..)?;

    if tail == PLAIN_SUFFIX {
        return Some((date, false));
    }

    let sequence = tail.strip_suffix(ARCHIVE_SUFFIX)?;
    if sequence.is_empty() {
        return Some((date, true));
    }
    let digits = sequence.strip_prefix('.')?;
    (!digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())).then_some((date, true))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::io::Read;

    use flate2::read::GzDecoder;

    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    fn names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        names
    }

    fn gunzip(path: &Path) -> String {
        let mut text = String::new();
        GzDecoder::new(File::open(path).unwrap())
            .read_to_string(&mut text)
            .unwrap();
        text
    }

    #[test]
    fn test_parse_log_name() {
        assert_eq!(parse_log_name("gateway-2026-03-01.log"), Some((day(1), false)));
        assert_eq!(parse_log_name("gateway-2026-03-01.log.gz"), Some((day(1), true)));
        assert_eq!(parse_log_name("gateway-2026-03-01.3.log.gz"), Some((day(1), true)));
        assert_eq!(parse_log_name("gateway-2026-03-01.x.log.gz"), None);
        assert_eq!(parse_log_name("gateway-2026-13-01.log"), None);
        assert_eq!(parse_log_name("other.log"), None);
    }

    #[test]
    fn test_writes_lines_to_dated_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = RollingFile::open(dir.path(), 1024 * 1024, 14).unwrap();

        file.write_line_at(r#"{"n":1}"#, day(1)).unwrap();
        file.write_line_at(r#"{"n":2}"#, day(1)).unwrap();

        let text = fs::read_to_string(file.log_path(day(1))).unwrap();
        assert_eq!(text, "{\"n\":1}\n{\"n\":2}\n");
    }

    #[test]
    fn test_date_change_compresses_previous_day() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = RollingFile::open(dir.path(), 1024 * 1024, 14).unwrap();

        file.write_line_at("first", day(1)).unwrap();
        file.write_line_at("second", day(2)).unwrap();

        assert_eq!(
            names(dir.path()),
            vec!["gateway-2026-03-01.log.gz", "gateway-2026-03-02.log"]
        );
        assert_eq!(gunzip(&dir.path().join("gateway-2026-03-01.log.gz")), "first\n");
    }

    #[test]
    fn test_size_cap_rolls_within_a_day() {
        let dir = tempfile::tempdir().unwrap();
        // Room for two 9-byte lines per file
        let mut file = RollingFile::open(dir.path(), 20, 14).unwrap();

        for n in 0..5 {
            file.write_line_at(&format!("line-{n:03}"), day(1)).unwrap();
        }

        assert_eq!(
            names(dir.path()),
            vec![
                "gateway-2026-03-01.1.log.gz",
                "gateway-2026-03-01.log",
                "gateway-2026-03-01.log.gz",
            ]
        );
        assert_eq!(
            gunzip(&dir.path().join("gateway-2026-03-01.log.gz")),
            "line-000\nline-001\n"
        );
        assert_eq!(fs::read_to_string(file.log_path(day(1))).unwrap(), "line-004\n");
    }

    #[test]
    fn test_retention_prunes_old_archives() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = RollingFile::open(dir.path(), 1024, 2).unwrap();

        file.write_line_at("a", day(1)).unwrap();
        file.write_line_at("b", day(2)).unwrap();
        file.write_line_at("c", day(3)).unwrap();
        assert!(dir.path().join("gateway-2026-03-01.log.gz").exists());

        // Cutoff is day 3, so the day 1 and day 2 archives expire
        file.write_line_at("d", day(5)).unwrap();

        assert_eq!(
            names(dir.path()),
            vec![
                "gateway-2026-03-03.log.gz",
                "gateway-2026-03-05.log",
            ]
        );
    }

    #[test]
    fn test_sweep_compresses_stale_plain_logs() {
        let dir = tempfile::tempdir().unwrap();
        let file = RollingFile::open(dir.path(), 1024, 14).unwrap();

        fs::write(dir.path().join("gateway-2026-03-01.log"), "left over\n").unwrap();
        fs::write(dir.path().join("gateway-2026-03-04.log"), "today\n").unwrap();
        fs::write(dir.path().join("unrelated.txt"), "keep\n").unwrap();

        file.sweep(day(4)).unwrap();

        assert_eq!(
            names(dir.path()),
            vec![
                "gateway-2026-03-01.log.gz",
                "gateway-2026-03-04.log",
                "unrelated.txt",
            ]
        );
        assert_eq!(gunzip(&dir.path().join("gateway-2026-03-01.log.gz")), "left over\n");
    }
}
