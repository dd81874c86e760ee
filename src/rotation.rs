use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::FileConfig;

/// Size-rotated log files named `{prefix}{sequence}{suffix}` in one folder.
///
/// Opening scans the folder for files of an earlier run, oldest first, and
/// continues their sequence, so restarts never overwrite old logs. Once the
/// current file reaches `approx_max_size` the next write goes to a new file.
/// Rotation happens between lines, which is why the size is approximate.
///
/// Past files beyond `file_count` are deleted (0 keeps everything), but only
/// when there are more than `delayed_file_count` of them in excess; pruning
/// then removes the whole excess at once.
///
/// # Examples
///
/// ```
/// use async_binary_logger::{FileConfig, RotatingFile};
///
/// let dir = tempfile::tempdir().unwrap();
/// let config = FileConfig {
///     out_folder: dir.path().to_path_buf(),
///     approx_max_size: 1024,
///     ..FileConfig::default()
/// };
/// let mut file = RotatingFile::open(&config).unwrap();
/// file.write(b"first line\n").unwrap();
/// file.flush().unwrap();
/// assert_eq!(file.sequence(), 0);
/// ```
pub struct RotatingFile {
    config: FileConfig,
    out: BufWriter<File>,
    size: u64,
    sequence: u64,
    // sequence numbers of closed files, oldest first
    past: VecDeque<u64>,
}

impl RotatingFile {
    pub fn open(config: &FileConfig) -> io::Result<Self> {
        fs::create_dir_all(&config.out_folder)?;

        let mut past = scan(config)?;
        past.sort_unstable();
        let sequence = past.last().map_or(0, |last| last + 1);
        let out = create(&path_for(config, sequence))?;

        let mut file = Self {
            config: config.clone(),
            out,
            size: 0,
            sequence,
            past: past.into(),
        };
        file.prune();

        tracing::debug!(path = %file.path().display(), "log file opened");
        Ok(file)
    }

    /// Appends one line, rotating first if the current file is full.
    pub fn write(&mut self, line: &[u8]) -> io::Result<()> {
        if self.size > 0 && self.size >= self.config.approx_max_size {
            self.rotate()?;
        }
        self.out.write_all(line)?;
        self.size += line.len() as u64;
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    /// Path of the file currently written.
    pub fn path(&self) -> PathBuf {
        path_for(&self.config, self.sequence)
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.out.flush()?;
        let next = self.sequence + 1;
        self.out = create(&path_for(&self.config, next))?;
        self.past.push_back(self.sequence);
        self.sequence = next;
        self.size = 0;
        self.prune();
        Ok(())
    }

    fn prune(&mut self) {
        let keep = self.config.file_count;
        if keep == 0 || self.past.len() <= keep + self.config.delayed_file_count {
            return;
        }
        while self.past.len() > keep {
            let Some(sequence) = self.past.pop_front() else {
                break;
            };
            let path = path_for(&self.config, sequence);
            if let Err(err) = fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), %err, "failed to remove old log file");
            }
        }
    }
}

impl Drop for RotatingFile {
    fn drop(&mut self) {
        let _ = self.out.flush();
    }
}

fn path_for(config: &FileConfig, sequence: u64) -> PathBuf {
    config
        .out_folder
        .join(format!("{}{}{}", config.prefix, sequence, config.suffix))
}

fn create(path: &Path) -> io::Result<BufWriter<File>> {
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    Ok(BufWriter::new(file))
}

/// Sequence numbers of the files in the folder that match the name pattern.
fn scan(config: &FileConfig) -> io::Result<Vec<u64>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(&config.out_folder)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let sequence = name
            .strip_prefix(config.prefix.as_str())
            .and_then(|rest| rest.strip_suffix(config.suffix.as_str()))
            .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|digits| digits.parse().ok());
        if let Some(sequence) = sequence {
            found.push(sequence);
        }
    }
    Ok(found)
}
