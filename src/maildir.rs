//! Maildir store
//!
//! Enumerates folders and messages under a maildir root and performs
//! the three mutations the engine needs: move a message to another
//! folder, replace its contents, and remove it.
//!
//! Layout is `<root>/<folder>/{new,cur,tmp}` with folder hierarchy
//! encoded by `.` in the folder name (`gmail.Sent_Mail`). A message
//! file is named `<key>[:<flags>]`.
//!
//! # Durability
//!
//! Nothing here calls `fsync`. A replacement is written to `tmp/` and
//! renamed over the original, and a move is a single rename, so a
//! crash leaves either the old or the new file in place but never a
//! half-written message. What the OS has not yet flushed may be lost.

use crate::error::{Error, Result};
use std::fs::{self, File, Metadata};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, trace};

const NEW: &str = "new";
const CUR: &str = "cur";
const TMP: &str = "tmp";

/// Separator between a message key and its maildir info suffix.
const INFO_SEPARATOR: char = ':';

/// Which subdirectory a message currently lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadState {
    /// Delivered but not yet seen by a mail client (`new/`).
    New,
    /// Seen at least once (`cur/`).
    Cur,
}

impl ReadState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => NEW,
            Self::Cur => CUR,
        }
    }
}

/// The root of a maildir tree.
#[derive(Debug, Clone)]
pub struct Maildir {
    root: PathBuf,
}

impl Maildir {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// A handle on the named folder. Does not touch the disk.
    #[must_use]
    pub fn folder(&self, name: &str) -> Folder {
        Folder::new(&self.root, name)
    }

    /// Every folder under the root, sorted by name.
    ///
    /// A folder is any non-hidden subdirectory holding both `new/`
    /// and `cur/`.
    ///
    /// # Errors
    ///
    /// Returns an error if the root cannot be read.
    pub fn folders(&self) -> Result<Vec<Folder>> {
        let mut folders = Vec::new();

        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }

            let folder = Folder::new(&self.root, &name);
            if folder.exists() {
                folders.push(folder);
            } else {
                trace!("Ignoring {} (not a maildir folder)", name);
            }
        }

        folders.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(folders)
    }

    /// Remove a drained folder.
    ///
    /// Removal is non-recursive: `new/`, `cur/` and `tmp/` must already
    /// be empty, so no message can be lost here.
    ///
    /// # Errors
    ///
    /// Returns the first removal failure.
    pub fn remove_folder(&self, name: &str) -> Result<()> {
        let path = self.root.join(name);
        for sub in [NEW, CUR, TMP] {
            let sub = path.join(sub);
            if sub.exists() {
                fs::remove_dir(&sub)?;
            }
        }
        fs::remove_dir(&path)?;
        debug!("Removed folder {}", name);
        Ok(())
    }
}

/// A maildir folder: `(root, basename)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Folder {
    root: PathBuf,
    name: String,
}

impl Folder {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            name: name.into(),
        }
    }

    /// The folder basename (`INBOX`, `gmail.Trash`).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.root.join(&self.name)
    }

    /// Whether `new/` and `cur/` both exist.
    #[must_use]
    pub fn exists(&self) -> bool {
        let path = self.path();
        path.join(NEW).is_dir() && path.join(CUR).is_dir()
    }

    /// All messages in the folder, `new/` first, then `cur/`.
    ///
    /// Dotfiles and anything that is not a regular file are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if either directory cannot be read.
    pub fn messages(&self) -> Result<Vec<MailEntry>> {
        let mut entries = Vec::new();

        for state in [ReadState::New, ReadState::Cur] {
            let dir = self.path().join(state.as_str());
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                let filename = entry.file_name().to_string_lossy().to_string();
                if filename.starts_with('.') || !entry.file_type()?.is_file() {
                    continue;
                }
                entries.push(MailEntry::from_filename(self.clone(), state, &filename));
            }
        }

        Ok(entries)
    }

    /// Look up a message by its on-disk filename.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] with `NotFound` if neither `new/` nor
    /// `cur/` has the file.
    pub fn find(&self, filename: &str) -> Result<MailEntry> {
        for state in [ReadState::New, ReadState::Cur] {
            if self.path().join(state.as_str()).join(filename).is_file() {
                return Ok(MailEntry::from_filename(self.clone(), state, filename));
            }
        }

        Err(Error::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no message {filename} in {}", self.name),
        )))
    }
}

/// A single message file inside a folder.
///
/// Holding an entry does not read the file; content and metadata are
/// loaded on demand.
#[derive(Debug, Clone)]
pub struct MailEntry {
    folder: Folder,
    key: String,
    flags: Option<String>,
    state: ReadState,
    metadata: OnceLock<Metadata>,
}

impl MailEntry {
    fn from_filename(folder: Folder, state: ReadState, filename: &str) -> Self {
        let (key, flags) = match filename.split_once(INFO_SEPARATOR) {
            Some((key, flags)) => (key.to_string(), Some(flags.to_string())),
            None => (filename.to_string(), None),
        };

        Self {
            folder,
            key,
            flags,
            state,
            metadata: OnceLock::new(),
        }
    }

    /// The unique maildir key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The info suffix after `:`, e.g. `2,S`.
    #[must_use]
    pub fn flags(&self) -> Option<&str> {
        self.flags.as_deref()
    }

    #[must_use]
    pub const fn read_state(&self) -> ReadState {
        self.state
    }

    #[must_use]
    pub const fn folder(&self) -> &Folder {
        &self.folder
    }

    /// `<key>[:<flags>]`
    #[must_use]
    pub fn filename(&self) -> String {
        match &self.flags {
            Some(flags) => format!("{}{INFO_SEPARATOR}{flags}", self.key),
            None => self.key.clone(),
        }
    }

    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.folder
            .path()
            .join(self.state.as_str())
            .join(self.filename())
    }

    /// File metadata, cached after the first call.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be stat'ed.
    pub fn stat(&self) -> Result<&Metadata> {
        if let Some(meta) = self.metadata.get() {
            return Ok(meta);
        }
        let meta = fs::metadata(self.path())?;
        Ok(self.metadata.get_or_init(|| meta))
    }

    /// Open the message for reading. The file closes when the reader
    /// is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open(&self) -> Result<BufReader<File>> {
        Ok(BufReader::new(File::open(self.path())?))
    }

    /// Read the whole message into memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn read(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.open()?.read_to_end(&mut buf)?;
        trace!("Read {} bytes from {}", buf.len(), self.path().display());
        Ok(buf)
    }

    /// Rename the file into `dest`, keeping its read state and name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the destination folder does not
    /// exist (folders are never created here) and [`Error::Io`] if the
    /// rename fails.
    pub fn move_to(&mut self, dest: &Folder) -> Result<()> {
        if dest == &self.folder {
            return Ok(());
        }

        let dest_dir = dest.path().join(self.state.as_str());
        if !dest_dir.is_dir() {
            return Err(Error::Config(format!(
                "destination folder {} does not exist",
                dest.name()
            )));
        }

        let src = self.path();
        fs::rename(&src, dest_dir.join(self.filename()))?;
        debug!("Moved {} from {} to {}", self.key, self.folder.name, dest.name);

        self.folder = dest.clone();
        self.metadata.take();
        Ok(())
    }

    /// Start rewriting the message.
    ///
    /// Bytes go to `<folder>/tmp/<key>[:flags]`; nothing touches the
    /// original until [`Replacement::commit`] renames the new file
    /// over it.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary file cannot be created.
    pub fn replace(&mut self) -> Result<Replacement> {
        let tmp = self.folder.path().join(TMP).join(self.filename());
        let file = File::create(&tmp)?;
        self.metadata.take();

        Ok(Replacement {
            file,
            tmp: Some(tmp),
            target: self.path(),
        })
    }

    /// Unlink the message.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be removed.
    pub fn remove(self) -> Result<()> {
        fs::remove_file(self.path())?;
        debug!("Removed {} from {}", self.key, self.folder.name);
        Ok(())
    }
}

/// Write handle for an in-progress message rewrite.
///
/// Dropping it without calling [`commit`](Self::commit) deletes the
/// temporary file and leaves the original untouched.
#[derive(Debug)]
pub struct Replacement {
    file: File,
    tmp: Option<PathBuf>,
    target: PathBuf,
}

impl Replacement {
    /// Flush and rename the new contents over the original.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush or rename fails; the original is
    /// then still in place.
    pub fn commit(mut self) -> Result<()> {
        self.file.flush()?;
        if let Some(tmp) = self.tmp.take() {
            if let Err(err) = fs::rename(&tmp, &self.target) {
                fs::remove_file(&tmp).ok();
                return Err(err.into());
            }
        }
        Ok(())
    }
}

impl Write for Replacement {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Drop for Replacement {
    fn drop(&mut self) {
        if let Some(tmp) = self.tmp.take() {
            // best effort
            fs::remove_file(tmp).ok();
        }
    }
}
