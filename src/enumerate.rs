//! Source discovery.
//!
//! Walks a root (a directory tree or a single `.zip`) and lazily yields every
//! file, unwrapping archives found anywhere under it, including archives
//! nested inside archives. Each source's metadata is known before its
//! contents are touched: contents are read only for sources accepted by the
//! caller's filter, so members that need no work are never decompressed.
//!
//! Unreadable files, corrupt archives, and unreadable members are yielded as
//! [`SkippedSource`] items, so one bad entry never stops the walk.

use anyhow::Result;
use chrono::NaiveDate;
use globset::{GlobBuilder, GlobMatcher};
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

use crate::models::{Category, SourceRef};

/// Archives nested deeper than this are reported as skipped.
const MAX_ARCHIVE_DEPTH: usize = 4;

/// One discovered source.
#[derive(Debug, Clone)]
pub struct RawSource {
    pub reference: SourceRef,
    /// Uncompressed size in bytes.
    pub size: u64,
    /// Raw contents, present only when the read filter accepted the source.
    pub bytes: Option<Vec<u8>>,
}

/// A source that could not be opened or decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedSource {
    pub id: String,
    pub reason: String,
}

pub type SourceItem = std::result::Result<RawSource, SkippedSource>;

pub fn is_archive_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
}

/// Walks one root.
#[derive(Debug, Clone)]
pub struct SourceEnumerator {
    root: PathBuf,
    follow_symlinks: bool,
    exclude: Option<PathBuf>,
}

impl SourceEnumerator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            follow_symlinks: false,
            exclude: None,
        }
    }

    pub fn follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// Skips `dir` (and everything below it) when it lies under the root.
    /// Used to keep the cache directory out of the walk.
    pub fn excluding(mut self, dir: &Path) -> Self {
        self.exclude = resolve_under(&self.root, dir);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every source under the root. `read_filter` sees each source's identity
    /// and modification time; contents are read only when it returns `true`.
    pub fn scan<'a>(&self, read_filter: impl Fn(&SourceRef) -> bool + 'a) -> Sources<'a> {
        let walker = self.root.exists().then(|| {
            WalkDir::new(&self.root)
                .follow_links(self.follow_symlinks)
                .sort_by_file_name()
                .into_iter()
        });
        Sources {
            root: self.root.clone(),
            exclude: self.exclude.clone(),
            walker,
            archives: Vec::new(),
            read_filter: Box::new(read_filter),
        }
    }

    /// Archive files on disk under the root with their sizes. Archives are
    /// not opened.
    pub fn archives(&self) -> Vec<(String, u64)> {
        if !self.root.exists() {
            return Vec::new();
        }
        let exclude = self.exclude.as_deref();
        WalkDir::new(&self.root)
            .follow_links(self.follow_symlinks)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !exclude.is_some_and(|dir| e.path().starts_with(dir)))
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && is_archive_name(&e.file_name().to_string_lossy()))
            .map(|e| {
                let size = e.metadata().map(|m| m.len()).unwrap_or(0);
                (relative_id(&self.root, e.path()), size)
            })
            .collect()
    }

    /// Sources whose file name matches `pattern`, with their contents.
    pub fn matching(&self, pattern: &str) -> Result<impl Iterator<Item = SourceItem>> {
        let matcher = GlobBuilder::new(pattern).build()?.compile_matcher();
        let filter = matcher.clone();
        Ok(self
            .scan(move |source| filter.is_match(source.file_name()))
            .filter(move |item| match item {
                Ok(source) => matcher.is_match(source.reference.file_name()),
                Err(_) => true,
            }))
    }
}

/// Lazy sequence of discovered sources. Each call to
/// [`SourceEnumerator::scan`] re-walks the root.
///
/// Open archives form a stack: the innermost archive is drained one member
/// per step before the walk (or the enclosing archive) resumes.
pub struct Sources<'a> {
    root: PathBuf,
    exclude: Option<PathBuf>,
    walker: Option<walkdir::IntoIter>,
    archives: Vec<OpenArchive>,
    read_filter: Box<dyn Fn(&SourceRef) -> bool + 'a>,
}

impl Iterator for Sources<'_> {
    type Item = SourceItem;

    fn next(&mut self) -> Option<SourceItem> {
        loop {
            let depth = self.archives.len();
            if let Some(archive) = self.archives.last_mut() {
                match archive.next_member(depth, self.read_filter.as_ref()) {
                    Some(Member::Source(item)) => return Some(item),
                    Some(Member::Archive(nested)) => self.archives.push(nested),
                    Some(Member::Directory) => {}
                    None => {
                        self.archives.pop();
                    }
                }
                continue;
            }

            let walker = self.walker.as_mut()?;
            let entry = match walker.next() {
                None => {
                    self.walker = None;
                    return None;
                }
                Some(Err(e)) => {
                    let id = e
                        .path()
                        .map(|p| relative_id(&self.root, p))
                        .unwrap_or_else(|| self.root.display().to_string());
                    tracing::warn!(source = %id, error = %e, "skipping unreadable path");
                    return Some(Err(SkippedSource {
                        id,
                        reason: e.to_string(),
                    }));
                }
                Some(Ok(entry)) => entry,
            };

            if self
                .exclude
                .as_deref()
                .is_some_and(|dir| entry.path().starts_with(dir))
            {
                if entry.file_type().is_dir() {
                    walker.skip_current_dir();
                }
                continue;
            }
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let id = relative_id(&self.root, path);

            if is_archive_name(&entry.file_name().to_string_lossy()) {
                match open_archive_file(path, id) {
                    Ok(archive) => self.archives.push(archive),
                    Err(skipped) => return Some(Err(skipped)),
                }
                continue;
            }

            return Some(load_file(path, id, self.read_filter.as_ref()));
        }
    }
}

/// Root-relative identifier; a root that is itself a file is named by its
/// file name.
fn relative_id(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    if relative.as_os_str().is_empty() {
        path.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string())
    } else {
        relative.to_string_lossy().replace('\\', "/")
    }
}

/// Maps `dir` to the form walkdir reports for paths under `root`, if it lies
/// under `root` at all.
fn resolve_under(root: &Path, dir: &Path) -> Option<PathBuf> {
    let root_abs = root.canonicalize().ok()?;
    let dir_abs = dir.canonicalize().ok()?;
    let relative = dir_abs.strip_prefix(&root_abs).ok()?;
    if relative.as_os_str().is_empty() {
        return None;
    }
    Some(root.join(relative))
}

pub(crate) fn system_time_secs(time: std::io::Result<SystemTime>) -> i64 {
    time.unwrap_or(SystemTime::UNIX_EPOCH)
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

fn load_file(path: &Path, id: String, read_filter: &dyn Fn(&SourceRef) -> bool) -> SourceItem {
    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) => return Err(skipped(id, e)),
    };
    let reference = SourceRef::new(id, system_time_secs(metadata.modified()));
    let bytes = if read_filter(&reference) {
        match std::fs::read(path) {
            Ok(b) => Some(b),
            Err(e) => return Err(skipped(reference.id, e)),
        }
    } else {
        None
    };
    Ok(RawSource {
        reference,
        size: metadata.len(),
        bytes,
    })
}

fn skipped(id: String, reason: impl std::fmt::Display) -> SkippedSource {
    tracing::warn!(source = %id, error = %reason, "skipping unreadable source");
    SkippedSource {
        id,
        reason: reason.to_string(),
    }
}

trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

/// One archive being drained, at any nesting level.
struct OpenArchive {
    archive: zip::ZipArchive<Box<dyn ReadSeek>>,
    id: String,
    /// Used for members without a usable timestamp.
    fallback_modified: i64,
    next: usize,
}

enum Member {
    Source(SourceItem),
    Archive(OpenArchive),
    Directory,
}

fn open_archive_file(path: &Path, id: String) -> std::result::Result<OpenArchive, SkippedSource> {
    let fallback_modified = std::fs::metadata(path)
        .map(|m| system_time_secs(m.modified()))
        .unwrap_or(0);
    match File::open(path) {
        Ok(file) => OpenArchive::new(Box::new(BufReader::new(file)), id, fallback_modified),
        Err(e) => Err(skipped(id, e)),
    }
}

impl OpenArchive {
    fn new(
        reader: Box<dyn ReadSeek>,
        id: String,
        fallback_modified: i64,
    ) -> std::result::Result<Self, SkippedSource> {
        match zip::ZipArchive::new(reader) {
            Ok(archive) => Ok(Self {
                archive,
                id,
                fallback_modified,
                next: 0,
            }),
            Err(e) => Err(skipped(id, e)),
        }
    }

    /// Advances past one member. `depth` is the number of archives open,
    /// this one included. Returns `None` once every member has been seen.
    fn next_member(
        &mut self,
        depth: usize,
        read_filter: &dyn Fn(&SourceRef) -> bool,
    ) -> Option<Member> {
        let index = self.next;
        if index >= self.archive.len() {
            return None;
        }
        self.next += 1;

        let mut entry = match self.archive.by_index(index) {
            Ok(entry) => entry,
            Err(e) => {
                return Some(Member::Source(Err(skipped(
                    format!("{}!#{}", self.id, index),
                    e,
                ))))
            }
        };
        if entry.is_dir() {
            return Some(Member::Directory);
        }
        let modified = entry
            .last_modified()
            .and_then(zip_epoch_secs)
            .unwrap_or(self.fallback_modified);
        let reference = SourceRef::new(format!("{}!{}", self.id, entry.name()), modified);
        let size = entry.size();

        if is_archive_name(reference.file_name()) {
            if depth >= MAX_ARCHIVE_DEPTH {
                return Some(Member::Source(Err(skipped(
                    reference.id,
                    "archive nesting too deep",
                ))));
            }
            let mut nested = Vec::new();
            if let Err(e) = entry.read_to_end(&mut nested) {
                return Some(Member::Source(Err(skipped(reference.id, e))));
            }
            drop(entry);
            let opened = OpenArchive::new(Box::new(Cursor::new(nested)), reference.id, modified);
            return Some(match opened {
                Ok(nested) => Member::Archive(nested),
                Err(skipped) => Member::Source(Err(skipped)),
            });
        }

        let bytes = if read_filter(&reference) {
            let mut buf = Vec::new();
            if let Err(e) = entry.read_to_end(&mut buf) {
                return Some(Member::Source(Err(skipped(reference.id, e))));
            }
            Some(buf)
        } else {
            None
        };
        Some(Member::Source(Ok(RawSource {
            reference,
            size,
            bytes,
        })))
    }
}

/// Archive-entry timestamps carry no zone; they are read as UTC.
fn zip_epoch_secs(dt: zip::DateTime) -> Option<i64> {
    NaiveDate::from_ymd_opt(dt.year().into(), dt.month().into(), dt.day().into())?
        .and_hms_opt(dt.hour().into(), dt.minute().into(), dt.second().into())
        .map(|naive| naive.and_utc().timestamp())
}

// ═══════════════════════════════════════════════════════════════════════
// Category matching
// ═══════════════════════════════════════════════════════════════════════

/// Maps sources to categories by file name, one glob per category. A name
/// matches at most one category: the first in [`Category::ALL`] order wins.
///
/// Archive members are additionally tested against the archived globs,
/// which never apply to loose files.
#[derive(Debug, Clone)]
pub struct CategoryMatcher {
    matchers: Vec<(Category, GlobMatcher)>,
    archived: Vec<(Category, GlobMatcher)>,
}

/// Daily-summary globs match case-insensitively.
fn compile(category: Category, pattern: &str) -> Result<GlobMatcher> {
    let glob = GlobBuilder::new(pattern)
        .case_insensitive(category == Category::Daily)
        .build()?;
    Ok(glob.compile_matcher())
}

impl CategoryMatcher {
    /// Builds a matcher from `(category, glob)` pairs.
    pub fn new<'p>(patterns: impl IntoIterator<Item = (Category, &'p str)>) -> Result<Self> {
        let mut matchers = patterns
            .into_iter()
            .map(|(category, pattern)| Ok((category, compile(category, pattern)?)))
            .collect::<Result<Vec<_>>>()?;
        matchers.sort_by_key(|(category, _)| *category);
        Ok(Self {
            matchers,
            archived: Vec::new(),
        })
    }

    /// Adds a glob that only matches members of archives.
    pub fn with_archived(mut self, category: Category, pattern: &str) -> Result<Self> {
        self.archived.push((category, compile(category, pattern)?));
        self.archived.sort_by_key(|(category, _)| *category);
        Ok(self)
    }

    pub fn classify(&self, source: &SourceRef) -> Option<Category> {
        let name = source.file_name();
        let archived = self.archived.iter().filter(|_| source.in_archive());
        self.matchers
            .iter()
            .chain(archived)
            .find(|(_, m)| m.is_match(name))
            .map(|(category, _)| *category)
    }

    pub fn matches_any(&self, source: &SourceRef) -> bool {
        self.classify(source).is_some()
    }
}

impl Default for CategoryMatcher {
    fn default() -> Self {
        let build = |pattern: fn(&Category) -> Option<&'static str>| {
            Category::ALL
                .into_iter()
                .filter_map(|category| {
                    let matcher = compile(category, pattern(&category)?).ok()?;
                    Some((category, matcher))
                })
                .collect::<Vec<_>>()
        };
        Self {
            matchers: build(|c| Some(c.default_pattern())),
            archived: build(Category::archived_pattern),
        }
    }
}
