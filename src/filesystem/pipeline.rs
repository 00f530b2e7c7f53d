//! Lazy path resolution over any [`PathFileSystem`].
//!
//! A pattern is split on the backend separator and every segment becomes one
//! stage of an iterator chain seeded with the backend root:
//!
//! - `**`, `**N`, `**-1`: recursive descent (bare `**` uses the backend default depth)
//! - segments containing `*`, `?` or `[..]`: glob match on entry names
//! - anything else: direct child lookup
//!
//! Every segment but the last only passes directories. Nothing is read from the
//! backend until the returned iterator is advanced.

use glob::{MatchOptions, Pattern};
use lazy_static::lazy_static;
use log::{debug, warn};
use regex::Regex;

use super::{PathFileSystem, PathObject};

lazy_static! {
    static ref RECURSION: Regex = Regex::new(r"^\*\*(-1|\d*)(.*)$").unwrap();
    static ref GLOB: Regex = Regex::new(r"\*|\?|\[.+\]").unwrap();
}

/// Stream of resolved paths.
pub type PathStream<'a, H> = Box<dyn Iterator<Item = PathObject<H>> + 'a>;

/// One parsed pattern segment.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Recursion {
        max_depth: i32,
        /// Glob applied to names when the segment continues after the depth, as in `**.txt`
        name_filter: Option<Pattern>,
    },
    Glob(Pattern),
    Literal(String),
}

/// Classifies a single segment.
pub fn parse_segment(segment: &str, default_depth: i32) -> Segment {
    if let Some(caps) = RECURSION.captures(segment) {
        let max_depth = match &caps[1] {
            "" => default_depth,
            depth => depth.parse().unwrap_or(-1),
        };
        let name_filter = match &caps[2] {
            "" => None,
            rest => Pattern::new(&format!("*{}", rest)).ok(),
        };
        return Segment::Recursion {
            max_depth,
            name_filter,
        };
    }

    if GLOB.is_match(segment) {
        match Pattern::new(segment) {
            Ok(pattern) => return Segment::Glob(pattern),
            Err(e) => warn!("Invalid glob '{}', matching it literally: {}", segment, e),
        }
    }

    Segment::Literal(segment.to_string())
}

/// Resolves `pattern` against `fs`.
///
/// With `all_directories` every stage, including the last, only passes
/// directories; this is how registry keys are walked.
pub fn resolve<'a, F>(fs: &'a F, pattern: &str, all_directories: bool) -> PathStream<'a, F::Handle>
where
    F: PathFileSystem,
    F::Handle: 'a,
{
    let segments: Vec<&str> = pattern
        .split(fs.separator())
        .filter(|s| !s.is_empty())
        .collect();
    let count = segments.len();

    let mut stream: PathStream<'a, F::Handle> = Box::new(fs.root().into_iter());
    for (i, segment) in segments.into_iter().enumerate() {
        let directory = all_directories || i + 1 < count;
        stream = match parse_segment(segment, fs.default_recursion_depth()) {
            Segment::Recursion {
                max_depth,
                name_filter,
            } => Box::new(RecursionStage::new(fs, stream, directory, max_depth, name_filter)),
            Segment::Glob(pattern) => {
                let options = match_options(fs);
                Box::new(stream.flat_map(move |parent| {
                    list(fs, &parent)
                        .into_iter()
                        .filter(|child| {
                            pattern.matches_with(&child.name, options) && kind_matches(fs, child, directory)
                        })
                        .collect::<Vec<_>>()
                }))
            }
            Segment::Literal(name) => Box::new(
                stream
                    .filter_map(move |parent| fs.get_path(&parent, &name))
                    .filter(move |path| kind_matches(fs, path, directory)),
            ),
        };
    }
    stream
}

fn match_options<F: PathFileSystem>(fs: &F) -> MatchOptions {
    MatchOptions {
        case_sensitive: fs.case_sensitive(),
        require_literal_separator: false,
        require_literal_leading_dot: false,
    }
}

fn kind_matches<F: PathFileSystem>(fs: &F, path: &PathObject<F::Handle>, directory: bool) -> bool {
    if directory {
        fs.is_directory(path)
    } else {
        fs.is_file(path)
    }
}

fn list<F: PathFileSystem>(fs: &F, parent: &PathObject<F::Handle>) -> Vec<PathObject<F::Handle>> {
    match fs.list_directory(parent) {
        Ok(children) => children,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            debug!("Permission denied listing {}", parent.path);
            Vec::new()
        }
        Err(e) => {
            warn!("Unable to list {}: {}", parent.path, e);
            Vec::new()
        }
    }
}

enum Frame<H> {
    Children {
        entries: std::vec::IntoIter<PathObject<H>>,
        depth: i32,
    },
    Emit(PathObject<H>),
}

/// Depth-limited descent below every entry of the source stream.
///
/// Directories are yielded after their contents. Symlinked directories are
/// yielded but not entered.
struct RecursionStage<'a, F: PathFileSystem> {
    fs: &'a F,
    source: PathStream<'a, F::Handle>,
    directory: bool,
    max_depth: i32,
    name_filter: Option<Pattern>,
    stack: Vec<Frame<F::Handle>>,
}

impl<'a, F: PathFileSystem> RecursionStage<'a, F> {
    fn new(
        fs: &'a F,
        source: PathStream<'a, F::Handle>,
        directory: bool,
        max_depth: i32,
        name_filter: Option<Pattern>,
    ) -> Self {
        Self {
            fs,
            source,
            directory,
            max_depth,
            name_filter,
            stack: Vec::new(),
        }
    }

    fn descend(&mut self, parent: &PathObject<F::Handle>, depth: i32) {
        if depth < self.max_depth || self.max_depth == -1 {
            self.stack.push(Frame::Children {
                entries: list(self.fs, parent).into_iter(),
                depth,
            });
        }
    }

    fn accepts(&self, path: &PathObject<F::Handle>) -> bool {
        match &self.name_filter {
            Some(pattern) => pattern.matches_with(&path.name, match_options(self.fs)),
            None => true,
        }
    }
}

impl<'a, F: PathFileSystem> Iterator for RecursionStage<'a, F> {
    type Item = PathObject<F::Handle>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.stack.pop() {
                None => {
                    let parent = self.source.next()?;
                    self.descend(&parent, 0);
                }
                Some(Frame::Emit(path)) => {
                    if self.accepts(&path) {
                        return Some(path);
                    }
                }
                Some(Frame::Children { mut entries, depth }) => {
                    let Some(entry) = entries.next() else {
                        continue;
                    };
                    self.stack.push(Frame::Children { entries, depth });

                    if self.fs.is_directory(&entry) {
                        let enter = !self.fs.is_symlink(&entry);
                        if self.directory || self.fs.is_file(&entry) {
                            self.stack.push(Frame::Emit(entry.clone()));
                        }
                        if enter {
                            self.descend(&entry, depth + 1);
                        }
                    } else if !self.directory && self.accepts(&entry) {
                        return Some(entry);
                    }
                }
            }
        }
    }
}
