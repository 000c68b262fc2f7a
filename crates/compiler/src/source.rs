use std::{
    collections::HashMap,
    io,
    num::NonZeroU32,
    path::{Path, PathBuf},
};

/// A unique identifier for a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(NonZeroU32);

impl SourceId {
    pub fn get(&self) -> u32 {
        self.0.get()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Source {
    File {
        path: PathBuf,
        contents: ariadne::Source,
    },
    Memory {
        contents: ariadne::Source,
    },

    None,
}

pub struct SourceManager {
    sources: Vec<Source>,
    file_map: HashMap<PathBuf, SourceId>,
}

impl SourceManager {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            file_map: HashMap::new(),
        }
    }

    pub fn text_for(&self, id: SourceId) -> Option<&str> {
        self.get_source(id).and_then(|source| match source {
            Source::File { contents, .. } => Some(contents.text()),
            Source::Memory { contents } => Some(contents.text()),
            _ => None,
        })
    }

    pub fn open_file(&mut self, path: impl AsRef<Path>) -> io::Result<SourceId> {
        let path = path.as_ref().to_path_buf();
        let contents = std::fs::read_to_string(&path)?;
        let id = SourceId(NonZeroU32::new(self.sources.len() as u32 + 1).unwrap());
        self.sources.push(Source::File {
            path: path.clone(),
            contents: ariadne::Source::from(contents),
        });
        self.file_map.insert(path, id);
        Ok(id)
    }

    pub fn get_source(&self, id: SourceId) -> Option<&Source> {
        self.sources.get(id.0.get() as usize - 1)
    }

    pub fn get_source_by_path(&self, path: impl AsRef<Path>) -> Option<&Source> {
        self.file_map
            .get(path.as_ref())
            .and_then(|id| self.get_source(*id))
    }

    pub fn add_memory_source(&mut self, contents: String) -> SourceId {
        let id = SourceId(NonZeroU32::new(self.sources.len() as u32 + 1).unwrap());
        self.sources.push(Source::Memory {
            contents: ariadne::Source::from(contents),
        });
        id
    }
}

/// A span is a byte range into a registered source. Expressions of the input
/// IR carry one; the lowering threads them through to `Levent` wrappers and
/// diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    pub source_id: Option<SourceId>,
    pub start_byte: usize,
    pub end_byte: usize,
}

impl Default for Span {
    fn default() -> Self {
        Self {
            source_id: None,
            start_byte: 0,
            end_byte: 0,
        }
    }
}

impl Span {
    pub fn new(source_id: Option<SourceId>, start_byte: usize, end_byte: usize) -> Self {
        Self {
            source_id,
            start_byte,
            end_byte,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.start_byte == self.end_byte
    }

    pub fn length(&self) -> usize {
        self.end_byte - self.start_byte
    }

    pub fn contains(&self, other: &Span) -> bool {
        self.source_id == other.source_id
            && self.start_byte <= other.start_byte
            && self.end_byte >= other.end_byte
    }

    pub fn union_(&self, other: &Span) -> Option<Span> {
        if self.source_id != other.source_id {
            return None;
        }
        Some(Span {
            source_id: self.source_id,
            start_byte: self.start_byte.min(other.start_byte),
            end_byte: self.end_byte.max(other.end_byte),
        })
    }
}

impl ariadne::Span for Span {
    type SourceId = Option<SourceId>;

    fn source(&self) -> &Self::SourceId {
        &self.source_id
    }

    fn start(&self) -> usize {
        self.start_byte
    }

    fn end(&self) -> usize {
        self.end_byte
    }
}

impl ariadne::Cache<Option<SourceId>> for &SourceManager {
    type Storage = String;

    fn fetch(
        &mut self,
        id: &Option<SourceId>,
    ) -> Result<&ariadne::Source<Self::Storage>, impl std::fmt::Debug> {
        match id {
            Some(id) => {
                if let Some(source) = self.get_source(*id) {
                    match source {
                        Source::File { contents, .. } => Ok(contents),
                        Source::Memory { contents } => Ok(contents),
                        Source::None => Err("Source is None".to_owned()),
                    }
                } else {
                    Err("Source not found".to_owned())
                }
            }

            None => Err("No source ID provided".into()),
        }
    }

    fn display<'a>(&self, id: &'a Option<SourceId>) -> Option<impl std::fmt::Display + 'a> {
        id.and_then(|source_id| {
            self.get_source(source_id).map(|source| match source {
                Source::File { path, .. } => path.to_string_lossy().to_string(),
                Source::Memory { .. } => "<memory>".to_string(),
                Source::None => "<none>".to_string(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sources_are_retrievable() {
        let mut mgr = SourceManager::new();
        let id = mgr.add_memory_source("let x = 1".to_string());
        assert_eq!(mgr.text_for(id), Some("let x = 1"));
    }

    #[test]
    fn span_union_requires_same_source() {
        let a = Span::new(None, 0, 4);
        let b = Span::new(None, 2, 9);
        let u = a.union_(&b).unwrap();
        assert_eq!((u.start_byte, u.end_byte), (0, 9));
        assert!(a.contains(&Span::new(None, 1, 3)));
    }
}
