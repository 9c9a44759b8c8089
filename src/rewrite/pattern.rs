use crate::edit::rewrite_bytes;
use crate::report::ItemOutcome;
use crate::tree::Mode;
use regex::bytes::{Captures, Regex};
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Toggles a path prefix on quoted includes of a known set of headers.
///
/// Apply turns `#include "Poco/Net/Context.h"` into `#include "Context.h"`;
/// revert turns it back. Only headers named in the set are touched.
#[derive(Debug, Clone)]
pub struct IncludeRewriter {
    prefix: String,
    qualified: Regex,
    bare: Regex,
}

impl IncludeRewriter {
    /// Build the rewriter from the header names. Returns `None` for an empty set.
    pub fn new<S: AsRef<str>>(prefix: &str, headers: &[S]) -> Result<Option<Self>, regex::Error> {
        if headers.is_empty() {
            return Ok(None);
        }

        let alternation = headers
            .iter()
            .map(|header| regex::escape(header.as_ref()))
            .collect::<Vec<_>>()
            .join("|");

        let qualified = Regex::new(&format!(
            r#"#include\s+"{}({alternation})""#,
            regex::escape(prefix)
        ))?;
        let bare = Regex::new(&format!(r#"#include\s+"({alternation})""#))?;

        Ok(Some(Self {
            prefix: prefix.to_string(),
            qualified,
            bare,
        }))
    }

    /// Rewrite one file's content; `None` when nothing matched.
    ///
    /// Works on raw bytes so sources in legacy encodings are rewritten too.
    pub fn rewrite(&self, content: &[u8], mode: Mode) -> Option<Vec<u8>> {
        let rewritten = match mode {
            Mode::Apply => {
                if !self.qualified.is_match(content) {
                    return None;
                }
                self.qualified.replace_all(content, |caps: &Captures<'_>| {
                    [b"#include \"".as_slice(), &caps[1], b"\"".as_slice()].concat()
                })
            }
            Mode::Revert => {
                if !self.bare.is_match(content) {
                    return None;
                }
                self.bare.replace_all(content, |caps: &Captures<'_>| {
                    [
                        b"#include \"".as_slice(),
                        self.prefix.as_bytes(),
                        &caps[1],
                        b"\"".as_slice(),
                    ]
                    .concat()
                })
            }
        };
        Some(rewritten.into_owned())
    }

    /// Rewrite every file in `files`, continuing past per-file failures.
    pub fn rewrite_files(&self, files: &[PathBuf], mode: Mode) -> Vec<ItemOutcome> {
        files
            .iter()
            .map(|path| {
                let result = rewrite_bytes(path, |content| self.rewrite(content, mode));
                ItemOutcome::from_edit(path, result)
            })
            .collect()
    }
}

/// Regular files directly inside `dir`, sorted by name.
pub fn list_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

/// File names directly inside `dir`, sorted.
pub fn list_file_names(dir: &Path) -> io::Result<Vec<String>> {
    Ok(list_files(dir)?
        .iter()
        .filter_map(|path| path.file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::ItemStatus;
    use std::fs;

    fn rewriter() -> IncludeRewriter {
        IncludeRewriter::new("Poco/Net/", &["Context.h", "SecureSocketImpl.h"])
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_apply_strips_prefix_for_known_headers() {
        let content = b"#include \"Poco/Net/Context.h\"\n#include  \"Poco/Net/SecureSocketImpl.h\"\n#include \"Poco/Net/Socket.h\"\n";

        let rewritten = rewriter().rewrite(content, Mode::Apply).unwrap();
        assert_eq!(
            rewritten,
            b"#include \"Context.h\"\n#include \"SecureSocketImpl.h\"\n#include \"Poco/Net/Socket.h\"\n"
        );
    }

    #[test]
    fn test_revert_restores_prefix() {
        let content = b"#include \"Context.h\"\n#include \"Poco/Net/Socket.h\"\n";

        let rewritten = rewriter().rewrite(content, Mode::Revert).unwrap();
        assert_eq!(
            rewritten,
            b"#include \"Poco/Net/Context.h\"\n#include \"Poco/Net/Socket.h\"\n"
        );
    }

    #[test]
    fn test_reapplying_a_direction_is_a_no_op() {
        let rewriter = rewriter();
        let applied = rewriter
            .rewrite(b"#include \"Poco/Net/Context.h\"\n", Mode::Apply)
            .unwrap();
        assert_eq!(rewriter.rewrite(&applied, Mode::Apply), None);

        let reverted = rewriter.rewrite(&applied, Mode::Revert).unwrap();
        assert_eq!(rewriter.rewrite(&reverted, Mode::Revert), None);
        assert_eq!(reverted, b"#include \"Poco/Net/Context.h\"\n");
    }

    #[test]
    fn test_header_names_are_escaped() {
        let rewriter = IncludeRewriter::new("Poco/Net/", &["Context.h"]).unwrap().unwrap();
        assert_eq!(rewriter.rewrite(b"#include \"Poco/Net/ContextXh\"", Mode::Apply), None);
    }

    #[test]
    fn test_empty_header_set() {
        let headers: [&str; 0] = [];
        assert!(IncludeRewriter::new("Poco/Net/", &headers).unwrap().is_none());
    }

    #[test]
    fn test_rewrite_files_continues_past_failures() {
        let temp_dir = tempfile::tempdir().unwrap();
        let good = temp_dir.path().join("Context.cpp");
        let dir = temp_dir.path().join("Nested.cpp");
        let missing = temp_dir.path().join("Missing.cpp");
        let last = temp_dir.path().join("Utility.cpp");
        fs::write(&good, "#include \"Poco/Net/Context.h\"\n").unwrap();
        fs::create_dir_all(&dir).unwrap();
        fs::write(&last, "#include \"Poco/Net/SecureSocketImpl.h\"\n").unwrap();

        let outcomes =
            rewriter().rewrite_files(&[good.clone(), dir, missing, last.clone()], Mode::Apply);

        assert_eq!(outcomes.len(), 4);
        assert_eq!(outcomes[0].status, ItemStatus::Rewritten);
        assert!(matches!(outcomes[1].status, ItemStatus::Skipped { .. }));
        assert!(matches!(outcomes[2].status, ItemStatus::Skipped { .. }));
        assert_eq!(outcomes[3].status, ItemStatus::Rewritten);
        assert_eq!(
            fs::read_to_string(&last).unwrap(),
            "#include \"SecureSocketImpl.h\"\n"
        );
    }

    #[test]
    fn test_list_files_is_flat_and_sorted() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("b.h"), "").unwrap();
        fs::write(temp_dir.path().join("a.h"), "").unwrap();
        fs::create_dir_all(temp_dir.path().join("nested")).unwrap();
        fs::write(temp_dir.path().join("nested/c.h"), "").unwrap();

        let names = list_file_names(temp_dir.path()).unwrap();
        assert_eq!(names, vec!["a.h".to_string(), "b.h".to_string()]);
    }

    #[test]
    fn test_non_utf8_source_is_rewritten() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("Context.cpp");
        fs::write(
            &path,
            b"// Copyright (c) 2006, Applied Informatics \xa9\n#include \"Poco/Net/Context.h\"\n",
        )
        .unwrap();

        let outcomes = rewriter().rewrite_files(std::slice::from_ref(&path), Mode::Apply);
        assert_eq!(outcomes[0].status, ItemStatus::Rewritten);
        assert_eq!(
            fs::read(&path).unwrap(),
            b"// Copyright (c) 2006, Applied Informatics \xa9\n#include \"Context.h\"\n"
        );

        let outcomes = rewriter().rewrite_files(std::slice::from_ref(&path), Mode::Revert);
        assert_eq!(outcomes[0].status, ItemStatus::Rewritten);
        assert_eq!(
            fs::read(&path).unwrap(),
            b"// Copyright (c) 2006, Applied Informatics \xa9\n#include \"Poco/Net/Context.h\"\n"
        );
    }
}
