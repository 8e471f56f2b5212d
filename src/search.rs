//! Recursive name-glob and line-level content grep (spec §2 SearchEngine;
//! not required by a specific external format, grounded on the glob-match
//! shape used for simple pattern matching throughout the example pack).

use crate::error::FsResult;
use crate::node::Node;
use crate::tree::TreeStore;

/// A name-glob match: the matched path and its node kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchMatch {
    pub path: String,
}

/// One matching line from a content grep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrepMatch {
    pub path: String,
    pub line_number: usize,
    pub line: String,
}

/// Recursively list every path under `root` whose basename matches `pattern`
/// (`*` = any run of characters, `?` = exactly one character).
pub fn find_by_name(tree: &TreeStore, root: &str, pattern: &str) -> FsResult<Vec<SearchMatch>> {
    let mut out = Vec::new();
    walk(tree, root, &mut |p, node| {
        let name = node.meta().name.as_str();
        let basename = if name.is_empty() { "/" } else { name };
        if glob_match(pattern, basename) {
            out.push(SearchMatch { path: p.to_string() });
        }
    })?;
    Ok(out)
}

/// Recursively grep file content under `root` for lines containing `needle`
/// (plain substring match, case-sensitive).
pub fn grep(tree: &TreeStore, root: &str, needle: &str) -> FsResult<Vec<GrepMatch>> {
    let mut out = Vec::new();
    walk(tree, root, &mut |p, node| {
        if let Node::File(file) = node {
            let content: Vec<u8> = file.blocks.iter().flat_map(|b| b.0.iter().copied()).collect();
            let text = String::from_utf8_lossy(&content);
            for (idx, line) in text.lines().enumerate() {
                if line.contains(needle) {
                    out.push(GrepMatch { path: p.to_string(), line_number: idx + 1, line: line.to_string() });
                }
            }
        }
    })?;
    Ok(out)
}

fn walk(tree: &TreeStore, root: &str, visit: &mut impl FnMut(&str, &Node)) -> FsResult<()> {
    for p in tree.subtree_paths(root)? {
        let node = tree.get(&p)?;
        visit(&p, node);
    }
    Ok(())
}

/// Anchored glob match supporting `*` and `?`.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let txt: Vec<char> = text.chars().collect();
    match_at(&pat, 0, &txt, 0)
}

fn match_at(pat: &[char], pi: usize, txt: &[char], ti: usize) -> bool {
    if pi == pat.len() {
        return ti == txt.len();
    }
    match pat[pi] {
        '*' => {
            for next_ti in ti..=txt.len() {
                if match_at(pat, pi + 1, txt, next_ti) {
                    return true;
                }
            }
            false
        }
        '?' => ti < txt.len() && match_at(pat, pi + 1, txt, ti + 1),
        c => ti < txt.len() && txt[ti] == c && match_at(pat, pi + 1, txt, ti + 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_star_matches_any_suffix() {
        assert!(glob_match("*.txt", "notes.txt"));
        assert!(!glob_match("*.txt", "notes.md"));
    }

    #[test]
    fn glob_question_matches_single_char() {
        assert!(glob_match("a?c", "abc"));
        assert!(!glob_match("a?c", "abbc"));
    }

    #[test]
    fn find_by_name_walks_subtree() {
        let mut tree = TreeStore::new(64 * 1024, 0);
        tree.create_dir("/d", 0).unwrap();
        tree.create_file("/d/a.txt", 0).unwrap();
        tree.create_file("/d/b.md", 0).unwrap();
        let matches = find_by_name(&tree, "/d", "*.txt").unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].path, "/d/a.txt");
    }

    #[test]
    fn grep_finds_matching_lines() {
        let mut tree = TreeStore::new(64 * 1024, 0);
        tree.create_file("/f", 0).unwrap();
        tree.write_at("/f", 0, b"alpha\nbeta needle\ngamma", 0).unwrap();
        let matches = grep(&tree, "/f", "needle").unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].line_number, 2);
    }
}
