//! Git history for directory-backed stores
//!
//! Each committed readwrite transaction becomes one commit, so the history of
//! the store directory is the history of its writes. Nothing here is shared
//! with readers: the in-memory tables remain the source of truth while the
//! client is open.

use crate::config::Author;
use git2::{IndexAddOption, Oid, Repository as Git2Repo, Signature};
use std::path::Path;

/// Git repository wrapper for a store directory
pub struct Repository {
    inner: Git2Repo,
    author: Author,
}

impl Repository {
    /// Open an existing repository or initialize a new one
    pub fn open_or_init(path: &Path, author: Author) -> anyhow::Result<Self> {
        let inner = match Git2Repo::open(path) {
            Ok(repo) => repo,
            Err(_) => {
                let repo = Git2Repo::init(path)?;
                Self::create_initial_commit(&repo, &author)?;
                repo
            }
        };

        Ok(Self { inner, author })
    }

    fn create_initial_commit(repo: &Git2Repo, author: &Author) -> anyhow::Result<()> {
        let sig = Signature::now(&author.name, &author.email)?;
        let tree_id = repo.index()?.write_tree()?;
        let tree = repo.find_tree(tree_id)?;

        repo.commit(Some("HEAD"), &sig, &sig, "Initialize relkv store", &tree, &[])?;

        Ok(())
    }

    /// Stage everything and commit it
    pub fn commit(&self, message: &str) -> anyhow::Result<Oid> {
        let sig = Signature::now(&self.author.name, &self.author.email)?;
        let mut index = self.inner.index()?;

        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.write()?;

        let tree_id = index.write_tree()?;
        let tree = self.inner.find_tree(tree_id)?;
        let parent = self.inner.head()?.peel_to_commit()?;

        let oid = self.inner.commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])?;
        Ok(oid)
    }

    /// Check if there are uncommitted changes
    pub fn has_changes(&self) -> anyhow::Result<bool> {
        let statuses = self.inner.statuses(None)?;
        Ok(!statuses.is_empty())
    }

    /// Number of commits reachable from HEAD
    pub fn commit_count(&self) -> anyhow::Result<usize> {
        let mut walk = self.inner.revwalk()?;
        walk.push_head()?;
        Ok(walk.count())
    }

    /// Summary line of the HEAD commit
    pub fn head_message(&self) -> anyhow::Result<String> {
        let commit = self.inner.head()?.peel_to_commit()?;
        Ok(commit.summary().unwrap_or_default().to_string())
    }
}
