use std::path::Path;

use anyhow::Context;
use domain::{Command, CommentRecord, PostRecord, UserId};
use serde::Deserialize;

/// A replay file: the server's starting data plus the commands to drive.
#[derive(Debug, Deserialize)]
pub struct Fixture {
    /// User the in-memory server authenticates calls as.
    pub viewer: UserId,
    pub posts: Vec<FixturePost>,
    #[serde(default)]
    pub script: Vec<Command>,
}

#[derive(Debug, Deserialize)]
pub struct FixturePost {
    pub post: PostRecord,
    #[serde(default)]
    pub comments: Vec<CommentRecord>,
}

impl Fixture {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read {}", path.display()))?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let fixture: Fixture = serde_json::from_str(raw).context("Malformed fixture")?;
        if fixture.posts.is_empty() {
            anyhow::bail!("Fixture has no posts");
        }
        Ok(fixture)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_fixture_parses() {
        let fixture = Fixture::parse(include_str!("../../../fixtures/demo.json")).unwrap();

        assert_eq!(fixture.viewer.as_str(), "alice");
        assert!(!fixture.posts[0].comments.is_empty());
        assert!(fixture
            .script
            .iter()
            .any(|cmd| matches!(cmd, Command::Vote { .. })));
    }

    #[test]
    fn empty_fixture_is_rejected() {
        let err = Fixture::parse(r#"{ "viewer": "alice", "posts": [] }"#).unwrap_err();
        assert!(err.to_string().contains("no posts"));
    }
}
