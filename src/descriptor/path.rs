use std::fmt;

use serde::{Serialize, Serializer};

/// One step from a parent node to a child node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// Location of a node inside a parsed document.
///
/// Rendered in dotted form for people (`packages.foo.dependencies[0]`) and as an
/// RFC 6901 JSON pointer for tools (`/packages/foo/dependencies/0`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct InstancePath {
    segments: Vec<Segment>,
}

impl InstancePath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn key(&self, key: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(Segment::Key(key.to_owned()));
        Self { segments }
    }

    pub fn index(&self, index: usize) -> Self {
        let mut segments = self.segments.clone();
        segments.push(Segment::Index(index));
        Self { segments }
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn to_json_pointer(&self) -> String {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Key(key) => format!("/{}", key.replace('~', "~0").replace('/', "~1")),
                Segment::Index(index) => format!("/{index}"),
            })
            .collect()
    }
}

fn is_plain_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-'))
}

impl fmt::Display for InstancePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return write!(f, "(root)");
        }
        for (position, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Key(key) if is_plain_key(key) => {
                    if position > 0 {
                        write!(f, ".")?;
                    }
                    write!(f, "{key}")?;
                }
                Segment::Key(key) => write!(f, "[{key:?}]")?,
                Segment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

impl Serialize for InstancePath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_root_display() {
        assert_eq!(InstancePath::root().to_string(), "(root)");
        assert_eq!(InstancePath::root().to_json_pointer(), "");
    }

    #[test]
    fn test_dotted_display() {
        let path = InstancePath::root()
            .key("packages")
            .key("foo")
            .key("dependencies")
            .index(0);
        assert_eq!(path.to_string(), "packages.foo.dependencies[0]");
        assert_eq!(path.to_json_pointer(), "/packages/foo/dependencies/0");
    }

    #[test]
    fn test_unusual_keys_are_quoted() {
        let path = InstancePath::root().key("packages").key("vim.plugins");
        assert_eq!(path.to_string(), "packages[\"vim.plugins\"]");
    }

    #[test]
    fn test_json_pointer_escapes() {
        let path = InstancePath::root().key("a/b").key("c~d");
        assert_eq!(path.to_json_pointer(), "/a~1b/c~0d");
    }
}
