//! Path parsing and resolution
//!
//! Remote paths take the form `alias/container/object`, where the object
//! name may itself contain slashes.

use std::fmt;

use crate::error::{Error, Result};

/// Suffix appended to a container name to hold its objects' segments
pub const SEGMENTS_SUFFIX: &str = "_segments";

/// A container plus an object name within it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectPath {
    pub container: String,
    pub object: String,
}

impl ObjectPath {
    pub fn new(container: impl Into<String>, object: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            object: object.into(),
        }
    }

    /// Parse `container/object`
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim_start_matches('/');
        match s.split_once('/') {
            Some((container, object)) if !container.is_empty() && !object.is_empty() => {
                Ok(Self::new(container, object))
            }
            _ => Err(Error::InvalidPath(format!(
                "'{s}' is not of the form container/object"
            ))),
        }
    }

    /// Container that receives this object's segments
    pub fn segment_container(&self) -> String {
        format!("{}{SEGMENTS_SUFFIX}", self.container)
    }

    /// Request path relative to the storage URL, percent-encoded
    pub fn request_path(&self) -> String {
        format!("/{}/{}", quote(&self.container), quote(&self.object))
    }

    /// Append a relative name to this object's name
    pub fn join(&self, relative: &str) -> Self {
        let relative = relative.trim_start_matches('/');
        let object = if self.object.is_empty() || self.object.ends_with('/') {
            format!("{}{relative}", self.object)
        } else {
            format!("{}/{relative}", self.object)
        };
        Self::new(&self.container, object)
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.object)
    }
}

/// A path addressed through an alias: `alias[/container[/object]]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePath {
    pub alias: String,
    pub container: String,
    pub object: String,
}

impl RemotePath {
    pub fn new(
        alias: impl Into<String>,
        container: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            alias: alias.into(),
            container: container.into(),
            object: object.into(),
        }
    }

    /// The object path, if this path names an object
    pub fn object_path(&self) -> Result<ObjectPath> {
        if self.container.is_empty() || self.object.is_empty() {
            return Err(Error::InvalidPath(format!("'{self}' does not name an object")));
        }
        Ok(ObjectPath::new(&self.container, &self.object))
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.alias)?;
        if !self.container.is_empty() {
            write!(f, "/{}", self.container)?;
        }
        if !self.object.is_empty() {
            write!(f, "/{}", self.object)?;
        }
        Ok(())
    }
}

/// Parse `alias/container/object`
pub fn parse_path(s: &str) -> Result<RemotePath> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::InvalidPath("path cannot be empty".into()));
    }

    let mut parts = s.splitn(3, '/');
    let alias = parts.next().unwrap_or_default();
    if alias.is_empty() {
        return Err(Error::InvalidPath(format!("'{s}' has no alias")));
    }
    let container = parts.next().unwrap_or_default();
    let object = parts.next().unwrap_or_default();

    Ok(RemotePath::new(alias, container, object))
}

/// Percent-encode a path, leaving `/` separators intact
pub fn quote(s: &str) -> String {
    s.split('/')
        .map(|part| urlencoding::encode(part).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
