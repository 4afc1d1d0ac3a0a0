//! User-facing archive references.
//!
//! A reference is `id:<id>`, `name:<name>`, or a bare string that is treated
//! as a name. Rendering goes the other way and picks the shortest token that
//! still resolves back to the same archive.

use std::fmt;

const ID_PREFIX: &str = "id:";
const NAME_PREFIX: &str = "name:";

/// A parsed archive reference.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ArchiveRef {
    /// Matches the immutable remote-assigned archive id.
    Id(String),
    /// Matches the (mutable) archive description.
    Name(String),
}

impl ArchiveRef {
    /// Parse a user-supplied token.
    pub fn parse(token: &str) -> crate::Result<Self> {
        if let Some(id) = token.strip_prefix(ID_PREFIX) {
            if id.is_empty() {
                return Err(crate::Error::InvalidReference(
                    "archive id cannot be empty".to_string(),
                ));
            }
            return Ok(Self::Id(id.to_string()));
        }

        let name = token.strip_prefix(NAME_PREFIX).unwrap_or(token);
        if name.is_empty() {
            return Err(crate::Error::InvalidReference(
                "archive name cannot be empty".to_string(),
            ));
        }
        Ok(Self::Name(name.to_string()))
    }

    /// Render the reference for an archive.
    ///
    /// Archives without a name, or rendered with `force_id`, always use the
    /// `id:` form. Names that would themselves parse as a prefixed token are
    /// escaped with an explicit `name:` prefix.
    pub fn render(name: Option<&str>, id: &str, force_id: bool) -> String {
        match name {
            Some(name) if !name.is_empty() && !force_id => {
                if name.starts_with(NAME_PREFIX) || name.starts_with(ID_PREFIX) {
                    format!("{NAME_PREFIX}{name}")
                } else {
                    name.to_string()
                }
            }
            _ => format!("{ID_PREFIX}{id}"),
        }
    }

    /// The matched value without its prefix.
    pub fn value(&self) -> &str {
        match self {
            Self::Id(v) | Self::Name(v) => v,
        }
    }
}

impl fmt::Display for ArchiveRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{ID_PREFIX}{id}"),
            Self::Name(name) => f.write_str(&Self::render(Some(name), "", false)),
        }
    }
}
