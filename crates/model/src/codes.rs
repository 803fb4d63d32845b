use crate::error::{ErrorKind, Result};
use derive_more::Display;

/// Separator used for the persisted single-string form of [`Codes`].
///
/// NUL cannot appear in any component (the constructor rejects it), so the
/// joined form is unambiguous regardless of what the components contain.
pub const CODES_SEPARATOR: char = '\0';

/// Compound identifying key of a nut.
///
/// An ordered list of string components (for seismic waveforms this would be
/// something like network, station, location, channel — but the catalog is
/// agnostic to the meaning). Stored as a single NUL-joined string, displayed
/// dot-joined for humans.
#[derive(Debug, Display, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[display("{}", self.components.join("."))]
pub struct Codes {
    components: Vec<String>,
}

impl Codes {
    /// Build a key from components.
    ///
    /// Fails with [`ErrorKind::InvalidCodes`] if any component contains the
    /// reserved separator. That is a malformed argument, not a data
    /// condition: surface it immediately, do not retry.
    pub fn new(components: impl IntoIterator<Item = impl Into<String>>) -> Result<Self> {
        let components: Vec<String> = components.into_iter().map(Into::into).collect();
        for component in &components {
            if component.contains(CODES_SEPARATOR) {
                exn::bail!(ErrorKind::InvalidCodes(component.clone()));
            }
        }
        Ok(Self { components })
    }

    /// Reassemble a key from its persisted NUL-joined form.
    pub fn from_joined(joined: &str) -> Self {
        Self {
            components: joined.split(CODES_SEPARATOR).map(str::to_string).collect(),
        }
    }

    /// The persisted NUL-joined form.
    pub fn joined(&self) -> String {
        self.components.join("\0")
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }
}
