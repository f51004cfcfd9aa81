//! Field selection for listings.
//!
//! Callers name the optional associations they want populated. Unknown names
//! are rejected rather than ignored so a caller never mistakes a partially
//! populated response for a complete one.

use crate::{CatalogError, EntityType, Result};
use std::collections::BTreeSet;
use std::fmt;

/// Optional, separately loaded association of an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    Tags,
    Followers,
    Domain,
    /// Service connection (service entity types only)
    Connection,
}

impl Field {
    pub const ALL: [Field; 4] = [Field::Tags, Field::Followers, Field::Domain, Field::Connection];

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Tags => "tags",
            Field::Followers => "followers",
            Field::Domain => "domain",
            Field::Connection => "connection",
        }
    }

    /// Whether entities of `entity_type` have this association.
    pub fn supported_by(&self, entity_type: EntityType) -> bool {
        match self {
            Field::Connection => entity_type.is_service(),
            _ => true,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated set of requested fields
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSet(BTreeSet<Field>);

impl FieldSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Every field `entity_type` supports.
    pub fn all_for(entity_type: EntityType) -> Self {
        Self(
            Field::ALL
                .into_iter()
                .filter(|field| field.supported_by(entity_type))
                .collect(),
        )
    }

    /// Parse field names for a listing of `entity_type`.
    ///
    /// Names are trimmed and empty entries skipped, so both `["tags"]` and a
    /// split `"tags, domain"` query parameter work. The first unknown or
    /// unsupported name fails the whole set.
    pub fn parse<I, S>(entity_type: EntityType, names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = BTreeSet::new();
        for name in names {
            let name = name.as_ref().trim();
            if name.is_empty() {
                continue;
            }
            let field = Field::ALL
                .into_iter()
                .find(|field| field.as_str() == name)
                .ok_or_else(|| {
                    CatalogError::UnknownField(format!(
                        "'{}' (supported: {})",
                        name,
                        Self::all_for(entity_type)
                    ))
                })?;
            if !field.supported_by(entity_type) {
                return Err(CatalogError::UnknownField(format!(
                    "'{}' is not a field of {}",
                    name, entity_type
                )));
            }
            set.insert(field);
        }
        Ok(Self(set))
    }

    pub fn contains(&self, field: Field) -> bool {
        self.0.contains(&field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Field> + '_ {
        self.0.iter().copied()
    }
}

impl fmt::Display for FieldSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.0.iter().map(|field| field.as_str()).collect();
        f.write_str(&names.join(","))
    }
}
