//! Input validation for the catalog gateway
//!
//! Provides validation functions to prevent:
//! - Path traversal attacks on catalog URIs
//! - Malformed names and identifiers
//! - Excessively long inputs and unbounded page sizes

use crate::{CatalogError, Result, MAX_PAGE_LIMIT};

/// Maximum length for entity names
pub const MAX_ENTITY_NAME_LEN: usize = 255;

/// Maximum length for tag values
pub const MAX_TAG_LEN: usize = 100;

/// Maximum length for owner/domain/service identifiers
pub const MAX_IDENTIFIER_LEN: usize = 100;

/// Validate entity name
///
/// Requirements:
/// - Not empty
/// - <= 255 characters
/// - Alphanumeric, underscore, hyphen, dot only
/// - Cannot start or end with hyphen
pub fn validate_entity_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CatalogError::ValidationError(
            "Entity name cannot be empty".to_string(),
        ));
    }

    if name.len() > MAX_ENTITY_NAME_LEN {
        return Err(CatalogError::ValidationError(format!(
            "Entity name too long: {} > {} characters",
            name.len(),
            MAX_ENTITY_NAME_LEN
        )));
    }

    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.')
    {
        return Err(CatalogError::ValidationError(
            "Entity name contains invalid characters (allowed: alphanumeric, _, -, .)".to_string(),
        ));
    }

    if name.starts_with('-') || name.ends_with('-') {
        return Err(CatalogError::ValidationError(
            "Entity name cannot start or end with hyphen".to_string(),
        ));
    }

    Ok(())
}

/// Validate tag value
///
/// Requirements:
/// - Not empty
/// - <= 100 characters
/// - Alphanumeric, underscore, hyphen, colon only
pub fn validate_tag(tag: &str) -> Result<()> {
    if tag.is_empty() {
        return Err(CatalogError::ValidationError(
            "Tag cannot be empty".to_string(),
        ));
    }

    if tag.len() > MAX_TAG_LEN {
        return Err(CatalogError::ValidationError(format!(
            "Tag too long: {} > {} characters",
            tag.len(),
            MAX_TAG_LEN
        )));
    }

    if !tag
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == ':')
    {
        return Err(CatalogError::ValidationError(
            "Tag contains invalid characters (allowed: alphanumeric, _, -, :)".to_string(),
        ));
    }

    Ok(())
}

/// Validate owner/domain/service identifier
///
/// Requirements:
/// - Not empty
/// - <= 100 characters
/// - Alphanumeric, underscore, hyphen, dot, @ only (owners are often emails)
pub fn validate_identifier(identifier: &str, field_name: &str) -> Result<()> {
    if identifier.is_empty() {
        return Err(CatalogError::ValidationError(format!(
            "{} cannot be empty",
            field_name
        )));
    }

    if identifier.len() > MAX_IDENTIFIER_LEN {
        return Err(CatalogError::ValidationError(format!(
            "{} too long: {} > {} characters",
            field_name,
            identifier.len(),
            MAX_IDENTIFIER_LEN
        )));
    }

    if !identifier
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.' || c == '@')
    {
        return Err(CatalogError::ValidationError(format!(
            "{} contains invalid characters (allowed: alphanumeric, _, -, ., @)",
            field_name
        )));
    }

    Ok(())
}

/// Validate a requested page size against `max`.
///
/// A zero limit is an `InvalidArgument`, not a request for an empty page.
pub fn validate_limit(limit: usize, max: usize) -> Result<()> {
    if limit == 0 {
        return Err(CatalogError::InvalidArgument(
            "limit must be at least 1".to_string(),
        ));
    }

    let max = max.min(MAX_PAGE_LIMIT);
    if limit > max {
        return Err(CatalogError::InvalidArgument(format!(
            "limit {} exceeds the maximum of {}",
            limit, max
        )));
    }

    Ok(())
}

/// Validate file:// URI path for traversal attacks
///
/// Prevents:
/// - .. path components
/// - Null bytes
pub fn validate_file_uri_path(path: &str) -> Result<()> {
    if path.contains("..") {
        return Err(CatalogError::ValidationError(
            "Path contains traversal pattern (..)".to_string(),
        ));
    }

    if path.contains('\0') {
        return Err(CatalogError::ValidationError(
            "Path contains null byte".to_string(),
        ));
    }

    Ok(())
}
