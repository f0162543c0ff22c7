//! Role definitions and input validation.
//!
//! A role is a labeled activity context ("Development", "Planning", ...).
//! Historical sessions reference roles by id only, so deleting a role
//! never rewrites past records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Maximum length of a role name, in characters.
pub const NAME_MAX_LEN: usize = 100;

/// Maximum length of a role description, in characters.
pub const DESCRIPTION_MAX_LEN: usize = 500;

/// Curated palette offered by pickers when creating roles.
pub const ROLE_COLOR_PALETTE: [&str; 15] = [
    "#FF6B6B", "#4ECDC4", "#45B7D1", "#96CEB4", "#FFEAA7", "#DDA0DD", "#98D8C8", "#F7DC6F",
    "#BB8FCE", "#85C1E9", "#F8C471", "#82E0AA", "#F1948A", "#85929E", "#D2B4DE",
];

/// A named activity context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub id: String,
    /// Unique among all roles, case-insensitively.
    pub name: String,
    /// Display color, `#RGB` or `#RRGGBB`.
    pub color_hex: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    /// Builds a new role from a draft with a fresh id and timestamps.
    ///
    /// The draft is expected to be sanitized and validated already.
    #[must_use]
    pub fn from_draft(draft: RoleDraft, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: draft.name,
            color_hex: draft.color_hex,
            description: draft.description,
            icon: draft.icon,
            created_at: now,
            updated_at: now,
        }
    }
}

/// User-supplied fields for creating or updating a role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleDraft {
    pub name: String,
    pub color_hex: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
}

impl RoleDraft {
    /// Returns a copy with all free-text fields run through [`sanitize_input`].
    ///
    /// Empty optional fields collapse to `None`.
    #[must_use]
    pub fn sanitized(&self) -> Self {
        Self {
            name: sanitize_input(&self.name),
            color_hex: self.color_hex.trim().to_string(),
            description: self
                .description
                .as_deref()
                .map(sanitize_input)
                .filter(|d| !d.is_empty()),
            icon: self
                .icon
                .as_deref()
                .map(sanitize_input)
                .filter(|i| !i.is_empty()),
        }
    }
}

/// A single reason a role draft was rejected.
///
/// Validation collects every applicable issue rather than stopping at
/// the first, so callers can report them all at once.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    #[error("role name is required")]
    NameRequired,

    #[error("role name must be {NAME_MAX_LEN} characters or less")]
    NameTooLong,

    #[error("a role named {name:?} already exists")]
    NameTaken { name: String },

    #[error("description must be {DESCRIPTION_MAX_LEN} characters or less")]
    DescriptionTooLong,

    #[error("invalid color {value:?}: expected #RGB or #RRGGBB")]
    InvalidColor { value: String },
}

/// Validates a sanitized draft against the existing role set.
///
/// `exclude_id` skips the uniqueness check against one role, for updates.
/// Returns every issue found; an empty vec means the draft is valid.
#[must_use]
pub fn validate_draft(
    draft: &RoleDraft,
    existing: &[Role],
    exclude_id: Option<&str>,
) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if draft.name.is_empty() {
        issues.push(ValidationIssue::NameRequired);
    } else if draft.name.chars().count() > NAME_MAX_LEN {
        issues.push(ValidationIssue::NameTooLong);
    } else {
        let taken = existing.iter().any(|role| {
            exclude_id != Some(role.id.as_str()) && role.name.eq_ignore_ascii_case(&draft.name)
        });
        if taken {
            issues.push(ValidationIssue::NameTaken {
                name: draft.name.clone(),
            });
        }
    }

    if let Some(description) = &draft.description
        && description.chars().count() > DESCRIPTION_MAX_LEN
    {
        issues.push(ValidationIssue::DescriptionTooLong);
    }

    if !is_valid_hex_color(&draft.color_hex) {
        issues.push(ValidationIssue::InvalidColor {
            value: draft.color_hex.clone(),
        });
    }

    issues
}

/// Checks `#RGB` / `#RRGGBB` hex color syntax.
#[must_use]
pub fn is_valid_hex_color(value: &str) -> bool {
    let Some(digits) = value.strip_prefix('#') else {
        return false;
    };
    matches!(digits.len(), 3 | 6) && digits.chars().all(|c| c.is_ascii_hexdigit())
}

/// Trims whitespace and strips markup-sensitive characters (`<>"'&`)
/// from user-supplied text.
#[must_use]
pub fn sanitize_input(input: &str) -> String {
    input
        .trim()
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | '"' | '\'' | '&'))
        .collect()
}

/// Drafts for the role set seeded into an empty registry on first run.
#[must_use]
pub fn default_role_drafts() -> Vec<RoleDraft> {
    let presets = [
        ("Development", "#4ECDC4", "Writing and debugging code", "code"),
        ("Learning", "#45B7D1", "Reading documentation and tutorials", "book"),
        ("Planning", "#96CEB4", "Project planning and design", "gear"),
        ("Communication", "#FFEAA7", "Emails, meetings, and collaboration", "chat"),
    ];
    presets
        .into_iter()
        .map(|(name, color, description, icon)| RoleDraft {
            name: name.to_string(),
            color_hex: color.to_string(),
            description: Some(description.to_string()),
            icon: Some(icon.to_string()),
        })
        .collect()
}
