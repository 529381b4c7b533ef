// ABOUTME: Identifier validation shared by sandboxes and dev servers

use thiserror::Error;

const MAX_PROJECT_ID_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid project id '{project_id}': {reason}")]
    InvalidProjectId { project_id: String, reason: String },
}

/// Validate a project id before it is used to build filesystem paths.
///
/// Project IDs must contain only alphanumeric characters, hyphens, and
/// underscores, which also rules out traversal sequences like `../`.
pub fn validate_project_id(project_id: &str) -> Result<(), ValidationError> {
    let invalid = |reason: &str| ValidationError::InvalidProjectId {
        project_id: project_id.to_string(),
        reason: reason.to_string(),
    };

    if project_id.is_empty() {
        return Err(invalid("Project ID cannot be empty"));
    }
    if project_id.len() > MAX_PROJECT_ID_LEN {
        return Err(invalid("Project ID is too long"));
    }
    if project_id.contains("..") || project_id.contains('/') || project_id.contains('\\') {
        return Err(invalid(
            "Project ID cannot contain path traversal sequences (.. / \\)",
        ));
    }
    if !project_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(invalid(
            "Project ID can only contain alphanumeric characters, hyphens, and underscores",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_project_id_valid() {
        assert!(validate_project_id("my-project").is_ok());
        assert!(validate_project_id("my_project").is_ok());
        assert!(validate_project_id("Project-Name_123").is_ok());
    }

    #[test]
    fn test_validate_project_id_path_traversal() {
        assert!(validate_project_id("../../../etc/passwd").is_err());
        assert!(validate_project_id("..\\..\\windows").is_err());
        assert!(validate_project_id("project/subdir").is_err());
    }

    #[test]
    fn test_validate_project_id_rejects_empty_and_special() {
        assert!(validate_project_id("").is_err());
        assert!(validate_project_id("project name").is_err());
        assert!(validate_project_id("project@name").is_err());
        assert!(validate_project_id(&"a".repeat(200)).is_err());
    }
}
