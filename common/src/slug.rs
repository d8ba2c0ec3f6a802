use std::fmt;

/// A lowercase, hyphen-separated identifier segment used for project,
/// environment and service slugs, and for domain labels synthesised from them.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Slug(String);

#[derive(Debug, thiserror::Error)]
pub enum SlugError {
    #[error("slug cannot be empty")]
    Empty,
    #[error("slug must be lowercase alphanumerics and hyphens only: {0:?}")]
    InvalidCharacters(String),
    #[error("slug cannot start or end with a hyphen: {0:?}")]
    LeadingOrTrailingHyphen(String),
}

impl Slug {
    pub fn parse(value: impl Into<String>) -> Result<Self, SlugError> {
        let value = value.into();
        if value.is_empty() {
            return Err(SlugError::Empty);
        }
        if !value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(SlugError::InvalidCharacters(value));
        }
        if value.starts_with('-') || value.ends_with('-') {
            return Err(SlugError::LeadingOrTrailingHyphen(value));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Slug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_slug() {
        assert!(Slug::parse("my-service-2").is_ok());
    }

    #[test]
    fn rejects_uppercase() {
        assert!(matches!(
            Slug::parse("MyService"),
            Err(SlugError::InvalidCharacters(_))
        ));
    }

    #[test]
    fn rejects_leading_hyphen() {
        assert!(matches!(
            Slug::parse("-service"),
            Err(SlugError::LeadingOrTrailingHyphen(_))
        ));
    }

    #[test]
    fn rejects_empty() {
        assert!(matches!(Slug::parse(""), Err(SlugError::Empty)));
    }
}
