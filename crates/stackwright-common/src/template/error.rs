use thiserror::Error;

/// Failure while rendering a template or interpolating a resource field
#[derive(Debug, Error)]
pub enum TemplateError {
    /// minijinja rejected the template or a filter failed
    #[error("template render error: {0}")]
    Render(#[from] minijinja::Error),

    /// A `${` placeholder without closing brace, with the text that follows it
    #[error("unterminated placeholder near {0:?}")]
    Unterminated(String),

    /// Referenced variable has no value
    #[error("undefined variable: {0}")]
    Undefined(String),
}

impl TemplateError {
    /// Undefined-variable error for `expression`
    pub fn undefined(expression: impl Into<String>) -> Self {
        Self::Undefined(expression.into())
    }

    /// Name of the unresolved variable, if that is what failed
    pub fn undefined_name(&self) -> Option<&str> {
        match self {
            Self::Undefined(name) => Some(name),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undefined_names_the_variable() {
        let err = TemplateError::undefined("var.userInput_region");
        assert_eq!(err.to_string(), "undefined variable: var.userInput_region");
        assert_eq!(err.undefined_name(), Some("var.userInput_region"));
    }

    #[test]
    fn test_unterminated_quotes_snippet() {
        let err = TemplateError::Unterminated("${var.name".to_string());
        assert_eq!(err.to_string(), "unterminated placeholder near \"${var.name\"");
        assert_eq!(err.undefined_name(), None);
    }
}
