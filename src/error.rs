use crate::span::Span;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A compile-time error: preprocessing, lexing, parsing, or lowering.
///
/// Carries a span into the preprocessed source. Use [`Error::render`]
/// to turn it into a `file:line: message` diagnostic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Error {
    message: String,
    span: Span,
}

pub fn error(message: impl Into<String>, span: impl Into<Span>) -> Error {
    Error {
        message: message.into(),
        span: span.into(),
    }
}

pub fn error_span(message: impl Into<String>, span: impl Into<Span>) -> Error {
    error(message, span)
}

impl Error {
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[inline]
    pub fn span(&self) -> Span {
        self.span
    }

    /// Render against the preprocessed source the error's span points into.
    pub fn render<'a>(&'a self, src: &'a str) -> Render<'a> {
        Render { error: self, src }
    }
}

impl<T> From<Error> for Result<T> {
    fn from(value: Error) -> Self {
        Err(value)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "error at {}: {}", self.span, self.message)
    }
}

impl std::error::Error for Error {}

pub struct Render<'a> {
    error: &'a Error,
    src: &'a str,
}

impl std::fmt::Display for Render<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let start = self.error.span.start().min(self.src.len());
        let line_start = self.src[..start].rfind('\n').map(|i| i + 1).unwrap_or(0);
        let line = self.src[..line_start].matches('\n').count() + 1;
        let col = start - line_start + 1;
        let line_end = self.src[line_start..]
            .find('\n')
            .map(|i| line_start + i)
            .unwrap_or(self.src.len());

        writeln!(f, "error: {}", self.error.message)?;
        writeln!(f, " --> {line}:{col}")?;
        write!(f, "  | {}", &self.src[line_start..line_end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_points_at_line() {
        let src = "var a = 1\nvar b = ?\n";
        let err = error("unexpected character", 18u32..19);
        let rendered = err.render(src).to_string();
        assert!(rendered.contains("unexpected character"));
        assert!(rendered.contains("2:9"));
        assert!(rendered.contains("var b = ?"));
    }
}
