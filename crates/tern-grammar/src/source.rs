//! Source text handling and diagnostic rendering.

use std::fmt;

use crate::Diagnostic;
use crate::Severity;
use crate::Span;

/// The name used for rendering when a source was not given a name.
const DEFAULT_NAME: &str = "<input>";

/// A one-based line and column location in source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Location {
    /// The one-based line number.
    pub line: usize,
    /// The one-based column number, counted in characters.
    pub column: usize,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{line}:{column}", line = self.line, column = self.column)
    }
}

/// Represents a source expression and its line index.
///
/// The source retains the input text for the lifetime of a compilation so
/// that diagnostics can be rendered with a snippet of the offending line.
#[derive(Debug, Clone)]
pub struct Source {
    /// The name of the source, used in rendered diagnostics.
    name: String,
    /// The source text.
    text: String,
    /// Byte offsets of the start of each line.
    line_starts: Vec<usize>,
}

impl Source {
    /// Creates a new source from the given text.
    pub fn new(text: impl Into<String>) -> Self {
        Self::with_name(DEFAULT_NAME, text)
    }

    /// Creates a new source with the given name.
    pub fn with_name(name: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        let mut line_starts = vec![0];
        line_starts.extend(
            text.char_indices()
                .filter_map(|(i, c)| (c == '\n').then_some(i + 1)),
        );

        Self {
            name: name.into(),
            text,
            line_starts,
        }
    }

    /// Gets the name of the source.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the source text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Converts a byte offset into a one-based line and column location.
    ///
    /// Offsets past the end of the text map to the location just past the
    /// last character.
    pub fn location(&self, offset: usize) -> Location {
        let offset = offset.min(self.text.len());
        let line = self
            .line_starts
            .partition_point(|start| *start <= offset)
            .saturating_sub(1);
        let column = self.text[self.line_starts[line]..offset].chars().count();
        Location {
            line: line + 1,
            column: column + 1,
        }
    }

    /// Gets the text of the given one-based line, without its terminator.
    pub fn line_text(&self, line: usize) -> &str {
        let start = self.line_starts[line - 1];
        let end = self
            .line_starts
            .get(line)
            .map(|s| *s - 1)
            .unwrap_or(self.text.len());
        self.text[start..end].trim_end_matches('\r')
    }

    /// Returns an object that implements `Display` for rendering the given
    /// diagnostics against this source.
    ///
    /// Each diagnostic renders as a `SEVERITY: <name>:<line>:<col>: <message>`
    /// header followed by the offending line and a caret underline.
    pub fn render<'a>(&'a self, diagnostics: &'a [Diagnostic]) -> impl fmt::Display + 'a {
        #[allow(clippy::missing_docs_in_private_items)]
        struct Render<'a> {
            source: &'a Source,
            diagnostics: &'a [Diagnostic],
        }

        impl fmt::Display for Render<'_> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                for diagnostic in self.diagnostics {
                    self.source.render_one(diagnostic, f)?;
                }

                Ok(())
            }
        }

        Render {
            source: self,
            diagnostics,
        }
    }

    /// Renders a single diagnostic to the given formatter.
    fn render_one(&self, diagnostic: &Diagnostic, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match diagnostic.severity() {
            Severity::Error => "ERROR",
            Severity::Warning => "WARNING",
        };

        let span = diagnostic.span().unwrap_or(Span::new(0, 0));
        let location = self.location(span.start());
        writeln!(
            f,
            "{severity}: {name}:{location}: {message}",
            name = self.name,
            message = diagnostic.message()
        )?;

        let line = self.line_text(location.line);
        writeln!(f, " | {line}")?;

        write!(f, " | ")?;
        for _ in 1..location.column {
            write!(f, ".")?;
        }

        // The underline covers the span up to the end of the line, always
        // writing at least one caret.
        let end = self.location(span.end());
        let carets = if end.line == location.line && end.column > location.column {
            end.column - location.column
        } else {
            1
        };
        for _ in 0..carets {
            write!(f, "^")?;
        }

        writeln!(f)
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn locations_are_one_based() {
        let source = Source::new("a + b\nc\n");
        assert_eq!(source.location(0), Location { line: 1, column: 1 });
        assert_eq!(source.location(4), Location { line: 1, column: 5 });
        assert_eq!(source.location(6), Location { line: 2, column: 1 });
    }

    #[test]
    fn renders_a_caret_snippet() {
        let source = Source::new("1 + 'foo'");
        let diagnostic = Diagnostic::error("no matching overload for `+`")
            .with_highlight(Span::new(4, 5));
        let rendered = source.render(std::slice::from_ref(&diagnostic)).to_string();
        assert_eq!(
            rendered,
            "ERROR: <input>:1:5: no matching overload for `+`\n | 1 + 'foo'\n | ....^^^^^\n"
        );
    }

    #[test]
    fn renders_multiline_sources() {
        let source = Source::with_name("policy.tern", "a &&\nb ||");
        let diagnostic = Diagnostic::error("unexpected end of input").with_highlight(Span::new(9, 0));
        let rendered = source.render(std::slice::from_ref(&diagnostic)).to_string();
        assert_eq!(
            rendered,
            "ERROR: policy.tern:2:5: unexpected end of input\n | b ||\n | ....^\n"
        );
    }
}
