//! Indented text output shared by the backends

/// Line-oriented writer that tracks the indentation level
#[derive(Debug, Clone)]
pub struct CodeWriter {
    unit: &'static str,
    indent: usize,
    output: String,
}

impl CodeWriter {
    pub fn new(unit: &'static str) -> Self {
        Self {
            unit,
            indent: 0,
            output: String::with_capacity(4096),
        }
    }

    /// Empty writer continuing at the current indentation
    pub fn child(&self) -> Self {
        Self {
            unit: self.unit,
            indent: self.indent,
            output: String::new(),
        }
    }

    pub fn indent(&mut self) {
        self.indent += 1;
    }

    pub fn dedent(&mut self) {
        debug_assert!(self.indent > 0, "dedent called with zero indent");
        self.indent = self.indent.saturating_sub(1);
    }

    /// Write one line at the current indentation
    pub fn line(&mut self, text: impl AsRef<str>) {
        let text = text.as_ref();
        if text.is_empty() {
            self.output.push('\n');
            return;
        }
        for _ in 0..self.indent {
            self.output.push_str(self.unit);
        }
        self.output.push_str(text);
        self.output.push('\n');
    }

    pub fn lines<I, S>(&mut self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for line in lines {
            self.line(line);
        }
    }

    /// Write a line with no indentation (preprocessor lines)
    pub fn raw(&mut self, text: impl AsRef<str>) {
        self.output.push_str(text.as_ref());
        self.output.push('\n');
    }

    pub fn blank(&mut self) {
        self.output.push('\n');
    }

    /// Append already indented text
    pub fn append(&mut self, text: &str) {
        self.output.push_str(text);
    }

    pub fn is_empty(&self) -> bool {
        self.output.is_empty()
    }

    pub fn finish(self) -> String {
        self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_indentation() {
        let mut w = CodeWriter::new("    ");
        w.line("if (x) {");
        w.indent();
        w.line("y = 1;");
        w.raw("#pragma omp simd");
        w.line("");
        w.dedent();
        w.line("}");
        assert_eq!(w.finish(), "if (x) {\n    y = 1;\n#pragma omp simd\n\n}\n");
    }

    #[test]
    fn test_child_keeps_indentation() {
        let mut w = CodeWriter::new("  ");
        w.indent();
        let mut inner = w.child();
        inner.indent();
        inner.line("x");
        w.append(&inner.finish());
        assert_eq!(w.finish(), "    x\n");
    }

    #[test]
    fn test_lines_and_unit() {
        let mut w = CodeWriter::new("  ");
        w.indent();
        w.lines(["a = 1", "b = 2"]);
        assert_eq!(w.finish(), "  a = 1\n  b = 2\n");
    }
}
