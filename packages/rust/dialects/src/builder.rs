//! Line-oriented segment assembly shared by the splitters.

use knitwork_shared::{CodeSegment, InlineCode, LineRange, ProseSegment, Segment};

/// Iterate `(1-based line number, line including its terminator)`.
pub(crate) fn numbered_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.split_inclusive('\n')
        .enumerate()
        .map(|(i, line)| (i + 1, line))
}

/// Line content without its terminator.
pub(crate) fn content(line: &str) -> &str {
    line.trim_end_matches(['\n', '\r'])
}

/// A chunk whose opening delimiter has been seen.
#[derive(Debug)]
pub(crate) struct OpenChunk {
    raw: String,
    engine: Option<String>,
    options: String,
    body: Vec<String>,
    start: usize,
    end: usize,
}

impl OpenChunk {
    pub(crate) fn new(line_no: usize, line: &str, engine: Option<String>, options: &str) -> Self {
        Self {
            raw: line.to_string(),
            engine,
            options: options.trim().trim_start_matches(',').trim().to_string(),
            body: Vec::new(),
            start: line_no,
            end: line_no,
        }
    }

    pub(crate) fn push_body(&mut self, line_no: usize, line: &str) {
        self.raw.push_str(line);
        self.body.push(content(line).to_string());
        self.end = line_no;
    }

    /// Add a delimiter or trailing line that belongs to the chunk but not its body.
    pub(crate) fn push_raw(&mut self, line_no: usize, line: &str) {
        self.raw.push_str(line);
        self.end = line_no;
    }

    pub(crate) fn into_segment(self, trim_trailing_blank: bool) -> CodeSegment {
        let mut body = self.body;
        if trim_trailing_blank {
            while body.last().is_some_and(|l| l.trim().is_empty()) {
                body.pop();
            }
        }
        CodeSegment {
            raw: self.raw,
            engine: self.engine,
            options: self.options,
            code: body.join("\n"),
            lines: LineRange::new(self.start, self.end),
        }
    }
}

/// Accumulates prose lines and finished chunks into ordered segments.
pub(crate) struct SegmentBuilder<'a> {
    segments: Vec<Segment>,
    prose: String,
    prose_lines: Option<LineRange>,
    inline: &'a dyn Fn(&str) -> Vec<InlineCode>,
}

impl<'a> SegmentBuilder<'a> {
    pub(crate) fn new(inline: &'a dyn Fn(&str) -> Vec<InlineCode>) -> Self {
        Self {
            segments: Vec::new(),
            prose: String::new(),
            prose_lines: None,
            inline,
        }
    }

    pub(crate) fn push_prose(&mut self, line_no: usize, line: &str) {
        self.prose.push_str(line);
        match &mut self.prose_lines {
            Some(range) => range.end = line_no,
            None => self.prose_lines = Some(LineRange::new(line_no, line_no)),
        }
    }

    pub(crate) fn push_code(&mut self, chunk: CodeSegment) {
        self.flush_prose();
        self.segments.push(Segment::Code(chunk));
    }

    pub(crate) fn finish(mut self) -> Vec<Segment> {
        self.flush_prose();
        self.segments
    }

    fn flush_prose(&mut self) {
        let Some(lines) = self.prose_lines.take() else {
            return;
        };
        let text = std::mem::take(&mut self.prose);
        let inline = (self.inline)(&text);
        self.segments.push(Segment::Prose(ProseSegment {
            text,
            inline,
            lines,
        }));
    }
}

/// Inline finder for dialects without inline code.
pub(crate) fn no_inline(_text: &str) -> Vec<InlineCode> {
    Vec::new()
}
