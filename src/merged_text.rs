use itertools::Itertools;
use regex::Regex;

use crate::{
    line_based::{MergedChunk, parse_merge_chunks},
    settings::DisplaySettings,
};

/// A merged file represented as a sequence of sections,
/// some being successfully merged and others being conflicts.
///
/// The printer pushes many small fragments (keywords, attribute values,
/// whitespace), so adjacent merged sections are coalesced on insertion.
/// The precise layout of the resulting text is not known until rendering,
/// as it depends on the output settings: conflicts are expanded so that
/// their markers start at the beginning of a line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub(crate) struct MergedText {
    sections: Vec<MergeSection>,
}

/// A part of a merged file to be output
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum MergeSection {
    /// Content that is successfully merged
    Merged(String),
    /// A conflict, with contents differing between the revisions
    Conflict {
        base: String,
        left: String,
        right: String,
    },
}

/// The three revisions of a conflict being grown to line boundaries
/// during rendering.
#[derive(Debug, Default)]
struct ConflictBuffers {
    base: String,
    left: String,
    right: String,
}

impl ConflictBuffers {
    /// Starts a conflict whose three revisions all begin with the
    /// unfinished line preceding it.
    fn seeded_with(line: String) -> Self {
        Self {
            base: line.clone(),
            left: line.clone(),
            right: line,
        }
    }

    /// Appends text that belongs to all three revisions alike.
    fn extend_all(&mut self, text: &str) {
        self.base.push_str(text);
        self.left.push_str(text);
        self.right.push_str(text);
    }

    /// Whether every revision stops at a line boundary, so that the
    /// conflict can be rendered without swallowing more of the output.
    fn all_lines_complete(&self) -> bool {
        [&self.base, &self.left, &self.right]
            .into_iter()
            .all(|buffer| buffer.ends_with('\n') || buffer.trim().is_empty())
    }

    /// Renders the conflict with its markers, each on its own line.
    fn render_into(self, output: &mut String, settings: &DisplaySettings) {
        ensure_newline(output);
        output.push_str(&settings.left_marker());
        output.push('\n');
        if !self.left.trim().is_empty() {
            output.push_str(&self.left);
        }
        if settings.diff3 {
            ensure_newline(output);
            output.push_str(&settings.base_marker());
            output.push('\n');
            if !self.base.trim().is_empty() {
                output.push_str(&self.base);
            }
        }
        ensure_newline(output);
        output.push_str(&settings.middle_marker());
        output.push('\n');
        if !self.right.trim().is_empty() {
            output.push_str(&self.right);
        }
        ensure_newline(output);
        output.push_str(&settings.right_marker());
        output.push('\n');
    }
}

impl MergedText {
    /// Creates an empty merged text
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Appends merged text at the end
    pub(crate) fn push_merged(&mut self, contents: impl Into<String>) {
        let contents = contents.into();
        if contents.is_empty() {
            return;
        }
        if let Some(MergeSection::Merged(previous)) = self.sections.last_mut() {
            previous.push_str(&contents);
        } else {
            self.sections.push(MergeSection::Merged(contents));
        }
    }

    /// Appends a conflict at the end
    pub(crate) fn push_conflict(&mut self, base: String, left: String, right: String) {
        if left == right {
            // well that's not really a conflict
            self.push_merged(left);
        } else {
            self.sections
                .push(MergeSection::Conflict { base, left, right });
        }
    }

    /// Appends some text which might contain line-based conflicts.
    /// If the text contains newlines it also gets re-indented to the indentation level supplied.
    pub(crate) fn push_line_based_merge(
        &mut self,
        line_based_merge: &str,
        indentation: &str,
        settings: &DisplaySettings,
    ) {
        let mut past_first_line = false;
        for chunk in parse_merge_chunks(line_based_merge, settings.conflict_marker_size) {
            match chunk {
                MergedChunk::Resolved(contents) => {
                    self.push_merged(reindent(&contents, indentation, past_first_line, true));
                    past_first_line = past_first_line || contents.contains('\n');
                }
                MergedChunk::Conflict { base, left, right } => {
                    self.push_conflict(
                        reindent(&base, indentation, false, false),
                        reindent(&left, indentation, false, false),
                        reindent(&right, indentation, false, false),
                    );
                    past_first_line = true;
                }
            }
        }
    }

    /// Concatenates the merged sections, assuming no conflict was pushed.
    /// Useful when the buffer is used as a plain pretty-printing sink.
    pub(crate) fn plain_concat(&self) -> String {
        self.sections
            .iter()
            .map(|section| match section {
                MergeSection::Merged(contents) => contents.as_str(),
                MergeSection::Conflict { .. } => "",
            })
            .collect()
    }

    /// Renders the full file according to the supplied [DisplaySettings]
    pub(crate) fn render(&self, settings: &DisplaySettings) -> String {
        if settings.compact {
            self.render_compact(settings)
        } else {
            self.render_full_lines(settings)
        }
    }

    /// Renders the merged text by expanding conflict boundaries so that
    /// they match newlines: a conflict in the middle of a line grows to
    /// cover the entire line, in all three revisions.
    fn render_full_lines(&self, settings: &DisplaySettings) -> String {
        let mut output = String::new();
        let mut pending: Option<ConflictBuffers> = None;
        for section in &self.sections {
            match section {
                MergeSection::Merged(contents) => {
                    if pending.is_none() {
                        output.push_str(contents);
                    } else if let Some(newline_idx) = contents.find('\n') {
                        // the line the conflict started on is complete:
                        // close it on all revisions and render
                        let mut buffers = pending.take().expect("checked above");
                        buffers.extend_all(&contents[..=newline_idx]);
                        buffers.render_into(&mut output, settings);
                        output.push_str(&contents[newline_idx + 1..]);
                    } else {
                        pending
                            .as_mut()
                            .expect("checked above")
                            .extend_all(contents);
                    }
                }
                MergeSection::Conflict { base, left, right } => {
                    let buffers = pending.get_or_insert_with(|| {
                        ConflictBuffers::seeded_with(split_off_last_line(&mut output))
                    });
                    buffers.base.push_str(base);
                    buffers.left.push_str(left);
                    buffers.right.push_str(right);
                    if buffers.all_lines_complete() {
                        let buffers = pending.take().expect("just inserted");
                        buffers.render_into(&mut output, settings);
                    }
                }
            }
        }
        if let Some(buffers) = pending {
            buffers.render_into(&mut output, settings);
        }
        output
    }

    /// Renders the merged text without expanding conflict boundaries so that they match newlines.
    /// Instead, insert newlines around the conflict boundaries directly.
    fn render_compact(&self, settings: &DisplaySettings) -> String {
        let leading_whitespace = Regex::new("^[\t ]*\n").expect("Invalid regex");
        let trailing_whitespace = Regex::new("[\t ]+$").expect("Invalid regex");
        let mut output = String::new();
        let mut after_conflict = false;
        for section in &self.sections {
            match section {
                MergeSection::Merged(contents) => {
                    if after_conflict {
                        output.push_str(&leading_whitespace.replace(contents, ""));
                    } else {
                        output.push_str(contents);
                    }
                    after_conflict = false;
                }
                MergeSection::Conflict { base, left, right } => {
                    // move any whitespace dangling at the end of the output
                    // inside the conflict, so the markers start cleanly
                    let stolen = match trailing_whitespace.find(&output) {
                        Some(occurrence) => output.split_off(occurrence.start()),
                        None => String::new(),
                    };
                    let with_stolen = |side: &str| {
                        if side.is_empty() {
                            String::new()
                        } else {
                            format!("{stolen}{side}")
                        }
                    };
                    ConflictBuffers {
                        base: with_stolen(base),
                        left: with_stolen(left),
                        right: with_stolen(right),
                    }
                    .render_into(&mut output, settings);
                    after_conflict = true;
                }
            }
        }
        output
    }
}

/// Reindents the lines of one piece of a line-based merge.
fn reindent(content: &str, indentation: &str, reindent_first: bool, reindent_last: bool) -> String {
    let reindented = content
        .split('\n')
        .enumerate()
        .map(|(idx, line)| {
            if line.is_empty() || (idx == 0 && !reindent_first) {
                line.to_owned()
            } else {
                format!("{indentation}{line}")
            }
        })
        .join("\n");
    if reindent_last && reindented.ends_with('\n') {
        reindented + indentation
    } else {
        reindented
    }
}

/// Removes and returns the unfinished last line of the output, if any.
fn split_off_last_line(output: &mut String) -> String {
    if output.is_empty() || output.ends_with('\n') {
        return String::new();
    }
    let start = output.rfind('\n').map_or(0, |idx| idx + 1);
    output.split_off(start)
}

fn ensure_newline(output: &mut String) {
    if !output.ends_with('\n') && !output.is_empty() {
        output.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn merged(contents: &str) -> MergeSection {
        MergeSection::Merged(contents.to_owned())
    }

    fn conflict(base: &str, left: &str, right: &str) -> MergeSection {
        MergeSection::Conflict {
            base: base.to_owned(),
            left: left.to_owned(),
            right: right.to_owned(),
        }
    }

    #[test]
    fn test_compact_mode() {
        let merged_text = MergedText {
            sections: vec![
                merged("hello"),
                merged(" world\nhi "),
                conflict("ho base", "ho left", "ho right"),
                merged("  test\n"),
            ],
        };

        let expected_compact = "hello world\nhi\n<<<<<<< LEFT\n ho left\n=======\n ho right\n>>>>>>> RIGHT\n  test\n";
        assert_eq!(
            merged_text.render(&DisplaySettings::default_compact()),
            expected_compact
        );

        let expected_full_line = "hello world\n<<<<<<< LEFT\nhi ho left  test\n=======\nhi ho right  test\n>>>>>>> RIGHT\n";
        assert_eq!(
            merged_text.render(&DisplaySettings::default()),
            expected_full_line
        );
    }

    #[test]
    fn test_multiple_conflicts_on_same_line() {
        let merged_text = MergedText {
            sections: vec![
                merged("let's start "),
                conflict("ho", "hi", "ha"),
                merged(" to "),
                conflict("you", "everyone", "me"),
                merged("!"),
            ],
        };
        let expected_full_line = "<<<<<<< LEFT\nlet's start hi to everyone!\n=======\nlet's start ha to me!\n>>>>>>> RIGHT\n";
        assert_eq!(
            merged_text.render(&DisplaySettings::default()),
            expected_full_line
        );
    }

    #[test]
    fn test_diff3_sections() {
        let merged_text = MergedText {
            sections: vec![merged("before\n"), conflict("b\n", "l\n", "r\n")],
        };
        let settings = DisplaySettings {
            diff3: true,
            ..DisplaySettings::default()
        };
        assert_eq!(
            merged_text.render(&settings),
            "before\n<<<<<<< LEFT\nl\n||||||| BASE\nb\n=======\nr\n>>>>>>> RIGHT\n"
        );
    }

    #[test]
    fn test_spurious_conflict() {
        let mut merged_text = MergedText::new();
        merged_text.push_merged("let's start ".to_owned());
        merged_text.push_conflict("tomorrow".to_owned(), "now".to_owned(), "now".to_owned());
        merged_text.push_merged(", as it seems we all agree".to_owned());
        let expected_full_line = "let's start now, as it seems we all agree";

        assert_eq!(
            merged_text.render(&DisplaySettings::default()),
            expected_full_line
        );
    }

    #[test]
    fn test_fragments_are_coalesced() {
        let mut merged_text = MergedText::new();
        merged_text.push_merged("void ");
        merged_text.push_merged("f");
        merged_text.push_merged("");
        merged_text.push_merged("()");

        assert_eq!(merged_text.sections.len(), 1);
        assert_eq!(merged_text.plain_concat(), "void f()");
    }
}
