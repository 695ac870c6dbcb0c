use diffy_imara::{Algorithm, ConflictStyle, MergeOptions};

use crate::{merged_text::MergedText, settings::DisplaySettings};

pub const LINE_BASED_METHOD: &str = "line_based";

/// The outcome of a textual three-way merge.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LineBasedMerge {
    /// The merged text, possibly with conflict markers
    pub contents: String,
    /// The number of conflicts in the merged text
    pub conflict_count: usize,
    /// The sum of the sizes of conflicts
    pub conflict_mass: usize,
}

/// A piece of a merged file, as delimited by conflict markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MergedChunk {
    /// Content that is successfully merged
    Resolved(String),
    /// A conflict, with contents differing between the revisions
    Conflict {
        base: String,
        left: String,
        right: String,
    },
}

/// Perform a textual merge with the diff3 algorithm.
///
/// The conflict markers of the raw merge are re-rendered so that they use
/// the revision names and marker size of the supplied settings.
pub fn line_based_merge(
    contents_base: &str,
    contents_left: &str,
    contents_right: &str,
    settings: &DisplaySettings,
) -> LineBasedMerge {
    let merged = MergeOptions::new()
        .set_conflict_marker_length(settings.conflict_marker_size)
        .set_conflict_style(if settings.diff3 {
            ConflictStyle::Diff3
        } else {
            ConflictStyle::Merge
        })
        .set_algorithm(Algorithm::Histogram)
        .merge(contents_base, contents_left, contents_right);
    let raw = match merged {
        Ok(contents) | Err(contents) => contents,
    };

    let mut text = MergedText::new();
    let mut conflict_count = 0;
    let mut conflict_mass = 0;
    for chunk in parse_merge_chunks(&raw, settings.conflict_marker_size) {
        match chunk {
            MergedChunk::Resolved(contents) => text.push_merged(contents),
            MergedChunk::Conflict { base, left, right } => {
                conflict_count += 1;
                conflict_mass += base.len() + left.len() + right.len();
                text.push_conflict(base, left, right);
            }
        }
    }
    LineBasedMerge {
        contents: text.render(settings),
        conflict_count,
        conflict_mass,
    }
}

/// Splits a merged file into resolved chunks and conflicts, recognizing
/// markers of the given size at the start of a line. The labels after the
/// markers are ignored, so this accepts output from any merge tool that
/// follows the Git marker conventions.
pub(crate) fn parse_merge_chunks(contents: &str, marker_size: usize) -> Vec<MergedChunk> {
    #[derive(PartialEq)]
    enum State {
        Resolved,
        Left,
        Base,
        Right,
    }

    let left_marker = "<".repeat(marker_size);
    let base_marker = "|".repeat(marker_size);
    let middle_marker = "=".repeat(marker_size);
    let right_marker = ">".repeat(marker_size);
    let is_marker = |line: &str, marker: &str| {
        line.strip_prefix(marker).is_some_and(|rest| {
            rest.is_empty() || rest.starts_with(' ') || rest.starts_with('\n')
        })
    };

    let mut chunks = Vec::new();
    let mut state = State::Resolved;
    let mut resolved = String::new();
    let mut left = String::new();
    let mut base = String::new();
    let mut right = String::new();

    for line in contents.split_inclusive('\n') {
        match state {
            State::Resolved if is_marker(line, &left_marker) => {
                if !resolved.is_empty() {
                    chunks.push(MergedChunk::Resolved(std::mem::take(&mut resolved)));
                }
                state = State::Left;
            }
            State::Resolved => resolved.push_str(line),
            State::Left if is_marker(line, &base_marker) => state = State::Base,
            State::Left if is_marker(line, &middle_marker) => state = State::Right,
            State::Left => left.push_str(line),
            State::Base if is_marker(line, &middle_marker) => state = State::Right,
            State::Base => base.push_str(line),
            State::Right if is_marker(line, &right_marker) => {
                chunks.push(MergedChunk::Conflict {
                    base: std::mem::take(&mut base),
                    left: std::mem::take(&mut left),
                    right: std::mem::take(&mut right),
                });
                state = State::Resolved;
            }
            State::Right => right.push_str(line),
        }
    }
    match state {
        State::Resolved => {
            if !resolved.is_empty() {
                chunks.push(MergedChunk::Resolved(resolved));
            }
        }
        // a truncated conflict, which should not happen with well-formed
        // input: keep the gathered lines as resolved content
        _ => {
            resolved.push_str(&left);
            resolved.push_str(&base);
            resolved.push_str(&right);
            chunks.push(MergedChunk::Resolved(resolved));
        }
    }
    chunks
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(7)]
    #[case(9)]
    fn marker_size_is_respected(#[case] size: usize) {
        let settings = DisplaySettings {
            conflict_marker_size: size,
            ..DisplaySettings::default()
        };
        let merged = line_based_merge("a\n", "l\n", "r\n", &settings);

        assert_eq!(merged.conflict_count, 1);
        assert!(merged.contents.starts_with(&"<".repeat(size)));
        assert!(merged.contents.contains(&format!("\n{}\n", "=".repeat(size))));
    }

    #[test]
    fn clean_merge() {
        let base = "a\nb\nc\n";
        let left = "a2\nb\nc\n";
        let right = "a\nb\nc2\n";

        let merged = line_based_merge(base, left, right, &DisplaySettings::default());

        assert_eq!(merged.contents, "a2\nb\nc2\n");
        assert_eq!(merged.conflict_count, 0);
        assert_eq!(merged.conflict_mass, 0);
    }

    #[test]
    fn conflicting_merge() {
        let base = "a\nb\nc\n";
        let left = "a\nleft\nc\n";
        let right = "a\nright\nc\n";

        let merged = line_based_merge(base, left, right, &DisplaySettings::default());

        assert_eq!(
            merged.contents,
            "a\n<<<<<<< LEFT\nleft\n=======\nright\n>>>>>>> RIGHT\nc\n"
        );
        assert_eq!(merged.conflict_count, 1);
        assert!(merged.conflict_mass > 0);
    }

    #[test]
    fn conflicting_merge_diff3() {
        let base = "a\nb\nc\n";
        let left = "a\nleft\nc\n";
        let right = "a\nright\nc\n";

        let settings = DisplaySettings {
            diff3: true,
            ..DisplaySettings::default()
        };
        let merged = line_based_merge(base, left, right, &settings);

        assert_eq!(
            merged.contents,
            "a\n<<<<<<< LEFT\nleft\n||||||| BASE\nb\n=======\nright\n>>>>>>> RIGHT\nc\n"
        );
        assert_eq!(merged.conflict_count, 1);
    }

    #[test]
    fn parse_chunks_roundtrip() {
        let contents = "ok\n<<<<<<< ours\nl\n=======\nr\n>>>>>>> theirs\ntail\n";
        let chunks = parse_merge_chunks(contents, 7);
        assert_eq!(
            chunks,
            vec![
                MergedChunk::Resolved("ok\n".to_string()),
                MergedChunk::Conflict {
                    base: String::new(),
                    left: "l\n".to_string(),
                    right: "r\n".to_string(),
                },
                MergedChunk::Resolved("tail\n".to_string()),
            ]
        );
    }
}
