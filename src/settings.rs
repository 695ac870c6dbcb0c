/// Parameters controlling how the merged tree should be output.
#[derive(Debug, Clone)]
pub struct DisplaySettings {
    /// Whether to show the base revision in the conflicts (false by default)
    pub diff3: bool,
    /// Whether to show compact conflicts or to expand them to fill an entire line
    pub compact: bool,
    /// The number of characters for conflict markers (7 by default)
    pub conflict_marker_size: usize,
    /// The string that identifies the left revision in conflict markers
    pub left_revision_name: String,
    /// The string that identifies the base revision in conflict markers
    pub base_revision_name: String,
    /// The string that identifies the right revision in conflict markers
    pub right_revision_name: String,
}

impl DisplaySettings {
    /// The marker at the beginning of the "left" (first) part of a conflict.
    /// It does not contain any newline character.
    pub fn left_marker(&self) -> String {
        format!(
            "{} {}",
            "<".repeat(self.conflict_marker_size),
            self.left_revision_name
        )
    }

    /// The marker at the beginning of the "base" part of a conflict.
    /// It does not contain any newline character.
    pub fn base_marker(&self) -> String {
        format!(
            "{} {}",
            "|".repeat(self.conflict_marker_size),
            self.base_revision_name
        )
    }

    /// The marker at the end of the "right" (last) part of a conflict.
    /// It does not contain any newline character.
    pub fn right_marker(&self) -> String {
        format!(
            "{} {}",
            ">".repeat(self.conflict_marker_size),
            self.right_revision_name
        )
    }

    /// The marker before the beginning of "right" (last) part of a conflict.
    /// It does not contain any newline character.
    pub fn middle_marker(&self) -> String {
        "=".repeat(self.conflict_marker_size)
    }

    pub fn default_compact() -> Self {
        Self {
            compact: true,
            ..Self::default()
        }
    }
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            diff3: false,
            compact: false,
            conflict_marker_size: 7,
            left_revision_name: "LEFT".to_string(),
            base_revision_name: "BASE".to_string(),
            right_revision_name: "RIGHT".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markers() {
        let settings = DisplaySettings::default();
        assert_eq!(settings.left_marker(), "<<<<<<< LEFT");
        assert_eq!(settings.middle_marker(), "=======");
        assert_eq!(settings.right_marker(), ">>>>>>> RIGHT");

        let wide = DisplaySettings {
            conflict_marker_size: 9,
            ..DisplaySettings::default()
        };
        assert_eq!(wide.left_marker(), "<<<<<<<<< LEFT");
        assert_eq!(wide.base_marker(), "||||||||| BASE");
    }
}
