use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};

/// Test a single glob pattern against a relative path.
///
/// `**` matches across path separators, `*` stays within one segment and
/// hidden (`.`-prefixed) segments are matched like any other. This is a pure
/// function; [PatternFilter] is the precompiled form used on the hot path.
pub fn matches(pattern: &str, relative_path: &str) -> Result<bool, globset::Error> {
    let glob = compile(pattern)?;
    Ok(glob.compile_matcher().is_match(relative_path))
}

fn compile(pattern: &str) -> Result<Glob, globset::Error> {
    GlobBuilder::new(pattern).literal_separator(true).build()
}

/// A compiled include/exclude pattern pair.
///
/// A relative path is included iff it matches at least one include pattern
/// and none of the exclude patterns.
#[derive(Debug)]
pub struct PatternFilter {
    includes: GlobSet,
    excludes: GlobSet,
}

impl PatternFilter {
    /// Compile the pattern lists. Fails on the first invalid glob.
    pub fn new(
        file_patterns: &[String],
        exclude_patterns: &[String],
    ) -> Result<Self, globset::Error> {
        Ok(PatternFilter {
            includes: compile_set(file_patterns)?,
            excludes: compile_set(exclude_patterns)?,
        })
    }

    /// Whether the relative path matches the include rule.
    pub fn is_included(&self, relative_path: &str) -> bool {
        self.includes.is_match(relative_path) && !self.excludes.is_match(relative_path)
    }
}

fn compile_set(patterns: &[String]) -> Result<GlobSet, globset::Error> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(compile(pattern)?);
    }
    builder.build()
}
