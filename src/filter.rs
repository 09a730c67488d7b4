//! Include/exclude wildcard filters over namespaces and image references.
//!
//! A pattern is literal text where `*` matches any run of characters,
//! including none. Patterns are anchored, so `nginx` only matches `nginx`
//! while `nginx*` also matches `nginx:1.25`.

use regex::Regex;
use tracing::warn;

/// A compiled wildcard pattern.
#[derive(Clone, Debug)]
pub struct WildcardPattern {
    regex: Regex,
}

impl WildcardPattern {
    pub fn compile(pattern: &str) -> Result<Self, regex::Error> {
        let regex = Regex::new(&wildcard_to_regex(pattern))?;
        Ok(Self { regex })
    }

    pub fn matches(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }
}

fn wildcard_to_regex(pattern: &str) -> String {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    format!("^{body}$")
}

/// Whether `value` matches at least one of `patterns`.
pub fn matches_any(value: &str, patterns: &[WildcardPattern]) -> bool {
    patterns.iter().any(|p| p.matches(value))
}

/// A pattern that could not be compiled and is therefore ignored.
#[derive(Clone, Debug)]
pub struct FilterError {
    pub list: &'static str,
    pub pattern: String,
    pub reason: String,
}

/// The four pattern lists deciding which pods and containers get processed.
#[derive(Clone, Debug, Default)]
pub struct FilterSpec {
    include_namespaces: PatternList,
    exclude_namespaces: PatternList,
    include_images: PatternList,
    exclude_images: PatternList,
    errors: Vec<FilterError>,
}

/// The compiled entries of one list. A list with entries stays in effect even
/// when none of them compiled, it then matches nothing.
#[derive(Clone, Debug, Default)]
struct PatternList {
    patterns: Vec<WildcardPattern>,
    configured: bool,
}

impl PatternList {
    fn matches(&self, value: &str) -> bool {
        matches_any(value, &self.patterns)
    }
}

impl FilterSpec {
    /// Build from comma separated lists, empty strings disable that filter.
    pub fn new(
        include_namespaces: &str,
        exclude_namespaces: &str,
        include_images: &str,
        exclude_images: &str,
    ) -> Self {
        let mut errors = Vec::new();
        let include_namespaces =
            compile_list("include-namespaces", include_namespaces, &mut errors);
        let exclude_namespaces =
            compile_list("exclude-namespaces", exclude_namespaces, &mut errors);
        let include_images = compile_list("include-images", include_images, &mut errors);
        let exclude_images = compile_list("exclude-images", exclude_images, &mut errors);
        Self {
            include_namespaces,
            exclude_namespaces,
            include_images,
            exclude_images,
            errors,
        }
    }

    pub fn should_process_namespace(&self, namespace: &str) -> bool {
        allowed(namespace, &self.include_namespaces, &self.exclude_namespaces)
    }

    pub fn should_process_image(&self, image: &str) -> bool {
        allowed(image, &self.include_images, &self.exclude_images)
    }

    /// Patterns that were dropped because they failed to compile.
    pub fn errors(&self) -> &[FilterError] {
        &self.errors
    }
}

fn allowed(value: &str, include: &PatternList, exclude: &PatternList) -> bool {
    if include.configured && !include.matches(value) {
        return false;
    }
    !exclude.matches(value)
}

fn compile_list(
    list: &'static str,
    patterns: &str,
    errors: &mut Vec<FilterError>,
) -> PatternList {
    let mut compiled = PatternList::default();
    for pattern in patterns.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        compiled.configured = true;
        match WildcardPattern::compile(pattern) {
            Ok(p) => compiled.patterns.push(p),
            Err(e) => {
                warn!(list, pattern, error = %e, "Ignoring filter pattern that does not compile");
                errors.push(FilterError {
                    list,
                    pattern: pattern.to_owned(),
                    reason: e.to_string(),
                });
            }
        }
    }
    compiled
}
