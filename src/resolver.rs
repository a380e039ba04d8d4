// ============================================================================
// 引用解析 - test method -> production files it exercises
// ============================================================================
//
// Pipeline for one method:
//
//   test file text ──► SymbolInference ──► ClassDependencyModel
//                 └──► method body ──► used variables ──► candidate types
//   candidate types ──► `<Type>.<ext>` searches ──► filtered paths
//   (nothing found) ──► method-name keywords ──► `*<word>*.<ext>` searches
//
// Every failure along the way shrinks the result; none is reported as an
// error to the caller.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::config::CorrelatorConfig;
use crate::finder::{contains_name_glob, exact_name_glob, in_build_output, FileFinder};
use crate::scanner::method_body::{bare_method_name, locate_method_body, used_variables};
use crate::scanner::{ClassDependencyModel, SymbolInference};

// IPricingEngine -> PricingEngine
static INTERFACE_PREFIX_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^I([A-Z].*)$").unwrap());


/// Resolves the production files a test method references.
pub struct ReferenceResolver<'a> {
    finder: &'a dyn FileFinder,
    inference: &'a dyn SymbolInference,
    config: &'a CorrelatorConfig,
}

impl<'a> ReferenceResolver<'a> {
    pub fn new(finder: &'a dyn FileFinder, inference: &'a dyn SymbolInference, config: &'a CorrelatorConfig) -> Self {
        Self {
            finder,
            inference,
            config,
        }
    }

    /// Referenced production files of `method_name` in `test_file`, in
    /// discovery order, without duplicates. Empty when anything goes wrong.
    pub fn compute(&self, method_name: &str, test_file: &Path) -> Vec<PathBuf> {
        let source = match fs::read_to_string(test_file) {
            Ok(s) => s,
            Err(e) => {
                warn!(file = %test_file.display(), error = %e, "cannot read test file");
                return Vec::new();
            }
        };
        self.compute_from_source(method_name, &source)
    }

    /// Same as [`compute`](Self::compute) for already-loaded source text.
    pub fn compute_from_source(&self, method_name: &str, source: &str) -> Vec<PathBuf> {
        let model = self.inference.infer_symbol_types(source);

        let Some(body) = locate_method_body(source, method_name) else {
            return Vec::new();
        };

        let used = used_variables(body);
        let candidates = candidate_types(&model, &used);
        debug!(
            method = method_name,
            used = used.len(),
            candidates = ?candidates,
            "candidate types"
        );

        let mut accepted = Vec::new();
        let mut seen = HashSet::new();

        for type_name in &candidates {
            for spelling in type_spellings(type_name) {
                for path in self.finder.find_files(&exact_name_glob(&spelling, self.config)) {
                    self.accept(path, &mut accepted, &mut seen);
                }
            }
        }

        if accepted.is_empty() {
            let keywords = fallback_keywords(method_name, self.config);
            info!(method = method_name, keywords = ?keywords, "no type matches, falling back to keyword search");
            for word in &keywords {
                for path in self.finder.find_files(&contains_name_glob(word, self.config)) {
                    self.accept(path, &mut accepted, &mut seen);
                }
            }
        }

        debug!(method = method_name, files = accepted.len(), "referenced files resolved");
        accepted
    }

    fn accept(&self, path: PathBuf, accepted: &mut Vec<PathBuf>, seen: &mut HashSet<PathBuf>) {
        let relative = path.strip_prefix(self.finder.root()).unwrap_or(&path);
        if self.config.is_test_path(relative) {
            return;
        }
        if in_build_output(relative, self.config) {
            return;
        }
        if seen.insert(path.clone()) {
            accepted.push(path);
        }
    }
}

/// Types of the used variables (fields first, then mocks), followed by every
/// mocked type. Deduplicated, in order.
///
/// Constructor parameters are not in scope inside a test method, so a used
/// name that only matches one contributes nothing.
pub fn candidate_types(model: &ClassDependencyModel, used: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    let from_usage = used
        .iter()
        .filter_map(|var| model.type_of(var));
    // every mock is presumed to be a dependency of the class under test
    let from_mocks = model.mock_types.types();

    for type_name in from_usage.chain(from_mocks) {
        if seen.insert(type_name) {
            candidates.push(type_name.to_string());
        }
    }
    candidates
}

/// File stems to search for a candidate type: the plain type name and, for
/// `IFoo` interfaces, `Foo`.
///
/// `Shop.Core.IRepo<Order>?` -> `["IRepo", "Repo"]`
pub fn type_spellings(type_name: &str) -> Vec<String> {
    let base = strip_generics(type_name.trim())
        .trim_end_matches('?')
        .trim_end_matches("[]")
        .trim_end_matches('?');
    let base = base.rsplit('.').next().unwrap_or(base).trim();
    if base.is_empty() {
        return Vec::new();
    }

    let mut spellings = vec![base.to_string()];
    if let Some(caps) = INTERFACE_PREFIX_REGEX.captures(base) {
        spellings.push(caps[1].to_string());
    }
    spellings
}

fn strip_generics(type_name: &str) -> &str {
    match type_name.find('<') {
        Some(idx) => type_name[..idx].trim_end(),
        None => type_name,
    }
}

/// Keywords for the fallback search: each underscore-separated segment of
/// the method name and, for compound segments, its camel-case words. Short
/// words and stop words are dropped.
///
/// `Should_Return_NotFound_WhenMissing` ->
/// `["Return", "NotFound", "Found", "WhenMissing", "Missing"]`
pub fn fallback_keywords(method_name: &str, config: &CorrelatorConfig) -> Vec<String> {
    let name = bare_method_name(method_name);
    let mut seen = HashSet::new();
    let mut keywords = Vec::new();

    for segment in name.split('_').filter(|s| !s.is_empty()) {
        let words = camel_words(segment);

        let mut push = |word: &str| {
            if word.chars().count() > config.min_keyword_len
                && !config.is_stop_word(word)
                && seen.insert(word.to_string())
            {
                keywords.push(word.to_string());
            }
        };

        push(segment);
        if words.len() > 1 {
            for word in words {
                push(word);
            }
        }
    }
    keywords
}

/// `NotFound` -> `Not`, `Found`; `HTTPClient` -> `HTTP`, `Client`
fn camel_words(segment: &str) -> Vec<&str> {
    let chars: Vec<(usize, char)> = segment.char_indices().collect();
    let mut words = Vec::new();
    let mut start: Option<usize> = None;

    for (i, &(pos, c)) in chars.iter().enumerate() {
        if !c.is_alphanumeric() {
            if let Some(s) = start.take() {
                words.push(&segment[s..pos]);
            }
            continue;
        }
        let Some(s) = start else {
            start = Some(pos);
            continue;
        };
        let prev = chars[i - 1].1;
        let next_lower = chars.get(i + 1).is_some_and(|&(_, n)| n.is_lowercase());
        let boundary = c.is_uppercase()
            && ((prev.is_lowercase() || prev.is_ascii_digit()) || (prev.is_uppercase() && next_lower));
        if boundary {
            words.push(&segment[s..pos]);
            start = Some(pos);
        }
    }
    if let Some(s) = start {
        words.push(&segment[s..]);
    }
    words
}
