//! Class dependency extraction from C# test source.
//!
//! Rules run in a fixed order, and the order decides who wins a conflict:
//!
//! 1. field declarations (three patterns, strict to loose, first match wins)
//! 2. `Mock<T>` declarations (also register the unwrapped field name)
//! 3. test class constructor parameters
//! 4. `name = new Type(` instantiations (overwrite earlier field entries)

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::trace;

use super::{ClassDependencyModel, SymbolInference};

// access readonly Type name;
static FIELD_STRICT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:private|protected|public|internal)[ \t]+readonly[ \t]+([A-Z]\w*)[ \t]+([A-Za-z_]\w*)[ \t]*;")
        .unwrap()
});

// access [static] [readonly] Type<...> name;
static FIELD_MODIFIED_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)^[ \t]*(?:private|protected|public|internal)(?:[ \t]+(?:static|readonly))*[ \t]+([A-Z][\w.]*(?:<[^;=(){}\n]*>)?(?:\[\])?\??)[ \t]+([A-Za-z_]\w*)[ \t]*;",
    )
    .unwrap()
});

// Type name;   (anywhere)
static FIELD_LOOSE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([A-Z][\w.]*(?:<[^;=(){}\n]*>)?)[ \t]+([A-Za-z_]\w*)[ \t]*;").unwrap()
});

static MOCK_DECL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bMock<([^;=(){}\n]+?)>[ \t]+([A-Za-z_]\w*)").unwrap()
});

static CLASS_DECL_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bclass[ \t]+([A-Z]\w*)").unwrap());

static PUBLIC_CTOR_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bpublic[ \t]+([A-Z]\w*)[ \t]*\(([^)]*)\)").unwrap()
});

// name = new Type(  /  name = new Type<Args>(
static INSTANTIATION_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([A-Za-z_]\w*)\s*=\s*new\s+([A-Z][\w.]*)\s*(?:<[^;(){}]*>)?\s*\(").unwrap()
});

static IDENTIFIER_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_]\w*$").unwrap());

const PARAMETER_MODIFIERS: &[&str] = &["this", "ref", "out", "in", "params", "scoped"];

/// The default, pattern-based inference.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegexSymbolInference;

impl SymbolInference for RegexSymbolInference {
    fn infer_symbol_types(&self, source: &str) -> ClassDependencyModel {
        let mut model = ClassDependencyModel::default();

        extract_fields(source, &mut model);
        extract_mocks(source, &mut model);
        extract_constructor_params(source, &mut model);
        extract_instantiations(source, &mut model);

        trace!(
            fields = model.field_types.len(),
            mocks = model.mock_types.len(),
            ctor_params = model.constructor_params.len(),
            "inferred symbol types"
        );
        model
    }
}

fn extract_fields(source: &str, model: &mut ClassDependencyModel) {
    for regex in [&*FIELD_STRICT_REGEX, &*FIELD_MODIFIED_REGEX, &*FIELD_LOOSE_REGEX] {
        for caps in regex.captures_iter(source) {
            let type_name = caps[1].trim();
            let name = &caps[2];
            model.field_types.insert_if_absent(name, type_name);
        }
    }
}

fn extract_mocks(source: &str, model: &mut ClassDependencyModel) {
    for caps in MOCK_DECL_REGEX.captures_iter(source) {
        register_mock(model, &caps[2], caps[1].trim());
    }
}

fn register_mock(model: &mut ClassDependencyModel, name: &str, type_name: &str) {
    // `Mock<IRepo> _repo;` also matched the field patterns as `Mock<IRepo>`
    model.field_types.remove(name);
    model.mock_types.insert_if_absent(name, type_name);

    if let Some(unwrapped) = unwrapped_mock_name(name) {
        if !model.mock_types.contains(&unwrapped) {
            model.field_types.insert(&unwrapped, type_name);
        }
    }
}

/// Name the test uses for the mocked object: `_mockService` -> `_service`,
/// `mockService` -> `service`, `_serviceMock` -> `_service`.
pub fn unwrapped_mock_name(name: &str) -> Option<String> {
    let (prefix, rest) = if let Some(rest) = name.strip_prefix("_mock") {
        ("_", rest)
    } else if let Some(rest) = name.strip_prefix("mock") {
        ("", rest)
    } else if let Some(stem) = name.strip_suffix("Mock") {
        return (!stem.is_empty() && stem != "_").then(|| stem.to_string());
    } else {
        return None;
    };

    let mut chars = rest.chars();
    let first = chars.next()?;
    if !first.is_ascii_uppercase() {
        return None;
    }
    Some(format!("{prefix}{}{}", first.to_ascii_lowercase(), chars.as_str()))
}

fn extract_constructor_params(source: &str, model: &mut ClassDependencyModel) {
    let classes: HashSet<&str> = CLASS_DECL_REGEX
        .captures_iter(source)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();

    let ctor = PUBLIC_CTOR_REGEX
        .captures_iter(source)
        .find(|caps| classes.is_empty() || classes.contains(&caps[1]));
    let Some(ctor) = ctor else {
        return;
    };

    for param in split_top_level(&ctor[2], ',') {
        if let Some((name, type_name)) = parse_parameter(param) {
            model.constructor_params.insert_if_absent(&name, &type_name);
        }
    }
}

fn extract_instantiations(source: &str, model: &mut ClassDependencyModel) {
    for caps in INSTANTIATION_REGEX.captures_iter(source) {
        let name = &caps[1];
        let type_name = &caps[2];

        // only `Mock<T> name` declarations make mocks; `x = new Mock<T>(` is
        // either their initializer or a method-local mock
        if type_name == "Mock" || model.mock_types.contains(name) {
            continue;
        }
        model.field_types.insert(name, type_name);
    }
}

/// Split on `sep` outside of `<...>`, `(...)` and `[...]`.
pub(crate) fn split_top_level(text: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;

    for (i, c) in text.char_indices() {
        match c {
            '<' | '(' | '[' => depth += 1,
            '>' | ')' | ']' => depth -= 1,
            c if c == sep && depth <= 0 => {
                parts.push(&text[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts.into_iter().map(str::trim).filter(|p| !p.is_empty()).collect()
}

/// `[FromServices] IRepo<Order> repo = null` -> `("repo", "IRepo<Order>")`
fn parse_parameter(param: &str) -> Option<(String, String)> {
    let mut param = param.split('=').next()?.trim();

    while let Some(rest) = param.strip_prefix('[') {
        let close = rest.find(']')?;
        param = rest[close + 1..].trim_start();
    }

    let (type_part, name) = param.rsplit_once(char::is_whitespace)?;
    let name = name.trim();
    if !IDENTIFIER_REGEX.is_match(name) {
        return None;
    }

    let mut type_name = type_part.trim();
    while let Some((first, rest)) = type_name.split_once(char::is_whitespace) {
        if !PARAMETER_MODIFIERS.contains(&first) {
            break;
        }
        type_name = rest.trim_start();
    }

    type_name
        .starts_with(|c: char| c.is_ascii_uppercase())
        .then(|| (name.to_string(), type_name.to_string()))
}
