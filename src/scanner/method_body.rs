//! Locating one method's body in test source, and the variables it touches.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

const MODIFIERS: &str = "static|async|override|virtual|sealed|new|unsafe|extern";
const TEST_ATTRIBUTES: &str = "Fact|Theory|Test|TestMethod|TestCase|TestCaseSource";

// ident.
static MEMBER_ACCESS_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b([A-Za-z_]\w*)\.").unwrap());

// = ident.
static ASSIGNMENT_SOURCE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"=\s+([A-Za-z_]\w*)\.").unwrap());

// await ident.
static AWAITED_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bawait\s+([A-Za-z_]\w*)\.").unwrap());

/// Body text of `method_name`, from just after the opening `{` (or `=>`) to
/// the end of the method. `None` when no declaration is found.
///
/// Theory display names (`Rounds(value: 1.5)`) are reduced to the bare
/// method name first.
pub fn locate_method_body<'a>(source: &'a str, method_name: &str) -> Option<&'a str> {
    let name = bare_method_name(method_name);
    if name.is_empty() {
        return None;
    }
    let escaped = regex::escape(name);

    let declaration = format!(
        r"(?m)^[ \t]*(?:public|private|protected|internal)(?:[ \t]+(?:{MODIFIERS}))*[ \t]+[\w<>\[\],.? \t]+?[ \t]+{escaped}[ \t]*\([^)]*\)[^{{;=]*?(\{{|=>)"
    );
    let attributed = format!(
        r"(?s)\[(?:{TEST_ATTRIBUTES})\b[^\]]*\].*?\b{escaped}[ \t]*\([^)]*\)[^{{;=]*?(\{{|=>)"
    );

    for (strategy, pattern) in [("declaration", declaration), ("attribute", attributed)] {
        let regex = match Regex::new(&pattern) {
            Ok(r) => r,
            Err(e) => {
                warn!(method = name, error = %e, "method pattern failed to compile");
                continue;
            }
        };
        let Some(caps) = regex.captures(source) else {
            continue;
        };
        let Some(opener) = caps.get(1) else {
            continue;
        };

        let name_pos = caps.get(0).map_or(opener.start(), |m| {
            m.as_str().rfind(name).map_or(m.start(), |i| m.start() + i)
        });
        debug!(method = name, strategy, "method located");

        let body = if opener.as_str() == "=>" {
            expression_body(source, opener.end())
        } else {
            block_body(source, opener.end(), line_indent(source, name_pos))
        };
        return Some(body);
    }

    debug!(method = name, "method declaration not found");
    None
}

/// `Rounds(value: 1.5)` -> `Rounds`
pub fn bare_method_name(method_name: &str) -> &str {
    method_name.split('(').next().unwrap_or_default().trim()
}

fn expression_body(source: &str, start: usize) -> &str {
    let rest = &source[start..];
    let end = rest.find(';').unwrap_or(rest.len());
    &rest[..end]
}

/// Text after `{` up to the first line that starts with `}` at or left of
/// the declaration's indentation; failing that, the first line starting
/// with `}`; failing that, the end of the source.
fn block_body(source: &str, start: usize, decl_indent: usize) -> &str {
    let rest = &source[start..];

    // one-liner: `{ _sut.Run(); }`
    let first_line_end = rest.find('\n').unwrap_or(rest.len());
    let mut depth = 1usize;
    for (i, c) in rest[..first_line_end].char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return &rest[..i];
                }
            }
            _ => {}
        }
    }

    let mut first_closing: Option<usize> = None;
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        // skip the remainder of the opening line
        if offset > 0 {
            let trimmed = line.trim_start();
            if trimmed.starts_with('}') {
                let indent = line.len() - trimmed.len();
                if indent <= decl_indent {
                    return &rest[..offset];
                }
                first_closing.get_or_insert(offset);
            }
        }
        offset += line.len();
    }

    match first_closing {
        Some(end) => &rest[..end],
        None => rest,
    }
}

fn line_indent(source: &str, pos: usize) -> usize {
    let line_start = source[..pos].rfind('\n').map_or(0, |i| i + 1);
    let line = &source[line_start..];
    line.len() - line.trim_start_matches([' ', '\t']).len()
}

/// Identifiers used as the target of a member access, in first-appearance
/// order, deduplicated.
pub fn used_variables(body: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut used = Vec::new();

    for regex in [&*MEMBER_ACCESS_REGEX, &*ASSIGNMENT_SOURCE_REGEX, &*AWAITED_REGEX] {
        for caps in regex.captures_iter(body) {
            let ident = &caps[1];
            if seen.insert(ident.to_string()) {
                used.push(ident.to_string());
            }
        }
    }
    used
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"
namespace Shop.Tests
{
    public class OrderServiceTests
    {
        [Fact]
        public async Task RejectsInvalidOrder()
        {
            var order = _builder.Build();
            if (order.Lines.Count > 0)
            {
                order.Sku = "bad";
            }
            var result = await _sut.CreateAsync(order);
            Assert.False(result.Success);
        }

        [Fact]
        public void CreatesOrder()
        {
            _repo.Save(null);
        }

        [Theory]
        [InlineData(1.5)]
        void Rounds(decimal value)
        {
            _calculator.Round(value);
        }

        public void Inline() { _clock.Now(); }

        public int Total() => _cart.Sum();
    }
}
"#;

    #[test]
    fn test_block_body_spans_nested_braces() {
        let body = locate_method_body(SOURCE, "RejectsInvalidOrder").unwrap();
        assert!(body.contains("_builder.Build()"));
        assert!(body.contains("order.Sku"));
        assert!(body.contains("Assert.False"));
        assert!(!body.contains("_repo.Save"));
    }

    #[test]
    fn test_attribute_fallback_without_access_modifier() {
        let body = locate_method_body(SOURCE, "Rounds(value: 1.5)").unwrap();
        assert!(body.contains("_calculator.Round"));
        assert!(!body.contains("_clock"));
    }

    #[test]
    fn test_one_liner_and_expression_body() {
        assert_eq!(locate_method_body(SOURCE, "Inline").unwrap().trim(), "_clock.Now();");
        assert_eq!(locate_method_body(SOURCE, "Total").unwrap().trim(), "_cart.Sum()");
    }

    #[test]
    fn test_name_must_match_exactly() {
        assert!(locate_method_body(SOURCE, "Creates").is_none());
        assert!(locate_method_body(SOURCE, "Missing").is_none());
        assert!(locate_method_body(SOURCE, "").is_none());
    }

    #[test]
    fn test_unindented_closing_brace_fallback() {
        let source = "public void Flat()\n{\n_a.B();\n}\npublic void Next()\n{\n_c.D();\n}\n";
        let body = locate_method_body(source, "Flat").unwrap();
        assert!(body.contains("_a.B()"));
        assert!(!body.contains("_c.D()"));
    }

    #[test]
    fn test_used_variables_union_and_order() {
        let body = r#"
            var x = _sut.Run(_input.Value);
            var y = await _client.GetAsync();
            var z = order.Total;
            _sut.Stop();
        "#;
        assert_eq!(used_variables(body), vec!["_sut", "_input", "_client", "order"]);
    }

    #[test]
    fn test_used_variables_chains() {
        assert_eq!(
            used_variables("_mockPricing.Object.Calculate(1.5m);"),
            vec!["_mockPricing", "Object"]
        );
    }
}
