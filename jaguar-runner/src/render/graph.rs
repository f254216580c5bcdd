//! DOT text helpers
//!
//! Pure string transformations, no I/O: the dependency graph derived from
//! a system description and the canonical ordering of the simulator's
//! state-space graph.

use regex::Regex;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::LazyLock;

static ASSIGNMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(x\d+)\s*=").expect("valid regex"));

static VARIABLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(x\d+)\b").expect("valid regex"));

static STATE_EDGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([01 ]+)"\s*->\s*"[01 ]+""#).expect("valid regex"));

const SUBSCRIPT_DIGITS: [char; 10] = ['₀', '₁', '₂', '₃', '₄', '₅', '₆', '₇', '₈', '₉'];

/// Math-style label for a variable name: `x12` becomes `x₁₂`
///
/// Names that are not `x` followed by digits are returned unchanged.
pub fn subscript_label(name: &str) -> String {
    let Some(digits) = name.strip_prefix('x') else {
        return name.to_string();
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return name.to_string();
    }

    let mut label = String::from("x");
    for digit in digits.chars() {
        // checked above, every char is an ASCII digit
        let idx = digit as usize - '0' as usize;
        label.push(SUBSCRIPT_DIGITS[idx]);
    }
    label
}

/// Builds the variable dependency graph of a system description
///
/// Every equation `xk = f(...)` contributes an edge `xk -> xi` for each
/// other variable on its right-hand side. Comment lines (`#`), blank lines
/// and anything that is not an equation are ignored. Returns an empty
/// string when the text contains no equations.
pub fn dependency_dot(system_text: &str) -> String {
    let mut nodes = BTreeSet::new();
    let mut edges = BTreeSet::new();

    for line in system_text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some(captures) = ASSIGNMENT_RE.captures(line) else {
            continue;
        };

        let target = captures[1].to_string();
        let rhs = line.split_once('=').map(|(_, rhs)| rhs).unwrap_or_default();
        for var in VARIABLE_RE.captures_iter(rhs) {
            let var = var[1].to_string();
            if var != target {
                edges.insert((target.clone(), var.clone()));
            }
            nodes.insert(var);
        }
        nodes.insert(target);
    }

    if nodes.is_empty() && edges.is_empty() {
        return String::new();
    }

    let mut out = vec![
        "digraph dep {".to_string(),
        "  rankdir=LR;".to_string(),
        r#"  node [shape=ellipse, fontname="Monaco", fontsize=11];"#.to_string(),
        r#"  edge [fontname="Monaco", fontsize=9];"#.to_string(),
    ];
    for node in &nodes {
        out.push(format!(r#"  "{}" [label="{}"];"#, node, subscript_label(node)));
    }
    for (from, to) in &edges {
        out.push(format!(r#"  "{}" -> "{}";"#, from, to));
    }
    out.push("}".to_string());
    out.join("\n")
}

/// Reorders a state-space graph so edges are grouped by source state
///
/// Edge lines are sorted by the Hamming weight of the source bit string,
/// then by its integer value; ties keep their original order. All other
/// lines stay in front, and the closing brace goes last.
pub fn reorder_statespace(dot_source: &str) -> String {
    let mut prefix = Vec::new();
    let mut edges = Vec::new();
    let mut closing = None;

    for line in dot_source.lines() {
        if line.trim() == "}" {
            closing = Some(line);
        } else if STATE_EDGE_RE.is_match(line) {
            edges.push(line);
        } else {
            prefix.push(line);
        }
    }

    edges.sort_by(|a, b| compare_sources(&source_bits(a), &source_bits(b)));

    let mut out: Vec<&str> = prefix;
    out.extend(edges);
    out.extend(closing);
    out.join("\n")
}

fn source_bits(line: &str) -> String {
    STATE_EDGE_RE
        .captures(line)
        .map(|captures| captures[1].chars().filter(|c| *c != ' ').collect())
        .unwrap_or_default()
}

/// Orders bit strings by (number of ones, integer value)
///
/// The value is compared without parsing so state vectors of any width
/// work: once leading zeros are stripped, a longer string is larger and
/// equal lengths compare lexicographically.
fn compare_sources(a: &str, b: &str) -> Ordering {
    let weight = |bits: &str| bits.bytes().filter(|b| *b == b'1').count();
    let a_value = a.trim_start_matches('0');
    let b_value = b.trim_start_matches('0');

    weight(a)
        .cmp(&weight(b))
        .then_with(|| a_value.len().cmp(&b_value.len()))
        .then_with(|| a_value.cmp(b_value))
}

/// Whether text looks like a DOT digraph at all
pub fn is_digraph(dot_source: &str) -> bool {
    dot_source
        .lines()
        .map(str::trim)
        .any(|line| line.starts_with("digraph") || line.starts_with("strict digraph"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULT_SYSTEM: &str =
        "NUMBER OF VARIABLES: 3\nNUMBER OF STATES: 2\nx1 = x2\nx2 = x1 + x3\nx3 = x2 + x1\n";

    #[test]
    fn test_subscript_label() {
        assert_eq!(subscript_label("x1"), "x₁");
        assert_eq!(subscript_label("x12"), "x₁₂");
        assert_eq!(subscript_label("x"), "x");
        assert_eq!(subscript_label("y3"), "y3");
        assert_eq!(subscript_label("x1a"), "x1a");
    }

    #[test]
    fn test_dependency_dot_for_default_system() {
        let dot = dependency_dot(DEFAULT_SYSTEM);
        let expected = [
            "digraph dep {",
            "  rankdir=LR;",
            r#"  node [shape=ellipse, fontname="Monaco", fontsize=11];"#,
            r#"  edge [fontname="Monaco", fontsize=9];"#,
            r#"  "x1" [label="x₁"];"#,
            r#"  "x2" [label="x₂"];"#,
            r#"  "x3" [label="x₃"];"#,
            r#"  "x1" -> "x2";"#,
            r#"  "x2" -> "x1";"#,
            r#"  "x2" -> "x3";"#,
            r#"  "x3" -> "x1";"#,
            r#"  "x3" -> "x2";"#,
            "}",
        ]
        .join("\n");
        assert_eq!(dot, expected);
    }

    #[test]
    fn test_dependency_dot_skips_self_loops_and_comments() {
        let dot = dependency_dot("# x9 = x8\nx1 = x1 * x2 + x1\n\nnot an equation x7\n");
        assert!(dot.contains(r#""x1" -> "x2";"#));
        assert!(!dot.contains(r#""x1" -> "x1""#));
        assert!(!dot.contains("x9"));
        assert!(!dot.contains("x7"));
    }

    #[test]
    fn test_dependency_dot_is_empty_without_equations() {
        assert_eq!(dependency_dot(""), "");
        assert_eq!(dependency_dot("# only a comment\nNUMBER OF STATES: 2\n"), "");
    }

    #[test]
    fn test_reorder_statespace_groups_by_weight_then_value() {
        let source = [
            "digraph statespace {",
            "  node [shape=box];",
            r#"  "1 1" -> "0 0";"#,
            r#"  "0 1" -> "1 0";"#,
            r#"  "0 0" -> "0 0";"#,
            r#"  "1 0" -> "1 1";"#,
            "}",
        ]
        .join("\n");

        let expected = [
            "digraph statespace {",
            "  node [shape=box];",
            r#"  "0 0" -> "0 0";"#,
            r#"  "0 1" -> "1 0";"#,
            r#"  "1 0" -> "1 1";"#,
            r#"  "1 1" -> "0 0";"#,
            "}",
        ]
        .join("\n");
        assert_eq!(reorder_statespace(&source), expected);
    }

    #[test]
    fn test_reorder_statespace_keeps_order_of_equal_sources() {
        let source = "digraph g {\n\"1 0\" -> \"0 0\" [label=b];\n\"0 1\" -> \"1 1\";\n\"1 0\" -> \"1 1\" [label=a];\n}";
        let reordered = reorder_statespace(source);
        let lines: Vec<&str> = reordered.lines().collect();
        assert_eq!(lines[1], "\"0 1\" -> \"1 1\";");
        assert_eq!(lines[2], "\"1 0\" -> \"0 0\" [label=b];");
        assert_eq!(lines[3], "\"1 0\" -> \"1 1\" [label=a];");
        assert_eq!(lines[4], "}");
    }

    #[test]
    fn test_compare_wide_states() {
        let wide_low = format!("{}1", "0".repeat(99));
        let wide_high = format!("1{}", "0".repeat(99));
        assert_eq!(compare_sources(&wide_low, &wide_high), Ordering::Less);
        assert_eq!(compare_sources("011", "100"), Ordering::Greater);
    }

    #[test]
    fn test_is_digraph() {
        assert!(is_digraph("digraph g {\n}"));
        assert!(is_digraph("  strict digraph {\n}"));
        assert!(!is_digraph("graph g { a -- b }"));
        assert!(!is_digraph(""));
    }
}
