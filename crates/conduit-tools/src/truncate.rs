// Copyright (c) 2024-2026 Conduit Contributors
//
// SPDX-License-Identifier: MIT
use crate::tool::OutputCategory;

/// Truncate `content` to at most `max_chars` characters, using `category`
/// to decide which part of the content is worth keeping. Returns the
/// (possibly truncated) text; a `"[Output truncated at N characters]"`
/// sentinel is appended whenever truncation actually occurred.
pub fn truncate_output(content: &str, category: OutputCategory, max_chars: usize) -> String {
    if max_chars == 0 || content.chars().count() <= max_chars {
        return content.to_string();
    }

    let sentinel = format!("\n[Output truncated at {max_chars} characters]");
    let budget = max_chars.saturating_sub(sentinel.chars().count());

    let body = match category {
        OutputCategory::HeadTail => head_tail_lines(content, 60, 40, budget),
        OutputCategory::FileContent => head_tail_lines(content, 40, 20, budget),
        OutputCategory::MatchList => leading_lines(content, budget),
        OutputCategory::Generic => hard_cut(content, budget),
    };

    format!("{body}{sentinel}")
}

fn hard_cut(content: &str, budget: usize) -> String {
    content.chars().take(budget).collect()
}

fn leading_lines(content: &str, budget: usize) -> String {
    let mut out = String::new();
    for line in content.lines() {
        if out.chars().count() + line.chars().count() + 1 > budget {
            break;
        }
        out.push_str(line);
        out.push('\n');
    }
    if out.is_empty() {
        hard_cut(content, budget)
    } else {
        out
    }
}

fn head_tail_lines(content: &str, head_n: usize, tail_n: usize, budget: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    if lines.len() <= head_n + tail_n {
        return hard_cut(content, budget);
    }
    let head = &lines[..head_n];
    let tail = &lines[lines.len() - tail_n..];
    let omitted = lines.len() - head_n - tail_n;
    let mut out = head.join("\n");
    out.push_str(&format!("\n... ({omitted} lines omitted) ...\n"));
    out.push_str(&tail.join("\n"));
    if out.chars().count() > budget {
        hard_cut(&out, budget)
    } else {
        out
    }
}
