//! Prompt templates for codebase analysis.
//!
//! Every backend call is a system message plus one rendered user message.
//! Templates are filled in a single pass: placeholders that appear inside a
//! substituted value (source code is full of `{braces}`) are left untouched.

use crate::gateway::Message;

// =============================================================================
// Rendering
// =============================================================================

/// Rendered prompt ready for the backend.
#[derive(Debug, Clone)]
pub struct PromptInstance {
    pub template_slug: &'static str,
    pub system: String,
    pub user: String,
}

impl PromptInstance {
    pub fn to_messages(&self) -> Vec<Message> {
        vec![Message::system(&self.system), Message::user(&self.user)]
    }
}

/// A prompt template with `{name}` placeholders in its user half.
#[derive(Debug, Clone, Copy)]
pub struct PromptTemplate {
    pub slug: &'static str,
    pub system: &'static str,
    pub user: &'static str,
}

impl PromptTemplate {
    pub fn render(&self, fields: &[(&str, &str)]) -> PromptInstance {
        PromptInstance {
            template_slug: self.slug,
            system: self.system.to_string(),
            user: fill(self.user, fields),
        }
    }
}

/// Replace each `{key}` in `template` with its value. Unknown placeholders
/// are emitted verbatim and substituted text is never rescanned.
pub fn fill(template: &str, fields: &[(&str, &str)]) -> String {
    let extra: usize = fields.iter().map(|(_, v)| v.len()).sum();
    let mut out = String::with_capacity(template.len() + extra);
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let value = after.find('}').and_then(|close| {
            let key = &after[..close];
            fields
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| (*v, close))
        });
        match value {
            Some((v, close)) => {
                out.push_str(v);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

// =============================================================================
// Field records
// =============================================================================

/// Whole-codebase analysis in one call.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisFields<'a> {
    pub project_path: &'a str,
    pub tree: &'a str,
    pub code: &'a str,
}

/// One chunk of the map stage.
#[derive(Debug, Clone, Copy)]
pub struct MapFields<'a> {
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub project_path: &'a str,
    pub tree: &'a str,
    pub code: &'a str,
}

/// One batch of the reduce stage. `summaries` is the joined payload.
#[derive(Debug, Clone, Copy)]
pub struct ReduceFields<'a> {
    pub project_path: &'a str,
    pub tree: &'a str,
    pub summaries: &'a str,
}

/// Final report from the single consolidated summary.
#[derive(Debug, Clone, Copy)]
pub struct SynthesisFields<'a> {
    pub total_chunks: usize,
    pub project_path: &'a str,
    pub tree: &'a str,
    pub summary: &'a str,
}

pub fn render_analysis(f: AnalysisFields<'_>) -> PromptInstance {
    ANALYSIS_PROMPT.render(&[
        ("project_path", f.project_path),
        ("tree", f.tree),
        ("code", f.code),
    ])
}

pub fn render_map(f: MapFields<'_>) -> PromptInstance {
    let index = f.chunk_index.to_string();
    let total = f.total_chunks.to_string();
    MAP_PROMPT.render(&[
        ("chunk_index", &index),
        ("total_chunks", &total),
        ("project_path", f.project_path),
        ("tree", f.tree),
        ("code", f.code),
    ])
}

pub fn render_reduce(f: ReduceFields<'_>) -> PromptInstance {
    REDUCE_PROMPT.render(&[
        ("project_path", f.project_path),
        ("tree", f.tree),
        ("summaries", f.summaries),
    ])
}

pub fn render_synthesis(f: SynthesisFields<'_>) -> PromptInstance {
    let total = f.total_chunks.to_string();
    SYNTHESIS_PROMPT.render(&[
        ("total_chunks", &total),
        ("project_path", f.project_path),
        ("tree", f.tree),
        ("summary", f.summary),
    ])
}

/// Placed between summaries in a reduce payload.
pub const SUMMARY_SEPARATOR: &str = "\n\n---\n\n";

/// Heading in front of the summary at 1-based `position` within its batch.
pub fn summary_heading(position: usize) -> String {
    format!("### Summary {position}\n")
}

/// Join a batch into the reduce payload: numbered headings, rule separators.
/// `Batcher` counts exactly these characters.
pub fn join_summaries(summaries: &[String]) -> String {
    summaries
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}{s}", summary_heading(i + 1)))
        .collect::<Vec<_>>()
        .join(SUMMARY_SEPARATOR)
}

/// Conversation retained after a map-reduce run: the report stands in for the
/// code, which no longer fits.
pub fn follow_up_seed(project_path: &str, tree: &str, report: &str) -> Vec<Message> {
    let user = fill(
        FOLLOW_UP_SEED,
        &[
            ("project_path", project_path),
            ("tree", tree),
            ("report", report),
        ],
    );
    vec![
        Message::system(SYSTEM_PROMPT),
        Message::user(user),
        Message::assistant(FOLLOW_UP_ACK),
    ]
}

// =============================================================================
// Standard prompts
// =============================================================================

pub const SYSTEM_PROMPT: &str = r#"You are a senior software architect reviewing an unfamiliar codebase. Work only from the code and listings you are given.

For an analysis, establish what the project is for, how its directories are organised, what each file is responsible for, how the components depend on one another, where execution starts and how data moves through it, and which architectural patterns it follows. Call out configuration files and what they control.

For follow-up questions, answer from the analysed code: name the files and functions involved, trace call paths and data flow when asked, and say so plainly when the material you were given does not cover something."#;

/// Section outline shared by the single-call and synthesis prompts.
macro_rules! report_sections {
    () => {
        r#"### 1. Project Overview
What the project does and who it is for.

### 2. Directory Structure & Organization
How the tree is laid out and why.

### 3. File Inventory & Purposes
Per file: its responsibility, its key types and functions, and its role in the system.

### 4. Component Interactions & Relationships
Which modules call or depend on which.

### 5. Dependency Map
Internal import relationships between files, then the external libraries in use.

### 6. Entry Points & Data Flow
Where execution begins and how input becomes output.

### 7. Architecture Patterns
Design patterns and structural principles visible in the code.

### 8. Summary
Overall strengths and design quality, briefly."#
    };
}

const REPORT_SECTIONS: &str = report_sections!();

pub const ANALYSIS_PROMPT: PromptTemplate = PromptTemplate {
    slug: "analysis_v1",
    system: SYSTEM_PROMPT,
    user: concat!(
        r#"Analyse the project below and write a structured report.

## Project Path
{project_path}

## Directory Structure
```
{tree}
```

## File Contents
{code}

---

Structure the report with these sections:

"#,
        report_sections!()
    ),
};

pub const MAP_PROMPT: PromptTemplate = PromptTemplate {
    slug: "map_v1",
    system: SYSTEM_PROMPT,
    user: r#"This codebase is too large to read at once, so you are seeing it in parts. This is part {chunk_index} of {total_chunks}.

## Project Path
{project_path}

## Directory Structure (whole project)
```
{tree}
```

## File Contents (this part only)
{code}

---

Write a technical summary of the files in this part:
- each file and what it is responsible for
- the important types, functions and exports
- imports and dependencies you can see
- entry points and notable patterns

Keep it dense. It will be merged with the summaries of the other parts."#,
};

pub const REDUCE_PROMPT: PromptTemplate = PromptTemplate {
    slug: "reduce_v1",
    system: SYSTEM_PROMPT,
    user: r#"Merge the partial codebase summaries below into one consolidated summary.

## Project Path
{project_path}

## Directory Structure
```
{tree}
```

## Partial Summaries
{summaries}

---

Keep every file and its responsibility, every key type and function, every dependency relationship, and every entry point and pattern. Remove repetition, not information."#,
};

pub const SYNTHESIS_PROMPT: PromptTemplate = PromptTemplate {
    slug: "synthesis_v1",
    system: SYSTEM_PROMPT,
    user: concat!(
        r#"You read this codebase in {total_chunks} parts and consolidated your notes into the summary below. Turn it into the final analysis report.

## Project Path
{project_path}

## Directory Structure
```
{tree}
```

## Consolidated Summary
{summary}

---

Structure the report with these sections, covering files from every part:

"#,
        report_sections!()
    ),
};

const FOLLOW_UP_SEED: &str = r#"I have analysed the codebase at {project_path}. Use the directory listing and the report below to answer my follow-up questions.

## Directory Structure
```
{tree}
```

## Analysis Report
{report}"#;

const FOLLOW_UP_ACK: &str = "Understood. I have the directory structure and the full analysis report, and I'm ready for your questions about this codebase.";

/// The report section outline shared by the analysis and synthesis prompts.
pub fn report_sections() -> &'static str {
    REPORT_SECTIONS
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_is_single_pass() {
        let out = fill("code: {code} path: {path}", &[("code", "{path}"), ("path", "/p")]);
        assert_eq!(out, "code: {path} path: /p");
    }

    #[test]
    fn fill_leaves_unknown_and_unbalanced_braces() {
        assert_eq!(fill("fn x() { {y} }", &[]), "fn x() { {y} }");
        assert_eq!(fill("open { only", &[("only", "no")]), "open { only");
        assert_eq!(fill("{a}{a}", &[("a", "1")]), "11");
    }

    #[test]
    fn map_prompt_embeds_position_and_code() {
        let p = render_map(MapFields {
            chunk_index: 3,
            total_chunks: 7,
            project_path: "/repo",
            tree: "/repo\n└── main.rs",
            code: "fn main() { println!(\"{chunk_index}\"); }",
        });
        assert_eq!(p.template_slug, "map_v1");
        assert!(p.user.contains("part 3 of 7"));
        assert!(p.user.contains("println!(\"{chunk_index}\")"));
        assert_eq!(p.to_messages().len(), 2);
    }

    #[test]
    fn report_prompts_share_the_section_outline() {
        let a = render_analysis(AnalysisFields {
            project_path: "/r",
            tree: "/r",
            code: "",
        });
        let s = render_synthesis(SynthesisFields {
            total_chunks: 4,
            project_path: "/r",
            tree: "/r",
            summary: "notes",
        });
        assert!(a.user.ends_with(report_sections()));
        assert!(s.user.ends_with(report_sections()));
        assert!(s.user.contains("in 4 parts"));
    }

    #[test]
    fn summaries_join_with_numbered_headings() {
        let joined = join_summaries(&["a".to_string(), "b".to_string()]);
        assert_eq!(joined, "### Summary 1\na\n\n---\n\n### Summary 2\nb");
    }

    #[test]
    fn seed_is_system_user_assistant() {
        let seed = follow_up_seed("/r", "/r\n└── x", "REPORT");
        assert_eq!(seed.len(), 3);
        assert!(seed[1].content.contains("REPORT"));
        assert!(seed[1].content.contains("└── x"));
    }
}
