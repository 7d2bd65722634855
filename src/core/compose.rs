//! Markdown documents assembled from stage outputs.

use chrono::NaiveDate;

use crate::config::OutputConfig;
use crate::domain::stage::find_stage;
use crate::domain::{DigestError, PipelineRun, StageResult};

use super::pipeline::stages;
use super::sanitize::normalize_quotes;

/// Everything produced for one day
#[derive(Debug, Clone)]
pub struct PipelineBundle {
    /// Results of every stage across the runs, in execution order
    pub stages: Vec<StageResult>,
    pub digest_markdown: Option<String>,
    pub podcast_markdown: Option<String>,
    /// Audit document listing each stage's prompt pair
    pub prompts_markdown: String,
}

impl PipelineBundle {
    /// Build the bundle from a digest run and an optional podcast run
    ///
    /// Fails with `DigestError::Stage` unless every given run completed.
    pub fn assemble(
        date: &str,
        digest: PipelineRun,
        podcast: Option<PipelineRun>,
        output: &OutputConfig,
    ) -> Result<Self, DigestError> {
        let mut all = digest.into_stages()?;
        let digest_markdown = compose_digest_from(date, &all, output)?;

        let podcast_markdown = match podcast {
            Some(run) => {
                let podcast_stages = run.into_stages()?;
                let markdown = compose_podcast_from(date, &podcast_stages, output)?;
                all.extend(podcast_stages);
                Some(markdown)
            }
            None => None,
        };

        Ok(Self {
            prompts_markdown: compose_prompts(date, &all),
            stages: all,
            digest_markdown: Some(digest_markdown),
            podcast_markdown,
        })
    }
}

fn required<'a>(results: &'a [StageResult], name: &str) -> Result<&'a str, DigestError> {
    find_stage(results, name)
        .map(|s| s.sanitized_output.as_str())
        .ok_or_else(|| DigestError::validation(format!("Missing output of stage '{}'", name)))
}

fn compose_digest_from(date: &str, results: &[StageResult], output: &OutputConfig) -> Result<String, DigestError> {
    let summary = required(results, stages::SUMMARIZE)?;
    let highlight = required(results, stages::HIGHLIGHT)?;
    Ok(compose_digest(date, summary, highlight, output))
}

/// Podcast document from completed podcast stage results
pub fn compose_podcast_from(date: &str, results: &[StageResult], output: &OutputConfig) -> Result<String, DigestError> {
    let full = required(results, stages::PODCAST_FULL)?;
    let short = required(results, stages::PODCAST_SHORT)?;
    Ok(compose_podcast(date, full, short, output))
}

/// Daily digest: title, subtitle, condensed block, full summary, extras
pub fn compose_digest(date: &str, summary: &str, highlight: &str, output: &OutputConfig) -> String {
    let fence = fence_for(highlight);
    let mut doc = format!(
        "## {} {}\n\n> {}\n\n\n\n### {}\n\n{fence}\n{}\n{fence}\n\n\n\n{}",
        output.daily_title,
        heading_date(date, output),
        output.daily_subtitle,
        output.highlight_heading,
        highlight,
        summary,
        fence = fence,
    );

    if output.insert_ad && !output.ad_text.is_empty() {
        doc.push_str(&format!("\n\n{}\n", output.ad_text));
    }
    if output.insert_foot && !output.foot_text.is_empty() {
        doc.push_str(&format!("\n\n{}\n\n", output.foot_text));
    }

    finish(doc, output)
}

/// Podcast script document with full and short versions
pub fn compose_podcast(date: &str, full: &str, short: &str, output: &OutputConfig) -> String {
    let doc = format!(
        "# {} {}\n\n## Full: Podcast Formatting \n\n{}\n\n## Short: Podcast Formatting \n\n{}",
        output.podcast_title,
        heading_date(date, output),
        full,
        short
    );
    finish(doc, output)
}

/// Date as shown in headings, reformatted when `heading_date_format` is set
fn heading_date(date: &str, output: &OutputConfig) -> String {
    output
        .heading_date_format
        .as_deref()
        .and_then(|format| {
            NaiveDate::parse_from_str(date, &output.date_format)
                .ok()
                .map(|parsed| parsed.format(format).to_string())
        })
        .unwrap_or_else(|| date.to_string())
}

/// Quote conversion covers the whole published document
fn finish(doc: String, output: &OutputConfig) -> String {
    if output.convert_quotes {
        normalize_quotes(&doc)
    } else {
        doc
    }
}

/// Audit document with each stage's system instruction and user input
pub fn compose_prompts(date: &str, results: &[StageResult]) -> String {
    let mut doc = format!("# Prompts for {}\n", date);

    for stage in results {
        let sys_fence = fence_for(&stage.system_instruction);
        let input_fence = fence_for(&stage.user_input);
        doc.push_str(&format!(
            "\n## {}\n\n### System Instruction\n\n{sf}\n{}\n{sf}\n\n### User Input\n\n{uf}\n{}\n{uf}\n",
            stage.stage_name,
            stage.system_instruction,
            stage.user_input,
            sf = sys_fence,
            uf = input_fence,
        ));
    }

    doc
}

/// A backtick fence longer than any backtick run inside `content`
fn fence_for(content: &str) -> String {
    let mut longest = 0;
    let mut run = 0;
    for c in content.chars() {
        if c == '`' {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    "`".repeat((longest + 1).max(3))
}
