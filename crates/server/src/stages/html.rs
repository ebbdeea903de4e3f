//! HTML parsing validation and compliance assessment stages

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use blackscope_common::{Level, Message, Metric, MetricsList};

use crate::scan::HtmlDocument;
use crate::stage::{Emitter, RunContext, Stage, StageArtifact, StageError};

static UNSAFE_SCRIPT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"eval\s*\(|document\.write\s*\(").expect("script pattern"));

const DEPRECATED_TAGS: &[&str] = &["center", "font", "marquee", "blink", "frame", "frameset"];

/// Fetch the page recorded by the reachability check, or report why not
async fn fetched_page(
    ctx: &RunContext,
    emitter: &Emitter,
) -> Result<Option<String>, StageError> {
    let history = ctx.history.lock().await;
    let page = history
        .artifact("access_check")
        .and_then(|artifact| artifact.as_page())
        .filter(|page| page.ok)
        .map(|page| page.body.clone());
    drop(history);

    if page.is_none() {
        emitter
            .send(Message::evaluation(
                "Cannot validate HTML: response unavailable or failed.",
                Level::Error,
            ))
            .await?;
    }
    Ok(page)
}

/// Validates HTML for issues that can affect parsing
///
/// Only checks for problems that impact how the document parses, not
/// accessibility or best practices; those belong to the compliance stage.
pub struct HtmlValidatorStage;

#[async_trait]
impl Stage for HtmlValidatorStage {
    fn id(&self) -> &'static str {
        "html_validator"
    }

    fn display_name(&self) -> &'static str {
        "HTML VALIDATOR"
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &["access_check"]
    }

    async fn run(
        &self,
        ctx: &RunContext,
        emitter: &Emitter,
    ) -> Result<StageArtifact, StageError> {
        let Some(body) = fetched_page(ctx, emitter).await? else {
            return Ok(StageArtifact::None);
        };
        let doc = HtmlDocument::parse(&body);

        for (id, count) in doc.duplicate_ids() {
            emitter
                .send(Message::evaluation(
                    format!(
                        "Duplicate ID '{}' found {} times. IDs must be unique for proper DOM parsing.",
                        id, count
                    ),
                    Level::Bug,
                ))
                .await?;
        }

        for issue in doc.nesting_violations() {
            emitter
                .send(Message::evaluation(
                    format!("Invalid nesting detected: {}. This can cause parsing issues.", issue),
                    Level::Bug,
                ))
                .await?;
        }

        for el in doc.elements() {
            for attr in ["href", "src", "action"] {
                if el.has_attr(attr) && el.attr(attr).map(str::is_empty).unwrap_or(true) {
                    emitter
                        .send(Message::evaluation(
                            format!(
                                "Empty '{}' attribute on <{}> tag may cause parsing issues.",
                                attr, el.name
                            ),
                            Level::Warning,
                        ))
                        .await?;
                }
            }
        }

        if !doc.has_doctype() {
            emitter
                .send(Message::evaluation(
                    "Missing DOCTYPE declaration. Browsers may use quirks mode which affects HTML parsing.",
                    Level::Warning,
                ))
                .await?;
        }

        if doc.comment_mismatch() {
            emitter
                .send(Message::evaluation(
                    "Mismatched HTML comment tags (<!-- and -->). This can cause content to be hidden.",
                    Level::Bug,
                ))
                .await?;
        }

        for tag in ["script", "style"] {
            if doc.unbalanced(tag) {
                emitter
                    .send(Message::evaluation(
                        format!(
                            "Unbalanced <{0}> tags. A premature </{0}> truncates the element content.",
                            tag
                        ),
                        Level::Bug,
                    ))
                    .await?;
            }
        }

        let forms_without_action = doc.find_all("form").filter(|f| !f.has_attr("action")).count();
        if forms_without_action > 0 {
            emitter
                .send(Message::evaluation(
                    format!(
                        "Found {} form(s) without 'action' attribute. This may affect form submission parsing.",
                        forms_without_action
                    ),
                    Level::Warning,
                ))
                .await?;
        }

        if doc.bare_table_rows() > 0 {
            emitter
                .send(Message::evaluation(
                    "Table has <tr> elements directly under <table> without <tbody>. Browsers will auto-insert <tbody> affecting DOM structure.",
                    Level::Warning,
                ))
                .await?;
        }

        emitter
            .send(Message::evaluation(
                "HTML parsing validation completed.",
                Level::Info,
            ))
            .await?;
        Ok(StageArtifact::Document(doc))
    }
}

/// Category buckets for the compliance assessment
#[derive(Default)]
struct IssueLog {
    structure: Vec<String>,
    security: Vec<String>,
    accessibility: Vec<String>,
    best_practices: Vec<String>,
}

impl IssueLog {
    fn categories(&self) -> [(&'static str, &Vec<String>); 4] {
        [
            ("Structure", &self.structure),
            ("Security", &self.security),
            ("Accessibility", &self.accessibility),
            ("Best Practices", &self.best_practices),
        ]
    }

    fn total(&self) -> usize {
        self.categories().iter().map(|(_, v)| v.len()).sum()
    }

    fn assessment(&self) -> MetricsList {
        let metrics = self
            .categories()
            .iter()
            .map(|(category, issues)| {
                if issues.is_empty() {
                    Metric {
                        name: category.to_string(),
                        score: Some(100),
                        feedback: Some(format!("No issues found in {}", category)),
                        issues: None,
                        improvements: None,
                    }
                } else {
                    Metric {
                        name: category.to_string(),
                        score: Some(100_i64.saturating_sub(issues.len() as i64 * 10).max(0)),
                        feedback: Some(format!("{} issue(s) found in {}", issues.len(), category)),
                        issues: Some(issues.to_vec()),
                        improvements: None,
                    }
                }
            })
            .collect();

        let total = self.total();
        let (score, feedback) = if total > 0 {
            (
                (100_i64 - total as i64 * 5).max(0),
                format!("Found {} total issue(s) across all categories", total),
            )
        } else {
            (100, "No HTML compliance issues found".to_string())
        };

        MetricsList {
            name: Some("HTML Compliance Assessment".to_string()),
            metrics,
            feedback: Some(feedback),
            score: Some(score),
        }
    }
}

/// Assesses structural integrity, security posture, accessibility adherence
/// and best-practice compliance, closing with a per-category metrics message
pub struct HtmlComplianceStage;

impl HtmlComplianceStage {
    async fn report(
        emitter: &Emitter,
        bucket: &mut Vec<String>,
        text: String,
        level: Level,
    ) -> Result<(), StageError> {
        emitter.send(Message::evaluation(text.clone(), level)).await?;
        bucket.push(text);
        Ok(())
    }
}

#[async_trait]
impl Stage for HtmlComplianceStage {
    fn id(&self) -> &'static str {
        "html_compliance"
    }

    fn display_name(&self) -> &'static str {
        "HTML Compliance Assessment"
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &["access_check"]
    }

    async fn run(
        &self,
        ctx: &RunContext,
        emitter: &Emitter,
    ) -> Result<StageArtifact, StageError> {
        let Some(body) = fetched_page(ctx, emitter).await? else {
            return Ok(StageArtifact::None);
        };
        let doc = HtmlDocument::parse(&body);
        let mut log = IssueLog::default();

        if !doc.has_doctype() {
            Self::report(
                emitter,
                &mut log.structure,
                "Missing DOCTYPE declaration. Modern HTML should include <!DOCTYPE html>.".to_string(),
                Level::Improvement,
            )
            .await?;
        }

        for tag in ["html", "head", "body"] {
            if doc.find_all(tag).next().is_none() {
                Self::report(
                    emitter,
                    &mut log.structure,
                    format!("Missing <{}> tag. Document structure is incomplete.", tag),
                    Level::Bug,
                )
                .await?;
            }
        }

        let has_charset = doc.find_all("meta").any(|m| {
            m.has_attr("charset")
                || m.attr("http-equiv")
                    .map(|v| v.eq_ignore_ascii_case("content-type"))
                    .unwrap_or(false)
        });
        if !has_charset {
            Self::report(
                emitter,
                &mut log.best_practices,
                "Missing charset declaration. Add <meta charset='UTF-8'> in <head> to prevent encoding issues.".to_string(),
                Level::Improvement,
            )
            .await?;
        }

        let has_viewport = doc
            .find_all("meta")
            .any(|m| m.attr("name") == Some("viewport"));
        if !has_viewport {
            Self::report(
                emitter,
                &mut log.best_practices,
                "Missing viewport meta tag. Add <meta name='viewport' content='width=device-width, initial-scale=1.0'> for mobile responsiveness.".to_string(),
                Level::Improvement,
            )
            .await?;
        }

        if doc.title().is_none() {
            Self::report(
                emitter,
                &mut log.best_practices,
                "Missing or empty <title> tag. Every page should have a descriptive title.".to_string(),
                Level::Warning,
            )
            .await?;
        }

        if doc
            .inline_script_bodies()
            .iter()
            .any(|body| UNSAFE_SCRIPT_RE.is_match(body))
        {
            Self::report(
                emitter,
                &mut log.security,
                "Potentially unsafe inline JavaScript using eval() or document.write(). This can lead to XSS vulnerabilities.".to_string(),
                Level::Vulnerability,
            )
            .await?;
        }

        let has_csp = doc.find_all("meta").any(|m| {
            m.attr("http-equiv")
                .map(|v| v.eq_ignore_ascii_case("content-security-policy"))
                .unwrap_or(false)
        });
        if !has_csp {
            Self::report(
                emitter,
                &mut log.security,
                "No Content Security Policy (CSP) meta tag found. Consider adding CSP to mitigate XSS attacks.".to_string(),
                Level::Improvement,
            )
            .await?;
        }

        let images_without_alt = doc.find_all("img").filter(|i| !i.has_attr("alt")).count();
        if images_without_alt > 0 {
            Self::report(
                emitter,
                &mut log.accessibility,
                format!(
                    "Found {} image(s) without 'alt' attributes. This impacts accessibility and SEO.",
                    images_without_alt
                ),
                Level::Warning,
            )
            .await?;
        }

        let javascript_links = doc
            .find_all("a")
            .filter(|a| {
                a.attr("href")
                    .map(|h| h.trim_start().to_ascii_lowercase().starts_with("javascript:"))
                    .unwrap_or(false)
            })
            .count();
        if javascript_links > 0 {
            Self::report(
                emitter,
                &mut log.security,
                format!(
                    "Found {} link(s) using 'javascript:' protocol. This can be a security risk and accessibility issue.",
                    javascript_links
                ),
                Level::Vulnerability,
            )
            .await?;
        }

        let unsafe_external_links = doc
            .find_all("a")
            .filter(|a| a.attr("target") == Some("_blank"))
            .filter(|a| {
                !a.attr("rel")
                    .map(|rel| rel.split_whitespace().any(|r| r == "noopener"))
                    .unwrap_or(false)
            })
            .count();
        if unsafe_external_links > 0 {
            Self::report(
                emitter,
                &mut log.security,
                format!(
                    "Found {} link(s) with target='_blank' without rel='noopener'. This can lead to security vulnerabilities (tabnabbing).",
                    unsafe_external_links
                ),
                Level::Vulnerability,
            )
            .await?;
        }

        for tag in DEPRECATED_TAGS {
            let occurrences = doc.find_all(tag).count();
            if occurrences > 0 {
                Self::report(
                    emitter,
                    &mut log.best_practices,
                    format!(
                        "Found deprecated <{}> tag(s) ({} occurrence(s)). Use CSS instead.",
                        tag, occurrences
                    ),
                    Level::Warning,
                )
                .await?;
            }
        }

        let forms_without_action = doc.find_all("form").filter(|f| !f.has_attr("action")).count();
        if forms_without_action > 0 {
            Self::report(
                emitter,
                &mut log.structure,
                format!("Found {} form(s) without 'action' attribute.", forms_without_action),
                Level::Bug,
            )
            .await?;
        }

        let inputs_without_labels = doc
            .elements()
            .iter()
            .enumerate()
            .filter(|(_, el)| el.name == "input")
            .filter(|(_, el)| {
                !matches!(el.attr("type"), Some("hidden") | Some("submit") | Some("button"))
            })
            .filter(|(idx, el)| {
                let labelled_by_for = el
                    .attr("id")
                    .map(|id| doc.find_all("label").any(|l| l.attr("for") == Some(id)))
                    .unwrap_or(false);
                !labelled_by_for && !doc.has_ancestor(*idx, "label")
            })
            .count();
        if inputs_without_labels > 0 {
            Self::report(
                emitter,
                &mut log.accessibility,
                format!(
                    "Found {} input field(s) without associated labels. This impacts accessibility.",
                    inputs_without_labels
                ),
                Level::Warning,
            )
            .await?;
        }

        for (id, count) in doc.duplicate_ids() {
            Self::report(
                emitter,
                &mut log.structure,
                format!("Duplicate ID '{}' found {} times. IDs must be unique.", id, count),
                Level::Bug,
            )
            .await?;
        }

        if ctx.url.starts_with("https://") {
            let http_resources = doc
                .elements()
                .iter()
                .filter(|el| matches!(el.name.as_str(), "img" | "script" | "link" | "iframe"))
                .filter(|el| {
                    el.attr("src")
                        .or_else(|| el.attr("href"))
                        .map(|v| v.starts_with("http://"))
                        .unwrap_or(false)
                })
                .count();
            if http_resources > 0 {
                Self::report(
                    emitter,
                    &mut log.security,
                    format!(
                        "Found {} HTTP resource(s) on HTTPS page. This can cause mixed content warnings and security issues.",
                        http_resources
                    ),
                    Level::Vulnerability,
                )
                .await?;
            }
        }

        let inline_styles = doc.elements().iter().filter(|el| el.has_attr("style")).count();
        if inline_styles > 10 {
            Self::report(
                emitter,
                &mut log.best_practices,
                format!(
                    "Found {} elements with inline styles. Consider using external CSS for better maintainability.",
                    inline_styles
                ),
                Level::Improvement,
            )
            .await?;
        }

        let html_missing_lang = doc
            .find_all("html")
            .next()
            .map(|el| !el.has_attr("lang"))
            .unwrap_or(false);
        if html_missing_lang {
            Self::report(
                emitter,
                &mut log.accessibility,
                "Missing 'lang' attribute on <html> tag. This helps screen readers and search engines.".to_string(),
                Level::Warning,
            )
            .await?;
        }

        for level in 1..=6 {
            let tag = format!("h{}", level);
            let empty = doc
                .inner_html(&tag)
                .iter()
                .filter(|inner| HtmlDocument::parse(inner).text().is_empty())
                .count();
            if empty > 0 {
                Self::report(
                    emitter,
                    &mut log.accessibility,
                    format!(
                        "Found {} empty <{}> tag(s). Empty headings confuse screen readers.",
                        empty, tag
                    ),
                    Level::Warning,
                )
                .await?;
            }
        }

        let mut described_tables = vec![false; doc.elements().len()];
        for (idx, el) in doc.elements().iter().enumerate() {
            if el.name == "th" || el.name == "caption" {
                let mut current = doc.elements()[idx].parent;
                while let Some(parent_idx) = current {
                    if doc.elements()[parent_idx].name == "table" {
                        described_tables[parent_idx] = true;
                        break;
                    }
                    current = doc.elements()[parent_idx].parent;
                }
            }
        }
        let bare_table = doc
            .elements()
            .iter()
            .enumerate()
            .any(|(idx, el)| el.name == "table" && !described_tables[idx]);
        if bare_table {
            Self::report(
                emitter,
                &mut log.accessibility,
                "Table found without header cells (<th>) or caption. This impacts accessibility.".to_string(),
                Level::Warning,
            )
            .await?;
        }

        let iframes_without_title = doc
            .find_all("iframe")
            .filter(|f| !f.has_attr("title"))
            .count();
        if iframes_without_title > 0 {
            Self::report(
                emitter,
                &mut log.accessibility,
                format!(
                    "Found {} iframe(s) without 'title' attribute. This impacts accessibility.",
                    iframes_without_title
                ),
                Level::Warning,
            )
            .await?;
        }

        emitter
            .send(Message::metrics("HTML Compliance Assessment", &log.assessment()))
            .await?;
        emitter
            .send(Message::evaluation(
                "HTML compliance assessment completed.",
                Level::Info,
            ))
            .await?;
        Ok(StageArtifact::None)
    }
}
