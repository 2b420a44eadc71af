use std::collections::BTreeMap;
use std::sync::LazyLock;

use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use regex::Regex;

use crate::config::MAX_BATCH_LIMIT;
use crate::models::action::{Plan, KNOWN_ACTION_KINDS};
use crate::models::job::{ErrorCategory, ErrorReport, Suggestion};

const ROOT_CAUSE_PREVIEW_CHARS: usize = 200;
const MAX_SUGGESTIONS: usize = 3;

/// Turns the aggregated error text of a failed job into a category, a root
/// cause and remediation hints.
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, error_text: &str, plan: &Plan, known_targets: &[String]) -> ErrorReport;
}

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

fn compile(sources: &[&str]) -> Vec<Regex> {
    sources.iter().map(|s| Regex::new(s).unwrap()).collect()
}

/// Checked in order; the first category with a matching pattern wins.
static CATEGORY_PATTERNS: LazyLock<Vec<(ErrorCategory, Vec<Regex>)>> = LazyLock::new(|| {
    vec![
        (
            ErrorCategory::Disconnected,
            compile(&[
                r"(?i)connect(?:ion)?\s+(?:refused|reset|timed?\s*out|closed|failed)",
                r"(?i)(?:mcp|scene\s+service)\s+(?:server\s+)?(?:unreachable|down|disconnected)",
                r"(?i)cannot\s+reach\s+scene\s+service",
                r"(?i)request\s+timed\s+out",
                r"(?i)sse\s+(?:connection\s+)?(?:lost|closed|failed)",
                r"(?i)errno\s+(?:111|104|10061)",
                r"(?i)(?:read|write)\s+timeout",
            ]),
        ),
        (
            ErrorCategory::BatchLimit,
            compile(&[
                r"(?i)batch\s+(?:size\s+)?(?:limit|exceeded|too\s+(?:large|many))",
                r"(?i)too\s+many\s+(?:actions|commands|calls)",
                r"(?i)max(?:imum)?\s+(?:batch|actions)\s+(?:exceeded|reached)",
                r"(?i)at\s+most\s+\d+\s+commands",
            ]),
        ),
        (
            ErrorCategory::ObjectNotFound,
            compile(&[
                r"(?i)object\s+.*not\s+found",
                r"(?i)target\s+.*(?:does not exist|not found|missing)",
                r"(?i)could\s+not\s+find",
                r"(?i)no\s+(?:game)?object\s+(?:named|with\s+name)",
            ]),
        ),
        (
            ErrorCategory::SchemaError,
            compile(&[
                r"(?i)schema\s+(?:validation\s+)?(?:error|failed)",
                r"(?i)required\s+(?:property|field)\s+.*missing",
                r"(?i)invalid\s+(?:type|value|property)",
                r"(?i)is\s+not\s+valid\s+under",
                r"(?i)(?:color|position|scale|rotation)\s+.*(?:range|invalid|out\s+of)",
                r"(?i)(?:range|value)\s+.*(?:invalid|must\s+be|should\s+be)",
            ]),
        ),
        (
            ErrorCategory::PositionConflict,
            compile(&[
                r"(?i)position\s+conflict",
                r"(?i)overlapping\s+(?:objects?|positions?)",
                r"(?i)collision\s+detected",
                r"(?i)same\s+position",
            ]),
        ),
        (
            ErrorCategory::ParseFail,
            compile(&[
                r"(?i)json(?:decode)?error",
                r"(?i)unexpected\s+token",
                r"(?i)invalid\s+(?:json|syntax)",
                r"(?i)expecting\s+(?:value|property)",
                r"(?i)unterminated\s+string",
            ]),
        ),
    ]
});

static OBJECT_NAME_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r#"(?i)(?:object|target|gameobject)\s+['"]([^'"]+)['"]"#,
        r#"(?i)['"]([^'"]+)['"]\s+(?:not found|does not exist)"#,
        r#"(?i)(?:named|name)\s+['"]?(\S+?)['"]?\s+(?:not found|does not)"#,
    ])
});

static INVALID_KIND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)(?:unknown|invalid|unrecognised|unrecognized)\s+(?:action\s+(?:type|kind)|action|type)\s*[:=]?\s*['"]?(\w+)"#,
    )
    .unwrap()
});

static MISSING_POSITION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)position.*(?:required|missing)").unwrap());

static BAD_COLOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)colou?r.*(?:range|invalid|must be)").unwrap());

static MISSING_FIELD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:required|missing)\s+(?:property|field)\s*[:=]?\s*['"]?(\w+)"#).unwrap()
});

/// First category whose patterns match, in order of how much they say about
/// the cause. Unrecognised text falls back to [`ErrorCategory::ParseFail`].
pub fn categorize(error_text: &str) -> ErrorCategory {
    CATEGORY_PATTERNS
        .iter()
        .find(|(_, regexes)| regexes.iter().any(|re| re.is_match(error_text)))
        .map(|(category, _)| *category)
        .unwrap_or(ErrorCategory::ParseFail)
}

fn preview(text: &str) -> String {
    text.chars().take(ROOT_CAUSE_PREVIEW_CHARS).collect()
}

// ---------------------------------------------------------------------------
// Pattern classifier
// ---------------------------------------------------------------------------

/// Regex categorisation with fuzzy "did you mean" hints.
pub struct PatternClassifier {
    matcher: SkimMatcherV2,
}

impl Default for PatternClassifier {
    fn default() -> Self {
        Self {
            matcher: SkimMatcherV2::default().ignore_case(),
        }
    }
}

impl PatternClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Up to three candidates resembling `needle`, best first. A candidate
    /// matches when either string is a fuzzy subsequence of the other.
    fn closest<'a, I>(&self, needle: &str, candidates: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut scored: Vec<(i64, &str)> = candidates
            .into_iter()
            .filter(|candidate| *candidate != needle)
            .filter_map(|candidate| {
                let forward = self.matcher.fuzzy_match(candidate, needle);
                let backward = (candidate.len() * 2 >= needle.len())
                    .then(|| self.matcher.fuzzy_match(needle, candidate))
                    .flatten();
                forward.max(backward).map(|score| (score, candidate))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        scored.dedup_by(|a, b| a.1 == b.1);
        scored
            .into_iter()
            .take(MAX_SUGGESTIONS)
            .map(|(_, name)| name.to_string())
            .collect()
    }

    fn parse_fail(&self, error_text: &str) -> ErrorReport {
        let mut suggestions = Vec::new();
        let mut auto_fixable = false;
        let valid = KNOWN_ACTION_KINDS.join(", ");

        let bad_kind = INVALID_KIND_RE
            .captures(error_text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());

        match bad_kind {
            Some(bad) => {
                let matches = self.closest(&bad, KNOWN_ACTION_KINDS.iter().copied());
                if matches.is_empty() {
                    suggestions.push(Suggestion::new(
                        "Check action type spelling",
                        format!("valid types: {valid}"),
                    ));
                } else {
                    auto_fixable = true;
                    for kind in matches {
                        suggestions.push(Suggestion::new(
                            format!("Replace '{bad}' with '{kind}'"),
                            format!("change action type to '{kind}'"),
                        ));
                    }
                }
            }
            None => {
                suggestions.push(Suggestion::new(
                    "Verify JSON syntax of the plan",
                    "re-parse or regenerate the plan as valid JSON",
                ));
                suggestions.push(Suggestion::new(
                    "Use known action types",
                    format!("valid types: {valid}"),
                ));
            }
        }

        ErrorReport {
            category: ErrorCategory::ParseFail,
            root_cause: format!("Failed to parse command or plan: {}", preview(error_text)),
            suggestions,
            auto_fixable,
        }
    }

    fn object_not_found(&self, error_text: &str, known_targets: &[String]) -> ErrorReport {
        let missing = OBJECT_NAME_RES
            .iter()
            .find_map(|re| re.captures(error_text).and_then(|c| c.get(1)))
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        let mut suggestions = Vec::new();
        let mut auto_fixable = false;

        if known_targets.is_empty() {
            suggestions.push(Suggestion::new(
                "Scene object list unavailable",
                "refresh scene hierarchy and retry",
            ));
        } else {
            let close = self.closest(&missing, known_targets.iter().map(String::as_str));
            if close.is_empty() {
                suggestions.push(Suggestion::new(
                    format!("No similar objects found for '{missing}'"),
                    "verify the object exists or create it first",
                ));
            } else {
                auto_fixable = true;
                for name in close {
                    suggestions.push(Suggestion::new(
                        format!("Did you mean '{name}'?"),
                        format!("replace target '{missing}' with '{name}'"),
                    ));
                }
            }
        }

        ErrorReport {
            category: ErrorCategory::ObjectNotFound,
            root_cause: format!("Object '{missing}' not found in scene"),
            suggestions,
            auto_fixable,
        }
    }

    fn disconnected(&self) -> ErrorReport {
        ErrorReport {
            category: ErrorCategory::Disconnected,
            root_cause: "Scene service connection failed or timed out".to_string(),
            suggestions: vec![
                Suggestion::new(
                    "Check the scene service is running",
                    "verify the editor bridge plugin is active and listening",
                ),
                Suggestion::new(
                    "Check network / firewall",
                    "ensure SCENEBATCH_SERVER_URL is reachable from this host",
                ),
                Suggestion::new("Retry after delay", "wait 5 seconds and resubmit the plan"),
            ],
            auto_fixable: false,
        }
    }

    fn position_conflict(&self, plan: &Plan) -> ErrorReport {
        let mut suggestions = vec![
            Suggestion::new(
                "Offset conflicting objects",
                "add a small position delta to one of the overlapping objects",
            ),
            Suggestion::new(
                "Review plan positions",
                "check for duplicate position values in the action list",
            ),
        ];

        let mut by_position: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (index, action) in plan.actions.iter().enumerate() {
            if let Some(p) = action.position() {
                by_position
                    .entry(format!("{},{},{}", p.x, p.y, p.z))
                    .or_default()
                    .push(index);
            }
        }

        let mut auto_fixable = false;
        for (coord, indices) in by_position.into_iter().filter(|(_, v)| v.len() > 1) {
            auto_fixable = true;
            suggestions.push(Suggestion::new(
                format!("Actions at ({coord}) overlap: indices {indices:?}"),
                "auto-offset subsequent objects by +1 on x-axis",
            ));
        }

        ErrorReport {
            category: ErrorCategory::PositionConflict,
            root_cause: "Position conflict detected between objects".to_string(),
            suggestions,
            auto_fixable,
        }
    }

    fn schema_error(&self, error_text: &str) -> ErrorReport {
        let mut suggestions = Vec::new();
        let mut auto_fixable = false;

        if MISSING_POSITION_RE.is_match(error_text) {
            auto_fixable = true;
            suggestions.push(Suggestion::new(
                "Add default position {x:0, y:0, z:0}",
                "inject default position into actions missing it",
            ));
        }
        if BAD_COLOR_RE.is_match(error_text) {
            auto_fixable = true;
            suggestions.push(Suggestion::new(
                "Normalise color to 0-1 range",
                "divide color components >1 by 255",
            ));
        }
        if let Some(field) = MISSING_FIELD_RE.captures(error_text).and_then(|c| c.get(1)) {
            let field = field.as_str();
            suggestions.push(Suggestion::new(
                format!("Add missing field '{field}'"),
                format!("supply a sensible default for '{field}'"),
            ));
        }
        if suggestions.is_empty() {
            suggestions.push(Suggestion::new(
                "Review plan against the action schema",
                "fix the reported fields and resubmit",
            ));
        }

        ErrorReport {
            category: ErrorCategory::SchemaError,
            root_cause: format!("Plan schema validation failed: {}", preview(error_text)),
            suggestions,
            auto_fixable,
        }
    }

    fn batch_limit(&self, plan: &Plan) -> ErrorReport {
        let total = plan.actions.len();
        ErrorReport {
            category: ErrorCategory::BatchLimit,
            root_cause: format!(
                "Plan has {total} actions, exceeding batch limit of {MAX_BATCH_LIMIT}"
            ),
            suggestions: vec![Suggestion::new(
                format!("Auto-split into batches of {MAX_BATCH_LIMIT}"),
                format!(
                    "split {total} actions into {} batches",
                    total.div_ceil(MAX_BATCH_LIMIT)
                ),
            )],
            auto_fixable: true,
        }
    }
}

impl ErrorClassifier for PatternClassifier {
    fn classify(&self, error_text: &str, plan: &Plan, known_targets: &[String]) -> ErrorReport {
        let report = match categorize(error_text) {
            ErrorCategory::ParseFail => self.parse_fail(error_text),
            ErrorCategory::ObjectNotFound => self.object_not_found(error_text, known_targets),
            ErrorCategory::Disconnected => self.disconnected(),
            ErrorCategory::PositionConflict => self.position_conflict(plan),
            ErrorCategory::SchemaError => self.schema_error(error_text),
            ErrorCategory::BatchLimit => self.batch_limit(plan),
        };
        tracing::info!(
            category = %report.category,
            auto_fixable = report.auto_fixable,
            root_cause = %report.root_cause,
            "error classified"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::action::{Action, Vec3};

    fn targets(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn placed(name: &str, x: f64) -> Action {
        Action::CreateEmpty {
            name: name.to_string(),
            parent: None,
            position: Some(Vec3 { x, y: 0.0, z: 0.0 }),
        }
    }

    #[test]
    fn test_categorize_priority_order() {
        assert_eq!(
            categorize("cannot reach scene service at http://x: connection refused"),
            ErrorCategory::Disconnected
        );
        assert_eq!(
            categorize("batch_execute supports at most 25 commands, got 30"),
            ErrorCategory::BatchLimit
        );
        assert_eq!(
            categorize("manage_gameobject rejected: GameObject 'Ghost' not found"),
            ErrorCategory::ObjectNotFound
        );
        assert_eq!(
            categorize("schema validation failed: invalid value"),
            ErrorCategory::SchemaError
        );
        assert_eq!(
            categorize("collision detected at origin"),
            ErrorCategory::PositionConflict
        );
        assert_eq!(categorize("JSONDecodeError: line 1"), ErrorCategory::ParseFail);
        assert_eq!(categorize("something odd happened"), ErrorCategory::ParseFail);
    }

    #[test]
    fn test_timeout_counts_as_disconnect() {
        assert_eq!(
            categorize("phase 1 batch 1: request timed out after 60s"),
            ErrorCategory::Disconnected
        );
    }

    #[test]
    fn test_not_found_suggests_close_targets() {
        let classifier = PatternClassifier::new();
        let report = classifier.classify(
            "manage_gameobject rejected: GameObject 'Tnk_A' not found",
            &Plan::new(Vec::new()),
            &targets(&["Tank_A", "Pipe_01", "Floor"]),
        );

        assert_eq!(report.category, ErrorCategory::ObjectNotFound);
        assert_eq!(report.root_cause, "Object 'Tnk_A' not found in scene");
        assert!(report.auto_fixable);
        assert_eq!(report.suggestions[0].label, "Did you mean 'Tank_A'?");
        assert_eq!(
            report.suggestions[0].fix_plan,
            "replace target 'Tnk_A' with 'Tank_A'"
        );
    }

    #[test]
    fn test_not_found_without_scene_listing() {
        let report = PatternClassifier::new().classify(
            "Could not find target",
            &Plan::new(Vec::new()),
            &[],
        );
        assert_eq!(report.category, ErrorCategory::ObjectNotFound);
        assert!(!report.auto_fixable);
        assert_eq!(report.suggestions[0].label, "Scene object list unavailable");
    }

    #[test]
    fn test_unknown_action_kind_suggests_spelling() {
        let report = PatternClassifier::new().classify(
            "unknown action kind: create_primitve",
            &Plan::new(Vec::new()),
            &[],
        );
        assert_eq!(report.category, ErrorCategory::ParseFail);
        assert!(report.auto_fixable);
        assert!(report
            .suggestions
            .iter()
            .any(|s| s.fix_plan == "change action type to 'create_primitive'"));
    }

    #[test]
    fn test_position_conflict_lists_overlaps() {
        let plan = Plan::new(vec![placed("A", 1.0), placed("B", 2.0), placed("C", 1.0)]);
        let report = PatternClassifier::new().classify("position conflict", &plan, &[]);
        assert_eq!(report.category, ErrorCategory::PositionConflict);
        assert!(report.auto_fixable);
        assert!(report
            .suggestions
            .iter()
            .any(|s| s.label == "Actions at (1,0,0) overlap: indices [0, 2]"));
    }

    #[test]
    fn test_batch_limit_reports_split() {
        let plan = Plan::new((0..30).map(|i| placed(&format!("O{i}"), i as f64)).collect());
        let report = PatternClassifier::new().classify("too many commands", &plan, &[]);
        assert_eq!(report.category, ErrorCategory::BatchLimit);
        assert_eq!(report.suggestions[0].fix_plan, "split 30 actions into 2 batches");
    }

    #[test]
    fn test_disconnected_is_not_auto_fixable() {
        let report = PatternClassifier::new().classify(
            "cannot reach scene service at http://localhost:8080/mcp: error sending request",
            &Plan::new(Vec::new()),
            &[],
        );
        assert_eq!(report.category, ErrorCategory::Disconnected);
        assert!(!report.auto_fixable);
        assert_eq!(report.suggestions.len(), 3);
    }

    #[test]
    fn test_schema_error_missing_field() {
        let report = PatternClassifier::new().classify(
            "schema error: required field 'shape' missing",
            &Plan::new(Vec::new()),
            &[],
        );
        assert_eq!(report.category, ErrorCategory::SchemaError);
        assert!(report
            .suggestions
            .iter()
            .any(|s| s.label == "Add missing field 'shape'"));
    }
}
