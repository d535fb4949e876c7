//! Context analyzer: converts session context into the classifier's tag space.
//!
//! Reads `targetFiles` (paths) and `dependencies` (package names). Missing
//! keys or values of the wrong shape degrade to no signals.

use std::collections::BTreeMap;

use cmdflow_state::SessionSnapshot;
use serde_json::Value;

use crate::domain::TaskSignal;

/// Session key holding the paths a task touches.
pub const TARGET_FILES_KEY: &str = "targetFiles";
/// Session key holding declared package dependencies.
pub const DEPENDENCIES_KEY: &str = "dependencies";

/// Weight contributed by each recognized dependency.
const DEPENDENCY_WEIGHT: f64 = 0.5;

const FRONTEND_FRAGMENTS: &[&str] = &[
    "frontend/",
    "web/",
    "client/",
    "ui/",
    "components/",
    "pages/",
];

const TEST_FRAGMENTS: &[&str] = &["test/", "tests/", "__tests__/", "spec/", ".test.", ".spec.", "_test."];

const INFRA_FRAGMENTS: &[&str] = &["k8s/", "kubernetes/", "helm/", "charts/", "terraform/", "infra/"];

/// Dependency names whose expertise tag differs from the package name.
const DEPENDENCY_ALIASES: &[(&str, &str)] = &[
    ("@nestjs/core", "nestjs"),
    ("@angular/core", "angular"),
    ("react-dom", "react"),
    ("next", "nextjs"),
    ("pg", "postgres"),
    ("psycopg2", "postgres"),
    ("hashicorp/aws", "terraform"),
    ("@pulumi/pulumi", "pulumi"),
    ("@kubernetes/client-node", "kubernetes"),
];

#[derive(Debug, Clone, Default)]
pub struct ContextAnalyzer;

impl ContextAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Signals derived from `targetFiles` and `dependencies`, sorted by tag.
    pub fn analyze(&self, session: &SessionSnapshot) -> Vec<TaskSignal> {
        let mut weights: BTreeMap<String, f64> = BTreeMap::new();

        let files = string_list(session.context_value(TARGET_FILES_KEY));
        if !files.is_empty() {
            let share = 1.0 / files.len() as f64;
            for file in &files {
                for tag in path_tags(file) {
                    *weights.entry(tag.to_string()).or_default() += share;
                }
            }
        }

        for dependency in string_list(session.context_value(DEPENDENCIES_KEY)) {
            if let Some(tag) = dependency_tag(&dependency) {
                *weights.entry(tag).or_default() += DEPENDENCY_WEIGHT;
            }
        }

        weights
            .into_iter()
            .map(|(tag, weight)| TaskSignal::new(tag, weight))
            .collect()
    }
}

/// String entries of a JSON array; anything else yields nothing.
fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Domain tags for one path.
fn path_tags(path: &str) -> Vec<&'static str> {
    let normalized = path.replace('\\', "/").to_lowercase();
    // Leading slash lets fragment checks match top-level directories too.
    let rooted = format!("/{normalized}");
    let file_name = normalized.rsplit('/').next().unwrap_or(&normalized);
    let extension = file_name.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");

    let frontend_path = has_fragment(&rooted, file_name, FRONTEND_FRAGMENTS);

    let mut tags = Vec::new();
    let primary = match extension {
        "tf" | "tfvars" | "hcl" => Some("infrastructure"),
        "ts" | "mts" | "cts" | "js" | "mjs" | "cjs" => Some(if frontend_path {
            "frontend"
        } else {
            "typescript-backend-general"
        }),
        "tsx" | "jsx" | "vue" | "svelte" | "css" | "scss" | "html" => Some("frontend"),
        "py" => Some("python"),
        "go" => Some("go"),
        "rs" => Some("rust"),
        "sql" => Some("database"),
        "md" | "mdx" | "rst" => Some("documentation"),
        "yml" | "yaml" => {
            if rooted.contains("/.github/workflows/") || file_name.starts_with(".gitlab-ci") {
                Some("ci-cd")
            } else if has_fragment(&rooted, file_name, INFRA_FRAGMENTS) {
                Some("infrastructure")
            } else {
                None
            }
        }
        _ => None,
    };
    if let Some(tag) = primary {
        tags.push(tag);
    }

    if file_name == "dockerfile" || file_name.starts_with("docker-compose") {
        tags.push("infrastructure");
    }
    if file_name == "jenkinsfile" {
        tags.push("ci-cd");
    }
    if has_fragment(&rooted, file_name, TEST_FRAGMENTS) {
        tags.push("testing");
    }

    tags.dedup();
    tags
}

/// Directory fragments match anywhere in the rooted path; `.x.`/`_x.` style
/// fragments match within the file name.
fn has_fragment(rooted: &str, file_name: &str, fragments: &[&str]) -> bool {
    fragments.iter().any(|f| {
        rooted.contains(&format!("/{f}"))
            || ((f.starts_with('.') || f.starts_with('_')) && file_name.contains(f))
    })
}

/// Expertise tag for a dependency name.
fn dependency_tag(name: &str) -> Option<String> {
    let name = name.trim().to_lowercase();
    if name.is_empty() {
        return None;
    }
    if let Some((_, tag)) = DEPENDENCY_ALIASES.iter().find(|(dep, _)| *dep == name) {
        return Some(tag.to_string());
    }
    // `@scope/package` -> `package`
    let bare = match name.strip_prefix('@') {
        Some(scoped) => scoped.split_once('/').map_or(scoped, |(_, pkg)| pkg),
        None => name.as_str(),
    };
    Some(bare.to_string())
}
