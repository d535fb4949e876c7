//! Task classifier: maps a free-text task description to weighted domain signals.

use std::collections::{BTreeMap, BTreeSet};

use crate::domain::TaskSignal;

/// Built-in keyword -> domain table.
const KEYWORD_DOMAINS: &[(&str, &str)] = &[
    // infrastructure
    ("terraform", "infrastructure"),
    ("kubernetes", "infrastructure"),
    ("k8s", "infrastructure"),
    ("helm", "infrastructure"),
    ("infrastructure", "infrastructure"),
    ("infra", "infrastructure"),
    ("docker", "infrastructure"),
    ("container", "infrastructure"),
    ("containers", "infrastructure"),
    ("aws", "infrastructure"),
    ("gcp", "infrastructure"),
    ("azure", "infrastructure"),
    ("cloud", "infrastructure"),
    ("ansible", "infrastructure"),
    ("pulumi", "infrastructure"),
    ("cloudformation", "infrastructure"),
    ("provisioning", "infrastructure"),
    // ci-cd
    ("ci", "ci-cd"),
    ("cd", "ci-cd"),
    ("ci/cd", "ci-cd"),
    ("jenkins", "ci-cd"),
    ("github-actions", "ci-cd"),
    ("deploy", "ci-cd"),
    ("deployment", "ci-cd"),
    ("release", "ci-cd"),
    // typescript backend
    ("typescript", "typescript-backend-general"),
    ("node", "typescript-backend-general"),
    ("nodejs", "typescript-backend-general"),
    ("node.js", "typescript-backend-general"),
    ("express", "typescript-backend-general"),
    ("nestjs", "typescript-backend-general"),
    ("fastify", "typescript-backend-general"),
    ("deno", "typescript-backend-general"),
    // frontend
    ("frontend", "frontend"),
    ("react", "frontend"),
    ("vue", "frontend"),
    ("angular", "frontend"),
    ("svelte", "frontend"),
    ("css", "frontend"),
    ("html", "frontend"),
    ("ui", "frontend"),
    ("ux", "frontend"),
    ("component", "frontend"),
    ("components", "frontend"),
    ("tailwind", "frontend"),
    ("nextjs", "frontend"),
    ("next.js", "frontend"),
    // security
    ("security", "security"),
    ("vulnerability", "security"),
    ("vulnerabilities", "security"),
    ("auth", "security"),
    ("authentication", "security"),
    ("authorization", "security"),
    ("oauth", "security"),
    ("jwt", "security"),
    ("encryption", "security"),
    ("xss", "security"),
    ("csrf", "security"),
    ("cve", "security"),
    ("secrets", "security"),
    // database
    ("database", "database"),
    ("sql", "database"),
    ("postgres", "database"),
    ("postgresql", "database"),
    ("mysql", "database"),
    ("sqlite", "database"),
    ("mongodb", "database"),
    ("redis", "database"),
    ("migration", "database"),
    ("migrations", "database"),
    ("schema", "database"),
    // testing
    ("test", "testing"),
    ("tests", "testing"),
    ("testing", "testing"),
    ("e2e", "testing"),
    ("coverage", "testing"),
    ("jest", "testing"),
    ("pytest", "testing"),
    ("tdd", "testing"),
    // documentation
    ("docs", "documentation"),
    ("documentation", "documentation"),
    ("readme", "documentation"),
    ("tutorial", "documentation"),
    // performance
    ("performance", "performance"),
    ("latency", "performance"),
    ("optimize", "performance"),
    ("optimization", "performance"),
    ("profiling", "performance"),
    ("benchmark", "performance"),
    ("throughput", "performance"),
    // api design
    ("api", "api-design"),
    ("rest", "api-design"),
    ("graphql", "api-design"),
    ("grpc", "api-design"),
    ("endpoint", "api-design"),
    ("endpoints", "api-design"),
    ("openapi", "api-design"),
    // languages
    ("python", "python"),
    ("django", "python"),
    ("flask", "python"),
    ("fastapi", "python"),
    ("golang", "go"),
    ("rust", "rust"),
    ("cargo", "rust"),
    // architecture
    ("architecture", "architecture"),
    ("refactor", "architecture"),
    ("refactoring", "architecture"),
    ("microservices", "architecture"),
    ("scalability", "architecture"),
    // observability
    ("monitoring", "observability"),
    ("logging", "observability"),
    ("metrics", "observability"),
    ("tracing", "observability"),
    ("observability", "observability"),
    ("prometheus", "observability"),
    ("grafana", "observability"),
    ("alerting", "observability"),
];

/// Split a description into lowercase tokens.
///
/// Tokens keep `- . + # /` so that `node.js`, `c++` and `ci/cd` survive;
/// trailing punctuation is trimmed.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || matches!(c, '-' | '.' | '+' | '#' | '/')))
        .map(|t| t.trim_matches(|c: char| matches!(c, '.' | '-' | '/')))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Deterministic keyword classifier.
#[derive(Debug, Clone)]
pub struct TaskClassifier {
    table: BTreeMap<String, BTreeSet<String>>,
}

impl Default for TaskClassifier {
    fn default() -> Self {
        let mut classifier = Self {
            table: BTreeMap::new(),
        };
        for (keyword, domain) in KEYWORD_DOMAINS {
            classifier.add_keyword(keyword, domain);
        }
        classifier
    }
}

impl TaskClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: map an additional keyword to `domain`.
    pub fn with_keyword(mut self, keyword: &str, domain: &str) -> Self {
        self.add_keyword(keyword, domain);
        self
    }

    fn add_keyword(&mut self, keyword: &str, domain: &str) {
        self.table
            .entry(keyword.to_lowercase())
            .or_default()
            .insert(domain.to_string());
    }

    /// One signal per matched domain, weighted `matches / token_count`
    /// (capped at 1.0), sorted by tag.
    ///
    /// Empty or whitespace-only descriptions yield no signals.
    pub fn classify(&self, description: &str) -> Vec<TaskSignal> {
        let tokens = tokenize(description);
        if tokens.is_empty() {
            return Vec::new();
        }

        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for token in &tokens {
            if let Some(domains) = self.table.get(token) {
                for domain in domains {
                    *counts.entry(domain.as_str()).or_default() += 1;
                }
            }
        }

        let total = tokens.len() as f64;
        counts
            .into_iter()
            .map(|(domain, count)| TaskSignal::new(domain, count as f64 / total))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_keeps_compound_tokens() {
        assert_eq!(
            tokenize("Migrate Node.js API to CI/CD, please."),
            vec!["migrate", "node.js", "api", "to", "ci/cd", "please"]
        );
    }

    #[test]
    fn test_empty_description_yields_no_signals() {
        let classifier = TaskClassifier::new();
        assert!(classifier.classify("").is_empty());
        assert!(classifier.classify("   \n\t").is_empty());
    }

    #[test]
    fn test_terraform_task_maps_to_infrastructure() {
        let signals = TaskClassifier::new().classify("Setup Terraform infrastructure");
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].tag, "infrastructure");
        assert!((signals[0].weight - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_weights_are_capped_and_deterministic() {
        let classifier = TaskClassifier::new();
        let a = classifier.classify("terraform terraform kubernetes");
        let b = classifier.classify("terraform terraform kubernetes");
        assert_eq!(a, b);
        assert_eq!(a[0].weight, 1.0);
    }

    #[test]
    fn test_multiple_domains_sorted_by_tag() {
        let signals = TaskClassifier::new().classify("Add jest tests for the react component");
        let tags: Vec<&str> = signals.iter().map(|s| s.tag.as_str()).collect();
        assert_eq!(tags, vec!["frontend", "testing"]);
    }

    #[test]
    fn test_unrecognized_words_yield_no_signals() {
        assert!(TaskClassifier::new()
            .classify("please make it nicer somehow")
            .is_empty());
    }

    #[test]
    fn test_custom_keyword() {
        let classifier = TaskClassifier::new().with_keyword("Crossplane", "infrastructure");
        let signals = classifier.classify("crossplane");
        assert_eq!(signals[0].tag, "infrastructure");
    }
}
