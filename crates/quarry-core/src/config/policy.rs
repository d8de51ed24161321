//! Tenancy and business-rule policy.
//!
//! The policy defines which conditions every generated query must carry and
//! which relations may never be queried. It is process-wide and can be
//! replaced wholesale at runtime through a [`PolicyHandle`].

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use super::ConfigError;

/// Placeholder in relation conditions replaced by [`PolicyConfig::status_value`].
pub const STATUS_PLACEHOLDER: &str = "{status}";

/// Mandatory conditions and relation exclusions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Conditions ANDed into every query's WHERE clause.
    #[serde(default = "default_mandatory_conditions")]
    pub mandatory_conditions: Vec<String>,

    /// Status conditions applied when a relation is a FROM/JOIN target.
    /// May use the `{status}` placeholder.
    #[serde(default)]
    pub relation_conditions: BTreeMap<String, Vec<String>>,

    /// Relations that must never be queried. `*` and `%` are wildcards.
    #[serde(default = "default_excluded_patterns")]
    pub excluded_relation_patterns: Vec<String>,

    /// Column used for tenant isolation.
    #[serde(default = "default_tenant_column")]
    pub tenant_column: String,

    /// Value that marks a row as active in status conditions.
    #[serde(default = "default_status_value")]
    pub status_value: i64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            mandatory_conditions: default_mandatory_conditions(),
            relation_conditions: BTreeMap::new(),
            excluded_relation_patterns: default_excluded_patterns(),
            tenant_column: default_tenant_column(),
            status_value: default_status_value(),
        }
    }
}

impl PolicyConfig {
    /// Load a policy from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse a policy from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(ConfigError::from)
    }

    /// Whether a relation matches one of the exclusion patterns.
    ///
    /// Both the full name and the unqualified name (after the last `.`) are
    /// tested, so `dbo.sysdiagrams` is caught by `sys*`.
    pub fn is_excluded(&self, relation: &str) -> bool {
        let full = unbracket(relation);
        let bare = full.rsplit('.').next().unwrap_or(&full).to_string();
        self.excluded_relation_patterns
            .iter()
            .any(|p| wildcard_match(p, &full) || wildcard_match(p, &bare))
    }

    /// Status conditions configured for one relation, placeholders expanded.
    pub fn relation_conditions_for(&self, relation: &str) -> Vec<String> {
        let name = unbracket(relation);
        let bare = name.rsplit('.').next().unwrap_or(&name);
        self.relation_conditions
            .iter()
            .filter(|(key, _)| key.eq_ignore_ascii_case(bare) || key.eq_ignore_ascii_case(&name))
            .flat_map(|(_, conds)| conds.iter())
            .map(|c| c.replace(STATUS_PLACEHOLDER, &self.status_value.to_string()))
            .collect()
    }

    /// Every condition a query over `relations` must carry, in order and
    /// without duplicates: mandatory conditions first, then per-relation ones.
    pub fn conditions_for<S: AsRef<str>>(&self, relations: &[S]) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let mut push = |cond: String| {
            let cond = cond.trim().to_string();
            if !cond.is_empty() && !out.iter().any(|c| c.eq_ignore_ascii_case(&cond)) {
                out.push(cond);
            }
        };
        for cond in &self.mandatory_conditions {
            push(cond.clone());
        }
        for relation in relations {
            for cond in self.relation_conditions_for(relation.as_ref()) {
                push(cond);
            }
        }
        out
    }

    /// Non-fatal findings about the policy, for `quarry check` and startup logs.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.mandatory_conditions.iter().all(|c| c.trim().is_empty()) {
            warnings.push("policy has no mandatory conditions; queries are not tenant-scoped".to_string());
        } else {
            let tenant = self.tenant_column.to_ascii_lowercase();
            let mentions_tenant = self
                .mandatory_conditions
                .iter()
                .any(|c| c.to_ascii_lowercase().contains(&tenant));
            if !mentions_tenant {
                warnings.push(format!(
                    "no mandatory condition references tenant column '{}'",
                    self.tenant_column
                ));
            }
        }

        if self.excluded_relation_patterns.is_empty() {
            warnings.push("no excluded relation patterns; system tables are queryable".to_string());
        }

        for (relation, conds) in &self.relation_conditions {
            if self.is_excluded(relation) {
                warnings.push(format!(
                    "relation '{}' has conditions but is excluded",
                    relation
                ));
            }
            if conds.is_empty() {
                warnings.push(format!("relation '{}' has an empty condition list", relation));
            }
        }

        warnings
    }
}

/// Shared, hot-reloadable policy.
///
/// Readers take an `Arc` snapshot with [`PolicyHandle::current`] and keep it for
/// the whole request; an administrative [`PolicyHandle::replace`] only affects
/// snapshots taken afterwards.
#[derive(Debug, Clone, Default)]
pub struct PolicyHandle {
    inner: Arc<RwLock<Arc<PolicyConfig>>>,
}

impl PolicyHandle {
    pub fn new(policy: PolicyConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(policy))),
        }
    }

    /// Snapshot of the current policy.
    pub fn current(&self) -> Arc<PolicyConfig> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the policy wholesale. There is no versioning or rollback.
    pub fn replace(&self, policy: PolicyConfig) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(policy);
    }
}

fn unbracket(name: &str) -> String {
    name.trim().replace(['[', ']', '"', '`'], "")
}

fn wildcard_match(pattern: &str, text: &str) -> bool {
    let mut source = String::from("^");
    for (i, part) in regex::escape(pattern.trim()).split(r"\*").enumerate() {
        if i > 0 {
            source.push_str(".*");
        }
        source.push_str(&part.replace('%', ".*"));
    }
    source.push('$');

    RegexBuilder::new(&source)
        .case_insensitive(true)
        .build()
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}

// Default value functions
fn default_mandatory_conditions() -> Vec<String> {
    vec!["TenantId = 1".to_string()]
}

fn default_excluded_patterns() -> Vec<String> {
    vec![
        "sys*".to_string(),
        "INFORMATION_SCHEMA*".to_string(),
        "__*".to_string(),
    ]
}

fn default_tenant_column() -> String {
    "TenantId".to_string()
}

fn default_status_value() -> i64 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = PolicyConfig::default();
        assert_eq!(policy.conditions_for(&["Sales"]), vec!["TenantId = 1"]);
        assert!(policy.validate().is_empty());
    }

    #[test]
    fn test_relation_conditions_expand_status() {
        let mut policy = PolicyConfig::default();
        policy.status_value = 2;
        policy.relation_conditions.insert(
            "Sales".to_string(),
            vec!["SaleStatus = {status}".to_string()],
        );

        assert_eq!(
            policy.conditions_for(&["[sales]"]),
            vec!["TenantId = 1", "SaleStatus = 2"]
        );
        assert_eq!(policy.conditions_for(&["Stock"]), vec!["TenantId = 1"]);
    }

    #[test]
    fn test_conditions_deduplicated() {
        let mut policy = PolicyConfig::default();
        policy
            .relation_conditions
            .insert("Sales".to_string(), vec!["tenantid = 1".to_string()]);
        assert_eq!(policy.conditions_for(&["Sales", "Sales"]).len(), 1);
    }

    #[test]
    fn test_exclusion_patterns() {
        let mut policy = PolicyConfig::default();
        policy.excluded_relation_patterns.push("%_audit".to_string());

        assert!(policy.is_excluded("sysobjects"));
        assert!(policy.is_excluded("[dbo].[sysdiagrams]"));
        assert!(policy.is_excluded("INFORMATION_SCHEMA.COLUMNS"));
        assert!(policy.is_excluded("__EFMigrationsHistory"));
        assert!(policy.is_excluded("Orders_Audit"));
        assert!(!policy.is_excluded("Sales"));
        assert!(!policy.is_excluded("CustomerSystems"));
    }

    #[test]
    fn test_validate_reports_missing_tenant_condition() {
        let policy = PolicyConfig {
            mandatory_conditions: vec!["IsDeleted = 0".to_string()],
            ..PolicyConfig::default()
        };
        let warnings = policy.validate();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("TenantId"));
    }

    #[test]
    fn test_handle_replace_is_visible_to_new_snapshots() {
        let handle = PolicyHandle::new(PolicyConfig::default());
        let before = handle.current();

        handle.replace(PolicyConfig {
            mandatory_conditions: vec!["TenantId = 7".to_string()],
            ..PolicyConfig::default()
        });

        assert_eq!(before.mandatory_conditions, vec!["TenantId = 1"]);
        assert_eq!(handle.current().mandatory_conditions, vec!["TenantId = 7"]);

        let clone = handle.clone();
        clone.replace(PolicyConfig::default());
        assert_eq!(handle.current().mandatory_conditions, vec!["TenantId = 1"]);
    }

    #[test]
    fn test_parse_policy_yaml() {
        let yaml = r#"
mandatory_conditions:
  - CompanyId = 42
relation_conditions:
  Sales: ["SaleStatus = {status}"]
excluded_relation_patterns: ["tmp_*"]
tenant_column: CompanyId
status_value: 3
"#;
        let policy = PolicyConfig::from_yaml(yaml).unwrap();
        assert_eq!(
            policy.conditions_for(&["Sales"]),
            vec!["CompanyId = 42", "SaleStatus = 3"]
        );
        assert!(policy.is_excluded("tmp_load"));
        assert!(!policy.is_excluded("sysobjects"));
    }
}
