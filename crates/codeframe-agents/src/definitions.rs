use codeframe_core::{AgentKind, CoreError, CoreResult, Maturity};
use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};

/// Declarative agent capability descriptor, one YAML file per agent type
/// under `agents/definitions/`. New worker variants need a file here, not a
/// code change.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentDefinition {
    #[serde(rename = "type")]
    pub kind: AgentKind,
    pub provider: String,
    pub capabilities: Vec<String>,
    pub maturity: Maturity,
    #[serde(default)]
    pub prompt_overrides: Option<String>,
}

/// Built-in definitions used when the definitions directory is absent.
pub fn builtin_definitions() -> Vec<AgentDefinition> {
    vec![
        AgentDefinition {
            kind: AgentKind::Backend,
            provider: "anthropic".into(),
            capabilities: vec!["python".into(), "api".into(), "database".into()],
            maturity: Maturity::Coaching,
            prompt_overrides: None,
        },
        AgentDefinition {
            kind: AgentKind::Frontend,
            provider: "anthropic".into(),
            capabilities: vec!["typescript".into(), "react".into(), "css".into()],
            maturity: Maturity::Coaching,
            prompt_overrides: None,
        },
        AgentDefinition {
            kind: AgentKind::Test,
            provider: "anthropic".into(),
            capabilities: vec!["python".into(), "typescript".into(), "testing".into()],
            maturity: Maturity::Supporting,
            prompt_overrides: None,
        },
        AgentDefinition {
            kind: AgentKind::Review,
            provider: "anthropic".into(),
            capabilities: vec!["review".into()],
            maturity: Maturity::Delegating,
            prompt_overrides: None,
        },
    ]
}

/// Load every `*.yaml`/`*.yml` under `dir`. Bad files are skipped with a
/// warning so one broken descriptor cannot take the pool down.
pub async fn load_definitions(dir: &Path) -> CoreResult<Vec<AgentDefinition>> {
    if !dir.exists() {
        info!(dir = %dir.display(), "No definitions directory, using builtins");
        return Ok(builtin_definitions());
    }

    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut definitions = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == "yaml" || e == "yml");
        if !is_yaml {
            continue;
        }
        match parse_definition(&tokio::fs::read_to_string(&path).await?) {
            Ok(def) => {
                info!(path = %path.display(), kind = %def.kind, "Loaded agent definition");
                definitions.push(def);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping bad agent definition");
            }
        }
    }

    if definitions.is_empty() {
        warn!(dir = %dir.display(), "Definitions directory empty, using builtins");
        return Ok(builtin_definitions());
    }
    Ok(definitions)
}

pub fn parse_definition(raw: &str) -> CoreResult<AgentDefinition> {
    serde_yaml_ng::from_str(raw)
        .map_err(|e| CoreError::Validation(format!("Bad agent definition: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_definition() {
        let yaml = "\
type: backend
provider: anthropic
capabilities:
  - python
  - api
maturity: supporting
prompt_overrides: |
  Prefer FastAPI idioms.
";
        let def = parse_definition(yaml).unwrap();
        assert_eq!(def.kind, AgentKind::Backend);
        assert_eq!(def.capabilities, vec!["python", "api"]);
        assert_eq!(def.maturity, Maturity::Supporting);
        assert!(def.prompt_overrides.unwrap().contains("FastAPI"));
    }

    #[test]
    fn test_parse_rejects_unknown_kind() {
        let yaml = "type: wizard\nprovider: x\ncapabilities: []\nmaturity: coaching\n";
        assert!(parse_definition(yaml).is_err());
    }

    #[tokio::test]
    async fn test_load_skips_bad_files() {
        let tmp = tempfile::tempdir().unwrap();
        tokio::fs::write(
            tmp.path().join("backend.yaml"),
            "type: backend\nprovider: anthropic\ncapabilities: [python]\nmaturity: directive\n",
        )
        .await
        .unwrap();
        tokio::fs::write(tmp.path().join("broken.yaml"), "type: [not valid")
            .await
            .unwrap();
        tokio::fs::write(tmp.path().join("notes.txt"), "ignored").await.unwrap();

        let defs = load_definitions(tmp.path()).await.unwrap();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].kind, AgentKind::Backend);
    }

    #[tokio::test]
    async fn test_missing_dir_falls_back_to_builtins() {
        let defs = load_definitions(Path::new("/definitely/not/here"))
            .await
            .unwrap();
        assert_eq!(defs.len(), 4);
        assert!(defs.iter().any(|d| d.kind == AgentKind::Review));
    }
}
