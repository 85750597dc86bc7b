use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result, bail};

pub const KEY_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const KEY_ADMIN_API_TOKEN: &str = "ADMIN_API_TOKEN";
pub const KEY_ORCHESTRATOR_MODE: &str = "ORCHESTRATOR_MODE";
pub const KEY_WEBHOOK_SECURITY: &str = "CHANNEL_WEBHOOK_SECURITY_ENABLED";

const TEMPLATE: &str = "\
# GenXBot backend configuration.
# Values here are injected into the backend process environment on start.

# OpenAI credential. Leave empty to run in the deterministic fallback mode.
OPENAI_API_KEY=

# Token for the admin/control-plane endpoints. Optional.
ADMIN_API_TOKEN=

# Orchestrator mode: single, multi, or hybrid.
ORCHESTRATOR_MODE=single

# Verify signatures on inbound channel webhooks.
CHANNEL_WEBHOOK_SECURITY_ENABLED=false
";

/// Orchestrator runtime mode. Closed set; anything else is a validation
/// error, never coerced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorMode {
    Single,
    Multi,
    Hybrid,
}

impl FromStr for OrchestratorMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "single" => Ok(Self::Single),
            "multi" => Ok(Self::Multi),
            "hybrid" => Ok(Self::Hybrid),
            other => bail!(
                "invalid ORCHESTRATOR_MODE '{}' (expected single, multi, or hybrid)",
                other
            ),
        }
    }
}

impl fmt::Display for OrchestratorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Single => "single",
            Self::Multi => "multi",
            Self::Hybrid => "hybrid",
        };
        f.write_str(s)
    }
}

/// The backend env file, kept as raw lines so a rewrite preserves comments
/// and keys this supervisor does not recognize.
#[derive(Debug, Clone, Default)]
pub struct EnvFile {
    path: PathBuf,
    lines: Vec<String>,
}

impl EnvFile {
    /// Load the env file; a missing file yields an empty document.
    pub fn load(path: &Path) -> Result<Self> {
        let lines = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            contents.lines().map(str::to_string).collect()
        } else {
            Vec::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            lines,
        })
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Parsed KEY=value pairs, quotes stripped, comments and blanks skipped.
    pub fn values(&self) -> HashMap<String, String> {
        let mut vars = HashMap::new();
        for line in &self.lines {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                let value = value.trim();
                let value = value
                    .strip_prefix('"')
                    .and_then(|s| s.strip_suffix('"'))
                    .or_else(|| value.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
                    .unwrap_or(value);
                if !key.is_empty() {
                    vars.insert(key.to_string(), value.to_string());
                }
            }
        }
        vars
    }

    /// Non-empty value for a key, if present.
    pub fn get(&self, key: &str) -> Option<String> {
        self.values().get(key).filter(|v| !v.is_empty()).cloned()
    }

    /// Set a key, editing the existing `KEY=` line in place so surrounding
    /// comments keep their position; appends when the key is absent.
    pub fn set(&mut self, key: &str, value: &str) {
        for line in &mut self.lines {
            let trimmed = line.trim_start();
            if trimmed.starts_with('#') {
                continue;
            }
            if let Some((existing, _)) = trimmed.split_once('=') {
                if existing.trim() == key {
                    *line = format!("{}={}", key, value);
                    return;
                }
            }
        }
        self.lines.push(format!("{}={}", key, value));
    }

    /// Validation problems for the recognized keys. Missing secrets are not
    /// problems (the backend has a documented fallback); a malformed enum or
    /// boolean is.
    pub fn validate(&self) -> Vec<String> {
        let values = self.values();
        let mut problems = Vec::new();

        if let Some(mode) = values.get(KEY_ORCHESTRATOR_MODE) {
            if !mode.is_empty() {
                if let Err(err) = mode.parse::<OrchestratorMode>() {
                    problems.push(err.to_string());
                }
            }
        }

        if let Some(flag) = values.get(KEY_WEBHOOK_SECURITY) {
            if !flag.is_empty() && !matches!(flag.as_str(), "true" | "false") {
                problems.push(format!(
                    "invalid {} '{}' (expected true or false)",
                    KEY_WEBHOOK_SECURITY, flag
                ));
            }
        }

        problems
    }

    /// Rewrite the file atomically (temp file + rename).
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let temp_path = self
            .path
            .with_extension(format!("env.tmp.{}", std::process::id()));
        let mut contents = self.lines.join("\n");
        contents.push('\n');

        {
            let mut file = fs::File::create(&temp_path)
                .with_context(|| format!("failed to create {}", temp_path.display()))?;
            file.write_all(contents.as_bytes())
                .with_context(|| format!("failed to write {}", temp_path.display()))?;
            file.sync_all()
                .with_context(|| format!("failed to sync {}", temp_path.display()))?;
        }

        fs::rename(&temp_path, &self.path).with_context(|| {
            format!(
                "failed to replace {} from {}",
                self.path.display(),
                temp_path.display()
            )
        })?;
        Ok(())
    }
}

/// Write the starter env file. Refuses to clobber an existing one.
pub fn write_template(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, TEMPLATE).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}
