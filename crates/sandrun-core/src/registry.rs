//! Language registry
//!
//! Maps a language identifier to the sandbox image, shell command, source file
//! name and timeout used to run it. The table is built once at startup, either
//! from the built-in defaults or from the `languages` section of the config
//! file, and is read-only afterwards.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::errors::{SandrunError, ValidationError};

/// Default wall-clock budget for a single run.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LanguageConfig {
    pub id: String,
    pub image: String,
    /// Build-and-run command, executed through `sh -c` inside the sandbox.
    pub command: String,
    pub source_file: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
}

fn default_timeout_seconds() -> u64 {
    DEFAULT_TIMEOUT_SECONDS
}

impl LanguageConfig {
    pub fn new(id: &str, image: &str, command: &str, source_file: &str, timeout_seconds: u64) -> Self {
        Self {
            id: id.to_string(),
            image: image.to_string(),
            command: command.to_string(),
            source_file: source_file.to_string(),
            timeout_seconds,
            aliases: Vec::new(),
        }
    }

    fn validate(&self) -> Result<(), SandrunError> {
        let fields = [
            ("id", &self.id),
            ("image", &self.image),
            ("command", &self.command),
            ("source_file", &self.source_file),
        ];
        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(SandrunError::ConfigError(format!(
                    "Language '{}' has an empty {}",
                    self.id, name
                )));
            }
        }
        if self.source_file.contains('/') || self.source_file.contains("..") {
            return Err(SandrunError::ConfigError(format!(
                "Language '{}' source_file must be a plain file name",
                self.id
            )));
        }
        if self.timeout_seconds == 0 {
            return Err(SandrunError::ConfigError(format!(
                "Language '{}' timeout_seconds must be greater than zero",
                self.id
            )));
        }
        Ok(())
    }
}

pub fn builtin_languages() -> Vec<LanguageConfig> {
    vec![
        LanguageConfig::new("python", "online-compiler/python:latest", "python3 main.py", "main.py", 10),
        LanguageConfig::new("java", "online-compiler/java:latest", "javac Main.java && java Main", "Main.java", 10),
        LanguageConfig::new("cpp", "online-compiler/cpp:latest", "g++ -o main main.cpp && ./main", "main.cpp", 10),
        LanguageConfig::new("c", "online-compiler/cpp:latest", "gcc -o main main.c && ./main", "main.c", 10),
        LanguageConfig::new("javascript", "online-compiler/javascript:latest", "node main.js", "main.js", 10),
        LanguageConfig::new("typescript", "online-compiler/typescript:latest", "tsc main.ts && node main.js", "main.ts", 10),
        LanguageConfig::new("rust", "online-compiler/rust:latest", "rustc main.rs && ./main", "main.rs", 10),
        LanguageConfig::new("ruby", "online-compiler/ruby:latest", "ruby main.rb", "main.rb", 10),
        LanguageConfig::new("r", "online-compiler/r:latest", "Rscript main.R", "main.R", 10),
        LanguageConfig::new("csharp", "online-compiler/csharp:latest", "mcs Program.cs && mono Program.exe", "Program.cs", 10),
        // Go compiles before it runs and needs the longer budget.
        LanguageConfig::new("go", "online-compiler/go:latest", "go run main.go", "main.go", 20),
    ]
}

#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    languages: Vec<LanguageConfig>,
    index: HashMap<String, usize>,
}

impl LanguageRegistry {
    pub fn builtin() -> Self {
        let languages = builtin_languages();
        let index = languages
            .iter()
            .enumerate()
            .map(|(position, config)| (config.id.clone(), position))
            .collect();
        Self { languages, index }
    }

    /// Builds a registry from explicit entries. Identifiers and aliases are
    /// matched case-insensitively and must be unique across the table.
    pub fn from_configs(configs: Vec<LanguageConfig>) -> Result<Self, SandrunError> {
        if configs.is_empty() {
            return Err(SandrunError::ConfigError(
                "At least one language must be configured".to_string(),
            ));
        }

        let mut languages = Vec::with_capacity(configs.len());
        let mut index = HashMap::new();
        for mut config in configs {
            config.validate()?;
            config.id = config.id.trim().to_lowercase();
            let position = languages.len();
            let keys = std::iter::once(config.id.clone())
                .chain(config.aliases.iter().map(|alias| alias.trim().to_lowercase()));
            for key in keys {
                if index.insert(key.clone(), position).is_some() {
                    return Err(SandrunError::ConfigError(format!(
                        "Duplicate language identifier or alias: {}",
                        key
                    )));
                }
            }
            languages.push(config);
        }

        Ok(Self { languages, index })
    }

    pub fn resolve(&self, language: &str) -> Result<&LanguageConfig, ValidationError> {
        self.index
            .get(&language.trim().to_lowercase())
            .map(|&position| &self.languages[position])
            .ok_or_else(|| ValidationError::UnsupportedLanguage(language.to_string()))
    }

    /// Canonical identifiers only; aliases are not listed.
    pub fn supported_languages(&self) -> BTreeSet<String> {
        self.languages.iter().map(|config| config.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.languages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.languages.is_empty()
    }
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
