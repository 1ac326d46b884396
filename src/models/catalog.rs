use std::sync::Arc;

use once_cell::sync::Lazy;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ModelKind {
    Asr,
    Llm,
}

impl ModelKind {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            ModelKind::Asr => "ASR",
            ModelKind::Llm => "LLM",
        }
    }
}

/// One file of a spec. Every URL in `urls` must serve identical bytes,
/// otherwise resuming from one source onto another corrupts the file.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ModelFile {
    pub file_name: String,
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl ModelFile {
    pub fn new(file_name: impl Into<String>, urls: Vec<String>) -> Self {
        Self {
            file_name: file_name.into(),
            urls,
            min_bytes: None,
            sha256: None,
        }
    }

    #[must_use]
    pub fn with_min_bytes(mut self, min_bytes: u64) -> Self {
        self.min_bytes = Some(min_bytes);
        self
    }

    #[must_use]
    pub fn with_sha256(mut self, digest: impl Into<String>) -> Self {
        self.sha256 = Some(digest.into());
        self
    }

    /// A missing threshold accepts any existing file.
    #[must_use]
    pub fn meets_min_bytes(&self, bytes: u64) -> bool {
        self.min_bytes.map_or(true, |min| bytes >= min)
    }

    #[must_use]
    pub fn partial_name(&self) -> String {
        format!("{}.partial", self.file_name)
    }
}

/// An installable unit. Files share the spec's install directory, which is
/// relative to the models root and unique across the catalog.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ModelSpec {
    pub id: String,
    pub display_name: String,
    pub kind: ModelKind,
    pub install_rel_path: String,
    pub files: Vec<ModelFile>,
}

#[derive(Debug, Clone)]
pub struct Catalog {
    specs: Vec<ModelSpec>,
    required: Vec<String>,
}

static BUILTIN: Lazy<Arc<Catalog>> = Lazy::new(|| Arc::new(builtin_catalog()));

impl Catalog {
    /// Builds a catalog. Required ids that do not resolve are dropped.
    pub fn new(specs: Vec<ModelSpec>, required: Vec<String>) -> Self {
        let required = required
            .into_iter()
            .filter(|id| specs.iter().any(|spec| &spec.id == id))
            .collect();
        Self { specs, required }
    }

    pub fn builtin() -> Arc<Catalog> {
        BUILTIN.clone()
    }

    pub fn specs(&self) -> &[ModelSpec] {
        &self.specs
    }

    pub fn find(&self, id: &str) -> Option<&ModelSpec> {
        self.specs.iter().find(|spec| spec.id == id)
    }

    /// Specs needed for the minimum usable demo, in install order.
    pub fn required(&self) -> Vec<&ModelSpec> {
        self.required.iter().filter_map(|id| self.find(id)).collect()
    }
}

pub const ASR_PARAKEET: &str = "asr_parakeet_nexa";
pub const LLM_LIQUID_STARTER: &str = "llm_liquid_starter";
pub const LLM_QWEN_UPGRADE: &str = "llm_qwen_upgrade";

fn hf_resolve(repo: &str, path: &str) -> String {
    format!("https://huggingface.co/{repo}/resolve/main/{path}")
}

fn parakeet_file(name: &str, min_bytes: u64) -> ModelFile {
    ModelFile::new(
        name,
        vec![hf_resolve("NexaAI/parakeet-tdt-0.6b-v3-npu-mobile", name)],
    )
    .with_min_bytes(min_bytes)
}

fn builtin_catalog() -> Catalog {
    let specs = vec![
        ModelSpec {
            id: ASR_PARAKEET.into(),
            display_name: "ASR: Parakeet (NPU)".into(),
            kind: ModelKind::Asr,
            install_rel_path: "parakeet-tdt-0.6b-v3-npu-mobile".into(),
            files: vec![
                parakeet_file("files-1-2.nexa", 100),
                parakeet_file("files-2-2.nexa", 1_000),
                parakeet_file("weights-1-5.nexa", 10_000_000),
                parakeet_file("weights-2-5.nexa", 10_000_000),
                parakeet_file("weights-3-5.nexa", 10_000_000),
                parakeet_file("weights-4-5.nexa", 10_000_000),
                parakeet_file("weights-5-5.nexa", 100_000),
            ],
        },
        ModelSpec {
            id: LLM_LIQUID_STARTER.into(),
            display_name: "LLM: Liquid (Starter SOAP)".into(),
            kind: ModelKind::Llm,
            install_rel_path: "LFM2.5-1.2B-Instruct-GGUF".into(),
            files: vec![
                // guards against the tiny LFS pointer file being served instead
                ModelFile::new(
                    "LFM2.5-1.2B-Instruct-Q4_K_M.gguf",
                    vec![hf_resolve(
                        "LiquidAI/LFM2.5-1.2B-Instruct-GGUF",
                        "LFM2.5-1.2B-Instruct-Q4_K_M.gguf",
                    )],
                )
                .with_min_bytes(50_000_000),
            ],
        },
        ModelSpec {
            id: LLM_QWEN_UPGRADE.into(),
            display_name: "LLM: Qwen3 4B (Upgrade SOAP)".into(),
            kind: ModelKind::Llm,
            install_rel_path: "Qwen3-4B-GGUF".into(),
            files: vec![ModelFile::new(
                "Qwen3-4B-Q4_K_M.gguf",
                vec![hf_resolve("Qwen/Qwen3-4B-GGUF", "Qwen3-4B-Q4_K_M.gguf")],
            )
            .with_min_bytes(100_000_000)],
        },
    ];

    Catalog::new(
        specs,
        vec![ASR_PARAKEET.into(), LLM_LIQUID_STARTER.into()],
    )
}
