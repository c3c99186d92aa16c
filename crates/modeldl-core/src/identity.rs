//! Identity Service: deterministic model UUID derivation.
//!
//! `generate(repoId)` is pure and referentially transparent — equal inputs
//! produce equal outputs across processes and components (spec §4.1).

use crate::models::RepositoryId;
use uuid::Uuid;

/// Fixed namespace UUID the engine's model ids are derived under. Any stable
/// UUID works here; changing it would change every existing model's id, so
/// it is pinned as a constant rather than generated at runtime.
const MODEL_ID_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6b, 0xa7, 0xb8, 0x30, 0x9d, 0xad, 0x11, 0xd1, 0x80, 0xb4, 0x00, 0xc0, 0x4f, 0xd4, 0x30, 0xc8,
]);

/// Derive a stable [`Uuid`] from a repository id via UUIDv5 (SHA-1 based,
/// deterministic — as opposed to v4, which is random per call).
pub fn generate_model_id(repo_id: &RepositoryId) -> Uuid {
    Uuid::new_v5(&MODEL_ID_NAMESPACE, repo_id.as_str().as_bytes())
}

/// Same derivation from a raw (unsanitized) repository string, for recovery
/// paths that only have a directory name to work from (spec §4.2
/// `listDownloadedModels` synthesis).
pub fn generate_model_id_from_str(repo_id: &str) -> Uuid {
    Uuid::new_v5(&MODEL_ID_NAMESPACE, repo_id.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_across_calls() {
        let id = RepositoryId::parse("mlx-community/Llama-3.2-1B-Instruct-4bit").unwrap();
        let a = generate_model_id(&id);
        let b = generate_model_id(&id);
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_repos_yield_distinct_ids() {
        let a = RepositoryId::parse("org-a/model").unwrap();
        let b = RepositoryId::parse("org-b/model").unwrap();
        assert_ne!(generate_model_id(&a), generate_model_id(&b));
    }

    #[test]
    fn sanitized_and_raw_derivation_agree_when_unsanitized() {
        let raw = "unsloth/Qwen3-0.6B-GGUF";
        let id = RepositoryId::parse(raw).unwrap();
        assert_eq!(generate_model_id(&id), generate_model_id_from_str(raw));
    }
}
