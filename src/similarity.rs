// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025-2026 JR Morton

//! Signature similarity: token vocabulary, sparse L2 vectors, cosine
//! similarity, and brute-force K-NN anomaly scoring over a runs directory.
//!
//! Each effect value contributes one token, prefixed by its category
//! (`fs_w:src/a.ts`, `net_h:api.example.com`). Vectors are 0/1 over the
//! vocabulary, L2-normalized; cosine similarity is the dot product,
//! clamped to [0, 1].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::signature::EffectSignature;

/// Default neighbor count for anomaly scoring.
pub const DEFAULT_K: usize = 5;
/// Default anomaly threshold: mean neighbor similarity below this flags
/// the run.
pub const DEFAULT_THRESHOLD: f64 = 0.7;

/// Category-prefixed tokens of a signature, unsorted.
pub fn signature_tokens(signature: &EffectSignature) -> Vec<String> {
    let e = &signature.effects;
    let mut tokens = Vec::new();
    tokens.extend(e.fs_writes.iter().map(|v| format!("fs_w:{}", v)));
    tokens.extend(e.fs_reads_external.iter().map(|v| format!("fs_r:{}", v)));
    tokens.extend(e.fs_deletes.iter().map(|v| format!("fs_d:{}", v)));
    tokens.extend(e.net_protocols.iter().map(|v| format!("net_p:{}", v)));
    tokens.extend(e.net_etld_plus_1.iter().map(|v| format!("net_e:{}", v)));
    tokens.extend(e.net_hosts.iter().map(|v| format!("net_h:{}", v)));
    tokens.extend(e.net_ports.iter().map(|v| format!("net_port:{}", v)));
    tokens.extend(e.exec_commands.iter().map(|v| format!("exec_c:{}", v)));
    tokens.extend(e.exec_argv.iter().map(|v| format!("exec_a:{}", v)));
    tokens.extend(
        e.sensitive_keys_accessed
            .iter()
            .map(|v| format!("sens:{}", v)),
    );
    tokens
}

/// The sorted token set of a signature collection. Index = position in
/// the sorted list.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    tokens: Vec<String>,
    index: HashMap<String, usize>,
}

impl Vocabulary {
    pub fn build<'a>(signatures: impl IntoIterator<Item = &'a EffectSignature>) -> Self {
        let mut tokens: Vec<String> = signatures
            .into_iter()
            .flat_map(signature_tokens)
            .collect();
        tokens.sort();
        tokens.dedup();
        let index = tokens
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), i))
            .collect();
        Self { tokens, index }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// L2-normalized sparse 0/1 vector for a signature. Tokens outside
    /// the vocabulary are ignored.
    pub fn vectorize(&self, signature: &EffectSignature) -> SparseVector {
        let mut indices: Vec<usize> = signature_tokens(signature)
            .iter()
            .filter_map(|t| self.index.get(t).copied())
            .collect();
        indices.sort_unstable();
        indices.dedup();
        let weight = if indices.is_empty() {
            0.0
        } else {
            1.0 / (indices.len() as f64).sqrt()
        };
        SparseVector { indices, weight }
    }
}

/// Sparse L2-normalized 0/1 vector: every present index carries the same
/// weight `1/sqrt(n)`.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseVector {
    indices: Vec<usize>,
    weight: f64,
}

impl SparseVector {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Cosine similarity of two vectors, clamped to [0, 1]. Two empty
/// vectors (identical empty signatures) compare as 1.0.
pub fn cosine_similarity(a: &SparseVector, b: &SparseVector) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let mut shared = 0usize;
    let (mut i, mut j) = (0usize, 0usize);
    while i < a.indices.len() && j < b.indices.len() {
        match a.indices[i].cmp(&b.indices[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                shared += 1;
                i += 1;
                j += 1;
            }
        }
    }
    (shared as f64 * a.weight * b.weight).clamp(0.0, 1.0)
}

/// A scored neighbor in the corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Neighbor {
    pub run_id: String,
    pub similarity: f64,
}

/// Anomaly decision for a query signature against a corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyReport {
    pub score: f64,
    pub anomalous: bool,
    pub k: usize,
    pub threshold: f64,
    pub neighbors: Vec<Neighbor>,
}

/// Load every `<run>/signature.json` under a runs directory. Unreadable
/// or malformed signatures are skipped.
pub fn load_run_signatures(runs_dir: &Path) -> Vec<(String, EffectSignature)> {
    let mut signatures: Vec<(String, EffectSignature)> = std::fs::read_dir(runs_dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter_map(|e| {
                    let run_id = e.file_name().to_str()?.to_string();
                    let signature =
                        EffectSignature::load(&e.path().join(crate::runs::SIGNATURE_FILE)).ok()?;
                    Some((run_id, signature))
                })
                .collect()
        })
        .unwrap_or_default();
    signatures.sort_by(|a, b| a.0.cmp(&b.0));
    signatures
}

/// Brute-force top-K most similar corpus entries, best first. Ties break
/// on run id for determinism.
pub fn nearest_neighbors(
    query: &EffectSignature,
    corpus: &[(String, EffectSignature)],
    k: usize,
) -> Vec<Neighbor> {
    let vocabulary = Vocabulary::build(
        corpus
            .iter()
            .map(|(_, s)| s)
            .chain(std::iter::once(query)),
    );
    let query_vec = vocabulary.vectorize(query);

    let mut scored: Vec<Neighbor> = corpus
        .iter()
        .map(|(run_id, signature)| Neighbor {
            run_id: run_id.clone(),
            similarity: cosine_similarity(&query_vec, &vocabulary.vectorize(signature)),
        })
        .collect();
    scored.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.run_id.cmp(&b.run_id))
    });
    scored.truncate(k);
    scored
}

/// K-NN anomaly score: the mean similarity to the query's K nearest
/// neighbors. An empty corpus is not anomalous (score 1.0).
pub fn anomaly_score(
    query: &EffectSignature,
    corpus: &[(String, EffectSignature)],
    k: usize,
    threshold: f64,
) -> AnomalyReport {
    if corpus.is_empty() {
        return AnomalyReport {
            score: 1.0,
            anomalous: false,
            k,
            threshold,
            neighbors: Vec::new(),
        };
    }
    let neighbors = nearest_neighbors(query, corpus, k);
    let score =
        neighbors.iter().map(|n| n.similarity).sum::<f64>() / neighbors.len() as f64;
    AnomalyReport {
        score,
        anomalous: score < threshold,
        k,
        threshold,
        neighbors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::SignatureEffects;

    fn signature_with(f: impl FnOnce(&mut SignatureEffects)) -> EffectSignature {
        let mut sig = EffectSignature::empty("0.0.0-test");
        f(&mut sig.effects);
        sig
    }

    fn web_signature(host: &str) -> EffectSignature {
        signature_with(|e| {
            e.fs_writes = vec!["src/index.ts".to_string()];
            e.net_hosts = vec![host.to_string()];
            e.net_protocols = vec!["https".to_string()];
            e.exec_commands = vec!["node".to_string()];
        })
    }

    #[test]
    fn test_tokens_prefixed_by_category() {
        let sig = signature_with(|e| {
            e.fs_writes = vec!["src/a.ts".to_string()];
            e.net_hosts = vec!["api.example.com".to_string()];
            e.net_ports = vec![443];
        });
        let tokens = signature_tokens(&sig);
        assert!(tokens.contains(&"fs_w:src/a.ts".to_string()));
        assert!(tokens.contains(&"net_h:api.example.com".to_string()));
        assert!(tokens.contains(&"net_port:443".to_string()));
    }

    #[test]
    fn test_vocabulary_sorted_dedup() {
        let a = web_signature("api.example.com");
        let b = web_signature("api.example.com");
        let vocabulary = Vocabulary::build([&a, &b]);
        assert_eq!(vocabulary.len(), 4);
        let mut sorted = vocabulary.tokens().to_vec();
        sorted.sort();
        assert_eq!(sorted, vocabulary.tokens());
    }

    #[test]
    fn test_identical_signatures_cosine_one() {
        let a = web_signature("api.example.com");
        let b = web_signature("api.example.com");
        let vocabulary = Vocabulary::build([&a, &b]);
        let similarity =
            cosine_similarity(&vocabulary.vectorize(&a), &vocabulary.vectorize(&b));
        assert!((similarity - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_disjoint_signatures_cosine_zero() {
        let a = signature_with(|e| e.net_hosts = vec!["a.example.com".to_string()]);
        let b = signature_with(|e| e.net_hosts = vec!["b.example.com".to_string()]);
        let vocabulary = Vocabulary::build([&a, &b]);
        let similarity =
            cosine_similarity(&vocabulary.vectorize(&a), &vocabulary.vectorize(&b));
        assert_eq!(similarity, 0.0);
    }

    #[test]
    fn test_partial_overlap_between_zero_and_one() {
        let a = web_signature("api.example.com");
        let b = web_signature("other.example.com");
        let vocabulary = Vocabulary::build([&a, &b]);
        let similarity =
            cosine_similarity(&vocabulary.vectorize(&a), &vocabulary.vectorize(&b));
        assert!(similarity > 0.0 && similarity < 1.0);
        // 3 of 4 tokens shared: 3/4.
        assert!((similarity - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_empty_signatures_compare_as_identical() {
        let a = EffectSignature::empty("0.0.0-test");
        let b = EffectSignature::empty("0.0.0-test");
        let vocabulary = Vocabulary::build([&a, &b]);
        assert_eq!(
            cosine_similarity(&vocabulary.vectorize(&a), &vocabulary.vectorize(&b)),
            1.0
        );
    }

    #[test]
    fn test_nearest_neighbors_ranked() {
        let query = web_signature("api.example.com");
        let corpus = vec![
            ("run-identical".to_string(), web_signature("api.example.com")),
            ("run-close".to_string(), web_signature("other.example.com")),
            (
                "run-far".to_string(),
                signature_with(|e| e.exec_commands = vec!["curl".to_string()]),
            ),
        ];
        let neighbors = nearest_neighbors(&query, &corpus, 2);
        assert_eq!(neighbors.len(), 2);
        assert_eq!(neighbors[0].run_id, "run-identical");
        assert_eq!(neighbors[1].run_id, "run-close");
        assert!(neighbors[0].similarity > neighbors[1].similarity);
    }

    #[test]
    fn test_anomaly_empty_corpus() {
        let query = web_signature("api.example.com");
        let report = anomaly_score(&query, &[], DEFAULT_K, DEFAULT_THRESHOLD);
        assert_eq!(report.score, 1.0);
        assert!(!report.anomalous);
        assert!(report.neighbors.is_empty());
    }

    #[test]
    fn test_anomaly_flags_outlier() {
        let corpus: Vec<(String, EffectSignature)> = (0..5)
            .map(|i| (format!("run-{}", i), web_signature("api.example.com")))
            .collect();

        let normal = web_signature("api.example.com");
        let normal_report = anomaly_score(&normal, &corpus, DEFAULT_K, DEFAULT_THRESHOLD);
        assert!(!normal_report.anomalous);
        assert!((normal_report.score - 1.0).abs() < 1e-9);

        let rogue = signature_with(|e| {
            e.net_hosts = vec!["evil.com".to_string()];
            e.exec_commands = vec!["nc".to_string()];
            e.sensitive_keys_accessed = vec!["AWS_SECRET_ACCESS_KEY".to_string()];
        });
        let rogue_report = anomaly_score(&rogue, &corpus, DEFAULT_K, DEFAULT_THRESHOLD);
        assert!(rogue_report.anomalous);
        assert!(rogue_report.score < DEFAULT_THRESHOLD);
    }

    #[test]
    fn test_load_run_signatures_skips_malformed(){
        let dir = tempfile::tempdir().unwrap();
        let runs = dir.path().join("runs");
        let good = runs.join("run-good");
        std::fs::create_dir_all(&good).unwrap();
        web_signature("api.example.com")
            .save(&good.join("signature.json"))
            .unwrap();

        let bad = runs.join("run-bad");
        std::fs::create_dir_all(&bad).unwrap();
        std::fs::write(bad.join("signature.json"), "{broken").unwrap();

        let empty = runs.join("run-empty");
        std::fs::create_dir_all(&empty).unwrap();

        let corpus = load_run_signatures(&runs);
        assert_eq!(corpus.len(), 1);
        assert_eq!(corpus[0].0, "run-good");
    }
}
