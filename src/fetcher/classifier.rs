//! Keyword-based research-domain classification for provider ordering.

use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::provider::Provider;
use crate::request::normalize_words;

/// Research domain used to pick which providers to try first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    /// Medicine, biology, life sciences.
    Biomedical,
    /// Computing, machine learning, software.
    ComputerScience,
    /// Physics, astronomy.
    Physics,
    /// Anything else.
    General,
}

impl Domain {
    /// Snake-case name, as used in config files.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Biomedical => "biomedical",
            Self::ComputerScience => "computer_science",
            Self::Physics => "physics",
            Self::General => "general",
        }
    }
}

impl Display for Domain {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "biomedical" | "bio" | "medicine" => Ok(Self::Biomedical),
            "computer_science" | "cs" => Ok(Self::ComputerScience),
            "physics" => Ok(Self::Physics),
            "general" => Ok(Self::General),
            other => Err(format!(
                "unknown domain '{other}' (expected biomedical, computer_science, physics or general)"
            )),
        }
    }
}

const BIOMEDICAL_KEYWORDS: &[&str] = &[
    "clinical", "patient", "patients", "disease", "protein", "proteins", "gene", "genes",
    "genome", "genomic", "cell", "cells", "cancer", "tumor", "drug", "therapy", "medical",
    "medicine", "biology", "biological", "molecular", "enzyme", "neuron", "neural tissue",
    "virus", "bacterial", "immune", "trial", "epidemiology", "rna", "dna", "pharmacology",
];

const COMPUTER_SCIENCE_KEYWORDS: &[&str] = &[
    "algorithm", "algorithms", "neural network", "deep learning", "machine learning",
    "transformer", "software", "compiler", "database", "distributed", "network protocol",
    "language model", "computer", "computing", "programming", "graph neural", "reinforcement",
    "dataset", "benchmark", "optimization", "cryptography", "kernel", "gpu",
];

const PHYSICS_KEYWORDS: &[&str] = &[
    "quantum", "particle", "particles", "boson", "quark", "gravitational", "relativity",
    "cosmology", "astrophysics", "galaxy", "galaxies", "photon", "superconductor",
    "superconductivity", "plasma", "thermodynamics", "hadron", "neutrino", "magnetic",
];

/// Scores free text against per-domain keyword lists.
///
/// The domain with the most keyword hits wins; no hits or a tie yields
/// [`Domain::General`].
#[derive(Debug, Clone)]
pub struct DomainClassifier {
    keywords: Vec<(Domain, Vec<String>)>,
}

impl Default for DomainClassifier {
    fn default() -> Self {
        let to_owned =
            |words: &[&str]| -> Vec<String> { words.iter().map(ToString::to_string).collect() };
        Self {
            keywords: vec![
                (Domain::Biomedical, to_owned(BIOMEDICAL_KEYWORDS)),
                (Domain::ComputerScience, to_owned(COMPUTER_SCIENCE_KEYWORDS)),
                (Domain::Physics, to_owned(PHYSICS_KEYWORDS)),
            ],
        }
    }
}

impl DomainClassifier {
    /// Creates a classifier with custom keyword lists.
    ///
    /// Keywords are normalized the same way as the text they are matched
    /// against; multi-word keywords match as phrases.
    #[must_use]
    pub fn with_keywords(keywords: Vec<(Domain, Vec<String>)>) -> Self {
        Self {
            keywords: keywords
                .into_iter()
                .map(|(domain, words)| {
                    (
                        domain,
                        words
                            .iter()
                            .map(|w| normalize_words(w))
                            .filter(|w| !w.is_empty())
                            .collect(),
                    )
                })
                .collect(),
        }
    }

    /// Classifies text into a domain.
    #[must_use]
    pub fn classify(&self, text: &str) -> Domain {
        let normalized = normalize_words(text);
        if normalized.is_empty() {
            return Domain::General;
        }
        // Padding turns phrase matching into whole-word matching.
        let haystack = format!(" {normalized} ");

        let mut best = Domain::General;
        let mut best_score = 0;
        let mut tied = false;
        for (domain, words) in &self.keywords {
            let score = words
                .iter()
                .filter(|word| haystack.contains(&format!(" {word} ")))
                .count();
            if score > best_score {
                best = *domain;
                best_score = score;
                tied = false;
            } else if score == best_score && score > 0 {
                tied = true;
            }
        }

        if tied || best_score == 0 {
            Domain::General
        } else {
            best
        }
    }

    /// Orders providers for a domain: those declaring it first, then the
    /// rest. Registration order is kept within each group.
    #[must_use]
    pub fn order_providers(
        &self,
        providers: &[Arc<dyn Provider>],
        domain: Domain,
    ) -> Vec<Arc<dyn Provider>> {
        let (preferred, rest): (Vec<_>, Vec<_>) = providers
            .iter()
            .cloned()
            .partition(|provider| provider.domains().contains(&domain));
        preferred.into_iter().chain(rest).collect()
    }
}
