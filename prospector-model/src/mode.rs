use std::{fmt, str::FromStr};

use crate::error::ModelError;

/// Closed set of research strategies the orchestrator can launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum ResearchMode {
    ContrarianScan,
    SentimentBurst,
    DeepReasoning,
    /// Meta-mode fanning a single job out across every individual mode.
    FullSpectrum,
}

impl ResearchMode {
    pub const INDIVIDUAL: [ResearchMode; 3] = [
        ResearchMode::ContrarianScan,
        ResearchMode::SentimentBurst,
        ResearchMode::DeepReasoning,
    ];

    pub fn all() -> &'static [ResearchMode] {
        &[
            ResearchMode::ContrarianScan,
            ResearchMode::SentimentBurst,
            ResearchMode::DeepReasoning,
            ResearchMode::FullSpectrum,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResearchMode::ContrarianScan => "CONTRARIAN_SCAN",
            ResearchMode::SentimentBurst => "SENTIMENT_BURST",
            ResearchMode::DeepReasoning => "DEEP_REASONING",
            ResearchMode::FullSpectrum => "FULL_SPECTRUM",
        }
    }

    pub fn cost_class(&self) -> CostClass {
        match self {
            ResearchMode::SentimentBurst => CostClass::Low,
            ResearchMode::ContrarianScan => CostClass::Medium,
            ResearchMode::DeepReasoning | ResearchMode::FullSpectrum => {
                CostClass::High
            }
        }
    }

    /// Individual modes covered by a job of this mode.
    pub fn sub_modes(&self) -> &'static [ResearchMode] {
        match self {
            ResearchMode::ContrarianScan => &[ResearchMode::ContrarianScan],
            ResearchMode::SentimentBurst => &[ResearchMode::SentimentBurst],
            ResearchMode::DeepReasoning => &[ResearchMode::DeepReasoning],
            ResearchMode::FullSpectrum => &Self::INDIVIDUAL,
        }
    }

    pub fn is_meta(&self) -> bool {
        matches!(self, ResearchMode::FullSpectrum)
    }
}

impl fmt::Display for ResearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResearchMode {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "CONTRARIAN_SCAN" => Ok(ResearchMode::ContrarianScan),
            "SENTIMENT_BURST" => Ok(ResearchMode::SentimentBurst),
            "DEEP_REASONING" => Ok(ResearchMode::DeepReasoning),
            "FULL_SPECTRUM" => Ok(ResearchMode::FullSpectrum),
            _ => Err(ModelError::UnknownVariant {
                kind: "research mode",
                value: s.to_string(),
            }),
        }
    }
}

/// Spend tier used to pick a provider budget and a launch estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum CostClass {
    Low,
    Medium,
    High,
}

impl CostClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            CostClass::Low => "LOW",
            CostClass::Medium => "MEDIUM",
            CostClass::High => "HIGH",
        }
    }
}

impl fmt::Display for CostClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CostClass {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(CostClass::Low),
            "MEDIUM" => Ok(CostClass::Medium),
            "HIGH" => Ok(CostClass::High),
            _ => Err(ModelError::UnknownVariant {
                kind: "cost class",
                value: s.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_names_parse_back() {
        for mode in ResearchMode::all() {
            assert_eq!(mode.as_str().parse::<ResearchMode>().unwrap(), *mode);
        }
        assert_eq!(
            "deep-reasoning".parse::<ResearchMode>().unwrap(),
            ResearchMode::DeepReasoning
        );
        assert!("MOMENTUM".parse::<ResearchMode>().is_err());
    }

    #[test]
    fn full_spectrum_covers_every_individual_mode() {
        let subs = ResearchMode::FullSpectrum.sub_modes();
        assert_eq!(subs, &ResearchMode::INDIVIDUAL);
        assert!(!subs.contains(&ResearchMode::FullSpectrum));
        assert_eq!(
            ResearchMode::SentimentBurst.sub_modes(),
            &[ResearchMode::SentimentBurst]
        );
    }

    #[test]
    fn cost_class_follows_mode() {
        assert_eq!(ResearchMode::SentimentBurst.cost_class(), CostClass::Low);
        assert_eq!(ResearchMode::ContrarianScan.cost_class(), CostClass::Medium);
        assert_eq!(ResearchMode::DeepReasoning.cost_class(), CostClass::High);
        assert_eq!(ResearchMode::FullSpectrum.cost_class(), CostClass::High);
    }
}
