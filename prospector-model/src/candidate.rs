use serde_json::Value;

/// A strategy idea returned by the research executor.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct StrategyCandidate {
    pub name: String,
    pub archetype_name: String,
    pub hypothesis: String,
    pub rules_json: Value,
}

/// Token and spend figures reported alongside executor output.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase", default))]
pub struct ResearchDiagnostics {
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    /// Total when the executor does not split input and output.
    pub tokens_used: Option<i64>,
    pub cost_usd: Option<f64>,
}

impl ResearchDiagnostics {
    /// Sum two reports; absent figures stay absent only when both are.
    pub fn merge(self, other: ResearchDiagnostics) -> ResearchDiagnostics {
        fn add<T: std::ops::Add<Output = T>>(
            a: Option<T>,
            b: Option<T>,
        ) -> Option<T> {
            match (a, b) {
                (Some(a), Some(b)) => Some(a + b),
                (a, None) => a,
                (None, b) => b,
            }
        }
        ResearchDiagnostics {
            input_tokens: add(self.input_tokens, other.input_tokens),
            output_tokens: add(self.output_tokens, other.output_tokens),
            tokens_used: add(self.tokens_used, other.tokens_used),
            cost_usd: add(self.cost_usd, other.cost_usd),
        }
    }

    /// Input tokens, falling back to the undivided total.
    pub fn input_or_total(&self) -> Option<i64> {
        self.input_tokens.or(self.tokens_used)
    }
}
