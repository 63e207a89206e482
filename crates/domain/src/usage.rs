use serde::{Deserialize, Serialize};

/// Dollar cost mirror of the token counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenCost {
    #[serde(default)]
    pub input: f64,
    #[serde(default)]
    pub output: f64,
    #[serde(default)]
    pub cache_read: f64,
    #[serde(default)]
    pub cache_write: f64,
    #[serde(default)]
    pub total: f64,
}

/// Token usage for one provider call, or the running total for a turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
    #[serde(default)]
    pub cache_write_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub cost: TokenCost,
}

impl Usage {
    /// Fold the usage of one more provider call into a running total.
    ///
    /// Input, output, and total counters are summed. Cache counters are
    /// REPLACED with the latest call's values: providers report cumulative
    /// cache hits per request, not per increment, so summing them would
    /// double-count.
    pub fn accumulate(&mut self, latest: &Usage) {
        self.input_tokens += latest.input_tokens;
        self.output_tokens += latest.output_tokens;
        self.total_tokens += latest.total_tokens;
        self.cache_read_tokens = latest.cache_read_tokens;
        self.cache_write_tokens = latest.cache_write_tokens;

        self.cost.input += latest.cost.input;
        self.cost.output += latest.cost.output;
        self.cost.total += latest.cost.total;
        self.cost.cache_read = latest.cost.cache_read;
        self.cost.cache_write = latest.cost.cache_write;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(input: u64, output: u64, cache_read: u64) -> Usage {
        Usage {
            input_tokens: input,
            output_tokens: output,
            cache_read_tokens: cache_read,
            total_tokens: input + output,
            ..Usage::default()
        }
    }

    #[test]
    fn accumulate_sums_io_and_replaces_cache() {
        let mut total = usage(100, 50, 10);
        total.accumulate(&usage(200, 30, 75));

        assert_eq!(total.input_tokens, 300);
        assert_eq!(total.output_tokens, 80);
        assert_eq!(total.total_tokens, 380);
        // Replaced, not summed.
        assert_eq!(total.cache_read_tokens, 75);
    }

    #[test]
    fn accumulate_from_default_equals_latest() {
        let mut total = Usage::default();
        total.accumulate(&usage(10, 5, 3));
        assert_eq!(total.input_tokens, 10);
        assert_eq!(total.cache_read_tokens, 3);
        assert_eq!(total.total_tokens, 15);
    }
}
