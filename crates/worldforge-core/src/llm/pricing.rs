//! LLM pricing lookup for cost accounting.
//!
//! Prices are USD per million tokens for the OpenRouter model ids the
//! pipeline actually uses; unknown vendors default to $0 so self-hosted
//! models never accrue phantom spend.

/// Per-token pricing for a model.
#[derive(Debug, Clone, Copy)]
pub struct ModelPricing {
    /// USD per million input tokens.
    pub input_per_million: f64,
    /// USD per million output tokens.
    pub output_per_million: f64,
}

impl ModelPricing {
    /// Compute the estimated cost for the given token counts.
    pub fn compute_cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        let input_cost = (f64::from(input_tokens) / 1_000_000.0) * self.input_per_million;
        let output_cost = (f64::from(output_tokens) / 1_000_000.0) * self.output_per_million;
        input_cost + output_cost
    }
}

const FREE: ModelPricing = ModelPricing {
    input_per_million: 0.0,
    output_per_million: 0.0,
};

/// Look up pricing for an OpenRouter model id (`vendor/model`).
pub fn lookup(model: &str) -> ModelPricing {
    let (vendor, name) = model.split_once('/').unwrap_or(("", model));
    match vendor {
        "openai" => lookup_openai(name),
        "google" => lookup_google(name),
        "anthropic" => lookup_anthropic(name),
        "deepseek" => ModelPricing {
            input_per_million: 0.14,
            output_per_million: 0.28,
        },
        _ => FREE,
    }
}

fn lookup_openai(name: &str) -> ModelPricing {
    if name.starts_with("gpt-4o-mini") {
        ModelPricing {
            input_per_million: 0.15,
            output_per_million: 0.60,
        }
    } else if name.starts_with("gpt-4o") {
        ModelPricing {
            input_per_million: 2.50,
            output_per_million: 10.0,
        }
    } else if name.starts_with("gpt-3.5") {
        ModelPricing {
            input_per_million: 0.50,
            output_per_million: 1.50,
        }
    } else {
        // Unknown OpenAI model: price like gpt-4o-mini rather than free.
        ModelPricing {
            input_per_million: 0.15,
            output_per_million: 0.60,
        }
    }
}

fn lookup_google(name: &str) -> ModelPricing {
    if name.starts_with("gemini-flash-1.5-8b") {
        ModelPricing {
            input_per_million: 0.0375,
            output_per_million: 0.15,
        }
    } else if name.starts_with("gemini-flash") {
        ModelPricing {
            input_per_million: 0.075,
            output_per_million: 0.30,
        }
    } else if name.starts_with("gemini-pro") {
        ModelPricing {
            input_per_million: 1.25,
            output_per_million: 5.0,
        }
    } else {
        FREE
    }
}

fn lookup_anthropic(name: &str) -> ModelPricing {
    if name.contains("opus") {
        ModelPricing {
            input_per_million: 15.0,
            output_per_million: 75.0,
        }
    } else if name.contains("sonnet") {
        ModelPricing {
            input_per_million: 3.0,
            output_per_million: 15.0,
        }
    } else if name.contains("haiku") {
        ModelPricing {
            input_per_million: 0.25,
            output_per_million: 1.25,
        }
    } else {
        FREE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_model_is_priced() {
        let pricing = lookup("google/gemini-flash-1.5-8b");
        assert!(pricing.input_per_million > 0.0);
        assert!(pricing.output_per_million > 0.0);
    }

    #[test]
    fn unknown_vendor_is_free() {
        let pricing = lookup("mistralai/mistral-7b-instruct");
        assert_eq!(pricing.compute_cost(1_000_000, 1_000_000), 0.0);
    }

    #[test]
    fn cost_scales_with_tokens() {
        let pricing = lookup("openai/gpt-4o-mini");
        let cost = pricing.compute_cost(1_000_000, 1_000_000);
        assert!((cost - 0.75).abs() < 1e-9);
    }

    #[test]
    fn bare_model_name_without_vendor_is_free() {
        assert_eq!(lookup("local-llama").compute_cost(1000, 1000), 0.0);
    }
}
