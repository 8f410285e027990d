//! Capability filter (4.I): drops generic-IR fields the target
//! provider's `requestFromGeneric` cannot honor, before it runs.

use crate::types::{GenericRequest, Provider};

/// Mutate `req` in place, clearing fields the target provider doesn't
/// support. Pure with respect to everything but `req` itself.
pub fn filter_for_target(req: &mut GenericRequest, target: Provider) {
    match target {
        Provider::Ollama => {
            req.response_format = None;
            if let Some(opts) = req.stream_options.as_mut() {
                opts.include_usage = false;
            }
            req.n = None;
            // `logprobs` has no Ollama options-schema equivalent; it only
            // ever reaches `req` via the OpenAI request's flattened
            // extension bag, so it's dropped there rather than as a
            // first-class field.
            req.extensions.remove("logprobs");
            // `seed` maps onto `options.seed` in the Ollama options schema,
            // so it's left in place rather than dropped.
        }
        Provider::OpenAI => {
            // Pass through; OpenAI-shaped backends honor the full generic
            // surface this proxy models.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Role, GenericMessage, StreamOptions};

    fn base_request() -> GenericRequest {
        GenericRequest {
            provider: Provider::OpenAI,
            model: "m".into(),
            messages: vec![GenericMessage::text(Role::User, "hi")],
            max_tokens: None,
            temperature: None,
            top_p: None,
            top_k: None,
            repetition_penalty: None,
            frequency_penalty: None,
            presence_penalty: None,
            seed: None,
            stop: None,
            tools: vec![],
            tool_choice: None,
            parallel_tool_calls: None,
            response_format: Some(crate::types::ResponseFormat::JsonObject),
            stream: false,
            stream_options: Some(StreamOptions { include_usage: true }),
            n: Some(2),
            extensions: Default::default(),
        }
    }

    #[test]
    fn drops_unsupported_fields_for_ollama_target() {
        let mut req = base_request();
        filter_for_target(&mut req, Provider::Ollama);
        assert!(req.response_format.is_none());
        assert!(!req.stream_options.unwrap().include_usage);
        assert!(req.n.is_none());
    }

    #[test]
    fn drops_logprobs_extension_for_ollama_target() {
        let mut req = base_request();
        req.extensions.insert("logprobs".to_string(), serde_json::json!(true));
        filter_for_target(&mut req, Provider::Ollama);
        assert!(req.extensions.get("logprobs").is_none());
    }

    #[test]
    fn openai_target_is_untouched() {
        let mut req = base_request();
        filter_for_target(&mut req, Provider::OpenAI);
        assert!(req.response_format.is_some());
        assert_eq!(req.n, Some(2));
    }
}
