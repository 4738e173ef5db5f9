use crate::types::{ApiKeySet, ProviderFamily, Result, RockpoolError};

/// One row of the static model table: public model id, display label, the
/// backing provider family, the upstream model name sent on the wire, and
/// the web-search tool name when the model supports one.
#[derive(Debug, Clone, Copy)]
pub struct ModelSpec {
    pub id: &'static str,
    pub label: &'static str,
    pub family: ProviderFamily,
    pub upstream: &'static str,
    pub web_search: Option<&'static str>,
}

const WEB_SEARCH_PREVIEW: &str = "web_search_preview";

pub const MODEL_REGISTRY: &[ModelSpec] = &[
    ModelSpec {
        id: "gpt-5",
        label: "GPT-5",
        family: ProviderFamily::OpenAi,
        upstream: "gpt-5",
        web_search: Some(WEB_SEARCH_PREVIEW),
    },
    ModelSpec {
        id: "gpt-5-mini",
        label: "GPT-5 Mini",
        family: ProviderFamily::OpenAi,
        upstream: "gpt-5-mini",
        web_search: Some(WEB_SEARCH_PREVIEW),
    },
    ModelSpec {
        id: "gpt-5-nano",
        label: "GPT-5 Nano",
        family: ProviderFamily::OpenAi,
        upstream: "gpt-5-nano",
        web_search: Some(WEB_SEARCH_PREVIEW),
    },
    ModelSpec {
        id: "gpt-4.1",
        label: "GPT-4.1",
        family: ProviderFamily::OpenAi,
        upstream: "gpt-4.1",
        web_search: Some(WEB_SEARCH_PREVIEW),
    },
    ModelSpec {
        id: "gpt-4.1-mini",
        label: "GPT-4.1 Mini",
        family: ProviderFamily::OpenAi,
        upstream: "gpt-4.1-mini",
        web_search: Some(WEB_SEARCH_PREVIEW),
    },
    ModelSpec {
        id: "o4-mini",
        label: "o4-mini",
        family: ProviderFamily::OpenAi,
        upstream: "o4-mini",
        web_search: None,
    },
    ModelSpec {
        id: "o3",
        label: "o3",
        family: ProviderFamily::OpenAi,
        upstream: "o3",
        web_search: None,
    },
    ModelSpec {
        id: "claude-sonnet-4",
        label: "Claude Sonnet 4",
        family: ProviderFamily::Anthropic,
        upstream: "claude-sonnet-4-20250514",
        web_search: None,
    },
    ModelSpec {
        id: "claude-opus-4",
        label: "Claude 4 Opus",
        family: ProviderFamily::Anthropic,
        upstream: "claude-opus-4-20250514",
        web_search: None,
    },
    ModelSpec {
        id: "gemini-2.5-flash-lite",
        label: "Gemini 2.5 Flash Lite",
        family: ProviderFamily::Google,
        upstream: "gemini-2.5-flash-lite-preview-06-17",
        web_search: None,
    },
    ModelSpec {
        id: "gemini-2.5-flash",
        label: "Gemini 2.5 Flash",
        family: ProviderFamily::Google,
        upstream: "gemini-2.5-flash",
        web_search: None,
    },
    ModelSpec {
        id: "gemini-2.5-pro",
        label: "Gemini 2.5 Pro",
        family: ProviderFamily::Google,
        upstream: "gemini-2.5-pro",
        web_search: None,
    },
    ModelSpec {
        id: "deepseek-r1",
        label: "DeepSeek R1",
        family: ProviderFamily::Groq,
        upstream: "deepseek-r1-distill-llama-70b",
        web_search: None,
    },
    ModelSpec {
        id: "llama-4-maverick",
        label: "Llama 4 Maverick",
        family: ProviderFamily::Groq,
        upstream: "meta-llama/llama-4-maverick-17b-128e-instruct",
        web_search: None,
    },
    ModelSpec {
        id: "llama-3.1-8b",
        label: "Llama 3.1 8B",
        family: ProviderFamily::Groq,
        upstream: "llama-3.1-8b-instant",
        web_search: None,
    },
    ModelSpec {
        id: "gpt-4.1-openrouter",
        label: "GPT-4.1",
        family: ProviderFamily::OpenRouter,
        upstream: "openai/gpt-4.1",
        web_search: None,
    },
    ModelSpec {
        id: "gpt-4.1-mini-openrouter",
        label: "GPT-4.1 Mini",
        family: ProviderFamily::OpenRouter,
        upstream: "openai/gpt-4.1-mini",
        web_search: None,
    },
    ModelSpec {
        id: "o4-mini-openrouter",
        label: "o4-mini",
        family: ProviderFamily::OpenRouter,
        upstream: "openai/o4-mini",
        web_search: None,
    },
    ModelSpec {
        id: "claude-sonnet-4-openrouter",
        label: "Claude Sonnet 4",
        family: ProviderFamily::OpenRouter,
        upstream: "anthropic/claude-sonnet-4",
        web_search: None,
    },
    ModelSpec {
        id: "claude-opus-4-openrouter",
        label: "Claude 4 Opus",
        family: ProviderFamily::OpenRouter,
        upstream: "anthropic/claude-opus-4",
        web_search: None,
    },
    ModelSpec {
        id: "gemini-2.5-flash-lite-openrouter",
        label: "Gemini 2.5 Flash Lite",
        family: ProviderFamily::OpenRouter,
        upstream: "google/gemini-2.5-flash-lite-preview-06-17",
        web_search: None,
    },
    ModelSpec {
        id: "gemini-2.5-flash-openrouter",
        label: "Gemini 2.5 Flash",
        family: ProviderFamily::OpenRouter,
        upstream: "google/gemini-2.5-flash",
        web_search: None,
    },
    ModelSpec {
        id: "gemini-2.5-pro-openrouter",
        label: "Gemini 2.5 Pro",
        family: ProviderFamily::OpenRouter,
        upstream: "google/gemini-2.5-pro",
        web_search: None,
    },
];

pub fn lookup(model_id: &str) -> Option<&'static ModelSpec> {
    MODEL_REGISTRY.iter().find(|spec| spec.id == model_id)
}

/// Credential family a model id requires, derived from the id string alone.
/// The explicit "openrouter" marker is checked first and overrides family
/// inference, so e.g. "claude-sonnet-4-openrouter" needs the OpenRouter key,
/// not the Anthropic one.
pub fn required_provider(model_id: &str) -> Option<ProviderFamily> {
    if model_id.contains("openrouter") {
        return Some(ProviderFamily::OpenRouter);
    }
    if model_id.starts_with("gpt-") || model_id.starts_with("o3") || model_id.starts_with("o4-") {
        return Some(ProviderFamily::OpenAi);
    }
    if model_id.starts_with("claude-") {
        return Some(ProviderFamily::Anthropic);
    }
    if model_id.starts_with("gemini-") {
        return Some(ProviderFamily::Google);
    }
    if model_id.contains("deepseek-r1") || model_id.contains("llama-") {
        return Some(ProviderFamily::Groq);
    }
    None
}

/// Tool configuration for one invocation. `forced` maps to a forced
/// tool-choice on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolConfig {
    pub tool: &'static str,
    pub forced: bool,
}

/// A forced tool is attached only when the model actually supports it;
/// unsupported requests are ignored rather than failed, since tools only
/// augment a generation.
pub fn tools_for(spec: &ModelSpec, force_tool: Option<&str>) -> Option<ToolConfig> {
    let requested = force_tool?;
    match spec.web_search {
        Some(capability) if capability == requested => Some(ToolConfig {
            tool: capability,
            forced: true,
        }),
        _ => None,
    }
}

/// Outcome of a successful resolution: the table row, the caller's decrypted
/// credential for the required family, and any tool configuration.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub spec: &'static ModelSpec,
    pub api_key: String,
    pub tools: Option<ToolConfig>,
}

/// Resolves a model id against the registry and the caller's credentials.
/// Failure here is deterministic and terminal; the orchestrator surfaces it
/// on the stream without invoking any provider.
pub fn resolve(model_id: &str, keys: &ApiKeySet, force_tool: Option<&str>) -> Result<Resolved> {
    let spec = match lookup(model_id) {
        Some(s) => s,
        None => return Err(RockpoolError::UnknownModel(model_id.to_string()).into()),
    };

    let key_family = match required_provider(model_id) {
        Some(f) => f,
        None => return Err(RockpoolError::UnknownModel(model_id.to_string()).into()),
    };

    let api_key = match keys.get(key_family) {
        Some(k) => k.to_string(),
        None => return Err(RockpoolError::MissingApiKey(model_id.to_string()).into()),
    };

    Ok(Resolved {
        spec,
        api_key,
        tools: tools_for(spec, force_tool),
    })
}
