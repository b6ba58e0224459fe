//! Versioned prompt templates (design §4.2), stored in the Setting table:
//! `prompt:{base}:active` names the live version; `prompt:{base}:{version}`
//! holds its text. Two placeholders are substituted before sending.

use digest_store::Store;

/// Resolves and renders the active template for `base`, falling back to
/// `fallback` if no override has been configured.
pub async fn render(
    store: &dyn Store,
    base: &str,
    fallback: &str,
    lang_instruction: &str,
    message_count: usize,
) -> digest_core::Result<String> {
    let template = resolve_template(store, base, fallback).await?;
    Ok(substitute(&template, lang_instruction, message_count))
}

async fn resolve_template(
    store: &dyn Store,
    base: &str,
    fallback: &str,
) -> digest_core::Result<String> {
    let active_key = format!("prompt:{base}:active");
    let Some(version) = store.get_setting(&active_key).await? else {
        return Ok(fallback.to_string());
    };
    let Some(version) = version.as_str() else {
        return Ok(fallback.to_string());
    };
    let text_key = format!("prompt:{base}:{version}");
    match store.get_setting(&text_key).await? {
        Some(value) => Ok(value.as_str().unwrap_or(fallback).to_string()),
        None => Ok(fallback.to_string()),
    }
}

fn substitute(template: &str, lang_instruction: &str, message_count: usize) -> String {
    template
        .replace("{{LANG_INSTRUCTION}}", lang_instruction)
        .replace("{{MESSAGE_COUNT}}", &message_count.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use digest_store::InMemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn falls_back_when_no_override_configured() {
        let store = InMemoryStore::default();
        let rendered = render(&store, "score", "score {{MESSAGE_COUNT}} in {{LANG_INSTRUCTION}}", "en", 3)
            .await
            .unwrap();
        assert_eq!(rendered, "score 3 in en");
    }

    #[tokio::test]
    async fn uses_active_version_when_configured() {
        let store = InMemoryStore::default();
        store
            .put_setting("prompt:score:active", json!("v2"))
            .await
            .unwrap();
        store
            .put_setting("prompt:score:v2", json!("v2 template {{MESSAGE_COUNT}}"))
            .await
            .unwrap();
        let rendered = render(&store, "score", "fallback", "en", 5).await.unwrap();
        assert_eq!(rendered, "v2 template 5");
    }
}
