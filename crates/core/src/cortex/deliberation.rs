//! L3 Deliberation: model selection, prompt assembly, and the structured
//! call.  Three call modes: native tool calling, lite structured, and full
//! structured with the repair chain.

use anyhow::Result;
use regex::Regex;
use tracing::{debug, info, warn};

use mentat_llm::{chat_structured, ChatMessage, LlmProvider, StructuredError, StructuredPrompt};

use crate::cortex::interpretation::Interpretation;
use crate::cortex::{ConsciousnessStack, CortexContext};
use crate::ensemble::{render_trace, triage};
use crate::repair;
use crate::schema::{ActionCall, AgentResponse, IntentKind, LiteResponse, Sentiment};

pub(super) async fn deliberate(
    stack: &ConsciousnessStack,
    user_input: &str,
    interp: &Interpretation,
    ctx: &CortexContext,
) -> Result<AgentResponse> {
    let provider = stack.router().select(&interp.recommended_capabilities);
    debug!(profile = provider.profile_name(), caps = ?interp.recommended_capabilities, "deliberation model selected");

    // Ensemble debate: first step of complex intents only.
    let ensemble_block = if !ctx.use_lite && ctx.action_results.is_empty() && ctx.use_ensemble {
        let selected = triage(interp.intent, interp.sentiment);
        if selected.is_empty() {
            String::new()
        } else {
            let full_history = ctx
                .memory
                .working
                .iter()
                .map(|m| format!("{}: {}", m.role, m.content))
                .collect::<Vec<_>>()
                .join(" | ");
            let history_digest = tail_chars(&full_history, 1000);
            let trace = stack
                .ensemble()
                .run(user_input, &ctx.memory.identity, &history_digest, &selected)
                .await;
            render_trace(&trace)
        }
    } else {
        String::new()
    };

    let mut prompt = StructuredPrompt::new(user_input)
        .with_messages(build_history(user_input, ctx));
    prompt.set_identity(build_identity(stack, interp, ctx, &ensemble_block));
    prompt.add_cognitive("Choose the right tool for the job. If no tool is needed, just respond naturally.");
    if !ctx.project_instructions.is_empty() {
        prompt.add_context(&format!("PROJECT INSTRUCTIONS:\n{}", ctx.project_instructions));
    }

    let tools = stack.registry().tool_definitions();
    let has_tools = tools.as_array().map(|a| !a.is_empty()).unwrap_or(false);

    // Vision: attach the most recent screenshot from prior observations.
    let image = find_screenshot(ctx).await;

    let started = std::time::Instant::now();
    let mut response = if ctx.use_lite && provider.supports_native_tools() && has_tools {
        // Native tool-calling fast path.
        info!(tool_count = tools.as_array().map(|a| a.len()).unwrap_or(0), "deliberation: native tool calling");
        let mut messages = prompt.build();
        attach_image(&mut messages, &image);
        match provider.chat_with_tools(&messages, &tools).await {
            Ok(outcome) => {
                let action = outcome.tool_calls.first().map(|tc| {
                    ActionCall::new(tc.function.name.clone(), tc.function.arguments.clone())
                });
                let content = if outcome.content.trim().is_empty() {
                    match &action {
                        Some(a) => format!("I will use {}.", a.skill_name),
                        None => "Understood.".to_string(),
                    }
                } else {
                    outcome.content
                };
                let confidence = if action.is_some() { 0.9 } else { 0.5 };
                LiteResponse { final_response: content, action, confidence }.into_full()
            }
            Err(err) => {
                warn!(%err, "native tool call failed, falling back to lite structured");
                lite_structured(provider.as_ref(), &messages).await
            }
        }
    } else if ctx.use_lite {
        let mut messages = prompt.build();
        attach_image(&mut messages, &image);
        lite_structured(provider.as_ref(), &messages).await
    } else {
        // Full structured path: tool schemas are injected as prompt context
        // and the model answers in the response schema.
        if has_tools {
            prompt.add_context(&format!(
                "AVAILABLE TOOLS (JSON Schema):\n{tools}\n\
                 To use a tool, fill the 'action' field of your JSON response."
            ));
        }
        let mut messages = prompt.build();
        attach_image(&mut messages, &image);
        full_structured(provider.as_ref(), &messages).await
    };
    let success = !response.final_response.is_empty() || response.action.is_some();
    provider.telemetry().record(started.elapsed().as_secs_f64(), success);

    response.sentiment = interp.sentiment;
    response.intent = interp.intent;

    // The contract downstream layers rely on: always a populated response.
    if response.final_response.trim().is_empty() {
        response.final_response = if response.final_thought.primary_strategy.is_empty() {
            "I processed your request.".to_string()
        } else {
            response.final_thought.primary_strategy.clone()
        };
    }
    Ok(response)
}

async fn lite_structured(
    provider: &dyn mentat_llm::LlmProvider,
    messages: &[ChatMessage],
) -> AgentResponse {
    match chat_structured::<LiteResponse>(provider, messages, &LiteResponse::schema_hint()).await {
        Ok(lite) => lite.into_full(),
        Err(err) => recover(err),
    }
}

async fn full_structured(
    provider: &dyn mentat_llm::LlmProvider,
    messages: &[ChatMessage],
) -> AgentResponse {
    match chat_structured::<AgentResponse>(provider, messages, &AgentResponse::schema_hint()).await
    {
        Ok(response) => response,
        Err(err) => recover(err),
    }
}

/// Run the repair chain over whatever the model actually said.
fn recover(err: StructuredError) -> AgentResponse {
    match (err.value().cloned(), err.raw()) {
        (Some(value), _) => match repair::parse_value(value) {
            Ok(response) => response,
            Err(text) => repair::parse_agent_response(&text),
        },
        (None, Some(raw)) => repair::parse_agent_response(raw),
        (None, None) => {
            warn!(%err, "deliberation transport failure");
            let mut response = repair::parse_agent_response("");
            response.final_response =
                format!("My deliberation layer encountered a model error: {err}");
            response.final_thought.confidence = 0.0;
            response
        }
    }
}

fn build_history(user_input: &str, ctx: &CortexContext) -> Vec<ChatMessage> {
    let mut messages = vec![];
    for (i, msg) in ctx.memory.working.iter().enumerate() {
        // The current request is appended by the prompt builder; skip its
        // working-memory echo.
        if i == ctx.memory.working.len() - 1 && msg.role == "user" && msg.content == user_input {
            continue;
        }
        messages.push(match msg.role.as_str() {
            "assistant" => ChatMessage::assistant(msg.content.clone()),
            _ => ChatMessage::user(msg.content.clone()),
        });
    }
    // ReAct observations become assistant/user turn pairs.
    for record in &ctx.action_results {
        messages.push(ChatMessage::assistant(format!(
            "Thought: I will execute {}.",
            record.action
        )));
        messages.push(ChatMessage::user(format!(
            "Observation: {}",
            record.outcome_text()
        )));
    }
    messages
}

fn build_identity(
    stack: &ConsciousnessStack,
    interp: &Interpretation,
    ctx: &CortexContext,
    ensemble_block: &str,
) -> String {
    let reflection_directive =
        if interp.intent == IntentKind::Correction || interp.sentiment == Sentiment::Frustrated {
            "\nSELF-REFLECTION:\nThe user is providing feedback or a correction. Before proposing \
             a new plan, briefly reflect on your previous answer and why it may have missed.\n"
        } else {
            ""
        };

    let episodic = ctx
        .memory
        .episodes
        .iter()
        .map(|e| format!("- {} -> {} -> {}", e.intent, e.action, e.outcome))
        .collect::<Vec<_>>()
        .join("\n");
    let lessons = ctx
        .memory
        .lessons
        .iter()
        .map(|l| format!("- {l}"))
        .collect::<Vec<_>>()
        .join("\n");
    let failures = ctx.memory.failures.join("\n");

    let memory_block = format!(
        "\n--- HIERARCHICAL MEMORY STACK ---\n{}\n{}\n\n\
         CONSOLIDATED WISDOM (semantic narrative insights):\n{}\n\n\
         SEMANTIC MEMORY (abstracted lessons):\n{}\n\n\
         EPISODIC MEMORY (recalled shared experiences):\n{}\n{}",
        ctx.memory.identity,
        ctx.evolution_log,
        if ctx.memory.wisdom.is_empty() { "Initial interactions." } else { &ctx.memory.wisdom },
        if lessons.is_empty() { "None" } else { &lessons },
        if episodic.is_empty() { "None" } else { &episodic },
        if failures.is_empty() { String::new() } else { format!("\nKNOWN FAILURES TO AVOID:\n{failures}") },
    );

    let url_info = if ctx.url_context.is_empty() {
        String::new()
    } else {
        let clipped: String = ctx.url_context.chars().take(3000).collect();
        format!("\nFETCHED URL CONTENT (actual page data, use THIS, do not guess):\n{clipped}\n")
    };

    let mut awareness = String::new();
    if !ctx.world_context.is_empty() {
        awareness.push_str(&format!("\nWORLD AWARENESS:\n{}\n", ctx.world_context));
    }
    if !ctx.signals_context.is_empty() {
        awareness.push_str(&format!("\nCOGNITIVE STATE:\n{}\n", ctx.signals_context));
    }

    let react_note = if ctx.action_results.is_empty() {
        ""
    } else {
        "\nYou are in a MULTI-STEP reasoning loop. Previous action results appear in the \
         conversation above.\n\
         If the task is complete, provide the final_response with NO action.\n\
         If more actions are needed, provide the NEXT action.\n"
    };

    format!(
        "{persona}\n{reflection_directive}{memory_block}\n{ensemble_block}\
         \n{skills}\n{url_info}{awareness}{react_note}\n\
         RESPONSE RULES:\n\
         1. ALWAYS provide a substantive, accurate answer in 'final_response'.\n\
         2. NEVER use generic placeholders like 'Processing request' when a question was asked.\n\
         3. If the user wants an action (open app, pause music, ...), set the 'action' field.\n\
         4. Media control: skill_name='media_control', parameters={{'action': ...}}.\n\
         5. Opening apps: skill_name='system_control', parameters={{'action': 'open_app', 'name': ...}}.\n\
         6. Web search: skill_name='research', parameters={{'query': ...}}.\n\
         7. If you don't know a current fact, use the 'research' skill. Do not guess.\n\
         8. Never repeat tool results verbatim; synthesize them into a natural answer.",
        persona = stack.persona_prompt(),
        skills = stack.registry().context_description(),
    )
}

/// Last `n` chars of a string, on char boundaries.
fn tail_chars(text: &str, n: usize) -> String {
    let count = text.chars().count();
    text.chars().skip(count.saturating_sub(n)).collect()
}

/// Look for a screenshot path in prior observations, newest first.
async fn find_screenshot(ctx: &CortexContext) -> Option<String> {
    let re = Regex::new(r"Screenshot captured successfully at: (\S+\.png)").ok()?;
    for record in ctx.action_results.iter().rev() {
        if let Some(captures) = re.captures(record.outcome_text()) {
            let path = captures[1].trim().to_string();
            match tokio::fs::read(&path).await {
                Ok(bytes) => {
                    info!(path, "attaching screenshot to deliberation");
                    return Some(base64_encode(&bytes));
                }
                Err(err) => warn!(path, %err, "screenshot unreadable"),
            }
        }
    }
    None
}

fn attach_image(messages: &mut [ChatMessage], image: &Option<String>) {
    let Some(image) = image else { return };
    if let Some(last_user) = messages
        .iter_mut()
        .rev()
        .find(|m| m.role == mentat_llm::ChatRole::User)
    {
        last_user.images.push(image.clone());
    }
}

/// Minimal standard base64; avoids pulling an encoder crate for one call
/// site.
fn base64_encode(bytes: &[u8]) -> String {
    const TABLE: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::with_capacity(bytes.len().div_ceil(3) * 4);
    for chunk in bytes.chunks(3) {
        let b = [chunk[0], *chunk.get(1).unwrap_or(&0), *chunk.get(2).unwrap_or(&0)];
        let n = ((b[0] as u32) << 16) | ((b[1] as u32) << 8) | b[2] as u32;
        out.push(TABLE[(n >> 18) as usize & 63] as char);
        out.push(TABLE[(n >> 12) as usize & 63] as char);
        out.push(if chunk.len() > 1 { TABLE[(n >> 6) as usize & 63] as char } else { '=' });
        out.push(if chunk.len() > 2 { TABLE[n as usize & 63] as char } else { '=' });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ActionRecord;

    #[test]
    fn base64_matches_known_vectors() {
        assert_eq!(base64_encode(b""), "");
        assert_eq!(base64_encode(b"f"), "Zg==");
        assert_eq!(base64_encode(b"fo"), "Zm8=");
        assert_eq!(base64_encode(b"foo"), "Zm9v");
        assert_eq!(base64_encode(b"foobar"), "Zm9vYmFy");
    }

    #[test]
    fn history_includes_observation_pairs() {
        let mut ctx = CortexContext::default();
        ctx.action_results.push(ActionRecord {
            skill: "research".into(),
            action: "research({\"query\":\"x\"})".into(),
            result: Some("found it".into()),
            error: None,
            step: 1,
        });
        let history = build_history("next step", &ctx);
        assert_eq!(history.len(), 2);
        assert!(history[0].content.as_ref().unwrap().contains("I will execute"));
        assert!(history[1].content.as_ref().unwrap().contains("Observation: found it"));
    }

    #[test]
    fn attach_image_targets_last_user_message() {
        let mut messages = vec![
            ChatMessage::system("sys"),
            ChatMessage::user("first"),
            ChatMessage::assistant("mid"),
            ChatMessage::user("last"),
        ];
        attach_image(&mut messages, &Some("AAAA".to_string()));
        assert!(messages[3].images.len() == 1);
        assert!(messages[1].images.is_empty());
    }
}
