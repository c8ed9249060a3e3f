//! Slash-command surface: meta commands recognized at the start of input,
//! short-circuiting before cognition.

use tracing::warn;

use mentat_llm::LlmProvider;
use mentat_memory::WorkingMessage;

use crate::controller::Controller;

/// Handle a slash command; `None` means the input is not a command and the
/// pipeline continues.
pub(crate) async fn handle_slash(controller: &Controller, input: &str) -> Option<String> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return None;
    }
    let (command, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((c, r)) => (c, r.trim()),
        None => (trimmed, ""),
    };

    match command.to_lowercase().as_str() {
        "/scorecard" => {
            let summary = controller.scorecard.lock().unwrap().summary();
            let stats = summary
                .iter()
                .map(|(k, v)| format!("- {k}: {v:.2}"))
                .collect::<Vec<_>>()
                .join("\n");
            Some(format!("INTELLIGENCE SCORECARD (longitudinal stability):\n{stats}"))
        }

        "/model" => {
            let active = controller.router().default_provider();
            Some(format!(
                "ACTIVE DEFAULT: {} ({})\nAVAILABLE PROFILES: {}",
                active.profile_name(),
                active.model_name(),
                controller.router().profiles().join(", ")
            ))
        }

        "/evolve" => {
            let pending = controller.evolution().pending();
            if pending.is_empty() {
                return Some("Evolution stack: stable. No pending modifications.".to_string());
            }
            let items = pending
                .iter()
                .map(|m| format!("- [{}] {} (streak: {}/3)", m.id, m.description, m.success_count))
                .collect::<Vec<_>>()
                .join("\n");
            Some(format!(
                "PENDING EVOLUTION PROPOSALS:\n{items}\n\nUse /approve <id> or /reject <id> to moderate."
            ))
        }

        "/approve" => {
            if rest.is_empty() {
                return Some("Usage: /approve <id>".to_string());
            }
            match controller
                .evolution()
                .approve(rest, &controller.reflex, controller.registry())
            {
                Ok(true) => Some(format!("Evolution: modification {rest} applied to core behavior.")),
                Ok(false) => Some("Invalid mutation ID.".to_string()),
                Err(err) => Some(format!("Evolution: modification {rest} rejected - {err}")),
            }
        }

        "/reject" => {
            if rest.is_empty() {
                return Some("Usage: /reject <id>".to_string());
            }
            if controller.evolution().reject(rest) {
                Some(format!("Evolution: modification {rest} discarded."))
            } else {
                Some("Invalid mutation ID.".to_string())
            }
        }

        "/forge" => {
            if rest.is_empty() {
                return Some("Usage: /forge <task description>".to_string());
            }
            match controller
                .evolution()
                .propose_skill(rest, controller.router(), controller.registry())
                .await
            {
                Ok(Some(_)) => Some(format!(
                    "Forge: synthesis staged for '{rest}'. Review the proposal with /evolve."
                )),
                Ok(None) => Some("Forge: synthesis produced no usable manifest.".to_string()),
                Err(err) => Some(format!("Forge: synthesis failed - {err}")),
            }
        }

        "/crystallize" => {
            match controller.evolution().crystallize_identity(controller.router()).await {
                Ok(()) => Some("Evolution: identity crystallized, mutation log archived.".to_string()),
                Err(err) => Some(format!("Crystallization failed: {err}")),
            }
        }

        "/dream" => {
            controller.spawn_consolidation();
            Some("Dream cycle started. Episodes will consolidate into semantic wisdom.".to_string())
        }

        "/scan" => {
            let workspace = controller.workspace_dir.clone();
            let modules = {
                let mut world = controller.world.lock().unwrap();
                world.analyze_workspace(&workspace);
                world.scan_codebase(&workspace);
                world.state.codebase_graph.len()
            };
            Some(format!("World engine: codebase graph rebuilt. {modules} modules mapped."))
        }

        "/restore" => {
            let checkpoints = controller.checkpoints.lock().await;
            if rest.is_empty() {
                let list = checkpoints.list(20);
                if list.is_empty() {
                    return Some(
                        "No checkpoints found. Checkpoints are created before file/shell actions."
                            .to_string(),
                    );
                }
                let mut lines = vec![
                    "ID       | Time                | Action".to_string(),
                    "-".repeat(50),
                ];
                for snapshot in list {
                    lines.push(format!(
                        "{:8} | {} | {}",
                        snapshot.id,
                        snapshot.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        snapshot.description.chars().take(40).collect::<String>()
                    ));
                }
                return Some(format!(
                    "CHECKPOINTS (use /restore <id> to revert):\n{}",
                    lines.join("\n")
                ));
            }
            Some(match checkpoints.restore(rest) {
                Ok(message) => message,
                Err(err) => format!("Restore failed: {err}"),
            })
        }

        "/save" => {
            if rest.is_empty() || !rest.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_') {
                return Some("Usage: /save <name>  (e.g. /save my-session)".to_string());
            }
            let trace = controller.memory.lock().await.working.trace();
            let sessions_dir = controller.data_dir.join("sessions");
            let path = sessions_dir.join(format!("{rest}.json"));
            let result = std::fs::create_dir_all(&sessions_dir).and_then(|_| {
                std::fs::write(
                    &path,
                    serde_json::to_string_pretty(&serde_json::json!({ "messages": trace }))
                        .unwrap_or_default(),
                )
            });
            Some(match result {
                Ok(()) => format!("Session saved to {} ({} messages).", path.display(), trace.len()),
                Err(err) => format!("Save failed: {err}"),
            })
        }

        "/load" => {
            if rest.is_empty() {
                return Some("Usage: /load <name>  (e.g. /load my-session)".to_string());
            }
            let path = controller.data_dir.join("sessions").join(format!("{rest}.json"));
            let raw = match std::fs::read_to_string(&path) {
                Ok(raw) => raw,
                Err(_) => return Some(format!("Session not found: {}", path.display())),
            };
            let messages: Vec<WorkingMessage> = match serde_json::from_str::<serde_json::Value>(&raw)
                .ok()
                .and_then(|v| serde_json::from_value(v.get("messages")?.clone()).ok())
            {
                Some(messages) => messages,
                None => return Some("Load failed: session file is malformed.".to_string()),
            };
            let count = messages.len();
            if let Err(err) = controller.memory.lock().await.working.replace_trace(messages) {
                warn!(%err, "session load failed");
                return Some(format!("Load failed: {err}"));
            }
            Some(format!("Loaded session '{rest}' ({count} messages)."))
        }

        "/benchmark" => {
            // The suite drives the controller recursively; boxing breaks the
            // otherwise-infinite future type.
            let report = Box::pin(crate::benchmark::run_suite(controller, "current")).await;
            Some(report)
        }

        "/missions" => {
            let missions = controller.missions().list();
            if missions.is_empty() {
                return Some("No active missions.".to_string());
            }
            let lines = missions
                .iter()
                .map(|m| {
                    format!(
                        "- [{}] {} (priority {}, {:?}, {:.0}% done)",
                        m.id,
                        m.description,
                        m.priority,
                        m.status,
                        m.progress * 100.0
                    )
                })
                .collect::<Vec<_>>()
                .join("\n");
            Some(format!("ACTIVE MISSIONS:\n{lines}"))
        }

        _ => None,
    }
}
