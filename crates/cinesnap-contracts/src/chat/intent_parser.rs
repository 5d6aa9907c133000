use std::collections::BTreeMap;

use super::command_registry::{
    CommandSpec, DOWNLOAD_COMMAND, NO_ARG_COMMANDS, QUALITY_SHORTCUT_COMMANDS, SELECTOR_COMMANDS,
    SETTING_COMMANDS,
};

/// One line of studio input, resolved to an action name plus its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudioCommand {
    pub action: String,
    pub raw: String,
    pub prompt: Option<String>,
    pub args: BTreeMap<String, String>,
}

impl StudioCommand {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            prompt: None,
            args: BTreeMap::new(),
        }
    }

    fn with_arg(mut self, key: &str, value: impl Into<String>) -> Self {
        self.args.insert(key.to_string(), value.into());
        self
    }

    pub fn arg(&self, key: &str) -> Option<&str> {
        self.args
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }
}

fn find_spec(command: &str, specs: &[CommandSpec]) -> Option<CommandSpec> {
    specs.iter().find(|spec| spec.command == command).copied()
}

fn parse_single_path_arg(arg: &str) -> String {
    if arg.trim().is_empty() {
        return String::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect::<Vec<String>>()
            .join(" "),
        Err(_) => arg.trim().to_string(),
    }
}

/// Plain text becomes a `generate` command; `/name args` resolves through the registry.
pub fn parse_studio_command(text: &str) -> StudioCommand {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return StudioCommand::new("noop", text);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let arg = slash_tail[command_len..].trim();

            if let Some(spec) = find_spec(&command, SETTING_COMMANDS) {
                let value = if spec.action == "set_negative" {
                    arg.to_string()
                } else {
                    arg.to_ascii_lowercase()
                };
                return StudioCommand::new(spec.action, text).with_arg(spec.arg_key, value);
            }

            if QUALITY_SHORTCUT_COMMANDS.iter().any(|value| *value == command) {
                return StudioCommand::new("set_quality", text).with_arg("quality_preset", command);
            }

            if let Some(spec) = find_spec(&command, SELECTOR_COMMANDS) {
                return StudioCommand::new(spec.action, text).with_arg(spec.arg_key, arg);
            }

            if command == DOWNLOAD_COMMAND.command {
                return StudioCommand::new(DOWNLOAD_COMMAND.action, text)
                    .with_arg(DOWNLOAD_COMMAND.arg_key, parse_single_path_arg(arg));
            }

            if let Some(spec) = find_spec(&command, NO_ARG_COMMANDS) {
                return StudioCommand::new(spec.action, text);
            }

            return StudioCommand::new("unknown", text)
                .with_arg("command", command)
                .with_arg("arg", arg);
        }
    }

    let mut command = StudioCommand::new("generate", text);
    command.prompt = Some(raw_trimmed.to_string());
    command
}
