#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
    pub arg_key: &'static str,
}

/// Commands whose whole remainder is one setting value.
pub(crate) const SETTING_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "aspect",
        action: "set_aspect",
        arg_key: "aspect_ratio",
    },
    CommandSpec {
        command: "quality",
        action: "set_quality",
        arg_key: "quality_preset",
    },
    CommandSpec {
        command: "camera",
        action: "set_camera",
        arg_key: "camera_view",
    },
    CommandSpec {
        command: "negative",
        action: "set_negative",
        arg_key: "negative_prompt",
    },
];

pub(crate) const QUALITY_SHORTCUT_COMMANDS: &[&str] = &["sd", "hd", "ultra"];

pub(crate) const SELECTOR_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "restore",
        action: "restore",
        arg_key: "selector",
    },
    CommandSpec {
        command: "copy",
        action: "copy_prompt",
        arg_key: "selector",
    },
];

pub(crate) const DOWNLOAD_COMMAND: CommandSpec = CommandSpec {
    command: "download",
    action: "download",
    arg_key: "path",
};

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "history",
        action: "history",
        arg_key: "",
    },
    CommandSpec {
        command: "clear",
        action: "clear_history",
        arg_key: "",
    },
    CommandSpec {
        command: "key",
        action: "select_key",
        arg_key: "",
    },
    CommandSpec {
        command: "settings",
        action: "settings",
        arg_key: "",
    },
    CommandSpec {
        command: "help",
        action: "help",
        arg_key: "",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
        arg_key: "",
    },
    CommandSpec {
        command: "exit",
        action: "quit",
        arg_key: "",
    },
];

pub const STUDIO_HELP_COMMANDS: &[&str] = &[
    "/aspect <1:1|3:4|4:3|9:16|16:9>",
    "/quality <sd|hd|ultra>",
    "/sd",
    "/hd",
    "/ultra",
    "/camera <view>",
    "/negative [text]",
    "/history",
    "/restore <#n|id>",
    "/copy <#n|id>",
    "/download [dir]",
    "/clear",
    "/key",
    "/settings",
    "/help",
    "/quit",
];
