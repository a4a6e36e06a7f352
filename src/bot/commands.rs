use teloxide::utils::command::BotCommands;

/// The slash commands the bot understands.
#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "lowercase", description = "支持的命令：")]
pub enum Command {
    /// Show the welcome message.
    #[command(description = "开始使用")]
    Start,
    /// Delete the caller's newest transaction.
    #[command(description = "撤回最近一条记录")]
    Undo,
    /// Delete one of the caller's transactions by ID.
    #[command(description = "删除记录，例如 /delete 12")]
    Delete(String),
    /// Rename the item of one of the caller's transactions.
    #[command(description = "修改项目，例如 /edit 12 午饭")]
    Edit(String),
}

/// Whether `text` is a slash command, known or not.
///
/// Unknown commands are ignored instead of being read as expenses or item names.
pub fn is_command(text: &str) -> bool {
    text.trim_start().starts_with('/')
}
