use sqlpad_core::confirmation::ConfirmationKind;
use sqlpad_core::pagination::PageRequest;
use sqlpad_core::ConnectionId;
use thiserror::Error;

pub const HELP: &str = "\
:new                 open an empty query tab
:table <name>        open a preview tab for a table
:tabs                list open tabs
:use <n>             activate tab n
:close [n]           close tab n (default: active tab)
:closeall            close every tab
:dup                 duplicate the active tab
:rename <name>       rename the active tab
:run                 execute the active tab's draft
:rerun               re-execute the last committed query
:check multi|data    tick a confirmation checkbox
:uncheck multi|data  untick a confirmation checkbox
:proceed             run the query awaiting confirmation
:cancel              drop the query awaiting confirmation
:page <n>            fetch page n
:next / :prev        fetch the next or previous page
:first / :last       fetch the first or last page
:size <n>            change the page size
:connect <id>        switch the active connection
:yes / :no           answer a pending connection switch
:save                save every draft now
:show                print the active tab
:clear               empty the active tab's draft
:help                show this help
:quit                leave
Any other line is appended to the active tab's draft.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    NewTab,
    OpenTable(String),
    ListTabs,
    UseTab(usize),
    CloseTab(Option<usize>),
    CloseAll,
    Duplicate,
    Rename(String),
    Run,
    Rerun,
    SetConfirmation {
        kind: ConfirmationKind,
        checked: bool,
    },
    Proceed,
    Cancel,
    Page(PageRequest),
    Connect(ConnectionId),
    ConfirmSwitch,
    DeclineSwitch,
    Save,
    Show,
    Clear,
    Help,
    Quit,
    Append(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unknown command `:{0}`, try :help")]
    Unknown(String),
    #[error("`:{command}` expects {expected}")]
    MissingArgument {
        command: &'static str,
        expected: &'static str,
    },
    #[error("`:{command}` cannot use `{value}`")]
    InvalidArgument {
        command: &'static str,
        value: String,
    },
}

/// Parses one line of shell input. Lines that do not start with `:` are SQL.
pub fn parse_line(line: &str) -> Result<Command, CommandError> {
    let Some(command_line) = line.trim_start().strip_prefix(':') else {
        return Ok(Command::Append(line.to_string()));
    };
    let (name, argument) = match command_line.trim().split_once(char::is_whitespace) {
        Some((name, argument)) => (name, Some(argument.trim()).filter(|arg| !arg.is_empty())),
        None => (command_line.trim(), None),
    };

    let command = match name {
        "new" => Command::NewTab,
        "table" => Command::OpenTable(required(argument, "table", "a table name")?.to_string()),
        "tabs" => Command::ListTabs,
        "use" => Command::UseTab(position(argument, "use")?),
        "close" => Command::CloseTab(argument.map(|_| position(argument, "close")).transpose()?),
        "closeall" => Command::CloseAll,
        "dup" => Command::Duplicate,
        "rename" => Command::Rename(required(argument, "rename", "a new name")?.to_string()),
        "run" => Command::Run,
        "rerun" => Command::Rerun,
        "check" => Command::SetConfirmation {
            kind: confirmation_kind(argument, "check")?,
            checked: true,
        },
        "uncheck" => Command::SetConfirmation {
            kind: confirmation_kind(argument, "uncheck")?,
            checked: false,
        },
        "proceed" => Command::Proceed,
        "cancel" => Command::Cancel,
        "page" => Command::Page(PageRequest::Goto(number(argument, "page")?)),
        "next" => Command::Page(PageRequest::Next),
        "prev" => Command::Page(PageRequest::Previous),
        "first" => Command::Page(PageRequest::First),
        "last" => Command::Page(PageRequest::Last),
        "size" => Command::Page(PageRequest::Resize(number(argument, "size")?)),
        "connect" => Command::Connect(number(argument, "connect")?),
        "yes" => Command::ConfirmSwitch,
        "no" => Command::DeclineSwitch,
        "save" => Command::Save,
        "show" => Command::Show,
        "clear" => Command::Clear,
        "help" => Command::Help,
        "quit" | "q" => Command::Quit,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(command)
}

fn required<'a>(
    argument: Option<&'a str>,
    command: &'static str,
    expected: &'static str,
) -> Result<&'a str, CommandError> {
    argument.ok_or(CommandError::MissingArgument { command, expected })
}

fn number<T: std::str::FromStr>(
    argument: Option<&str>,
    command: &'static str,
) -> Result<T, CommandError> {
    let raw = required(argument, command, "a number")?;
    raw.parse().map_err(|_| CommandError::InvalidArgument {
        command,
        value: raw.to_string(),
    })
}

/// 1-based tab position as shown by `:tabs`.
fn position(argument: Option<&str>, command: &'static str) -> Result<usize, CommandError> {
    let value = number::<usize>(argument, command)?;
    if value == 0 {
        return Err(CommandError::InvalidArgument {
            command,
            value: value.to_string(),
        });
    }
    Ok(value)
}

fn confirmation_kind(
    argument: Option<&str>,
    command: &'static str,
) -> Result<ConfirmationKind, CommandError> {
    match required(argument, command, "`multi` or `data`")? {
        "multi" => Ok(ConfirmationKind::MultipleStatements),
        "data" => Ok(ConfirmationKind::DataModification),
        other => Err(CommandError::InvalidArgument {
            command,
            value: other.to_string(),
        }),
    }
}
